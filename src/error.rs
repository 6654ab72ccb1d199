//! Status codes and error types
//!
//! `GattStatus` carries raw transport codes as well as the sentinels raised
//! locally by the dispatcher. `Failure` is what travels through the internal
//! outcome channel; `GattError` is what callers pattern-match on.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A numeric GATT/transport status.
///
/// Non-negative values come from the transport. Negative values are raised
/// by this crate and never sent by a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GattStatus(pub i32);

impl GattStatus {
    pub const SUCCESS: Self = Self(0x00);
    pub const INVALID_HANDLE: Self = Self(0x01);
    pub const READ_NOT_PERMITTED: Self = Self(0x02);
    pub const WRITE_NOT_PERMITTED: Self = Self(0x03);
    pub const INSUFFICIENT_AUTHENTICATION: Self = Self(0x05);
    pub const INVALID_ATTRIBUTE_LENGTH: Self = Self(0x0D);
    /// Generic stack error; the usual spurious connection failure.
    pub const GATT_ERROR: Self = Self(0x85);
    /// The peer never answered the connection attempt.
    pub const UNREACHABLE: Self = Self(0x93);

    pub const DEVICE_DISCONNECTED: Self = Self(-1);
    pub const REQUEST_FAILED: Self = Self(-4);
    pub const TIMEOUT: Self = Self(-5);
    /// A value did not pass the operation's filter.
    pub const VALIDATION: Self = Self(-6);
    pub const CANCELLED: Self = Self(-7);
    pub const BLUETOOTH_DISABLED: Self = Self(-100);

    pub fn code(self) -> i32 {
        self.0
    }

    pub fn is_success(self) -> bool {
        self == Self::SUCCESS
    }

    fn name(self) -> Option<&'static str> {
        Some(match self {
            Self::SUCCESS => "success",
            Self::INVALID_HANDLE => "invalid handle",
            Self::READ_NOT_PERMITTED => "read not permitted",
            Self::WRITE_NOT_PERMITTED => "write not permitted",
            Self::INSUFFICIENT_AUTHENTICATION => "insufficient authentication",
            Self::INVALID_ATTRIBUTE_LENGTH => "invalid attribute length",
            Self::GATT_ERROR => "GATT error",
            Self::UNREACHABLE => "device unreachable",
            Self::DEVICE_DISCONNECTED => "device disconnected",
            Self::REQUEST_FAILED => "request failed",
            Self::TIMEOUT => "timeout",
            Self::VALIDATION => "validation failed",
            Self::CANCELLED => "cancelled",
            Self::BLUETOOTH_DISABLED => "bluetooth disabled",
            _ => return None,
        })
    }
}

impl fmt::Display for GattStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.name(), self.0) {
            (Some(name), code) if code >= 0 => write!(f, "{} (0x{:02X})", name, code),
            (Some(name), code) => write!(f, "{} ({})", name, code),
            (None, code) if code >= 0 => write!(f, "status 0x{:02X}", code),
            (None, code) => write!(f, "status {}", code),
        }
    }
}

/// Terminal failure of an operation, as carried by the outcome channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// The operation could not be attempted at all.
    Invalid,
    /// The transport, or the dispatcher on its behalf, reported a status.
    Status(GattStatus),
}

impl Failure {
    pub fn status(self) -> Option<GattStatus> {
        match self {
            Failure::Invalid => None,
            Failure::Status(status) => Some(status),
        }
    }
}

/// Errors surfaced to callers that await or block on an operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GattError {
    #[error("Operation invalid: no connection context or unusable target attribute")]
    Invalid,

    #[error("Device disconnected")]
    Disconnected,

    #[error("Bluetooth adapter disabled")]
    AdapterDisabled,

    #[error("Operation timed out")]
    Timeout,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("GATT operation failed: {0}")]
    Failed(GattStatus),

    #[error("Operation completed with an unexpected result type")]
    UnexpectedValue,

    #[error("Dispatcher is no longer running")]
    Closed,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl GattError {
    /// The raw status behind this error, if there is one.
    pub fn status(&self) -> Option<GattStatus> {
        match self {
            GattError::Disconnected => Some(GattStatus::DEVICE_DISCONNECTED),
            GattError::AdapterDisabled => Some(GattStatus::BLUETOOTH_DISABLED),
            GattError::Timeout => Some(GattStatus::TIMEOUT),
            GattError::Cancelled => Some(GattStatus::CANCELLED),
            GattError::Failed(status) => Some(*status),
            GattError::Invalid
            | GattError::UnexpectedValue
            | GattError::Closed
            | GattError::Config(_) => None,
        }
    }
}

impl From<Failure> for GattError {
    fn from(failure: Failure) -> Self {
        match failure {
            Failure::Invalid => GattError::Invalid,
            Failure::Status(GattStatus::DEVICE_DISCONNECTED) => GattError::Disconnected,
            Failure::Status(GattStatus::BLUETOOTH_DISABLED) => GattError::AdapterDisabled,
            Failure::Status(GattStatus::TIMEOUT) => GattError::Timeout,
            Failure::Status(GattStatus::CANCELLED) => GattError::Cancelled,
            Failure::Status(status) => GattError::Failed(status),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinels_map_to_distinct_errors() {
        assert_eq!(
            GattError::from(Failure::Status(GattStatus::DEVICE_DISCONNECTED)),
            GattError::Disconnected
        );
        assert_eq!(
            GattError::from(Failure::Status(GattStatus::BLUETOOTH_DISABLED)),
            GattError::AdapterDisabled
        );
        assert_eq!(
            GattError::from(Failure::Status(GattStatus::TIMEOUT)),
            GattError::Timeout
        );
        assert_eq!(GattError::from(Failure::Invalid), GattError::Invalid);
    }

    #[test]
    fn test_generic_status_keeps_raw_code() {
        let err = GattError::from(Failure::Status(GattStatus(0x80)));
        assert_eq!(err, GattError::Failed(GattStatus(0x80)));
        assert_eq!(err.status(), Some(GattStatus(0x80)));
    }

    #[test]
    fn test_status_display() {
        assert_eq!(GattStatus::GATT_ERROR.to_string(), "GATT error (0x85)");
        assert_eq!(GattStatus::TIMEOUT.to_string(), "timeout (-5)");
        assert_eq!(GattStatus(0x42).to_string(), "status 0x42");
        assert_eq!(GattStatus(-42).to_string(), "status -42");
    }
}
