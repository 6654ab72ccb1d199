//! Client configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::attribute::{MAX_MTU, MIN_MTU};
use crate::error::GattError;

/// Settings for a [`GattClient`](crate::GattClient).
///
/// Missing fields take their default when deserialized:
///
/// ```
/// use gattq::GattConfig;
///
/// let config = GattConfig::from_json(r#"{ "operation_timeout_ms": 5000 }"#).unwrap();
/// assert_eq!(config.initial_mtu, 23);
/// assert_eq!(config.operation_timeout().map(|t| t.as_millis()), Some(5000));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GattConfig {
    /// MTU assumed right after a connection is established.
    pub initial_mtu: u16,
    /// Upper bound for MTU requests.
    pub max_mtu: u16,
    /// Deadline for timeout-capable operations that set none. `None` or zero
    /// means no deadline.
    pub operation_timeout_ms: Option<u64>,
    /// Whether the default timeout handler disconnects when an operation that
    /// held the transport times out.
    pub disconnect_on_timeout: bool,
    /// Capacity of the notification broadcast channel.
    pub notification_capacity: usize,
}

impl Default for GattConfig {
    fn default() -> Self {
        Self {
            initial_mtu: MIN_MTU,
            max_mtu: MAX_MTU,
            operation_timeout_ms: None,
            disconnect_on_timeout: true,
            notification_capacity: 64,
        }
    }
}

impl GattConfig {
    pub fn from_json(json: &str) -> Result<Self, GattError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| GattError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, GattError> {
        serde_json::to_string_pretty(self).map_err(|e| GattError::Config(e.to_string()))
    }

    pub fn operation_timeout(&self) -> Option<Duration> {
        self.operation_timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout_ms = Some(timeout.as_millis().try_into().unwrap_or(u64::MAX));
        self
    }

    pub fn validate(&self) -> Result<(), GattError> {
        if !(MIN_MTU..=MAX_MTU).contains(&self.max_mtu) {
            return Err(GattError::Config(format!(
                "max_mtu {} outside {}..={}",
                self.max_mtu, MIN_MTU, MAX_MTU
            )));
        }
        if !(MIN_MTU..=self.max_mtu).contains(&self.initial_mtu) {
            return Err(GattError::Config(format!(
                "initial_mtu {} outside {}..={}",
                self.initial_mtu, MIN_MTU, self.max_mtu
            )));
        }
        if self.notification_capacity == 0 {
            return Err(GattError::Config(
                "notification_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(GattConfig::default().validate().is_ok());
        assert_eq!(GattConfig::default().operation_timeout(), None);
    }

    #[test]
    fn test_json_round_trip() {
        let config = GattConfig::default().with_operation_timeout(Duration::from_secs(3));
        let json = config.to_json().unwrap();
        assert_eq!(GattConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn test_zero_timeout_disables() {
        let config = GattConfig {
            operation_timeout_ms: Some(0),
            ..GattConfig::default()
        };
        assert_eq!(config.operation_timeout(), None);
    }

    #[test]
    fn test_rejects_out_of_range() {
        let err = GattConfig::from_json(r#"{ "initial_mtu": 10 }"#).unwrap_err();
        assert!(matches!(err, GattError::Config(_)));

        let err = GattConfig::from_json(r#"{ "max_mtu": 600 }"#).unwrap_err();
        assert!(matches!(err, GattError::Config(_)));

        let err = GattConfig::from_json(r#"{ "notification_capacity": 0 }"#).unwrap_err();
        assert!(matches!(err, GattError::Config(_)));

        let err = GattConfig::from_json("not json").unwrap_err();
        assert!(matches!(err, GattError::Config(_)));
    }
}
