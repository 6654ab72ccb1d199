//! Peers, attributes and the link-level parameter types
//!
//! Attribute discovery is out of scope: callers obtain handles and properties
//! from whatever enumerated the peer's database and wrap them in [`Attribute`].

use std::fmt;
use std::time::Duration;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Smallest ATT MTU every link supports.
pub const MIN_MTU: u16 = 23;
/// Largest ATT MTU a peer may negotiate.
pub const MAX_MTU: u16 = 517;

/// A BLE device address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BleAddress {
    /// A real 6-byte BLE MAC address.
    Real([u8; 6]),
    /// A simulated address identified by UUID.
    Simulated(Uuid),
}

impl fmt::Display for BleAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BleAddress::Real(mac) => {
                let parts: Vec<String> = mac.iter().map(|b| format!("{:02X}", b)).collect();
                f.write_str(&parts.join(":"))
            }
            BleAddress::Simulated(id) => write!(f, "sim:{}", id),
        }
    }
}

/// The remote device an operation runs against. Handed to every callback.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Peer {
    pub address: BleAddress,
    pub name: Option<String>,
}

impl Peer {
    pub fn new(address: BleAddress) -> Self {
        Self {
            address,
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} ({})", name, self.address),
            None => write!(f, "{}", self.address),
        }
    }
}

bitflags! {
    /// Characteristic properties as declared in the attribute database.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Properties: u8 {
        const BROADCAST = 0x01;
        const READ = 0x02;
        const WRITE_WITHOUT_RESPONSE = 0x04;
        const WRITE = 0x08;
        const NOTIFY = 0x10;
        const INDICATE = 0x20;
        const SIGNED_WRITE = 0x40;
        const EXTENDED = 0x80;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeKind {
    Characteristic(Properties),
    Descriptor,
}

/// A characteristic or a descriptor on the peer, never both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Attribute {
    handle: u16,
    uuid: Uuid,
    kind: AttributeKind,
}

impl Attribute {
    pub fn characteristic(handle: u16, uuid: Uuid, properties: Properties) -> Self {
        Self {
            handle,
            uuid,
            kind: AttributeKind::Characteristic(properties),
        }
    }

    pub fn descriptor(handle: u16, uuid: Uuid) -> Self {
        Self {
            handle,
            uuid,
            kind: AttributeKind::Descriptor,
        }
    }

    pub fn handle(&self) -> u16 {
        self.handle
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn kind(&self) -> AttributeKind {
        self.kind
    }

    /// Declared properties; descriptors have none.
    pub fn properties(&self) -> Properties {
        match self.kind {
            AttributeKind::Characteristic(properties) => properties,
            AttributeKind::Descriptor => Properties::empty(),
        }
    }

    pub fn is_descriptor(&self) -> bool {
        matches!(self.kind, AttributeKind::Descriptor)
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @0x{:04X}", self.uuid, self.handle)
    }
}

/// How a characteristic write is acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum WriteType {
    #[default]
    WithResponse,
    WithoutResponse,
    Signed,
}

impl WriteType {
    /// ATT header bytes reserved out of each MTU-sized packet.
    pub fn header_len(self) -> usize {
        match self {
            WriteType::WithResponse | WriteType::WithoutResponse => 3,
            WriteType::Signed => 12,
        }
    }

    pub fn required_property(self) -> Properties {
        match self {
            WriteType::WithResponse => Properties::WRITE,
            WriteType::WithoutResponse => Properties::WRITE_WITHOUT_RESPONSE,
            WriteType::Signed => Properties::SIGNED_WRITE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationMode {
    Disabled,
    Notify,
    Indicate,
}

impl NotificationMode {
    /// Value written to the Client Characteristic Configuration descriptor.
    pub fn cccd_value(self) -> [u8; 2] {
        match self {
            NotificationMode::Disabled => [0x00, 0x00],
            NotificationMode::Notify => [0x01, 0x00],
            NotificationMode::Indicate => [0x02, 0x00],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConnectionPriority {
    #[default]
    Balanced,
    High,
    LowPower,
}

/// Link timing reported after a connection priority change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionParameters {
    pub interval: Duration,
    pub latency: u16,
    pub supervision_timeout: Duration,
}

impl ConnectionParameters {
    /// Typical parameters a central grants for each priority.
    pub fn for_priority(priority: ConnectionPriority) -> Self {
        let (interval_ms, latency, timeout_ms) = match priority {
            ConnectionPriority::High => (15, 0, 5_000),
            ConnectionPriority::Balanced => (45, 0, 5_000),
            ConnectionPriority::LowPower => (100, 2, 5_000),
        };
        Self {
            interval: Duration::from_millis(interval_ms),
            latency,
            supervision_timeout: Duration::from_millis(timeout_ms),
        }
    }
}

bitflags! {
    /// Set of PHYs a connection may use.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PhyMask: u8 {
        const LE_1M = 0x01;
        const LE_2M = 0x02;
        const LE_CODED = 0x04;
    }
}

/// Coding preference when LE Coded is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PhyOption {
    #[default]
    NoPreferred,
    S2,
    S8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phy {
    Le1M,
    Le2M,
    LeCoded,
}

impl Phy {
    /// The fastest PHY allowed by `mask`, falling back to LE 1M.
    pub fn preferred(mask: PhyMask) -> Self {
        if mask.contains(PhyMask::LE_2M) {
            Phy::Le2M
        } else if mask.contains(PhyMask::LE_1M) || mask.is_empty() {
            Phy::Le1M
        } else {
            Phy::LeCoded
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PhyPair {
    pub tx: Phy,
    pub rx: Phy,
}

impl Default for PhyPair {
    fn default() -> Self {
        Self {
            tx: Phy::Le1M,
            rx: Phy::Le1M,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_has_no_properties() {
        let cccd = Attribute::descriptor(0x0010, Uuid::nil());
        assert!(cccd.is_descriptor());
        assert!(cccd.properties().is_empty());

        let chr = Attribute::characteristic(0x000E, Uuid::nil(), Properties::READ | Properties::NOTIFY);
        assert!(!chr.is_descriptor());
        assert!(chr.properties().contains(Properties::NOTIFY));
    }

    #[test]
    fn test_write_type_header() {
        assert_eq!(WriteType::WithResponse.header_len(), 3);
        assert_eq!(WriteType::WithoutResponse.header_len(), 3);
        assert_eq!(WriteType::Signed.header_len(), 12);
    }

    #[test]
    fn test_preferred_phy() {
        assert_eq!(Phy::preferred(PhyMask::LE_1M | PhyMask::LE_2M), Phy::Le2M);
        assert_eq!(Phy::preferred(PhyMask::LE_CODED), Phy::LeCoded);
        assert_eq!(Phy::preferred(PhyMask::empty()), Phy::Le1M);
    }

    #[test]
    fn test_address_display() {
        let addr = BleAddress::Real([0x01, 0x02, 0x03, 0x04, 0x05, 0xAB]);
        assert_eq!(addr.to_string(), "01:02:03:04:05:AB");

        let peer = Peer::new(addr).with_name("thermometer");
        assert_eq!(peer.to_string(), "thermometer (01:02:03:04:05:AB)");
    }
}
