use std::marker::PhantomData;

use crate::attribute::{
    ConnectionParameters, ConnectionPriority, Peer, PhyMask, PhyOption, PhyPair, MAX_MTU, MIN_MTU,
};
use crate::queue::Job;

use super::hooks::typed_value;
use super::{Body, FromValue, Operation, OperationBuilder, OperationCore, OperationKind, Submit};

/// A negotiation or query that completes with a typed value.
pub struct ValueOperation<T> {
    core: OperationCore,
    kind: OperationKind,
    body: Body,
    _value: PhantomData<fn() -> T>,
}

pub type MtuOperation = ValueOperation<u16>;
pub type ConnectionPriorityOperation = ValueOperation<ConnectionParameters>;
pub type PhyOperation = ValueOperation<PhyPair>;
pub type RssiOperation = ValueOperation<i8>;

impl<T: FromValue> ValueOperation<T> {
    fn new(kind: OperationKind, body: Body) -> Self {
        Self {
            core: OperationCore::new(),
            kind,
            body,
            _value: PhantomData,
        }
    }

    /// Called with the typed result on success.
    pub fn with(mut self, f: impl FnOnce(&Peer, T) + Send + 'static) -> Self {
        self.core.hooks.value = Some(typed_value(f));
        self
    }
}

impl ValueOperation<u16> {
    /// Requests an ATT MTU, clamped to the range the protocol allows. Resolves
    /// to the MTU the peer agreed to.
    pub fn request_mtu(mtu: u16) -> Self {
        Self::new(
            OperationKind::RequestMtu,
            Body::Mtu(mtu.clamp(MIN_MTU, MAX_MTU)),
        )
    }
}

impl ValueOperation<ConnectionParameters> {
    pub fn request_connection_priority(priority: ConnectionPriority) -> Self {
        Self::new(
            OperationKind::RequestConnectionPriority,
            Body::ConnectionPriority(priority),
        )
    }
}

impl ValueOperation<PhyPair> {
    pub fn set_preferred_phy(tx: PhyMask, rx: PhyMask, options: PhyOption) -> Self {
        Self::new(
            OperationKind::SetPreferredPhy,
            Body::PreferredPhy { tx, rx, options },
        )
    }

    pub fn read_phy() -> Self {
        Self::new(OperationKind::ReadPhy, Body::Plain)
    }
}

impl ValueOperation<i8> {
    pub fn read_rssi() -> Self {
        Self::new(OperationKind::ReadRssi, Body::Plain)
    }
}

impl<T> From<ValueOperation<T>> for Operation {
    fn from(op: ValueOperation<T>) -> Self {
        Operation::with_core(op.core, op.kind, None, op.body)
    }
}

impl<T> OperationBuilder for ValueOperation<T> {
    fn core(&self) -> &OperationCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut OperationCore {
        &mut self.core
    }
}

impl<T: FromValue> Submit for ValueOperation<T> {
    type Output = T;

    fn into_job(self) -> Job {
        Job::Single(self.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::GattCommand;

    #[test]
    fn test_mtu_request_is_clamped() {
        let mut low = Operation::from(MtuOperation::request_mtu(5));
        assert_eq!(low.next_command(23), Some(GattCommand::RequestMtu(MIN_MTU)));

        let mut high = Operation::from(MtuOperation::request_mtu(1024));
        assert_eq!(high.next_command(23), Some(GattCommand::RequestMtu(MAX_MTU)));
    }

    #[test]
    fn test_value_kinds() {
        assert_eq!(
            Operation::from(PhyOperation::read_phy()).kind(),
            OperationKind::ReadPhy
        );
        assert_eq!(
            Operation::from(RssiOperation::read_rssi()).kind(),
            OperationKind::ReadRssi
        );
        assert!(!OperationKind::ReadRssi.supports_timeout());
    }
}
