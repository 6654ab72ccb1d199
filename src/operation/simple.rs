use std::time::Duration;

use crate::attribute::Attribute;

use super::{operation_builder, Body, Operation, OperationCore, OperationKind, TimeoutBuilder};

/// An operation with no payload and no result value.
pub struct SimpleOperation {
    core: OperationCore,
    kind: OperationKind,
    target: Option<Attribute>,
}

impl SimpleOperation {
    fn new(kind: OperationKind, target: Option<Attribute>) -> Self {
        Self {
            core: OperationCore::new(),
            kind,
            target,
        }
    }

    /// Disconnects. Succeeds immediately when there is no link.
    pub fn disconnect() -> Self {
        Self::new(OperationKind::Disconnect, None)
    }

    pub fn enable_notifications(target: impl Into<Option<Attribute>>) -> Self {
        Self::new(OperationKind::EnableNotifications, target.into())
    }

    pub fn disable_notifications(target: impl Into<Option<Attribute>>) -> Self {
        Self::new(OperationKind::DisableNotifications, target.into())
    }

    pub fn enable_indications(target: impl Into<Option<Attribute>>) -> Self {
        Self::new(OperationKind::EnableIndications, target.into())
    }

    pub fn disable_indications(target: impl Into<Option<Attribute>>) -> Self {
        Self::new(OperationKind::DisableIndications, target.into())
    }

    /// Drops the peer's cached attribute database on the local stack.
    pub fn refresh_cache() -> Self {
        Self::new(OperationKind::RefreshCache, None)
    }

    pub(crate) fn begin_reliable_write() -> Self {
        Self::new(OperationKind::BeginReliableWrite, None)
    }

    pub(crate) fn execute_reliable_write() -> Self {
        Self::new(OperationKind::ExecuteReliableWrite, None)
    }

    pub(crate) fn abort_reliable_write() -> Self {
        Self::new(OperationKind::AbortReliableWrite, None)
    }
}

impl From<SimpleOperation> for Operation {
    fn from(op: SimpleOperation) -> Self {
        Operation::with_core(op.core, op.kind, op.target, Body::Plain)
    }
}

operation_builder!(SimpleOperation, ());
impl TimeoutBuilder for SimpleOperation {}

/// Holds the queue for a fixed delay, then succeeds.
pub struct SleepOperation {
    core: OperationCore,
    delay: Duration,
}

impl SleepOperation {
    pub fn new(delay: Duration) -> Self {
        Self {
            core: OperationCore::new(),
            delay,
        }
    }
}

impl From<SleepOperation> for Operation {
    fn from(op: SleepOperation) -> Self {
        Operation::with_core(op.core, OperationKind::Sleep, None, Body::Sleep(op.delay))
    }
}

operation_builder!(SleepOperation, ());
