// gattq - GATT operation queue

//! Client-side engine for a single-outstanding-operation GATT transport.
//!
//! Operations are built with ownership-transfer builders, submitted to a
//! [`GattClient`], and executed strictly one at a time by a dispatcher task.
//! Results arrive through callbacks, through an awaitable handle, or through a
//! blocking wait on the same handle.

pub mod attribute;
pub mod client;
pub mod codec;
pub mod config;
pub mod data;
pub mod dispatcher;
pub mod driver;
pub mod error;
pub mod operation;
pub mod queue;
pub mod simulated;

pub use attribute::{
    Attribute, AttributeKind, BleAddress, ConnectionParameters, ConnectionPriority,
    NotificationMode, Peer, Phy, PhyMask, PhyOption, PhyPair, Properties, WriteType,
};
pub use client::{GattClient, LinkStatus, Notification, OperationHandle};
pub use config::GattConfig;
pub use data::{ByteAccumulator, Data, FloatFormat, IntFormat};
pub use dispatcher::{DisconnectOnTimeout, Escalation, TimedOut, TimeoutHandler};
pub use driver::{DriverEvent, EventSink, GattCommand, GattDriver, Response};
pub use error::{Failure, GattError, GattStatus};
pub use operation::{OperationId, OperationKind};

/// Everything needed to build and submit operations.
pub mod prelude {
    pub use crate::attribute::*;
    pub use crate::client::{GattClient, LinkStatus, Notification, OperationHandle};
    pub use crate::codec::{
        FlaggedMerger, FlaggedSplitter, LengthPrefixMerger, LengthPrefixSplitter, Merger,
        MtuSplitter, ShortChunkMerger, Splitter,
    };
    pub use crate::config::GattConfig;
    pub use crate::data::{ByteAccumulator, Data, FloatFormat, IntFormat};
    pub use crate::error::{GattError, GattStatus};
    pub use crate::operation::{
        ConnectOperation, ConnectionPriorityOperation, MtuOperation, OpValue, Operation,
        OperationBuilder, OperationId, OperationKind, PhyOperation, ReadOperation,
        RssiOperation, SimpleOperation, SleepOperation, Submit, TimeoutBuilder,
        WaitForValueOperation, WriteOperation,
    };
    pub use crate::queue::{OperationQueue, ReliableWriteQueue, TransactionState};
}
