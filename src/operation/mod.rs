//! Operations: the unit of work the dispatcher executes
//!
//! Every operation is built detached, configured through its builder methods
//! and then moved into a [`GattClient`](crate::GattClient). Once moved it can
//! no longer be configured or submitted again.

mod connect;
mod hooks;
mod lifecycle;
mod read;
mod simple;
mod value;
mod wait;
mod write;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::attribute::{Attribute, ConnectionPriority, Peer, PhyMask, PhyOption, Properties};
use crate::driver::GattCommand;
use crate::error::{Failure, GattStatus};
use crate::queue::Job;

pub use connect::{ConnectOperation, ConnectPath};
pub use lifecycle::{Completion, FromValue, OpValue, Outcome};
pub use read::ReadOperation;
pub use simple::{SimpleOperation, SleepOperation};
pub use value::{
    ConnectionPriorityOperation, MtuOperation, PhyOperation, RssiOperation, ValueOperation,
};
pub use wait::{TriggerState, WaitForValueOperation};
pub use write::WriteOperation;

pub(crate) use connect::ConnectState;
pub(crate) use hooks::Hooks;
pub(crate) use lifecycle::DeliveryScope;
pub(crate) use read::{Accepted, Reassembly};
pub(crate) use wait::WaitState;
pub(crate) use write::WriteState;

/// What an operation does on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Connect,
    Disconnect,
    Write,
    Read,
    WriteDescriptor,
    ReadDescriptor,
    BeginReliableWrite,
    ExecuteReliableWrite,
    AbortReliableWrite,
    EnableNotifications,
    DisableNotifications,
    EnableIndications,
    DisableIndications,
    WaitForNotification,
    WaitForIndication,
    RequestMtu,
    RequestConnectionPriority,
    SetPreferredPhy,
    ReadPhy,
    ReadRssi,
    RefreshCache,
    Sleep,
}

impl OperationKind {
    /// Whether a deadline may be attached to operations of this kind.
    pub fn supports_timeout(self) -> bool {
        !matches!(
            self,
            OperationKind::BeginReliableWrite
                | OperationKind::ExecuteReliableWrite
                | OperationKind::AbortReliableWrite
                | OperationKind::RequestMtu
                | OperationKind::RequestConnectionPriority
                | OperationKind::SetPreferredPhy
                | OperationKind::ReadPhy
                | OperationKind::ReadRssi
                | OperationKind::Sleep
        )
    }

    pub fn requires_connection(self) -> bool {
        !matches!(
            self,
            OperationKind::Connect | OperationKind::Disconnect | OperationKind::Sleep
        )
    }

    pub fn is_wait(self) -> bool {
        matches!(
            self,
            OperationKind::WaitForNotification | OperationKind::WaitForIndication
        )
    }
}

/// Process-unique operation identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationId(u64);

impl OperationId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum Deadline {
    #[default]
    Unset,
    Disabled,
    After(Duration),
}

/// Owned timer task. Cancelling is idempotent.
#[derive(Debug, Default)]
pub(crate) struct TimerSlot(Option<JoinHandle<()>>);

impl TimerSlot {
    pub(crate) fn arm(&mut self, timer: JoinHandle<()>) {
        self.cancel();
        self.0 = Some(timer);
    }

    pub(crate) fn cancel(&mut self) {
        if let Some(timer) = self.0.take() {
            timer.abort();
        }
    }
}

/// State shared by every operation: identity, callbacks, lifecycle flags and
/// the completion gate.
#[doc(hidden)]
pub struct OperationCore {
    id: OperationId,
    pub(crate) hooks: Hooks,
    enqueued: bool,
    started: bool,
    finished: bool,
    completion: Arc<Completion>,
    deadline: Deadline,
    pub(crate) timer: TimerSlot,
}

impl OperationCore {
    pub(crate) fn new() -> Self {
        Self {
            id: OperationId::next(),
            hooks: Hooks::default(),
            enqueued: false,
            started: false,
            finished: false,
            completion: Arc::new(Completion::new()),
            deadline: Deadline::Unset,
            timer: TimerSlot::default(),
        }
    }

    pub fn id(&self) -> OperationId {
        self.id
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub(crate) fn is_started(&self) -> bool {
        self.started
    }

    pub(crate) fn completion(&self) -> Arc<Completion> {
        Arc::clone(&self.completion)
    }

    /// # Panics
    ///
    /// Panics if the operation was already submitted.
    pub(crate) fn mark_enqueued(&mut self) {
        assert!(!self.enqueued, "operation {} submitted twice", self.id);
        self.enqueued = true;
    }

    pub(crate) fn set_timeout(&mut self, timeout: Duration) {
        self.deadline = if timeout.is_zero() {
            Deadline::Disabled
        } else {
            Deadline::After(timeout)
        };
    }

    pub(crate) fn apply_default_timeout(&mut self, default: Option<Duration>) {
        if self.deadline == Deadline::Unset {
            self.deadline = match default {
                Some(timeout) if !timeout.is_zero() => Deadline::After(timeout),
                _ => Deadline::Disabled,
            };
        }
    }

    pub(crate) fn timeout(&self) -> Option<Duration> {
        match self.deadline {
            Deadline::After(timeout) => Some(timeout),
            Deadline::Unset | Deadline::Disabled => None,
        }
    }

    pub(crate) fn notify_started(&mut self, peer: &Peer) {
        self.started = true;
        self.hooks.fire_before(peer);
    }

    /// Starts without a peer to report, so no `before` callback runs.
    pub(crate) fn mark_started(&mut self) {
        self.started = true;
    }

    /// Records the terminal outcome. Returns `None` if one was already
    /// recorded, otherwise the outcome that actually won the gate.
    pub(crate) fn settle(&mut self, peer: Option<&Peer>, proposed: Outcome) -> Option<Outcome> {
        if self.finished {
            return None;
        }
        self.finished = true;
        self.timer.cancel();

        let proposed = match peer {
            Some(_) => proposed,
            None => Err(Failure::Invalid),
        };
        let outcome = self.completion.settle(proposed);
        self.hooks.fire_terminal(peer, &outcome);
        Some(outcome)
    }
}

impl Drop for OperationCore {
    fn drop(&mut self) {
        self.timer.cancel();
        if !self.finished {
            self.completion
                .settle(Err(Failure::Status(GattStatus::CANCELLED)));
        }
    }
}

/// Per-kind state of an operation.
pub(crate) enum Body {
    Plain,
    Connect(ConnectState),
    Write(WriteState),
    Read(Reassembly),
    Wait(WaitState),
    Mtu(u16),
    ConnectionPriority(ConnectionPriority),
    PreferredPhy {
        tx: PhyMask,
        rx: PhyMask,
        options: PhyOption,
    },
    Sleep(Duration),
}

/// A type-erased operation. Every builder converts into one.
pub struct Operation {
    pub(crate) core: OperationCore,
    pub(crate) kind: OperationKind,
    pub(crate) target: Option<Attribute>,
    pub(crate) body: Body,
}

impl Operation {
    pub(crate) fn with_core(
        core: OperationCore,
        kind: OperationKind,
        target: Option<Attribute>,
        body: Body,
    ) -> Self {
        Self {
            core,
            kind,
            target,
            body,
        }
    }

    pub fn id(&self) -> OperationId {
        self.core.id
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn target(&self) -> Option<&Attribute> {
        self.target.as_ref()
    }

    pub(crate) fn apply_default_timeout(&mut self, default: Option<Duration>) {
        if self.kind.supports_timeout() {
            self.core.apply_default_timeout(default);
        }
        if let Body::Wait(wait) = &mut self.body {
            if let Some(trigger) = wait.trigger.as_mut() {
                trigger.apply_default_timeout(default);
            }
        }
    }

    /// Whether the target exists and declares what this kind needs.
    pub(crate) fn validate_target(&self) -> bool {
        let characteristic_with = |required: Properties| match &self.target {
            Some(target) => !target.is_descriptor() && target.properties().contains(required),
            None => false,
        };
        let descriptor = matches!(&self.target, Some(target) if target.is_descriptor());

        match (self.kind, &self.body) {
            (OperationKind::Write, Body::Write(state)) => {
                characteristic_with(state.write_type().required_property())
            }
            (OperationKind::WriteDescriptor, _) | (OperationKind::ReadDescriptor, _) => descriptor,
            (OperationKind::Read, _) => characteristic_with(Properties::READ),
            (OperationKind::EnableNotifications, _)
            | (OperationKind::DisableNotifications, _)
            | (OperationKind::WaitForNotification, _) => characteristic_with(Properties::NOTIFY),
            (OperationKind::EnableIndications, _)
            | (OperationKind::DisableIndications, _)
            | (OperationKind::WaitForIndication, _) => characteristic_with(Properties::INDICATE),
            (OperationKind::Write, _) => false,
            _ => true,
        }
    }

    fn handle(&self) -> u16 {
        self.target.as_ref().map_or(0, Attribute::handle)
    }

    /// Builds the next command to issue, or `None` for operations that never
    /// touch the transport.
    pub(crate) fn next_command(&mut self, mtu: u16) -> Option<GattCommand> {
        let handle = self.handle();
        let command = match (self.kind, &mut self.body) {
            (OperationKind::Connect, Body::Connect(state)) => GattCommand::Connect {
                peer: state.peer().clone(),
                path: state.begin_attempt(),
                phy: state.phy(),
            },
            (OperationKind::Disconnect, _) => GattCommand::Disconnect,
            (OperationKind::Write, Body::Write(state)) => GattCommand::Write {
                handle,
                value: state.next_chunk(mtu)?,
                write_type: state.write_type(),
            },
            (OperationKind::WriteDescriptor, Body::Write(state)) => GattCommand::WriteDescriptor {
                handle,
                value: state.next_chunk(mtu)?,
            },
            (OperationKind::Read, _) => GattCommand::Read { handle },
            (OperationKind::ReadDescriptor, _) => GattCommand::ReadDescriptor { handle },
            (OperationKind::BeginReliableWrite, _) => GattCommand::BeginReliableWrite,
            (OperationKind::ExecuteReliableWrite, _) => GattCommand::ExecuteReliableWrite,
            (OperationKind::AbortReliableWrite, _) => GattCommand::AbortReliableWrite,
            (OperationKind::EnableNotifications, _) => GattCommand::SetNotifications {
                handle,
                enable: true,
            },
            (OperationKind::DisableNotifications, _) => GattCommand::SetNotifications {
                handle,
                enable: false,
            },
            (OperationKind::EnableIndications, _) => GattCommand::SetIndications {
                handle,
                enable: true,
            },
            (OperationKind::DisableIndications, _) => GattCommand::SetIndications {
                handle,
                enable: false,
            },
            (OperationKind::RequestMtu, Body::Mtu(mtu)) => GattCommand::RequestMtu(*mtu),
            (OperationKind::RequestConnectionPriority, Body::ConnectionPriority(priority)) => {
                GattCommand::RequestConnectionPriority(*priority)
            }
            (OperationKind::SetPreferredPhy, Body::PreferredPhy { tx, rx, options }) => {
                GattCommand::SetPreferredPhy {
                    tx: *tx,
                    rx: *rx,
                    options: *options,
                }
            }
            (OperationKind::ReadPhy, _) => GattCommand::ReadPhy,
            (OperationKind::ReadRssi, _) => GattCommand::ReadRssi,
            (OperationKind::RefreshCache, _) => GattCommand::RefreshCache,
            _ => return None,
        };
        Some(command)
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("id", &self.core.id)
            .field("kind", &self.kind)
            .field("target", &self.target)
            .field("finished", &self.core.finished)
            .finish()
    }
}

/// Callback configuration shared by every operation builder.
///
/// Each setter replaces the previous user callback of the same slot.
pub trait OperationBuilder: Sized {
    #[doc(hidden)]
    fn core(&self) -> &OperationCore;

    #[doc(hidden)]
    fn core_mut(&mut self) -> &mut OperationCore;

    /// Identifier assigned when the operation was built.
    fn id(&self) -> OperationId {
        self.core().id()
    }

    /// Called before every execution attempt, including connect retries.
    fn before(mut self, f: impl FnMut(&Peer) + Send + 'static) -> Self {
        self.core_mut().hooks.before.user = Some(Box::new(f));
        self
    }

    /// Called once the operation succeeded.
    fn done(mut self, f: impl FnOnce(&Peer) + Send + 'static) -> Self {
        self.core_mut().hooks.done.user = Some(Box::new(f));
        self
    }

    /// Called with the failure status once the operation failed.
    fn fail(mut self, f: impl FnOnce(&Peer, GattStatus) + Send + 'static) -> Self {
        self.core_mut().hooks.fail.user = Some(Box::new(f));
        self
    }

    /// Called when the operation could not be attempted at all.
    fn invalid(mut self, f: impl FnOnce() + Send + 'static) -> Self {
        self.core_mut().hooks.invalid.user = Some(Box::new(f));
        self
    }
}

/// Builders of operations that accept a deadline.
pub trait TimeoutBuilder: OperationBuilder {
    /// Fails the operation with a timeout if it has not completed `timeout`
    /// after it started. Zero disables the deadline, including the client's
    /// default.
    fn timeout(mut self, timeout: Duration) -> Self {
        self.core_mut().set_timeout(timeout);
        self
    }
}

/// Anything [`GattClient::enqueue`](crate::GattClient::enqueue) accepts.
pub trait Submit {
    /// What the operation's handle resolves to on success.
    type Output: FromValue;

    #[doc(hidden)]
    fn into_job(self) -> Job;
}

impl OperationBuilder for Operation {
    fn core(&self) -> &OperationCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut OperationCore {
        &mut self.core
    }
}

impl Submit for Operation {
    type Output = OpValue;

    fn into_job(self) -> Job {
        Job::Single(self)
    }
}

/// Implements the builder plumbing for a typed operation wrapper whose
/// fields include `core: OperationCore`.
macro_rules! operation_builder {
    ($ty:ty, $output:ty) => {
        impl $crate::operation::OperationBuilder for $ty {
            fn core(&self) -> &$crate::operation::OperationCore {
                &self.core
            }

            fn core_mut(&mut self) -> &mut $crate::operation::OperationCore {
                &mut self.core
            }
        }

        impl $crate::operation::Submit for $ty {
            type Output = $output;

            fn into_job(self) -> $crate::queue::Job {
                $crate::queue::Job::Single(self.into())
            }
        }
    };
}
pub(crate) use operation_builder;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::{BleAddress, Properties, WriteType};
    use uuid::Uuid;

    fn chr(properties: Properties) -> Attribute {
        Attribute::characteristic(0x0021, Uuid::nil(), properties)
    }

    #[test]
    fn test_ids_are_unique() {
        let a = OperationCore::new();
        let b = OperationCore::new();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    #[should_panic(expected = "submitted twice")]
    fn test_double_enqueue_panics() {
        let mut core = OperationCore::new();
        core.mark_enqueued();
        core.mark_enqueued();
    }

    #[test]
    fn test_settle_is_idempotent() {
        let peer = Peer::new(BleAddress::Simulated(Uuid::nil()));
        let mut core = OperationCore::new();
        let gate = core.completion();

        assert_eq!(core.settle(Some(&peer), Ok(OpValue::None)), Some(Ok(OpValue::None)));
        assert_eq!(
            core.settle(Some(&peer), Err(Failure::Status(GattStatus::TIMEOUT))),
            None
        );
        assert_eq!(gate.peek(), Some(Ok(OpValue::None)));
    }

    #[test]
    fn test_settle_without_peer_is_invalid() {
        let mut core = OperationCore::new();
        assert_eq!(
            core.settle(None, Ok(OpValue::None)),
            Some(Err(Failure::Invalid))
        );
    }

    #[test]
    fn test_dropping_unfinished_operation_cancels_gate() {
        let core = OperationCore::new();
        let gate = core.completion();
        drop(core);
        assert_eq!(
            gate.peek(),
            Some(Err(Failure::Status(GattStatus::CANCELLED)))
        );
    }

    #[test]
    fn test_default_timeout_respects_explicit_setting() {
        let mut explicit = OperationCore::new();
        explicit.set_timeout(Duration::ZERO);
        explicit.apply_default_timeout(Some(Duration::from_secs(5)));
        assert_eq!(explicit.timeout(), None);

        let mut unset = OperationCore::new();
        unset.apply_default_timeout(Some(Duration::from_secs(5)));
        assert_eq!(unset.timeout(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_target_capabilities() {
        let read = Operation::from(ReadOperation::characteristic(chr(Properties::READ)));
        assert!(read.validate_target());

        let not_readable = Operation::from(ReadOperation::characteristic(chr(Properties::WRITE)));
        assert!(!not_readable.validate_target());

        let missing = Operation::from(ReadOperation::characteristic(None::<Attribute>));
        assert!(!missing.validate_target());

        let descriptor = Attribute::descriptor(0x0022, Uuid::nil());
        let on_descriptor = Operation::from(ReadOperation::characteristic(descriptor));
        assert!(!on_descriptor.validate_target());

        let write = Operation::from(WriteOperation::characteristic(
            chr(Properties::WRITE_WITHOUT_RESPONSE),
            [1, 2, 3],
            WriteType::WithResponse,
        ));
        assert!(!write.validate_target());

        let notify = Operation::from(SimpleOperation::enable_notifications(chr(Properties::NOTIFY)));
        assert!(notify.validate_target());
        let indicate = Operation::from(SimpleOperation::enable_indications(chr(Properties::NOTIFY)));
        assert!(!indicate.validate_target());
    }

    #[test]
    fn test_commands_for_simple_kinds() {
        let mut op = Operation::from(SimpleOperation::disable_indications(chr(Properties::INDICATE)));
        assert_eq!(
            op.next_command(23),
            Some(GattCommand::SetIndications {
                handle: 0x0021,
                enable: false
            })
        );

        let mut sleep = Operation::from(SleepOperation::new(Duration::from_millis(5)));
        assert_eq!(sleep.next_command(23), None);
    }
}
