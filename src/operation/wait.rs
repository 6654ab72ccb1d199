use std::sync::mpsc;

use crate::attribute::{Attribute, Peer};
use crate::codec::Merger;
use crate::data::Data;
use crate::error::{Failure, GattStatus};

use super::hooks::typed_value;
use super::read::{Accepted, Reassembly};
use super::{
    operation_builder, Body, Operation, OperationBuilder, OperationCore, OperationKind,
    TimeoutBuilder,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TriggerEvent {
    Started,
    Succeeded,
    Failed(GattStatus),
    Invalid,
}

/// Progress of the operation that is expected to provoke the awaited value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerState {
    NotStarted,
    Started,
    Succeeded,
    Failed(Failure),
}

impl TriggerState {
    fn is_terminal(self) -> bool {
        matches!(self, TriggerState::Succeeded | TriggerState::Failed(_))
    }
}

/// Receiving end of the trigger's lifecycle events.
pub(crate) struct TriggerLink {
    events: mpsc::Receiver<TriggerEvent>,
    state: TriggerState,
}

impl TriggerLink {
    /// Installs internal callbacks on `core` that report into the link.
    pub(crate) fn wire(core: &mut OperationCore) -> Self {
        let (tx, rx) = mpsc::channel();

        let started = tx.clone();
        core.hooks.before.internal = Some(Box::new(move |_: &Peer| {
            let _ = started.send(TriggerEvent::Started);
        }));
        let succeeded = tx.clone();
        core.hooks.done.internal = Some(Box::new(move |_: &Peer| {
            let _ = succeeded.send(TriggerEvent::Succeeded);
        }));
        let failed = tx.clone();
        core.hooks.fail.internal = Some(Box::new(move |_: &Peer, status: GattStatus| {
            let _ = failed.send(TriggerEvent::Failed(status));
        }));
        core.hooks.invalid.internal = Some(Box::new(move || {
            let _ = tx.send(TriggerEvent::Invalid);
        }));

        Self {
            events: rx,
            state: TriggerState::NotStarted,
        }
    }

    /// Drains pending events. A terminal state is never left again.
    pub(crate) fn poll(&mut self) -> TriggerState {
        while let Ok(event) = self.events.try_recv() {
            if self.state.is_terminal() {
                continue;
            }
            self.state = match event {
                TriggerEvent::Started => TriggerState::Started,
                TriggerEvent::Succeeded => TriggerState::Succeeded,
                TriggerEvent::Failed(status) => TriggerState::Failed(Failure::Status(status)),
                TriggerEvent::Invalid => TriggerState::Failed(Failure::Invalid),
            };
        }
        self.state
    }
}

/// Merge and trigger state of a value wait.
pub(crate) struct WaitState {
    pub(crate) reassembly: Reassembly,
    pub(crate) trigger: Option<Box<Operation>>,
    link: Option<TriggerLink>,
    received: Option<Data>,
}

impl WaitState {
    fn new() -> Self {
        Self {
            reassembly: Reassembly::default(),
            trigger: None,
            link: None,
            received: None,
        }
    }

    pub(crate) fn take_trigger(&mut self) -> Option<Operation> {
        self.trigger.take().map(|op| *op)
    }

    pub(crate) fn trigger_state(&mut self) -> TriggerState {
        match self.link.as_mut() {
            Some(link) => link.poll(),
            None => TriggerState::Succeeded,
        }
    }

    /// Feeds a value change. Returns the completed value once it may be
    /// delivered; a value completed before the trigger succeeded is held.
    pub(crate) fn on_value(&mut self, peer: &Peer, value: &[u8]) -> Option<Data> {
        let trigger = self.trigger_state();
        if trigger == TriggerState::NotStarted || self.received.is_some() {
            return None;
        }
        match self.reassembly.accept(peer, value) {
            Accepted::Complete(data) if trigger == TriggerState::Succeeded => Some(data),
            Accepted::Complete(data) => {
                self.received = Some(data);
                None
            }
            Accepted::Rejected | Accepted::Partial => None,
        }
    }

    /// Resolves the wait from trigger progress alone: a failed trigger fails
    /// the wait, a succeeded trigger releases a held value.
    pub(crate) fn resolve(&mut self) -> Option<Result<Data, Failure>> {
        match self.trigger_state() {
            TriggerState::Failed(failure) => {
                self.received = None;
                Some(Err(failure))
            }
            TriggerState::Succeeded => self.received.take().map(Ok),
            TriggerState::NotStarted | TriggerState::Started => None,
        }
    }
}

/// Waits for a notification or indication on a characteristic.
///
/// An optional trigger operation runs once the wait is in place; values
/// arriving before the trigger started are ignored. If the trigger fails the
/// wait fails with the trigger's status and never reports a value.
pub struct WaitForValueOperation {
    core: OperationCore,
    kind: OperationKind,
    target: Option<Attribute>,
    state: WaitState,
}

impl WaitForValueOperation {
    /// Waits for a notification on `target`.
    pub fn notification(target: impl Into<Option<Attribute>>) -> Self {
        Self::new(OperationKind::WaitForNotification, target.into())
    }

    /// Waits for an indication on `target`.
    pub fn indication(target: impl Into<Option<Attribute>>) -> Self {
        Self::new(OperationKind::WaitForIndication, target.into())
    }

    fn new(kind: OperationKind, target: Option<Attribute>) -> Self {
        Self {
            core: OperationCore::new(),
            kind,
            target,
            state: WaitState::new(),
        }
    }

    /// Ignores value changes for which `f` returns false.
    pub fn filter(mut self, f: impl Fn(&[u8]) -> bool + Send + 'static) -> Self {
        self.state.reassembly.set_filter(Box::new(f));
        self
    }

    /// Keeps waiting until `merger` reports a complete message.
    pub fn merge(mut self, merger: impl Merger + 'static) -> Self {
        self.state.reassembly.set_merger(Box::new(merger));
        self
    }

    /// Called for every value change accepted by the merger.
    pub fn progress(mut self, f: impl FnMut(&Peer, &Data, usize) + Send + 'static) -> Self {
        self.state.reassembly.set_progress(Box::new(f));
        self
    }

    /// Called with the received value.
    pub fn with(mut self, f: impl FnOnce(&Peer, Data) + Send + 'static) -> Self {
        self.core_mut().hooks.value = Some(typed_value(f));
        self
    }

    /// Runs `operation` after the wait is armed. The trigger is owned by this
    /// wait from now on and cannot be submitted on its own.
    pub fn trigger(mut self, operation: impl Into<Operation>) -> Self {
        let mut operation = operation.into();
        operation.core.mark_enqueued();
        self.state.link = Some(TriggerLink::wire(&mut operation.core));
        self.state.trigger = Some(Box::new(operation));
        self
    }
}

impl From<WaitForValueOperation> for Operation {
    fn from(op: WaitForValueOperation) -> Self {
        Operation::with_core(op.core, op.kind, op.target, Body::Wait(op.state))
    }
}

operation_builder!(WaitForValueOperation, Data);
impl TimeoutBuilder for WaitForValueOperation {}
