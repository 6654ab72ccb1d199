//! Execution queues
//!
//! An [`OperationQueue`] is drained one member at a time by the dispatcher and
//! completes once its last member finished. A [`ReliableWriteQueue`] brackets
//! its member writes with a begin and a commit or abort.

mod reliable;

pub use reliable::{ReliableWriteQueue, TransactionState};

use std::collections::VecDeque;
use std::time::Duration;

use crate::attribute::Peer;
use crate::error::{Failure, GattStatus};
use crate::operation::{
    OpValue, Operation, OperationBuilder, OperationCore, OperationId, OperationKind, Outcome,
    Submit,
};

/// An ordered group of operations submitted as one unit.
///
/// Members run in insertion order. If a member fails, the rest are cancelled
/// and the queue fails with that member's status.
///
/// ```
/// use gattq::prelude::*;
///
/// let queue = OperationQueue::new()
///     .add(MtuOperation::request_mtu(247))
///     .add(RssiOperation::read_rssi());
/// assert_eq!(queue.size(), 2);
/// ```
pub struct OperationQueue {
    core: OperationCore,
    members: VecDeque<Operation>,
    cancelled: bool,
    failure: Option<Failure>,
}

impl OperationQueue {
    pub fn new() -> Self {
        Self {
            core: OperationCore::new(),
            members: VecDeque::new(),
            cancelled: false,
            failure: None,
        }
    }

    pub fn add(mut self, operation: impl Into<Operation>) -> Self {
        self.push(operation);
        self
    }

    /// # Panics
    ///
    /// Panics if the operation was already added to another queue.
    pub fn push(&mut self, operation: impl Into<Operation>) {
        let mut operation = operation.into();
        operation.core.mark_enqueued();
        self.members.push_back(operation);
    }

    pub fn size(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn has_more(&self) -> bool {
        !self.members.is_empty()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Discards every member not yet handed out. The one currently executing
    /// is not affected.
    pub fn cancel(&mut self) {
        self.cancelled = true;
        self.members.clear();
    }

    fn discard_members(&mut self, peer: Option<&Peer>, failure: Failure) {
        while let Some(mut member) = self.members.pop_front() {
            member.core.settle(peer, Err(failure));
        }
    }

    fn record_failure(&mut self, failure: Failure) {
        if self.failure.is_none() {
            self.failure = Some(failure);
        }
    }

    fn outcome(&self) -> Outcome {
        match (self.failure, self.cancelled) {
            (Some(failure), _) => Err(failure),
            (None, true) => Err(Failure::Status(GattStatus::CANCELLED)),
            (None, false) => Ok(OpValue::None),
        }
    }
}

impl Default for OperationQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Iterator for OperationQueue {
    type Item = Operation;

    fn next(&mut self) -> Option<Operation> {
        self.members.pop_front()
    }
}

impl OperationBuilder for OperationQueue {
    fn core(&self) -> &OperationCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut OperationCore {
        &mut self.core
    }
}

impl Submit for OperationQueue {
    type Output = ();

    fn into_job(self) -> Job {
        Job::Queue(self)
    }
}

/// A unit of work in the dispatcher's queue.
#[doc(hidden)]
pub enum Job {
    Single(Operation),
    Queue(OperationQueue),
    Reliable(ReliableWriteQueue),
}

impl Job {
    pub(crate) fn id(&self) -> OperationId {
        self.core().id()
    }

    pub(crate) fn core(&self) -> &OperationCore {
        match self {
            Job::Single(operation) => &operation.core,
            Job::Queue(queue) => &queue.core,
            Job::Reliable(reliable) => &reliable.queue.core,
        }
    }

    pub(crate) fn core_mut(&mut self) -> &mut OperationCore {
        match self {
            Job::Single(operation) => &mut operation.core,
            Job::Queue(queue) => &mut queue.core,
            Job::Reliable(reliable) => &mut reliable.queue.core,
        }
    }

    pub(crate) fn is_connect(&self) -> bool {
        matches!(self, Job::Single(operation) if operation.kind == OperationKind::Connect)
    }

    /// Deadline a blocking waiter races against. Queues have none.
    pub(crate) fn timeout(&self) -> Option<Duration> {
        match self {
            Job::Single(operation) => operation.core.timeout(),
            Job::Queue(_) | Job::Reliable(_) => None,
        }
    }

    pub(crate) fn apply_default_timeout(&mut self, default: Option<Duration>) {
        match self {
            Job::Single(operation) => operation.apply_default_timeout(default),
            Job::Queue(queue) => queue
                .members
                .iter_mut()
                .for_each(|member| member.apply_default_timeout(default)),
            Job::Reliable(reliable) => reliable
                .queue
                .members
                .iter_mut()
                .for_each(|member| member.apply_default_timeout(default)),
        }
    }

    /// Hands out the next member of a queue job.
    pub(crate) fn next_member(&mut self) -> Option<Operation> {
        match self {
            Job::Single(_) => None,
            Job::Queue(queue) => queue.next(),
            Job::Reliable(reliable) => reliable.next(),
        }
    }

    /// A member failed: the remaining members are cancelled and a reliable
    /// write switches to abort.
    pub(crate) fn member_failed(&mut self, peer: Option<&Peer>, failure: Failure) {
        let queue = match self {
            Job::Single(_) => return,
            Job::Queue(queue) => queue,
            Job::Reliable(reliable) => &mut reliable.queue,
        };
        queue.record_failure(failure);
        queue.discard_members(peer, Failure::Status(GattStatus::CANCELLED));
        queue.cancelled = true;
    }

    /// User cancellation of a started queue job.
    pub(crate) fn cancel_members(&mut self, peer: Option<&Peer>) {
        let queue = match self {
            Job::Single(_) => return,
            Job::Queue(queue) => queue,
            Job::Reliable(reliable) => &mut reliable.queue,
        };
        queue.discard_members(peer, Failure::Status(GattStatus::CANCELLED));
        queue.cancelled = true;
    }

    /// Fails the job and every member it still holds. A queue that already
    /// saw a member fail keeps that failure.
    pub(crate) fn discard(mut self, peer: Option<&Peer>, failure: Failure) {
        let recorded = match &mut self {
            Job::Single(_) => None,
            Job::Queue(queue) => {
                queue.discard_members(peer, failure);
                queue.failure
            }
            Job::Reliable(reliable) => {
                reliable.queue.discard_members(peer, failure);
                reliable.queue.failure
            }
        };
        self.core_mut().settle(peer, Err(recorded.unwrap_or(failure)));
    }

    /// Settles a drained queue job with its aggregate outcome.
    pub(crate) fn complete(mut self, peer: Option<&Peer>) -> Option<Outcome> {
        let outcome = match &self {
            Job::Single(_) => return None,
            Job::Queue(queue) => queue.outcome(),
            Job::Reliable(reliable) => reliable.queue.outcome(),
        };
        self.core_mut().settle(peer, outcome)
    }
}
