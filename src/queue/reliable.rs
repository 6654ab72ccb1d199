use crate::operation::{
    Operation, OperationBuilder, OperationCore, SimpleOperation, Submit, WriteOperation,
};

use super::{Job, OperationQueue};

/// Where a reliable write transaction stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    NotStarted,
    Begun,
    /// The commit or abort has been handed out.
    Closing,
    Closed,
}

/// Writes that the peer applies atomically.
///
/// The queue hands out a begin, then every member write (always split into
/// MTU-sized chunks), then an execute. Cancelling, or a failed member,
/// replaces the execute with an abort. The transaction is well formed even
/// with no members.
///
/// ```
/// use gattq::prelude::*;
/// use uuid::Uuid;
///
/// let chr = Attribute::characteristic(0x0012, Uuid::nil(), Properties::WRITE);
/// let rw = ReliableWriteQueue::new()
///     .add(WriteOperation::characteristic(chr, b"hello", WriteType::WithResponse))
///     .add(WriteOperation::characteristic(chr, b"world", WriteType::WithResponse));
/// // begin + 2 writes + execute
/// assert_eq!(rw.size(), 4);
/// ```
pub struct ReliableWriteQueue {
    pub(super) queue: OperationQueue,
    state: TransactionState,
}

impl ReliableWriteQueue {
    pub fn new() -> Self {
        Self {
            queue: OperationQueue::new(),
            state: TransactionState::NotStarted,
        }
    }

    pub fn add(mut self, write: WriteOperation) -> Self {
        self.push(write);
        self
    }

    pub fn push(&mut self, mut write: WriteOperation) {
        write.force_split();
        self.queue.push(write);
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Members plus the begin and closing operations not yet handed out.
    pub fn size(&self) -> usize {
        let begin = usize::from(self.state == TransactionState::NotStarted);
        let close = usize::from(self.has_more());
        self.queue.size() + begin + close
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// `false` once the closing operation has been handed out.
    pub fn has_more(&self) -> bool {
        matches!(
            self.state,
            TransactionState::NotStarted | TransactionState::Begun
        )
    }

    /// Drops the pending member writes and closes with an abort.
    pub fn cancel(&mut self) {
        self.queue.cancel();
    }

    pub fn abort(&mut self) {
        self.cancel();
    }

    pub fn is_aborting(&self) -> bool {
        self.queue.is_cancelled()
    }
}

impl Default for ReliableWriteQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Iterator for ReliableWriteQueue {
    type Item = Operation;

    fn next(&mut self) -> Option<Operation> {
        let synthesized = match self.state {
            TransactionState::NotStarted => {
                self.state = TransactionState::Begun;
                SimpleOperation::begin_reliable_write()
            }
            TransactionState::Begun => {
                if !self.queue.is_cancelled() {
                    if let Some(member) = self.queue.next() {
                        return Some(member);
                    }
                }
                self.state = TransactionState::Closing;
                if self.queue.is_cancelled() {
                    SimpleOperation::abort_reliable_write()
                } else {
                    SimpleOperation::execute_reliable_write()
                }
            }
            TransactionState::Closing | TransactionState::Closed => {
                self.state = TransactionState::Closed;
                return None;
            }
        };

        let mut operation = Operation::from(synthesized);
        operation.core.mark_enqueued();
        Some(operation)
    }
}

impl OperationBuilder for ReliableWriteQueue {
    fn core(&self) -> &OperationCore {
        self.queue.core()
    }

    fn core_mut(&mut self) -> &mut OperationCore {
        self.queue.core_mut()
    }
}

impl Submit for ReliableWriteQueue {
    type Output = ();

    fn into_job(self) -> Job {
        Job::Reliable(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::{Attribute, Properties, WriteType};
    use crate::operation::OperationKind;
    use uuid::Uuid;

    fn write() -> WriteOperation {
        let chr = Attribute::characteristic(0x0012, Uuid::nil(), Properties::WRITE);
        WriteOperation::characteristic(chr, [1, 2, 3], WriteType::WithResponse)
    }

    fn drain(rw: &mut ReliableWriteQueue) -> Vec<OperationKind> {
        rw.by_ref().map(|op| op.kind()).collect()
    }

    #[test]
    fn test_empty_transaction_begins_and_commits() {
        let mut rw = ReliableWriteQueue::new();
        assert_eq!(rw.size(), 2);
        assert_eq!(
            drain(&mut rw),
            vec![
                OperationKind::BeginReliableWrite,
                OperationKind::ExecuteReliableWrite
            ]
        );
        assert_eq!(rw.state(), TransactionState::Closed);
        assert!(rw.is_empty());
    }

    #[test]
    fn test_size_accounts_for_synthesized_members() {
        let mut rw = ReliableWriteQueue::new().add(write()).add(write());
        assert_eq!(rw.size(), 4);

        rw.next();
        assert_eq!(rw.state(), TransactionState::Begun);
        assert_eq!(rw.size(), 3);

        rw.next();
        rw.next();
        assert_eq!(rw.size(), 1);

        rw.next();
        assert_eq!(rw.state(), TransactionState::Closing);
        assert!(!rw.has_more());
        assert_eq!(rw.size(), 0);
    }

    #[test]
    fn test_cancel_before_members_closes_with_abort() {
        let mut rw = ReliableWriteQueue::new().add(write()).add(write());
        assert_eq!(rw.next().map(|op| op.kind()), Some(OperationKind::BeginReliableWrite));

        rw.cancel();
        assert_eq!(drain(&mut rw), vec![OperationKind::AbortReliableWrite]);
    }

    #[test]
    fn test_cancel_before_begin_still_brackets() {
        let mut rw = ReliableWriteQueue::new().add(write());
        rw.abort();
        assert_eq!(
            drain(&mut rw),
            vec![
                OperationKind::BeginReliableWrite,
                OperationKind::AbortReliableWrite
            ]
        );
    }

    #[test]
    fn test_members_are_forced_to_split() {
        let mut rw = ReliableWriteQueue::new().add(
            WriteOperation::characteristic(
                Attribute::characteristic(1, Uuid::nil(), Properties::WRITE),
                vec![0u8; 45],
                WriteType::WithResponse,
            ),
        );
        rw.next();
        let mut member = rw.next().expect("member write");

        let mut chunks = 0;
        while let Some(crate::driver::GattCommand::Write { value, .. }) = member.next_command(23) {
            assert!(value.len() <= 20);
            chunks += 1;
            let crate::operation::Body::Write(state) = &member.body else {
                unreachable!()
            };
            if state.is_complete() {
                break;
            }
        }
        assert_eq!(chunks, 3);
    }
}
