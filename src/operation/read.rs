use crate::attribute::{Attribute, Peer};
use crate::codec::Merger;
use crate::data::{ByteAccumulator, Data};

use super::hooks::{typed_value, ProgressFn};
use super::{operation_builder, Body, Operation, OperationBuilder, OperationCore, OperationKind, TimeoutBuilder};

pub(crate) type FilterFn = Box<dyn Fn(&[u8]) -> bool + Send>;

/// What became of an incoming packet.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Accepted {
    /// The filter dropped it.
    Rejected,
    /// Merged, more packets needed.
    Partial,
    Complete(Data),
}

/// Filter and merge state for reads and value waits.
#[derive(Default)]
pub(crate) struct Reassembly {
    filter: Option<FilterFn>,
    merger: Option<Box<dyn Merger>>,
    buffer: ByteAccumulator,
    count: usize,
    progress: Option<ProgressFn>,
}

impl Reassembly {
    pub(crate) fn set_filter(&mut self, filter: FilterFn) {
        self.filter = Some(filter);
    }

    pub(crate) fn set_merger(&mut self, merger: Box<dyn Merger>) {
        self.merger = Some(merger);
    }

    pub(crate) fn set_progress(&mut self, progress: ProgressFn) {
        self.progress = Some(progress);
    }

    /// Runs a packet through the filter and, if present, the merger.
    /// A rejected packet leaves the merge state untouched.
    pub(crate) fn accept(&mut self, peer: &Peer, packet: &[u8]) -> Accepted {
        if let Some(filter) = &self.filter {
            if !filter(packet) {
                return Accepted::Rejected;
            }
        }

        let Some(merger) = self.merger.as_mut() else {
            return Accepted::Complete(Data::copy_from_slice(packet));
        };

        let index = self.count;
        self.count += 1;
        let complete = merger.merge(&mut self.buffer, packet, index);
        if let Some(progress) = self.progress.as_mut() {
            progress(peer, &Data::copy_from_slice(packet), index);
        }

        if complete {
            self.count = 0;
            Accepted::Complete(self.buffer.take())
        } else {
            Accepted::Partial
        }
    }
}

/// Reads a characteristic or descriptor value.
///
/// With a merger the read is repeated until the merger reports a complete
/// message. A value rejected by the filter is dropped and the read repeated,
/// so a filter that never matches runs until the operation's deadline.
pub struct ReadOperation {
    core: OperationCore,
    kind: OperationKind,
    target: Option<Attribute>,
    reassembly: Reassembly,
}

impl ReadOperation {
    /// Reads a characteristic value.
    pub fn characteristic(target: impl Into<Option<Attribute>>) -> Self {
        Self::new(OperationKind::Read, target.into())
    }

    /// Reads a descriptor value.
    pub fn descriptor(target: impl Into<Option<Attribute>>) -> Self {
        Self::new(OperationKind::ReadDescriptor, target.into())
    }

    fn new(kind: OperationKind, target: Option<Attribute>) -> Self {
        Self {
            core: OperationCore::new(),
            kind,
            target,
            reassembly: Reassembly::default(),
        }
    }

    /// Drops packets for which `f` returns false; the read is then repeated.
    pub fn filter(mut self, f: impl Fn(&[u8]) -> bool + Send + 'static) -> Self {
        self.reassembly.set_filter(Box::new(f));
        self
    }

    /// Repeats the read until `merger` reports a complete message.
    pub fn merge(mut self, merger: impl Merger + 'static) -> Self {
        self.reassembly.set_merger(Box::new(merger));
        self
    }

    /// Called for every packet accepted by the merger.
    pub fn progress(mut self, f: impl FnMut(&Peer, &Data, usize) + Send + 'static) -> Self {
        self.reassembly.set_progress(Box::new(f));
        self
    }

    /// Called with the read value, merged if a merger is set.
    pub fn with(mut self, f: impl FnOnce(&Peer, Data) + Send + 'static) -> Self {
        self.core_mut().hooks.value = Some(typed_value(f));
        self
    }
}

impl From<ReadOperation> for Operation {
    fn from(op: ReadOperation) -> Self {
        Operation::with_core(op.core, op.kind, op.target, Body::Read(op.reassembly))
    }
}

operation_builder!(ReadOperation, Data);
impl TimeoutBuilder for ReadOperation {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::BleAddress;
    use crate::codec::LengthPrefixMerger;
    use std::sync::{Arc, Mutex};
    use uuid::Uuid;

    fn peer() -> Peer {
        Peer::new(BleAddress::Simulated(Uuid::nil()))
    }

    #[test]
    fn test_without_merger_every_packet_completes() {
        let mut reassembly = Reassembly::default();
        assert_eq!(
            reassembly.accept(&peer(), &[1, 2]),
            Accepted::Complete(Data::from(vec![1, 2]))
        );
    }

    #[test]
    fn test_filter_runs_before_merge() {
        let mut reassembly = Reassembly::default();
        reassembly.set_filter(Box::new(|packet: &[u8]| packet.first() != Some(&0xFF)));
        reassembly.set_merger(Box::new(LengthPrefixMerger::new()));

        assert_eq!(reassembly.accept(&peer(), &[0x00, 0x03, 1]), Accepted::Partial);
        // Rejected packets do not advance the chunk index.
        assert_eq!(reassembly.accept(&peer(), &[0xFF, 0xFF]), Accepted::Rejected);
        assert_eq!(
            reassembly.accept(&peer(), &[2, 3]),
            Accepted::Complete(Data::from(vec![1, 2, 3]))
        );
    }

    #[test]
    fn test_merge_state_resets_after_completion() {
        let mut reassembly = Reassembly::default();
        reassembly.set_merger(Box::new(LengthPrefixMerger::new()));

        assert!(matches!(reassembly.accept(&peer(), &[0x00, 0x01, 7]), Accepted::Complete(_)));
        assert_eq!(
            reassembly.accept(&peer(), &[0x00, 0x01, 8]),
            Accepted::Complete(Data::from(vec![8]))
        );
    }

    #[test]
    fn test_progress_reports_accepted_packets() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);

        let mut reassembly = Reassembly::default();
        reassembly.set_merger(Box::new(LengthPrefixMerger::new()));
        reassembly.set_progress(Box::new(move |_: &Peer, _: &Data, index: usize| {
            log.lock().unwrap().push(index)
        }));

        reassembly.accept(&peer(), &[0x00, 0x02, 1]);
        reassembly.accept(&peer(), &[2]);
        assert_eq!(*seen.lock().unwrap(), vec![0, 1]);
    }
}
