use bytes::Bytes;

use crate::attribute::{Attribute, Peer, WriteType};
use crate::codec::{MtuSplitter, Splitter};
use crate::data::Data;

use super::hooks::{typed_value, ProgressFn};
use super::{operation_builder, Body, Operation, OperationBuilder, OperationCore, OperationKind, TimeoutBuilder};

/// Payload and split progress of a write.
pub(crate) struct WriteState {
    payload: Bytes,
    write_type: WriteType,
    splitter: Option<Box<dyn Splitter>>,
    progress: Option<ProgressFn>,
    current: Bytes,
    next: Option<Bytes>,
    count: usize,
    complete: bool,
}

impl WriteState {
    fn new(payload: &[u8], write_type: WriteType) -> Self {
        Self {
            payload: Bytes::copy_from_slice(payload),
            write_type,
            splitter: None,
            progress: None,
            current: Bytes::new(),
            next: None,
            count: 0,
            complete: false,
        }
    }

    pub(crate) fn write_type(&self) -> WriteType {
        self.write_type
    }

    pub(crate) fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.complete
    }

    pub(crate) fn force_split(&mut self) {
        if self.splitter.is_none() {
            self.splitter = Some(Box::new(MtuSplitter));
        }
    }

    /// Produces the next chunk to send and looks one chunk ahead. Returns
    /// `None` when the splitter refuses a non-empty payload.
    pub(crate) fn next_chunk(&mut self, mtu: u16) -> Option<Bytes> {
        let max_length = usize::from(mtu).saturating_sub(self.write_type.header_len());
        let chunk = match self.splitter.as_mut() {
            None => {
                self.complete = true;
                self.payload.clone()
            }
            Some(splitter) => {
                let chunk = if self.count == 0 {
                    splitter.chunk(&self.payload, 0, max_length)
                } else {
                    self.next.take()
                };
                let chunk = match chunk {
                    Some(chunk) => chunk,
                    // An empty payload still goes out as one empty write.
                    None if self.payload.is_empty() => Bytes::new(),
                    None => return None,
                };
                self.count += 1;
                self.next = splitter.chunk(&self.payload, self.count, max_length);
                self.complete = self.next.is_none();
                chunk
            }
        };
        self.current = chunk.clone();
        Some(chunk)
    }

    /// Reports the chunk most recently produced as sent.
    pub(crate) fn notify_sent(&mut self, peer: &Peer) {
        if let Some(progress) = self.progress.as_mut() {
            let index = self.count.saturating_sub(1);
            progress(peer, &Data::new(self.current.clone()), index);
        }
    }
}

/// Writes a characteristic or descriptor value.
///
/// The payload is copied when the operation is built. Without a splitter the
/// whole payload goes out in one write.
pub struct WriteOperation {
    core: OperationCore,
    kind: OperationKind,
    target: Option<Attribute>,
    state: WriteState,
}

impl WriteOperation {
    /// Writes `data` to a characteristic with the given write type.
    pub fn characteristic(
        target: impl Into<Option<Attribute>>,
        data: impl AsRef<[u8]>,
        write_type: WriteType,
    ) -> Self {
        Self {
            core: OperationCore::new(),
            kind: OperationKind::Write,
            target: target.into(),
            state: WriteState::new(data.as_ref(), write_type),
        }
    }

    /// Writes `data` to a descriptor. Descriptor writes always expect a response.
    pub fn descriptor(target: impl Into<Option<Attribute>>, data: impl AsRef<[u8]>) -> Self {
        Self {
            core: OperationCore::new(),
            kind: OperationKind::WriteDescriptor,
            target: target.into(),
            state: WriteState::new(data.as_ref(), WriteType::WithResponse),
        }
    }

    /// Splits the payload into MTU-sized chunks.
    pub fn split(mut self) -> Self {
        self.state.splitter = Some(Box::new(MtuSplitter));
        self
    }

    /// Splits the payload with a custom splitter.
    pub fn split_with(mut self, splitter: impl Splitter + 'static) -> Self {
        self.state.splitter = Some(Box::new(splitter));
        self
    }

    /// Called after every chunk is acknowledged, with the chunk and its index.
    pub fn progress(mut self, f: impl FnMut(&Peer, &Data, usize) + Send + 'static) -> Self {
        self.state.progress = Some(Box::new(f));
        self
    }

    /// Called with the full payload once every chunk was sent.
    pub fn with(mut self, f: impl FnOnce(&Peer, Data) + Send + 'static) -> Self {
        self.core_mut().hooks.value = Some(typed_value(f));
        self
    }

    pub(crate) fn force_split(&mut self) {
        self.state.force_split();
    }
}

impl From<WriteOperation> for Operation {
    fn from(op: WriteOperation) -> Self {
        Operation::with_core(op.core, op.kind, op.target, Body::Write(op.state))
    }
}

operation_builder!(WriteOperation, Data);
impl TimeoutBuilder for WriteOperation {}
