//! Packet splitting and merging
//!
//! A [`Splitter`] cuts an outgoing payload into transport-unit-sized chunks.
//! A [`Merger`] reassembles incoming chunks into a logical message inside a
//! [`ByteAccumulator`].

mod merger;
mod splitter;

pub use merger::{FlaggedMerger, LengthPrefixMerger, ShortChunkMerger};
pub use splitter::{FlaggedSplitter, LengthPrefixSplitter, MtuSplitter};

use bytes::Bytes;

use crate::data::ByteAccumulator;

/// Leading byte value that marks the last chunk for the flagged framing.
pub const LAST_CHUNK_FLAG: u8 = 0x01;
/// Leading byte value on every other chunk of the flagged framing.
pub const MORE_CHUNKS_FLAG: u8 = 0x00;
/// Size of the big-endian length header used by the length-prefix framing.
pub const LENGTH_HEADER_LEN: usize = 2;

/// Cuts a message into chunks.
///
/// Must be deterministic and index-addressable: asking for the same `index`
/// twice yields the same chunk, and once every byte has been emitted all
/// further indices return `None`.
pub trait Splitter: Send {
    fn chunk(&mut self, message: &[u8], index: usize, max_length: usize) -> Option<Bytes>;
}

impl<F> Splitter for F
where
    F: FnMut(&[u8], usize, usize) -> Option<Bytes> + Send,
{
    fn chunk(&mut self, message: &[u8], index: usize, max_length: usize) -> Option<Bytes> {
        self(message, index, max_length)
    }
}

/// Reassembles chunks. Returns `true` once `output` holds a complete message.
pub trait Merger: Send {
    fn merge(&mut self, output: &mut ByteAccumulator, chunk: &[u8], index: usize) -> bool;
}

impl<F> Merger for F
where
    F: FnMut(&mut ByteAccumulator, &[u8], usize) -> bool + Send,
{
    fn merge(&mut self, output: &mut ByteAccumulator, chunk: &[u8], index: usize) -> bool {
        self(output, chunk, index)
    }
}
