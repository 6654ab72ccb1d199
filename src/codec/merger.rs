use super::{Merger, LAST_CHUNK_FLAG, LENGTH_HEADER_LEN};
use crate::data::ByteAccumulator;

/// Reads a big-endian u16 length from the first chunk and completes once that
/// many payload bytes have arrived. Excess bytes are dropped.
///
/// A first chunk too short to hold the header is passed through unframed.
#[derive(Debug, Default, Clone)]
pub struct LengthPrefixMerger {
    expected: Option<usize>,
}

impl LengthPrefixMerger {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Merger for LengthPrefixMerger {
    fn merge(&mut self, output: &mut ByteAccumulator, chunk: &[u8], index: usize) -> bool {
        let payload = if index == 0 {
            if chunk.len() < LENGTH_HEADER_LEN {
                self.expected = None;
                output.write(chunk);
                return true;
            }
            self.expected = Some(usize::from(u16::from_be_bytes([chunk[0], chunk[1]])));
            &chunk[LENGTH_HEADER_LEN..]
        } else {
            chunk
        };

        output.write(payload);
        match self.expected {
            Some(expected) if output.len() >= expected => {
                output.truncate(expected);
                self.expected = None;
                true
            }
            Some(_) => false,
            None => true,
        }
    }
}

/// Strips the leading flag byte of every chunk and completes on
/// [`LAST_CHUNK_FLAG`].
#[derive(Debug, Default, Clone, Copy)]
pub struct FlaggedMerger;

impl Merger for FlaggedMerger {
    fn merge(&mut self, output: &mut ByteAccumulator, chunk: &[u8], _index: usize) -> bool {
        match chunk.split_first() {
            Some((flag, payload)) => {
                output.write(payload);
                *flag == LAST_CHUNK_FLAG
            }
            None => false,
        }
    }
}

/// Completes on the first chunk shorter than `full_size`.
#[derive(Debug, Clone, Copy)]
pub struct ShortChunkMerger {
    full_size: usize,
}

impl ShortChunkMerger {
    pub fn new(full_size: usize) -> Self {
        Self { full_size }
    }
}

impl Merger for ShortChunkMerger {
    fn merge(&mut self, output: &mut ByteAccumulator, chunk: &[u8], _index: usize) -> bool {
        output.write(chunk);
        chunk.len() < self.full_size
    }
}
