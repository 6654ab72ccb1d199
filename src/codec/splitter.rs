use bytes::{BufMut, Bytes, BytesMut};

use super::{Splitter, LAST_CHUNK_FLAG, LENGTH_HEADER_LEN, MORE_CHUNKS_FLAG};

/// Cuts a message into consecutive `max_length` slices with no framing.
#[derive(Debug, Default, Clone, Copy)]
pub struct MtuSplitter;

impl Splitter for MtuSplitter {
    fn chunk(&mut self, message: &[u8], index: usize, max_length: usize) -> Option<Bytes> {
        if max_length == 0 {
            return None;
        }
        let start = index.checked_mul(max_length)?;
        if start >= message.len() {
            return None;
        }
        let end = message.len().min(start + max_length);
        Some(Bytes::copy_from_slice(&message[start..end]))
    }
}

/// Prefixes the first chunk with the total message length as a big-endian u16.
///
/// Messages longer than `u16::MAX` produce no chunks.
#[derive(Debug, Default, Clone, Copy)]
pub struct LengthPrefixSplitter;

impl Splitter for LengthPrefixSplitter {
    fn chunk(&mut self, message: &[u8], index: usize, max_length: usize) -> Option<Bytes> {
        let len = u16::try_from(message.len()).ok()?;
        if max_length < LENGTH_HEADER_LEN {
            return None;
        }

        // Offsets are into the framed stream: header followed by the message.
        let framed_len = LENGTH_HEADER_LEN + message.len();
        let start = index.checked_mul(max_length)?;
        if start >= framed_len {
            return None;
        }
        let end = framed_len.min(start + max_length);

        let mut chunk = BytesMut::with_capacity(end - start);
        if start == 0 {
            chunk.put_u16(len);
            chunk.put_slice(&message[..end - LENGTH_HEADER_LEN]);
        } else {
            chunk.put_slice(&message[start - LENGTH_HEADER_LEN..end - LENGTH_HEADER_LEN]);
        }
        Some(chunk.freeze())
    }
}

/// Prefixes every chunk with one flag byte; [`LAST_CHUNK_FLAG`] marks the end.
///
/// An empty message still produces a single terminating chunk.
#[derive(Debug, Default, Clone, Copy)]
pub struct FlaggedSplitter;

impl Splitter for FlaggedSplitter {
    fn chunk(&mut self, message: &[u8], index: usize, max_length: usize) -> Option<Bytes> {
        if max_length < 2 {
            return None;
        }
        let payload = max_length - 1;
        let count = message.len().div_ceil(payload).max(1);
        if index >= count {
            return None;
        }

        let start = index * payload;
        let end = message.len().min(start + payload);
        let flag = if index + 1 == count {
            LAST_CHUNK_FLAG
        } else {
            MORE_CHUNKS_FLAG
        };

        let mut chunk = BytesMut::with_capacity(1 + end - start);
        chunk.put_u8(flag);
        chunk.put_slice(&message[start..end]);
        Some(chunk.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mtu_splitter_300_bytes_at_mtu_23() {
        let message: Vec<u8> = (0..300u32).map(|i| i as u8).collect();
        let max = 23 - 3;

        let mut splitter = MtuSplitter;
        let chunks: Vec<Bytes> = (0..)
            .map_while(|i| splitter.chunk(&message, i, max))
            .collect();

        assert_eq!(chunks.len(), 15);
        assert!(chunks.iter().all(|c| c.len() <= 20));
        assert_eq!(splitter.chunk(&message, 15, max), None);
        assert_eq!(chunks.concat(), message);
    }

    #[test]
    fn test_mtu_splitter_is_index_addressable() {
        let mut splitter = MtuSplitter;
        let first = splitter.chunk(b"abcdefgh", 2, 3);
        let again = splitter.chunk(b"abcdefgh", 2, 3);
        assert_eq!(first, Some(Bytes::from_static(b"gh")));
        assert_eq!(first, again);
    }

    #[test]
    fn test_mtu_splitter_zero_budget() {
        assert_eq!(MtuSplitter.chunk(b"abc", 0, 0), None);
    }

    #[test]
    fn test_length_prefix_header() {
        let mut splitter = LengthPrefixSplitter;
        assert_eq!(
            splitter.chunk(b"12345", 0, 5),
            Some(Bytes::from_static(&[0x00, 0x05, b'1', b'2', b'3']))
        );
        assert_eq!(splitter.chunk(b"12345", 1, 5), Some(Bytes::from_static(b"45")));
        assert_eq!(splitter.chunk(b"12345", 2, 5), None);
    }

    #[test]
    fn test_length_prefix_rejects_oversized() {
        let message = vec![0u8; u16::MAX as usize + 1];
        assert_eq!(LengthPrefixSplitter.chunk(&message, 0, 20), None);
    }

    #[test]
    fn test_flagged_marks_last_chunk() {
        let mut splitter = FlaggedSplitter;
        assert_eq!(
            splitter.chunk(b"abcde", 0, 4),
            Some(Bytes::from_static(&[MORE_CHUNKS_FLAG, b'a', b'b', b'c']))
        );
        assert_eq!(
            splitter.chunk(b"abcde", 1, 4),
            Some(Bytes::from_static(&[LAST_CHUNK_FLAG, b'd', b'e']))
        );
        assert_eq!(splitter.chunk(b"abcde", 2, 4), None);
        assert_eq!(
            splitter.chunk(b"", 0, 4),
            Some(Bytes::from_static(&[LAST_CHUNK_FLAG]))
        );
    }
}
