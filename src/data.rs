//! Attribute values and the buffer chunks are merged into

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

/// Integer layouts understood by [`Data::int_value`]. All are little endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntFormat {
    U8,
    U16,
    U24,
    U32,
    I8,
    I16,
    I24,
    I32,
}

impl IntFormat {
    /// Width of the value in bytes.
    pub fn size(self) -> usize {
        match self {
            IntFormat::U8 | IntFormat::I8 => 1,
            IntFormat::U16 | IntFormat::I16 => 2,
            IntFormat::U24 | IntFormat::I24 => 3,
            IntFormat::U32 | IntFormat::I32 => 4,
        }
    }

    fn is_signed(self) -> bool {
        matches!(
            self,
            IntFormat::I8 | IntFormat::I16 | IntFormat::I24 | IntFormat::I32
        )
    }
}

/// IEEE-11073 floating point layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloatFormat {
    /// 16 bits: 4-bit exponent, 12-bit mantissa.
    SFloat,
    /// 32 bits: 8-bit exponent, 24-bit mantissa.
    Float,
}

/// An immutable attribute value.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Data(Bytes);

impl Data {
    /// Wraps `bytes` without copying.
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    /// Copies `bytes` into a new value.
    pub fn copy_from_slice(bytes: &[u8]) -> Self {
        Self(Bytes::copy_from_slice(bytes))
    }

    /// Length of the value in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Borrows the raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Unwraps the underlying buffer.
    pub fn into_bytes(self) -> Bytes {
        self.0
    }

    /// Byte at `offset`, or `None` past the end.
    pub fn byte(&self, offset: usize) -> Option<u8> {
        self.0.get(offset).copied()
    }

    /// Reads an integer at `offset`, or `None` if the value does not fit.
    pub fn int_value(&self, format: IntFormat, offset: usize) -> Option<i64> {
        let size = format.size();
        let raw = self.0.get(offset..offset.checked_add(size)?)?;
        let value = raw
            .iter()
            .enumerate()
            .fold(0u32, |acc, (i, b)| acc | (u32::from(*b) << (8 * i)));
        if format.is_signed() {
            Some(sign_extend(value, size * 8))
        } else {
            Some(i64::from(value))
        }
    }

    /// Reads an IEEE-11073 float at `offset`. Reserved encodings map to NaN
    /// and the infinities.
    pub fn float_value(&self, format: FloatFormat, offset: usize) -> Option<f32> {
        match format {
            FloatFormat::SFloat => {
                let raw = self.int_value(IntFormat::U16, offset)? as u32;
                Some(match raw {
                    0x07FF | 0x0800 | 0x0801 => f32::NAN,
                    0x07FE => f32::INFINITY,
                    0x0802 => f32::NEG_INFINITY,
                    _ => {
                        let mantissa = sign_extend(raw & 0x0FFF, 12);
                        let exponent = sign_extend(raw >> 12, 4);
                        mantissa as f32 * 10f32.powi(exponent as i32)
                    }
                })
            }
            FloatFormat::Float => {
                let raw = self.int_value(IntFormat::U32, offset)? as u32;
                Some(match raw {
                    0x007F_FFFF | 0x0080_0000 | 0x0080_0001 => f32::NAN,
                    0x007F_FFFE => f32::INFINITY,
                    0x0080_0002 => f32::NEG_INFINITY,
                    _ => {
                        let mantissa = sign_extend(raw & 0x00FF_FFFF, 24);
                        let exponent = sign_extend(raw >> 24, 8);
                        mantissa as f32 * 10f32.powi(exponent as i32)
                    }
                })
            }
        }
    }

    /// Decodes the bytes from `offset` as UTF-8, replacing invalid sequences.
    pub fn string_value(&self, offset: usize) -> Option<String> {
        self.0
            .get(offset..)
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }
}

fn sign_extend(value: u32, bits: usize) -> i64 {
    let shift = 64 - bits;
    (i64::from(value) << shift) >> shift
}

impl fmt::Display for Data {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("()");
        }
        let encoded = hex::encode_upper(&self.0);
        let pairs: Vec<&str> = (0..encoded.len())
            .step_by(2)
            .map(|i| &encoded[i..i + 2])
            .collect();
        write!(f, "(0x) {}", pairs.join("-"))
    }
}

impl fmt::Debug for Data {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Data{}", self)
    }
}

impl AsRef<[u8]> for Data {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<Bytes> for Data {
    fn from(bytes: Bytes) -> Self {
        Self(bytes)
    }
}

impl From<Vec<u8>> for Data {
    fn from(bytes: Vec<u8>) -> Self {
        Self(Bytes::from(bytes))
    }
}

impl From<&[u8]> for Data {
    fn from(bytes: &[u8]) -> Self {
        Self::copy_from_slice(bytes)
    }
}

/// Growable buffer that mergers write reassembled payload bytes into.
#[derive(Debug, Default)]
pub struct ByteAccumulator {
    buf: BytesMut,
}

impl ByteAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `bytes` to the buffer.
    pub fn write(&mut self, bytes: &[u8]) {
        self.buf.put_slice(bytes);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn truncate(&mut self, len: usize) {
        self.buf.truncate(len);
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Freezes the accumulated bytes into a value and leaves the buffer empty.
    pub fn take(&mut self) -> Data {
        Data(self.buf.split().freeze())
    }
}
