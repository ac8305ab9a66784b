//! Bounds-checked big-endian byte cursor.
//!
//! Every read validates that enough bytes remain, so a truncated or
//! overrunning class file surfaces as a `ClassFormatError` instead of a panic.

use core_types::{VmError, VmResult};

/// Cursor over a class-file byte slice.
///
/// # Examples
///
/// ```
/// use classfile::ByteReader;
///
/// let data = [0xCA, 0xFE, 0xBA, 0xBE, 0x00, 0x34];
/// let mut reader = ByteReader::new(&data);
/// assert_eq!(reader.read_u4().unwrap(), 0xCAFEBABE);
/// assert_eq!(reader.read_u2().unwrap(), 52);
/// assert!(reader.read_u1().is_err());
/// ```
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    /// Creates a cursor at the start of `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Current offset from the start of the data.
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Number of unread bytes.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Returns true once every byte has been consumed.
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Reads exactly `len` bytes.
    pub fn read_bytes(&mut self, len: usize) -> VmResult<&'a [u8]> {
        if len > self.remaining() {
            return Err(VmError::ClassFormat(format!(
                "truncated class file: need {} bytes at offset {}, {} available",
                len,
                self.pos,
                self.remaining()
            )));
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn read_array<const N: usize>(&mut self) -> VmResult<[u8; N]> {
        let bytes = self.read_bytes(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    /// Reads an unsigned byte.
    pub fn read_u1(&mut self) -> VmResult<u8> {
        Ok(self.read_array::<1>()?[0])
    }

    /// Reads a big-endian unsigned 16-bit quantity.
    pub fn read_u2(&mut self) -> VmResult<u16> {
        Ok(u16::from_be_bytes(self.read_array()?))
    }

    /// Reads a big-endian unsigned 32-bit quantity.
    pub fn read_u4(&mut self) -> VmResult<u32> {
        Ok(u32::from_be_bytes(self.read_array()?))
    }

    /// Reads a big-endian signed 32-bit quantity.
    pub fn read_i4(&mut self) -> VmResult<i32> {
        Ok(i32::from_be_bytes(self.read_array()?))
    }

    /// Reads a big-endian signed 64-bit quantity.
    pub fn read_i8(&mut self) -> VmResult<i64> {
        Ok(i64::from_be_bytes(self.read_array()?))
    }

    /// Reads a big-endian IEEE 754 binary32.
    pub fn read_f4(&mut self) -> VmResult<f32> {
        Ok(f32::from_bits(self.read_u4()?))
    }

    /// Reads a big-endian IEEE 754 binary64.
    pub fn read_f8(&mut self) -> VmResult<f64> {
        Ok(f64::from_bits(self.read_i8()? as u64))
    }

    /// Splits off a sub-reader over the next `len` bytes (used for attribute
    /// bodies, so an attribute can never read past its declared length).
    pub fn sub_reader(&mut self, len: usize) -> VmResult<ByteReader<'a>> {
        Ok(ByteReader::new(self.read_bytes(len)?))
    }
}
