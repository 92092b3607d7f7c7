//! Canonical wire encoding helpers
//!
//! Little-endian integers and Bitcoin-style variable-length counts. The
//! reader is bounds-checked and fails closed: any truncation, oversized
//! count, or trailing garbage is a `DecodeError`, never a panic.

use thiserror::Error;

/// Errors produced while decoding canonical bytes
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unexpected end of input at byte {position}")]
    UnexpectedEnd { position: usize },
    #[error("trailing bytes after decoded value")]
    TrailingBytes,
    #[error("declared length {declared} exceeds limit {limit}")]
    Oversized { declared: u64, limit: u64 },
    #[error("non-canonical varint encoding")]
    NonCanonicalVarint,
}

// =============================================================================
// Writing
// =============================================================================

/// Append a variable-length count: 1, 3, 5 or 9 bytes depending on value.
pub fn write_varint(buf: &mut Vec<u8>, value: u64) {
    if value < 0xfd {
        buf.push(value as u8);
    } else if value <= 0xffff {
        buf.push(0xfd);
        buf.extend_from_slice(&(value as u16).to_le_bytes());
    } else if value <= 0xffff_ffff {
        buf.push(0xfe);
        buf.extend_from_slice(&(value as u32).to_le_bytes());
    } else {
        buf.push(0xff);
        buf.extend_from_slice(&value.to_le_bytes());
    }
}

/// Append a length-prefixed byte string.
pub fn write_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    write_varint(buf, bytes.len() as u64);
    buf.extend_from_slice(bytes);
}

// =============================================================================
// Reading
// =============================================================================

/// Bounds-checked cursor over an input buffer
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Reader { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, count: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < count {
            return Err(DecodeError::UnexpectedEnd { position: self.pos });
        }
        let slice = &self.data[self.pos..self.pos + count];
        self.pos += count;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16_le(&mut self) -> Result<u16, DecodeError> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_u32_le(&mut self) -> Result<u32, DecodeError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_u64_le(&mut self) -> Result<u64, DecodeError> {
        let bytes = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(arr))
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let bytes = self.take(N)?;
        let mut arr = [0u8; N];
        arr.copy_from_slice(bytes);
        Ok(arr)
    }

    /// Read a variable-length count, rejecting non-minimal encodings.
    pub fn read_varint(&mut self) -> Result<u64, DecodeError> {
        let prefix = self.read_u8()?;
        match prefix {
            0xfd => {
                let value = self.read_u16_le()? as u64;
                if value < 0xfd {
                    return Err(DecodeError::NonCanonicalVarint);
                }
                Ok(value)
            }
            0xfe => {
                let value = self.read_u32_le()? as u64;
                if value <= 0xffff {
                    return Err(DecodeError::NonCanonicalVarint);
                }
                Ok(value)
            }
            0xff => {
                let value = self.read_u64_le()?;
                if value <= 0xffff_ffff {
                    return Err(DecodeError::NonCanonicalVarint);
                }
                Ok(value)
            }
            value => Ok(value as u64),
        }
    }

    /// Read a count that also serves as an allocation bound.
    pub fn read_count(&mut self, limit: u64) -> Result<u64, DecodeError> {
        let count = self.read_varint()?;
        if count > limit {
            return Err(DecodeError::Oversized {
                declared: count,
                limit,
            });
        }
        Ok(count)
    }

    /// Read a length-prefixed byte string, bounded by `limit`.
    pub fn read_bytes(&mut self, limit: u64) -> Result<Vec<u8>, DecodeError> {
        let len = self.read_count(limit)?;
        Ok(self.take(len as usize)?.to_vec())
    }

    /// Assert the whole input was consumed.
    pub fn finish(self) -> Result<(), DecodeError> {
        if self.remaining() != 0 {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(value: u64) -> u64 {
        let mut buf = Vec::new();
        write_varint(&mut buf, value);
        let mut reader = Reader::new(&buf);
        let out = reader.read_varint().unwrap();
        reader.finish().unwrap();
        out
    }

    #[test]
    fn test_varint_boundaries() {
        for v in [0, 1, 0xfc, 0xfd, 0xffff, 0x1_0000, 0xffff_ffff, 0x1_0000_0000, u64::MAX] {
            assert_eq!(roundtrip(v), v);
        }
    }

    #[test]
    fn test_varint_widths() {
        let widths = [(0xfcu64, 1), (0xfd, 3), (0xffff, 3), (0x1_0000, 5), (0x1_0000_0000, 9)];
        for (value, width) in widths {
            let mut buf = Vec::new();
            write_varint(&mut buf, value);
            assert_eq!(buf.len(), width, "value {:#x}", value);
        }
    }

    #[test]
    fn test_non_canonical_varint_rejected() {
        // 0xfd prefix carrying a value that fits in one byte
        let mut reader = Reader::new(&[0xfd, 0x05, 0x00]);
        assert_eq!(reader.read_varint(), Err(DecodeError::NonCanonicalVarint));
    }

    #[test]
    fn test_truncated_input() {
        let mut reader = Reader::new(&[0x01, 0x02]);
        assert!(matches!(
            reader.read_u32_le(),
            Err(DecodeError::UnexpectedEnd { .. })
        ));
    }

    #[test]
    fn test_oversized_count() {
        let mut buf = Vec::new();
        write_varint(&mut buf, 10_000);
        let mut reader = Reader::new(&buf);
        assert!(matches!(
            reader.read_count(100),
            Err(DecodeError::Oversized { .. })
        ));
    }

    #[test]
    fn test_trailing_bytes() {
        let reader = {
            let mut r = Reader::new(&[0x01, 0x02]);
            r.read_u8().unwrap();
            r
        };
        assert_eq!(reader.finish(), Err(DecodeError::TrailingBytes));
    }

    #[test]
    fn test_length_prefixed_bytes() {
        let mut buf = Vec::new();
        write_bytes(&mut buf, b"abc");
        let mut reader = Reader::new(&buf);
        assert_eq!(reader.read_bytes(16).unwrap(), b"abc");
        reader.finish().unwrap();
    }
}
