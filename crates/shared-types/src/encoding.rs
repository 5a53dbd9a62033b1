//! # Canonical Binary Encoding
//!
//! Consensus serialization for chain primitives: little-endian fixed-width
//! integers and Bitcoin-style compact-size length prefixes.
//!
//! Every hashed or size-accounted structure goes through [`Encodable`], so the
//! bytes used for txids, merkle roots, header hashes and block-size limits all
//! agree.

use crate::errors::DecodeError;
use primitive_types::H256;

/// A type with a canonical consensus byte encoding.
pub trait Encodable {
    /// Append the canonical encoding to `out`.
    fn encode_to(&self, out: &mut Vec<u8>);

    /// Canonical encoding as a fresh buffer.
    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode_to(&mut out);
        out
    }

    /// Length of the canonical encoding in bytes.
    fn encoded_len(&self) -> usize {
        self.encode().len()
    }
}

/// A type that can be read back from its canonical encoding.
pub trait Decodable: Sized {
    /// Read one value from the reader.
    fn decode_from(reader: &mut Reader<'_>) -> Result<Self, DecodeError>;

    /// Decode a value that must consume `bytes` exactly.
    fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut reader = Reader::new(bytes);
        let value = Self::decode_from(&mut reader)?;
        reader.finish()?;
        Ok(value)
    }
}

/// Write a compact-size integer.
pub fn write_compact_size(out: &mut Vec<u8>, n: u64) {
    match n {
        0..=0xfc => out.push(n as u8),
        0xfd..=0xffff => {
            out.push(0xfd);
            out.extend_from_slice(&(n as u16).to_le_bytes());
        }
        0x1_0000..=0xffff_ffff => {
            out.push(0xfe);
            out.extend_from_slice(&(n as u32).to_le_bytes());
        }
        _ => {
            out.push(0xff);
            out.extend_from_slice(&n.to_le_bytes());
        }
    }
}

/// Number of bytes a compact-size prefix for `n` occupies.
pub fn compact_size_len(n: u64) -> usize {
    match n {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x1_0000..=0xffff_ffff => 5,
        _ => 9,
    }
}

/// Write a length-prefixed byte string.
pub fn write_var_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    write_compact_size(out, bytes.len() as u64);
    out.extend_from_slice(bytes);
}

/// Cursor over an encoded byte slice.
#[derive(Debug)]
pub struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    /// Start reading at the beginning of `bytes`.
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    /// Fail unless every byte has been consumed.
    pub fn finish(&self) -> Result<(), DecodeError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(DecodeError::TrailingBytes(n)),
        }
    }

    /// Consume exactly `len` bytes.
    pub fn take(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < len {
            return Err(DecodeError::UnexpectedEof {
                needed: len,
                available: self.remaining(),
            });
        }
        let slice = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut buf = [0u8; N];
        buf.copy_from_slice(self.take(N)?);
        Ok(buf)
    }

    /// Read a single byte.
    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take_array::<1>()?[0])
    }

    /// Read a little-endian `u16`.
    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        Ok(u16::from_le_bytes(self.take_array()?))
    }

    /// Read a little-endian `u32`.
    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes(self.take_array()?))
    }

    /// Read a little-endian `i32`.
    pub fn read_i32(&mut self) -> Result<i32, DecodeError> {
        Ok(i32::from_le_bytes(self.take_array()?))
    }

    /// Read a little-endian `u64`.
    pub fn read_u64(&mut self) -> Result<u64, DecodeError> {
        Ok(u64::from_le_bytes(self.take_array()?))
    }

    /// Read a little-endian `i64`.
    pub fn read_i64(&mut self) -> Result<i64, DecodeError> {
        Ok(i64::from_le_bytes(self.take_array()?))
    }

    /// Read a 32-byte hash in serialized order.
    pub fn read_h256(&mut self) -> Result<H256, DecodeError> {
        Ok(H256::from(self.take_array::<32>()?))
    }

    /// Read a compact-size integer, rejecting non-minimal encodings.
    pub fn read_compact_size(&mut self) -> Result<u64, DecodeError> {
        let value = match self.read_u8()? {
            0xfd => {
                let n = self.read_u16()? as u64;
                if n < 0xfd {
                    return Err(DecodeError::NonCanonicalCompactSize(n));
                }
                n
            }
            0xfe => {
                let n = self.read_u32()? as u64;
                if n <= 0xffff {
                    return Err(DecodeError::NonCanonicalCompactSize(n));
                }
                n
            }
            0xff => {
                let n = self.read_u64()?;
                if n <= 0xffff_ffff {
                    return Err(DecodeError::NonCanonicalCompactSize(n));
                }
                n
            }
            small => small as u64,
        };
        Ok(value)
    }

    /// Read a length-prefixed byte string.
    pub fn read_var_bytes(&mut self) -> Result<Vec<u8>, DecodeError> {
        let len = self.read_compact_size()?;
        let len = usize::try_from(len).map_err(|_| DecodeError::LengthOverflow(len))?;
        if len > self.remaining() {
            return Err(DecodeError::UnexpectedEof {
                needed: len,
                available: self.remaining(),
            });
        }
        Ok(self.take(len)?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compact_size_boundaries() {
        for (n, len) in [
            (0u64, 1usize),
            (0xfc, 1),
            (0xfd, 3),
            (0xffff, 3),
            (0x1_0000, 5),
            (0xffff_ffff, 5),
            (0x1_0000_0000, 9),
        ] {
            let mut out = Vec::new();
            write_compact_size(&mut out, n);
            assert_eq!(out.len(), len, "length for {n}");
            assert_eq!(compact_size_len(n), len);

            let mut reader = Reader::new(&out);
            assert_eq!(reader.read_compact_size().unwrap(), n);
            assert!(reader.finish().is_ok());
        }
    }

    #[test]
    fn test_non_canonical_compact_size_rejected() {
        let bytes = [0xfd, 0x10, 0x00];
        let mut reader = Reader::new(&bytes);
        assert!(matches!(
            reader.read_compact_size(),
            Err(DecodeError::NonCanonicalCompactSize(0x10))
        ));
    }

    #[test]
    fn test_reader_eof() {
        let mut reader = Reader::new(&[1, 2]);
        assert!(matches!(
            reader.read_u32(),
            Err(DecodeError::UnexpectedEof { needed: 4, available: 2 })
        ));
    }

    #[test]
    fn test_var_bytes_length_exceeds_input() {
        let bytes = [0x05, 0xaa];
        let mut reader = Reader::new(&bytes);
        assert!(reader.read_var_bytes().is_err());
    }
}
