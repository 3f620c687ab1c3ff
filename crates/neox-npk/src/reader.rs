//! Little-endian cursor over a byte slice.

use zerocopy::FromBytes;

use crate::error::FormatError;

/// Cursor that reads little-endian values out of a borrowed slice.
///
/// Every read is bounds-checked and reports which structure was being read
/// when it ran out of bytes.
#[derive(Debug, Clone)]
pub(crate) struct ByteReader<'a> {
    data: &'a [u8],
    position: usize,
    what: &'static str,
}

impl<'a> ByteReader<'a> {
    /// Create a reader labelled with the structure it is parsing.
    #[inline]
    pub const fn new(data: &'a [u8], what: &'static str) -> Self {
        Self {
            data,
            position: 0,
            what,
        }
    }

    #[inline]
    pub const fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.position)
    }

    #[inline]
    pub fn read_bytes(&mut self, count: usize) -> Result<&'a [u8], FormatError> {
        if self.remaining() < count {
            return Err(FormatError::Truncated {
                what: self.what,
                needed: count,
                available: self.remaining(),
            });
        }
        let bytes = &self.data[self.position..self.position + count];
        self.position += count;
        Ok(bytes)
    }

    #[inline]
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], FormatError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    #[inline]
    pub fn read_u16(&mut self) -> Result<u16, FormatError> {
        self.read_array().map(u16::from_le_bytes)
    }

    #[inline]
    pub fn read_u32(&mut self) -> Result<u32, FormatError> {
        self.read_array().map(u32::from_le_bytes)
    }

    /// Read a plain-old-data struct using zerocopy.
    #[inline]
    pub fn read_struct<T: FromBytes>(&mut self) -> Result<T, FormatError> {
        let size = std::mem::size_of::<T>();
        let bytes = self.read_bytes(size)?;
        T::read_from_bytes(bytes).map_err(|_| FormatError::Truncated {
            what: self.what,
            needed: size,
            available: bytes.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_primitives() {
        let data = [0x01u8, 0x02, 0x03, 0x04, 0x05, 0x06];
        let mut reader = ByteReader::new(&data, "test");

        assert_eq!(reader.read_u32().unwrap(), 0x04030201);
        assert_eq!(reader.read_u16().unwrap(), 0x0605);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_truncation_names_structure() {
        let data = [0x01, 0x02];
        let mut reader = ByteReader::new(&data, "name block");

        let err = reader.read_u32().unwrap_err();
        assert_eq!(
            err,
            FormatError::Truncated {
                what: "name block",
                needed: 4,
                available: 2
            }
        );
        // A failed read does not move the cursor.
        assert_eq!(reader.remaining(), 2);
    }
}
