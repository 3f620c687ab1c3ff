//! Container header structures.

use std::ops::Range;

use serde::{Deserialize, Serialize};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::error::FormatError;
use crate::reader::ByteReader;

/// On-disk container header.
///
/// All fields are little-endian. The magic selects the [`Variant`].
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C, packed)]
pub struct RawHeader {
    /// Container signature (`NXPK` or `EXPK`)
    pub magic: [u8; 4],
    /// Number of index records
    pub entry_count: u32,
    /// Non-zero in containers that may use extended index records
    pub extended_info: u32,
    /// Global flags, see [`HeaderFlags`]
    pub flags: u32,
    /// Hash mode; together with `extended_info` selects the index layout
    pub hash_mode: u32,
    /// Absolute offset of the index table
    pub index_offset: u32,
}

/// Container format variant, identified by the magic signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Variant {
    /// Plain index table and payloads.
    #[serde(rename = "NXPK")]
    Nxpk,
    /// Index table and payloads wrapped in the title stream layer.
    #[serde(rename = "EXPK")]
    Expk,
}

impl Variant {
    pub const NXPK_MAGIC: [u8; 4] = *b"NXPK";
    pub const EXPK_MAGIC: [u8; 4] = *b"EXPK";

    /// Identify the variant from a magic signature.
    pub fn from_magic(magic: [u8; 4]) -> Option<Self> {
        match magic {
            Self::NXPK_MAGIC => Some(Self::Nxpk),
            Self::EXPK_MAGIC => Some(Self::Expk),
            _ => None,
        }
    }

    pub const fn magic(self) -> [u8; 4] {
        match self {
            Self::Nxpk => Self::NXPK_MAGIC,
            Self::Expk => Self::EXPK_MAGIC,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Nxpk => "NXPK",
            Self::Expk => "EXPK",
        }
    }

    /// Whether payloads and the index carry the container stream layer.
    pub const fn is_stream_wrapped(self) -> bool {
        matches!(self, Self::Expk)
    }
}

impl std::fmt::Display for Variant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Index record layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexLayout {
    /// 28-byte records with a 32-bit name hash.
    Compact,
    /// 40-byte records with a 64-bit name hash and trailing reserved bytes.
    Extended,
}

impl IndexLayout {
    pub const fn record_size(self) -> usize {
        match self {
            Self::Compact => 28,
            Self::Extended => 40,
        }
    }
}

/// Global header flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeaderFlags(u32);

impl HeaderFlags {
    /// A name block follows the index table.
    pub const NAME_BLOCK: u32 = 0x100;
    /// An RSA-wrapped container key block follows the header.
    pub const KEY_BLOCK: u32 = 0x200;

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn has_name_block(self) -> bool {
        self.0 & Self::NAME_BLOCK != 0
    }

    #[inline]
    pub const fn has_key_block(self) -> bool {
        self.0 & Self::KEY_BLOCK != 0
    }
}

/// Parsed container header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NpkHeader {
    pub variant: Variant,
    pub entry_count: u32,
    pub extended_info: u32,
    pub flags: HeaderFlags,
    pub hash_mode: u32,
    pub index_offset: u32,
    pub layout: IndexLayout,
    /// Big-endian RSA-wrapped session key from the header key block.
    pub key_block: Option<Vec<u8>>,
}

impl NpkHeader {
    /// Size of the fixed header in bytes.
    pub const SIZE: usize = std::mem::size_of::<RawHeader>();

    /// Parse the header from the start of the container.
    pub fn parse(data: &[u8]) -> Result<Self, FormatError> {
        let mut reader = ByteReader::new(data, "container header");
        let raw: RawHeader = reader.read_struct()?;

        let variant = Variant::from_magic(raw.magic).ok_or(FormatError::BadMagic(raw.magic))?;
        let flags = HeaderFlags::from_bits(raw.flags);

        let layout = if raw.extended_info != 0 && raw.hash_mode != 0 {
            IndexLayout::Extended
        } else {
            IndexLayout::Compact
        };

        let key_block = if flags.has_key_block() {
            let mut block_reader = ByteReader::new(&data[Self::SIZE..], "container key block");
            let len = block_reader.read_u16()? as usize;
            if len == 0 {
                return Err(FormatError::KeyBlock("zero-length key block".into()));
            }
            Some(block_reader.read_bytes(len)?.to_vec())
        } else {
            None
        };

        Ok(Self {
            variant,
            entry_count: raw.entry_count,
            extended_info: raw.extended_info,
            flags,
            hash_mode: raw.hash_mode,
            index_offset: raw.index_offset,
            layout,
            key_block,
        })
    }

    /// Size of the index table in bytes.
    pub fn index_size(&self) -> u64 {
        self.entry_count as u64 * self.layout.record_size() as u64
    }

    /// Byte range of the index table, checked against the container size.
    pub fn index_range(&self, container_size: usize) -> Result<Range<usize>, FormatError> {
        let start = self.index_offset as u64;
        let size = self.index_size();
        let end = start
            .checked_add(size)
            .filter(|&end| end <= container_size as u64)
            .ok_or(FormatError::IndexOutOfBounds {
                offset: start,
                size,
                container_size: container_size as u64,
            })?;
        Ok(start as usize..end as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_header(
        magic: &[u8; 4],
        count: u32,
        extended: u32,
        flags: u32,
        hash: u32,
        index: u32,
    ) -> Vec<u8> {
        let raw = RawHeader {
            magic: *magic,
            entry_count: count,
            extended_info: extended,
            flags,
            hash_mode: hash,
            index_offset: index,
        };
        raw.as_bytes().to_vec()
    }

    #[test]
    fn test_header_size() {
        assert_eq!(NpkHeader::SIZE, 24);
    }

    #[test]
    fn test_parse_nxpk_compact() {
        let data = raw_header(b"NXPK", 3, 0, 0, 1, 24);
        let header = NpkHeader::parse(&data).unwrap();

        assert_eq!(header.variant, Variant::Nxpk);
        assert_eq!(header.entry_count, 3);
        assert_eq!(header.layout, IndexLayout::Compact);
        assert_eq!(header.index_size(), 84);
        assert!(!header.flags.has_name_block());
        assert!(header.key_block.is_none());
    }

    #[test]
    fn test_extended_layout_needs_both_fields() {
        let data = raw_header(b"EXPK", 1, 1, 0, 1, 24);
        let header = NpkHeader::parse(&data).unwrap();
        assert_eq!(header.variant, Variant::Expk);
        assert_eq!(header.layout, IndexLayout::Extended);

        let data = raw_header(b"EXPK", 1, 1, 0, 0, 24);
        assert_eq!(NpkHeader::parse(&data).unwrap().layout, IndexLayout::Compact);
    }

    #[test]
    fn test_bad_magic() {
        let data = raw_header(b"PK\x03\x04", 0, 0, 0, 0, 0);
        assert_eq!(
            NpkHeader::parse(&data).unwrap_err(),
            FormatError::BadMagic(*b"PK\x03\x04")
        );
    }

    #[test]
    fn test_truncated_header() {
        let err = NpkHeader::parse(b"NXPK\x01\x00").unwrap_err();
        assert!(matches!(err, FormatError::Truncated { what: "container header", .. }));
    }

    #[test]
    fn test_key_block() {
        let mut data = raw_header(b"NXPK", 0, 0, HeaderFlags::KEY_BLOCK, 0, 24);
        data.extend_from_slice(&3u16.to_le_bytes());
        data.extend_from_slice(&[0xAA, 0xBB, 0xCC]);

        let header = NpkHeader::parse(&data).unwrap();
        assert_eq!(header.key_block.as_deref(), Some(&[0xAA, 0xBB, 0xCC][..]));

        // Block length longer than the data.
        let mut short = raw_header(b"NXPK", 0, 0, HeaderFlags::KEY_BLOCK, 0, 24);
        short.extend_from_slice(&9u16.to_le_bytes());
        assert!(NpkHeader::parse(&short).is_err());
    }

    #[test]
    fn test_index_range_bounds() {
        let data = raw_header(b"NXPK", 2, 0, 0, 0, 100);
        let header = NpkHeader::parse(&data).unwrap();

        assert_eq!(header.index_range(156).unwrap(), 100..156);
        assert!(matches!(
            header.index_range(155),
            Err(FormatError::IndexOutOfBounds { .. })
        ));
    }
}
