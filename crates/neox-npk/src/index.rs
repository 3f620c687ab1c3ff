//! Index table records and entry descriptors.

use std::ops::Range;

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::error::FormatError;
use crate::header::{IndexLayout, NpkHeader};
use crate::reader::ByteReader;

/// 28-byte index record.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C, packed)]
pub struct CompactRecord {
    /// Hash of the original file name
    pub sign: u32,
    /// Absolute payload offset
    pub offset: u32,
    /// Stored (compressed, encrypted) length
    pub length: u32,
    /// Original (decompressed) length
    pub original_length: u32,
    /// Checksum of the stored payload
    pub zcrc: u32,
    /// Checksum of the original payload
    pub crc: u32,
    /// Compression method tag
    pub compression: u16,
    /// Encryption method tag
    pub encryption: u16,
}

/// 40-byte index record.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C, packed)]
pub struct ExtendedRecord {
    pub sign: u64,
    pub offset: u32,
    pub length: u32,
    pub original_length: u32,
    pub zcrc: u32,
    pub crc: u32,
    pub compression: u16,
    pub encryption: u16,
    pub reserved: [u8; 8],
}

/// Metadata for one entry, in stored order.
///
/// Compression and encryption tags are kept raw; they are interpreted by the
/// decompression dispatcher and the encryption resolver, which reject
/// unknown values for this entry alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryDescriptor {
    /// Position in the index table (0-based)
    pub index: u32,
    /// Name hash from the record (zero-extended for compact records)
    pub name_hash: u64,
    /// Absolute payload offset
    pub offset: u64,
    /// Stored payload length
    pub stored_length: u64,
    /// Declared original length
    pub original_length: u64,
    /// Checksum of the stored payload
    pub stored_crc: u32,
    /// Checksum of the original payload
    pub crc: u32,
    /// Compression method tag
    pub compression: u16,
    /// Encryption method tag
    pub encryption: u16,
}

impl EntryDescriptor {
    /// Byte range of the stored payload.
    #[inline]
    pub fn payload_range(&self) -> Range<usize> {
        self.offset as usize..(self.offset + self.stored_length) as usize
    }

    fn from_compact(index: u32, r: CompactRecord) -> Self {
        Self {
            index,
            name_hash: r.sign as u64,
            offset: r.offset as u64,
            stored_length: r.length as u64,
            original_length: r.original_length as u64,
            stored_crc: r.zcrc,
            crc: r.crc,
            compression: r.compression,
            encryption: r.encryption,
        }
    }

    fn from_extended(index: u32, r: ExtendedRecord) -> Self {
        Self {
            index,
            name_hash: r.sign,
            offset: r.offset as u64,
            stored_length: r.length as u64,
            original_length: r.original_length as u64,
            stored_crc: r.zcrc,
            crc: r.crc,
            compression: r.compression,
            encryption: r.encryption,
        }
    }
}

/// Parse a plaintext index table into descriptors.
///
/// `table` must hold exactly the bytes of the index table (already stripped
/// of the container stream layer for EXPK). Every descriptor is checked
/// against `container_size`.
pub fn parse_index_table(
    table: &[u8],
    header: &NpkHeader,
    container_size: usize,
) -> Result<Vec<EntryDescriptor>, FormatError> {
    let mut reader = ByteReader::new(table, "index table");
    let count = header.entry_count;

    // Guard the allocation before trusting the count.
    let needed = header.index_size();
    if (table.len() as u64) < needed {
        return Err(FormatError::Truncated {
            what: "index table",
            needed: needed.min(usize::MAX as u64) as usize,
            available: table.len(),
        });
    }

    let mut entries = Vec::with_capacity(count as usize);
    for index in 0..count {
        let entry = match header.layout {
            IndexLayout::Compact => EntryDescriptor::from_compact(index, reader.read_struct()?),
            IndexLayout::Extended => EntryDescriptor::from_extended(index, reader.read_struct()?),
        };

        let in_bounds = entry
            .offset
            .checked_add(entry.stored_length)
            .is_some_and(|end| end <= container_size as u64);
        if !in_bounds {
            return Err(FormatError::EntryOutOfBounds {
                index,
                offset: entry.offset,
                length: entry.stored_length,
                container_size: container_size as u64,
            });
        }

        entries.push(entry);
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{HeaderFlags, Variant};

    fn header(count: u32, layout: IndexLayout) -> NpkHeader {
        NpkHeader {
            variant: Variant::Nxpk,
            entry_count: count,
            extended_info: 0,
            flags: HeaderFlags::default(),
            hash_mode: 0,
            index_offset: 0,
            layout,
            key_block: None,
        }
    }

    fn compact(offset: u32, length: u32) -> CompactRecord {
        CompactRecord {
            sign: 0x1234,
            offset,
            length,
            original_length: length,
            zcrc: 1,
            crc: 2,
            compression: 0,
            encryption: 0,
        }
    }

    #[test]
    fn test_record_sizes() {
        assert_eq!(std::mem::size_of::<CompactRecord>(), IndexLayout::Compact.record_size());
        assert_eq!(std::mem::size_of::<ExtendedRecord>(), IndexLayout::Extended.record_size());
    }

    #[test]
    fn test_parse_compact_records() {
        let mut table = Vec::new();
        table.extend_from_slice(compact(0, 10).as_bytes());
        table.extend_from_slice(compact(10, 20).as_bytes());

        let entries = parse_index_table(&table, &header(2, IndexLayout::Compact), 30).unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].index, 1);
        assert_eq!(entries[1].offset, 10);
        assert_eq!(entries[1].payload_range(), 10..30);
        assert_eq!(entries[0].name_hash, 0x1234);
    }

    #[test]
    fn test_parse_extended_records() {
        let record = ExtendedRecord {
            sign: 0xDEAD_BEEF_0000_0001,
            offset: 4,
            length: 8,
            original_length: 16,
            zcrc: 0,
            crc: 0,
            compression: 1,
            encryption: 3,
            reserved: [0; 8],
        };

        let entries =
            parse_index_table(record.as_bytes(), &header(1, IndexLayout::Extended), 12).unwrap();

        assert_eq!(entries[0].name_hash, 0xDEAD_BEEF_0000_0001);
        assert_eq!(entries[0].original_length, 16);
        assert_eq!(entries[0].compression, 1);
        assert_eq!(entries[0].encryption, 3);
    }

    #[test]
    fn test_entry_out_of_bounds() {
        let table = compact(25, 10);
        let err =
            parse_index_table(table.as_bytes(), &header(1, IndexLayout::Compact), 30).unwrap_err();
        assert!(matches!(err, FormatError::EntryOutOfBounds { index: 0, .. }));
    }

    #[test]
    fn test_truncated_table() {
        let table = compact(0, 1);
        let err =
            parse_index_table(table.as_bytes(), &header(2, IndexLayout::Compact), 30).unwrap_err();
        assert!(matches!(err, FormatError::Truncated { what: "index table", .. }));
    }

    #[test]
    fn test_huge_count_does_not_allocate() {
        let err = parse_index_table(&[], &header(u32::MAX, IndexLayout::Extended), 30).unwrap_err();
        assert!(matches!(err, FormatError::Truncated { .. }));
    }
}
