//! Helpers for assembling containers in tests.
//!
//! Available with the `test-support` feature. Payload encoders mirror the
//! decoders in this crate so that tests can describe entries by their
//! plaintext.

use std::io::Write;

use byteorder::{LittleEndian, WriteBytesExt};

use crate::crypto::rsa::{self, SessionKey};
use crate::crypto::{xor, Rotor};
use crate::header::{HeaderFlags, IndexLayout, NpkHeader, Variant};
use crate::keys::{KeyDatabase, KeyRecord};
use crate::names;

/// The built-in engine key record.
pub fn engine_record() -> &'static KeyRecord {
    KeyDatabase::builtin()
        .get("neox")
        .expect("built-in table has an engine record")
}

/// Encoders producing stored payload bytes.
pub mod encode {
    use super::*;

    pub fn zlib(data: &[u8]) -> Vec<u8> {
        let mut encoder =
            flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(data).expect("in-memory write");
        encoder.finish().expect("in-memory write")
    }

    pub fn zstd(data: &[u8]) -> Vec<u8> {
        zstd::encode_all(data, 3).expect("in-memory write")
    }

    /// A ZIP archive holding `data` as its only member.
    pub fn zip(member: &str, data: &[u8]) -> Vec<u8> {
        let mut buf = std::io::Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut buf);
            let options = zip::write::SimpleFileOptions::default()
                .compression_method(zip::CompressionMethod::Stored);
            writer.start_file(member, options).expect("in-memory write");
            writer.write_all(data).expect("in-memory write");
            writer.finish().expect("in-memory write");
        }
        buf.into_inner()
    }

    /// Keyed-stream ciphertext for entry `index`.
    pub fn keyed_stream(key: &[u8], index: u32, data: &[u8]) -> Vec<u8> {
        let mut out = data.to_vec();
        xor::apply_stream(key, xor::entry_stream(index), &mut out);
        out
    }

    pub fn rotor(key: &str, data: &[u8]) -> Vec<u8> {
        Rotor::new(key.as_bytes()).encrypt(data)
    }

    /// Wrapped form of a session key.
    pub fn wrap_key(record: &KeyRecord, key: &SessionKey) -> Vec<u8> {
        rsa::seal::wrap_key(key, record.rsa().expect("record has an RSA key"))
    }

    /// Payload for the entry-key method: length-prefixed wrapped key, IV,
    /// ciphertext.
    pub fn rsa_entry(record: &KeyRecord, key: &SessionKey, plaintext: &[u8]) -> Vec<u8> {
        let wrapped = wrap_key(record, key);
        let mut out = Vec::new();
        out.write_u16::<LittleEndian>(wrapped.len() as u16).expect("in-memory write");
        out.extend_from_slice(&wrapped);
        out.extend_from_slice(&rsa_body(key, plaintext));
        out
    }

    /// `IV || ciphertext`, as used by the container-key method.
    pub fn rsa_body(key: &SessionKey, plaintext: &[u8]) -> Vec<u8> {
        rsa::seal::encrypt_body(key, &[0x5A; rsa::IV_LEN], plaintext)
    }

    /// A rotor-wrapped compiled script.
    pub fn script(record: &KeyRecord, script: &[u8]) -> Vec<u8> {
        let rotor = Rotor::new(record.rotor_key().expect("record has a rotor key").as_bytes());
        crate::script::wrap(script, &rotor)
    }
}

#[derive(Debug, Clone)]
struct TestEntry {
    stored: Vec<u8>,
    original_length: u32,
    crc: u32,
    compression: u16,
    encryption: u16,
}

/// Assembles a container byte by byte.
///
/// Layout: header, optional key block, payloads, index table, optional
/// name block.
#[derive(Debug, Clone)]
pub struct NpkBuilder {
    variant: Variant,
    layout: IndexLayout,
    stream_key: Vec<u8>,
    entries: Vec<TestEntry>,
    key_block: Option<Vec<u8>>,
    name_block: Option<Vec<u8>>,
}

impl NpkBuilder {
    /// A builder using the engine stream key for the container layer.
    pub fn new(variant: Variant) -> Self {
        Self {
            variant,
            layout: IndexLayout::Compact,
            stream_key: engine_record().stream_key.clone(),
            entries: Vec::new(),
            key_block: None,
            name_block: None,
        }
    }

    /// Use 40-byte index records.
    pub fn extended(mut self) -> Self {
        self.layout = IndexLayout::Extended;
        self
    }

    /// Stream key for the EXPK container layer.
    pub fn stream_key(mut self, key: &[u8]) -> Self {
        self.stream_key = key.to_vec();
        self
    }

    /// Add an entry from its stored bytes and raw tags.
    pub fn raw_entry(
        mut self,
        stored: impl Into<Vec<u8>>,
        original_length: u32,
        compression: u16,
        encryption: u16,
    ) -> Self {
        self.entries.push(TestEntry {
            stored: stored.into(),
            original_length,
            crc: 0,
            compression,
            encryption,
        });
        self
    }

    /// Set the checksum of the most recently added entry.
    pub fn crc(mut self, crc: u32) -> Self {
        if let Some(entry) = self.entries.last_mut() {
            entry.crc = crc;
        }
        self
    }

    /// A stored, unencrypted entry.
    pub fn stored(self, data: &[u8]) -> Self {
        let len = data.len() as u32;
        self.raw_entry(data, len, 0, 0)
    }

    /// A zlib-compressed, unencrypted entry.
    pub fn zlib(self, data: &[u8]) -> Self {
        let len = data.len() as u32;
        self.raw_entry(encode::zlib(data), len, 1, 0)
    }

    /// Header key block carrying `wrapped`.
    pub fn key_block(mut self, wrapped: Vec<u8>) -> Self {
        self.key_block = Some(wrapped);
        self
    }

    /// Raw name block bytes.
    pub fn name_block(mut self, block: Vec<u8>) -> Self {
        self.name_block = Some(block);
        self
    }

    pub fn flat_names(self, paths: &[&str]) -> Self {
        self.name_block(names::build::flat(paths))
    }

    /// Tree records of `(parent, entry, name)`.
    pub fn tree_names(self, records: &[(u32, u32, &str)]) -> Self {
        self.name_block(names::build::tree(records))
    }

    /// Next entry index.
    pub fn next_index(&self) -> u32 {
        self.entries.len() as u32
    }

    pub fn build(&self) -> Vec<u8> {
        let mut flags = 0;
        if self.name_block.is_some() {
            flags |= HeaderFlags::NAME_BLOCK;
        }
        if self.key_block.is_some() {
            flags |= HeaderFlags::KEY_BLOCK;
        }

        let mut body = Vec::new();
        if let Some(block) = &self.key_block {
            body.write_u16::<LittleEndian>(block.len() as u16).expect("in-memory write");
            body.extend_from_slice(block);
        }

        let mut offsets = Vec::with_capacity(self.entries.len());
        for (index, entry) in self.entries.iter().enumerate() {
            offsets.push((NpkHeader::SIZE + body.len()) as u32);
            let mut stored = entry.stored.clone();
            if self.variant.is_stream_wrapped() {
                let stream = xor::container_stream(index as u32);
                xor::apply_stream(&self.stream_key, stream, &mut stored);
            }
            body.extend_from_slice(&stored);
        }

        let mut table = Vec::new();
        for (entry, &offset) in self.entries.iter().zip(&offsets) {
            self.write_record(&mut table, entry, offset);
        }
        if self.variant.is_stream_wrapped() {
            xor::apply_stream(&self.stream_key, xor::INDEX_TABLE_STREAM, &mut table);
        }

        let index_offset = (NpkHeader::SIZE + body.len()) as u32;
        let (extended_info, hash_mode) = match self.layout {
            IndexLayout::Compact => (0, 0),
            IndexLayout::Extended => (1, 1),
        };

        let mut out = Vec::with_capacity(index_offset as usize + table.len());
        out.extend_from_slice(&self.variant.magic());
        for field in [
            self.entries.len() as u32,
            extended_info,
            flags,
            hash_mode,
            index_offset,
        ] {
            out.write_u32::<LittleEndian>(field).expect("in-memory write");
        }
        out.extend_from_slice(&body);
        out.extend_from_slice(&table);
        if let Some(block) = &self.name_block {
            out.extend_from_slice(block);
        }
        out
    }

    fn write_record(&self, out: &mut Vec<u8>, entry: &TestEntry, offset: u32) {
        let sign = 0x5EED_0000 | offset;
        let written = match self.layout {
            IndexLayout::Compact => out.write_u32::<LittleEndian>(sign),
            IndexLayout::Extended => {
                out.write_u64::<LittleEndian>(0xABCD_0000_0000_0000 | sign as u64)
            }
        };
        written.expect("in-memory write");

        for field in [
            offset,
            entry.stored.len() as u32,
            entry.original_length,
            0,
            entry.crc,
        ] {
            out.write_u32::<LittleEndian>(field).expect("in-memory write");
        }
        out.write_u16::<LittleEndian>(entry.compression).expect("in-memory write");
        out.write_u16::<LittleEndian>(entry.encryption).expect("in-memory write");

        if self.layout == IndexLayout::Extended {
            out.extend_from_slice(&[0; 8]);
        }
    }
}
