//! NPK archive access.

use std::fs::File;
use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;

use memmap2::Mmap;

use crate::crypto::Resolver;
use crate::decompress::{self, CompressionMethod};
use crate::detect::{synthetic_name, FileKind};
use crate::entry::DecodedEntry;
use crate::error::{CryptoError, EntryError, EntryFailure, Error, Result};
use crate::header::NpkHeader;
use crate::index::{parse_index_table, EntryDescriptor};
use crate::keys::KeyDatabase;
use crate::names::{self, NameMap, NameReport, NameWarning};
use crate::script;

/// Options for opening and decoding a container.
#[derive(Debug, Clone)]
pub struct DecodeOptions {
    /// Ignore the name block and always use synthetic names.
    pub skip_name_reconstruction: bool,
    /// Title to use instead of selecting a key record by signature.
    pub key_title_hint: Option<String>,
    /// Unwrap rotor-obscured compiled scripts after decompression.
    pub unwrap_scripts: bool,
    /// Key records to use instead of the built-in table.
    pub keys: Option<Arc<KeyDatabase>>,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            skip_name_reconstruction: false,
            key_title_hint: None,
            unwrap_scripts: true,
            keys: None,
        }
    }
}

/// Backing bytes of an archive.
enum Source {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl Deref for Source {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &[u8] {
        match self {
            Self::Mapped(mmap) => mmap,
            Self::Owned(bytes) => bytes,
        }
    }
}

/// An opened NPK container.
///
/// Opening parses the header, index table and name block once. Entries are
/// decoded on demand; decoding takes `&self`, so a single archive can be
/// shared by many worker threads.
///
/// ```no_run
/// use neox_npk::{DecodeOptions, NpkArchive};
///
/// let archive = NpkArchive::open("res.npk", DecodeOptions::default())?;
/// for result in archive.decode_all() {
///     match result {
///         Ok(entry) => println!("{} ({} bytes)", entry.path(), entry.data().len()),
///         Err(err) => eprintln!("{err}"),
///     }
/// }
/// # Ok::<(), neox_npk::Error>(())
/// ```
pub struct NpkArchive {
    source: Source,
    name: String,
    header: NpkHeader,
    entries: Vec<EntryDescriptor>,
    names: NameMap,
    name_warnings: Vec<NameWarning>,
    resolver: Resolver,
    unwrap_scripts: bool,
}

impl NpkArchive {
    /// Memory-map and parse a container.
    pub fn open<P: AsRef<Path>>(path: P, options: DecodeOptions) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        // The map is read-only and the file is not expected to change while open.
        let mmap = unsafe { Mmap::map(&file)? };

        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();

        Self::load(Source::Mapped(mmap), name, options)
    }

    /// Parse a container held in memory.
    pub fn from_bytes(bytes: Vec<u8>, options: DecodeOptions) -> Result<Self> {
        Self::load(Source::Owned(bytes), "memory".to_string(), options)
    }

    fn load(source: Source, name: String, options: DecodeOptions) -> Result<Self> {
        let data: &[u8] = &source;
        let header = NpkHeader::parse(data)?;

        log::debug!(
            "{name}: {} with {} entries, {:?} index at {:#x}, flags {:#x}",
            header.variant,
            header.entry_count,
            header.layout,
            header.index_offset,
            header.flags.bits()
        );

        let keys = options.keys.as_deref().unwrap_or(KeyDatabase::builtin());
        let record = match keys.select(header.variant, options.key_title_hint.as_deref()) {
            Ok(record) => {
                log::debug!("{name}: using key record '{}'", record.title);
                Ok(record.clone())
            }
            // Without a record the index of a stream-wrapped container is unreadable.
            Err(err) if header.variant.is_stream_wrapped() => return Err(err.into()),
            Err(err) => {
                log::debug!("{name}: {err}; only unencrypted entries will decode");
                Err(err)
            }
        };

        let resolver = Resolver::new(header.variant, record, header.key_block.clone());

        let index_range = header.index_range(data.len())?;
        let table = resolver.unwrap_index(&data[index_range.clone()])?;
        let entries = parse_index_table(&table, &header, data.len())?;

        let read_names = header.flags.has_name_block() && !options.skip_name_reconstruction;
        let (names, name_warnings) = if read_names {
            let result = names::reconstruct(&data[index_range.end..], header.entry_count);
            for warning in &result.warnings {
                log::warn!("{name}: {warning}");
            }
            log::debug!("{name}: reconstructed {} of {} names", result.names.len(), entries.len());
            (result.names, result.warnings)
        } else {
            (NameMap::default(), Vec::new())
        };

        Ok(Self {
            source,
            name,
            header,
            entries,
            names,
            name_warnings,
            resolver,
            unwrap_scripts: options.unwrap_scripts,
        })
    }

    /// File name of the container.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn header(&self) -> &NpkHeader {
        &self.header
    }

    /// Entry descriptors in index order.
    #[inline]
    pub fn entries(&self) -> &[EntryDescriptor] {
        &self.entries
    }

    #[inline]
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn get(&self, index: u32) -> Option<&EntryDescriptor> {
        self.entries.get(index as usize)
    }

    /// Reconstructed names, empty when the container has none.
    #[inline]
    pub fn names(&self) -> &NameMap {
        &self.names
    }

    #[inline]
    pub fn name_warnings(&self) -> &[NameWarning] {
        &self.name_warnings
    }

    /// Serialisable summary of the name reconstruction.
    pub fn name_report(&self) -> NameReport {
        NameReport::new(&self.name, self.header.entry_count, &self.names, &self.name_warnings)
    }

    /// Decode an entry by index.
    pub fn decode(&self, index: u32) -> Result<DecodedEntry> {
        let entry = self.get(index).ok_or(Error::EntryNotFound(index))?;
        Ok(self.decode_entry(entry)?)
    }

    /// Decrypt, decompress and name one entry.
    pub fn decode_entry(
        &self,
        entry: &EntryDescriptor,
    ) -> std::result::Result<DecodedEntry, EntryError> {
        let fail = |kind: EntryFailure| EntryError::new(entry.index, kind);

        let stored = self
            .source
            .get(entry.payload_range())
            .ok_or_else(|| fail(CryptoError::Truncated("payload outside container").into()))?;
        let decrypted = self.resolver.decrypt(entry, stored).map_err(|e| fail(e.into()))?;

        // Rotor-wrapped scripts carry their own zlib layer; the compression
        // tag does not apply to them.
        let is_script = FileKind::sniff(&decrypted) == FileKind::RotorScript;
        let (data, kind) = if self.unwrap_scripts && is_script {
            let rotor = self.resolver.rotor().map_err(|e| fail(e.into()))?;
            let data = script::unwrap(&decrypted, rotor).map_err(|e| fail(e.into()))?;
            let kind = FileKind::sniff(&data);
            log::trace!("entry {}: unwrapped script as {kind}", entry.index);
            (data, kind)
        } else {
            let method =
                CompressionMethod::try_from(entry.compression).map_err(|e| fail(e.into()))?;
            let data = decompress::decompress(decrypted, method, entry.original_length)
                .map_err(|e| fail(e.into()))?;
            let kind = FileKind::sniff(&data);
            (data, kind)
        };

        let (path, named) = match self.names.get(entry.index) {
            Some(path) => (path.to_string(), true),
            None => (synthetic_name(entry.index, kind), false),
        };

        Ok(DecodedEntry::new(entry.index, path, kind, data, named))
    }

    /// Decode every entry in index order.
    pub fn decode_all(&self) -> Vec<std::result::Result<DecodedEntry, EntryError>> {
        self.entries.iter().map(|entry| self.decode_entry(entry)).collect()
    }

    /// Decode every entry on the current rayon pool, handing each result to
    /// `callback` as soon as it is ready.
    ///
    /// Results arrive in no particular order.
    #[cfg(feature = "parallel")]
    pub fn decode_parallel<F>(&self, callback: F)
    where
        F: Fn(std::result::Result<DecodedEntry, EntryError>) + Sync + Send,
    {
        use rayon::prelude::*;

        self.entries
            .par_iter()
            .for_each(|entry| callback(self.decode_entry(entry)));
    }

    /// Decode every entry in parallel and return the results sorted by index.
    #[cfg(feature = "parallel")]
    pub fn decode_parallel_collect(&self) -> Vec<std::result::Result<DecodedEntry, EntryError>> {
        let results = parking_lot::Mutex::new(Vec::with_capacity(self.entries.len()));
        self.decode_parallel(|result| results.lock().push(result));

        let mut results = results.into_inner();
        results.sort_by_key(|result| match result {
            Ok(entry) => entry.index(),
            Err(err) => err.index,
        });
        results
    }
}

impl std::fmt::Debug for NpkArchive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NpkArchive")
            .field("name", &self.name)
            .field("variant", &self.header.variant)
            .field("entries", &self.entries.len())
            .field("names", &self.names.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CodecError, FormatError};
    use crate::header::Variant;
    use crate::testing::{encode, engine_record, NpkBuilder};

    fn open(bytes: Vec<u8>) -> NpkArchive {
        NpkArchive::from_bytes(bytes, DecodeOptions::default()).unwrap()
    }

    fn two_entry_container() -> Vec<u8> {
        let key = &engine_record().stream_key;
        NpkBuilder::new(Variant::Nxpk)
            .stored(b"hello")
            .raw_entry(encode::keyed_stream(key, 1, &encode::zlib(b"hello world")), 11, 1, 1)
            .build()
    }

    #[test]
    fn test_two_entries_sequential() {
        let archive = open(two_entry_container());
        assert_eq!(archive.entry_count(), 2);
        assert_eq!(archive.header().variant, Variant::Nxpk);

        let results = archive.decode_all();
        let first = results[0].as_ref().unwrap();
        let second = results[1].as_ref().unwrap();

        assert_eq!(first.data(), b"hello");
        assert_eq!(second.data(), b"hello world");
        assert_eq!(second.data().len(), 11);
        assert_eq!(second.path(), "00000001.dat");
        assert!(!second.is_named());
    }

    #[test]
    #[cfg(feature = "parallel")]
    fn test_two_entries_parallel_matches_sequential() {
        let archive = open(two_entry_container());

        let sequential = archive.decode_all();
        let parallel = archive.decode_parallel_collect();
        assert_eq!(parallel, sequential);
    }

    #[test]
    #[cfg(feature = "parallel")]
    fn test_corrupted_wrapped_key_fails_only_that_entry() {
        let key = *b"sixteen byte key";
        let mut payload = encode::rsa_entry(engine_record(), &key, b"secret asset");
        payload[3] ^= 0x01;

        let archive = open(
            NpkBuilder::new(Variant::Nxpk)
                .raw_entry(payload, 12, 0, 5)
                .stored(b"sibling")
                .build(),
        );

        let results = archive.decode_parallel_collect();
        let err = results[0].as_ref().unwrap_err();
        assert_eq!(err.index, 0);
        assert!(err.is_crypto());
        assert!(matches!(
            err.kind,
            EntryFailure::Crypto(CryptoError::KeyRecovery(_))
        ));
        assert_eq!(results[1].as_ref().unwrap().data(), b"sibling");
    }

    #[test]
    fn test_rsa_entry_key() {
        let key = *b"sixteen byte key";
        let payload = encode::rsa_entry(engine_record(), &key, b"secret asset");
        let archive = open(NpkBuilder::new(Variant::Nxpk).raw_entry(payload, 12, 0, 5).build());

        assert_eq!(archive.decode(0).unwrap().data(), b"secret asset");
    }

    #[test]
    fn test_rsa_container_key() {
        let key = *b"container key 16";
        let archive = open(
            NpkBuilder::new(Variant::Nxpk)
                .key_block(encode::wrap_key(engine_record(), &key))
                .raw_entry(encode::rsa_body(&key, &encode::zlib(b"one")), 3, 1, 6)
                .raw_entry(encode::rsa_body(&key, b"two"), 3, 0, 6)
                .build(),
        );

        assert!(archive.header().key_block.is_some());
        assert_eq!(archive.decode(0).unwrap().data(), b"one");
        assert_eq!(archive.decode(1).unwrap().data(), b"two");
    }

    #[test]
    fn test_empty_name_block_gives_synthetic_names() {
        let archive = open(
            NpkBuilder::new(Variant::Nxpk)
                .stored(b"{\"k\": 1}")
                .name_block(Vec::new())
                .build(),
        );

        assert!(archive.header().flags.has_name_block());
        assert!(archive.names().is_empty());
        assert_eq!(archive.decode(0).unwrap().path(), "00000000.json");
    }

    #[test]
    fn test_flat_names() {
        let archive = open(
            NpkBuilder::new(Variant::Nxpk)
                .stored(b"a")
                .zlib(b"bbbb")
                .flat_names(&["res\\a.txt", "res/sub/b.bin"])
                .build(),
        );

        let b = archive.decode(1).unwrap();
        assert_eq!(b.path(), "res/sub/b.bin");
        assert!(b.is_named());
        assert!(archive.name_warnings().is_empty());

        let report = archive.name_report();
        assert_eq!(report.names.len(), 2);
        assert_eq!(report.names[0].path, "res/a.txt");
    }

    #[test]
    fn test_skip_name_reconstruction() {
        let options = DecodeOptions {
            skip_name_reconstruction: true,
            ..DecodeOptions::default()
        };
        let bytes = NpkBuilder::new(Variant::Nxpk)
            .stored(b"a")
            .flat_names(&["named.txt"])
            .build();
        let archive = NpkArchive::from_bytes(bytes, options).unwrap();

        assert!(archive.names().is_empty());
        assert_eq!(archive.decode(0).unwrap().path(), "00000000.dat");
    }

    #[test]
    fn test_tree_names_extended_layout() {
        let root = u32::MAX;
        let archive = open(
            NpkBuilder::new(Variant::Nxpk)
                .extended()
                .stored(b"x")
                .stored(b"y")
                .tree_names(&[(root, root, "gui"), (0, 1, "y.bin"), (root, 0, "x.bin")])
                .build(),
        );

        assert_eq!(archive.header().layout, crate::header::IndexLayout::Extended);
        assert_eq!(archive.get(0).unwrap().name_hash >> 48, 0xABCD);
        assert_eq!(archive.decode(0).unwrap().path(), "x.bin");
        assert_eq!(archive.decode(1).unwrap().path(), "gui/y.bin");
    }

    #[test]
    fn test_expk_container() {
        let key = &engine_record().stream_key;
        let archive = open(
            NpkBuilder::new(Variant::Expk)
                .stored(b"plain but wrapped")
                .raw_entry(encode::keyed_stream(key, 1, b"double"), 6, 0, 1)
                .zlib(b"compressed and wrapped")
                .flat_names(&["a.txt", "b.txt", "c.txt"])
                .build(),
        );

        assert_eq!(archive.header().variant, Variant::Expk);
        let results = archive.decode_all();
        assert_eq!(results[0].as_ref().unwrap().data(), b"plain but wrapped");
        assert_eq!(results[1].as_ref().unwrap().data(), b"double");
        assert_eq!(results[2].as_ref().unwrap().data(), b"compressed and wrapped");
        assert_eq!(results[2].as_ref().unwrap().path(), "c.txt");
    }

    #[test]
    fn test_expk_requires_key_record() {
        let options = DecodeOptions {
            keys: Some(Arc::new(KeyDatabase::default())),
            ..DecodeOptions::default()
        };
        let bytes = NpkBuilder::new(Variant::Expk).stored(b"a").build();

        let err = NpkArchive::from_bytes(bytes, options).unwrap_err();
        assert!(matches!(err, Error::Crypto(CryptoError::NoKeyRecord("EXPK"))));
    }

    #[test]
    fn test_nxpk_without_key_record() {
        let options = DecodeOptions {
            keys: Some(Arc::new(KeyDatabase::default())),
            ..DecodeOptions::default()
        };
        let bytes = NpkBuilder::new(Variant::Nxpk)
            .stored(b"plain")
            .raw_entry(b"xx".to_vec(), 2, 0, 1)
            .build();
        let archive = NpkArchive::from_bytes(bytes, options).unwrap();

        assert_eq!(archive.decode(0).unwrap().data(), b"plain");
        let err = archive.decode_entry(archive.get(1).unwrap()).unwrap_err();
        assert_eq!(err.kind, EntryFailure::Crypto(CryptoError::NoKeyRecord("NXPK")));
    }

    #[test]
    fn test_unknown_title_hint() {
        let options = DecodeOptions {
            key_title_hint: Some("missing".into()),
            ..DecodeOptions::default()
        };
        let archive = NpkArchive::from_bytes(two_entry_container(), options.clone()).unwrap();

        assert_eq!(archive.decode(0).unwrap().data(), b"hello");
        let err = archive.decode_entry(archive.get(1).unwrap()).unwrap_err();
        assert_eq!(err.kind, EntryFailure::Crypto(CryptoError::UnknownTitle("missing".into())));

        let expk = NpkBuilder::new(Variant::Expk).stored(b"a").build();
        let err = NpkArchive::from_bytes(expk, options).unwrap_err();
        assert!(matches!(err, Error::Crypto(CryptoError::UnknownTitle(_))));
    }

    #[test]
    fn test_unknown_tags_fail_per_entry() {
        let archive = open(
            NpkBuilder::new(Variant::Nxpk)
                .raw_entry(b"abc".to_vec(), 3, 9, 0)
                .raw_entry(b"abc".to_vec(), 3, 0, 9)
                .stored(b"fine")
                .build(),
        );

        let results = archive.decode_all();
        assert_eq!(
            results[0].as_ref().unwrap_err().kind,
            EntryFailure::Codec(CodecError::UnknownMethod(9))
        );
        assert_eq!(
            results[1].as_ref().unwrap_err().kind,
            EntryFailure::Crypto(CryptoError::UnknownMethod(9))
        );
        assert!(results[2].is_ok());
    }

    #[test]
    fn test_declared_length_too_small() {
        let archive = open(
            NpkBuilder::new(Variant::Nxpk)
                .raw_entry(encode::zlib(&[7u8; 4096]), 100, 1, 0)
                .build(),
        );

        let err = archive.decode(0).unwrap_err();
        match err {
            Error::Entry(entry) => {
                assert_eq!(entry.index, 0);
                assert!(entry.is_codec());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_xor_methods() {
        let plain: Vec<u8> = (0..300u32).map(|i| (i % 251) as u8).collect();
        let descriptor = |encryption| EntryDescriptor {
            index: 0,
            name_hash: 0,
            offset: 0,
            stored_length: plain.len() as u64,
            original_length: plain.len() as u64,
            stored_crc: 0,
            crc: 0xCAFE_F00D,
            compression: 0,
            encryption,
        };

        let mut partial = plain.clone();
        crate::crypto::xor::apply_partial(&descriptor(3), &mut partial);
        let mut rolling = plain.clone();
        crate::crypto::xor::apply_rolling(&descriptor(4), &mut rolling);

        let archive = open(
            NpkBuilder::new(Variant::Nxpk)
                .raw_entry(partial, 300, 0, 3)
                .crc(0xCAFE_F00D)
                .raw_entry(rolling, 300, 0, 4)
                .crc(0xCAFE_F00D)
                .build(),
        );

        assert_eq!(archive.decode(0).unwrap().data(), &plain[..]);
        assert_eq!(archive.decode(1).unwrap().data(), &plain[..]);
    }

    #[test]
    fn test_rotor_script_unwrap() {
        let script = b"\xE3\x00\x00\x00\x00\x00\x00\x00compiled".repeat(8);
        let wrapped = encode::script(engine_record(), &script);
        let bytes = NpkBuilder::new(Variant::Nxpk)
            .raw_entry(wrapped.clone(), wrapped.len() as u32, 0, 0)
            .build();

        let entry = open(bytes.clone()).decode(0).unwrap();
        assert_eq!(entry.data(), &script[..]);
        assert_eq!(entry.kind(), FileKind::Pyc);
        assert_eq!(entry.path(), "00000000.pyc");

        let options = DecodeOptions {
            unwrap_scripts: false,
            ..DecodeOptions::default()
        };
        let entry = NpkArchive::from_bytes(bytes, options).unwrap().decode(0).unwrap();
        assert_eq!(entry.kind(), FileKind::RotorScript);
        assert_eq!(entry.data(), &wrapped[..]);
    }

    #[test]
    fn test_rotor_script_ignores_compression_tag() {
        let script = b"\xE3\x00\x00\x00\x00\x00\x00\x00compiled".repeat(8);
        let wrapped = encode::script(engine_record(), &script);
        let archive = open(
            NpkBuilder::new(Variant::Nxpk)
                .raw_entry(wrapped, script.len() as u32, 1, 0)
                .build(),
        );

        let entry = archive.decode(0).unwrap();
        assert_eq!(entry.data(), &script[..]);
        assert_eq!(entry.kind(), FileKind::Pyc);
    }

    #[test]
    fn test_rotor_entry() {
        let record = engine_record();
        let stored = encode::rotor(record.rotor_key().unwrap(), b"rotor protected");
        let archive = open(NpkBuilder::new(Variant::Nxpk).raw_entry(stored, 15, 0, 2).build());

        assert_eq!(archive.decode(0).unwrap().data(), b"rotor protected");
    }

    #[test]
    fn test_intermediate_payloads_are_returned_as_is() {
        let zst = encode::zstd(b"inner");
        let zip = encode::zip("inner.txt", b"inner");
        let archive = open(
            NpkBuilder::new(Variant::Nxpk)
                .stored(&zst)
                .stored(&zip)
                .build(),
        );

        assert_eq!(archive.decode(0).unwrap().kind(), FileKind::Zstd);
        assert_eq!(archive.decode(0).unwrap().path(), "00000000.zst");
        assert_eq!(archive.decode(1).unwrap().kind(), FileKind::Zip);
    }

    #[test]
    fn test_nested_zip_codec() {
        let zip = encode::zip("member.bin", b"zipped member");
        let archive = open(NpkBuilder::new(Variant::Nxpk).raw_entry(zip, 13, 4, 0).build());

        assert_eq!(archive.decode(0).unwrap().data(), b"zipped member");
    }

    #[test]
    fn test_bad_magic() {
        let mut bytes = two_entry_container();
        bytes[..4].copy_from_slice(b"ZZZZ");

        let err = NpkArchive::from_bytes(bytes, DecodeOptions::default()).unwrap_err();
        assert!(matches!(err, Error::Format(FormatError::BadMagic(_))));
    }

    #[test]
    fn test_truncated_index() {
        let mut bytes = two_entry_container();
        bytes.truncate(bytes.len() - 5);

        let err = NpkArchive::from_bytes(bytes, DecodeOptions::default()).unwrap_err();
        assert!(matches!(err, Error::Format(FormatError::IndexOutOfBounds { .. })));
    }

    #[test]
    fn test_entry_not_found() {
        let archive = open(two_entry_container());
        assert!(matches!(archive.decode(99), Err(Error::EntryNotFound(99))));
    }

    #[test]
    fn test_open_memory_mapped() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, &two_entry_container()).unwrap();

        let archive = NpkArchive::open(file.path(), DecodeOptions::default()).unwrap();
        assert_eq!(archive.decode(1).unwrap().data(), b"hello world");
    }
}
