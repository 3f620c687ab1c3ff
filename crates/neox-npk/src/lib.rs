//! NPK container reader for NeoX engine game assets.
//!
//! NPK is the asset container used by the NeoX engine family. A container
//! holds an index of entries, each stored under one of several encryption
//! and compression schemes, plus an optional trailing block that names the
//! entries. This crate handles:
//!
//! - `NXPK` and `EXPK` signatures, with 28- and 40-byte index records
//! - Keyed XOR streams, rotor ciphers and RSA-wrapped AES-128-CBC entries
//! - Zlib, LZ4 (block and frame), Zstandard and nested ZIP payloads
//! - Flat and tree-shaped name blocks
//! - Rotor-obscured compiled scripts
//!
//! Entries that fail to decrypt or decompress are reported individually;
//! only a structurally broken container is fatal.
//!
//! # Example
//!
//! ```no_run
//! use neox_npk::{DecodeOptions, NpkArchive};
//!
//! let archive = NpkArchive::open("script.npk", DecodeOptions::default())?;
//! println!("{} entries", archive.entry_count());
//!
//! let entry = archive.decode(0)?;
//! println!("{}: {} bytes ({})", entry.path(), entry.data().len(), entry.kind());
//! # Ok::<(), neox_npk::Error>(())
//! ```

mod archive;
pub mod crypto;
pub mod decompress;
pub mod detect;
mod entry;
mod error;
pub mod header;
pub mod index;
pub mod keys;
pub mod names;
mod reader;
pub mod script;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use archive::{DecodeOptions, NpkArchive};
pub use crypto::EncryptionMethod;
pub use decompress::CompressionMethod;
pub use detect::FileKind;
pub use entry::DecodedEntry;
pub use error::{
    CodecError, CryptoError, EntryError, EntryFailure, Error, FormatError, KeyDbError, Result,
};
pub use header::{NpkHeader, Variant};
pub use index::EntryDescriptor;
pub use keys::{KeyDatabase, KeyRecord};
pub use names::{NameMap, NameReport, NameWarning};
