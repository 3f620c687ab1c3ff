//! Error types for the NPK crate.
//!
//! Errors are split by blast radius: [`FormatError`] aborts the whole
//! container, while [`CryptoError`] and [`CodecError`] only fail the entry
//! they occurred in and are reported through [`EntryError`].

use thiserror::Error;

/// Structural problems with the container itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    /// The first four bytes are not a recognised container signature.
    #[error("unrecognised container signature {0:02x?}")]
    BadMagic([u8; 4]),

    /// A read ran past the end of the available bytes.
    #[error("truncated {what}: needed {needed} bytes but only {available} available")]
    Truncated {
        what: &'static str,
        needed: usize,
        available: usize,
    },

    /// The index table does not fit inside the container.
    #[error("index table at {offset:#x} ({size} bytes) exceeds container size {container_size}")]
    IndexOutOfBounds {
        offset: u64,
        size: u64,
        container_size: u64,
    },

    /// An entry's payload range does not fit inside the container.
    #[error("entry {index} payload {offset:#x}+{length} exceeds container size {container_size}")]
    EntryOutOfBounds {
        index: u32,
        offset: u64,
        length: u64,
        container_size: u64,
    },

    /// The header key block is malformed.
    #[error("container key block is malformed: {0}")]
    KeyBlock(String),
}

/// Failures while resolving or applying entry encryption.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// The encryption tag is not one of the known methods.
    #[error("unknown encryption method {0}")]
    UnknownMethod(u16),

    /// No key record could be selected for this container.
    #[error("no key record available for {0} containers")]
    NoKeyRecord(&'static str),

    /// The caller asked for a title that is not in the database.
    #[error("unknown key title '{0}'")]
    UnknownTitle(String),

    /// The selected key record lacks the material this method needs.
    #[error("key record '{title}' has no {material}")]
    MissingKeyMaterial {
        title: String,
        material: &'static str,
    },

    /// The container does not carry the header key block this entry needs.
    #[error("container has no key block")]
    MissingKeyBlock,

    /// The payload is too short to hold the method's framing.
    #[error("encrypted payload truncated: {0}")]
    Truncated(&'static str),

    /// The wrapped key could not be recovered from the public parameters.
    #[error("wrapped key recovery failed: {0}")]
    KeyRecovery(String),

    /// Block cipher decryption or padding check failed.
    #[error("decryption failed: {0}")]
    Decryption(String),
}

/// Failures while decompressing or post-processing a payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The compression tag is not one of the known methods.
    #[error("unknown compression method {0}")]
    UnknownMethod(u16),

    /// The codec rejected the input.
    #[error("{codec} decode failed: {message}")]
    Decode {
        codec: &'static str,
        message: String,
    },

    /// The decoded size does not match the declared original length.
    #[error("decoded length mismatch: expected {expected}, got {actual}")]
    LengthMismatch { expected: u64, actual: u64 },

    /// A nested ZIP payload has no file members.
    #[error("nested archive contains no file members")]
    EmptyArchive,

    /// A compiled-script payload could not be unwrapped.
    #[error("script unwrap failed: {0}")]
    Script(String),
}

/// What went wrong with a single entry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EntryFailure {
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// A per-entry failure, tagged with the entry's index.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("entry {index}: {kind}")]
pub struct EntryError {
    /// Index of the failed entry.
    pub index: u32,
    /// The underlying failure.
    #[source]
    pub kind: EntryFailure,
}

impl EntryError {
    pub(crate) fn new(index: u32, kind: impl Into<EntryFailure>) -> Self {
        Self {
            index,
            kind: kind.into(),
        }
    }

    /// Whether this entry failed in the encryption layer.
    pub fn is_crypto(&self) -> bool {
        matches!(self.kind, EntryFailure::Crypto(_))
    }

    /// Whether this entry failed in the decompression layer.
    pub fn is_codec(&self) -> bool {
        matches!(self.kind, EntryFailure::Codec(_))
    }
}

/// Errors loading key records from external configuration.
#[derive(Debug, Error)]
pub enum KeyDbError {
    /// The JSON document is invalid.
    #[error("invalid key database JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A record could not be read from disk.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A record carries an unusable value.
    #[error("invalid key record '{title}': {reason}")]
    InvalidRecord { title: String, reason: String },
}

/// Errors that abort work on a whole container.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed or unsupported container structure.
    #[error("format error: {0}")]
    Format(#[from] FormatError),

    /// Container-level decryption failed (EXPK index table).
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// A single entry failed to decode.
    #[error(transparent)]
    Entry(#[from] EntryError),

    /// Key database could not be loaded.
    #[error(transparent)]
    KeyDb(#[from] KeyDbError),

    /// Entry index not present in the container.
    #[error("entry not found: {0}")]
    EntryNotFound(u32),
}

/// Result type for NPK operations.
pub type Result<T> = std::result::Result<T, Error>;
