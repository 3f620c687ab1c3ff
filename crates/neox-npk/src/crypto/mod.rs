//! Entry encryption.
//!
//! The [`Resolver`] owns the key material selected for one container and
//! turns stored payload bytes into plaintext according to each entry's
//! encryption tag. It is shared by all decode workers.

pub mod rotor;
pub mod rsa;
pub mod xor;

use std::borrow::Cow;
use std::sync::OnceLock;

use crate::error::CryptoError;
use crate::header::Variant;
use crate::index::EntryDescriptor;
use crate::keys::KeyRecord;

pub use self::rotor::Rotor;
pub use self::rsa::SessionKey;

/// Encryption method tag from an index record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum EncryptionMethod {
    /// Stored as-is.
    None = 0,
    /// Title key stream, perturbed by the entry index.
    KeyedStream = 1,
    /// Multi-rotor substitution.
    Rotor = 2,
    /// Window XOR keyed by checksum and length.
    PartialXor = 3,
    /// Window XOR with a rolling byte key.
    RollingXor = 4,
    /// AES-128-CBC with an RSA-wrapped key carried in the payload.
    RsaEntryKey = 5,
    /// AES-128-CBC with the RSA-wrapped key from the header key block.
    RsaContainerKey = 6,
}

impl TryFrom<u16> for EncryptionMethod {
    type Error = CryptoError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::None),
            1 => Ok(Self::KeyedStream),
            2 => Ok(Self::Rotor),
            3 => Ok(Self::PartialXor),
            4 => Ok(Self::RollingXor),
            5 => Ok(Self::RsaEntryKey),
            6 => Ok(Self::RsaContainerKey),
            other => Err(CryptoError::UnknownMethod(other)),
        }
    }
}

impl EncryptionMethod {
    pub const fn name(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::KeyedStream => "keyed-stream",
            Self::Rotor => "rotor",
            Self::PartialXor => "partial-xor",
            Self::RollingXor => "rolling-xor",
            Self::RsaEntryKey => "rsa-entry-key",
            Self::RsaContainerKey => "rsa-container-key",
        }
    }
}

/// Decrypts entries of one container.
///
/// Key selection may have failed (for instance an NXPK container from a
/// title with no record). That only matters to entries whose method needs
/// key material; the error is kept and reported per entry.
#[derive(Debug)]
pub struct Resolver {
    variant: Variant,
    record: Result<KeyRecord, CryptoError>,
    key_block: Option<Vec<u8>>,
    rotor: OnceLock<Result<Rotor, CryptoError>>,
    container_key: OnceLock<Result<SessionKey, CryptoError>>,
}

impl Resolver {
    pub fn new(
        variant: Variant,
        record: Result<KeyRecord, CryptoError>,
        key_block: Option<Vec<u8>>,
    ) -> Self {
        Self {
            variant,
            record,
            key_block,
            rotor: OnceLock::new(),
            container_key: OnceLock::new(),
        }
    }

    /// The selected key record.
    pub fn record(&self) -> Result<&KeyRecord, CryptoError> {
        self.record.as_ref().map_err(Clone::clone)
    }

    /// The rotor machine for this title, built on first use.
    pub fn rotor(&self) -> Result<&Rotor, CryptoError> {
        self.rotor
            .get_or_init(|| {
                let key = self.record()?.rotor_key()?;
                Ok(Rotor::new(key.as_bytes()))
            })
            .as_ref()
            .map_err(Clone::clone)
    }

    /// Session key from the header key block, recovered on first use.
    pub fn container_key(&self) -> Result<SessionKey, CryptoError> {
        self.container_key
            .get_or_init(|| {
                let block = self.key_block.as_deref().ok_or(CryptoError::MissingKeyBlock)?;
                rsa::recover_session_key(block, self.record()?.rsa()?)
            })
            .clone()
    }

    /// Strip the container stream layer from the index table.
    pub fn unwrap_index<'a>(&self, table: &'a [u8]) -> Result<Cow<'a, [u8]>, CryptoError> {
        if !self.variant.is_stream_wrapped() {
            return Ok(Cow::Borrowed(table));
        }

        let mut plain = table.to_vec();
        xor::apply_stream(self.record()?.stream_key()?, xor::INDEX_TABLE_STREAM, &mut plain);
        Ok(Cow::Owned(plain))
    }

    /// Decrypt one entry's stored bytes.
    pub fn decrypt(&self, entry: &EntryDescriptor, stored: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let method = EncryptionMethod::try_from(entry.encryption)?;

        let mut data = stored.to_vec();
        if self.variant.is_stream_wrapped() {
            let key = self.record()?.stream_key()?;
            xor::apply_stream(key, xor::container_stream(entry.index), &mut data);
        }

        match method {
            EncryptionMethod::None => {}
            EncryptionMethod::KeyedStream => {
                let key = self.record()?.stream_key()?;
                xor::apply_stream(key, xor::entry_stream(entry.index), &mut data);
            }
            EncryptionMethod::Rotor => self.rotor()?.decrypt_in_place(&mut data),
            EncryptionMethod::PartialXor => xor::apply_partial(entry, &mut data),
            EncryptionMethod::RollingXor => xor::apply_rolling(entry, &mut data),
            EncryptionMethod::RsaEntryKey => {
                let (wrapped, body) = rsa::split_wrapped(&data)?;
                let key = rsa::recover_session_key(wrapped, self.record()?.rsa()?)?;
                data = rsa::decrypt_body(&key, body)?;
            }
            EncryptionMethod::RsaContainerKey => {
                let key = self.container_key()?;
                data = rsa::decrypt_body(&key, &data)?;
            }
        }

        Ok(data)
    }
}
