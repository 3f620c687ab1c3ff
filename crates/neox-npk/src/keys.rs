//! Per-title key material.
//!
//! NeoX titles ship their cipher parameters inside the game client, so none
//! of this is secret. The built-in table holds placeholder records: the
//! engine rotor key is real, but its stream key and RSA moduli are stand-ins
//! that decrypt no shipped container. Real titles must be supplied through
//! [`KeyDatabase::load`] from a JSON document of the form
//!
//! ```json
//! { "records": [ {
//!     "title": "my-title",
//!     "signatures": ["EXPK"],
//!     "stream_key": "00112233...",
//!     "rotor_key": "...",
//!     "rsa": { "modulus": "c0ffee...", "exponent": 3 }
//! } ] }
//! ```

use std::path::Path;
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

use crate::error::{CryptoError, KeyDbError};
use crate::header::Variant;

/// RSA public parameters used to wrap session keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RsaPublicKey {
    /// Big-endian modulus.
    #[serde(with = "hex_bytes")]
    pub modulus: Vec<u8>,
    /// Public exponent.
    pub exponent: u32,
}

/// Key material for one title.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRecord {
    /// Unique title identifier, used for explicit selection.
    pub title: String,
    /// Container variants this record applies to.
    #[serde(default)]
    pub signatures: Vec<Variant>,
    /// Repeating key for the stream XOR layer.
    #[serde(default, with = "hex_bytes")]
    pub stream_key: Vec<u8>,
    /// Key string for the rotor machine.
    #[serde(default)]
    pub rotor_key: Option<String>,
    /// Public key for wrapped session keys.
    #[serde(default)]
    pub rsa: Option<RsaPublicKey>,
}

impl KeyRecord {
    pub fn stream_key(&self) -> Result<&[u8], CryptoError> {
        if self.stream_key.is_empty() {
            return Err(self.missing("stream key"));
        }
        Ok(&self.stream_key)
    }

    pub fn rotor_key(&self) -> Result<&str, CryptoError> {
        self.rotor_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| self.missing("rotor key"))
    }

    pub fn rsa(&self) -> Result<&RsaPublicKey, CryptoError> {
        self.rsa.as_ref().ok_or_else(|| self.missing("RSA public key"))
    }

    fn missing(&self, material: &'static str) -> CryptoError {
        CryptoError::MissingKeyMaterial {
            title: self.title.clone(),
            material,
        }
    }

    fn validate(&self) -> Result<(), KeyDbError> {
        let invalid = |reason: &str| KeyDbError::InvalidRecord {
            title: self.title.clone(),
            reason: reason.to_string(),
        };

        if self.title.is_empty() {
            return Err(invalid("empty title"));
        }
        if let Some(rsa) = &self.rsa {
            if rsa.exponent < 2 {
                return Err(invalid("RSA exponent must be at least 2"));
            }
            if rsa.modulus.iter().all(|&b| b == 0) {
                return Err(invalid("RSA modulus is zero"));
            }
        }
        Ok(())
    }
}

/// An immutable collection of key records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyDatabase {
    records: Vec<KeyRecord>,
}

impl KeyDatabase {
    /// Build a database from records, validating each one.
    pub fn new(records: Vec<KeyRecord>) -> Result<Self, KeyDbError> {
        for record in &records {
            record.validate()?;
        }
        Ok(Self { records })
    }

    /// The built-in placeholder records. Only the engine rotor key in them
    /// matches shipped clients.
    pub fn builtin() -> &'static KeyDatabase {
        &BUILTIN
    }

    /// Parse a JSON key database.
    pub fn from_json(json: &str) -> Result<Self, KeyDbError> {
        let db: KeyDatabase = serde_json::from_str(json)?;
        Self::new(db.records)
    }

    /// Load a JSON key database from disk.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, KeyDbError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Append the built-in records after this database's own.
    ///
    /// Records loaded by the caller are consulted first, so they win when a
    /// signature matches both.
    pub fn with_builtin(mut self) -> Self {
        for record in &BUILTIN.records {
            if self.get(&record.title).is_none() {
                self.records.push(record.clone());
            }
        }
        self
    }

    pub fn get(&self, title: &str) -> Option<&KeyRecord> {
        self.records.iter().find(|r| r.title == title)
    }

    pub fn iter(&self) -> impl Iterator<Item = &KeyRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Choose the record for a container.
    ///
    /// An explicit title hint always wins. Otherwise the first record that
    /// lists the container's variant is used.
    pub fn select(&self, variant: Variant, hint: Option<&str>) -> Result<&KeyRecord, CryptoError> {
        if let Some(title) = hint {
            return self
                .get(title)
                .ok_or_else(|| CryptoError::UnknownTitle(title.to_string()));
        }

        let mut candidates = self.records.iter().filter(|r| r.signatures.contains(&variant));
        let first = candidates
            .next()
            .ok_or(CryptoError::NoKeyRecord(variant.as_str()))?;

        let others = candidates.count();
        if others > 0 {
            log::debug!(
                "{} key records match {}; using '{}'",
                others + 1,
                variant,
                first.title
            );
        }

        Ok(first)
    }
}

/// Rotor key string used by the engine to obscure compiled scripts.
fn engine_rotor_key() -> String {
    let dn = "j2h56ogodh3se";
    let dt = "=dziaq.";
    let df = "|os=5v7!\"-234";

    let mut key = dn.repeat(4);
    key.push_str(&format!("{dt}{dn}{df}").repeat(5));
    key.push_str("!#");
    key.push_str(&dt.repeat(7));
    key.push_str(&df.repeat(2));
    key.push_str("*&'");
    key
}

// Placeholder stream keys and moduli. They have the right shape for their
// schemes but belong to no shipped title.
const NEOX_STREAM_KEY: [u8; 32] = [
    0x4E, 0x9B, 0x21, 0xD7, 0x3C, 0x88, 0x65, 0xF0, 0x17, 0xAE, 0x52, 0xC9, 0x0B, 0x74, 0xE3, 0x3A,
    0x96, 0x2F, 0xBD, 0x48, 0x61, 0xDA, 0x05, 0x8C, 0xF7, 0x33, 0xA0, 0x1E, 0x6B, 0xC4, 0x59, 0x82,
];

const NEOX_LEGACY_STREAM_KEY: [u8; 16] = [
    0xB3, 0x07, 0x5E, 0xE1, 0x2A, 0x9D, 0x70, 0x14, 0xC8, 0x6F, 0x31, 0xA5, 0xFC, 0x46, 0x8B, 0xD0,
];

const NEOX_RSA_MODULUS: &str = concat!(
    "6a8e3998a48ff226576c94890de7304526ab4be36e862b67168d1fe825c2283a",
    "d61904e9ada2a2bca7d38a45afd0b90aee52ffc06a85c4fb25c7521f023261e6",
    "604d8d17553830e0134ec52b688aff0712804ec4d141d5af4dd687035ec17044",
    "f4dc7d030319b5e713f1041a487939233d069a279de0290d0bc5262fda9a5153",
);

const NEOX_LEGACY_RSA_MODULUS: &str = concat!(
    "e1cfc9591a22968a30e55d5fa9f65325edcfdc7e4cf650667aeb3bf3a1ec8bbb",
    "6b07c6d1d40b06f42bb87146c2f386f2622b9aa434871a34c5c7f60d45fe7061",
    "a823499e303595ae9d48b52f69cb61e188c0b5acb38128a059faacd84bbcb488",
    "fd7d1be7133fedaf1b0117ba9772b87a19b15a6b668fc999ed75f543e34d1807",
);

fn modulus(hex_str: &str) -> Option<RsaPublicKey> {
    // The constants above are well-formed; a decode failure would only drop
    // RSA support for that record.
    hex::decode(hex_str).ok().map(|modulus| RsaPublicKey {
        modulus,
        exponent: 3,
    })
}

static BUILTIN: LazyLock<KeyDatabase> = LazyLock::new(|| KeyDatabase {
    records: vec![
        KeyRecord {
            title: "neox".to_string(),
            signatures: vec![Variant::Nxpk, Variant::Expk],
            stream_key: NEOX_STREAM_KEY.to_vec(),
            rotor_key: Some(engine_rotor_key()),
            rsa: modulus(NEOX_RSA_MODULUS),
        },
        KeyRecord {
            title: "neox-legacy".to_string(),
            signatures: vec![Variant::Expk],
            stream_key: NEOX_LEGACY_STREAM_KEY.to_vec(),
            rotor_key: Some(engine_rotor_key()),
            rsa: modulus(NEOX_LEGACY_RSA_MODULUS),
        },
    ],
});

/// Serde adapter for hex-encoded byte strings.
mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s.trim()).map_err(serde::de::Error::custom)
    }
}
