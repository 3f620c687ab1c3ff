//! Decoded container entries.

use std::path::{Path, PathBuf};

use crate::detect::FileKind;

/// A fully decoded entry: plaintext bytes plus the path to write them to.
///
/// Produced once per entry by [`NpkArchive::decode`](crate::NpkArchive::decode)
/// and owned by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedEntry {
    /// Position in the index table.
    index: u32,
    /// Relative path with `/` separators.
    path: String,
    /// Sniffed payload kind.
    kind: FileKind,
    /// Decoded payload.
    data: Vec<u8>,
    /// Whether `path` came from the name block.
    named: bool,
}

impl DecodedEntry {
    pub(crate) fn new(
        index: u32,
        path: String,
        kind: FileKind,
        data: Vec<u8>,
        named: bool,
    ) -> Self {
        Self {
            index,
            path,
            kind,
            data,
            named,
        }
    }

    #[inline]
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Relative path, reconstructed or synthetic.
    #[inline]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[inline]
    pub fn kind(&self) -> FileKind {
        self.kind
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Take ownership of the payload.
    #[inline]
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Whether the path was reconstructed from the name block.
    #[inline]
    pub fn is_named(&self) -> bool {
        self.named
    }

    /// Relative output path using the platform's separator.
    pub fn output_path(&self) -> PathBuf {
        self.path.split('/').collect()
    }

    /// The file extension of the path, if any.
    pub fn extension(&self) -> Option<&str> {
        Path::new(&self.path).extension().and_then(|ext| ext.to_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_path() {
        let entry = DecodedEntry::new(0, "res/ui/main.json".into(), FileKind::Json, vec![], true);
        assert_eq!(entry.output_path(), PathBuf::from("res").join("ui").join("main.json"));
        assert_eq!(entry.extension(), Some("json"));
        assert!(entry.is_named());
    }

    #[test]
    fn test_synthetic_entry() {
        let entry = DecodedEntry::new(7, "00000007.dat".into(), FileKind::Data, vec![1, 2], false);
        assert_eq!(entry.index(), 7);
        assert_eq!(entry.extension(), Some("dat"));
        assert_eq!(entry.into_data(), vec![1, 2]);
    }
}
