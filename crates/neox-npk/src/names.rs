//! Name block parsing and path reconstruction.
//!
//! Containers flagged with a name block carry a trailer after the index
//! table that maps entries back to their original paths. Two layouts are
//! understood:
//!
//! - `NXFN`: NUL-separated full paths, one per entry in index order.
//! - `NXFX`: a tree of `(parent, entry, name)` records; directory nodes have
//!   no entry and paths are assembled by walking parents up to the root.
//!
//! Reconstruction is best-effort. Anything unexpected becomes a
//! [`NameWarning`] and the affected entries keep their synthetic names.

use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;

use crate::error::FormatError;
use crate::reader::ByteReader;

const FLAT_MAGIC: [u8; 4] = *b"NXFN";
const TREE_MAGIC: [u8; 4] = *b"NXFX";
const BLOCK_HEADER_SIZE: usize = 16;
const NO_LINK: u32 = u32::MAX;

/// Name block header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BlockHeader {
    magic: [u8; 4],
    version: u32,
    record_count: u32,
}

/// Non-fatal problems found while reconstructing names.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NameWarning {
    #[error("name block is malformed: {0}")]
    Malformed(String),

    #[error("name block lists {names} names for {entries} entries")]
    CountMismatch { names: usize, entries: u32 },

    #[error("name record {record} is not valid UTF-8")]
    InvalidUtf8 { record: u32 },

    #[error("name record {record} has a cyclic parent chain")]
    CyclicParent { record: u32 },

    #[error("name record {record} references missing parent {parent}")]
    DanglingParent { record: u32, parent: u32 },

    #[error("name record {record} refers to entry {entry}, which does not exist")]
    EntryOutOfRange { record: u32, entry: u32 },

    #[error("entry {entry} is named more than once; keeping the first path")]
    DuplicateEntry { entry: u32 },

    #[error("rejected unsafe path {path:?} for entry {entry}")]
    UnsafePath { entry: u32, path: String },
}

/// Name block layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NameBlockKind {
    Flat,
    Tree,
}

/// Entry index to relative path, using `/` separators.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameMap {
    paths: BTreeMap<u32, String>,
    kind: Option<NameBlockKind>,
}

impl NameMap {
    /// Path for an entry, if one was reconstructed.
    #[inline]
    pub fn get(&self, index: u32) -> Option<&str> {
        self.paths.get(&index).map(String::as_str)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Layout of the block the names came from.
    pub fn kind(&self) -> Option<NameBlockKind> {
        self.kind
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &str)> {
        self.paths.iter().map(|(&i, p)| (i, p.as_str()))
    }

    /// Record a path, keeping the first assignment for an entry.
    fn insert(&mut self, entry: u32, path: String, warnings: &mut Vec<NameWarning>) {
        if self.paths.contains_key(&entry) {
            warnings.push(NameWarning::DuplicateEntry { entry });
            return;
        }
        self.paths.insert(entry, path);
    }
}

/// Serialisable view of a reconstruction, for debugging output.
#[derive(Debug, Clone, Serialize)]
pub struct NameReport {
    pub container: String,
    pub entry_count: u32,
    pub layout: Option<NameBlockKind>,
    pub names: Vec<NamedEntry>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NamedEntry {
    pub index: u32,
    pub path: String,
}

impl NameReport {
    pub fn new(
        container: impl Into<String>,
        entry_count: u32,
        names: &NameMap,
        warnings: &[NameWarning],
    ) -> Self {
        Self {
            container: container.into(),
            entry_count,
            layout: names.kind(),
            names: names
                .iter()
                .map(|(index, path)| NamedEntry {
                    index,
                    path: path.to_string(),
                })
                .collect(),
            warnings: warnings.iter().map(ToString::to_string).collect(),
        }
    }
}

/// Result of parsing a name block.
#[derive(Debug, Clone, Default)]
pub struct Reconstruction {
    pub names: NameMap,
    pub warnings: Vec<NameWarning>,
}

/// Reconstruct entry paths from the trailing name block.
///
/// `trailer` is everything after the index table. An empty or malformed
/// block yields an empty map.
pub fn reconstruct(trailer: &[u8], entry_count: u32) -> Reconstruction {
    if trailer.is_empty() {
        return Reconstruction::default();
    }

    let mut reader = ByteReader::new(trailer, "name block header");
    let header = match read_header(&mut reader) {
        Ok(header) => header,
        Err(warning) => {
            return Reconstruction {
                names: NameMap::default(),
                warnings: vec![warning],
            }
        }
    };

    log::debug!(
        "name block {:?} v{} with {} records",
        String::from_utf8_lossy(&header.magic),
        header.version,
        header.record_count
    );

    let body = &trailer[BLOCK_HEADER_SIZE..];
    let mut warnings = Vec::new();
    let names = if header.magic == TREE_MAGIC {
        match TreeBlock::parse(body, header.record_count) {
            Ok(tree) => tree.resolve(entry_count, &mut warnings),
            Err(warning) => {
                warnings.push(warning);
                NameMap::default()
            }
        }
    } else {
        if header.magic != FLAT_MAGIC {
            log::debug!("unknown name block magic, reading as a flat list");
        }
        parse_flat(body, entry_count, &mut warnings)
    };

    Reconstruction { names, warnings }
}

fn read_header(reader: &mut ByteReader<'_>) -> Result<BlockHeader, NameWarning> {
    let malformed = |e: FormatError| NameWarning::Malformed(e.to_string());
    let magic = reader.read_array::<4>().map_err(malformed)?;
    let version = reader.read_u32().map_err(malformed)?;
    let record_count = reader.read_u32().map_err(malformed)?;
    let _reserved = reader.read_u32().map_err(malformed)?;
    Ok(BlockHeader {
        magic,
        version,
        record_count,
    })
}

fn parse_flat(body: &[u8], entry_count: u32, warnings: &mut Vec<NameWarning>) -> NameMap {
    let mut names = NameMap {
        kind: Some(NameBlockKind::Flat),
        ..NameMap::default()
    };

    let mut count = 0usize;
    for (entry, raw) in body.split(|&b| b == 0).filter(|s| !s.is_empty()).enumerate() {
        count += 1;
        let Ok(entry) = u32::try_from(entry) else {
            continue;
        };
        if entry >= entry_count {
            continue;
        }

        let Ok(raw) = std::str::from_utf8(raw) else {
            warnings.push(NameWarning::InvalidUtf8 { record: entry });
            continue;
        };

        match sanitize_path(raw) {
            Some(path) => names.insert(entry, path, warnings),
            None => warnings.push(NameWarning::UnsafePath {
                entry,
                path: raw.to_string(),
            }),
        }
    }

    if count != entry_count as usize {
        warnings.push(NameWarning::CountMismatch {
            names: count,
            entries: entry_count,
        });
    }

    names
}

#[derive(Debug)]
struct TreeRecord<'a> {
    parent: u32,
    entry: u32,
    name: &'a [u8],
}

/// Memoised state of a node's full path.
#[derive(Debug, Clone)]
enum Resolved {
    Pending,
    Path(String),
    Failed,
}

struct TreeBlock<'a> {
    records: Vec<TreeRecord<'a>>,
    resolved: Vec<Resolved>,
}

impl<'a> TreeBlock<'a> {
    fn parse(body: &'a [u8], record_count: u32) -> Result<Self, NameWarning> {
        let mut reader = ByteReader::new(body, "name tree");
        // Every record takes at least ten bytes.
        let mut records = Vec::with_capacity((record_count as usize).min(body.len() / 10));

        for _ in 0..record_count {
            let record = Self::read_record(&mut reader)
                .map_err(|e| NameWarning::Malformed(e.to_string()))?;
            records.push(record);
        }

        let resolved = vec![Resolved::Pending; records.len()];
        Ok(Self { records, resolved })
    }

    fn read_record(reader: &mut ByteReader<'a>) -> Result<TreeRecord<'a>, FormatError> {
        let parent = reader.read_u32()?;
        let entry = reader.read_u32()?;
        let len = reader.read_u16()? as usize;
        let name = reader.read_bytes(len)?;
        Ok(TreeRecord { parent, entry, name })
    }

    fn resolve(mut self, entry_count: u32, warnings: &mut Vec<NameWarning>) -> NameMap {
        let mut names = NameMap {
            kind: Some(NameBlockKind::Tree),
            ..NameMap::default()
        };

        for record in 0..self.records.len() as u32 {
            let entry = self.records[record as usize].entry;
            if entry == NO_LINK {
                continue;
            }
            if entry >= entry_count {
                warnings.push(NameWarning::EntryOutOfRange { record, entry });
                continue;
            }

            let Some(path) = self.path_of(record, warnings) else {
                continue;
            };
            match sanitize_path(&path) {
                Some(clean) => names.insert(entry, clean, warnings),
                None => warnings.push(NameWarning::UnsafePath { entry, path }),
            }
        }

        names
    }

    /// Full path of a node, walking parents iteratively and memoising every
    /// node on the way.
    fn path_of(&mut self, record: u32, warnings: &mut Vec<NameWarning>) -> Option<String> {
        let mut chain = Vec::new();
        let mut current = record;

        let prefix = loop {
            if current == NO_LINK {
                break String::new();
            }

            let Some(parent) = self.records.get(current as usize).map(|r| r.parent) else {
                warnings.push(NameWarning::DanglingParent {
                    record,
                    parent: current,
                });
                self.fail(&chain);
                return None;
            };

            match &self.resolved[current as usize] {
                Resolved::Path(path) => break path.clone(),
                Resolved::Failed => {
                    self.fail(&chain);
                    return None;
                }
                Resolved::Pending => {}
            }

            if chain.len() > self.records.len() {
                warnings.push(NameWarning::CyclicParent { record });
                self.fail(&chain);
                return None;
            }

            chain.push(current);
            current = parent;
        };

        let mut path = prefix;
        for &node in chain.iter().rev() {
            let Ok(name) = std::str::from_utf8(self.records[node as usize].name) else {
                warnings.push(NameWarning::InvalidUtf8 { record: node });
                self.fail(&chain);
                return None;
            };
            if !path.is_empty() {
                path.push('/');
            }
            path.push_str(name);
            self.resolved[node as usize] = Resolved::Path(path.clone());
        }

        Some(path)
    }

    fn fail(&mut self, chain: &[u32]) {
        for &node in chain {
            self.resolved[node as usize] = Resolved::Failed;
        }
    }
}

/// Normalise separators and reject paths that could escape the output root.
///
/// Returns `None` for absolute paths, drive prefixes, `.`/`..` components
/// and empty results. Repeated separators collapse.
pub fn sanitize_path(raw: &str) -> Option<String> {
    let normalized = raw.replace('\\', "/");
    if normalized.starts_with('/') {
        return None;
    }

    let mut parts = Vec::new();
    for component in normalized.split('/') {
        match component {
            "" => continue,
            "." | ".." => return None,
            c if c.contains(':') || c.contains('\0') => return None,
            c => parts.push(c),
        }
    }

    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

/// Build name blocks for tests.
#[cfg(any(test, feature = "test-support"))]
pub(crate) mod build {
    use super::*;

    fn header(magic: [u8; 4], count: u32) -> Vec<u8> {
        let mut out = magic.to_vec();
        out.extend_from_slice(&1u32.to_le_bytes());
        out.extend_from_slice(&count.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out
    }

    pub fn flat(paths: &[&str]) -> Vec<u8> {
        let mut out = header(FLAT_MAGIC, paths.len() as u32);
        for path in paths {
            out.extend_from_slice(path.as_bytes());
            out.push(0);
        }
        out
    }

    /// Records of `(parent, entry, name)`.
    pub fn tree(records: &[(u32, u32, &str)]) -> Vec<u8> {
        let mut out = header(TREE_MAGIC, records.len() as u32);
        for (parent, entry, name) in records {
            out.extend_from_slice(&parent.to_le_bytes());
            out.extend_from_slice(&entry.to_le_bytes());
            out.extend_from_slice(&(name.len() as u16).to_le_bytes());
            out.extend_from_slice(name.as_bytes());
        }
        out
    }
}
