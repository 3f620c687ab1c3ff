//! Parallel extraction of a container to disk.
//!
//! Entries are decoded on a dedicated rayon pool. Each worker decodes,
//! writes and drops one entry at a time, so memory in flight is bounded by
//! the pool size.

use std::fs;
use std::io::Cursor;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use neox_npk::{DecodeOptions, DecodedEntry, EntryError, FileKind, NpkArchive};
use parking_lot::Mutex;
use serde::Serialize;

use crate::error::Result;

/// File name of the name reconstruction report.
pub const NAME_REPORT_FILE: &str = "names.json";

/// Options for an extraction run.
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// Root directory entries are written under.
    pub output_dir: PathBuf,
    /// Options passed to the container reader.
    pub decode: DecodeOptions,
    /// Remove `.zst` and `.zip` files once they have been expanded.
    pub delete_intermediate: bool,
    /// Worker threads; 0 uses every available core.
    pub threads: usize,
    /// Write `names.json` to the output root.
    pub write_name_report: bool,
}

impl ExtractOptions {
    pub fn new<P: Into<PathBuf>>(output_dir: P) -> Self {
        Self {
            output_dir: output_dir.into(),
            decode: DecodeOptions::default(),
            delete_intermediate: false,
            threads: 0,
            write_name_report: false,
        }
    }
}

/// Where in the pipeline an entry failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureStage {
    /// Decryption or decompression.
    Decode,
    /// Writing the decoded payload.
    Write,
    /// Expanding a Zstandard or ZIP intermediate.
    Expand,
}

impl std::fmt::Display for FailureStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Decode => "decode",
            Self::Write => "write",
            Self::Expand => "expand",
        })
    }
}

/// A failed entry.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractFailure {
    pub index: u32,
    /// Relative path, when the entry got far enough to have one.
    pub path: Option<String>,
    pub stage: FailureStage,
    pub message: String,
}

/// A written entry.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractedEntry {
    pub index: u32,
    /// Relative path under the output root.
    pub path: String,
    pub kind: FileKind,
    pub size: u64,
}

/// Outcome of an extraction run, sorted by entry index.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractReport {
    /// File name of the container.
    pub archive: String,
    /// Number of entries in the index.
    pub total: usize,
    pub written: Vec<ExtractedEntry>,
    pub failures: Vec<ExtractFailure>,
    /// Non-fatal problems found in the name block.
    pub name_warnings: usize,
}

impl ExtractReport {
    /// Check if every entry was written and expanded.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.written.len() == self.total
    }
}

#[derive(Debug)]
struct Outcome {
    written: Option<ExtractedEntry>,
    failure: Option<ExtractFailure>,
}

impl Outcome {
    fn failed(index: u32, path: Option<String>, stage: FailureStage, message: String) -> Self {
        Self {
            written: None,
            failure: Some(ExtractFailure {
                index,
                path,
                stage,
                message,
            }),
        }
    }
}

/// Writes the entries of a container to disk.
#[derive(Debug, Clone)]
pub struct Extractor {
    options: ExtractOptions,
}

impl Extractor {
    pub fn new(options: ExtractOptions) -> Self {
        Self { options }
    }

    #[inline]
    pub fn options(&self) -> &ExtractOptions {
        &self.options
    }

    /// Open a container and extract every entry.
    pub fn extract<P: AsRef<Path>>(&self, path: P) -> Result<ExtractReport> {
        let archive = NpkArchive::open(path, self.options.decode.clone())?;
        self.extract_archive(&archive)
    }

    /// Extract every entry of an already opened container.
    pub fn extract_archive(&self, archive: &NpkArchive) -> Result<ExtractReport> {
        let output = &self.options.output_dir;
        fs::create_dir_all(output)?;

        let threads = self.thread_count();
        log::info!(
            "{}: extracting {} entries to {} on {threads} threads",
            archive.name(),
            archive.entry_count(),
            output.display()
        );

        let pool = rayon::ThreadPoolBuilder::new().num_threads(threads).build()?;
        let outcomes = Mutex::new(Vec::with_capacity(archive.entry_count()));
        pool.install(|| {
            archive.decode_parallel(|result| {
                let outcome = self.handle(result);
                outcomes.lock().push(outcome);
            })
        });

        let mut written = Vec::new();
        let mut failures = Vec::new();
        for outcome in outcomes.into_inner() {
            written.extend(outcome.written);
            failures.extend(outcome.failure);
        }
        written.sort_by_key(|e| e.index);
        failures.sort_by_key(|f| f.index);

        if self.options.write_name_report {
            let file = fs::File::create(output.join(NAME_REPORT_FILE))?;
            serde_json::to_writer_pretty(file, &archive.name_report())?;
        }

        let report = ExtractReport {
            archive: archive.name().to_string(),
            total: archive.entry_count(),
            written,
            failures,
            name_warnings: archive.name_warnings().len(),
        };

        log::info!(
            "{}: wrote {} of {} entries ({} failures)",
            report.archive,
            report.written.len(),
            report.total,
            report.failures.len()
        );

        Ok(report)
    }

    fn thread_count(&self) -> usize {
        let available = std::thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1);
        match self.options.threads {
            0 => available,
            n => n.min(available),
        }
    }

    fn handle(&self, result: std::result::Result<DecodedEntry, EntryError>) -> Outcome {
        let entry = match result {
            Ok(entry) => entry,
            Err(err) => {
                log::debug!("{err}");
                let message = err.kind.to_string();
                return Outcome::failed(err.index, None, FailureStage::Decode, message);
            }
        };

        let index = entry.index();
        let path = entry.path().to_string();
        let target = self.options.output_dir.join(entry.output_path());

        if let Err(e) = create_parent(&target) {
            return Outcome::failed(index, Some(path), FailureStage::Write, e.to_string());
        }

        let expanded = match entry.kind() {
            FileKind::Zstd => self.expand_zstd(&entry, &target).map(Some),
            kind => {
                if let Err(e) = fs::write(&target, entry.data()) {
                    return Outcome::failed(index, Some(path), FailureStage::Write, e.to_string());
                }
                match kind {
                    FileKind::Zip => self.expand_zip(&entry, &target).map(Some),
                    _ => Ok(None),
                }
            }
        };

        let failure = match expanded {
            Ok(Some(into)) => {
                log::debug!("entry {index}: expanded {path} into {}", into.display());
                None
            }
            Ok(None) => None,
            Err(e) => {
                log::warn!("entry {index}: could not expand {path}: {e}");
                Some(ExtractFailure {
                    index,
                    path: Some(path.clone()),
                    stage: FailureStage::Expand,
                    message: e.to_string(),
                })
            }
        };

        Outcome {
            written: Some(ExtractedEntry {
                index,
                path,
                kind: entry.kind(),
                size: entry.data().len() as u64,
            }),
            failure,
        }
    }

    /// Write a Zstandard payload decompressed, keeping the compressed bytes
    /// beside it unless intermediates are deleted.
    ///
    /// When decompression fails the compressed bytes are written to `target`.
    fn expand_zstd(&self, entry: &DecodedEntry, target: &Path) -> Result<PathBuf> {
        let data = match zstd::decode_all(entry.data()) {
            Ok(data) => data,
            Err(e) => {
                fs::write(target, entry.data())?;
                return Err(e.into());
            }
        };

        let paths = ZstdPaths::new(target, entry.is_named(), &data);
        if !self.options.delete_intermediate {
            fs::write(&paths.intermediate, entry.data())?;
        }
        fs::write(&paths.decompressed, &data)?;
        Ok(paths.decompressed)
    }

    /// Unpack a ZIP payload into a sibling directory named after its stem.
    fn expand_zip(&self, entry: &DecodedEntry, target: &Path) -> Result<PathBuf> {
        let dir = zip_target(target);

        let mut archive = zip::ZipArchive::new(Cursor::new(entry.data()))?;
        fs::create_dir_all(&dir)?;
        archive.extract(&dir)?;

        if self.options.delete_intermediate {
            fs::remove_file(target)?;
        }
        Ok(dir)
    }
}

fn create_parent(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(parent) => fs::create_dir_all(parent),
        None => Ok(()),
    }
}

/// Where the two halves of a Zstandard entry are written.
#[derive(Debug, PartialEq, Eq)]
struct ZstdPaths {
    decompressed: PathBuf,
    intermediate: PathBuf,
}

impl ZstdPaths {
    /// Named entries keep their path for the decompressed bytes; a trailing
    /// `.zst` is stripped, otherwise the compressed bytes get one appended.
    /// Synthetic names take the extension of the decompressed content.
    fn new(target: &Path, named: bool, data: &[u8]) -> Self {
        let is_zst = target.extension().is_some_and(|ext| ext == "zst");
        let decompressed = match (named, is_zst) {
            (true, true) => target.with_extension(""),
            (true, false) => target.to_path_buf(),
            (false, _) => target.with_extension(FileKind::sniff(data).extension()),
        };

        let intermediate = if decompressed.as_path() == target {
            let mut path = target.as_os_str().to_owned();
            path.push(".zst");
            PathBuf::from(path)
        } else {
            target.to_path_buf()
        };

        Self {
            decompressed,
            intermediate,
        }
    }
}

fn zip_target(target: &Path) -> PathBuf {
    let stem = target.with_extension("");
    if stem == target {
        let mut dir = target.as_os_str().to_owned();
        dir.push(".d");
        PathBuf::from(dir)
    } else {
        stem
    }
}
