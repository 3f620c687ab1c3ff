//! NeoX - extraction library for NeoX engine game assets.
//!
//! This crate drives the [`neox_npk`] container reader and writes decoded
//! entries to disk, expanding Zstandard and ZIP intermediates on the way.
//!
//! # Example
//!
//! ```no_run
//! use neox::prelude::*;
//!
//! let options = ExtractOptions::new("out");
//! let report = Extractor::new(options).extract("res.npk")?;
//! println!("{} of {} entries written", report.written.len(), report.total);
//! # Ok::<(), neox::Error>(())
//! ```

mod error;
mod extract;

pub use neox_npk as npk;

pub use error::{Error, Result};
pub use extract::{
    ExtractFailure, ExtractOptions, ExtractReport, ExtractedEntry, Extractor, FailureStage,
    NAME_REPORT_FILE,
};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::extract::{ExtractOptions, ExtractReport, Extractor};
    pub use neox_npk::{
        DecodeOptions, DecodedEntry, EntryDescriptor, FileKind, KeyDatabase, NpkArchive, Variant,
    };
}

/// Version information.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
