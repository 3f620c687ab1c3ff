//! NeoX CLI - Command-line tool for NeoX engine NPK containers.
//!
//! This is the main entry point for the `neox` command-line application.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use neox::npk::{CompressionMethod, EncryptionMethod};
use neox::prelude::*;

/// NeoX - NPK container extraction tool
#[derive(Parser)]
#[command(name = "neox")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract every entry of an NPK container
    Extract {
        /// Path to the NPK file
        #[arg(short, long, env = "NEOX_INPUT")]
        input: PathBuf,

        /// Output directory (defaults to the input path without its extension)
        #[arg(short, long, env = "NEOX_OUTPUT")]
        output: Option<PathBuf>,

        #[command(flatten)]
        decode: DecodeArgs,

        /// Remove .zst and .zip files after expanding them
        #[arg(long)]
        delete_intermediate: bool,

        /// Worker threads (0 uses every core)
        #[arg(short = 'j', long, default_value_t = 0)]
        threads: usize,

        /// Write names.json with the reconstructed names
        #[arg(long)]
        name_report: bool,

        /// Exit with an error if any entry failed
        #[arg(long)]
        strict: bool,
    },

    /// List the entries of an NPK container
    List {
        /// Path to the NPK file
        #[arg(short, long, env = "NEOX_INPUT")]
        input: PathBuf,

        #[command(flatten)]
        decode: DecodeArgs,

        /// Show sizes and methods
        #[arg(short, long)]
        detailed: bool,
    },

    /// List the available key records
    Keys {
        /// Additional key records (JSON)
        #[arg(short, long, env = "NEOX_KEYS")]
        keys: Option<PathBuf>,
    },
}

#[derive(Args)]
struct DecodeArgs {
    /// Key record title to use instead of signature matching
    #[arg(short, long, env = "NEOX_TITLE")]
    title: Option<String>,

    /// Additional key records (JSON), consulted before the built-in ones
    #[arg(short, long, env = "NEOX_KEYS")]
    keys: Option<PathBuf>,

    /// Ignore the name block and use index-based names
    #[arg(long)]
    no_names: bool,

    /// Keep compiled scripts in their rotor-wrapped form
    #[arg(long)]
    no_script_unwrap: bool,
}

impl DecodeArgs {
    fn to_options(&self) -> Result<DecodeOptions> {
        let keys = self.keys.as_deref().map(load_keys).transpose()?;

        Ok(DecodeOptions {
            skip_name_reconstruction: self.no_names,
            key_title_hint: self.title.clone(),
            unwrap_scripts: !self.no_script_unwrap,
            keys: keys.map(Arc::new),
        })
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match cli.command {
        Commands::Extract {
            input,
            output,
            decode,
            delete_intermediate,
            threads,
            name_report,
            strict,
        } => {
            let output = output.unwrap_or_else(|| input.with_extension(""));
            let options = ExtractOptions {
                output_dir: output,
                decode: decode.to_options()?,
                delete_intermediate,
                threads,
                write_name_report: name_report,
            };
            cmd_extract(&input, options, strict)?;
        }
        Commands::List { input, decode, detailed } => {
            cmd_list(&input, decode.to_options()?, detailed)?;
        }
        Commands::Keys { keys } => {
            cmd_keys(keys.as_deref())?;
        }
    }

    Ok(())
}

fn load_keys(path: &Path) -> Result<KeyDatabase> {
    let db = KeyDatabase::load(path)
        .with_context(|| format!("Failed to load key records from {}", path.display()))?;
    Ok(db.with_builtin())
}

fn cmd_extract(input: &Path, options: ExtractOptions, strict: bool) -> Result<()> {
    println!("Opening NPK container: {}", input.display());

    let start = Instant::now();
    let output = options.output_dir.clone();
    let report = Extractor::new(options)
        .extract(input)
        .with_context(|| format!("Failed to extract {}", input.display()))?;

    for failure in &report.failures {
        eprintln!(
            "  entry {} ({}) failed to {}: {}",
            failure.index,
            failure.path.as_deref().unwrap_or("-"),
            failure.stage,
            failure.message
        );
    }

    println!(
        "Extracted {} of {} entries to {} in {:?} ({} failures, {} name warnings)",
        report.written.len(),
        report.total,
        output.display(),
        start.elapsed(),
        report.failures.len(),
        report.name_warnings
    );

    if strict && !report.failures.is_empty() {
        anyhow::bail!("{} entries failed", report.failures.len());
    }

    Ok(())
}

fn cmd_list(input: &Path, options: DecodeOptions, detailed: bool) -> Result<()> {
    let archive = NpkArchive::open(input, options).context("Failed to open NPK container")?;

    for entry in archive.entries() {
        let name = archive.names().get(entry.index).unwrap_or("-");

        if detailed {
            println!(
                "{:>8} {:>12} {:>12} {:>10} {:>14} {}",
                entry.index,
                entry.stored_length,
                entry.original_length,
                CompressionMethod::try_from(entry.compression).map_or("unknown", |m| m.name()),
                EncryptionMethod::try_from(entry.encryption).map_or("unknown", |m| m.name()),
                name
            );
        } else {
            println!("{:>8} {}", entry.index, name);
        }
    }

    println!(
        "\nTotal: {} entries ({}, {} named)",
        archive.entry_count(),
        archive.header().variant,
        archive.names().len()
    );

    Ok(())
}

fn cmd_keys(keys: Option<&Path>) -> Result<()> {
    let db = match keys {
        Some(path) => load_keys(path)?,
        None => KeyDatabase::builtin().clone(),
    };

    for record in db.iter() {
        let signatures: Vec<_> = record.signatures.iter().map(|v| v.as_str()).collect();
        println!(
            "{:<16} [{}] stream:{} rotor:{} rsa:{}",
            record.title,
            signatures.join(","),
            !record.stream_key.is_empty(),
            record.rotor_key.is_some(),
            record.rsa.is_some()
        );
    }

    println!("\nTotal: {} key records", db.len());

    Ok(())
}
