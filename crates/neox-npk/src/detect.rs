//! Payload content sniffing.
//!
//! Entries without a reconstructed name get a synthetic one, `{index:08}.{ext}`,
//! where the extension comes from the payload's leading bytes or, for small
//! text payloads, a handful of keyword heuristics.

use memchr::memmem;
use serde::Serialize;

/// Text heuristics are only applied below this size.
const TEXT_SNIFF_LIMIT: usize = 1_000_000;

/// Kind of decoded payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FileKind {
    Empty,
    CocosUi,
    Zstd,
    Skeleton,
    Template,
    Json,
    Hit,
    Pkm,
    Pvr,
    Dds,
    Bmp,
    PythonStub,
    Ktx,
    Png,
    Vant,
    MiniDump,
    Gis,
    Ntrk,
    Riff,
    SoundBank,
    Pem,
    Xml,
    Zip,
    Mesh,
    Type1,
    Type2,
    Type3,
    Pyc,
    Tga,
    /// Rotor-obscured, compressed compiled script.
    RotorScript,
    /// Script in the engine's newer bytecode format.
    Nxs3,
    Proto,
    ProtoHeader,
    ProtoSource,
    Shader,
    Html,
    JavaScript,
    Model,
    Css,
    Data,
}

/// Leading-byte signatures, checked in order.
const SIGNATURES: &[(&[u8], FileKind)] = &[
    (b"CocosStudio-UI", FileKind::CocosUi),
    (&[0x28, 0xB5, 0x2F, 0xFD], FileKind::Zstd),
    (b"SKELETON", FileKind::Skeleton),
    (b"%", FileKind::Template),
    (b"{", FileKind::Json),
    (b"hit", FileKind::Hit),
    (b"PKM", FileKind::Pkm),
    (b"PVR", FileKind::Pvr),
    (b"DDS", FileKind::Dds),
    (b"BM", FileKind::Bmp),
    (b"from typing import ", FileKind::PythonStub),
    (b"VANT", FileKind::Vant),
    (b"MDMP", FileKind::MiniDump),
    (b"RGIS", FileKind::Gis),
    (b"NTRK", FileKind::Ntrk),
    (b"RIFF", FileKind::Riff),
    (b"BKHD", FileKind::SoundBank),
    (b"-----BEGIN PUBLIC KEY-----", FileKind::Pem),
    (b"<", FileKind::Xml),
    (&[0x50, 0x4B, 0x03, 0x04], FileKind::Zip),
    (&[0x50, 0x4B, 0x05, 0x06], FileKind::Zip),
    (&[0x34, 0x80, 0xC8, 0xBB], FileKind::Mesh),
    (&[0x14, 0x00, 0x00, 0x00], FileKind::Type1),
    (&[0x04, 0x00, 0x00, 0x00], FileKind::Type2),
    (&[0x00, 0x01, 0x00, 0x00], FileKind::Type3),
    (&[0xE3, 0x00, 0x00, 0x00], FileKind::Pyc),
    (&[0x63, 0x00, 0x00, 0x00], FileKind::Pyc),
];

const NXS3_MARKER: [u8; 8] = [0x4E, 0x58, 0x53, 0x33, 0x03, 0x00, 0x00, 0x01];

/// Keyword heuristics over lowercased text, checked in order.
const KEYWORDS: &[(&[&str], FileKind)] = &[
    (&["package google.protobuf"], FileKind::Proto),
    (&["#ifndef google_protobuf"], FileKind::ProtoHeader),
    (&["#include <google/protobuf"], FileKind::ProtoSource),
    (&["void", "main(", "include", "float", "technique", "ifndef"], FileKind::Shader),
    (&["?xml"], FileKind::Xml),
    (&["<script"], FileKind::Html),
    (&["javascript"], FileKind::JavaScript),
    (&["biped", "bip001", "bone", "bip01"], FileKind::Model),
    (&["div.document"], FileKind::Css),
];

impl FileKind {
    /// Classify a decoded payload.
    pub fn sniff(data: &[u8]) -> Self {
        if data.is_empty() {
            return Self::Empty;
        }

        // KTX and PNG signatures start with a non-ASCII byte.
        if data.get(1..4) == Some(&b"KTX"[..]) {
            return Self::Ktx;
        }
        if data.get(1..4) == Some(&b"PNG"[..]) {
            return Self::Png;
        }

        if let Some(&(_, kind)) = SIGNATURES.iter().find(|(prefix, _)| data.starts_with(prefix)) {
            return kind;
        }

        if is_tga(data) {
            return Self::Tga;
        }
        if matches!(data.get(..2), Some([0x28, 0xB5] | [0x1D, 0x04] | [0x15, 0x23])) {
            return Self::RotorScript;
        }
        if data.get(7..15) == Some(&NXS3_MARKER[..]) {
            return Self::Nxs3;
        }

        if data.len() < TEXT_SNIFF_LIMIT {
            let lower = data.to_ascii_lowercase();
            for (keywords, kind) in KEYWORDS {
                if keywords.iter().any(|k| memmem::find(&lower, k.as_bytes()).is_some()) {
                    return *kind;
                }
            }
        }

        Self::Data
    }

    /// File extension for synthetic names, without the dot.
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Empty => "none",
            Self::CocosUi => "coc",
            Self::Zstd => "zst",
            Self::Skeleton => "skeleton",
            Self::Template => "tpl",
            Self::Json => "json",
            Self::Hit => "hit",
            Self::Pkm => "pkm",
            Self::Pvr => "pvr",
            Self::Dds => "dds",
            Self::Bmp => "bmp",
            Self::PythonStub => "pyi",
            Self::Ktx => "ktx",
            Self::Png => "png",
            Self::Vant => "vant",
            Self::MiniDump => "mdmp",
            Self::Gis => "gis",
            Self::Ntrk => "ntrk",
            Self::Riff => "riff",
            Self::SoundBank => "bnk",
            Self::Pem => "pem",
            Self::Xml => "xml",
            Self::Zip => "zip",
            Self::Mesh => "mesh",
            Self::Type1 => "type1",
            Self::Type2 => "type2",
            Self::Type3 => "type3",
            Self::Pyc => "pyc",
            Self::Tga => "tga",
            Self::RotorScript => "rot",
            Self::Nxs3 => "nxs3",
            Self::Proto => "proto",
            Self::ProtoHeader => "h",
            Self::ProtoSource => "cc",
            Self::Shader => "shader",
            Self::Html => "html",
            Self::JavaScript => "js",
            Self::Model => "model",
            Self::Css => "css",
            Self::Data => "dat",
        }
    }

    /// Whether the payload is itself an archive the orchestrator expands.
    #[inline]
    pub const fn is_intermediate(self) -> bool {
        matches!(self, Self::Zstd | Self::Zip)
    }
}

impl std::fmt::Display for FileKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

fn is_tga(data: &[u8]) -> bool {
    let footer = data.len() >= 18 && &data[data.len() - 18..data.len() - 2] == b"TRUEVISION-XFILE";
    footer || matches!(data.get(..3), Some([0x00, 0x00, 0x02] | [0x0D, 0x00, 0x02]))
}

/// Synthetic path for an entry without a reconstructed name.
pub fn synthetic_name(index: u32, kind: FileKind) -> String {
    format!("{index:08}.{}", kind.extension())
}
