//! Payload decompression.

use std::io::{Cursor, Read};

use crate::error::CodecError;

/// Declared lengths above this are not trusted for preallocation.
const MAX_PREALLOC: u64 = 64 * 1024 * 1024;

/// An LZ4 block expands to at most this many bytes per input byte.
const LZ4_MAX_RATIO: u64 = 255;

/// Compression method tag from an index record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum CompressionMethod {
    Store = 0,
    Zlib = 1,
    /// Raw LZ4 block without a frame header.
    Lz4Block = 2,
    Zstd = 3,
    /// A ZIP archive wrapping a single member.
    Zip = 4,
    /// LZ4 frame format.
    Lz4Frame = 5,
}

impl TryFrom<u16> for CompressionMethod {
    type Error = CodecError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Store),
            1 => Ok(Self::Zlib),
            2 => Ok(Self::Lz4Block),
            3 => Ok(Self::Zstd),
            4 => Ok(Self::Zip),
            5 => Ok(Self::Lz4Frame),
            other => Err(CodecError::UnknownMethod(other)),
        }
    }
}

impl CompressionMethod {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Store => "store",
            Self::Zlib => "zlib",
            Self::Lz4Block => "lz4",
            Self::Zstd => "zstd",
            Self::Zip => "zip",
            Self::Lz4Frame => "lz4-frame",
        }
    }
}

/// Decompress a decrypted payload, checking the result against the
/// declared original length.
///
/// Streaming codecs never read more than `expected + 1` bytes of output, so
/// a payload that inflates past its declared size is rejected without being
/// fully expanded.
///
/// LZ4 blocks carry no size of their own, so the output buffer is sized from
/// the declared length. A declared length the block could never reach is
/// rejected before anything is allocated.
pub fn decompress(
    data: Vec<u8>,
    method: CompressionMethod,
    expected: u64,
) -> Result<Vec<u8>, CodecError> {
    let codec = method.name();
    let output = match method {
        CompressionMethod::Store => data,
        CompressionMethod::Zlib => {
            read_bounded(flate2::read::ZlibDecoder::new(&data[..]), expected, codec)?
        }
        CompressionMethod::Lz4Block => {
            let capacity = (data.len() as u64).saturating_mul(LZ4_MAX_RATIO);
            if expected > capacity {
                return Err(decode_error(
                    codec,
                    format!("declared length {expected} exceeds block capacity {capacity}"),
                ));
            }
            lz4_flex::block::decompress(&data, expected as usize)
                .map_err(|e| decode_error(codec, e))?
        }
        CompressionMethod::Zstd => {
            let decoder = zstd::Decoder::new(&data[..]).map_err(|e| decode_error(codec, e))?;
            read_bounded(decoder, expected, codec)?
        }
        CompressionMethod::Zip => unzip_first(&data, expected)?,
        CompressionMethod::Lz4Frame => {
            read_bounded(lz4_flex::frame::FrameDecoder::new(&data[..]), expected, codec)?
        }
    };

    check_length(output, expected)
}

/// Read the first file member of a nested ZIP archive.
fn unzip_first(data: &[u8], expected: u64) -> Result<Vec<u8>, CodecError> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(data)).map_err(|e| decode_error("zip", e))?;

    for i in 0..archive.len() {
        let member = archive.by_index(i).map_err(|e| decode_error("zip", e))?;
        if member.is_dir() {
            continue;
        }
        return read_bounded(member, expected, "zip");
    }

    Err(CodecError::EmptyArchive)
}

fn read_bounded<R: Read>(
    reader: R,
    expected: u64,
    codec: &'static str,
) -> Result<Vec<u8>, CodecError> {
    let mut output = Vec::with_capacity(expected.min(MAX_PREALLOC) as usize);
    reader
        .take(expected.saturating_add(1))
        .read_to_end(&mut output)
        .map_err(|e| decode_error(codec, e))?;
    Ok(output)
}

#[inline]
fn check_length(output: Vec<u8>, expected: u64) -> Result<Vec<u8>, CodecError> {
    if output.len() as u64 != expected {
        return Err(CodecError::LengthMismatch {
            expected,
            actual: output.len() as u64,
        });
    }
    Ok(output)
}

fn decode_error(codec: &'static str, err: impl std::fmt::Display) -> CodecError {
    CodecError::Decode {
        codec,
        message: err.to_string(),
    }
}
