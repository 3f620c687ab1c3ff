//! XOR-based entry transforms.
//!
//! All of these are self-inverse: applying the same transform twice with the
//! same parameters restores the input.

use crate::index::EntryDescriptor;

/// Stream id of the EXPK index table.
pub const INDEX_TABLE_STREAM: u64 = u32::MAX as u64;

/// Stream id for an entry encrypted with the keyed-stream method.
#[inline]
pub const fn entry_stream(index: u32) -> u64 {
    index as u64
}

/// Stream id for the EXPK container layer of an entry's payload.
#[inline]
pub const fn container_stream(index: u32) -> u64 {
    (1 << 32) | index as u64
}

/// XOR `data` with the title key, perturbed by `stream`.
///
/// The stream id rotates the starting key byte and mixes in a salt derived
/// from it, so two streams never share a keystream even when the key is
/// shorter than the data.
pub fn apply_stream(key: &[u8], stream: u64, data: &mut [u8]) {
    if key.is_empty() {
        return;
    }

    let salt = stream
        .wrapping_mul(0x9E37_79B9_7F4A_7C15)
        .rotate_left(17)
        .to_le_bytes();
    let shift = (stream % key.len() as u64) as usize;

    for (pos, byte) in data.iter_mut().enumerate() {
        *byte ^= key[(pos + shift) % key.len()] ^ salt[pos & 7];
    }
}

/// Window XOR keyed by the entry's checksum and original length.
///
/// Payloads longer than 0x80 bytes only have a short window scrambled; the
/// key byte at window position `j` is `j + (crc ^ original_length)`.
pub fn apply_partial(entry: &EntryDescriptor, data: &mut [u8]) {
    let length = entry.stored_length;
    let original = entry.original_length & 0xFFFF_FFFF;
    let crc = entry.crc as u64;
    let base = (crc ^ original) as u8;

    let (start, size) = if length > 0x80 {
        ((crc >> 1) % (length - 0x80), (2 * original) % 0x60 + 0x20)
    } else {
        (0, length)
    };

    let window = window(data, start, start + size);
    for (j, byte) in window.iter_mut().enumerate() {
        *byte ^= base.wrapping_add(j as u8);
    }
}

/// Window XOR with a rolling byte key, bounded by the original length.
pub fn apply_rolling(entry: &EntryDescriptor, data: &mut [u8]) {
    let length = entry.stored_length;
    let original = entry.original_length & 0xFFFF_FFFF;
    let crc = entry.crc as u64;

    let (start, size) = if length > 0x80 {
        ((original >> 1) % (length - 0x80), ((crc << 1) & 0xFFFF_FFFF) % 0x60 + 0x20)
    } else {
        (0, length)
    };

    let mut key = (original ^ crc) as u8;
    for byte in window(data, start, (start + size).min(original)) {
        *byte ^= key;
        key = key.wrapping_add(1);
    }
}

fn window(data: &mut [u8], start: u64, end: u64) -> &mut [u8] {
    let end = (end.min(data.len() as u64)) as usize;
    let start = (start as usize).min(end);
    &mut data[start..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(stored_length: u64, original_length: u64, crc: u32) -> EntryDescriptor {
        EntryDescriptor {
            index: 0,
            name_hash: 0,
            offset: 0,
            stored_length,
            original_length,
            stored_crc: 0,
            crc,
            compression: 0,
            encryption: 0,
        }
    }

    #[test]
    fn test_stream_is_self_inverse() {
        let key = b"0123456789abcdef";
        let original = b"The quick brown fox jumps over the lazy dog".to_vec();

        let mut data = original.clone();
        apply_stream(key, entry_stream(7), &mut data);
        assert_ne!(data, original);

        apply_stream(key, entry_stream(7), &mut data);
        assert_eq!(data, original);
    }

    #[test]
    fn test_stream_differs_per_entry() {
        let key = b"0123456789abcdef";
        let plaintext = b"identical payload".to_vec();

        let mut first = plaintext.clone();
        let mut second = plaintext.clone();
        apply_stream(key, entry_stream(0), &mut first);
        apply_stream(key, entry_stream(1), &mut second);

        assert_ne!(first, second);
    }

    #[test]
    fn test_stream_zero_is_plain_key() {
        let key = [0x10, 0x20, 0x30];
        let mut data = [0u8; 6];
        apply_stream(&key, 0, &mut data);
        assert_eq!(data, [0x10, 0x20, 0x30, 0x10, 0x20, 0x30]);
    }

    #[test]
    fn test_container_and_entry_streams_are_distinct() {
        assert_ne!(container_stream(3), entry_stream(3));
        assert_ne!(container_stream(0), INDEX_TABLE_STREAM);
    }

    #[test]
    fn test_partial_short_payload_covers_everything() {
        // crc ^ original = 0x05 -> key bytes 05, 06, 07, ...
        let e = entry(4, 4, 0x01);
        let mut data = [0u8; 4];
        apply_partial(&e, &mut data);
        assert_eq!(data, [0x05, 0x06, 0x07, 0x08]);
    }

    #[test]
    fn test_partial_long_payload_window() {
        let e = entry(0x200, 0x10, 0x40);
        let mut data = vec![0u8; 0x200];
        apply_partial(&e, &mut data);

        // start = (0x40 >> 1) % 0x180 = 0x20, size = 0x20 % 0x60 + 0x20 = 0x40
        assert!(data[..0x20].iter().all(|&b| b == 0));
        assert_eq!(data[0x20], 0x50);
        assert_eq!(data[0x21], 0x51);
        assert_ne!(data[0x5F], 0);
        assert!(data[0x60..].iter().all(|&b| b == 0));

        apply_partial(&e, &mut data);
        assert!(data.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_rolling_bounded_by_original_length() {
        // Key starts at (3 ^ 0) = 3 and covers min(len, original) bytes.
        let e = entry(6, 3, 0);
        let mut data = [0u8; 6];
        apply_rolling(&e, &mut data);
        assert_eq!(data, [0x03, 0x04, 0x05, 0, 0, 0]);
    }

    #[test]
    fn test_rolling_is_self_inverse() {
        let e = entry(0x300, 0x1000, 0xDEAD_BEEF);
        let original: Vec<u8> = (0..0x300u32).map(|i| (i * 7) as u8).collect();

        let mut data = original.clone();
        apply_rolling(&e, &mut data);
        assert_ne!(data, original);
        apply_rolling(&e, &mut data);
        assert_eq!(data, original);
    }
}
