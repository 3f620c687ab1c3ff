//! Compiled-script unwrapping.
//!
//! Script payloads are stored as rotor ciphertext over a zlib stream whose
//! content is additionally scrambled: the first 128 bytes are XORed with a
//! constant and the whole buffer is reversed.

use std::io::Read;

use flate2::read::ZlibDecoder;

use crate::crypto::Rotor;
use crate::error::CodecError;

const SCRAMBLE_LEN: usize = 128;
const SCRAMBLE_KEY: u8 = 0x9A;

/// Recover compiled-script bytes from a rotor-wrapped payload.
pub fn unwrap(data: &[u8], rotor: &Rotor) -> Result<Vec<u8>, CodecError> {
    let decrypted = rotor.decrypt(data);

    let mut inflated = Vec::with_capacity(decrypted.len() * 2);
    ZlibDecoder::new(&decrypted[..])
        .read_to_end(&mut inflated)
        .map_err(|e| CodecError::Script(format!("inflate failed: {e}")))?;

    Ok(unscramble(inflated))
}

fn unscramble(mut data: Vec<u8>) -> Vec<u8> {
    for byte in data.iter_mut().take(SCRAMBLE_LEN) {
        *byte ^= SCRAMBLE_KEY;
    }
    data.reverse();
    data
}

/// Inverse of [`unwrap`], used to build test containers.
#[cfg(any(test, feature = "test-support"))]
pub(crate) fn wrap(script: &[u8], rotor: &Rotor) -> Vec<u8> {
    use std::io::Write;

    let mut scrambled = script.to_vec();
    scrambled.reverse();
    for byte in scrambled.iter_mut().take(SCRAMBLE_LEN) {
        *byte ^= SCRAMBLE_KEY;
    }

    let mut encoder = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::best());
    encoder.write_all(&scrambled).expect("writing to a Vec cannot fail");
    let compressed = encoder.finish().expect("writing to a Vec cannot fail");

    rotor.encrypt(&compressed)
}
