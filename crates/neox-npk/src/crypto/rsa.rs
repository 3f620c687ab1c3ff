//! RSA-wrapped session keys and AES-128-CBC payloads.
//!
//! Session keys are wrapped with a raw (unpadded) RSA public operation and a
//! small exponent. A 16-byte key raised to the third power never reaches the
//! modulus, so the ciphertext is an exact integer power and the key falls
//! out of an integer root without the private exponent.

use cipher::{block_padding::Pkcs7, generic_array::GenericArray, BlockDecryptMut, KeyIvInit};
use num_bigint::BigUint;

use crate::error::CryptoError;
use crate::keys::RsaPublicKey;

type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

pub const SESSION_KEY_LEN: usize = 16;
pub const IV_LEN: usize = 16;

/// AES-128 session key.
pub type SessionKey = [u8; SESSION_KEY_LEN];

/// Recover a session key from its big-endian wrapped form.
pub fn recover_session_key(wrapped: &[u8], key: &RsaPublicKey) -> Result<SessionKey, CryptoError> {
    let modulus = BigUint::from_bytes_be(&key.modulus);
    let value = BigUint::from_bytes_be(wrapped);

    if value.bits() == 0 {
        return Err(CryptoError::KeyRecovery("wrapped key is zero".into()));
    }
    if value >= modulus {
        return Err(CryptoError::KeyRecovery(
            "wrapped key is not reduced by the modulus".into(),
        ));
    }

    let root = value.nth_root(key.exponent);
    if root.pow(key.exponent) != value {
        return Err(CryptoError::KeyRecovery(
            "wrapped key is not an exact power of a short key".into(),
        ));
    }

    let bytes = root.to_bytes_be();
    if bytes.len() > SESSION_KEY_LEN {
        return Err(CryptoError::KeyRecovery(format!(
            "recovered key is {} bytes, expected at most {SESSION_KEY_LEN}",
            bytes.len()
        )));
    }

    let mut session = [0u8; SESSION_KEY_LEN];
    session[SESSION_KEY_LEN - bytes.len()..].copy_from_slice(&bytes);
    Ok(session)
}

/// Split an entry-key payload into its wrapped key and the IV + ciphertext.
///
/// Layout: `u16` little-endian wrapped length, wrapped key bytes, then the
/// block cipher body.
pub fn split_wrapped(payload: &[u8]) -> Result<(&[u8], &[u8]), CryptoError> {
    let (len, rest) = payload
        .split_first_chunk::<2>()
        .ok_or(CryptoError::Truncated("missing wrapped key length"))?;
    let len = u16::from_le_bytes(*len) as usize;
    if len == 0 || rest.len() < len {
        return Err(CryptoError::Truncated("wrapped key"));
    }
    Ok(rest.split_at(len))
}

/// Decrypt an `IV || ciphertext` body with AES-128-CBC and strip PKCS#7.
pub fn decrypt_body(key: &SessionKey, body: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if body.len() < IV_LEN {
        return Err(CryptoError::Truncated("missing IV"));
    }
    let (iv, ciphertext) = body.split_at(IV_LEN);
    if ciphertext.is_empty() || ciphertext.len() % 16 != 0 {
        return Err(CryptoError::Decryption(format!(
            "ciphertext length {} is not a positive multiple of the block size",
            ciphertext.len()
        )));
    }

    let mut buf = ciphertext.to_vec();
    let decryptor = Aes128CbcDec::new(GenericArray::from_slice(key), GenericArray::from_slice(iv));
    let plain_len = decryptor
        .decrypt_padded_mut::<Pkcs7>(&mut buf)
        .map_err(|_| CryptoError::Decryption("invalid PKCS#7 padding".into()))?
        .len();

    buf.truncate(plain_len);
    Ok(buf)
}

/// Inverse operations, used to build test containers.
#[cfg(any(test, feature = "test-support"))]
pub(crate) mod seal {
    use cipher::{block_padding::Pkcs7, generic_array::GenericArray, BlockEncryptMut, KeyIvInit};
    use num_bigint::BigUint;

    use super::{SessionKey, IV_LEN};
    use crate::keys::RsaPublicKey;

    type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;

    /// Raw RSA public operation on a session key, big-endian.
    pub fn wrap_key(key: &SessionKey, rsa: &RsaPublicKey) -> Vec<u8> {
        let modulus = BigUint::from_bytes_be(&rsa.modulus);
        BigUint::from_bytes_be(key)
            .modpow(&BigUint::from(rsa.exponent), &modulus)
            .to_bytes_be()
    }

    /// `IV || AES-128-CBC(PKCS#7(plaintext))`.
    pub fn encrypt_body(key: &SessionKey, iv: &[u8; IV_LEN], plaintext: &[u8]) -> Vec<u8> {
        let padded_len = (plaintext.len() / 16 + 1) * 16;
        let mut buf = vec![0u8; padded_len];
        buf[..plaintext.len()].copy_from_slice(plaintext);

        let encryptor =
            Aes128CbcEnc::new(GenericArray::from_slice(key), GenericArray::from_slice(iv));
        let ciphertext = encryptor
            .encrypt_padded_mut::<Pkcs7>(&mut buf, plaintext.len())
            .expect("buffer sized for padding");

        let mut out = iv.to_vec();
        out.extend_from_slice(ciphertext);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::seal::{encrypt_body, wrap_key};
    use super::*;
    use crate::keys::KeyDatabase;

    const KEY: SessionKey = *b"0123456789ABCDEF";
    const IV: [u8; 16] = [7; 16];

    fn rsa() -> &'static RsaPublicKey {
        KeyDatabase::builtin().get("neox").unwrap().rsa().unwrap()
    }

    #[test]
    fn test_recover_wrapped_key() {
        let wrapped = wrap_key(&KEY, rsa());
        assert_eq!(recover_session_key(&wrapped, rsa()).unwrap(), KEY);
    }

    #[test]
    fn test_recover_short_key_is_left_padded() {
        let mut key = [0u8; 16];
        key[14] = 0x12;
        key[15] = 0x34;
        let wrapped = wrap_key(&key, rsa());
        assert_eq!(recover_session_key(&wrapped, rsa()).unwrap(), key);
    }

    #[test]
    fn test_corrupted_wrapped_key() {
        let mut wrapped = wrap_key(&KEY, rsa());
        let last = wrapped.len() - 1;
        wrapped[last] ^= 0x01;

        let err = recover_session_key(&wrapped, rsa()).unwrap_err();
        assert!(matches!(err, CryptoError::KeyRecovery(_)));
    }

    #[test]
    fn test_unreduced_wrapped_key() {
        let wrapped = vec![0xFF; 130];
        assert!(matches!(
            recover_session_key(&wrapped, rsa()),
            Err(CryptoError::KeyRecovery(_))
        ));
    }

    #[test]
    fn test_decrypt_body() {
        let body = encrypt_body(&KEY, &IV, b"hello session");
        assert_eq!(body.len(), 32);
        assert_eq!(decrypt_body(&KEY, &body).unwrap(), b"hello session");
    }

    #[test]
    fn test_decrypt_body_block_aligned() {
        let plaintext = [0x42u8; 32];
        let body = encrypt_body(&KEY, &IV, &plaintext);
        assert_eq!(body.len(), 16 + 48);
        assert_eq!(decrypt_body(&KEY, &body).unwrap(), plaintext);
    }

    #[test]
    fn test_decrypt_body_rejects_bad_lengths() {
        assert_eq!(
            decrypt_body(&KEY, &[0; 8]).unwrap_err(),
            CryptoError::Truncated("missing IV")
        );
        assert!(matches!(
            decrypt_body(&KEY, &[0; 20]),
            Err(CryptoError::Decryption(_))
        ));
    }

    #[test]
    fn test_wrong_key_fails_padding() {
        // With an all-0x42 plaintext the wrong key yields random padding,
        // which PKCS#7 rejects unless the last byte happens to be valid.
        let body = encrypt_body(&KEY, &IV, &[0x42; 16]);
        let wrong = *b"fedcba9876543210";
        match decrypt_body(&wrong, &body) {
            Err(CryptoError::Decryption(_)) => {}
            Ok(plain) => assert_ne!(plain, [0x42; 16]),
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_split_wrapped() {
        let mut payload = vec![3, 0, 0xAA, 0xBB, 0xCC];
        payload.extend_from_slice(&[1; 32]);

        let (wrapped, body) = split_wrapped(&payload).unwrap();
        assert_eq!(wrapped, &[0xAA, 0xBB, 0xCC]);
        assert_eq!(body.len(), 32);

        assert!(split_wrapped(&[9, 0, 1]).is_err());
        assert!(split_wrapped(&[1]).is_err());
    }
}
