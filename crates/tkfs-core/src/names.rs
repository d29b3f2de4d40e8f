//! Filename encryption (spec §3 "Filename", §4.2 `EncryptAndHashName`).
//!
//! A plaintext name is PKCS#7-padded to a 16-byte boundary (minimum 16
//! bytes), EME-encrypted under the directory's IV tweak, then
//! base64url-encoded without padding ("Raw64"). Names whose encoded form
//! exceeds the configured cap spill to a `<prefix>.longname.<hash>` form
//! with the full ciphertext written to a sibling file by the VFS layer —
//! this module only computes the spilled name and the bytes that belong
//! in that sibling file; it does not touch the filesystem itself (spec
//! §1 Non-goals: long-name spill file management is external).

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sha2::{Digest, Sha256};

use crate::eme;
use crate::error::{CoreError, Result};

pub const DEFAULT_LONG_NAME_MAX: usize = 255;
pub const LONGNAME_PREFIX: &str = "gocryptfs.longname.";

/// The 16-byte tweak used for every name inside one directory (spec
/// "Directory IV"). Absent under the `PlaintextNames`/deterministic-names
/// feature, in which case a caller uses [`ZERO_TWEAK`] or skips
/// encryption entirely.
pub type DirIv = [u8; 16];

pub const ZERO_TWEAK: DirIv = [0u8; 16];

/// Result of encrypting one plaintext name.
pub enum EncryptedName {
    /// The base64url-encoded ciphertext fits within the configured cap
    /// and is used directly as the on-disk name.
    Short(String),
    /// The encoded ciphertext exceeded the cap; `disk_name` is the
    /// `<prefix>.longname.<hash>` form to use as the directory entry, and
    /// `full_ciphertext` is the raw bytes a caller must persist in the
    /// sibling spill file.
    Long { disk_name: String, full_ciphertext: Vec<u8> },
}

fn pkcs7_pad(data: &[u8]) -> Vec<u8> {
    let block = 16;
    let pad_len = block - (data.len() % block);
    let mut out = Vec::with_capacity(data.len() + pad_len);
    out.extend_from_slice(data);
    out.resize(out.len() + pad_len, pad_len as u8);
    out
}

fn pkcs7_unpad(data: &[u8]) -> Result<Vec<u8>> {
    let pad_len = *data.last().ok_or_else(|| CoreError::CryptoCorrupt("empty name plaintext".into()))? as usize;
    if pad_len == 0 || pad_len > 16 || pad_len > data.len() {
        return Err(CoreError::CryptoCorrupt("invalid PKCS#7 padding on decrypted name".into()));
    }
    if !data[data.len() - pad_len..].iter().all(|&b| b as usize == pad_len) {
        return Err(CoreError::CryptoCorrupt("invalid PKCS#7 padding on decrypted name".into()));
    }
    Ok(data[..data.len() - pad_len].to_vec())
}

/// Encrypt `plaintext_name` under `key`/`dir_iv`, applying the long-name
/// policy against `long_name_max`.
pub fn encrypt_and_hash_name(plaintext_name: &str, key: &[u8; 32], dir_iv: &DirIv, long_name_max: usize) -> Result<EncryptedName> {
    let padded = pkcs7_pad(plaintext_name.as_bytes());
    let ciphertext = eme::encrypt(key, dir_iv, &padded)?;
    let encoded = URL_SAFE_NO_PAD.encode(&ciphertext);
    if encoded.len() <= long_name_max {
        return Ok(EncryptedName::Short(encoded));
    }
    let hash = Sha256::digest(&ciphertext);
    let hash_b64 = URL_SAFE_NO_PAD.encode(hash);
    Ok(EncryptedName::Long {
        disk_name: format!("{LONGNAME_PREFIX}{hash_b64}"),
        full_ciphertext: ciphertext,
    })
}

/// Decrypt a short-form on-disk name back to plaintext.
pub fn decrypt_name(encoded: &str, key: &[u8; 32], dir_iv: &DirIv) -> Result<String> {
    let ciphertext = URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|e| CoreError::CryptoCorrupt(format!("invalid base64url name: {e}")))?;
    decrypt_name_ciphertext(&ciphertext, key, dir_iv)
}

/// Decrypt a long-form name's ciphertext (already read from its sibling
/// spill file by the caller) back to plaintext.
pub fn decrypt_name_ciphertext(ciphertext: &[u8], key: &[u8; 32], dir_iv: &DirIv) -> Result<String> {
    let padded = eme::decrypt(key, dir_iv, ciphertext)?;
    let unpadded = pkcs7_unpad(&padded)?;
    String::from_utf8(unpadded).map_err(|_| CoreError::CryptoCorrupt("decrypted name is not valid UTF-8".into()))
}

/// Whether `disk_name` is a long-name spill placeholder.
pub fn is_longname(disk_name: &str) -> bool {
    disk_name.starts_with(LONGNAME_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> [u8; 32] {
        [0u8; 32]
    }

    #[test]
    fn short_name_roundtrip() {
        let k = key();
        let enc = encrypt_and_hash_name("a", &k, &ZERO_TWEAK, DEFAULT_LONG_NAME_MAX).unwrap();
        let name = match enc {
            EncryptedName::Short(s) => s,
            EncryptedName::Long { .. } => panic!("expected short name"),
        };
        assert_eq!(name.len(), 22, "single AES block base64url-encodes to 22 chars with no padding");
        assert!(!name.contains('='));
        assert_eq!(decrypt_name(&name, &k, &ZERO_TWEAK).unwrap(), "a");
    }

    #[test]
    fn deterministic_given_same_iv_and_plaintext() {
        let k = key();
        let a = encrypt_and_hash_name("same-name.txt", &k, &ZERO_TWEAK, DEFAULT_LONG_NAME_MAX).unwrap();
        let b = encrypt_and_hash_name("same-name.txt", &k, &ZERO_TWEAK, DEFAULT_LONG_NAME_MAX).unwrap();
        match (a, b) {
            (EncryptedName::Short(x), EncryptedName::Short(y)) => assert_eq!(x, y),
            _ => panic!("expected short names"),
        }
    }

    #[test]
    fn different_directory_iv_changes_ciphertext() {
        let k = key();
        let iv_a = [1u8; 16];
        let iv_b = [2u8; 16];
        let a = encrypt_and_hash_name("file", &k, &iv_a, DEFAULT_LONG_NAME_MAX).unwrap();
        let b = encrypt_and_hash_name("file", &k, &iv_b, DEFAULT_LONG_NAME_MAX).unwrap();
        match (a, b) {
            (EncryptedName::Short(x), EncryptedName::Short(y)) => assert_ne!(x, y),
            _ => panic!("expected short names"),
        }
    }

    #[test]
    fn long_name_spills_with_hash_suffix() {
        let k = key();
        let long_plaintext = "x".repeat(300);
        let enc = encrypt_and_hash_name(&long_plaintext, &k, &ZERO_TWEAK, DEFAULT_LONG_NAME_MAX).unwrap();
        match enc {
            EncryptedName::Long { disk_name, full_ciphertext } => {
                assert!(is_longname(&disk_name));
                assert_eq!(decrypt_name_ciphertext(&full_ciphertext, &k, &ZERO_TWEAK).unwrap(), long_plaintext);
            }
            EncryptedName::Short(_) => panic!("expected spill to long name"),
        }
    }

    #[test]
    fn name_near_eme_cap_is_rejected() {
        let k = key();
        let too_long = "y".repeat(2049);
        assert!(encrypt_and_hash_name(&too_long, &k, &ZERO_TWEAK, DEFAULT_LONG_NAME_MAX).is_err());
    }

    #[test]
    fn is_longname_detects_prefix() {
        assert!(is_longname("gocryptfs.longname.abc123"));
        assert!(!is_longname("regular-file.txt"));
    }
}
