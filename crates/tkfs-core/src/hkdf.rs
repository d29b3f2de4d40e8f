//! HKDF-SHA256 subkey derivation (spec §4.9).
//!
//! Each `info` string is used exactly once per [`crate::core::CryptoCore`]:
//! `"EME filename encryption"`, `"AES-GCM file content encryption"`, and
//! `"XChaCha20-Poly1305 file content encryption"`. Salt is always empty,
//! output length is always 32 bytes.

use ::hkdf::Hkdf;
use secrecy::{ExposeSecret, Secret};
use sha2::Sha256;
use zeroize::Zeroize;

pub const INFO_EME_NAMES: &[u8] = b"EME filename encryption";
pub const INFO_AES_GCM_CONTENT: &[u8] = b"AES-GCM file content encryption";
pub const INFO_XCHACHA_CONTENT: &[u8] = b"XChaCha20-Poly1305 file content encryption";

/// Derive a 32-byte subkey from `root` using HKDF-SHA256 with an empty salt.
///
/// `root` is zeroized by the caller; this function does not take ownership
/// of it, only a reference, so no intermediate beyond the HKDF's own
/// internal state is created.
pub fn derive_subkey(root: &[u8], info: &[u8]) -> Secret<[u8; 32]> {
    let hk = Hkdf::<Sha256>::new(None, root);
    let mut okm = [0u8; 32];
    hk.expand(info, &mut okm)
        .expect("32 is a valid HKDF-SHA256 output length");
    Secret::new(okm)
}

/// Derive a subkey and hand back the raw bytes, zeroizing the `Secret`
/// wrapper's copy once extracted. Used at call sites that need to feed the
/// bytes into a `KeyInit::new_from_slice` call and can't hold a `Secret`
/// across the FFI-shaped cipher constructors.
pub fn derive_subkey_bytes(root: &[u8], info: &[u8]) -> [u8; 32] {
    let secret = derive_subkey(root, info);
    let bytes = *secret.expose_secret();
    drop(secret);
    bytes
}

/// Zeroize a stack-allocated key buffer in place. Thin wrapper kept so call
/// sites read the same regardless of whether the buffer came from HKDF or
/// straight from the KMS.
pub fn wipe(buf: &mut [u8]) {
    buf.zeroize();
}
