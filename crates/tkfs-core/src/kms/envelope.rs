//! Envelope KEM: the long-lived RSA keypair a KMS holds per envelope id,
//! used to wrap/unwrap per-file content keys (spec §3 "Envelope-encrypted
//! file", GLOSSARY "KEM").
//!
//! Stands in for the original's `kem.Kem` interface, which in
//! `examples/original_source` is backed by TrustedKeep-internal KEM code
//! with no public crate equivalent (see DESIGN.md). RSA-OAEP-SHA256 is the
//! same primitive the remote connectors already use to wrap per-request
//! symmetric keys (`tkconnect.go`/`tbconnect.go`), so this reuses it rather
//! than introducing a second asymmetric primitive.

use rand::rngs::OsRng;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::{CoreError, Result};

/// An envelope key: an RSA keypair (public half always present, private
/// half present only on the side that can unwrap, i.e. inside the KMS or a
/// connector acting on the KMS's behalf).
#[derive(Clone)]
pub struct EnvelopeKem {
    public: RsaPublicKey,
    private: Option<RsaPrivateKey>,
}

impl EnvelopeKem {
    pub const KEY_BITS: usize = 3072;

    /// Generate a fresh envelope keypair. Used by `CreateEnvelopeKey`.
    pub fn generate() -> Result<Self> {
        let private = RsaPrivateKey::new(&mut OsRng, Self::KEY_BITS)
            .map_err(|e| CoreError::KmsUnavailable(format!("RSA keygen failed: {e}")))?;
        let public = RsaPublicKey::from(&private);
        Ok(EnvelopeKem { public, private: Some(private) })
    }

    pub fn public_only(public: RsaPublicKey) -> Self {
        EnvelopeKem { public, private: None }
    }

    pub fn has_private(&self) -> bool {
        self.private.is_some()
    }

    /// Wrap a 32-byte content key under this envelope's public key.
    pub fn wrap(&self, content_key: &[u8; 32]) -> Result<Vec<u8>> {
        self.public
            .encrypt(&mut OsRng, Oaep::new::<Sha256>(), content_key)
            .map_err(|e| CoreError::KmsUnavailable(format!("envelope wrap failed: {e}")))
    }

    /// Unwrap a previously wrapped 32-byte content key. Requires the
    /// private half (only present inside the KMS boundary).
    pub fn unwrap(&self, wrapped: &[u8]) -> Result<Zeroizing<[u8; 32]>> {
        let private = self
            .private
            .as_ref()
            .ok_or_else(|| CoreError::KmsUnavailable("no private key to unwrap with".into()))?;
        let pt = private
            .decrypt(Oaep::new::<Sha256>(), wrapped)
            .map_err(|_| CoreError::CryptoAuthFailure { block_no: 0 })?;
        if pt.len() != 32 {
            return Err(CoreError::CryptoCorrupt(format!(
                "unwrapped envelope key is {} bytes, expected 32",
                pt.len()
            )));
        }
        let mut out = Zeroizing::new([0u8; 32]);
        out.copy_from_slice(&pt);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_unwrap_roundtrip() {
        let kem = EnvelopeKem::generate().unwrap();
        let cek = [42u8; 32];
        let wrapped = kem.wrap(&cek).unwrap();
        let unwrapped = kem.unwrap(&wrapped).unwrap();
        assert_eq!(*unwrapped, cek);
    }

    #[test]
    fn public_only_cannot_unwrap() {
        let kem = EnvelopeKem::generate().unwrap();
        let public_only = EnvelopeKem::public_only(kem.public.clone());
        let wrapped = kem.wrap(&[1u8; 32]).unwrap();
        assert!(public_only.unwrap(&wrapped).is_err());
    }

    #[test]
    fn tamper_fails() {
        let kem = EnvelopeKem::generate().unwrap();
        let mut wrapped = kem.wrap(&[9u8; 32]).unwrap();
        wrapped[0] ^= 0x80;
        assert!(kem.unwrap(&wrapped).is_err());
    }
}
