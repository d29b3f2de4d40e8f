//! Verification logic for `tkfs-kat-verify`, split out of `main.rs` so the
//! checked-in fixture under `fixtures/` can be exercised by a test as well
//! as by the CLI.

use aead::generic_array::typenum::U16;
use aead::{Aead, KeyInit, Payload};
use aes_gcm::{aes::Aes256, AesGcm};
use chacha20poly1305::XChaCha20Poly1305;
use hkdf::Hkdf;
use serde::Deserialize;
use sha2::Sha256;

type Aes256Gcm128 = AesGcm<Aes256, U16>;

#[derive(Deserialize)]
pub struct HkdfKat {
    root_hex: String,
    info: String,
    subkey_hex: String,
}

#[derive(Deserialize)]
pub struct SealKat {
    algo: String,
    key_hex: String,
    nonce_hex: String,
    plaintext_hex: String,
    ciphertext_hex: String,
}

#[derive(Deserialize)]
pub struct Kat {
    block_no: u64,
    file_id_hex: String,
    envelope_id: Option<String>,
    wrapped_key_hex: Option<String>,
    ad_hex: String,
    hkdf: Option<HkdfKat>,
    seal: Option<SealKat>,
}

/// Rebuild the AD wire format by hand: `BE64(blockNo) ∥ fileID(16)
/// [∥ envelopeID(36 ASCII) ∥ wrappedKey]`.
pub fn rebuild_ad(kat: &Kat) -> anyhow::Result<Vec<u8>> {
    let mut ad = kat.block_no.to_be_bytes().to_vec();
    let file_id = hex::decode(&kat.file_id_hex)?;
    anyhow::ensure!(file_id.len() == 16, "file_id_hex must decode to 16 bytes");
    ad.extend_from_slice(&file_id);
    if let Some(envelope_id) = &kat.envelope_id {
        anyhow::ensure!(envelope_id.len() == 36, "envelope_id must be a 36-byte ASCII UUID string");
        ad.extend_from_slice(envelope_id.as_bytes());
        let wrapped = kat
            .wrapped_key_hex
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("envelope_id present but wrapped_key_hex missing"))?;
        ad.extend_from_slice(&hex::decode(wrapped)?);
    }
    Ok(ad)
}

pub fn check_hkdf(hkdf: &HkdfKat) -> anyhow::Result<()> {
    let root = hex::decode(&hkdf.root_hex)?;
    let hk = Hkdf::<Sha256>::new(None, &root);
    let mut okm = [0u8; 32];
    hk.expand(hkdf.info.as_bytes(), &mut okm).map_err(|e| anyhow::anyhow!("HKDF expand failed: {e}"))?;
    let expected = hex::decode(&hkdf.subkey_hex)?;
    anyhow::ensure!(okm.as_slice() == expected, "HKDF subkey mismatch for info {:?}", hkdf.info);
    Ok(())
}

pub fn check_seal(seal: &SealKat, ad: &[u8]) -> anyhow::Result<()> {
    let key = hex::decode(&seal.key_hex)?;
    let nonce = hex::decode(&seal.nonce_hex)?;
    let plaintext = hex::decode(&seal.plaintext_hex)?;
    let expected_ct = hex::decode(&seal.ciphertext_hex)?;

    let ct = match seal.algo.as_str() {
        "aes256-gcm" => {
            anyhow::ensure!(nonce.len() == 16, "AES-256-GCM nonce must be 16 bytes (128-bit, mandatory post-v1.3)");
            let cipher = Aes256Gcm128::new_from_slice(&key).map_err(|e| anyhow::anyhow!("bad key: {e}"))?;
            cipher
                .encrypt(nonce.as_slice().into(), Payload { msg: &plaintext, aad: ad })
                .map_err(|_| anyhow::anyhow!("AES-256-GCM seal failed"))?
        }
        "xchacha20poly1305" => {
            anyhow::ensure!(nonce.len() == 24, "XChaCha20-Poly1305 nonce must be 24 bytes");
            let cipher = XChaCha20Poly1305::new_from_slice(&key).map_err(|e| anyhow::anyhow!("bad key: {e}"))?;
            cipher
                .encrypt(nonce.as_slice().into(), Payload { msg: &plaintext, aad: ad })
                .map_err(|_| anyhow::anyhow!("XChaCha20-Poly1305 seal failed"))?
        }
        other => anyhow::bail!("unknown algo {other:?}"),
    };

    anyhow::ensure!(ct == expected_ct, "ciphertext mismatch for algo {}", seal.algo);
    Ok(())
}

/// Load `path`, rebuild its AD and (if present) HKDF/seal sections, and
/// check each against the recorded expected bytes.
pub fn verify_file(path: &str) -> anyhow::Result<()> {
    let data = std::fs::read_to_string(path)?;
    let kat: Kat = serde_json::from_str(&data)?;

    let ad = rebuild_ad(&kat)?;
    let ad_expected = hex::decode(&kat.ad_hex)?;
    anyhow::ensure!(ad == ad_expected, "AD mismatch");

    if let Some(hkdf) = &kat.hkdf {
        check_hkdf(hkdf)?;
    }
    if let Some(seal) = &kat.seal {
        check_seal(seal, &ad)?;
    }
    Ok(())
}
