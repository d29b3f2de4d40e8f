//! Key-selection policy (spec §4.3): maps an AEAD call's associated data
//! to the KMS key id that call should use. Three modes, mutually
//! exclusive per `CryptoCore` instance (spec §9 Open Questions — resolved
//! in DESIGN.md: legacy and pooled modes are selected by `key_pool`,
//! envelope mode is selected independently by whether the AD carries an
//! envelope id).
//!
//! Grounded on
//! `examples/original_source/internal/cryptocore/tk_aead_keys.go`'s
//! `getKeyName`.

use crate::error::{CoreError, Result};

const BLOCK_SIZE: u64 = 4096;
const BYTES_PER_KEY: u64 = 30 * 1024 * 1024 * 1024;
const POOL_PREFIX: &str = "tkfs_kp";

/// Which key-selection mode a `CryptoCore` was constructed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySelection {
    /// One key per ~30GiB of a file's data, named by the file id and a
    /// block-range index.
    Legacy,
    /// A small fixed pool of keys, selected by hashing the AD.
    Pooled { pool_size: u32 },
    /// Per-file content keys wrapped under an envelope KEM; the key id is
    /// carried in the AD itself rather than derived from it.
    Envelope,
}

/// FNV-1a, 32-bit. Hand-rolled rather than pulled from a crate: the exact
/// bit pattern is part of the on-disk key-naming contract and must not
/// drift if a dependency changes its internals.
pub fn fnv1a_32(data: &[u8]) -> u32 {
    const OFFSET_BASIS: u32 = 0x811c_9dc5;
    const PRIME: u32 = 0x0100_0193;
    let mut hash = OFFSET_BASIS;
    for &byte in data {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// Derive the KMS key id for a block, given the policy's associated data
/// (spec §3 AD wire format: `BE64(blockNo) ∥ fileID(16) [∥ envelopeID ∥
/// wrappedKey]`) and the active selection mode.
///
/// Envelope mode does not return a KMS key id at all — callers must parse
/// the envelope id and wrapped key out of the AD themselves via
/// [`parse_envelope_suffix`]. Calling this with `KeySelection::Envelope`
/// is a usage error.
pub fn key_name(ad: &[u8], selection: KeySelection) -> Result<String> {
    match selection {
        KeySelection::Envelope => {
            panic!("key_name called with KeySelection::Envelope; use parse_envelope_suffix")
        }
        KeySelection::Pooled { pool_size } => {
            if pool_size == 0 {
                panic!("pooled key selection requires pool_size > 0");
            }
            let id = fnv1a_32(ad) % pool_size;
            Ok(format!("{POOL_PREFIX}/{id}"))
        }
        KeySelection::Legacy => {
            if ad.len() < 24 {
                return Err(CoreError::CryptoCorrupt(format!(
                    "associated data too short for legacy key selection: {} bytes",
                    ad.len()
                )));
            }
            let block_no = u64::from_be_bytes(ad[0..8].try_into().unwrap());
            let file_id = hex::encode(&ad[8..24]);
            let block_key = (block_no * BLOCK_SIZE) / BYTES_PER_KEY;
            Ok(format!("{file_id}/{block_key}"))
        }
    }
}

/// Envelope id and wrapped content key parsed out of the tail of an
/// envelope-mode AD (spec §3). Expects `ad` to already have had its
/// leading `BE64(blockNo) ∥ fileID(16)` prefix stripped.
pub struct EnvelopeSuffix<'a> {
    pub envelope_id: &'a str,
    pub wrapped_key: &'a [u8],
}

const ENVELOPE_ID_LEN: usize = 36;

pub fn parse_envelope_suffix(suffix: &[u8]) -> Result<EnvelopeSuffix<'_>> {
    if suffix.len() <= ENVELOPE_ID_LEN {
        return Err(CoreError::CryptoCorrupt(format!(
            "envelope AD suffix too short: {} bytes",
            suffix.len()
        )));
    }
    let (id_bytes, wrapped_key) = suffix.split_at(ENVELOPE_ID_LEN);
    let envelope_id = std::str::from_utf8(id_bytes)
        .map_err(|_| CoreError::CryptoCorrupt("envelope id is not valid UTF-8".into()))?;
    Ok(EnvelopeSuffix { envelope_id, wrapped_key })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ad(block_no: u64, file_id: [u8; 16]) -> Vec<u8> {
        let mut v = block_no.to_be_bytes().to_vec();
        v.extend_from_slice(&file_id);
        v
    }

    #[test]
    fn legacy_key_name_format() {
        let a = ad(0, [0xAB; 16]);
        let name = key_name(&a, KeySelection::Legacy).unwrap();
        assert_eq!(name, format!("{}/0", hex::encode([0xABu8; 16])));
    }

    #[test]
    fn legacy_key_rotates_every_thirty_gib() {
        let blocks_per_key = BYTES_PER_KEY / BLOCK_SIZE;
        let a1 = ad(blocks_per_key - 1, [1; 16]);
        let a2 = ad(blocks_per_key, [1; 16]);
        let n1 = key_name(&a1, KeySelection::Legacy).unwrap();
        let n2 = key_name(&a2, KeySelection::Legacy).unwrap();
        assert_ne!(n1, n2);
    }

    #[test]
    fn pooled_key_name_is_stable_and_bounded() {
        let a = ad(42, [9; 16]);
        let name = key_name(&a, KeySelection::Pooled { pool_size: 16 }).unwrap();
        assert!(name.starts_with("tkfs_kp/"));
        let idx: u32 = name.strip_prefix("tkfs_kp/").unwrap().parse().unwrap();
        assert!(idx < 16);
        let again = key_name(&a, KeySelection::Pooled { pool_size: 16 }).unwrap();
        assert_eq!(name, again);
    }

    #[test]
    fn fnv1a_32_known_answer() {
        // Canonical FNV-1a-32 test vector for the empty string and "a".
        assert_eq!(fnv1a_32(b""), 0x811c_9dc5);
        assert_eq!(fnv1a_32(b"a"), 0xe40c_292c);
    }

    #[test]
    fn legacy_rejects_short_ad() {
        assert!(key_name(&[0u8; 10], KeySelection::Legacy).is_err());
    }

    #[test]
    fn envelope_suffix_roundtrips() {
        let id = "0123456789012345678901234567890123456789"[..36].to_string();
        let mut suffix = id.clone().into_bytes();
        suffix.extend_from_slice(&[1, 2, 3, 4]);
        let parsed = parse_envelope_suffix(&suffix).unwrap();
        assert_eq!(parsed.envelope_id, id);
        assert_eq!(parsed.wrapped_key, &[1, 2, 3, 4]);
    }

    #[test]
    fn envelope_suffix_rejects_short_input() {
        assert!(parse_envelope_suffix(&[0u8; 10]).is_err());
    }
}
