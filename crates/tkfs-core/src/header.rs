//! On-disk file header (spec §3 "File layout"): a fixed 2-byte
//! big-endian format version followed by a 16-byte random file id, with
//! an optional envelope-mode extension. Encoded by hand rather than via
//! a derive-based serializer — the byte layout is a wire contract and
//! must not shift if a serialization crate changes its defaults.

use rand::RngCore;

use crate::error::{CoreError, Result};

pub const CURRENT_VERSION: u16 = 2;
pub const FILE_ID_LEN: usize = 16;
pub const ENVELOPE_ID_LEN: usize = 36;
/// `version(2) + file_id(16)`.
pub const BASE_HEADER_LEN: usize = 2 + FILE_ID_LEN;

pub type FileId = [u8; FILE_ID_LEN];

/// Generate a fresh random file id (spec: "unique per file, generated at
/// create time").
pub fn new_file_id() -> FileId {
    let mut id = [0u8; FILE_ID_LEN];
    rand::rngs::OsRng.fill_bytes(&mut id);
    id
}

/// Envelope-mode header extension: a UUID envelope id (stored as its
/// 36-byte ASCII string form) plus the wrapped content key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeHeader {
    pub envelope_id: String,
    pub wrapped_key: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub version: u16,
    pub file_id: FileId,
    pub envelope: Option<EnvelopeHeader>,
}

impl FileHeader {
    pub fn new(file_id: FileId) -> Self {
        FileHeader { version: CURRENT_VERSION, file_id, envelope: None }
    }

    pub fn new_envelope(file_id: FileId, envelope_id: String, wrapped_key: Vec<u8>) -> Self {
        assert_eq!(envelope_id.len(), ENVELOPE_ID_LEN, "envelope id must be a 36-byte ASCII UUID string");
        FileHeader { version: CURRENT_VERSION, file_id, envelope: Some(EnvelopeHeader { envelope_id, wrapped_key }) }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(BASE_HEADER_LEN);
        out.extend_from_slice(&self.version.to_be_bytes());
        out.extend_from_slice(&self.file_id);
        if let Some(env) = &self.envelope {
            out.extend_from_slice(env.envelope_id.as_bytes());
            out.extend_from_slice(&env.wrapped_key);
        }
        out
    }

    /// Decode a header from the front of `data`, returning the header and
    /// the number of bytes consumed. `wrapped_key_len` must be supplied
    /// by the caller for envelope-mode headers (the wrapped key's length
    /// is algorithm-dependent and not self-describing on disk); pass
    /// `None` for non-envelope files.
    pub fn decode(data: &[u8], wrapped_key_len: Option<usize>) -> Result<(Self, usize)> {
        if data.len() < BASE_HEADER_LEN {
            return Err(CoreError::CryptoCorrupt(format!(
                "file header truncated: {} bytes, need at least {BASE_HEADER_LEN}",
                data.len()
            )));
        }
        let version = u16::from_be_bytes([data[0], data[1]]);
        let mut file_id = [0u8; FILE_ID_LEN];
        file_id.copy_from_slice(&data[2..BASE_HEADER_LEN]);

        match wrapped_key_len {
            None => Ok((FileHeader { version, file_id, envelope: None }, BASE_HEADER_LEN)),
            Some(wrapped_len) => {
                let total = BASE_HEADER_LEN + ENVELOPE_ID_LEN + wrapped_len;
                if data.len() < total {
                    return Err(CoreError::CryptoCorrupt(format!(
                        "envelope file header truncated: {} bytes, need {total}",
                        data.len()
                    )));
                }
                let id_start = BASE_HEADER_LEN;
                let id_end = id_start + ENVELOPE_ID_LEN;
                let envelope_id = std::str::from_utf8(&data[id_start..id_end])
                    .map_err(|_| CoreError::CryptoCorrupt("envelope id is not valid UTF-8".into()))?
                    .to_string();
                let wrapped_key = data[id_end..total].to_vec();
                Ok((FileHeader { version, file_id, envelope: Some(EnvelopeHeader { envelope_id, wrapped_key }) }, total))
            }
        }
    }

    pub fn encoded_len(&self) -> usize {
        BASE_HEADER_LEN + self.envelope.as_ref().map_or(0, |e| ENVELOPE_ID_LEN + e.wrapped_key.len())
    }

    /// Associated-data prefix for block 0..n (spec §3 AD layout):
    /// `BE64(blockNo) ∥ fileID(16) [∥ envelopeID(36) ∥ wrappedKey]`.
    pub fn associated_data(&self, block_no: u64) -> Vec<u8> {
        let mut ad = block_no.to_be_bytes().to_vec();
        ad.extend_from_slice(&self.file_id);
        if let Some(env) = &self.envelope {
            ad.extend_from_slice(env.envelope_id.as_bytes());
            ad.extend_from_slice(&env.wrapped_key);
        }
        ad
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_header_roundtrip() {
        let header = FileHeader::new([7u8; FILE_ID_LEN]);
        let bytes = header.encode();
        assert_eq!(bytes.len(), BASE_HEADER_LEN);
        let (decoded, consumed) = FileHeader::decode(&bytes, None).unwrap();
        assert_eq!(consumed, BASE_HEADER_LEN);
        assert_eq!(decoded, header);
    }

    #[test]
    fn envelope_header_roundtrip() {
        let envelope_id = "012345678901234567890123456789012345".to_string();
        assert_eq!(envelope_id.len(), ENVELOPE_ID_LEN);
        let header = FileHeader::new_envelope([9u8; FILE_ID_LEN], envelope_id, vec![1, 2, 3, 4, 5]);
        let bytes = header.encode();
        let (decoded, consumed) = FileHeader::decode(&bytes, Some(5)).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded, header);
    }

    #[test]
    fn truncated_header_is_corrupt() {
        assert!(FileHeader::decode(&[0u8; 5], None).is_err());
    }

    #[test]
    fn truncated_envelope_header_is_corrupt() {
        let header = FileHeader::new_envelope([1u8; FILE_ID_LEN], "0".repeat(36), vec![9; 10]);
        let bytes = header.encode();
        assert!(FileHeader::decode(&bytes[..bytes.len() - 1], Some(10)).is_err());
    }

    #[test]
    fn associated_data_matches_wire_layout() {
        let header = FileHeader::new([3u8; FILE_ID_LEN]);
        let ad = header.associated_data(42);
        assert_eq!(&ad[0..8], &42u64.to_be_bytes());
        assert_eq!(&ad[8..24], &[3u8; FILE_ID_LEN]);
        assert_eq!(ad.len(), 24);
    }

    #[test]
    fn generated_file_ids_are_random() {
        assert_ne!(new_file_id(), new_file_id());
    }
}
