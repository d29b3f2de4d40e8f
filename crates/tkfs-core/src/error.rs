//! Error taxonomy for the crypto core (spec §7).
//!
//! Cryptographic and I/O failures are surfaced to the caller unchanged.
//! KMS transient failures are retried inside the connector (§4.4/§4.10) so
//! callers only ever observe success or a terminal [`CoreError::KmsUnavailable`].

use std::io;

/// Errors returned by the crypto core.
///
/// `Usage` is the one variant that is never returned: API misuse (bad nonce
/// length, wrong key size) panics during construction per spec §7, since it
/// represents a configuration bug rather than a runtime condition a caller
/// can recover from.
#[derive(thiserror::Error, Debug)]
pub enum CoreError {
    /// JSON parse failure, version mismatch, or unknown feature flag.
    #[error("invalid config: {0}")]
    ConfigInvalid(String),

    /// AEAD tag verification failed, including a partial block of
    /// impossible length.
    #[error("authentication failed for block {block_no}")]
    CryptoAuthFailure { block_no: u64 },

    /// Truncated header or short block.
    #[error("corrupt ciphertext: {0}")]
    CryptoCorrupt(String),

    /// Plaintext name cannot be represented (exceeds the EME block limit).
    #[error("name too long: {0} bytes after padding exceeds 2048-byte EME limit")]
    NameTooLong(usize),

    /// Retryable KMS transport failure. The remote/mock connectors retry
    /// forever before this is ever returned; the search connector returns
    /// it after 5 attempts.
    #[error("KMS unavailable: {0}")]
    KmsUnavailable(String),

    /// KMS responded successfully but supplied no key material. Treated as
    /// transient and subject to the same retry policy as [`CoreError::KmsUnavailable`].
    #[error("KMS returned no key for {0}")]
    KmsKeyMissing(String),

    /// Underlying pread/pwrite/rename/fsync error, propagated unchanged.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
