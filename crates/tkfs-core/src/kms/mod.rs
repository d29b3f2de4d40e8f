//! KMS Connector abstraction (spec §4.10, §2 item 1).
//!
//! All key material — symmetric content keys and envelope KEMs — is
//! sourced from a remote Key Management Service. The core never generates
//! data keys itself (spec §1 Non-goals). Three variants are provided:
//! [`mock::MockConnector`] (local, for tests), [`remote::RemoteConnector`]
//! (authenticated transport with per-instance RSA response unwrapping),
//! and [`search::SearchConnector`] (HTTPS-over-TLS lookup capped at 5
//! attempts).

pub mod envelope;
pub mod mock;
#[cfg(feature = "remote-kms")]
pub mod remote;
#[cfg(feature = "remote-kms")]
pub mod search;

use crate::error::Result;
pub use envelope::EnvelopeKem;
use zeroize::Zeroizing;

/// Capability surface a KMS connector provides (spec §4.10).
///
/// `get_key`/`get_envelope_key` are expected to retry internally per the
/// connector's own policy (§4.4, §5 "Cancellation / timeouts") and only
/// return once they have either succeeded or exhausted that policy.
pub trait KmsConnector: Send + Sync {
    /// Fetch (or provision, on first access) the 32-byte symmetric key
    /// named by `path`. `path` is *not* yet prefixed with the node id;
    /// connectors apply that scoping themselves.
    fn get_key(&self, path: &str) -> Result<Zeroizing<Vec<u8>>>;

    /// Fetch the envelope KEM registered under `id`.
    fn get_envelope_key(&self, id: &str) -> Result<EnvelopeKem>;

    /// Provision a brand new envelope key of the given type, returning its
    /// freshly minted id and the KEM.
    fn create_envelope_key(&self, kind: &str, name: &str) -> Result<(String, EnvelopeKem)>;

    /// Currently active key id, if the connector tracks one (search
    /// variant only; others return `None`).
    fn current_key_id(&self) -> Option<String> {
        None
    }

    fn set_current_key_id(&self, _id: &str) {}
}
