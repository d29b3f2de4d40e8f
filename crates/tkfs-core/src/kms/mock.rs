//! Mock KMS connector: an in-memory KV store that mints 32-byte keys on
//! first access. Mirrors the original's `mockConnector`
//! (`internal/tkc/mock_connector.go`), minus the on-disk bbolt persistence
//! — a test double has no business surviving process restarts.

use std::collections::HashMap;
use std::sync::Mutex;

use rand::RngCore;
use zeroize::Zeroizing;

use super::{EnvelopeKem, KmsConnector};
use crate::error::Result;

pub struct MockConnector {
    node_id: String,
    keys: Mutex<HashMap<String, Vec<u8>>>,
    envelopes: Mutex<HashMap<String, EnvelopeKem>>,
}

impl MockConnector {
    pub fn new(node_id: impl Into<String>) -> Self {
        MockConnector {
            node_id: node_id.into(),
            keys: Mutex::new(HashMap::new()),
            envelopes: Mutex::new(HashMap::new()),
        }
    }

    fn scoped(&self, path: &str) -> String {
        format!("{}/{}", self.node_id, path)
    }
}

impl KmsConnector for MockConnector {
    fn get_key(&self, path: &str) -> Result<Zeroizing<Vec<u8>>> {
        let full = self.scoped(path);
        let mut keys = self.keys.lock().expect("mock KMS key map poisoned");
        let key = keys.entry(full.clone()).or_insert_with(|| {
            tracing::debug!(path = %full, "mock KMS minting new key");
            let mut k = vec![0u8; 32];
            rand::rngs::OsRng.fill_bytes(&mut k);
            k
        });
        Ok(Zeroizing::new(key.clone()))
    }

    fn get_envelope_key(&self, id: &str) -> Result<EnvelopeKem> {
        let mut envelopes = self.envelopes.lock().expect("mock KMS envelope map poisoned");
        if let Some(kem) = envelopes.get(id) {
            return Ok(kem.clone());
        }
        let kem = EnvelopeKem::generate()?;
        envelopes.insert(id.to_string(), kem.clone());
        Ok(kem)
    }

    fn create_envelope_key(&self, _kind: &str, name: &str) -> Result<(String, EnvelopeKem)> {
        let id = uuid::Uuid::new_v4().to_string();
        let kem = EnvelopeKem::generate()?;
        self.envelopes
            .lock()
            .expect("mock KMS envelope map poisoned")
            .insert(id.clone(), kem.clone());
        tracing::debug!(%id, %name, "mock KMS created envelope key");
        Ok((id, kem))
    }
}
