//! Background nonce generator (spec §4.6).
//!
//! A single producer thread fills a bounded channel with CSPRNG bytes of a
//! fixed length; `get()` blocks on the channel. Mirrors the original's
//! `nonceGenerator` (`internal/cryptocore/nonce.go`): a goroutine spinning
//! on `chan []byte` of capacity 500, except here the producer is a real OS
//! thread and the channel is `crossbeam_channel`.

use crossbeam_channel::{bounded, Receiver, Sender};
use rand::RngCore;

const CHANNEL_CAPACITY: usize = 500;

/// Fills a bounded channel with fresh nonces of `nonce_len` bytes.
///
/// If `nonce_len == 0` (reserved for XTS-style modes with no per-call
/// nonce), `get()` returns an empty vector immediately and no background
/// thread is spawned.
pub struct NonceGenerator {
    nonce_len: usize,
    rx: Option<Receiver<Vec<u8>>>,
}

impl NonceGenerator {
    pub fn new(nonce_len: usize) -> Self {
        if nonce_len == 0 {
            return NonceGenerator { nonce_len, rx: None };
        }
        let (tx, rx): (Sender<Vec<u8>>, Receiver<Vec<u8>>) = bounded(CHANNEL_CAPACITY);
        std::thread::Builder::new()
            .name("tkfs-nonce-gen".into())
            .spawn(move || Self::produce(nonce_len, tx))
            .expect("failed to spawn nonce generator thread");
        NonceGenerator { nonce_len, rx: Some(rx) }
    }

    fn produce(nonce_len: usize, tx: Sender<Vec<u8>>) {
        let mut rng = rand::rngs::OsRng;
        loop {
            let mut n = vec![0u8; nonce_len];
            rng.fill_bytes(&mut n);
            if tx.send(n).is_err() {
                // Receiver (and NonceGenerator) dropped; stop producing.
                return;
            }
        }
    }

    /// Block until a fresh `nonce_len`-byte nonce is available.
    pub fn get(&self) -> Vec<u8> {
        match &self.rx {
            None => Vec::new(),
            Some(rx) => rx.recv().expect("nonce producer thread died"),
        }
    }

    pub fn nonce_len(&self) -> usize {
        self.nonce_len
    }
}
