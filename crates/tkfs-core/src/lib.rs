//! Cryptographic core of an encrypted overlay filesystem: block-based AEAD
//! content encryption, EME filename encryption, a KMS-sourced key hierarchy
//! with envelope-encryption support, and the persistent JSON config that
//! binds a mount to its feature flags and key identity.
//!
//! This crate implements the cryptographic core only — no FUSE bridge, no
//! directory-tree walking, no CLI. Callers drive [`core::CryptoCore`]
//! against their own backing storage via [`content::RandomAccess`].

pub mod aead;
pub mod cache;
pub mod config;
pub mod content;
pub mod core;
pub mod eme;
pub mod error;
pub mod header;
pub mod hkdf;
pub mod keysel;
pub mod kms;
pub mod names;
pub mod nonce;

pub use config::{ConfigFile, ContentAead, CreateArgs};
pub use content::ContentEngine;
pub use core::{ContentAlgo, ContentKeyMode, CryptoCore, CryptoCoreConfig};
pub use error::{CoreError, Result};
pub use header::FileHeader;
pub use keysel::KeySelection;
pub use kms::{EnvelopeKem, KmsConnector};
pub use names::EncryptedName;
