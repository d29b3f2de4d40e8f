//! On-disk config file (spec §4.8, §3 "Config file"): a JSON descriptor
//! binding a storage directory to its format version, feature flag set,
//! node/envelope identifiers, and KMS-mode settings.
//!
//! Grounded on `examples/original_source/internal/configfile/config_file.go`
//! and `config_test.go`. Feature flags are a closed set of strings rather
//! than a bitfield so an old reader can still tell a newer-but-unknown flag
//! apart from corruption (spec: "unknown feature flag → refuse to mount").

use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

pub const CURRENT_VERSION: u16 = 2;
pub const DEFAULT_LONG_NAME_MAX: u8 = 255;

/// Content AEAD algorithm a config selects, per [`ConfigFile::content_encryption`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentAead {
    Aes256Gcm,
    XChaCha20Poly1305,
}

/// All feature flags this implementation understands. Anything else found
/// in a loaded config's `feature_flags` is a fatal "deprecated filesystem"
/// condition (spec §4.8).
const KNOWN_FLAGS: &[&str] = &[
    "HKDF",
    "GCMIV128",
    "XChaCha20Poly1305",
    "PlaintextNames",
    "DirIV",
    "EMENames",
    "LongNames",
    "LongNameMax",
    "Raw64",
];

fn is_known_flag(flag: &str) -> bool {
    KNOWN_FLAGS.contains(&flag)
}

/// Arguments to [`ConfigFile::create`]. Grouped the way the original's
/// `CreateArgs` groups them — the parameter list otherwise grows unwieldy.
#[derive(Debug, Clone, Default)]
pub struct CreateArgs {
    pub plaintext_names: bool,
    pub deterministic_names: bool,
    pub xchacha20poly1305: bool,
    pub node_id: String,
    pub boundary_host: String,
    pub mock_aws: bool,
    pub mock_kms: bool,
    pub is_search: bool,
    pub key_pool: i32,
    pub env_enc_alg: String,
    pub long_name_max: u8,
}

/// The parsed content of a config file. `filename` is the path it was
/// loaded from or will be written to; it is never serialized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFile {
    pub version: u16,
    pub feature_flags: Vec<String>,
    pub node_id: String,
    pub boundary_host: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub mock_aws: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub mock_kms: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_search: bool,
    /// Pool size for pooled-key mode; 0 means unused, -1 means envelope
    /// encryption (spec §4.3).
    #[serde(default, skip_serializing_if = "is_zero_i32")]
    pub key_pool: i32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub envelope_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub env_enc_alg: String,
    #[serde(default, skip_serializing_if = "is_zero_u8")]
    pub long_name_max: u8,

    #[serde(skip)]
    filename: String,
}

fn is_false(v: &bool) -> bool {
    !*v
}

fn is_zero_i32(v: &i32) -> bool {
    *v == 0
}

fn is_zero_u8(v: &u8) -> bool {
    *v == 0
}

impl ConfigFile {
    /// Create a new config for `filename` and write it to disk.
    pub fn create(filename: &str, args: &CreateArgs) -> Result<Self> {
        let mut cf = ConfigFile {
            version: CURRENT_VERSION,
            feature_flags: Vec::new(),
            node_id: if args.node_id.is_empty() { uuid::Uuid::new_v4().to_string() } else { args.node_id.clone() },
            boundary_host: args.boundary_host.clone(),
            mock_aws: args.mock_aws,
            mock_kms: args.mock_kms,
            is_search: args.is_search,
            key_pool: args.key_pool,
            envelope_id: uuid::Uuid::new_v4().to_string(),
            env_enc_alg: args.env_enc_alg.clone(),
            long_name_max: 0,
            filename: filename.to_string(),
        };

        cf.set_feature_flag("HKDF");
        if args.xchacha20poly1305 {
            cf.set_feature_flag("XChaCha20Poly1305");
        } else {
            // 128-bit IVs are mandatory for AES-GCM (the RustCrypto default is
            // 96); XChaCha20-Poly1305 always uses a 192-bit IV regardless.
            cf.set_feature_flag("GCMIV128");
        }

        if args.plaintext_names {
            cf.set_feature_flag("PlaintextNames");
        } else {
            if !args.deterministic_names {
                cf.set_feature_flag("DirIV");
            }
            // 0 means "use the default"; 255 *is* the default. Neither needs
            // to be persisted.
            if args.long_name_max != 0 && args.long_name_max != DEFAULT_LONG_NAME_MAX {
                cf.long_name_max = args.long_name_max;
                cf.set_feature_flag("LongNameMax");
            }
            cf.set_feature_flag("EMENames");
            cf.set_feature_flag("LongNames");
            cf.set_feature_flag("Raw64");
        }

        cf.write_file()?;
        Ok(cf)
    }

    /// Load and validate a config file from `filename`.
    pub fn load(filename: &str) -> Result<Self> {
        let bytes = std::fs::read(filename).map_err(CoreError::Io)?;
        if bytes.is_empty() {
            return Err(CoreError::ConfigInvalid("config file is empty".into()));
        }
        let mut cf: ConfigFile = serde_json::from_slice(&bytes)
            .map_err(|e| CoreError::ConfigInvalid(format!("malformed config JSON: {e}")))?;
        cf.filename = filename.to_string();
        cf.validate()?;
        Ok(cf)
    }

    fn set_feature_flag(&mut self, flag: &str) {
        if self.is_feature_flag_set(flag) {
            return;
        }
        self.feature_flags.push(flag.to_string());
    }

    pub fn is_feature_flag_set(&self, flag: &str) -> bool {
        self.feature_flags.iter().any(|f| f == flag)
    }

    /// Version and feature-flag checks a loaded (or about-to-be-written)
    /// config must pass.
    pub fn validate(&self) -> Result<()> {
        if self.version != CURRENT_VERSION {
            return Err(CoreError::ConfigInvalid(format!(
                "on-disk format version {} unsupported, need {CURRENT_VERSION}",
                self.version
            )));
        }
        for flag in &self.feature_flags {
            if !is_known_flag(flag) {
                return Err(CoreError::ConfigInvalid(format!("deprecated filesystem: unknown feature flag {flag:?}")));
            }
        }
        Ok(())
    }

    /// Which content AEAD algorithm this config selects (spec §4.8).
    pub fn content_encryption(&self) -> Result<ContentAead> {
        self.validate()?;
        if self.is_feature_flag_set("XChaCha20Poly1305") {
            return Ok(ContentAead::XChaCha20Poly1305);
        }
        Ok(ContentAead::Aes256Gcm)
    }

    /// Write as `filename.tmp` (mode 0400) then atomically rename over
    /// `filename`, so a concurrent reader never observes a partial write.
    pub fn write_file(&self) -> Result<()> {
        self.validate()?;

        let dir = Path::new(&self.filename).parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::Builder::new()
            .prefix(".tkfs-conf-")
            .suffix(".tmp")
            .tempfile_in(dir)
            .map_err(CoreError::Io)?;

        let mut json = serde_json::to_vec_pretty(self).map_err(|e| CoreError::ConfigInvalid(format!("failed to serialize config: {e}")))?;
        json.push(b'\n');
        tmp.write_all(&json).map_err(CoreError::Io)?;
        if let Err(e) = tmp.as_file().sync_all() {
            // Some network filesystems return ENOTSUP for fsync on a regular
            // file (e.g. FRITZ.NAS over SMB); fall back to a global sync
            // rather than fail the write.
            tracing::warn!(error = %e, "config fsync failed, falling back to global sync");
            #[cfg(unix)]
            unsafe {
                libc::sync();
            }
        }

        set_mode_0400(tmp.path());

        tmp.persist(&self.filename).map_err(|e| CoreError::Io(e.error))?;
        Ok(())
    }
}

#[cfg(unix)]
fn set_mode_0400(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Ok(meta) = std::fs::metadata(path) {
        let mut perms = meta.permissions();
        perms.set_mode(0o400);
        let _ = std::fs::set_permissions(path, perms);
    }
}

#[cfg(not(unix))]
fn set_mode_0400(_path: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_create_sets_expected_flags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tkfs.conf");
        let cf = ConfigFile::create(path.to_str().unwrap(), &CreateArgs::default()).unwrap();
        for flag in ["GCMIV128", "DirIV", "EMENames", "LongNames", "Raw64", "HKDF"] {
            assert!(cf.is_feature_flag_set(flag), "missing flag {flag}");
        }
        assert!(!cf.is_feature_flag_set("PlaintextNames"));
        assert!(!cf.node_id.is_empty());
    }

    #[test]
    fn plaintext_names_skips_name_encryption_flags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tkfs.conf");
        let args = CreateArgs { plaintext_names: true, ..Default::default() };
        let cf = ConfigFile::create(path.to_str().unwrap(), &args).unwrap();
        for flag in ["GCMIV128", "HKDF"] {
            assert!(cf.is_feature_flag_set(flag));
        }
        for flag in ["DirIV", "EMENames", "LongNames", "Raw64"] {
            assert!(!cf.is_feature_flag_set(flag));
        }
    }

    #[test]
    fn xchacha_flag_selects_xchacha_content_encryption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tkfs.conf");
        let args = CreateArgs { xchacha20poly1305: true, ..Default::default() };
        let cf = ConfigFile::create(path.to_str().unwrap(), &args).unwrap();
        assert!(!cf.is_feature_flag_set("GCMIV128"));
        assert_eq!(cf.content_encryption().unwrap(), ContentAead::XChaCha20Poly1305);
    }

    #[test]
    fn custom_long_name_max_is_persisted_and_flagged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tkfs.conf");
        let args = CreateArgs { long_name_max: 100, ..Default::default() };
        let cf = ConfigFile::create(path.to_str().unwrap(), &args).unwrap();
        assert!(cf.is_feature_flag_set("LongNameMax"));
        assert_eq!(cf.long_name_max, 100);
    }

    #[test]
    fn default_long_name_max_is_not_flagged_or_stored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tkfs.conf");
        let args = CreateArgs { long_name_max: DEFAULT_LONG_NAME_MAX, ..Default::default() };
        let cf = ConfigFile::create(path.to_str().unwrap(), &args).unwrap();
        assert!(!cf.is_feature_flag_set("LongNameMax"));
        assert_eq!(cf.long_name_max, 0);
    }

    #[test]
    fn create_then_load_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tkfs.conf");
        let created = ConfigFile::create(path.to_str().unwrap(), &CreateArgs::default()).unwrap();
        let loaded = ConfigFile::load(path.to_str().unwrap()).unwrap();
        assert_eq!(created.node_id, loaded.node_id);
        assert_eq!(created.envelope_id, loaded.envelope_id);
        assert_eq!(created.feature_flags, loaded.feature_flags);
    }

    #[test]
    fn load_rejects_unknown_feature_flag() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tkfs.conf");
        let json = serde_json::json!({
            "version": CURRENT_VERSION,
            "feature_flags": ["HKDF", "StrangeFeatureFlag"],
            "node_id": "node",
            "boundary_host": "host:1234",
        });
        std::fs::write(&path, serde_json::to_vec(&json).unwrap()).unwrap();
        let err = ConfigFile::load(path.to_str().unwrap()).unwrap_err();
        assert!(matches!(err, CoreError::ConfigInvalid(_)));
    }

    #[test]
    fn load_rejects_wrong_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tkfs.conf");
        let json = serde_json::json!({
            "version": CURRENT_VERSION + 1,
            "feature_flags": [],
            "node_id": "node",
            "boundary_host": "host:1234",
        });
        std::fs::write(&path, serde_json::to_vec(&json).unwrap()).unwrap();
        assert!(ConfigFile::load(path.to_str().unwrap()).is_err());
    }

    #[test]
    fn load_rejects_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tkfs.conf");
        std::fs::write(&path, b"").unwrap();
        assert!(ConfigFile::load(path.to_str().unwrap()).is_err());
    }

    #[test]
    fn write_file_is_mode_0400() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tkfs.conf");
        ConfigFile::create(path.to_str().unwrap(), &CreateArgs::default()).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode, 0o400);
        }
    }

    #[test]
    fn is_known_flag_accepts_closed_set_and_rejects_others() {
        for flag in KNOWN_FLAGS {
            assert!(is_known_flag(flag));
        }
        assert!(!is_known_flag("StrangeFeatureFlag"));
    }
}
