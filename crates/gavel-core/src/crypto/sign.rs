//! Ledger signing keys and signature verification.
//!
//! Key files are stored with 0600 permissions and loaded once at startup.
//! Mutex-free: a signer is immutable after construction.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

use ed25519_dalek::{Signature, Signer as _, SigningKey, Verifier as _, VerifyingKey};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;
use zeroize::Zeroizing;

type HmacSha256 = Hmac<Sha256>;

/// Size in bytes of an Ed25519 seed and of the HMAC secret.
const SECRET_SIZE: usize = 32;

/// Errors that can occur while loading or using signing keys.
#[derive(Debug, Error)]
pub enum SignerError {
    /// I/O error during key file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Key file exists but does not contain valid key material.
    #[error("invalid key material in {path}: {reason}")]
    InvalidKeyMaterial {
        /// Path of the offending key file.
        path: String,
        /// Why the material was rejected.
        reason: String,
    },

    /// Key file or directory is readable by group/other.
    #[error("insecure permissions on {path}")]
    InsecurePermissions {
        /// The path with insecure permissions.
        path: String,
    },

    /// Ed25519 material is unusable and the HMAC fallback is not allowed.
    #[error("Ed25519 signing unavailable ({reason}) and HMAC fallback is disabled")]
    FallbackDisallowed {
        /// Why Ed25519 could not be used.
        reason: String,
    },
}

/// Which signature scheme a signer or published key uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureScheme {
    /// Ed25519 public-key signatures (default).
    Ed25519,
    /// HMAC-SHA256 with a per-install shared secret.
    Hmac,
}

impl SignatureScheme {
    /// The `signer_key_id` / `public.key` prefix for this scheme.
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Ed25519 => "ed25519",
            Self::Hmac => "hmac",
        }
    }
}

/// Signer configuration.
#[derive(Debug, Clone, Default)]
pub struct SignerConfig {
    /// Permit falling back to HMAC-SHA256 when Ed25519 key material is
    /// unusable. The fallback is always recorded in `signer_key_id`.
    pub allow_hmac_fallback: bool,

    /// Force the HMAC scheme even when Ed25519 is available. Used by
    /// installs that deliberately run with a shared secret.
    pub force_hmac: bool,
}

enum KeyMaterial {
    Ed25519(SigningKey),
    Hmac(Zeroizing<[u8; SECRET_SIZE]>),
}

/// The ledger signer: one immutable signing key per install.
pub struct LedgerSigner {
    material: KeyMaterial,
    key_id: String,
}

impl LedgerSigner {
    /// Opens (or creates) the signing key under `key_dir`.
    ///
    /// Ed25519 is the default scheme; the key seed lives in
    /// `<key_dir>/private.key` with 0600 permissions. With
    /// `force_hmac` (or `allow_hmac_fallback` plus corrupt Ed25519
    /// material) the per-install secret `<key_dir>/hmac.secret` is used
    /// instead.
    ///
    /// # Errors
    ///
    /// Returns an error if key files cannot be created or read, carry
    /// insecure permissions, or contain invalid material with the
    /// fallback disabled.
    pub fn open(key_dir: impl AsRef<Path>, config: &SignerConfig) -> Result<Self, SignerError> {
        let key_dir = key_dir.as_ref();
        ensure_private_dir(key_dir)?;

        if config.force_hmac {
            tracing::warn!("ledger signer forced to HMAC-SHA256 by configuration");
            return Self::open_hmac(key_dir);
        }

        match Self::open_ed25519(key_dir) {
            Ok(signer) => Ok(signer),
            Err(SignerError::InvalidKeyMaterial { path, reason }) if config.allow_hmac_fallback => {
                tracing::warn!(%path, %reason, "Ed25519 key unusable; falling back to HMAC");
                Self::open_hmac(key_dir)
            },
            Err(SignerError::InvalidKeyMaterial { reason, .. }) => {
                Err(SignerError::FallbackDisallowed { reason })
            },
            Err(other) => Err(other),
        }
    }

    fn open_ed25519(key_dir: &Path) -> Result<Self, SignerError> {
        let key_path = key_dir.join("private.key");
        let signing_key = if key_path.exists() {
            check_permissions(&key_path)?;
            let mut file = File::open(&key_path)?;
            let mut seed = Zeroizing::new([0u8; SECRET_SIZE]);
            let n = file.read(&mut *seed)?;
            if n != SECRET_SIZE {
                return Err(SignerError::InvalidKeyMaterial {
                    path: key_path.display().to_string(),
                    reason: format!("expected {SECRET_SIZE} bytes, found {n}"),
                });
            }
            SigningKey::from_bytes(&seed)
        } else {
            let signing_key = SigningKey::generate(&mut rand::rngs::OsRng);
            write_secret_file(&key_path, &signing_key.to_bytes())?;
            tracing::info!(path = %key_path.display(), "generated new Ed25519 signing key");
            signing_key
        };

        let key_id = key_id_for(SignatureScheme::Ed25519, signing_key.verifying_key().as_bytes());
        Ok(Self {
            material: KeyMaterial::Ed25519(signing_key),
            key_id,
        })
    }

    fn open_hmac(key_dir: &Path) -> Result<Self, SignerError> {
        let secret_path = key_dir.join("hmac.secret");
        let mut secret = Zeroizing::new([0u8; SECRET_SIZE]);
        if secret_path.exists() {
            check_permissions(&secret_path)?;
            let mut file = File::open(&secret_path)?;
            let n = file.read(&mut *secret)?;
            if n != SECRET_SIZE {
                return Err(SignerError::InvalidKeyMaterial {
                    path: secret_path.display().to_string(),
                    reason: format!("expected {SECRET_SIZE} bytes, found {n}"),
                });
            }
        } else {
            rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut *secret);
            write_secret_file(&secret_path, &*secret)?;
            tracing::info!(path = %secret_path.display(), "generated new HMAC ledger secret");
        }

        let key_id = key_id_for(SignatureScheme::Hmac, &*secret);
        Ok(Self {
            material: KeyMaterial::Hmac(secret),
            key_id,
        })
    }

    /// Signs `message` and returns the hex-encoded signature.
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> String {
        match &self.material {
            KeyMaterial::Ed25519(key) => hex::encode(key.sign(message).to_bytes()),
            KeyMaterial::Hmac(secret) => {
                let mut mac = HmacSha256::new_from_slice(&**secret)
                    .expect("HMAC accepts any key length");
                mac.update(message);
                hex::encode(mac.finalize().into_bytes())
            },
        }
    }

    /// Returns which scheme this signer uses.
    #[must_use]
    pub const fn scheme(&self) -> SignatureScheme {
        match self.material {
            KeyMaterial::Ed25519(_) => SignatureScheme::Ed25519,
            KeyMaterial::Hmac(_) => SignatureScheme::Hmac,
        }
    }

    /// Returns the signer key id recorded in ledger entries
    /// (`ed25519:<fp>` or `hmac:<fp>`).
    #[must_use]
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Returns the key material published for verifiers.
    ///
    /// For Ed25519 this is the public key; for HMAC it is the per-install
    /// secret (verifiers of an HMAC install share the secret by design).
    #[must_use]
    pub fn published_key(&self) -> PublishedKey {
        match &self.material {
            KeyMaterial::Ed25519(key) => PublishedKey::Ed25519(key.verifying_key()),
            KeyMaterial::Hmac(secret) => PublishedKey::Hmac((**secret).to_vec()),
        }
    }

    /// Writes the published key next to the ledger at `path`.
    ///
    /// Format: a single text line `<scheme>:<hex>`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn publish_key(&self, path: impl AsRef<Path>) -> Result<PathBuf, SignerError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let line = match &self.material {
            KeyMaterial::Ed25519(key) => {
                format!("ed25519:{}\n", hex::encode(key.verifying_key().as_bytes()))
            },
            KeyMaterial::Hmac(secret) => format!("hmac:{}\n", hex::encode(&**secret)),
        };
        fs::write(&path, line)?;
        Ok(path)
    }
}

/// Errors parsing a published key file.
#[derive(Debug, Error)]
pub enum PublishedKeyError {
    /// The key file could not be read.
    #[error("cannot read public key file: {0}")]
    Io(#[from] std::io::Error),

    /// The key line is malformed or carries an unknown scheme.
    #[error("malformed public key material: {0}")]
    Malformed(String),
}

/// Key material published alongside the ledger for verification.
pub enum PublishedKey {
    /// An Ed25519 verifying key.
    Ed25519(VerifyingKey),
    /// The HMAC per-install secret.
    Hmac(Vec<u8>),
}

impl PublishedKey {
    /// Loads a published key from its on-disk `<scheme>:<hex>` line.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is unreadable or the line malformed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PublishedKeyError> {
        let text = fs::read_to_string(path)?;
        Self::parse(text.trim())
    }

    /// Parses a `<scheme>:<hex>` key line.
    ///
    /// # Errors
    ///
    /// Returns an error if the scheme is unknown or the hex invalid.
    pub fn parse(line: &str) -> Result<Self, PublishedKeyError> {
        let (scheme, hex_part) = line
            .split_once(':')
            .ok_or_else(|| PublishedKeyError::Malformed("missing scheme prefix".to_string()))?;
        let bytes = hex::decode(hex_part.trim())
            .map_err(|e| PublishedKeyError::Malformed(format!("invalid hex: {e}")))?;
        match scheme {
            "ed25519" => {
                let arr: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
                    PublishedKeyError::Malformed(format!(
                        "ed25519 public key must be 32 bytes, got {}",
                        bytes.len()
                    ))
                })?;
                let key = VerifyingKey::from_bytes(&arr).map_err(|e| {
                    PublishedKeyError::Malformed(format!("invalid ed25519 point: {e}"))
                })?;
                Ok(Self::Ed25519(key))
            },
            "hmac" => Ok(Self::Hmac(bytes)),
            other => Err(PublishedKeyError::Malformed(format!(
                "unknown scheme: {other}"
            ))),
        }
    }

    /// Returns which scheme this key verifies.
    #[must_use]
    pub const fn scheme(&self) -> SignatureScheme {
        match self {
            Self::Ed25519(_) => SignatureScheme::Ed25519,
            Self::Hmac(_) => SignatureScheme::Hmac,
        }
    }

    /// Returns the key id this key corresponds to.
    #[must_use]
    pub fn key_id(&self) -> String {
        match self {
            Self::Ed25519(key) => key_id_for(SignatureScheme::Ed25519, key.as_bytes()),
            Self::Hmac(secret) => key_id_for(SignatureScheme::Hmac, secret),
        }
    }

    /// Verifies a hex-encoded signature over `message`.
    #[must_use]
    pub fn verify(&self, message: &[u8], signature_hex: &str) -> bool {
        let Ok(sig_bytes) = hex::decode(signature_hex) else {
            return false;
        };
        match self {
            Self::Ed25519(key) => {
                let Ok(arr) = <[u8; 64]>::try_from(sig_bytes.as_slice()) else {
                    return false;
                };
                key.verify(message, &Signature::from_bytes(&arr)).is_ok()
            },
            Self::Hmac(secret) => {
                let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
                    return false;
                };
                mac.update(message);
                let expected = mac.finalize().into_bytes();
                bool::from(expected.as_slice().ct_eq(&sig_bytes))
            },
        }
    }
}

/// Derives a short fingerprint key id: `<scheme>:<first 16 hex of SHA-256>`.
fn key_id_for(scheme: SignatureScheme, key_bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key_bytes);
    let digest = hex::encode(hasher.finalize());
    format!("{}:{}", scheme.prefix(), &digest[..16])
}

fn ensure_private_dir(dir: &Path) -> Result<(), SignerError> {
    if !dir.exists() {
        fs::create_dir_all(dir)?;
        fs::set_permissions(dir, fs::Permissions::from_mode(0o700))?;
    }
    let mode = fs::metadata(dir)?.permissions().mode();
    if mode & 0o077 != 0 {
        return Err(SignerError::InsecurePermissions {
            path: dir.display().to_string(),
        });
    }
    Ok(())
}

fn check_permissions(path: &Path) -> Result<(), SignerError> {
    let mode = fs::metadata(path)?.permissions().mode();
    if mode & 0o077 != 0 {
        return Err(SignerError::InsecurePermissions {
            path: path.display().to_string(),
        });
    }
    Ok(())
}

fn write_secret_file(path: &Path, bytes: &[u8]) -> Result<(), SignerError> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(())
}
