//! # Envelope Encryption
//!
//! Optional encryption applied to a whole envelope before it is framed.
//!
//! Two interchangeable providers sit behind [`CryptoProvider`]:
//! - [`SymmetricCrypto`]: AES-256-CBC with PKCS#7 padding, fixed key + IV
//! - [`AsymmetricCrypto`]: RSA with PKCS#1 v1.5 padding, block-wise for long payloads
//!
//! Key material is fixed for the lifetime of a connection; nothing is rotated per
//! message. Both peers must be configured with the same provider and key material.

mod asymmetric;
mod symmetric;

pub use asymmetric::{AsymmetricCrypto, DEFAULT_RSA_BITS};
pub use symmetric::{SymmetricCrypto, IV_LEN, KEY_LEN, PBKDF2_ROUNDS};

use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Encrypt/decrypt capability over opaque byte blocks.
///
/// Implementations must satisfy `decrypt(encrypt(x)) == x` for any `x`.
pub trait CryptoProvider: Send + Sync {
    fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>>;

    fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

/// Crypto selection as it appears in configuration files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum CryptoConfig {
    /// Envelopes travel in the clear.
    #[default]
    None,
    /// AES with base64 key and IV.
    Symmetric { key: String, iv: String },
    /// AES with key and IV stretched from a password and salt.
    Password { password: String, salt: String },
    /// RSA with PKCS#8 PEM keys. The private key may be omitted on a peer that only sends.
    Asymmetric {
        public_key: String,
        #[serde(default)]
        private_key: Option<String>,
    },
}

impl CryptoConfig {
    /// Instantiate the configured provider, if any.
    pub fn build(&self) -> Result<Option<Arc<dyn CryptoProvider>>> {
        let provider: Arc<dyn CryptoProvider> = match self {
            CryptoConfig::None => return Ok(None),
            CryptoConfig::Symmetric { key, iv } => Arc::new(SymmetricCrypto::from_base64(key, iv)?),
            CryptoConfig::Password { password, salt } => {
                Arc::new(SymmetricCrypto::from_password(password, salt))
            }
            CryptoConfig::Asymmetric {
                public_key,
                private_key,
            } => Arc::new(AsymmetricCrypto::from_pem(
                public_key,
                private_key.as_deref(),
            )?),
        };
        Ok(Some(provider))
    }

    /// Check the shape of the key material without deriving or parsing keys.
    ///
    /// Symmetric keys are decoded and length-checked, passwords must be non-empty
    /// and RSA keys must carry PKCS#8 PEM armor. A PEM body that is armored but
    /// malformed is only caught by [`build`](Self::build).
    pub fn check(&self) -> Result<()> {
        match self {
            CryptoConfig::None => Ok(()),
            CryptoConfig::Symmetric { key, iv } => symmetric::decode_material(key, iv).map(drop),
            CryptoConfig::Password { password, .. } if password.is_empty() => Err(
                ProtocolError::ConfigError("password cannot be empty".to_string()),
            ),
            CryptoConfig::Password { .. } => Ok(()),
            CryptoConfig::Asymmetric {
                public_key,
                private_key,
            } => asymmetric::check_pem_armor(public_key, private_key.as_deref()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, CryptoConfig::None)
    }
}
