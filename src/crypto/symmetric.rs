use super::CryptoProvider;
use crate::error::{constants, ProtocolError, Result};
use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// AES-256 key length in bytes
pub const KEY_LEN: usize = 32;

/// CBC initialization vector length in bytes
pub const IV_LEN: usize = 16;

/// PBKDF2-HMAC-SHA256 iteration count for password-derived keys
pub const PBKDF2_ROUNDS: u32 = 100_000;

/// AES-256-CBC with PKCS#7 padding over a fixed key and IV.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricCrypto {
    key: [u8; KEY_LEN],
    iv: [u8; IV_LEN],
}

impl SymmetricCrypto {
    pub fn new(key: [u8; KEY_LEN], iv: [u8; IV_LEN]) -> Self {
        Self { key, iv }
    }

    /// Random key and IV from the operating system's entropy source.
    pub fn generate() -> Result<Self> {
        let mut key = [0u8; KEY_LEN];
        let mut iv = [0u8; IV_LEN];
        getrandom::fill(&mut key)
            .and_then(|()| getrandom::fill(&mut iv))
            .map_err(|e| ProtocolError::Custom(format!("entropy source failed: {e}")))?;
        let crypto = Self::new(key, iv);
        key.zeroize();
        Ok(crypto)
    }

    /// Stretch a password and salt into key + IV.
    ///
    /// The first 32 derived bytes become the key, the next 16 the IV, so peers
    /// sharing a password and salt derive identical material.
    pub fn from_password(password: &str, salt: &str) -> Self {
        let mut derived = [0u8; KEY_LEN + IV_LEN];
        pbkdf2_hmac::<Sha256>(
            password.as_bytes(),
            salt.as_bytes(),
            PBKDF2_ROUNDS,
            &mut derived,
        );

        let mut key = [0u8; KEY_LEN];
        let mut iv = [0u8; IV_LEN];
        key.copy_from_slice(&derived[..KEY_LEN]);
        iv.copy_from_slice(&derived[KEY_LEN..]);
        derived.zeroize();

        let crypto = Self::new(key, iv);
        key.zeroize();
        crypto
    }

    /// Key and IV exported earlier with [`key_base64`](Self::key_base64) / [`iv_base64`](Self::iv_base64).
    pub fn from_base64(key: &str, iv: &str) -> Result<Self> {
        let (key_bytes, iv_bytes) = decode_material(key, iv)?;
        let mut crypto = Self::new([0u8; KEY_LEN], [0u8; IV_LEN]);
        crypto.key.copy_from_slice(&key_bytes);
        crypto.iv.copy_from_slice(&iv_bytes);
        Ok(crypto)
    }

    pub fn key_base64(&self) -> String {
        STANDARD.encode(self.key)
    }

    pub fn iv_base64(&self) -> String {
        STANDARD.encode(self.iv)
    }
}

/// Decode base64 key and IV, checking both lengths.
pub(super) fn decode_material(key: &str, iv: &str) -> Result<(Zeroizing<Vec<u8>>, Vec<u8>)> {
    let key_bytes = STANDARD
        .decode(key)
        .map(Zeroizing::new)
        .map_err(|e| ProtocolError::ConfigError(format!("invalid base64 key: {e}")))?;
    let iv_bytes = STANDARD
        .decode(iv)
        .map_err(|e| ProtocolError::ConfigError(format!("invalid base64 IV: {e}")))?;

    if key_bytes.len() != KEY_LEN || iv_bytes.len() != IV_LEN {
        return Err(ProtocolError::ConfigError(constants::ERR_KEY_LENGTH.into()));
    }
    Ok((key_bytes, iv_bytes))
}

impl CryptoProvider for SymmetricCrypto {
    fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        let cipher = Aes256CbcEnc::new_from_slices(&self.key, &self.iv)
            .map_err(|_| ProtocolError::EncryptionFailure)?;
        Ok(cipher.encrypt_padded_vec_mut::<Pkcs7>(data))
    }

    fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        let cipher = Aes256CbcDec::new_from_slices(&self.key, &self.iv)
            .map_err(|_| ProtocolError::DecryptionFailure)?;
        cipher
            .decrypt_padded_vec_mut::<Pkcs7>(data)
            .map_err(|_| ProtocolError::DecryptionFailure)
    }

    fn name(&self) -> &'static str {
        "aes-256-cbc"
    }
}

impl std::fmt::Debug for SymmetricCrypto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymmetricCrypto").finish_non_exhaustive()
    }
}
