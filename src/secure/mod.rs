//! Authenticated encryption for the companion-app command channel.
//!
//! An envelope is a JSON record `{"signature", "message", "iv"}`:
//!
//! - `message`: base64 of AES-CBC ciphertext (PKCS#7 padded plaintext)
//! - `iv`: base64 of the 16-byte IV, fresh for every envelope
//! - `signature`: hex HMAC-SHA256 of the raw ciphertext under the signing key
//!
//! Verification happens before decryption. [`open`] never fails outward: a bad
//! envelope yields an empty string, which callers treat as "no command".

use aes::{Aes128, Aes192, Aes256};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::warn;

use crate::config::ChannelConfig;
use crate::error::{ScanError, ScanResult};

type HmacSha256 = Hmac<Sha256>;

const IV_LEN: usize = 16;

/// Signing and encryption keys shared with the companion app.
#[derive(Clone)]
pub struct ChannelKeys {
    sign_key: Vec<u8>,
    encrypt_key: Vec<u8>,
}

impl std::fmt::Debug for ChannelKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelKeys")
            .field("encrypt_key_len", &self.encrypt_key.len())
            .finish_non_exhaustive()
    }
}

impl ChannelKeys {
    pub fn new(sign_key: impl Into<Vec<u8>>, encrypt_key: impl Into<Vec<u8>>) -> ScanResult<Self> {
        let encrypt_key = encrypt_key.into();
        if ![16, 24, 32].contains(&encrypt_key.len()) {
            return Err(ScanError::Crypto(format!(
                "encryption key must be 16, 24 or 32 bytes, got {}",
                encrypt_key.len()
            )));
        }
        Ok(Self {
            sign_key: sign_key.into(),
            encrypt_key,
        })
    }

    pub fn from_config(config: &ChannelConfig) -> ScanResult<Self> {
        Self::new(config.sign_key.as_bytes(), config.encrypt_key.as_bytes())
    }

    fn mac(&self) -> ScanResult<HmacSha256> {
        HmacSha256::new_from_slice(&self.sign_key)
            .map_err(|e| ScanError::Crypto(format!("invalid signing key: {e}")))
    }
}

/// Wire form of a sealed command or reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub signature: String,
    pub message: String,
    pub iv: String,
}

fn encrypt(key: &[u8], iv: &[u8], plaintext: &[u8]) -> ScanResult<Vec<u8>> {
    let bad_key = |e: cbc::cipher::InvalidLength| ScanError::Crypto(format!("cipher setup failed: {e}"));
    let ciphertext = match key.len() {
        16 => cbc::Encryptor::<Aes128>::new_from_slices(key, iv)
            .map_err(bad_key)?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        24 => cbc::Encryptor::<Aes192>::new_from_slices(key, iv)
            .map_err(bad_key)?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        32 => cbc::Encryptor::<Aes256>::new_from_slices(key, iv)
            .map_err(bad_key)?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        n => return Err(ScanError::Crypto(format!("unsupported key length {n}"))),
    };
    Ok(ciphertext)
}

fn decrypt(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> ScanResult<Vec<u8>> {
    let bad_key = |e: cbc::cipher::InvalidLength| ScanError::Crypto(format!("cipher setup failed: {e}"));
    let bad_pad = |_: cbc::cipher::block_padding::UnpadError| ScanError::Crypto("invalid padding".to_string());
    match key.len() {
        16 => cbc::Decryptor::<Aes128>::new_from_slices(key, iv)
            .map_err(bad_key)?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(bad_pad),
        24 => cbc::Decryptor::<Aes192>::new_from_slices(key, iv)
            .map_err(bad_key)?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(bad_pad),
        32 => cbc::Decryptor::<Aes256>::new_from_slices(key, iv)
            .map_err(bad_key)?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(bad_pad),
        n => Err(ScanError::Crypto(format!("unsupported key length {n}"))),
    }
}

/// Encrypt and sign `plaintext`, returning the JSON envelope text.
pub fn seal(plaintext: &str, keys: &ChannelKeys) -> ScanResult<String> {
    let mut iv = [0u8; IV_LEN];
    rand::thread_rng().fill_bytes(&mut iv);

    let ciphertext = encrypt(&keys.encrypt_key, &iv, plaintext.as_bytes())?;
    let mut mac = keys.mac()?;
    mac.update(&ciphertext);
    let signature = hex::encode(mac.finalize().into_bytes());

    let envelope = CommandEnvelope {
        signature,
        message: BASE64.encode(&ciphertext),
        iv: BASE64.encode(iv),
    };
    serde_json::to_string(&envelope)
        .map_err(|e| ScanError::Crypto(format!("envelope encode failed: {e}")))
}

/// Verify and decrypt an envelope. Any failure is logged and yields an empty
/// string.
pub fn open(envelope: &str, keys: &ChannelKeys) -> String {
    match try_open(envelope, keys) {
        Ok(plaintext) => plaintext,
        Err(e) => {
            warn!(error = %e, "rejected command envelope");
            String::new()
        }
    }
}

/// [`open`] with the failure reason kept.
pub fn try_open(envelope: &str, keys: &ChannelKeys) -> ScanResult<String> {
    let envelope: CommandEnvelope = serde_json::from_str(envelope)
        .map_err(|e| ScanError::Crypto(format!("malformed envelope: {e}")))?;

    let ciphertext = BASE64
        .decode(envelope.message.as_bytes())
        .map_err(|e| ScanError::Crypto(format!("message is not base64: {e}")))?;
    let iv = BASE64
        .decode(envelope.iv.as_bytes())
        .map_err(|e| ScanError::Crypto(format!("iv is not base64: {e}")))?;
    let signature = hex::decode(envelope.signature.trim())
        .map_err(|e| ScanError::Crypto(format!("signature is not hex: {e}")))?;

    let mut mac = keys.mac()?;
    mac.update(&ciphertext);
    mac.verify_slice(&signature)
        .map_err(|_| ScanError::Crypto("signature mismatch".to_string()))?;

    if iv.len() != IV_LEN {
        return Err(ScanError::Crypto(format!(
            "iv must be {IV_LEN} bytes, got {}",
            iv.len()
        )));
    }
    let plaintext = decrypt(&keys.encrypt_key, &iv, &ciphertext)?;
    String::from_utf8(plaintext).map_err(|_| ScanError::Crypto("plaintext is not UTF-8".to_string()))
}
