//! WeCom callback cryptography: SHA1 signatures, AES-256-CBC envelopes and
//! the protocol's bespoke framing.
//!
//! The encrypted envelope plaintext is laid out as
//! `[16 random bytes][u32 big-endian msg len][msg][receive id]`, padded with
//! PKCS#7 at a block size of 32 — a protocol constant, not the AES block
//! size — and encrypted with IV = the first 16 bytes of the 32-byte key.

use aes::Aes256;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use cbc::cipher::{block_padding::NoPadding, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;
use serde::Serialize;
use sha1::{Digest, Sha1};
use thiserror::Error;

use crate::message::{EncryptedRequest, EncryptedResponse, Message};

/// PKCS#7 padding grain mandated by the WeCom protocol.
const PAD_BLOCK_SIZE: usize = 32;

/// AES cipher block size; ciphertext length must be a multiple of this.
const AES_BLOCK_SIZE: usize = 16;

/// Offset of the message body inside the unpadded plaintext:
/// 16 random bytes plus the 4-byte length prefix.
const MSG_OFFSET: usize = 20;

#[derive(Debug, Error)]
pub enum CryptError {
    #[error("invalid signature")]
    InvalidSignature,
    #[error("invalid aes key")]
    InvalidAesKey,
    #[error("invalid padding")]
    InvalidPadding,
    #[error("invalid ciphertext length")]
    InvalidCipherLength,
    #[error("base64 decode: {0}")]
    Decode(#[source] base64::DecodeError),
    #[error("invalid envelope framing")]
    InvalidFraming,
    #[error("invalid message json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Immutable cryptographic context for one bot deployment.
#[derive(Clone)]
pub struct Crypt {
    token: String,
    aes_key: [u8; 32],
    receive_id: String,
}

impl Crypt {
    /// Build a context from the callback Token and the 43-character
    /// Base64-without-padding EncodingAESKey. `receive_id` is the corp id for
    /// enterprise apps, the suite id for third-party events, or empty for
    /// personal third-party apps.
    pub fn new(token: &str, encoding_aes_key: &str, receive_id: &str) -> Result<Self, CryptError> {
        let aes_key = decode_aes_key(encoding_aes_key)?;
        Ok(Self {
            token: token.to_string(),
            aes_key,
            receive_id: receive_id.to_string(),
        })
    }

    /// Handle the GET URL-verification exchange: check the signature over
    /// `echostr` and return the decrypted inner payload.
    ///
    /// Query parsing turns a `+` in the wire value into a space; since
    /// standard Base64 never contains spaces, the retry restores them and
    /// decrypts whichever form the signature matched.
    pub fn verify_url(
        &self,
        msg_signature: &str,
        timestamp: &str,
        nonce: &str,
        echostr: &str,
    ) -> Result<Vec<u8>, CryptError> {
        if self.signature_matches(msg_signature, timestamp, nonce, echostr) {
            return self.decrypt(echostr);
        }

        let repaired = echostr.replace(' ', "+");
        if self.signature_matches(msg_signature, timestamp, nonce, &repaired) {
            return self.decrypt(&repaired);
        }

        Err(CryptError::InvalidSignature)
    }

    /// Verify and decrypt a POST callback body, parsing the plaintext JSON
    /// into a [`Message`].
    pub fn decrypt_message(
        &self,
        msg_signature: &str,
        timestamp: &str,
        nonce: &str,
        req: &EncryptedRequest,
    ) -> Result<Message, CryptError> {
        if !self.signature_matches(msg_signature, timestamp, nonce, &req.encrypt) {
            return Err(CryptError::InvalidSignature);
        }

        let plain = self.decrypt(&req.encrypt)?;
        let msg: Message = serde_json::from_slice(&plain)?;
        tracing::debug!(
            "decrypted inbound callback: {}",
            String::from_utf8_lossy(&plain)
        );
        Ok(msg)
    }

    /// Serialize a reply payload, encrypt it and assemble the signed
    /// response envelope.
    pub fn encrypt_response<T: Serialize + ?Sized>(
        &self,
        payload: &T,
        timestamp: &str,
        nonce: &str,
    ) -> Result<EncryptedResponse, CryptError> {
        let body = serde_json::to_vec(payload)?;
        tracing::debug!("outbound reply plaintext: {}", String::from_utf8_lossy(&body));

        let encrypted = self.encrypt(&body)?;
        let signature = calc_signature(&self.token, timestamp, nonce, &encrypted);
        Ok(EncryptedResponse {
            encrypt: encrypted,
            msg_signature: signature,
            timestamp: timestamp.to_string(),
            nonce: nonce.to_string(),
        })
    }

    /// Encrypt raw plaintext into the Base64 envelope form.
    pub fn encrypt(&self, plain: &[u8]) -> Result<String, CryptError> {
        let mut random = [0u8; 16];
        rand::rng().fill_bytes(&mut random);

        let mut raw =
            Vec::with_capacity(MSG_OFFSET + plain.len() + self.receive_id.len() + PAD_BLOCK_SIZE);
        raw.extend_from_slice(&random);
        raw.extend_from_slice(&(plain.len() as u32).to_be_bytes());
        raw.extend_from_slice(plain);
        raw.extend_from_slice(self.receive_id.as_bytes());

        let pad_len = PAD_BLOCK_SIZE - raw.len() % PAD_BLOCK_SIZE;
        raw.extend(std::iter::repeat(pad_len as u8).take(pad_len));

        let iv = &self.aes_key[..AES_BLOCK_SIZE];
        let len = raw.len();
        let encrypted = cbc::Encryptor::<Aes256>::new((&self.aes_key).into(), iv.into())
            .encrypt_padded_mut::<NoPadding>(&mut raw, len)
            .map_err(|_| CryptError::InvalidCipherLength)?;

        Ok(BASE64.encode(encrypted))
    }

    /// Decrypt a Base64 envelope and return the inner message bytes.
    ///
    /// The trailing receive id is deliberately not compared against the
    /// configured one: smart-bot callbacks legitimately carry an empty id.
    pub fn decrypt(&self, cipher_text: &str) -> Result<Vec<u8>, CryptError> {
        let cipher_data = BASE64
            .decode(cipher_text.trim())
            .map_err(CryptError::Decode)?;
        if cipher_data.is_empty() || cipher_data.len() % AES_BLOCK_SIZE != 0 {
            return Err(CryptError::InvalidCipherLength);
        }

        let plain = self.decrypt_blocks(cipher_data)?;
        let plain = strip_pkcs7(&plain)?;
        if plain.len() < MSG_OFFSET {
            return Err(CryptError::InvalidFraming);
        }

        let msg_len = u32::from_be_bytes([plain[16], plain[17], plain[18], plain[19]]) as usize;
        let msg_end = MSG_OFFSET
            .checked_add(msg_len)
            .ok_or(CryptError::InvalidFraming)?;
        if msg_end > plain.len() {
            return Err(CryptError::InvalidFraming);
        }

        Ok(plain[MSG_OFFSET..msg_end].to_vec())
    }

    /// Decrypt the raw binary returned by the WeCom file-download endpoint:
    /// same cipher and padding as the envelope, but no Base64 and no framing.
    pub fn decrypt_downloaded_file(&self, cipher_data: &[u8]) -> Result<Vec<u8>, CryptError> {
        if cipher_data.is_empty() || cipher_data.len() % AES_BLOCK_SIZE != 0 {
            return Err(CryptError::InvalidCipherLength);
        }

        let plain = self.decrypt_blocks(cipher_data.to_vec())?;
        Ok(strip_pkcs7(&plain)?.to_vec())
    }

    fn decrypt_blocks(&self, mut buf: Vec<u8>) -> Result<Vec<u8>, CryptError> {
        let iv = &self.aes_key[..AES_BLOCK_SIZE];
        let plain = cbc::Decryptor::<Aes256>::new((&self.aes_key).into(), iv.into())
            .decrypt_padded_mut::<NoPadding>(&mut buf)
            .map_err(|_| CryptError::InvalidCipherLength)?;
        let len = plain.len();
        buf.truncate(len);
        Ok(buf)
    }

    fn signature_matches(
        &self,
        msg_signature: &str,
        timestamp: &str,
        nonce: &str,
        data: &str,
    ) -> bool {
        let expected = calc_signature(&self.token, timestamp, nonce, data);
        expected.eq_ignore_ascii_case(msg_signature.trim())
    }
}

/// Compute the callback signature: lexicographically sort token, timestamp,
/// nonce and data, concatenate, SHA1, lowercase hex.
pub fn calc_signature(token: &str, timestamp: &str, nonce: &str, data: &str) -> String {
    let mut parts = [token, timestamp, nonce, data];
    parts.sort_unstable();

    let mut sha = Sha1::new();
    sha.update(parts.concat());
    hex::encode(sha.finalize())
}

/// Decode the 43-character Base64-without-padding EncodingAESKey into the
/// 32-byte AES key.
fn decode_aes_key(encoding_key: &str) -> Result<[u8; 32], CryptError> {
    let encoding_key = encoding_key.trim();
    if encoding_key.is_empty() {
        return Err(CryptError::InvalidAesKey);
    }

    let padding = (4 - encoding_key.len() % 4) % 4;
    let padded = format!("{}{}", encoding_key, "=".repeat(padding));
    let engine = base64::engine::GeneralPurpose::new(
        &base64::alphabet::STANDARD,
        base64::engine::general_purpose::GeneralPurposeConfig::new()
            .with_decode_allow_trailing_bits(true),
    );
    let raw = engine
        .decode(padded)
        .map_err(|_| CryptError::InvalidAesKey)?;

    raw.try_into().map_err(|_| CryptError::InvalidAesKey)
}

fn strip_pkcs7(data: &[u8]) -> Result<&[u8], CryptError> {
    let Some(&last) = data.last() else {
        return Err(CryptError::InvalidPadding);
    };
    let pad_len = last as usize;
    if pad_len == 0 || pad_len > PAD_BLOCK_SIZE || pad_len > data.len() {
        return Err(CryptError::InvalidPadding);
    }
    if data[data.len() - pad_len..].iter().any(|&b| b != last) {
        return Err(CryptError::InvalidPadding);
    }

    Ok(&data[..data.len() - pad_len])
}
