//! Credential envelope encryption using AES-256-GCM
//!
//! Third-party API keys are stored encrypted at rest as a single string
//! envelope:
//!
//! ```text
//! base64(nonce) "." base64(ciphertext) "." base64(tag)
//! ```
//!
//! Every call to [`EnvelopeCodec::encrypt`] draws a fresh 96-bit nonce, so
//! encrypting the same plaintext twice yields different envelopes.
//!
//! ## Configuration
//!
//! The master key is loaded from the environment variable
//! `KEY_ENCRYPTION_SECRET`: a base64-encoded 32-byte key. The key is decoded
//! and validated when the codec is constructed, so a misconfigured key fails
//! at startup instead of on the first decrypt.

use base64::Engine;
use ring::aead::{self, Aad, BoundKey, Nonce, NonceSequence, UnboundKey, AES_256_GCM};
use ring::rand::{SecureRandom, SystemRandom};
use std::sync::Arc;
use tracing::{debug, error, instrument, warn};
use zeroize::Zeroizing;

use crate::errors::{Result, VaultError};

/// Environment variable holding the base64 master key
pub const MASTER_KEY_VAR: &str = "KEY_ENCRYPTION_SECRET";

/// Size of the AES-256 master key in bytes
pub const MASTER_KEY_SIZE: usize = 32;

/// Size of AES-256-GCM nonce in bytes
const NONCE_SIZE: usize = 12;

/// Size of AES-256-GCM tag in bytes
const TAG_SIZE: usize = 16;

/// Envelope segment delimiter
const DELIMITER: char = '.';

/// Configuration for the envelope codec
#[derive(Clone)]
pub struct EncryptionConfig {
    /// Base64-encoded 32-byte master encryption key
    pub master_key_base64: String,
}

impl EncryptionConfig {
    pub fn new(master_key_base64: impl Into<String>) -> Self {
        Self { master_key_base64: master_key_base64.into() }
    }

    /// Load configuration from `KEY_ENCRYPTION_SECRET`
    pub fn from_env() -> Result<Self> {
        let master_key_base64 = std::env::var(MASTER_KEY_VAR)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| {
                VaultError::config(format!(
                    "{} environment variable not set. \
                     Generate a key with: credvault gen-master-key",
                    MASTER_KEY_VAR
                ))
            })?;

        Ok(Self { master_key_base64 })
    }

    /// Deterministic configuration for tests (all bytes 0x42)
    #[cfg(test)]
    pub fn for_testing() -> Self {
        Self::new(base64::engine::general_purpose::STANDARD.encode([0x42u8; MASTER_KEY_SIZE]))
    }
}

impl std::fmt::Debug for EncryptionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionConfig").field("master_key_base64", &"[REDACTED]").finish()
    }
}

/// Single-use nonce sequence for AES-GCM
struct SingleNonce {
    nonce: Option<[u8; NONCE_SIZE]>,
}

impl SingleNonce {
    fn new(nonce_bytes: [u8; NONCE_SIZE]) -> Self {
        Self { nonce: Some(nonce_bytes) }
    }
}

impl NonceSequence for SingleNonce {
    fn advance(&mut self) -> std::result::Result<Nonce, ring::error::Unspecified> {
        self.nonce.take().map(Nonce::assume_unique_for_key).ok_or(ring::error::Unspecified)
    }
}

/// Decoded parts of an envelope
struct Envelope {
    nonce: [u8; NONCE_SIZE],
    ciphertext: Vec<u8>,
    tag: [u8; TAG_SIZE],
}

impl Envelope {
    fn parse(envelope: &str) -> Result<Self> {
        let mut segments = envelope.split(DELIMITER);
        let (nonce_b64, cipher_b64, tag_b64) = match (segments.next(), segments.next(), segments.next())
        {
            (Some(n), Some(c), Some(t)) if !n.is_empty() && !c.is_empty() && !t.is_empty() => {
                (n, c, t)
            }
            _ => {
                return Err(VaultError::format(
                    "expected three non-empty segments: nonce.ciphertext.tag",
                ))
            }
        };

        let nonce_bytes = decode_segment("nonce", nonce_b64)?;
        let ciphertext = decode_segment("ciphertext", cipher_b64)?;
        let tag_bytes = decode_segment("tag", tag_b64)?;

        let nonce: [u8; NONCE_SIZE] = nonce_bytes.as_slice().try_into().map_err(|_| {
            VaultError::format(format!(
                "invalid nonce length: expected {} bytes, got {} bytes",
                NONCE_SIZE,
                nonce_bytes.len()
            ))
        })?;
        let tag: [u8; TAG_SIZE] = tag_bytes.as_slice().try_into().map_err(|_| {
            VaultError::format(format!(
                "invalid tag length: expected {} bytes, got {} bytes",
                TAG_SIZE,
                tag_bytes.len()
            ))
        })?;

        Ok(Self { nonce, ciphertext, tag })
    }
}

fn decode_segment(name: &str, segment: &str) -> Result<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(segment)
        .map_err(|e| VaultError::format(format!("{} segment is not valid base64: {}", name, e)))
}

/// AES-256-GCM envelope codec bound to one master key
#[derive(Clone)]
pub struct EnvelopeCodec {
    key_bytes: Arc<Zeroizing<[u8; MASTER_KEY_SIZE]>>,
    rng: Arc<SystemRandom>,
}

impl EnvelopeCodec {
    /// Create a codec from configuration, validating the master key
    pub fn new(config: &EncryptionConfig) -> Result<Self> {
        let key_bytes = Zeroizing::new(
            base64::engine::general_purpose::STANDARD
                .decode(config.master_key_base64.trim())
                .map_err(|e| {
                    VaultError::config_with_source(
                        format!("Invalid base64 in {}", MASTER_KEY_VAR),
                        Box::new(e),
                    )
                })?,
        );

        if key_bytes.len() != MASTER_KEY_SIZE {
            return Err(VaultError::config(format!(
                "{} must be {} bytes (256 bits), got {} bytes",
                MASTER_KEY_VAR,
                MASTER_KEY_SIZE,
                key_bytes.len()
            )));
        }

        let mut key_array = Zeroizing::new([0u8; MASTER_KEY_SIZE]);
        key_array.copy_from_slice(&key_bytes);

        debug!("Envelope codec initialized");

        Ok(Self { key_bytes: Arc::new(key_array), rng: Arc::new(SystemRandom::new()) })
    }

    /// Create a codec from `KEY_ENCRYPTION_SECRET`
    pub fn from_env() -> Result<Self> {
        Self::new(&EncryptionConfig::from_env()?)
    }

    /// Generate a fresh random master key, base64-encoded
    pub fn generate_master_key() -> Result<String> {
        let mut key = Zeroizing::new([0u8; MASTER_KEY_SIZE]);
        SystemRandom::new()
            .fill(&mut key[..])
            .map_err(|_| VaultError::internal("Failed to generate random master key"))?;
        Ok(base64::engine::general_purpose::STANDARD.encode(&key[..]))
    }

    fn unbound_key(&self) -> Result<UnboundKey> {
        UnboundKey::new(&AES_256_GCM, &self.key_bytes[..]).map_err(|_| {
            error!("Failed to create AES-256-GCM key");
            VaultError::internal("Failed to create encryption key")
        })
    }

    /// Encrypt a plaintext secret into a `nonce.ciphertext.tag` envelope.
    ///
    /// Empty plaintext is rejected: its ciphertext segment would be empty,
    /// which [`EnvelopeCodec::decrypt`] treats as malformed.
    #[instrument(skip(self, plaintext), fields(plaintext_len = plaintext.len()))]
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        if plaintext.is_empty() {
            return Err(VaultError::validation("cannot encrypt an empty secret"));
        }

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        self.rng.fill(&mut nonce_bytes).map_err(|_| {
            error!("Failed to generate random nonce");
            VaultError::internal("Failed to generate random nonce for encryption")
        })?;

        let mut sealing_key = aead::SealingKey::new(self.unbound_key()?, SingleNonce::new(nonce_bytes));

        let mut ciphertext = plaintext.as_bytes().to_vec();
        let tag = sealing_key.seal_in_place_separate_tag(Aad::empty(), &mut ciphertext).map_err(|_| {
            error!("Encryption failed");
            VaultError::internal("Failed to encrypt secret")
        })?;

        let engine = base64::engine::general_purpose::STANDARD;
        let envelope = format!(
            "{}{}{}{}{}",
            engine.encode(nonce_bytes),
            DELIMITER,
            engine.encode(&ciphertext),
            DELIMITER,
            engine.encode(tag.as_ref())
        );

        debug!(envelope_len = envelope.len(), "Encrypted secret");
        Ok(envelope)
    }

    /// Decrypt and authenticate a `nonce.ciphertext.tag` envelope
    #[instrument(skip(self, envelope), fields(envelope_len = envelope.len()))]
    pub fn decrypt(&self, envelope: &str) -> Result<String> {
        let Envelope { nonce, ciphertext, tag } = Envelope::parse(envelope)?;

        let mut opening_key = aead::OpeningKey::new(self.unbound_key()?, SingleNonce::new(nonce));

        let mut in_out = ciphertext;
        in_out.extend_from_slice(&tag);

        let decrypted = opening_key.open_in_place(Aad::empty(), &mut in_out).map_err(|_| {
            warn!("Decryption failed - possible tampering or wrong master key");
            VaultError::authentication("authentication tag did not verify")
        })?;

        let plaintext = String::from_utf8(decrypted.to_vec())
            .map_err(|_| VaultError::format("decrypted secret is not valid UTF-8"))?;

        debug!(plaintext_len = plaintext.len(), "Decrypted secret");
        Ok(plaintext)
    }
}

impl std::fmt::Debug for EnvelopeCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvelopeCodec").field("key_bytes", &"[REDACTED]").finish()
    }
}
