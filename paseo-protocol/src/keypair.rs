//! The daemon's long-lived relay keypair (spec.md §3: "DaemonKeyPair").
//! Pure data: encoding/decoding only. Minting, disk persistence, and the
//! X25519/ChaCha20-Poly1305 handshake that actually uses these bytes live in
//! `paseo-daemon` (this crate has no I/O).

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

/// On-disk schema version for `daemon-keypair.json` (spec.md §6).
pub const DAEMON_KEYPAIR_VERSION: u8 = 2;

#[derive(Debug, Error)]
pub enum KeyPairError {
    #[error("key is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("key must be exactly 32 bytes, got {0}")]
    WrongLength(usize),
    #[error("unsupported daemon-keypair.json version: {0}")]
    UnsupportedVersion(u8),
}

/// `{v, publicKeyB64, secretKeyB64}`, matching `daemon-keypair.json`'s wire
/// shape exactly (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonKeyPair {
    #[serde(rename = "v")]
    pub version: u8,
    #[serde(rename = "publicKeyB64")]
    pub public_key_b64: String,
    #[serde(rename = "secretKeyB64")]
    pub secret_key_b64: String,
}

impl DaemonKeyPair {
    pub fn from_raw(public: [u8; 32], secret: [u8; 32]) -> Self {
        Self {
            version: DAEMON_KEYPAIR_VERSION,
            public_key_b64: BASE64.encode(public),
            secret_key_b64: BASE64.encode(secret),
        }
    }

    pub fn public_key_bytes(&self) -> Result<[u8; 32], KeyPairError> {
        decode_32(&self.public_key_b64)
    }

    pub fn secret_key_bytes(&self) -> Result<[u8; 32], KeyPairError> {
        decode_32(&self.secret_key_b64)
    }

    pub fn check_version(&self) -> Result<(), KeyPairError> {
        if self.version != DAEMON_KEYPAIR_VERSION {
            return Err(KeyPairError::UnsupportedVersion(self.version));
        }
        Ok(())
    }
}

fn decode_32(encoded: &str) -> Result<[u8; 32], KeyPairError> {
    let bytes = BASE64.decode(encoded)?;
    let len = bytes.len();
    bytes.try_into().map_err(|_| KeyPairError::WrongLength(len))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_base64() {
        let pair = DaemonKeyPair::from_raw([1u8; 32], [2u8; 32]);
        assert_eq!(pair.public_key_bytes().unwrap(), [1u8; 32]);
        assert_eq!(pair.secret_key_bytes().unwrap(), [2u8; 32]);
        assert!(pair.check_version().is_ok());
    }

    #[test]
    fn rejects_wrong_length() {
        let pair = DaemonKeyPair {
            version: DAEMON_KEYPAIR_VERSION,
            public_key_b64: BASE64.encode([0u8; 16]),
            secret_key_b64: BASE64.encode([0u8; 32]),
        };
        assert!(matches!(
            pair.public_key_bytes(),
            Err(KeyPairError::WrongLength(16))
        ));
    }
}
