//! X25519 key agreement + ChaCha20-Poly1305 framing for the relay
//! transport's E2EE data channel (spec.md §4.1, §4.10). A client dialing
//! the relay already holds the daemon's static public key (from the
//! `ConnectionOffer` it was paired with); the daemon holds its static
//! secret. Each data-socket handshake uses a fresh client-side ephemeral
//! key, so a single compromised session doesn't compromise the daemon's
//! long-lived identity beyond that session.
//!
//! Wire shape after the handshake: `nonce(12 bytes) || ciphertext`, one
//! frame per protocol message — the same framing discipline C1 already
//! applies to local-transport JSON text frames, just wrapped in AEAD.

use chacha20poly1305::AeadCore;
use chacha20poly1305::ChaCha20Poly1305;
use chacha20poly1305::KeyInit;
use chacha20poly1305::Nonce;
use chacha20poly1305::aead::Aead;
use rand::RngCore;
use sha2::Digest;
use sha2::Sha256;
use thiserror::Error;
use x25519_dalek::PublicKey;
use x25519_dalek::StaticSecret;

const NONCE_LEN: usize = 12;
const HANDSHAKE_INFO: &[u8] = b"paseo-relay-v1";

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("handshake payload must be exactly 32 bytes, got {0}")]
    BadHandshakeLength(usize),
    #[error("frame too short to contain a nonce")]
    FrameTooShort,
    #[error("encryption failed")]
    SealFailed,
    #[error("decryption failed")]
    DecryptFailed,
}

/// Derive the symmetric cipher from our static secret and the peer's
/// (ephemeral) public key. X25519 Diffie-Hellman is symmetric:
/// `dh(our_secret, their_public) == dh(their_secret, our_public)`, so both
/// ends of the handshake derive the same key without exchanging it.
fn derive_cipher(
    our_secret: &StaticSecret,
    their_public_bytes: &[u8],
) -> Result<ChaCha20Poly1305, CryptoError> {
    let bytes: [u8; 32] = their_public_bytes
        .try_into()
        .map_err(|_| CryptoError::BadHandshakeLength(their_public_bytes.len()))?;
    let their_public = PublicKey::from(bytes);
    let shared = our_secret.diffie_hellman(&their_public);

    let mut hasher = Sha256::new();
    hasher.update(shared.as_bytes());
    hasher.update(HANDSHAKE_INFO);
    let key_bytes = hasher.finalize();

    ChaCha20Poly1305::new_from_slice(&key_bytes).map_err(|_| CryptoError::SealFailed)
}

/// The daemon side of the handshake: given the first frame received on a
/// freshly dialed data socket (the client's ephemeral public key), derive
/// the shared cipher.
pub fn respond_to_handshake(
    daemon_static_secret: &StaticSecret,
    client_ephemeral_public_key: &[u8],
) -> Result<ChaCha20Poly1305, CryptoError> {
    derive_cipher(daemon_static_secret, client_ephemeral_public_key)
}

/// Encrypt one protocol frame for the wire.
pub fn seal(cipher: &ChaCha20Poly1305, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| CryptoError::SealFailed)?;
    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend(ciphertext);
    Ok(out)
}

/// Decrypt one wire frame back into a protocol frame.
pub fn open(cipher: &ChaCha20Poly1305, wire: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if wire.len() < NONCE_LEN {
        return Err(CryptoError::FrameTooShort);
    }
    let (nonce_bytes, ciphertext) = wire.split_at(NONCE_LEN);
    let nonce = Nonce::from_slice(nonce_bytes);
    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CryptoError::DecryptFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_secret_matches_on_both_ends() {
        let daemon_secret = StaticSecret::random();
        let client_secret = StaticSecret::random();
        let client_public = PublicKey::from(&client_secret);
        let daemon_public = PublicKey::from(&daemon_secret);

        let daemon_cipher = derive_cipher(&daemon_secret, client_public.as_bytes()).unwrap();
        let client_cipher = derive_cipher(&client_secret, daemon_public.as_bytes()).unwrap();

        let sealed = seal(&daemon_cipher, b"hello from daemon").unwrap();
        let opened = open(&client_cipher, &sealed).unwrap();
        assert_eq!(opened, b"hello from daemon");
    }

    #[test]
    fn tampered_frame_fails_to_decrypt() {
        let daemon_secret = StaticSecret::random();
        let client_secret = StaticSecret::random();
        let client_public = PublicKey::from(&client_secret);
        let cipher = derive_cipher(&daemon_secret, client_public.as_bytes()).unwrap();
        let mut sealed = seal(&cipher, b"payload").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0xFF;
        assert!(open(&cipher, &sealed).is_err());
    }

    #[test]
    fn rejects_undersized_handshake_payload() {
        let secret = StaticSecret::random();
        assert!(derive_cipher(&secret, &[0u8; 16]).is_err());
    }
}
