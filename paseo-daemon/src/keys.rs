//! C10: mint-or-load the daemon's long-lived identity (spec.md §4.10, §6).
//! Pure-data encode/decode for `ServerId`/`DaemonKeyPair` lives in
//! `paseo-protocol`; this module supplies the disk I/O and the 0600-mode
//! keypair file that crate's own doc comment explicitly defers here,
//! matching the same restrictive-permission treatment other local
//! credential stores in this codebase apply to on-disk auth material.

use std::path::Path;

use paseo_protocol::ServerId;
use paseo_protocol::keypair::DaemonKeyPair;
use paseo_protocol::keypair::KeyPairError;
use thiserror::Error;
use x25519_dalek::PublicKey;
use x25519_dalek::StaticSecret;

const SERVER_ID_FILE: &str = "server-id";
const KEYPAIR_FILE: &str = "daemon-keypair.json";

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    KeyPair(#[from] KeyPairError),
}

/// The daemon's stable identity: its `ServerId` and X25519 keypair, decoded
/// from `paseo-protocol`'s wire representation into usable key material.
pub struct Identity {
    pub server_id: ServerId,
    pub keypair: DaemonKeyPair,
    secret: StaticSecret,
    public: PublicKey,
}

impl Identity {
    pub fn secret_key(&self) -> &StaticSecret {
        &self.secret
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }
}

/// Load `server-id`/`daemon-keypair.json` from `paseo_home`, minting both on
/// first run. Never re-mints an existing keypair across restarts — the
/// same "a new ServerId/keypair is never minted on reconnect" invariant
/// spec.md §4.1 states for relay reconnects applies across daemon
/// restarts too, since both are read from disk once and reused.
pub fn load_or_mint(paseo_home: &Path) -> Result<Identity, IdentityError> {
    std::fs::create_dir_all(paseo_home)?;

    let server_id = load_or_mint_server_id(paseo_home)?;
    let keypair = load_or_mint_keypair(paseo_home)?;
    keypair.check_version()?;

    let secret = StaticSecret::from(keypair.secret_key_bytes()?);
    let public = PublicKey::from(keypair.public_key_bytes()?);

    Ok(Identity {
        server_id,
        keypair,
        secret,
        public,
    })
}

fn load_or_mint_server_id(paseo_home: &Path) -> Result<ServerId, IdentityError> {
    let path = paseo_home.join(SERVER_ID_FILE);
    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(ServerId(contents.trim().to_string())),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            let id = ServerId::generate();
            std::fs::write(&path, &id.0)?;
            Ok(id)
        }
        Err(err) => Err(err.into()),
    }
}

fn load_or_mint_keypair(paseo_home: &Path) -> Result<DaemonKeyPair, IdentityError> {
    let path = paseo_home.join(KEYPAIR_FILE);
    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(serde_json::from_str(&contents)?),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            let secret = StaticSecret::random();
            let public = PublicKey::from(&secret);
            let keypair = DaemonKeyPair::from_raw(public.to_bytes(), secret.to_bytes());
            write_keypair_file(&path, &keypair)?;
            Ok(keypair)
        }
        Err(err) => Err(err.into()),
    }
}

/// Write with mode 0600 before any other process can read the secret key
/// bytes.
fn write_keypair_file(path: &Path, keypair: &DaemonKeyPair) -> Result<(), IdentityError> {
    let json = serde_json::to_vec_pretty(keypair)?;
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)?;
        file.write_all(&json)?;
    }
    #[cfg(not(unix))]
    {
        std::fs::write(path, &json)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mints_identity_once_and_reloads_identically() {
        let dir = tempfile::tempdir().unwrap();
        let first = load_or_mint(dir.path()).unwrap();
        let second = load_or_mint(dir.path()).unwrap();
        assert_eq!(first.server_id, second.server_id);
        assert_eq!(first.public_key().as_bytes(), second.public_key().as_bytes());
    }

    #[cfg(unix)]
    #[test]
    fn keypair_file_is_mode_0600() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let _identity = load_or_mint(dir.path()).unwrap();
        let meta = std::fs::metadata(dir.path().join(KEYPAIR_FILE)).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o600);
    }
}
