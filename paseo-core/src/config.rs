//! Daemon configuration: `paseo.toml` under `PASEO_HOME`, merged with
//! environment overrides. Follows the same layered
//! `config::{Config, find_home_dir}`-style loader shape used elsewhere in
//! this codebase, generalized from a model/sandbox configuration surface to
//! the daemon's provider/transport surface.

use std::collections::HashMap;
use std::path::PathBuf;

use dirs::home_dir;
use serde::Deserialize;

use crate::error::DaemonError;
use crate::error::Result;

const CONFIG_TOML_FILE: &str = "paseo.toml";

/// One configured provider entry under `[providers.<id>]` in `paseo.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ProviderConfig {
    /// Executable the `paseo-providers` subprocess adapter spawns.
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// Raw shape of `paseo.toml`; every field optional so a missing file (or a
/// file missing a section) degrades to defaults rather than failing to load.
#[derive(Debug, Clone, Default, Deserialize)]
struct ConfigToml {
    #[serde(default)]
    listen_addr: Option<String>,
    #[serde(default)]
    relay_endpoint: Option<String>,
    #[serde(default)]
    auth_token: Option<String>,
    #[serde(default)]
    providers: HashMap<String, ProviderConfig>,
}

/// Fully-resolved daemon configuration: `paseo.toml` merged with `PASEO_*`
/// environment overrides, the latter taking precedence.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// `PASEO_HOME` (or `~/.paseo`): where the registry, per-agent timeline
    /// segments, and keypair are stored.
    pub paseo_home: PathBuf,

    /// Local WebSocket bind address, e.g. `127.0.0.1:7890`.
    pub listen_addr: String,

    /// Relay server base URL used when minting connection offers for
    /// clients without a path to the local listener.
    pub relay_endpoint: Option<String>,

    /// Bearer/basic token the MCP tool surface (C8) and local clients must
    /// present; `None` disables authentication (local-only deployments).
    pub auth_token: Option<String>,

    pub providers: HashMap<String, ProviderConfig>,
}

impl Config {
    /// Load `paseo.toml` from `paseo_home` (if present) and apply `PASEO_*`
    /// environment overrides. Never fails on a missing config file; only
    /// fails if an existing file cannot be parsed, or `PASEO_HOME` cannot be
    /// resolved.
    pub fn load() -> Result<Self> {
        let paseo_home = find_paseo_home()?;
        let toml = read_config_toml(&paseo_home)?;

        let mut listen_addr = toml.listen_addr.unwrap_or_else(|| "127.0.0.1:7890".to_string());
        if let Ok(val) = std::env::var("PASEO_LISTEN_ADDR") {
            listen_addr = val;
        }

        let mut relay_endpoint = toml.relay_endpoint;
        if let Ok(val) = std::env::var("PASEO_RELAY_ENDPOINT") {
            relay_endpoint = Some(val);
        }

        let mut auth_token = toml.auth_token;
        if let Ok(val) = std::env::var("PASEO_AUTH_TOKEN") {
            auth_token = Some(val);
        }

        Ok(Self {
            paseo_home,
            listen_addr,
            relay_endpoint,
            auth_token,
            providers: toml.providers,
        })
    }
}

/// Read `PASEO_HOME/paseo.toml`. A missing file yields defaults; a file that
/// exists but fails to parse is an error, since silently ignoring it would
/// mask a typo in the user's configuration.
fn read_config_toml(paseo_home: &std::path::Path) -> Result<ConfigToml> {
    let path = paseo_home.join(CONFIG_TOML_FILE);
    match std::fs::read_to_string(&path) {
        Ok(contents) => {
            toml::from_str(&contents).map_err(|err| DaemonError::Internal(format!("{path:?}: {err}")))
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(ConfigToml::default()),
        Err(err) => Err(err.into()),
    }
}

/// Returns `PASEO_HOME` (canonicalized, must already exist) or `~/.paseo`
/// (not verified to exist — the daemon creates it on first run).
pub fn find_paseo_home() -> Result<PathBuf> {
    if let Ok(val) = std::env::var("PASEO_HOME")
        && !val.is_empty()
    {
        return Ok(PathBuf::from(val).canonicalize()?);
    }

    let mut p = home_dir().ok_or_else(|| {
        DaemonError::Internal("could not determine home directory for PASEO_HOME default".into())
    })?;
    p.push(".paseo");
    Ok(p)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let toml = read_config_toml(dir.path()).unwrap();
        assert!(toml.providers.is_empty());
        assert!(toml.listen_addr.is_none());
    }

    #[test]
    fn parses_provider_table() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_TOML_FILE),
            r#"
            listen_addr = "127.0.0.1:9999"

            [providers.codex]
            command = "codex-provider"
            args = ["--stdio"]
            "#,
        )
        .unwrap();
        let toml = read_config_toml(dir.path()).unwrap();
        assert_eq!(toml.listen_addr.as_deref(), Some("127.0.0.1:9999"));
        assert_eq!(toml.providers["codex"].command, "codex-provider");
        assert_eq!(toml.providers["codex"].args, vec!["--stdio".to_string()]);
    }

    #[test]
    fn malformed_config_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_TOML_FILE), "not valid toml =====").unwrap();
        assert!(read_config_toml(dir.path()).is_err());
    }
}
