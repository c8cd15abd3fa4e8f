//! The pairing offer: a compact structure identifying the daemon and its
//! relay endpoint, embedded in a URL fragment (spec.md §4.10, §6).

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::ids::ServerId;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionOffer {
    pub server_id: ServerId,
    /// Base64-encoded X25519 public key.
    pub daemon_public_key: String,
    pub relay_endpoint: String,
}

#[derive(Debug, Error)]
pub enum OfferError {
    #[error("offer is not valid base64url: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("offer is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl ConnectionOffer {
    /// Encode as the `offer=` fragment value of a pairing URL (without the
    /// leading `#offer=`).
    pub fn encode(&self) -> String {
        let json = serde_json::to_vec(self).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }

    pub fn decode(encoded: &str) -> Result<Self, OfferError> {
        let json = URL_SAFE_NO_PAD.decode(encoded)?;
        Ok(serde_json::from_slice(&json)?)
    }

    /// Build the full pairing URL: `<appBaseUrl>#offer=<encoded>`.
    pub fn to_url(&self, app_base_url: &str) -> String {
        format!("{app_base_url}#offer={}", self.encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Round-trip law from spec.md §8: encode . decode is the identity on
    /// valid offers.
    #[test]
    fn encode_decode_round_trips() {
        let offer = ConnectionOffer {
            server_id: ServerId("srv_abc123".into()),
            daemon_public_key: "deadbeef".into(),
            relay_endpoint: "wss://relay.example/connect".into(),
        };
        let encoded = offer.encode();
        let decoded = ConnectionOffer::decode(&encoded).expect("decodes");
        assert_eq!(offer, decoded);
    }

    #[test]
    fn url_carries_fragment() {
        let offer = ConnectionOffer {
            server_id: ServerId("srv".into()),
            daemon_public_key: "pk".into(),
            relay_endpoint: "wss://relay".into(),
        };
        let url = offer.to_url("https://app.example");
        assert!(url.starts_with("https://app.example#offer="));
    }
}
