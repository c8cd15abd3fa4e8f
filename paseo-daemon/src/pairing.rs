//! C10: pairing offer construction (spec.md §4.10). Builds the
//! `ConnectionOffer` from this daemon's identity and relay endpoint, turns
//! it into a pairing URL, and optionally renders a terminal QR code when
//! stdout is a TTY.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use paseo_protocol::offer::ConnectionOffer;
use qrcode::QrCode;
use qrcode::render::unicode;

use crate::keys::Identity;

/// Build the `ConnectionOffer` this daemon advertises for pairing new
/// clients (spec.md §4.10: "constructs a `ConnectionOffer{serverId,
/// daemonPublicKey, relayEndpoint}`").
pub fn build_offer(identity: &Identity, relay_endpoint: &str) -> ConnectionOffer {
    ConnectionOffer {
        server_id: identity.server_id.clone(),
        daemon_public_key: BASE64.encode(identity.public_key().as_bytes()),
        relay_endpoint: relay_endpoint.to_string(),
    }
}

/// Render the pairing URL as a terminal QR code, using a half-block glyph
/// so the code renders at roughly correct aspect ratio in a monospace
/// terminal. Returns `None` if the payload can't be encoded (oversized
/// URL), which the caller falls back to logging the bare URL for.
pub fn render_qr(url: &str) -> Option<String> {
    let code = QrCode::new(url.as_bytes()).ok()?;
    Some(
        code.render::<unicode::Dense1x2>()
            .quiet_zone(true)
            .build(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offer_carries_daemon_identity() {
        let dir = tempfile::tempdir().unwrap();
        let identity = crate::keys::load_or_mint(dir.path()).unwrap();
        let offer = build_offer(&identity, "wss://relay.example/connect");
        assert_eq!(offer.server_id, identity.server_id);
        assert_eq!(offer.relay_endpoint, "wss://relay.example/connect");
    }

    #[test]
    fn pairing_url_carries_offer_fragment() {
        let dir = tempfile::tempdir().unwrap();
        let identity = crate::keys::load_or_mint(dir.path()).unwrap();
        let offer = build_offer(&identity, "wss://relay.example/connect");
        let url = offer.to_url("https://app.example");
        assert!(url.starts_with("https://app.example#offer="));
    }

    #[test]
    fn renders_a_qr_for_a_short_url() {
        let rendered = render_qr("https://app.example#offer=abc123");
        assert!(rendered.is_some());
    }
}
