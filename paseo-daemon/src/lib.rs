//! The daemon process: wires C1 (transport), C2 (session, inside
//! `transport`), C10 (pairing/relay) and C11 (process guard) around a
//! already-constructed `AgentManager` (C3/C4/.../C9, all in `paseo-core`).
//! `paseod`'s `main.rs` is the thin binary entrypoint; this crate holds
//! everything that would otherwise have to live in `main`.

pub mod crypto;
pub mod guard;
pub mod keys;
pub mod pairing;
pub mod relay;
pub mod session;
pub mod transport;

use std::io::IsTerminal;
use std::sync::Arc;

use paseo_core::manager::AgentManager;

use crate::guard::LifecycleIntent;
use crate::guard::ProcessGuard;
use crate::guard::Supervision;
use crate::guard::shutdown_with_force_exit;

/// Options the binary derives from CLI flags; everything else the daemon
/// needs lives on `AgentManager::config()`.
pub struct DaemonOptions {
    /// Base URL the pairing fragment is appended to when minting an offer.
    pub app_base_url: String,
    /// Present when a parent process supervises restart/shutdown for us
    /// (spec.md §4.11's "external-supervisor mode").
    pub owner_pid: Option<u32>,
    /// Whether to start the relay transport controller alongside the local
    /// listener (requires `config.relay_endpoint` to be set).
    pub relay: bool,
}

/// Acquire the PID lock, mint/load the daemon identity, optionally start
/// the relay controller and mint a pairing offer, then serve the local
/// transport until a lifecycle intent (or Ctrl-C) asks us to stop.
pub async fn run_main(manager: Arc<AgentManager>, options: DaemonOptions) -> anyhow::Result<()> {
    let config = manager.config().clone();

    let identity = keys::load_or_mint(&config.paseo_home)?;
    tracing::info!(server_id = %identity.server_id, "daemon identity loaded");

    let listen_id = config.listen_addr.replace([':', '.'], "_");
    let supervision = match options.owner_pid {
        Some(owner_pid) => Supervision::Supervised { owner_pid },
        None => Supervision::Standalone,
    };
    let guard = Arc::new(ProcessGuard::acquire(&config.paseo_home, &listen_id, supervision)?);

    let (relay_shutdown_tx, relay_shutdown_rx) = tokio::sync::watch::channel(false);
    let relay_task = if options.relay {
        match &config.relay_endpoint {
            Some(relay_endpoint) => {
                let offer = pairing::build_offer(&identity, relay_endpoint);
                let url = offer.to_url(&options.app_base_url);
                tracing::info!(%url, "pairing offer minted");
                if std::io::stdout().is_terminal()
                    && let Some(qr) = pairing::render_qr(&url)
                {
                    println!("{qr}");
                }
                Some(tokio::spawn(relay::run(
                    relay_endpoint.clone(),
                    identity.server_id.clone(),
                    identity.secret_key().clone(),
                    manager.clone(),
                    Some(guard.clone()),
                    relay_shutdown_rx,
                )))
            }
            None => {
                tracing::warn!("relay requested but no relay_endpoint configured; skipping");
                None
            }
        }
    } else {
        None
    };

    let ctrl_c_guard = guard.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c_guard.handle_lifecycle_intent(LifecycleIntent::Shutdown);
        }
    });

    let shutdown_signal = guard.shutdown_signal();
    let shutdown = async move { shutdown_signal.notified().await };

    let serve_result =
        transport::serve(&config.listen_addr, manager.clone(), Some(guard.clone()), shutdown).await;

    let _ = relay_shutdown_tx.send(true);
    if let Some(handle) = relay_task {
        shutdown_with_force_exit(async {
            let _ = handle.await;
        })
        .await;
    }

    serve_result
}
