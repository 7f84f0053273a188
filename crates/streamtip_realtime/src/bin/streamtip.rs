#![forbid(unsafe_code)]

//! Demo binary: authorize against Streamlabs, connect to the realtime
//! channel and log every donation until Ctrl-C.

use std::sync::Arc;

use streamtip_auth::{
	AuthController, FileStore, LoopbackAccessTokenProvider, StreamtipSettings, SystemUrlOpener, TokenCache,
};
use streamtip_realtime::{ClientEvent, spawn_client};
use tracing::{info, warn};

fn init_tracing() {
	let filter = std::env::var("RUST_LOG")
		.unwrap_or_else(|_| "info,streamtip_realtime=debug,streamtip_auth=debug".to_string());
	tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	init_tracing();

	let settings = Arc::new(StreamtipSettings::load_from_disk().unwrap_or_default());
	if !settings.credentials.has_sensitive_data() {
		warn!(
			path = %StreamtipSettings::settings_path().display(),
			"client_id/client_secret are not configured; authorization will fail"
		);
	}

	let store = Arc::new(FileStore::open(StreamtipSettings::tokens_path()));
	let cache = Arc::new(TokenCache::new(
		store,
		settings.access_token_key.clone(),
		settings.refresh_token_key.clone(),
	));
	let provider = Arc::new(LoopbackAccessTokenProvider::new(
		Arc::clone(&settings),
		Arc::clone(&cache),
		Arc::new(SystemUrlOpener),
	));
	let auth = AuthController::new(cache, provider, settings.socket_token_uri.clone());

	let (handle, mut events, task) = spawn_client(Arc::clone(&settings), auth);
	handle.connect().await?;

	loop {
		tokio::select! {
			event = events.recv() => {
				let Some(event) = event else { break };
				match event {
					ClientEvent::ConnectionStateChanged(state) => info!(%state, "connection state"),
					ClientEvent::AccessTokenRefreshed { success } => info!(success, "access token refreshed"),
					ClientEvent::Donation(donation) => {
						for entry in &donation.entries {
							info!(
								from = %entry.from,
								amount = %entry.display_amount(),
								message = %entry.message,
								"donation received"
							);
						}
					}
				}
			}
			_ = tokio::signal::ctrl_c() => {
				info!("shutting down");
				handle.disconnect().await?;
				handle.shutdown().await?;
				break;
			}
		}
	}

	let _ = task.await;
	Ok(())
}
