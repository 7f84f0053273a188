//! Token lifecycle controller: read-through access to cached tokens and
//! coordination of refresh attempts so at most one runs at a time.

use std::sync::Arc;

use streamtip_domain::SecretString;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cache::TokenCache;
use crate::exchange;
use crate::loopback::AccessTokenProvider;

/// Completion of one refresh attempt. `socket_token` is present only when
/// both the authorization and the socket-token hop succeeded.
#[derive(Debug, Clone)]
pub struct AuthOutcome {
	pub success: bool,
	pub socket_token: Option<SecretString>,
}

impl AuthOutcome {
	fn failed() -> Self {
		Self { success: false, socket_token: None }
	}
}

/// Owns the refresh state machine. Callers drive it with [`begin_refresh`]
/// and feed completions back through [`complete_refresh`]; a second
/// `begin_refresh` while one attempt is in flight is a no-op.
///
/// [`begin_refresh`]: AuthController::begin_refresh
/// [`complete_refresh`]: AuthController::complete_refresh
pub struct AuthController {
	cache: Arc<TokenCache>,
	provider: Arc<dyn AccessTokenProvider>,
	http: reqwest::Client,
	socket_token_uri: String,
	socket_token: Option<SecretString>,
	refresh_task: Option<JoinHandle<()>>,
}

impl AuthController {
	pub fn new(
		cache: Arc<TokenCache>,
		provider: Arc<dyn AccessTokenProvider>,
		socket_token_uri: impl Into<String>,
	) -> Self {
		Self {
			cache,
			provider,
			http: reqwest::Client::new(),
			socket_token_uri: socket_token_uri.into(),
			socket_token: None,
			refresh_task: None,
		}
	}

	/// Read-through to the cached access token.
	pub fn access_token(&self) -> Option<SecretString> {
		self.cache.get().access_token
	}

	/// Socket token from the last successful refresh.
	pub fn socket_token(&self) -> Option<&SecretString> {
		self.socket_token.as_ref()
	}

	/// An attempt counts as in flight until its outcome is consumed.
	pub fn is_refreshing(&self) -> bool {
		self.refresh_task.is_some()
	}

	/// Start a refresh attempt; the outcome arrives on `outcome_tx`. A
	/// no-op while an attempt is already in flight.
	pub fn begin_refresh(&mut self, outcome_tx: mpsc::Sender<AuthOutcome>) {
		if self.refresh_task.is_some() {
			debug!("token refresh already in flight");
			return;
		}
		metrics::counter!("streamtip_auth_refresh_total").increment(1);

		let cache = Arc::clone(&self.cache);
		let provider = Arc::clone(&self.provider);
		let http = self.http.clone();
		let socket_token_uri = self.socket_token_uri.clone();
		self.refresh_task = Some(tokio::spawn(async move {
			let outcome = run_refresh(cache, provider, http, socket_token_uri).await;
			if outcome_tx.send(outcome).await.is_err() {
				warn!("auth outcome receiver dropped");
			}
		}));
	}

	/// Consume a completed outcome; returns overall success.
	pub fn complete_refresh(&mut self, outcome: &AuthOutcome) -> bool {
		self.refresh_task = None;
		self.socket_token = outcome.socket_token.clone();
		outcome.success
	}

	/// Abort an in-flight attempt. Returns the forced failure outcome the
	/// caller should treat as the attempt's completion, or `None` when no
	/// attempt was in flight.
	pub fn cancel(&mut self) -> Option<AuthOutcome> {
		let task = self.refresh_task.take()?;
		task.abort();
		self.socket_token = None;
		debug!("in-flight authorization cancelled");
		Some(AuthOutcome::failed())
	}
}

async fn run_refresh(
	cache: Arc<TokenCache>,
	provider: Arc<dyn AccessTokenProvider>,
	http: reqwest::Client,
	socket_token_uri: String,
) -> AuthOutcome {
	if let Err(err) = provider.provide_access_token().await {
		warn!(error = %err, "authorization attempt failed");
		return AuthOutcome::failed();
	}
	let Some(access_token) = cache.get().access_token else {
		warn!("provider reported success but no access token is cached");
		return AuthOutcome::failed();
	};
	match exchange::fetch_socket_token(&http, &socket_token_uri, access_token.expose()).await {
		Ok(socket_token) => AuthOutcome { success: true, socket_token: Some(socket_token) },
		Err(err) => {
			warn!(error = %err, "socket token fetch failed");
			AuthOutcome::failed()
		}
	}
}
