#![forbid(unsafe_code)]

//! OAuth2 token acquisition for the Streamlabs API: credentials and settings,
//! durable token cache, PKCE material, authorization-code exchange and the
//! loopback redirect flow that drives a browser through consent.

pub mod cache;
pub mod controller;
pub mod exchange;
pub mod loopback;
pub mod pkce;
pub mod settings;

#[cfg(test)]
mod test_support;

pub use cache::{CachedTokens, FileStore, KeyValueStore, MemoryStore, TokenCache};
pub use controller::{AuthController, AuthOutcome};
pub use exchange::{TokenPair, exchange_auth_code, fetch_socket_token, refresh_access_token};
pub use loopback::{AccessTokenProvider, LoopbackAccessTokenProvider, SystemUrlOpener, UrlOpener};
pub use settings::{Credentials, StreamtipSettings};

use thiserror::Error;

/// Authorization failures surfaced to callers. Diagnostic detail beyond the
/// variant goes to the log, not the type.
#[derive(Debug, Error)]
pub enum AuthError {
	#[error("client credentials are not usable")]
	CredentialsInvalid,
	#[error("authorization denied: {0}")]
	AuthorizationDenied(String),
	#[error("authorization redirect carried no code")]
	MalformedAuthorizationResponse,
	#[error("token exchange failed: {0}")]
	TokenExchangeFailed(String),
	#[error("token refresh failed: {0}")]
	TokenRefreshFailed(String),
	#[error("socket token fetch failed: {0}")]
	SocketTokenFetchFailed(String),
	#[error("loopback listener failed: {0}")]
	Listener(String),
	#[error("could not open the browser: {0}")]
	Browser(String),
	#[error("timed out waiting for authorization")]
	TimedOut,
}
