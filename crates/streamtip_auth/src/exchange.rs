//! Token endpoint calls: authorization-code exchange, refresh-token renewal
//! and the socket-token hop that gates the realtime channel.

use serde::Deserialize;
use streamtip_domain::SecretString;
use tracing::debug;

use crate::AuthError;
use crate::settings::Credentials;

/// Tokens returned by the authorization-code exchange.
#[derive(Debug, Clone)]
pub struct TokenPair {
	pub access_token: SecretString,
	pub refresh_token: Option<SecretString>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
	access_token: String,
	#[serde(default)]
	refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SocketTokenResponse {
	socket_token: String,
}

/// Exchange an authorization code (plus its PKCE verifier) for tokens.
pub async fn exchange_auth_code(
	http: &reqwest::Client,
	credentials: &Credentials,
	code: &str,
	code_verifier: &str,
	redirect_uri: &str,
) -> Result<TokenPair, AuthError> {
	let response = http
		.post(&credentials.token_uri)
		.form(&[
			("grant_type", "authorization_code"),
			("code", code),
			("code_verifier", code_verifier),
			("client_id", credentials.client_id.as_str()),
			("client_secret", credentials.client_secret.expose()),
			("redirect_uri", redirect_uri),
		])
		.send()
		.await
		.map_err(|err| AuthError::TokenExchangeFailed(err.to_string()))?;

	let parsed: TokenResponse = read_json(response).await.map_err(AuthError::TokenExchangeFailed)?;
	debug!("authorization code exchanged");
	Ok(TokenPair {
		access_token: SecretString::new(parsed.access_token),
		refresh_token: parsed.refresh_token.map(SecretString::new),
	})
}

/// Renew an access token from a refresh token.
pub async fn refresh_access_token(
	http: &reqwest::Client,
	credentials: &Credentials,
	refresh_token: &str,
	redirect_uri: &str,
) -> Result<TokenPair, AuthError> {
	let response = http
		.post(&credentials.token_uri)
		.form(&[
			("grant_type", "refresh_token"),
			("refresh_token", refresh_token),
			("client_id", credentials.client_id.as_str()),
			("client_secret", credentials.client_secret.expose()),
			("redirect_uri", redirect_uri),
		])
		.send()
		.await
		.map_err(|err| AuthError::TokenRefreshFailed(err.to_string()))?;

	let parsed: TokenResponse = read_json(response).await.map_err(AuthError::TokenRefreshFailed)?;
	debug!("access token renewed from refresh token");
	Ok(TokenPair {
		access_token: SecretString::new(parsed.access_token),
		refresh_token: parsed.refresh_token.map(SecretString::new),
	})
}

/// Trade an access token for the socket token the realtime endpoint expects.
pub async fn fetch_socket_token(
	http: &reqwest::Client,
	socket_token_uri: &str,
	access_token: &str,
) -> Result<SecretString, AuthError> {
	let url = format!("{socket_token_uri}?access_token={}", urlencoding::encode(access_token));
	let response = http
		.get(&url)
		.send()
		.await
		.map_err(|err| AuthError::SocketTokenFetchFailed(err.to_string()))?;

	let parsed: SocketTokenResponse = read_json(response).await.map_err(AuthError::SocketTokenFetchFailed)?;
	Ok(SecretString::new(parsed.socket_token))
}

async fn read_json<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T, String> {
	let status = response.status();
	let body = response.text().await.map_err(|err| err.to_string())?;
	if !status.is_success() {
		return Err(format!("status={status} body={body}"));
	}
	serde_json::from_str(&body).map_err(|err| format!("parse response: {err}"))
}
