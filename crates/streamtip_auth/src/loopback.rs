//! Interactive authorization through a loopback redirect: open the consent
//! page in the user's browser, catch the redirect on a local listener and
//! exchange the authorization code for tokens.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::AuthError;
use crate::cache::{CachedTokens, TokenCache};
use crate::exchange;
use crate::pkce;
use crate::settings::StreamtipSettings;

const RESPONSE_FLUSH_WAIT: Duration = Duration::from_secs(2);

/// Capability for getting a usable access token into the token cache.
#[async_trait]
pub trait AccessTokenProvider: Send + Sync {
	/// Run one complete authorization attempt. On success the token cache
	/// holds an access token.
	async fn provide_access_token(&self) -> Result<(), AuthError>;
}

/// Browser-launch seam, replaceable in tests.
pub trait UrlOpener: Send + Sync {
	fn open_url(&self, url: &str) -> anyhow::Result<()>;
}

/// Opens URLs with the system default browser.
pub struct SystemUrlOpener;

impl UrlOpener for SystemUrlOpener {
	fn open_url(&self, url: &str) -> anyhow::Result<()> {
		open::that(url).context("open system browser")
	}
}

/// [`AccessTokenProvider`] that drives the full interactive flow: PKCE
/// material, browser launch, single-shot loopback listener, code exchange.
pub struct LoopbackAccessTokenProvider {
	settings: Arc<StreamtipSettings>,
	cache: Arc<TokenCache>,
	http: reqwest::Client,
	opener: Arc<dyn UrlOpener>,
}

impl LoopbackAccessTokenProvider {
	pub fn new(settings: Arc<StreamtipSettings>, cache: Arc<TokenCache>, opener: Arc<dyn UrlOpener>) -> Self {
		Self { settings, cache, http: reqwest::Client::new(), opener }
	}

	async fn run_full_auth(&self) -> Result<(), AuthError> {
		let credentials = &self.settings.credentials;
		let code_verifier = pkce::generate_code_verifier(32);

		let listener = TcpListener::bind(self.settings.loopback_bind)
			.await
			.map_err(|err| AuthError::Listener(format!("bind {}: {err}", self.settings.loopback_bind)))?;

		// Port zero means an ephemeral port; derive the redirect from the
		// socket we actually got.
		let redirect_uri = if self.settings.loopback_bind.port() == 0 {
			let local = listener.local_addr().map_err(|err| AuthError::Listener(err.to_string()))?;
			format!("http://{local}")
		} else {
			self.settings.loopback_uri.trim_end_matches('/').to_string()
		};

		// Streamlabs ignores code_challenge on the authorize URL; the
		// verifier is only presented at exchange time.
		let auth_url = format!(
			"{}?client_id={}&redirect_uri={}&response_type=code&scope={}",
			credentials.authorize_uri,
			urlencoding::encode(&credentials.client_id),
			urlencoding::encode(&redirect_uri),
			urlencoding::encode(&self.settings.access_scopes),
		);

		info!("opening browser for authorization consent");
		self.opener.open_url(&auth_url).map_err(|err| AuthError::Browser(err.to_string()))?;

		let redirect_wait = await_redirect(listener, self.settings.loopback_response_html.clone());
		let query = match self.settings.auth_timeout() {
			Some(limit) => tokio::time::timeout(limit, redirect_wait).await.map_err(|_| AuthError::TimedOut)??,
			None => redirect_wait.await?,
		};

		let code = parse_redirect_query(&query)?;
		let tokens = exchange::exchange_auth_code(&self.http, credentials, &code, &code_verifier, &redirect_uri).await?;
		self.cache.set(&CachedTokens { access_token: Some(tokens.access_token), refresh_token: tokens.refresh_token });
		info!("authorization complete; tokens cached");
		Ok(())
	}
}

#[async_trait]
impl AccessTokenProvider for LoopbackAccessTokenProvider {
	async fn provide_access_token(&self) -> Result<(), AuthError> {
		if !self.settings.credentials.has_sensitive_data() {
			return Err(AuthError::CredentialsInvalid);
		}
		// Streamlabs access tokens do not expire, so a cached token is final.
		// A refresh-token renewal step would slot in here for providers whose
		// tokens do.
		if self.cache.has_access_token() {
			debug!("access token already cached; skipping interactive flow");
			return Ok(());
		}
		self.run_full_auth().await
	}
}

/// Accept exactly one HTTP request on `listener`, answer it with
/// `response_html` and return the request's raw query string.
async fn await_redirect(listener: TcpListener, response_html: String) -> Result<String, AuthError> {
	let (stream, remote) = listener.accept().await.map_err(|err| AuthError::Listener(err.to_string()))?;
	debug!(%remote, "redirect connection accepted");

	let (query_tx, query_rx) = oneshot::channel::<String>();
	let query_tx = Arc::new(Mutex::new(Some(query_tx)));
	let html = Arc::new(response_html);

	let service = service_fn(move |req: Request<Incoming>| {
		let query = req.uri().query().unwrap_or_default().to_string();
		if let Some(tx) = query_tx.lock().take() {
			let _ = tx.send(query);
		}
		let html = Arc::clone(&html);
		async move {
			Ok::<_, hyper::Error>(
				Response::builder()
					.header("Content-Type", "text/html; charset=utf-8")
					.body(Full::new(Bytes::from(html.as_ref().clone())))
					.unwrap(),
			)
		}
	});

	let mut serve = tokio::spawn(async move {
		if let Err(err) = http1::Builder::new().serve_connection(TokioIo::new(stream), service).await {
			debug!(error = %err, "redirect connection ended with error");
		}
	});

	let query = match query_rx.await {
		Ok(query) => query,
		Err(_) => {
			serve.abort();
			return Err(AuthError::Listener("redirect request never arrived".to_string()));
		}
	};

	// Let the browser response flush; keep-alive connections are cut off.
	if tokio::time::timeout(RESPONSE_FLUSH_WAIT, &mut serve).await.is_err() {
		serve.abort();
	}

	Ok(query)
}

/// Pull the authorization code out of a redirect query string. An `error`
/// parameter wins over everything else.
fn parse_redirect_query(query: &str) -> Result<String, AuthError> {
	let mut code = None;
	for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
		match key.as_ref() {
			"error" => return Err(AuthError::AuthorizationDenied(value.into_owned())),
			"code" => code = Some(value.into_owned()),
			_ => {}
		}
	}
	code.ok_or(AuthError::MalformedAuthorizationResponse)
}

#[cfg(test)]
mod tests {
	use std::net::{Ipv4Addr, SocketAddr};

	use super::*;
	use crate::cache::MemoryStore;
	use crate::settings::Credentials;
	use crate::test_support::spawn_canned_server;
	use streamtip_domain::SecretString;

	#[test]
	fn redirect_query_with_code() {
		assert_eq!(parse_redirect_query("code=abc123&state=x").unwrap(), "abc123");
	}

	#[test]
	fn redirect_query_with_error_denies_before_exchange() {
		let err = parse_redirect_query("error=access_denied&code=abc").unwrap_err();
		match err {
			AuthError::AuthorizationDenied(reason) => assert_eq!(reason, "access_denied"),
			other => panic!("unexpected error: {other:?}"),
		}
	}

	#[test]
	fn redirect_query_without_code_is_malformed() {
		assert!(matches!(parse_redirect_query("state=x"), Err(AuthError::MalformedAuthorizationResponse)));
		assert!(matches!(parse_redirect_query(""), Err(AuthError::MalformedAuthorizationResponse)));
	}

	#[test]
	fn redirect_query_decodes_percent_encoding() {
		assert_eq!(parse_redirect_query("code=a%2Fb%3Dc").unwrap(), "a/b=c");
	}

	#[tokio::test]
	async fn redirect_listener_serves_html_and_captures_query() {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		let wait = tokio::spawn(await_redirect(listener, "<html>done</html>".to_string()));

		let response = reqwest::get(format!("http://{addr}/?code=abc123")).await.unwrap();
		assert_eq!(response.text().await.unwrap(), "<html>done</html>");

		let query = wait.await.unwrap().unwrap();
		assert_eq!(parse_redirect_query(&query).unwrap(), "abc123");
	}

	/// Opener that plays the browser: follows the redirect URI embedded in
	/// the consent URL with a canned authorization code.
	struct FakeBrowser {
		code: &'static str,
	}

	impl UrlOpener for FakeBrowser {
		fn open_url(&self, url: &str) -> anyhow::Result<()> {
			let parsed = url::Url::parse(url)?;
			let redirect = parsed
				.query_pairs()
				.find(|(key, _)| key == "redirect_uri")
				.map(|(_, value)| value.into_owned())
				.expect("redirect_uri parameter");
			let code = self.code;
			tokio::spawn(async move {
				let _ = reqwest::get(format!("{redirect}/?code={code}")).await;
			});
			Ok(())
		}
	}

	fn mk_settings(token_uri: String) -> Arc<StreamtipSettings> {
		Arc::new(StreamtipSettings {
			credentials: Credentials {
				token_uri,
				client_id: "client-id".to_string(),
				client_secret: SecretString::new("client-secret"),
				..Credentials::default()
			},
			loopback_bind: SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
			auth_timeout_secs: 10,
			..StreamtipSettings::default()
		})
	}

	fn mk_cache() -> Arc<TokenCache> {
		Arc::new(TokenCache::new(Arc::new(MemoryStore::new()), "test.access", "test.refresh"))
	}

	#[tokio::test]
	async fn full_flow_caches_exchanged_tokens() {
		let token_server = spawn_canned_server(200, r#"{"access_token":"at-full","refresh_token":"rt-full"}"#).await;
		let settings = mk_settings(format!("{token_server}/token"));
		let cache = mk_cache();
		let provider = LoopbackAccessTokenProvider::new(settings, Arc::clone(&cache), Arc::new(FakeBrowser { code: "the-code" }));

		provider.provide_access_token().await.unwrap();

		let tokens = cache.get();
		assert_eq!(tokens.access_token.unwrap().expose(), "at-full");
		assert_eq!(tokens.refresh_token.unwrap().expose(), "rt-full");
	}

	#[tokio::test]
	async fn missing_credentials_fail_before_any_io() {
		struct PanicOpener;
		impl UrlOpener for PanicOpener {
			fn open_url(&self, _url: &str) -> anyhow::Result<()> {
				panic!("browser must not open without credentials");
			}
		}

		let settings = Arc::new(StreamtipSettings::default());
		let provider = LoopbackAccessTokenProvider::new(settings, mk_cache(), Arc::new(PanicOpener));
		assert!(matches!(provider.provide_access_token().await, Err(AuthError::CredentialsInvalid)));
	}

	#[tokio::test]
	async fn cached_token_short_circuits_interactive_flow() {
		struct PanicOpener;
		impl UrlOpener for PanicOpener {
			fn open_url(&self, _url: &str) -> anyhow::Result<()> {
				panic!("browser must not open when a token is cached");
			}
		}

		let settings = mk_settings("http://127.0.0.1:1/token".to_string());
		let cache = mk_cache();
		cache.set(&CachedTokens { access_token: Some(SecretString::new("cached")), refresh_token: None });

		let provider = LoopbackAccessTokenProvider::new(settings, cache, Arc::new(PanicOpener));
		provider.provide_access_token().await.unwrap();
	}

	#[tokio::test]
	async fn denied_redirect_never_reaches_the_token_endpoint() {
		// Unroutable token endpoint: reaching it would error differently.
		let settings = mk_settings("http://127.0.0.1:1/token".to_string());
		let cache = mk_cache();

		struct DenyingBrowser;
		impl UrlOpener for DenyingBrowser {
			fn open_url(&self, url: &str) -> anyhow::Result<()> {
				let parsed = url::Url::parse(url)?;
				let redirect = parsed
					.query_pairs()
					.find(|(key, _)| key == "redirect_uri")
					.map(|(_, value)| value.into_owned())
					.expect("redirect_uri parameter");
				tokio::spawn(async move {
					let _ = reqwest::get(format!("{redirect}/?error=access_denied")).await;
				});
				Ok(())
			}
		}

		let provider = LoopbackAccessTokenProvider::new(settings, Arc::clone(&cache), Arc::new(DenyingBrowser));
		let err = provider.provide_access_token().await.unwrap_err();
		assert!(matches!(err, AuthError::AuthorizationDenied(_)));
		assert!(!cache.has_access_token());
	}
}
