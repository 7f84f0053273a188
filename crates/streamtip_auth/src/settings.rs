use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use streamtip_domain::SecretString;
use tracing::error;

/// OAuth client credentials plus the provider endpoints they belong to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Credentials {
	pub authorize_uri: String,
	pub token_uri: String,
	pub client_id: String,
	pub client_secret: SecretString,
	pub redirect_uris: Vec<String>,
}

impl Default for Credentials {
	fn default() -> Self {
		Self {
			authorize_uri: "https://streamlabs.com/api/v1.0/authorize".to_string(),
			token_uri: "https://streamlabs.com/api/v1.0/token".to_string(),
			client_id: String::new(),
			client_secret: SecretString::new(""),
			redirect_uris: vec!["http://127.0.0.1:4180".to_string()],
		}
	}
}

impl Credentials {
	/// Usable only when both the client id and the client secret are set.
	pub fn has_sensitive_data(&self) -> bool {
		!self.client_id.trim().is_empty() && !self.client_secret.expose().trim().is_empty()
	}
}

/// Full client configuration. Every endpoint is overridable so tests can
/// point the client at local fixtures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamtipSettings {
	pub credentials: Credentials,
	/// Space-separated OAuth scopes requested at authorization.
	pub access_scopes: String,
	/// Address the loopback redirect listener binds to.
	pub loopback_bind: SocketAddr,
	/// Redirect URI registered with the provider; must resolve to
	/// `loopback_bind`.
	pub loopback_uri: String,
	/// HTML page served to the browser after the redirect lands.
	pub loopback_response_html: String,
	pub access_token_key: String,
	pub refresh_token_key: String,
	pub socket_token_uri: String,
	pub donations_uri: String,
	pub realtime_uri: String,
	/// Log every inbound realtime frame at debug level.
	pub emit_debug_messages: bool,
	/// Upper bound on the loopback authorization wait, in seconds. Zero
	/// disables the bound.
	pub auth_timeout_secs: u64,
	/// Upper bound on the realtime websocket connect, in seconds. Zero
	/// disables the bound.
	pub connect_timeout_secs: u64,
}

impl Default for StreamtipSettings {
	fn default() -> Self {
		Self {
			credentials: Credentials::default(),
			access_scopes: "donations.create donations.read socket.token".to_string(),
			loopback_bind: SocketAddr::from((Ipv4Addr::LOCALHOST, 4180)),
			loopback_uri: "http://127.0.0.1:4180".to_string(),
			loopback_response_html: "<html><body>Authorization complete. You can close this window.</body></html>"
				.to_string(),
			access_token_key: "streamtip.access_token".to_string(),
			refresh_token_key: "streamtip.refresh_token".to_string(),
			socket_token_uri: "https://streamlabs.com/api/v1.0/socket/token".to_string(),
			donations_uri: "https://streamlabs.com/api/v1.0/donations".to_string(),
			realtime_uri: "wss://sockets.streamlabs.com".to_string(),
			emit_debug_messages: false,
			auth_timeout_secs: 300,
			connect_timeout_secs: 30,
		}
	}
}

impl StreamtipSettings {
	pub fn auth_timeout(&self) -> Option<Duration> {
		(self.auth_timeout_secs > 0).then(|| Duration::from_secs(self.auth_timeout_secs))
	}

	pub fn connect_timeout(&self) -> Option<Duration> {
		(self.connect_timeout_secs > 0).then(|| Duration::from_secs(self.connect_timeout_secs))
	}

	/// Per-user configuration directory.
	pub fn settings_dir() -> PathBuf {
		dirs::config_dir().map(|p| p.join("streamtip")).unwrap_or_else(|| PathBuf::from("."))
	}

	pub fn settings_path() -> PathBuf {
		Self::settings_dir().join("settings.toml")
	}

	/// Where cached tokens live on disk.
	pub fn tokens_path() -> PathBuf {
		Self::settings_dir().join("tokens.toml")
	}

	/// Load settings from the config directory; `None` when the file is
	/// missing or unreadable.
	pub fn load_from_disk() -> Option<Self> {
		let path = Self::settings_path();
		let data = std::fs::read_to_string(&path).ok()?;
		match toml::from_str(&data) {
			Ok(settings) => Some(settings),
			Err(err) => {
				error!(path = %path.display(), error = %err, "failed to parse settings file");
				None
			}
		}
	}
}
