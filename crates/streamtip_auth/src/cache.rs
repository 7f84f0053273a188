//! Durable token cache. The cache itself knows nothing about token validity
//! or the network; it reads and writes a key-value store.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use streamtip_domain::SecretString;
use tracing::error;

/// Key-value persistence seam behind the token cache.
pub trait KeyValueStore: Send + Sync {
	fn get(&self, key: &str) -> Option<String>;
	fn set(&self, key: &str, value: &str);
	fn delete(&self, key: &str);
}

/// Ephemeral in-memory store.
#[derive(Default)]
pub struct MemoryStore {
	entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
	pub fn new() -> Self {
		Self::default()
	}
}

impl KeyValueStore for MemoryStore {
	fn get(&self, key: &str) -> Option<String> {
		self.entries.lock().get(key).cloned()
	}

	fn set(&self, key: &str, value: &str) {
		self.entries.lock().insert(key.to_string(), value.to_string());
	}

	fn delete(&self, key: &str) {
		self.entries.lock().remove(key);
	}
}

/// TOML-file-backed store, written through on every mutation.
pub struct FileStore {
	path: PathBuf,
	entries: Mutex<HashMap<String, String>>,
}

impl FileStore {
	/// Open a store at `path`, loading any existing contents. A missing or
	/// unparsable file starts the store empty.
	pub fn open(path: impl Into<PathBuf>) -> Self {
		let path = path.into();
		let entries = fs::read_to_string(&path)
			.ok()
			.and_then(|data| match toml::from_str::<HashMap<String, String>>(&data) {
				Ok(map) => Some(map),
				Err(err) => {
					error!(path = %path.display(), error = %err, "failed to parse token store");
					None
				}
			})
			.unwrap_or_default();
		Self { path, entries: Mutex::new(entries) }
	}

	fn persist(&self, entries: &HashMap<String, String>) {
		let data = match toml::to_string_pretty(entries) {
			Ok(data) => data,
			Err(err) => {
				error!(error = %err, "failed to serialize token store");
				return;
			}
		};
		if let Some(parent) = self.path.parent()
			&& let Err(err) = fs::create_dir_all(parent)
		{
			error!(path = %parent.display(), error = %err, "failed to create token store directory");
			return;
		}
		if let Err(err) = fs::write(&self.path, data) {
			error!(path = %self.path.display(), error = %err, "failed to write token store");
		}
	}
}

impl KeyValueStore for FileStore {
	fn get(&self, key: &str) -> Option<String> {
		self.entries.lock().get(key).cloned()
	}

	fn set(&self, key: &str, value: &str) {
		let mut entries = self.entries.lock();
		entries.insert(key.to_string(), value.to_string());
		self.persist(&entries);
	}

	fn delete(&self, key: &str) {
		let mut entries = self.entries.lock();
		entries.remove(key);
		self.persist(&entries);
	}
}

/// Access/refresh tokens as currently cached.
#[derive(Debug, Clone, Default)]
pub struct CachedTokens {
	pub access_token: Option<SecretString>,
	pub refresh_token: Option<SecretString>,
}

/// Token cache bound to two well-known keys of a [`KeyValueStore`].
pub struct TokenCache {
	store: Arc<dyn KeyValueStore>,
	access_key: String,
	refresh_key: String,
}

impl TokenCache {
	pub fn new(store: Arc<dyn KeyValueStore>, access_key: impl Into<String>, refresh_key: impl Into<String>) -> Self {
		Self { store, access_key: access_key.into(), refresh_key: refresh_key.into() }
	}

	/// Current tokens; empty strings count as absent.
	pub fn get(&self) -> CachedTokens {
		let read = |key: &str| self.store.get(key).filter(|v| !v.is_empty()).map(SecretString::new);
		CachedTokens { access_token: read(&self.access_key), refresh_token: read(&self.refresh_key) }
	}

	/// Persist both slots; a `None` slot is deleted.
	pub fn set(&self, tokens: &CachedTokens) {
		match &tokens.access_token {
			Some(token) => self.store.set(&self.access_key, token.expose()),
			None => self.store.delete(&self.access_key),
		}
		match &tokens.refresh_token {
			Some(token) => self.store.set(&self.refresh_key, token.expose()),
			None => self.store.delete(&self.refresh_key),
		}
	}

	pub fn clear(&self) {
		self.store.delete(&self.access_key);
		self.store.delete(&self.refresh_key);
	}

	pub fn has_access_token(&self) -> bool {
		self.get().access_token.is_some()
	}
}
