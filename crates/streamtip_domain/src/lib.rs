#![forbid(unsafe_code)]

use core::fmt;

use serde::{Deserialize, Serialize};

/// State of the realtime donation channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
	NotConnected,
	Connecting,
	Connected,
}

impl ConnectionState {
	/// Stable string identifier.
	pub const fn as_str(self) -> &'static str {
		match self {
			ConnectionState::NotConnected => "not_connected",
			ConnectionState::Connecting => "connecting",
			ConnectionState::Connected => "connected",
		}
	}
}

impl fmt::Display for ConnectionState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Wire value of the `type` field for donation events.
pub const DONATION_EVENT_TYPE: &str = "donation";

/// A realtime event envelope as Streamlabs emits it. Only `donation`
/// envelopes are surfaced to subscribers; other types pass through the
/// decoder untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DonationEvent {
	#[serde(rename = "type")]
	pub event_type: String,
	/// Donation entries. The wire calls this field `message`.
	#[serde(default, rename = "message")]
	pub entries: Vec<DonationEntry>,
	#[serde(default)]
	pub event_id: Option<String>,
}

impl DonationEvent {
	pub fn is_donation(&self) -> bool {
		self.event_type == DONATION_EVENT_TYPE
	}
}

/// One donation inside a [`DonationEvent`]. Every field is optional on the
/// wire; absent fields decode to their defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DonationEntry {
	#[serde(default)]
	pub id: String,
	#[serde(default)]
	pub name: String,
	#[serde(default)]
	pub amount: f64,
	/// Snake-case spelling of the formatted amount.
	#[serde(default)]
	pub formatted_amount: String,
	/// Camel-case spelling; some payloads carry this one instead.
	#[serde(default, rename = "formattedAmount")]
	pub formatted_amount_alt: String,
	#[serde(default)]
	pub message: String,
	#[serde(default)]
	pub currency: String,
	#[serde(default)]
	pub from: String,
	#[serde(default, alias = "fromUserId")]
	pub from_user_id: String,
}

impl DonationEntry {
	/// Formatted amount under whichever spelling the payload carried.
	pub fn display_amount(&self) -> &str {
		if self.formatted_amount_alt.is_empty() {
			&self.formatted_amount
		} else {
			&self.formatted_amount_alt
		}
	}
}

/// String wrapper that never leaks its contents through Debug, Display or
/// serialization.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretString(String);

impl SecretString {
	pub fn new(s: impl Into<String>) -> Self {
		Self(s.into())
	}

	/// Access the inner secret string.
	pub fn expose(&self) -> &str {
		&self.0
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}
}

impl fmt::Debug for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("SecretString(<redacted>)")
	}
}

impl fmt::Display for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("<redacted>")
	}
}

impl serde::Serialize for SecretString {
	fn serialize<S>(&self, serializer: S) -> Result<<S as serde::Serializer>::Ok, <S as serde::Serializer>::Error>
	where
		S: serde::Serializer,
	{
		serializer.serialize_str("")
	}
}

impl<'de> serde::Deserialize<'de> for SecretString {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: serde::Deserializer<'de>,
	{
		let s = String::deserialize(deserializer)?;
		Ok(SecretString::new(s))
	}
}
