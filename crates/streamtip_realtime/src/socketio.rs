//! Minimal decoder for the socket.io-style frames Streamlabs sends over the
//! websocket. The first character of a text frame is the packet-type code;
//! the rest is the payload.

use anyhow::Context as _;
use streamtip_domain::DonationEvent;

/// Keep-alive frame sent on the negotiated heartbeat interval.
pub const HEARTBEAT_FRAME: &str = "2";

const EVENT_WRAPPER_PREFIX: &str = "2[\"event";
/// Length of `2["event",`, the wrapper head preceding the embedded object.
const EVENT_WRAPPER_HEAD: usize = 10;

/// Handshake payload of an open frame.
#[derive(Debug, serde::Deserialize)]
pub struct Handshake {
	/// Heartbeat period in milliseconds.
	#[serde(rename = "pingTimeout")]
	pub ping_timeout: u64,
	#[serde(default, rename = "pingInterval")]
	pub ping_interval: Option<u64>,
	#[serde(default)]
	pub sid: Option<String>,
}

/// One decoded inbound frame.
#[derive(Debug)]
pub enum Frame {
	/// Handshake/open frame (`0{...}`).
	Open(Handshake),
	/// Application event wrapper; carries the embedded JSON object.
	Event(String),
	/// Any other packet type; ignored.
	Other,
}

/// Decode one inbound text frame. The event wrapper normally follows the
/// packet-type code, but a wrapper at the very start of the frame is
/// accepted too.
pub fn decode_frame(text: &str) -> anyhow::Result<Frame> {
	let Some(code) = text.chars().next() else {
		return Ok(Frame::Other);
	};

	if code == '0' {
		let handshake: Handshake = serde_json::from_str(&text[1..]).context("parse open frame")?;
		return Ok(Frame::Open(handshake));
	}

	let wrapped = if text.starts_with(EVENT_WRAPPER_PREFIX) {
		text
	} else {
		let payload = &text[code.len_utf8()..];
		if !payload.starts_with(EVENT_WRAPPER_PREFIX) {
			return Ok(Frame::Other);
		}
		payload
	};

	if wrapped.len() <= EVENT_WRAPPER_HEAD + 1 || !wrapped.ends_with(']') {
		anyhow::bail!("malformed event wrapper: {wrapped}");
	}

	Ok(Frame::Event(wrapped[EVENT_WRAPPER_HEAD..wrapped.len() - 1].to_string()))
}

/// Parse an event payload; `None` when the event is not a donation.
pub fn donation_from_event(payload: &str) -> anyhow::Result<Option<DonationEvent>> {
	let event: DonationEvent = serde_json::from_str(payload).context("parse event payload")?;
	Ok(event.is_donation().then_some(event))
}

/// Decode a frame and, when it wraps a donation event, return it.
pub fn try_decode_donation(text: &str) -> anyhow::Result<Option<DonationEvent>> {
	match decode_frame(text)? {
		Frame::Event(payload) => donation_from_event(&payload),
		_ => Ok(None),
	}
}
