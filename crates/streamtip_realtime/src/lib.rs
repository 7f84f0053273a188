#![forbid(unsafe_code)]

//! Realtime donation channel: websocket session management, socket.io-style
//! frame decoding, heartbeats and donation submission.

pub mod client;
pub mod socketio;

pub use client::{StreamtipClient, StreamtipHandle, spawn_client};

use streamtip_domain::{ConnectionState, DonationEvent};
use thiserror::Error;
use tokio::sync::oneshot;

/// Control messages consumed by the client run loop.
#[derive(Debug)]
pub enum ClientCommand {
	/// Start connecting; a no-op unless the session is `NotConnected`.
	Connect,
	/// Tear the session down and return to `NotConnected`.
	Disconnect,
	/// Refresh the access and socket tokens without touching the session.
	RefreshAccessToken,
	/// Force-fail an in-flight authorization attempt.
	CancelAuth,
	/// Submit a donation; the result answers on `resp`.
	SendDonation {
		request: DonationRequest,
		resp: oneshot::Sender<Result<(), SendRejected>>,
	},
	/// Stop the run loop.
	Shutdown,
}

/// Events emitted by the client run loop.
#[derive(Debug, Clone)]
pub enum ClientEvent {
	/// The session transitioned to a new state. Emitted on transitions only.
	ConnectionStateChanged(ConnectionState),
	/// A donation arrived on the realtime channel.
	Donation(DonationEvent),
	/// A token refresh attempt completed.
	AccessTokenRefreshed { success: bool },
}

/// Parameters for a donation submission. Validation is server-side: name is
/// 2-25 alphanumeric or underscore characters, message under 255 characters,
/// identifier groups repeat donors, currency is a 3-letter code.
#[derive(Debug, Clone)]
pub struct DonationRequest {
	pub name: String,
	pub message: String,
	pub identifier: String,
	pub amount: f64,
	pub currency: String,
}

/// Why a donation submission was not started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SendRejected {
	#[error("a donation send is already in progress")]
	AlreadySending,
	#[error("not connected to the realtime channel")]
	NotConnected,
	#[error("client task stopped")]
	ChannelClosed,
}
