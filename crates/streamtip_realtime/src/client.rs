//! The client run loop. One task owns the websocket, the heartbeat timer
//! and all connection state; everything else talks to it over channels.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use futures_util::{SinkExt, StreamExt};
use streamtip_auth::{AuthController, AuthOutcome, StreamtipSettings};
use streamtip_domain::ConnectionState;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use crate::socketio::{self, Frame, HEARTBEAT_FRAME};
use crate::{ClientCommand, ClientEvent, DonationRequest, SendRejected};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

const CONTROL_BUFFER: usize = 32;
const EVENT_BUFFER: usize = 256;

/// Cloneable handle to a running [`StreamtipClient`].
#[derive(Clone)]
pub struct StreamtipHandle {
	control_tx: mpsc::Sender<ClientCommand>,
}

impl StreamtipHandle {
	pub async fn connect(&self) -> anyhow::Result<()> {
		self.send(ClientCommand::Connect).await
	}

	pub async fn disconnect(&self) -> anyhow::Result<()> {
		self.send(ClientCommand::Disconnect).await
	}

	pub async fn refresh_access_token(&self) -> anyhow::Result<()> {
		self.send(ClientCommand::RefreshAccessToken).await
	}

	pub async fn cancel_auth(&self) -> anyhow::Result<()> {
		self.send(ClientCommand::CancelAuth).await
	}

	pub async fn shutdown(&self) -> anyhow::Result<()> {
		self.send(ClientCommand::Shutdown).await
	}

	/// Submit a donation and wait for the accept/reject decision. The
	/// decision covers dispatch only; delivery failures are logged.
	pub async fn send_donation(&self, request: DonationRequest) -> Result<(), SendRejected> {
		let (resp_tx, resp_rx) = oneshot::channel();
		self.control_tx
			.send(ClientCommand::SendDonation { request, resp: resp_tx })
			.await
			.map_err(|_| SendRejected::ChannelClosed)?;
		resp_rx.await.map_err(|_| SendRejected::ChannelClosed)?
	}

	async fn send(&self, command: ClientCommand) -> anyhow::Result<()> {
		self.control_tx.send(command).await.context("client task stopped")
	}
}

/// Spawn a client run loop; returns the control handle, the event stream
/// and the loop's join handle.
pub fn spawn_client(
	settings: Arc<StreamtipSettings>,
	auth: AuthController,
) -> (StreamtipHandle, mpsc::Receiver<ClientEvent>, JoinHandle<()>) {
	let (control_tx, control_rx) = mpsc::channel(CONTROL_BUFFER);
	let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
	let client = StreamtipClient::new(settings, auth);
	let task = tokio::spawn(client.run(control_rx, events_tx));
	(StreamtipHandle { control_tx }, events_rx, task)
}

/// Session state owned by the run loop.
pub struct StreamtipClient {
	settings: Arc<StreamtipSettings>,
	auth: AuthController,
	http: reqwest::Client,
	state: ConnectionState,
	/// Connect was requested and waits on the token refresh outcome.
	pending_connect: bool,
}

impl StreamtipClient {
	pub fn new(settings: Arc<StreamtipSettings>, auth: AuthController) -> Self {
		Self { settings, auth, http: reqwest::Client::new(), state: ConnectionState::NotConnected, pending_connect: false }
	}

	pub async fn run(mut self, mut control_rx: mpsc::Receiver<ClientCommand>, events_tx: mpsc::Sender<ClientEvent>) {
		let (auth_tx, mut auth_rx) = mpsc::channel::<AuthOutcome>(4);
		let (send_done_tx, mut send_done_rx) = mpsc::channel::<()>(4);
		let mut ws: Option<Ws> = None;
		let mut heartbeat: Option<Interval> = None;
		let mut donation_task: Option<JoinHandle<()>> = None;

		loop {
			let ws_active = ws.is_some();
			let heartbeat_active = heartbeat.is_some() && ws.is_some();

			tokio::select! {
				command = control_rx.recv() => {
					let Some(command) = command else { break };
					match command {
						ClientCommand::Connect => {
							if self.state != ConnectionState::NotConnected {
								debug!(state = %self.state, "connect ignored; session already active");
								continue;
							}
							self.set_state(ConnectionState::Connecting, &events_tx).await;
							self.pending_connect = true;
							self.auth.begin_refresh(auth_tx.clone());
						}
						ClientCommand::Disconnect => {
							if let Some(task) = donation_task.take() {
								task.abort();
							}
							heartbeat = None;
							self.pending_connect = false;
							if let Some(mut socket) = ws.take() {
								let _ = socket.close(None).await;
							}
							self.set_state(ConnectionState::NotConnected, &events_tx).await;
						}
						ClientCommand::RefreshAccessToken => {
							self.auth.begin_refresh(auth_tx.clone());
						}
						ClientCommand::CancelAuth => {
							if let Some(outcome) = self.auth.cancel() {
								self.handle_auth_outcome(outcome, &mut ws, &mut heartbeat, &events_tx).await;
							}
						}
						ClientCommand::SendDonation { request, resp } => {
							let decision = self.start_donation_send(&request, &mut donation_task, send_done_tx.clone());
							let _ = resp.send(decision);
						}
						ClientCommand::Shutdown => break,
					}
				}

				Some(outcome) = auth_rx.recv() => {
					if !self.auth.is_refreshing() {
						debug!("dropping stale auth outcome");
						continue;
					}
					self.handle_auth_outcome(outcome, &mut ws, &mut heartbeat, &events_tx).await;
				}

				Some(()) = send_done_rx.recv() => {
					donation_task = None;
				}

				message = async {
					match ws.as_mut() {
						Some(socket) => socket.next().await,
						None => std::future::pending().await,
					}
				}, if ws_active => {
					let Some(message) = message else {
						debug!("websocket stream ended");
						heartbeat = None;
						ws = None;
						self.set_state(ConnectionState::NotConnected, &events_tx).await;
						continue;
					};
					match message {
						Ok(Message::Text(text)) => self.handle_text_frame(&text, &mut heartbeat, &events_tx),
						Ok(Message::Ping(payload)) => {
							if let Some(socket) = ws.as_mut() {
								let _ = socket.send(Message::Pong(payload)).await;
							}
						}
						Ok(Message::Close(frame)) => {
							debug!(?frame, "websocket closed by server");
							heartbeat = None;
							ws = None;
							self.set_state(ConnectionState::NotConnected, &events_tx).await;
						}
						Ok(_) => {}
						Err(err) => {
							// Read errors alone do not change state; the
							// close that follows does.
							warn!(error = %err, "websocket read error");
						}
					}
				}

				_ = async {
					match heartbeat.as_mut() {
						Some(timer) => {
							timer.tick().await;
						}
						None => std::future::pending().await,
					}
				}, if heartbeat_active => {
					if let Some(socket) = ws.as_mut()
						&& let Err(err) = socket.send(Message::Text(HEARTBEAT_FRAME.into())).await
					{
						warn!(error = %err, "heartbeat send failed");
					}
				}
			}
		}

		if let Some(task) = donation_task.take() {
			task.abort();
		}
		if let Some(mut socket) = ws.take() {
			let _ = socket.close(None).await;
		}
		info!("client run loop stopped");
	}

	async fn handle_auth_outcome(
		&mut self,
		outcome: AuthOutcome,
		ws: &mut Option<Ws>,
		heartbeat: &mut Option<Interval>,
		events_tx: &mpsc::Sender<ClientEvent>,
	) {
		let success = self.auth.complete_refresh(&outcome);
		if events_tx.send(ClientEvent::AccessTokenRefreshed { success }).await.is_err() {
			debug!("event receiver dropped");
		}
		if !self.pending_connect {
			return;
		}
		self.pending_connect = false;

		// A failed refresh still attempts the websocket; the endpoint is the
		// one that decides whether the socket token is acceptable.
		match self.open_websocket().await {
			Ok(socket) => {
				*ws = Some(socket);
				*heartbeat = None;
				self.set_state(ConnectionState::Connected, events_tx).await;
			}
			Err(err) => {
				warn!(error = %err, "websocket connect failed");
				self.set_state(ConnectionState::NotConnected, events_tx).await;
			}
		}
	}

	async fn open_websocket(&self) -> anyhow::Result<Ws> {
		let socket_token = self.auth.socket_token().map(|token| token.expose().to_string()).unwrap_or_default();
		let url = format!(
			"{}/socket.io/?token={}&EIO=3&transport=websocket",
			self.settings.realtime_uri.trim_end_matches('/'),
			urlencoding::encode(&socket_token),
		);
		let connect = connect_async(url.as_str());
		let connected = match self.settings.connect_timeout() {
			Some(limit) => tokio::time::timeout(limit, connect).await.context("realtime websocket connect timed out")?,
			None => connect.await,
		};
		let (socket, _response) = connected.context("connect realtime websocket")?;
		debug!("realtime websocket established");
		Ok(socket)
	}

	fn handle_text_frame(
		&mut self,
		text: &str,
		heartbeat: &mut Option<Interval>,
		events_tx: &mpsc::Sender<ClientEvent>,
	) {
		if self.settings.emit_debug_messages {
			debug!(frame = %text, "inbound frame");
		}
		metrics::counter!("streamtip_frames_total").increment(1);

		match socketio::decode_frame(text) {
			Ok(Frame::Open(handshake)) => {
				// Replacing the slot drops any previous timer, so there is
				// never more than one heartbeat sender. The first tick fires
				// immediately: beat first, then wait the negotiated interval.
				let period = Duration::from_millis(handshake.ping_timeout.max(1));
				let mut timer = interval_at(Instant::now(), period);
				timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
				*heartbeat = Some(timer);
				debug!(ping_timeout_ms = handshake.ping_timeout, "heartbeat negotiated");
			}
			Ok(Frame::Event(payload)) => match socketio::donation_from_event(&payload) {
				Ok(Some(donation)) => {
					metrics::counter!("streamtip_donations_received_total").increment(1);
					if events_tx.try_send(ClientEvent::Donation(donation)).is_err() {
						warn!("event channel full; dropping donation event");
					}
				}
				Ok(None) => {}
				Err(err) => warn!(error = %err, "failed to decode event payload"),
			},
			Ok(Frame::Other) => {}
			Err(err) => warn!(error = %err, "failed to decode frame"),
		}
	}

	fn start_donation_send(
		&self,
		request: &DonationRequest,
		donation_task: &mut Option<JoinHandle<()>>,
		done_tx: mpsc::Sender<()>,
	) -> Result<(), SendRejected> {
		if donation_task.is_some() {
			warn!("donation send rejected: one is already in progress");
			return Err(SendRejected::AlreadySending);
		}
		if self.state != ConnectionState::Connected {
			warn!(state = %self.state, "donation send rejected: not connected");
			return Err(SendRejected::NotConnected);
		}

		let access_token = self.auth.access_token().map(|token| token.expose().to_string()).unwrap_or_default();
		let form = [
			("name", request.name.clone()),
			("message", request.message.clone()),
			("identifier", request.identifier.clone()),
			("amount", format_amount(request.amount)),
			("currency", request.currency.clone()),
			("access_token", access_token),
		];
		let http = self.http.clone();
		let uri = self.settings.donations_uri.clone();

		*donation_task = Some(tokio::spawn(async move {
			let result = http
				.post(uri)
				.header("Accept", "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8")
				.form(&form)
				.send()
				.await;
			match result {
				Ok(response) if response.status().is_success() => debug!("donation submitted"),
				Ok(response) => {
					metrics::counter!("streamtip_donation_send_errors_total").increment(1);
					warn!(status = %response.status(), "donation submit failed");
				}
				Err(err) => {
					metrics::counter!("streamtip_donation_send_errors_total").increment(1);
					warn!(error = %err, "donation submit failed");
				}
			}
			let _ = done_tx.send(()).await;
		}));
		Ok(())
	}

	/// Transition-only emission; a repeated state stays silent. State
	/// changes are rare and ordering-critical, so they block on channel
	/// capacity instead of being dropped.
	async fn set_state(&mut self, next: ConnectionState, events_tx: &mpsc::Sender<ClientEvent>) {
		if self.state == next {
			return;
		}
		self.state = next;
		info!(state = %next, "connection state changed");
		if events_tx.send(ClientEvent::ConnectionStateChanged(next)).await.is_err() {
			debug!("event receiver dropped");
		}
	}
}

/// Locale-independent decimal rendering for the donation form.
fn format_amount(amount: f64) -> String {
	format!("{amount}")
}
