//! MaimCore connection session.
//!
//! Owns the WebSocket to the messaging core. The read and write halves sit
//! behind separate locks so a `receive` parked on the socket never blocks a
//! concurrent `send`, and `close` can run from either task.

use std::fmt;
use std::sync::PoisonError;
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, watch};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use maimconsole_core::AdapterConfig;
use maimconsole_core::envelope::{self, Envelope};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Handshake header naming the adapter platform, read by the MaimCore router.
pub const PLATFORM_HEADER: &str = "platform";

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// MaimCore WebSocket URL.
    pub url: String,
    /// Platform name sent in the handshake.
    pub platform: String,
    /// Upper bound for the single connection attempt.
    pub connect_timeout: Duration,
    /// Upper bound for the close handshake.
    pub close_timeout: Duration,
}

impl ConnectionConfig {
    pub fn from_adapter(config: &AdapterConfig) -> Self {
        Self {
            url: config.service_url.trim().to_string(),
            platform: config.platform_name.clone(),
            connect_timeout: config.connect_timeout(),
            ..Default::default()
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8000/ws".to_string(),
            platform: "console_adapter".to_string(),
            connect_timeout: Duration::from_secs(10),
            close_timeout: Duration::from_secs(2),
        }
    }
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Closing => "closing",
        };
        f.write_str(name)
    }
}

/// Outcome of a successful [`ConnectionSession::receive`].
#[derive(Debug)]
pub enum Received {
    Envelope(Envelope),
    /// A frame arrived but is not a usable envelope. The session is still fine.
    Malformed(maimconsole_core::Error),
    /// The peer closed the connection or the session was closed locally.
    Closed,
}

/// One logical connection to MaimCore.
pub struct ConnectionSession {
    config: ConnectionConfig,
    state: watch::Sender<ConnectionState>,
    writer: Mutex<Option<SplitSink<WsStream, Message>>>,
    reader: Mutex<Option<SplitStream<WsStream>>>,
    /// Cancelled when the connection goes away; wakes a parked `receive`.
    teardown: std::sync::Mutex<CancellationToken>,
    /// Set when a write failed, so a woken `receive` reports the failure
    /// instead of a clean close.
    write_failure: std::sync::Mutex<Option<String>>,
}

impl ConnectionSession {
    /// Create a new session (not yet connected).
    pub fn new(config: ConnectionConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            config,
            state,
            writer: Mutex::new(None),
            reader: Mutex::new(None),
            teardown: std::sync::Mutex::new(CancellationToken::new()),
            write_failure: std::sync::Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Make a single connection attempt. No retry.
    pub async fn connect(&self) -> Result<(), SessionError> {
        let mut current = ConnectionState::Disconnected;
        let began = self.state.send_if_modified(|state| {
            current = *state;
            if *state == ConnectionState::Disconnected {
                *state = ConnectionState::Connecting;
                true
            } else {
                false
            }
        });
        if !began {
            return Err(SessionError::AlreadyActive(current));
        }

        info!(url = %self.config.url, platform = %self.config.platform, "Connecting to MaimCore");
        let stream = match self.open().await {
            Ok(stream) => stream,
            Err(e) => {
                self.set_state(ConnectionState::Disconnected);
                warn!(url = %self.config.url, error = %e, "Connection attempt failed");
                return Err(e);
            }
        };

        let (sink, source) = stream.split();
        *self.writer.lock().await = Some(sink);
        *self.reader.lock().await = Some(source);
        *self.teardown.lock().unwrap_or_else(PoisonError::into_inner) = CancellationToken::new();
        self.write_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.set_state(ConnectionState::Connected);

        info!(url = %self.config.url, "Connected to MaimCore");
        Ok(())
    }

    async fn open(&self) -> Result<WsStream, SessionError> {
        let request = self.handshake_request()?;
        let attempt = tokio::time::timeout(self.config.connect_timeout, connect_async(request));
        match attempt.await {
            Ok(Ok((stream, response))) => {
                debug!(status = %response.status(), "WebSocket handshake complete");
                Ok(stream)
            }
            Ok(Err(e)) => Err(SessionError::Connect {
                url: self.config.url.clone(),
                reason: e.to_string(),
            }),
            Err(_) => Err(SessionError::ConnectTimeout {
                url: self.config.url.clone(),
                timeout: self.config.connect_timeout,
            }),
        }
    }

    fn handshake_request(&self) -> Result<Request, SessionError> {
        let invalid = |reason: String| SessionError::InvalidUrl {
            url: self.config.url.clone(),
            reason,
        };
        let mut request = self
            .config
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| invalid(e.to_string()))?;
        let platform = HeaderValue::from_str(&self.config.platform)
            .map_err(|e| invalid(format!("platform name is not a valid header value: {e}")))?;
        request.headers_mut().insert(PLATFORM_HEADER, platform);
        Ok(request)
    }

    /// Serialize and transmit one envelope.
    pub async fn send(&self, envelope: &Envelope) -> Result<(), SessionError> {
        if !self.is_connected() {
            return Err(SessionError::NotConnected);
        }
        let payload = envelope::to_wire(envelope)?;
        debug!(message_id = %envelope.message_id, frame = %payload, "Sending frame");

        let mut writer = self.writer.lock().await;
        let Some(sink) = writer.as_mut() else {
            return Err(SessionError::NotConnected);
        };
        if let Err(e) = sink.send(Message::text(payload)).await {
            writer.take();
            drop(writer);
            let reason = e.to_string();
            self.fail_write(&reason);
            return Err(SessionError::Transport(reason));
        }
        Ok(())
    }

    /// A write failed: record why before waking the reader.
    fn fail_write(&self, reason: &str) {
        warn!(error = %reason, "WebSocket write failed");
        *self
            .write_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(reason.to_string());
        self.mark_lost();
    }

    /// Wait for the next inbound envelope.
    ///
    /// Returns [`Received::Closed`] promptly once [`close`](Self::close) runs
    /// on another task, and `Err(Transport)` once a concurrent `send` fails.
    pub async fn receive(&self) -> Result<Received, SessionError> {
        let teardown = self.teardown_token();
        let mut reader = self.reader.lock().await;
        loop {
            let Some(source) = reader.as_mut() else {
                return self.ended();
            };
            let next = tokio::select! {
                biased;
                () = teardown.cancelled() => None,
                frame = source.next() => Some(frame),
            };
            let Some(frame) = next else {
                reader.take();
                return self.ended();
            };

            match frame {
                Some(Ok(Message::Text(text))) => {
                    debug!(frame = %text.as_str(), "Received frame");
                    return Ok(decode_frame(text.as_bytes()));
                }
                Some(Ok(Message::Binary(bytes))) => {
                    debug!(len = bytes.len(), "Received binary frame");
                    return Ok(decode_frame(&bytes));
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                Some(Ok(Message::Close(frame))) => {
                    info!(?frame, "MaimCore closed the connection");
                    reader.take();
                    drop(reader);
                    self.mark_lost();
                    return Ok(Received::Closed);
                }
                None => {
                    info!("MaimCore connection stream ended");
                    reader.take();
                    drop(reader);
                    self.mark_lost();
                    return Ok(Received::Closed);
                }
                Some(Err(e)) => {
                    warn!(error = %e, "WebSocket read failed");
                    reader.take();
                    drop(reader);
                    self.mark_lost();
                    return Err(SessionError::Transport(e.to_string()));
                }
            }
        }
    }

    /// Close the session. Idempotent.
    ///
    /// Returns `true` only for the call that performed the teardown.
    pub async fn close(&self) -> bool {
        let began = self.state.send_if_modified(|state| {
            if *state == ConnectionState::Connected {
                *state = ConnectionState::Closing;
                true
            } else {
                false
            }
        });
        if !began {
            debug!(state = %self.state(), "Close requested on inactive session");
            return false;
        }

        info!("Closing MaimCore connection");
        self.teardown_token().cancel();

        let sink = tokio::time::timeout(self.config.close_timeout, async {
            self.writer.lock().await.take()
        })
        .await
        .ok()
        .flatten();
        if let Some(mut sink) = sink {
            match tokio::time::timeout(self.config.close_timeout, sink.close()).await {
                Ok(Ok(())) => debug!("Close frame sent"),
                Ok(Err(e)) => debug!(error = %e, "Close frame not delivered"),
                Err(_) => warn!("Close handshake timed out"),
            }
        }
        // A parked receive drops the read half itself once it sees the cancel.
        if let Ok(mut reader) = self.reader.try_lock() {
            reader.take();
        }

        self.set_state(ConnectionState::Disconnected);
        info!("Disconnected from MaimCore");
        true
    }

    /// Outcome for a reader whose connection is already gone.
    fn ended(&self) -> Result<Received, SessionError> {
        let failure = self
            .write_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match failure {
            Some(reason) => Err(SessionError::Transport(reason)),
            None => Ok(Received::Closed),
        }
    }

    /// Peer went away: `Connected -> Disconnected` without passing `Closing`.
    fn mark_lost(&self) {
        let lost = self.state.send_if_modified(|state| {
            if *state == ConnectionState::Connected {
                *state = ConnectionState::Disconnected;
                true
            } else {
                false
            }
        });
        if lost {
            self.teardown_token().cancel();
            if let Ok(mut writer) = self.writer.try_lock() {
                writer.take();
            }
        }
    }

    fn set_state(&self, next: ConnectionState) {
        self.state.send_modify(|state| *state = next);
        debug!(state = %next, "Connection state changed");
    }

    fn teardown_token(&self) -> CancellationToken {
        self.teardown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

fn decode_frame(raw: &[u8]) -> Received {
    match envelope::decode(raw) {
        Ok(envelope) => Received::Envelope(envelope),
        Err(e) => Received::Malformed(e),
    }
}

/// Session errors.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Invalid MaimCore URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Connection to {url} failed: {reason}")]
    Connect { url: String, reason: String },

    #[error("Connection to {url} timed out after {timeout:?}")]
    ConnectTimeout { url: String, timeout: Duration },

    #[error("Not connected to MaimCore")]
    NotConnected,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error(transparent)]
    Encode(#[from] maimconsole_core::Error),

    #[error("Session is already {0}")]
    AlreadyActive(ConnectionState),
}
