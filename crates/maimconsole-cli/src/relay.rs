//! Console <-> MaimCore relay loop.
//!
//! Two tasks run until shutdown: one reads operator lines and sends them as
//! envelopes, the other waits on the socket and prints replies. Either task,
//! or the interrupt future, can end the session; the [`Shutdown`] flag makes
//! sure only one of them tears it down.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use maimconsole_core::AdapterConfig;
use maimconsole_core::envelope::{self, Identity};

use crate::connection::{ConnectionConfig, ConnectionSession, Received, SessionError};
use crate::console::Console;
use crate::shutdown::{ExitReason, Shutdown};

/// Console lines that end the session (compared trimmed, ignoring case).
pub const TERMINATION_COMMANDS: [&str; 2] = ["exit", "quit"];

/// How long `run` waits for each activity to wind down before aborting it.
const TASK_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// What the operator typed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleInput<'a> {
    Exit,
    Blank,
    Message(&'a str),
}

/// Classify one console line.
pub fn parse_input(line: &str) -> ConsoleInput<'_> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        ConsoleInput::Blank
    } else if TERMINATION_COMMANDS
        .iter()
        .any(|cmd| trimmed.eq_ignore_ascii_case(cmd))
    {
        ConsoleInput::Exit
    } else {
        ConsoleInput::Message(line.trim_end_matches(['\r', '\n']))
    }
}

/// Connect to MaimCore and relay until shutdown.
///
/// A failed connection is reported once and returned as
/// [`ExitReason::ConnectFailed`]; there is no retry. The interrupt is
/// already honoured while the connection attempt is pending.
pub async fn start<R, I>(
    config: &AdapterConfig,
    console: Console,
    input: R,
    interrupt: I,
) -> ExitReason
where
    R: AsyncBufRead + Unpin + Send + 'static,
    I: Future<Output = ()> + Send,
{
    let session = Arc::new(ConnectionSession::new(ConnectionConfig::from_adapter(
        config,
    )));
    console.notice(&format!("Connecting to MaimCore at {}...", session.config().url));

    let mut interrupt = std::pin::pin!(interrupt);
    let connected = tokio::select! {
        () = &mut interrupt => {
            info!("Interrupted while connecting");
            console.notice("Interrupted before the connection was established.");
            return ExitReason::Interrupted;
        }
        result = session.connect() => result,
    };
    if let Err(e) = connected {
        error!(error = %e, "Could not connect to MaimCore");
        console.error(&format!("Could not connect to MaimCore: {e}"));
        return ExitReason::ConnectFailed(e.to_string());
    }
    console.notice("Connected to MaimCore.");
    let identity = config.identity();
    info!(private = identity.is_private(), "Relaying console input");
    console.banner(&identity);

    RelayLoop::new(session, identity, console)
        .run(input, interrupt)
        .await
}

/// Relay between the console and a connected session.
pub struct RelayLoop {
    inner: Arc<Relay>,
}

struct Relay {
    session: Arc<ConnectionSession>,
    identity: Identity,
    console: Console,
    shutdown: Shutdown,
}

impl RelayLoop {
    pub fn new(session: Arc<ConnectionSession>, identity: Identity, console: Console) -> Self {
        Self {
            inner: Arc::new(Relay {
                session,
                identity,
                console,
                shutdown: Shutdown::new(),
            }),
        }
    }

    /// Run both activities until shutdown; returns why the loop stopped.
    pub async fn run<R, I>(self, input: R, interrupt: I) -> ExitReason
    where
        R: AsyncBufRead + Unpin + Send + 'static,
        I: Future<Output = ()> + Send,
    {
        let console_task = tokio::spawn(Arc::clone(&self.inner).console_activity(input));
        let socket_task = tokio::spawn(Arc::clone(&self.inner).socket_activity());

        tokio::select! {
            () = interrupt => {
                info!("Interrupt received");
                self.inner.begin_shutdown(ExitReason::Interrupted).await;
            }
            () = self.inner.shutdown.cancelled() => {}
        }

        join_bounded("console", console_task).await;
        join_bounded("socket", socket_task).await;
        // No-op unless a task died before closing.
        self.inner.session.close().await;

        let reason = self
            .inner
            .shutdown
            .reason()
            .unwrap_or(ExitReason::Interrupted);
        if reason.is_graceful() {
            info!(reason = %reason, code = reason.exit_code(), "Relay stopped");
        } else {
            warn!(reason = %reason, code = reason.exit_code(), "Relay stopped");
        }
        reason
    }
}

/// Wait for an activity to finish, aborting it if it does not within
/// [`TASK_JOIN_TIMEOUT`].
async fn join_bounded(name: &str, mut task: JoinHandle<()>) {
    match tokio::time::timeout(TASK_JOIN_TIMEOUT, &mut task).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(task = name, error = %e, "Relay task failed"),
        Err(_) => {
            warn!(task = name, "Relay task did not stop in time, aborting");
            task.abort();
        }
    }
}

impl Relay {
    async fn console_activity<R>(self: Arc<Self>, input: R)
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = input.lines();
        loop {
            self.console.prompt();
            let line = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                line = lines.next_line() => line,
            };
            match line {
                Ok(Some(line)) => {
                    if !self.handle_line(&line).await {
                        break;
                    }
                }
                Ok(None) => {
                    info!("Console input closed");
                    self.begin_shutdown(ExitReason::InputClosed).await;
                    break;
                }
                Err(e) => {
                    error!(error = %e, "Failed to read console input");
                    self.console.error(&format!("Cannot read console input: {e}"));
                    self.begin_shutdown(ExitReason::InputClosed).await;
                    break;
                }
            }
        }
        debug!("Console activity finished");
    }

    /// Returns `false` once the console loop should stop.
    async fn handle_line(&self, line: &str) -> bool {
        match parse_input(line) {
            ConsoleInput::Blank => true,
            ConsoleInput::Exit => {
                info!("Operator requested exit");
                self.begin_shutdown(ExitReason::OperatorExit).await;
                false
            }
            ConsoleInput::Message(text) => self.forward(text).await,
        }
    }

    async fn forward(&self, text: &str) -> bool {
        let envelope = match envelope::encode(text, &self.identity) {
            Ok(envelope) => envelope,
            Err(e) => {
                error!(error = %e, "Dropping message that could not be encoded");
                self.console.warning(&format!("Message not sent: {e}"));
                return true;
            }
        };

        // A send stalled on backpressure must not hold up shutdown.
        let sent = tokio::select! {
            biased;
            () = self.shutdown.cancelled() => {
                debug!(message_id = %envelope.message_id, "Send abandoned on shutdown");
                return false;
            }
            sent = self.session.send(&envelope) => sent,
        };
        match sent {
            Ok(()) => {
                info!(message_id = %envelope.message_id, "Message sent to MaimCore");
                true
            }
            Err(SessionError::Encode(e)) => {
                error!(error = %e, "Dropping message that could not be serialized");
                self.console.warning(&format!("Message not sent: {e}"));
                true
            }
            Err(e) => {
                if self.shutdown.is_triggered() {
                    return false;
                }
                error!(error = %e, "Send failed");
                self.console.error(&format!("Failed to send message: {e}"));
                self.begin_shutdown(ExitReason::TransportFailed(e.to_string()))
                    .await;
                false
            }
        }
    }

    async fn socket_activity(self: Arc<Self>) {
        loop {
            let received = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                received = self.session.receive() => received,
            };
            match received {
                Ok(Received::Envelope(envelope)) => {
                    debug!(
                        message_id = %envelope.message_id,
                        segments = envelope.segments.len(),
                        "Reply from MaimCore"
                    );
                    self.console.incoming(
                        envelope::display_label(&envelope),
                        &envelope::render_for_display(&envelope),
                    );
                }
                Ok(Received::Malformed(e)) => {
                    warn!(error = %e, "Skipping malformed frame");
                    self.console
                        .warning(&format!("Ignored malformed message from MaimCore: {e}"));
                }
                Ok(Received::Closed) => {
                    if self.shutdown.trigger(ExitReason::PeerClosed) {
                        self.console
                            .notice("Disconnected: MaimCore closed the connection.");
                        self.session.close().await;
                    }
                    break;
                }
                Err(e) => {
                    if self.shutdown.trigger(ExitReason::TransportFailed(e.to_string())) {
                        self.console
                            .error(&format!("Connection to MaimCore lost: {e}"));
                        self.session.close().await;
                    }
                    break;
                }
            }
        }
        debug!("Socket activity finished");
    }

    /// Trigger shutdown and close the session if this call is the first.
    async fn begin_shutdown(&self, reason: ExitReason) -> bool {
        let log_reason = reason.to_string();
        if !self.shutdown.trigger(reason) {
            return false;
        }
        info!(reason = %log_reason, "Shutting down relay");
        self.session.close().await;
        true
    }
}
