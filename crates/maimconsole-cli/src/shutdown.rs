//! Shutdown coordination.
//!
//! The console task, the socket task and the interrupt handler all race to end
//! the session; the first trigger wins and records why the adapter stops.

use std::fmt;
use std::sync::{Arc, OnceLock};

use tokio_util::sync::CancellationToken;

/// Exit code for a failed startup (configuration or connection).
pub const EXIT_STARTUP_FAILURE: i32 = 1;

/// Why the adapter stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    /// The operator typed `exit` or `quit`.
    OperatorExit,
    /// Console input reached end of file.
    InputClosed,
    /// Ctrl+C or SIGTERM.
    Interrupted,
    /// MaimCore closed the connection.
    PeerClosed,
    /// The connection failed mid-session.
    TransportFailed(String),
    /// The startup connection attempt failed.
    ConnectFailed(String),
}

impl ExitReason {
    /// Process exit code for this reason.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::OperatorExit | Self::InputClosed | Self::Interrupted => 0,
            Self::ConnectFailed(_) => EXIT_STARTUP_FAILURE,
            Self::PeerClosed => 2,
            Self::TransportFailed(_) => 3,
        }
    }

    pub const fn is_graceful(&self) -> bool {
        self.exit_code() == 0
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OperatorExit => f.write_str("operator exit"),
            Self::InputClosed => f.write_str("console input closed"),
            Self::Interrupted => f.write_str("interrupted"),
            Self::PeerClosed => f.write_str("MaimCore closed the connection"),
            Self::TransportFailed(e) => write!(f, "transport failure: {e}"),
            Self::ConnectFailed(e) => write!(f, "connection failed: {e}"),
        }
    }
}

/// Cloneable, process-wide termination flag.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    reason: OnceLock<ExitReason>,
    token: CancellationToken,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown. Returns `true` only for the first caller.
    pub fn trigger(&self, reason: ExitReason) -> bool {
        let first = self.inner.reason.set(reason).is_ok();
        self.inner.token.cancel();
        first
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// Reason recorded by the first trigger.
    pub fn reason(&self) -> Option<ExitReason> {
        self.inner.reason.get().cloned()
    }

    /// Resolves once shutdown has been triggered.
    pub async fn cancelled(&self) {
        self.inner.token.cancelled().await;
    }
}
