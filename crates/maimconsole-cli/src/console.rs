//! Console output sink.
//!
//! All user-facing text goes through one shared writer so lines printed by
//! the socket task never interleave with the prompt written by the input task.

use std::io::{self, Write};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use maimconsole_core::envelope::Identity;

/// Prompt shown before each line of input in interactive mode.
pub const PROMPT: &str = "Enter message (or 'exit' to quit): ";

/// Carriage return plus "erase to end of line".
const CLEAR_LINE: &str = "\r\x1b[K";

/// Cloneable handle to the console writer.
#[derive(Clone)]
pub struct Console {
    out: Arc<Mutex<Box<dyn Write + Send>>>,
    /// Whether a human is typing at a terminal (prompt and line clearing).
    interactive: bool,
}

impl Console {
    pub fn new(out: impl Write + Send + 'static, interactive: bool) -> Self {
        Self {
            out: Arc::new(Mutex::new(Box::new(out))),
            interactive,
        }
    }

    /// Console over the process stdout.
    pub fn stdout(interactive: bool) -> Self {
        Self::new(io::stdout(), interactive)
    }

    /// Print who the operator is speaking as once the session is up.
    pub fn banner(&self, identity: &Identity) {
        let chat = identity.group.as_ref().map_or_else(
            || "private chat".to_string(),
            |g| format!("group {} ({})", g.group_name, g.group_id),
        );
        self.notice(&format!(
            "Chatting as {} ({}) on {}, {chat}. Type 'exit' or 'quit' to leave.",
            identity.sender.nickname, identity.sender.user_id, identity.platform
        ));
    }

    /// Show the input prompt.
    pub fn prompt(&self) {
        if self.interactive {
            self.write(PROMPT);
        }
    }

    /// Print a message received from MaimCore.
    pub fn incoming(&self, label: &str, text: &str) {
        self.line(&format!("{label}: {text}"), true);
    }

    /// Print a status line.
    pub fn notice(&self, message: &str) {
        self.line(message, false);
    }

    /// Print a recoverable problem; the prompt is shown again afterwards.
    pub fn warning(&self, message: &str) {
        self.line(&format!("Warning: {message}"), true);
    }

    /// Print a fatal problem.
    pub fn error(&self, message: &str) {
        self.line(&format!("Error: {message}"), false);
    }

    fn line(&self, text: &str, reprompt: bool) {
        let mut buf = String::with_capacity(text.len() + PROMPT.len() + 8);
        if self.interactive {
            buf.push_str(CLEAR_LINE);
        }
        buf.push_str(text);
        buf.push('\n');
        if reprompt && self.interactive {
            buf.push_str(PROMPT);
        }
        self.write(&buf);
    }

    fn write(&self, text: &str) {
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = out.write_all(text.as_bytes()).and_then(|()| out.flush()) {
            debug!(error = %e, "Console write failed");
        }
    }
}
