//! Shared fixtures: an in-process MaimCore stand-in and a capturing console.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{accept_async, accept_hdr_async};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

use maimconsole_core::AdapterConfig;

pub const WAIT: Duration = Duration::from_secs(5);

enum Command {
    Send(Message),
    Close,
    /// Drop the TCP stream without a close frame.
    Drop,
}

/// Accepts a single WebSocket client and records what it sends.
pub struct MockCore {
    pub url: String,
    platform: Option<oneshot::Receiver<Option<String>>>,
    inbound: mpsc::UnboundedReceiver<String>,
    commands: mpsc::UnboundedSender<Command>,
}

impl MockCore {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/ws", listener.local_addr().unwrap());
        let (platform_tx, platform_rx) = oneshot::channel();
        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        let (commands, mut command_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                let platform = req
                    .headers()
                    .get("platform")
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                let _ = platform_tx.send(platform);
                Ok(resp)
            };
            let Ok(mut ws) = accept_hdr_async(stream, callback).await else {
                return;
            };

            loop {
                tokio::select! {
                    frame = ws.next() => match frame {
                        Some(Ok(Message::Text(text))) => {
                            let _ = inbound_tx.send(text.to_string());
                        }
                        Some(Ok(_)) => {}
                        Some(Err(_)) | None => break,
                    },
                    command = command_rx.recv() => match command {
                        Some(Command::Send(message)) => {
                            if ws.send(message).await.is_err() {
                                break;
                            }
                        }
                        Some(Command::Close) => {
                            let _ = ws.close(None).await;
                        }
                        Some(Command::Drop) | None => break,
                    },
                }
            }
        });

        Self {
            url,
            platform: Some(platform_rx),
            inbound,
            commands,
        }
    }

    /// Platform header sent in the client handshake.
    pub async fn platform_header(&mut self) -> Option<String> {
        let rx = self.platform.take().expect("platform header already read");
        tokio::time::timeout(WAIT, rx).await.unwrap().unwrap()
    }

    pub fn send_text(&self, text: impl Into<String>) {
        let message = Message::text(text.into());
        self.commands.send(Command::Send(message)).unwrap();
    }

    /// Send `text` as a binary frame.
    pub fn send_binary(&self, text: &str) {
        let message = Message::binary(text.as_bytes().to_vec());
        self.commands.send(Command::Send(message)).unwrap();
    }

    /// Drop the connection abruptly, as a crashed core would.
    pub fn drop_connection(&self) {
        self.commands.send(Command::Drop).unwrap();
    }

    /// Start the close handshake from the server side.
    pub fn close(&self) {
        self.commands.send(Command::Close).unwrap();
    }

    /// Next text frame from the client, parsed as JSON.
    pub async fn next_frame(&mut self) -> serde_json::Value {
        let text = tokio::time::timeout(WAIT, self.inbound.recv())
            .await
            .expect("timed out waiting for a frame")
            .expect("server task ended");
        serde_json::from_str(&text).unwrap()
    }

    /// Assert the client sends nothing within `window`.
    pub async fn expect_silence(&mut self, window: Duration) {
        if let Ok(Some(text)) = tokio::time::timeout(window, self.inbound.recv()).await {
            panic!("unexpected frame: {text}");
        }
    }

    /// A reply shaped like the ones MaimCore sends back.
    pub fn reply(nickname: &str, text: &str) -> String {
        serde_json::json!({
            "message_info": {
                "platform": "console_adapter",
                "message_id": "reply-1",
                "time": 1_700_000_000.5,
                "user_info": {
                    "platform": "console_adapter",
                    "user_id": "bot",
                    "user_nickname": nickname
                }
            },
            "message_segment": {
                "type": "seglist",
                "data": [{ "type": "text", "data": text }]
            }
        })
        .to_string()
    }
}

/// A core that accepts connections and then never reads from them.
///
/// With `handshake` the WebSocket upgrade completes first; without it the
/// client stays stuck in its connection attempt.
pub async fn stalled_core(handshake: bool) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/ws", listener.local_addr().unwrap());
    tokio::spawn(async move {
        let mut held_tcp = Vec::new();
        let mut held_ws = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            if handshake {
                if let Ok(ws) = accept_async(stream).await {
                    held_ws.push(ws);
                }
            } else {
                held_tcp.push(stream);
            }
        }
    });
    url
}

/// Config pointing at `url` with a private-chat identity.
pub fn adapter_config(url: &str) -> AdapterConfig {
    AdapterConfig {
        service_url: url.to_string(),
        platform_name: "console_adapter".into(),
        user_id: "tester".into(),
        nickname: "Tester".into(),
        connect_timeout_secs: 2,
        ..Default::default()
    }
}

/// A `ws://` URL on a port nothing listens on.
pub async fn unused_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("ws://{addr}/ws")
}

/// Console writer whose output can be inspected.
#[derive(Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Wait until the console output contains `needle`.
pub async fn wait_for(buf: &SharedBuffer, needle: &str) {
    let found = tokio::time::timeout(WAIT, async {
        while !buf.text().contains(needle) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(found.is_ok(), "{needle:?} not printed; output: {:?}", buf.text());
}
