//! Streamed terminal relay.
//!
//! Two pumps run per session:
//! - the **ingest pump** reads socket frames and pushes their bytes into a
//!   bounded pipeline (a `flume` channel), finalizing it when the socket ends
//! - the **line pump** drains the pipeline, reassembles lines, classifies them
//!   and forwards output, resolving the completion slot when the prompt is the
//!   last thing seen with nothing further pending
//!
//! Callers submit commands through [`TerminalRelay::submit_command`], optionally
//! suspending until the line pump reports completion.

use std::sync::Arc;

use cs_core::config::TerminalConfig;
use cs_core::types::TerminalEndpoint;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace, warn};

use crate::classifier::{LineAction, LineClassifier, Markers};
use crate::completion::CompletionSlot;
use crate::line_buffer::LineAssembler;
use crate::sink::OutputSink;

/// ASCII end-of-transmission; ends the remote interactive loop.
pub const END_OF_TRANSMISSION: u8 = 0x04;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("terminal session is closed")]
    SessionClosed,

    #[error("a command is already awaiting completion")]
    CompletionPending,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("terminal socket error: {0}")]
    Socket(#[from] tungstenite::Error),

    #[error("remote shell did not become ready within {0:?}")]
    StartupTimeout(std::time::Duration),
}

pub type Result<T> = std::result::Result<T, RelayError>;

fn send_error(err: tungstenite::Error) -> RelayError {
    match err {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            RelayError::SessionClosed
        }
        other => RelayError::Socket(other),
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Observable relay state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayStatus {
    pub socket: SocketState,
    /// Flips false → true once, on the echo of the set-prompt command.
    pub initialized: bool,
    /// The first prompt after initialization has been confirmed. Until then
    /// a prompt still in flight would be mistaken for a command's completion.
    pub prompt_seen: bool,
    /// The line pump has consumed the finalized pipeline and exited.
    pub drained: bool,
}

/// State shared between the caller and the pumps.
#[derive(Debug)]
struct Shared {
    status: watch::Sender<RelayStatus>,
    completion: CompletionSlot,
}

impl Shared {
    fn new() -> Self {
        let (status, _) = watch::channel(RelayStatus {
            socket: SocketState::Connecting,
            initialized: false,
            prompt_seen: false,
            drained: false,
        });
        Self {
            status,
            completion: CompletionSlot::new(),
        }
    }

    fn status(&self) -> RelayStatus {
        *self.status.borrow()
    }

    fn set_socket(&self, state: SocketState) {
        self.status.send_modify(|s| s.socket = state);
    }
}

// ---------------------------------------------------------------------------
// TerminalRelay
// ---------------------------------------------------------------------------

/// A live relay over one terminal socket.
pub struct TerminalRelay {
    writer: Mutex<WsSink>,
    shared: Arc<Shared>,
    ingest: JoinHandle<()>,
    lines: JoinHandle<()>,
}

impl TerminalRelay {
    /// Open the terminal socket and start both pumps.
    pub async fn connect(
        endpoint: &TerminalEndpoint,
        config: &TerminalConfig,
        sink: Arc<dyn OutputSink>,
    ) -> Result<Self> {
        info!(socket_uri = %endpoint.socket_uri, "connecting terminal socket");
        let (ws, _response) = tokio_tungstenite::connect_async(endpoint.socket_uri.as_str()).await?;
        let (writer, reader) = ws.split();

        let shared = Arc::new(Shared::new());
        let (pipe_tx, pipe_rx) = flume::bounded(config.pipeline_capacity);
        shared.set_socket(SocketState::Open);

        let ingest = tokio::spawn(ingest_pump(reader, pipe_tx, shared.clone()));
        let pump = LinePump::new(config, sink, shared.clone());
        let lines = tokio::spawn(pump.run(pipe_rx));

        Ok(Self {
            writer: Mutex::new(writer),
            shared,
            ingest,
            lines,
        })
    }

    pub fn status(&self) -> RelayStatus {
        self.shared.status()
    }

    pub fn socket_state(&self) -> SocketState {
        self.status().socket
    }

    pub fn is_initialized(&self) -> bool {
        self.status().initialized
    }

    /// Suspend until the startup handshake completes and its trailing prompt
    /// has been consumed, or fail once the session has ended without that.
    pub async fn wait_ready(&self) -> Result<()> {
        let mut rx = self.shared.status.subscribe();
        let status = *rx
            .wait_for(|s| s.prompt_seen || s.drained)
            .await
            .map_err(|_| RelayError::SessionClosed)?;
        if status.prompt_seen {
            Ok(())
        } else {
            Err(RelayError::SessionClosed)
        }
    }

    /// Send `text` followed by a blank line and, if `wait_for_completion`,
    /// suspend until the remote prompt reappears.
    pub async fn submit_command(&self, text: &str, wait_for_completion: bool) -> Result<()> {
        let payload = frame_command(text);
        debug!(bytes = payload.len(), wait_for_completion, "submitting command");
        self.transmit(Message::Text(payload.into()), wait_for_completion)
            .await
    }

    /// Send `bytes` unmodified as a single frame.
    pub async fn submit_raw_bytes(&self, bytes: &[u8], wait_for_completion: bool) -> Result<()> {
        let message = match std::str::from_utf8(bytes) {
            Ok(text) => Message::Text(text.to_owned().into()),
            Err(_) => Message::Binary(bytes.to_vec().into()),
        };
        debug!(bytes = bytes.len(), wait_for_completion, "submitting raw bytes");
        self.transmit(message, wait_for_completion).await
    }

    async fn transmit(&self, message: Message, wait_for_completion: bool) -> Result<()> {
        if self.socket_state() != SocketState::Open {
            return Err(RelayError::SessionClosed);
        }

        let wait = if wait_for_completion {
            let wait = self.shared.completion.arm()?;
            // The line pump resolves armed waits on its way out; if it has
            // already left, nobody ever will.
            if self.status().drained {
                self.shared.completion.clear();
                return Err(RelayError::SessionClosed);
            }
            Some(wait)
        } else {
            None
        };

        let sent = self.writer.lock().await.send(message).await;
        if let Err(e) = sent {
            if wait.is_some() {
                self.shared.completion.clear();
            }
            return Err(send_error(e));
        }

        match wait {
            Some(wait) => wait.wait().await,
            None => Ok(()),
        }
    }

    /// Send a close frame. The pumps finalize once the peer acknowledges.
    pub async fn close(&self) -> Result<()> {
        self.shared.status.send_if_modified(|s| {
            let open = s.socket == SocketState::Open;
            if open {
                s.socket = SocketState::Closing;
            }
            open
        });
        self.writer
            .lock()
            .await
            .send(Message::Close(None))
            .await
            .map_err(send_error)
    }
}

impl Drop for TerminalRelay {
    fn drop(&mut self) {
        self.ingest.abort();
        self.lines.abort();
    }
}

impl std::fmt::Debug for TerminalRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerminalRelay")
            .field("status", &self.status())
            .field("completion_armed", &self.shared.completion.is_armed())
            .finish()
    }
}

/// Strip trailing line terminators and append exactly one blank line, which
/// the remote shell needs to accept multi-line input.
pub fn frame_command(text: &str) -> String {
    let mut payload = text.trim_end_matches(['\r', '\n']).to_string();
    payload.push_str("\n\n");
    payload
}

// ---------------------------------------------------------------------------
// Pumps
// ---------------------------------------------------------------------------

/// Socket → pipeline. Read errors and close frames both just end the
/// pipeline; dropping `tx` is the end-of-data signal.
async fn ingest_pump(
    mut reader: SplitStream<WsStream>,
    tx: flume::Sender<Vec<u8>>,
    shared: Arc<Shared>,
) {
    while let Some(frame) = reader.next().await {
        let bytes = match frame {
            Ok(Message::Text(text)) => text.as_bytes().to_vec(),
            Ok(Message::Binary(data)) => data.to_vec(),
            Ok(Message::Close(frame)) => {
                debug!(?frame, "terminal socket closed by peer");
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                warn!(error = %e, "terminal socket read failed, finalizing pipeline");
                break;
            }
        };
        if bytes.is_empty() {
            continue;
        }
        if tx.send_async(bytes).await.is_err() {
            break;
        }
    }
    shared.set_socket(SocketState::Closed);
    debug!("ingest pump finished");
}

/// Pipeline → lines → classifier → sink / completion.
struct LinePump {
    classifier: LineClassifier,
    banner: String,
    sink: Arc<dyn OutputSink>,
    shared: Arc<Shared>,
    /// The last line seen was the prompt and it was the last complete line available.
    tentative: bool,
}

impl LinePump {
    fn new(config: &TerminalConfig, sink: Arc<dyn OutputSink>, shared: Arc<Shared>) -> Self {
        Self {
            classifier: LineClassifier::new(Markers::from(config)),
            banner: config.welcome_banner.clone(),
            sink,
            shared,
            tentative: false,
        }
    }

    async fn run(mut self, rx: flume::Receiver<Vec<u8>>) {
        let mut assembler = LineAssembler::new();
        loop {
            while let Some(raw) = assembler.next_line() {
                let is_last = !assembler.has_complete_line();
                self.handle(&decode(raw), is_last);
            }

            let chunk = match rx.try_recv() {
                Ok(chunk) => chunk,
                Err(_) => {
                    // Drained: a tentative prompt is now confirmed.
                    if std::mem::take(&mut self.tentative) {
                        self.confirm_prompt();
                    }
                    match rx.recv_async().await {
                        Ok(chunk) => chunk,
                        Err(_) => break,
                    }
                }
            };
            assembler.push(&chunk);
        }

        if let Some(raw) = assembler.finish() {
            self.handle(&decode(raw), true);
        }
        self.shared.status.send_modify(|s| s.drained = true);
        if self.shared.completion.resolve(Err(RelayError::SessionClosed)) {
            debug!("pending completion failed: session closed");
        }
        debug!("line pump finished");
    }

    fn confirm_prompt(&self) {
        self.shared.status.send_if_modified(|s| !std::mem::replace(&mut s.prompt_seen, true));
        self.shared.completion.resolve(Ok(()));
    }

    fn handle(&mut self, line: &str, is_last: bool) {
        self.tentative = false;
        match self.classifier.classify(line) {
            LineAction::Welcome => self.sink.write_line(&self.banner),
            LineAction::ForwardAndSignal => {
                self.sink.write_line(line);
                self.shared.completion.resolve(Ok(()));
            }
            LineAction::Forward => self.sink.write_line(line),
            LineAction::BecomeReady => {
                info!("remote shell initialized");
                self.shared.status.send_modify(|s| s.initialized = true);
            }
            LineAction::Prompt => self.tentative = is_last,
            LineAction::Drop => trace!(line, "dropping startup output"),
        }
    }
}

fn decode(raw: Vec<u8>) -> String {
    match String::from_utf8(raw) {
        Ok(line) => line,
        Err(e) => {
            let err = RelayError::Protocol(format!(
                "invalid UTF-8 after {} bytes",
                e.utf8_error().valid_up_to()
            ));
            warn!(%err, "decoding line lossily");
            String::from_utf8_lossy(e.as_bytes()).into_owned()
        }
    }
}
