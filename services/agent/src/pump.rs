//! Upstream WebSocket client: connects the agent process to its backend,
//! with automatic reconnection, heartbeat pings, and an agent subscription
//! handshake. Binary frames only, MessagePack payloads.
//!
//! State machine per connection:
//!
//! ```text
//! Disconnected --Connect--> Dialing --ok--> Subscribing --ack--> Active
//!                                  |                       |
//!                                  fail                    read/write fail
//!                                  v                       v
//!                              BackoffWait <--- triggerReconnect
//! ```

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use transport_proto::{
    decode, encode, AssistantMessage, AssistantSentence, Envelope, EnvelopeBody, ErrorMessage,
    MemoryTrace, ReasoningStep, ResponseGenerationRequest, StartAnswer, Subscribe, ToolUseRequest,
    ToolUseResult,
};

use crate::config::UpstreamConfig;

#[derive(Debug, thiserror::Error)]
pub enum PumpError {
    #[error("failed to connect to upstream: {0}")]
    Connect(String),
    #[error("websocket error: {0}")]
    Ws(String),
    #[error(transparent)]
    Codec(#[from] transport_proto::CodecError),
}

/// Callbacks invoked as the pump's connection state changes, and for every
/// `ResponseGenerationRequest` the backend sends down.
#[async_trait]
pub trait PumpConsumer: Send + Sync {
    async fn on_response_generation_request(&self, request: ResponseGenerationRequest);

    async fn on_connected(&self) {}
    async fn on_disconnected(&self) {}
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWriter = SplitSink<WsStream, Message>;
type WsReader = SplitStream<WsStream>;

/// The upstream WebSocket client. Create with [`WsPump::new`], then call
/// [`WsPump::connect`] once; it owns its reconnect loop from then on.
pub struct WsPump {
    config: UpstreamConfig,
    consumer: Arc<dyn PumpConsumer>,
    write_half: Mutex<Option<WsWriter>>,
    connected: AtomicBool,
    stanza_counter: AtomicI32,
    cancel: CancellationToken,
    started: AtomicBool,
}

impl WsPump {
    pub fn new(config: UpstreamConfig, consumer: Arc<dyn PumpConsumer>) -> Arc<Self> {
        Arc::new(Self {
            config,
            consumer,
            write_half: Mutex::new(None),
            connected: AtomicBool::new(false),
            stanza_counter: AtomicI32::new(0),
            cancel: CancellationToken::new(),
            started: AtomicBool::new(false),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Start the reconnect loop and attempt one dial. Idempotent: a second
    /// call on an already-started pump is a no-op.
    pub fn connect(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let pump = self.clone();
        tokio::spawn(async move { pump.run_reconnect_loop().await });
    }

    /// Flip to disconnected, cancel all pump tasks, and close the socket.
    /// Idempotent.
    pub async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.cancel.cancel();
        if let Some(mut write) = self.write_half.lock().await.take() {
            let _ = write.close().await;
        }
    }

    /// Assign a fresh positive stanza id, encode, and write. Succeeds
    /// silently without sending anything when disconnected — the message is
    /// dropped by design; the backend drives a resume if one is needed.
    pub async fn send_envelope(&self, mut envelope: Envelope) -> Result<(), PumpError> {
        if !self.is_connected() {
            debug!("dropping outbound envelope: upstream not connected");
            return Ok(());
        }

        let mut guard = self.write_half.lock().await;
        let Some(write) = guard.as_mut() else {
            return Ok(());
        };

        envelope.stanza_id = self.stanza_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let bytes = encode(&envelope)?;

        tokio::time::timeout(self.config.write_timeout, write.send(Message::Binary(bytes.into())))
            .await
            .map_err(|_| PumpError::Ws("write timed out".into()))?
            .map_err(|e| PumpError::Ws(e.to_string()))
    }

    pub async fn send_assistant_message(
        &self,
        conversation_id: &str,
        body: AssistantMessage,
    ) -> Result<(), PumpError> {
        self.send_envelope(Envelope::new(0, conversation_id, EnvelopeBody::AssistantMessage(body)))
            .await
    }

    pub async fn send_assistant_sentence(
        &self,
        conversation_id: &str,
        body: AssistantSentence,
    ) -> Result<(), PumpError> {
        self.send_envelope(Envelope::new(
            0,
            conversation_id,
            EnvelopeBody::AssistantSentence(body),
        ))
        .await
    }

    pub async fn send_tool_use_request(
        &self,
        conversation_id: &str,
        body: ToolUseRequest,
    ) -> Result<(), PumpError> {
        self.send_envelope(Envelope::new(0, conversation_id, EnvelopeBody::ToolUseRequest(body)))
            .await
    }

    pub async fn send_tool_use_result(
        &self,
        conversation_id: &str,
        body: ToolUseResult,
    ) -> Result<(), PumpError> {
        self.send_envelope(Envelope::new(0, conversation_id, EnvelopeBody::ToolUseResult(body)))
            .await
    }

    pub async fn send_memory_trace(
        &self,
        conversation_id: &str,
        body: MemoryTrace,
    ) -> Result<(), PumpError> {
        self.send_envelope(Envelope::new(0, conversation_id, EnvelopeBody::MemoryTrace(body)))
            .await
    }

    pub async fn send_reasoning_step(
        &self,
        conversation_id: &str,
        body: ReasoningStep,
    ) -> Result<(), PumpError> {
        self.send_envelope(Envelope::new(0, conversation_id, EnvelopeBody::ReasoningStep(body)))
            .await
    }

    pub async fn send_start_answer(
        &self,
        conversation_id: &str,
        body: StartAnswer,
    ) -> Result<(), PumpError> {
        self.send_envelope(Envelope::new(0, conversation_id, EnvelopeBody::StartAnswer(body)))
            .await
    }

    pub async fn send_error_message(
        &self,
        conversation_id: &str,
        body: ErrorMessage,
    ) -> Result<(), PumpError> {
        self.send_envelope(Envelope::new(0, conversation_id, EnvelopeBody::ErrorMessage(body)))
            .await
    }

    // -----------------------------------------------------------------------
    // Reconnect loop
    // -----------------------------------------------------------------------

    async fn run_reconnect_loop(self: Arc<Self>) {
        let mut backoff = self.config.reconnect_interval;
        loop {
            if self.cancel.is_cancelled() {
                return;
            }

            match self.dial_and_serve().await {
                Ok(()) => {
                    backoff = self.config.reconnect_interval;
                    continue;
                }
                Err(e) => {
                    warn!(error = %e, "upstream connection failed, backing off");
                }
            }

            if self.cancel.is_cancelled() {
                return;
            }
            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = self.cancel.cancelled() => return,
            }
            backoff = (backoff * 2).min(self.config.reconnect_max_interval);
        }
    }

    async fn dial_and_serve(self: &Arc<Self>) -> Result<(), PumpError> {
        let (ws, _response) = tokio_tungstenite::connect_async(&self.config.url)
            .await
            .map_err(|e| PumpError::Connect(e.to_string()))?;
        let (mut write, read) = ws.split();

        self.stanza_counter.store(0, Ordering::SeqCst);
        let subscribe_id = self.stanza_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let subscribe = Envelope::new(subscribe_id, "", EnvelopeBody::Subscribe(Subscribe { agent_mode: true }));
        let bytes = encode(&subscribe)?;
        write
            .send(Message::Binary(bytes.into()))
            .await
            .map_err(|e| PumpError::Ws(e.to_string()))?;

        *self.write_half.lock().await = Some(write);
        self.connected.store(true, Ordering::SeqCst);
        info!(url = %self.config.url, "upstream connection established");
        self.consumer.on_connected().await;

        let ping_task = tokio::spawn(self.clone().ping_loop());
        let result = self.read_loop(read).await;
        ping_task.abort();

        self.connected.store(false, Ordering::SeqCst);
        self.write_half.lock().await.take();
        self.consumer.on_disconnected().await;

        result
    }

    /// Reads until cancellation, an error, or `read_timeout` passes with no
    /// frame at all (including pongs) from the backend. Every frame received
    /// — not just pongs — pushes the deadline back out, matching a pong
    /// handler that resets the read deadline on an otherwise idle socket.
    async fn read_loop(&self, mut read: WsReader) -> Result<(), PumpError> {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(self.config.read_timeout) => {
                    return Err(PumpError::Ws("upstream read timed out".into()))
                }
                next = read.next() => {
                    match next {
                        None => return Err(PumpError::Ws("upstream connection closed".into())),
                        Some(Err(e)) => return Err(PumpError::Ws(e.to_string())),
                        Some(Ok(Message::Binary(bytes))) => self.route_incoming(&bytes).await,
                        Some(Ok(Message::Close(_))) => {
                            return Err(PumpError::Ws("upstream sent close frame".into()))
                        }
                        Some(Ok(Message::Pong(_) | Message::Ping(_) | Message::Text(_) | Message::Frame(_))) => {}
                    }
                }
            }
        }
    }

    async fn route_incoming(&self, bytes: &[u8]) {
        let envelope = match decode(bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "failed to decode upstream frame");
                return;
            }
        };

        match envelope.body {
            EnvelopeBody::ResponseGenerationRequest(request) => {
                let consumer = self.consumer.clone();
                tokio::spawn(async move {
                    consumer.on_response_generation_request(request).await;
                });
            }
            other => debug!(?other, "unhandled upstream envelope type"),
        }
    }

    async fn ping_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.ping_interval);
        ticker.tick().await; // first tick fires immediately; skip it
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }

            let mut guard = self.write_half.lock().await;
            let Some(write) = guard.as_mut() else { return };
            if write.send(Message::Ping(Vec::new().into())).await.is_err() {
                let _ = write.close().await;
                return;
            }
        }
    }
}
