//! The sequencing and resume engine: assigns server stanza ids, persists
//! cursors, handles `Configuration` resume handshakes, replays missed
//! frames, and surfaces typed send operations.

use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::warn;
use transport_proto::{
    Acknowledgement, AnswerType, AssistantMessage, AssistantSentence, Commentary, Configuration,
    Envelope, EnvelopeBody, ErrorCode, ErrorMessage, MemoryTrace, ReasoningStep as WireReasoningStep,
    StartAnswer, ToolUseRequest as WireToolUseRequest, ToolUseResult as WireToolUseResult, UserMessage,
};

use crate::error::ProtocolError;
use crate::replay_buffer::ReplayBuffer;
use crate::traits::{
    AgentSender, CommentaryRepository, ConversationCursor, ConversationRepository,
    MemoryUsageRepository, MessageRepository, MessageRole, ReasoningStepRepository,
    SentenceRepository, ToolUseRecord, ToolUseRepository,
};

/// A reconnecting client is rejected past this distance between its last
/// seen server stanza id and the server's current one.
pub const MAX_RECONNECTION_GAP: i64 = 1000;

/// Tracks the handler's own server-id counter. Starts at `-1` so the first
/// assignment (a decrement-then-read) yields `-2`.
struct SendState {
    last_assigned: i32,
}

/// Per-conversation sequencing engine. Owns one `ReplayBuffer` and the mutex
/// guarding server stanza-id assignment; holds the repository/sender
/// dependencies named in §6 of the spec.
pub struct ProtocolHandler {
    conversation_id: String,
    replay_buffer: ReplayBuffer,
    send_state: Mutex<SendState>,
    sender: RwLock<Option<Arc<dyn AgentSender>>>,
    conversation_repo: Arc<dyn ConversationRepository>,
    message_repo: Arc<dyn MessageRepository>,
    sentence_repo: Arc<dyn SentenceRepository>,
    reasoning_repo: Arc<dyn ReasoningStepRepository>,
    tool_use_repo: Arc<dyn ToolUseRepository>,
    memory_usage_repo: Arc<dyn MemoryUsageRepository>,
    commentary_repo: Arc<dyn CommentaryRepository>,
}

/// Constructor dependencies, grouped to keep `ProtocolHandler::new`'s
/// signature from growing unreadable as repositories are added.
pub struct ProtocolHandlerDeps {
    pub conversation_repo: Arc<dyn ConversationRepository>,
    pub message_repo: Arc<dyn MessageRepository>,
    pub sentence_repo: Arc<dyn SentenceRepository>,
    pub reasoning_repo: Arc<dyn ReasoningStepRepository>,
    pub tool_use_repo: Arc<dyn ToolUseRepository>,
    pub memory_usage_repo: Arc<dyn MemoryUsageRepository>,
    pub commentary_repo: Arc<dyn CommentaryRepository>,
}

impl ProtocolHandler {
    pub fn new(conversation_id: impl Into<String>, deps: ProtocolHandlerDeps) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            replay_buffer: ReplayBuffer::default(),
            send_state: Mutex::new(SendState { last_assigned: -1 }),
            sender: RwLock::new(None),
            conversation_repo: deps.conversation_repo,
            message_repo: deps.message_repo,
            sentence_repo: deps.sentence_repo,
            reasoning_repo: deps.reasoning_repo,
            tool_use_repo: deps.tool_use_repo,
            memory_usage_repo: deps.memory_usage_repo,
            commentary_repo: deps.commentary_repo,
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn replay_buffer(&self) -> &ReplayBuffer {
        &self.replay_buffer
    }

    /// Wire (or clear) the outbound byte channel. A handler with no sender
    /// fails `send`/`send_audio` with `AgentUnavailable`.
    pub async fn set_sender(&self, sender: Option<Arc<dyn AgentSender>>) {
        *self.sender.write().await = sender;
    }

    async fn sender(&self) -> Result<Arc<dyn AgentSender>, ProtocolError> {
        self.sender
            .read()
            .await
            .clone()
            .ok_or(ProtocolError::AgentUnavailable)
    }

    /// Assign the next server stanza id (more negative than any previously
    /// assigned on this handler).
    async fn assign_server_id(&self) -> i32 {
        let mut state = self.send_state.lock().await;
        state.last_assigned -= 1;
        state.last_assigned
    }

    /// Send an envelope: assigns a fresh server id when `stanza_id == 0`,
    /// buffers it for replay, best-effort persists the cursor, then encodes
    /// and transmits it. Transport errors propagate to the caller.
    ///
    /// When a pre-set nonzero `stanza_id` is provided, it is left as-is and
    /// the persisted cursor reflects the handler's own (unchanged) counter —
    /// not the pre-set id — on the assumption that pre-set ids represent
    /// already-known historical ids rather than new sequence positions.
    pub async fn send(&self, mut envelope: Envelope) -> Result<Envelope, ProtocolError> {
        let cursor_to_persist = if envelope.stanza_id == 0 {
            let id = self.assign_server_id().await;
            envelope.stanza_id = id;
            id
        } else {
            self.send_state.lock().await.last_assigned
        };

        self.replay_buffer.add(envelope.clone()).await;

        if let Err(e) = self
            .conversation_repo
            .update_stanza_ids(&self.conversation_id, 0, cursor_to_persist)
            .await
        {
            warn!(
                conversation_id = %self.conversation_id,
                error = %e,
                "failed to persist server cursor (non-fatal)"
            );
        }

        let bytes = transport_proto::encode(&envelope)?;
        self.sender()
            .await?
            .send_data(bytes)
            .await
            .map_err(|e| ProtocolError::Transport(e.to_string()))?;

        Ok(envelope)
    }

    /// Transmit a reconstructed replay envelope directly: no fresh id
    /// assignment, no buffering, no cursor persistence.
    async fn transmit_raw(&self, envelope: &Envelope) -> Result<(), ProtocolError> {
        let bytes = transport_proto::encode(envelope)?;
        self.sender()
            .await?
            .send_data(bytes)
            .await
            .map_err(|e| ProtocolError::Transport(e.to_string()))
    }

    pub async fn send_audio(&self, bytes: Vec<u8>, format: String) -> Result<(), ProtocolError> {
        self.sender()
            .await?
            .send_audio(bytes, format)
            .await
            .map_err(|e| ProtocolError::Transport(e.to_string()))
    }

    pub async fn send_acknowledgement(
        &self,
        acked_stanza_id: i32,
        success: bool,
    ) -> Result<Envelope, ProtocolError> {
        self.send(Envelope::new(
            0,
            self.conversation_id.clone(),
            EnvelopeBody::Acknowledgement(Acknowledgement {
                acked_stanza_id,
                success,
            }),
        ))
        .await
    }

    pub async fn send_error(
        &self,
        code: ErrorCode,
        message: impl Into<String>,
        recoverable: bool,
    ) -> Result<Envelope, ProtocolError> {
        self.send(Envelope::new(
            0,
            self.conversation_id.clone(),
            EnvelopeBody::ErrorMessage(ErrorMessage {
                code,
                message: message.into(),
                recoverable,
            }),
        ))
        .await
    }

    pub async fn send_tool_use_request(
        &self,
        message_id: impl Into<String>,
        tool_use: &ToolUseRecord,
    ) -> Result<Envelope, ProtocolError> {
        self.send(Envelope::new(
            0,
            self.conversation_id.clone(),
            EnvelopeBody::ToolUseRequest(WireToolUseRequest {
                id: tool_use.id.clone(),
                message_id: message_id.into(),
                name: tool_use.name.clone(),
                arguments: tool_use.arguments.clone(),
            }),
        ))
        .await
    }

    pub async fn send_tool_use_result(
        &self,
        message_id: impl Into<String>,
        tool_use: &ToolUseRecord,
    ) -> Result<Envelope, ProtocolError> {
        self.send(Envelope::new(
            0,
            self.conversation_id.clone(),
            EnvelopeBody::ToolUseResult(WireToolUseResult {
                id: tool_use.id.clone(),
                message_id: message_id.into(),
                status: tool_use.status,
                result: tool_use.result.clone(),
                error_code: tool_use.error_code.clone(),
                error_message: tool_use.error_message.clone(),
            }),
        ))
        .await
    }

    /// Best-effort client cursor persistence. Ignored for `id <= 0`.
    pub async fn update_client_stanza_id(&self, id: i32) {
        if id <= 0 {
            return;
        }
        if let Err(e) = self
            .conversation_repo
            .update_stanza_ids(&self.conversation_id, id, 0)
            .await
        {
            warn!(
                conversation_id = %self.conversation_id,
                error = %e,
                "failed to persist client cursor (non-fatal)"
            );
        }
    }

    /// The resume handshake driven by an inbound `Configuration` frame.
    pub async fn handle_configuration(&self, config: &Configuration) -> Result<(), ProtocolError> {
        let cursor = match self
            .conversation_repo
            .get_by_id(&config.conversation_id)
            .await
        {
            Ok(Some(cursor)) => cursor,
            Ok(None) => {
                self.send_error(
                    ErrorCode::ConversationNotFound,
                    format!("unknown conversation {}", config.conversation_id),
                    true,
                )
                .await?;
                return Ok(());
            }
            Err(e) => {
                warn!(conversation_id = %config.conversation_id, error = %e, "conversation lookup failed");
                self.send_error(
                    ErrorCode::ConversationNotFound,
                    format!("unknown conversation {}", config.conversation_id),
                    true,
                )
                .await?;
                return Ok(());
            }
        };

        if config.last_sequence_seen == 0 {
            self.send_acknowledgement(0, true).await?;
            return Ok(());
        }

        self.handle_reconnection(&cursor, config.last_sequence_seen)
            .await
    }

    async fn handle_reconnection(
        &self,
        cursor: &ConversationCursor,
        last_sequence_seen: i32,
    ) -> Result<(), ProtocolError> {
        // Only negative cursors name a server-assigned stanza id; a positive
        // `last_sequence_seen` is the client's own sequence, which this
        // handler never replays against.
        if last_sequence_seen > 0 {
            self.send_acknowledgement(last_sequence_seen, true).await?;
            return Ok(());
        }

        let gap =
            (cursor.last_server_stanza_id.unsigned_abs() as i64) - (last_sequence_seen.unsigned_abs() as i64);

        if gap > MAX_RECONNECTION_GAP {
            self.send_error(
                ErrorCode::InvalidState,
                format!(
                    "Reconnection gap too large ({} messages). Please start a new conversation.",
                    gap
                ),
                false,
            )
            .await?;
            return Ok(());
        }

        let missed = self.replay_buffer.get_since(last_sequence_seen).await;
        let to_replay = if (missed.len() as i64) < gap {
            self.reconstruct_from_persistence(&cursor.conversation_id, last_sequence_seen)
                .await
        } else {
            missed
        };

        self.send_acknowledgement(last_sequence_seen, true).await?;

        for envelope in &to_replay {
            self.transmit_raw(envelope).await?;
        }

        Ok(())
    }

    /// Rebuild the envelope stream for everything after `last_sequence_seen`
    /// from the repositories, in the fixed order the spec prescribes.
    async fn reconstruct_from_persistence(
        &self,
        conversation_id: &str,
        last_sequence_seen: i32,
    ) -> Vec<Envelope> {
        let sequence_floor = last_sequence_seen.unsigned_abs();
        let messages = match self
            .message_repo
            .get_after_sequence(conversation_id, sequence_floor)
            .await
        {
            Ok(messages) => messages,
            Err(e) => {
                warn!(conversation_id, error = %e, "message replay lookup failed; replaying nothing");
                return Vec::new();
            }
        };

        let mut out = Vec::new();
        for message in &messages {
            let stanza_id = -(message.sequence_number as i32);
            out.push(self.message_envelope(stanza_id, conversation_id, message));

            if message.role == MessageRole::Assistant {
                self.append_assistant_detail(&mut out, stanza_id, conversation_id, message)
                    .await;
            }
        }
        out
    }

    fn message_envelope(
        &self,
        stanza_id: i32,
        conversation_id: &str,
        message: &crate::traits::MessageRecord,
    ) -> Envelope {
        let body = match message.role {
            MessageRole::User => EnvelopeBody::UserMessage(UserMessage {
                id: message.id.clone(),
                previous_id: message.previous_id.clone(),
                conversation_id: conversation_id.to_owned(),
                content: message.content.clone(),
            }),
            MessageRole::Assistant => EnvelopeBody::AssistantMessage(AssistantMessage {
                id: message.id.clone(),
                previous_id: message.previous_id.clone(),
                conversation_id: conversation_id.to_owned(),
                content: message.content.clone(),
            }),
        };
        Envelope::new(stanza_id, conversation_id, body)
    }

    async fn append_assistant_detail(
        &self,
        out: &mut Vec<Envelope>,
        stanza_id: i32,
        conversation_id: &str,
        message: &crate::traits::MessageRecord,
    ) {
        match self.sentence_repo.get_by_message(&message.id).await {
            Ok(sentences) if !sentences.is_empty() => {
                out.push(Envelope::new(
                    stanza_id,
                    conversation_id,
                    EnvelopeBody::StartAnswer(StartAnswer {
                        id: message.id.clone(),
                        previous_id: message.previous_id.clone(),
                        conversation_id: conversation_id.to_owned(),
                        answer_type: AnswerType::Text,
                        planned_sentence_count: sentences.len() as u32,
                    }),
                ));
                let mut previous_id = Some(message.id.clone());
                for sentence in &sentences {
                    out.push(Envelope::new(
                        stanza_id,
                        conversation_id,
                        EnvelopeBody::AssistantSentence(AssistantSentence {
                            id: sentence.id.clone(),
                            previous_id: previous_id.clone(),
                            conversation_id: conversation_id.to_owned(),
                            sequence: sentence.sequence,
                            text: sentence.text.clone(),
                            is_final: false,
                            audio: sentence.audio.clone(),
                        }),
                    ));
                    previous_id = Some(sentence.id.clone());
                }
            }
            Ok(_) => {}
            Err(e) => warn!(message_id = %message.id, error = %e, "sentence replay lookup failed; skipping"),
        }

        match self.reasoning_repo.get_by_message(&message.id).await {
            Ok(steps) => {
                for step in &steps {
                    out.push(Envelope::new(
                        stanza_id,
                        conversation_id,
                        EnvelopeBody::ReasoningStep(WireReasoningStep {
                            id: step.id.clone(),
                            message_id: message.id.clone(),
                            sequence: step.sequence,
                            content: step.content.clone(),
                        }),
                    ));
                }
            }
            Err(e) => warn!(message_id = %message.id, error = %e, "reasoning step replay lookup failed; skipping"),
        }

        match self.tool_use_repo.get_by_message(&message.id).await {
            Ok(tool_uses) => {
                for tool_use in &tool_uses {
                    out.push(Envelope::new(
                        stanza_id,
                        conversation_id,
                        EnvelopeBody::ToolUseRequest(WireToolUseRequest {
                            id: tool_use.id.clone(),
                            message_id: message.id.clone(),
                            name: tool_use.name.clone(),
                            arguments: tool_use.arguments.clone(),
                        }),
                    ));
                    if tool_use.is_complete() {
                        out.push(Envelope::new(
                            stanza_id,
                            conversation_id,
                            EnvelopeBody::ToolUseResult(WireToolUseResult {
                                id: tool_use.id.clone(),
                                message_id: message.id.clone(),
                                status: tool_use.status,
                                result: tool_use.result.clone(),
                                error_code: tool_use.error_code.clone(),
                                error_message: tool_use.error_message.clone(),
                            }),
                        ));
                    }
                }
            }
            Err(e) => warn!(message_id = %message.id, error = %e, "tool use replay lookup failed; skipping"),
        }

        match self.memory_usage_repo.get_by_message(&message.id).await {
            Ok(traces) => {
                for trace in &traces {
                    out.push(Envelope::new(
                        stanza_id,
                        conversation_id,
                        EnvelopeBody::MemoryTrace(MemoryTrace {
                            id: trace.id.clone(),
                            message_id: message.id.clone(),
                            summary: trace.summary.clone(),
                        }),
                    ));
                }
            }
            Err(e) => warn!(message_id = %message.id, error = %e, "memory trace replay lookup failed; skipping"),
        }

        match self.commentary_repo.get_by_message(&message.id).await {
            Ok(commentaries) => {
                for commentary in &commentaries {
                    out.push(Envelope::new(
                        stanza_id,
                        conversation_id,
                        EnvelopeBody::Commentary(Commentary {
                            id: commentary.id.clone(),
                            message_id: message.id.clone(),
                            text: commentary.text.clone(),
                        }),
                    ));
                }
            }
            Err(e) => warn!(message_id = %message.id, error = %e, "commentary replay lookup failed; skipping"),
        }
    }
}
