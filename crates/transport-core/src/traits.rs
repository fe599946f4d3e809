//! Collaborator interfaces consumed by the transport core (§6): repositories,
//! the outbound byte channel, the business-logic dispatcher, and the
//! speech/id-generation services. Concrete implementations (a real database,
//! a real ASR provider, ...) live outside this crate; tests exercise the
//! core against in-memory fakes of these traits.

use async_trait::async_trait;
use serde_json::Value as Json;
use transport_proto::{Envelope, ToolUseStatus};

use crate::error::{AsrError, DispatchError, RepositoryError, SendError, TtsError};

// ---------------------------------------------------------------------------
// Domain records used during resume reconstruction
// ---------------------------------------------------------------------------

/// The persisted server/client sequence cursor for one conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationCursor {
    pub conversation_id: String,
    /// >= 0, highest positive id observed from the client.
    pub last_client_stanza_id: i32,
    /// <= -1, most-negative id assigned by the server.
    pub last_server_stanza_id: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageRole {
    User,
    Assistant,
}

/// A persisted conversation message, as returned by `MessageRepository`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    pub id: String,
    pub previous_id: Option<String>,
    pub conversation_id: String,
    pub role: MessageRole,
    pub content: String,
    /// Monotonically increasing per conversation; `stanza_id = -sequence_number`.
    pub sequence_number: u32,
}

/// One sentence of a streamed assistant answer, as returned by `SentenceRepository`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentenceRecord {
    pub id: String,
    pub sequence: u32,
    pub text: String,
    pub audio: Option<Vec<u8>>,
}

/// A reasoning step, as returned by `ReasoningStepRepository`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReasoningStepRecord {
    pub id: String,
    pub sequence: u32,
    pub content: String,
}

/// A tool invocation, as returned by `ToolUseRepository`.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolUseRecord {
    pub id: String,
    pub name: String,
    pub arguments: Json,
    pub status: ToolUseStatus,
    pub result: Option<Json>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

impl ToolUseRecord {
    /// A tool use has finished (successfully, with an error, or cancelled) —
    /// as opposed to `Pending`, which has no result to replay yet.
    pub fn is_complete(&self) -> bool {
        self.status != ToolUseStatus::Pending
    }
}

/// A memory-retrieval trace, as returned by `MemoryUsageRepository`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryUsageRecord {
    pub id: String,
    pub summary: String,
}

/// A commentary note, as returned by `CommentaryRepository`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentaryRecord {
    pub id: String,
    pub text: String,
}

// ---------------------------------------------------------------------------
// Repositories
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn get_by_id(
        &self,
        conversation_id: &str,
    ) -> Result<Option<ConversationCursor>, RepositoryError>;

    /// Persist stanza id cursors. `0` in either position means "leave that
    /// side unchanged."
    async fn update_stanza_ids(
        &self,
        conversation_id: &str,
        client_id: i32,
        server_id: i32,
    ) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn get_after_sequence(
        &self,
        conversation_id: &str,
        sequence_number: u32,
    ) -> Result<Vec<MessageRecord>, RepositoryError>;
}

#[async_trait]
pub trait SentenceRepository: Send + Sync {
    async fn get_by_message(&self, message_id: &str) -> Result<Vec<SentenceRecord>, RepositoryError>;
}

#[async_trait]
pub trait ReasoningStepRepository: Send + Sync {
    async fn get_by_message(
        &self,
        message_id: &str,
    ) -> Result<Vec<ReasoningStepRecord>, RepositoryError>;
}

#[async_trait]
pub trait ToolUseRepository: Send + Sync {
    async fn get_by_message(&self, message_id: &str) -> Result<Vec<ToolUseRecord>, RepositoryError>;
}

#[async_trait]
pub trait MemoryUsageRepository: Send + Sync {
    async fn get_by_message(
        &self,
        message_id: &str,
    ) -> Result<Vec<MemoryUsageRecord>, RepositoryError>;
}

#[async_trait]
pub trait CommentaryRepository: Send + Sync {
    async fn get_by_message(&self, message_id: &str) -> Result<Vec<CommentaryRecord>, RepositoryError>;
}

// ---------------------------------------------------------------------------
// Transport / dispatch / speech capabilities
// ---------------------------------------------------------------------------

/// The opaque outbound byte channel to the connected transport peer.
#[async_trait]
pub trait AgentSender: Send + Sync {
    async fn send_data(&self, bytes: Vec<u8>) -> Result<(), SendError>;
    async fn send_audio(&self, bytes: Vec<u8>, format: String) -> Result<(), SendError>;
}

/// Routes an inbound envelope to the business use case selected by its type.
#[async_trait]
pub trait MessageDispatcher: Send + Sync {
    async fn dispatch_message(&self, envelope: Envelope) -> Result<(), DispatchError>;
}

/// A transcribed result from an `AsrService` call.
#[derive(Debug, Clone, PartialEq)]
pub struct Transcript {
    pub text: String,
    pub confidence: f32,
    pub language: Option<String>,
}

#[async_trait]
pub trait AsrService: Send + Sync {
    async fn transcribe(&self, bytes: Vec<u8>, format: String) -> Result<Transcript, AsrError>;
}

#[async_trait]
pub trait TtsService: Send + Sync {
    async fn synthesize(&self, text: String) -> Result<Vec<u8>, TtsError>;
}

pub trait IdGenerator: Send + Sync {
    fn generate_message_id(&self) -> String;
}
