//! In-memory placeholders for the collaborators the core names only at their
//! interface (persistence repositories, the business dispatcher, ASR). A real
//! deployment swaps these for a database-backed and use-case-backed
//! implementation; `main.rs` wires these in so the binary is runnable on its
//! own.

use async_trait::async_trait;
use tracing::info;

use transport_core::traits::{
    CommentaryRepository, CommentaryRecord, ConversationCursor, ConversationRepository,
    MemoryUsageRecord, MemoryUsageRepository, MessageDispatcher, MessageRecord, MessageRepository,
    ReasoningStepRecord, ReasoningStepRepository, SentenceRecord, SentenceRepository,
    ToolUseRecord, ToolUseRepository,
};
use transport_core::{DispatchError, RepositoryError};
use transport_proto::Envelope;

/// Always reports "unknown conversation" and drops cursor writes. A real
/// repository backs this with a database.
pub struct NullConversationRepository;

#[async_trait]
impl ConversationRepository for NullConversationRepository {
    async fn get_by_id(&self, _conversation_id: &str) -> Result<Option<ConversationCursor>, RepositoryError> {
        Ok(None)
    }

    async fn update_stanza_ids(
        &self,
        _conversation_id: &str,
        _client_id: i32,
        _server_id: i32,
    ) -> Result<(), RepositoryError> {
        Ok(())
    }
}

macro_rules! empty_by_message_repo {
    ($name:ident, $trait_:ident, $record:ty) => {
        pub struct $name;

        #[async_trait]
        impl $trait_ for $name {
            async fn get_by_message(&self, _message_id: &str) -> Result<Vec<$record>, RepositoryError> {
                Ok(Vec::new())
            }
        }
    };
}

empty_by_message_repo!(NullSentenceRepository, SentenceRepository, SentenceRecord);
empty_by_message_repo!(NullReasoningStepRepository, ReasoningStepRepository, ReasoningStepRecord);
empty_by_message_repo!(NullToolUseRepository, ToolUseRepository, ToolUseRecord);
empty_by_message_repo!(NullMemoryUsageRepository, MemoryUsageRepository, MemoryUsageRecord);
empty_by_message_repo!(NullCommentaryRepository, CommentaryRepository, CommentaryRecord);

/// Always reports no messages past a given sequence. A real repository reads
/// from the conversation's durable message log.
pub struct NullMessageRepository;

#[async_trait]
impl MessageRepository for NullMessageRepository {
    async fn get_after_sequence(
        &self,
        _conversation_id: &str,
        _sequence_number: u32,
    ) -> Result<Vec<MessageRecord>, RepositoryError> {
        Ok(Vec::new())
    }
}

/// Logs and drops every inbound envelope. A real dispatcher routes by
/// envelope type to `ProcessUserMessage`, `HandleToolUse`, etc.
pub struct LoggingDispatcher;

#[async_trait]
impl MessageDispatcher for LoggingDispatcher {
    async fn dispatch_message(&self, envelope: Envelope) -> Result<(), DispatchError> {
        info!(
            conversation_id = %envelope.conversation_id,
            stanza_id = envelope.stanza_id,
            "dispatch_message (no business dispatcher wired)"
        );
        Ok(())
    }
}
