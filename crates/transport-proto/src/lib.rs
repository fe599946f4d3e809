//! transport-proto: wire types and MessagePack codec for the agent/backend protocol.
//!
//! An [`Envelope`] is the only thing that crosses the wire. `stanza_id` carries the
//! sign convention documented on the type; everything else lives in [`EnvelopeBody`],
//! which tags itself with a `type` field so a decoder can dispatch without knowing the
//! shape in advance.
//!
//! This crate has no async runtime dependency: it is pure data plus `encode`/`decode`,
//! so it can be linked by anything that needs to speak the wire format (the agent
//! process, tests, future tooling) without pulling in tokio.

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// The outer protocol frame. `stanza_id` is signed: positive ids are
/// client-originated and increase from 1, negative ids are server-originated
/// and decrease from -1 ("newer" means "more negative"), and 0 is the
/// unassigned/sentinel value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub stanza_id: i32,
    pub conversation_id: String,
    pub body: EnvelopeBody,
}

impl Envelope {
    pub fn new(stanza_id: i32, conversation_id: impl Into<String>, body: EnvelopeBody) -> Self {
        Self {
            stanza_id,
            conversation_id: conversation_id.into(),
            body,
        }
    }

    /// True for ids assigned by a client (`stanza_id > 0`).
    pub fn is_client_originated(&self) -> bool {
        self.stanza_id > 0
    }

    /// True for ids assigned by a server (`stanza_id < 0`).
    pub fn is_server_originated(&self) -> bool {
        self.stanza_id < 0
    }
}

// ---------------------------------------------------------------------------
// Envelope bodies
// ---------------------------------------------------------------------------

/// All known envelope payload kinds, tagged on the wire by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EnvelopeBody {
    Subscribe(Subscribe),
    SubscribeAck(SubscribeAck),
    Configuration(Configuration),
    Acknowledgement(Acknowledgement),
    ErrorMessage(ErrorMessage),
    UserMessage(UserMessage),
    AssistantMessage(AssistantMessage),
    AssistantSentence(AssistantSentence),
    StartAnswer(StartAnswer),
    ReasoningStep(ReasoningStep),
    ToolUseRequest(ToolUseRequest),
    ToolUseResult(ToolUseResult),
    MemoryTrace(MemoryTrace),
    Commentary(Commentary),
    Transcription(Transcription),
    ResponseGenerationRequest(ResponseGenerationRequest),
}

/// Upstream subscription handshake sent by the agent on (re)connect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscribe {
    pub agent_mode: bool,
}

/// Backend acknowledgement of a [`Subscribe`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscribeAck {
    pub accepted: bool,
}

/// Client resume handshake: "here is the last server stanza id I saw."
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    pub conversation_id: String,
    pub last_sequence_seen: i32,
}

/// Acknowledgement of a previously received stanza id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Acknowledgement {
    pub acked_stanza_id: i32,
    pub success: bool,
}

/// One of the reserved protocol error codes (see `error_codes`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    MalformedData,
    ConversationNotFound,
    InvalidState,
    InternalError,
}

/// Protocol-level error surfaced to the peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub code: ErrorCode,
    pub message: String,
    pub recoverable: bool,
}

/// A user-authored message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserMessage {
    pub id: String,
    pub previous_id: Option<String>,
    pub conversation_id: String,
    pub content: String,
}

/// A complete assistant message (used during reconstruction; live responses
/// stream as [`StartAnswer`] + [`AssistantSentence`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantMessage {
    pub id: String,
    pub previous_id: Option<String>,
    pub conversation_id: String,
    pub content: String,
}

/// The kind of answer a [`StartAnswer`] announces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnswerType {
    Text,
    Audio,
}

/// Announces the start of a streamed assistant answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartAnswer {
    pub id: String,
    pub previous_id: Option<String>,
    pub conversation_id: String,
    pub answer_type: AnswerType,
    pub planned_sentence_count: u32,
}

/// One sentence of a streamed assistant answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantSentence {
    pub id: String,
    pub previous_id: Option<String>,
    pub conversation_id: String,
    pub sequence: u32,
    pub text: String,
    pub is_final: bool,
    pub audio: Option<Vec<u8>>,
}

/// A chain-of-thought step attached to an assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningStep {
    pub id: String,
    pub message_id: String,
    pub sequence: u32,
    pub content: String,
}

/// A tool invocation requested by the assistant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolUseRequest {
    pub id: String,
    pub message_id: String,
    pub name: String,
    pub arguments: Json,
}

/// Status of a tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToolUseStatus {
    Pending,
    Complete,
    Error,
    Cancelled,
}

/// The result of a previously requested tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolUseResult {
    pub id: String,
    pub message_id: String,
    pub status: ToolUseStatus,
    pub result: Option<Json>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

/// A memory-retrieval trace surfaced alongside an assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryTrace {
    pub id: String,
    pub message_id: String,
    pub summary: String,
}

/// A commentary note attached to a message (e.g. moderation or meta remark).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commentary {
    pub id: String,
    pub message_id: String,
    pub text: String,
}

/// A speech-to-text transcript fragment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcription {
    pub text: String,
    pub confidence: f32,
    pub language: Option<String>,
    pub is_final: bool,
}

/// Backend-initiated request to begin generating a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseGenerationRequest {
    pub message_id: String,
    pub conversation_id: String,
}

/// Frozen reserved error codes, referenced by string where a non-Rust peer
/// needs them (logs, docs); wire encoding always uses [`ErrorCode`] directly.
pub mod error_codes {
    pub const MALFORMED_DATA: &str = "MalformedData";
    pub const CONVERSATION_NOT_FOUND: &str = "ConversationNotFound";
    pub const INVALID_STATE: &str = "InvalidState";
    pub const INTERNAL_ERROR: &str = "InternalError";
}

// ---------------------------------------------------------------------------
// Codec
// ---------------------------------------------------------------------------

/// Errors from encoding or decoding an [`Envelope`].
///
/// Decode errors are recoverable by design: callers report a `MalformedData`
/// error frame back over the transport and keep reading rather than tearing
/// the connection down.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("failed to encode envelope: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("failed to decode envelope: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Encode an envelope to a MessagePack byte buffer.
///
/// Uses the "named" (struct-as-map) encoding so that the `type` tag and
/// field names round-trip, rather than the more compact but brittle
/// struct-as-array form.
pub fn encode(envelope: &Envelope) -> Result<Vec<u8>, CodecError> {
    Ok(rmp_serde::to_vec_named(envelope)?)
}

/// Decode a MessagePack byte buffer into an envelope.
pub fn decode(bytes: &[u8]) -> Result<Envelope, CodecError> {
    Ok(rmp_serde::from_slice(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Envelope {
        Envelope::new(
            -2,
            "conv-1",
            EnvelopeBody::Acknowledgement(Acknowledgement {
                acked_stanza_id: 5,
                success: true,
            }),
        )
    }

    #[test]
    fn round_trips_through_encode_decode() {
        let envelope = sample();
        let bytes = encode(&envelope).expect("encode");
        let decoded = decode(&bytes).expect("decode");
        assert_eq!(envelope, decoded);
    }

    #[test]
    fn decode_rejects_garbage_bytes() {
        let err = decode(&[0xc1, 0xc1, 0xc1]).unwrap_err();
        assert!(matches!(err, CodecError::Decode(_)));
    }

    #[test]
    fn stanza_sign_helpers_match_convention() {
        let client = Envelope::new(
            1,
            "conv-1",
            EnvelopeBody::Configuration(Configuration {
                conversation_id: "conv-1".into(),
                last_sequence_seen: 0,
            }),
        );
        assert!(client.is_client_originated());
        assert!(!client.is_server_originated());

        let server = sample();
        assert!(server.is_server_originated());
        assert!(!server.is_client_originated());
    }

    #[test]
    fn tool_use_request_round_trips_with_json_arguments() {
        let envelope = Envelope::new(
            -3,
            "conv-1",
            EnvelopeBody::ToolUseRequest(ToolUseRequest {
                id: "tool-1".into(),
                message_id: "msg-1".into(),
                name: "search".into(),
                arguments: serde_json::json!({"query": "weather", "limit": 3}),
            }),
        );
        let bytes = encode(&envelope).expect("encode");
        let decoded = decode(&bytes).expect("decode");
        assert_eq!(envelope, decoded);
    }
}
