//! Error taxonomy for the transport core.
//!
//! Matches the teacher's convention of small, hand-rolled enums per concern
//! (`ConfigError`, `UplinkError`) rather than one catch-all error type.

use thiserror::Error;

/// Errors from `ProtocolHandler` operations.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("no agent sender is wired up for this conversation")]
    AgentUnavailable,
    #[error("transport send failed: {0}")]
    Transport(String),
    #[error(transparent)]
    Codec(#[from] transport_proto::CodecError),
}

/// Errors from `GenerationRegistry` operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("no active entry registered for target {0:?}")]
    NotFound(String),
}

/// Errors surfaced by the out-of-scope repository collaborators.
///
/// The core never treats these as fatal on their own: read failures during
/// replay reconstruction are logged and skipped, and cursor-persistence
/// failures are logged and otherwise ignored.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("repository operation failed: {0}")]
    Backend(String),
}

/// Errors from the `AgentSender` capability (the outbound byte channel).
#[derive(Debug, Error)]
pub enum SendError {
    #[error("agent send failed: {0}")]
    Backend(String),
}

/// Errors from the `MessageDispatcher` collaborator.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("dispatch failed: {0}")]
    Backend(String),
}

/// Errors from the `AsrService` collaborator.
#[derive(Debug, Error)]
pub enum AsrError {
    #[error("transcription failed: {0}")]
    Backend(String),
}

/// Errors from the `TtsService` collaborator.
#[derive(Debug, Error)]
pub enum TtsError {
    #[error("speech synthesis failed: {0}")]
    Backend(String),
}
