//! transport-core: the stateful sequencing, replay, and cancellation engine
//! that sits on top of `transport-proto`'s wire types.
//!
//! Three pieces compose into the transport core proper:
//! - [`replay_buffer::ReplayBuffer`] — bounded FIFO of recent outbound envelopes.
//! - [`handler::ProtocolHandler`] — id assignment, cursor persistence, resume handshakes.
//! - [`registry::GenerationRegistry`] — cancellable response-generation/TTS tracking.
//!
//! [`traits`] names the repository/sender/dispatcher seams the handler is built
//! against, so it can run against in-memory fakes in tests without a real
//! database or network.

pub mod error;
pub mod handler;
pub mod registry;
pub mod replay_buffer;
pub mod traits;

pub use error::{AsrError, DispatchError, ProtocolError, RegistryError, RepositoryError, SendError, TtsError};
pub use handler::{ProtocolHandler, ProtocolHandlerDeps, MAX_RECONNECTION_GAP};
pub use registry::{GenerationRegistry, DEFAULT_STALE_THRESHOLD};
pub use replay_buffer::{ReplayBuffer, MAX_BUFFER_SIZE};
pub use traits::{ConversationCursor, ConversationRepository};
