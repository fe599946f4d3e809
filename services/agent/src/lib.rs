//! The agent process: wires `transport-core`'s protocol engine to a live
//! upstream WebSocket connection and a real-time transport's callback
//! surface.

pub mod config;
pub mod pump;
pub mod router;
pub mod stubs;
