//! Workspace root. The real crates live under `crates/` and `services/`;
//! this crate exists to host the top-level end-to-end integration suites
//! under `tests/integration/` that exercise them together.
