//! Chat-completion plumbing.
//!
//! Provider descriptions, the [`provider::ChatBackend`] seam and the HTTP
//! client that talks to OpenAI-compatible endpoints.

pub(crate) mod chat_runtime;
/// HTTP chat-completions backend.
pub mod completions;
/// Provider-agnostic chat interfaces and errors.
pub mod provider;
