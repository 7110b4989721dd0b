//! # Upstream Recognizer
//!
//! Everything the relay knows about the speech recognizer lives here. The
//! recognizer is treated as an opaque bidirectional RPC with a hard maximum
//! sub-session duration; the traits in [`client`] capture that surface and
//! [`remote`] implements them over a WebSocket gateway.

pub mod client;
pub mod remote;
pub mod types;

#[cfg(test)]
pub(crate) mod mock;

pub use client::{AudioSink, Recognizer, RecognizerError, ResultSource};
pub use types::{AudioEncoding, RecognitionConfig, RecognitionResult, SpeechAlternative, WordInfo};
