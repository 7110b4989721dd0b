//! # Recognizer Client Abstraction
//!
//! The upstream recognizer is an opaque bidirectional RPC with three
//! operations the relay cares about: send an audio chunk, close the send
//! side, and receive the next result (or end-of-stream). These traits model
//! exactly that surface so the session orchestrator never depends on the
//! provider's wire format.
//!
//! ## Split halves:
//! `Recognizer::open` returns the two halves of one sub-session separately:
//! the Session Manager keeps the [`AudioSink`] and fans audio into it, while
//! the generation's Result Collector takes the [`ResultSource`] and drains it
//! independently. Closing the sink signals "no more audio" upstream and lets
//! trailing results flow; the source ends on upstream end-of-stream.

use crate::recognizer::types::{RecognitionConfig, RecognitionResult};
use async_trait::async_trait;
use std::fmt;

/// Failures reported by the upstream recognizer.
///
/// ## Error Policy (enforced by the orchestrator, not here):
/// - `Connect` while opening a generation is fatal to the whole Session.
/// - `Send` on a single chunk is non-fatal; streaming continues.
/// - `Receive`/`Protocol` terminate one generation's collector only.
#[derive(Debug, Clone)]
pub enum RecognizerError {
    /// Opening a new sub-session failed (connection or authentication).
    Connect(String),

    /// A single audio chunk could not be delivered.
    Send(String),

    /// The result stream failed before upstream signaled end-of-stream.
    Receive(String),

    /// The upstream spoke, but not in a shape we understand.
    Protocol(String),
}

impl fmt::Display for RecognizerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecognizerError::Connect(msg) => write!(f, "Recognizer connect error: {}", msg),
            RecognizerError::Send(msg) => write!(f, "Recognizer send error: {}", msg),
            RecognizerError::Receive(msg) => write!(f, "Recognizer receive error: {}", msg),
            RecognizerError::Protocol(msg) => write!(f, "Recognizer protocol error: {}", msg),
        }
    }
}

impl std::error::Error for RecognizerError {}

/// Factory for bounded-duration recognition sub-sessions.
///
/// Implementations must configure the sub-session before returning, so a
/// freshly opened generation is immediately ready for audio.
#[async_trait]
pub trait Recognizer: Send + Sync {
    /// Open and configure one sub-session, returning its send and receive
    /// halves.
    ///
    /// `authorization` is the client's credential, forwarded verbatim to the
    /// upstream for every sub-session of the Session.
    async fn open(
        &self,
        config: &RecognitionConfig,
        authorization: &str,
    ) -> Result<(Box<dyn AudioSink>, Box<dyn ResultSource>), RecognizerError>;
}

/// Send half of one sub-session.
#[async_trait]
pub trait AudioSink: Send {
    /// Deliver one opaque audio chunk.
    async fn send_chunk(&mut self, chunk: &[u8]) -> Result<(), RecognizerError>;

    /// Signal that no more audio will arrive in this sub-session.
    ///
    /// Trailing results keep flowing on the receive half until upstream
    /// signals end-of-stream.
    async fn close_send(&mut self) -> Result<(), RecognizerError>;
}

/// Receive half of one sub-session.
#[async_trait]
pub trait ResultSource: Send {
    /// Next result from upstream.
    ///
    /// Returns `None` on a clean end-of-stream. An `Err` item is terminal
    /// for this sub-session; callers should not poll again after one.
    async fn next_result(&mut self) -> Option<Result<RecognitionResult, RecognizerError>>;
}
