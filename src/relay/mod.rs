//! Streaming relay pipeline.
//!
//! Four cooperating tasks per client connection:
//! - [`audio::AudioRelay`] pumps transport audio to the manager and signals
//!   end-of-input exactly once.
//! - [`manager::SessionManager`] owns the state machine and rotates bounded
//!   upstream generations.
//! - [`collector::ResultCollector`] (one per generation) persists and
//!   forwards results.
//! - [`output::OutputRelay`] merges results and errors into the single
//!   client-bound feed.

pub mod audio;
pub mod collector;
pub mod manager;
pub mod output;
pub mod session;

pub use audio::{AudioEvent, AudioRelay};
pub use manager::SessionManager;
pub use output::{ErrorFrame, FrameSink, OutputRelay, SinkError};
pub use session::{SessionShared, SessionState};
