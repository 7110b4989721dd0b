//! # Session State
//!
//! One logical transcription job. The Session Manager task is the only
//! writer of session state; every other task (audio relay, collectors,
//! output relay, the transport actor) reads published snapshots through
//! [`SessionShared`]. The shared struct is all atomics, so nothing here is
//! ever held across an await point.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

/// Lifecycle of a Session, driven exclusively by the Session Manager.
///
/// ## Transitions:
/// - `Init` → `Streaming`: generation 0 opened and configured.
/// - `Streaming` → `Draining`: end-of-input received (sentinel or byte
///   budget); no new generations after this point.
/// - `Draining` → `Closed`: every generation's collector has finished.
/// - any → `Closed`: fatal upstream error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Init,
    Streaming,
    Draining,
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Init => "init",
            SessionState::Streaming => "streaming",
            SessionState::Draining => "draining",
            SessionState::Closed => "closed",
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Init,
            1 => SessionState::Streaming,
            2 => SessionState::Draining,
            _ => SessionState::Closed,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            SessionState::Init => 0,
            SessionState::Streaming => 1,
            SessionState::Draining => 2,
            SessionState::Closed => 3,
        }
    }
}

/// Flags and counters shared across the session's tasks.
///
/// `closed` means the client transport is gone: collectors stop publishing
/// to the output relay but keep persisting. `input_done` means the audio
/// relay confirmed end-of-input. The generation counter is monotonic and
/// only the Session Manager advances it.
pub struct SessionShared {
    byte_budget: u64,
    bytes_received: AtomicU64,
    input_done: AtomicU8,
    closed: AtomicU8,
    generations: AtomicU64,
    state: AtomicU8,
}

impl SessionShared {
    pub fn new(byte_budget: u64) -> Self {
        Self {
            byte_budget,
            bytes_received: AtomicU64::new(0),
            input_done: AtomicU8::new(0),
            closed: AtomicU8::new(0),
            generations: AtomicU64::new(0),
            state: AtomicU8::new(SessionState::Init.as_u8()),
        }
    }

    pub fn byte_budget(&self) -> u64 {
        self.byte_budget
    }

    /// Record received audio bytes; returns the new cumulative total.
    pub fn add_bytes(&self, n: u64) -> u64 {
        self.bytes_received.fetch_add(n, Ordering::SeqCst) + n
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::SeqCst)
    }

    pub fn mark_input_done(&self) {
        self.input_done.store(1, Ordering::SeqCst);
    }

    pub fn input_done(&self) -> bool {
        self.input_done.load(Ordering::SeqCst) != 0
    }

    pub fn mark_closed(&self) {
        self.closed.store(1, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) != 0
    }

    /// Claim the next generation id. Session Manager only.
    pub fn next_generation(&self) -> u64 {
        self.generations.fetch_add(1, Ordering::SeqCst)
    }

    pub fn generations_opened(&self) -> u64 {
        self.generations.load(Ordering::SeqCst)
    }

    /// Publish a state snapshot. Session Manager only.
    pub fn publish_state(&self, state: SessionState) {
        self.state.store(state.as_u8(), Ordering::SeqCst);
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_accounting() {
        let shared = SessionShared::new(100);
        assert_eq!(shared.add_bytes(60), 60);
        assert_eq!(shared.add_bytes(40), 100);
        assert_eq!(shared.bytes_received(), 100);
    }

    #[test]
    fn test_generation_counter_is_monotonic() {
        let shared = SessionShared::new(0);
        assert_eq!(shared.next_generation(), 0);
        assert_eq!(shared.next_generation(), 1);
        assert_eq!(shared.generations_opened(), 2);
    }

    #[test]
    fn test_state_round_trip() {
        let shared = SessionShared::new(0);
        assert_eq!(shared.state(), SessionState::Init);
        shared.publish_state(SessionState::Draining);
        assert_eq!(shared.state(), SessionState::Draining);
        assert_eq!(shared.state().as_str(), "draining");
    }
}
