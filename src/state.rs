//! # Application State Management
//!
//! Shared state handed to every HTTP request handler. Configuration is
//! immutable after startup, so the state is plain `Arc` sharing with no
//! locks; the relay counters are atomics updated by the pipeline tasks.

use crate::config::AppConfig;
use crate::recognizer::client::Recognizer;
use crate::transcript::TranscriptStore;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// State shared across all HTTP request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration, fixed for the process lifetime.
    pub config: AppConfig,

    /// Relay counters, updated by every session's pipeline tasks.
    pub metrics: Arc<RelayMetrics>,

    /// Upstream recognizer used to open generations.
    pub recognizer: Arc<dyn Recognizer>,

    /// Transcript persistence backend.
    pub store: Arc<dyn TranscriptStore>,

    /// When the server started (for uptime reporting).
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        recognizer: Arc<dyn Recognizer>,
        store: Arc<dyn TranscriptStore>,
    ) -> Self {
        Self {
            config,
            metrics: Arc::new(RelayMetrics::default()),
            recognizer,
            store,
            start_time: Instant::now(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

/// Process-wide relay counters.
///
/// Plain atomics rather than a locked struct: every counter is written from
/// hot per-session tasks, and the only reader is the health endpoint.
#[derive(Debug, Default)]
pub struct RelayMetrics {
    sessions_started: AtomicU64,
    sessions_completed: AtomicU64,
    generations_opened: AtomicU64,
    results_persisted: AtomicU64,
    results_forwarded: AtomicU64,
    error_frames: AtomicU64,
}

/// Point-in-time copy of the counters, as reported by `/health`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub sessions_started: u64,
    pub sessions_completed: u64,
    pub sessions_active: u64,
    pub generations_opened: u64,
    pub results_persisted: u64,
    pub results_forwarded: u64,
    pub error_frames: u64,
}

impl RelayMetrics {
    pub fn record_session_started(&self) {
        self.sessions_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_completed(&self) {
        self.sessions_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_generation_opened(&self) {
        self.generations_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_result_persisted(&self) {
        self.results_persisted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_result_forwarded(&self) {
        self.results_forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error_frame(&self) {
        self.error_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let started = self.sessions_started.load(Ordering::Relaxed);
        let completed = self.sessions_completed.load(Ordering::Relaxed);
        MetricsSnapshot {
            sessions_started: started,
            sessions_completed: completed,
            sessions_active: started.saturating_sub(completed),
            generations_opened: self.generations_opened.load(Ordering::Relaxed),
            results_persisted: self.results_persisted.load(Ordering::Relaxed),
            results_forwarded: self.results_forwarded.load(Ordering::Relaxed),
            error_frames: self.error_frames.load(Ordering::Relaxed),
        }
    }
}
