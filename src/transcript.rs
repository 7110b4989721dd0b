//! # Transcript Persistence
//!
//! The persistence collaborator: an ordered, append-only log of result
//! envelopes keyed by transcript id. The relay only ever creates a
//! transcript at handshake time and appends envelopes to it; everything else
//! (schema, querying, account ownership) belongs to the surrounding system.
//!
//! ## Concurrency Contract:
//! Result Collectors from overlapping generations append concurrently.
//! Implementations must hand each operation its own scoped handle (a pooled
//! connection, a short-lived lock) so collectors never serialize on one
//! shared connection for the duration of a session.

use crate::recognizer::types::{RecognitionResult, SpeechAlternative};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// One recognition result as persisted and forwarded to the client.
///
/// The generation id records which upstream sub-session produced the result.
/// Envelopes are ordered within a generation; across generations the log may
/// interleave (documented limitation of the rotation design).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultEnvelope {
    pub generation: u64,
    pub is_final: bool,
    pub end_time_ms: u64,
    pub alternatives: Vec<SpeechAlternative>,
    pub received_at: DateTime<Utc>,
}

impl ResultEnvelope {
    pub fn from_result(generation: u64, result: RecognitionResult) -> Self {
        Self {
            generation,
            is_final: result.is_final,
            end_time_ms: result.end_time_ms,
            alternatives: result.alternatives,
            received_at: Utc::now(),
        }
    }
}

/// Persistence failure. Logged and reported, never fatal to result delivery.
#[derive(Debug, Clone)]
pub struct StoreError(pub String);

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Transcript store error: {}", self.0)
    }
}

impl std::error::Error for StoreError {}

/// Append-only transcript log.
#[async_trait]
pub trait TranscriptStore: Send + Sync {
    /// Create an empty transcript and return its id.
    async fn create(&self, name: &str) -> Result<String, StoreError>;

    /// Append one envelope to a transcript, preserving call order per caller.
    async fn append(&self, transcript_id: &str, envelope: ResultEnvelope) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
struct TranscriptRecord {
    name: String,
    results: Vec<ResultEnvelope>,
}

/// In-memory store.
///
/// Stands in for the database-backed collaborator in development and tests;
/// the relay pipeline only sees the [`TranscriptStore`] trait either way.
#[derive(Clone, Default)]
pub struct MemoryTranscriptStore {
    transcripts: Arc<RwLock<HashMap<String, TranscriptRecord>>>,
}

impl MemoryTranscriptStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a transcript's envelopes, in append order.
    pub async fn results(&self, transcript_id: &str) -> Option<Vec<ResultEnvelope>> {
        let transcripts = self.transcripts.read().await;
        transcripts.get(transcript_id).map(|r| r.results.clone())
    }

    /// Number of transcripts ever created.
    pub async fn transcript_count(&self) -> usize {
        self.transcripts.read().await.len()
    }
}

#[async_trait]
impl TranscriptStore for MemoryTranscriptStore {
    async fn create(&self, name: &str) -> Result<String, StoreError> {
        let id = Uuid::new_v4().to_string();
        let mut transcripts = self.transcripts.write().await;
        transcripts.insert(
            id.clone(),
            TranscriptRecord {
                name: name.to_string(),
                results: Vec::new(),
            },
        );
        Ok(id)
    }

    async fn append(&self, transcript_id: &str, envelope: ResultEnvelope) -> Result<(), StoreError> {
        let mut transcripts = self.transcripts.write().await;
        let record = transcripts
            .get_mut(transcript_id)
            .ok_or_else(|| StoreError(format!("Unknown transcript: {}", transcript_id)))?;
        record.results.push(envelope);
        debug!(
            transcript = %record.name,
            count = record.results.len(),
            "appended result envelope"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognizer::mock::simple_result;

    #[tokio::test]
    async fn test_append_preserves_order() {
        let store = MemoryTranscriptStore::new();
        let id = store.create("meeting.flac").await.unwrap();

        for (i, text) in ["one", "two", "three"].iter().enumerate() {
            let envelope = ResultEnvelope::from_result(i as u64, simple_result(text, true));
            store.append(&id, envelope).await.unwrap();
        }

        let results = store.results(&id).await.unwrap();
        let texts: Vec<&str> = results
            .iter()
            .map(|r| r.alternatives[0].transcript.as_str())
            .collect();
        assert_eq!(texts, ["one", "two", "three"]);
        assert_eq!(results[2].generation, 2);
    }

    #[tokio::test]
    async fn test_append_to_unknown_transcript_fails() {
        let store = MemoryTranscriptStore::new();
        let envelope = ResultEnvelope::from_result(0, simple_result("x", false));
        assert!(store.append("missing", envelope).await.is_err());
    }
}
