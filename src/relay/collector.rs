//! # Result Collector
//!
//! One collector runs per generation, pulling results from its sub-session
//! until upstream signals end-of-stream or a terminal error. Each result is
//! persisted and, while the session is open, forwarded to the Output Relay.
//!
//! ## Independence of side effects:
//! Persistence and forwarding must not block each other. A store failure is
//! logged and the result is still forwarded; a forwarding failure (output
//! consumer gone) means the client left, so the collector stops emitting but
//! keeps persisting until its generation drains.

use crate::recognizer::client::ResultSource;
use crate::relay::output::ErrorFrame;
use crate::relay::session::SessionShared;
use crate::state::RelayMetrics;
use crate::transcript::{ResultEnvelope, TranscriptStore};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub struct ResultCollector {
    generation: u64,
    source: Box<dyn ResultSource>,
    transcript_id: String,
    store: Arc<dyn TranscriptStore>,
    data_tx: mpsc::Sender<String>,
    err_tx: mpsc::Sender<ErrorFrame>,
    shared: Arc<SessionShared>,
    metrics: Arc<RelayMetrics>,
}

impl ResultCollector {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        generation: u64,
        source: Box<dyn ResultSource>,
        transcript_id: String,
        store: Arc<dyn TranscriptStore>,
        data_tx: mpsc::Sender<String>,
        err_tx: mpsc::Sender<ErrorFrame>,
        shared: Arc<SessionShared>,
        metrics: Arc<RelayMetrics>,
    ) -> Self {
        Self {
            generation,
            source,
            transcript_id,
            store,
            data_tx,
            err_tx,
            shared,
            metrics,
        }
    }

    /// Drain this generation's result stream to completion.
    ///
    /// Blocks until upstream end-of-stream or a terminal receive error;
    /// results keep their upstream order end-to-end within this generation.
    pub async fn run(mut self) {
        let mut emitting = true;

        while let Some(item) = self.source.next_result().await {
            match item {
                Ok(result) => {
                    let envelope = ResultEnvelope::from_result(self.generation, result);
                    let payload = match serde_json::to_string(&envelope) {
                        Ok(payload) => payload,
                        Err(e) => {
                            warn!(generation = self.generation, "unserializable result: {}", e);
                            continue;
                        }
                    };

                    if let Err(e) = self.store.append(&self.transcript_id, envelope).await {
                        // Durability and delivery are decoupled: the client
                        // still gets the result.
                        warn!(
                            generation = self.generation,
                            transcript = %self.transcript_id,
                            "failed to persist result: {}", e
                        );
                    } else {
                        self.metrics.record_result_persisted();
                    }

                    if emitting && !self.shared.is_closed() {
                        if self.data_tx.send(payload).await.is_err() {
                            debug!(
                                generation = self.generation,
                                "output consumer gone, persisting only from here on"
                            );
                            emitting = false;
                        } else {
                            self.metrics.record_result_forwarded();
                        }
                    }
                }
                Err(e) => {
                    // Terminal for this generation only; overlapping
                    // generations keep draining.
                    warn!(generation = self.generation, "result stream error: {}", e);
                    let _ = self
                        .err_tx
                        .send(ErrorFrame::non_fatal(e.to_string()))
                        .await;
                    break;
                }
            }
        }

        debug!(generation = self.generation, "result collector finished");
    }
}
