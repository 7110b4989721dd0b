//! # Session Manager
//!
//! Owns the recognizer session state machine. One logical Session becomes a
//! sequence of bounded upstream sub-sessions ("generations"); the manager
//! rotates to a fresh generation before the upstream's hard time limit,
//! keeps exactly one generation active for audio, and lets retired
//! generations drain their trailing results concurrently.
//!
//! ## Single-writer loop:
//! The manager task is the only writer of session state and the only holder
//! of the active generation's send half. Audio events and the rotation timer
//! are arms of one `select!`, so a chunk can never be split or reordered
//! across a rotation, and rotation never blocks on a retired generation's
//! teardown — the old send half is closed, the new one swapped in, and the
//! old collector keeps running inside the [`JoinSet`].
//!
//! ## Error policy:
//! Failing to open a generation is fatal: one fatal error frame, every
//! collector shut down, straight to `Closed`. Failing to send a single
//! chunk is a non-fatal error frame and streaming continues.

use crate::recognizer::client::{AudioSink, Recognizer, RecognizerError};
use crate::recognizer::types::RecognitionConfig;
use crate::relay::audio::AudioEvent;
use crate::relay::collector::ResultCollector;
use crate::relay::output::ErrorFrame;
use crate::relay::session::{SessionShared, SessionState};
use crate::state::RelayMetrics;
use crate::transcript::TranscriptStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

pub struct SessionManager {
    recognizer: Arc<dyn Recognizer>,
    recognition: RecognitionConfig,
    authorization: String,
    transcript_id: String,
    store: Arc<dyn TranscriptStore>,
    data_tx: mpsc::Sender<String>,
    err_tx: mpsc::Sender<ErrorFrame>,
    shared: Arc<SessionShared>,
    rotation_interval: Duration,
    metrics: Arc<RelayMetrics>,
    collectors: JoinSet<()>,
}

impl SessionManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        recognizer: Arc<dyn Recognizer>,
        recognition: RecognitionConfig,
        authorization: String,
        transcript_id: String,
        store: Arc<dyn TranscriptStore>,
        data_tx: mpsc::Sender<String>,
        err_tx: mpsc::Sender<ErrorFrame>,
        shared: Arc<SessionShared>,
        rotation_interval: Duration,
        metrics: Arc<RelayMetrics>,
    ) -> Self {
        Self {
            recognizer,
            recognition,
            authorization,
            transcript_id,
            store,
            data_tx,
            err_tx,
            shared,
            rotation_interval,
            metrics,
            collectors: JoinSet::new(),
        }
    }

    /// Drive the Session to completion.
    ///
    /// ## State machine:
    /// `Init` → open generation 0 → `Streaming` → (end-of-input) →
    /// `Draining` → (all collectors done) → `Closed`. A generation-open
    /// failure short-circuits to `Closed` from anywhere.
    pub async fn run(mut self, mut audio_rx: mpsc::Receiver<AudioEvent>) {
        let mut active_sink = match self.open_generation().await {
            Ok(sink) => sink,
            Err(e) => {
                self.fail(e).await;
                return;
            }
        };
        self.publish_state(SessionState::Streaming);

        // First tick one full interval out; rotation must fire strictly
        // before the upstream limit, which config validation guarantees.
        let mut rotation = interval_at(
            Instant::now() + self.rotation_interval,
            self.rotation_interval,
        );
        rotation.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = audio_rx.recv() => match event {
                    Some(AudioEvent::Chunk(chunk)) => {
                        if let Err(e) = active_sink.send_chunk(&chunk).await {
                            warn!("audio chunk failed to send upstream: {}", e);
                            let _ = self
                                .err_tx
                                .send(ErrorFrame::non_fatal(e.to_string()))
                                .await;
                        }
                    }
                    // Channel closure without the sentinel means the audio
                    // relay died with the transport; treat it the same way.
                    Some(AudioEvent::EndOfInput) | None => {
                        debug!("end of input, closing active generation");
                        if let Err(e) = active_sink.close_send().await {
                            warn!("closing active generation failed: {}", e);
                        }
                        break;
                    }
                },
                _ = rotation.tick() => {
                    if let Err(e) = active_sink.close_send().await {
                        warn!("closing retired generation failed: {}", e);
                    }
                    match self.open_generation().await {
                        Ok(sink) => active_sink = sink,
                        Err(e) => {
                            self.fail(e).await;
                            return;
                        }
                    }
                }
            }
        }

        // Leaving the loop drops the rotation interval, so rotation cannot
        // fire once the session is draining.
        self.publish_state(SessionState::Draining);
        while let Some(joined) = self.collectors.join_next().await {
            if let Err(e) = joined {
                warn!("result collector task failed: {}", e);
            }
        }

        self.metrics.record_session_completed();
        self.publish_state(SessionState::Closed);
    }

    /// Open and configure the next generation and spawn its collector.
    async fn open_generation(&mut self) -> Result<Box<dyn AudioSink>, RecognizerError> {
        let (sink, source) = self
            .recognizer
            .open(&self.recognition, &self.authorization)
            .await?;
        let generation = self.shared.next_generation();
        self.metrics.record_generation_opened();
        info!(generation, "opened recognizer generation");

        let collector = ResultCollector::new(
            generation,
            source,
            self.transcript_id.clone(),
            self.store.clone(),
            self.data_tx.clone(),
            self.err_tx.clone(),
            self.shared.clone(),
            self.metrics.clone(),
        );
        self.collectors.spawn(collector.run());

        Ok(sink)
    }

    /// Fatal path: one error frame, all generations closed, `Closed`.
    async fn fail(&mut self, err: RecognizerError) {
        error!("recognizer session is unrecoverable: {}", err);
        let _ = self.err_tx.send(ErrorFrame::fatal(err.to_string())).await;
        self.shared.mark_closed();
        self.collectors.shutdown().await;
        self.publish_state(SessionState::Closed);
    }

    fn publish_state(&self, state: SessionState) {
        info!(state = state.as_str(), "session state changed");
        self.shared.publish_state(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognizer::mock::{simple_result, MockRecognizer};
    use crate::recognizer::types::AudioEncoding;
    use crate::relay::audio::AudioRelay;
    use crate::transcript::{MemoryTranscriptStore, ResultEnvelope};

    fn test_config() -> RecognitionConfig {
        RecognitionConfig {
            encoding: AudioEncoding::Linear16,
            sample_rate_hertz: 16_000,
            language: "en-US".to_string(),
            model: None,
        }
    }

    struct Harness {
        transport_tx: mpsc::Sender<Vec<u8>>,
        data_rx: mpsc::Receiver<String>,
        err_rx: mpsc::Receiver<ErrorFrame>,
        shared: Arc<SessionShared>,
        store: MemoryTranscriptStore,
        transcript_id: String,
        manager: tokio::task::JoinHandle<()>,
    }

    async fn start(budget: u64, rotation: Duration, recognizer: MockRecognizer) -> Harness {
        let store = MemoryTranscriptStore::new();
        let transcript_id = store.create("session").await.unwrap();
        let shared = Arc::new(SessionShared::new(budget));
        let (transport_tx, transport_rx) = mpsc::channel(16);
        let (audio_tx, audio_rx) = mpsc::channel(8);
        let (data_tx, data_rx) = mpsc::channel(64);
        let (err_tx, err_rx) = mpsc::channel(8);

        tokio::spawn(AudioRelay::new(shared.clone()).run(transport_rx, audio_tx));
        let manager = SessionManager::new(
            Arc::new(recognizer),
            test_config(),
            "Bearer test-token".to_string(),
            transcript_id.clone(),
            Arc::new(store.clone()),
            data_tx,
            err_tx,
            shared.clone(),
            rotation,
            Arc::new(RelayMetrics::default()),
        );
        let manager = tokio::spawn(manager.run(audio_rx));

        Harness {
            transport_tx,
            data_rx,
            err_rx,
            shared,
            store,
            transcript_id,
            manager,
        }
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_single_generation_end_to_end() {
        let recognizer = MockRecognizer::new();
        // Rotation far beyond the test's lifetime: exactly one generation.
        let harness = start(64_000, Duration::from_secs(3600), recognizer.clone()).await;

        settle().await;
        assert_eq!(harness.shared.state(), SessionState::Streaming);

        let first = vec![1u8; 32_000];
        let second = vec![2u8; 32_000];
        harness.transport_tx.send(first.clone()).await.unwrap();
        harness.transport_tx.send(second.clone()).await.unwrap();

        harness.manager.await.unwrap();
        assert_eq!(harness.shared.state(), SessionState::Closed);
        assert!(harness.shared.input_done());
        assert_eq!(harness.shared.bytes_received(), 64_000);

        let generations = recognizer.generations();
        assert_eq!(generations.len(), 1);
        assert!(generations[0].send_closed());
        assert_eq!(generations[0].chunks(), vec![first, second]);
    }

    #[tokio::test]
    async fn test_draining_waits_for_collectors() {
        let recognizer = MockRecognizer::with_manual_results();
        let harness = start(1_000, Duration::from_secs(3600), recognizer.clone()).await;

        harness.transport_tx.send(Vec::new()).await.unwrap();
        settle().await;

        // Send side closed, but the result stream is still open: the
        // session must sit in Draining, not Closed.
        assert_eq!(harness.shared.state(), SessionState::Draining);
        assert!(recognizer.generations()[0].send_closed());

        recognizer.generations()[0].finish_results();
        harness.manager.await.unwrap();
        assert_eq!(harness.shared.state(), SessionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rotation_preserves_every_byte() {
        let recognizer = MockRecognizer::new();
        let harness = start(1_000_000, Duration::from_millis(50), recognizer.clone()).await;

        let mut sent = 0usize;
        for round in 0u8..4 {
            harness.transport_tx.send(vec![round; 1_000]).await.unwrap();
            sent += 1_000;
            tokio::time::sleep(Duration::from_millis(60)).await;
        }
        harness.transport_tx.send(Vec::new()).await.unwrap();
        harness.manager.await.unwrap();

        let generations = recognizer.generations();
        assert!(generations.len() >= 2, "expected rotation to have occurred");

        // No loss, no duplication, and never a write into a retired
        // generation.
        let forwarded: usize = generations.iter().map(|g| g.bytes_sent()).sum();
        assert_eq!(forwarded, sent);
        for (index, generation) in generations.iter().enumerate() {
            // Generations are opened strictly in rotation order.
            assert_eq!(generation.id, index);
            assert!(generation.send_closed());
            assert!(!generation.sent_after_close());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_generations_merge_without_loss() {
        let recognizer = MockRecognizer::with_manual_results();
        let mut harness = start(1_000_000, Duration::from_millis(50), recognizer.clone()).await;

        harness.transport_tx.send(vec![0u8; 100]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        let generations = recognizer.generations();
        assert!(generations.len() >= 2);
        let (old, new) = (&generations[0], &generations[1]);
        assert!(old.send_closed());
        assert!(!new.send_closed());

        // Old generation drains trailing results while the new one emits.
        old.push_result(simple_result("g0-a", false));
        new.push_result(simple_result("g1-a", false));
        old.push_result(simple_result("g0-b", true));
        new.push_result(simple_result("g1-b", true));
        old.push_result(simple_result("g0-c", true));
        for generation in &generations {
            generation.finish_results();
        }

        harness.transport_tx.send(Vec::new()).await.unwrap();
        harness.manager.await.unwrap();

        let mut by_generation: Vec<Vec<String>> = vec![Vec::new(); generations.len()];
        while let Some(payload) = harness.data_rx.recv().await {
            let envelope: ResultEnvelope = serde_json::from_str(&payload).unwrap();
            by_generation[envelope.generation as usize]
                .push(envelope.alternatives[0].transcript.clone());
        }

        // Each generation individually ordered; total equals sum of parts.
        assert_eq!(by_generation[0], ["g0-a", "g0-b", "g0-c"]);
        assert_eq!(by_generation[1], ["g1-a", "g1-b"]);
        let persisted = harness.store.results(&harness.transcript_id).await.unwrap();
        assert_eq!(persisted.len(), 5);
    }

    #[tokio::test]
    async fn test_generation_open_failure_is_fatal() {
        let recognizer = MockRecognizer::new();
        recognizer.fail_opens(1);
        let mut harness = start(64_000, Duration::from_secs(3600), recognizer.clone()).await;

        harness.manager.await.unwrap();
        assert_eq!(harness.shared.state(), SessionState::Closed);
        assert!(harness.shared.is_closed());

        // Exactly one error frame, and it is fatal; zero data frames.
        let error = harness.err_rx.recv().await.unwrap();
        assert!(error.fatal);
        assert!(harness.err_rx.recv().await.is_none());
        assert!(harness.data_rx.recv().await.is_none());
        assert!(recognizer.generations().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_rotation_after_streaming_ends() {
        let recognizer = MockRecognizer::new();
        let harness = start(64_000, Duration::from_millis(50), recognizer.clone()).await;

        harness.transport_tx.send(Vec::new()).await.unwrap();
        harness.manager.await.unwrap();
        assert_eq!(harness.shared.state(), SessionState::Closed);

        // The rotation timer is gone with the Streaming loop; waiting past
        // several intervals must not create generations.
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(recognizer.generations().len(), 1);
        assert_eq!(harness.shared.generations_opened(), 1);
    }

    #[tokio::test]
    async fn test_chunk_send_failure_is_non_fatal() {
        let recognizer = MockRecognizer::new();
        let mut harness = start(64_000, Duration::from_secs(3600), recognizer.clone()).await;
        settle().await;

        // Force a send failure by closing the generation behind the
        // manager's back, then keep streaming.
        let generations = recognizer.generations();
        generations[0].break_send();
        harness.transport_tx.send(vec![9u8; 10]).await.unwrap();
        settle().await;

        let error = harness.err_rx.recv().await.unwrap();
        assert!(!error.fatal);
        assert_ne!(harness.shared.state(), SessionState::Closed);

        harness.transport_tx.send(Vec::new()).await.unwrap();
        harness.manager.await.unwrap();
        assert_eq!(harness.shared.state(), SessionState::Closed);
    }
}
