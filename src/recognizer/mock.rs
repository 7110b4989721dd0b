//! Scripted recognizer used by the orchestrator tests.
//!
//! Records every chunk delivered to every generation, can be told to fail
//! the next N opens, and lets tests inject results into a generation's
//! stream. By default a generation's result stream ends as soon as its send
//! side is closed, which is the shape the rotation tests need; collector
//! tests opt into manual result control instead.

use crate::recognizer::client::{AudioSink, Recognizer, RecognizerError, ResultSource};
use crate::recognizer::types::{RecognitionConfig, RecognitionResult, SpeechAlternative};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

type ResultTx = mpsc::UnboundedSender<Result<RecognitionResult, RecognizerError>>;

pub(crate) struct MockGeneration {
    pub id: usize,
    chunks: Mutex<Vec<Vec<u8>>>,
    send_closed: AtomicBool,
    sent_after_close: AtomicBool,
    results_tx: Mutex<Option<ResultTx>>,
}

impl MockGeneration {
    pub fn bytes_sent(&self) -> usize {
        self.chunks.lock().unwrap().iter().map(|c| c.len()).sum()
    }

    pub fn chunks(&self) -> Vec<Vec<u8>> {
        self.chunks.lock().unwrap().clone()
    }

    pub fn send_closed(&self) -> bool {
        self.send_closed.load(Ordering::SeqCst)
    }

    /// True if a chunk arrived after `close_send`, which the orchestrator
    /// must never allow.
    pub fn sent_after_close(&self) -> bool {
        self.sent_after_close.load(Ordering::SeqCst)
    }

    pub fn push_result(&self, result: RecognitionResult) {
        if let Some(tx) = self.results_tx.lock().unwrap().as_ref() {
            let _ = tx.send(Ok(result));
        }
    }

    pub fn push_error(&self, error: RecognizerError) {
        if let Some(tx) = self.results_tx.lock().unwrap().as_ref() {
            let _ = tx.send(Err(error));
        }
    }

    /// End this generation's result stream.
    pub fn finish_results(&self) {
        self.results_tx.lock().unwrap().take();
    }

    /// Simulate the upstream tearing down the send side out from under the
    /// orchestrator; subsequent chunk sends will fail.
    pub fn break_send(&self) {
        self.send_closed.store(true, Ordering::SeqCst);
    }
}

struct MockRecognizerState {
    generations: Mutex<Vec<Arc<MockGeneration>>>,
    open_failures: AtomicUsize,
    end_results_on_close: bool,
}

#[derive(Clone)]
pub(crate) struct MockRecognizer {
    state: Arc<MockRecognizerState>,
}

impl MockRecognizer {
    /// Recognizer whose generations end their result stream when the send
    /// side closes.
    pub fn new() -> Self {
        Self {
            state: Arc::new(MockRecognizerState {
                generations: Mutex::new(Vec::new()),
                open_failures: AtomicUsize::new(0),
                end_results_on_close: true,
            }),
        }
    }

    /// Recognizer whose result streams stay open until the test calls
    /// `finish_results` explicitly.
    pub fn with_manual_results() -> Self {
        Self {
            state: Arc::new(MockRecognizerState {
                generations: Mutex::new(Vec::new()),
                open_failures: AtomicUsize::new(0),
                end_results_on_close: false,
            }),
        }
    }

    /// Make the next `n` calls to `open` fail with a connect error.
    pub fn fail_opens(&self, n: usize) {
        self.state.open_failures.store(n, Ordering::SeqCst);
    }

    pub fn generations(&self) -> Vec<Arc<MockGeneration>> {
        self.state.generations.lock().unwrap().clone()
    }
}

#[async_trait]
impl Recognizer for MockRecognizer {
    async fn open(
        &self,
        _config: &RecognitionConfig,
        _authorization: &str,
    ) -> Result<(Box<dyn AudioSink>, Box<dyn ResultSource>), RecognizerError> {
        let remaining = self.state.open_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.state.open_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(RecognizerError::Connect("scripted open failure".into()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let mut generations = self.state.generations.lock().unwrap();
        let generation = Arc::new(MockGeneration {
            id: generations.len(),
            chunks: Mutex::new(Vec::new()),
            send_closed: AtomicBool::new(false),
            sent_after_close: AtomicBool::new(false),
            results_tx: Mutex::new(Some(tx)),
        });
        generations.push(generation.clone());

        Ok((
            Box::new(MockSink {
                generation,
                end_results_on_close: self.state.end_results_on_close,
            }),
            Box::new(MockSource { rx }),
        ))
    }
}

struct MockSink {
    generation: Arc<MockGeneration>,
    end_results_on_close: bool,
}

#[async_trait]
impl AudioSink for MockSink {
    async fn send_chunk(&mut self, chunk: &[u8]) -> Result<(), RecognizerError> {
        if self.generation.send_closed() {
            self.generation.sent_after_close.store(true, Ordering::SeqCst);
            return Err(RecognizerError::Send("send side already closed".into()));
        }
        self.generation.chunks.lock().unwrap().push(chunk.to_vec());
        Ok(())
    }

    async fn close_send(&mut self) -> Result<(), RecognizerError> {
        self.generation.send_closed.store(true, Ordering::SeqCst);
        if self.end_results_on_close {
            self.generation.finish_results();
        }
        Ok(())
    }
}

struct MockSource {
    rx: mpsc::UnboundedReceiver<Result<RecognitionResult, RecognizerError>>,
}

#[async_trait]
impl ResultSource for MockSource {
    async fn next_result(&mut self) -> Option<Result<RecognitionResult, RecognizerError>> {
        self.rx.recv().await
    }
}

/// Shorthand for a single-alternative result in tests.
pub(crate) fn simple_result(text: &str, is_final: bool) -> RecognitionResult {
    RecognitionResult {
        alternatives: vec![SpeechAlternative {
            transcript: text.to_string(),
            confidence: 0.9,
            words: Vec::new(),
        }],
        is_final,
        end_time_ms: 0,
    }
}
