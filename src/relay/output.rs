//! # Output Relay
//!
//! Merges results from every live Result Collector into the single feed the
//! client transport consumes. One task selects over the data queue, the
//! error queue, and a keepalive timer; queued envelopes are coalesced into
//! one transport frame (newline-separated) to keep small-frame overhead
//! down, exactly like the write pump it replaces.
//!
//! ## Termination:
//! A transport write failure means the client is gone: the relay marks the
//! session closed (collectors stop publishing, persistence continues) and
//! exits. A fatal error frame is written once and then the transport is
//! closed. Otherwise the relay runs until both queues are closed and
//! drained, then closes the transport cleanly so the client gets a close
//! frame instead of a heartbeat timeout.

use crate::relay::session::SessionShared;
use crate::state::RelayMetrics;
use async_trait::async_trait;
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant};
use tracing::{debug, warn};

/// An error destined for the client.
#[derive(Debug, Clone)]
pub struct ErrorFrame {
    pub message: String,
    /// Fatal frames are the last thing written before the transport closes.
    pub fatal: bool,
}

impl ErrorFrame {
    pub fn non_fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fatal: false,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fatal: true,
        }
    }
}

/// Transport write failure (deadline exceeded, remote closed).
#[derive(Debug)]
pub struct SinkError(pub String);

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Transport sink error: {}", self.0)
    }
}

impl std::error::Error for SinkError {}

/// Client-facing write surface of the transport.
///
/// The WebSocket actor implements this; tests substitute a recorder.
#[async_trait]
pub trait FrameSink: Send {
    async fn write_text(&mut self, frame: String) -> Result<(), SinkError>;

    /// Transport-level keepalive ping.
    async fn ping(&mut self) -> Result<(), SinkError>;

    /// Close the transport (fatal error path).
    async fn close(&mut self) -> Result<(), SinkError>;
}

fn data_frame(msg: &str) -> String {
    json!({"msg_type": "data", "msg": msg}).to_string()
}

fn error_frame(msg: &str) -> String {
    json!({"msg_type": "error", "msg": msg}).to_string()
}

pub struct OutputRelay {
    data_rx: mpsc::Receiver<String>,
    err_rx: mpsc::Receiver<ErrorFrame>,
    sink: Box<dyn FrameSink>,
    shared: Arc<SessionShared>,
    keepalive: Duration,
    metrics: Arc<RelayMetrics>,
}

impl OutputRelay {
    pub fn new(
        data_rx: mpsc::Receiver<String>,
        err_rx: mpsc::Receiver<ErrorFrame>,
        sink: Box<dyn FrameSink>,
        shared: Arc<SessionShared>,
        keepalive: Duration,
        metrics: Arc<RelayMetrics>,
    ) -> Self {
        Self {
            data_rx,
            err_rx,
            sink,
            shared,
            keepalive,
            metrics,
        }
    }

    pub async fn run(self) {
        let OutputRelay {
            mut data_rx,
            mut err_rx,
            mut sink,
            shared,
            keepalive,
            metrics,
        } = self;

        let mut ping = interval_at(Instant::now() + keepalive, keepalive);
        let mut data_open = true;
        let mut err_open = true;

        loop {
            if !data_open && !err_open {
                break;
            }

            tokio::select! {
                msg = data_rx.recv(), if data_open => match msg {
                    Some(payload) => {
                        let frame = coalesce(data_frame(&payload), &mut data_rx);
                        if sink.write_text(frame).await.is_err() {
                            warn!("client transport write failed, marking session closed");
                            shared.mark_closed();
                            return;
                        }
                    }
                    None => data_open = false,
                },
                msg = err_rx.recv(), if err_open => match msg {
                    Some(error) => {
                        metrics.record_error_frame();
                        let fatal = error.fatal;
                        let frame = coalesce(error_frame(&error.message), &mut data_rx);
                        if sink.write_text(frame).await.is_err() {
                            warn!("client transport write failed, marking session closed");
                            shared.mark_closed();
                            return;
                        }
                        if fatal {
                            debug!("fatal error frame written, closing transport");
                            let _ = sink.close().await;
                            shared.mark_closed();
                            return;
                        }
                    }
                    None => err_open = false,
                },
                _ = ping.tick() => {
                    if sink.ping().await.is_err() {
                        warn!("keepalive ping failed, marking session closed");
                        shared.mark_closed();
                        return;
                    }
                }
            }
        }

        // Session complete: every result has been delivered. Close the
        // transport instead of leaving an idle client to time out.
        debug!("output relay drained, closing transport");
        let _ = sink.close().await;
    }
}

/// Append whatever results queued while the write was pending, separated by
/// newlines, so they go out in a single transport frame.
fn coalesce(first: String, data_rx: &mut mpsc::Receiver<String>) -> String {
    let mut frame = first;
    while let Ok(payload) = data_rx.try_recv() {
        frame.push('\n');
        frame.push_str(&data_frame(&payload));
    }
    frame
}
