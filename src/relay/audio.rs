//! # Audio Relay
//!
//! Bridges client-originated audio chunks to the Session Manager. The relay
//! knows nothing about generations or rotation; it counts bytes, forwards
//! chunks in order, and signals end-of-input exactly once.
//!
//! ## End-of-input precedence:
//! A zero-length chunk is the explicit sentinel and always wins: it is never
//! forwarded as audio, even if the byte budget has room left. A chunk that
//! completes the budget is forwarded first, then end-of-input follows.
//!
//! ## Backpressure:
//! Both hops are bounded. When the manager is busy (upstream send capacity
//! exhausted), `send().await` here blocks, the transport channel fills, and
//! the transport actor stops reading from the socket until there is room
//! again. Backpressure therefore reaches all the way to the client.

use crate::relay::session::SessionShared;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Events the Audio Relay hands to the Session Manager.
#[derive(Debug, PartialEq, Eq)]
pub enum AudioEvent {
    /// One opaque audio chunk, never empty.
    Chunk(Vec<u8>),
    /// No more audio will follow. Sent exactly once.
    EndOfInput,
}

pub struct AudioRelay {
    shared: Arc<SessionShared>,
}

impl AudioRelay {
    pub fn new(shared: Arc<SessionShared>) -> Self {
        Self { shared }
    }

    /// Pump chunks from the transport into the manager until end-of-input.
    ///
    /// Terminates on: the zero-length sentinel, the byte budget being
    /// reached, or the transport channel closing (client gone). In every
    /// case the end-of-input flag is set and, if the manager is still
    /// listening, `EndOfInput` is delivered.
    pub async fn run(
        self,
        mut transport_rx: mpsc::Receiver<Vec<u8>>,
        manager_tx: mpsc::Sender<AudioEvent>,
    ) {
        while let Some(chunk) = transport_rx.recv().await {
            if chunk.is_empty() {
                debug!("audio relay received end-of-input sentinel");
                break;
            }

            let total = self.shared.add_bytes(chunk.len() as u64);
            if manager_tx.send(AudioEvent::Chunk(chunk)).await.is_err() {
                // Manager already tore down (fatal upstream error); there is
                // nobody left to signal.
                debug!("audio relay stopping: session manager gone");
                return;
            }

            if total >= self.shared.byte_budget() {
                debug!(total, budget = self.shared.byte_budget(), "byte budget reached");
                break;
            }
        }

        self.shared.mark_input_done();
        let _ = manager_tx.send(AudioEvent::EndOfInput).await;
    }
}
