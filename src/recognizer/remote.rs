//! # Remote Recognizer Transport
//!
//! WebSocket implementation of the recognizer traits, speaking a small framed
//! protocol to a recognition gateway:
//!
//! 1. On open, the relay sends the [`RecognitionConfig`] as one JSON text
//!    frame.
//! 2. Audio chunks follow as binary frames; an empty binary frame closes the
//!    send side of the sub-session.
//! 3. The gateway streams [`RecognitionResult`] JSON text frames back until
//!    it closes the connection (end-of-stream).
//!
//! The connection is split so the send half can be closed while trailing
//! results are still being drained from the receive half.

use crate::recognizer::client::{AudioSink, Recognizer, RecognizerError, ResultSource};
use crate::recognizer::types::{RecognitionConfig, RecognitionResult};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Recognizer backed by a WebSocket recognition gateway.
#[derive(Debug, Clone)]
pub struct RemoteRecognizer {
    endpoint: String,
}

impl RemoteRecognizer {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl Recognizer for RemoteRecognizer {
    async fn open(
        &self,
        config: &RecognitionConfig,
        authorization: &str,
    ) -> Result<(Box<dyn AudioSink>, Box<dyn ResultSource>), RecognizerError> {
        let mut request = self
            .endpoint
            .as_str()
            .into_client_request()
            .map_err(|e| RecognizerError::Connect(e.to_string()))?;
        if !authorization.is_empty() {
            let value = authorization
                .parse()
                .map_err(|_| RecognizerError::Connect("Invalid authorization value".to_string()))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (stream, _response) = connect_async(request)
            .await
            .map_err(|e| RecognizerError::Connect(e.to_string()))?;

        let (mut write, read) = stream.split();

        // Configure the sub-session before handing it out; a returned
        // generation must be immediately ready for audio.
        let setup = serde_json::to_string(config)
            .map_err(|e| RecognizerError::Protocol(e.to_string()))?;
        write
            .send(Message::Text(setup))
            .await
            .map_err(|e| RecognizerError::Connect(e.to_string()))?;

        debug!(endpoint = %self.endpoint, "opened recognizer sub-session");

        Ok((
            Box::new(RemoteAudioSink { write }),
            Box::new(RemoteResultSource { read }),
        ))
    }
}

struct RemoteAudioSink {
    write: SplitSink<WsStream, Message>,
}

#[async_trait]
impl AudioSink for RemoteAudioSink {
    async fn send_chunk(&mut self, chunk: &[u8]) -> Result<(), RecognizerError> {
        self.write
            .send(Message::Binary(chunk.to_vec()))
            .await
            .map_err(|e| RecognizerError::Send(e.to_string()))
    }

    async fn close_send(&mut self) -> Result<(), RecognizerError> {
        // An empty binary frame is the gateway's end-of-audio marker. The
        // WebSocket itself stays open so trailing results can flow.
        self.write
            .send(Message::Binary(Vec::new()))
            .await
            .map_err(|e| RecognizerError::Send(e.to_string()))?;
        self.write
            .flush()
            .await
            .map_err(|e| RecognizerError::Send(e.to_string()))
    }
}

struct RemoteResultSource {
    read: SplitStream<WsStream>,
}

#[async_trait]
impl ResultSource for RemoteResultSource {
    async fn next_result(&mut self) -> Option<Result<RecognitionResult, RecognizerError>> {
        loop {
            match self.read.next().await {
                Some(Ok(Message::Text(text))) => {
                    return match serde_json::from_str::<RecognitionResult>(&text) {
                        Ok(result) => Some(Ok(result)),
                        Err(e) => Some(Err(RecognizerError::Protocol(format!(
                            "Unparseable result frame: {}",
                            e
                        )))),
                    };
                }
                Some(Ok(Message::Close(_))) | None => return None,
                Some(Ok(other)) => {
                    // Ping/pong and stray binary frames carry no results.
                    debug!(frame = ?other, "ignoring non-result frame from recognizer");
                }
                Some(Err(e)) => {
                    warn!("recognizer result stream failed: {}", e);
                    return Some(Err(RecognizerError::Receive(e.to_string())));
                }
            }
        }
    }
}
