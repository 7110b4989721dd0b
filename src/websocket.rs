//! # WebSocket Streaming Handler
//!
//! Client-facing transport for streaming transcription. Clients connect to
//! `/ws/transcribe` with the session parameters in the query string, then
//! stream binary audio frames; the server streams back newline-separated
//! JSON frames with transcription results and errors.
//!
//! ## WebSocket Protocol:
//! 1. **Handshake**: query parameters carry the session byte budget, audio
//!    format, authorization and transcript name; a bad handshake is rejected
//!    with 404 before the upgrade.
//! 2. **Audio Streaming**: binary frames are opaque audio chunks, relayed
//!    upstream in arrival order.
//! 3. **End of input**: an empty binary frame. The server keeps the
//!    connection open until every pending result has been delivered.
//! 4. **Results**: text frames of the form `{"msg_type": "data", "msg": ...}`
//!    or `{"msg_type": "error", "msg": ...}`.
//!
//! The actor owns only the transport. All session logic lives in the relay
//! pipeline tasks, which communicate with the actor through channels and
//! the [`FrameSink`] trait. The audio channel is bounded: when the pipeline
//! is busy the actor parks on the send and stops reading from the socket,
//! so upstream backpressure reaches the client.

use crate::error::AppError;
use crate::recognizer::types::{AudioEncoding, RecognitionConfig};
use crate::relay::audio::AudioRelay;
use crate::relay::manager::SessionManager;
use crate::relay::output::{ErrorFrame, FrameSink, OutputRelay, SinkError};
use crate::relay::session::SessionShared;
use crate::state::AppState;

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

/// Validated handshake query parameters.
///
/// `size`, `sample_rate_hertz`, `encoding`, `language`, `authorization` and
/// `name` are required; `model` is optional. Anything missing or malformed
/// rejects the handshake with 404 before the WebSocket upgrade happens.
#[derive(Debug, Clone)]
pub struct HandshakeParams {
    /// Total audio byte budget for the session.
    pub size: u64,
    /// Upstream recognizer configuration.
    pub recognition: RecognitionConfig,
    /// Bearer token forwarded to the upstream recognizer.
    pub authorization: String,
    /// Name under which the transcript is persisted.
    pub name: String,
}

impl HandshakeParams {
    pub fn from_query(query: &HashMap<String, String>) -> Result<Self, AppError> {
        let size = required(query, "size")?
            .parse::<u64>()
            .map_err(|_| AppError::NotFound("Invalid parameter: size".to_string()))?;
        if size == 0 {
            return Err(AppError::NotFound("Invalid parameter: size".to_string()));
        }

        let sample_rate_hertz = required(query, "sample_rate_hertz")?
            .parse::<u32>()
            .map_err(|_| AppError::NotFound("Invalid parameter: sample_rate_hertz".to_string()))?;

        let encoding = required(query, "encoding")?
            .parse::<AudioEncoding>()
            .map_err(|_| AppError::NotFound("Invalid parameter: encoding".to_string()))?;

        let language = required(query, "language")?.to_string();
        let authorization = required(query, "authorization")?.to_string();
        let name = required(query, "name")?.to_string();
        let model = query.get("model").cloned();

        Ok(Self {
            size,
            recognition: RecognitionConfig {
                encoding,
                sample_rate_hertz,
                language,
                model,
            },
            authorization,
            name,
        })
    }
}

fn required<'a>(query: &'a HashMap<String, String>, key: &str) -> Result<&'a str, AppError> {
    query
        .get(key)
        .map(|v| v.as_str())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::NotFound(format!("Missing required parameter: {}", key)))
}

/// WebSocket actor for one streaming session.
///
/// ## Actor Model:
/// Each connection is an independent actor. Inbound binary frames are pushed
/// into the audio channel; outbound frames arrive as actor messages from the
/// Output Relay. The actor never blocks on the pipeline.
pub struct RelaySocket {
    /// Raw audio chunks towards the Audio Relay (empty chunk = end of input).
    /// Bounded: a full channel suspends inbound frame processing.
    chunk_tx: mpsc::Sender<Vec<u8>>,

    /// Shared session flags; marked closed when the transport dies.
    shared: Arc<SessionShared>,

    /// Last time the client proved liveness (pong or any inbound frame).
    last_heartbeat: Instant,

    /// How often to check client liveness.
    ping_period: Duration,

    /// Client is considered gone after this long without a heartbeat.
    read_timeout: Duration,
}

impl RelaySocket {
    pub fn new(
        chunk_tx: mpsc::Sender<Vec<u8>>,
        shared: Arc<SessionShared>,
        ping_period: Duration,
        read_timeout: Duration,
    ) -> Self {
        Self {
            chunk_tx,
            shared,
            last_heartbeat: Instant::now(),
            ping_period,
            read_timeout,
        }
    }
}

impl Actor for RelaySocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!("WebSocket connection started");

        // Liveness check only; keepalive pings are driven by the Output
        // Relay so they share the write path with data frames.
        ctx.run_interval(self.ping_period, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > act.read_timeout {
                warn!("WebSocket heartbeat timeout, closing connection");
                ctx.stop();
            }
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        info!("WebSocket connection stopped");

        // Collectors stop forwarding but keep persisting; the audio relay
        // sees the channel close and signals end of input.
        self.shared.mark_closed();
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for RelaySocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Binary(data)) => {
                self.last_heartbeat = Instant::now();
                // Empty frame is the end-of-input sentinel; both travel the
                // same channel so ordering is preserved.
                match self.chunk_tx.try_send(data.to_vec()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(chunk)) => {
                        // Pipeline is busy. Park the context on a blocking
                        // send: no further frames are read from the socket
                        // until there is room, which is how backpressure
                        // reaches the client.
                        let tx = self.chunk_tx.clone();
                        ctx.wait(
                            async move {
                                let _ = tx.send(chunk).await;
                            }
                            .into_actor(self),
                        );
                    }
                    Err(TrySendError::Closed(_)) => {
                        debug!("audio pipeline gone, ignoring inbound frame");
                    }
                }
            }
            Ok(ws::Message::Text(_)) => {
                warn!("Received unexpected text frame, audio must be binary");
            }
            Ok(ws::Message::Ping(data)) => {
                ctx.pong(&data);
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!("WebSocket closed by client: {:?}", reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!("Received unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                warn!("WebSocket protocol error: {}", err);
                ctx.stop();
            }
        }
    }
}

/// Outbound text frame from the Output Relay.
#[derive(Message)]
#[rtype(result = "()")]
struct SendFrame(String);

/// Keepalive ping from the Output Relay.
#[derive(Message)]
#[rtype(result = "()")]
struct SendPing;

/// Close the transport after a fatal error frame.
#[derive(Message)]
#[rtype(result = "()")]
struct CloseTransport;

impl Handler<SendFrame> for RelaySocket {
    type Result = ();

    fn handle(&mut self, msg: SendFrame, ctx: &mut Self::Context) {
        ctx.text(msg.0);
    }
}

impl Handler<SendPing> for RelaySocket {
    type Result = ();

    fn handle(&mut self, _msg: SendPing, ctx: &mut Self::Context) {
        ctx.ping(b"");
    }
}

impl Handler<CloseTransport> for RelaySocket {
    type Result = ();

    fn handle(&mut self, _msg: CloseTransport, ctx: &mut Self::Context) {
        ctx.close(Some(ws::CloseReason {
            code: ws::CloseCode::Normal,
            description: None,
        }));
        ctx.stop();
    }
}

/// [`FrameSink`] backed by the actor's mailbox.
///
/// `send` (not `do_send`) so a dead or wedged actor surfaces as a write
/// error, which is how the Output Relay learns the client is gone. The write
/// timeout bounds how long a single frame may sit undelivered.
struct ActorFrameSink {
    addr: Addr<RelaySocket>,
    write_timeout: Duration,
}

#[async_trait]
impl FrameSink for ActorFrameSink {
    async fn write_text(&mut self, frame: String) -> Result<(), SinkError> {
        tokio::time::timeout(self.write_timeout, self.addr.send(SendFrame(frame)))
            .await
            .map_err(|_| SinkError("write deadline exceeded".to_string()))?
            .map_err(|e| SinkError(e.to_string()))
    }

    async fn ping(&mut self) -> Result<(), SinkError> {
        tokio::time::timeout(self.write_timeout, self.addr.send(SendPing))
            .await
            .map_err(|_| SinkError("write deadline exceeded".to_string()))?
            .map_err(|e| SinkError(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        self.addr
            .send(CloseTransport)
            .await
            .map_err(|e| SinkError(e.to_string()))
    }
}

/// WebSocket endpoint handler.
///
/// ## HTTP to WebSocket Upgrade:
/// Validates the handshake, creates the transcript, upgrades the connection
/// and wires up the per-session pipeline: audio relay, session manager and
/// output relay, each as its own task.
pub async fn transcribe_ws(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    info!(
        "New WebSocket connection request from: {:?}",
        req.connection_info().peer_addr()
    );

    let query = web::Query::<HashMap<String, String>>::from_query(req.query_string())
        .map(web::Query::into_inner)
        .unwrap_or_default();
    let params = HandshakeParams::from_query(&query)?;

    let ws_config = &state.config.websocket;
    let shared = Arc::new(SessionShared::new(params.size));
    let (chunk_tx, chunk_rx) = mpsc::channel(ws_config.audio_queue_depth);

    let socket = RelaySocket::new(
        chunk_tx,
        shared.clone(),
        ws_config.ping_period(),
        ws_config.read_timeout(),
    );
    let (addr, response) = ws::WsResponseBuilder::new(socket, &req, stream)
        .frame_size(ws_config.max_message_bytes)
        .start_with_addr()?;

    let (audio_tx, audio_rx) = mpsc::channel(ws_config.audio_queue_depth);
    let (data_tx, data_rx) = mpsc::channel(ws_config.result_queue_depth);
    let (err_tx, err_rx) = mpsc::channel(8);

    tokio::spawn(AudioRelay::new(shared.clone()).run(chunk_rx, audio_tx));

    // Only after the upgrade succeeded: a rejected handshake must not
    // leave an orphaned transcript behind.
    match state.store.create(&params.name).await {
        Ok(transcript_id) => {
            info!(
                transcript = %transcript_id,
                size = params.size,
                language = %params.recognition.language,
                "session accepted"
            );
            state.metrics.record_session_started();

            let manager = SessionManager::new(
                state.recognizer.clone(),
                params.recognition,
                params.authorization,
                transcript_id,
                state.store.clone(),
                data_tx,
                err_tx,
                shared.clone(),
                state.config.upstream.rotation_interval(),
                state.metrics.clone(),
            );
            tokio::spawn(manager.run(audio_rx));
        }
        Err(e) => {
            // The connection is already upgraded; deliver the failure as a
            // fatal error frame and let the output relay close it.
            warn!("failed to create transcript: {}", e);
            let _ = err_tx.send(ErrorFrame::fatal(e.to_string())).await;
        }
    }

    let sink = Box::new(ActorFrameSink {
        addr,
        write_timeout: ws_config.write_timeout(),
    });
    tokio::spawn(
        OutputRelay::new(
            data_rx,
            err_rx,
            sink,
            shared,
            ws_config.ping_period(),
            state.metrics.clone(),
        )
        .run(),
    );

    Ok(response)
}
