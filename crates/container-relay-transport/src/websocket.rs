//! WebSocket transport for browser consoles.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use axum::{
    Json, Router,
    extract::{
        Path, Query, State, WebSocketUpgrade,
        ws::{CloseFrame, Message, WebSocket, close_code},
    },
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use container_relay_core::{
    ClientFrame, CloseReason, ServerMessage, SessionId, SessionInfo, SessionKind, Transport,
    TransportError, TransportEvent, TransportEvents,
};
use container_relay_session::{RegistryFilter, SessionOutcome, SessionRelay};
use futures::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::trace::TraceLayer;

const INBOUND_CAPACITY: usize = 64;

enum Outbound {
    Text(String),
    Close(CloseReason),
}

/// Server side of a browser websocket.
pub struct WsTransport {
    tx: mpsc::UnboundedSender<Outbound>,
    connected: Arc<AtomicBool>,
    closed: AtomicBool,
}

impl WsTransport {
    /// Split a socket into a transport and its inbound event stream.
    ///
    /// Spawns a writer task and a reader task; both end with the socket.
    #[must_use]
    pub fn start(socket: WebSocket) -> (Self, TransportEvents) {
        let (sink, stream) = socket.split();
        let connected = Arc::new(AtomicBool::new(true));
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(write_loop(sink, rx, Arc::clone(&connected)));
        let events = read_loop(stream, Arc::clone(&connected));

        (
            Self {
                tx,
                connected,
                closed: AtomicBool::new(false),
            },
            events,
        )
    }
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    connected: Arc<AtomicBool>,
) {
    while let Some(outbound) = rx.recv().await {
        let (message, last) = match outbound {
            Outbound::Text(json) => (Message::Text(json.into()), false),
            Outbound::Close(reason) => {
                let code = match reason {
                    CloseReason::Normal => close_code::NORMAL,
                    CloseReason::Error => close_code::ERROR,
                };
                let frame = CloseFrame {
                    code,
                    reason: "".into(),
                };
                (Message::Close(Some(frame)), true)
            }
        };
        if let Err(e) = sink.send(message).await {
            tracing::debug!("WebSocket send failed: {e}");
            connected.store(false, Ordering::SeqCst);
            break;
        }
        if last {
            break;
        }
    }
}

fn read_loop(mut stream: SplitStream<WebSocket>, connected: Arc<AtomicBool>) -> TransportEvents {
    let (tx, rx) = mpsc::channel(INBOUND_CAPACITY);

    tokio::spawn(async move {
        while let Some(msg) = stream.next().await {
            let frame = match msg {
                Ok(Message::Text(text)) => ClientFrame::Text(text.as_str().to_owned()),
                Ok(Message::Binary(data)) => ClientFrame::Binary(data),
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    tracing::debug!("WebSocket receive failed: {e}");
                    break;
                }
            };
            if tx.send(TransportEvent::Frame(frame)).await.is_err() {
                // Session finished; nobody is listening.
                return;
            }
        }
        connected.store(false, Ordering::SeqCst);
        let _ = tx.send(TransportEvent::Disconnected).await;
    });

    ReceiverStream::new(rx).boxed()
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&self, msg: ServerMessage) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Disconnected);
        }
        let json = serde_json::to_string(&msg).map_err(|e| TransportError::Encode(e.to_string()))?;
        self.tx
            .send(Outbound::Text(json))
            .map_err(|_| TransportError::Disconnected)
    }

    async fn close(&self, reason: CloseReason) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.connected.load(Ordering::SeqCst) {
            let _ = self.tx.send(Outbound::Close(reason));
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && !self.closed.load(Ordering::SeqCst)
    }
}

/// WebSocket handler state.
#[derive(Clone)]
pub struct WsState {
    /// Relay every socket is served by.
    pub relay: SessionRelay,
}

impl WsState {
    /// Create new WebSocket state.
    #[must_use]
    pub const fn new(relay: SessionRelay) -> Self {
        Self { relay }
    }
}

/// WebSocket upgrade handler. One session per socket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<WsState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: WsState) {
    let (transport, events) = WsTransport::start(socket);
    match state.relay.serve(Arc::new(transport), events).await {
        Some(SessionOutcome::Closed { id, trigger }) => {
            tracing::debug!(session_id = %id, ?trigger, "WebSocket session finished");
        }
        Some(SessionOutcome::AttachFailed(failure)) => {
            tracing::debug!("WebSocket session failed to attach: {failure}");
        }
        None => tracing::debug!("WebSocket closed without a session"),
    }
}

/// Query parameters for session listings.
#[derive(Debug, Default, Deserialize)]
pub struct SessionQuery {
    pub kind: Option<SessionKind>,
    pub node: Option<String>,
    pub limit: Option<usize>,
}

async fn list_sessions(
    State(state): State<WsState>,
    Query(query): Query<SessionQuery>,
) -> Json<Vec<SessionInfo>> {
    let filter = RegistryFilter {
        kind: query.kind,
        node: query.node,
        limit: query.limit,
    };
    Json(state.relay.registry().list_filtered(&filter))
}

async fn get_session(
    State(state): State<WsState>,
    Path(id): Path<SessionId>,
) -> Result<Json<SessionInfo>, StatusCode> {
    state
        .relay
        .registry()
        .get(id)
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

/// Create the relay router: `GET /ws`, `GET /sessions`, `GET /sessions/{id}`.
///
/// # Example
/// ```ignore
/// let app = Router::new()
///     .merge(ws_router(WsState::new(relay)));
/// ```
#[must_use]
pub fn ws_router(state: WsState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/sessions", get(list_sessions))
        .route("/sessions/{id}", get(get_session))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
