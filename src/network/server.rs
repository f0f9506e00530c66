//! WebSocket Game Server
//!
//! Axum front end for the round engine. Every upgraded socket gets a reader
//! loop (decode frames, submit bets) and a writer task draining the client's
//! outbound queue. `GET /hello` on the same port returns a fixed greeting
//! for health checks.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};

use crate::game::registry::{Connection, ConnectionId};
use crate::game::round::RoundEngine;
use crate::network::protocol::decode_bet;
use crate::network::session::ClientHandle;
use crate::HELLO_GREETING;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Per-client outbound queue length.
    pub outbound_buffer: usize,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_connections: 1000,
            outbound_buffer: 64,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: std::env::var("GUESS_BIND_ADDR")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.bind_addr),
            max_connections: std::env::var("GUESS_MAX_CONNECTIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_connections),
            ..defaults
        }
    }
}

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind or serve on the listener.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] axum::Error),
}

/// Shared state handed to every request handler.
#[derive(Clone)]
struct ServerState {
    engine: Arc<RoundEngine>,
    max_connections: usize,
    outbound_buffer: usize,
    shutdown_tx: broadcast::Sender<()>,
}

/// The game server.
pub struct GameServer {
    /// Server configuration.
    config: ServerConfig,
    /// Round engine shared with every connection.
    engine: Arc<RoundEngine>,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a new game server in front of `engine`.
    pub fn new(config: ServerConfig, engine: Arc<RoundEngine>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            engine,
            shutdown_tx,
        }
    }

    /// Routes: the health check, and the game socket on `/` and `/ws`.
    pub fn router(&self) -> Router {
        let state = ServerState {
            engine: self.engine.clone(),
            max_connections: self.config.max_connections,
            outbound_buffer: self.config.outbound_buffer,
            shutdown_tx: self.shutdown_tx.clone(),
        };

        Router::new()
            .route("/hello", get(hello_handler))
            .route("/", get(websocket_handler))
            .route("/ws", get(websocket_handler))
            .with_state(state)
    }

    /// Bind the configured address and serve until shutdown.
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener.
    #[instrument(skip_all)]
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GameServerError> {
        info!(
            "Game server v{} listening on {}",
            self.config.version,
            listener.local_addr()?
        );

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let app = self.router().into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
                info!("Shutdown signal received");
            })
            .await?;

        Ok(())
    }

    /// The engine behind this server.
    pub fn engine(&self) -> &Arc<RoundEngine> {
        &self.engine
    }

    /// Shutdown the server and close every client.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get active connection count.
    pub fn connection_count(&self) -> usize {
        self.engine.connection_count()
    }
}

async fn hello_handler() -> &'static str {
    HELLO_GREETING
}

async fn websocket_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<ServerState>,
) -> Response {
    if state.engine.connection_count() >= state.max_connections {
        warn!("Connection limit reached, rejecting {}", addr);
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    debug!("New connection from {}", addr);
    ws.on_upgrade(move |socket| async move {
        if let Err(e) = serve_client(socket, addr, state).await {
            error!("Client {} failed: {}", addr, e);
        }
    })
}

async fn serve_client(
    socket: WebSocket,
    addr: SocketAddr,
    state: ServerState,
) -> Result<(), GameServerError> {
    let ServerState { engine, outbound_buffer, shutdown_tx, .. } = state;
    let mut shutdown_rx = shutdown_tx.subscribe();
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let (client, mut outbox) = ClientHandle::channel(outbound_buffer);
    let id = client.id();

    // Spawn message sender task
    let sender_task = tokio::spawn(async move {
        while let Some(event) = outbox.recv().await {
            let text = match event.to_json() {
                Ok(t) => t,
                Err(e) => {
                    error!("Failed to serialize {}: {}", event.kind(), e);
                    continue;
                }
            };
            if ws_sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    if let Err(e) = engine.register(Arc::new(client)) {
        warn!("Could not register {}: {}", addr, e);
        sender_task.abort();
        return Ok(());
    }
    info!("Client {} connected from {}", id.short(), addr);

    // Handle incoming messages
    let mut failure = None;
    loop {
        tokio::select! {
            frame = ws_receiver.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => handle_frame(&engine, &id, &text),
                    Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                        Ok(text) => handle_frame(&engine, &id, text),
                        Err(e) => debug!("Non UTF-8 frame from {}: {}", id.short(), e),
                    },
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("Client {} disconnected", id.short());
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        failure = Some(e);
                        break;
                    }
                }
            }
            _ = shutdown_rx.recv() => break,
        }
    }

    // Cleanup
    engine.unregister(&id);
    sender_task.abort();
    info!("Client {} closed", id.short());

    match failure {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

/// Decode one text frame and hand it to the engine. Malformed frames are
/// dropped without a reply.
fn handle_frame(engine: &RoundEngine, id: &ConnectionId, raw: &str) {
    match decode_bet(raw) {
        Ok(request) => {
            engine.submit_bet(id, request);
        }
        Err(e) => debug!("Malformed frame from {}: {}", id.short(), e),
    }
}
