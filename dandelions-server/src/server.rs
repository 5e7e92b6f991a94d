//! HTTP and WebSocket front end.
//!
//! `GET /`, `/health` and `/tools` describe the server; `/ws` carries MCP
//! messages. Each WebSocket gets a writer task fed by an unbounded channel,
//! so tool replies and broadcasts never contend for the socket.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use axum::Router;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};

use crate::protocol;
use crate::tools::{self, ToolContext};

pub const SERVICE_NAME: &str = "Dandelions MCP Server";

struct AppState {
    ctx: ToolContext,
    clients: Mutex<HashMap<u64, mpsc::UnboundedSender<String>>>,
    next_client: AtomicU64,
    shutdown: watch::Receiver<bool>,
}

struct Running {
    addr: SocketAddr,
    task: JoinHandle<()>,
}

pub struct McpServer {
    host: String,
    port: u16,
    state: Arc<AppState>,
    shutdown_tx: watch::Sender<bool>,
    running: Mutex<Option<Running>>,
}

impl McpServer {
    pub fn new(ctx: ToolContext, host: impl Into<String>, port: u16) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            host: host.into(),
            port,
            state: Arc::new(AppState {
                ctx,
                clients: Mutex::new(HashMap::new()),
                next_client: AtomicU64::new(1),
                shutdown: shutdown_rx,
            }),
            shutdown_tx,
            running: Mutex::new(None),
        }
    }

    pub fn router(&self) -> Router {
        router(self.state.clone())
    }

    /// Bind and serve in the background. Returns the bound address.
    pub async fn start(&self) -> Result<SocketAddr> {
        if self.running.lock().is_some() {
            bail!("MCP server already running");
        }
        let bind = format!("{}:{}", self.host, self.port);
        let listener = tokio::net::TcpListener::bind(&bind)
            .await
            .with_context(|| format!("Failed to bind MCP server on {bind}"))?;
        let addr = listener.local_addr()?;
        self.shutdown_tx.send_replace(false);

        let app = self.router();
        let mut shutdown = self.shutdown_tx.subscribe();
        let task = tokio::spawn(async move {
            let graceful = async move {
                let _ = shutdown.wait_for(|stop| *stop).await;
            };
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(graceful)
                .await
            {
                tracing::error!(error = %e, "MCP server error");
            }
        });

        tracing::info!(%addr, tools = tools::tool_defs().len(), "MCP server listening");
        *self.running.lock() = Some(Running { addr, task });
        Ok(addr)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().as_ref().map(|r| r.addr)
    }

    /// Close client sockets and wait for the listener to drain.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().take() else {
            return;
        };
        self.shutdown_tx.send_replace(true);
        self.state.clients.lock().clear();
        let mut task = running.task;
        if tokio::time::timeout(Duration::from_secs(5), &mut task)
            .await
            .is_err()
        {
            tracing::warn!("MCP server did not stop in time, aborting");
            task.abort();
        }
        tracing::info!("MCP server stopped");
    }

    /// Send `message` to every connected client. Clients whose socket is gone
    /// are dropped. Returns how many clients it was queued for.
    pub fn broadcast(&self, message: &Value) -> usize {
        broadcast(&self.state, &message.to_string())
    }

    pub fn client_count(&self) -> usize {
        self.state.clients.lock().len()
    }
}

fn broadcast(state: &AppState, text: &str) -> usize {
    let mut clients = state.clients.lock();
    let mut dead = Vec::new();
    for (id, tx) in clients.iter() {
        if tx.send(text.to_string()).is_err() {
            dead.push(*id);
        }
    }
    for id in &dead {
        clients.remove(id);
        tracing::debug!(client = id, "Dropped disconnected MCP client");
    }
    clients.len()
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/tools", get(list_tools))
        .route("/ws", get(ws_upgrade))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

async fn root() -> Json<Value> {
    let names: Vec<&str> = tools::tool_defs().iter().map(|t| t.name).collect();
    Json(json!({
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "tools": names,
    }))
}

async fn health() -> Json<Value> {
    Json(json!({"status": "healthy"}))
}

async fn list_tools() -> Json<Value> {
    Json(json!({"tools": tools::tool_defs()}))
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

async fn handle_ws(socket: WebSocket, state: Arc<AppState>) {
    let id = state.next_client.fetch_add(1, Ordering::Relaxed);
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    state.clients.lock().insert(id, tx.clone());
    tracing::info!(client = id, "MCP client connected");

    let (mut sink, mut stream) = socket.split();
    let writer = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if sink.send(WsMessage::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.send(WsMessage::Close(None)).await;
    });

    let mut shutdown = state.shutdown.clone();
    loop {
        let frame = tokio::select! {
            f = stream.next() => f,
            _ = shutdown.wait_for(|stop| *stop) => break,
        };
        let text = match frame {
            Some(Ok(WsMessage::Text(t))) => t,
            Some(Ok(WsMessage::Close(_))) | None => break,
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                tracing::debug!(client = id, error = %e, "WebSocket read error");
                break;
            }
        };
        let reply = protocol::handle_text(&state.ctx, text.as_str()).await;
        if tx.send(reply.to_json()).is_err() {
            break;
        }
    }

    state.clients.lock().remove(&id);
    drop(tx);
    let _ = writer.await;
    tracing::info!(client = id, "MCP client disconnected");
}
