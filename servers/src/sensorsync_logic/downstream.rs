use crate::sensorsync_logic::model::ClientMessage;
use anyhow::{Context, Result};
use axum::{
    Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::get,
};
use futures_util::StreamExt;
use lib_sensorsync::{EngineError, SubscriberId, SyncEngine};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

pub fn router(engine: Arc<SyncEngine>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(engine)
}

pub async fn run(port: u16, engine: Arc<SyncEngine>, shutdown: broadcast::Receiver<()>) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!("Downstream server listening on {}", addr);
    serve(listener, engine, shutdown).await
}

pub async fn serve(listener: TcpListener, engine: Arc<SyncEngine>, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
    axum::serve(listener, router(engine))
        .with_graceful_shutdown(async move {
            shutdown.recv().await.ok();
            tracing::info!("Downstream server shutting down.");
        })
        .await
        .context("Downstream server failed")
}

async fn ws_handler(ws: WebSocketUpgrade, State(engine): State<Arc<SyncEngine>>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, engine))
}

async fn health_handler() -> impl IntoResponse {
    (axum::http::StatusCode::OK, "OK")
}

async fn handle_client_message(engine: &SyncEngine, client_id: SubscriberId, text: &str) {
    let result = match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::RequestFullSync) => engine.registry().on_request_full_sync(client_id).await,
        Ok(ClientMessage::RequestServerStats) => engine.registry().on_request_server_stats(client_id).await,
        Err(e) => {
            tracing::debug!(subscriber = client_id, "Ignoring client message: {}", e);
            return;
        }
    };
    if let Err(e) = result {
        tracing::warn!(subscriber = client_id, "Client request failed: {}", e);
    }
}

async fn handle_socket(mut socket: WebSocket, engine: Arc<SyncEngine>) {
    let client_id = NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed);
    let mut subscription = match engine.registry().on_connect(client_id).await {
        Ok(subscription) => subscription,
        Err(e) => {
            tracing::error!(subscriber = client_id, "Failed to register client: {}", e);
            return;
        }
    };

    loop {
        tokio::select! {
            // Requests from the viewer
            msg = socket.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_client_message(&engine, client_id, text.as_str()).await;
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
            // Engine output for this viewer
            envelope = subscription.receiver.recv() => {
                let Some(envelope) = envelope else { break };
                match envelope.to_json() {
                    Ok(json_str) => {
                        if socket.send(Message::Text(json_str.into())).await.is_err() {
                            break; // client disconnected
                        }
                    }
                    Err(e) => tracing::error!(subscriber = client_id, "Failed to serialize {:?}: {}", envelope.kind, e),
                }
            }
        }
    }

    match engine.registry().on_disconnect(client_id).await {
        Ok(()) | Err(EngineError::UnknownSubscriber(_)) => {}
        Err(e) => tracing::warn!(subscriber = client_id, "Failed to unregister client: {}", e),
    }
}
