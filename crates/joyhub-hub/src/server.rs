//! HTTP router and WebSocket transport.

use std::future::Future;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use joyhub_types::{ClientMessage, ErrorCode, ServerMessage, SessionId};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::error::HubError;
use crate::hub::Hub;

/// Routes: `/ws` for sessions, `/health` for liveness.
pub fn router(hub: Hub) -> Router {
    Router::new()
        .route("/ws", get(websocket_handler))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(hub)
}

/// Serve until Ctrl-C.
pub async fn serve(hub: Hub, listener: TcpListener) -> Result<(), HubError> {
    serve_with_shutdown(hub, listener, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
        info!("shutdown requested");
    })
    .await
}

/// Serve until `shutdown` resolves.
pub async fn serve_with_shutdown(
    hub: Hub,
    listener: TcpListener,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), HubError> {
    if let Ok(addr) = listener.local_addr() {
        info!(addr = %addr, "hub listening");
    }
    axum::serve(listener, router(hub))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(anyhow::Error::from)?;
    Ok(())
}

async fn health_check() -> &'static str {
    "ok"
}

async fn websocket_handler(ws: WebSocketUpgrade, State(hub): State<Hub>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, hub))
}

async fn handle_socket(socket: WebSocket, hub: Hub) {
    let session = SessionId::new();
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let json = match serde_json::to_string(&message) {
                Ok(json) => json,
                Err(e) => {
                    warn!(error = %e, "failed to encode server message");
                    continue;
                }
            };
            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
        debug!(session = %session, "writer task ended");
    });

    hub.coordinator().connect(session, tx.clone()).await;

    while let Some(frame) = receiver.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                debug!(session = %session, error = %e, "websocket read error");
                break;
            }
        };

        let text = match frame {
            Message::Text(text) => text,
            Message::Binary(bytes) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => {
                    let _ = tx.send(ServerMessage::error(
                        ErrorCode::InvalidRequest,
                        "binary frame is not valid UTF-8",
                    ));
                    continue;
                }
            },
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => continue,
        };

        let message = match serde_json::from_str::<ClientMessage>(&text) {
            Ok(message) => message,
            Err(e) => {
                debug!(session = %session, error = %e, "undecodable client message");
                let _ = tx.send(ServerMessage::error(
                    ErrorCode::InvalidRequest,
                    format!("invalid message: {e}"),
                ));
                continue;
            }
        };

        if let Err(e) = hub.dispatch(session, message).await {
            debug!(session = %session, error = %e, "request failed");
            let _ = tx.send(ServerMessage::error(e.code(), e.to_string()));
        }
    }

    hub.coordinator().disconnect(session).await;
    writer.abort();
}
