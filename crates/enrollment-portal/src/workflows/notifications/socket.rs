use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use tracing::{debug, warn};

use super::directory::{ClientDirectory, Registration, Subscription};
use super::events::{ClientMessage, ServerMessage};

/// Router exposing the real-time channel at `/ws`.
pub fn notification_router(directory: Arc<ClientDirectory>) -> Router {
    Router::new()
        .route("/ws", get(socket_handler))
        .with_state(directory)
}

pub(crate) async fn socket_handler(
    ws: WebSocketUpgrade,
    State(directory): State<Arc<ClientDirectory>>,
) -> Response {
    ws.on_upgrade(move |socket| serve_connection(socket, directory))
}

async fn serve_connection(mut socket: WebSocket, directory: Arc<ClientDirectory>) {
    let mut subscription = directory.subscribe();
    let connection = subscription.id();
    debug!(%connection, "real-time connection opened");

    loop {
        tokio::select! {
            inbound = socket.recv() => match inbound {
                Some(Ok(Message::Text(frame))) => {
                    if let Some(reply) = handle_frame(&subscription, &frame) {
                        if send(&mut socket, &reply).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    debug!(%connection, error = %err, "real-time connection errored");
                    break;
                }
            },
            outbound = subscription.next_event() => match outbound {
                Some(event) => {
                    if send(&mut socket, &ServerMessage::StatusUpdated(event)).await.is_err() {
                        break;
                    }
                }
                None => {
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                }
            },
        }
    }

    subscription.deregister();
    debug!(%connection, "real-time connection closed");
}

/// Apply one client frame; returns a reply only for frames that need one.
pub(crate) fn handle_frame(subscription: &Subscription, frame: &str) -> Option<ServerMessage> {
    match ClientMessage::parse(frame) {
        Ok(ClientMessage::Register { application_id }) => {
            match subscription.register(application_id) {
                Registration::Closed => Some(ServerMessage::Error {
                    message: "server is shutting down".to_string(),
                }),
                _ => None,
            }
        }
        Ok(ClientMessage::Deregister) => {
            subscription.deregister();
            None
        }
        Err(err) => {
            warn!(connection = %subscription.id(), error = %err, "unreadable client frame");
            Some(ServerMessage::Error {
                message: format!("unrecognized message: {err}"),
            })
        }
    }
}

async fn send(socket: &mut WebSocket, message: &ServerMessage) -> Result<(), axum::Error> {
    let payload = serde_json::to_string(message).map_err(axum::Error::new)?;
    socket.send(Message::Text(payload)).await
}
