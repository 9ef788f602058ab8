use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::LiveSessionManager;
use super::protocol::OutboundEvent;
use crate::http::AppState;

const OUTBOUND_BUFFER: usize = 32;

pub(crate) async fn live_socket(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let manager = state.live.clone();
    ws.on_upgrade(move |socket| run_socket(socket, manager, None))
}

pub(crate) async fn live_socket_for_session(
    ws: WebSocketUpgrade,
    Path(session_id): Path<String>,
    State(state): State<AppState>,
) -> Response {
    let manager = state.live.clone();
    ws.on_upgrade(move |socket| run_socket(socket, manager, Some(session_id)))
}

async fn run_socket(
    socket: WebSocket,
    manager: LiveSessionManager,
    requested_session_id: Option<String>,
) {
    let (mut sink, mut stream) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<OutboundEvent>(OUTBOUND_BUFFER);
    let mut shutdown = manager.registry().subscribe_shutdown();
    let mut connection = manager.connect(requested_session_id, outbound_tx);

    let writer = tokio::spawn(async move {
        while let Some(event) = outbound_rx.recv().await {
            let payload = match serde_json::to_string(&event) {
                Ok(payload) => payload,
                Err(err) => {
                    warn!(event = event.kind(), error = %err, "failed to serialize live event");
                    continue;
                }
            };
            if sink.send(Message::Text(payload.into())).await.is_err() {
                debug!("live socket closed while sending");
                break;
            }
        }
        let _ = sink.send(Message::Close(None)).await;
    });

    loop {
        let message = tokio::select! {
            _ = shutdown.changed() => {
                info!(
                    session_id = connection.session_id().unwrap_or_default(),
                    "closing live socket for shutdown"
                );
                break;
            }
            message = stream.next() => message,
        };

        match message {
            Some(Ok(Message::Text(text))) => {
                if connection.handle_text(text.as_str()).await.is_err() {
                    break;
                }
            }
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(Message::Binary(_))) => {
                debug!("ignoring binary live frame");
            }
            Some(Ok(_)) => {}
            Some(Err(err)) => {
                debug!(error = %err, "live socket read failed");
                break;
            }
        }
    }

    connection.close();
    drop(connection);
    if let Err(err) = writer.await {
        warn!(error = %err, "live socket writer task failed");
    }
}
