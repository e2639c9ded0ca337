// WebSocket adapter: bridges one socket to one session

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::session::{Outbound, SessionManager, OUTBOUND_QUEUE};
use crate::AppState;

/// Time allowed for queued output and the close frame to reach the client
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// GET /ws/terminal - Upgrade into an execution session
pub async fn terminal_ws(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    let manager = state.sessions.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, manager))
}

async fn handle_socket(socket: WebSocket, manager: SessionManager) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Outbound>(OUTBOUND_QUEUE);
    let session = manager.open(tx);
    let session_id = session.id();

    // Outbound queue -> socket, in order
    let send_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            match message {
                Outbound::Text(text) => {
                    if sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Outbound::Close(kind) => {
                    let frame = CloseFrame {
                        code: kind.code(),
                        reason: Cow::Borrowed(kind.reason()),
                    };
                    let _ = sender.send(Message::Close(Some(frame))).await;
                    break;
                }
            }
        }
    });

    loop {
        let next = tokio::select! {
            next = receiver.next() => next,
            _ = session.closed() => {
                debug!(session_id = %session_id, "Session closed by server");
                break;
            }
        };

        match next {
            Some(Ok(Message::Text(text))) => manager.on_message(&session, &text).await,
            Some(Ok(Message::Binary(bytes))) => {
                let text = String::from_utf8_lossy(&bytes);
                manager.on_message(&session, &text).await;
            }
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
            Some(Ok(Message::Close(_))) | None => {
                info!(session_id = %session_id, "Client closed connection");
                break;
            }
            Some(Err(e)) => {
                manager.on_transport_error(&session, &e.to_string()).await;
                break;
            }
        }
    }

    manager.on_close(&session).await;
    drop(session);

    // The queue ends once the session (the last sender) is gone
    if tokio::time::timeout(FLUSH_TIMEOUT, send_task).await.is_err() {
        warn!(session_id = %session_id, "Timed out flushing output to client");
    }
}
