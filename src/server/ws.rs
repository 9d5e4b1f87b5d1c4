use crate::state::AppState;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut rx = state.ws_tx.subscribe();

    // Send initial dashboard state
    {
        let initial = serde_json::to_string(&*state.snapshot_rx.borrow());
        if let Ok(json) = initial {
            if sender.send(Message::Text(json.into())).await.is_err() {
                return;
            }
        }
    }

    // Forward broadcast messages to this client
    let send_task = tokio::spawn(async move {
        loop {
            let ws_msg = match rx.recv().await {
                Ok(m) => m,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "ws client lagging");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            let Ok(json) = serde_json::to_string(&ws_msg) else {
                continue;
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    // Read (and discard) incoming messages; detect disconnect
    let recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Close(_)) | Err(_) => break,
                _ => {}
            }
        }
    });

    join_first(send_task, recv_task).await;
}

/// Waits for whichever task ends first, then aborts and reaps the other so its
/// broadcast receiver is released with the connection.
async fn join_first(mut a: JoinHandle<()>, mut b: JoinHandle<()>) {
    tokio::select! {
        _ = &mut a => {
            b.abort();
            let _ = b.await;
        }
        _ = &mut b => {
            a.abort();
            let _ = a.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::WsMessage;
    use tokio::sync::broadcast;

    #[tokio::test]
    async fn test_join_first_releases_forwarder() {
        let (tx, _) = broadcast::channel::<WsMessage>(8);
        let mut rx = tx.subscribe();
        let forwarder = tokio::spawn(async move {
            while rx.recv().await.is_ok() {}
        });
        let reader = tokio::spawn(async {});
        assert_eq!(tx.receiver_count(), 1);

        join_first(forwarder, reader).await;
        assert_eq!(tx.receiver_count(), 0);
    }

    #[tokio::test]
    async fn test_join_first_either_order() {
        let (tx, _) = broadcast::channel::<WsMessage>(8);
        let mut rx = tx.subscribe();
        let reader = tokio::spawn(async move {
            while rx.recv().await.is_ok() {}
        });
        let forwarder = tokio::spawn(async {});

        join_first(forwarder, reader).await;
        assert_eq!(tx.receiver_count(), 0);
    }
}
