//! Live pipeline progress for one plan.

use super::error::ApiError;
use super::handlers::blocking;
use super::AppState;
use crate::models::ProgressEvent;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

pub async fn progress_ws(
    ws: WebSocketUpgrade,
    Path(plan_id): Path<i64>,
    State(state): State<AppState>,
) -> Result<Response, ApiError> {
    let db = state.db().clone();
    blocking(move || db.require_plan(plan_id)).await?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, plan_id)))
}

async fn handle_socket(socket: WebSocket, state: AppState, plan_id: i64) {
    let (mut sender, mut receiver) = socket.split();
    let (last, mut rx) = state.coordinator.subscribe(plan_id);

    let mut send_task = tokio::spawn(async move {
        if let Some(event) = last {
            if send_event(&mut sender, &event).await.is_err() || event.is_terminal() {
                return;
            }
        }
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if send_event(&mut sender, &event).await.is_err() || event.is_terminal() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(plan_id, skipped, "Progress subscriber lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
        let _ = sender.close().await;
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Close(_) = msg {
                break;
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    }
    debug!(plan_id, "Progress socket closed");
}

async fn send_event<S>(sender: &mut S, event: &ProgressEvent) -> Result<(), S::Error>
where
    S: futures::Sink<Message> + Unpin,
{
    sender.send(Message::Text(event.to_json().into())).await
}
