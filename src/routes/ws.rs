use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use std::time::Duration;

use crate::app_state::AppState;
use crate::routes::upscale::parse_job_id;

const PUSH_INTERVAL: Duration = Duration::from_millis(500);

/// GET /api/v1/upscale/ws/job/{id} — Push job status until it is terminal.
pub async fn job_progress(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| stream_job_status(socket, state, raw_id))
}

/// Sends the status document every [`PUSH_INTERVAL`] and closes after a
/// terminal status, an unknown id, or a client disconnect.
async fn stream_job_status(socket: WebSocket, state: AppState, raw_id: String) {
    tracing::info!(job_id = %raw_id, "WebSocket connected for job");
    let id = parse_job_id(&raw_id).ok();
    let (mut sink, mut stream) = socket.split();
    let mut ticker = tokio::time::interval(PUSH_INTERVAL);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(summary) = id.and_then(|id| state.store.summary(id).ok()) else {
                    let payload = serde_json::json!({ "error": "job not found" }).to_string();
                    let _ = sink.send(Message::Text(payload.into())).await;
                    break;
                };
                let payload = match serde_json::to_string(&summary) {
                    Ok(payload) => payload,
                    Err(e) => {
                        tracing::error!(job_id = %raw_id, error = %e, "Failed to serialize job status");
                        break;
                    }
                };
                if sink.send(Message::Text(payload.into())).await.is_err() {
                    break;
                }
                if summary.status.is_terminal() {
                    break;
                }
            }
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    let _ = sink.send(Message::Close(None)).await;
    tracing::info!(job_id = %raw_id, "WebSocket closed for job");
}
