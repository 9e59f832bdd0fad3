//! Browser-facing terminal WebSocket. Validates the caller then opens a
//! second WebSocket to the supervisor's own terminal endpoint and forwards
//! frames byte-for-byte in both directions, closing one side within a
//! bounded grace window when the other closes.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as AxumMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio_tungstenite::tungstenite::Message as TungsteniteMessage;

use crate::AppContext;

const CLOSE_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Deserialize)]
pub struct TerminalQuery {
    pub token: String,
    pub shell: Option<String>,
}

pub async fn ws_terminal(
    State(ctx): State<Arc<AppContext>>,
    Path(session_id): Path<String>,
    Query(q): Query<TerminalQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let auth_header = format!("Bearer {}", q.token);
    let user = match ctx.orchestrator.resolve_caller(Some(&auth_header)).await {
        Ok(user) => user,
        Err(_) => return axum::http::StatusCode::UNAUTHORIZED.into_response(),
    };
    if ctx.orchestrator.owned_live_session(&user, &session_id).await.is_err() {
        return axum::http::StatusCode::FORBIDDEN.into_response();
    }

    let supervisor_url = format!(
        "{}/ws/terminal/{session_id}{}",
        ctx.config.supervisor_base_url.replacen("http", "ws", 1),
        q.shell
            .as_deref()
            .map(|s| format!("?shell={s}"))
            .unwrap_or_default(),
    );

    ws.on_upgrade(move |socket| async move { proxy(socket, supervisor_url).await })
}

async fn proxy(mut client_ws: WebSocket, supervisor_url: String) {
    let upstream = match tokio_tungstenite::connect_async(&supervisor_url).await {
        Ok((stream, _)) => stream,
        Err(err) => {
            tracing::warn!(?err, supervisor_url, "failed to reach supervisor terminal endpoint");
            let _ = client_ws.send(AxumMessage::Close(None)).await;
            return;
        }
    };
    let (mut up_tx, mut up_rx) = upstream.split();

    loop {
        tokio::select! {
            client_msg = client_ws.next() => {
                match client_msg {
                    Some(Ok(AxumMessage::Binary(bytes))) => {
                        if up_tx.send(TungsteniteMessage::Binary(bytes)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(AxumMessage::Text(text))) => {
                        if up_tx.send(TungsteniteMessage::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(AxumMessage::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
            upstream_msg = up_rx.next() => {
                match upstream_msg {
                    Some(Ok(TungsteniteMessage::Binary(bytes))) => {
                        if client_ws.send(AxumMessage::Binary(bytes)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(TungsteniteMessage::Text(text))) => {
                        if client_ws.send(AxumMessage::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(TungsteniteMessage::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    let _ = tokio::time::timeout(CLOSE_GRACE, client_ws.send(AxumMessage::Close(None))).await;
    let _ = tokio::time::timeout(CLOSE_GRACE, up_tx.send(TungsteniteMessage::Close(None))).await;
}
