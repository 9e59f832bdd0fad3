//! Interactive terminal proxy: a browser WebSocket on one end, a PTY exec
//! attached to the worker container on the other. Binary frames are raw PTY
//! bytes; text frames carry exactly one JSON control message (`resize` or
//! `ping`), everything else is ignored.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use bollard::exec::{CreateExecOptions, ResizeExecOptions, StartExecResults};
use bollard::Docker;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ControlFrame {
    Resize { cols: u16, rows: u16 },
    Ping,
}

pub async fn proxy_terminal(docker: Arc<Docker>, container_id: String, shell: Option<String>, mut ws: WebSocket) {
    let shell = shell.unwrap_or_else(|| "/bin/sh".to_string());

    let exec = match docker
        .create_exec(
            &container_id,
            CreateExecOptions {
                cmd: Some(vec![shell.as_str()]),
                attach_stdin: Some(true),
                attach_stdout: Some(true),
                attach_stderr: Some(true),
                tty: Some(true),
                working_dir: Some(crate::supervisor::fs::WORKSPACE_ROOT),
                ..Default::default()
            },
        )
        .await
    {
        Ok(e) => e.id,
        Err(err) => {
            tracing::warn!(?err, "failed to create terminal exec");
            let _ = ws.send(Message::Close(None)).await;
            return;
        }
    };

    let attached = match docker.start_exec(&exec, None).await {
        Ok(StartExecResults::Attached { output, input }) => (output, input),
        Ok(StartExecResults::Detached) => {
            let _ = ws.send(Message::Close(None)).await;
            return;
        }
        Err(err) => {
            tracing::warn!(?err, "failed to attach terminal exec");
            let _ = ws.send(Message::Close(None)).await;
            return;
        }
    };
    let (mut output, mut input) = attached;

    loop {
        tokio::select! {
            chunk = output.next() => {
                match chunk {
                    Some(Ok(log)) => {
                        let bytes = log.into_bytes();
                        if ws.send(Message::Binary(bytes.to_vec())).await.is_err() {
                            break;
                        }
                    }
                    Some(Err(err)) => {
                        tracing::warn!(?err, "terminal exec stream error");
                        break;
                    }
                    None => break,
                }
            }
            msg = ws.next() => {
                match msg {
                    Some(Ok(Message::Binary(bytes))) => {
                        if input.write_all(&bytes).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Text(text))) => {
                        if let Ok(frame) = serde_json::from_str::<ControlFrame>(&text) {
                            match frame {
                                ControlFrame::Resize { cols, rows } => {
                                    let _ = docker
                                        .resize_exec(&exec, ResizeExecOptions { width: cols, height: rows })
                                        .await;
                                }
                                ControlFrame::Ping => {}
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        tracing::warn!(?err, "terminal websocket error");
                        break;
                    }
                }
            }
        }
    }
    let _ = ws.send(Message::Close(None)).await;
}
