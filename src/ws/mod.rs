//! WebSocket Hub (spec §4.6): authenticated bidirectional AT command/event
//! channel. Grounded on the teacher's `ws/mod.rs` — the auth-gate-then-
//! dispatch structure, the `tokio::select!` inbound/broadcast loop, the
//! heartbeat, and dead-session cleanup on send failure are all kept; the
//! message-type set is replaced with the spec's AT-passthrough protocol.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{info, warn};

use crate::auth::constant_time_eq;
use crate::events::Event;
use crate::state::AppState;

const AUTH_TIMEOUT: Duration = Duration::from_secs(10);
const HEARTBEAT_PERIOD: Duration = Duration::from_secs(30);

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

pub fn router() -> Router<AppState> {
    Router::new().route("/ws", get(ws_upgrade))
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

/// Bind both listeners described in spec §4.6 (`0.0.0.0` and `::`, same
/// port) serving the same router, and run them until `shutdown` resolves.
pub async fn serve(
    state: AppState,
    port: u16,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), String> {
    let app = router().with_state(state);

    let v4_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
    let v6_addr = SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), port);

    let v4_listener = tokio::net::TcpListener::bind(v4_addr)
        .await
        .map_err(|e| format!("failed to bind {v4_addr}: {e}"))?;
    let v6_listener = tokio::net::TcpListener::bind(v6_addr)
        .await
        .map_err(|e| format!("failed to bind {v6_addr}: {e}"))?;

    info!(%v4_addr, %v6_addr, "websocket hub listening");

    let app_v6 = app.clone();
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);
    let mut shutdown_rx_v4 = shutdown_tx.subscribe();
    let mut shutdown_rx_v6 = shutdown_tx.subscribe();

    tokio::spawn(async move {
        shutdown.await;
        let _ = shutdown_tx.send(());
    });

    let v4_task = tokio::spawn(async move {
        let _ = axum::serve(v4_listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx_v4.recv().await;
            })
            .await;
    });
    let v6_task = tokio::spawn(async move {
        let _ = axum::serve(v6_listener, app_v6)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx_v6.recv().await;
            })
            .await;
    });

    let _ = tokio::join!(v4_task, v6_task);
    Ok(())
}

async fn handle_ws(socket: WebSocket, state: AppState) {
    let session_id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
    let (mut sink, mut stream) = socket.split();

    if state.config.websocket.auth_enabled() {
        match wait_for_auth(&mut stream, &state.config.websocket.auth_key).await {
            Ok(()) => {
                let _ = sink
                    .send(Message::Text(
                        json!({"success": true, "message": "authenticated"}).to_string().into(),
                    ))
                    .await;
            }
            Err(reason) => {
                let _ = sink
                    .send(Message::Text(
                        json!({"error": reason, "message": "auth failed"}).to_string().into(),
                    ))
                    .await;
                let _ = sink.close().await;
                return;
            }
        }
    }

    let mut event_rx = state.event_tx.subscribe();
    let mut heartbeat = interval(HEARTBEAT_PERIOD);

    info!(session_id, "websocket session established");

    loop {
        tokio::select! {
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let reply = handle_command(&text, &state).await;
                        if sink.send(Message::Text(reply.into())).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(session_id, error = %e, "websocket receive error");
                        break;
                    }
                }
            }
            event = event_rx.recv() => {
                match event {
                    Ok(event) => {
                        let payload = serde_json::to_string(&event).unwrap_or_default();
                        if sink.send(Message::Text(payload.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            _ = heartbeat.tick() => {
                if sink.send(Message::Text("ping".into())).await.is_err() {
                    break;
                }
            }
        }
    }

    info!(session_id, "websocket session closed");
}

async fn wait_for_auth(
    stream: &mut futures_util::stream::SplitStream<WebSocket>,
    expected_key: &str,
) -> Result<(), String> {
    let result = tokio::time::timeout(AUTH_TIMEOUT, async {
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    let parsed: Value = serde_json::from_str(&text)
                        .map_err(|_| "malformed auth frame".to_string())?;
                    let provided = parsed
                        .get("auth_key")
                        .and_then(Value::as_str)
                        .ok_or("missing auth_key")?;
                    if constant_time_eq(expected_key.as_bytes(), provided.as_bytes()) {
                        return Ok(());
                    }
                    return Err("invalid auth_key".to_string());
                }
                Some(Ok(_)) => continue,
                _ => return Err("connection closed before auth".to_string()),
            }
        }
    })
    .await;

    match result {
        Ok(inner) => inner,
        Err(_) => Err("auth timeout".to_string()),
    }
}

/// Dispatch one inbound text frame per spec §4.6: ping, the synthetic
/// `AT+CONNECT?`, the `AT^SYSCFGEX` band-list rewriter, or a plain
/// forward-to-Arbiter.
async fn handle_command(text: &str, state: &AppState) -> String {
    let trimmed = text.trim();

    if trimmed.eq_ignore_ascii_case("ping") {
        return "pong".to_string();
    }

    if trimmed.eq_ignore_ascii_case("AT+CONNECT?") {
        let code = state.arbiter.connect_kind_code();
        return json!({
            "success": true,
            "data": format!("+CONNECT: {code}\r\nOK"),
            "error": null
        })
        .to_string();
    }

    let rewritten = rewrite_syscfgex(trimmed);
    let command = rewritten.as_deref().unwrap_or(trimmed);

    match state.arbiter.send(command).await {
        Ok(response) => {
            let body = response.body.unwrap_or_default();
            if body.to_uppercase().contains("ERROR") {
                json!({"success": false, "data": null, "error": body}).to_string()
            } else {
                json!({"success": true, "data": body, "error": null}).to_string()
            }
        }
        Err(e) => json!({"success": false, "data": null, "error": e}).to_string(),
    }
}

/// Normalize `AT^SYSCFGEX...,"",""` band-list quoting before sending, per
/// spec §4.6.
fn rewrite_syscfgex(line: &str) -> Option<String> {
    if !line.starts_with("AT^SYSCFGEX") {
        return None;
    }
    let comma_pos = line.find(',')?;
    let (prefix, rest) = line.split_at(comma_pos);
    let bands = rest
        .trim_start_matches(',')
        .split(',')
        .next()
        .unwrap_or("")
        .trim_matches('"');
    Some(format!("{prefix},\"{bands}\",\"\",\"\""))
}

/// Broadcast an event to every connected session. Kept as a thin wrapper
/// around the shared `broadcast::Sender` owned by `AppState` for symmetry
/// with the teacher's `broadcast(event)` Hub API.
pub fn broadcast(event_tx: &broadcast::Sender<Event>, event: Event) {
    let _ = event_tx.send(event);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_syscfgex_band_list() {
        let rewritten = rewrite_syscfgex("AT^SYSCFGEX=\"03\",3FFFFFFF,2,4,7FFFFFFFFFFFFFFF,,").unwrap();
        assert!(rewritten.starts_with("AT^SYSCFGEX"));
        assert!(rewritten.ends_with("\"\",\"\",\"\""));
    }

    #[test]
    fn non_syscfgex_lines_are_untouched() {
        assert!(rewrite_syscfgex("AT+CSQ").is_none());
    }
}
