//! WebSocket session lifecycle: upgrade, subscribe, read loop, unsubscribe.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use axum::response::Response;
use futures::StreamExt;
use serde::Deserialize;
use taskfeed_auth::extract_bearer;
use tracing::{debug, info, instrument};

use super::registry::ConnectionRegistry;
use super::transport::WsTransport;
use crate::server::AppState;

/// Query parameters accepted on the subscribe endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct SubscribeParams {
    /// Bearer token, for clients that cannot set headers on the upgrade.
    pub token: Option<String>,
}

/// `GET /ws/tasks`: upgrade and hand the socket to [`run_ws_session`].
///
/// The credential comes from `?token=` or, failing that, an
/// `Authorization: Bearer` header. A missing credential is still upgraded so
/// the client gets a proper close frame.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<SubscribeParams>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    let credential = params
        .token
        .or_else(|| {
            headers
                .get(AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|h| extract_bearer(h).ok())
                .map(str::to_owned)
        })
        .unwrap_or_default();
    let registry = Arc::clone(&state.registry);
    ws.on_upgrade(move |socket| run_ws_session(socket, credential, registry))
}

/// Run one subscriber from upgrade to disconnect.
///
/// 1. Subscribes the send half with the registry (which closes it on refusal)
/// 2. Reads inbound frames, refreshing the heartbeat and echoing text
/// 3. Ends when the client leaves or the registry detaches the connection
/// 4. Unsubscribes
#[instrument(skip_all)]
pub async fn run_ws_session(socket: WebSocket, credential: String, registry: Arc<ConnectionRegistry>) {
    let (sink, mut stream) = socket.split();

    let id = match registry
        .subscribe(Box::new(WsTransport::new(sink)), &credential)
        .await
    {
        Ok(id) => id,
        Err(e) => {
            info!(error = %e, "subscribe refused");
            return;
        }
    };
    let Some(conn) = registry.connection(id) else {
        return;
    };
    let cancel = conn.cancellation();
    let echo = registry.config().echo_inbound;

    loop {
        let msg = tokio::select! {
            () = cancel.cancelled() => break,
            msg = stream.next() => msg,
        };
        match msg {
            Some(Ok(Message::Text(text))) => {
                conn.mark_alive();
                if echo {
                    // Drops are logged by the registry.
                    let _ = registry.send_direct(id, format!("You wrote: {}", text.as_str()));
                }
            }
            Some(Ok(Message::Binary(_) | Message::Ping(_) | Message::Pong(_))) => conn.mark_alive(),
            Some(Ok(Message::Close(_))) | None => {
                debug!(conn_id = %id, "client closed");
                break;
            }
            Some(Err(e)) => {
                debug!(conn_id = %id, error = %e, "read failed");
                break;
            }
        }
    }

    drop(conn);
    registry.unsubscribe(id).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_param_optional() {
        let params: SubscribeParams = serde_json::from_str("{}").unwrap();
        assert!(params.token.is_none());
        let params: SubscribeParams = serde_json::from_str(r#"{"token":"abc"}"#).unwrap();
        assert_eq!(params.token.as_deref(), Some("abc"));
    }
}
