//! Axum WebSocket upgrade glue: one task per connection, reading inbound
//! frames into `PushServer::handle_request` and forwarding outbound
//! envelopes from the connection's mpsc channel (`spec.md` §4.8).

use crate::envelope::Envelope;
use crate::server::PushServer;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

pub async fn upgrade(
    ws: WebSocketUpgrade,
    State(server): State<Arc<PushServer>>,
    Query(query): Query<WsQuery>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, server, query.token))
}

async fn handle_socket(socket: WebSocket, server: Arc<PushServer>, token: Option<String>) {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let Some(conn) = server.accept_connection(token.as_deref(), tx) else {
        debug!("rejecting connection: invalid or missing bearer token");
        return;
    };

    let (mut sink, mut stream) = socket.split();
    let conn_id = conn.id;

    let outbound = tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            let Ok(text) = serde_json::to_string(&envelope) else {
                continue;
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(message)) = stream.next().await {
        let Message::Text(text) = message else {
            continue;
        };
        let Ok(envelope) = serde_json::from_str::<Envelope>(&text) else {
            continue;
        };

        if let Err(rate_limited) = server.check_rate_limit(&conn) {
            let _ = conn.sender.send(rate_limited);
            continue;
        }

        let response = server.handle_request(&conn, &envelope).await;
        if conn.sender.send(response).is_err() {
            warn!(connection_id = %conn_id, "failed to queue response, dropping connection");
            break;
        }
    }

    server.disconnect(conn_id);
    outbound.abort();
}
