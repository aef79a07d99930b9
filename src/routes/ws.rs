use std::net::SocketAddr;

use axum::{
    extract::{ws::{WebSocket, WebSocketUpgrade}, ConnectInfo, Extension, Query},
    response::IntoResponse,
    routing::get,
    Router,
};
use serde::Deserialize;

use crate::{
    error::{bad, AppResult},
    sync::{Conn, Hub},
};

#[derive(Deserialize)] struct WsQuery { key: Option<String> }

pub fn router() -> Router {
    Router::new().route("/room/ws", get(ws_handler))
}

/* key 檢查在升級前：失敗時不碰任何房間 */
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(q): Query<WsQuery>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    Extension(hub): Extension<Hub>,
) -> AppResult<impl IntoResponse> {
    let key = q.key.filter(|k| !k.is_empty())
        .ok_or_else(|| bad("missing 'key' query parameter"))?;

    Ok(ws
        .on_failed_upgrade(move |e| tracing::error!(remote = %remote, error = %e, "websocket upgrade failed"))
        .on_upgrade(move |sock| join(sock, remote, key, hub)))
}

/* ---------------- per connection ---------------- */
async fn join(sock: WebSocket, remote: SocketAddr, key: String, hub: Hub) {
    match hub.connect(&key, Conn::from_socket(sock, remote)).await {
        Ok((room, client)) => tracing::info!(
            room = %key, client = %client.id(), remote = %remote,
            total_clients = room.client_count(), "websocket joined"
        ),
        Err(e) => tracing::warn!(room = %key, remote = %remote, error = %e, "admission refused"),
    }
}
