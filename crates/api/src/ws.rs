//! `/ws/users`: WebSocket subscribers to the user list.
//!
//! The upgrade handler authorizes the caller, splits the socket, and gives
//! the write half to the hub. The read half stays here in a loop that only
//! watches for the peer going away or the hub stopping.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{
        Extension, Query, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::{HeaderMap, StatusCode},
    response::Response,
};
use futures::stream::{SplitSink, StreamExt};
use futures::SinkExt;
use tracing::{debug, info};

use warden_hub::{Connection, ConnectionError, HubHandle, HubState};

use crate::app::dto::SocketQuery;
use crate::app::errors::{self, access_error_to_response};
use crate::app::services::AppServices;
use crate::middleware::extract_bearer;

pub const USERS_SOCKET_PATH: &str = "/ws/users";

/// Write half of an upgraded socket, owned by the hub once registered.
pub struct WsConnection {
    sink: SplitSink<WebSocket, Message>,
}

#[async_trait]
impl Connection for WsConnection {
    async fn send(&mut self, text: Arc<str>) -> Result<(), ConnectionError> {
        self.sink
            .send(Message::Text(text.to_string()))
            .await
            .map_err(|e| ConnectionError::Transport(e.to_string()))
    }

    async fn close(&mut self) {
        let _ = self.sink.send(Message::Close(None)).await;
        let _ = self.sink.close().await;
    }
}

/// GET /ws/users
///
/// The token comes from `Authorization: Bearer` or, for browsers, the
/// `access_token` query parameter. The caller must be allowed `GET` on this
/// path.
pub async fn users_socket(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    Query(query): Query<SocketQuery>,
    Extension(services): Extension<Arc<AppServices>>,
) -> Response {
    let token = match extract_bearer(&headers) {
        Ok(token) => token.to_string(),
        Err(err) => match query.access_token {
            Some(token) => token,
            None => return access_error_to_response(err),
        },
    };

    let principal = match services
        .gateway
        .authorize_bearer(&token, USERS_SOCKET_PATH, "GET")
        .await
    {
        Ok(principal) => principal,
        Err(err) => return access_error_to_response(err),
    };

    if services.hub.state() != HubState::Running {
        return errors::json_error(StatusCode::SERVICE_UNAVAILABLE, "shutting_down", "hub is shutting down");
    }

    let hub = services.hub.clone();
    ws.on_upgrade(move |socket| serve_socket(socket, hub, principal.identity))
}

async fn serve_socket(socket: WebSocket, hub: HubHandle, identity: String) {
    let (sink, mut stream) = socket.split();

    let id = match hub.register(Box::new(WsConnection { sink })).await {
        Ok(id) => id,
        Err(err) => {
            debug!(identity = %identity, error = %err, "websocket registration rejected");
            return;
        }
    };
    info!(connection = %id, identity = %identity, "websocket subscribed");

    let mut state = hub.subscribe_state();
    loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Message::Close(_))) | None => break,
                // Inbound frames carry nothing for us.
                Some(Ok(_)) => continue,
                Some(Err(err)) => {
                    debug!(connection = %id, error = %err, "websocket read failed");
                    break;
                }
            },
            changed = state.changed() => {
                // The hub closed the connection itself on the way down.
                if changed.is_err() || *state.borrow() == HubState::Stopped {
                    return;
                }
            }
        }
    }

    hub.unregister(id).await;
}
