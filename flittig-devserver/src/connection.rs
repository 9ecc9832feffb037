use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::{accept_hdr_async, tungstenite::Message, WebSocketStream};
use tracing::{error, info, warn};

use crate::protocol::{ClientFrame, ServerEvent};
use crate::state::ServerState;

const CHAT_PATH: &str = "/chat";

/// Who a connection belongs to, taken from the upgrade request.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectParams {
    pub user_id: String,
    pub receiver: Option<String>,
}

impl ConnectParams {
    /// Parse `/chat?token=..&receiver=..`. In the dev relay the token is the
    /// user id.
    pub fn from_request(path: &str, query: Option<&str>) -> Result<Self, (StatusCode, &'static str)> {
        if path != CHAT_PATH {
            return Err((StatusCode::NOT_FOUND, "unknown path"));
        }

        let mut token = None;
        let mut receiver = None;
        for (key, value) in url::form_urlencoded::parse(query.unwrap_or_default().as_bytes()) {
            match key.as_ref() {
                "token" => token = Some(value.into_owned()),
                "receiver" => receiver = Some(value.into_owned()),
                _ => {}
            }
        }

        let user_id = token
            .filter(|t| !t.trim().is_empty())
            .ok_or((StatusCode::UNAUTHORIZED, "missing token"))?;

        Ok(Self {
            user_id,
            receiver: receiver.filter(|r| !r.is_empty()),
        })
    }
}

/// Accept connections forever
pub async fn serve(listener: TcpListener, state: Arc<ServerState>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer_addr)) => {
                info!("New connection from {}", peer_addr);
                let state = state.clone();
                tokio::spawn(async move {
                    accept_connection(stream, state).await;
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}

/// Run the WebSocket handshake, rejecting bad paths and missing tokens
pub async fn accept_connection(stream: TcpStream, state: Arc<ServerState>) {
    let mut params = None;

    let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        match ConnectParams::from_request(request.uri().path(), request.uri().query()) {
            Ok(parsed) => {
                params = Some(parsed);
                Ok(response)
            }
            Err((status, reason)) => {
                warn!("Rejecting upgrade: {}", reason);
                let mut rejection = ErrorResponse::new(Some(reason.to_string()));
                *rejection.status_mut() = status;
                Err(rejection)
            }
        }
    };

    let ws_stream = match accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("WebSocket handshake failed: {}", e);
            return;
        }
    };

    if let Some(params) = params {
        handle_connection(ws_stream, params, state).await;
    }
}

/// Handle a single authenticated WebSocket connection
pub async fn handle_connection(
    ws_stream: WebSocketStream<TcpStream>,
    params: ConnectParams,
    state: Arc<ServerState>,
) {
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let user_id = params.user_id.clone();

    // Create channel for sending messages to this client
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    // History goes first so it lands before anything live
    let history = params
        .receiver
        .as_deref()
        .map(|receiver| state.history_for(&user_id, receiver))
        .unwrap_or_default();
    match ServerEvent::History(history).to_frame() {
        Ok(json) => {
            let _ = tx.send(json);
        }
        Err(e) => error!("Failed to serialize history for {}: {}", user_id, e),
    }

    let conn_id = state.add_client(&user_id, params.receiver.clone(), tx.clone());
    info!("User connected: {} (connection {})", user_id, conn_id);

    // Send existing online users to the newly connected client
    for online_user_id in state.online_users() {
        if online_user_id != user_id {
            if let Some(json) = ServerState::presence_frame(&online_user_id, true) {
                let _ = tx.send(json);
            }
        }
    }
    drop(tx);

    // Broadcast presence to all other clients
    if let Some(json) = ServerState::presence_frame(&user_id, true) {
        state.broadcast(&json, Some(&user_id));
    }

    // Spawn task to forward messages from channel to WebSocket
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(Message::Text(msg.into())).await.is_err() {
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    loop {
        tokio::select! {
            res = ws_receiver.next() => {
                match res {
                    Some(Ok(Message::Text(text))) => {
                        handle_message(&text, &user_id, &state);
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("User {} sent close frame", user_id);
                        break;
                    }
                    Some(Err(e)) => {
                        error!("WebSocket error for user {}: {}", user_id, e);
                        break;
                    }
                    None => {
                        info!("WebSocket stream ended for user {}", user_id);
                        break;
                    }
                    _ => {}
                }
            }
            _ = &mut send_task => {
                info!("Send task finished for user {} (likely connection lost)", user_id);
                break;
            }
        }
    }

    // Cleanup
    send_task.abort();
    if state.remove_client(&user_id, conn_id) {
        if let Some(json) = ServerState::presence_frame(&user_id, false) {
            state.broadcast(&json, None);
        }
    }

    info!("User disconnected: {} (connection {})", user_id, conn_id);
}

/// Handle one `{content, receiver}` frame from a connected client
pub fn handle_message(text: &str, sender_id: &str, state: &ServerState) {
    let frame: ClientFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!("Failed to parse message from {}: {}", sender_id, e);
            return;
        }
    };

    let content = frame.content.trim();
    if content.is_empty() || frame.receiver.is_empty() {
        warn!("Ignoring empty message from {}", sender_id);
        return;
    }

    let stored = state.record_message(sender_id, &frame.receiver, content);
    state.deliver(&stored);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_from_query() {
        let params = ConnectParams::from_request("/chat", Some("token=alice&receiver=bob")).unwrap();
        assert_eq!(
            params,
            ConnectParams {
                user_id: "alice".to_string(),
                receiver: Some("bob".to_string()),
            }
        );
    }

    #[test]
    fn test_params_without_receiver() {
        let params = ConnectParams::from_request("/chat", Some("token=alice&receiver=")).unwrap();
        assert_eq!(params.receiver, None);
    }

    #[test]
    fn test_params_rejects_missing_token() {
        let (status, _) = ConnectParams::from_request("/chat", Some("receiver=bob")).unwrap_err();
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _) = ConnectParams::from_request("/chat", None).unwrap_err();
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_params_rejects_other_paths() {
        let (status, _) = ConnectParams::from_request("/", Some("token=alice")).unwrap_err();
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
