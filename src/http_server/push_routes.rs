//! Push HTTP Routes and WebSocket Handler
//!
//! - `GET /push/{channel}` upgrades to a WebSocket registered under a channel id
//! - `POST /api/channels/{name}/messages` publishes on a channel
//! - `DELETE /api/scopes/{scope_id}` expires a session or view scope
//!
//! A channel id travels either percent-encoded in the path
//! (`/push/chat%3Fs1`) or split at its first separator into path and query
//! (`/push/chat?s1`).

use axum::{
    extract::{
        ws::{CloseFrame, Message, Utf8Bytes, WebSocket, WebSocketUpgrade},
        Path, RawQuery, State,
    },
    http::{HeaderMap, StatusCode},
    response::Response,
    routing::{delete, get, post},
    Json, Router,
};
use futures_util::future::join_all;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::push::{
    ChannelId, CloseReason, Connection, DeliveryError, DeliveryResult, OutboxItem, PushError, PushManager,
    PushMessage, PushResult, QueuedConnection, ScopeId, ScopeIds, UserId, CHANNEL_ID_SEPARATOR,
};

/// Request header carrying the user identity of a push connection
pub const PUSH_USER_HEADER: &str = "x-push-user";

// ==================
// Request/Response Types
// ==================

#[derive(Debug, Deserialize)]
pub struct PublishRequest {
    /// JSON payload pushed to clients
    pub message: Value,
    /// Session scope to resolve the channel in
    #[serde(default)]
    pub session: Option<String>,
    /// View scope to resolve the channel in
    #[serde(default)]
    pub view: Option<String>,
    /// Send to these users instead of broadcasting
    #[serde(default)]
    pub users: Option<Vec<String>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PublishResponse {
    /// Channel id a broadcast was delivered under; absent for user sends
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    pub recipients: usize,
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DestroyScopeResponse {
    pub scope_id: String,
    pub released: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
}

pub(crate) type ApiError = (StatusCode, Json<ErrorResponse>);

pub(crate) fn api_error(err: PushError) -> ApiError {
    let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
            code: status.as_u16(),
        }),
    )
}

// ==================
// Push Routes
// ==================

/// Create push routes with WebSocket support
pub fn push_routes(manager: PushManager) -> Router {
    Router::new()
        .route("/push/{channel}", get(push_socket_handler))
        .route("/api/channels/{name}/messages", post(publish_handler))
        .route("/api/scopes/{scope_id}", delete(destroy_scope_handler))
        .with_state(manager)
}

// ==================
// WebSocket Handler
// ==================

/// Validate the channel id and user, then upgrade
///
/// Unknown channel ids and malformed users are refused before the upgrade.
async fn push_socket_handler(
    ws: WebSocketUpgrade,
    State(manager): State<PushManager>,
    Path(channel): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let raw = match query {
        Some(query) if !query.is_empty() => format!("{channel}{CHANNEL_ID_SEPARATOR}{query}"),
        _ => channel,
    };
    let channel_id = manager.validate_channel_id(&raw).map_err(api_error)?;
    let user = push_user(&headers).map_err(api_error)?;

    if manager.is_shut_down() {
        return Err(api_error(PushError::ShutDown));
    }

    Ok(ws.on_upgrade(move |socket| handle_push_socket(socket, manager, channel_id, user)))
}

fn push_user(headers: &HeaderMap) -> PushResult<Option<UserId>> {
    headers
        .get(PUSH_USER_HEADER)
        .map(|value| {
            let raw = value
                .to_str()
                .map_err(|_| PushError::InvalidUser("header is not visible ASCII".to_string()))?;
            UserId::new(raw)
        })
        .transpose()
}

fn close_message(reason: CloseReason) -> Message {
    Message::Close(Some(CloseFrame {
        code: reason.code(),
        reason: Utf8Bytes::from_static(reason.as_str()),
    }))
}

/// Drive one push connection until either side closes it
async fn handle_push_socket(socket: WebSocket, manager: PushManager, channel_id: ChannelId, user: Option<UserId>) {
    let write_timeout = manager.settings().write_timeout();
    let (connection, mut outbox) = QueuedConnection::new(manager.settings().write_queue_capacity);
    let connection_id = connection.id().clone();
    let (mut sender, mut receiver) = socket.split();

    if let Err(e) = manager.open(&channel_id, connection, user) {
        warn!(channel_id = %channel_id, error = %e, "push connection refused");
        let reason = match e {
            PushError::ShutDown => CloseReason::Shutdown,
            _ => CloseReason::UnknownChannel,
        };
        let _ = sender.send(close_message(reason)).await;
        return;
    }

    let reason = loop {
        tokio::select! {
            item = outbox.recv() => match item {
                Some(OutboxItem::Message(outbound)) => {
                    let frame = Message::Text(outbound.message().to_text().into());
                    let outcome = match timeout(write_timeout, sender.send(frame)).await {
                        Ok(Ok(())) => Ok(()),
                        Ok(Err(e)) => Err(DeliveryError::Transport(e.to_string())),
                        Err(_) => Err(DeliveryError::Timeout),
                    };

                    let failed = outcome.is_err();
                    outbound.complete(outcome);
                    if failed {
                        manager.metrics().record_delivery_failure();
                        break CloseReason::Normal;
                    }
                }
                Some(OutboxItem::Close(reason)) => {
                    let _ = sender.send(close_message(reason)).await;
                    break reason;
                }
                None => break CloseReason::Normal,
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break CloseReason::Normal,
                // Push is one-way; pings are answered by the socket itself
                Some(Ok(_)) => {}
            },
        }
    };

    manager.close(&connection_id, reason);
    let failed = outbox.fail_pending();
    for _ in 0..failed {
        manager.metrics().record_delivery_failure();
    }
    debug!(connection = %connection_id, pending_failed = failed, "push socket finished");
}

// ==================
// HTTP Handlers
// ==================

/// Publish a message on a channel
///
/// Waits for every initiated write and reports how many succeeded.
async fn publish_handler(
    State(manager): State<PushManager>,
    Path(name): Path<String>,
    Json(request): Json<PublishRequest>,
) -> Result<Json<PublishResponse>, ApiError> {
    let scope = ScopeIds {
        session: request.session.as_deref().map(ScopeId::parse).transpose().map_err(api_error)?,
        view: request.view.as_deref().map(ScopeId::parse).transpose().map_err(api_error)?,
    };

    let context = manager.context(&name, &scope).map_err(api_error)?;
    let message = PushMessage::new(request.message);

    let (channel_id, results): (Option<String>, Vec<DeliveryResult>) = match &request.users {
        Some(users) => {
            let by_user = context.send_to_users(message, users).map_err(api_error)?;
            (None, by_user.into_values().flatten().collect())
        }
        None => {
            let results = context.send(message).map_err(api_error)?;
            (Some(context.channel_id().to_string()), results)
        }
    };

    let recipients = results.len();
    let delivered = join_all(results)
        .await
        .into_iter()
        .filter(Result::is_ok)
        .count();

    Ok(Json(PublishResponse {
        channel_id,
        recipients,
        delivered,
        failed: recipients - delivered,
    }))
}

/// Expire a session or view scope
async fn destroy_scope_handler(
    State(manager): State<PushManager>,
    Path(scope_id): Path<String>,
) -> Result<Json<DestroyScopeResponse>, ApiError> {
    let scope_id = ScopeId::parse(&scope_id).map_err(api_error)?;
    let released = manager.destroy_scope(&scope_id);

    Ok(Json(DestroyScopeResponse {
        scope_id: scope_id.to_string(),
        released,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request};
    use tower::ServiceExt;

    use crate::push::ScopeKind;

    fn manager() -> PushManager {
        let manager = PushManager::default();
        manager.declare("news", ScopeKind::Application).unwrap();
        manager.declare("chat", ScopeKind::Session).unwrap();
        manager
    }

    async fn body_json<T: serde::de::DeserializeOwned>(response: Response) -> T {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn issue_s1(manager: &PushManager) -> ChannelId {
        let session = ScopeId::parse("s1").unwrap();
        manager
            .channel_id("chat", &ScopeIds::none().with_session(session))
            .unwrap()
    }

    fn publish(name: &str, body: serde_json::Value) -> Request<Body> {
        Request::post(format!("/api/channels/{name}/messages"))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[test]
    fn test_api_error_status() {
        let (status, Json(body)) = api_error(PushError::UndeclaredChannel("x".into()));
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body.code, 404);
    }

    #[test]
    fn test_push_user_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(push_user(&headers).unwrap(), None);

        headers.insert(PUSH_USER_HEADER, "alice".parse().unwrap());
        assert_eq!(push_user(&headers).unwrap(), UserId::new("alice").ok());

        headers.insert(PUSH_USER_HEADER, " ".parse().unwrap());
        assert!(push_user(&headers).is_err());
    }

    #[tokio::test]
    async fn test_publish_without_listeners() {
        let router = push_routes(manager());
        let response = router
            .oneshot(publish("news", serde_json::json!({ "message": { "n": 1 } })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body: PublishResponse = body_json(response).await;
        assert_eq!(body.channel_id.as_deref(), Some("news"));
        assert_eq!(body.recipients, 0);
    }

    #[tokio::test]
    async fn test_publish_delivers_to_queued_connection() {
        let manager = manager();
        let (connection, mut outbox) = QueuedConnection::new(4);
        manager.open(&issue_s1(&manager), connection, None).unwrap();

        let writer = tokio::spawn(async move {
            if let Some(OutboxItem::Message(outbound)) = outbox.recv().await {
                let text = outbound.message().to_text();
                outbound.complete(Ok(()));
                text
            } else {
                String::new()
            }
        });

        let response = push_routes(manager)
            .oneshot(publish("chat", serde_json::json!({ "message": "hi", "session": "s1" })))
            .await
            .unwrap();

        let body: PublishResponse = body_json(response).await;
        assert_eq!(body.channel_id.as_deref(), Some("chat?s1"));
        assert_eq!((body.recipients, body.delivered, body.failed), (1, 1, 0));
        assert_eq!(writer.await.unwrap(), "\"hi\"");
    }

    #[tokio::test]
    async fn test_publish_undeclared_channel() {
        let response = push_routes(manager())
            .oneshot(publish("missing", serde_json::json!({ "message": 1 })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body: ErrorResponse = body_json(response).await;
        assert_eq!(body.code, 404);
    }

    #[tokio::test]
    async fn test_publish_invalid_user() {
        let response = push_routes(manager())
            .oneshot(publish("news", serde_json::json!({ "message": 1, "users": [""] })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_publish_to_users_omits_channel_id() {
        let manager = manager();
        let (connection, mut outbox) = QueuedConnection::new(4);
        manager
            .open(&issue_s1(&manager), connection, UserId::new("alice").ok())
            .unwrap();

        let writer = tokio::spawn(async move {
            if let Some(OutboxItem::Message(outbound)) = outbox.recv().await {
                outbound.complete(Ok(()));
            }
        });

        // No session given: the user path reaches alice anyway
        let response = push_routes(manager)
            .oneshot(publish("chat", serde_json::json!({ "message": "hi", "users": ["alice"] })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body: PublishResponse = body_json(response).await;
        assert_eq!(body.channel_id, None);
        assert_eq!((body.recipients, body.delivered), (1, 1));
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_destroy_scope() {
        let manager = manager();
        let (connection, _outbox) = QueuedConnection::new(4);
        manager.open(&issue_s1(&manager), connection, None).unwrap();

        let response = push_routes(manager.clone())
            .oneshot(
                Request::delete("/api/scopes/s1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let body: DestroyScopeResponse = body_json(response).await;
        assert_eq!(body.released, 1);
        assert!(manager.session_registry().is_empty());
    }
}
