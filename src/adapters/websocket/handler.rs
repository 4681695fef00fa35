//! WebSocket upgrade handler for live estimation sessions.
//!
//! Handles the HTTP → WebSocket upgrade and the connection lifecycle:
//! 1. Validate the session or guest cookie
//! 2. Resolve the session through the hub (loading it if needed)
//! 3. Upgrade to WebSocket and attach to the session
//! 4. Run the connection until either side closes

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::{IntoResponse, Response},
    Json,
};
use futures::{future, SinkExt, StreamExt};
use http::{header, HeaderMap, StatusCode};

use crate::application::hub::{ErrorPayload, Hub, Outbound};
use crate::domain::foundation::{AuthError, AuthenticatedUser, ErrorCode, SessionId};
use crate::domain::session::{SessionError, SessionKind};
use crate::ports::{Credentials, SessionValidator};

use super::connection::{run_connection, Frame};

/// Names of the cookies carrying identity.
#[derive(Debug, Clone)]
pub struct CookieNames {
    pub session: String,
    pub guest: String,
}

impl Default for CookieNames {
    fn default() -> Self {
        Self {
            session: "session".to_string(),
            guest: "guest".to_string(),
        }
    }
}

/// State required for WebSocket handling.
#[derive(Clone)]
pub struct WebSocketState {
    pub hub: Hub,
    pub validator: Arc<dyn SessionValidator>,
    pub cookies: CookieNames,
}

impl WebSocketState {
    pub fn new(hub: Hub, validator: Arc<dyn SessionValidator>, cookies: CookieNames) -> Self {
        Self {
            hub,
            validator,
            cookies,
        }
    }
}

/// Rejection returned before the upgrade happens.
#[derive(Debug)]
pub enum LiveApiError {
    BadRequest(String),
    Auth(AuthError),
    Session(SessionError),
}

impl IntoResponse for LiveApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            LiveApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, ErrorCode::Invalid, msg),
            LiveApiError::Auth(AuthError::ServiceUnavailable(msg)) => {
                (StatusCode::SERVICE_UNAVAILABLE, ErrorCode::Internal, msg)
            }
            LiveApiError::Auth(e) => (StatusCode::UNAUTHORIZED, ErrorCode::Unauthorized, e.to_string()),
            LiveApiError::Session(e) => {
                let status = match &e {
                    SessionError::NotFound(_) => StatusCode::NOT_FOUND,
                    SessionError::Unauthorized(_) => StatusCode::FORBIDDEN,
                    SessionError::Storage(_) | SessionError::Ended => {
                        StatusCode::SERVICE_UNAVAILABLE
                    }
                    SessionError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
                    SessionError::Invalid(_) | SessionError::InvalidState(_) => {
                        StatusCode::BAD_REQUEST
                    }
                };
                (status, e.code(), e.message())
            }
        };
        (status, Json(ErrorPayload::new(code, message))).into_response()
    }
}

/// Route: `GET /api/battles/:session_id/live`
pub async fn battle_ws_handler(
    ws: WebSocketUpgrade,
    Path(session_id): Path<String>,
    headers: HeaderMap,
    State(state): State<WebSocketState>,
) -> Result<Response, LiveApiError> {
    upgrade(ws, SessionKind::Battle, &session_id, &headers, state).await
}

/// Route: `GET /api/storyboards/:session_id/live`
pub async fn storyboard_ws_handler(
    ws: WebSocketUpgrade,
    Path(session_id): Path<String>,
    headers: HeaderMap,
    State(state): State<WebSocketState>,
) -> Result<Response, LiveApiError> {
    upgrade(ws, SessionKind::Storyboard, &session_id, &headers, state).await
}

async fn upgrade(
    ws: WebSocketUpgrade,
    kind: SessionKind,
    session_id: &str,
    headers: &HeaderMap,
    state: WebSocketState,
) -> Result<Response, LiveApiError> {
    let session_id: SessionId = session_id
        .parse()
        .map_err(|_| LiveApiError::BadRequest("Invalid session ID".to_string()))?;

    let credentials = credentials_from_headers(headers, &state.cookies);
    let user = state.validator.validate(&credentials).await.map_err(|e| {
        tracing::warn!(session_id = %session_id, error = %e, "live connection rejected");
        LiveApiError::Auth(e)
    })?;

    let handle = state
        .hub
        .get_or_create(session_id)
        .await
        .map_err(LiveApiError::Session)?;
    if handle.kind() != kind {
        return Err(LiveApiError::Session(SessionError::not_found(format!(
            "{} {} not found",
            kind, session_id
        ))));
    }

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, session_id, user, state.hub)))
}

/// Handle an established WebSocket connection.
async fn handle_socket(socket: WebSocket, session_id: SessionId, user: AuthenticatedUser, hub: Hub) {
    let (sink, stream) = socket.split();

    let mut sink = sink.with(|frame: Frame| future::ready(Ok::<_, axum::Error>(to_message(frame))));
    let stream = Box::pin(stream.filter_map(|message| {
        future::ready(match message {
            Ok(Message::Text(text)) => Some(Ok(Frame::Text(text))),
            Ok(Message::Binary(bytes)) => Some(Ok(Frame::Binary(bytes))),
            Ok(Message::Close(_)) => Some(Ok(Frame::Close)),
            // Protocol pings are answered by axum
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => None,
            Err(e) => Some(Err(e)),
        })
    }));

    match hub.connect(session_id, user).await {
        Ok(attachment) => run_connection(attachment, stream, sink).await,
        Err(e) => {
            tracing::debug!(session_id = %session_id, error = %e, "attach failed after upgrade");
            if let Ok(json) = serde_json::to_string(&Outbound::error(&e)) {
                let _ = sink.send(Frame::Text(json)).await;
            }
            let _ = sink.send(Frame::Close).await;
        }
    }
}

fn to_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text),
        Frame::Binary(bytes) => Message::Binary(bytes),
        Frame::Close => Message::Close(None),
    }
}

/// Pull the identity cookies out of the `Cookie` headers.
pub fn credentials_from_headers(headers: &HeaderMap, names: &CookieNames) -> Credentials {
    let mut credentials = Credentials::default();
    let pairs = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='));

    for (name, value) in pairs {
        let value = value.trim().trim_matches('"');
        if value.is_empty() {
            continue;
        }
        if name == names.session {
            credentials.session_token = Some(value.to_string());
        } else if name == names.guest {
            credentials.guest_token = Some(value.to_string());
        }
    }
    credentials
}

/// Create axum router for the live session endpoints.
///
/// # Example
///
/// ```ignore
/// let app = Router::new()
///     .nest("/api", websocket_router())
///     .with_state(ws_state);
/// ```
pub fn websocket_router() -> axum::Router<WebSocketState> {
    use axum::routing::get;

    axum::Router::new()
        .route("/battles/:session_id/live", get(battle_ws_handler))
        .route("/storyboards/:session_id/live", get(storyboard_ws_handler))
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn headers(cookie: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_str(cookie).unwrap());
        headers
    }

    #[test]
    fn extracts_session_and_guest_cookies() {
        let credentials = credentials_from_headers(
            &headers("theme=dark; session=abc; guest=\"xyz\""),
            &CookieNames::default(),
        );
        assert_eq!(credentials.session_token.as_deref(), Some("abc"));
        assert_eq!(credentials.guest_token.as_deref(), Some("xyz"));
    }

    #[test]
    fn custom_cookie_names_are_honoured() {
        let names = CookieNames {
            session: "sid".to_string(),
            guest: "gid".to_string(),
        };
        let credentials = credentials_from_headers(&headers("session=abc; gid=g1"), &names);
        assert_eq!(credentials.session_token, None);
        assert_eq!(credentials.guest_token.as_deref(), Some("g1"));
    }

    #[test]
    fn empty_cookie_values_are_ignored() {
        let credentials =
            credentials_from_headers(&headers("session=; guest="), &CookieNames::default());
        assert!(credentials.is_empty());
    }

    #[test]
    fn errors_map_to_http_status() {
        let status = |e: LiveApiError| e.into_response().status();

        assert_eq!(
            status(LiveApiError::Auth(AuthError::MissingCredentials)),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status(LiveApiError::Auth(AuthError::service_unavailable("down"))),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status(LiveApiError::Session(SessionError::not_found("gone"))),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status(LiveApiError::Session(SessionError::storage("db down"))),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status(LiveApiError::BadRequest("bad id".to_string())),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn websocket_router_creates_routes() {
        let _router = websocket_router();
    }
}
