use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, Method, Request, Uri},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use palaver_shared::{Message, UserId, UserProfile};
use palaver_store::{Database, InboxRow};

use crate::auth::Authenticator;
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::presence::PresenceRegistry;
use crate::relay::{self, store_and_forward};
use crate::signaling::{CallSignaling, CallToken};

/// Page size used when a history request does not specify one.
const DEFAULT_HISTORY_LIMIT: u32 = 30;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Mutex<Database>>,
    pub presence: PresenceRegistry,
    pub calls: CallSignaling,
    pub auth: Arc<Authenticator>,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(relay::ws_handler))
        .route("/messages", post(send_message))
        .route("/messages/{other}", get(get_history))
        .route("/messages/{other}/read", post(mark_read))
        .route("/inbox", get(get_inbox))
        .route("/presence", get(presence_list))
        .route("/presence/{user}", get(presence_check))
        .route("/calls/channel", post(request_call_channel))
        .route("/calls/token", post(request_call_token))
        .route("/users", post(upsert_user))
        .layer(cors)
        .layer(TraceLayer::new_for_http().make_span_with(|req: &Request<Body>| {
            tracing::info_span!("request", method = %req.method(), path = trace_target(req.uri()))
        }))
        .with_state(state)
}

/// What a request trace may record of the URI.
///
/// The query string is dropped: `/ws` carries the bearer credential as a
/// query parameter, and credentials must not land in the logs.
fn trace_target(uri: &Uri) -> &str {
    uri.path()
}

/// Resolve the authenticated user from the `Authorization: Bearer …` header.
fn bearer_user(headers: &HeaderMap, auth: &Authenticator) -> Result<UserId, ServerError> {
    let raw = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let credential = raw.strip_prefix("Bearer ").unwrap_or(raw);
    auth.verify(credential)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    instance: String,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        instance: state.config.instance_name.clone(),
    })
}

#[derive(Deserialize)]
struct SendMessageRequest {
    to: UserId,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    image_url: Option<String>,
}

/// Durable send over REST.  The returned message is the acknowledgment;
/// live relay to an online recipient happens as a side effect.
async fn send_message(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(req): Json<SendMessageRequest>,
) -> Result<Json<Message>, ServerError> {
    let sender = bearer_user(&headers, &state.auth)?;
    let message = store_and_forward(&state, &sender, &req.to, req.text, req.image_url).await?;

    info!(
        message_id = %message.id,
        sender = %sender,
        recipient = %req.to,
        "message sent"
    );
    Ok(Json(message))
}

#[derive(Deserialize)]
struct HistoryParams {
    #[serde(default)]
    page: Option<u32>,
    #[serde(default)]
    limit: Option<u32>,
}

#[derive(Serialize)]
struct HistoryResponse {
    items: Vec<Message>,
    total: u64,
}

async fn get_history(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(other): Path<UserId>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<HistoryResponse>, ServerError> {
    let user = bearer_user(&headers, &state.auth)?;

    let page = params.page.unwrap_or(1);
    let limit = params.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);

    let db = state.db.lock().await;
    let history = db.history(&user, &other, page, limit)?;
    Ok(Json(HistoryResponse {
        items: history.items,
        total: history.total,
    }))
}

#[derive(Serialize)]
struct MarkReadResponse {
    updated: u64,
}

async fn mark_read(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(other): Path<UserId>,
) -> Result<Json<MarkReadResponse>, ServerError> {
    let user = bearer_user(&headers, &state.auth)?;

    let updated = {
        let db = state.db.lock().await;
        db.mark_read(&user, &other)?
    };
    Ok(Json(MarkReadResponse { updated }))
}

async fn get_inbox(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<Vec<InboxRow>>, ServerError> {
    let user = bearer_user(&headers, &state.auth)?;

    let db = state.db.lock().await;
    let rows = db.inbox_rows(&user)?;
    Ok(Json(rows))
}

#[derive(Serialize)]
struct PresenceListResponse {
    online: Vec<UserId>,
}

async fn presence_list(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<PresenceListResponse>, ServerError> {
    bearer_user(&headers, &state.auth)?;
    Ok(Json(PresenceListResponse {
        online: state.presence.online_users().await,
    }))
}

#[derive(Serialize)]
struct PresenceCheckResponse {
    online: bool,
}

/// Advisory pre-call check: "is the callee reachable right now?".  It can
/// race with a disconnect, so callers must still handle a dropped offer.
async fn presence_check(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(user): Path<UserId>,
) -> Result<Json<PresenceCheckResponse>, ServerError> {
    bearer_user(&headers, &state.auth)?;
    Ok(Json(PresenceCheckResponse {
        online: state.presence.is_online(&user).await,
    }))
}

#[derive(Deserialize)]
struct CallChannelRequest {
    callee: UserId,
}

#[derive(Serialize)]
struct CallChannelResponse {
    channel: String,
}

async fn request_call_channel(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(req): Json<CallChannelRequest>,
) -> Result<Json<CallChannelResponse>, ServerError> {
    let caller = bearer_user(&headers, &state.auth)?;
    let channel = state.calls.begin(&caller, &req.callee).await?;
    Ok(Json(CallChannelResponse { channel }))
}

#[derive(Deserialize)]
struct CallTokenRequest {
    channel: String,
}

async fn request_call_token(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(req): Json<CallTokenRequest>,
) -> Result<Json<CallToken>, ServerError> {
    let user = bearer_user(&headers, &state.auth)?;
    let token = state.calls.issue_token(&req.channel, &user).await?;
    Ok(Json(token))
}

/// Directory-replica upsert, pushed by the user-store collaborator (or by a
/// user refreshing their own display metadata).
async fn upsert_user(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(profile): Json<UserProfile>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let user = bearer_user(&headers, &state.auth)?;
    if user != profile.id {
        return Err(ServerError::InvalidArgument(
            "profile id does not match the authenticated user".into(),
        ));
    }

    let db = state.db.lock().await;
    db.upsert_user(&profile)?;
    Ok(Json(serde_json::json!({ "updated": true })))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn authed_headers(auth: &Authenticator, user: &str) -> HeaderMap {
        let user = UserId::parse(user).unwrap();
        let mut headers = HeaderMap::new();
        let value = format!("Bearer {}", auth.issue(&user));
        headers.insert("authorization", HeaderValue::from_str(&value).unwrap());
        headers
    }

    #[test]
    fn bearer_extraction_accepts_prefixed_and_raw_credentials() {
        let auth = Authenticator::new([3u8; 32]);
        let user = UserId::parse("u1").unwrap();

        let headers = authed_headers(&auth, "u1");
        assert_eq!(bearer_user(&headers, &auth).unwrap(), user);

        let mut raw = HeaderMap::new();
        raw.insert(
            "authorization",
            HeaderValue::from_str(&auth.issue(&user)).unwrap(),
        );
        assert_eq!(bearer_user(&raw, &auth).unwrap(), user);
    }

    #[test]
    fn missing_or_bad_credentials_are_unauthenticated() {
        let auth = Authenticator::new([3u8; 32]);

        assert!(matches!(
            bearer_user(&HeaderMap::new(), &auth),
            Err(ServerError::Unauthenticated)
        ));

        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer nonsense"));
        assert!(bearer_user(&headers, &auth).is_err());
    }

    #[test]
    fn request_traces_never_see_the_query_string() {
        let uri: Uri = "/ws?token=u1.deadbeef".parse().unwrap();
        let target = trace_target(&uri);
        assert_eq!(target, "/ws");
        assert!(!target.contains("token"));

        let plain: Uri = "/inbox".parse().unwrap();
        assert_eq!(trace_target(&plain), "/inbox");
    }
}
