//! HTTP and WebSocket adapter
//!
//! A thin axum layer over [`Exchange`]. Routes authenticate with a bearer
//! credential, call one exchange operation, and map [`CoreError`] kinds to
//! HTTP status codes. The `/ws` route runs one live session per socket.

use app_core::{
    Conversation, CoreError, ErrorKind, Exchange, Invitation, InvitationOverview,
    InvitationResponse, Listing, Message, NewListing, Notification, Profile,
};
use axum::{
    async_trait,
    extract::{
        ws::{CloseFrame, Message as WsMessage, WebSocket, WebSocketUpgrade},
        FromRequestParts, Path, Query, State,
    },
    http::{header, request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use moderation::Block;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::borrow::Cow;
use std::sync::Arc;
use thiserror::Error;

use crate::auth::{AuthError, Authenticator};
use crate::protocol::{encode_event, CLOSE_NORMAL, CLOSE_UNAUTHENTICATED};
use crate::registry::ConnectionRegistry;
use crate::session::{LiveSession, RegistrationGuard};

// ============================================================================
// State and errors
// ============================================================================

/// Shared state of every route
#[derive(Clone)]
pub struct AppState {
    /// Exchange core
    pub exchange: Arc<Exchange>,
    /// Live connection registry
    pub registry: Arc<ConnectionRegistry>,
    /// Credential resolver
    pub auth: Arc<dyn Authenticator>,
}

impl AppState {
    /// Bundle the shared components
    pub fn new(
        exchange: Arc<Exchange>,
        registry: Arc<ConnectionRegistry>,
        auth: Arc<dyn Authenticator>,
    ) -> Self {
        Self { exchange, registry, auth }
    }
}

/// Errors returned by HTTP routes
#[derive(Debug, Error)]
pub enum ApiError {
    /// Exchange operation failed
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Credential missing or invalid
    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),
}

/// Result type for HTTP routes
pub type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

impl ApiError {
    fn kind(&self) -> ErrorKind {
        match self {
            ApiError::Core(e) => e.kind(),
            ApiError::Auth(_) => ErrorKind::Unauthenticated,
        }
    }
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Forbidden => StatusCode::FORBIDDEN,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
        ErrorKind::Unauthenticated => StatusCode::UNAUTHORIZED,
        ErrorKind::Storage => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let detail = if kind == ErrorKind::Storage {
            tracing::error!(error = %self, "Request failed");
            "internal error".to_string()
        } else {
            self.to_string()
        };
        let conflict = match &self {
            ApiError::Core(e) => e.conflict().map(|c| format!("{c:?}")),
            ApiError::Auth(_) => None,
        };
        let body = json!({ "error": kind.to_string(), "conflict": conflict, "detail": detail });
        (status_for(kind), Json(body)).into_response()
    }
}

/// Authenticated caller, resolved from `Authorization: Bearer <token>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser(pub String);

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .ok_or(AuthError::Missing)?;
        Ok(AuthUser(state.auth.authenticate(token)?))
    }
}

// ============================================================================
// Router
// ============================================================================

/// Build the application router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws_handler))
        .route("/api/profile", get(get_profile).put(put_profile))
        .route("/api/listings", post(create_listing))
        .route("/api/listings/my", get(my_listings))
        .route("/api/listings/:id/withdraw", post(withdraw_listing))
        .route("/api/invitations", post(send_invitation).get(list_invitations))
        .route("/api/invitations/respond", post(respond_invitation))
        .route("/api/conversations", get(list_conversations))
        .route("/api/conversations/:id", delete(terminate_conversation))
        .route("/api/conversations/:id/messages", get(list_messages))
        .route("/api/conversations/:id/read", post(mark_conversation_read))
        .route("/api/messages", post(post_message))
        .route("/api/notifications", get(list_notifications))
        .route("/api/notifications/read-all", post(mark_all_notifications_read))
        .route("/api/notifications/:id/read", post(mark_notification_read))
        .route("/api/notifications/:id", delete(delete_notification))
        .route("/api/unread-counts", get(unread_counts))
        .route("/api/block", post(block_user))
        .route("/api/blocks", get(list_blocks))
        .route("/api/blocks/:user_id", delete(unblock_user))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    "OK"
}

// ============================================================================
// Profiles and listings
// ============================================================================

#[derive(Debug, Deserialize)]
struct ProfileRequest {
    display_name: Option<String>,
    institution: String,
    role: String,
    current_province: String,
    #[serde(default)]
    current_district: String,
    bio: Option<String>,
}

async fn get_profile(State(state): State<AppState>, AuthUser(user): AuthUser) -> ApiResult<Profile> {
    let profile = state.exchange.profiles().get(&user).await?;
    profile
        .map(Json)
        .ok_or_else(|| CoreError::NotFound(format!("profile {user}")).into())
}

async fn put_profile(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(body): Json<ProfileRequest>,
) -> ApiResult<Profile> {
    let mut profile = Profile::new(user, body.institution, body.role, body.current_province);
    profile.display_name = body.display_name;
    profile.current_district = body.current_district;
    profile.bio = body.bio;
    Ok(Json(state.exchange.profiles().upsert(profile).await?))
}

async fn create_listing(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(body): Json<NewListing>,
) -> ApiResult<Listing> {
    Ok(Json(state.exchange.listings().create(&user, body).await?))
}

async fn my_listings(State(state): State<AppState>, AuthUser(user): AuthUser) -> ApiResult<Vec<Listing>> {
    Ok(Json(state.exchange.listings().list_for_owner(&user).await?))
}

async fn withdraw_listing(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Listing> {
    Ok(Json(state.exchange.listings().withdraw(&id, &user).await?))
}

// ============================================================================
// Invitations
// ============================================================================

#[derive(Debug, Deserialize)]
struct SendInvitationRequest {
    listing_id: String,
}

#[derive(Debug, Deserialize)]
struct RespondInvitationRequest {
    invitation_id: String,
    action: String,
}

async fn send_invitation(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(body): Json<SendInvitationRequest>,
) -> ApiResult<Invitation> {
    Ok(Json(state.exchange.send_invitation(&user, &body.listing_id).await?))
}

async fn list_invitations(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> ApiResult<InvitationOverview> {
    Ok(Json(state.exchange.invitations().overview(&user).await?))
}

async fn respond_invitation(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(body): Json<RespondInvitationRequest>,
) -> ApiResult<InvitationResponse> {
    let response = state
        .exchange
        .respond_to_invitation(&body.invitation_id, &user, &body.action)
        .await?;
    Ok(Json(response))
}

// ============================================================================
// Conversations and messages
// ============================================================================

#[derive(Debug, Deserialize)]
struct PostMessageRequest {
    conversation_id: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ReadResponse {
    marked: usize,
}

async fn list_conversations(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> ApiResult<Vec<Conversation>> {
    Ok(Json(state.exchange.conversations().list_for(&user).await?))
}

async fn list_messages(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Vec<Message>> {
    Ok(Json(state.exchange.conversations().messages(&id, &user).await?))
}

async fn post_message(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(body): Json<PostMessageRequest>,
) -> ApiResult<Message> {
    Ok(Json(state.exchange.post_message(&body.conversation_id, &user, &body.content).await?))
}

async fn mark_conversation_read(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> ApiResult<ReadResponse> {
    let marked = state.exchange.mark_read(&id, &user).await?;
    Ok(Json(ReadResponse { marked }))
}

async fn terminate_conversation(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.exchange.terminate_conversation(&id, &user).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Notifications
// ============================================================================

#[derive(Debug, Deserialize)]
struct ListParams {
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
struct UnreadCounts {
    notifications: usize,
    messages: usize,
}

async fn list_notifications(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Query(params): Query<ListParams>,
) -> ApiResult<Vec<Notification>> {
    let limit = params.limit.unwrap_or(app_core::notifications::DEFAULT_LIST_LIMIT);
    Ok(Json(state.exchange.notifications().list(&user, limit).await?))
}

async fn mark_notification_read(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.exchange.notifications().mark_read(&id, &user).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn mark_all_notifications_read(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> ApiResult<ReadResponse> {
    let marked = state.exchange.notifications().mark_all_read(&user).await?;
    Ok(Json(ReadResponse { marked }))
}

async fn delete_notification(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.exchange.notifications().delete(&id, &user).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn unread_counts(State(state): State<AppState>, AuthUser(user): AuthUser) -> ApiResult<UnreadCounts> {
    Ok(Json(UnreadCounts {
        notifications: state.exchange.notifications().unread_count(&user).await?,
        messages: state.exchange.conversations().unread_count(&user).await?,
    }))
}

// ============================================================================
// Blocks
// ============================================================================

#[derive(Debug, Deserialize)]
struct BlockRequest {
    blocked_user_id: String,
    reason: Option<String>,
}

async fn block_user(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(body): Json<BlockRequest>,
) -> ApiResult<Block> {
    Ok(Json(state.exchange.block_user(&user, &body.blocked_user_id, body.reason).await?))
}

async fn list_blocks(State(state): State<AppState>, AuthUser(user): AuthUser) -> ApiResult<Vec<Block>> {
    let blocks = state.exchange.blocks().get_blocks(&user).await.map_err(CoreError::from)?;
    Ok(Json(blocks))
}

async fn unblock_user(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(blocked): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.exchange.unblock_user(&user, &blocked).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Live socket
// ============================================================================

#[derive(Debug, Deserialize)]
struct WsParams {
    token: Option<String>,
}

async fn ws_handler(
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
    ws: WebSocketUpgrade,
) -> Response {
    let identity = match params.token.as_deref() {
        Some(token) => state.auth.authenticate(token),
        None => Err(AuthError::Missing),
    };

    ws.on_upgrade(move |socket| async move {
        match identity {
            Ok(user_id) => run_socket(state, user_id, socket).await,
            Err(e) => {
                tracing::debug!(error = %e, "Rejecting live connection");
                close_socket(socket, CLOSE_UNAUTHENTICATED, "unauthenticated").await;
            }
        }
    })
}

async fn close_socket(mut socket: WebSocket, code: u16, reason: &'static str) {
    let frame = CloseFrame { code, reason: Cow::Borrowed(reason) };
    let _ = socket.send(WsMessage::Close(Some(frame))).await;
}

/// Drive one authenticated live connection until it ends
async fn run_socket(state: AppState, user_id: String, socket: WebSocket) {
    let (guard, mut events) = RegistrationGuard::register(Arc::clone(&state.registry), &user_id);
    let session = LiveSession::new(user_id.clone(), Arc::clone(&state.exchange));
    let (mut sink, mut stream) = socket.split();

    tracing::info!(user = %user_id, channel = guard.channel_id(), "Live connection opened");

    loop {
        tokio::select! {
            Some(event) = events.recv() => {
                let text = match encode_event(&event) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to encode live event");
                        continue;
                    }
                };
                if sink.send(WsMessage::Text(text)).await.is_err() {
                    break;
                }
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(WsMessage::Text(text))) => {
                        session.handle_text(&text).await;
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(user = %user_id, error = %e, "Live connection error");
                        break;
                    }
                }
            }
        }
    }

    let frame = CloseFrame { code: CLOSE_NORMAL, reason: Cow::Borrowed("") };
    let _ = sink.send(WsMessage::Close(Some(frame))).await;

    drop(guard);
    tracing::info!(user = %user_id, "Live connection closed");
}
