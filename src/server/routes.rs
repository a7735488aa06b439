//! HTTP route handlers for the messaging API.
//!
//! Identity arrives pre-verified from the platform's auth proxy as
//! `x-user-id` / `x-user-role` / `x-agency-id` headers and is decoded once
//! here, at the boundary; handlers pass the resulting [`Viewer`] explicitly
//! into every engine call.

use std::convert::Infallible;
use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::messaging::core::conversation::Conversation;
use crate::messaging::core::errors::MessagingError;
use crate::messaging::core::ids::{ConversationId, PropertyId, UserId};
use crate::messaging::core::message::Message;
use crate::messaging::core::party::{PartyRole, Viewer};
use crate::messaging::engine::core::{InboxPage, InquiryRequest};
use crate::messaging::realtime::bus::SubscriptionLoss;
use crate::messaging::store::conversation_store::{
    DeleteOutcome, ListQuery, SortDirection, SortKey,
};

use super::state::AppState;

/// Create the API router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/conversations", post(create_conversation).get(list_conversations))
        .route("/api/conversations/{id}", get(get_conversation).delete(delete_conversation))
        .route(
            "/api/conversations/{id}/messages",
            get(list_messages).post(send_message),
        )
        .route("/api/conversations/{id}/read", post(mark_read))
        .route("/api/conversations/{id}/opened", post(mark_opened))
        .route("/api/conversations/{id}/archive", post(archive_conversation))
        .route("/api/conversations/{id}/restore", post(restore_conversation))
        .route("/api/conversations/{id}/reassign", post(reassign_conversation))
        .route("/api/conversations/{id}/events", get(conversation_events))
        .route("/api/unread", get(unread_total))
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "propline",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

const HEADER_USER: &str = "x-user-id";
const HEADER_ROLE: &str = "x-user-role";
const HEADER_AGENCY: &str = "x-agency-id";

/// Decode the verified identity headers into a viewer context.
fn viewer_from_headers(headers: &HeaderMap) -> Result<Viewer, (StatusCode, String)> {
    let unauthorized = |detail: &str| (StatusCode::UNAUTHORIZED, format!("identity: {detail}"));

    let user_id: UserId = headers
        .get(HEADER_USER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| unauthorized("missing user header"))?
        .parse()
        .map_err(|_| unauthorized("malformed user id"))?;

    let role: PartyRole = headers
        .get(HEADER_ROLE)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| unauthorized("missing role header"))?
        .parse()
        .map_err(|_| unauthorized("unknown role"))?;

    let agency_id = match headers.get(HEADER_AGENCY) {
        Some(value) => Some(
            value
                .to_str()
                .ok()
                .and_then(|raw| raw.parse().ok())
                .ok_or_else(|| unauthorized("malformed agency id"))?,
        ),
        None => None,
    };

    Ok(Viewer {
        user_id,
        role,
        agency_id,
    })
}

/// Map a core error onto a response.
fn error_response(err: MessagingError) -> (StatusCode, String) {
    let status = match &err {
        MessagingError::NotFound(_) => StatusCode::NOT_FOUND,
        MessagingError::Forbidden(_) => StatusCode::FORBIDDEN,
        MessagingError::Conflict(_) => StatusCode::CONFLICT,
        MessagingError::InvalidMessage(_) => StatusCode::BAD_REQUEST,
        MessagingError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
        MessagingError::InvalidConfig(_)
        | MessagingError::Sqlite(_)
        | MessagingError::TokioSqlite(_)
        | MessagingError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string())
}

/// Create-conversation response.
#[derive(Debug, Serialize)]
pub struct CreateConversationResponse {
    /// The created or pre-existing conversation.
    pub conversation: Conversation,
    /// Whether a new thread was created.
    pub created: bool,
    /// The appended initial message, when a body was supplied.
    pub message: Option<Message>,
}

/// Handle conversation creation (create-or-find).
async fn create_conversation(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<InquiryRequest>,
) -> Result<Json<CreateConversationResponse>, (StatusCode, String)> {
    let viewer = viewer_from_headers(&headers)?;
    let outcome = state
        .engine
        .create_conversation(viewer, request)
        .await
        .map_err(error_response)?;

    Ok(Json(CreateConversationResponse {
        conversation: outcome.conversation,
        created: outcome.created,
        message: outcome.initial_message,
    }))
}

/// Conversation list query parameters.
#[derive(Debug, Deserialize)]
pub struct ListParams {
    /// Show the archived view instead of the inbox.
    pub archived: Option<bool>,
    /// Substring filter over the last message text.
    pub search: Option<String>,
    /// Restrict to one property.
    pub property_id: Option<PropertyId>,
    /// Sort key.
    pub sort: Option<SortKey>,
    /// Sort direction.
    pub direction: Option<SortDirection>,
    /// 1-based page number.
    pub page: Option<u32>,
    /// Page size (clamped server-side).
    pub page_size: Option<u32>,
}

impl From<ListParams> for ListQuery {
    fn from(params: ListParams) -> Self {
        let defaults = Self::default();
        Self {
            archived: params.archived.unwrap_or(false),
            search: params.search,
            property_id: params.property_id,
            sort: params.sort.unwrap_or(defaults.sort),
            direction: params.direction.unwrap_or(defaults.direction),
            page: params.page.unwrap_or(1),
            // Zero lets the engine substitute its configured default.
            page_size: params.page_size.unwrap_or(0),
        }
    }
}

/// Handle conversation listing.
async fn list_conversations(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<ListParams>,
) -> Result<Json<InboxPage>, (StatusCode, String)> {
    let viewer = viewer_from_headers(&headers)?;
    let page = state
        .engine
        .list_conversations(viewer, params.into())
        .await
        .map_err(error_response)?;
    Ok(Json(page))
}

/// Handle a single conversation fetch.
async fn get_conversation(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<ConversationId>,
) -> Result<Json<Conversation>, (StatusCode, String)> {
    let viewer = viewer_from_headers(&headers)?;
    let conversation = state
        .engine
        .conversation(viewer, id)
        .await
        .map_err(error_response)?;
    Ok(Json(conversation))
}

/// Handle message history fetch.
async fn list_messages(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<ConversationId>,
) -> Result<Json<Vec<Message>>, (StatusCode, String)> {
    let viewer = viewer_from_headers(&headers)?;
    let messages = state
        .engine
        .messages(viewer, id)
        .await
        .map_err(error_response)?;
    Ok(Json(messages))
}

/// Send-message request.
#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    /// The message body.
    pub body: String,
}

/// Handle message sending.
async fn send_message(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<ConversationId>,
    Json(request): Json<SendMessageRequest>,
) -> Result<Json<Message>, (StatusCode, String)> {
    let viewer = viewer_from_headers(&headers)?;
    let message = state
        .engine
        .send_message(viewer, id, request.body)
        .await
        .map_err(error_response)?;
    Ok(Json(message))
}

/// Mark-read response.
#[derive(Debug, Serialize)]
pub struct MarkReadResponse {
    /// Number of messages flipped to read.
    pub swept: u64,
}

/// Handle an explicit read acknowledgement.
async fn mark_read(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<ConversationId>,
) -> Result<Json<MarkReadResponse>, (StatusCode, String)> {
    let viewer = viewer_from_headers(&headers)?;
    let swept = state
        .engine
        .mark_read(viewer, id)
        .await
        .map_err(error_response)?;
    Ok(Json(MarkReadResponse { swept }))
}

/// Handle the advisory opened flag (which also acknowledges reads).
async fn mark_opened(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<ConversationId>,
) -> Result<StatusCode, (StatusCode, String)> {
    let viewer = viewer_from_headers(&headers)?;
    state
        .engine
        .mark_opened(viewer, id)
        .await
        .map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Handle archiving off the viewer's list.
async fn archive_conversation(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<ConversationId>,
) -> Result<Json<Conversation>, (StatusCode, String)> {
    let viewer = viewer_from_headers(&headers)?;
    let conversation = state
        .engine
        .archive(viewer, id)
        .await
        .map_err(error_response)?;
    Ok(Json(conversation))
}

/// Handle restoring into the viewer's list.
async fn restore_conversation(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<ConversationId>,
) -> Result<Json<Conversation>, (StatusCode, String)> {
    let viewer = viewer_from_headers(&headers)?;
    let conversation = state
        .engine
        .restore(viewer, id)
        .await
        .map_err(error_response)?;
    Ok(Json(conversation))
}

/// Delete response.
#[derive(Debug, Serialize)]
pub struct DeleteConversationResponse {
    /// Whether the thread was permanently removed (both parties had hidden
    /// it) rather than only hidden from the caller.
    pub purged: bool,
}

/// Handle per-party deletion.
async fn delete_conversation(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<ConversationId>,
) -> Result<Json<DeleteConversationResponse>, (StatusCode, String)> {
    let viewer = viewer_from_headers(&headers)?;
    let outcome = state
        .engine
        .delete(viewer, id)
        .await
        .map_err(error_response)?;
    Ok(Json(DeleteConversationResponse {
        purged: matches!(outcome, DeleteOutcome::Purged),
    }))
}

/// Reassignment request.
#[derive(Debug, Deserialize)]
pub struct ReassignRequest {
    /// The agent receiving ownership.
    pub new_agent_id: UserId,
}

/// Handle ownership transfer.
async fn reassign_conversation(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<ConversationId>,
    Json(request): Json<ReassignRequest>,
) -> Result<Json<Conversation>, (StatusCode, String)> {
    let viewer = viewer_from_headers(&headers)?;
    let conversation = state
        .engine
        .reassign(viewer, id, request.new_agent_id)
        .await
        .map_err(error_response)?;
    Ok(Json(conversation))
}

/// Unread badge response.
#[derive(Debug, Serialize)]
pub struct UnreadTotalResponse {
    /// Total unread messages across the viewer's threads.
    pub total: u64,
}

/// Handle the navigation badge count.
async fn unread_total(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<UnreadTotalResponse>, (StatusCode, String)> {
    let viewer = viewer_from_headers(&headers)?;
    let total = state
        .engine
        .unread_total(viewer)
        .await
        .map_err(error_response)?;
    Ok(Json(UnreadTotalResponse { total }))
}

/// Handle the per-conversation event stream (SSE).
///
/// The subscription's drop on disconnect leaves the room; a `lagged` frame
/// tells the client to re-fetch before trusting further events.
async fn conversation_events(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<ConversationId>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, (StatusCode, String)> {
    let viewer = viewer_from_headers(&headers)?;
    let subscription = state
        .engine
        .join_events(viewer, id)
        .await
        .map_err(error_response)?;

    let stream = futures::stream::unfold(subscription, |mut subscription| async move {
        match subscription.recv().await {
            Ok(event) => match Event::default().event(event.kind()).json_data(&event) {
                Ok(frame) => Some((Ok(frame), subscription)),
                Err(_) => None,
            },
            Err(SubscriptionLoss::Lagged(skipped)) => {
                let frame = Event::default().event("lagged").data(skipped.to_string());
                Some((Ok(frame), subscription))
            }
            Err(SubscriptionLoss::Closed) => None,
        }
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    use crate::messaging::core::ids::AgencyId;

    #[test]
    fn test_viewer_from_headers_roundtrip() {
        let user = UserId::new();
        let agency = AgencyId::new();
        let mut headers = HeaderMap::new();
        headers.insert(HEADER_USER, HeaderValue::from_str(&user.to_string()).unwrap());
        headers.insert(HEADER_ROLE, HeaderValue::from_static("agency_admin"));
        headers.insert(
            HEADER_AGENCY,
            HeaderValue::from_str(&agency.to_string()).unwrap(),
        );

        let viewer = viewer_from_headers(&headers).unwrap();
        assert_eq!(viewer.user_id, user);
        assert_eq!(viewer.role, PartyRole::AgencyAdmin);
        assert_eq!(viewer.agency_id, Some(agency));
    }

    #[test]
    fn test_viewer_from_headers_rejects_missing_identity() {
        let headers = HeaderMap::new();
        let err = viewer_from_headers(&headers).unwrap_err();
        assert_eq!(err.0, StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_viewer_from_headers_rejects_unknown_role() {
        let mut headers = HeaderMap::new();
        headers.insert(
            HEADER_USER,
            HeaderValue::from_str(&UserId::new().to_string()).unwrap(),
        );
        headers.insert(HEADER_ROLE, HeaderValue::from_static("landlord"));
        let err = viewer_from_headers(&headers).unwrap_err();
        assert_eq!(err.0, StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_error_response_status_mapping() {
        let cases = [
            (MessagingError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (MessagingError::Forbidden("x".into()), StatusCode::FORBIDDEN),
            (MessagingError::Conflict("x".into()), StatusCode::CONFLICT),
            (
                MessagingError::InvalidMessage("x".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                MessagingError::Transient("x".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(error_response(err).0, expected);
        }
    }
}
