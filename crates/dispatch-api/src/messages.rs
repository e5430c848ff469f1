use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use dispatch_core::messages;
use dispatch_types::api::{Claims, MessageListQuery, SendMessageRequest, ToggleReactionRequest};

use crate::auth::AppStateInner;
use crate::error::ApiError;

pub async fn get_messages(
    State(state): State<Arc<AppStateInner>>,
    Path(discussion_id): Path<Uuid>,
    Query(query): Query<MessageListQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let found = tokio::task::spawn_blocking(move || {
        messages::get_messages(&state.db, discussion_id, claims.sub, query.limit, query.offset)
    })
    .await??;

    Ok(Json(found))
}

pub async fn send_message(
    State(state): State<Arc<AppStateInner>>,
    Path(discussion_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let message = tokio::task::spawn_blocking(move || {
        messages::send_message(
            &state.db,
            discussion_id,
            claims.sub,
            &req.content,
            req.parent_message_id.as_deref(),
        )
    })
    .await??;

    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn delete_message(
    State(state): State<Arc<AppStateInner>>,
    Path((discussion_id, message_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    tokio::task::spawn_blocking(move || {
        messages::delete_message(&state.db, discussion_id, message_id, claims.sub)
    })
    .await??;

    Ok(Json(serde_json::json!({ "success": true })))
}

pub async fn toggle_reaction(
    State(state): State<Arc<AppStateInner>>,
    Path((discussion_id, message_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<ToggleReactionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let message = tokio::task::spawn_blocking(move || {
        messages::toggle_reaction(&state.db, discussion_id, message_id, claims.sub, &req.emoji)
    })
    .await??;

    Ok(Json(message))
}
