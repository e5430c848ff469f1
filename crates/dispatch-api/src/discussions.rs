use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::warn;
use uuid::Uuid;

use dispatch_core::{cleanup, discussions, lifecycle};
use dispatch_db::Database;
use dispatch_db::models::parse_opt_id;
use dispatch_types::api::{
    Claims, CleanupResponse, CreateDiscussionRequest, DiscussionListQuery, MarkReadRequest,
    MuteRequest, PinRequest,
};
use dispatch_types::models::AccessScope;

use crate::auth::AppStateInner;
use crate::error::ApiError;

/// Role-based visibility for the discussion list. The top administrative
/// role sees everything; tenant admins are scoped to their tenant; everyone
/// else to their program list.
fn access_scope_for(db: &Database, claims: &Claims) -> AccessScope {
    let user = db.get_user_by_id(&claims.sub.to_string()).unwrap_or_else(|e| {
        warn!("User lookup failed for {}: {}", claims.sub, e);
        None
    });

    match user {
        Some(u) => match u.role.as_str() {
            "super_admin" => AccessScope::All,
            "corporate_admin" => match parse_opt_id(u.corporate_id.as_deref()) {
                Some(corporate) => AccessScope::Corporate(corporate),
                None => AccessScope::Programs(u.program_ids()),
            },
            _ => AccessScope::Programs(u.program_ids()),
        },
        None if claims.role == "super_admin" => AccessScope::All,
        None => AccessScope::Programs(vec![]),
    }
}

pub async fn list_discussions(
    State(state): State<Arc<AppStateInner>>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<DiscussionListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let found = tokio::task::spawn_blocking(move || {
        let scope = access_scope_for(&state.db, &claims);
        discussions::get_discussions(&state.db, claims.sub, query.discussion_type, &scope)
    })
    .await??;

    Ok(Json(found))
}

pub async fn get_discussion(
    State(state): State<Arc<AppStateInner>>,
    Path(discussion_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let discussion = tokio::task::spawn_blocking(move || {
        discussions::get_discussion(&state.db, claims.sub, discussion_id)
    })
    .await??;

    Ok(Json(discussion))
}

/// 201 when a discussion was actually created, 200 when an existing one with
/// the same participant set was reused.
pub async fn create_discussion(
    State(state): State<Arc<AppStateInner>>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateDiscussionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (discussion, created) = tokio::task::spawn_blocking(move || {
        discussions::create_discussion(&state.db, claims.sub, &req)
    })
    .await??;

    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(discussion)))
}

/// Delete-for-self: soft-leaves the discussion, which persists for everyone
/// else.
pub async fn leave_discussion(
    State(state): State<Arc<AppStateInner>>,
    Path(discussion_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    tokio::task::spawn_blocking(move || {
        lifecycle::leave_discussion(&state.db, discussion_id, claims.sub)
    })
    .await??;

    Ok(Json(serde_json::json!({ "success": true })))
}

pub async fn set_pinned(
    State(state): State<Arc<AppStateInner>>,
    Path(discussion_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<PinRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let pinned = req.pinned;
    tokio::task::spawn_blocking(move || {
        lifecycle::set_pinned(&state.db, discussion_id, claims.sub, pinned)
    })
    .await??;

    Ok(Json(serde_json::json!({ "pinned": pinned })))
}

pub async fn set_muted(
    State(state): State<Arc<AppStateInner>>,
    Path(discussion_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<MuteRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let muted = req.muted;
    tokio::task::spawn_blocking(move || {
        lifecycle::set_muted(&state.db, discussion_id, claims.sub, muted)
    })
    .await??;

    Ok(Json(serde_json::json!({ "muted": muted })))
}

pub async fn mark_read(
    State(state): State<Arc<AppStateInner>>,
    Path(discussion_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<MarkReadRequest>,
) -> Result<impl IntoResponse, ApiError> {
    tokio::task::spawn_blocking(move || {
        lifecycle::mark_read(&state.db, discussion_id, claims.sub, req.message_id)
    })
    .await??;

    Ok(Json(serde_json::json!({ "success": true })))
}

pub async fn cleanup_duplicates(
    State(state): State<Arc<AppStateInner>>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let report = tokio::task::spawn_blocking(move || {
        cleanup::cleanup_duplicate_discussions(&state.db, claims.sub)
    })
    .await??;

    Ok(Json(CleanupResponse {
        merged: report.merged,
        deleted: report.deleted,
        errors: report.errors,
    }))
}
