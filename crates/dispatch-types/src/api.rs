use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::DiscussionType;

// -- JWT Claims --

/// JWT claims shared between the REST middleware and the auth endpoints.
/// Canonical definition lives here in dispatch-types.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub role: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub user_id: Uuid,
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user_id: Uuid,
    pub username: String,
    pub token: String,
}

// -- Discussions --

#[derive(Debug, Default, Deserialize)]
pub struct CreateDiscussionRequest {
    /// Advisory only — the actual type is derived from the final
    /// participant count.
    pub discussion_type: Option<DiscussionType>,
    pub title: Option<String>,
    pub participant_ids: Vec<Uuid>,
    pub corporate_id: Option<Uuid>,
    pub program_id: Option<Uuid>,
    #[serde(default)]
    pub is_open: bool,
    #[serde(default)]
    pub tagged_user_ids: Vec<Uuid>,
    #[serde(default)]
    pub tagged_role_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct DiscussionListQuery {
    #[serde(rename = "type")]
    pub discussion_type: Option<DiscussionType>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PinRequest {
    pub pinned: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MuteRequest {
    pub muted: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MarkReadRequest {
    pub message_id: Uuid,
}

// -- Messages --

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
    /// Blank or missing means a top-level message.
    pub parent_message_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MessageListQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

fn default_limit() -> u32 {
    50
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToggleReactionRequest {
    pub emoji: String,
}

// -- Maintenance --

#[derive(Debug, Serialize)]
pub struct CleanupResponse {
    pub merged: usize,
    pub deleted: usize,
    pub errors: Vec<String>,
}
