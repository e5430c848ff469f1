//! Database row types — these map directly to SQLite rows.
//! Distinct from the dispatch-types API models: rows are string-typed at the
//! SQL boundary and convert to typed DTOs via `into_model`, tolerating
//! corrupt values with a warning rather than failing the whole query.

use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use dispatch_types::models::{
    Discussion, DiscussionType, Message, Participant, Reaction, UserSummary,
};

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub password: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub role: String,
    pub avatar_url: Option<String>,
    pub corporate_id: Option<String>,
    pub program_ids: String,
    pub active: bool,
    pub created_at: String,
}

impl UserRow {
    pub fn summary(&self) -> UserSummary {
        UserSummary {
            id: parse_id(&self.id, "user id"),
            username: self.username.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            role: self.role.clone(),
            avatar_url: self.avatar_url.clone(),
        }
    }

    pub fn program_ids(&self) -> Vec<Uuid> {
        parse_id_list(&self.program_ids, "user program_ids")
    }
}

pub struct DiscussionRow {
    pub id: String,
    pub discussion_type: String,
    pub title: Option<String>,
    pub created_by: String,
    pub corporate_id: Option<String>,
    pub program_id: Option<String>,
    pub is_open: bool,
    pub tagged_user_ids: String,
    pub tagged_role_ids: String,
    pub last_message_id: Option<String>,
    pub last_message_at: Option<String>,
    pub archived_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl DiscussionRow {
    /// Base model without hydration; the service layer fills in
    /// participants, last message, and viewer-local state.
    pub fn into_model(self) -> Discussion {
        Discussion {
            id: parse_id(&self.id, "discussion id"),
            discussion_type: match self.discussion_type.as_str() {
                "personal" => DiscussionType::Personal,
                _ => DiscussionType::Group,
            },
            title: self.title,
            created_by: parse_id(&self.created_by, "discussion created_by"),
            corporate_id: parse_opt_id(self.corporate_id.as_deref()),
            program_id: parse_opt_id(self.program_id.as_deref()),
            is_open: self.is_open,
            tagged_user_ids: parse_id_list(&self.tagged_user_ids, "discussion tagged_user_ids"),
            tagged_role_ids: serde_json::from_str(&self.tagged_role_ids).unwrap_or_default(),
            last_message_id: parse_opt_id(self.last_message_id.as_deref()),
            last_message_at: self.last_message_at.as_deref().map(parse_ts),
            archived_at: self.archived_at.as_deref().map(parse_ts),
            created_at: parse_ts(&self.created_at),
            updated_at: parse_ts(&self.updated_at),
            participants: vec![],
            last_message: None,
            other_participant: None,
            is_pinned: false,
            is_muted: false,
            unread_count: 0,
        }
    }
}

pub struct ParticipantRow {
    pub id: String,
    pub discussion_id: String,
    pub user_id: String,
    pub joined_at: String,
    pub left_at: Option<String>,
    pub last_read_message_id: Option<String>,
    pub last_read_at: Option<String>,
    pub is_pinned: bool,
    pub is_muted: bool,
    /// Joined user display columns; absent when the query didn't join users.
    pub user: Option<UserJoin>,
}

pub struct UserJoin {
    pub username: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub role: String,
    pub avatar_url: Option<String>,
}

impl ParticipantRow {
    pub fn into_model(self) -> Participant {
        let user_id = parse_id(&self.user_id, "participant user_id");
        Participant {
            id: parse_id(&self.id, "participant id"),
            discussion_id: parse_id(&self.discussion_id, "participant discussion_id"),
            user_id,
            joined_at: parse_ts(&self.joined_at),
            left_at: self.left_at.as_deref().map(parse_ts),
            last_read_message_id: parse_opt_id(self.last_read_message_id.as_deref()),
            last_read_at: self.last_read_at.as_deref().map(parse_ts),
            is_pinned: self.is_pinned,
            is_muted: self.is_muted,
            user: self.user.map(|u| UserSummary {
                id: user_id,
                username: u.username,
                first_name: u.first_name,
                last_name: u.last_name,
                role: u.role,
                avatar_url: u.avatar_url,
            }),
        }
    }
}

pub struct MessageRow {
    pub id: String,
    pub discussion_id: String,
    pub content: String,
    pub parent_message_id: Option<String>,
    pub author_id: String,
    pub read_by: String,
    pub reactions: String,
    pub deleted_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub author: Option<UserJoin>,
}

impl MessageRow {
    pub fn into_model(self) -> Message {
        let author_id = parse_id(&self.author_id, "message author_id");
        Message {
            id: parse_id(&self.id, "message id"),
            discussion_id: parse_id(&self.discussion_id, "message discussion_id"),
            content: self.content,
            parent_message_id: parse_opt_id(self.parent_message_id.as_deref()),
            author_id,
            read_by: parse_id_list(&self.read_by, "message read_by"),
            reactions: parse_reactions(&self.reactions),
            deleted_at: self.deleted_at.as_deref().map(parse_ts),
            created_at: parse_ts(&self.created_at),
            updated_at: parse_ts(&self.updated_at),
            author: self.author.map(|u| UserSummary {
                id: author_id,
                username: u.username,
                first_name: u.first_name,
                last_name: u.last_name,
                role: u.role,
                avatar_url: u.avatar_url,
            }),
            parent_message: None,
        }
    }
}

pub fn parse_id(raw: &str, what: &str) -> Uuid {
    raw.parse().unwrap_or_else(|e| {
        warn!("Corrupt {} '{}': {}", what, raw, e);
        Uuid::default()
    })
}

pub fn parse_opt_id(raw: Option<&str>) -> Option<Uuid> {
    raw.and_then(|s| s.parse().ok())
}

pub fn parse_ts(raw: &str) -> DateTime<Utc> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            // SQLite datetime('now') defaults lack a timezone suffix.
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt timestamp '{}': {}", raw, e);
            DateTime::default()
        })
}

pub fn parse_id_list(raw: &str, what: &str) -> Vec<Uuid> {
    serde_json::from_str(raw).unwrap_or_else(|e| {
        warn!("Corrupt {} '{}': {}", what, raw, e);
        vec![]
    })
}

pub fn parse_reactions(raw: &str) -> Vec<Reaction> {
    serde_json::from_str(raw).unwrap_or_else(|e| {
        warn!("Corrupt reactions '{}': {}", raw, e);
        vec![]
    })
}
