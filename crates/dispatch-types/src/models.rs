use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Discussion classification, derived from the final participant count at
/// creation time: exactly two participants make a personal discussion,
/// anything else is a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscussionType {
    Personal,
    Group,
}

impl DiscussionType {
    pub fn for_participant_count(count: usize) -> Self {
        if count == 2 {
            Self::Personal
        } else {
            Self::Group
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Personal => "personal",
            Self::Group => "group",
        }
    }
}

/// User display info attached to participants, authors, and the
/// `other_participant` of a personal discussion. Users are owned by the
/// accounts layer; this subsystem only reads them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: Uuid,
    pub username: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub role: String,
    pub avatar_url: Option<String>,
}

/// A single emoji reaction. Each (user_id, emoji) pair appears at most once
/// per message; toggling removes it if present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reaction {
    pub emoji: String,
    pub user_id: Uuid,
    pub reacted_at: DateTime<Utc>,
}

/// A user's membership record in a discussion, including their private
/// pin/mute/read state. Leaving sets `left_at` rather than deleting the row.
#[derive(Debug, Clone, Serialize)]
pub struct Participant {
    pub id: Uuid,
    pub discussion_id: Uuid,
    pub user_id: Uuid,
    pub joined_at: DateTime<Utc>,
    pub left_at: Option<DateTime<Utc>>,
    pub last_read_message_id: Option<Uuid>,
    pub last_read_at: Option<DateTime<Utc>>,
    pub is_pinned: bool,
    pub is_muted: bool,
    pub user: Option<UserSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub id: Uuid,
    pub discussion_id: Uuid,
    pub content: String,
    pub parent_message_id: Option<Uuid>,
    pub author_id: Uuid,
    pub read_by: Vec<Uuid>,
    pub reactions: Vec<Reaction>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub author: Option<UserSummary>,
    /// Present when this message is a reply and the parent is hydrated.
    pub parent_message: Option<Box<Message>>,
}

/// A conversation shell. Archived discussions (`archived_at` set) are the
/// losers of duplicate merges; they are kept for audit, never hard-deleted.
#[derive(Debug, Clone, Serialize)]
pub struct Discussion {
    pub id: Uuid,
    pub discussion_type: DiscussionType,
    pub title: Option<String>,
    pub created_by: Uuid,
    pub corporate_id: Option<Uuid>,
    pub program_id: Option<Uuid>,
    pub is_open: bool,
    pub tagged_user_ids: Vec<Uuid>,
    pub tagged_role_ids: Vec<String>,
    pub last_message_id: Option<Uuid>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub archived_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub participants: Vec<Participant>,
    pub last_message: Option<Message>,
    /// For personal discussions: the one active participant who isn't the
    /// requesting user.
    pub other_participant: Option<UserSummary>,
    /// The requesting user's own flags for this discussion.
    pub is_pinned: bool,
    pub is_muted: bool,
    pub unread_count: usize,
}

/// Role-derived visibility policy, computed by the route layer and passed
/// into the aggregator as an opaque input. Discussions carrying no scoping
/// tags pass every scope.
#[derive(Debug, Clone, PartialEq)]
pub enum AccessScope {
    /// Top administrative role: sees everything.
    All,
    /// Tenant admin: sees discussions tagged with their corporate ID.
    Corporate(Uuid),
    /// Program-level roles: see discussions tagged with one of their programs.
    Programs(Vec<Uuid>),
}

impl AccessScope {
    pub fn allows(&self, corporate_id: Option<Uuid>, program_id: Option<Uuid>) -> bool {
        // Untagged discussions are plain member conversations.
        if corporate_id.is_none() && program_id.is_none() {
            return true;
        }
        match self {
            Self::All => true,
            Self::Corporate(own) => corporate_id == Some(*own),
            Self::Programs(own) => program_id.map_or(false, |p| own.contains(&p)),
        }
    }
}
