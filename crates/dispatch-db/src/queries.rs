use crate::models::{DiscussionRow, MessageRow, ParticipantRow, UserJoin, UserRow};
use crate::{Database, now_ts};
use anyhow::Result;
use rusqlite::Connection;

const PARTICIPANT_COLS: &str = "p.id, p.discussion_id, p.user_id, p.joined_at, p.left_at, \
     p.last_read_message_id, p.last_read_at, p.is_pinned, p.is_muted";

const MESSAGE_COLS: &str = "m.id, m.discussion_id, m.content, m.parent_message_id, m.author_id, \
     m.read_by, m.reactions, m.deleted_at, m.created_at, m.updated_at";

impl Database {
    // -- Users --

    pub fn create_user(
        &self,
        id: &str,
        username: &str,
        password_hash: &str,
        first_name: Option<&str>,
        last_name: Option<&str>,
        role: &str,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, password, first_name, last_name, role, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![id, username, password_hash, first_name, last_name, role, now_ts()],
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username = ?1", username))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id = ?1", id))
    }

    /// Active users whose username or first name contains `fragment`
    /// (case-insensitive). Candidate narrowing only — callers decide final
    /// inclusion.
    pub fn search_active_users(&self, fragment: &str) -> Result<Vec<UserRow>> {
        let pattern = format!("%{}%", fragment.to_lowercase());
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, username, password, first_name, last_name, role, avatar_url,
                        corporate_id, program_ids, active, created_at
                 FROM users
                 WHERE active = 1
                   AND (lower(username) LIKE ?1 OR lower(first_name) LIKE ?1)",
            )?;
            let rows = stmt
                .query_map([&pattern], user_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Discussions --

    pub fn insert_discussion(&self, row: &DiscussionRow) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO discussions (id, discussion_type, title, created_by, corporate_id,
                     program_id, is_open, tagged_user_ids, tagged_role_ids, last_message_id,
                     last_message_at, archived_at, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                rusqlite::params![
                    row.id,
                    row.discussion_type,
                    row.title,
                    row.created_by,
                    row.corporate_id,
                    row.program_id,
                    row.is_open,
                    row.tagged_user_ids,
                    row.tagged_role_ids,
                    row.last_message_id,
                    row.last_message_at,
                    row.archived_at,
                    row.created_at,
                    row.updated_at,
                ],
            )?;
            Ok(())
        })
    }

    /// Hard delete — only used to roll back a half-created discussion whose
    /// participant rows failed to insert.
    pub fn delete_discussion(&self, id: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute("DELETE FROM discussion_participants WHERE discussion_id = ?1", [id])?;
            conn.execute("DELETE FROM discussions WHERE id = ?1", [id])?;
            Ok(())
        })
    }

    pub fn get_discussion(&self, id: &str) -> Result<Option<DiscussionRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {DISCUSSION_COLS} FROM discussions WHERE id = ?1"
            ))?;
            stmt.query_row([id], discussion_from_row).optional()
        })
    }

    /// Batch-fetch non-archived discussions by ID.
    pub fn get_discussions_by_ids(&self, ids: &[String]) -> Result<Vec<DiscussionRow>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT {DISCUSSION_COLS} FROM discussions
                 WHERE archived_at IS NULL AND id IN ({})",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let params: Vec<&dyn rusqlite::types::ToSql> =
                ids.iter().map(|id| id as &dyn rusqlite::types::ToSql).collect();

            let rows = stmt
                .query_map(params.as_slice(), discussion_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn set_last_message(&self, discussion_id: &str, message_id: &str, at: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE discussions
                 SET last_message_id = ?2, last_message_at = ?3, updated_at = ?3
                 WHERE id = ?1",
                rusqlite::params![discussion_id, message_id, at],
            )?;
            Ok(())
        })
    }

    pub fn archive_discussion(&self, id: &str, at: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE discussions SET archived_at = ?2, updated_at = ?2 WHERE id = ?1",
                rusqlite::params![id, at],
            )?;
            Ok(())
        })
    }

    // -- Participants --

    pub fn insert_participant(&self, row: &ParticipantRow) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO discussion_participants (id, discussion_id, user_id, joined_at,
                     left_at, last_read_message_id, last_read_at, is_pinned, is_muted)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                rusqlite::params![
                    row.id,
                    row.discussion_id,
                    row.user_id,
                    row.joined_at,
                    row.left_at,
                    row.last_read_message_id,
                    row.last_read_at,
                    row.is_pinned,
                    row.is_muted,
                ],
            )?;
            Ok(())
        })
    }

    /// IDs of discussions where the user holds an active membership.
    pub fn active_discussion_ids_for_user(&self, user_id: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT discussion_id FROM discussion_participants
                 WHERE user_id = ?1 AND left_at IS NULL",
            )?;
            let rows = stmt
                .query_map([user_id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Active participants of a discussion, joined to user display info.
    pub fn active_participants(&self, discussion_id: &str) -> Result<Vec<ParticipantRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {PARTICIPANT_COLS},
                        u.username, u.first_name, u.last_name, u.role, u.avatar_url
                 FROM discussion_participants p
                 LEFT JOIN users u ON p.user_id = u.id
                 WHERE p.discussion_id = ?1 AND p.left_at IS NULL
                 ORDER BY p.joined_at",
            ))?;
            let rows = stmt
                .query_map([discussion_id], participant_with_user_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Just the active participant user IDs — enough for set comparison.
    pub fn active_participant_user_ids(&self, discussion_id: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id FROM discussion_participants
                 WHERE discussion_id = ?1 AND left_at IS NULL",
            )?;
            let rows = stmt
                .query_map([discussion_id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn get_active_participant(
        &self,
        discussion_id: &str,
        user_id: &str,
    ) -> Result<Option<ParticipantRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {PARTICIPANT_COLS} FROM discussion_participants p
                 WHERE p.discussion_id = ?1 AND p.user_id = ?2 AND p.left_at IS NULL",
            ))?;
            stmt.query_row([discussion_id, user_id], participant_from_row)
                .optional()
        })
    }

    /// Returns the number of rows updated — zero means no active membership.
    pub fn set_participant_pinned(
        &self,
        discussion_id: &str,
        user_id: &str,
        pinned: bool,
    ) -> Result<usize> {
        self.update_participant(
            "is_pinned = ?3",
            rusqlite::params![discussion_id, user_id, pinned],
        )
    }

    pub fn set_participant_muted(
        &self,
        discussion_id: &str,
        user_id: &str,
        muted: bool,
    ) -> Result<usize> {
        self.update_participant(
            "is_muted = ?3",
            rusqlite::params![discussion_id, user_id, muted],
        )
    }

    pub fn set_participant_read(
        &self,
        discussion_id: &str,
        user_id: &str,
        message_id: &str,
        at: &str,
    ) -> Result<usize> {
        self.update_participant(
            "last_read_message_id = ?3, last_read_at = ?4",
            rusqlite::params![discussion_id, user_id, message_id, at],
        )
    }

    pub fn set_participant_left(
        &self,
        discussion_id: &str,
        user_id: &str,
        at: &str,
    ) -> Result<usize> {
        self.update_participant(
            "left_at = ?3",
            rusqlite::params![discussion_id, user_id, at],
        )
    }

    /// Shared body of the participant mutators. Params are always
    /// (?1 discussion_id, ?2 user_id, ?3.. assignment values); only the
    /// caller's own active row can match.
    fn update_participant(
        &self,
        assignments: &str,
        params: &[&dyn rusqlite::types::ToSql],
    ) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let sql = format!(
                "UPDATE discussion_participants SET {assignments}
                 WHERE discussion_id = ?1 AND user_id = ?2 AND left_at IS NULL"
            );
            let n = conn.execute(&sql, params)?;
            Ok(n)
        })
    }

    // -- Messages --

    pub fn insert_message(&self, row: &MessageRow) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO discussion_messages (id, discussion_id, content, parent_message_id,
                     author_id, read_by, reactions, deleted_at, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                rusqlite::params![
                    row.id,
                    row.discussion_id,
                    row.content,
                    row.parent_message_id,
                    row.author_id,
                    row.read_by,
                    row.reactions,
                    row.deleted_at,
                    row.created_at,
                    row.updated_at,
                ],
            )?;
            Ok(())
        })
    }

    /// Fetch one message (deleted or not), joined to its author.
    pub fn get_message(&self, id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLS},
                        u.username, u.first_name, u.last_name, u.role, u.avatar_url
                 FROM discussion_messages m
                 LEFT JOIN users u ON m.author_id = u.id
                 WHERE m.id = ?1",
            ))?;
            stmt.query_row([id], message_with_author_from_row).optional()
        })
    }

    /// Non-deleted messages of a discussion in chronological order.
    pub fn get_messages(
        &self,
        discussion_id: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLS},
                        u.username, u.first_name, u.last_name, u.role, u.avatar_url
                 FROM discussion_messages m
                 LEFT JOIN users u ON m.author_id = u.id
                 WHERE m.discussion_id = ?1 AND m.deleted_at IS NULL
                 ORDER BY m.created_at
                 LIMIT ?2 OFFSET ?3",
            ))?;
            let rows = stmt
                .query_map(
                    rusqlite::params![discussion_id, limit, offset],
                    message_with_author_from_row,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Most recent non-deleted message of a discussion, with author.
    pub fn latest_message(&self, discussion_id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLS},
                        u.username, u.first_name, u.last_name, u.role, u.avatar_url
                 FROM discussion_messages m
                 LEFT JOIN users u ON m.author_id = u.id
                 WHERE m.discussion_id = ?1 AND m.deleted_at IS NULL
                 ORDER BY m.created_at DESC
                 LIMIT 1",
            ))?;
            stmt.query_row([discussion_id], message_with_author_from_row)
                .optional()
        })
    }

    /// Distinct discussions the user has authored messages in. Fallback for
    /// memberships that went missing relative to message authorship.
    pub fn authored_discussion_ids(&self, user_id: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT discussion_id FROM discussion_messages WHERE author_id = ?1",
            )?;
            let rows = stmt
                .query_map([user_id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Toggle a reaction inside a single critical section: read the stored
    /// list, flip the (user, emoji) entry, write it back. Returns the updated
    /// JSON, or None when the message doesn't exist.
    pub fn toggle_message_reaction(
        &self,
        message_id: &str,
        user_id: &str,
        emoji: &str,
        at: &str,
    ) -> Result<Option<String>> {
        self.with_conn_mut(|conn| {
            let stored: Option<String> = conn
                .query_row(
                    "SELECT reactions FROM discussion_messages WHERE id = ?1",
                    [message_id],
                    |row| row.get(0),
                )
                .optional()?;

            let Some(stored) = stored else {
                return Ok(None);
            };

            let mut reactions: Vec<serde_json::Value> =
                serde_json::from_str(&stored).unwrap_or_default();

            let before = reactions.len();
            reactions.retain(|r| {
                !(r.get("user_id").and_then(|v| v.as_str()) == Some(user_id)
                    && r.get("emoji").and_then(|v| v.as_str()) == Some(emoji))
            });
            if reactions.len() == before {
                reactions.push(serde_json::json!({
                    "emoji": emoji,
                    "user_id": user_id,
                    "reacted_at": at,
                }));
            }

            let updated = serde_json::to_string(&reactions)?;
            conn.execute(
                "UPDATE discussion_messages SET reactions = ?2, updated_at = ?3 WHERE id = ?1",
                rusqlite::params![message_id, updated, at],
            )?;
            Ok(Some(updated))
        })
    }

    /// Append a user to a message's read_by list if not already present.
    pub fn add_message_reader(&self, message_id: &str, user_id: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            let stored: Option<String> = conn
                .query_row(
                    "SELECT read_by FROM discussion_messages WHERE id = ?1",
                    [message_id],
                    |row| row.get(0),
                )
                .optional()?;

            let Some(stored) = stored else {
                return Ok(());
            };

            let mut read_by: Vec<String> = serde_json::from_str(&stored).unwrap_or_default();
            if read_by.iter().any(|id| id == user_id) {
                return Ok(());
            }
            read_by.push(user_id.to_string());

            conn.execute(
                "UPDATE discussion_messages SET read_by = ?2 WHERE id = ?1",
                rusqlite::params![message_id, serde_json::to_string(&read_by)?],
            )?;
            Ok(())
        })
    }

    /// Returns the number of rows updated; zero means missing or already deleted.
    pub fn set_message_deleted(&self, message_id: &str, at: &str) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "UPDATE discussion_messages SET deleted_at = ?2, updated_at = ?2
                 WHERE id = ?1 AND deleted_at IS NULL",
                rusqlite::params![message_id, at],
            )?;
            Ok(n)
        })
    }

    /// Move every message of one discussion to another (duplicate merge).
    pub fn repoint_messages(&self, from_discussion: &str, to_discussion: &str) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "UPDATE discussion_messages SET discussion_id = ?2 WHERE discussion_id = ?1",
                rusqlite::params![from_discussion, to_discussion],
            )?;
            Ok(n)
        })
    }

    /// Non-deleted messages newer than `since` (all of them when None),
    /// excluding the user's own.
    pub fn count_unread(
        &self,
        discussion_id: &str,
        user_id: &str,
        since: Option<&str>,
    ) -> Result<i64> {
        self.with_conn(|conn| {
            let n = conn.query_row(
                "SELECT COUNT(*) FROM discussion_messages
                 WHERE discussion_id = ?1 AND deleted_at IS NULL AND author_id != ?2
                   AND (?3 IS NULL OR created_at > ?3)",
                rusqlite::params![discussion_id, user_id, since],
                |row| row.get(0),
            )?;
            Ok(n)
        })
    }
}

const DISCUSSION_COLS: &str = "id, discussion_type, title, created_by, corporate_id, program_id, \
     is_open, tagged_user_ids, tagged_role_ids, last_message_id, last_message_at, archived_at, \
     created_at, updated_at";

fn query_user(conn: &Connection, predicate: &str, param: &str) -> Result<Option<UserRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT id, username, password, first_name, last_name, role, avatar_url,
                corporate_id, program_ids, active, created_at
         FROM users WHERE {predicate}"
    ))?;
    stmt.query_row([param], user_from_row).optional()
}

fn user_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        password: row.get(2)?,
        first_name: row.get(3)?,
        last_name: row.get(4)?,
        role: row.get(5)?,
        avatar_url: row.get(6)?,
        corporate_id: row.get(7)?,
        program_ids: row.get(8)?,
        active: row.get(9)?,
        created_at: row.get(10)?,
    })
}

fn discussion_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DiscussionRow> {
    Ok(DiscussionRow {
        id: row.get(0)?,
        discussion_type: row.get(1)?,
        title: row.get(2)?,
        created_by: row.get(3)?,
        corporate_id: row.get(4)?,
        program_id: row.get(5)?,
        is_open: row.get(6)?,
        tagged_user_ids: row.get(7)?,
        tagged_role_ids: row.get(8)?,
        last_message_id: row.get(9)?,
        last_message_at: row.get(10)?,
        archived_at: row.get(11)?,
        created_at: row.get(12)?,
        updated_at: row.get(13)?,
    })
}

fn participant_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ParticipantRow> {
    Ok(ParticipantRow {
        id: row.get(0)?,
        discussion_id: row.get(1)?,
        user_id: row.get(2)?,
        joined_at: row.get(3)?,
        left_at: row.get(4)?,
        last_read_message_id: row.get(5)?,
        last_read_at: row.get(6)?,
        is_pinned: row.get(7)?,
        is_muted: row.get(8)?,
        user: None,
    })
}

fn participant_with_user_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ParticipantRow> {
    let mut participant = participant_from_row(row)?;
    participant.user = user_join_from_row(row, 9)?;
    Ok(participant)
}

fn message_with_author_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        discussion_id: row.get(1)?,
        content: row.get(2)?,
        parent_message_id: row.get(3)?,
        author_id: row.get(4)?,
        read_by: row.get(5)?,
        reactions: row.get(6)?,
        deleted_at: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
        author: user_join_from_row(row, 10)?,
    })
}

/// Joined user columns starting at `base`; None when the LEFT JOIN missed.
fn user_join_from_row(row: &rusqlite::Row<'_>, base: usize) -> rusqlite::Result<Option<UserJoin>> {
    let username: Option<String> = row.get(base)?;
    Ok(username.map(|username| UserJoin {
        username,
        first_name: row.get(base + 1).ok().flatten(),
        last_name: row.get(base + 2).ok().flatten(),
        role: row.get::<_, Option<String>>(base + 3).ok().flatten().unwrap_or_default(),
        avatar_url: row.get(base + 4).ok().flatten(),
    }))
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
