//! Message sending, listing, soft deletion, and reaction toggling.

use std::collections::HashMap;

use tracing::warn;
use uuid::Uuid;

use dispatch_db::models::{MessageRow, ParticipantRow};
use dispatch_db::{Database, now_ts};
use dispatch_types::models::Message;

use crate::{Error, Result, mentions};

const MAX_PAGE_SIZE: u32 = 200;

/// Non-deleted messages of a discussion in chronological order, hydrated
/// with author and (for replies) parent. Requires active membership.
pub fn get_messages(
    db: &Database,
    discussion_id: Uuid,
    user_id: Uuid,
    limit: u32,
    offset: u32,
) -> Result<Vec<Message>> {
    require_participant(db, discussion_id, user_id)?;

    let rows = db.get_messages(
        &discussion_id.to_string(),
        limit.min(MAX_PAGE_SIZE),
        offset,
    )?;

    let mut parents: HashMap<Uuid, Message> = HashMap::new();
    let mut messages = Vec::with_capacity(rows.len());
    for row in rows {
        let mut message = row.into_model();
        if let Some(parent_id) = message.parent_message_id {
            let parent = match parents.get(&parent_id) {
                Some(cached) => Some(cached.clone()),
                None => {
                    let fetched = db
                        .get_message(&parent_id.to_string())?
                        .map(|r| r.into_model());
                    if let Some(p) = &fetched {
                        parents.insert(parent_id, p.clone());
                    }
                    fetched
                }
            };
            message.parent_message = parent.map(Box::new);
        }
        messages.push(message);
    }

    Ok(messages)
}

/// Send a message. Mentioned users who aren't participants yet are admitted
/// on a best-effort basis; a failure there never blocks the message itself.
pub fn send_message(
    db: &Database,
    discussion_id: Uuid,
    author_id: Uuid,
    content: &str,
    parent_message_id: Option<&str>,
) -> Result<Message> {
    if content.trim().is_empty() {
        return Err(Error::Validation("message content must not be empty".into()));
    }

    let did = discussion_id.to_string();
    db.get_discussion(&did)?.ok_or(Error::NotFound("discussion"))?;
    require_participant(db, discussion_id, author_id)?;

    // Blank or missing parent means a top-level message.
    let parent_id = match parent_message_id.map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => Some(
            raw.parse::<Uuid>()
                .map_err(|_| Error::Validation(format!("invalid parent_message_id '{raw}'")))?,
        ),
        None => None,
    };

    admit_mentioned_users(db, discussion_id, author_id, content);

    let message_id = Uuid::new_v4();
    let now = now_ts();
    db.insert_message(&MessageRow {
        id: message_id.to_string(),
        discussion_id: did.clone(),
        content: content.to_string(),
        parent_message_id: parent_id.map(|p| p.to_string()),
        author_id: author_id.to_string(),
        // The sender has implicitly read their own message.
        read_by: serde_json::to_string(&[author_id.to_string()]).map_err(anyhow::Error::from)?,
        reactions: "[]".to_string(),
        deleted_at: None,
        created_at: now.clone(),
        updated_at: now.clone(),
        author: None,
    })?;

    db.set_last_message(&did, &message_id.to_string(), &now)?;

    hydrate_message(db, message_id)
}

/// Soft-delete a message. Author-only; a missing or already-deleted message
/// is "not found" so clients can distinguish it from "not yours".
pub fn delete_message(
    db: &Database,
    discussion_id: Uuid,
    message_id: Uuid,
    caller_id: Uuid,
) -> Result<()> {
    let row = db
        .get_message(&message_id.to_string())?
        .filter(|r| r.discussion_id == discussion_id.to_string() && r.deleted_at.is_none())
        .ok_or(Error::NotFound("message"))?;

    if row.author_id != caller_id.to_string() {
        return Err(Error::Forbidden);
    }

    let updated = db.set_message_deleted(&message_id.to_string(), &now_ts())?;
    if updated == 0 {
        return Err(Error::NotFound("message"));
    }
    Ok(())
}

/// Toggle an emoji reaction for a user: removes the (user, emoji) entry if
/// present, appends it otherwise. Returns the updated message.
pub fn toggle_reaction(
    db: &Database,
    discussion_id: Uuid,
    message_id: Uuid,
    user_id: Uuid,
    emoji: &str,
) -> Result<Message> {
    if emoji.trim().is_empty() {
        return Err(Error::Validation("emoji must not be empty".into()));
    }

    db.get_message(&message_id.to_string())?
        .filter(|r| r.discussion_id == discussion_id.to_string())
        .ok_or(Error::NotFound("message"))?;

    db.toggle_message_reaction(
        &message_id.to_string(),
        &user_id.to_string(),
        emoji,
        &now_ts(),
    )?
    .ok_or(Error::NotFound("message"))?;

    hydrate_message(db, message_id)
}

/// Resolve mentions and admit any resolved user who isn't an active
/// participant. Failures are logged and swallowed: auto-join is best-effort.
fn admit_mentioned_users(db: &Database, discussion_id: Uuid, author_id: Uuid, content: &str) {
    let mentioned = match mentions::find_mentioned_users(db, content, author_id) {
        Ok(found) => found,
        Err(e) => {
            warn!("Mention resolution failed in discussion {}: {}", discussion_id, e);
            return;
        }
    };
    if mentioned.is_empty() {
        return;
    }

    let did = discussion_id.to_string();
    let current: Vec<String> = match db.active_participant_user_ids(&did) {
        Ok(ids) => ids,
        Err(e) => {
            warn!("Participant lookup failed in discussion {}: {}", discussion_id, e);
            return;
        }
    };

    for user_id in mentioned {
        if current.iter().any(|id| *id == user_id.to_string()) {
            continue;
        }
        let row = ParticipantRow {
            id: Uuid::new_v4().to_string(),
            discussion_id: did.clone(),
            user_id: user_id.to_string(),
            joined_at: now_ts(),
            left_at: None,
            last_read_message_id: None,
            last_read_at: None,
            is_pinned: false,
            is_muted: false,
            user: None,
        };
        if let Err(e) = db.insert_participant(&row) {
            warn!(
                "Could not admit mentioned user {} to discussion {}: {}",
                user_id, discussion_id, e
            );
        }
    }
}

fn require_participant(db: &Database, discussion_id: Uuid, user_id: Uuid) -> Result<()> {
    db.get_active_participant(&discussion_id.to_string(), &user_id.to_string())?
        .ok_or(Error::NotParticipant)?;
    Ok(())
}

/// A message with author details and, when it's a reply, its parent.
fn hydrate_message(db: &Database, message_id: Uuid) -> Result<Message> {
    let mut message = db
        .get_message(&message_id.to_string())?
        .ok_or(Error::NotFound("message"))?
        .into_model();

    if let Some(parent_id) = message.parent_message_id {
        message.parent_message = db
            .get_message(&parent_id.to_string())?
            .map(|r| Box::new(r.into_model()));
    }

    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discussions::create_discussion;
    use crate::testutil::{seed_user, test_db};
    use dispatch_types::api::CreateDiscussionRequest;
    use dispatch_types::models::AccessScope;

    fn setup_pair(db: &Database) -> (Uuid, Uuid, Uuid) {
        let a = seed_user(db, "ann", "Ann");
        let b = seed_user(db, "ben", "Ben");
        let req = CreateDiscussionRequest {
            participant_ids: vec![b],
            ..Default::default()
        };
        let (discussion, _) = create_discussion(db, a, &req).unwrap();
        (a, b, discussion.id)
    }

    #[test]
    fn rejects_empty_content_and_non_participants() {
        let db = test_db();
        let (a, _b, discussion) = setup_pair(&db);
        let outsider = seed_user(&db, "outsider", "Out");

        assert!(matches!(
            send_message(&db, discussion, a, "   ", None),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            send_message(&db, discussion, outsider, "hi", None),
            Err(Error::NotParticipant)
        ));
    }

    #[test]
    fn send_updates_summary_pointer_and_seeds_read_by() {
        let db = test_db();
        let (a, _b, discussion) = setup_pair(&db);

        let message = send_message(&db, discussion, a, "hello", None).unwrap();
        assert_eq!(message.read_by, vec![a]);
        assert!(message.reactions.is_empty());
        assert_eq!(message.author.as_ref().unwrap().id, a);

        let row = db.get_discussion(&discussion.to_string()).unwrap().unwrap();
        assert_eq!(row.last_message_id, Some(message.id.to_string()));
        assert!(row.last_message_at.is_some());
    }

    #[test]
    fn reply_normalizes_blank_parent_and_hydrates_real_one() {
        let db = test_db();
        let (a, b, discussion) = setup_pair(&db);

        let top = send_message(&db, discussion, a, "top", Some("  ")).unwrap();
        assert!(top.parent_message_id.is_none());

        let top_id = top.id.to_string();
        let reply = send_message(&db, discussion, b, "reply", Some(top_id.as_str())).unwrap();
        assert_eq!(reply.parent_message_id, Some(top.id));
        let parent = reply.parent_message.expect("hydrated parent");
        assert_eq!(parent.id, top.id);
        assert_eq!(parent.author.unwrap().id, a);
    }

    #[test]
    fn mention_admits_new_participant_but_not_substring_matches() {
        let db = test_db();
        let (a, _b, discussion) = setup_pair(&db);
        let carol = seed_user(&db, "carol", "Caroline");
        seed_user(&db, "bobby", "Bobby");

        // Mentioning an existing participant changes nothing
        send_message(&db, discussion, a, "hi @Ben", None).unwrap();
        let ids = db.active_participant_user_ids(&discussion.to_string()).unwrap();
        assert_eq!(ids.len(), 2);

        // @carol admits carol; @bob matches nobody (bobby is a substring)
        send_message(&db, discussion, a, "hi @carol and @bob", None).unwrap();
        let ids = db.active_participant_user_ids(&discussion.to_string()).unwrap();
        assert_eq!(ids.len(), 3);
        assert!(ids.contains(&carol.to_string()));

        // The newcomer now sees the discussion in their list
        let listed =
            crate::discussions::get_discussions(&db, carol, None, &AccessScope::All).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, discussion);
    }

    #[test]
    fn soft_delete_hides_but_preserves_the_row() {
        let db = test_db();
        let (a, b, discussion) = setup_pair(&db);

        let first = send_message(&db, discussion, a, "first", None).unwrap();
        let first_id = first.id.to_string();
        let reply = send_message(&db, discussion, b, "re: first", Some(first_id.as_str())).unwrap();

        // Non-author cannot delete
        assert!(matches!(
            delete_message(&db, discussion, first.id, b),
            Err(Error::Forbidden)
        ));

        delete_message(&db, discussion, first.id, a).unwrap();

        // Deleting again is "not found"
        assert!(matches!(
            delete_message(&db, discussion, first.id, a),
            Err(Error::NotFound(_))
        ));

        // Hidden from the list, but the reply still resolves its parent
        let listed = get_messages(&db, discussion, a, 50, 0).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, reply.id);
        let parent = listed[0].parent_message.as_ref().expect("parent");
        assert_eq!(parent.id, first.id);
        assert!(parent.deleted_at.is_some());
    }

    #[test]
    fn reaction_toggle_is_an_involution() {
        let db = test_db();
        let (a, b, discussion) = setup_pair(&db);

        let message = send_message(&db, discussion, a, "react to me", None).unwrap();

        let toggled = toggle_reaction(&db, discussion, message.id, b, "👍").unwrap();
        assert_eq!(toggled.reactions.len(), 1);
        assert_eq!(toggled.reactions[0].user_id, b);
        assert_eq!(toggled.reactions[0].emoji, "👍");

        // A different user's same emoji coexists
        let toggled = toggle_reaction(&db, discussion, message.id, a, "👍").unwrap();
        assert_eq!(toggled.reactions.len(), 2);

        // Toggling twice returns to the original list
        let toggled = toggle_reaction(&db, discussion, message.id, b, "👍").unwrap();
        assert_eq!(toggled.reactions.len(), 1);
        assert_eq!(toggled.reactions[0].user_id, a);
    }

    #[test]
    fn pagination_respects_limit_and_offset() {
        let db = test_db();
        let (a, _b, discussion) = setup_pair(&db);

        for i in 0..5 {
            send_message(&db, discussion, a, &format!("m{i}"), None).unwrap();
        }

        let page = get_messages(&db, discussion, a, 2, 0).unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].content, "m0");

        let page = get_messages(&db, discussion, a, 2, 4).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].content, "m4");
    }
}
