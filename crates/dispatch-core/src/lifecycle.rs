//! Per-user discussion state: pin, mute, read tracking, and leaving.
//! Every operation touches only the caller's own participant row.

use tracing::{debug, warn};
use uuid::Uuid;

use dispatch_db::{Database, now_ts};

use crate::{Error, Result};

pub fn set_pinned(db: &Database, discussion_id: Uuid, user_id: Uuid, pinned: bool) -> Result<()> {
    let updated =
        db.set_participant_pinned(&discussion_id.to_string(), &user_id.to_string(), pinned)?;
    ensure_member(updated)
}

pub fn set_muted(db: &Database, discussion_id: Uuid, user_id: Uuid, muted: bool) -> Result<()> {
    let updated =
        db.set_participant_muted(&discussion_id.to_string(), &user_id.to_string(), muted)?;
    ensure_member(updated)
}

/// Record the caller's read position. Also marks the message itself as read
/// by the caller, best-effort.
pub fn mark_read(db: &Database, discussion_id: Uuid, user_id: Uuid, message_id: Uuid) -> Result<()> {
    let updated = db.set_participant_read(
        &discussion_id.to_string(),
        &user_id.to_string(),
        &message_id.to_string(),
        &now_ts(),
    )?;
    ensure_member(updated)?;

    if let Err(e) = db.add_message_reader(&message_id.to_string(), &user_id.to_string()) {
        warn!("Could not add {} to read_by of message {}: {}", user_id, message_id, e);
    }
    Ok(())
}

/// Soft removal: the discussion and its messages persist for the remaining
/// participants. Leaving a discussion you're not in is a no-op.
pub fn leave_discussion(db: &Database, discussion_id: Uuid, user_id: Uuid) -> Result<()> {
    let updated =
        db.set_participant_left(&discussion_id.to_string(), &user_id.to_string(), &now_ts())?;
    if updated == 0 {
        debug!("User {} left discussion {} they weren't in", user_id, discussion_id);
    }
    Ok(())
}

fn ensure_member(updated_rows: usize) -> Result<()> {
    if updated_rows == 0 {
        return Err(Error::NotParticipant);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discussions::{create_discussion, get_discussions};
    use crate::messages::{get_messages, send_message};
    use crate::testutil::{seed_user, test_db};
    use dispatch_types::api::CreateDiscussionRequest;
    use dispatch_types::models::AccessScope;

    fn setup(db: &Database) -> (Uuid, Uuid, Uuid) {
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
    fn pin_and_mute_are_user_local() {
        let db = test_db();
        let (a, b, discussion) = setup(&db);

        set_pinned(&db, discussion, a, true).unwrap();
        set_muted(&db, discussion, a, true).unwrap();

        let a_view = &get_discussions(&db, a, None, &AccessScope::All).unwrap()[0];
        assert!(a_view.is_pinned && a_view.is_muted);

        let b_view = &get_discussions(&db, b, None, &AccessScope::All).unwrap()[0];
        assert!(!b_view.is_pinned && !b_view.is_muted);

        // Unpin round-trips
        set_pinned(&db, discussion, a, false).unwrap();
        let a_view = &get_discussions(&db, a, None, &AccessScope::All).unwrap()[0];
        assert!(!a_view.is_pinned);
    }

    #[test]
    fn non_member_mutations_are_rejected() {
        let db = test_db();
        let (_a, _b, discussion) = setup(&db);
        let outsider = seed_user(&db, "outsider", "Out");

        assert!(matches!(
            set_pinned(&db, discussion, outsider, true),
            Err(Error::NotParticipant)
        ));
        assert!(matches!(
            set_muted(&db, discussion, outsider, true),
            Err(Error::NotParticipant)
        ));
    }

    #[test]
    fn mark_read_clears_unread_count() {
        let db = test_db();
        let (a, b, discussion) = setup(&db);

        send_message(&db, discussion, a, "one", None).unwrap();
        let latest = send_message(&db, discussion, a, "two", None).unwrap();

        let b_view = &get_discussions(&db, b, None, &AccessScope::All).unwrap()[0];
        assert_eq!(b_view.unread_count, 2);

        mark_read(&db, discussion, b, latest.id).unwrap();

        let b_view = &get_discussions(&db, b, None, &AccessScope::All).unwrap()[0];
        assert_eq!(b_view.unread_count, 0);

        // read_by on the marked message now includes b
        let listed = get_messages(&db, discussion, b, 50, 0).unwrap();
        assert!(listed[1].read_by.contains(&b));
    }

    #[test]
    fn leaving_preserves_the_discussion_for_others() {
        let db = test_db();
        let (a, b, discussion) = setup(&db);

        send_message(&db, discussion, a, "before the exit", None).unwrap();
        leave_discussion(&db, discussion, b).unwrap();

        // b no longer sees it
        assert!(get_discussions(&db, b, None, &AccessScope::All).unwrap().is_empty());

        // a still sees the discussion and its history
        let a_view = get_discussions(&db, a, None, &AccessScope::All).unwrap();
        assert_eq!(a_view.len(), 1);
        let history = get_messages(&db, discussion, a, 50, 0).unwrap();
        assert_eq!(history.len(), 1);

        // leaving twice stays a quiet no-op
        leave_discussion(&db, discussion, b).unwrap();
    }
}
