//! Discussion creation and the user-facing discussion list: membership
//! discovery, scope filtering, hydration, ordering, and read-time
//! deduplication of conversations that share a participant set.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

use tracing::{error, warn};
use uuid::Uuid;

use dispatch_db::models::{DiscussionRow, ParticipantRow, parse_opt_id};
use dispatch_db::{Database, now_ts};
use dispatch_types::api::CreateDiscussionRequest;
use dispatch_types::models::{AccessScope, Discussion, DiscussionType};

use crate::{Error, Result, matcher};

/// Create a discussion, or transparently reuse the existing one with the
/// same participant set. Returns the hydrated discussion and whether a new
/// row was actually created.
pub fn create_discussion(
    db: &Database,
    creator_id: Uuid,
    req: &CreateDiscussionRequest,
) -> Result<(Discussion, bool)> {
    if req.participant_ids.is_empty() {
        return Err(Error::Validation("participant_ids must not be empty".into()));
    }

    let mut member_set: BTreeSet<Uuid> = req.participant_ids.iter().copied().collect();
    member_set.insert(creator_id);
    let others: Vec<Uuid> = member_set
        .iter()
        .copied()
        .filter(|id| *id != creator_id)
        .collect();

    // Idempotent creation: an exact participant-set match is returned as-is.
    if let Some(existing) =
        matcher::find_existing_discussion(db, creator_id, &others, req.discussion_type)?
    {
        return Ok((existing, false));
    }

    // The requested type is advisory; the participant count decides.
    let discussion_type = DiscussionType::for_participant_count(member_set.len());

    let id = Uuid::new_v4();
    let now = now_ts();
    let row = DiscussionRow {
        id: id.to_string(),
        discussion_type: discussion_type.as_str().to_string(),
        title: req.title.clone(),
        created_by: creator_id.to_string(),
        corporate_id: req.corporate_id.map(|c| c.to_string()),
        program_id: req.program_id.map(|p| p.to_string()),
        is_open: req.is_open,
        tagged_user_ids: serde_json::to_string(&req.tagged_user_ids)
            .map_err(anyhow::Error::from)?,
        tagged_role_ids: serde_json::to_string(&req.tagged_role_ids)
            .map_err(anyhow::Error::from)?,
        last_message_id: None,
        last_message_at: None,
        archived_at: None,
        created_at: now.clone(),
        updated_at: now.clone(),
    };
    db.insert_discussion(&row)?;

    for user_id in &member_set {
        let participant = ParticipantRow {
            id: Uuid::new_v4().to_string(),
            discussion_id: id.to_string(),
            user_id: user_id.to_string(),
            joined_at: now.clone(),
            left_at: None,
            last_read_message_id: None,
            last_read_at: None,
            is_pinned: false,
            is_muted: false,
            user: None,
        };
        if let Err(e) = db.insert_participant(&participant) {
            // Compensation: don't leave an orphaned discussion behind.
            error!("Participant insert failed for discussion {}: {}", id, e);
            if let Err(rollback) = db.delete_discussion(&id.to_string()) {
                error!("Rollback of discussion {} failed: {}", id, rollback);
            }
            return Err(e.into());
        }
    }

    let row = db
        .get_discussion(&id.to_string())?
        .ok_or(Error::NotFound("discussion"))?;
    Ok((hydrate(db, row, creator_id)?, true))
}

/// The user's discussion list, most-recently-active first, deduplicated by
/// participant set.
pub fn get_discussions(
    db: &Database,
    user_id: Uuid,
    type_filter: Option<DiscussionType>,
    scope: &AccessScope,
) -> Result<Vec<Discussion>> {
    let uid = user_id.to_string();

    let mut ids = db.active_discussion_ids_for_user(&uid)?;
    if ids.is_empty() {
        // A user must still see conversations they've posted in even when
        // their membership row went missing. Best-effort.
        match db.authored_discussion_ids(&uid) {
            Ok(found) => {
                if !found.is_empty() {
                    warn!(
                        "User {} has no active memberships; including {} discussions from authored messages",
                        user_id,
                        found.len()
                    );
                    ids = found;
                }
            }
            Err(e) => warn!("Authored-message fallback failed for {}: {}", user_id, e),
        }
    }
    if ids.is_empty() {
        return Ok(vec![]);
    }

    let mut rows = db.get_discussions_by_ids(&ids)?;
    if let Some(t) = type_filter {
        rows.retain(|r| r.discussion_type == t.as_str());
    }

    let mut discussions = Vec::with_capacity(rows.len());
    for row in rows {
        let corporate_id = parse_opt_id(row.corporate_id.as_deref());
        let program_id = parse_opt_id(row.program_id.as_deref());
        if !scope.allows(corporate_id, program_id) {
            continue;
        }
        discussions.push(hydrate(db, row, user_id)?);
    }

    let mut discussions = dedupe_by_participant_set(discussions);
    sort_by_recency(&mut discussions);
    Ok(discussions)
}

/// One discussion by ID, hydrated for the viewer. Archived discussions are
/// not found.
pub fn get_discussion(db: &Database, viewer_id: Uuid, discussion_id: Uuid) -> Result<Discussion> {
    let row = db
        .get_discussion(&discussion_id.to_string())?
        .filter(|r| r.archived_at.is_none())
        .ok_or(Error::NotFound("discussion"))?;
    hydrate(db, row, viewer_id)
}

/// Attach participants, last message, the viewer's own pin/mute flags,
/// unread count, and (for personal discussions) the other participant.
pub(crate) fn hydrate(db: &Database, row: DiscussionRow, viewer_id: Uuid) -> Result<Discussion> {
    let discussion_id = row.id.clone();
    let mut discussion = row.into_model();

    let participants: Vec<_> = db
        .active_participants(&discussion_id)?
        .into_iter()
        .map(|p| p.into_model())
        .collect();

    let own = participants.iter().find(|p| p.user_id == viewer_id);
    discussion.is_pinned = own.is_some_and(|p| p.is_pinned);
    discussion.is_muted = own.is_some_and(|p| p.is_muted);

    let since = own
        .and_then(|p| p.last_read_at)
        .map(dispatch_db::format_ts);
    discussion.unread_count =
        db.count_unread(&discussion_id, &viewer_id.to_string(), since.as_deref())? as usize;

    if discussion.discussion_type == DiscussionType::Personal {
        discussion.other_participant = participants
            .iter()
            .find(|p| p.user_id != viewer_id)
            .and_then(|p| p.user.clone());
    }

    discussion.last_message = db
        .latest_message(&discussion_id)?
        .map(|m| m.into_model());
    discussion.participants = participants;

    Ok(discussion)
}

/// Collapse discussions sharing an active-participant set down to the most
/// recently active one. Compensates for duplicates created before the
/// matcher existed or through creation races; the maintenance routine in
/// `cleanup` repairs them for real.
pub(crate) fn dedupe_by_participant_set(discussions: Vec<Discussion>) -> Vec<Discussion> {
    let mut best: HashMap<String, Discussion> = HashMap::new();

    for discussion in discussions {
        let ids: Vec<String> = discussion
            .participants
            .iter()
            .map(|p| p.user_id.to_string())
            .collect();
        let key = matcher::participant_set_key(&ids);

        match best.entry(key) {
            std::collections::hash_map::Entry::Occupied(mut entry) => {
                let kept = entry.get();
                if (discussion.last_message_at, discussion.created_at)
                    > (kept.last_message_at, kept.created_at)
                {
                    entry.insert(discussion);
                }
            }
            std::collections::hash_map::Entry::Vacant(entry) => {
                entry.insert(discussion);
            }
        }
    }

    best.into_values().collect()
}

/// Last-message time descending, nulls last, then creation time descending.
pub(crate) fn sort_by_recency(discussions: &mut [Discussion]) {
    discussions.sort_by(|a, b| match (a.last_message_at, b.last_message_at) {
        (Some(x), Some(y)) => y.cmp(&x).then_with(|| b.created_at.cmp(&a.created_at)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => b.created_at.cmp(&a.created_at),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{seed_user, test_db};
    use crate::{lifecycle, messages};

    fn request(others: &[Uuid]) -> CreateDiscussionRequest {
        CreateDiscussionRequest {
            participant_ids: others.to_vec(),
            ..Default::default()
        }
    }

    #[test]
    fn creation_requires_participants() {
        let db = test_db();
        let a = seed_user(&db, "a", "A");

        let err = create_discussion(&db, a, &request(&[])).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn creation_is_idempotent_for_the_same_set() {
        let db = test_db();
        let a = seed_user(&db, "a", "A");
        let b = seed_user(&db, "b", "B");
        let c = seed_user(&db, "c", "C");

        let (first, created) = create_discussion(&db, a, &request(&[b, c])).unwrap();
        assert!(created);

        // Same set, different order, creator listed explicitly
        let req = request(&[c, b, a]);
        let (second, created) = create_discussion(&db, a, &req).unwrap();
        assert!(!created);
        assert_eq!(first.id, second.id);

        let listed = get_discussions(&db, a, None, &AccessScope::All).unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[test]
    fn type_is_derived_from_final_count() {
        let db = test_db();
        let a = seed_user(&db, "a", "A");
        let b = seed_user(&db, "b", "B");
        let c = seed_user(&db, "c", "C");

        // Caller asks for group, gets personal: two total participants
        let mut req = request(&[b]);
        req.discussion_type = Some(DiscussionType::Group);
        let (personal, _) = create_discussion(&db, a, &req).unwrap();
        assert_eq!(personal.discussion_type, DiscussionType::Personal);
        assert!(personal.title.is_none());

        // Three participants make a group no matter what was requested
        let mut req = request(&[b, c]);
        req.discussion_type = Some(DiscussionType::Personal);
        let (group, _) = create_discussion(&db, a, &req).unwrap();
        assert_eq!(group.discussion_type, DiscussionType::Group);
    }

    #[test]
    fn other_participant_is_set_for_personal_discussions() {
        let db = test_db();
        let a = seed_user(&db, "a", "Ann");
        let b = seed_user(&db, "b", "Ben");

        let (discussion, _) = create_discussion(&db, a, &request(&[b])).unwrap();
        let other = discussion.other_participant.expect("other participant");
        assert_eq!(other.id, b);

        // From b's point of view the other participant is a
        let from_b = get_discussion(&db, b, discussion.id).unwrap();
        assert_eq!(from_b.other_participant.unwrap().id, a);
    }

    #[test]
    fn list_orders_by_recency_and_annotates_flags() {
        let db = test_db();
        let a = seed_user(&db, "a", "A");
        let b = seed_user(&db, "b", "B");
        let c = seed_user(&db, "c", "C");

        let (ab, _) = create_discussion(&db, a, &request(&[b])).unwrap();
        let (abc, _) = create_discussion(&db, a, &request(&[b, c])).unwrap();

        // A message in ab makes it the most recent
        messages::send_message(&db, ab.id, a, "hello", None).unwrap();
        lifecycle::set_pinned(&db, abc.id, a, true).unwrap();

        let listed = get_discussions(&db, a, None, &AccessScope::All).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, ab.id);
        assert_eq!(listed[1].id, abc.id);
        assert!(listed[1].is_pinned);
        assert!(!listed[0].is_pinned);

        // Type filter narrows to personal
        let personal =
            get_discussions(&db, a, Some(DiscussionType::Personal), &AccessScope::All).unwrap();
        assert_eq!(personal.len(), 1);
        assert_eq!(personal[0].id, ab.id);
    }

    #[test]
    fn list_deduplicates_identical_participant_sets() {
        let db = test_db();
        let a = seed_user(&db, "a", "A");
        let b = seed_user(&db, "b", "B");

        // Force two duplicate discussions past the matcher by inserting the
        // second one at the gateway level, as a pre-matcher data anomaly
        // would have.
        let (first, _) = create_discussion(&db, a, &request(&[b])).unwrap();
        let dup = raw_duplicate(&db, a, &[a, b]);

        // The duplicate has the most recent message, so it wins
        messages::send_message(&db, first.id, a, "older", None).unwrap();
        messages::send_message(&db, dup, a, "newer", None).unwrap();

        let listed = get_discussions(&db, a, None, &AccessScope::All).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, dup);
    }

    #[test]
    fn scope_filters_tagged_discussions() {
        let db = test_db();
        let a = seed_user(&db, "a", "A");
        let b = seed_user(&db, "b", "B");
        let c = seed_user(&db, "c", "C");
        let corp = Uuid::new_v4();
        let other_corp = Uuid::new_v4();

        let mut req = request(&[b]);
        req.corporate_id = Some(corp);
        let (tagged, _) = create_discussion(&db, a, &req).unwrap();

        // Different participant set, no scoping tags
        let mut req = request(&[c]);
        req.title = Some("untagged".into());
        create_discussion(&db, a, &req).unwrap();

        // Wrong tenant: only the untagged discussion is visible
        let listed =
            get_discussions(&db, a, None, &AccessScope::Corporate(other_corp)).unwrap();
        assert_eq!(listed.len(), 1);
        assert_ne!(listed[0].id, tagged.id);

        // Matching tenant sees both
        let listed = get_discussions(&db, a, None, &AccessScope::Corporate(corp)).unwrap();
        assert_eq!(listed.len(), 2);
    }

    #[test]
    fn fallback_includes_discussions_with_authored_messages() {
        let db = test_db();
        let a = seed_user(&db, "a", "A");
        let b = seed_user(&db, "b", "B");

        let (discussion, _) = create_discussion(&db, a, &request(&[b])).unwrap();
        messages::send_message(&db, discussion.id, a, "I was here", None).unwrap();

        // Simulate the membership row going missing outright
        db.with_conn_mut(|conn| {
            conn.execute(
                "DELETE FROM discussion_participants WHERE user_id = ?1",
                [a.to_string()],
            )?;
            Ok(())
        })
        .unwrap();

        let listed = get_discussions(&db, a, None, &AccessScope::All).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, discussion.id);
    }

    /// Insert a duplicate discussion directly through the gateway, bypassing
    /// the matcher, the way legacy data or a creation race would.
    fn raw_duplicate(db: &Database, creator: Uuid, members: &[Uuid]) -> Uuid {
        let id = Uuid::new_v4();
        let now = now_ts();
        db.insert_discussion(&DiscussionRow {
            id: id.to_string(),
            discussion_type: "personal".into(),
            title: None,
            created_by: creator.to_string(),
            corporate_id: None,
            program_id: None,
            is_open: false,
            tagged_user_ids: "[]".into(),
            tagged_role_ids: "[]".into(),
            last_message_id: None,
            last_message_at: None,
            archived_at: None,
            created_at: now.clone(),
            updated_at: now.clone(),
        })
        .unwrap();
        for user_id in members {
            db.insert_participant(&ParticipantRow {
                id: Uuid::new_v4().to_string(),
                discussion_id: id.to_string(),
                user_id: user_id.to_string(),
                joined_at: now.clone(),
                left_at: None,
                last_read_message_id: None,
                last_read_at: None,
                is_pinned: false,
                is_muted: false,
                user: None,
            })
            .unwrap();
        }
        id
    }
}
