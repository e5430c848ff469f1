//! Participant-set matching: given a candidate set of user IDs, find the
//! existing discussion whose active participants are exactly that set.
//! Creation consults this first so identical conversations are reused
//! instead of duplicated.

use std::collections::BTreeSet;

use uuid::Uuid;

use dispatch_db::Database;
use dispatch_db::models::DiscussionRow;
use dispatch_types::models::{Discussion, DiscussionType};

use crate::{Result, discussions};

/// Sorted-and-joined participant-ID key. Two discussions share a key iff
/// their active participant sets are equal.
pub(crate) fn participant_set_key<S: AsRef<str>>(ids: &[S]) -> String {
    let mut sorted: Vec<&str> = ids.iter().map(|s| s.as_ref()).collect();
    sorted.sort_unstable();
    sorted.dedup();
    sorted.join(",")
}

/// Recency ordering for duplicate tie-breaks: latest last-message wins, then
/// latest creation. Timestamps are fixed-width RFC 3339, so string order is
/// chronological, and `None < Some` puts message-less discussions last.
pub(crate) fn recency_key(row: &DiscussionRow) -> (Option<String>, String) {
    (row.last_message_at.clone(), row.created_at.clone())
}

/// Find an active discussion whose participant set is exactly the requesting
/// user plus `other_participant_ids`. Exact set equality — a superset or
/// subset of participants is a different conversation. Returns the hydrated
/// best match (most recent activity) or None. Read-only.
pub fn find_existing_discussion(
    db: &Database,
    requesting_user_id: Uuid,
    other_participant_ids: &[Uuid],
    desired_type: Option<DiscussionType>,
) -> Result<Option<Discussion>> {
    let mut wanted: BTreeSet<String> =
        other_participant_ids.iter().map(Uuid::to_string).collect();
    wanted.insert(requesting_user_id.to_string());
    let wanted_key = wanted.into_iter().collect::<Vec<_>>().join(",");

    let candidate_ids = db.active_discussion_ids_for_user(&requesting_user_id.to_string())?;
    let candidates = db.get_discussions_by_ids(&candidate_ids)?;

    let mut matches: Vec<DiscussionRow> = Vec::new();
    for row in candidates {
        if let Some(t) = desired_type {
            if row.discussion_type != t.as_str() {
                continue;
            }
        }
        let participant_ids = db.active_participant_user_ids(&row.id)?;
        if participant_set_key(&participant_ids) == wanted_key {
            matches.push(row);
        }
    }

    let Some(best) = matches.into_iter().max_by_key(recency_key) else {
        return Ok(None);
    };

    discussions::hydrate(db, best, requesting_user_id).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{seed_user, test_db};
    use dispatch_types::api::CreateDiscussionRequest;

    fn create(db: &Database, creator: Uuid, others: &[Uuid]) -> Discussion {
        let req = CreateDiscussionRequest {
            participant_ids: others.to_vec(),
            ..Default::default()
        };
        discussions::create_discussion(db, creator, &req).unwrap().0
    }

    #[test]
    fn participant_key_is_order_insensitive() {
        assert_eq!(
            participant_set_key(&["b", "a", "c"]),
            participant_set_key(&["c", "b", "a"])
        );
        assert_ne!(participant_set_key(&["a", "b"]), participant_set_key(&["a", "b", "c"]));
    }

    #[test]
    fn exact_set_match_rejects_subsets_and_supersets() {
        let db = test_db();
        let a = seed_user(&db, "a", "A");
        let b = seed_user(&db, "b", "B");
        let c = seed_user(&db, "c", "C");
        let d = seed_user(&db, "d", "D");

        let abc = create(&db, a, &[b, c]);

        // {a,b} is a subset of {a,b,c} — no match
        assert!(find_existing_discussion(&db, a, &[b], None).unwrap().is_none());
        // {a,b,c,d} is a superset — no match
        assert!(find_existing_discussion(&db, a, &[b, c, d], None).unwrap().is_none());
        // the exact set matches
        let found = find_existing_discussion(&db, a, &[c, b], None).unwrap().unwrap();
        assert_eq!(found.id, abc.id);
    }

    #[test]
    fn requester_is_folded_into_the_set() {
        let db = test_db();
        let a = seed_user(&db, "a", "A");
        let b = seed_user(&db, "b", "B");

        let ab = create(&db, a, &[b]);

        // listing the requester explicitly changes nothing
        let found = find_existing_discussion(&db, a, &[a, b], None).unwrap().unwrap();
        assert_eq!(found.id, ab.id);
    }

    #[test]
    fn type_filter_excludes_other_types() {
        let db = test_db();
        let a = seed_user(&db, "a", "A");
        let b = seed_user(&db, "b", "B");

        let ab = create(&db, a, &[b]); // two participants ⇒ personal

        assert!(
            find_existing_discussion(&db, a, &[b], Some(DiscussionType::Group))
                .unwrap()
                .is_none()
        );
        let found = find_existing_discussion(&db, a, &[b], Some(DiscussionType::Personal))
            .unwrap()
            .unwrap();
        assert_eq!(found.id, ab.id);
    }
}
