//! Duplicate-discussion maintenance. The read path hides duplicates
//! (`discussions::dedupe_by_participant_set`); this routine repairs them:
//! messages and missing participants move to the kept discussion and the
//! duplicate is archived, never deleted.

use std::collections::{HashMap, HashSet};

use tracing::{info, warn};
use uuid::Uuid;

use dispatch_db::models::{DiscussionRow, ParticipantRow};
use dispatch_db::{Database, now_ts};

use crate::{Result, matcher};

#[derive(Debug, Default)]
pub struct CleanupReport {
    /// Participant-set groups that had duplicates merged.
    pub merged: usize,
    /// Duplicate discussions archived.
    pub deleted: usize,
    /// Per-duplicate failures; processing continues past them.
    pub errors: Vec<String>,
}

/// Merge every group of the user's active discussions that shares an exact
/// active-participant set. Per-duplicate failures are collected into the
/// report rather than aborting the remaining groups.
pub fn cleanup_duplicate_discussions(db: &Database, user_id: Uuid) -> Result<CleanupReport> {
    let ids = db.active_discussion_ids_for_user(&user_id.to_string())?;
    let rows = db.get_discussions_by_ids(&ids)?;

    let mut report = CleanupReport::default();

    let mut groups: HashMap<String, Vec<DiscussionRow>> = HashMap::new();
    for row in rows {
        match db.active_participant_user_ids(&row.id) {
            Ok(participant_ids) => {
                groups
                    .entry(matcher::participant_set_key(&participant_ids))
                    .or_default()
                    .push(row);
            }
            Err(e) => {
                warn!("Skipping discussion {} during cleanup: {}", row.id, e);
                report.errors.push(format!("{}: {}", row.id, e));
            }
        }
    }

    for (_, mut group) in groups {
        if group.len() < 2 {
            continue;
        }

        // Keep the most recently active discussion, merge the rest into it.
        group.sort_by_key(matcher::recency_key);
        let keeper = group.pop().expect("non-empty group");

        let mut merged_any = false;
        for duplicate in group {
            match merge_into(db, &keeper, &duplicate) {
                Ok(moved) => {
                    info!(
                        "Merged duplicate discussion {} into {} ({} messages moved)",
                        duplicate.id, keeper.id, moved
                    );
                    report.deleted += 1;
                    merged_any = true;
                }
                Err(e) => {
                    warn!("Merging {} into {} failed: {}", duplicate.id, keeper.id, e);
                    report.errors.push(format!("{}: {}", duplicate.id, e));
                }
            }
        }
        if merged_any {
            report.merged += 1;
        }
    }

    Ok(report)
}

/// Re-point the duplicate's messages, migrate participants the keeper lacks,
/// refresh the keeper's last-message pointer, and archive the duplicate.
fn merge_into(
    db: &Database,
    keeper: &DiscussionRow,
    duplicate: &DiscussionRow,
) -> anyhow::Result<usize> {
    let moved = db.repoint_messages(&duplicate.id, &keeper.id)?;

    let existing: HashSet<String> =
        db.active_participant_user_ids(&keeper.id)?.into_iter().collect();
    for participant in db.active_participants(&duplicate.id)? {
        if existing.contains(&participant.user_id) {
            continue;
        }
        db.insert_participant(&ParticipantRow {
            id: Uuid::new_v4().to_string(),
            discussion_id: keeper.id.clone(),
            user_id: participant.user_id.clone(),
            joined_at: participant.joined_at.clone(),
            left_at: None,
            last_read_message_id: participant.last_read_message_id.clone(),
            last_read_at: participant.last_read_at.clone(),
            is_pinned: participant.is_pinned,
            is_muted: participant.is_muted,
            user: None,
        })?;
    }

    // The duplicate may have held the newer conversation tail.
    if duplicate.last_message_at > keeper.last_message_at {
        if let (Some(message_id), Some(at)) =
            (&duplicate.last_message_id, &duplicate.last_message_at)
        {
            db.set_last_message(&keeper.id, message_id, at)?;
        }
    }

    db.archive_discussion(&duplicate.id, &now_ts())?;
    Ok(moved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discussions::{create_discussion, get_discussions};
    use crate::messages::{get_messages, send_message};
    use crate::testutil::{seed_user, test_db};
    use dispatch_types::api::CreateDiscussionRequest;
    use dispatch_types::models::AccessScope;

    /// Two discussions over the same participant set, inserted the way a
    /// creation race would leave them.
    fn duplicated_pair(db: &Database) -> (Uuid, Uuid, Uuid, Uuid) {
        let a = seed_user(db, "ann", "Ann");
        let b = seed_user(db, "ben", "Ben");
        let req = CreateDiscussionRequest {
            participant_ids: vec![b],
            ..Default::default()
        };
        let (first, _) = create_discussion(db, a, &req).unwrap();

        let second = Uuid::new_v4();
        let now = now_ts();
        db.insert_discussion(&DiscussionRow {
            id: second.to_string(),
            discussion_type: "personal".into(),
            title: None,
            created_by: a.to_string(),
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
        for user in [a, b] {
            db.insert_participant(&ParticipantRow {
                id: Uuid::new_v4().to_string(),
                discussion_id: second.to_string(),
                user_id: user.to_string(),
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

        (a, b, first.id, second)
    }

    #[test]
    fn merge_preserves_messages_and_archives_the_duplicate() {
        let db = test_db();
        let (a, b, first, second) = duplicated_pair(&db);

        // first holds the newest message, so it is the keeper
        send_message(&db, second, b, "m3", None).unwrap();
        send_message(&db, first, a, "m1", None).unwrap();
        send_message(&db, first, a, "m2", None).unwrap();

        let report = cleanup_duplicate_discussions(&db, a).unwrap();
        assert_eq!(report.merged, 1);
        assert_eq!(report.deleted, 1);
        assert!(report.errors.is_empty());

        // All three messages now live in the kept discussion
        let history = get_messages(&db, first, a, 50, 0).unwrap();
        let contents: Vec<_> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m3", "m1", "m2"]);

        // The duplicate is archived, not deleted
        let row = db.get_discussion(&second.to_string()).unwrap().unwrap();
        assert!(row.archived_at.is_some());

        // And the list shows exactly one discussion
        let listed = get_discussions(&db, a, None, &AccessScope::All).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, first);
    }

    #[test]
    fn merge_migrates_participants_missing_from_the_keeper() {
        let db = test_db();
        let (a, b, first, second) = duplicated_pair(&db);
        let carol = seed_user(&db, "carol", "Carol");

        // carol is active only in the duplicate
        db.insert_participant(&ParticipantRow {
            id: Uuid::new_v4().to_string(),
            discussion_id: second.to_string(),
            user_id: carol.to_string(),
            joined_at: now_ts(),
            left_at: None,
            last_read_message_id: None,
            last_read_at: None,
            is_pinned: false,
            is_muted: false,
            user: None,
        })
        .unwrap();

        let keeper = db.get_discussion(&first.to_string()).unwrap().unwrap();
        let duplicate = db.get_discussion(&second.to_string()).unwrap().unwrap();
        merge_into(&db, &keeper, &duplicate).unwrap();

        let ids = db.active_participant_user_ids(&first.to_string()).unwrap();
        assert_eq!(ids.len(), 3);
        assert!(ids.contains(&carol.to_string()));
        // existing members were not duplicated
        assert_eq!(ids.iter().filter(|id| **id == a.to_string()).count(), 1);
        assert_eq!(ids.iter().filter(|id| **id == b.to_string()).count(), 1);
    }

    #[test]
    fn exact_grouping_merges_only_true_duplicates() {
        let db = test_db();
        let (a, b, first, second) = duplicated_pair(&db);
        let carol = seed_user(&db, "carol", "Carol");

        // A third discussion with a different set must survive untouched.
        let req = CreateDiscussionRequest {
            participant_ids: vec![b, carol],
            ..Default::default()
        };
        let (trio, _) = create_discussion(&db, a, &req).unwrap();

        let report = cleanup_duplicate_discussions(&db, a).unwrap();
        assert_eq!(report.deleted, 1);

        let listed = get_discussions(&db, a, None, &AccessScope::All).unwrap();
        let ids: Vec<_> = listed.iter().map(|d| d.id).collect();
        assert_eq!(listed.len(), 2);
        assert!(ids.contains(&trio.id));
        // exactly one of the duplicate pair survived the merge
        let survivors = [first, second].iter().filter(|id| ids.contains(id)).count();
        assert_eq!(survivors, 1);
    }
}
