//! Mention parsing and resolution. An `@token` in message text resolves to
//! users whose username or first name equals the token case-insensitively;
//! resolved users are auto-admitted to the discussion by the message service.

use uuid::Uuid;

use dispatch_db::Database;
use dispatch_db::models::parse_id;

use crate::Result;

/// Extract `@token` mentions: `@` followed by one-or-more word characters.
/// Tokens are lowercased and deduplicated in order of first appearance.
pub fn parse_mentions(text: &str) -> Vec<String> {
    let mut tokens: Vec<String> = Vec::new();
    let mut rest = text;

    while let Some(pos) = rest.find('@') {
        rest = &rest[pos + 1..];
        let token: String = rest
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
            .collect();
        rest = &rest[token.len()..];

        if !token.is_empty() {
            let lower = token.to_lowercase();
            if !tokens.contains(&lower) {
                tokens.push(lower);
            }
        }
    }

    tokens
}

/// Resolve one token to user IDs. The store narrows candidates by substring;
/// inclusion requires exact case-insensitive equality on username or first
/// name. The current user never mentions themselves into anything.
pub fn find_users_by_mention(
    db: &Database,
    token: &str,
    current_user_id: Uuid,
) -> Result<Vec<Uuid>> {
    let current = current_user_id.to_string();
    let candidates = db.search_active_users(token)?;

    Ok(candidates
        .into_iter()
        .filter(|u| u.id != current)
        .filter(|u| {
            u.username.eq_ignore_ascii_case(token)
                || u.first_name
                    .as_deref()
                    .is_some_and(|f| f.eq_ignore_ascii_case(token))
        })
        .map(|u| parse_id(&u.id, "user id"))
        .collect())
}

/// Union of resolved user IDs across every token in `text`, deduplicated.
pub fn find_mentioned_users(
    db: &Database,
    text: &str,
    current_user_id: Uuid,
) -> Result<Vec<Uuid>> {
    let mut mentioned: Vec<Uuid> = Vec::new();
    for token in parse_mentions(text) {
        for user_id in find_users_by_mention(db, &token, current_user_id)? {
            if !mentioned.contains(&user_id) {
                mentioned.push(user_id);
            }
        }
    }
    Ok(mentioned)
}
