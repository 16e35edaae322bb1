//! Conversation threads attached to tickets and public requests.
//!
//! Messages are stored in one table keyed by `(target_kind, target_id)`,
//! so new conversation hosts only need a new kind tag. Read state is a
//! per-user watermark (highest message id seen per target), and mentions
//! are resolved from `@email` tokens at post time.

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use chrono::Utc;
use diesel::dsl::max;
use diesel::prelude::*;
use regex::Regex;
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult};
use crate::models::{ChatMessage, NewChatMention, NewChatMessage, NewChatRead, User};
use crate::schema::{
    chat_mentions, chat_messages, chat_reads, public_requests, technicians, tickets, users,
};

pub const VISIBILITY_PUBLIC: &str = "PUBLIC";
pub const VISIBILITY_INTERNAL: &str = "INTERNAL";

pub const MAX_BODY_LENGTH: usize = 10_000;

/// What a conversation hangs off. Stored as a short tag in every
/// chat table, never as a numeric discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetKind {
    Ticket,
    Public,
}

impl TargetKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TargetKind::Ticket => "ticket",
            TargetKind::Public => "public",
        }
    }

    pub fn parse(value: &str) -> Option<TargetKind> {
        match value {
            "ticket" => Some(TargetKind::Ticket),
            "public" => Some(TargetKind::Public),
            _ => None,
        }
    }
}

/// Confirms the target exists and the viewer may see it. Inaccessible and
/// nonexistent targets both answer 404 so the id space stays opaque.
pub fn resolve_target(
    conn: &mut PgConnection,
    kind: TargetKind,
    target_id: i64,
    viewer: &AuthenticatedUser,
) -> AppResult<()> {
    let accessible = match kind {
        TargetKind::Ticket => {
            let mut query = tickets::table.filter(tickets::id.eq(target_id)).into_boxed();
            if !viewer.role.is_staff() {
                query = query.filter(
                    tickets::created_by
                        .eq(viewer.user_id)
                        .or(tickets::assigned_to.eq(viewer.user_id)),
                );
            }
            diesel::select(diesel::dsl::exists(query)).get_result(conn)?
        }
        TargetKind::Public => {
            let mut query = public_requests::table
                .filter(public_requests::id.eq(target_id))
                .into_boxed();
            if !viewer.role.is_staff() {
                let technician_ids = technicians::table
                    .filter(technicians::user_id.eq(viewer.user_id))
                    .select(technicians::id)
                    .load::<Uuid>(conn)?;
                query = query.filter(
                    public_requests::user_id
                        .eq(viewer.user_id)
                        .or(public_requests::assigned_to.eq_any(technician_ids)),
                );
            }
            diesel::select(diesel::dsl::exists(query)).get_result(conn)?
        }
    };

    if accessible {
        Ok(())
    } else {
        Err(AppError::not_found())
    }
}

/// Messages in a target's thread, oldest first. Internal notes are only
/// returned to staff; soft-deleted messages are dropped entirely.
pub fn visible_messages(
    conn: &mut PgConnection,
    kind: TargetKind,
    target_id: i64,
    staff: bool,
) -> AppResult<Vec<ChatMessage>> {
    let mut query = chat_messages::table
        .filter(chat_messages::target_kind.eq(kind.as_str()))
        .filter(chat_messages::target_id.eq(target_id))
        .filter(chat_messages::is_deleted.eq(false))
        .order(chat_messages::id.asc())
        .into_boxed();
    if !staff {
        query = query.filter(chat_messages::visibility.eq(VISIBILITY_PUBLIC));
    }
    Ok(query.load(conn)?)
}

pub struct NewPost<'a> {
    pub body: &'a str,
    pub reply_to_id: Option<i64>,
    pub visibility: &'a str,
}

/// Persists a message and its mention rows in one transaction, then
/// advances the author's own watermark so posting leaves them caught up
/// on the thread.
///
/// Non-staff authors always post PUBLIC regardless of what they asked
/// for. A reply pointer into another thread is dropped, not an error.
/// An empty body is stored as-is; callers screen fully empty
/// submissions before getting here.
pub fn post_message(
    conn: &mut PgConnection,
    kind: TargetKind,
    target_id: i64,
    author: &AuthenticatedUser,
    post: NewPost<'_>,
) -> AppResult<ChatMessage> {
    let body = post.body.trim();
    if body.chars().count() > MAX_BODY_LENGTH {
        return Err(AppError::unprocessable("message body is too long"));
    }

    let visibility = if author.role.is_staff() && post.visibility == VISIBILITY_INTERNAL {
        VISIBILITY_INTERNAL
    } else {
        VISIBILITY_PUBLIC
    };

    let message = conn.transaction::<ChatMessage, AppError, _>(|conn| {
        let reply_to_id = match post.reply_to_id {
            Some(reply_id) => chat_messages::table
                .filter(chat_messages::id.eq(reply_id))
                .filter(chat_messages::target_kind.eq(kind.as_str()))
                .filter(chat_messages::target_id.eq(target_id))
                .select(chat_messages::id)
                .first::<i64>(conn)
                .optional()?,
            None => None,
        };

        let message: ChatMessage = diesel::insert_into(chat_messages::table)
            .values(NewChatMessage {
                target_kind: kind.as_str().to_string(),
                target_id,
                author_id: author.user_id,
                body: body.to_string(),
                reply_to_id,
                visibility: visibility.to_string(),
            })
            .get_result(conn)?;

        store_mentions(conn, &message)?;
        Ok(message)
    })?;

    mark_read(conn, kind, target_id, author.user_id, message.id)?;

    tracing::debug!(
        message_id = message.id,
        target = kind.as_str(),
        target_id,
        "message posted"
    );
    Ok(message)
}

fn mention_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"@([A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,})").unwrap()
    })
}

/// Email-shaped `@` tokens from a message body, order kept, duplicates
/// dropped.
pub fn extract_mention_emails(body: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    mention_pattern()
        .captures_iter(body)
        .map(|captures| captures[1].to_lowercase())
        .filter(|email| seen.insert(email.clone()))
        .collect()
}

fn store_mentions(conn: &mut PgConnection, message: &ChatMessage) -> AppResult<()> {
    let emails = extract_mention_emails(&message.body);
    if emails.is_empty() {
        return Ok(());
    }

    // Tokens that match no active account are simply ignored.
    let mentioned: Vec<Uuid> = users::table
        .filter(users::email.eq_any(&emails))
        .filter(users::is_active.eq(true))
        .select(users::id)
        .load(conn)?;

    let rows: Vec<NewChatMention> = mentioned
        .into_iter()
        .map(|user_id| NewChatMention {
            message_id: message.id,
            user_id,
        })
        .collect();

    diesel::insert_into(chat_mentions::table)
        .values(rows)
        .on_conflict_do_nothing()
        .execute(conn)?;
    Ok(())
}

/// Advances the reader's watermark for a target. The watermark only moves
/// forward: a stale client replaying an old message id cannot mark newer
/// messages unread again.
pub fn mark_read(
    conn: &mut PgConnection,
    kind: TargetKind,
    target_id: i64,
    user_id: Uuid,
    up_to_message_id: i64,
) -> AppResult<()> {
    conn.transaction::<(), diesel::result::Error, _>(|conn| {
        let updated = diesel::update(
            chat_reads::table
                .filter(chat_reads::target_kind.eq(kind.as_str()))
                .filter(chat_reads::target_id.eq(target_id))
                .filter(chat_reads::user_id.eq(user_id))
                .filter(
                    chat_reads::last_read_message_id
                        .lt(up_to_message_id)
                        .or(chat_reads::last_read_message_id.is_null()),
                ),
        )
        .set((
            chat_reads::last_read_message_id.eq(up_to_message_id),
            chat_reads::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(conn)?;

        if updated == 0 {
            // Either no row yet or the watermark is already ahead.
            diesel::insert_into(chat_reads::table)
                .values(NewChatRead {
                    id: Uuid::new_v4(),
                    target_kind: kind.as_str().to_string(),
                    target_id,
                    user_id,
                    last_read_message_id: Some(up_to_message_id),
                })
                .on_conflict_do_nothing()
                .execute(conn)?;
        }
        Ok(())
    })?;
    Ok(())
}

/// Number of conversations with at least one unread message the viewer
/// can see. Counts targets, not messages: ten unread replies in one
/// ticket is one.
pub fn unread_total(conn: &mut PgConnection, viewer: &AuthenticatedUser) -> AppResult<i64> {
    let staff = viewer.role.is_staff();

    let watermarks: HashMap<(String, i64), i64> = chat_reads::table
        .filter(chat_reads::user_id.eq(viewer.user_id))
        .select((
            chat_reads::target_kind,
            chat_reads::target_id,
            chat_reads::last_read_message_id,
        ))
        .load::<(String, i64, Option<i64>)>(conn)?
        .into_iter()
        .filter_map(|(kind, target_id, watermark)| {
            watermark.map(|id| ((kind, target_id), id))
        })
        .collect();

    let mut latest = chat_messages::table
        .filter(chat_messages::is_deleted.eq(false))
        .filter(chat_messages::author_id.ne(viewer.user_id))
        .group_by((chat_messages::target_kind, chat_messages::target_id))
        .select((
            chat_messages::target_kind,
            chat_messages::target_id,
            max(chat_messages::id),
        ))
        .into_boxed();
    if !staff {
        latest = latest.filter(chat_messages::visibility.eq(VISIBILITY_PUBLIC));
    }
    let latest: Vec<(String, i64, Option<i64>)> = latest.load(conn)?;

    let accessible_tickets: HashSet<i64> = {
        let mut query = tickets::table.select(tickets::id).into_boxed();
        if !staff {
            query = query.filter(
                tickets::created_by
                    .eq(viewer.user_id)
                    .or(tickets::assigned_to.eq(viewer.user_id)),
            );
        }
        query.load::<i64>(conn)?.into_iter().collect()
    };
    let accessible_public: HashSet<i64> = {
        let mut query = public_requests::table
            .select(public_requests::id)
            .into_boxed();
        if !staff {
            let technician_ids = technicians::table
                .filter(technicians::user_id.eq(viewer.user_id))
                .select(technicians::id)
                .load::<Uuid>(conn)?;
            query = query.filter(
                public_requests::user_id
                    .eq(viewer.user_id)
                    .or(public_requests::assigned_to.eq_any(technician_ids)),
            );
        }
        query.load::<i64>(conn)?.into_iter().collect()
    };

    let mut unread = 0i64;
    for (kind, target_id, newest) in latest {
        let Some(newest) = newest else { continue };
        let reachable = match TargetKind::parse(&kind) {
            Some(TargetKind::Ticket) => accessible_tickets.contains(&target_id),
            Some(TargetKind::Public) => accessible_public.contains(&target_id),
            None => false,
        };
        if !reachable {
            continue;
        }
        let seen = watermarks.get(&(kind, target_id)).copied().unwrap_or(0);
        if newest > seen {
            unread += 1;
        }
    }
    Ok(unread)
}

/// Active users matching a mention prefix, for the composer's `@` popup.
pub fn mention_candidates(
    conn: &mut PgConnection,
    query: &str,
    limit: i64,
) -> AppResult<Vec<User>> {
    let pattern = format!("%{}%", query.replace('%', "\\%").replace('_', "\\_"));
    let candidates = users::table
        .filter(users::is_active.eq(true))
        .filter(
            users::email
                .ilike(pattern.clone())
                .or(users::company_name.ilike(pattern)),
        )
        .order(users::email.asc())
        .limit(limit)
        .load(conn)?;
    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_kind_round_trips() {
        assert_eq!(TargetKind::parse("ticket"), Some(TargetKind::Ticket));
        assert_eq!(TargetKind::parse("public"), Some(TargetKind::Public));
        assert_eq!(TargetKind::parse("Ticket"), None);
        assert_eq!(TargetKind::parse("document"), None);
    }

    #[test]
    fn mentions_extract_email_tokens_only() {
        let body = "cc @ana@example.com and @bad-token, also @ops@corp.example.org";
        assert_eq!(
            extract_mention_emails(body),
            vec!["ana@example.com", "ops@corp.example.org"]
        );
    }

    #[test]
    fn mentions_dedupe_and_lowercase() {
        let body = "@Ana@Example.com again @ana@example.com";
        assert_eq!(extract_mention_emails(body), vec!["ana@example.com"]);
    }

    #[test]
    fn plain_at_signs_are_not_mentions() {
        assert!(extract_mention_emails("meet @ 5pm").is_empty());
        assert!(extract_mention_emails("no mentions here").is_empty());
    }
}
