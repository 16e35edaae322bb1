use std::collections::HashMap;

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    chat::{self, TargetKind},
    error::{AppError, AppResult},
    models::{ChatAttachment, ChatMessage, NewChatAttachment},
    schema::{chat_attachments, chat_mentions, chat_messages, users},
    state::AppState,
    storage::sanitize_filename,
};

use super::documents::to_iso;
use super::public_requests::{ALLOWED_EXTENSIONS, MAX_ATTACHMENT_BYTES};

#[derive(Serialize)]
pub struct MessageView {
    pub id: i64,
    pub author_id: Uuid,
    pub author_email: Option<String>,
    pub body: String,
    pub reply_to_id: Option<i64>,
    pub visibility: String,
    pub created_at: String,
    pub edited_at: Option<String>,
    pub attachments: Vec<MessageAttachmentView>,
    pub mentions: Vec<Uuid>,
}

#[derive(Serialize)]
pub struct MessageAttachmentView {
    pub id: Uuid,
    pub original_name: String,
    pub content_type: String,
    pub size_bytes: i64,
}

#[derive(Deserialize)]
pub struct MarkReadRequest {
    pub last_read_message_id: Option<i64>,
}

fn parse_kind(kind: &str) -> AppResult<TargetKind> {
    TargetKind::parse(kind)
        .ok_or_else(|| AppError::bad_request("unknown conversation kind"))
}

fn build_views(
    conn: &mut PgConnection,
    messages: Vec<ChatMessage>,
) -> AppResult<Vec<MessageView>> {
    let message_ids: Vec<i64> = messages.iter().map(|m| m.id).collect();

    let attachments: Vec<ChatAttachment> = chat_attachments::table
        .filter(chat_attachments::message_id.eq_any(&message_ids))
        .order(chat_attachments::created_at.asc())
        .load(conn)?;
    let mut attachments_by_message: HashMap<i64, Vec<MessageAttachmentView>> = HashMap::new();
    for attachment in attachments {
        attachments_by_message
            .entry(attachment.message_id)
            .or_default()
            .push(MessageAttachmentView {
                id: attachment.id,
                original_name: attachment.original_name,
                content_type: attachment.content_type,
                size_bytes: attachment.size_bytes,
            });
    }

    let mentions: Vec<(i64, Uuid)> = chat_mentions::table
        .filter(chat_mentions::message_id.eq_any(&message_ids))
        .select((chat_mentions::message_id, chat_mentions::user_id))
        .load(conn)?;
    let mut mentions_by_message: HashMap<i64, Vec<Uuid>> = HashMap::new();
    for (message_id, user_id) in mentions {
        mentions_by_message
            .entry(message_id)
            .or_default()
            .push(user_id);
    }

    let author_ids: Vec<Uuid> = messages.iter().map(|m| m.author_id).collect();
    let authors: HashMap<Uuid, String> = users::table
        .filter(users::id.eq_any(&author_ids))
        .select((users::id, users::email))
        .load::<(Uuid, String)>(conn)?
        .into_iter()
        .collect();

    Ok(messages
        .into_iter()
        .map(|message| MessageView {
            id: message.id,
            author_id: message.author_id,
            author_email: authors.get(&message.author_id).cloned(),
            body: message.body,
            reply_to_id: message.reply_to_id,
            visibility: message.visibility,
            created_at: to_iso(message.created_at),
            edited_at: message.edited_at.map(to_iso),
            attachments: attachments_by_message
                .remove(&message.id)
                .unwrap_or_default(),
            mentions: mentions_by_message.remove(&message.id).unwrap_or_default(),
        })
        .collect())
}

pub async fn list_messages(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((kind, target_id)): Path<(String, i64)>,
) -> AppResult<Json<Vec<MessageView>>> {
    let kind = parse_kind(&kind)?;
    let mut conn = state.db()?;
    chat::resolve_target(&mut conn, kind, target_id, &user)?;

    let messages = chat::visible_messages(&mut conn, kind, target_id, user.role.is_staff())?;
    Ok(Json(build_views(&mut conn, messages)?))
}

/// Multipart post: a `body` text part plus any number of `file` parts.
/// A submission with neither text nor files is a silent no-op, matching
/// an accidental empty composer send.
pub async fn post_message(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((kind, target_id)): Path<(String, i64)>,
    mut multipart: Multipart,
) -> AppResult<Response> {
    let kind = parse_kind(&kind)?;
    let mut conn = state.db()?;
    chat::resolve_target(&mut conn, kind, target_id, &user)?;

    let mut body = String::new();
    let mut visibility = chat::VISIBILITY_PUBLIC.to_string();
    let mut reply_to_id: Option<i64> = None;
    let mut files: Vec<(String, Option<String>, Vec<u8>)> = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| AppError::bad_request("malformed multipart body"))?
    {
        match field.name() {
            Some("body") => {
                body = field
                    .text()
                    .await
                    .map_err(|_| AppError::bad_request("invalid body field"))?;
            }
            Some("visibility") => {
                visibility = field
                    .text()
                    .await
                    .map_err(|_| AppError::bad_request("invalid visibility field"))?;
            }
            Some("reply_to") => {
                let raw = field
                    .text()
                    .await
                    .map_err(|_| AppError::bad_request("invalid reply_to field"))?;
                if !raw.trim().is_empty() {
                    reply_to_id = Some(
                        raw.trim()
                            .parse()
                            .map_err(|_| AppError::bad_request("invalid reply_to field"))?,
                    );
                }
            }
            Some("file") => {
                let name = sanitize_filename(field.file_name().unwrap_or("file"));
                let declared_type = field
                    .content_type()
                    .filter(|value| !value.is_empty())
                    .map(str::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|_| AppError::bad_request("failed to read upload"))?;
                files.push((name, declared_type, bytes.to_vec()));
            }
            _ => {}
        }
    }

    if body.trim().is_empty() && files.is_empty() {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    for (name, _, bytes) in &files {
        if bytes.len() > MAX_ATTACHMENT_BYTES {
            return Err(AppError::bad_request("attachment exceeds 25 MB"));
        }
        let extension = name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_lowercase())
            .unwrap_or_default();
        if !ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
            return Err(AppError::bad_request("file type not allowed"));
        }
    }

    // Attachment-only posts keep the empty body; the files carry the
    // content.
    let message = chat::post_message(
        &mut conn,
        kind,
        target_id,
        &user,
        chat::NewPost {
            body: &body,
            reply_to_id,
            visibility: &visibility,
        },
    )?;

    for (name, declared_type, bytes) in files {
        let attachment_id = Uuid::new_v4();
        let storage_key = format!(
            "chat/{}/{}/{}_{}",
            kind.as_str(),
            target_id,
            attachment_id,
            name
        );
        let size = bytes.len() as i64;
        // The browser-declared type is kept as metadata; only a missing
        // declaration falls back to a guess from the filename.
        let content_type = declared_type.unwrap_or_else(|| {
            mime_guess::from_path(&name)
                .first_or_octet_stream()
                .essence_str()
                .to_string()
        });
        state
            .storage
            .put_object(&storage_key, bytes)
            .await
            .map_err(AppError::internal)?;
        diesel::insert_into(chat_attachments::table)
            .values(NewChatAttachment {
                id: attachment_id,
                message_id: message.id,
                storage_key,
                original_name: name,
                content_type,
                size_bytes: size,
            })
            .execute(&mut conn)?;
    }

    let views = build_views(&mut conn, vec![message])?;
    let view = views
        .into_iter()
        .next()
        .ok_or_else(|| AppError::internal("posted message vanished"))?;
    Ok((StatusCode::CREATED, Json(view)).into_response())
}

/// Moves the caller's read watermark. Without an explicit id the whole
/// thread is marked read.
pub async fn mark_read(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((kind, target_id)): Path<(String, i64)>,
    Json(payload): Json<MarkReadRequest>,
) -> AppResult<StatusCode> {
    let kind = parse_kind(&kind)?;
    let mut conn = state.db()?;
    chat::resolve_target(&mut conn, kind, target_id, &user)?;

    let up_to = match payload.last_read_message_id {
        Some(id) => Some(id),
        None => chat_messages::table
            .filter(chat_messages::target_kind.eq(kind.as_str()))
            .filter(chat_messages::target_id.eq(target_id))
            .select(diesel::dsl::max(chat_messages::id))
            .first::<Option<i64>>(&mut conn)?,
    };

    if let Some(up_to) = up_to {
        chat::mark_read(&mut conn, kind, target_id, user.user_id, up_to)?;
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn unread_count(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<Value>> {
    let mut conn = state.db()?;
    let unread_total = chat::unread_total(&mut conn, &user)?;
    Ok(Json(json!({ "unread_total": unread_total })))
}

#[derive(Deserialize)]
pub struct AutocompleteQuery {
    pub q: Option<String>,
}

pub async fn mention_autocomplete(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    axum::extract::Query(params): axum::extract::Query<AutocompleteQuery>,
) -> AppResult<Json<Value>> {
    let query = params.q.unwrap_or_default();
    let query = query.trim();
    if query.is_empty() {
        return Ok(Json(json!({ "results": [] })));
    }

    let mut conn = state.db()?;
    let candidates = chat::mention_candidates(&mut conn, query, 10)?;
    let results: Vec<Value> = candidates
        .into_iter()
        .map(|candidate| {
            json!({
                "id": candidate.id,
                "label": candidate.company_name,
                "handle": format!("@{}", candidate.email),
                "email": candidate.email,
            })
        })
        .collect();
    Ok(Json(json!({ "results": results })))
}
