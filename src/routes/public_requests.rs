use axum::{
    extract::{Multipart, Path, Query, State},
    http::{
        header::{CONTENT_DISPOSITION, CONTENT_TYPE},
        HeaderMap, StatusCode,
    },
    response::{IntoResponse, Response},
    Json,
};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    abuse,
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    middleware::{client_ip, user_agent},
    models::{
        NewPublicRequest, NewPublicRequestAttachment, PublicRequest, PublicRequestAttachment,
    },
    schema::{public_request_attachments, public_requests, request_statuses, technicians, users},
    state::AppState,
    storage::sanitize_filename,
};

use super::documents::to_iso;

pub(crate) const MAX_ATTACHMENT_BYTES: usize = 25 * 1024 * 1024;
pub(crate) const ALLOWED_EXTENSIONS: &[&str] = &[
    "pdf", "png", "jpg", "jpeg", "doc", "docx", "xls", "xlsx", "txt",
];

#[derive(Serialize)]
pub struct PublicRequestView {
    pub id: i64,
    pub user_id: Option<Uuid>,
    pub email: String,
    pub phone: String,
    pub company: String,
    pub company_cif: String,
    pub description: String,
    pub status_id: Option<Uuid>,
    pub assigned_to: Option<Uuid>,
    pub attachments: Vec<AttachmentView>,
    pub created_at: String,
}

#[derive(Serialize)]
pub struct AttachmentView {
    pub id: Uuid,
    pub original_name: String,
    pub uploaded_at: String,
}

#[derive(Deserialize)]
pub struct CreatePublicRequestBody {
    pub email: String,
    pub phone: String,
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub company_cif: String,
    pub description: String,
}

#[derive(Deserialize)]
pub struct UpdatePublicRequestBody {
    pub status_id: Option<Uuid>,
    pub assigned_to: Option<Option<Uuid>>,
}

#[derive(Deserialize)]
pub struct ListPublicRequestsQuery {
    pub q: Option<String>,
    pub status_id: Option<Uuid>,
    pub assigned_to: Option<Uuid>,
}

fn build_view(request: PublicRequest, attachments: Vec<PublicRequestAttachment>) -> PublicRequestView {
    PublicRequestView {
        id: request.id,
        user_id: request.user_id,
        email: request.email,
        phone: request.phone,
        company: request.company,
        company_cif: request.company_cif,
        description: request.description,
        status_id: request.status_id,
        assigned_to: request.assigned_to,
        attachments: attachments
            .into_iter()
            .map(|attachment| AttachmentView {
                id: attachment.id,
                original_name: attachment.original_name,
                uploaded_at: to_iso(attachment.uploaded_at),
            })
            .collect(),
        created_at: to_iso(request.created_at),
    }
}

/// Anonymous intake endpoint. Per-IP throttled; a registered account with
/// the same email gets linked so the requester sees it after logging in.
pub async fn create_public_request(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreatePublicRequestBody>,
) -> AppResult<(StatusCode, Json<PublicRequestView>)> {
    let email = payload.email.trim().to_lowercase();
    let description = payload.description.trim().to_string();
    if email.is_empty() || !email.contains('@') {
        return Err(AppError::bad_request("a valid email is required"));
    }
    if description.is_empty() {
        return Err(AppError::bad_request("description is required"));
    }

    let mut conn = state.db()?;
    let ip = client_ip(&headers);
    abuse::enforce_rate_limit(
        &mut conn,
        &abuse::PUBLIC_REQUEST_CREATE,
        None,
        ip.as_deref(),
        "/api/public/requests",
        &user_agent(&headers),
    )?;

    let linked_user: Option<Uuid> = users::table
        .filter(users::email.eq(&email))
        .filter(users::is_active.eq(true))
        .select(users::id)
        .first(&mut conn)
        .optional()?;

    let default_status: Option<Uuid> = request_statuses::table
        .filter(request_statuses::is_active.eq(true))
        .order(request_statuses::sort_order.asc())
        .select(request_statuses::id)
        .first(&mut conn)
        .optional()?;

    let request: PublicRequest = diesel::insert_into(public_requests::table)
        .values(NewPublicRequest {
            user_id: linked_user,
            email,
            phone: payload.phone.trim().to_string(),
            company: payload.company.trim().to_string(),
            company_cif: payload.company_cif.trim().to_string(),
            description,
            status_id: default_status,
            assigned_to: None,
        })
        .get_result(&mut conn)?;

    tracing::info!(request_id = request.id, "public request received");
    Ok((StatusCode::CREATED, Json(build_view(request, Vec::new()))))
}

pub async fn list_public_requests(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(params): Query<ListPublicRequestsQuery>,
) -> AppResult<Json<Vec<PublicRequestView>>> {
    if !user.role.is_staff() {
        return Err(AppError::not_found());
    }
    let mut conn = state.db()?;

    let mut query = public_requests::table
        .order(public_requests::created_at.desc())
        .into_boxed();
    if let Some(status_id) = params.status_id {
        query = query.filter(public_requests::status_id.eq(status_id));
    }
    if let Some(assigned_to) = params.assigned_to {
        query = query.filter(public_requests::assigned_to.eq(assigned_to));
    }
    if let Some(q) = params.q.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
        let pattern = format!("%{}%", q.replace('%', "\\%").replace('_', "\\_"));
        query = query.filter(
            public_requests::email
                .ilike(pattern.clone())
                .or(public_requests::company.ilike(pattern)),
        );
    }

    let rows: Vec<PublicRequest> = query.load(&mut conn)?;
    let attachments: Vec<PublicRequestAttachment> = PublicRequestAttachment::belonging_to(&rows)
        .load(&mut conn)?;
    let grouped = attachments.grouped_by(&rows);

    Ok(Json(
        rows.into_iter()
            .zip(grouped)
            .map(|(request, attachments)| build_view(request, attachments))
            .collect(),
    ))
}

fn load_visible_request(
    conn: &mut PgConnection,
    request_id: i64,
    user: &AuthenticatedUser,
) -> AppResult<PublicRequest> {
    let request: PublicRequest = public_requests::table.find(request_id).first(conn)?;
    let visible = if user.role.is_staff() {
        true
    } else if request.user_id == Some(user.user_id) {
        true
    } else {
        // A technician sees requests assigned to their technician record.
        let mine: Vec<Uuid> = technicians::table
            .filter(technicians::user_id.eq(user.user_id))
            .select(technicians::id)
            .load(conn)?;
        request
            .assigned_to
            .map(|assigned| mine.contains(&assigned))
            .unwrap_or(false)
    };
    if !visible {
        return Err(AppError::not_found());
    }
    Ok(request)
}

pub async fn get_public_request(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(request_id): Path<i64>,
) -> AppResult<Json<PublicRequestView>> {
    let mut conn = state.db()?;
    let request = load_visible_request(&mut conn, request_id, &user)?;
    let attachments: Vec<PublicRequestAttachment> = public_request_attachments::table
        .filter(public_request_attachments::request_id.eq(request_id))
        .order(public_request_attachments::uploaded_at.asc())
        .load(&mut conn)?;
    Ok(Json(build_view(request, attachments)))
}

pub async fn update_public_request(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(request_id): Path<i64>,
    Json(payload): Json<UpdatePublicRequestBody>,
) -> AppResult<Json<PublicRequestView>> {
    if !user.role.is_staff() {
        return Err(AppError::not_found());
    }
    let mut conn = state.db()?;
    let _ = load_visible_request(&mut conn, request_id, &user)?;

    if let Some(status_id) = payload.status_id {
        let known: bool = diesel::select(diesel::dsl::exists(
            request_statuses::table.filter(request_statuses::id.eq(status_id)),
        ))
        .get_result(&mut conn)?;
        if !known {
            return Err(AppError::bad_request("unknown status"));
        }
        diesel::update(public_requests::table.find(request_id))
            .set(public_requests::status_id.eq(status_id))
            .execute(&mut conn)?;
    }
    if let Some(assigned_to) = payload.assigned_to {
        if let Some(technician_id) = assigned_to {
            let known: bool = diesel::select(diesel::dsl::exists(
                technicians::table.filter(technicians::id.eq(technician_id)),
            ))
            .get_result(&mut conn)?;
            if !known {
                return Err(AppError::bad_request("unknown technician"));
            }
        }
        diesel::update(public_requests::table.find(request_id))
            .set(public_requests::assigned_to.eq(assigned_to))
            .execute(&mut conn)?;
    }

    let request: PublicRequest = public_requests::table.find(request_id).first(&mut conn)?;
    let attachments: Vec<PublicRequestAttachment> = public_request_attachments::table
        .filter(public_request_attachments::request_id.eq(request_id))
        .load(&mut conn)?;
    Ok(Json(build_view(request, attachments)))
}

pub async fn delete_public_request(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(request_id): Path<i64>,
) -> AppResult<StatusCode> {
    if !user.role.is_staff() {
        return Err(AppError::not_found());
    }
    let mut conn = state.db()?;

    let keys: Vec<String> = public_request_attachments::table
        .filter(public_request_attachments::request_id.eq(request_id))
        .select(public_request_attachments::storage_key)
        .load(&mut conn)?;

    let deleted = diesel::delete(public_requests::table.find(request_id)).execute(&mut conn)?;
    if deleted == 0 {
        return Err(AppError::not_found());
    }

    // Stored bytes go best-effort; an orphaned object is not worth a 500.
    for key in keys {
        if let Err(err) = state.storage.delete_object(&key).await {
            tracing::warn!(key = %key, error = %err, "failed to delete stored attachment");
        }
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Anonymous upload used by the public intake form. Rejected extensions
/// land in the abuse ledger, which feeds the auto-block threshold.
pub async fn upload_attachment(
    State(state): State<AppState>,
    Path(request_id): Path<i64>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<AttachmentView>)> {
    let mut conn = state.db()?;
    let exists: bool = diesel::select(diesel::dsl::exists(
        public_requests::table.filter(public_requests::id.eq(request_id)),
    ))
    .get_result(&mut conn)?;
    if !exists {
        return Err(AppError::not_found());
    }

    let ip = client_ip(&headers);
    let agent = user_agent(&headers);
    abuse::enforce_rate_limit(
        &mut conn,
        &abuse::PUBLIC_REQUEST_CREATE,
        None,
        ip.as_deref(),
        "/api/public/requests/attachments",
        &agent,
    )?;

    let mut stored: Option<(String, Vec<u8>)> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| AppError::bad_request("malformed multipart body"))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let original_name = sanitize_filename(field.file_name().unwrap_or("file"));
        let bytes = field
            .bytes()
            .await
            .map_err(|_| AppError::bad_request("failed to read upload"))?;
        stored = Some((original_name, bytes.to_vec()));
        break;
    }
    let Some((original_name, bytes)) = stored else {
        return Err(AppError::bad_request("missing file field"));
    };

    if bytes.len() > MAX_ATTACHMENT_BYTES {
        return Err(AppError::bad_request("attachment exceeds 25 MB"));
    }

    let extension = original_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_default();
    if !ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
        let _ = abuse::log_abuse(
            &mut conn,
            ip.as_deref(),
            None,
            "/api/public/requests/attachments",
            "blocked_extension",
            &agent,
        );
        return Err(AppError::bad_request("file type not allowed"));
    }

    let attachment_id = Uuid::new_v4();
    let storage_key = format!("public_requests/{request_id}/{attachment_id}_{original_name}");
    state
        .storage
        .put_object(&storage_key, bytes)
        .await
        .map_err(AppError::internal)?;

    let attachment: PublicRequestAttachment =
        diesel::insert_into(public_request_attachments::table)
            .values(NewPublicRequestAttachment {
                id: attachment_id,
                request_id,
                storage_key,
                original_name,
            })
            .get_result(&mut conn)?;

    Ok((
        StatusCode::CREATED,
        Json(AttachmentView {
            id: attachment.id,
            original_name: attachment.original_name,
            uploaded_at: to_iso(attachment.uploaded_at),
        }),
    ))
}

pub async fn download_attachment(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((request_id, attachment_id)): Path<(i64, Uuid)>,
) -> AppResult<Response> {
    let mut conn = state.db()?;
    let _ = load_visible_request(&mut conn, request_id, &user)?;

    let attachment: PublicRequestAttachment = public_request_attachments::table
        .find(attachment_id)
        .filter(public_request_attachments::request_id.eq(request_id))
        .first(&mut conn)?;

    let bytes = state
        .storage
        .get_object(&attachment.storage_key)
        .await
        .map_err(AppError::internal)?;

    let mime = mime_guess::from_path(&attachment.original_name).first_or_octet_stream();
    let encoded = percent_encoding::utf8_percent_encode(
        &attachment.original_name,
        percent_encoding::NON_ALPHANUMERIC,
    );
    let disposition = format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        attachment.original_name, encoded
    );

    Ok((
        [
            (CONTENT_TYPE, mime.essence_str().to_string()),
            (CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

pub async fn delete_attachment(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((request_id, attachment_id)): Path<(i64, Uuid)>,
) -> AppResult<StatusCode> {
    if !user.role.is_staff() {
        return Err(AppError::not_found());
    }
    let mut conn = state.db()?;

    let attachment: PublicRequestAttachment = public_request_attachments::table
        .find(attachment_id)
        .filter(public_request_attachments::request_id.eq(request_id))
        .first(&mut conn)?;

    diesel::delete(public_request_attachments::table.find(attachment_id)).execute(&mut conn)?;

    if let Err(err) = state.storage.delete_object(&attachment.storage_key).await {
        tracing::warn!(key = %attachment.storage_key, error = %err, "failed to delete stored attachment");
    }
    Ok(StatusCode::NO_CONTENT)
}
