use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, NaiveDateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    forms::{self, FormSchema},
    jobs,
    models::{Document, DocumentTerms, DocumentType, NewDocument, NewDocumentTechnician},
    numbering,
    permissions::{
        self, can_close_document, can_create_document, can_edit_document, can_view_document,
        DocumentAccess, Role,
    },
    schema::{document_technicians, document_terms, document_types, documents},
    state::AppState,
};

const DEFAULT_PAGE_SIZE: i64 = 25;
const MAX_PAGE_SIZE: i64 = 100;

pub(crate) fn to_iso(value: NaiveDateTime) -> String {
    DateTime::<Utc>::from_naive_utc_and_offset(value, Utc).to_rfc3339()
}

#[derive(Serialize)]
pub struct DocumentSummary {
    pub id: Uuid,
    pub number: String,
    pub status: String,
    pub doc_type_id: Uuid,
    pub type_code: String,
    pub type_name: String,
    pub client_user_id: Option<Uuid>,
    pub owner_id: Option<Uuid>,
    pub created_by: Option<Uuid>,
    pub technician_ids: Vec<Uuid>,
    pub data: Value,
    pub created_at: String,
}

#[derive(Serialize)]
pub struct DocumentDetail {
    #[serde(flatten)]
    pub summary: DocumentSummary,
    pub terms: Option<TermsView>,
}

#[derive(Serialize)]
pub struct TermsView {
    pub key: String,
    pub title: String,
    pub body_html: String,
}

#[derive(Serialize)]
pub struct DocumentPage {
    pub items: Vec<DocumentSummary>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
}

#[derive(Deserialize)]
pub struct CreateDocumentRequest {
    pub doc_type_id: Uuid,
    pub client_user_id: Option<Uuid>,
    pub owner_id: Option<Uuid>,
    #[serde(default)]
    pub technician_ids: Vec<Uuid>,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub materials: Vec<Value>,
}

#[derive(Deserialize)]
pub struct UpdateDocumentRequest {
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub materials: Vec<Value>,
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
}

#[derive(Deserialize)]
pub struct AssignTechniciansRequest {
    pub technician_ids: Vec<Uuid>,
}

#[derive(Deserialize)]
pub struct ListDocumentsQuery {
    pub q: Option<String>,
    #[serde(rename = "type")]
    pub type_code: Option<String>,
    pub status: Option<String>,
    pub sort: Option<String>,
    pub dir: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

/// Validates the free-form payload against the type's schema and folds the
/// material rows in under their reserved key. Field errors come back as a
/// 422 keyed by field name.
fn validate_payload(
    doc_type: &DocumentType,
    data: &Map<String, Value>,
    materials: &[Value],
) -> Result<Value, Response> {
    let schema = FormSchema::from_value(&doc_type.schema);
    let mut errors = match schema.validate(data) {
        Ok(cleaned) => {
            let mut cleaned = cleaned;
            match forms::validate_materials(materials) {
                Ok(rows) => {
                    cleaned.insert(forms::MATERIALS_KEY.to_string(), Value::Array(rows));
                    return Ok(Value::Object(cleaned));
                }
                Err(errors) => errors,
            }
        }
        Err(errors) => errors,
    };
    if let Err(material_errors) = forms::validate_materials(materials) {
        errors.extend(material_errors);
    }
    Err((
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(json!({ "errors": errors })),
    )
        .into_response())
}

fn load_document(conn: &mut PgConnection, document_id: Uuid) -> AppResult<(Document, Vec<Uuid>)> {
    let document: Document = documents::table.find(document_id).first(conn)?;
    let technician_ids = document_technicians::table
        .filter(document_technicians::document_id.eq(document_id))
        .select(document_technicians::user_id)
        .load::<Uuid>(conn)?;
    Ok((document, technician_ids))
}

/// Loads a document, answering 404 unless the caller may view it.
fn load_visible_document(
    conn: &mut PgConnection,
    document_id: Uuid,
    user: &AuthenticatedUser,
) -> AppResult<(Document, Vec<Uuid>)> {
    let (document, technician_ids) = load_document(conn, document_id)?;
    let access = DocumentAccess {
        status: &document.status,
        client_user_id: document.client_user_id,
        technician_ids: &technician_ids,
    };
    if !can_view_document(user.user_id, user.role, &access) {
        return Err(AppError::not_found());
    }
    Ok((document, technician_ids))
}

fn build_summary(
    document: Document,
    doc_type: &DocumentType,
    technician_ids: Vec<Uuid>,
) -> DocumentSummary {
    DocumentSummary {
        id: document.id,
        number: document.number,
        status: document.status,
        doc_type_id: document.doc_type_id,
        type_code: doc_type.code.clone(),
        type_name: doc_type.name.clone(),
        client_user_id: document.client_user_id,
        owner_id: document.owner_id,
        created_by: document.created_by,
        technician_ids,
        data: document.data,
        created_at: to_iso(document.created_at),
    }
}

pub async fn create_document(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateDocumentRequest>,
) -> AppResult<Response> {
    if !can_create_document(user.role) {
        return Err(AppError::not_found());
    }

    let mut conn = state.db()?;
    let doc_type: DocumentType = document_types::table
        .filter(document_types::id.eq(payload.doc_type_id))
        .filter(document_types::is_active.eq(true))
        .first(&mut conn)
        .optional()?
        .ok_or_else(|| AppError::bad_request("unknown document type"))?;

    let data = match validate_payload(&doc_type, &payload.data, &payload.materials) {
        Ok(data) => data,
        Err(response) => return Ok(response),
    };

    let owner_id = payload.owner_id.unwrap_or(user.user_id);
    let document_id = Uuid::new_v4();

    // Number allocation shares the creation transaction, so a failed
    // insert rolls the counter back with it.
    let document = conn.transaction::<Document, diesel::result::Error, _>(|conn| {
        let number = numbering::allocate_number_locked(conn, doc_type.id)?;
        let document: Document = diesel::insert_into(documents::table)
            .values(NewDocument {
                id: document_id,
                doc_type_id: doc_type.id,
                number,
                status: permissions::STATUS_DRAFT.to_string(),
                client_user_id: payload.client_user_id,
                owner_id: Some(owner_id),
                created_by: Some(user.user_id),
                data: data.clone(),
            })
            .get_result(conn)?;

        let assignments: Vec<NewDocumentTechnician> = payload
            .technician_ids
            .iter()
            .map(|&user_id| NewDocumentTechnician {
                document_id,
                user_id,
            })
            .collect();
        diesel::insert_into(document_technicians::table)
            .values(assignments)
            .on_conflict_do_nothing()
            .execute(conn)?;

        Ok(document)
    })?;

    tracing::info!(document_id = %document.id, number = %document.number, "document created");

    let summary = build_summary(document, &doc_type, payload.technician_ids);
    Ok((StatusCode::CREATED, Json(summary)).into_response())
}

pub async fn list_documents(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(params): Query<ListDocumentsQuery>,
) -> AppResult<Json<DocumentPage>> {
    let mut conn = state.db()?;

    let type_id: Option<Uuid> = match &params.type_code {
        Some(code) => Some(
            document_types::table
                .filter(document_types::code.eq(code))
                .select(document_types::id)
                .first(&mut conn)
                .optional()?
                .ok_or_else(|| AppError::bad_request("unknown document type"))?,
        ),
        None => None,
    };

    if let Some(status) = &params.status {
        if !permissions::is_valid_status(status) {
            return Err(AppError::bad_request("unknown status"));
        }
    }

    let assigned_ids: Vec<Uuid> = if user.role == Role::Technician {
        document_technicians::table
            .filter(document_technicians::user_id.eq(user.user_id))
            .select(document_technicians::document_id)
            .load(&mut conn)?
    } else {
        Vec::new()
    };

    let filtered = || {
        let mut query = documents::table.into_boxed();
        match user.role {
            Role::Admin | Role::Manager => {}
            Role::Technician => {
                query = query.filter(documents::id.eq_any(assigned_ids.clone()));
            }
            Role::Client => {
                query = query
                    .filter(documents::client_user_id.eq(user.user_id))
                    .filter(documents::status.eq(permissions::STATUS_FINAL));
            }
        }
        if let Some(type_id) = type_id {
            query = query.filter(documents::doc_type_id.eq(type_id));
        }
        if let Some(status) = &params.status {
            query = query.filter(documents::status.eq(status.clone()));
        }
        if let Some(q) = params.q.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
            let pattern = format!("%{}%", q.replace('%', "\\%").replace('_', "\\_"));
            query = query.filter(documents::number.ilike(pattern));
        }
        query
    };

    let total: i64 = filtered().count().get_result(&mut conn)?;

    let descending = params.dir.as_deref() != Some("asc");
    let mut query = filtered();
    query = match (params.sort.as_deref().unwrap_or("created_at"), descending) {
        ("number", false) => query.order(documents::number.asc()),
        ("number", true) => query.order(documents::number.desc()),
        ("status", false) => query.order(documents::status.asc()),
        ("status", true) => query.order(documents::status.desc()),
        ("created_at", false) => query.order(documents::created_at.asc()),
        ("created_at", true) => query.order(documents::created_at.desc()),
        _ => return Err(AppError::bad_request("unknown sort field")),
    };

    let page = params.page.unwrap_or(1).max(1);
    let per_page = params
        .per_page
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);

    let rows: Vec<Document> = query
        .limit(per_page)
        .offset((page - 1) * per_page)
        .load(&mut conn)?;

    let types: HashMap<Uuid, DocumentType> = document_types::table
        .load::<DocumentType>(&mut conn)?
        .into_iter()
        .map(|t| (t.id, t))
        .collect();
    let document_ids: Vec<Uuid> = rows.iter().map(|d| d.id).collect();
    let mut technicians_by_document: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    let assignments: Vec<(Uuid, Uuid)> = document_technicians::table
        .filter(document_technicians::document_id.eq_any(&document_ids))
        .select((
            document_technicians::document_id,
            document_technicians::user_id,
        ))
        .load(&mut conn)?;
    for (document_id, user_id) in assignments {
        technicians_by_document
            .entry(document_id)
            .or_default()
            .push(user_id);
    }

    let mut items = Vec::with_capacity(rows.len());
    for document in rows {
        let Some(doc_type) = types.get(&document.doc_type_id) else {
            continue;
        };
        let technician_ids = technicians_by_document
            .remove(&document.id)
            .unwrap_or_default();
        items.push(build_summary(document, doc_type, technician_ids));
    }

    Ok(Json(DocumentPage {
        items,
        total,
        page,
        per_page,
    }))
}

pub async fn get_document(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(document_id): Path<Uuid>,
) -> AppResult<Json<DocumentDetail>> {
    let mut conn = state.db()?;
    let (document, technician_ids) = load_visible_document(&mut conn, document_id, &user)?;

    let doc_type: DocumentType = document_types::table
        .find(document.doc_type_id)
        .first(&mut conn)?;
    let terms = resolve_terms(&mut conn, &doc_type)?;

    Ok(Json(DocumentDetail {
        summary: build_summary(document, &doc_type, technician_ids),
        terms,
    }))
}

/// The type's configured terms win; without one the active `default` entry
/// applies, then the first active entry by key; failing all three, the
/// document renders without a terms block.
fn resolve_terms(
    conn: &mut PgConnection,
    doc_type: &DocumentType,
) -> AppResult<Option<TermsView>> {
    let configured: Option<DocumentTerms> = match doc_type.terms_id {
        Some(terms_id) => document_terms::table
            .find(terms_id)
            .filter(document_terms::is_active.eq(true))
            .first(conn)
            .optional()?,
        None => None,
    };
    let terms = match configured {
        Some(terms) => Some(terms),
        None => document_terms::table
            .filter(document_terms::key.eq("default"))
            .filter(document_terms::is_active.eq(true))
            .first(conn)
            .optional()?,
    };
    let terms = match terms {
        Some(terms) => Some(terms),
        None => document_terms::table
            .filter(document_terms::is_active.eq(true))
            .order(document_terms::key.asc())
            .first(conn)
            .optional()?,
    };
    Ok(terms.map(|terms| TermsView {
        key: terms.key,
        title: terms.title,
        body_html: terms.body_html,
    }))
}

pub async fn update_document(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(document_id): Path<Uuid>,
    Json(payload): Json<UpdateDocumentRequest>,
) -> AppResult<Response> {
    let mut conn = state.db()?;
    let (document, technician_ids) = load_visible_document(&mut conn, document_id, &user)?;

    let access = DocumentAccess {
        status: &document.status,
        client_user_id: document.client_user_id,
        technician_ids: &technician_ids,
    };
    if !can_edit_document(user.user_id, user.role, &access) {
        if permissions::is_terminal_status(&document.status) {
            return Err(AppError::conflict("document is closed"));
        }
        return Err(AppError::not_found());
    }

    let doc_type: DocumentType = document_types::table
        .find(document.doc_type_id)
        .first(&mut conn)?;

    // Full replace: the payload is the new data, not a patch.
    let data = match validate_payload(&doc_type, &payload.data, &payload.materials) {
        Ok(data) => data,
        Err(response) => return Ok(response),
    };

    let updated: Document = diesel::update(documents::table.find(document_id))
        .set(documents::data.eq(&data))
        .get_result(&mut conn)?;

    Ok(Json(build_summary(updated, &doc_type, technician_ids)).into_response())
}

pub async fn update_status(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(document_id): Path<Uuid>,
    Json(payload): Json<UpdateStatusRequest>,
) -> AppResult<Json<DocumentSummary>> {
    // Terminal states have their own endpoints.
    let allowed = [
        permissions::STATUS_DRAFT,
        permissions::STATUS_IN_PROGRESS,
        permissions::STATUS_READY,
    ];
    if !allowed.contains(&payload.status.as_str()) {
        return Err(AppError::bad_request("unknown or reserved status"));
    }

    let mut conn = state.db()?;
    let (document, technician_ids) = load_visible_document(&mut conn, document_id, &user)?;

    let access = DocumentAccess {
        status: &document.status,
        client_user_id: document.client_user_id,
        technician_ids: &technician_ids,
    };
    if !can_edit_document(user.user_id, user.role, &access) {
        if permissions::is_terminal_status(&document.status) {
            return Err(AppError::conflict("document is closed"));
        }
        return Err(AppError::not_found());
    }

    let updated: Document = diesel::update(documents::table.find(document_id))
        .set(documents::status.eq(&payload.status))
        .get_result(&mut conn)?;

    let doc_type: DocumentType = document_types::table
        .find(updated.doc_type_id)
        .first(&mut conn)?;
    Ok(Json(build_summary(updated, &doc_type, technician_ids)))
}

pub async fn close_document(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(document_id): Path<Uuid>,
) -> AppResult<Json<DocumentSummary>> {
    if !can_close_document(user.role) {
        return Err(AppError::not_found());
    }

    let mut conn = state.db()?;
    let (document, technician_ids) = load_visible_document(&mut conn, document_id, &user)?;
    if permissions::is_terminal_status(&document.status) {
        return Err(AppError::conflict("document is already closed"));
    }

    let updated: Document = diesel::update(documents::table.find(document_id))
        .set(documents::status.eq(permissions::STATUS_FINAL))
        .get_result(&mut conn)?;

    jobs::enqueue_job(
        &mut conn,
        jobs::JOB_RENDER_DOCUMENT,
        json!({ "document_id": document_id }),
        None,
    )
    .map_err(|err| AppError::internal(err))?;

    tracing::info!(document_id = %document_id, number = %updated.number, "document closed");

    let doc_type: DocumentType = document_types::table
        .find(updated.doc_type_id)
        .first(&mut conn)?;
    Ok(Json(build_summary(updated, &doc_type, technician_ids)))
}

pub async fn cancel_document(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(document_id): Path<Uuid>,
) -> AppResult<Json<DocumentSummary>> {
    if !can_close_document(user.role) {
        return Err(AppError::not_found());
    }

    let mut conn = state.db()?;
    let (document, technician_ids) = load_visible_document(&mut conn, document_id, &user)?;
    if document.status == permissions::STATUS_FINAL {
        return Err(AppError::conflict("finalized documents cannot be cancelled"));
    }

    let updated: Document = diesel::update(documents::table.find(document_id))
        .set(documents::status.eq(permissions::STATUS_CANCELLED))
        .get_result(&mut conn)?;

    let doc_type: DocumentType = document_types::table
        .find(updated.doc_type_id)
        .first(&mut conn)?;
    Ok(Json(build_summary(updated, &doc_type, technician_ids)))
}

pub async fn delete_document(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(document_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    if !user.role.is_staff() {
        return Err(AppError::not_found());
    }

    let mut conn = state.db()?;
    let deleted = diesel::delete(documents::table.find(document_id)).execute(&mut conn)?;
    if deleted == 0 {
        return Err(AppError::not_found());
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn assign_technicians(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(document_id): Path<Uuid>,
    Json(payload): Json<AssignTechniciansRequest>,
) -> AppResult<Json<Value>> {
    if !user.role.is_staff() {
        return Err(AppError::not_found());
    }

    let mut conn = state.db()?;
    let (document, _) = load_visible_document(&mut conn, document_id, &user)?;
    if permissions::is_terminal_status(&document.status) {
        return Err(AppError::conflict("document is closed"));
    }

    // Replace the assignment set wholesale.
    let technician_ids = conn.transaction::<Vec<Uuid>, diesel::result::Error, _>(|conn| {
        diesel::delete(
            document_technicians::table.filter(document_technicians::document_id.eq(document_id)),
        )
        .execute(conn)?;
        let rows: Vec<NewDocumentTechnician> = payload
            .technician_ids
            .iter()
            .map(|&user_id| NewDocumentTechnician {
                document_id,
                user_id,
            })
            .collect();
        diesel::insert_into(document_technicians::table)
            .values(rows)
            .on_conflict_do_nothing()
            .execute(conn)?;
        document_technicians::table
            .filter(document_technicians::document_id.eq(document_id))
            .select(document_technicians::user_id)
            .load(conn)
    })?;

    Ok(Json(json!({ "technician_ids": technician_ids })))
}

#[derive(Serialize)]
pub struct DocumentTypeView {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub schema: Value,
}

/// Active document types with their schemas, for form rendering.
pub async fn list_document_types(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
) -> AppResult<Json<Vec<DocumentTypeView>>> {
    let mut conn = state.db()?;
    let types: Vec<DocumentType> = document_types::table
        .filter(document_types::is_active.eq(true))
        .order(document_types::code.asc())
        .load(&mut conn)?;
    Ok(Json(
        types
            .into_iter()
            .map(|t| DocumentTypeView {
                id: t.id,
                code: t.code,
                name: t.name,
                schema: t.schema,
            })
            .collect(),
    ))
}
