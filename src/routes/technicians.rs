use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    models::{NewTechnician, Technician},
    schema::{public_requests, technicians},
    state::AppState,
};

#[derive(Serialize)]
pub struct TechnicianView {
    pub id: Uuid,
    pub name: String,
    pub company_name: String,
    pub company_cif: String,
    pub email: String,
    pub phone: String,
    pub category: String,
    pub user_id: Option<Uuid>,
    pub is_active: bool,
}

#[derive(Deserialize)]
pub struct CreateTechnicianRequest {
    pub name: String,
    #[serde(default)]
    pub company_name: String,
    #[serde(default)]
    pub company_cif: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub category: String,
    pub user_id: Option<Uuid>,
}

#[derive(Deserialize)]
pub struct UpdateTechnicianRequest {
    pub name: Option<String>,
    pub company_name: Option<String>,
    pub company_cif: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub category: Option<String>,
    pub user_id: Option<Option<Uuid>>,
    pub is_active: Option<bool>,
}

#[derive(Deserialize)]
pub struct ListTechniciansQuery {
    pub q: Option<String>,
    pub category: Option<String>,
}

fn view(technician: Technician) -> TechnicianView {
    TechnicianView {
        id: technician.id,
        name: technician.name,
        company_name: technician.company_name,
        company_cif: technician.company_cif,
        email: technician.email,
        phone: technician.phone,
        category: technician.category,
        user_id: technician.user_id,
        is_active: technician.is_active,
    }
}

pub async fn list_technicians(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(params): Query<ListTechniciansQuery>,
) -> AppResult<Json<Vec<TechnicianView>>> {
    if !user.role.is_staff() {
        return Err(AppError::not_found());
    }
    let mut conn = state.db()?;

    let mut query = technicians::table
        .order(technicians::name.asc())
        .into_boxed();
    if let Some(category) = params.category.as_deref().filter(|v| !v.is_empty()) {
        query = query.filter(technicians::category.eq(category.to_string()));
    }
    if let Some(q) = params.q.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
        let pattern = format!("%{}%", q.replace('%', "\\%").replace('_', "\\_"));
        query = query.filter(
            technicians::name
                .ilike(pattern.clone())
                .or(technicians::company_name.ilike(pattern.clone()))
                .or(technicians::email.ilike(pattern)),
        );
    }

    let rows: Vec<Technician> = query.load(&mut conn)?;
    Ok(Json(rows.into_iter().map(view).collect()))
}

pub async fn create_technician(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateTechnicianRequest>,
) -> AppResult<(StatusCode, Json<TechnicianView>)> {
    if !user.role.is_staff() {
        return Err(AppError::not_found());
    }
    let name = payload.name.trim();
    if name.is_empty() {
        return Err(AppError::bad_request("name must not be empty"));
    }

    let mut conn = state.db()?;
    let technician: Technician = diesel::insert_into(technicians::table)
        .values(NewTechnician {
            id: Uuid::new_v4(),
            name: name.to_string(),
            company_name: payload.company_name.trim().to_string(),
            company_cif: payload.company_cif.trim().to_string(),
            email: payload.email.trim().to_lowercase(),
            phone: payload.phone.trim().to_string(),
            category: payload.category.trim().to_string(),
            user_id: payload.user_id,
            is_active: true,
        })
        .get_result(&mut conn)?;
    Ok((StatusCode::CREATED, Json(view(technician))))
}

pub async fn update_technician(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(technician_id): Path<Uuid>,
    Json(payload): Json<UpdateTechnicianRequest>,
) -> AppResult<Json<TechnicianView>> {
    if !user.role.is_staff() {
        return Err(AppError::not_found());
    }
    let mut conn = state.db()?;
    let _: Technician = technicians::table.find(technician_id).first(&mut conn)?;

    conn.transaction::<(), diesel::result::Error, _>(|conn| {
        if let Some(name) = &payload.name {
            diesel::update(technicians::table.find(technician_id))
                .set(technicians::name.eq(name.trim()))
                .execute(conn)?;
        }
        if let Some(company_name) = &payload.company_name {
            diesel::update(technicians::table.find(technician_id))
                .set(technicians::company_name.eq(company_name.trim()))
                .execute(conn)?;
        }
        if let Some(company_cif) = &payload.company_cif {
            diesel::update(technicians::table.find(technician_id))
                .set(technicians::company_cif.eq(company_cif.trim()))
                .execute(conn)?;
        }
        if let Some(email) = &payload.email {
            diesel::update(technicians::table.find(technician_id))
                .set(technicians::email.eq(email.trim().to_lowercase()))
                .execute(conn)?;
        }
        if let Some(phone) = &payload.phone {
            diesel::update(technicians::table.find(technician_id))
                .set(technicians::phone.eq(phone.trim()))
                .execute(conn)?;
        }
        if let Some(category) = &payload.category {
            diesel::update(technicians::table.find(technician_id))
                .set(technicians::category.eq(category.trim()))
                .execute(conn)?;
        }
        if let Some(user_id) = payload.user_id {
            diesel::update(technicians::table.find(technician_id))
                .set(technicians::user_id.eq(user_id))
                .execute(conn)?;
        }
        if let Some(is_active) = payload.is_active {
            diesel::update(technicians::table.find(technician_id))
                .set(technicians::is_active.eq(is_active))
                .execute(conn)?;
        }
        Ok(())
    })?;

    let technician: Technician = technicians::table.find(technician_id).first(&mut conn)?;
    Ok(Json(view(technician)))
}

pub async fn delete_technician(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(technician_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    if !user.role.is_staff() {
        return Err(AppError::not_found());
    }
    let mut conn = state.db()?;

    let assigned: i64 = public_requests::table
        .filter(public_requests::assigned_to.eq(technician_id))
        .count()
        .get_result(&mut conn)?;
    if assigned > 0 {
        return Err(AppError::conflict("technician still has assigned requests"));
    }

    let deleted = diesel::delete(technicians::table.find(technician_id)).execute(&mut conn)?;
    if deleted == 0 {
        return Err(AppError::not_found());
    }
    Ok(StatusCode::NO_CONTENT)
}
