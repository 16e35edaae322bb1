use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    models::{NewRequestStatus, RequestStatus},
    schema::{public_requests, request_statuses, tickets},
    state::AppState,
};

#[derive(Serialize)]
pub struct StatusView {
    pub id: Uuid,
    pub name: String,
    pub is_active: bool,
    pub sort_order: i32,
}

#[derive(Deserialize)]
pub struct CreateStatusRequest {
    pub name: String,
    #[serde(default)]
    pub sort_order: Option<i32>,
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub name: Option<String>,
    pub is_active: Option<bool>,
    pub sort_order: Option<i32>,
}

fn view(status: RequestStatus) -> StatusView {
    StatusView {
        id: status.id,
        name: status.name,
        is_active: status.is_active,
        sort_order: status.sort_order,
    }
}

/// Every authenticated user can read the list; it feeds filter dropdowns.
pub async fn list_statuses(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
) -> AppResult<Json<Vec<StatusView>>> {
    let mut conn = state.db()?;
    let rows: Vec<RequestStatus> = request_statuses::table
        .filter(request_statuses::is_active.eq(true))
        .order(request_statuses::sort_order.asc())
        .load(&mut conn)?;
    Ok(Json(rows.into_iter().map(view).collect()))
}

pub async fn create_status(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateStatusRequest>,
) -> AppResult<(StatusCode, Json<StatusView>)> {
    if !user.role.is_staff() {
        return Err(AppError::not_found());
    }
    let name = payload.name.trim();
    if name.is_empty() {
        return Err(AppError::bad_request("name must not be empty"));
    }

    let mut conn = state.db()?;
    let sort_order = match payload.sort_order {
        Some(order) => order,
        None => {
            let highest: Option<i32> = request_statuses::table
                .select(diesel::dsl::max(request_statuses::sort_order))
                .first(&mut conn)?;
            highest.unwrap_or(0) + 10
        }
    };

    let status: RequestStatus = diesel::insert_into(request_statuses::table)
        .values(NewRequestStatus {
            id: Uuid::new_v4(),
            name: name.to_string(),
            is_active: true,
            sort_order,
        })
        .get_result(&mut conn)?;
    Ok((StatusCode::CREATED, Json(view(status))))
}

pub async fn update_status(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(status_id): Path<Uuid>,
    Json(payload): Json<UpdateStatusRequest>,
) -> AppResult<Json<StatusView>> {
    if !user.role.is_staff() {
        return Err(AppError::not_found());
    }
    let mut conn = state.db()?;
    let _: RequestStatus = request_statuses::table.find(status_id).first(&mut conn)?;

    if let Some(name) = &payload.name {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::bad_request("name must not be empty"));
        }
        diesel::update(request_statuses::table.find(status_id))
            .set(request_statuses::name.eq(name))
            .execute(&mut conn)?;
    }
    if let Some(is_active) = payload.is_active {
        diesel::update(request_statuses::table.find(status_id))
            .set(request_statuses::is_active.eq(is_active))
            .execute(&mut conn)?;
    }
    if let Some(sort_order) = payload.sort_order {
        diesel::update(request_statuses::table.find(status_id))
            .set(request_statuses::sort_order.eq(sort_order))
            .execute(&mut conn)?;
    }

    let status: RequestStatus = request_statuses::table.find(status_id).first(&mut conn)?;
    Ok(Json(view(status)))
}

/// A status still referenced by tickets or requests cannot go away;
/// deactivate it instead.
pub async fn delete_status(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(status_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    if !user.role.is_staff() {
        return Err(AppError::not_found());
    }
    let mut conn = state.db()?;

    let ticket_uses: i64 = tickets::table
        .filter(tickets::status_id.eq(status_id))
        .count()
        .get_result(&mut conn)?;
    let request_uses: i64 = public_requests::table
        .filter(public_requests::status_id.eq(status_id))
        .count()
        .get_result(&mut conn)?;
    if ticket_uses + request_uses > 0 {
        return Err(AppError::conflict("status is still in use"));
    }

    let deleted =
        diesel::delete(request_statuses::table.find(status_id)).execute(&mut conn)?;
    if deleted == 0 {
        return Err(AppError::not_found());
    }
    Ok(StatusCode::NO_CONTENT)
}
