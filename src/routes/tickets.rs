use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::Utc;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    abuse,
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    middleware::{client_ip, user_agent},
    models::{NewTicket, RequestStatus, Ticket},
    permissions::Role,
    schema::{request_statuses, tickets},
    state::AppState,
};

use super::documents::to_iso;

#[derive(Serialize)]
pub struct TicketView {
    pub id: i64,
    pub created_by: Uuid,
    pub assigned_to: Option<Uuid>,
    pub subject: String,
    pub message: String,
    pub status_id: Option<Uuid>,
    pub status_name: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Deserialize)]
pub struct CreateTicketRequest {
    pub subject: String,
    pub message: String,
}

#[derive(Deserialize)]
pub struct UpdateTicketRequest {
    pub subject: Option<String>,
    pub message: Option<String>,
    pub status_id: Option<Uuid>,
    pub assigned_to: Option<Option<Uuid>>,
}

#[derive(Deserialize)]
pub struct ListTicketsQuery {
    pub q: Option<String>,
    pub status_id: Option<Uuid>,
}

fn status_names(conn: &mut PgConnection) -> AppResult<HashMap<Uuid, String>> {
    Ok(request_statuses::table
        .load::<RequestStatus>(conn)?
        .into_iter()
        .map(|status| (status.id, status.name))
        .collect())
}

fn build_view(ticket: Ticket, statuses: &HashMap<Uuid, String>) -> TicketView {
    let status_name = ticket.status_id.and_then(|id| statuses.get(&id).cloned());
    TicketView {
        id: ticket.id,
        created_by: ticket.created_by,
        assigned_to: ticket.assigned_to,
        subject: ticket.subject,
        message: ticket.message,
        status_id: ticket.status_id,
        status_name,
        created_at: to_iso(ticket.created_at),
        updated_at: to_iso(ticket.updated_at),
    }
}

fn default_status(conn: &mut PgConnection) -> AppResult<Option<Uuid>> {
    Ok(request_statuses::table
        .filter(request_statuses::is_active.eq(true))
        .order(request_statuses::sort_order.asc())
        .select(request_statuses::id)
        .first(conn)
        .optional()?)
}

pub async fn create_ticket(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    headers: HeaderMap,
    Json(payload): Json<CreateTicketRequest>,
) -> AppResult<(StatusCode, Json<TicketView>)> {
    let subject = payload.subject.trim();
    let message = payload.message.trim();
    if subject.is_empty() || message.is_empty() {
        return Err(AppError::bad_request("subject and message are required"));
    }
    if subject.chars().count() > 200 {
        return Err(AppError::bad_request("subject is too long"));
    }

    let mut conn = state.db()?;
    let ip = client_ip(&headers);
    let agent = user_agent(&headers);

    // Burst limit first, then the business cap on tickets per hour.
    abuse::enforce_rate_limit(
        &mut conn,
        &abuse::TICKET_CREATE_BURST,
        Some(user.user_id),
        ip.as_deref(),
        "/api/tickets",
        &agent,
    )?;
    let hour_ago = Utc::now().naive_utc() - chrono::Duration::hours(1);
    let recent: i64 = tickets::table
        .filter(tickets::created_by.eq(user.user_id))
        .filter(tickets::created_at.gt(hour_ago))
        .count()
        .get_result(&mut conn)?;
    if recent >= abuse::TICKET_CREATE_HOURLY.limit {
        let _ = abuse::log_abuse(
            &mut conn,
            ip.as_deref(),
            Some(user.user_id),
            "/api/tickets",
            abuse::TICKET_CREATE_HOURLY.bucket,
            &agent,
        );
        return Err(AppError::too_many_requests(
            "ticket limit reached, try again later",
        ));
    }

    let status_id = default_status(&mut conn)?;
    let ticket: Ticket = diesel::insert_into(tickets::table)
        .values(NewTicket {
            created_by: user.user_id,
            assigned_to: None,
            subject: subject.to_string(),
            message: message.to_string(),
            status_id,
        })
        .get_result(&mut conn)?;

    tracing::info!(ticket_id = ticket.id, "ticket created");

    let statuses = status_names(&mut conn)?;
    Ok((StatusCode::CREATED, Json(build_view(ticket, &statuses))))
}

pub async fn list_tickets(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(params): Query<ListTicketsQuery>,
) -> AppResult<Json<Vec<TicketView>>> {
    let mut conn = state.db()?;

    let mut query = tickets::table.order(tickets::created_at.desc()).into_boxed();
    match user.role {
        Role::Admin | Role::Manager => {}
        Role::Technician => {
            query = query.filter(tickets::assigned_to.eq(user.user_id));
        }
        Role::Client => {
            query = query.filter(tickets::created_by.eq(user.user_id));
        }
    }
    if let Some(status_id) = params.status_id {
        query = query.filter(tickets::status_id.eq(status_id));
    }
    if let Some(q) = params.q.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
        let pattern = format!("%{}%", q.replace('%', "\\%").replace('_', "\\_"));
        query = query.filter(tickets::subject.ilike(pattern));
    }

    let rows: Vec<Ticket> = query.load(&mut conn)?;
    let statuses = status_names(&mut conn)?;
    Ok(Json(
        rows.into_iter()
            .map(|ticket| build_view(ticket, &statuses))
            .collect(),
    ))
}

fn load_visible_ticket(
    conn: &mut PgConnection,
    ticket_id: i64,
    user: &AuthenticatedUser,
) -> AppResult<Ticket> {
    let ticket: Ticket = tickets::table.find(ticket_id).first(conn)?;
    let visible = match user.role {
        Role::Admin | Role::Manager => true,
        Role::Technician => ticket.assigned_to == Some(user.user_id),
        Role::Client => ticket.created_by == user.user_id,
    };
    if !visible {
        return Err(AppError::not_found());
    }
    Ok(ticket)
}

pub async fn get_ticket(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(ticket_id): Path<i64>,
) -> AppResult<Json<TicketView>> {
    let mut conn = state.db()?;
    let ticket = load_visible_ticket(&mut conn, ticket_id, &user)?;
    let statuses = status_names(&mut conn)?;
    Ok(Json(build_view(ticket, &statuses)))
}

pub async fn update_ticket(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(ticket_id): Path<i64>,
    Json(payload): Json<UpdateTicketRequest>,
) -> AppResult<Json<TicketView>> {
    let mut conn = state.db()?;
    let ticket = load_visible_ticket(&mut conn, ticket_id, &user)?;

    // Technicians assigned to the ticket may move its status, nothing else.
    let status_only =
        payload.subject.is_none() && payload.message.is_none() && payload.assigned_to.is_none();
    let allowed = match user.role {
        Role::Admin | Role::Manager => true,
        Role::Technician => ticket.assigned_to == Some(user.user_id) && status_only,
        Role::Client => false,
    };
    if !allowed {
        return Err(AppError::not_found());
    }

    if let Some(status_id) = payload.status_id {
        let known: bool = diesel::select(diesel::dsl::exists(
            request_statuses::table.filter(request_statuses::id.eq(status_id)),
        ))
        .get_result(&mut conn)?;
        if !known {
            return Err(AppError::bad_request("unknown status"));
        }
    }

    let now = Utc::now().naive_utc();
    let updated: Ticket = conn.transaction::<Ticket, diesel::result::Error, _>(|conn| {
        if let Some(subject) = &payload.subject {
            diesel::update(tickets::table.find(ticket_id))
                .set(tickets::subject.eq(subject.trim()))
                .execute(conn)?;
        }
        if let Some(message) = &payload.message {
            diesel::update(tickets::table.find(ticket_id))
                .set(tickets::message.eq(message.trim()))
                .execute(conn)?;
        }
        if let Some(status_id) = payload.status_id {
            diesel::update(tickets::table.find(ticket_id))
                .set(tickets::status_id.eq(status_id))
                .execute(conn)?;
        }
        if let Some(assigned_to) = payload.assigned_to {
            diesel::update(tickets::table.find(ticket_id))
                .set(tickets::assigned_to.eq(assigned_to))
                .execute(conn)?;
        }
        diesel::update(tickets::table.find(ticket_id))
            .set(tickets::updated_at.eq(now))
            .get_result(conn)
    })?;

    let statuses = status_names(&mut conn)?;
    Ok(Json(build_view(updated, &statuses)))
}

pub async fn delete_ticket(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(ticket_id): Path<i64>,
) -> AppResult<StatusCode> {
    if !user.role.is_staff() {
        return Err(AppError::not_found());
    }
    let mut conn = state.db()?;
    let deleted = diesel::delete(tickets::table.find(ticket_id)).execute(&mut conn)?;
    if deleted == 0 {
        return Err(AppError::not_found());
    }
    Ok(StatusCode::NO_CONTENT)
}
