//! Unified work-queue dashboard over public requests and tickets.
//!
//! Rows from both sources are flattened into one item shape, then
//! filtered, sorted and paginated in memory. The row counts here are
//! operator-scale, and one shape keeps the filter logic in a single
//! place instead of two diverging SQL builders.

use std::collections::HashMap;

use axum::{
    extract::{Query, State},
    http::header::{CONTENT_DISPOSITION, CONTENT_TYPE},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Utc};
use diesel::prelude::*;
use rust_xlsxwriter::{Format, Workbook};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    models::{PublicRequest, RequestStatus, Technician, Ticket, User},
    permissions::Role,
    schema::{public_requests, request_statuses, technicians, tickets, users},
    state::AppState,
};

use super::documents::to_iso;

const DEFAULT_PAGE_SIZE: usize = 25;
const MAX_PAGE_SIZE: usize = 200;

pub const TYPE_PUBLIC: &str = "PUBLIC";
pub const TYPE_CLIENT: &str = "CLIENT";
pub const TYPE_INTERN: &str = "INTERN";

#[derive(Debug, Clone, Serialize)]
pub struct DashboardItem {
    pub kind: &'static str,
    pub id: i64,
    pub item_type: &'static str,
    pub nr: String,
    pub name: String,
    pub phone: String,
    pub status: String,
    pub assigned: String,
    #[serde(serialize_with = "serialize_created")]
    pub created_at: NaiveDateTime,
}

fn serialize_created<S: serde::Serializer>(
    value: &NaiveDateTime,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&to_iso(*value))
}

#[derive(Debug, Default, Deserialize)]
pub struct DashboardQuery {
    pub q: Option<String>,
    pub nr: Option<String>,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub status: Option<String>,
    pub assigned: Option<String>,
    #[serde(rename = "type")]
    pub item_type: Option<String>,
    pub range: Option<String>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub sort: Option<String>,
    pub dir: Option<String>,
    pub page: Option<usize>,
    pub per_page: Option<usize>,
}

#[derive(Serialize)]
pub struct DashboardPage {
    pub items: Vec<DashboardItem>,
    pub total: usize,
    pub page: usize,
    pub per_page: usize,
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// Inclusive date window from a quick-range token or explicit bounds.
/// Explicit `date_from`/`date_to` override the token.
pub(crate) fn date_window(
    params: &DashboardQuery,
    today: NaiveDate,
) -> AppResult<(Option<NaiveDate>, Option<NaiveDate>)> {
    let mut from = None;
    let mut to = None;

    match params.range.as_deref() {
        None | Some("") => {}
        Some("today") => {
            from = Some(today);
            to = Some(today);
        }
        Some("yesterday") => {
            let yesterday = today - Duration::days(1);
            from = Some(yesterday);
            to = Some(yesterday);
        }
        Some("7d") => {
            from = Some(today - Duration::days(6));
            to = Some(today);
        }
        Some("30d") => {
            from = Some(today - Duration::days(29));
            to = Some(today);
        }
        Some("this_month") => {
            from = today.with_day(1);
            to = Some(today);
        }
        Some("last_month") => {
            let first_of_this = today
                .with_day(1)
                .ok_or_else(|| AppError::internal("invalid date arithmetic"))?;
            let last_of_previous = first_of_this - Duration::days(1);
            from = last_of_previous.with_day(1);
            to = Some(last_of_previous);
        }
        Some(other) => {
            return Err(AppError::bad_request(format!("unknown range: {other}")));
        }
    }

    if let Some(raw) = params.date_from.as_deref().filter(|v| !v.is_empty()) {
        from = Some(
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .map_err(|_| AppError::bad_request("invalid date_from"))?,
        );
    }
    if let Some(raw) = params.date_to.as_deref().filter(|v| !v.is_empty()) {
        to = Some(
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .map_err(|_| AppError::bad_request("invalid date_to"))?,
        );
    }

    Ok((from, to))
}

pub(crate) fn apply_filters(
    items: Vec<DashboardItem>,
    params: &DashboardQuery,
    window: (Option<NaiveDate>, Option<NaiveDate>),
) -> Vec<DashboardItem> {
    let (from, to) = window;
    items
        .into_iter()
        .filter(|item| {
            if let Some(q) = params.q.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
                // Free text spans every displayed column.
                let hit = contains_ci(item.item_type, q)
                    || contains_ci(&item.nr, q)
                    || contains_ci(&item.name, q)
                    || contains_ci(&item.phone, q)
                    || contains_ci(&item.status, q)
                    || contains_ci(&item.assigned, q);
                if !hit {
                    return false;
                }
            }
            if let Some(nr) = params.nr.as_deref().filter(|v| !v.is_empty()) {
                if !contains_ci(&item.nr, nr) {
                    return false;
                }
            }
            if let Some(name) = params.name.as_deref().filter(|v| !v.is_empty()) {
                if !contains_ci(&item.name, name) {
                    return false;
                }
            }
            if let Some(phone) = params.phone.as_deref().filter(|v| !v.is_empty()) {
                if !contains_ci(&item.phone, phone) {
                    return false;
                }
            }
            if let Some(status) = params.status.as_deref().filter(|v| !v.is_empty()) {
                if !item.status.eq_ignore_ascii_case(status) {
                    return false;
                }
            }
            if let Some(assigned) = params.assigned.as_deref().filter(|v| !v.is_empty()) {
                if !contains_ci(&item.assigned, assigned) {
                    return false;
                }
            }
            if let Some(item_type) = params.item_type.as_deref().filter(|v| !v.is_empty()) {
                if !item.item_type.eq_ignore_ascii_case(item_type) {
                    return false;
                }
            }
            let created = item.created_at.date();
            if let Some(from) = from {
                if created < from {
                    return false;
                }
            }
            if let Some(to) = to {
                if created > to {
                    return false;
                }
            }
            true
        })
        .collect()
}

pub(crate) fn sort_items(
    items: &mut [DashboardItem],
    sort: Option<&str>,
    dir: Option<&str>,
) -> AppResult<()> {
    let descending = dir != Some("asc");
    match sort.unwrap_or("created_at") {
        "created_at" => items.sort_by_key(|item| item.created_at),
        "name" => items.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase())),
        "status" => items.sort_by(|a, b| a.status.cmp(&b.status)),
        "nr" => items.sort_by(|a, b| a.nr.cmp(&b.nr)),
        other => return Err(AppError::bad_request(format!("unknown sort field: {other}"))),
    }
    if descending {
        items.reverse();
    }
    Ok(())
}

fn display_name(company: &str, email: &str) -> String {
    if company.trim().is_empty() {
        email.to_string()
    } else {
        company.to_string()
    }
}

/// Tickets raised by a client account surface as CLIENT work; everything
/// else (staff, technicians, orphaned creators) is internal.
fn ticket_source(creator: Option<&User>) -> &'static str {
    match creator {
        Some(user) if Role::parse(&user.role) == Some(Role::Client) => TYPE_CLIENT,
        _ => TYPE_INTERN,
    }
}

/// Public requests stay PUBLIC until an account is linked; a linked
/// account reclassifies by that account's role.
fn public_source(linked: Option<&User>) -> &'static str {
    match linked {
        Some(user) if Role::parse(&user.role) == Some(Role::Client) => TYPE_CLIENT,
        Some(_) => TYPE_INTERN,
        None => TYPE_PUBLIC,
    }
}

/// Flattens both sources into dashboard items, already role-scoped.
fn build_items(conn: &mut PgConnection, viewer: &AuthenticatedUser) -> AppResult<Vec<DashboardItem>> {
    let statuses: HashMap<Uuid, String> = request_statuses::table
        .load::<RequestStatus>(conn)?
        .into_iter()
        .map(|status| (status.id, status.name))
        .collect();
    let technician_names: HashMap<Uuid, String> = technicians::table
        .load::<Technician>(conn)?
        .into_iter()
        .map(|technician| (technician.id, technician.name))
        .collect();
    let user_rows: Vec<User> = users::table.load(conn)?;
    let users_by_id: HashMap<Uuid, &User> = user_rows.iter().map(|user| (user.id, user)).collect();

    let my_technician_ids: Vec<Uuid> = technicians::table
        .filter(technicians::user_id.eq(viewer.user_id))
        .select(technicians::id)
        .load(conn)?;

    let mut requests_query = public_requests::table.into_boxed();
    let mut tickets_query = tickets::table.into_boxed();
    match viewer.role {
        Role::Admin | Role::Manager => {}
        Role::Technician => {
            requests_query = requests_query
                .filter(public_requests::assigned_to.eq_any(my_technician_ids.clone()));
            tickets_query = tickets_query.filter(tickets::assigned_to.eq(viewer.user_id));
        }
        Role::Client => {
            requests_query = requests_query.filter(public_requests::user_id.eq(viewer.user_id));
            tickets_query = tickets_query.filter(tickets::created_by.eq(viewer.user_id));
        }
    }

    let mut items = Vec::new();

    for request in requests_query.load::<PublicRequest>(conn)? {
        let linked = request.user_id.and_then(|id| users_by_id.get(&id)).copied();
        items.push(DashboardItem {
            kind: "public",
            id: request.id,
            item_type: public_source(linked),
            nr: format!("P-{}", request.id),
            name: display_name(&request.company, &request.email),
            phone: request.phone,
            status: request
                .status_id
                .and_then(|id| statuses.get(&id).cloned())
                .unwrap_or_default(),
            assigned: request
                .assigned_to
                .and_then(|id| technician_names.get(&id).cloned())
                .unwrap_or_default(),
            created_at: request.created_at,
        });
    }

    for ticket in tickets_query.load::<Ticket>(conn)? {
        let creator = users_by_id.get(&ticket.created_by).copied();
        items.push(DashboardItem {
            kind: "ticket",
            id: ticket.id,
            item_type: ticket_source(creator),
            nr: format!("T-{}", ticket.id),
            name: creator
                .map(|user| display_name(&user.company_name, &user.email))
                .unwrap_or_default(),
            phone: creator.map(|user| user.phone.clone()).unwrap_or_default(),
            status: ticket
                .status_id
                .and_then(|id| statuses.get(&id).cloned())
                .unwrap_or_default(),
            assigned: ticket
                .assigned_to
                .and_then(|id| users_by_id.get(&id))
                .map(|user| user.email.clone())
                .unwrap_or_default(),
            created_at: ticket.created_at,
        });
    }

    Ok(items)
}

fn filtered_items(
    conn: &mut PgConnection,
    viewer: &AuthenticatedUser,
    params: &DashboardQuery,
) -> AppResult<Vec<DashboardItem>> {
    let window = date_window(params, Utc::now().date_naive())?;
    let items = build_items(conn, viewer)?;
    let mut items = apply_filters(items, params, window);
    sort_items(&mut items, params.sort.as_deref(), params.dir.as_deref())?;
    Ok(items)
}

pub async fn list_items(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(params): Query<DashboardQuery>,
) -> AppResult<Json<DashboardPage>> {
    let mut conn = state.db()?;
    let items = filtered_items(&mut conn, &user, &params)?;

    let total = items.len();
    let page = params.page.unwrap_or(1).max(1);
    let per_page = params
        .per_page
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);
    let items = items
        .into_iter()
        .skip((page - 1) * per_page)
        .take(per_page)
        .collect();

    Ok(Json(DashboardPage {
        items,
        total,
        page,
        per_page,
    }))
}

const EXPORT_HEADERS: &[&str] = &[
    "Type",
    "Request No.",
    "Client Name",
    "Phone",
    "Status",
    "Assigned",
    "Created",
    "Kind",
    "Id",
];

pub async fn export_xlsx(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(params): Query<DashboardQuery>,
) -> AppResult<Response> {
    if !user.role.is_staff() {
        return Err(AppError::not_found());
    }
    let mut conn = state.db()?;
    let items = filtered_items(&mut conn, &user, &params)?;

    let mut workbook = Workbook::new();
    let bold = Format::new().set_bold();
    let sheet = workbook.add_worksheet();
    sheet
        .set_name("Requests")
        .map_err(AppError::internal)?;

    for (column, header) in EXPORT_HEADERS.iter().enumerate() {
        sheet
            .write_string_with_format(0, column as u16, *header, &bold)
            .map_err(AppError::internal)?;
    }
    for (index, item) in items.iter().enumerate() {
        let row = (index + 1) as u32;
        sheet
            .write_string(row, 0, item.item_type)
            .and_then(|s| s.write_string(row, 1, &item.nr))
            .and_then(|s| s.write_string(row, 2, &item.name))
            .and_then(|s| s.write_string(row, 3, &item.phone))
            .and_then(|s| s.write_string(row, 4, &item.status))
            .and_then(|s| s.write_string(row, 5, &item.assigned))
            .and_then(|s| s.write_string(row, 6, &to_iso(item.created_at)))
            .and_then(|s| s.write_string(row, 7, item.kind))
            .and_then(|s| s.write_number(row, 8, item.id as f64))
            .map_err(AppError::internal)?;
    }

    let bytes = workbook.save_to_buffer().map_err(AppError::internal)?;
    let filename = format!("dashboard-{}.xlsx", Utc::now().format("%Y%m%d-%H%M%S"));

    Ok((
        [
            (
                CONTENT_TYPE,
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet".to_string(),
            ),
            (
                CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        bytes,
    )
        .into_response())
}
