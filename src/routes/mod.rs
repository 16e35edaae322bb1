use axum::http::HeaderValue;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, patch, post},
    Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::{auth::AuthenticatedUser, middleware::reject_blocked_ips, state::AppState};

pub mod auth;
pub mod chat;
pub mod dashboard;
pub mod documents;
pub mod health;
pub mod public_requests;
pub mod statuses;
pub mod technicians;
pub mod tickets;

pub fn create_router(state: AppState) -> Router<()> {
    let cors = if let Some(origins) = state.config.cors_allowed_origin.as_ref() {
        let headers: Vec<HeaderValue> = origins
            .split(',')
            .filter_map(|value| {
                let trimmed = value.trim();
                (!trimmed.is_empty()).then(|| {
                    trimmed
                        .parse::<HeaderValue>()
                        .expect("invalid CORS allowed origin")
                })
            })
            .collect();

        CorsLayer::new()
            .allow_origin(AllowOrigin::list(headers))
            .allow_methods(tower_http::cors::AllowMethods::mirror_request())
            .allow_headers(tower_http::cors::AllowHeaders::mirror_request())
            .allow_credentials(true)
    } else {
        CorsLayer::new()
            .allow_origin(AllowOrigin::mirror_request())
            .allow_methods(tower_http::cors::AllowMethods::mirror_request())
            .allow_headers(tower_http::cors::AllowHeaders::mirror_request())
            .allow_credentials(true)
    };

    let auth_routes = Router::new()
        .route("/login", post(auth::login))
        .route("/refresh", post(auth::refresh))
        .route("/logout", post(auth::logout))
        .route("/me", get(auth::me));

    // Anonymous intake; the IP-block gate still applies.
    let public_routes = Router::new()
        .route("/requests", post(public_requests::create_public_request))
        .route(
            "/requests/:id/attachments",
            post(public_requests::upload_attachment),
        );

    let documents_routes = Router::new()
        .route(
            "/",
            get(documents::list_documents).post(documents::create_document),
        )
        .route(
            "/:id",
            get(documents::get_document)
                .patch(documents::update_document)
                .delete(documents::delete_document),
        )
        .route("/:id/status", patch(documents::update_status))
        .route("/:id/close", post(documents::close_document))
        .route("/:id/cancel", post(documents::cancel_document))
        .route("/:id/technicians", post(documents::assign_technicians));

    let tickets_routes = Router::new()
        .route("/", get(tickets::list_tickets).post(tickets::create_ticket))
        .route(
            "/:id",
            get(tickets::get_ticket)
                .patch(tickets::update_ticket)
                .delete(tickets::delete_ticket),
        );

    let requests_routes = Router::new()
        .route("/", get(public_requests::list_public_requests))
        .route(
            "/:id",
            get(public_requests::get_public_request)
                .patch(public_requests::update_public_request)
                .delete(public_requests::delete_public_request),
        )
        .route(
            "/:id/attachments/:attachment_id",
            get(public_requests::download_attachment)
                .delete(public_requests::delete_attachment),
        );

    let chat_routes = Router::new()
        .route("/unread-count", get(chat::unread_count))
        .route("/mentions", get(chat::mention_autocomplete))
        .route(
            "/:kind/:id/messages",
            get(chat::list_messages).post(chat::post_message),
        )
        .route("/:kind/:id/read", post(chat::mark_read));

    let dashboard_routes = Router::new()
        .route("/", get(dashboard::list_items))
        .route("/export.xlsx", get(dashboard::export_xlsx));

    let statuses_routes = Router::new()
        .route(
            "/",
            get(statuses::list_statuses).post(statuses::create_status),
        )
        .route(
            "/:id",
            patch(statuses::update_status).delete(statuses::delete_status),
        );

    let technicians_routes = Router::new()
        .route(
            "/",
            get(technicians::list_technicians).post(technicians::create_technician),
        )
        .route(
            "/:id",
            patch(technicians::update_technician).delete(technicians::delete_technician),
        );

    let protected_state = state.clone();
    let protected_routes = Router::new()
        .nest("/api/documents", documents_routes)
        .route(
            "/api/document-types",
            get(documents::list_document_types),
        )
        .nest("/api/tickets", tickets_routes)
        .nest("/api/requests", requests_routes)
        .nest("/api/chat", chat_routes)
        .nest("/api/dashboard", dashboard_routes)
        .nest("/api/statuses", statuses_routes)
        .nest("/api/technicians", technicians_routes)
        .layer(middleware::from_extractor_with_state::<AuthenticatedUser, _>(protected_state));

    Router::new()
        .merge(protected_routes)
        .nest("/api/auth", auth_routes)
        .nest("/api/public", public_routes)
        .route("/api/health", get(health::health_check))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            reject_blocked_ips,
        ))
        .with_state(state)
        .layer(cors)
        .layer(DefaultBodyLimit::max(32 * 1024 * 1024))
}
