mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, body_to_json, TestApp};
use serde_json::json;

#[tokio::test]
async fn login_and_me_roundtrip() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("admin@example.com", "hunter2pass", "ADMIN")
        .await?;
    let token = app.login_token("admin@example.com", "hunter2pass").await?;

    let response = app.get("/api/auth/me", Some(&token)).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_to_json(response.into_body()).await?;
    assert_eq!(body["email"], "admin@example.com");
    assert_eq!(body["role"], "ADMIN");

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn login_is_case_insensitive_on_email() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("client@example.com", "hunter2pass", "CLIENT")
        .await?;
    let token = app.login_token("Client@Example.COM", "hunter2pass").await?;
    let response = app.get("/api/auth/me", Some(&token)).await?;
    assert_eq!(response.status(), StatusCode::OK);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn wrong_password_is_rejected_and_logged() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("admin@example.com", "hunter2pass", "ADMIN")
        .await?;
    let response = app
        .post_json(
            "/api/auth/login",
            &json!({ "email": "admin@example.com", "password": "nope" }),
            None,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let events: i64 = app
        .with_conn(|conn| {
            use diesel::prelude::*;
            use portal::schema::abuse_events::dsl::*;
            Ok(abuse_events
                .filter(reason.eq("login_failed"))
                .count()
                .get_result(conn)?)
        })
        .await?;
    assert_eq!(events, 1);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn unknown_account_is_rejected() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let response = app
        .post_json(
            "/api/auth/login",
            &json!({ "email": "ghost@example.com", "password": "whatever" }),
            None,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn protected_routes_require_a_token() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let response = app.get("/api/tickets", None).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app.get("/api/dashboard", Some("not-a-jwt")).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    app.cleanup().await?;
    Ok(())
}
