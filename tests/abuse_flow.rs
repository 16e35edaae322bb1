mod common;

use anyhow::Result;
use axum::http::StatusCode;
use chrono::{Duration, Utc};
use common::{acquire_db_lock, body_to_json, TestApp};
use serde_json::{json, Value};

fn intake_payload(email: &str) -> Value {
    json!({
        "email": email,
        "phone": "0722123456",
        "company": "Intake SRL",
        "description": "Lights flicker in hall B."
    })
}

#[tokio::test]
async fn ticket_creation_is_capped_per_hour() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("client@example.com", "hunter2pass", "CLIENT")
        .await?;
    let token = app.login_token("client@example.com", "hunter2pass").await?;

    for n in 0..3 {
        let response = app
            .post_json(
                "/api/tickets",
                &json!({ "subject": format!("Issue {n}"), "message": "details" }),
                Some(&token),
            )
            .await?;
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let response = app
        .post_json(
            "/api/tickets",
            &json!({ "subject": "One too many", "message": "details" }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn public_intake_is_throttled_per_ip() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    for n in 0..5 {
        let response = app
            .post_json_from(
                "/api/public/requests",
                &intake_payload(&format!("visitor{n}@example.com")),
                None,
                "203.0.113.7",
            )
            .await?;
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let refused = app
        .post_json_from(
            "/api/public/requests",
            &intake_payload("visitor6@example.com"),
            None,
            "203.0.113.7",
        )
        .await?;
    assert_eq!(refused.status(), StatusCode::TOO_MANY_REQUESTS);

    // The refusal itself lands in the ledger so sustained hammering can
    // trip the auto-block.
    let block_events: i64 = app
        .with_conn(|conn| {
            use diesel::prelude::*;
            use portal::schema::abuse_events::dsl::*;
            Ok(abuse_events
                .filter(reason.eq("rl_public_request_60s_block"))
                .count()
                .get_result(conn)?)
        })
        .await?;
    assert_eq!(block_events, 1);

    // A different source address has its own bucket.
    let other = app
        .post_json_from(
            "/api/public/requests",
            &intake_payload("elsewhere@example.com"),
            None,
            "203.0.113.8",
        )
        .await?;
    assert_eq!(other.status(), StatusCode::CREATED);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn blocked_ips_are_refused_at_admission() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.with_conn(|conn| {
        use diesel::prelude::*;
        use portal::models::NewBlockedIp;
        use portal::schema::blocked_ips;
        diesel::insert_into(blocked_ips::table)
            .values(NewBlockedIp {
                ip: "198.51.100.9".to_string(),
                blocked_until: Utc::now().naive_utc() + Duration::hours(1),
                reason: "auto_burst".to_string(),
            })
            .execute(conn)?;
        Ok(())
    })
    .await?;

    let refused = app.get_from("/api/health", None, "198.51.100.9").await?;
    assert_eq!(refused.status(), StatusCode::FORBIDDEN);

    let allowed = app.get_from("/api/health", None, "198.51.100.10").await?;
    assert_eq!(allowed.status(), StatusCode::OK);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn expired_blocks_no_longer_match() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.with_conn(|conn| {
        use diesel::prelude::*;
        use portal::models::NewBlockedIp;
        use portal::schema::blocked_ips;
        diesel::insert_into(blocked_ips::table)
            .values(NewBlockedIp {
                ip: "198.51.100.20".to_string(),
                blocked_until: Utc::now().naive_utc() - Duration::minutes(5),
                reason: "auto_burst".to_string(),
            })
            .execute(conn)?;
        Ok(())
    })
    .await?;

    let response = app.get_from("/api/health", None, "198.51.100.20").await?;
    assert_eq!(response.status(), StatusCode::OK);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn rejected_extensions_land_in_the_abuse_ledger() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let created = app
        .post_json_from(
            "/api/public/requests",
            &intake_payload("uploader@example.com"),
            None,
            "203.0.113.30",
        )
        .await?;
    assert_eq!(created.status(), StatusCode::CREATED);
    let created = body_to_json(created.into_body()).await?;
    let request_id = created["id"].as_i64().unwrap();
    let path = format!("/api/public/requests/{request_id}/attachments");

    let refused = app
        .post_multipart(
            &path,
            &[],
            &[("file", "payload.exe", b"MZ\x90\x00")],
            None,
            Some("203.0.113.30"),
        )
        .await?;
    assert_eq!(refused.status(), StatusCode::BAD_REQUEST);

    let events: i64 = app
        .with_conn(|conn| {
            use diesel::prelude::*;
            use portal::schema::abuse_events::dsl::*;
            Ok(abuse_events
                .filter(reason.eq("blocked_extension"))
                .count()
                .get_result(conn)?)
        })
        .await?;
    assert_eq!(events, 1);

    let accepted = app
        .post_multipart(
            &path,
            &[],
            &[("file", "report.pdf", b"%PDF-1.4")],
            None,
            Some("203.0.113.30"),
        )
        .await?;
    assert_eq!(accepted.status(), StatusCode::CREATED);
    assert_eq!(app.storage().object_count().await, 1);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn sustained_abuse_auto_blocks_the_ip() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    // Seed the ledger just under the threshold, then push it over with
    // one real rejected upload.
    app.with_conn(|conn| {
        use diesel::prelude::*;
        use portal::models::NewAbuseEvent;
        use portal::schema::abuse_events;
        let rows: Vec<NewAbuseEvent> = (0..29)
            .map(|_| NewAbuseEvent {
                ip: Some("203.0.113.66".to_string()),
                user_id: None,
                path: "/api/public/requests".to_string(),
                reason: "rl_public_request_60s:ip:203.0.113.66".to_string(),
                user_agent: "test".to_string(),
            })
            .collect();
        diesel::insert_into(abuse_events::table)
            .values(rows)
            .execute(conn)?;
        Ok(())
    })
    .await?;

    let blocked = app
        .with_conn(|conn| {
            portal::abuse::maybe_block_ip(conn, "203.0.113.66")
                .map_err(|err| anyhow::anyhow!("{err:?}"))
        })
        .await?;
    // 29 events are under the threshold of 30.
    assert!(!blocked);

    app.with_conn(|conn| {
        portal::abuse::log_abuse(
            conn,
            Some("203.0.113.66"),
            None,
            "/api/public/requests/attachments",
            "blocked_extension",
            "test",
        )
        .map_err(|err| anyhow::anyhow!("{err:?}"))
    })
    .await?;

    let refused = app.get_from("/api/health", None, "203.0.113.66").await?;
    assert_eq!(refused.status(), StatusCode::FORBIDDEN);

    app.cleanup().await?;
    Ok(())
}
