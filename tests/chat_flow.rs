mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, body_to_json, TestApp};
use serde_json::json;

async fn create_ticket(app: &TestApp, token: &str) -> Result<i64> {
    let response = app
        .post_json(
            "/api/tickets",
            &json!({ "subject": "No power on site", "message": "Breaker trips." }),
            Some(token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_to_json(response.into_body()).await?;
    Ok(body["id"].as_i64().unwrap())
}

#[tokio::test]
async fn unknown_kind_and_missing_target_are_rejected() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("admin@example.com", "hunter2pass", "ADMIN")
        .await?;
    let token = app.login_token("admin@example.com", "hunter2pass").await?;

    let response = app.get("/api/chat/bogus/1/messages", Some(&token)).await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app.get("/api/chat/ticket/9999/messages", Some(&token)).await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn internal_messages_are_hidden_from_clients() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("admin@example.com", "hunter2pass", "ADMIN")
        .await?;
    app.insert_user("client@example.com", "hunter2pass", "CLIENT")
        .await?;
    let admin_token = app.login_token("admin@example.com", "hunter2pass").await?;
    let client_token = app.login_token("client@example.com", "hunter2pass").await?;
    let ticket_id = create_ticket(&app, &client_token).await?;
    let path = format!("/api/chat/ticket/{ticket_id}/messages");

    let posted = app
        .post_multipart(
            &path,
            &[("body", "Client update"), ("visibility", "INTERNAL")],
            &[],
            Some(&client_token),
            None,
        )
        .await?;
    assert_eq!(posted.status(), StatusCode::CREATED);
    let posted = body_to_json(posted.into_body()).await?;
    // Non-staff cannot post internal notes; the message lands as PUBLIC.
    assert_eq!(posted["visibility"], "PUBLIC");

    let note = app
        .post_multipart(
            &path,
            &[("body", "Internal note"), ("visibility", "INTERNAL")],
            &[],
            Some(&admin_token),
            None,
        )
        .await?;
    assert_eq!(note.status(), StatusCode::CREATED);

    let as_client = app.get(&path, Some(&client_token)).await?;
    let as_client = body_to_json(as_client.into_body()).await?;
    assert_eq!(as_client.as_array().unwrap().len(), 1);
    assert_eq!(as_client[0]["body"], "Client update");

    let as_admin = app.get(&path, Some(&admin_token)).await?;
    let as_admin = body_to_json(as_admin.into_body()).await?;
    assert_eq!(as_admin.as_array().unwrap().len(), 2);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn clients_cannot_read_foreign_tickets() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("client@example.com", "hunter2pass", "CLIENT")
        .await?;
    app.insert_user("other@example.com", "hunter2pass", "CLIENT")
        .await?;
    let owner_token = app.login_token("client@example.com", "hunter2pass").await?;
    let other_token = app.login_token("other@example.com", "hunter2pass").await?;
    let ticket_id = create_ticket(&app, &owner_token).await?;

    let response = app
        .get(
            &format!("/api/chat/ticket/{ticket_id}/messages"),
            Some(&other_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn empty_post_is_a_no_op() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("client@example.com", "hunter2pass", "CLIENT")
        .await?;
    let token = app.login_token("client@example.com", "hunter2pass").await?;
    let ticket_id = create_ticket(&app, &token).await?;
    let path = format!("/api/chat/ticket/{ticket_id}/messages");

    let response = app
        .post_multipart(&path, &[("body", "   ")], &[], Some(&token), None)
        .await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let listed = app.get(&path, Some(&token)).await?;
    let listed = body_to_json(listed.into_body()).await?;
    assert!(listed.as_array().unwrap().is_empty());

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn mentions_resolve_to_known_active_users() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("admin@example.com", "hunter2pass", "ADMIN")
        .await?;
    let client_id = app
        .insert_user("client@example.com", "hunter2pass", "CLIENT")
        .await?;
    let admin_token = app.login_token("admin@example.com", "hunter2pass").await?;
    let client_token = app.login_token("client@example.com", "hunter2pass").await?;
    let ticket_id = create_ticket(&app, &client_token).await?;

    let posted = app
        .post_multipart(
            &format!("/api/chat/ticket/{ticket_id}/messages"),
            &[(
                "body",
                "cc @client@example.com and @nobody@example.com please",
            )],
            &[],
            Some(&admin_token),
            None,
        )
        .await?;
    assert_eq!(posted.status(), StatusCode::CREATED);
    let posted = body_to_json(posted.into_body()).await?;

    let mentions = posted["mentions"].as_array().unwrap();
    assert_eq!(mentions.len(), 1);
    assert_eq!(mentions[0], json!(client_id));

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn unread_counts_threads_and_watermark_never_moves_back() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("admin@example.com", "hunter2pass", "ADMIN")
        .await?;
    app.insert_user("client@example.com", "hunter2pass", "CLIENT")
        .await?;
    let admin_token = app.login_token("admin@example.com", "hunter2pass").await?;
    let client_token = app.login_token("client@example.com", "hunter2pass").await?;
    let ticket_id = create_ticket(&app, &client_token).await?;
    let messages_path = format!("/api/chat/ticket/{ticket_id}/messages");

    let first = app
        .post_multipart(
            &messages_path,
            &[("body", "Looked at it")],
            &[],
            Some(&admin_token),
            None,
        )
        .await?;
    let first = body_to_json(first.into_body()).await?;
    let first_id = first["id"].as_i64().unwrap();

    let second = app
        .post_multipart(
            &messages_path,
            &[("body", "Fixed, please confirm")],
            &[],
            Some(&admin_token),
            None,
        )
        .await?;
    let second = body_to_json(second.into_body()).await?;
    let second_id = second["id"].as_i64().unwrap();

    // Two staff messages in one thread still count as one unread thread.
    let unread = app.get("/api/chat/unread-count", Some(&client_token)).await?;
    let unread = body_to_json(unread.into_body()).await?;
    assert_eq!(unread["unread_total"], 1);

    let read_path = format!("/api/chat/ticket/{ticket_id}/read");
    let marked = app
        .post_json(
            &read_path,
            &json!({ "last_read_message_id": second_id }),
            Some(&client_token),
        )
        .await?;
    assert_eq!(marked.status(), StatusCode::NO_CONTENT);

    let unread = app.get("/api/chat/unread-count", Some(&client_token)).await?;
    let unread = body_to_json(unread.into_body()).await?;
    assert_eq!(unread["unread_total"], 0);

    // Replaying an older watermark must not resurrect the unread state.
    app.post_json(
        &read_path,
        &json!({ "last_read_message_id": first_id }),
        Some(&client_token),
    )
    .await?;
    let unread = app.get("/api/chat/unread-count", Some(&client_token)).await?;
    let unread = body_to_json(unread.into_body()).await?;
    assert_eq!(unread["unread_total"], 0);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn posting_catches_the_author_up() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("admin@example.com", "hunter2pass", "ADMIN")
        .await?;
    app.insert_user("client@example.com", "hunter2pass", "CLIENT")
        .await?;
    let admin_token = app.login_token("admin@example.com", "hunter2pass").await?;
    let client_token = app.login_token("client@example.com", "hunter2pass").await?;
    let ticket_id = create_ticket(&app, &client_token).await?;
    let messages_path = format!("/api/chat/ticket/{ticket_id}/messages");

    let posted = app
        .post_multipart(
            &messages_path,
            &[("body", "Any update?")],
            &[],
            Some(&admin_token),
            None,
        )
        .await?;
    assert_eq!(posted.status(), StatusCode::CREATED);

    // Replying without ever marking the thread read still leaves the
    // author caught up on it.
    let reply = app
        .post_multipart(
            &messages_path,
            &[("body", "Works again, thanks")],
            &[],
            Some(&client_token),
            None,
        )
        .await?;
    assert_eq!(reply.status(), StatusCode::CREATED);

    let unread = app.get("/api/chat/unread-count", Some(&client_token)).await?;
    let unread = body_to_json(unread.into_body()).await?;
    assert_eq!(unread["unread_total"], 0);

    // The other side has not read the reply yet.
    let unread = app.get("/api/chat/unread-count", Some(&admin_token)).await?;
    let unread = body_to_json(unread.into_body()).await?;
    assert_eq!(unread["unread_total"], 1);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn replies_cannot_point_into_other_threads() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("client@example.com", "hunter2pass", "CLIENT")
        .await?;
    let token = app.login_token("client@example.com", "hunter2pass").await?;
    let first_ticket = create_ticket(&app, &token).await?;
    let second_ticket = create_ticket(&app, &token).await?;

    let origin = app
        .post_multipart(
            &format!("/api/chat/ticket/{first_ticket}/messages"),
            &[("body", "Original report")],
            &[],
            Some(&token),
            None,
        )
        .await?;
    let origin = body_to_json(origin.into_body()).await?;
    let origin_id = origin["id"].as_i64().unwrap();

    // A reply pointer into another ticket's thread is dropped, not an
    // error.
    let reply = app
        .post_multipart(
            &format!("/api/chat/ticket/{second_ticket}/messages"),
            &[
                ("body", "Follow-up in the wrong place"),
                ("reply_to", &origin_id.to_string()),
            ],
            &[],
            Some(&token),
            None,
        )
        .await?;
    assert_eq!(reply.status(), StatusCode::CREATED);
    let reply = body_to_json(reply.into_body()).await?;
    assert!(reply["reply_to_id"].is_null());

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn attachment_only_posts_keep_an_empty_body() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("client@example.com", "hunter2pass", "CLIENT")
        .await?;
    let token = app.login_token("client@example.com", "hunter2pass").await?;
    let ticket_id = create_ticket(&app, &token).await?;
    let path = format!("/api/chat/ticket/{ticket_id}/messages");

    let posted = app
        .post_multipart(
            &path,
            &[],
            &[("file", "notes.txt", b"breaker serials")],
            Some(&token),
            None,
        )
        .await?;
    assert_eq!(posted.status(), StatusCode::CREATED);
    let posted = body_to_json(posted.into_body()).await?;
    assert_eq!(posted["body"], "");

    let attachments = posted["attachments"].as_array().unwrap();
    assert_eq!(attachments.len(), 1);
    assert_eq!(attachments[0]["original_name"], "notes.txt");
    // The declared upload type is kept instead of re-guessing from the
    // filename.
    assert_eq!(attachments[0]["content_type"], "application/octet-stream");

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn mention_autocomplete_returns_handles() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("admin@example.com", "hunter2pass", "ADMIN")
        .await?;
    app.insert_user("client@example.com", "hunter2pass", "CLIENT")
        .await?;
    let token = app.login_token("admin@example.com", "hunter2pass").await?;

    let response = app.get("/api/chat/mentions?q=client", Some(&token)).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_to_json(response.into_body()).await?;
    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["handle"], "@client@example.com");

    app.cleanup().await?;
    Ok(())
}
