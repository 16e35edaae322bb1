use std::collections::HashMap;
use std::env;
use std::sync::Arc;

use anyhow::{anyhow, ensure, Context, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::PgConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use http_body_util::BodyExt;
use once_cell::sync::Lazy;
use portal::auth::jwt::JwtService;
use portal::auth::password::hash_password;
use portal::config::AppConfig;
use portal::db::{self, PgPool};
use portal::models::{Job, NewDocumentType, NewRequestStatus, NewTechnician, NewUser};
use portal::routes;
use portal::state::AppState;
use portal::storage::ObjectStorage;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tower::util::ServiceExt;
use uuid::Uuid;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

static DB_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

#[derive(Default)]
pub struct FakeStorage {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

#[async_trait]
impl ObjectStorage for FakeStorage {
    async fn put_object(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        let mut guard = self.objects.lock().await;
        guard.insert(key.to_string(), bytes);
        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
        let guard = self.objects.lock().await;
        guard
            .get(key)
            .cloned()
            .ok_or_else(|| anyhow!("object {key} missing"))
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        let mut guard = self.objects.lock().await;
        guard.remove(key);
        Ok(())
    }
}

impl FakeStorage {
    #[allow(dead_code)]
    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        let guard = self.objects.lock().await;
        guard.get(key).cloned()
    }

    #[allow(dead_code)]
    pub async fn object_count(&self) -> usize {
        let guard = self.objects.lock().await;
        guard.len()
    }
}

pub struct TestApp {
    pub state: AppState,
    router: Router,
    storage: Arc<FakeStorage>,
}

impl TestApp {
    pub async fn new() -> Result<Self> {
        let database_url = env::var("TEST_DATABASE_URL")
            .context("TEST_DATABASE_URL must be set for integration tests")?;

        let config = AppConfig {
            database_url: database_url.clone(),
            database_max_pool_size: db::DEFAULT_MAX_POOL_SIZE,
            server_host: "127.0.0.1".to_string(),
            server_port: 0,
            jwt_secret: "test-secret".to_string(),
            jwt_issuer: "test-issuer".to_string(),
            jwt_audience: "test-audience".to_string(),
            jwt_expiry_minutes: 60,
            refresh_token_expiry_days: 30,
            refresh_cookie_secure: false,
            refresh_cookie_domain: None,
            cors_allowed_origin: None,
            storage_root: "./test-storage".to_string(),
        };

        let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
        prepare_database(&pool).await?;

        let storage = Arc::new(FakeStorage::default());
        let storage_for_state: Arc<dyn ObjectStorage> = storage.clone();
        let jwt = JwtService::from_config(&config)?;
        let state = AppState::new(pool.clone(), config, storage_for_state, jwt);
        let router = routes::create_router(state.clone());

        Ok(Self {
            state,
            router,
            storage,
        })
    }

    pub async fn cleanup(&self) -> Result<()> {
        let pool = self.state.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get cleanup connection: {err}"))?;
            truncate_all(&mut conn)?;
            Ok(())
        })
        .await
        .context("cleanup task panicked")?
    }

    #[allow(dead_code)]
    pub fn storage(&self) -> Arc<FakeStorage> {
        self.storage.clone()
    }

    pub async fn insert_user(&self, email: &str, password: &str, role: &str) -> Result<Uuid> {
        let email = email.to_string();
        let password = password.to_string();
        let role = role.to_string();
        self.with_conn(move |conn| {
            let user = NewUser {
                id: Uuid::new_v4(),
                email,
                password_hash: hash_password(&password)?,
                role,
                company_name: "Test Co".to_string(),
                company_cif: "RO000001".to_string(),
                phone: "0722000000".to_string(),
                is_active: true,
            };
            diesel::insert_into(portal::schema::users::table)
                .values(&user)
                .execute(conn)
                .context("failed to insert user")?;
            Ok(user.id)
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn insert_document_type(
        &self,
        code: &str,
        series: &str,
        schema: Value,
    ) -> Result<Uuid> {
        let code = code.to_string();
        let series = series.to_string();
        self.with_conn(move |conn| {
            let doc_type = NewDocumentType {
                id: Uuid::new_v4(),
                code: code.clone(),
                name: format!("{code} documents"),
                is_active: true,
                schema,
                series,
                next_number: 1,
                terms_id: None,
            };
            diesel::insert_into(portal::schema::document_types::table)
                .values(&doc_type)
                .execute(conn)
                .context("failed to insert document type")?;
            Ok(doc_type.id)
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn insert_terms(&self, key: &str, title: &str) -> Result<Uuid> {
        let key = key.to_string();
        let title = title.to_string();
        self.with_conn(move |conn| {
            use portal::schema::document_terms;
            let terms_id = Uuid::new_v4();
            diesel::insert_into(document_terms::table)
                .values((
                    document_terms::id.eq(terms_id),
                    document_terms::key.eq(key),
                    document_terms::title.eq(title),
                    document_terms::body_html.eq("<p>Standard terms apply.</p>"),
                    document_terms::is_active.eq(true),
                ))
                .execute(conn)
                .context("failed to insert terms")?;
            Ok(terms_id)
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn insert_status(&self, name: &str, sort_order: i32) -> Result<Uuid> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            let status = NewRequestStatus {
                id: Uuid::new_v4(),
                name,
                is_active: true,
                sort_order,
            };
            diesel::insert_into(portal::schema::request_statuses::table)
                .values(&status)
                .execute(conn)
                .context("failed to insert status")?;
            Ok(status.id)
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn insert_technician(&self, name: &str, user_id: Option<Uuid>) -> Result<Uuid> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            let technician = NewTechnician {
                id: Uuid::new_v4(),
                name: name.clone(),
                company_name: String::new(),
                company_cif: String::new(),
                email: format!("{}@example.com", name.to_lowercase().replace(' ', ".")),
                phone: "0722999999".to_string(),
                category: "electric".to_string(),
                user_id,
                is_active: true,
            };
            diesel::insert_into(portal::schema::technicians::table)
                .values(&technician)
                .execute(conn)
                .context("failed to insert technician")?;
            Ok(technician.id)
        })
        .await
    }

    pub async fn login_token(&self, email: &str, password: &str) -> Result<String> {
        #[derive(Serialize)]
        struct LoginPayload<'a> {
            email: &'a str,
            password: &'a str,
        }

        let response = self
            .post_json("/api/auth/login", &LoginPayload { email, password }, None)
            .await?;

        ensure!(
            response.status() == StatusCode::OK,
            "login failed with status {}",
            response.status()
        );

        let body = body_to_vec(response.into_body()).await?;
        #[derive(serde::Deserialize)]
        struct LoginResponse {
            access_token: String,
        }
        let parsed: LoginResponse = serde_json::from_slice(&body)?;
        Ok(parsed.access_token)
    }

    #[allow(dead_code)]
    pub async fn jobs_by_type(&self, ty: &str) -> Result<Vec<Job>> {
        let ty = ty.to_string();
        self.with_conn(move |conn| {
            use portal::schema::jobs::dsl::{job_type as job_type_col, jobs as jobs_table};
            let rows = jobs_table
                .filter(job_type_col.eq(&ty))
                .load::<Job>(conn)
                .context("failed to load jobs")?;
            Ok(rows)
        })
        .await
    }

    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
        content_type: Option<&str>,
        token: Option<&str>,
        forwarded_for: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(content_type) = content_type {
            builder = builder.header("content-type", content_type);
        }
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        if let Some(ip) = forwarded_for {
            builder = builder.header("x-forwarded-for", ip);
        }
        let request = builder.body(body.map(Body::from).unwrap_or_else(Body::empty))?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        self.request(
            Method::POST,
            path,
            Some(serde_json::to_vec(payload)?),
            Some("application/json"),
            token,
            None,
        )
        .await
    }

    #[allow(dead_code)]
    pub async fn post_json_from(
        &self,
        path: &str,
        payload: &Value,
        token: Option<&str>,
        ip: &str,
    ) -> Result<hyper::Response<Body>> {
        self.request(
            Method::POST,
            path,
            Some(serde_json::to_vec(payload)?),
            Some("application/json"),
            token,
            Some(ip),
        )
        .await
    }

    #[allow(dead_code)]
    pub async fn patch_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        self.request(
            Method::PATCH,
            path,
            Some(serde_json::to_vec(payload)?),
            Some("application/json"),
            token,
            None,
        )
        .await
    }

    pub async fn get(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        self.request(Method::GET, path, None, None, token, None).await
    }

    #[allow(dead_code)]
    pub async fn get_from(
        &self,
        path: &str,
        token: Option<&str>,
        ip: &str,
    ) -> Result<hyper::Response<Body>> {
        self.request(Method::GET, path, None, None, token, Some(ip))
            .await
    }

    #[allow(dead_code)]
    pub async fn delete(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        self.request(Method::DELETE, path, None, None, token, None)
            .await
    }

    /// Multipart POST with text fields and file parts, in the shape the
    /// chat composer and the public intake form send.
    #[allow(dead_code)]
    pub async fn post_multipart(
        &self,
        path: &str,
        fields: &[(&str, &str)],
        files: &[(&str, &str, &[u8])],
        token: Option<&str>,
        forwarded_for: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let boundary = format!("boundary-{}", Uuid::new_v4());
        let mut body = Vec::new();
        for (name, value) in fields {
            body.extend(format!("--{boundary}\r\n").as_bytes());
            body.extend(
                format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
            );
            body.extend(value.as_bytes());
            body.extend(b"\r\n");
        }
        for (name, filename, data) in files {
            body.extend(format!("--{boundary}\r\n").as_bytes());
            body.extend(
                format!(
                    "Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\n"
                )
                .as_bytes(),
            );
            body.extend(b"Content-Type: application/octet-stream\r\n\r\n");
            body.extend(*data);
            body.extend(b"\r\n");
        }
        body.extend(format!("--{boundary}--\r\n").as_bytes());

        self.request(
            Method::POST,
            path,
            Some(body),
            Some(&format!("multipart/form-data; boundary={boundary}")),
            token,
            forwarded_for,
        )
        .await
    }

    pub async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut PgConnection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.state.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get database connection: {err}"))?;
            f(&mut conn)
        })
        .await
        .context("connection task panicked")?
    }
}

pub async fn acquire_db_lock() -> tokio::sync::MutexGuard<'static, ()> {
    DB_LOCK.lock().await
}

pub async fn body_to_vec(body: Body) -> Result<Vec<u8>> {
    let collected = body
        .collect()
        .await
        .map_err(|err| anyhow!("failed to read response body: {err}"))?;
    Ok(collected.to_bytes().to_vec())
}

#[allow(dead_code)]
pub async fn body_to_json(body: Body) -> Result<Value> {
    let bytes = body_to_vec(body).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

async fn prepare_database(pool: &PgPool) -> Result<()> {
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut conn = pool
            .get()
            .map_err(|err| anyhow!("failed to acquire connection: {err}"))?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|err| anyhow!("failed to run migrations: {err}"))?;
        truncate_all(&mut conn)?;
        Ok(())
    })
    .await
    .context("migration task panicked")?
}

fn truncate_all(conn: &mut PgConnection) -> Result<()> {
    conn.batch_execute(
        "TRUNCATE TABLE chat_attachments, chat_mentions, chat_reads, chat_messages, \
         public_request_attachments, public_requests, tickets, \
         document_technicians, documents, document_types, document_terms, \
         abuse_events, blocked_ips, jobs, technicians, request_statuses, \
         refresh_tokens, users RESTART IDENTITY CASCADE;",
    )
    .context("failed to truncate tables")?;
    Ok(())
}
