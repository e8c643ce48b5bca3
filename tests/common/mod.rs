use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, ensure, Context, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::PgConnection;
use http_body_util::BodyExt;
use labinsight::analysis::{AnalysisError, AnalysisOutcome, ReportAnalyzer};
use labinsight::auth::jwt::JwtService;
use labinsight::auth::password;
use labinsight::config::{self, AppConfig};
use labinsight::db::{self, PgPool};
use labinsight::models::{AuthProvider, NewProfile, NewUser, Role};
use labinsight::routes;
use labinsight::schema::{profiles, users};
use labinsight::state::AppState;
use labinsight::storage::ObjectStorage;
use once_cell::sync::Lazy;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tower::util::ServiceExt;
use uuid::Uuid;

static DB_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

#[derive(Default)]
pub struct FakeStorage {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

#[async_trait]
impl ObjectStorage for FakeStorage {
    async fn put_object(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        self.objects.lock().await.insert(key.to_string(), bytes);
        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.objects.lock().await.get(key).cloned())
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        self.objects.lock().await.remove(key);
        Ok(())
    }
}

impl FakeStorage {
    #[allow(dead_code)]
    pub async fn contains(&self, key: &str) -> bool {
        self.objects.lock().await.contains_key(key)
    }

    /// Drops a stored file behind the application's back.
    #[allow(dead_code)]
    pub async fn remove(&self, key: &str) -> bool {
        self.objects.lock().await.remove(key).is_some()
    }

    #[allow(dead_code)]
    pub async fn object_count(&self) -> usize {
        self.objects.lock().await.len()
    }
}

/// Stands in for the AI microservice; flip `set_failing` to simulate a timeout.
#[derive(Default)]
pub struct ScriptedAnalyzer {
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl ScriptedAnalyzer {
    #[allow(dead_code)]
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    #[allow(dead_code)]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReportAnalyzer for ScriptedAnalyzer {
    async fn analyze(
        &self,
        file_name: &str,
        _content_type: Option<&str>,
        _bytes: Vec<u8>,
    ) -> Result<AnalysisOutcome, AnalysisError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(AnalysisError::Timeout(config::DEFAULT_AI_SERVICE_TIMEOUT_SECONDS));
        }
        Ok(AnalysisOutcome {
            ai_summary: json!({ "severity": "normal", "summary": format!("{file_name} looks fine") }),
            test_results: json!([{ "name": "Hemoglobin", "value": 13.5, "unit": "g/dL" }]),
            embedding_path: format!("embeddings/{file_name}.npy"),
        })
    }
}

pub struct TestApp {
    pub state: AppState,
    router: Router,
    storage: Arc<FakeStorage>,
    analyzer: Arc<ScriptedAnalyzer>,
}

impl TestApp {
    pub async fn new() -> Result<Self> {
        let database_url = env::var("TEST_DATABASE_URL")
            .context("TEST_DATABASE_URL must be set for integration tests")?;

        let config = AppConfig {
            database_url,
            database_max_pool_size: db::DEFAULT_MAX_POOL_SIZE,
            server_host: "127.0.0.1".to_string(),
            server_port: 0,
            jwt_secret: "test-secret".to_string(),
            jwt_issuer: "test-issuer".to_string(),
            jwt_audience: "test-audience".to_string(),
            jwt_expiry_minutes: 60,
            cors_allowed_origin: None,
            ai_service_url: config::DEFAULT_AI_SERVICE_URL.to_string(),
            ai_service_timeout_seconds: 1,
            upload_dir: PathBuf::from("unused"),
            max_upload_bytes: config::DEFAULT_MAX_UPLOAD_BYTES,
        };

        let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
        prepare_database(&pool).await?;

        let storage = Arc::new(FakeStorage::default());
        let analyzer = Arc::new(ScriptedAnalyzer::default());
        let storage_for_state: Arc<dyn ObjectStorage> = storage.clone();
        let analyzer_for_state: Arc<dyn ReportAnalyzer> = analyzer.clone();
        let jwt = JwtService::from_config(&config)?;
        let state = AppState::new(pool, config, storage_for_state, analyzer_for_state, jwt);
        let router = routes::create_router(state.clone());

        Ok(Self {
            state,
            router,
            storage,
            analyzer,
        })
    }

    pub async fn cleanup(&self) -> Result<()> {
        self.with_conn(|conn| truncate_all(conn)).await
    }

    #[allow(dead_code)]
    pub fn storage(&self) -> Arc<FakeStorage> {
        self.storage.clone()
    }

    #[allow(dead_code)]
    pub fn analyzer(&self) -> Arc<ScriptedAnalyzer> {
        self.analyzer.clone()
    }

    /// Inserts a user directly; patients also get their profile row.
    /// `password = None` provisions an external-provider account.
    pub async fn insert_user(
        &self,
        name: &str,
        email: &str,
        password: Option<&str>,
        role: Role,
    ) -> Result<Uuid> {
        let name = name.to_string();
        let email = email.to_string();
        let raw_password = password.map(str::to_string);
        self.with_conn(move |conn| {
            let password_hash = raw_password
                .as_deref()
                .map(password::hash_password)
                .transpose()?;
            let user = NewUser {
                id: Uuid::new_v4(),
                name: name.clone(),
                email: email.clone(),
                auth_provider: if password_hash.is_some() {
                    AuthProvider::Local
                } else {
                    AuthProvider::External
                },
                password_hash,
                role,
            };
            diesel::insert_into(users::table)
                .values(&user)
                .execute(conn)
                .context("failed to insert user")?;
            if role == Role::Patient {
                diesel::insert_into(profiles::table)
                    .values(&NewProfile { email, name })
                    .execute(conn)
                    .context("failed to insert profile")?;
            }
            Ok(user.id)
        })
        .await
    }

    pub async fn login_token(&self, email: &str, password: &str) -> Result<String> {
        let response = self
            .post_json(
                "/auth/login",
                &json!({ "email": email, "password": password }),
                None,
            )
            .await?;

        ensure!(
            response.status() == StatusCode::OK,
            "login failed with status {}",
            response.status()
        );

        let body = json_body(response).await?;
        body["token"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("login response without token: {body}"))
    }

    /// Token for accounts that cannot log in with a password.
    #[allow(dead_code)]
    pub fn token_for(&self, user_id: Uuid, email: &str) -> Result<String> {
        self.state.jwt.issue_token(user_id, email)
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        self.send_json(Method::POST, path, payload, token).await
    }

    #[allow(dead_code)]
    pub async fn patch_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        self.send_json(Method::PATCH, path, payload, token).await
    }

    #[allow(dead_code)]
    pub async fn delete_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        self.send_json(Method::DELETE, path, payload, token).await
    }

    async fn send_json<T: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let body = serde_json::to_vec(payload)?;
        let mut builder = Request::builder()
            .method(method)
            .uri(path)
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(Body::from(body))?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    pub async fn get(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        let mut builder = Request::builder().method(Method::GET).uri(path);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(Body::empty())?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    #[allow(dead_code)]
    pub async fn delete(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        let builder = Request::builder().method(Method::DELETE).uri(path);
        let builder = if let Some(token) = token {
            builder.header("authorization", format!("Bearer {token}"))
        } else {
            builder
        };
        let request = builder.body(Body::empty())?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    #[allow(dead_code)]
    pub async fn upload_report(
        &self,
        filename: &str,
        content_type: &str,
        data: &[u8],
        token: &str,
    ) -> Result<hyper::Response<Body>> {
        let boundary = format!("boundary-{}", Uuid::new_v4());
        let mut body = Vec::new();
        body.extend(format!("--{boundary}\r\n").as_bytes());
        body.extend(
            format!(
                "Content-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\n",
                filename
            )
            .as_bytes(),
        );
        body.extend(format!("Content-Type: {}\r\n\r\n", content_type).as_bytes());
        body.extend(data);
        body.extend(b"\r\n");
        body.extend(format!("--{boundary}--\r\n").as_bytes());

        let request = Request::builder()
            .method(Method::POST)
            .uri("/upload-report")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={boundary}"),
            )
            .header("authorization", format!("Bearer {token}"))
            .body(Body::from(body))?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
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

pub async fn json_body(response: hyper::Response<Body>) -> Result<Value> {
    let bytes = body_to_vec(response.into_body()).await?;
    serde_json::from_slice(&bytes).context("response body is not JSON")
}

async fn prepare_database(pool: &PgPool) -> Result<()> {
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut conn = pool
            .get()
            .map_err(|err| anyhow!("failed to acquire connection: {err}"))?;
        db::run_migrations(&mut conn)?;
        truncate_all(&mut conn)?;
        Ok(())
    })
    .await
    .context("migration task panicked")?
}

fn truncate_all(conn: &mut PgConnection) -> Result<()> {
    conn.batch_execute(
        "TRUNCATE TABLE assigned_doctors, connection_requests, reports, doctor_details, profiles, users;",
    )
    .context("failed to truncate tables")?;
    Ok(())
}
