use std::collections::{HashMap, HashSet};
use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, ensure, Context, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request};
use axum::Router;
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::PgConnection;
use diesel_migrations::MigrationHarness;
use http_body_util::BodyExt;
use memodesk::auth::jwt::JwtService;
use memodesk::config::AppConfig;
use memodesk::db::{self, PgPool, MIGRATIONS};
use memodesk::models::{NewDepartment, NewUser};
use memodesk::notify::Notifier;
use memodesk::routes;
use memodesk::schema::{departments, users};
use memodesk::state::AppState;
use memodesk::storage::ObjectStorage;
use once_cell::sync::Lazy;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use tower::util::ServiceExt;
use uuid::Uuid;

static DB_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

#[allow(dead_code)]
#[derive(Clone)]
pub struct StoredObject {
    pub key: String,
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
    pub content_disposition: Option<String>,
}

#[derive(Default)]
pub struct FakeStorage {
    objects: Mutex<HashMap<String, StoredObject>>,
}

#[async_trait]
impl ObjectStorage for FakeStorage {
    async fn put_object(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: Option<String>,
        content_disposition: Option<String>,
    ) -> Result<()> {
        let stored = StoredObject {
            key: key.to_string(),
            bytes,
            content_type,
            content_disposition,
        };
        let mut guard = self.objects.lock().await;
        guard.insert(stored.key.clone(), stored);
        Ok(())
    }

    async fn presign_get_object(&self, key: &str, expires_in: Duration) -> Result<String> {
        let guard = self.objects.lock().await;
        ensure!(guard.contains_key(key), "object {key} missing");
        Ok(format!(
            "https://fake-storage/{key}?expires_in={}",
            expires_in.as_secs()
        ))
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        let mut guard = self.objects.lock().await;
        guard.remove(key);
        Ok(())
    }
}

impl FakeStorage {
    #[allow(dead_code)]
    pub async fn get(&self, key: &str) -> Option<StoredObject> {
        let guard = self.objects.lock().await;
        guard.get(key).cloned()
    }

    #[allow(dead_code)]
    pub async fn object_count(&self) -> usize {
        let guard = self.objects.lock().await;
        guard.len()
    }
}

#[allow(dead_code)]
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Records every message; addresses listed in `failing` get an error instead.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<SentMessage>>,
    failing: Mutex<HashSet<String>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<()> {
        if self.failing.lock().await.contains(to) {
            return Err(anyhow!("mailbox {to} rejected the message"));
        }
        self.sent.lock().await.push(SentMessage {
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}

impl RecordingNotifier {
    #[allow(dead_code)]
    pub async fn fail_for(&self, address: &str) {
        self.failing.lock().await.insert(address.to_string());
    }

    #[allow(dead_code)]
    pub async fn sent_to(&self, address: &str) -> Vec<SentMessage> {
        let guard = self.sent.lock().await;
        guard
            .iter()
            .filter(|message| message.to == address)
            .cloned()
            .collect()
    }
}

#[allow(dead_code)]
pub struct TestUser {
    pub id: Uuid,
    pub email: String,
    pub token: String,
}

pub struct TestApp {
    pub state: AppState,
    router: Router,
    storage: Arc<FakeStorage>,
    notifier: Arc<RecordingNotifier>,
}

impl TestApp {
    /// `None` when `TEST_DATABASE_URL` is unset; callers skip the test.
    pub async fn try_new() -> Result<Option<Self>> {
        let Ok(database_url) = env::var("TEST_DATABASE_URL") else {
            eprintln!("TEST_DATABASE_URL is not set; skipping integration test");
            return Ok(None);
        };

        let config = AppConfig {
            database_url,
            database_max_pool_size: 8,
            server_host: "127.0.0.1".to_string(),
            server_port: 0,
            jwt_secret: "test-secret".to_string(),
            jwt_issuer: "test-issuer".to_string(),
            jwt_audience: "test-audience".to_string(),
            jwt_expiry_minutes: 60,
            cors_allowed_origin: None,
            aws_endpoint_url: None,
            aws_access_key_id: None,
            aws_secret_access_key: None,
            aws_region: "us-east-1".to_string(),
            s3_bucket: "test-bucket".to_string(),
            notify_webhook_url: None,
            notify_from: "memos@example.test".to_string(),
            notify_timeout: Duration::from_secs(2),
            sequence_lock_timeout: Duration::from_secs(5),
        };

        let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
        prepare_database(&pool).await?;

        let storage = Arc::new(FakeStorage::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let storage_for_state: Arc<dyn ObjectStorage> = storage.clone();
        let notifier_for_state: Arc<dyn Notifier> = notifier.clone();
        let jwt = JwtService::from_config(&config)?;
        let state = AppState::new(pool, config, storage_for_state, notifier_for_state, jwt);
        let router = routes::create_router(state.clone());

        Ok(Some(Self {
            state,
            router,
            storage,
            notifier,
        }))
    }

    pub async fn cleanup(&self) -> Result<()> {
        self.with_conn(truncate_all).await
    }

    #[allow(dead_code)]
    pub fn storage(&self) -> Arc<FakeStorage> {
        self.storage.clone()
    }

    #[allow(dead_code)]
    pub fn notifier(&self) -> Arc<RecordingNotifier> {
        self.notifier.clone()
    }

    pub async fn insert_department(&self, name: &str, prefix: Option<&str>) -> Result<Uuid> {
        let department = NewDepartment {
            id: Uuid::new_v4(),
            name: name.to_string(),
            prefix: prefix.map(str::to_string),
            director_id: None,
        };
        self.with_conn(move |conn| {
            diesel::insert_into(departments::table)
                .values(&department)
                .execute(conn)
                .context("failed to insert department")?;
            Ok(department.id)
        })
        .await
    }

    pub async fn set_director(&self, department_id: Uuid, director_id: Uuid) -> Result<()> {
        self.with_conn(move |conn| {
            diesel::update(departments::table.find(department_id))
                .set(departments::director_id.eq(director_id))
                .execute(conn)
                .context("failed to assign director")?;
            Ok(())
        })
        .await
    }

    pub async fn insert_user(
        &self,
        username: &str,
        role: &str,
        department_id: Option<Uuid>,
    ) -> Result<TestUser> {
        let email = format!("{username}@example.test");
        let user = NewUser {
            id: Uuid::new_v4(),
            username: username.to_string(),
            email: Some(email.clone()),
            display_name: username.to_string(),
            title: String::new(),
            role: role.to_string(),
            department_id,
        };
        let token = self
            .state
            .jwt
            .generate_token(user.id, &user.username, &user.role)?;
        let id = self
            .with_conn(move |conn| {
                diesel::insert_into(users::table)
                    .values(&user)
                    .execute(conn)
                    .context("failed to insert user")?;
                Ok(user.id)
            })
            .await?;
        Ok(TestUser { id, email, token })
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
    pub async fn upload_attachment(
        &self,
        memo_id: Uuid,
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
            .uri(format!("/api/memos/{memo_id}/attachments"))
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

pub async fn read_json<T: DeserializeOwned>(response: hyper::Response<Body>) -> Result<T> {
    let bytes = body_to_vec(response.into_body()).await?;
    serde_json::from_slice(&bytes).with_context(|| {
        format!(
            "unexpected response body: {}",
            String::from_utf8_lossy(&bytes)
        )
    })
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
        "TRUNCATE TABLE distribution_records, memo_attachments, memo_recipients, memos, \
         sequence_counters, departments, users CASCADE;",
    )
    .context("failed to truncate tables")?;
    Ok(())
}
