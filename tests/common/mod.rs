#![allow(dead_code)]

use std::sync::Arc;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode, header};
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;

use tenant_runtime::config::ServerConfig;
use tenant_runtime::server::{AppState, create_router};

pub const ADMIN_TOKEN: &str = "test-admin-token";

pub struct TestApp {
    pub temp_dir: TempDir,
    pub state: Arc<AppState>,
    router: Router,
}

impl TestApp {
    pub fn start() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(configure: impl FnOnce(&mut ServerConfig)) -> Self {
        let temp_dir = TempDir::new().expect("create temp dir");
        let mut config = ServerConfig {
            data_dir: temp_dir.path().to_path_buf(),
            admin_token: Some(ADMIN_TOKEN.to_string()),
            ..ServerConfig::default()
        };
        configure(&mut config);

        let state = Arc::new(AppState::open(&config).expect("open app state"));
        let router = create_router(state.clone());
        Self {
            temp_dir,
            state,
            router,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("route request");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        (status, body)
    }

    /// Calls the admin surface with the operator token.
    pub async fn admin(&self, method: Method, path: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = build(method, &format!("/admin{path}"), body, |b| {
            b.header(header::AUTHORIZATION, format!("Bearer {ADMIN_TOKEN}"))
        });
        self.send(request).await
    }

    /// Calls the public runtime surface, optionally as an app user.
    pub async fn runtime(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        app_token: Option<&str>,
    ) -> (StatusCode, Value) {
        let request = build(method, uri, body, |b| match app_token {
            Some(token) => b.header("x-app-token", token),
            None => b,
        });
        self.send(request).await
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.runtime(Method::GET, uri, None, None).await
    }

    // Fixtures

    pub async fn workspace(&self, id: &str, slug: &str) {
        self.workspace_with(id, slug, "published", json!({})).await;
    }

    pub async fn workspace_with(&self, id: &str, slug: &str, status: &str, settings: Value) {
        let (code, body) = self
            .admin(
                Method::PUT,
                &format!("/workspaces/{id}"),
                Some(json!({ "slug": slug, "app_status": status, "settings": settings })),
            )
            .await;
        assert!(code.is_success(), "upsert workspace: {code} {body}");
    }

    pub async fn deploy(&self, id: &str, source: &str) -> String {
        let (code, body) = self
            .admin(
                Method::PUT,
                &format!("/workspaces/{id}/code"),
                Some(json!({ "source": source })),
            )
            .await;
        assert_eq!(code, StatusCode::OK, "deploy: {body}");
        body["data"]["hash"].as_str().expect("hash").to_string()
    }

    pub async fn table(&self, id: &str, def: Value) {
        let (code, body) = self
            .admin(Method::POST, &format!("/workspaces/{id}/database/tables"), Some(def))
            .await;
        assert_eq!(code, StatusCode::CREATED, "create table: {body}");
    }

    pub async fn sql(&self, id: &str, sql: &str) -> (StatusCode, Value) {
        self.admin(
            Method::POST,
            &format!("/workspaces/{id}/database/query"),
            Some(json!({ "sql": sql })),
        )
        .await
    }

    /// Creates an app user and returns `(user_id, session_token)`.
    pub async fn app_user(&self, id: &str, email: &str) -> (String, String) {
        let (code, body) = self
            .admin(
                Method::POST,
                &format!("/workspaces/{id}/app-users"),
                Some(json!({ "email": email })),
            )
            .await;
        assert_eq!(code, StatusCode::CREATED, "create app user: {body}");
        let user_id = body["data"]["id"].as_str().expect("user id").to_string();

        let (code, body) = self
            .admin(
                Method::POST,
                &format!("/workspaces/{id}/app-users/{user_id}/sessions"),
                Some(json!({})),
            )
            .await;
        assert_eq!(code, StatusCode::CREATED, "create session: {body}");
        let token = body["data"]["token"].as_str().expect("token").to_string();
        (user_id, token)
    }

    pub async fn policy(&self, id: &str, table: &str, column: &str, match_field: &str) -> String {
        let (code, body) = self
            .admin(
                Method::POST,
                &format!("/workspaces/{id}/policies"),
                Some(json!({
                    "table_name": table,
                    "column_name": column,
                    "match_field": match_field,
                })),
            )
            .await;
        assert_eq!(code, StatusCode::CREATED, "create policy: {body}");
        body["data"]["id"].as_str().expect("policy id").to_string()
    }
}

pub fn build(
    method: Method,
    uri: &str,
    body: Option<Value>,
    decorate: impl FnOnce(axum::http::request::Builder) -> axum::http::request::Builder,
) -> Request<Body> {
    let builder = decorate(Request::builder().method(method).uri(uri));
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("build request"),
        None => builder.body(Body::empty()).expect("build request"),
    }
}

/// `products(id INTEGER PK, name TEXT, price REAL)` with three rows.
pub async fn seed_products(app: &TestApp, id: &str) {
    app.table(
        id,
        json!({
            "name": "products",
            "columns": [
                {"name": "id", "type": "INTEGER"},
                {"name": "name", "type": "TEXT"},
                {"name": "price", "type": "REAL"}
            ],
            "primary_key": ["id"]
        }),
    )
    .await;
    let (code, body) = app
        .sql(
            id,
            "INSERT INTO products (id, name, price) VALUES (1, 'Apple', 1.5), (2, 'Banana', 0.75), (3, 'Cherry', 3.0)",
        )
        .await;
    assert_eq!(code, StatusCode::OK, "seed products: {body}");
}

/// `notes(id, user_id, body)` with rows 1 and 3 owned by `owner`.
pub async fn seed_notes(app: &TestApp, id: &str, owner: &str) {
    app.table(
        id,
        json!({
            "name": "notes",
            "columns": [
                {"name": "id", "type": "INTEGER"},
                {"name": "user_id", "type": "TEXT"},
                {"name": "body", "type": "TEXT"}
            ],
            "primary_key": ["id"]
        }),
    )
    .await;
    let sql = format!(
        "INSERT INTO notes (id, user_id, body) VALUES (1, '{owner}', 'mine'), (2, 'someone-else', 'theirs'), (3, '{owner}', 'also mine')"
    );
    let (code, body) = app.sql(id, &sql).await;
    assert_eq!(code, StatusCode::OK, "seed notes: {body}");
}
