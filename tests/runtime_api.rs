mod common;

use axum::http::{Method, StatusCode};
use serde_json::json;

use common::TestApp;

const PING_V1: &str = r#"exports.routes = { "GET /ping": function(){ return { ok: true }; } };"#;
const PING_V2: &str = r#"exports.routes = { "GET /ping": function(){ return { version: 2 }; } };"#;

#[tokio::test]
async fn health() {
    let app = TestApp::start();
    let (status, body) = app.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!("OK"));
}

#[tokio::test]
async fn deploy_and_call() {
    let app = TestApp::start();
    app.workspace("ws-t", "t").await;
    app.deploy("ws-t", PING_V1).await;

    let (status, body) = app.get("/runtime/t/api/ping").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"ok": true}));
}

#[tokio::test]
async fn deploy_reloads_code() {
    let app = TestApp::start();
    app.workspace("ws-t", "t").await;
    app.deploy("ws-t", PING_V1).await;
    assert_eq!(app.get("/runtime/t/api/ping").await.1, json!({"ok": true}));

    app.deploy("ws-t", PING_V2).await;
    let (status, body) = app.get("/runtime/t/api/ping").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"version": 2}));
}

#[tokio::test]
async fn explicit_invalidate_picks_up_new_source() {
    let app = TestApp::start();
    app.workspace("ws-t", "t").await;
    app.deploy("ws-t", PING_V1).await;
    assert_eq!(app.get("/runtime/t/api/ping").await.1, json!({"ok": true}));

    // Written behind the runtime's back: the cached code still serves.
    app.state.meta.put_code("ws-t", PING_V2).expect("put code");
    assert_eq!(app.get("/runtime/t/api/ping").await.1, json!({"ok": true}));

    let (status, _) = app
        .admin(Method::POST, "/workspaces/ws-t/vm/invalidate", None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(app.get("/runtime/t/api/ping").await.1, json!({"version": 2}));
}

#[tokio::test]
async fn infinite_loop_times_out_and_vm_recovers() {
    let app = TestApp::start();
    app.workspace_with("ws-t", "t", "published", json!({"runtime": {"timeout_ms": 300}}))
        .await;
    app.deploy(
        "ws-t",
        r#"exports.routes = {
            "GET /loop": () => { while (true) {} },
            "GET /ping": () => ({ ok: true }),
        };"#,
    )
    .await;

    assert_eq!(app.get("/runtime/t/api/ping").await.0, StatusCode::OK);

    let started = std::time::Instant::now();
    let (status, body) = app.get("/runtime/t/api/loop").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let message = body["error"].as_str().unwrap().to_lowercase();
    assert!(message.contains("timeout") || message.contains("interrupt"), "{message}");
    assert!(started.elapsed() < std::time::Duration::from_secs(5));

    let (status, body) = app.get("/runtime/t/api/ping").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"ok": true}));
}

#[tokio::test]
async fn syntax_error_is_hidden_from_clients() {
    let app = TestApp::start();
    app.workspace("ws-t", "t").await;
    app.deploy("ws-t", "function( { broken").await;

    let (status, body) = app.get("/runtime/t/api/anything").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body, json!({"error": "VM not available"}));

    let (status, body) = app.admin(Method::GET, "/workspaces/ws-t/vm", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["loaded"], false);
    let raw = body["data"]["last_compile_error"].as_str().unwrap();
    assert!(raw.contains("SyntaxError"), "{raw}");
}

#[tokio::test]
async fn unknown_route_and_missing_code() {
    let app = TestApp::start();
    app.workspace("ws-t", "t").await;

    let (status, _) = app.get("/runtime/t/api/ping").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    app.deploy("ws-t", PING_V1).await;
    let (status, body) = app.get("/runtime/t/api/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());

    let (status, _) = app.runtime(Method::POST, "/runtime/t/api/ping", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unpublished_workspaces_are_not_served() {
    let app = TestApp::start();
    app.workspace_with("ws-d", "draft-app", "draft", json!({})).await;
    app.deploy("ws-d", PING_V1).await;
    assert_eq!(app.get("/runtime/draft-app/api/ping").await.0, StatusCode::NOT_FOUND);
    assert_eq!(app.get("/runtime/nobody/api/ping").await.0, StatusCode::NOT_FOUND);

    app.workspace_with("ws-d", "draft-app", "published", json!({})).await;
    assert_eq!(app.get("/runtime/draft-app/api/ping").await.0, StatusCode::OK);

    app.workspace_with("ws-d", "draft-app", "suspended", json!({})).await;
    assert_eq!(app.get("/runtime/draft-app/api/ping").await.0, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn handler_sees_request_and_shapes_response() {
    let app = TestApp::start();
    app.workspace("ws-t", "t").await;
    app.deploy(
        "ws-t",
        r#"exports.routes = {
            "POST /orders/:id": (ctx) => ({
                status: 201,
                headers: { "x-order": ctx.params.id },
                body: { id: ctx.params.id, qty: ctx.body.qty, q: ctx.query.q, path: ctx.path },
            }),
            "GET /fail": () => { throw new Error("boom"); },
            "GET /empty": () => undefined,
        };"#,
    )
    .await;

    let (status, body) = app
        .runtime(
            Method::POST,
            "/runtime/t/api/orders/42?q=fast",
            Some(json!({"qty": 3})),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body, json!({"id": "42", "qty": 3, "q": "fast", "path": "/orders/42"}));

    let (status, body) = app.get("/runtime/t/api/fail").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({"error": "boom"}));

    let (status, body) = app.get("/runtime/t/api/empty").await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(body.is_null());
}

#[tokio::test]
async fn handlers_use_the_workspace_database() {
    let app = TestApp::start();
    app.workspace("ws-t", "t").await;
    common::seed_products(&app, "ws-t").await;
    app.deploy(
        "ws-t",
        r#"exports.routes = {
            "POST /products": (ctx) => ({ status: 201, body: db.insert("products", ctx.body) }),
            "GET /products/:id": (ctx) =>
                db.queryOne("SELECT name, price FROM products WHERE id = ?", [Number(ctx.params.id)]),
            "GET /broken": () => {
                try {
                    db.query("SELECT * FROM nope");
                } catch (e) {
                    return { kind: e.kind };
                }
            },
            "GET /forbidden": () => {
                try {
                    db.execute("DROP TABLE products");
                } catch (e) {
                    return { kind: e.kind };
                }
            },
        };"#,
    )
    .await;

    let (status, body) = app
        .runtime(
            Method::POST,
            "/runtime/t/api/products",
            Some(json!({"name": "Date", "price": 5.0})),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["affected_rows"], 1);
    assert_eq!(body["last_insert_id"], 4);

    let (_, body) = app.get("/runtime/t/api/products/2").await;
    assert_eq!(body, json!({"name": "Banana", "price": 0.75}));

    let (status, _) = app.get("/runtime/t/api/products/99").await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    assert_eq!(app.get("/runtime/t/api/broken").await.1, json!({"kind": "TableNotFound"}));
    assert_eq!(app.get("/runtime/t/api/forbidden").await.1, json!({"kind": "Forbidden"}));
}

#[tokio::test]
async fn workspaces_do_not_share_vms() {
    let app = TestApp::start();
    app.workspace("ws-a", "a").await;
    app.workspace("ws-b", "b").await;
    app.deploy("ws-a", PING_V1).await;
    app.deploy("ws-b", PING_V2).await;

    assert_eq!(app.get("/runtime/a/api/ping").await.1, json!({"ok": true}));
    assert_eq!(app.get("/runtime/b/api/ping").await.1, json!({"version": 2}));
    assert_eq!(app.state.pool.len(), 2);
}
