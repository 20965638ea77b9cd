mod common;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use serde_json::{Value, json};

use common::{TestApp, seed_notes, seed_products};

fn ids(body: &Value) -> Vec<i64> {
    body["rows"]
        .as_array()
        .expect("rows")
        .iter()
        .map(|row| row["id"].as_i64().expect("id"))
        .collect()
}

#[tokio::test]
async fn tabular_crud() {
    let app = TestApp::start();
    app.workspace("ws-t", "t").await;
    seed_products(&app, "ws-t").await;

    let (status, body) = app.get("/runtime/t/data/products?page=1&page_size=10").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["columns"], json!(["id", "name", "price"]));
    assert_eq!(body["total"], 3);
    assert_eq!(body["rows"][0], json!({"id": 1, "name": "Apple", "price": 1.5}));

    let (status, body) = app
        .runtime(
            Method::POST,
            "/runtime/t/data/products",
            Some(json!({"data": {"name": "Date", "price": 5.0}})),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"affected_rows": 1}));
    assert_eq!(app.get("/runtime/t/data/products").await.1["total"], 4);

    let (_, body) = app
        .runtime(
            Method::PUT,
            "/runtime/t/data/products",
            Some(json!({"data": {"id": 2, "price": 0.8}})),
            None,
        )
        .await;
    assert_eq!(body, json!({"affected_rows": 1}));

    // Same values again change nothing.
    let (_, body) = app
        .runtime(
            Method::PUT,
            "/runtime/t/data/products",
            Some(json!({"data": {"id": 2, "price": 0.8}})),
            None,
        )
        .await;
    assert_eq!(body, json!({"affected_rows": 0}));

    let (_, body) = app
        .runtime(
            Method::DELETE,
            "/runtime/t/data/products",
            Some(json!({"ids": [1, 99]})),
            None,
        )
        .await;
    assert_eq!(body, json!({"affected_rows": 1}));

    let (_, body) = app
        .runtime(
            Method::DELETE,
            "/runtime/t/data/products",
            Some(json!({"ids": [99]})),
            None,
        )
        .await;
    assert_eq!(body, json!({"affected_rows": 0}));
}

#[tokio::test]
async fn filters_paging_and_ordering() {
    let app = TestApp::start();
    app.workspace("ws-t", "t").await;
    seed_products(&app, "ws-t").await;

    let (_, body) = app
        .get("/runtime/t/data/products?filters%5B0%5D%5Bcolumn%5D=price&filters%5B0%5D%5Boperator%5D=%3E&filters%5B0%5D%5Bvalue%5D=1&order_by=price&order_dir=desc")
        .await;
    assert_eq!(ids(&body), vec![3, 1]);
    assert_eq!(body["total"], 2);

    let (_, body) = app
        .get("/runtime/t/data/products?filters%5B0%5D%5Bcolumn%5D=name&filters%5B0%5D%5Boperator%5D=%3D&filters%5B0%5D%5Bvalue%5D=Apple&filters%5B1%5D%5Bcolumn%5D=name&filters%5B1%5D%5Boperator%5D=%3D&filters%5B1%5D%5Bvalue%5D=Cherry&filter_combinator=OR")
        .await;
    assert_eq!(ids(&body), vec![1, 3]);

    let (_, body) = app.get("/runtime/t/data/products?page=2&page_size=2").await;
    assert_eq!(ids(&body), vec![3]);
    assert_eq!(body["total"], 3);

    let (status, body) = app
        .get("/runtime/t/data/products?filters%5B0%5D%5Bcolumn%5D=nope&filters%5B0%5D%5Bvalue%5D=1")
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (status, _) = app.get("/runtime/t/data/missing").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn rls_filters_reads_by_owner() {
    let app = TestApp::start();
    app.workspace("ws-t", "t").await;
    let (owner, token) = app.app_user("ws-t", "u1@example.com").await;
    seed_notes(&app, "ws-t", &owner).await;

    // Without policies the table is open.
    assert_eq!(ids(&app.get("/runtime/t/data/notes").await.1), vec![1, 2, 3]);

    app.policy("ws-t", "notes", "user_id", "app_user_id").await;

    let (status, body) = app
        .runtime(Method::GET, "/runtime/t/data/notes", None, Some(&token))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ids(&body), vec![1, 3]);
    assert_eq!(body["total"], 2);

    let (status, body) = app.get("/runtime/t/data/notes").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["rows"], json!([]));
    assert_eq!(body["total"], 0);

    let tampered = format!("{}x", &token[..token.len() - 1]);
    let (status, body) = app
        .runtime(Method::GET, "/runtime/t/data/notes", None, Some(&tampered))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["rows"], json!([]));
}

#[tokio::test]
async fn rls_scopes_writes() {
    let app = TestApp::start();
    app.workspace("ws-t", "t").await;
    let (owner, token) = app.app_user("ws-t", "u1@example.com").await;
    seed_notes(&app, "ws-t", &owner).await;
    app.policy("ws-t", "notes", "user_id", "app_user_id").await;

    // Insert without a session is refused outright.
    let (status, _) = app
        .runtime(
            Method::POST,
            "/runtime/t/data/notes",
            Some(json!({"data": {"body": "anon"}})),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // The owner column is stamped even if the caller tries to set it.
    let (status, body) = app
        .runtime(
            Method::POST,
            "/runtime/t/data/notes",
            Some(json!({"data": {"id": 4, "body": "new", "user_id": "someone-else"}})),
            Some(&token),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let (_, body) = app
        .runtime(Method::GET, "/runtime/t/data/notes", None, Some(&token))
        .await;
    assert_eq!(ids(&body), vec![1, 3, 4]);

    // Rows outside the scope are untouched.
    let (_, body) = app
        .runtime(
            Method::PUT,
            "/runtime/t/data/notes",
            Some(json!({"data": {"id": 2, "body": "hijacked"}})),
            Some(&token),
        )
        .await;
    assert_eq!(body, json!({"affected_rows": 0}));

    let (_, body) = app
        .runtime(
            Method::DELETE,
            "/runtime/t/data/notes",
            Some(json!({"ids": [1, 2, 3]})),
            None,
        )
        .await;
    assert_eq!(body, json!({"affected_rows": 0}));

    let (_, body) = app
        .runtime(
            Method::DELETE,
            "/runtime/t/data/notes",
            Some(json!({"ids": [1, 2, 3]})),
            Some(&token),
        )
        .await;
    assert_eq!(body, json!({"affected_rows": 2}));

    let (_, body) = app.sql("ws-t", "SELECT id FROM notes ORDER BY id").await;
    assert_eq!(body["data"]["rows"], json!([{"id": 2}, {"id": 4}]));
}

#[tokio::test]
async fn before_hooks_can_reject_or_enrich() {
    let app = TestApp::start();
    app.workspace("ws-t", "t").await;
    seed_products(&app, "ws-t").await;
    app.deploy(
        "ws-t",
        r#"exports.routes = {
            "POST /hooks/before-insert/:table": (ctx) => {
                const row = ctx.body.data;
                if (row.price < 0) return { allow: false, error: "price must not be negative" };
                if (row.name === "") return { allow: false };
                return { allow: true, data: { name: row.name.toUpperCase() } };
            },
            "POST /hooks/before-update/:table": () => "not a hook reply",
        };"#,
    )
    .await;

    let (status, body) = app
        .runtime(
            Method::POST,
            "/runtime/t/data/products",
            Some(json!({"data": {"name": "Fig", "price": -1}})),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({"error": "price must not be negative"}));

    let (status, body) = app
        .runtime(
            Method::POST,
            "/runtime/t/data/products",
            Some(json!({"data": {"name": "", "price": 1}})),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({"error": "Operation rejected by business rule"}));

    let (status, _) = app
        .runtime(
            Method::POST,
            "/runtime/t/data/products",
            Some(json!({"data": {"id": 10, "name": "fig", "price": 2}})),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = app.sql("ws-t", "SELECT name FROM products WHERE id = 10").await;
    assert_eq!(body["data"]["rows"], json!([{"name": "FIG"}]));

    // A non-standard reply lets the write through.
    let (_, body) = app
        .runtime(
            Method::PUT,
            "/runtime/t/data/products",
            Some(json!({"data": {"id": 10, "price": 3}})),
            None,
        )
        .await;
    assert_eq!(body, json!({"affected_rows": 1}));
}

#[tokio::test]
async fn writes_pass_through_when_no_hooks_exist() {
    let app = TestApp::start();
    app.workspace("ws-t", "t").await;
    seed_products(&app, "ws-t").await;
    app.deploy("ws-t", "function( { broken").await;

    let (status, body) = app
        .runtime(
            Method::POST,
            "/runtime/t/data/products",
            Some(json!({"data": {"name": "Grape", "price": 2}})),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"affected_rows": 1}));
}

#[tokio::test]
async fn workspaces_are_isolated() {
    let app = TestApp::start();
    app.workspace("ws-a", "a").await;
    app.workspace("ws-b", "b").await;
    seed_products(&app, "ws-a").await;

    assert_eq!(app.get("/runtime/a/data/products").await.1["total"], 3);
    assert_eq!(app.get("/runtime/b/data/products").await.0, StatusCode::NOT_FOUND);

    seed_products(&app, "ws-b").await;
    app.runtime(
        Method::DELETE,
        "/runtime/b/data/products",
        Some(json!({"ids": [1, 2, 3]})),
        None,
    )
    .await;
    assert_eq!(app.get("/runtime/a/data/products").await.1["total"], 3);
    assert_eq!(app.get("/runtime/b/data/products").await.1["total"], 0);
}

#[tokio::test]
async fn blobs_are_base64_over_http() {
    let app = TestApp::start();
    app.workspace("ws-t", "t").await;
    app.table(
        "ws-t",
        json!({
            "name": "files",
            "columns": [
                {"name": "id", "type": "INTEGER"},
                {"name": "content", "type": "BLOB"}
            ],
            "primary_key": ["id"]
        }),
    )
    .await;
    app.sql("ws-t", "INSERT INTO files (id, content) VALUES (1, X'68656C6C6F')")
        .await;

    let (_, body) = app.get("/runtime/t/data/files").await;
    assert_eq!(body["rows"][0]["content"], "aGVsbG8=");
}

#[tokio::test]
async fn malformed_write_bodies_use_the_error_shape() {
    let app = TestApp::start();
    app.workspace("ws-t", "t").await;
    seed_products(&app, "ws-t").await;

    let raw = |method: Method, body: &'static str, json: bool| {
        let builder = Request::builder().method(method).uri("/runtime/t/data/products");
        let builder = if json {
            builder.header(header::CONTENT_TYPE, "application/json")
        } else {
            builder
        };
        builder.body(Body::from(body)).expect("build request")
    };

    for request in [
        raw(Method::POST, "{nope", true),
        raw(Method::POST, r#"{"name": "Fig"}"#, true),
        raw(Method::PUT, r#"{"data": {"id": 1}}"#, false),
        raw(Method::DELETE, r#"{"ids": "1"}"#, true),
    ] {
        let (status, body) = app.send(request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string(), "{body}");
    }

    assert_eq!(app.get("/runtime/t/data/products").await.1["total"], 3);
}

#[tokio::test]
async fn after_hooks_see_the_written_row() {
    let app = TestApp::start();
    app.workspace("ws-t", "t").await;
    let (owner, token) = app.app_user("ws-t", "u1@example.com").await;
    seed_notes(&app, "ws-t", &owner).await;
    app.policy("ws-t", "notes", "user_id", "app_user_id").await;
    app.table(
        "ws-t",
        json!({
            "name": "log",
            "columns": [
                {"name": "id", "type": "INTEGER"},
                {"name": "owner", "type": "TEXT"},
                {"name": "note_id", "type": "INTEGER"}
            ],
            "primary_key": ["id"]
        }),
    )
    .await;
    app.deploy(
        "ws-t",
        r#"exports.routes = {
            "POST /hooks/after-insert/:table": (ctx) => {
                db.insert("log", { owner: ctx.body.data.user_id, note_id: ctx.body.last_insert_id });
            },
        };"#,
    )
    .await;

    let (status, _) = app
        .runtime(
            Method::POST,
            "/runtime/t/data/notes",
            Some(json!({"data": {"body": "hooked"}})),
            Some(&token),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    // After-hooks run in the background.
    let mut rows = Value::Null;
    for _ in 0..50 {
        rows = app.sql("ws-t", "SELECT owner, note_id FROM log").await.1["data"]["rows"].clone();
        if rows.as_array().is_some_and(|r| !r.is_empty()) {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
    assert_eq!(rows, json!([{"owner": owner, "note_id": 4}]));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_inserts_all_land() {
    let app = std::sync::Arc::new(TestApp::start());
    app.workspace("ws-t", "t").await;
    seed_products(&app, "ws-t").await;

    let writes: Vec<_> = (0..16)
        .map(|i| {
            let app = app.clone();
            tokio::spawn(async move {
                app.runtime(
                    Method::POST,
                    "/runtime/t/data/products",
                    Some(json!({"data": {"name": format!("item-{i}"), "price": i}})),
                    None,
                )
                .await
            })
        })
        .collect();
    for write in writes {
        let (status, body) = write.await.expect("join write");
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body, json!({"affected_rows": 1}));
    }

    let (_, body) = app.sql("ws-t", "SELECT COUNT(DISTINCT id) AS n FROM products").await;
    assert_eq!(body["data"]["rows"], json!([{"n": 19}]));
}
