use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{
        HeaderMap, HeaderName, HeaderValue, Method, StatusCode,
        header::CONTENT_TYPE,
    },
    response::{IntoResponse, Response},
};
use serde_json::{Map, Value};

use super::published;
use crate::error::Error;
use crate::server::AppState;
use crate::server::response::RuntimeError;
use crate::vm::{VmBody, VmRequest, VmResponse};

pub async fn dispatch(
    State(state): State<Arc<AppState>>,
    Path((slug, path)): Path<(String, String)>,
    Query(query): Query<Vec<(String, String)>>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, RuntimeError> {
    forward(state, slug, path, query, method, headers, body).await
}

pub async fn dispatch_root(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
    Query(query): Query<Vec<(String, String)>>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, RuntimeError> {
    forward(state, slug, String::new(), query, method, headers, body).await
}

async fn forward(
    state: Arc<AppState>,
    slug: String,
    path: String,
    query: Vec<(String, String)>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, RuntimeError> {
    let workspace = published(&state, slug).await?;

    let mut request = VmRequest::new(method.as_str(), path);
    request.query = query_map(query);
    request.headers = header_map(&headers);
    request.body = request_body(&headers, body)?;

    let reply = state.pool.invoke(&workspace, &request).await?;
    Ok(into_http(reply)?)
}

/// Repeated keys collect into an array in arrival order.
fn query_map(pairs: Vec<(String, String)>) -> Map<String, Value> {
    let mut map = Map::new();
    for (key, value) in pairs {
        match map.get_mut(&key) {
            Some(Value::Array(values)) => values.push(Value::String(value)),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, Value::String(value)]);
            }
            None => {
                map.insert(key, Value::String(value));
            }
        }
    }
    map
}

fn header_map(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

fn request_body(headers: &HeaderMap, body: Bytes) -> Result<Option<VmBody>, RuntimeError> {
    if body.is_empty() {
        return Ok(None);
    }
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_ascii_lowercase();

    if content_type.contains("json") {
        let value = serde_json::from_slice(&body)
            .map_err(|e| RuntimeError::bad_request(format!("invalid JSON body: {e}")))?;
        return Ok(Some(VmBody::Json(value)));
    }
    if content_type.starts_with("text/") {
        if let Ok(text) = std::str::from_utf8(&body) {
            return Ok(Some(VmBody::Text(text.to_string())));
        }
    }
    Ok(Some(VmBody::Bytes(body.to_vec())))
}

fn into_http(reply: VmResponse) -> Result<Response, Error> {
    let status = StatusCode::from_u16(reply.status)
        .map_err(|_| Error::HandlerError(format!("handler returned invalid status {}", reply.status)))?;

    let mut headers = HeaderMap::new();
    for (name, value) in &reply.headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => tracing::debug!(header = %name, "dropping invalid response header"),
        }
    }

    let (content_type, body) = match reply.body {
        Some(VmBody::Json(value)) => {
            let bytes = serde_json::to_vec(&value)
                .map_err(|e| Error::Internal(format!("encode handler body: {e}")))?;
            (Some("application/json"), Body::from(bytes))
        }
        Some(VmBody::Text(text)) => (Some("text/plain; charset=utf-8"), Body::from(text)),
        Some(VmBody::Bytes(bytes)) => (Some("application/octet-stream"), Body::from(bytes)),
        None => (None, Body::empty()),
    };
    if let Some(content_type) = content_type {
        if !headers.contains_key(CONTENT_TYPE) {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        }
    }

    Ok((status, headers, body).into_response())
}
