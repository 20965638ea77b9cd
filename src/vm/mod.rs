//! Per-workspace JavaScript execution.
//!
//! Each workspace gets one long-lived `deno_core` isolate running on its own
//! OS thread. The [`VmPool`] caches those isolates by workspace, keyed on the
//! hash of the deployed source, and serializes calls into each of them.

mod bridge;
mod loader;
mod pool;
mod routes;
mod sandbox;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

pub use loader::{CodeLoader, LoadedCode, content_hash};
pub use pool::{VmPool, VmState, VmStatus};
pub use routes::{RouteMatch, RouteTable};

/// Request or response body crossing into the sandbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VmBody {
    Json(Value),
    Text(String),
    Bytes(Vec<u8>),
}

/// An HTTP request as seen by a workspace route handler.
#[derive(Debug, Clone, Default, Serialize)]
pub struct VmRequest {
    pub method: String,
    /// Path below `/api`, always starting with `/`.
    pub path: String,
    pub query: serde_json::Map<String, Value>,
    pub headers: BTreeMap<String, String>,
    pub body: Option<VmBody>,
}

impl VmRequest {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            method: method.into().to_ascii_uppercase(),
            path: if path.starts_with('/') { path } else { format!("/{path}") },
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_json(mut self, body: Value) -> Self {
        self.body = Some(VmBody::Json(body));
        self
    }
}

/// Envelope sent to the bootstrap dispatcher.
#[derive(Debug, Serialize)]
pub(crate) struct DispatchPayload<'a> {
    pub route: &'a str,
    pub params: &'a BTreeMap<String, String>,
    #[serde(flatten)]
    pub request: &'a VmRequest,
}

/// A handler's return value after coercion.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct VmResponse {
    pub status: u16,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<VmBody>,
}

#[derive(Deserialize)]
struct Reply {
    ok: bool,
    #[serde(default)]
    value: Option<VmResponse>,
    #[serde(default)]
    error: Option<String>,
}

impl VmResponse {
    /// Decodes the reply the bootstrap dispatcher posts back.
    pub(crate) fn from_reply(reply: Value) -> Result<Self> {
        let reply: Reply = serde_json::from_value(reply)
            .map_err(|e| Error::HandlerError(format!("malformed handler reply: {e}")))?;

        if !reply.ok {
            return Err(Error::HandlerError(
                reply.error.unwrap_or_else(|| "handler failed".to_string()),
            ));
        }
        let response = reply
            .value
            .ok_or_else(|| Error::HandlerError("handler reply has no value".to_string()))?;
        if !(100..=599).contains(&response.status) {
            return Err(Error::HandlerError(format!(
                "handler returned invalid status {}",
                response.status
            )));
        }
        Ok(response)
    }

    /// The JSON body, if the handler returned one.
    #[must_use]
    pub fn json(&self) -> Option<&Value> {
        match &self.body {
            Some(VmBody::Json(v)) => Some(v),
            _ => None,
        }
    }
}
