//! # Tenant Runtime
//!
//! A multi-tenant workspace runtime, usable both as a standalone binary and
//! as a library mounted into a larger service.
//!
//! Each workspace gets its own SQLite database, a long-lived JavaScript
//! sandbox serving the routes its code exports, and row-level security over
//! the generic tabular API.
//!
//! ## Library Usage
//!
//! ```toml
//! [dependencies]
//! tenant-runtime = { version = "0.0.1", default-features = false }
//! ```
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tenant_runtime::config::ServerConfig;
//! use tenant_runtime::server::{AppState, create_router};
//!
//! let config = ServerConfig::default();
//! let state = Arc::new(AppState::open(&config).unwrap());
//! let router = create_router(state);
//! // Serve with axum...
//! ```
//!
//! ## Feature Flags
//!
//! - `cli` (default): Builds the `tenant-runtime` binary. Disable with
//!   `default-features = false`.

pub mod auth;
pub mod config;
pub mod error;
pub mod runtime;
pub mod server;
pub mod store;
pub mod types;
pub mod validation;
pub mod vm;
