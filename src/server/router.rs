use std::sync::Arc;
use std::time::Instant;

use axum::extract::{DefaultBodyLimit, Request};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::{Router, routing::get};

use super::admin::admin_router;
use super::runtime::runtime_router;
use crate::auth::digest_token;
use crate::config::{RuntimeOptions, ServerConfig};
use crate::error::Result;
use crate::runtime::{AuditSink, RlsEngine, RuntimeResolver, TracingAuditSink};
use crate::store::{MetaStore, TenantStore};
use crate::vm::{CodeLoader, VmPool};

pub struct AppState {
    pub meta: Arc<MetaStore>,
    pub tenants: Arc<TenantStore>,
    pub resolver: RuntimeResolver,
    pub rls: RlsEngine,
    pub pool: VmPool,
    pub audit: Arc<dyn AuditSink>,
    /// SHA-256 of the operator token. `None` disables the admin surface.
    pub admin_token_hash: Option<String>,
    pub options: RuntimeOptions,
}

impl AppState {
    /// Opens the metadata database under `data_dir` and wires the runtime
    /// services on top of it.
    pub fn open(config: &ServerConfig) -> Result<Self> {
        config.runtime.validate()?;
        std::fs::create_dir_all(&config.data_dir)?;
        std::fs::create_dir_all(config.tenants_dir())?;

        let meta = Arc::new(MetaStore::new(config.meta_db_path())?);
        meta.initialize()?;
        let tenants = Arc::new(TenantStore::new(config.tenants_dir(), &config.runtime));

        let loader = Arc::new(CodeLoader::new(meta.clone(), config.runtime.code_cache_ttl));
        let pool = VmPool::new(loader, tenants.clone(), &config.runtime);
        let resolver = RuntimeResolver::new(meta.clone(), config.runtime.resolver_cache_ttl);
        let rls = RlsEngine::new(meta.clone(), meta.clone());

        Ok(Self {
            meta,
            tenants,
            resolver,
            rls,
            pool,
            audit: Arc::new(TracingAuditSink),
            admin_token_hash: config.admin_token.as_deref().map(digest_token),
            options: config.runtime.clone(),
        })
    }

    #[must_use]
    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }
}

async fn health() -> &'static str {
    "OK"
}

async fn log_request(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let response = next.run(request).await;

    let latency = start.elapsed();
    let status = response.status();

    tracing::info!(
        "{} {} {} {}ms",
        method,
        uri.path(),
        status.as_u16(),
        latency.as_millis()
    );

    response
}

pub fn create_router(state: Arc<AppState>) -> Router {
    let body_limit = state.options.body_limit_bytes;
    Router::new()
        .route("/health", get(health))
        .nest("/admin", admin_router())
        .merge(runtime_router())
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::from_fn(log_request))
        .with_state(state)
}
