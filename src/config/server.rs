use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

pub const MIN_VM_TIMEOUT: Duration = Duration::from_millis(100);
pub const MAX_VM_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    /// Bearer token accepted by the admin surface. The admin routes reject
    /// every request when unset.
    pub admin_token: Option<String>,
    pub runtime: RuntimeOptions,
}

/// Knobs shared by the pool, the tenant store, and the resolver.
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    pub vm_capacity: usize,
    pub vm_timeout: Duration,
    pub db_query_timeout: Duration,
    pub db_read_pool_size: usize,
    pub resolver_cache_ttl: Duration,
    pub code_cache_ttl: Duration,
    pub body_limit_bytes: usize,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            vm_capacity: 10,
            vm_timeout: Duration::from_secs(5),
            db_query_timeout: Duration::from_secs(5),
            db_read_pool_size: 4,
            resolver_cache_ttl: Duration::from_secs(30),
            code_cache_ttl: Duration::from_secs(5),
            body_limit_bytes: 1024 * 1024,
        }
    }
}

impl RuntimeOptions {
    pub fn validate(&self) -> Result<()> {
        if self.vm_capacity == 0 {
            return Err(Error::Config("vm_capacity must be at least 1".into()));
        }
        if self.db_read_pool_size == 0 {
            return Err(Error::Config("db_read_pool_size must be at least 1".into()));
        }
        if self.db_query_timeout.is_zero() {
            return Err(Error::Config("db_query_timeout_ms must be positive".into()));
        }
        Ok(())
    }
}

/// Clamps a per-workspace handler deadline into the supported range.
#[must_use]
pub fn clamp_vm_timeout(timeout: Duration) -> Duration {
    timeout.clamp(MIN_VM_TIMEOUT, MAX_VM_TIMEOUT)
}

impl ServerConfig {
    pub fn socket_addr(&self) -> std::result::Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }

    /// Metadata database holding workspaces, deployed code, policies and
    /// app sessions.
    #[must_use]
    pub fn meta_db_path(&self) -> PathBuf {
        self.data_dir.join("runtime.db")
    }

    /// Root of the per-workspace database files.
    #[must_use]
    pub fn tenants_dir(&self) -> PathBuf {
        self.data_dir.join("tenants")
    }

    /// Loads a TOML config file and layers it over the defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let file: ConfigFile = toml::from_str(&text)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        let mut config = Self::default();
        file.apply(&mut config);
        config.runtime.validate()?;
        Ok(config)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            data_dir: PathBuf::from("./data"),
            admin_token: None,
            runtime: RuntimeOptions::default(),
        }
    }
}

/// On-disk shape of the config file. Every field is optional and falls back
/// to the default.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub data_dir: Option<PathBuf>,
    pub admin_token: Option<String>,
    pub vm_capacity: Option<usize>,
    pub vm_timeout_ms: Option<u64>,
    pub db_query_timeout_ms: Option<u64>,
    pub db_read_pool_size: Option<usize>,
    pub resolver_cache_ttl_secs: Option<u64>,
    pub code_cache_ttl_ms: Option<u64>,
    pub body_limit_bytes: Option<usize>,
}

impl ConfigFile {
    fn apply(self, config: &mut ServerConfig) {
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(dir) = self.data_dir {
            config.data_dir = dir;
        }
        if self.admin_token.is_some() {
            config.admin_token = self.admin_token;
        }

        let runtime = &mut config.runtime;
        if let Some(n) = self.vm_capacity {
            runtime.vm_capacity = n;
        }
        if let Some(ms) = self.vm_timeout_ms {
            runtime.vm_timeout = clamp_vm_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = self.db_query_timeout_ms {
            runtime.db_query_timeout = Duration::from_millis(ms);
        }
        if let Some(n) = self.db_read_pool_size {
            runtime.db_read_pool_size = n;
        }
        if let Some(secs) = self.resolver_cache_ttl_secs {
            runtime.resolver_cache_ttl = Duration::from_secs(secs);
        }
        if let Some(ms) = self.code_cache_ttl_ms {
            runtime.code_cache_ttl = Duration::from_millis(ms);
        }
        if let Some(n) = self.body_limit_bytes {
            runtime.body_limit_bytes = n;
        }
    }
}
