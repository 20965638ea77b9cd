use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use tenant_runtime::config::ServerConfig;
use tenant_runtime::server::{AppState, create_router};

const ADMIN_TOKEN_FILE: &str = ".admin_token";

#[cfg(unix)]
fn set_restrictive_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(0o600)) {
        tracing::warn!("Failed to set permissions on {}: {e}", path.display());
    }
}

#[derive(Parser)]
#[command(name = "tenant-runtime")]
#[command(about = "Multi-tenant workspace runtime", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the data directory and an operator token
    Init {
        /// Data directory for the metadata and workspace databases
        #[arg(long, default_value = "./data")]
        data_dir: PathBuf,
    },

    /// Start the server
    Serve {
        /// TOML config file; flags below take precedence over it
        #[arg(long)]
        config: Option<PathBuf>,

        /// Host to bind to
        #[arg(long)]
        host: Option<String>,

        /// Port to bind to
        #[arg(long, short)]
        port: Option<u16>,

        /// Data directory for the metadata and workspace databases
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Operator token for /admin. Defaults to the token written by `init`.
        #[arg(long)]
        admin_token: Option<String>,
    },
}

fn run_init(data_dir: &Path) -> anyhow::Result<()> {
    fs::create_dir_all(data_dir)?;
    let token_file = data_dir.join(ADMIN_TOKEN_FILE);
    if token_file.exists() {
        bail!(
            "Already initialized. Admin token exists at: {}",
            token_file.display()
        );
    }

    let config = ServerConfig {
        data_dir: data_dir.to_path_buf(),
        ..ServerConfig::default()
    };
    AppState::open(&config)?;

    let raw_token = format!("adm_{}", Uuid::new_v4().simple());
    fs::write(&token_file, &raw_token)?;

    #[cfg(unix)]
    set_restrictive_permissions(&token_file);

    println!();
    println!("========================================");
    println!("Admin token (save this, it won't be shown again):");
    println!();
    println!("  {raw_token}");
    println!();
    println!("Token also written to: {}", token_file.display());
    println!("========================================");
    println!();
    Ok(())
}

fn read_admin_token(data_dir: &Path) -> anyhow::Result<Option<String>> {
    let token_file = data_dir.join(ADMIN_TOKEN_FILE);
    if !token_file.exists() {
        return Ok(None);
    }
    let token = fs::read_to_string(&token_file)
        .with_context(|| format!("reading {}", token_file.display()))?;
    Ok(Some(token.trim().to_string()).filter(|t| !t.is_empty()))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("tenant_runtime=info".parse()?))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { data_dir } => run_init(&data_dir)?,
        Commands::Serve {
            config,
            host,
            port,
            data_dir,
            admin_token,
        } => {
            let mut config = match config {
                Some(path) => ServerConfig::from_file(&path)?,
                None => ServerConfig::default(),
            };
            if let Some(host) = host {
                config.host = host;
            }
            if let Some(port) = port {
                config.port = port;
            }
            if let Some(dir) = data_dir {
                config.data_dir = dir;
            }
            if let Some(token) = admin_token {
                config.admin_token = Some(token);
            }
            if config.admin_token.is_none() {
                config.admin_token = read_admin_token(&config.data_dir)?;
            }
            if config.admin_token.is_none() {
                tracing::warn!("No admin token configured; /admin is disabled. Run 'tenant-runtime init' to create one.");
            }

            let state = Arc::new(AppState::open(&config)?);
            let app = create_router(state.clone());
            let addr = config.socket_addr()?;

            info!("Starting server on {}", addr);

            let listener = tokio::net::TcpListener::bind(addr).await?;
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await?;

            state.pool.close();
            info!("Server stopped");
        }
    }

    Ok(())
}
