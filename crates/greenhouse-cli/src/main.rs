mod logging;

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use greenhouse_advisor::OpenAiProvider;
use greenhouse_config::{AppConfig, ConfigLoader};
use greenhouse_db::{ControlStore, ReadingStore, UserSource, UserStore};
use greenhouse_gateway::{AppState, GatewayServer, TokenIssuer, hash_password};
use tracing::{info, warn};

use crate::logging::LogFormat;

#[derive(Parser)]
#[command(name = "greenhouse", version, about = "Greenhouse telemetry and plant-care advice server")]
struct Cli {
    /// Path to a YAML config file (defaults to ./greenhouse.yaml when present).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[arg(long, value_enum, default_value = "pretty", global = true, env = "GREENHOUSE_LOG_FORMAT")]
    log_format: LogFormat,

    /// Default log level when RUST_LOG is unset.
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP gateway (default).
    Serve {
        /// Override the configured listen port.
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Print the effective configuration with secrets masked.
    Config,
    /// Manage operator accounts.
    User {
        #[command(subcommand)]
        action: UserAction,
    },
}

#[derive(Subcommand)]
enum UserAction {
    /// Create a user or reset its password, then print an access token.
    Add {
        username: String,
        /// Read from stdin when omitted.
        #[arg(long, env = "GREENHOUSE_USER_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_format, &cli.log_level);

    let mut config = ConfigLoader::new(cli.config.clone())
        .load()
        .context("failed to load configuration")?;

    match cli.command.unwrap_or(Command::Serve { port: None }) {
        Command::Serve { port } => {
            if let Some(port) = port {
                config.gateway.port = port;
            }
            serve(config).await
        }
        Command::Config => {
            println!("{config:#?}");
            Ok(())
        }
        Command::User {
            action: UserAction::Add { username, password },
        } => add_user(config, &username, password).await,
    }
}

async fn add_user(config: AppConfig, username: &str, password: Option<String>) -> Result<()> {
    let username = username.trim();
    if username.is_empty() {
        bail!("username must not be empty");
    }
    let password = match password {
        Some(password) => password,
        None => read_password_line(std::io::stdin().lock())?,
    };
    let password = password.trim().to_string();
    if password.is_empty() {
        bail!("password must not be empty");
    }
    if config.auth.jwt_secret.is_none() {
        warn!("JWT_SECRET is not set; the printed token will not be accepted by a running server");
    }

    let db_path = &config.database.path;
    let users = UserStore::open(db_path)
        .with_context(|| format!("failed to open user store at {}", db_path.display()))?;
    let hash = hash_password(password, config.auth.bcrypt_cost).await?;
    let user = users.upsert_user(username, &hash).await?;
    let token = TokenIssuer::from_config(&config.auth)?.issue(&user)?;

    println!("user {} saved (id {})", user.username, user.id);
    println!("{token}");
    Ok(())
}

fn read_password_line(mut input: impl BufRead) -> Result<String> {
    eprint!("password: ");
    let mut line = String::new();
    input
        .read_line(&mut line)
        .context("failed to read password from stdin")?;
    Ok(line)
}

async fn serve(config: AppConfig) -> Result<()> {
    let db_path = config.database.path.clone();
    let readings = Arc::new(
        ReadingStore::open(&db_path)
            .with_context(|| format!("failed to open reading store at {}", db_path.display()))?,
    );
    let controls = Arc::new(
        ControlStore::open(&db_path)
            .with_context(|| format!("failed to open control store at {}", db_path.display()))?,
    );
    let users = Arc::new(
        UserStore::open(&db_path)
            .with_context(|| format!("failed to open user store at {}", db_path.display()))?,
    );

    let api_key = match config.llm.api_key.clone() {
        Some(key) => key,
        None => {
            warn!("OPENAI_API_KEY is not set; plant advice requests will be rejected upstream");
            String::new()
        }
    };
    let provider = Arc::new(OpenAiProvider::new(api_key, config.llm.base_url.clone()));
    info!(model = %config.llm.model, "advice provider configured");

    let state = AppState::new(config, readings, controls, users, provider)
        .context("failed to build gateway state")?
        .shared();
    GatewayServer::new(state)
        .run(shutdown_signal())
        .await
        .context("gateway server failed")?;
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(e) => warn!("failed to listen for ctrl-c: {e}"),
    }
}
