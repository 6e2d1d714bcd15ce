//! # Personal Brain CLI (`brain`)
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `brain init` | Create the SQLite database and run schema migrations |
//! | `brain serve` | Start the HTTP API server |
//! | `brain list --user <id>` | List a user's memories |
//! | `brain get --user <id> <memory-id>` | Print one memory |
//! | `brain chunk <file>` | Preview how a text is chunked for indexing |
//! | `brain session <user-id>` | Mint a signed session cookie |
//!
//! ## Examples
//!
//! ```bash
//! brain init --config ./config/brain.toml
//! BRAIN_SESSION_SECRET=... brain session alice
//! brain serve --config ./config/brain.toml
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use secrecy::SecretString;
use std::path::PathBuf;

use personal_brain::auth::{issue_session_token, SIGNED_COOKIE_NAME};
use personal_brain::config::{self, Secrets};
use personal_brain::{chunk_cmd, db, logging, memories, migrate, server};

/// Personal Brain — durable notes with best-effort semantic indexing.
#[derive(Parser)]
#[command(name = "brain", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/brain.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Start the HTTP API server on `[server].bind`.
    Serve,

    /// List a user's memories, most recently updated first.
    List {
        /// Owner user id.
        #[arg(long)]
        user: String,

        #[arg(long, default_value_t = 20)]
        limit: usize,

        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Print one memory.
    Get {
        /// Owner user id.
        #[arg(long)]
        user: String,

        /// Memory id.
        id: String,

        #[arg(long)]
        json: bool,
    },

    /// Preview how a file (or `-` for stdin) is split into chunks.
    Chunk {
        path: PathBuf,

        #[arg(long)]
        json: bool,
    },

    /// Mint a signed session cookie for the `signed` auth provider.
    Session {
        /// User id to embed in the session.
        user: String,

        /// Lifetime in seconds (defaults to `[auth].session_ttl_secs`).
        #[arg(long)]
        ttl: Option<u64>,

        /// HMAC key; falls back to the environment.
        #[arg(long, env = "BRAIN_SESSION_SECRET", hide_env_values = true)]
        secret: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    logging::init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg.db).await?;
            migrate::run_migrations(&pool).await?;
            pool.close().await;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::List { user, limit, json } => {
            memories::run_list(&cfg, &user, limit, json).await?;
        }
        Commands::Get { user, id, json } => {
            memories::run_get(&cfg, &user, &id, json).await?;
        }
        Commands::Chunk { path, json } => {
            chunk_cmd::run_chunk(&cfg.chunking, &path, json)?;
        }
        Commands::Session { user, ttl, secret } => {
            let secret = secret
                .map(SecretString::from)
                .or_else(|| Secrets::from_env().session_secret)
                .context("BRAIN_SESSION_SECRET is not set")?;
            let ttl = ttl.unwrap_or(cfg.auth.session_ttl_secs);
            let ttl = i64::try_from(ttl).context("--ttl is too large")?;
            let expires = chrono::Utc::now()
                .timestamp()
                .checked_add(ttl)
                .context("--ttl is too large")?;
            let token = issue_session_token(&secret, &user, expires)?;
            let name = cfg
                .auth
                .cookie_name
                .as_deref()
                .unwrap_or(SIGNED_COOKIE_NAME);
            println!("{}={}", name, token);
        }
    }

    Ok(())
}
