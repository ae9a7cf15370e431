use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use campfire_server::auth::token::create_session_token;
use campfire_server::config::ServerConfig;
use campfire_server::db::pool::{create_pool, run_migrations};
use campfire_server::db::queries::users::{UpsertUser, upsert_user};
use campfire_server::engine::chat_engine::ChatEngine;
use campfire_server::web::app_state::AppState;
use campfire_server::web::router::build_router;

#[derive(Parser)]
#[command(name = "campfire-server", version, about = "Real-time multi-channel chat server")]
struct Cli {
    /// Path to TOML config file
    #[arg(long, default_value = "campfire.toml")]
    config: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the chat server (default)
    Serve,
    /// Register a user locally and print a signed session token for it
    IssueToken {
        user_id: String,
        /// Display name; defaults to the user ID
        #[arg(long)]
        username: Option<String>,
        #[arg(long, default_value = "#6b7280")]
        avatar_color: String,
        #[arg(long, default_value = "member")]
        role: String,
        /// Trust domain to embed in the token
        #[arg(long)]
        domain: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ServerConfig::load(&cli.config)?;

    let pool = create_pool(&config.database.url)
        .await
        .context("failed to connect to database")?;
    run_migrations(&pool)
        .await
        .context("failed to run database migrations")?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config, pool).await,
        Command::IssueToken {
            user_id,
            username,
            avatar_color,
            role,
            domain,
        } => {
            upsert_user(
                &pool,
                &UpsertUser {
                    user_id: &user_id,
                    username: username.as_deref().unwrap_or(&user_id),
                    avatar_color: &avatar_color,
                    role: &role,
                },
            )
            .await
            .context("failed to register user")?;

            let token = create_session_token(&user_id, domain.as_deref(), &config.to_auth_config())
                .context("failed to sign token")?;
            println!("{token}");
            Ok(())
        }
    }
}

async fn serve(config: ServerConfig, pool: sqlx::SqlitePool) -> anyhow::Result<()> {
    let auth_config = config.to_auth_config();

    // Create the shared chat engine with database
    let engine = Arc::new(ChatEngine::new(
        pool,
        auth_config.clone(),
        config.to_chat_settings(),
    ));

    // Load persisted channels into memory
    engine
        .load_channels_from_db()
        .await
        .context("failed to load channels from database")?;

    let app_state = Arc::new(AppState {
        engine,
        auth_config,
        public_url: config.server.public_url.clone(),
        outbound_queue: config.chat.outbound_queue,
    });

    let app = build_router(app_state);

    let web_addr = &config.server.web_address;
    let listener = tokio::net::TcpListener::bind(web_addr)
        .await
        .with_context(|| format!("failed to bind web listener on {web_addr}"))?;

    info!("Campfire server starting on {}", web_addr);

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for shutdown signal");
                return;
            }
            info!("shutdown requested");
            shutdown.cancel();
        }
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .context("server error")?;

    info!("Campfire server stopped");
    Ok(())
}
