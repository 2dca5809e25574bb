mod config;
mod prompt_loader;
mod socket;

use crate::config::{Config, Provider};
use crate::socket::{AppState, ws_handler};
use anyhow::{Context, Result};
use axum::{Router, routing::get};
use clap::Parser;
use lucidcare_core::gemini_generator::GeminiGenerator;
use lucidcare_core::generator::OpenAiGenerator;
use lucidcare_core::prompts::Prompts;
use lucidcare_core::{Generator, Registry, TurnPolicy};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use tracing_subscriber::fmt::time::ChronoLocal;

#[derive(Parser)]
#[command(version, about = "Guided, section-by-section walkthrough of a medical report")]
struct Cli {
    /// Address to listen on; overrides BIND_ADDRESS
    #[arg(long)]
    bind: Option<SocketAddr>,
    /// Directory of prompt overrides; overrides PROMPTS_DIR
    #[arg(long)]
    prompts_dir: Option<PathBuf>,
}

impl Cli {
    /// Command-line values take precedence over the environment.
    fn apply(self, config: &mut Config) {
        if let Some(bind) = self.bind {
            config.bind_address = bind;
        }
        if let Some(dir) = self.prompts_dir {
            config.prompts_dir = dir;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // --- 1. Parse Command-Line Arguments ---
    // Before the environment, so `--help` works without any keys set.
    let args = Cli::parse();

    // --- 2. Load Configuration ---
    let mut config = Config::from_env().context("Failed to load application configuration")?;
    args.apply(&mut config);

    // --- 3. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(ChronoLocal::rfc_3339())
        .init();

    info!(provider = ?config.provider, model = %config.chat_model, "Configuration loaded");

    // --- 4. Load Prompts ---
    let prompts = if config.prompts_dir.is_dir() {
        let overrides = prompt_loader::load_overrides(&config.prompts_dir)
            .context("Failed to load prompt overrides")?;
        info!(count = overrides.len(), dir = %config.prompts_dir.display(), "Loaded prompt overrides");
        Prompts::with_overrides(&overrides)
    } else {
        info!(dir = %config.prompts_dir.display(), "No prompts directory, using built-in prompts");
        Prompts::default()
    };

    // --- 5. Initialize the generation client ---
    let generator: Arc<dyn Generator> = match config.provider {
        Provider::Gemini => Arc::new(GeminiGenerator::new(
            config.api_key,
            config.chat_model,
            config.stream_responses,
        )),
        Provider::OpenAI => Arc::new(OpenAiGenerator::new(
            config.api_key,
            config.chat_model,
        )),
    };

    let policy = TurnPolicy {
        generation_timeout: config.generation_timeout,
        section_retries: config.section_retries,
    };
    let state = AppState {
        registry: Arc::new(Registry::new(Arc::new(prompts), policy)),
        generator,
    };

    // Any origin, so a separately hosted frontend can connect.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/ws", get(ws_handler))
        .route("/comfort-stream", get(ws_handler))
        .layer(cors)
        .with_state(state);

    // --- 6. Serve ---
    info!("Starting WebSocket server, listening on {}", config.bind_address);
    let listener = tokio::net::TcpListener::bind(config.bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_address))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
