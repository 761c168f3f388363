use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use vx_domain::config::{Config, ConfigSeverity};
use vx_gateway::cli::{self, Cli, Command, ConfigCommand};
use vx_gateway::http;
use vx_gateway::media::NullMediaFactory;
use vx_gateway::state::AppState;
use vx_playbook::{Playbook, ToolRegistry};
use vx_providers::openai::{OpenAiLlm, OpenAiStt, OpenAiTts};
use vx_sessions::{spawn_sweeper, SessionManager};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None | Some(Command::Serve) => {
            init_tracing();
            let config = cli::load_config(&cli.config)?;
            run_server(Arc::new(config)).await
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let config = cli::load_config(&cli.config)?;
            if !cli::validate(&config) {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let config = cli::load_config(&cli.config)?;
            cli::show(&config);
            Ok(())
        }
        Some(Command::Version) => {
            println!("voxgate {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,vx_gateway=debug")),
        )
        .json()
        .init();
}

async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("voxgate starting");

    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── Providers (one HTTP client per process) ──────────────────────
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(120))
        .build()?;
    let stt = Arc::new(OpenAiStt::new(&config.providers.stt, client.clone()));
    let llm = Arc::new(OpenAiLlm::new(&config.providers.llm, client.clone()));
    let tts = Arc::new(OpenAiTts::new(&config.providers.tts, client));

    // ── Playbook & tools ─────────────────────────────────────────────
    let playbook = match &config.playbook_path {
        Some(path) => {
            let playbook = Playbook::from_toml_file(path)
                .map_err(|e| anyhow::anyhow!("playbook {}: {e}", path.display()))?;
            tracing::info!(
                path = %path.display(),
                stages = playbook.stages.len(),
                transitions = playbook.transitions.len(),
                "playbook loaded"
            );
            Some(Arc::new(playbook))
        }
        None => None,
    };
    let tools = Arc::new(ToolRegistry::new());

    // ── Sessions ─────────────────────────────────────────────────────
    let sessions = Arc::new(SessionManager::new());
    let _sweeper = spawn_sweeper(
        sessions.clone(),
        Duration::from_secs(config.session.idle_ttl_secs),
        Duration::from_secs(config.session.sweep_interval_secs),
    );

    let state = AppState {
        config: config.clone(),
        stt,
        llm,
        tts,
        sessions,
        tools,
        playbook,
        media: Arc::new(NullMediaFactory),
    };

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(addr = %config.server.bind, "voxgate listening");
    axum::serve(listener, http::router(state)).await?;
    Ok(())
}
