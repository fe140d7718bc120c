use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use sha2::{Digest, Sha256};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use gl_contextpack::ContextBudgeter;
use gl_domain::config::{Config, ConfigSeverity};
use gl_gateway::api;
use gl_gateway::cli::{load_config, Cli, Command};
use gl_gateway::runtime::cancel::CancelMap;
use gl_gateway::runtime::session_lock::SessionLockMap;
use gl_gateway::state::AppState;
use gl_gateway::telemetry::TelemetryStore;
use gl_providers::auth::StaticKeyProvider;
use gl_providers::responses::ResponsesGateway;
use gl_providers::retry::RetryPolicy;
use gl_retrieval::academic::AcademicSearch;
use gl_retrieval::search::IndexSearchGateway;
use gl_retrieval::web::KeywordWebGateway;
use gl_sessions::SessionStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        // Default to serve when no subcommand is given.
        None | Some(Command::Serve) => {
            init_tracing();
            let config = load_config(&cli.config, cli.port)?;
            run_server(Arc::new(config)).await
        }
        Some(Command::Version) => {
            println!("groundline {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Initialize structured JSON tracing (only for the `serve` command).
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,gl_gateway=debug")),
        )
        .json()
        .init();
}

/// Start the gateway server with the given configuration.
async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("Groundline starting");

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

    let state = build_state(Arc::clone(&config)).context("building application state")?;
    let sessions = Arc::clone(&state.sessions);

    // ── Router ───────────────────────────────────────────────────────
    let mut app = api::router(state)
        .layer(TraceLayer::new_for_http());
    if !config.server.cors_origins.is_empty() {
        let origins: Vec<axum::http::HeaderValue> = config
            .server
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        app = app.layer(CorsLayer::new().allow_origin(origins));
    }

    // ── Serve with graceful shutdown ─────────────────────────────────
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(addr = %addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await?;

    // Final flush so the last turns survive the restart.
    if let Err(e) = sessions.flush() {
        tracing::warn!(error = %e, "final session flush failed");
    }
    Ok(())
}

/// Wire the outbound gateways and shared services into [`AppState`].
fn build_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    let timeout = Duration::from_millis(config.tuning.request_timeout_ms);
    let retry = RetryPolicy::default().with_timeout(timeout);

    // LLM access is mandatory.
    let llm_headers = Arc::new(
        StaticKeyProvider::from_auth_config(&config.llm.auth)
            .context("resolving LLM credentials")?,
    );
    let llm = Arc::new(ResponsesGateway::new(
        config.llm.clone(),
        llm_headers,
        retry.clone(),
        timeout,
    )?);

    // Index search: placeholder credentials keep startup alive when the
    // index is unconfigured; calls will fail and the dispatcher's
    // ladder handles it.
    let search_headers: Arc<dyn gl_providers::auth::HeaderProvider> =
        match StaticKeyProvider::from_auth_config(&config.search.auth) {
            Ok(p) => Arc::new(p),
            Err(e) => {
                tracing::warn!(error = %e, "search credentials unresolved");
                Arc::new(StaticKeyProvider::fixed("api-key", ""))
            }
        };
    let search = Arc::new(IndexSearchGateway::new(
        config.search.clone(),
        &config.tuning,
        search_headers,
        retry.clone(),
    )?);

    // Web search is optional: without a key the gateway reports
    // missing_config instead of failing turns.
    let web_headers = match StaticKeyProvider::from_auth_config(&config.web.auth) {
        Ok(p) => Some(Arc::new(p) as Arc<dyn gl_providers::auth::HeaderProvider>),
        Err(e) => {
            tracing::warn!(error = %e, "web search disabled (no credentials)");
            None
        }
    };
    let web = Arc::new(KeywordWebGateway::new(
        config.web.clone(),
        web_headers,
        retry,
        timeout,
    )?);

    let academic = Arc::new(AcademicSearch::new(config.web.academic.clone(), timeout)?);
    let budgeter = Arc::new(ContextBudgeter::new(
        config.context.clone(),
        &config.tuning,
    ));
    let sessions = Arc::new(SessionStore::new(&config.server.state_path)?);
    let telemetry = Arc::new(TelemetryStore::new(config.telemetry.ring_size));

    let admin_token_hash = std::env::var(&config.server.admin_token_env)
        .ok()
        .filter(|t| !t.is_empty())
        .map(|t| Sha256::digest(t.as_bytes()).to_vec());

    Ok(AppState {
        config,
        llm,
        search,
        web,
        academic,
        budgeter,
        sessions,
        telemetry,
        session_locks: Arc::new(SessionLockMap::new()),
        cancel_map: Arc::new(CancelMap::new()),
        admin_token_hash,
    })
}
