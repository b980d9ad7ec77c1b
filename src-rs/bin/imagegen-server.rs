use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use imagegen_relay::api::{AppState, PredictionServer};
use imagegen_relay::helpers::build_provider;
use imagegen_relay::{
    spawn_expiry_sweep, BackendConnector, CleanupScheduler, Orchestrator, OrchestratorConfig, ServerConfig, TaskStore,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = ServerConfig::from_env();

    let env_filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => match cfg.log_level.parse::<tracing_subscriber::EnvFilter>() {
            Ok(filter) => filter,
            Err(err) => {
                eprintln!(
                    "WARN: IMAGEGEN_LOG='{}' is not a valid tracing filter ({}); falling back to 'info'",
                    cfg.log_level, err
                );
                tracing_subscriber::EnvFilter::new("info")
            }
        },
    };
    let subscriber = tracing_subscriber::fmt().with_env_filter(env_filter).with_target(true);
    if cfg.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    info!(version = env!("CARGO_PKG_VERSION"), "imagegen-server starting");

    let addr: SocketAddr = cfg
        .bind_address
        .parse()
        .with_context(|| format!("invalid bind address '{}'", cfg.bind_address))?;

    let connector = BackendConnector::from_url(&cfg.store_url);
    info!(store = %imagegen_relay::task::Connector::describe(&connector), "task store configured");
    let store = Arc::new(TaskStore::new(Arc::new(connector)));

    let provider = build_provider(&cfg).context("failed to build upstream client")?;
    if provider.is_none() {
        warn!("OPENAI_API_KEY is not set; prediction requests will be refused");
    }

    let orchestrator = Orchestrator::new(
        store.clone(),
        provider,
        OrchestratorConfig {
            model: Some(cfg.model.clone()),
            default_prompt: cfg.default_prompt.clone(),
            generation_timeout: cfg.generation_timeout,
        },
    );
    let cleanup = Arc::new(CleanupScheduler::new(store.clone(), cfg.cleanup_delay));
    let sweeper = spawn_expiry_sweep(store, cfg.sweep_interval, cfg.retention);

    let state = AppState {
        config: Arc::new(cfg),
        orchestrator,
        cleanup,
    };
    let result = PredictionServer::new(addr, state).start().await;
    sweeper.abort();
    result
}
