use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use community_chat_rs::api::{self, AppState};
use community_chat_rs::config::Config;
use community_chat_rs::logger;
use community_chat_rs::services::activities::{
    ActivityFinder, CatalogActivityFinder, NoActivityFinder,
};
use community_chat_rs::services::chat_stream::{ChatStreamService, StreamPacing};
use community_chat_rs::services::dedup::DedupWindow;
use community_chat_rs::services::generator::{
    OpenAiGenerator, ResponseGenerator, RuleBasedGenerator,
};
use tokio::signal;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let cfg = match Config::init_global() {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("Failed to load config: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = logger::init_logger(cfg) {
        eprintln!("Failed to init logger: {err}");
        std::process::exit(1);
    }

    cfg.print();

    let dedup = Arc::new(DedupWindow::new(cfg.dedup_window(), cfg.dedup_max_entries));
    let sweeper = dedup.spawn_sweeper(cfg.dedup_sweep_interval());

    let chat = ChatStreamService::new(dedup, build_generator(cfg))
        .with_finder(build_finder(cfg))
        .with_pacing(StreamPacing {
            start_delay: Duration::from_millis(cfg.stream_start_delay_ms),
            token_delay: Duration::from_millis(cfg.stream_token_delay_ms),
        });
    let state = AppState::new(Arc::new(chat), cfg.stream_channel_capacity, cfg.keep_alive());

    let app = api::router(cfg, state);

    let host = cfg.host.parse().unwrap_or_else(|_| {
        warn!("invalid HOST {:?}, falling back to 0.0.0.0", cfg.host);
        std::net::IpAddr::from([0, 0, 0, 0])
    });
    let addr = SocketAddr::new(host, cfg.port);
    info!("Server running on http://{}", addr);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(err) => {
            error!("Failed to bind: {err}");
            std::process::exit(1);
        }
    };

    let server = axum::serve(listener, app);

    if let Err(err) = server.with_graceful_shutdown(shutdown_signal()).await {
        error!("Server error: {err}");
    }
    sweeper.abort();
}

fn build_generator(cfg: &Config) -> Arc<dyn ResponseGenerator> {
    if cfg.openai_api_key.is_empty() {
        info!("[GENERATOR] OPENAI_API_KEY not set, using rule-based replies");
        Arc::new(RuleBasedGenerator)
    } else {
        info!("[GENERATOR] using model {}", cfg.openai_model);
        Arc::new(OpenAiGenerator::new(
            cfg.openai_api_key.clone(),
            cfg.openai_base_url.clone(),
            cfg.openai_model.clone(),
        ))
    }
}

fn build_finder(cfg: &Config) -> Arc<dyn ActivityFinder> {
    let Some(path) = cfg.activity_catalog_path.as_deref() else {
        return Arc::new(NoActivityFinder);
    };
    match CatalogActivityFinder::load(Path::new(path)) {
        Ok(catalog) => {
            info!("[CATALOG] loaded {} activities from {}", catalog.len(), path);
            Arc::new(catalog)
        }
        Err(err) => {
            warn!("[CATALOG] failed to load {}: {}", path, err);
            Arc::new(NoActivityFinder)
        }
    }
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
    info!("Shutdown signal received");
}
