use git_webhook_sync::api::build_router;
use git_webhook_sync::lifecycle::LeaderContext;
use git_webhook_sync::logging::setup_logging;
use git_webhook_sync::{AppState, DEFAULT_CONFIG_PATH, load_config};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    let config_path = PathBuf::from(
        std::env::var("WEBHOOK_SYNC_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string()),
    );

    let config = match load_config(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    // Keeps the non-blocking file writer alive
    let _log_guard = match setup_logging(&config.logging) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Logging setup failed: {}", e);
            std::process::exit(1);
        }
    };

    let bind_address =
        std::env::var("BIND_ADDRESS").unwrap_or_else(|_| config.server.listen_address.clone());

    // Single replica: this process is always the leader
    let state = match AppState::from_config(config, LeaderContext::always_active()) {
        Ok(state) => Arc::new(state),
        Err(e) => {
            error!("Failed to initialize: {}", e);
            std::process::exit(1);
        }
    };

    match state.seed_receivers().await {
        Ok(added) => info!("Seeded {} declared receivers", added),
        Err(e) => {
            error!("Failed to seed receivers: {}", e);
            std::process::exit(1);
        }
    }

    let reconcile_state = state.clone();
    tokio::spawn(async move {
        match reconcile_state
            .lifecycle
            .reconcile_all(&reconcile_state.leader)
            .await
        {
            Ok(results) => {
                let failed = results.iter().filter(|(_, r)| r.is_err()).count();
                if failed > 0 {
                    warn!(
                        "Startup reconcile: {} of {} receivers failed",
                        failed,
                        results.len()
                    );
                } else {
                    info!("Startup reconcile: {} receivers up to date", results.len());
                }
            }
            Err(e) => error!("Startup reconcile failed: {}", e),
        }
    });

    let app = build_router(state);

    info!("Listening on {}", bind_address);
    info!("Using config at {:?}", config_path);
    let listener = match tokio::net::TcpListener::bind(&bind_address).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {}: {}", bind_address, e);
            std::process::exit(1);
        }
    };
    if let Err(e) = axum::serve(listener, app).await {
        error!("Server error: {}", e);
    }
}
