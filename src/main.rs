use githook::config::DEFAULT_CONFIG_PATH;
use githook::logging::setup_logging;
use githook::{AppState, HookConfig, build_router, load_config};
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    let config_path =
        std::env::var("GITHOOK_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

    let config: HookConfig = match load_config(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    // Held until exit so buffered file logs are flushed
    let _log_guard = match setup_logging(&config.logging) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Logging error: {}", e);
            std::process::exit(1);
        }
    };

    let bind_address = config.server.bind_address.clone();
    info!("Using config at {:?}", config_path);
    info!("Serving scripts from {}", config.script.path.display());
    if !config.security.require_signature {
        info!("Unsigned deliveries are accepted; set security.require_signature to reject them");
    }
    if !config.script.path.is_dir() {
        error!(
            "Script root {} is not a directory; every delivery will be skipped",
            config.script.path.display()
        );
    }

    let state = Arc::new(AppState::new(config));
    let app = build_router(Arc::clone(&state));

    let listener = match tokio::net::TcpListener::bind(&bind_address).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {}: {}", bind_address, e);
            std::process::exit(1);
        }
    };
    info!("Listening on {}", bind_address);

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("Server error: {}", e);
    }

    state.dispatcher.shutdown().await;
    info!("Shut down");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
