use anyhow::Result;
use lib_frames::loggers::{setup_tracing, LoggingOptions};
use tokio::signal;

mod tail_logic;
use tail_logic::{config, downstream, state};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Explicitly install the default crypto provider for rustls
    let _ = rustls::crypto::ring::default_provider().install_default();

    let config = config::load_config()?;
    let logging = LoggingOptions {
        level: config.log_level.clone().unwrap_or_else(|| "info".to_string()),
        log_dir: config.log_dir.clone(),
        ..Default::default()
    };
    let _guard = setup_tracing(&logging)?;

    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
    let app_state = state::AppState::new(config.streams_config()?, config.default_size());

    let mut downstream_handle = tokio::spawn(downstream::run(config.port(), app_state.clone(), shutdown_tx.subscribe()));

    // Wait for shutdown signal
    tokio::select! {
        _ = signal::ctrl_c() => {
            tracing::info!("Ctrl-C received, initiating shutdown.");
        }
        _ = terminate() => {
            tracing::info!("SIGTERM received, initiating shutdown.");
        }
        // Bind failures and server errors end the process.
        result = &mut downstream_handle => {
            app_state.streams.close_all();
            return result?;
        }
    }

    // Send shutdown signal to all components
    let _ = shutdown_tx.send(());
    app_state.streams.close_all();

    // Wait for the server to drain
    if let Err(e) = downstream_handle.await? {
        tracing::error!("Downstream server failed during shutdown: {}", e);
    }

    tracing::info!("Shutdown complete.");
    Ok(())
}

async fn terminate() {
    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term_signal) => {
                term_signal.recv().await;
            }
            Err(e) => {
                tracing::warn!("Cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        // On non-unix platforms, just wait forever.
        std::future::pending::<()>().await;
    }
}
