use anyhow::Result;
use std::sync::Arc;
use tokio::signal;

use lib_grow::connection::ConnectionManager;
use lib_grow::dispatcher::Dispatcher;
use lib_grow::fetch::ApiClient;
use lib_grow::{config, logger};

mod feeds;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = config::load_config();
    logger::setup_logging(&config.log_dir(), &config.log_level())?;

    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);

    // Composition root: one dispatcher, one connection manager, one API
    // client, shared with every consumer by injection.
    let dispatcher = Arc::new(Dispatcher::new());
    let (manager, handle) =
        ConnectionManager::new(config.connection_settings(), Arc::clone(&dispatcher));
    let api = Arc::new(ApiClient::new(&config.api_url(), config.api_token())?);

    let connection_handle = tokio::spawn(manager.run(shutdown_tx.subscribe()));

    let sensor_handle = tokio::spawn(feeds::run_sensor_feed(
        handle.clone(),
        Arc::clone(&api),
        shutdown_tx.subscribe(),
    ));
    let instrument_handle = tokio::spawn(feeds::run_instrument_panel(
        handle.clone(),
        Arc::clone(&api),
        shutdown_tx.subscribe(),
    ));
    let attendance_handle = tokio::spawn(feeds::run_attendance_feed(
        handle,
        api,
        config.attendance_limit(),
        config.attendance_page_size(),
        shutdown_tx.subscribe(),
    ));

    // Wait for shutdown signal
    tokio::select! {
        _ = signal::ctrl_c() => {
            log::info!("Ctrl-C received, initiating shutdown.");
        }
        _ = async {
            #[cfg(unix)]
            {
                let mut term_signal = signal::unix::signal(signal::unix::SignalKind::terminate())
                    .expect("failed to install SIGTERM handler");
                term_signal.recv().await;
                log::info!("SIGTERM received, initiating shutdown.");
            }
            #[cfg(not(unix))]
            {
                // On non-unix platforms, just wait forever.
                std::future::pending::<()>().await;
            }
        } => {}
    }

    // Send shutdown signal to all components
    let _ = shutdown_tx.send(());

    // Wait for components to shut down
    let _ = tokio::try_join!(
        connection_handle,
        sensor_handle,
        instrument_handle,
        attendance_handle
    );

    log::info!("Shutdown complete.");
    Ok(())
}
