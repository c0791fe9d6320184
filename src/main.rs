use ha_node_manager::config::Settings;
use ha_node_manager::control::ControlHandle;
use ha_node_manager::registry::NodeRegistry;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Entry point of the HA manager process. In the system this is modeled
/// on, this binary is forked by the monitoring server's parent process;
/// here it runs standalone and treats SIGINT/SIGTERM as the parent's
/// `PAUSE` + `STOP` sequence (spec §5 "Process model").
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let settings = Settings::new()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(settings.logging.level.clone()))
        .init();

    info!(
        standalone = settings.is_standalone(),
        node_name = settings.ha.node_name.as_str(),
        "starting HA node manager"
    );

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&settings.database.url)
        .await?;

    let registry = NodeRegistry::new(pool);
    let (handle, service) = ControlHandle::new_pair(16);

    let loop_settings = settings.clone();
    let worker = tokio::spawn(async move {
        ha_node_manager::control::run(registry, loop_settings, service, None).await;
    });

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, pausing HA manager");

    if handle.pause().await.is_ok() && handle.stop().await.is_ok() {
        if let Err(e) = worker.await {
            error!(error = %e, "HA worker task panicked");
        }
    } else {
        error!("cannot send message to HA manager service");
        worker.abort();
    }

    Ok(())
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
