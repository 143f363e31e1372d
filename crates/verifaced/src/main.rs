use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use verifaced::{Config, Engine, EngineConfig, LogNotifier};
use veriface_store::Store;

mod dbus_interface;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env();
    tracing::info!(
        db = %config.db_path.display(),
        model = %config.model_path.display(),
        dim = config.embedding_dim,
        strategy = %config.strategy,
        threshold = config.match_threshold,
        "verifaced starting"
    );

    // Fail fast: no store, no daemon.
    let store = Store::open(&config.db_path, config.embedding_dim)?;
    let engine = Arc::new(Engine::new(
        store,
        EngineConfig::from(&config),
        Box::new(LogNotifier),
    )?);

    let _conn = zbus::connection::Builder::system()?
        .name("org.veriface.Attendance1")?
        .serve_at(
            "/org/veriface/Attendance1",
            dbus_interface::AttendanceService::new(engine.clone()),
        )?
        .build()
        .await?;
    tracing::info!("verifaced ready on org.veriface.Attendance1");

    // Self-heal drift introduced by admin tools mutating the database
    // behind the daemon's back.
    let mut check = tokio::time::interval(Duration::from_secs(config.consistency_check_secs));
    check.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = check.tick() => {
                let engine = engine.clone();
                match tokio::task::spawn_blocking(move || engine.consistency_check()).await {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => tracing::error!(error = %e, "periodic consistency check failed"),
                    Err(e) => tracing::error!(error = %e, "consistency check task panicked"),
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    tracing::info!("verifaced shutting down");
    Ok(())
}
