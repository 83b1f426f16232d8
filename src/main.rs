use std::sync::Arc;

use coordination_engine::config::Settings;
use coordination_engine::idempotency::IdempotencyCoordinator;
use coordination_engine::observability::{
    init_logging, init_metrics, HealthChecker, LogConfig, LogFormat,
};
use coordination_engine::ratelimit::RateLimiter;
use coordination_engine::store;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Load configuration
    let settings = Settings::new()?;

    // Initialize logging and metrics
    init_logging(&LogConfig {
        level: settings.application.log_level.clone(),
        format: LogFormat::from(settings.application.log_format.as_str()),
        ..LogConfig::default()
    });
    let _metrics_handle = init_metrics();
    info!("Configuration loaded");

    // Connect to the key-value store; fall back to the unavailable variant
    // when it cannot be reached so the process still starts.
    info!("Connecting to key-value store at {}...", settings.store.url);
    let store = store::connect(&settings.store).await;

    let health = HealthChecker::new(Arc::clone(&store));
    let report = health.check_all().await;
    info!(status = ?report.status, "Startup health check complete");

    let coordinator = IdempotencyCoordinator::new(Arc::clone(&store), settings.idempotency.clone());
    let limiter = RateLimiter::new(Arc::clone(&store), settings.rate_limit.clone());

    // Exercise both primitives once so a broken deployment fails loudly here
    // instead of on the first real request.
    let allowed = limiter.is_allowed_with_defaults("startup:probe").await;
    info!(allowed = allowed, "Rate limiter probe complete");

    match coordinator
        .execute("startup-probe", || async { Ok("ok".to_string()) })
        .await
    {
        Ok(_) => info!("Idempotency coordinator probe complete"),
        Err(e) if e.is_store_unavailable() => {
            info!("Idempotency coordinator degraded (store offline): {}", e)
        }
        Err(e) => return Err(e.into()),
    }

    info!("System startup verification complete.");

    Ok(())
}
