use std::net::SocketAddr;
use std::sync::Arc;

use dotenv::dotenv;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{self, TraceLayer};
use tracing::{error, info, warn, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod router;

use shared_config::AppConfig;
use slot_cell::{MaintenanceScheduler, SchedulingContext, SlotLifecycleService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Loading Env Vars
    dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting clinic booking API server");

    // Load configuration
    let config = Arc::new(AppConfig::from_env());
    let state = Arc::new(SchedulingContext::from_config(config.clone())?);
    info!(
        "Storage: {:?}, timezone {}, locations: {}",
        config.storage_backend,
        config.clinic_timezone,
        state.catalog.locations().collect::<Vec<_>>().join(", ")
    );

    // Fill the booking window before accepting requests
    let lifecycle = Arc::new(SlotLifecycleService::new(state.clone()));
    match lifecycle.ensure_rolling_window(config.booking_horizon_days).await {
        Ok(report) => info!(
            "Startup slot window: {} created, {} already present, {} failed",
            report.affected,
            report.skipped,
            report.failures.len()
        ),
        Err(e) => warn!("Startup slot generation failed, will retry on schedule: {}", e),
    }

    let scheduler = if config.enable_maintenance_scheduler {
        let scheduler = Arc::new(MaintenanceScheduler::new(
            lifecycle.clone(),
            state.clock,
            config.booking_horizon_days,
        ));
        let handle = scheduler.clone().start();
        Some((scheduler, handle))
    } else {
        info!("Maintenance scheduler disabled");
        None
    };

    // Set up CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Build the application router
    let app = router::create_router(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(trace::DefaultMakeSpan::new().level(Level::INFO))
                .on_response(trace::DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors);

    // Run the server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    info!("Listening on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some((scheduler, handle)) = scheduler {
        scheduler.shutdown().await;
        if let Err(e) = handle.await {
            error!("Maintenance scheduler task failed: {}", e);
        }
    }

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown signal received");
}
