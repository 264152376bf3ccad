use std::sync::Arc;

use analysis_jobs::api::{self, AppState};
use analysis_jobs::config::ServiceConfig;
use analysis_jobs::flow::{FlowRunner, HttpFlowRunner};
use analysis_jobs::handlers::HandlerRegistry;
use analysis_jobs::scheduler::{self, facade};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = ServiceConfig::from_env();
    let registry = Arc::new(HandlerRegistry::new());
    let flow: Arc<dyn FlowRunner> = Arc::new(HttpFlowRunner::new(config.dispatcher_url.clone()));

    eprintln!("⚙️  Analysis Jobs v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   API: http://0.0.0.0:{}/api/v1", config.port);
    eprintln!("   Database: {}", config.db_path.display());
    eprintln!("   Dispatcher: {}", config.dispatcher_url);
    eprintln!(
        "   Scheduler: starts {}\n",
        if config.start_paused { "paused" } else { "running" }
    );

    // Seed default jobs before the live engine exists, so nothing fires
    // mid-registration.
    if let Some(ref dir) = config.default_jobs_dir {
        let seeder =
            facade::get_paused_scheduler(&config, Arc::clone(&registry), Arc::clone(&flow)).await?;
        scheduler::register_default_jobs(&seeder, dir).await?;
        eprintln!("   Default jobs: loaded from {}", dir.display());
    }

    let handle = facade::get_scheduler(&config, registry, flow).await?;

    let app = api::router(AppState { scheduler: handle });
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    tracing::info!(port = config.port, "Jobs API server started");
    axum::serve(listener, app).await?;

    Ok(())
}
