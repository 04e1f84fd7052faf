use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dxa_core::config::{data_dir_from_env_value, reference_dir_from_env_value};
use dxa_core::{ClinicService, CoreConfig, DiagnosticCalculator, FileStore, load_reference_table};
use dxa_run::{AppState, router};

/// Main entry point for the DXA clinic REST server.
///
/// Resolves configuration once, loads the reference table once, then serves the REST API
/// with Swagger UI at `/swagger-ui`.
///
/// # Environment Variables
/// - `DXA_REST_ADDR`: REST server address (default: "0.0.0.0:3000")
/// - `DXA_DATA_DIR`: Clinic data directory (default: "clinic_data")
/// - `DXA_REFERENCE_DIR`: Reference table directory (default: "<data dir>/reference")
///
/// # Errors
/// Returns an error if:
/// - the logging/tracing configuration cannot be initialised,
/// - the data directory path is not a directory,
/// - the server address cannot be bound, or
/// - the HTTP server fails while running.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("dxa_run=info".parse()?)
                .add_directive("dxa_core=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let rest_addr = std::env::var("DXA_REST_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());
    let data_dir = data_dir_from_env_value(std::env::var("DXA_DATA_DIR").ok());
    let reference_dir = reference_dir_from_env_value(std::env::var("DXA_REFERENCE_DIR").ok());

    let cfg = Arc::new(CoreConfig::new(data_dir, reference_dir)?);
    tracing::info!("++ Clinic data in {}", cfg.data_dir().display());

    let reference = load_reference_table(&cfg);
    let calculator = Arc::new(DiagnosticCalculator::new(Arc::new(reference)));
    let clinic = ClinicService::new(FileStore::new(cfg), calculator);

    let app = router(AppState {
        clinic: Arc::new(clinic),
    });

    tracing::info!("++ Starting DXA REST on {}", rest_addr);
    let listener = tokio::net::TcpListener::bind(&rest_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
