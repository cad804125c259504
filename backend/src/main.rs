use axum::{http::Method, routing::get, Router};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod catalog;
mod config;
mod database;
mod error;
mod handlers;
mod pagination;
mod registry;
mod services;

pub use error::{ApiError, ApiResult, AppError};
pub use pagination::{PaginatedResponse, PaginationMeta, PaginationParams};

use catalog::{PgTemplateCatalog, TemplateCatalog};
use registry::{PgWorkflowRegistry, WorkflowRegistry};
use services::engine::{AutomationEngine, HttpEngineClient};
use services::orchestrator::ProvisioningOrchestrator;

pub struct AppState {
    pub db_pool: sqlx::PgPool,
    pub catalog: Arc<dyn TemplateCatalog>,
    pub registry: Arc<dyn WorkflowRegistry>,
    pub orchestrator: ProvisioningOrchestrator,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::from_env()?;
    let db_pool = database::create_pool(&config.database_url).await?;

    database::migrate(&db_pool).await?;

    if !config.engine.is_configured() {
        tracing::warn!("Automation engine base URL or API key is not configured");
    }

    let catalog: Arc<dyn TemplateCatalog> = Arc::new(PgTemplateCatalog::new(db_pool.clone()));
    let registry: Arc<dyn WorkflowRegistry> = Arc::new(PgWorkflowRegistry::new(db_pool.clone()));
    let engine: Arc<dyn AutomationEngine> = Arc::new(HttpEngineClient::new(&config.engine)?);
    let orchestrator =
        ProvisioningOrchestrator::new(catalog.clone(), registry.clone(), engine);

    let app_state = Arc::new(AppState {
        db_pool,
        catalog,
        registry,
        orchestrator,
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any);

    let app = Router::new()
        .route("/", get(|| async { "Flowgrid Automation Platform API v1.0.0" }))
        .route("/health", get(handlers::health_check))
        .nest("/api/v1/automations", handlers::automation_routes())
        .layer(ServiceBuilder::new().layer(cors))
        .with_state(app_state);

    let listener = tokio::net::TcpListener::bind(&config.server_addr).await?;
    tracing::info!("Server running on {}", config.server_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
