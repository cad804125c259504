use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use flowgrid_shared::{ClientWorkflow, Template};

use crate::catalog::TemplateCatalog;
use crate::error::ApiResult;
use crate::pagination::{PaginatedResponse, PaginationParams};
use crate::registry::WorkflowRegistry;
use crate::services::orchestrator::ActionRequest;
use crate::AppState;

pub fn automation_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(handle_action))
        .route("/templates", get(list_templates))
        .route("/workflows/:tenant_id", get(list_tenant_workflows))
}

#[derive(Debug, Serialize)]
struct ActionFailure {
    success: bool,
    error: String,
}

/// Single entry point for every lifecycle action. Failures are collapsed
/// into a 400 envelope so callers branch on `success` alone; the read-side
/// endpoints below keep the standard error envelope instead.
async fn handle_action(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ActionRequest>,
) -> impl IntoResponse {
    match state.orchestrator.handle(request).await {
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(err) => (
            StatusCode::BAD_REQUEST,
            Json(ActionFailure {
                success: false,
                error: err.message(),
            }),
        )
            .into_response(),
    }
}

async fn list_templates(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PaginationParams>,
) -> ApiResult<Json<PaginatedResponse<Template>>> {
    let templates = state.catalog.list_active().await?;
    let total = templates.len() as i64;
    let page: Vec<Template> = templates
        .into_iter()
        .skip(params.offset() as usize)
        .take(params.limit() as usize)
        .collect();

    Ok(Json(PaginatedResponse::new(page, &params, total)))
}

async fn list_tenant_workflows(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<Uuid>,
    Query(params): Query<PaginationParams>,
) -> ApiResult<Json<PaginatedResponse<ClientWorkflow>>> {
    let workflows = state.registry.list_by_tenant(tenant_id).await?;
    let total = workflows.len() as i64;
    let page: Vec<ClientWorkflow> = workflows
        .into_iter()
        .skip(params.offset() as usize)
        .take(params.limit() as usize)
        .collect();

    Ok(Json(PaginatedResponse::new(page, &params, total)))
}
