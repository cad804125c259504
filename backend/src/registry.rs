//! Client workflow registry
//!
//! One row per tenant-owned workflow copy. The registry is the source of
//! truth for tenant-facing lifecycle state; the engine-side definition is
//! reconciled against it via the orchestrator's verify action.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flowgrid_shared::{ClientWorkflow, CredentialState, TemplateTier, WorkflowStatus};
use sqlx::PgPool;
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult, AppError};

/// Sparse field update applied by `WorkflowRegistry::update`. Fields left
/// as `None` keep their stored value.
#[derive(Debug, Clone, Default)]
pub struct WorkflowUpdate {
    pub status: Option<WorkflowStatus>,
    pub enabled: Option<bool>,
    pub credentials_status: Option<HashMap<String, CredentialState>>,
    pub config: Option<serde_json::Value>,
}

#[async_trait]
pub trait WorkflowRegistry: Send + Sync {
    async fn insert(&self, workflow: &ClientWorkflow) -> ApiResult<()>;
    async fn get(&self, id: Uuid) -> ApiResult<Option<ClientWorkflow>>;
    async fn update(&self, id: Uuid, update: WorkflowUpdate) -> ApiResult<()>;
    async fn delete(&self, id: Uuid) -> ApiResult<()>;
    async fn list_by_tenant(&self, tenant_id: Uuid) -> ApiResult<Vec<ClientWorkflow>>;
}

pub struct PgWorkflowRegistry {
    db_pool: PgPool,
}

impl PgWorkflowRegistry {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }
}

const WORKFLOW_COLUMNS: &str = "id, tenant_id, template_id, external_id, name, description, tier, \
     status, enabled, credentials_status, config, execution_count, last_executed_at, \
     created_at, updated_at";

#[async_trait]
impl WorkflowRegistry for PgWorkflowRegistry {
    async fn insert(&self, workflow: &ClientWorkflow) -> ApiResult<()> {
        let credentials_status = serde_json::to_value(&workflow.credentials_status)
            .map_err(|e| ApiError::internal(e.to_string()))?;

        sqlx::query(
            "INSERT INTO client_workflows \
             (id, tenant_id, template_id, external_id, name, description, tier, status, \
              enabled, credentials_status, config, execution_count, last_executed_at, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
        )
        .bind(workflow.id)
        .bind(workflow.tenant_id)
        .bind(workflow.template_id)
        .bind(&workflow.external_id)
        .bind(&workflow.name)
        .bind(&workflow.description)
        .bind(workflow.tier.as_str())
        .bind(workflow.status.as_str())
        .bind(workflow.enabled)
        .bind(credentials_status)
        .bind(&workflow.config)
        .bind(workflow.execution_count)
        .bind(workflow.last_executed_at)
        .bind(workflow.created_at)
        .execute(&self.db_pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> ApiResult<Option<ClientWorkflow>> {
        let row: Option<WorkflowRow> = sqlx::query_as(&format!(
            "SELECT {} FROM client_workflows WHERE id = $1",
            WORKFLOW_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.db_pool)
        .await?;

        row.map(WorkflowRow::into_workflow).transpose()
    }

    async fn update(&self, id: Uuid, update: WorkflowUpdate) -> ApiResult<()> {
        let credentials_status = update
            .credentials_status
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| ApiError::internal(e.to_string()))?;

        let result = sqlx::query(
            "UPDATE client_workflows SET \
             status = COALESCE($2, status), \
             enabled = COALESCE($3, enabled), \
             credentials_status = COALESCE($4, credentials_status), \
             config = COALESCE($5, config), \
             updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(update.status.map(|s| s.as_str()))
        .bind(update.enabled)
        .bind(credentials_status)
        .bind(update.config)
        .execute(&self.db_pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("Workflow".to_string()));
        }

        Ok(())
    }

    async fn delete(&self, id: Uuid) -> ApiResult<()> {
        let result = sqlx::query("DELETE FROM client_workflows WHERE id = $1")
            .bind(id)
            .execute(&self.db_pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("Workflow".to_string()));
        }

        Ok(())
    }

    async fn list_by_tenant(&self, tenant_id: Uuid) -> ApiResult<Vec<ClientWorkflow>> {
        let rows: Vec<WorkflowRow> = sqlx::query_as(&format!(
            "SELECT {} FROM client_workflows WHERE tenant_id = $1 ORDER BY created_at DESC",
            WORKFLOW_COLUMNS
        ))
        .bind(tenant_id)
        .fetch_all(&self.db_pool)
        .await?;

        rows.into_iter().map(WorkflowRow::into_workflow).collect()
    }
}

#[derive(sqlx::FromRow)]
struct WorkflowRow {
    id: Uuid,
    tenant_id: Uuid,
    template_id: Option<Uuid>,
    external_id: String,
    name: String,
    description: Option<String>,
    tier: String,
    status: String,
    enabled: bool,
    credentials_status: serde_json::Value,
    config: serde_json::Value,
    execution_count: i64,
    last_executed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
}

impl WorkflowRow {
    fn into_workflow(self) -> ApiResult<ClientWorkflow> {
        let tier = TemplateTier::parse(&self.tier).ok_or_else(|| {
            AppError::DatabaseError(format!("workflow {} has unknown tier '{}'", self.id, self.tier))
        })?;
        let status = WorkflowStatus::parse(&self.status).ok_or_else(|| {
            AppError::DatabaseError(format!(
                "workflow {} has unknown status '{}'",
                self.id, self.status
            ))
        })?;
        let credentials_status: HashMap<String, CredentialState> =
            serde_json::from_value(self.credentials_status).map_err(|e| {
                AppError::DatabaseError(format!(
                    "workflow {} has malformed credentials_status: {}",
                    self.id, e
                ))
            })?;

        Ok(ClientWorkflow {
            id: self.id,
            tenant_id: self.tenant_id,
            template_id: self.template_id,
            external_id: self.external_id,
            name: self.name,
            description: self.description,
            tier,
            status,
            enabled: self.enabled,
            credentials_status,
            config: self.config,
            execution_count: self.execution_count,
            last_executed_at: self.last_executed_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
