//! Template catalog access
//!
//! Read-only reference data describing the reusable automation templates a
//! tenant can be provisioned from. The orchestrator only ever consumes the
//! trait, so tests run against an in-memory catalog.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flowgrid_shared::{Template, TemplateTier};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{ApiResult, AppError};

#[async_trait]
pub trait TemplateCatalog: Send + Sync {
    /// Fetch the templates matching the given ids; missing ids are simply
    /// absent from the result.
    async fn list_by_ids(&self, ids: &[Uuid]) -> ApiResult<Vec<Template>>;

    /// All templates currently offered to tenants.
    async fn list_active(&self) -> ApiResult<Vec<Template>>;
}

pub struct PgTemplateCatalog {
    db_pool: PgPool,
}

impl PgTemplateCatalog {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }
}

const TEMPLATE_COLUMNS: &str = "id, name, description, tier, source_workflow_id, \
     required_credentials, required_variables, default_config, active, created_at, updated_at";

#[async_trait]
impl TemplateCatalog for PgTemplateCatalog {
    async fn list_by_ids(&self, ids: &[Uuid]) -> ApiResult<Vec<Template>> {
        let rows: Vec<TemplateRow> = sqlx::query_as(&format!(
            "SELECT {} FROM automation_templates WHERE id = ANY($1)",
            TEMPLATE_COLUMNS
        ))
        .bind(ids)
        .fetch_all(&self.db_pool)
        .await?;

        rows.into_iter().map(TemplateRow::into_template).collect()
    }

    async fn list_active(&self) -> ApiResult<Vec<Template>> {
        let rows: Vec<TemplateRow> = sqlx::query_as(&format!(
            "SELECT {} FROM automation_templates WHERE active = TRUE ORDER BY name",
            TEMPLATE_COLUMNS
        ))
        .fetch_all(&self.db_pool)
        .await?;

        rows.into_iter().map(TemplateRow::into_template).collect()
    }
}

#[derive(sqlx::FromRow)]
struct TemplateRow {
    id: Uuid,
    name: String,
    description: Option<String>,
    tier: String,
    source_workflow_id: String,
    required_credentials: Vec<String>,
    required_variables: Vec<String>,
    default_config: serde_json::Value,
    active: bool,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
}

impl TemplateRow {
    fn into_template(self) -> ApiResult<Template> {
        let tier = TemplateTier::parse(&self.tier).ok_or_else(|| {
            AppError::DatabaseError(format!(
                "template {} has unknown tier '{}'",
                self.id, self.tier
            ))
        })?;

        Ok(Template {
            id: self.id,
            name: self.name,
            description: self.description,
            tier,
            source_workflow_id: self.source_workflow_id,
            required_credentials: self.required_credentials,
            required_variables: self.required_variables,
            default_config: self.default_config,
            active: self.active,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
