//! Provisioning orchestrator
//!
//! The action state machine behind the `/api/v1/automations` endpoint.
//! Coordinates the template catalog, the variable injector, the automation
//! engine client and the workflow registry to perform one lifecycle
//! operation per request. No state is retained between invocations.
//!
//! Lifecycle: `pending_validation` is entered at provisioning and left only
//! through the explicit validate action. Engine-side activation and
//! tenant-facing readiness are deliberately separate concerns: provisioning
//! may activate the engine copy immediately, but the registry row stays
//! `pending_validation`/disabled until an operator validates it.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use flowgrid_shared::{ClientWorkflow, CredentialState, Template, WorkflowStatus};

use crate::catalog::TemplateCatalog;
use crate::error::{ApiError, ApiResult, AppError, ValidationBuilder};
use crate::registry::{WorkflowRegistry, WorkflowUpdate};
use crate::services::engine::{AutomationEngine, EngineError, EngineWorkflowSpec};
use crate::services::injector;

/// A lifecycle action request, discriminated by the `action` field.
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ActionRequest {
    Provision {
        tenant_id: Uuid,
        template_ids: Vec<Uuid>,
        #[serde(default)]
        variables: HashMap<String, String>,
    },
    Configure {
        tenant_id: Uuid,
        workflow_id: Uuid,
        #[serde(default)]
        credentials: HashMap<String, String>,
        #[serde(default)]
        config: HashMap<String, Value>,
    },
    Activate {
        tenant_id: Uuid,
        workflow_id: Uuid,
    },
    Deactivate {
        tenant_id: Uuid,
        workflow_id: Uuid,
    },
    Validate {
        tenant_id: Uuid,
        workflow_id: Uuid,
    },
    Trigger {
        tenant_id: Uuid,
        workflow_id: Uuid,
        #[serde(default)]
        payload: serde_json::Map<String, Value>,
    },
    Delete {
        tenant_id: Uuid,
        workflow_id: Uuid,
    },
    Verify {
        tenant_id: Uuid,
        #[serde(default)]
        workflow_id: Option<Uuid>,
        #[serde(default)]
        external_id: Option<String>,
    },
}

#[derive(Debug, Serialize)]
pub struct ProvisionedWorkflow {
    pub workflow_id: Uuid,
    pub template_id: Uuid,
    pub name: String,
    pub external_id: String,
}

#[derive(Debug, Serialize)]
pub struct ProvisionItemError {
    pub template_id: Uuid,
    pub template_name: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ProvisionOutcome {
    pub success: bool,
    pub copied: usize,
    pub workflows: Vec<ProvisionedWorkflow>,
    pub errors: Vec<ProvisionItemError>,
}

#[derive(Debug, Serialize)]
pub struct LifecycleOutcome {
    pub success: bool,
    pub workflow_id: Uuid,
    pub status: WorkflowStatus,
    pub enabled: bool,
}

#[derive(Debug, Serialize)]
pub struct TriggerOutcome {
    pub success: bool,
    pub workflow_id: Uuid,
    pub execution_id: String,
}

#[derive(Debug, Serialize)]
pub struct DeleteOutcome {
    pub success: bool,
    pub workflow_id: Uuid,
    pub engine_deleted: bool,
}

#[derive(Debug, Serialize)]
pub struct VerifyOutcome {
    pub success: bool,
    pub found: bool,
    pub external_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ActionOutcome {
    Provision(ProvisionOutcome),
    Lifecycle(LifecycleOutcome),
    Trigger(TriggerOutcome),
    Delete(DeleteOutcome),
    Verify(VerifyOutcome),
}

pub struct ProvisioningOrchestrator {
    catalog: Arc<dyn TemplateCatalog>,
    registry: Arc<dyn WorkflowRegistry>,
    engine: Arc<dyn AutomationEngine>,
}

impl ProvisioningOrchestrator {
    pub fn new(
        catalog: Arc<dyn TemplateCatalog>,
        registry: Arc<dyn WorkflowRegistry>,
        engine: Arc<dyn AutomationEngine>,
    ) -> Self {
        Self {
            catalog,
            registry,
            engine,
        }
    }

    /// Dispatch a single action request to its lifecycle operation.
    pub async fn handle(&self, request: ActionRequest) -> ApiResult<ActionOutcome> {
        match request {
            ActionRequest::Provision {
                tenant_id,
                template_ids,
                variables,
            } => self
                .provision(tenant_id, template_ids, variables)
                .await
                .map(ActionOutcome::Provision),
            ActionRequest::Configure {
                tenant_id,
                workflow_id,
                credentials,
                config,
            } => self
                .configure(tenant_id, workflow_id, credentials, config)
                .await
                .map(ActionOutcome::Lifecycle),
            ActionRequest::Activate {
                tenant_id,
                workflow_id,
            } => self
                .set_enabled(tenant_id, workflow_id, true)
                .await
                .map(ActionOutcome::Lifecycle),
            ActionRequest::Deactivate {
                tenant_id,
                workflow_id,
            } => self
                .set_enabled(tenant_id, workflow_id, false)
                .await
                .map(ActionOutcome::Lifecycle),
            ActionRequest::Validate {
                tenant_id,
                workflow_id,
            } => self
                .validate(tenant_id, workflow_id)
                .await
                .map(ActionOutcome::Lifecycle),
            ActionRequest::Trigger {
                tenant_id,
                workflow_id,
                payload,
            } => self
                .trigger(tenant_id, workflow_id, payload)
                .await
                .map(ActionOutcome::Trigger),
            ActionRequest::Delete {
                tenant_id,
                workflow_id,
            } => self
                .delete(tenant_id, workflow_id)
                .await
                .map(ActionOutcome::Delete),
            ActionRequest::Verify {
                tenant_id,
                workflow_id,
                external_id,
            } => self
                .verify(tenant_id, workflow_id, external_id)
                .await
                .map(ActionOutcome::Verify),
        }
    }

    /// Copy each requested template into the engine for this tenant.
    ///
    /// Templates are processed one at a time; a failure is recorded against
    /// its template and never aborts or rolls back the other items.
    pub async fn provision(
        &self,
        tenant_id: Uuid,
        template_ids: Vec<Uuid>,
        variables: HashMap<String, String>,
    ) -> ApiResult<ProvisionOutcome> {
        let mut validation = ValidationBuilder::new();
        if template_ids.is_empty() {
            validation = validation.error("template_ids", "at least one template id is required");
        }
        if variables.keys().any(|name| name.trim().is_empty()) {
            validation = validation.error("variables", "variable names must not be blank");
        }
        if let Some(err) = validation.build() {
            return Err(err);
        }

        let templates = self.catalog.list_by_ids(&template_ids).await?;
        let by_id: HashMap<Uuid, &Template> = templates.iter().map(|t| (t.id, t)).collect();

        let mut workflows = Vec::new();
        let mut errors = Vec::new();

        for template_id in &template_ids {
            let Some(template) = by_id.get(template_id).copied() else {
                errors.push(ProvisionItemError {
                    template_id: *template_id,
                    template_name: template_id.to_string(),
                    message: "template not found in catalog".to_string(),
                });
                continue;
            };

            match self.provision_one(tenant_id, template, &variables).await {
                Ok(workflow) => {
                    info!(
                        "Provisioned template '{}' for tenant {} as engine workflow {}",
                        template.name, tenant_id, workflow.external_id
                    );
                    workflows.push(workflow);
                }
                Err(err) => {
                    let message = err.message();
                    error!(
                        "Provisioning template '{}' for tenant {} failed: {}",
                        template.name, tenant_id, message
                    );
                    errors.push(ProvisionItemError {
                        template_id: template.id,
                        template_name: template.name.clone(),
                        message,
                    });
                }
            }
        }

        let copied = workflows.len();
        Ok(ProvisionOutcome {
            success: copied > 0,
            copied,
            workflows,
            errors,
        })
    }

    async fn provision_one(
        &self,
        tenant_id: Uuid,
        template: &Template,
        variables: &HashMap<String, String>,
    ) -> ApiResult<ProvisionedWorkflow> {
        if !template.active {
            return Err(ApiError::bad_request("template is not active in the catalog"));
        }

        let master = self
            .engine
            .get_workflow(&template.source_workflow_id)
            .await
            .map_err(AppError::from)?;

        let mut nodes = master.nodes;
        injector::inject_variables(&mut nodes, variables);

        let name = format!("{} [tenant {}]", template.name, tenant_id);
        let spec = EngineWorkflowSpec {
            name: name.clone(),
            active: false,
            nodes,
            connections: master.connections,
            settings: master.settings,
            static_data: master.static_data,
        };
        let created = self
            .engine
            .create_workflow(&spec)
            .await
            .map_err(AppError::from)?;

        // Tags only group workflows in the engine's own UI; never let them
        // fail the item.
        self.assign_tags(&created.id, tenant_id, template).await;

        // With nothing left to configure, the engine copy can run straight
        // away. The registry row below still starts at pending_validation:
        // only the explicit validate action makes it tenant-visible.
        if template.required_credentials.is_empty()
            && required_variables_satisfied(template, variables)
        {
            if let Err(err) = self.engine.set_active(&created.id, true).await {
                warn!(
                    "Engine-side activation of new workflow {} failed: {}",
                    created.id, err
                );
            }
        }

        let workflow = ClientWorkflow {
            id: Uuid::new_v4(),
            tenant_id,
            template_id: Some(template.id),
            external_id: created.id.clone(),
            name,
            description: template.description.clone(),
            tier: template.tier,
            status: WorkflowStatus::PendingValidation,
            enabled: false,
            credentials_status: template
                .required_credentials
                .iter()
                .map(|name| (name.clone(), CredentialState::Pending))
                .collect(),
            config: template.default_config.clone(),
            execution_count: 0,
            last_executed_at: None,
            created_at: Utc::now(),
            updated_at: None,
        };

        if let Err(err) = self.registry.insert(&workflow).await {
            // A registry/engine mismatch is worse than a failed item; the
            // orphaned engine copy is reported for manual cleanup.
            error!(
                "Registry insert failed after creating engine workflow {}; engine copy left behind",
                created.id
            );
            return Err(err);
        }

        Ok(ProvisionedWorkflow {
            workflow_id: workflow.id,
            template_id: template.id,
            name: workflow.name,
            external_id: workflow.external_id,
        })
    }

    async fn assign_tags(&self, external_id: &str, tenant_id: Uuid, template: &Template) {
        let names = [
            format!("tenant:{}", tenant_id),
            format!("template:{}", template.id),
            format!("tier:{}", template.tier.as_str()),
        ];

        match self.ensure_tags(&names).await {
            Ok(tag_ids) => {
                if let Err(err) = self.engine.set_workflow_tags(external_id, &tag_ids).await {
                    warn!(
                        "Tag assignment for engine workflow {} failed: {}",
                        external_id, err
                    );
                }
            }
            Err(err) => {
                warn!(
                    "Tag lookup/creation for engine workflow {} failed: {}",
                    external_id, err
                );
            }
        }
    }

    async fn ensure_tags(&self, names: &[String]) -> Result<Vec<String>, EngineError> {
        let existing = self.engine.list_tags().await?;
        let mut tag_ids = Vec::with_capacity(names.len());

        for name in names {
            match existing.iter().find(|tag| &tag.name == name) {
                Some(tag) => tag_ids.push(tag.id.clone()),
                None => tag_ids.push(self.engine.create_tag(name).await?.id),
            }
        }

        Ok(tag_ids)
    }

    /// Push supplied credentials/config into the engine definition and mark
    /// the workflow configured and tenant-visible.
    pub async fn configure(
        &self,
        tenant_id: Uuid,
        workflow_id: Uuid,
        credentials: HashMap<String, String>,
        config: HashMap<String, Value>,
    ) -> ApiResult<LifecycleOutcome> {
        let workflow = self.load_owned(tenant_id, workflow_id).await?;

        let current = self
            .engine
            .get_workflow(&workflow.external_id)
            .await
            .map_err(AppError::from)?;

        // Structural merge into node parameters; this is deliberately not
        // the placeholder substitution path used at provisioning time.
        let mut merged: HashMap<String, Value> = config.clone();
        for (key, value) in &credentials {
            merged.insert(key.clone(), Value::String(value.clone()));
        }
        let mut nodes = current.nodes;
        injector::merge_node_parameters(&mut nodes, &merged);

        let spec = EngineWorkflowSpec {
            name: current.name,
            active: true,
            nodes,
            connections: current.connections,
            settings: current.settings,
            static_data: current.static_data,
        };
        self.engine
            .update_workflow(&workflow.external_id, &spec)
            .await
            .map_err(AppError::from)?;

        let mut credentials_status = workflow.credentials_status.clone();
        for key in credentials.keys() {
            match credentials_status.get_mut(key) {
                Some(state) => *state = CredentialState::Configured,
                // Keys are fixed at creation; a stray key is a caller bug
                None => warn!(
                    "Credential '{}' is not declared by workflow {}",
                    key, workflow_id
                ),
            }
        }

        let mut stored_config = workflow.config.clone();
        if let Value::Object(object) = &mut stored_config {
            for (key, value) in &config {
                object.insert(key.clone(), value.clone());
            }
        }

        self.registry
            .update(
                workflow_id,
                WorkflowUpdate {
                    status: Some(WorkflowStatus::Active),
                    enabled: Some(true),
                    credentials_status: Some(credentials_status),
                    config: Some(stored_config),
                },
            )
            .await?;

        info!("Configured workflow {} for tenant {}", workflow_id, tenant_id);
        Ok(LifecycleOutcome {
            success: true,
            workflow_id,
            status: WorkflowStatus::Active,
            enabled: true,
        })
    }

    /// Toggle the tenant-facing enabled flag in both engine and registry.
    /// Status is left untouched.
    pub async fn set_enabled(
        &self,
        tenant_id: Uuid,
        workflow_id: Uuid,
        enabled: bool,
    ) -> ApiResult<LifecycleOutcome> {
        let workflow = self.load_owned(tenant_id, workflow_id).await?;

        if workflow.external_id.is_empty() {
            return Err(ApiError::bad_request("workflow has no engine definition"));
        }

        // enabled == true is only legal on a validated workflow
        if enabled && workflow.status == WorkflowStatus::PendingValidation {
            return Err(ApiError::bad_request(
                "workflow is pending validation and cannot be enabled",
            ));
        }

        self.engine
            .set_active(&workflow.external_id, enabled)
            .await
            .map_err(AppError::from)?;

        self.registry
            .update(
                workflow_id,
                WorkflowUpdate {
                    enabled: Some(enabled),
                    ..Default::default()
                },
            )
            .await?;

        info!(
            "Workflow {} for tenant {} is now {}",
            workflow_id,
            tenant_id,
            if enabled { "enabled" } else { "disabled" }
        );
        Ok(LifecycleOutcome {
            success: true,
            workflow_id,
            status: workflow.status,
            enabled,
        })
    }

    /// Operator sign-off promoting a provisioned workflow to tenant-visible
    /// active. The registry is authoritative once validated; a transient
    /// engine activation failure is logged, not propagated.
    pub async fn validate(&self, tenant_id: Uuid, workflow_id: Uuid) -> ApiResult<LifecycleOutcome> {
        let workflow = self.load_owned(tenant_id, workflow_id).await?;

        if workflow.status != WorkflowStatus::PendingValidation {
            return Err(ApiError::bad_request(format!(
                "workflow is {}; only pending_validation workflows can be validated",
                workflow.status.as_str()
            )));
        }

        // The engine must still hold the definition; a missing copy is fatal
        let engine_workflow = self
            .engine
            .get_workflow(&workflow.external_id)
            .await
            .map_err(AppError::from)?;

        if !engine_workflow.active {
            if let Err(err) = self.engine.set_active(&workflow.external_id, true).await {
                warn!(
                    "Engine activation during validation of workflow {} failed: {}",
                    workflow_id, err
                );
            }
        }

        self.registry
            .update(
                workflow_id,
                WorkflowUpdate {
                    status: Some(WorkflowStatus::Active),
                    enabled: Some(true),
                    ..Default::default()
                },
            )
            .await?;

        info!("Validated workflow {} for tenant {}", workflow_id, tenant_id);
        Ok(LifecycleOutcome {
            success: true,
            workflow_id,
            status: WorkflowStatus::Active,
            enabled: true,
        })
    }

    /// Run the engine definition with the caller's payload enriched with
    /// tenant/workflow identity and a trigger timestamp.
    pub async fn trigger(
        &self,
        tenant_id: Uuid,
        workflow_id: Uuid,
        payload: serde_json::Map<String, Value>,
    ) -> ApiResult<TriggerOutcome> {
        let workflow = self.load_owned(tenant_id, workflow_id).await?;

        if !workflow.enabled {
            return Err(ApiError::bad_request("workflow is not enabled"));
        }

        let mut body = payload;
        body.insert("tenant_id".to_string(), json!(workflow.tenant_id));
        body.insert("workflow_id".to_string(), json!(workflow.id));
        body.insert("triggered_at".to_string(), json!(Utc::now().to_rfc3339()));

        let execution_id = self
            .engine
            .execute_workflow(&workflow.external_id, &Value::Object(body))
            .await
            .map_err(AppError::from)?;

        info!(
            "Triggered workflow {} for tenant {}: execution {}",
            workflow_id, tenant_id, execution_id
        );
        Ok(TriggerOutcome {
            success: true,
            workflow_id,
            execution_id,
        })
    }

    /// Remove the workflow. A stale engine copy is acceptable, a stale
    /// registry row is not, so the registry delete runs regardless of the
    /// engine call's outcome.
    pub async fn delete(&self, tenant_id: Uuid, workflow_id: Uuid) -> ApiResult<DeleteOutcome> {
        let workflow = self.load_owned(tenant_id, workflow_id).await?;

        let engine_deleted = match self.engine.delete_workflow(&workflow.external_id).await {
            Ok(()) => true,
            Err(err) => {
                warn!(
                    "Engine delete of workflow {} failed, removing registry row anyway: {}",
                    workflow.external_id, err
                );
                false
            }
        };

        self.registry.delete(workflow_id).await?;

        info!("Deleted workflow {} for tenant {}", workflow_id, tenant_id);
        Ok(DeleteOutcome {
            success: true,
            workflow_id,
            engine_deleted,
        })
    }

    /// Read-only drift check between registry and engine. Accepts exactly
    /// one of a registry workflow id or a raw engine definition id.
    pub async fn verify(
        &self,
        tenant_id: Uuid,
        workflow_id: Option<Uuid>,
        external_id: Option<String>,
    ) -> ApiResult<VerifyOutcome> {
        let external_id = match (workflow_id, external_id) {
            (Some(id), None) => self.load_owned(tenant_id, id).await?.external_id,
            (None, Some(external)) => external,
            _ => {
                return Err(ApiError::bad_request(
                    "provide exactly one of workflow_id or external_id",
                ))
            }
        };

        match self.engine.get_workflow(&external_id).await {
            Ok(engine_workflow) => Ok(VerifyOutcome {
                success: true,
                found: true,
                external_id,
                name: Some(engine_workflow.name),
                active: Some(engine_workflow.active),
                message: None,
            }),
            Err(err) if err.is_not_found() => Ok(VerifyOutcome {
                success: false,
                found: false,
                external_id,
                name: None,
                active: None,
                message: Some("engine holds no matching definition".to_string()),
            }),
            Err(err) => Err(err.into()),
        }
    }

    /// Load a workflow and enforce tenant scoping. A cross-tenant hit is a
    /// boundary violation, not a not-found.
    async fn load_owned(&self, tenant_id: Uuid, workflow_id: Uuid) -> ApiResult<ClientWorkflow> {
        let workflow = self
            .registry
            .get(workflow_id)
            .await?
            .ok_or_else(|| ApiError::not_found("Workflow"))?;

        if workflow.tenant_id != tenant_id {
            return Err(ApiError::forbidden("workflow belongs to another tenant"));
        }

        Ok(workflow)
    }
}

fn required_variables_satisfied(template: &Template, variables: &HashMap<String, String>) -> bool {
    template
        .required_variables
        .iter()
        .all(|name| variables.get(name).is_some_and(|v| !v.trim().is_empty()))
}
