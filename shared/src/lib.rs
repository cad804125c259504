use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Pricing tier a template belongs to. Copied onto each client workflow at
/// provisioning time so the read side never needs a catalog join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateTier {
    Start,
    Pro,
    Elite,
}

impl TemplateTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Pro => "pro",
            Self::Elite => "elite",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "start" => Some(Self::Start),
            "pro" => Some(Self::Pro),
            "elite" => Some(Self::Elite),
            _ => None,
        }
    }
}

/// Lifecycle status of a client workflow. Deletion removes the row, so
/// there is no terminal variant here, and failures are reported to the
/// caller rather than persisted as a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    PendingValidation,
    Active,
    Inactive,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingValidation => "pending_validation",
            Self::Active => "active",
            Self::Inactive => "inactive",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending_validation" => Some(Self::PendingValidation),
            "active" => Some(Self::Active),
            "inactive" => Some(Self::Inactive),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialState {
    Pending,
    Configured,
}

impl CredentialState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Configured => "configured",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "configured" => Some(Self::Configured),
            _ => None,
        }
    }
}

/// Reusable automation template. Reference data, read-only to the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub tier: TemplateTier,
    /// Id of the master definition held by the automation engine.
    pub source_workflow_id: String,
    pub required_credentials: Vec<String>,
    pub required_variables: Vec<String>,
    pub default_config: serde_json::Value,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// A tenant-owned copy of a template, tracked against its engine-side
/// definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientWorkflow {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub template_id: Option<Uuid>,
    /// Engine definition id. Set exactly once at creation, never reassigned.
    pub external_id: String,
    pub name: String,
    pub description: Option<String>,
    pub tier: TemplateTier,
    pub status: WorkflowStatus,
    /// Tenant-facing on/off switch. Only ever true while status is active.
    pub enabled: bool,
    /// Keyed by the template's required credential names, fixed at creation.
    pub credentials_status: HashMap<String, CredentialState>,
    pub config: serde_json::Value,
    /// Updated out of band by the execution webhook processor.
    pub execution_count: i64,
    pub last_executed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}
