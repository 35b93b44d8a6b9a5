// compliance.rs — Signed CSV projections of the execution log.
//
// The body is rendered, signed with HMAC-SHA256 and handed back to the
// caller once. Only the export metadata (criteria, signature, count) is
// persisted; an auditor holding the same secret can later check that a
// body they were given is unaltered.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use dt_actions::{ActionKind, DevtelBackend};
use dt_store::{JsonFileStore, Record};

use crate::error::AuditError;
use crate::execution::{ExecutedAction, ExecutionFilter, ExecutionStore};
use crate::hasher::Signer;

const HEADERS: [&str; 8] = [
    "Action ID",
    "Timestamp",
    "Agent",
    "Action Type",
    "Status",
    "Executor",
    "Duration (ms)",
    "Error",
];

/// Executor column value when the user cannot be resolved.
const SYSTEM_EXECUTOR: &str = "System";

/// The filter an export was generated from. Empty lists match everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExportCriteria {
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub agent_ids: Vec<String>,
    #[serde(default)]
    pub action_types: Vec<ActionKind>,
}

impl ExportCriteria {
    fn to_filter(&self, tenant_id: Uuid) -> ExecutionFilter {
        ExecutionFilter {
            agent_ids: self.agent_ids.clone(),
            action_types: self.action_types.clone(),
            from: self.start_date,
            to: self.end_date,
            ..ExecutionFilter::for_tenant(tenant_id)
        }
    }
}

/// Persisted metadata for one generated export. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComplianceExport {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub generated_by: Uuid,
    pub criteria: ExportCriteria,
    pub signature_hash: String,
    pub format: String,
    pub action_count: usize,
    pub created_at: DateTime<Utc>,
}

impl Record for ComplianceExport {
    fn record_id(&self) -> Uuid {
        self.id
    }
}

/// An export record plus the signed body, returned once to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct GeneratedExport {
    pub export: ComplianceExport,
    pub content: String,
}

pub struct ComplianceExporter {
    exports: JsonFileStore<ComplianceExport>,
    signer: Signer,
}

impl ComplianceExporter {
    pub fn open(dir: impl AsRef<Path>, secret: &str) -> Result<Self, AuditError> {
        Ok(Self {
            exports: JsonFileStore::new(dir)?,
            signer: Signer::new(secret),
        })
    }

    /// Select, render, sign and record an export for `tenant_id`.
    pub fn generate(
        &self,
        executions: &ExecutionStore,
        users: &dyn DevtelBackend,
        tenant_id: Uuid,
        generated_by: Uuid,
        criteria: ExportCriteria,
    ) -> Result<GeneratedExport, AuditError> {
        let actions = executions.query(&criteria.to_filter(tenant_id))?;
        let content = render_csv(&actions, users)?;
        let export = ComplianceExport {
            id: Uuid::new_v4(),
            tenant_id,
            generated_by,
            criteria,
            signature_hash: self.signer.sign(content.as_bytes()),
            format: "csv".to_string(),
            action_count: actions.len(),
            created_at: Utc::now(),
        };
        self.exports.insert(&export)?;
        tracing::info!(
            export_id = %export.id,
            tenant_id = %tenant_id,
            action_count = export.action_count,
            "compliance export generated"
        );
        Ok(GeneratedExport { export, content })
    }

    /// Exports for a tenant, newest first.
    pub fn list(&self, tenant_id: Uuid) -> Result<Vec<ComplianceExport>, AuditError> {
        let mut exports = self.exports.filter(|e| e.tenant_id == tenant_id)?;
        exports.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(exports)
    }

    pub fn get(&self, id: Uuid) -> Result<Option<ComplianceExport>, AuditError> {
        Ok(self.exports.get(id)?)
    }

    /// Whether `signature` is this server's signature over `body`.
    pub fn verify(&self, body: &str, signature: &str) -> bool {
        self.signer.verify(body.as_bytes(), signature)
    }
}

fn render_csv(actions: &[ExecutedAction], users: &dyn DevtelBackend) -> Result<String, AuditError> {
    let mut writer = csv::WriterBuilder::new()
        .quote_style(csv::QuoteStyle::Always)
        .from_writer(Vec::new());
    writer.write_record(HEADERS)?;

    let mut executors: HashMap<Uuid, String> = HashMap::new();
    for action in actions {
        let executor = executors
            .entry(action.executed_by)
            .or_insert_with(|| match users.find_user(action.executed_by) {
                Ok(Some(user)) => user.email,
                Ok(None) => SYSTEM_EXECUTOR.to_string(),
                Err(e) => {
                    tracing::warn!(user_id = %action.executed_by, "executor lookup failed: {}", e);
                    SYSTEM_EXECUTOR.to_string()
                }
            })
            .clone();

        writer.write_record([
            action.id.to_string(),
            action.created_at.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            action.agent_id.clone(),
            action.action_type.to_string(),
            action.status.to_string(),
            executor,
            action.duration_ms.to_string(),
            action.error_message.clone().unwrap_or_default(),
        ])?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| AuditError::WriteFailed(e.into_error()))?;
    String::from_utf8(bytes).map_err(|e| {
        AuditError::WriteFailed(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    })
}
