//! Append-only trail of staff mutations.
//!
//! Handlers record the outcome of each mutating call after it returns.
//! Recording is best effort: a failed insert is logged and never turns a
//! successful request into an error. Revocations are the exception; their
//! entry is written inside the revoking transaction.

use std::sync::Arc;

use serde_json::{json, Value};
use time::OffsetDateTime;
use tracing::warn;
use uuid::Uuid;

use crate::db::models::{Actor, AuditAction, AuditEntry, AuditFilter, AuditPage, AuditStatus};
use crate::db::store::{AuditStore, Store};
use crate::error::AppResult;

#[derive(Clone)]
pub struct AuditTrail {
    store: Arc<dyn Store>,
}

impl AuditTrail {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub fn entry(
        actor: &Actor,
        action: AuditAction,
        resource: &str,
        resource_id: Option<String>,
        details: Value,
        status: AuditStatus,
    ) -> AuditEntry {
        AuditEntry {
            id: Uuid::now_v7(),
            actor_id: actor.id,
            actor_role: actor.role,
            action,
            resource: resource.to_string(),
            resource_id,
            details,
            status,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    /// Records `outcome` as a success or, with the error message merged
    /// into `details`, a failure.
    pub async fn record<T>(
        &self,
        actor: &Actor,
        action: AuditAction,
        resource: &str,
        resource_id: impl ToString,
        details: Value,
        outcome: &AppResult<T>,
    ) {
        let (status, details) = match outcome {
            Ok(_) => (AuditStatus::Success, details),
            Err(e) => (AuditStatus::Failure, with_error(details, &e.to_string())),
        };
        let entry = Self::entry(
            actor,
            action,
            resource,
            Some(resource_id.to_string()),
            details,
            status,
        );

        if let Err(e) = self.store.insert_audit_entry(&entry).await {
            warn!(action = ?action, actor_id = %actor.id, error = %e, "Failed to write audit entry");
        }
    }

    pub async fn list(&self, filter: &AuditFilter) -> AppResult<AuditPage> {
        let (entries, total) = self.store.list_audit_entries(filter).await?;
        let limit = u64::from(filter.limit());

        Ok(AuditPage {
            entries,
            total,
            page: filter.page(),
            pages: total.div_ceil(limit),
        })
    }
}

fn with_error(details: Value, error: &str) -> Value {
    match details {
        Value::Object(mut map) => {
            map.insert("error".to_string(), Value::String(error.to_string()));
            Value::Object(map)
        }
        Value::Null => json!({ "error": error }),
        other => json!({ "details": other, "error": error }),
    }
}
