use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::types::Uuid;
use time::OffsetDateTime;

use super::StaffRole;

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "audit_action", rename_all = "snake_case")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    UpdateRegistration,
    DeleteRegistration,
    AssignInstructor,
    UpdatePayment,
    CreateStaff,
    ApproveCertificate,
    RejectCertificate,
    RevokeCertificate,
    CreateTemplate,
    ActivateTemplate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "audit_status", rename_all = "snake_case")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditStatus {
    Success,
    Failure,
}

/// Append-only record of a staff mutation. `details` never carries
/// decrypted contact data.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub actor_id: Uuid,
    pub actor_role: StaffRole,
    pub action: AuditAction,
    pub resource: String,
    pub resource_id: Option<String>,
    pub details: Value,
    pub status: AuditStatus,
    pub created_at: OffsetDateTime,
}

pub const DEFAULT_AUDIT_PAGE_SIZE: u32 = 100;
pub const MAX_AUDIT_PAGE_SIZE: u32 = 500;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditFilter {
    pub actor_id: Option<Uuid>,
    pub action: Option<AuditAction>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub from: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub to: Option<OffsetDateTime>,
    pub limit: Option<u32>,
    pub page: Option<u32>,
}

impl AuditFilter {
    pub fn limit(&self) -> u32 {
        self.limit
            .unwrap_or(DEFAULT_AUDIT_PAGE_SIZE)
            .clamp(1, MAX_AUDIT_PAGE_SIZE)
    }

    /// 1-based.
    pub fn page(&self) -> u32 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page() - 1) * u64::from(self.limit())
    }

    pub fn matches(&self, entry: &AuditEntry) -> bool {
        self.actor_id.map_or(true, |id| entry.actor_id == id)
            && self.action.map_or(true, |action| entry.action == action)
            && self.from.map_or(true, |from| entry.created_at >= from)
            && self.to.map_or(true, |to| entry.created_at <= to)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditPage {
    pub entries: Vec<AuditEntry>,
    pub total: u64,
    pub page: u32,
    pub pages: u64,
}
