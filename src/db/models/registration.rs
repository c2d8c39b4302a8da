use std::fmt;

use serde::{Deserialize, Serialize};
use sqlx::types::Uuid;
use time::{Date, OffsetDateTime};
use validator::Validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "program_level", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ProgramLevel {
    Level1,
    Level2,
    Level3,
    Level4,
}

impl ProgramLevel {
    pub fn label(&self) -> &'static str {
        match self {
            ProgramLevel::Level1 => "Level 1 – Decode Your Mind",
            ProgramLevel::Level2 => "Level 2 – Decode Your Behavior",
            ProgramLevel::Level3 => "Level 3 – Decode Your Relationship",
            ProgramLevel::Level4 => "Level 4 – Decode Your Blueprint",
        }
    }

    /// The part of the label before the en dash, e.g. "Level 1".
    pub fn short_label(&self) -> &'static str {
        self.label()
            .split('–')
            .next()
            .map(str::trim)
            .unwrap_or_else(|| self.label())
    }
}

impl fmt::Display for ProgramLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "delivery_mode", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    Online,
    Offline,
}

impl DeliveryMode {
    pub fn label(&self) -> &'static str {
        match self {
            DeliveryMode::Online => "Online",
            DeliveryMode::Offline => "Offline",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "region", rename_all = "snake_case")]
#[serde(rename_all = "UPPERCASE")]
pub enum Region {
    #[default]
    India,
    Usa,
    Uae,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "payment_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Paid,
    EmergencyOverride,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "payment_mode", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentMode {
    Online,
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "certificate_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CertificateStatus {
    #[default]
    Pending,
    Issued,
    Revoked,
    Rejected,
}

impl CertificateStatus {
    /// Pending→Issued, Pending→Rejected and Issued→Revoked are the only moves.
    pub fn can_transition_to(self, next: CertificateStatus) -> bool {
        matches!(
            (self, next),
            (CertificateStatus::Pending, CertificateStatus::Issued)
                | (CertificateStatus::Pending, CertificateStatus::Rejected)
                | (CertificateStatus::Issued, CertificateStatus::Revoked)
        )
    }
}

/// Registration row as persisted: `email` and `phone` hold ciphertext.
///
/// Only the registration repository reads these; everything else sees
/// [`Registration`].
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RegistrationRecord {
    pub id: Uuid,
    pub full_name: String,
    pub email: String,
    pub email_hash: String,
    pub phone: String,
    pub city_country: String,
    pub region: Region,
    pub program_level: ProgramLevel,
    pub mode: DeliveryMode,
    pub referral_source: Option<String>,
    pub referrer_name: Option<String>,
    pub assigned_instructor_id: Option<Uuid>,
    pub batch_id: Option<Uuid>,
    pub registered_by: Option<Uuid>,
    pub payment_status: PaymentStatus,
    pub payment_mode: Option<PaymentMode>,
    pub transaction_id: Option<String>,
    pub payment_date: Option<OffsetDateTime>,
    pub certificate_status: CertificateStatus,
    pub certificate_issued_at: Option<OffsetDateTime>,
    pub management_notes: Option<String>,
    pub manual_date: Option<Date>,
    pub registered_at: OffsetDateTime,
}

/// Decrypted view of a registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registration {
    pub id: Uuid,
    pub full_name: String,
    pub email: String,
    pub phone: String,
    pub city_country: String,
    pub region: Region,
    pub program_level: ProgramLevel,
    pub mode: DeliveryMode,
    pub referral_source: Option<String>,
    pub referrer_name: Option<String>,
    pub assigned_instructor_id: Option<Uuid>,
    pub batch_id: Option<Uuid>,
    pub registered_by: Option<Uuid>,
    pub payment_status: PaymentStatus,
    pub payment_mode: Option<PaymentMode>,
    pub transaction_id: Option<String>,
    pub payment_date: Option<OffsetDateTime>,
    pub certificate_status: CertificateStatus,
    pub certificate_issued_at: Option<OffsetDateTime>,
    pub management_notes: Option<String>,
    pub manual_date: Option<Date>,
    pub registered_at: OffsetDateTime,
}

impl Registration {
    /// City part of "City, Country", or `N/A`.
    pub fn city(&self) -> String {
        self.city_country
            .split(',')
            .next()
            .map(str::trim)
            .filter(|city| !city.is_empty())
            .unwrap_or("N/A")
            .to_string()
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewRegistration {
    #[validate(length(min = 1, message = "full name is required"))]
    pub full_name: String,
    #[validate(email(message = "a valid email is required"))]
    pub email: String,
    #[validate(length(min = 5, max = 32, message = "a valid phone number is required"))]
    pub phone: String,
    #[validate(length(min = 1, message = "city/country is required"))]
    pub city_country: String,
    #[serde(default)]
    pub region: Region,
    pub program_level: ProgramLevel,
    pub mode: DeliveryMode,
    pub referral_source: Option<String>,
    pub referrer_name: Option<String>,
    pub manual_date: Option<Date>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateRegistration {
    #[validate(length(min = 1))]
    pub full_name: Option<String>,
    #[validate(email)]
    pub email: Option<String>,
    #[validate(length(min = 5, max = 32))]
    pub phone: Option<String>,
    pub city_country: Option<String>,
    pub region: Option<Region>,
    pub mode: Option<DeliveryMode>,
    pub referrer_name: Option<String>,
    pub assigned_instructor_id: Option<Uuid>,
    pub manual_date: Option<Date>,
    pub management_notes: Option<String>,
}

impl UpdateRegistration {
    /// Names of the fields this edit sets, for the audit trail.
    pub fn changed_fields(&self) -> Vec<&'static str> {
        [
            ("full_name", self.full_name.is_some()),
            ("email", self.email.is_some()),
            ("phone", self.phone.is_some()),
            ("city_country", self.city_country.is_some()),
            ("region", self.region.is_some()),
            ("mode", self.mode.is_some()),
            ("referrer_name", self.referrer_name.is_some()),
            ("assigned_instructor_id", self.assigned_instructor_id.is_some()),
            ("manual_date", self.manual_date.is_some()),
            ("management_notes", self.management_notes.is_some()),
        ]
        .into_iter()
        .filter_map(|(name, set)| set.then_some(name))
        .collect()
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UpdatePayment {
    pub payment_status: PaymentStatus,
    pub payment_mode: Option<PaymentMode>,
    #[validate(length(max = 128))]
    pub transaction_id: Option<String>,
}

/// Column-level payment write.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentChange {
    pub payment_status: PaymentStatus,
    /// `None` keeps the stored mode.
    pub payment_mode: Option<PaymentMode>,
    /// `None` keeps the stored id, `Some(None)` clears it.
    pub transaction_id: Option<Option<String>>,
    pub paid_at: OffsetDateTime,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AssignInstructor {
    #[validate(length(min = 1, message = "at least one registration is required"))]
    pub registration_ids: Vec<Uuid>,
    pub instructor_id: Uuid,
}

/// Finance dashboard counts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentStatistics {
    pub total_registrations: usize,
    pub paid_registrations: usize,
    pub pending_payments: usize,
    /// Paid share in percent, two decimals.
    pub payment_rate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn certificate_status_moves() {
        use CertificateStatus::*;
        assert!(Pending.can_transition_to(Issued));
        assert!(Pending.can_transition_to(Rejected));
        assert!(Issued.can_transition_to(Revoked));
        assert!(!Issued.can_transition_to(Pending));
        assert!(!Rejected.can_transition_to(Issued));
        assert!(!Revoked.can_transition_to(Issued));
        assert!(!Revoked.can_transition_to(Pending));
    }

    #[test]
    fn changed_fields_names_only_set_fields() {
        let edit = UpdateRegistration {
            email: Some("new@example.com".to_string()),
            manual_date: Some(time::macros::date!(2025 - 08 - 15)),
            ..Default::default()
        };
        assert_eq!(edit.changed_fields(), vec!["email", "manual_date"]);
    }

    #[test]
    fn short_label_drops_program_name() {
        assert_eq!(ProgramLevel::Level3.short_label(), "Level 3");
    }
}
