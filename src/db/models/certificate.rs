use serde::{Deserialize, Serialize};
use sqlx::types::Uuid;
use time::OffsetDateTime;

use super::ProgramLevel;

/// Email delivery outcome, the only mutable part of a certificate.
#[derive(Debug, Clone, Default, PartialEq, sqlx::FromRow, Serialize, Deserialize)]
pub struct DeliveryStatus {
    pub email_sent: bool,
    pub email_sent_at: Option<OffsetDateTime>,
    pub email_recipient: Option<String>,
    pub email_error: Option<String>,
}

impl DeliveryStatus {
    pub fn sent(recipient: &str, at: OffsetDateTime) -> Self {
        Self {
            email_sent: true,
            email_sent_at: Some(at),
            email_recipient: Some(recipient.to_string()),
            email_error: None,
        }
    }

    pub fn failed(recipient: &str, error: impl Into<String>) -> Self {
        Self {
            email_sent: false,
            email_sent_at: None,
            email_recipient: Some(recipient.to_string()),
            email_error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize, Deserialize)]
pub struct Certificate {
    pub id: Uuid,
    pub registration_id: Uuid,
    pub certificate_number: String,
    pub program_level: ProgramLevel,
    pub issue_date: OffsetDateTime,
    pub certificate_url: String,
    pub digital_signature_hash: Option<String>,
    pub approved_by: Uuid,
    pub validation_url: String,
    #[sqlx(flatten)]
    pub delivery: DeliveryStatus,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApproveCertificate {
    pub registration_id: Uuid,
    pub batch_id: Option<Uuid>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RejectCertificate {
    pub registration_id: Uuid,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RevokeCertificate {
    pub certificate_id: Uuid,
    pub reason: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResendCertificate {
    pub certificate_id: Uuid,
}

/// Issued certificate with the holder's name, for management listings.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedCertificate {
    #[serde(flatten)]
    pub certificate: Certificate,
    pub student_name: Option<String>,
    pub student_email: Option<String>,
}

/// Public verification payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateVerification {
    pub certificate_number: String,
    pub student_name: String,
    pub program_level: ProgramLevel,
    pub issue_date: OffsetDateTime,
    pub approved_by: String,
    pub digital_signature: Option<String>,
    pub validation_url: String,
    pub is_valid: bool,
}
