use serde::{Deserialize, Serialize};
use sqlx::types::Uuid;
use time::OffsetDateTime;
use validator::{Validate, ValidationError};

/// Placeholder every uploaded layout must print.
pub const CERTIFICATE_NUMBER_PLACEHOLDER: &str = "{{certificate_number}}";

/// Management-uploaded HTML layout for certificates. At most one is active.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize, Deserialize)]
pub struct CertificateTemplate {
    pub id: Uuid,
    pub name: String,
    pub html_content: String,
    pub is_active: bool,
    pub created_by: Option<Uuid>,
    pub created_at: OffsetDateTime,
}

fn prints_certificate_number(html: &str) -> Result<(), ValidationError> {
    if html.contains(CERTIFICATE_NUMBER_PLACEHOLDER) {
        Ok(())
    } else {
        Err(ValidationError::new("missing_certificate_number")
            .with_message("template must contain {{certificate_number}}".into()))
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewCertificateTemplate {
    #[validate(length(min = 1, max = 120))]
    pub name: String,
    #[validate(custom(function = "prints_certificate_number"))]
    pub html_content: String,
    #[serde(default)]
    pub activate: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActivateTemplate {
    pub template_id: Uuid,
}
