use serde::{Deserialize, Serialize};
use sqlx::types::Uuid;
use time::OffsetDateTime;
use validator::Validate;

/// Free-text instructor note on a student.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize, Deserialize)]
pub struct StudentNote {
    pub id: Uuid,
    pub registration_id: Uuid,
    pub instructor_id: Uuid,
    pub note: String,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewStudentNote {
    pub registration_id: Uuid,
    #[validate(length(min = 1, max = 4000, message = "note must be 1 to 4000 characters"))]
    pub note: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StudentNoteView {
    #[serde(flatten)]
    pub note: StudentNote,
    pub instructor_name: Option<String>,
}
