use serde::{Deserialize, Serialize};
use sqlx::types::Uuid;
use time::{Date, OffsetDateTime};
use validator::Validate;

use super::{DeliveryMode, ProgramLevel};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "batch_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    #[default]
    Upcoming,
    Active,
    Completed,
}

pub const DEFAULT_MAX_STUDENTS: i32 = 30;

#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize, Deserialize)]
pub struct Batch {
    pub id: Uuid,
    pub batch_code: String,
    pub program_level: ProgramLevel,
    pub instructor_id: Uuid,
    pub start_date: Date,
    pub end_date: Option<Date>,
    pub mode: DeliveryMode,
    pub max_students: i32,
    pub current_students: i32,
    pub status: BatchStatus,
    pub total_sessions: i32,
    pub created_by: Option<Uuid>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewBatch {
    pub program_level: ProgramLevel,
    pub start_date: Date,
    pub end_date: Option<Date>,
    pub mode: Option<DeliveryMode>,
    #[validate(range(min = 1, max = 500))]
    pub max_students: Option<i32>,
    #[validate(range(min = 0, max = 365))]
    pub total_sessions: Option<i32>,
    #[serde(default)]
    pub student_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchCodeQuery {
    pub program_level: ProgramLevel,
    pub start_date: Date,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MoveStudent {
    pub registration_id: Uuid,
    pub target_batch_id: Uuid,
}

/// Batch listing row with its live student count.
#[derive(Debug, Clone, Serialize)]
pub struct BatchOverview {
    #[serde(flatten)]
    pub batch: Batch,
    pub instructor_name: Option<String>,
    pub student_count: usize,
}
