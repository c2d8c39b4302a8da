use serde::{Deserialize, Serialize};
use sqlx::types::Uuid;
use time::{Date, OffsetDateTime};

use super::ProgramLevel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "attendance_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AttendanceStatus {
    Present,
    Absent,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize, Deserialize)]
pub struct Attendance {
    pub id: Uuid,
    pub registration_id: Uuid,
    pub instructor_id: Uuid,
    pub batch_id: Option<Uuid>,
    pub session_date: Date,
    pub status: AttendanceStatus,
    pub program_level: ProgramLevel,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// One mark to upsert, keyed by (registration, batch, date).
#[derive(Debug, Clone, PartialEq)]
pub struct AttendanceMark {
    pub registration_id: Uuid,
    pub batch_id: Uuid,
    pub session_date: Date,
    pub status: AttendanceStatus,
    pub instructor_id: Uuid,
    pub program_level: ProgramLevel,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarkAttendance {
    pub registration_id: Uuid,
    pub batch_id: Uuid,
    pub date: Date,
    pub status: AttendanceStatus,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AttendanceEntry {
    pub registration_id: Uuid,
    pub status: AttendanceStatus,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BulkMarkAttendance {
    pub batch_id: Uuid,
    pub date: Date,
    pub records: Vec<AttendanceEntry>,
}

/// Present/absent counts for one (registration, batch) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::FromRow, Serialize)]
pub struct AttendanceTally {
    pub registration_id: Uuid,
    pub batch_id: Option<Uuid>,
    pub present: i64,
    pub absent: i64,
}
