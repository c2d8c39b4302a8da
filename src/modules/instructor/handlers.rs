use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::db::models::{
    Actor, Attendance, Batch, BatchCodeQuery, BatchOverview, BulkMarkAttendance, MarkAttendance,
    MoveStudent, NewBatch, NewRegistration, NewStudentNote, Registration, StaffRole, StudentNote,
    StudentNoteView,
};
use crate::db::repositories::{ensure_instructor_of, RosterEntry};
use crate::error::{AppError, AppResult};
use crate::middleware::actor::require_role;

const INSTRUCTORS: &[StaffRole] = &[StaffRole::Instructor];

#[derive(Debug, Deserialize)]
pub struct AttendanceQuery {
    pub batch_id: Option<Uuid>,
}

pub async fn register_student(
    State(state): State<AppState>,
    actor: Actor,
    Json(payload): Json<NewRegistration>,
) -> AppResult<(StatusCode, Json<Registration>)> {
    require_role(&actor, INSTRUCTORS)?;
    let registration = state.registrations.create(payload, Some(actor.id)).await?;
    Ok((StatusCode::CREATED, Json(registration)))
}

pub async fn my_students(
    State(state): State<AppState>,
    actor: Actor,
) -> AppResult<Json<Vec<Registration>>> {
    require_role(&actor, INSTRUCTORS)?;
    Ok(Json(state.registrations.list_for_instructor(actor.id).await?))
}

pub async fn student_attendance(
    State(state): State<AppState>,
    actor: Actor,
    Path(registration_id): Path<Uuid>,
    Query(query): Query<AttendanceQuery>,
) -> AppResult<Json<Vec<Attendance>>> {
    require_role(&actor, INSTRUCTORS)?;
    let registration = state.registrations.get(registration_id).await?;
    ensure_instructor_of(
        &actor,
        registration.assigned_instructor_id,
        registration.registered_by,
    )?;

    let records = state
        .attendance
        .attendance_for(registration_id, query.batch_id)
        .await?;
    Ok(Json(records))
}

pub async fn create_batch(
    State(state): State<AppState>,
    actor: Actor,
    Json(payload): Json<NewBatch>,
) -> AppResult<(StatusCode, Json<Batch>)> {
    require_role(&actor, INSTRUCTORS)?;
    let batch = state.batches.create(&actor, payload).await?;
    Ok((StatusCode::CREATED, Json(batch)))
}

pub async fn preview_batch_code(
    State(state): State<AppState>,
    actor: Actor,
    Query(query): Query<BatchCodeQuery>,
) -> AppResult<Json<Value>> {
    require_role(&actor, INSTRUCTORS)?;
    let code = state.batches.preview_code(&actor, query).await?;
    Ok(Json(json!({ "batch_code": code })))
}

pub async fn my_batches(
    State(state): State<AppState>,
    actor: Actor,
) -> AppResult<Json<Vec<BatchOverview>>> {
    require_role(&actor, INSTRUCTORS)?;
    Ok(Json(state.batches.list_for_instructor(actor.id).await?))
}

pub async fn batch_roster(
    State(state): State<AppState>,
    actor: Actor,
    Path(batch_id): Path<Uuid>,
) -> AppResult<Json<Vec<RosterEntry>>> {
    require_role(&actor, INSTRUCTORS)?;
    let batch = state.batches.get(batch_id).await?;
    if !actor.is_admin() && batch.instructor_id != actor.id {
        return Err(AppError::Authorization(
            "You can only view your own batches".to_string(),
        ));
    }
    Ok(Json(state.batches.roster(batch_id).await?))
}

pub async fn move_student(
    State(state): State<AppState>,
    actor: Actor,
    Json(payload): Json<MoveStudent>,
) -> AppResult<Json<Registration>> {
    require_role(&actor, INSTRUCTORS)?;
    Ok(Json(state.batches.move_student(&actor, payload).await?))
}

pub async fn mark_attendance(
    State(state): State<AppState>,
    actor: Actor,
    Json(payload): Json<MarkAttendance>,
) -> AppResult<Json<Attendance>> {
    require_role(&actor, INSTRUCTORS)?;
    Ok(Json(state.attendance.mark_one(&actor, payload).await?))
}

pub async fn bulk_mark_attendance(
    State(state): State<AppState>,
    actor: Actor,
    Json(payload): Json<BulkMarkAttendance>,
) -> AppResult<Json<Vec<Attendance>>> {
    require_role(&actor, INSTRUCTORS)?;
    Ok(Json(state.attendance.mark_bulk(&actor, payload).await?))
}

pub async fn add_note(
    State(state): State<AppState>,
    actor: Actor,
    Json(payload): Json<NewStudentNote>,
) -> AppResult<(StatusCode, Json<StudentNote>)> {
    require_role(&actor, INSTRUCTORS)?;
    let note = state.notes.add(&actor, payload).await?;
    Ok((StatusCode::CREATED, Json(note)))
}

pub async fn student_notes(
    State(state): State<AppState>,
    actor: Actor,
    Path(registration_id): Path<Uuid>,
) -> AppResult<Json<Vec<StudentNoteView>>> {
    require_role(&actor, INSTRUCTORS)?;
    Ok(Json(state.notes.list(&actor, registration_id).await?))
}
