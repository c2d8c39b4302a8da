use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::db::models::{
    Actor, AssignInstructor, AuditAction, AuditFilter, AuditPage, NewRegistration, Registration,
    StaffRole, UpdateRegistration,
};
use crate::error::AppResult;
use crate::middleware::actor::require_role;

const REGISTRATION_ADMINS: &[StaffRole] = &[StaffRole::RegistrationAdmin];
const ADMIN_ONLY: &[StaffRole] = &[];

/// Public self-registration.
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<NewRegistration>,
) -> AppResult<(StatusCode, Json<Registration>)> {
    let registration = state.registrations.create(payload, None).await?;
    Ok((StatusCode::CREATED, Json(registration)))
}

pub async fn list_registrations(
    State(state): State<AppState>,
    actor: Actor,
) -> AppResult<Json<Vec<Registration>>> {
    require_role(&actor, REGISTRATION_ADMINS)?;
    Ok(Json(state.registrations.list().await?))
}

pub async fn get_registration(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Registration>> {
    require_role(&actor, REGISTRATION_ADMINS)?;
    Ok(Json(state.registrations.get(id).await?))
}

pub async fn update_registration(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateRegistration>,
) -> AppResult<Json<Registration>> {
    require_role(&actor, REGISTRATION_ADMINS)?;
    let details = json!({ "fields": payload.changed_fields() });
    let result = state.registrations.update(id, payload).await;

    state
        .audit
        .record(&actor, AuditAction::UpdateRegistration, "registration", id, details, &result)
        .await;
    Ok(Json(result?))
}

pub async fn delete_registration(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    require_role(&actor, ADMIN_ONLY)?;
    let result = state.registrations.delete(id).await;

    state
        .audit
        .record(&actor, AuditAction::DeleteRegistration, "registration", id, Value::Null, &result)
        .await;
    result?;
    Ok(Json(json!({ "deleted": id })))
}

pub async fn assign_instructor(
    State(state): State<AppState>,
    actor: Actor,
    Json(payload): Json<AssignInstructor>,
) -> AppResult<Json<Value>> {
    require_role(&actor, REGISTRATION_ADMINS)?;
    let instructor_id = payload.instructor_id;
    let details = json!({ "registration_ids": payload.registration_ids });
    let result = state.registrations.assign_instructor(payload).await;

    state
        .audit
        .record(&actor, AuditAction::AssignInstructor, "staff", instructor_id, details, &result)
        .await;
    Ok(Json(json!({ "updated": result? })))
}

pub async fn audit_logs(
    State(state): State<AppState>,
    actor: Actor,
    Query(filter): Query<AuditFilter>,
) -> AppResult<Json<AuditPage>> {
    require_role(&actor, REGISTRATION_ADMINS)?;
    Ok(Json(state.audit.list(&filter).await?))
}
