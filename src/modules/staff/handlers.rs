use axum::{extract::State, http::StatusCode, Json};
use serde_json::json;
use time::OffsetDateTime;
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use crate::app_state::AppState;
use crate::db::models::{Actor, AuditAction, NewStaffMember, StaffMember, StaffRole};
use crate::db::store::StaffStore;
use crate::error::{AppError, AppResult};
use crate::middleware::actor::require_role;

const ADMIN_ONLY: &[StaffRole] = &[];
const STAFF_READERS: &[StaffRole] = &[StaffRole::RegistrationAdmin, StaffRole::Management];

pub async fn create_staff(
    State(state): State<AppState>,
    actor: Actor,
    Json(payload): Json<NewStaffMember>,
) -> AppResult<(StatusCode, Json<StaffMember>)> {
    require_role(&actor, ADMIN_ONLY)?;
    payload.validate()?;

    let member = StaffMember {
        id: Uuid::now_v7(),
        full_name: payload.full_name.trim().to_string(),
        email: payload.email.trim().to_lowercase(),
        role: payload.role,
        created_at: OffsetDateTime::now_utc(),
    };
    let result = state.store.insert_staff(&member).await.map_err(AppError::from);
    state
        .audit
        .record(
            &actor,
            AuditAction::CreateStaff,
            "staff",
            member.id,
            json!({ "role": member.role }),
            &result,
        )
        .await;
    result?;
    info!(staff_id = %member.id, role = ?member.role, "Staff member created");

    Ok((StatusCode::CREATED, Json(member)))
}

/// Instructors only, for assignment pickers.
pub async fn list_instructors(
    State(state): State<AppState>,
    actor: Actor,
) -> AppResult<Json<Vec<StaffMember>>> {
    require_role(&actor, STAFF_READERS)?;
    let instructors = state
        .store
        .list_staff()
        .await?
        .into_iter()
        .filter(|member| member.role == StaffRole::Instructor)
        .collect();
    Ok(Json(instructors))
}

pub async fn list_staff(
    State(state): State<AppState>,
    actor: Actor,
) -> AppResult<Json<Vec<StaffMember>>> {
    require_role(&actor, STAFF_READERS)?;
    Ok(Json(state.store.list_staff().await?))
}
