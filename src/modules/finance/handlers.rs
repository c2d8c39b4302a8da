use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use serde_json::json;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::db::models::{
    Actor, AuditAction, PaymentMode, PaymentStatistics, PaymentStatus, ProgramLevel,
    Registration, StaffRole, UpdatePayment,
};
use crate::error::AppResult;
use crate::middleware::actor::require_role;

const FINANCE: &[StaffRole] = &[StaffRole::Finance];

/// Payment view of a registration.
#[derive(Debug, Serialize)]
pub struct PaymentOverview {
    pub registration_id: Uuid,
    pub full_name: String,
    pub email: String,
    pub program_level: ProgramLevel,
    pub payment_status: PaymentStatus,
    pub payment_mode: Option<PaymentMode>,
    pub transaction_id: Option<String>,
    pub payment_date: Option<OffsetDateTime>,
}

impl From<Registration> for PaymentOverview {
    fn from(r: Registration) -> Self {
        Self {
            registration_id: r.id,
            full_name: r.full_name,
            email: r.email,
            program_level: r.program_level,
            payment_status: r.payment_status,
            payment_mode: r.payment_mode,
            transaction_id: r.transaction_id,
            payment_date: r.payment_date,
        }
    }
}

pub async fn list_payments(
    State(state): State<AppState>,
    actor: Actor,
) -> AppResult<Json<Vec<PaymentOverview>>> {
    require_role(&actor, FINANCE)?;
    let payments = state
        .registrations
        .list()
        .await?
        .into_iter()
        .map(PaymentOverview::from)
        .collect();
    Ok(Json(payments))
}

pub async fn update_payment(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdatePayment>,
) -> AppResult<Json<PaymentOverview>> {
    require_role(&actor, FINANCE)?;
    let details = json!({
        "payment_status": payload.payment_status,
        "payment_mode": payload.payment_mode,
        "transaction_id": payload.transaction_id,
    });
    let result = state.registrations.update_payment(id, payload).await;

    state
        .audit
        .record(&actor, AuditAction::UpdatePayment, "registration", id, details, &result)
        .await;
    Ok(Json(result?.into()))
}

pub async fn payment_statistics(
    State(state): State<AppState>,
    actor: Actor,
) -> AppResult<Json<PaymentStatistics>> {
    require_role(&actor, FINANCE)?;
    Ok(Json(state.registrations.payment_statistics().await?))
}
