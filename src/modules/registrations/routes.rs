use axum::{
    routing::{get, post},
    Router,
};

use super::handlers::{
    assign_instructor, audit_logs, delete_registration, get_registration, list_registrations,
    register, update_registration,
};
use crate::app_state::AppState;

/// Public intake.
pub fn public_registration_routes() -> Router<AppState> {
    Router::new().route("/registrations", post(register))
}

pub fn registration_admin_routes() -> Router<AppState> {
    Router::new()
        .route("/registrations", get(list_registrations))
        .route(
            "/registrations/{id}",
            get(get_registration)
                .put(update_registration)
                .delete(delete_registration),
        )
        .route("/registrations/assign-instructor", post(assign_instructor))
        .route("/audit-logs", get(audit_logs))
}
