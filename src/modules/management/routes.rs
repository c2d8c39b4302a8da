use axum::{
    routing::{get, post},
    Router,
};

use super::handlers::{
    activate_template, approve_certificate, batch_certificates_zip, batch_students,
    create_template, eligible_registrations, issued_certificates, list_batches, list_templates,
    registrations_status, reject_certificate, resend_certificate, revoke_certificate,
    statistics,
};
use crate::app_state::AppState;

pub fn management_routes() -> Router<AppState> {
    Router::new()
        .route("/registrations", get(registrations_status))
        .route("/eligible", get(eligible_registrations))
        .route("/certificates", get(issued_certificates))
        .route("/certificates/approve", post(approve_certificate))
        .route("/certificates/reject", post(reject_certificate))
        .route("/certificates/revoke", post(revoke_certificate))
        .route("/certificates/resend", post(resend_certificate))
        .route("/statistics", get(statistics))
        .route("/batches", get(list_batches))
        .route("/batches/{id}/students", get(batch_students))
        .route("/batches/{id}/certificates-zip", get(batch_certificates_zip))
        .route("/templates", get(list_templates).post(create_template))
        .route("/templates/activate", post(activate_template))
}
