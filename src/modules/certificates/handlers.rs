use axum::{
    extract::{Path, State},
    Json,
};

use crate::app_state::AppState;
use crate::db::models::CertificateVerification;
use crate::error::AppResult;

/// Public lookup by certificate number.
pub async fn verify_certificate(
    State(state): State<AppState>,
    Path(number): Path<String>,
) -> AppResult<Json<CertificateVerification>> {
    Ok(Json(state.certification.verify(&number).await?))
}
