use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::certification::{CertificationStatistics, EligibleRegistration};
use crate::db::models::{
    ActivateTemplate, Actor, ApproveCertificate, AuditAction, BatchOverview, Certificate,
    CertificateTemplate, IssuedCertificate, NewCertificateTemplate, Registration,
    RejectCertificate, ResendCertificate, RevokeCertificate, StaffRole,
};
use crate::error::AppResult;
use crate::middleware::actor::require_role;

const MANAGEMENT: &[StaffRole] = &[StaffRole::Management];

pub async fn registrations_status(
    State(state): State<AppState>,
    actor: Actor,
) -> AppResult<Json<Vec<Registration>>> {
    require_role(&actor, MANAGEMENT)?;
    Ok(Json(state.registrations.list().await?))
}

pub async fn eligible_registrations(
    State(state): State<AppState>,
    actor: Actor,
) -> AppResult<Json<Vec<EligibleRegistration>>> {
    require_role(&actor, MANAGEMENT)?;
    Ok(Json(state.certification.eligible_registrations().await?))
}

pub async fn issued_certificates(
    State(state): State<AppState>,
    actor: Actor,
) -> AppResult<Json<Vec<IssuedCertificate>>> {
    require_role(&actor, MANAGEMENT)?;
    Ok(Json(state.certification.issued_certificates().await?))
}

pub async fn approve_certificate(
    State(state): State<AppState>,
    actor: Actor,
    Json(payload): Json<ApproveCertificate>,
) -> AppResult<Json<Certificate>> {
    require_role(&actor, MANAGEMENT)?;
    let registration_id = payload.registration_id;
    let details = json!({ "batch_id": payload.batch_id });
    let result = state.certification.approve(&actor, payload).await;

    let details = match &result {
        Ok(certificate) => json!({ "certificate_number": certificate.certificate_number }),
        Err(_) => details,
    };
    state
        .audit
        .record(
            &actor,
            AuditAction::ApproveCertificate,
            "registration",
            registration_id,
            details,
            &result,
        )
        .await;
    Ok(Json(result?))
}

pub async fn reject_certificate(
    State(state): State<AppState>,
    actor: Actor,
    Json(payload): Json<RejectCertificate>,
) -> AppResult<Json<Registration>> {
    require_role(&actor, MANAGEMENT)?;
    let registration_id = payload.registration_id;
    let details = json!({ "notes": payload.notes });
    let result = state.certification.reject(&actor, payload).await;

    state
        .audit
        .record(
            &actor,
            AuditAction::RejectCertificate,
            "registration",
            registration_id,
            details,
            &result,
        )
        .await;
    Ok(Json(result?))
}

pub async fn revoke_certificate(
    State(state): State<AppState>,
    actor: Actor,
    Json(payload): Json<RevokeCertificate>,
) -> AppResult<Json<Registration>> {
    require_role(&actor, MANAGEMENT)?;
    Ok(Json(state.certification.revoke(&actor, payload).await?))
}

pub async fn resend_certificate(
    State(state): State<AppState>,
    actor: Actor,
    Json(payload): Json<ResendCertificate>,
) -> AppResult<Json<Certificate>> {
    require_role(&actor, MANAGEMENT)?;
    Ok(Json(
        state
            .certification
            .resend_notification(payload.certificate_id)
            .await?,
    ))
}

pub async fn statistics(
    State(state): State<AppState>,
    actor: Actor,
) -> AppResult<Json<CertificationStatistics>> {
    require_role(&actor, MANAGEMENT)?;
    Ok(Json(state.certification.statistics().await?))
}

pub async fn list_batches(
    State(state): State<AppState>,
    actor: Actor,
) -> AppResult<Json<Vec<BatchOverview>>> {
    require_role(&actor, MANAGEMENT)?;
    Ok(Json(state.batches.list().await?))
}

pub async fn batch_students(
    State(state): State<AppState>,
    actor: Actor,
    Path(batch_id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    require_role(&actor, MANAGEMENT)?;
    let batch = state.batches.get(batch_id).await?;
    let students = state.batches.roster(batch_id).await?;
    Ok(Json(json!({ "batch": batch, "students": students })))
}

pub async fn batch_certificates_zip(
    State(state): State<AppState>,
    actor: Actor,
    Path(batch_id): Path<Uuid>,
) -> AppResult<Response> {
    require_role(&actor, MANAGEMENT)?;
    let archive = state.certification.batch_archive(batch_id).await?;

    let disposition = format!("attachment; filename=\"{}\"", archive.file_name);
    Ok((
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        archive.bytes,
    )
        .into_response())
}

pub async fn list_templates(
    State(state): State<AppState>,
    actor: Actor,
) -> AppResult<Json<Vec<CertificateTemplate>>> {
    require_role(&actor, MANAGEMENT)?;
    Ok(Json(state.templates.list().await?))
}

pub async fn create_template(
    State(state): State<AppState>,
    actor: Actor,
    Json(payload): Json<NewCertificateTemplate>,
) -> AppResult<(StatusCode, Json<CertificateTemplate>)> {
    require_role(&actor, MANAGEMENT)?;
    let details = json!({ "name": payload.name, "activate": payload.activate });
    let result = state.templates.create(&actor, payload).await;

    let resource_id = result.as_ref().map(|t| t.id.to_string()).unwrap_or_default();
    state
        .audit
        .record(
            &actor,
            AuditAction::CreateTemplate,
            "certificate_template",
            resource_id,
            details,
            &result,
        )
        .await;
    Ok((StatusCode::CREATED, Json(result?)))
}

pub async fn activate_template(
    State(state): State<AppState>,
    actor: Actor,
    Json(payload): Json<ActivateTemplate>,
) -> AppResult<Json<CertificateTemplate>> {
    require_role(&actor, MANAGEMENT)?;
    let result = state.templates.activate(payload.template_id).await;

    state
        .audit
        .record(
            &actor,
            AuditAction::ActivateTemplate,
            "certificate_template",
            payload.template_id,
            Value::Null,
            &result,
        )
        .await;
    Ok(Json(result?))
}
