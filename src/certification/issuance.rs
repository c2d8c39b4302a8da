use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::sync::Arc;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretBox};
use serde::Serialize;
use sha2::{Digest, Sha256};
use time::macros::format_description;
use serde_json::json;
use time::{Date, OffsetDateTime};
use tracing::{debug, info, warn};
use uuid::Uuid;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::eligibility::{self, IneligibleReason};
use super::locks::SequenceLocks;
use super::notifier::{NotificationMetadata, Notifier};
use super::numbering;
use super::renderer::{ArtifactLocation, ArtifactRenderer, CertificateArtifact};
use crate::audit::AuditTrail;
use crate::db::models::{
    Actor, ApproveCertificate, AuditAction, AuditStatus, Certificate, CertificateStatus,
    CertificateVerification, DeliveryStatus, IssuedCertificate, PaymentStatus, ProgramLevel,
    RejectCertificate, Registration, RevokeCertificate,
};
use crate::db::repositories::RegistrationRepository;
use crate::db::store::{
    BatchStore, CertificateStore, RegistrationStore, StaffStore, Store, TemplateStore,
    CERTIFICATE_HOLDER_KEY, CERTIFICATE_NUMBER_KEY,
};
use crate::db::DatabaseError;
use crate::error::{AppError, AppResult};

/// Attempts at a fresh sequence after another writer took the number.
pub const MAX_NUMBER_ATTEMPTS: usize = 5;

pub const DEFAULT_TRAINER_NAME: &str = "Certified Trainer";

pub struct IssuanceSettings {
    /// Base of the public verification page, e.g. `https://portal.example`.
    pub client_url: String,
    pub render_timeout: Duration,
    pub notify_timeout: Duration,
    pub signature_secret: Option<SecretBox<String>>,
}

impl IssuanceSettings {
    pub fn verification_url(&self, certificate_number: &str) -> String {
        format!(
            "{}/verify-certificate/{}",
            self.client_url.trim_end_matches('/'),
            certificate_number
        )
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CertificationStatistics {
    pub total_registrations: usize,
    pub paid_registrations: usize,
    pub certificates_issued: usize,
    pub pending_approvals: usize,
    /// Certificates per registration, in percent, two decimals.
    pub issuance_rate: f64,
}

/// Zipped certificate files of one batch.
#[derive(Debug, Clone)]
pub struct BatchArchive {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

#[derive(Serialize)]
struct SignedFields<'a> {
    certificate_number: &'a str,
    registration_id: Uuid,
    student_name: &'a str,
    program_level: ProgramLevel,
    issue_date: i64,
    approved_by: Uuid,
}

/// Drives approval, rejection and revocation of certificates.
pub struct CertificationService {
    store: Arc<dyn Store>,
    registrations: RegistrationRepository,
    renderer: Arc<dyn ArtifactRenderer>,
    notifier: Arc<dyn Notifier>,
    locks: Arc<SequenceLocks>,
    settings: IssuanceSettings,
}

fn date_label(date: Date) -> String {
    date.format(format_description!("[day] [month repr:long] [year]"))
        .unwrap_or_else(|_| date.to_string())
}

impl CertificationService {
    pub fn new(
        store: Arc<dyn Store>,
        registrations: RegistrationRepository,
        renderer: Arc<dyn ArtifactRenderer>,
        notifier: Arc<dyn Notifier>,
        locks: Arc<SequenceLocks>,
        settings: IssuanceSettings,
    ) -> Self {
        Self {
            store,
            registrations,
            renderer,
            notifier,
            locks,
            settings,
        }
    }

    /// Renders, numbers and stores a certificate. The registration must
    /// still be pending when the certificate is written; a reject or revoke
    /// that lands while rendering wins and this returns `Conflict`.
    pub async fn approve(&self, actor: &Actor, request: ApproveCertificate) -> AppResult<Certificate> {
        let registration = self.registrations.get(request.registration_id).await?;

        let batch = match request.batch_id {
            Some(batch_id) => Some(
                self.store
                    .get_batch(batch_id)
                    .await?
                    .ok_or_else(|| AppError::not_found("Batch"))?,
            ),
            None => None,
        };
        let program_level = batch
            .as_ref()
            .map(|b| b.program_level)
            .unwrap_or(registration.program_level);

        if registration.payment_status != PaymentStatus::Paid {
            return Err(AppError::Eligibility(IneligibleReason::NotPaid));
        }

        let decision = eligibility::check_registration(
            self.store.as_ref(),
            &registration,
            program_level,
            request.batch_id,
        )
        .await?;
        match decision {
            Ok(()) => {}
            Err(IneligibleReason::AlreadyIssued) => {
                return Err(AppError::Conflict(IneligibleReason::AlreadyIssued.to_string()))
            }
            Err(reason) => return Err(AppError::Eligibility(reason)),
        }

        if registration.certificate_status != CertificateStatus::Pending {
            return Err(AppError::Conflict(format!(
                "Registration certificate status is {:?}",
                registration.certificate_status
            )));
        }

        let trainer_name = self.trainer_name(&registration).await?;
        let issue_day = registration
            .manual_date
            .unwrap_or_else(|| OffsetDateTime::now_utc().date());
        let prefix =
            numbering::certificate_prefix(program_level, &trainer_name, issue_day, registration.mode);

        let guard = self.locks.lock(&prefix).await;
        let mut certificate = self
            .issue_under_lock(
                actor,
                &registration,
                program_level,
                &prefix,
                &trainer_name,
                issue_day,
                request.notes,
            )
            .await?;
        drop(guard);

        info!(
            certificate_number = %certificate.certificate_number,
            registration_id = %registration.id,
            approved_by = %actor.id,
            "Certificate issued"
        );

        let location = ArtifactLocation {
            file_name: file_name_from_url(&certificate.certificate_url),
            url: certificate.certificate_url.clone(),
        };
        certificate.delivery = self
            .deliver(&certificate, &registration, &location)
            .await;

        Ok(certificate)
    }

    #[allow(clippy::too_many_arguments)]
    async fn issue_under_lock(
        &self,
        actor: &Actor,
        registration: &Registration,
        program_level: ProgramLevel,
        prefix: &str,
        trainer_name: &str,
        issue_day: Date,
        notes: Option<String>,
    ) -> AppResult<Certificate> {
        let layout_html = self.store.active_template().await?.map(|t| t.html_content);

        for attempt in 1..=MAX_NUMBER_ATTEMPTS {
            if self
                .store
                .find_certificate_for(registration.id, program_level)
                .await?
                .is_some()
            {
                return Err(AppError::Conflict(IneligibleReason::AlreadyIssued.to_string()));
            }

            // Revocations leave gaps, so the counted position may already be held.
            let mut sequence = self.store.count_certificates_with_prefix(prefix).await?;
            let mut certificate_number = numbering::certificate_number(prefix, sequence);
            while self
                .store
                .find_certificate_by_number(&certificate_number)
                .await?
                .is_some()
            {
                debug!(%certificate_number, "Certificate number already held, skipping");
                sequence += 1;
                certificate_number = numbering::certificate_number(prefix, sequence);
            }
            let validation_url = self.settings.verification_url(&certificate_number);

            let artifact = CertificateArtifact {
                student_name: registration.full_name.clone(),
                program_label: program_level.short_label().to_string(),
                date_label: date_label(issue_day),
                city: registration.city(),
                trainer_name: trainer_name.to_string(),
                certificate_number: certificate_number.clone(),
                verification_url: validation_url.clone(),
                layout_html: layout_html.clone(),
            };
            let location = self.render(&artifact).await?;

            let now = OffsetDateTime::now_utc();
            let mut certificate = Certificate {
                id: Uuid::now_v7(),
                registration_id: registration.id,
                certificate_number,
                program_level,
                // Same day as the number and the printed date.
                issue_date: now.replace_date(issue_day),
                certificate_url: location.url,
                digital_signature_hash: None,
                approved_by: actor.id,
                validation_url,
                delivery: DeliveryStatus::default(),
                created_at: now,
            };
            certificate.digital_signature_hash = self.sign(&certificate, &registration.full_name);

            match self
                .store
                .issue_certificate(&certificate, notes.as_deref())
                .await
            {
                Ok(_) => return Ok(certificate),
                Err(e) if e.is_duplicate_of(CERTIFICATE_NUMBER_KEY) => {
                    warn!(
                        certificate_number = %certificate.certificate_number,
                        attempt,
                        "Certificate number taken by another writer, retrying"
                    );
                }
                Err(e) if e.is_duplicate_of(CERTIFICATE_HOLDER_KEY) => {
                    return Err(AppError::Conflict(IneligibleReason::AlreadyIssued.to_string()));
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(AppError::Conflict(format!(
            "Could not allocate a certificate number for prefix {} after {} attempts",
            prefix, MAX_NUMBER_ATTEMPTS
        )))
    }

    async fn render(&self, artifact: &CertificateArtifact) -> AppResult<ArtifactLocation> {
        match tokio::time::timeout(self.settings.render_timeout, self.renderer.render(artifact)).await {
            Ok(Ok(location)) => Ok(location),
            Ok(Err(e)) => Err(AppError::ExternalService(format!(
                "Certificate rendering failed: {}",
                e
            ))),
            Err(_) => Err(AppError::ExternalService(
                "Certificate rendering timed out".to_string(),
            )),
        }
    }

    /// Best effort. The outcome is stored on the certificate and returned.
    async fn deliver(
        &self,
        certificate: &Certificate,
        registration: &Registration,
        location: &ArtifactLocation,
    ) -> DeliveryStatus {
        let metadata = NotificationMetadata {
            student_name: registration.full_name.clone(),
            certificate_number: certificate.certificate_number.clone(),
            program_label: certificate.program_level.short_label().to_string(),
            verification_url: certificate.validation_url.clone(),
        };

        let outcome = tokio::time::timeout(
            self.settings.notify_timeout,
            self.notifier.notify(&registration.email, location, &metadata),
        )
        .await;

        let delivery = match outcome {
            Ok(Ok(receipt)) => DeliveryStatus::sent(&receipt.recipient, receipt.delivered_at),
            Ok(Err(e)) => {
                warn!(
                    certificate_number = %certificate.certificate_number,
                    error = %e,
                    "Certificate notification failed"
                );
                DeliveryStatus::failed(&registration.email, e.to_string())
            }
            Err(_) => {
                warn!(
                    certificate_number = %certificate.certificate_number,
                    "Certificate notification timed out"
                );
                DeliveryStatus::failed(&registration.email, "notification timed out")
            }
        };

        if let Err(e) = self
            .store
            .update_delivery_status(certificate.id, &delivery)
            .await
        {
            warn!(
                certificate_number = %certificate.certificate_number,
                error = %e,
                "Failed to record notification outcome"
            );
        }

        delivery
    }

    fn sign(&self, certificate: &Certificate, student_name: &str) -> Option<String> {
        let secret = self.settings.signature_secret.as_ref()?;
        let fields = SignedFields {
            certificate_number: &certificate.certificate_number,
            registration_id: certificate.registration_id,
            student_name,
            program_level: certificate.program_level,
            issue_date: certificate.issue_date.unix_timestamp(),
            approved_by: certificate.approved_by,
        };
        let canonical = serde_json::to_string(&fields).ok()?;

        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        hasher.update(secret.expose_secret().as_bytes());
        Some(hex::encode(hasher.finalize()))
    }

    async fn trainer_name(&self, registration: &Registration) -> AppResult<String> {
        if let Some(instructor_id) = registration.assigned_instructor_id {
            if let Some(instructor) = self.store.get_staff(instructor_id).await? {
                return Ok(instructor.full_name);
            }
        }
        Ok(registration
            .referrer_name
            .clone()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_TRAINER_NAME.to_string()))
    }

    pub async fn reject(&self, actor: &Actor, request: RejectCertificate) -> AppResult<Registration> {
        let record = self.registrations.get_record(request.registration_id).await?;
        if !record
            .certificate_status
            .can_transition_to(CertificateStatus::Rejected)
        {
            return Err(AppError::Conflict(format!(
                "Cannot reject a registration whose certificate status is {:?}",
                record.certificate_status
            )));
        }

        let rejected = self
            .store
            .reject_certificate(record.id, request.notes.as_deref())
            .await?;

        info!(registration_id = %record.id, rejected_by = %actor.id, "Certificate rejected");
        Ok(self.registrations.hydrate(&rejected))
    }

    /// Deletes the certificate, marks the registration revoked and appends
    /// the revocation to the audit trail, all or nothing.
    pub async fn revoke(&self, actor: &Actor, request: RevokeCertificate) -> AppResult<Registration> {
        let reason = request.reason.trim();
        if reason.is_empty() {
            return Err(AppError::Validation("A revocation reason is required".to_string()));
        }

        let certificate = self
            .store
            .get_certificate(request.certificate_id)
            .await?
            .ok_or_else(|| AppError::not_found("Certificate"))?;
        let record = self
            .registrations
            .get_record(certificate.registration_id)
            .await?;

        if !record
            .certificate_status
            .can_transition_to(CertificateStatus::Revoked)
        {
            return Err(AppError::Conflict(format!(
                "Cannot revoke a certificate whose registration status is {:?}",
                record.certificate_status
            )));
        }

        let trail = AuditTrail::entry(
            actor,
            AuditAction::RevokeCertificate,
            "certificate",
            Some(certificate.id.to_string()),
            json!({
                "certificate_number": certificate.certificate_number,
                "registration_id": record.id,
                "reason": reason,
            }),
            AuditStatus::Success,
        );
        let revoked = self
            .store
            .revoke_certificate(certificate.id, &format!("Revoked: {}", reason), &trail)
            .await?;

        info!(
            certificate_number = %certificate.certificate_number,
            registration_id = %record.id,
            revoked_by = %actor.id,
            reason,
            "Certificate revoked"
        );
        Ok(self.registrations.hydrate(&revoked))
    }

    /// Every stored certificate file of the batch's students in one ZIP.
    /// Files the renderer no longer has are skipped.
    pub async fn batch_archive(&self, batch_id: Uuid) -> AppResult<BatchArchive> {
        let batch = self
            .store
            .get_batch(batch_id)
            .await?
            .ok_or_else(|| AppError::not_found("Batch"))?;

        let students: Vec<Uuid> = self
            .store
            .list_registrations_by_batch(batch_id)
            .await?
            .into_iter()
            .map(|r| r.id)
            .collect();
        if students.is_empty() {
            return Err(AppError::NotFound("No students in this batch".to_string()));
        }

        let mut files = Vec::new();
        for certificate in self.store.list_certificates().await? {
            if !students.contains(&certificate.registration_id) {
                continue;
            }
            let file_name = file_name_from_url(&certificate.certificate_url);
            match self.renderer.read_artifact(&file_name).await {
                Ok(Some(bytes)) => files.push((file_name, bytes)),
                Ok(None) => warn!(
                    certificate_number = %certificate.certificate_number,
                    "Certificate file missing, not archived"
                ),
                Err(e) => warn!(
                    certificate_number = %certificate.certificate_number,
                    error = %e,
                    "Certificate file unreadable, not archived"
                ),
            }
        }
        if files.is_empty() {
            return Err(AppError::NotFound(
                "No certificate files found for this batch".to_string(),
            ));
        }

        let count = files.len();
        let bytes = tokio::task::spawn_blocking(move || zip_files(files))
            .await
            .map_err(|e| AppError::InternalServerError(e.to_string()))??;

        info!(batch_code = %batch.batch_code, files = count, "Batch certificates archived");
        Ok(BatchArchive {
            file_name: format!("Batch-Certificates-{}.zip", batch.batch_code),
            bytes,
        })
    }

    pub async fn resend_notification(&self, certificate_id: Uuid) -> AppResult<Certificate> {
        let mut certificate = self
            .store
            .get_certificate(certificate_id)
            .await?
            .ok_or_else(|| AppError::not_found("Certificate"))?;
        let registration = self.registrations.get(certificate.registration_id).await?;

        let location = ArtifactLocation {
            file_name: file_name_from_url(&certificate.certificate_url),
            url: certificate.certificate_url.clone(),
        };
        certificate.delivery = self.deliver(&certificate, &registration, &location).await;
        Ok(certificate)
    }

    /// Newest first, with the holder's name and email.
    pub async fn issued_certificates(&self) -> AppResult<Vec<IssuedCertificate>> {
        let holders: HashMap<Uuid, Registration> = self
            .registrations
            .list()
            .await?
            .into_iter()
            .map(|r| (r.id, r))
            .collect();

        let issued = self
            .store
            .list_certificates()
            .await?
            .into_iter()
            .map(|certificate| {
                let holder = holders.get(&certificate.registration_id);
                IssuedCertificate {
                    student_name: holder.map(|r| r.full_name.clone()),
                    student_email: holder.map(|r| r.email.clone()),
                    certificate,
                }
            })
            .collect();
        Ok(issued)
    }

    pub async fn verify(&self, certificate_number: &str) -> AppResult<CertificateVerification> {
        let certificate = self
            .store
            .find_certificate_by_number(certificate_number.trim())
            .await?
            .ok_or_else(|| AppError::not_found("Certificate"))?;

        let student_name = match self
            .store
            .get_registration(certificate.registration_id)
            .await
        {
            Ok(Some(record)) => record.full_name,
            Ok(None) | Err(DatabaseError::NotFound) => "Unknown".to_string(),
            Err(e) => return Err(e.into()),
        };
        let approved_by = self
            .store
            .get_staff(certificate.approved_by)
            .await?
            .map(|staff| staff.full_name)
            .unwrap_or_else(|| "Management".to_string());

        Ok(CertificateVerification {
            certificate_number: certificate.certificate_number,
            student_name,
            program_level: certificate.program_level,
            issue_date: certificate.issue_date,
            approved_by,
            digital_signature: certificate.digital_signature_hash,
            validation_url: certificate.validation_url,
            is_valid: true,
        })
    }

    pub async fn statistics(&self) -> AppResult<CertificationStatistics> {
        let registrations = self.store.list_registrations().await?;
        let certificates_issued = self.store.list_certificates().await?.len();

        let total_registrations = registrations.len();
        let paid_registrations = registrations
            .iter()
            .filter(|r| r.payment_status == PaymentStatus::Paid)
            .count();
        let pending_approvals = registrations
            .iter()
            .filter(|r| {
                r.payment_status == PaymentStatus::Paid
                    && r.certificate_status == CertificateStatus::Pending
            })
            .count();
        let issuance_rate = if total_registrations == 0 {
            0.0
        } else {
            let rate = certificates_issued as f64 / total_registrations as f64 * 100.0;
            (rate * 100.0).round() / 100.0
        };

        Ok(CertificationStatistics {
            total_registrations,
            paid_registrations,
            certificates_issued,
            pending_approvals,
            issuance_rate,
        })
    }

    pub async fn eligible_registrations(&self) -> AppResult<Vec<eligibility::EligibleRegistration>> {
        eligibility::eligible_registrations(&self.registrations, self.store.as_ref()).await
    }
}

fn zip_files(files: Vec<(String, Vec<u8>)>) -> AppResult<Vec<u8>> {
    let zip_error = |e: zip::result::ZipError| AppError::InternalServerError(e.to_string());
    let io_error = |e: std::io::Error| AppError::InternalServerError(e.to_string());

    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, bytes) in files {
        writer.start_file(name, options).map_err(zip_error)?;
        writer.write_all(&bytes).map_err(io_error)?;
    }
    Ok(writer.finish().map_err(zip_error)?.into_inner())
}

/// Last path segment of an artifact URL.
fn file_name_from_url(url: &str) -> String {
    url.rsplit('/').next().unwrap_or(url).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    #[test]
    fn date_label_is_long_form() {
        assert_eq!(date_label(date!(2025 - 08 - 15)), "15 August 2025");
    }

    #[test]
    fn file_name_is_last_segment() {
        assert_eq!(
            file_name_from_url("http://localhost:8000/certificates/CERT-D1SK150825ON0001.html"),
            "CERT-D1SK150825ON0001.html"
        );
        assert_eq!(file_name_from_url("CERT-X.html"), "CERT-X.html");
    }

    #[test]
    fn zip_holds_every_file() {
        let bytes = zip_files(vec![
            ("CERT-A.html".to_string(), b"<p>a</p>".to_vec()),
            ("CERT-B.html".to_string(), b"<p>b</p>".to_vec()),
        ])
        .unwrap();

        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert_eq!(archive.len(), 2);
        let mut content = String::new();
        std::io::Read::read_to_string(&mut archive.by_name("CERT-B.html").unwrap(), &mut content)
            .unwrap();
        assert_eq!(content, "<p>b</p>");
    }

    #[test]
    fn verification_url_has_single_slash() {
        let settings = IssuanceSettings {
            client_url: "https://portal.example/".to_string(),
            render_timeout: Duration::from_secs(1),
            notify_timeout: Duration::from_secs(1),
            signature_secret: None,
        };
        assert_eq!(
            settings.verification_url("D1SK150825ON0001"),
            "https://portal.example/verify-certificate/D1SK150825ON0001"
        );
    }
}
