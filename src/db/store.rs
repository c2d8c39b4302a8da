//! Storage traits shared by the PostgreSQL and in-memory backends.
//!
//! Multi-row state changes that must not be observed half-done
//! (issuing, revoking, bulk attendance, batch creation) are single trait
//! calls so each backend can make them atomic. Registration writes touch
//! only the columns they own, and certificate status moves are
//! compare-and-set against the expected current status.

use async_trait::async_trait;
use uuid::Uuid;

use super::models::{
    Attendance, AttendanceMark, AttendanceTally, AuditEntry, AuditFilter, Batch, Certificate,
    CertificateStatus, CertificateTemplate, DeliveryStatus, PaymentChange, ProgramLevel, RegistrationRecord,
    StaffMember, StudentNote,
};
use super::DatabaseError;

pub const REGISTRATION_EMAIL_LEVEL_KEY: &str = "registrations_email_hash_program_level_key";
pub const BATCH_CODE_KEY: &str = "batches_batch_code_key";
pub const CERTIFICATE_NUMBER_KEY: &str = "certificates_certificate_number_key";
pub const CERTIFICATE_HOLDER_KEY: &str = "certificates_registration_id_program_level_key";
pub const STAFF_EMAIL_KEY: &str = "staff_email_key";
pub const TEMPLATE_NAME_KEY: &str = "certificate_templates_name_key";

/// Returned when a compare-and-set status move finds the row elsewhere.
pub(crate) fn status_conflict(expected: CertificateStatus) -> DatabaseError {
    DatabaseError::Conflict(format!(
        "Certificate status changed; expected {:?}",
        expected
    ))
}

#[async_trait]
pub trait RegistrationStore: Send + Sync {
    async fn insert_registration(&self, record: &RegistrationRecord) -> Result<(), DatabaseError>;

    async fn get_registration(&self, id: Uuid) -> Result<Option<RegistrationRecord>, DatabaseError>;

    async fn find_registration_by_email_hash(
        &self,
        email_hash: &str,
        program_level: ProgramLevel,
    ) -> Result<Option<RegistrationRecord>, DatabaseError>;

    /// Newest first.
    async fn list_registrations(&self) -> Result<Vec<RegistrationRecord>, DatabaseError>;

    async fn list_registrations_by_batch(
        &self,
        batch_id: Uuid,
    ) -> Result<Vec<RegistrationRecord>, DatabaseError>;

    /// Students the instructor registered or is assigned to, newest first.
    async fn list_registrations_for_instructor(
        &self,
        instructor_id: Uuid,
    ) -> Result<Vec<RegistrationRecord>, DatabaseError>;

    /// Writes the profile columns of `record` (name, contact, region, mode,
    /// referrer, instructor, manual date, notes). Payment, batch and
    /// certificate columns are left as stored.
    async fn update_registration_details(
        &self,
        record: &RegistrationRecord,
    ) -> Result<RegistrationRecord, DatabaseError>;

    /// Moving into `Paid` stamps `paid_at` unless the row was already paid.
    async fn update_payment(
        &self,
        id: Uuid,
        change: &PaymentChange,
    ) -> Result<RegistrationRecord, DatabaseError>;

    async fn set_registration_batch(
        &self,
        id: Uuid,
        batch_id: Option<Uuid>,
        assigned_instructor_id: Option<Uuid>,
    ) -> Result<RegistrationRecord, DatabaseError>;

    /// Returns how many of `ids` were updated.
    async fn assign_instructor(&self, ids: &[Uuid], instructor_id: Uuid)
        -> Result<u64, DatabaseError>;

    async fn delete_registration(&self, id: Uuid) -> Result<bool, DatabaseError>;
}

#[async_trait]
pub trait BatchStore: Send + Sync {
    /// Inserts the batch and moves `student_ids` into it under its instructor.
    async fn insert_batch(&self, batch: &Batch, student_ids: &[Uuid]) -> Result<(), DatabaseError>;

    async fn get_batch(&self, id: Uuid) -> Result<Option<Batch>, DatabaseError>;

    /// Latest start date first.
    async fn list_batches(&self) -> Result<Vec<Batch>, DatabaseError>;

    async fn list_batches_for_instructor(
        &self,
        instructor_id: Uuid,
    ) -> Result<Vec<Batch>, DatabaseError>;

    async fn count_batches_with_code_prefix(&self, prefix: &str) -> Result<u64, DatabaseError>;
}

#[async_trait]
pub trait AttendanceStore: Send + Sync {
    /// Upserts every mark or none of them. Last write wins per key.
    async fn upsert_attendance(
        &self,
        marks: &[AttendanceMark],
    ) -> Result<Vec<Attendance>, DatabaseError>;

    /// Chronological. `None` means every record of the student.
    async fn attendance_for(
        &self,
        registration_id: Uuid,
        batch_id: Option<Uuid>,
    ) -> Result<Vec<Attendance>, DatabaseError>;

    async fn attendance_tallies(&self) -> Result<Vec<AttendanceTally>, DatabaseError>;
}

#[async_trait]
pub trait CertificateStore: Send + Sync {
    /// Inserts the certificate and moves its registration from `Pending` to
    /// `Issued` in one step. `Conflict` when the registration is no longer
    /// pending; nothing is written then.
    async fn issue_certificate(
        &self,
        certificate: &Certificate,
        notes: Option<&str>,
    ) -> Result<RegistrationRecord, DatabaseError>;

    /// `Pending` to `Rejected`; `Conflict` from any other status.
    async fn reject_certificate(
        &self,
        registration_id: Uuid,
        notes: Option<&str>,
    ) -> Result<RegistrationRecord, DatabaseError>;

    async fn get_certificate(&self, id: Uuid) -> Result<Option<Certificate>, DatabaseError>;

    async fn find_certificate_by_number(
        &self,
        certificate_number: &str,
    ) -> Result<Option<Certificate>, DatabaseError>;

    async fn find_certificate_for(
        &self,
        registration_id: Uuid,
        program_level: ProgramLevel,
    ) -> Result<Option<Certificate>, DatabaseError>;

    async fn count_certificates_with_prefix(&self, prefix: &str) -> Result<u64, DatabaseError>;

    /// Latest issue date first.
    async fn list_certificates(&self) -> Result<Vec<Certificate>, DatabaseError>;

    async fn update_delivery_status(
        &self,
        certificate_id: Uuid,
        delivery: &DeliveryStatus,
    ) -> Result<(), DatabaseError>;

    /// Deletes the certificate, moves its registration from `Issued` to
    /// `Revoked` and appends `trail`, all or nothing.
    async fn revoke_certificate(
        &self,
        certificate_id: Uuid,
        notes: &str,
        trail: &AuditEntry,
    ) -> Result<RegistrationRecord, DatabaseError>;
}

#[async_trait]
pub trait StaffStore: Send + Sync {
    async fn insert_staff(&self, member: &StaffMember) -> Result<(), DatabaseError>;

    async fn get_staff(&self, id: Uuid) -> Result<Option<StaffMember>, DatabaseError>;

    /// Case-insensitive exact match on full name, instructors only.
    async fn find_instructor_by_name(
        &self,
        full_name: &str,
    ) -> Result<Option<StaffMember>, DatabaseError>;

    async fn list_staff(&self) -> Result<Vec<StaffMember>, DatabaseError>;
}

#[async_trait]
pub trait NoteStore: Send + Sync {
    async fn insert_note(&self, note: &StudentNote) -> Result<(), DatabaseError>;

    /// Newest first.
    async fn list_notes(&self, registration_id: Uuid) -> Result<Vec<StudentNote>, DatabaseError>;
}

#[async_trait]
pub trait TemplateStore: Send + Sync {
    async fn insert_template(&self, template: &CertificateTemplate) -> Result<(), DatabaseError>;

    /// Newest first.
    async fn list_templates(&self) -> Result<Vec<CertificateTemplate>, DatabaseError>;

    /// Makes `id` the only active template.
    async fn activate_template(&self, id: Uuid) -> Result<CertificateTemplate, DatabaseError>;

    async fn active_template(&self) -> Result<Option<CertificateTemplate>, DatabaseError>;
}

#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn insert_audit_entry(&self, entry: &AuditEntry) -> Result<(), DatabaseError>;

    /// Newest first, one page of matches plus the total match count.
    async fn list_audit_entries(
        &self,
        filter: &AuditFilter,
    ) -> Result<(Vec<AuditEntry>, u64), DatabaseError>;
}

#[async_trait]
pub trait Store:
    RegistrationStore
    + BatchStore
    + AttendanceStore
    + CertificateStore
    + StaffStore
    + NoteStore
    + TemplateStore
    + AuditStore
{
    async fn ping(&self) -> Result<(), DatabaseError>;

    fn backend_name(&self) -> &'static str;
}
