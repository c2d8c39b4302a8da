use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use time::OffsetDateTime;
use uuid::Uuid;

use super::models::{
    Attendance, AttendanceMark, AttendanceTally, AuditEntry, AuditFilter, Batch, Certificate,
    CertificateStatus, CertificateTemplate, DeliveryStatus, PaymentChange, ProgramLevel,
    RegistrationRecord, StaffMember, StudentNote,
};
use super::store::{
    status_conflict, AttendanceStore, AuditStore, BatchStore, CertificateStore, NoteStore,
    RegistrationStore, StaffStore, Store, TemplateStore,
};
use super::DatabaseError;

const REGISTRATION_COLUMNS: &str = r#"
    id, full_name, email, email_hash, phone, city_country, region, program_level, mode,
    referral_source, referrer_name, assigned_instructor_id, batch_id, registered_by,
    payment_status, payment_mode, transaction_id, payment_date, certificate_status,
    certificate_issued_at, management_notes, manual_date, registered_at
"#;

const BATCH_COLUMNS: &str = r#"
    id, batch_code, program_level, instructor_id, start_date, end_date, mode, max_students,
    current_students, status, total_sessions, created_by, created_at, updated_at
"#;

const ATTENDANCE_COLUMNS: &str = r#"
    id, registration_id, instructor_id, batch_id, session_date, status, program_level,
    created_at, updated_at
"#;

const CERTIFICATE_COLUMNS: &str = r#"
    id, registration_id, certificate_number, program_level, issue_date, certificate_url,
    digital_signature_hash, approved_by, validation_url, email_sent, email_sent_at,
    email_recipient, email_error, created_at
"#;

const STAFF_COLUMNS: &str = "id, full_name, email, role, created_at";

const NOTE_COLUMNS: &str = "id, registration_id, instructor_id, note, created_at";

const TEMPLATE_COLUMNS: &str = "id, name, html_content, is_active, created_by, created_at";

const AUDIT_COLUMNS: &str =
    "id, actor_id, actor_role, action, resource, resource_id, details, status, created_at";

/// PostgreSQL-backed store.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Compare-and-set on `certificate_status`. `issued_at` is written only
    /// when given, `notes` replace the management notes only when given.
    async fn move_certificate_status(
        tx: &mut Transaction<'_, Postgres>,
        registration_id: Uuid,
        from: CertificateStatus,
        to: CertificateStatus,
        issued_at: Option<OffsetDateTime>,
        notes: Option<&str>,
    ) -> Result<RegistrationRecord, DatabaseError> {
        let moved = sqlx::query_as::<_, RegistrationRecord>(&format!(
            "UPDATE registrations \
             SET certificate_status = $3, \
                 certificate_issued_at = COALESCE($4, certificate_issued_at), \
                 management_notes = COALESCE($5, management_notes) \
             WHERE id = $1 AND certificate_status = $2 \
             RETURNING {REGISTRATION_COLUMNS}"
        ))
        .bind(registration_id)
        .bind(from)
        .bind(to)
        .bind(issued_at)
        .bind(notes)
        .fetch_optional(&mut **tx)
        .await?;

        moved.ok_or_else(|| status_conflict(from))
    }

    async fn insert_audit(
        executor: impl sqlx::PgExecutor<'_>,
        entry: &AuditEntry,
    ) -> Result<(), DatabaseError> {
        sqlx::query(&format!(
            "INSERT INTO audit_log ({AUDIT_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"
        ))
        .bind(entry.id)
        .bind(entry.actor_id)
        .bind(entry.actor_role)
        .bind(entry.action)
        .bind(&entry.resource)
        .bind(&entry.resource_id)
        .bind(&entry.details)
        .bind(entry.status)
        .bind(entry.created_at)
        .execute(executor)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl RegistrationStore for PgStore {
    async fn insert_registration(&self, record: &RegistrationRecord) -> Result<(), DatabaseError> {
        sqlx::query(&format!(
            "INSERT INTO registrations ({REGISTRATION_COLUMNS}) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, \
             $19, $20, $21, $22, $23)"
        ))
        .bind(record.id)
        .bind(&record.full_name)
        .bind(&record.email)
        .bind(&record.email_hash)
        .bind(&record.phone)
        .bind(&record.city_country)
        .bind(record.region)
        .bind(record.program_level)
        .bind(record.mode)
        .bind(&record.referral_source)
        .bind(&record.referrer_name)
        .bind(record.assigned_instructor_id)
        .bind(record.batch_id)
        .bind(record.registered_by)
        .bind(record.payment_status)
        .bind(record.payment_mode)
        .bind(&record.transaction_id)
        .bind(record.payment_date)
        .bind(record.certificate_status)
        .bind(record.certificate_issued_at)
        .bind(&record.management_notes)
        .bind(record.manual_date)
        .bind(record.registered_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_registration(&self, id: Uuid) -> Result<Option<RegistrationRecord>, DatabaseError> {
        let record = sqlx::query_as::<_, RegistrationRecord>(&format!(
            "SELECT {REGISTRATION_COLUMNS} FROM registrations WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn find_registration_by_email_hash(
        &self,
        email_hash: &str,
        program_level: ProgramLevel,
    ) -> Result<Option<RegistrationRecord>, DatabaseError> {
        let record = sqlx::query_as::<_, RegistrationRecord>(&format!(
            "SELECT {REGISTRATION_COLUMNS} FROM registrations \
             WHERE email_hash = $1 AND program_level = $2"
        ))
        .bind(email_hash)
        .bind(program_level)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn list_registrations(&self) -> Result<Vec<RegistrationRecord>, DatabaseError> {
        let records = sqlx::query_as::<_, RegistrationRecord>(&format!(
            "SELECT {REGISTRATION_COLUMNS} FROM registrations ORDER BY registered_at DESC"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    async fn list_registrations_by_batch(
        &self,
        batch_id: Uuid,
    ) -> Result<Vec<RegistrationRecord>, DatabaseError> {
        let records = sqlx::query_as::<_, RegistrationRecord>(&format!(
            "SELECT {REGISTRATION_COLUMNS} FROM registrations \
             WHERE batch_id = $1 ORDER BY full_name ASC"
        ))
        .bind(batch_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    async fn list_registrations_for_instructor(
        &self,
        instructor_id: Uuid,
    ) -> Result<Vec<RegistrationRecord>, DatabaseError> {
        let records = sqlx::query_as::<_, RegistrationRecord>(&format!(
            "SELECT {REGISTRATION_COLUMNS} FROM registrations \
             WHERE registered_by = $1 OR assigned_instructor_id = $1 \
             ORDER BY registered_at DESC"
        ))
        .bind(instructor_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    async fn update_registration_details(
        &self,
        record: &RegistrationRecord,
    ) -> Result<RegistrationRecord, DatabaseError> {
        let updated = sqlx::query_as::<_, RegistrationRecord>(&format!(
            "UPDATE registrations \
             SET full_name = $2, email = $3, email_hash = $4, phone = $5, city_country = $6, \
                 region = $7, mode = $8, referrer_name = $9, assigned_instructor_id = $10, \
                 manual_date = $11, management_notes = $12 \
             WHERE id = $1 \
             RETURNING {REGISTRATION_COLUMNS}"
        ))
        .bind(record.id)
        .bind(&record.full_name)
        .bind(&record.email)
        .bind(&record.email_hash)
        .bind(&record.phone)
        .bind(&record.city_country)
        .bind(record.region)
        .bind(record.mode)
        .bind(&record.referrer_name)
        .bind(record.assigned_instructor_id)
        .bind(record.manual_date)
        .bind(&record.management_notes)
        .fetch_optional(&self.pool)
        .await?;

        updated.ok_or(DatabaseError::NotFound)
    }

    async fn update_payment(
        &self,
        id: Uuid,
        change: &PaymentChange,
    ) -> Result<RegistrationRecord, DatabaseError> {
        let (touch_transaction, transaction_id) = match &change.transaction_id {
            Some(value) => (true, value.clone()),
            None => (false, None),
        };

        let updated = sqlx::query_as::<_, RegistrationRecord>(&format!(
            "UPDATE registrations \
             SET payment_date = CASE \
                     WHEN $2 = 'paid'::payment_status AND payment_status <> 'paid'::payment_status \
                     THEN $6 ELSE payment_date END, \
                 payment_status = $2, \
                 payment_mode = COALESCE($3, payment_mode), \
                 transaction_id = CASE WHEN $4 THEN $5 ELSE transaction_id END \
             WHERE id = $1 \
             RETURNING {REGISTRATION_COLUMNS}"
        ))
        .bind(id)
        .bind(change.payment_status)
        .bind(change.payment_mode)
        .bind(touch_transaction)
        .bind(transaction_id)
        .bind(change.paid_at)
        .fetch_optional(&self.pool)
        .await?;

        updated.ok_or(DatabaseError::NotFound)
    }

    async fn set_registration_batch(
        &self,
        id: Uuid,
        batch_id: Option<Uuid>,
        assigned_instructor_id: Option<Uuid>,
    ) -> Result<RegistrationRecord, DatabaseError> {
        let updated = sqlx::query_as::<_, RegistrationRecord>(&format!(
            "UPDATE registrations SET batch_id = $2, assigned_instructor_id = $3 \
             WHERE id = $1 RETURNING {REGISTRATION_COLUMNS}"
        ))
        .bind(id)
        .bind(batch_id)
        .bind(assigned_instructor_id)
        .fetch_optional(&self.pool)
        .await?;

        updated.ok_or(DatabaseError::NotFound)
    }

    async fn assign_instructor(
        &self,
        ids: &[Uuid],
        instructor_id: Uuid,
    ) -> Result<u64, DatabaseError> {
        let result = sqlx::query(
            "UPDATE registrations SET assigned_instructor_id = $2 WHERE id = ANY($1)",
        )
        .bind(ids)
        .bind(instructor_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn delete_registration(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM registrations WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl BatchStore for PgStore {
    async fn insert_batch(&self, batch: &Batch, student_ids: &[Uuid]) -> Result<(), DatabaseError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(&format!(
            "INSERT INTO batches ({BATCH_COLUMNS}) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)"
        ))
        .bind(batch.id)
        .bind(&batch.batch_code)
        .bind(batch.program_level)
        .bind(batch.instructor_id)
        .bind(batch.start_date)
        .bind(batch.end_date)
        .bind(batch.mode)
        .bind(batch.max_students)
        .bind(batch.current_students)
        .bind(batch.status)
        .bind(batch.total_sessions)
        .bind(batch.created_by)
        .bind(batch.created_at)
        .bind(batch.updated_at)
        .execute(&mut *tx)
        .await?;

        if !student_ids.is_empty() {
            sqlx::query(
                r#"
                UPDATE registrations
                SET batch_id = $1, assigned_instructor_id = $2
                WHERE id = ANY($3)
                "#,
            )
            .bind(batch.id)
            .bind(batch.instructor_id)
            .bind(student_ids)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_batch(&self, id: Uuid) -> Result<Option<Batch>, DatabaseError> {
        let batch = sqlx::query_as::<_, Batch>(&format!(
            "SELECT {BATCH_COLUMNS} FROM batches WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(batch)
    }

    async fn list_batches(&self) -> Result<Vec<Batch>, DatabaseError> {
        let batches = sqlx::query_as::<_, Batch>(&format!(
            "SELECT {BATCH_COLUMNS} FROM batches ORDER BY start_date DESC"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(batches)
    }

    async fn list_batches_for_instructor(
        &self,
        instructor_id: Uuid,
    ) -> Result<Vec<Batch>, DatabaseError> {
        let batches = sqlx::query_as::<_, Batch>(&format!(
            "SELECT {BATCH_COLUMNS} FROM batches WHERE instructor_id = $1 ORDER BY start_date DESC"
        ))
        .bind(instructor_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(batches)
    }

    async fn count_batches_with_code_prefix(&self, prefix: &str) -> Result<u64, DatabaseError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM batches WHERE starts_with(batch_code, $1)")
                .bind(prefix)
                .fetch_one(&self.pool)
                .await?;
        Ok(count.max(0) as u64)
    }
}

#[async_trait]
impl AttendanceStore for PgStore {
    async fn upsert_attendance(
        &self,
        marks: &[AttendanceMark],
    ) -> Result<Vec<Attendance>, DatabaseError> {
        let mut tx = self.pool.begin().await?;
        let mut written = Vec::with_capacity(marks.len());

        for mark in marks {
            let row = sqlx::query_as::<_, Attendance>(&format!(
                r#"
                INSERT INTO attendance
                    (id, registration_id, instructor_id, batch_id, session_date, status, program_level)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT ON CONSTRAINT attendance_registration_batch_date_key
                DO UPDATE SET
                    status = EXCLUDED.status,
                    instructor_id = EXCLUDED.instructor_id,
                    program_level = EXCLUDED.program_level,
                    updated_at = NOW()
                RETURNING {ATTENDANCE_COLUMNS}
                "#
            ))
            .bind(Uuid::now_v7())
            .bind(mark.registration_id)
            .bind(mark.instructor_id)
            .bind(mark.batch_id)
            .bind(mark.session_date)
            .bind(mark.status)
            .bind(mark.program_level)
            .fetch_one(&mut *tx)
            .await?;
            written.push(row);
        }

        tx.commit().await?;
        Ok(written)
    }

    async fn attendance_for(
        &self,
        registration_id: Uuid,
        batch_id: Option<Uuid>,
    ) -> Result<Vec<Attendance>, DatabaseError> {
        let records = sqlx::query_as::<_, Attendance>(&format!(
            "SELECT {ATTENDANCE_COLUMNS} FROM attendance \
             WHERE registration_id = $1 AND ($2::uuid IS NULL OR batch_id = $2) \
             ORDER BY session_date ASC"
        ))
        .bind(registration_id)
        .bind(batch_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    async fn attendance_tallies(&self) -> Result<Vec<AttendanceTally>, DatabaseError> {
        let tallies = sqlx::query_as::<_, AttendanceTally>(
            r#"
            SELECT
                registration_id,
                batch_id,
                COUNT(*) FILTER (WHERE status = 'present') AS present,
                COUNT(*) FILTER (WHERE status = 'absent') AS absent
            FROM attendance
            GROUP BY registration_id, batch_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(tallies)
    }
}

#[async_trait]
impl CertificateStore for PgStore {
    async fn issue_certificate(
        &self,
        certificate: &Certificate,
        notes: Option<&str>,
    ) -> Result<RegistrationRecord, DatabaseError> {
        let mut tx = self.pool.begin().await?;

        let issued = Self::move_certificate_status(
            &mut tx,
            certificate.registration_id,
            CertificateStatus::Pending,
            CertificateStatus::Issued,
            Some(certificate.created_at),
            notes,
        )
        .await?;

        sqlx::query(&format!(
            "INSERT INTO certificates ({CERTIFICATE_COLUMNS}) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)"
        ))
        .bind(certificate.id)
        .bind(certificate.registration_id)
        .bind(&certificate.certificate_number)
        .bind(certificate.program_level)
        .bind(certificate.issue_date)
        .bind(&certificate.certificate_url)
        .bind(&certificate.digital_signature_hash)
        .bind(certificate.approved_by)
        .bind(&certificate.validation_url)
        .bind(certificate.delivery.email_sent)
        .bind(certificate.delivery.email_sent_at)
        .bind(&certificate.delivery.email_recipient)
        .bind(&certificate.delivery.email_error)
        .bind(certificate.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(issued)
    }

    async fn reject_certificate(
        &self,
        registration_id: Uuid,
        notes: Option<&str>,
    ) -> Result<RegistrationRecord, DatabaseError> {
        let mut tx = self.pool.begin().await?;
        let rejected = Self::move_certificate_status(
            &mut tx,
            registration_id,
            CertificateStatus::Pending,
            CertificateStatus::Rejected,
            None,
            notes,
        )
        .await?;
        tx.commit().await?;
        Ok(rejected)
    }

    async fn get_certificate(&self, id: Uuid) -> Result<Option<Certificate>, DatabaseError> {
        let certificate = sqlx::query_as::<_, Certificate>(&format!(
            "SELECT {CERTIFICATE_COLUMNS} FROM certificates WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(certificate)
    }

    async fn find_certificate_by_number(
        &self,
        certificate_number: &str,
    ) -> Result<Option<Certificate>, DatabaseError> {
        let certificate = sqlx::query_as::<_, Certificate>(&format!(
            "SELECT {CERTIFICATE_COLUMNS} FROM certificates WHERE certificate_number = $1"
        ))
        .bind(certificate_number)
        .fetch_optional(&self.pool)
        .await?;
        Ok(certificate)
    }

    async fn find_certificate_for(
        &self,
        registration_id: Uuid,
        program_level: ProgramLevel,
    ) -> Result<Option<Certificate>, DatabaseError> {
        let certificate = sqlx::query_as::<_, Certificate>(&format!(
            "SELECT {CERTIFICATE_COLUMNS} FROM certificates \
             WHERE registration_id = $1 AND program_level = $2"
        ))
        .bind(registration_id)
        .bind(program_level)
        .fetch_optional(&self.pool)
        .await?;
        Ok(certificate)
    }

    async fn count_certificates_with_prefix(&self, prefix: &str) -> Result<u64, DatabaseError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM certificates WHERE starts_with(certificate_number, $1)",
        )
        .bind(prefix)
        .fetch_one(&self.pool)
        .await?;
        Ok(count.max(0) as u64)
    }

    async fn list_certificates(&self) -> Result<Vec<Certificate>, DatabaseError> {
        let certificates = sqlx::query_as::<_, Certificate>(&format!(
            "SELECT {CERTIFICATE_COLUMNS} FROM certificates ORDER BY issue_date DESC"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(certificates)
    }

    async fn update_delivery_status(
        &self,
        certificate_id: Uuid,
        delivery: &DeliveryStatus,
    ) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE certificates
            SET email_sent = $2, email_sent_at = $3, email_recipient = $4, email_error = $5
            WHERE id = $1
            "#,
        )
        .bind(certificate_id)
        .bind(delivery.email_sent)
        .bind(delivery.email_sent_at)
        .bind(&delivery.email_recipient)
        .bind(&delivery.email_error)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound);
        }
        Ok(())
    }

    async fn revoke_certificate(
        &self,
        certificate_id: Uuid,
        notes: &str,
        trail: &AuditEntry,
    ) -> Result<RegistrationRecord, DatabaseError> {
        let mut tx = self.pool.begin().await?;

        let registration_id: Uuid = sqlx::query_scalar(
            "DELETE FROM certificates WHERE id = $1 RETURNING registration_id",
        )
        .bind(certificate_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(DatabaseError::NotFound)?;

        let revoked = Self::move_certificate_status(
            &mut tx,
            registration_id,
            CertificateStatus::Issued,
            CertificateStatus::Revoked,
            None,
            Some(notes),
        )
        .await?;

        Self::insert_audit(&mut *tx, trail).await?;

        tx.commit().await?;
        Ok(revoked)
    }
}

#[async_trait]
impl StaffStore for PgStore {
    async fn insert_staff(&self, member: &StaffMember) -> Result<(), DatabaseError> {
        sqlx::query(&format!(
            "INSERT INTO staff ({STAFF_COLUMNS}) VALUES ($1, $2, $3, $4, $5)"
        ))
        .bind(member.id)
        .bind(&member.full_name)
        .bind(member.email.to_lowercase())
        .bind(member.role)
        .bind(member.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_staff(&self, id: Uuid) -> Result<Option<StaffMember>, DatabaseError> {
        let member = sqlx::query_as::<_, StaffMember>(&format!(
            "SELECT {STAFF_COLUMNS} FROM staff WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(member)
    }

    async fn find_instructor_by_name(
        &self,
        full_name: &str,
    ) -> Result<Option<StaffMember>, DatabaseError> {
        let member = sqlx::query_as::<_, StaffMember>(&format!(
            "SELECT {STAFF_COLUMNS} FROM staff \
             WHERE role = 'instructor' AND LOWER(full_name) = LOWER($1) \
             ORDER BY created_at ASC LIMIT 1"
        ))
        .bind(full_name.trim())
        .fetch_optional(&self.pool)
        .await?;
        Ok(member)
    }

    async fn list_staff(&self) -> Result<Vec<StaffMember>, DatabaseError> {
        let members = sqlx::query_as::<_, StaffMember>(&format!(
            "SELECT {STAFF_COLUMNS} FROM staff ORDER BY full_name ASC"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(members)
    }
}

#[async_trait]
impl NoteStore for PgStore {
    async fn insert_note(&self, note: &StudentNote) -> Result<(), DatabaseError> {
        sqlx::query(&format!(
            "INSERT INTO student_notes ({NOTE_COLUMNS}) VALUES ($1, $2, $3, $4, $5)"
        ))
        .bind(note.id)
        .bind(note.registration_id)
        .bind(note.instructor_id)
        .bind(&note.note)
        .bind(note.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_notes(&self, registration_id: Uuid) -> Result<Vec<StudentNote>, DatabaseError> {
        let notes = sqlx::query_as::<_, StudentNote>(&format!(
            "SELECT {NOTE_COLUMNS} FROM student_notes \
             WHERE registration_id = $1 ORDER BY created_at DESC"
        ))
        .bind(registration_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(notes)
    }
}

#[async_trait]
impl TemplateStore for PgStore {
    async fn insert_template(&self, template: &CertificateTemplate) -> Result<(), DatabaseError> {
        let mut tx = self.pool.begin().await?;

        if template.is_active {
            sqlx::query("UPDATE certificate_templates SET is_active = FALSE WHERE is_active")
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query(&format!(
            "INSERT INTO certificate_templates ({TEMPLATE_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6)"
        ))
        .bind(template.id)
        .bind(&template.name)
        .bind(&template.html_content)
        .bind(template.is_active)
        .bind(template.created_by)
        .bind(template.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn list_templates(&self) -> Result<Vec<CertificateTemplate>, DatabaseError> {
        let templates = sqlx::query_as::<_, CertificateTemplate>(&format!(
            "SELECT {TEMPLATE_COLUMNS} FROM certificate_templates ORDER BY created_at DESC"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(templates)
    }

    async fn activate_template(&self, id: Uuid) -> Result<CertificateTemplate, DatabaseError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE certificate_templates SET is_active = FALSE WHERE is_active AND id <> $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let activated = sqlx::query_as::<_, CertificateTemplate>(&format!(
            "UPDATE certificate_templates SET is_active = TRUE WHERE id = $1 \
             RETURNING {TEMPLATE_COLUMNS}"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(DatabaseError::NotFound)?;

        tx.commit().await?;
        Ok(activated)
    }

    async fn active_template(&self) -> Result<Option<CertificateTemplate>, DatabaseError> {
        let template = sqlx::query_as::<_, CertificateTemplate>(&format!(
            "SELECT {TEMPLATE_COLUMNS} FROM certificate_templates WHERE is_active LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await?;
        Ok(template)
    }
}

fn push_audit_filter<'a>(query: &mut QueryBuilder<'a, Postgres>, filter: &'a AuditFilter) {
    query.push(" WHERE TRUE");
    if let Some(actor_id) = filter.actor_id {
        query.push(" AND actor_id = ").push_bind(actor_id);
    }
    if let Some(action) = filter.action {
        query.push(" AND action = ").push_bind(action);
    }
    if let Some(from) = filter.from {
        query.push(" AND created_at >= ").push_bind(from);
    }
    if let Some(to) = filter.to {
        query.push(" AND created_at <= ").push_bind(to);
    }
}

#[async_trait]
impl AuditStore for PgStore {
    async fn insert_audit_entry(&self, entry: &AuditEntry) -> Result<(), DatabaseError> {
        Self::insert_audit(&self.pool, entry).await
    }

    async fn list_audit_entries(
        &self,
        filter: &AuditFilter,
    ) -> Result<(Vec<AuditEntry>, u64), DatabaseError> {
        let mut count = QueryBuilder::new("SELECT COUNT(*) FROM audit_log");
        push_audit_filter(&mut count, filter);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut select = QueryBuilder::new(format!("SELECT {AUDIT_COLUMNS} FROM audit_log"));
        push_audit_filter(&mut select, filter);
        select
            .push(" ORDER BY created_at DESC LIMIT ")
            .push_bind(i64::from(filter.limit()))
            .push(" OFFSET ")
            .push_bind(filter.offset() as i64);
        let entries = select
            .build_query_as::<AuditEntry>()
            .fetch_all(&self.pool)
            .await?;

        Ok((entries, total.max(0) as u64))
    }
}

#[async_trait]
impl Store for PgStore {
    async fn ping(&self) -> Result<(), DatabaseError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}
