//! In-process store for tests and local development.
//!
//! All state sits behind one lock, so every trait call is atomic. The unique
//! constraints of the SQL schema are enforced here under the same names.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use time::OffsetDateTime;
use uuid::Uuid;

use super::models::{
    Attendance, AttendanceMark, AttendanceStatus, AttendanceTally, AuditEntry, AuditFilter, Batch,
    Certificate, CertificateStatus, CertificateTemplate, DeliveryStatus, PaymentChange,
    PaymentStatus, ProgramLevel, RegistrationRecord, StaffMember, StaffRole, StudentNote,
};
use super::store::{
    status_conflict, AttendanceStore, AuditStore, BatchStore, CertificateStore, NoteStore, RegistrationStore,
    StaffStore, Store, TemplateStore, BATCH_CODE_KEY, CERTIFICATE_HOLDER_KEY,
    CERTIFICATE_NUMBER_KEY, REGISTRATION_EMAIL_LEVEL_KEY, STAFF_EMAIL_KEY, TEMPLATE_NAME_KEY,
};
use super::DatabaseError;

#[derive(Default)]
struct MemoryState {
    registrations: HashMap<Uuid, RegistrationRecord>,
    batches: HashMap<Uuid, Batch>,
    attendance: Vec<Attendance>,
    certificates: HashMap<Uuid, Certificate>,
    staff: HashMap<Uuid, StaffMember>,
    notes: Vec<StudentNote>,
    templates: HashMap<Uuid, CertificateTemplate>,
    audit: Vec<AuditEntry>,
}

impl MemoryState {
    fn check_registration_unique(&self, record: &RegistrationRecord) -> Result<(), DatabaseError> {
        let clash = self.registrations.values().any(|existing| {
            existing.id != record.id
                && existing.email_hash == record.email_hash
                && existing.program_level == record.program_level
        });
        if clash {
            return Err(DatabaseError::Duplicate(REGISTRATION_EMAIL_LEVEL_KEY.to_string()));
        }
        Ok(())
    }

    fn registration_mut(&mut self, id: Uuid) -> Result<&mut RegistrationRecord, DatabaseError> {
        self.registrations.get_mut(&id).ok_or(DatabaseError::NotFound)
    }

    /// Compare-and-set on the certificate status of one registration.
    fn move_certificate_status(
        &mut self,
        id: Uuid,
        from: CertificateStatus,
        to: CertificateStatus,
    ) -> Result<&mut RegistrationRecord, DatabaseError> {
        let record = self.registration_mut(id)?;
        if record.certificate_status != from {
            return Err(status_conflict(from));
        }
        record.certificate_status = to;
        Ok(record)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn newest_registrations_first(records: &mut [RegistrationRecord]) {
    records.sort_by(|a, b| b.registered_at.cmp(&a.registered_at));
}

#[async_trait]
impl RegistrationStore for MemoryStore {
    async fn insert_registration(&self, record: &RegistrationRecord) -> Result<(), DatabaseError> {
        let mut state = self.state.write();
        state.check_registration_unique(record)?;
        state.registrations.insert(record.id, record.clone());
        Ok(())
    }

    async fn get_registration(&self, id: Uuid) -> Result<Option<RegistrationRecord>, DatabaseError> {
        Ok(self.state.read().registrations.get(&id).cloned())
    }

    async fn find_registration_by_email_hash(
        &self,
        email_hash: &str,
        program_level: ProgramLevel,
    ) -> Result<Option<RegistrationRecord>, DatabaseError> {
        Ok(self
            .state
            .read()
            .registrations
            .values()
            .find(|r| r.email_hash == email_hash && r.program_level == program_level)
            .cloned())
    }

    async fn list_registrations(&self) -> Result<Vec<RegistrationRecord>, DatabaseError> {
        let mut records: Vec<_> = self.state.read().registrations.values().cloned().collect();
        newest_registrations_first(&mut records);
        Ok(records)
    }

    async fn list_registrations_by_batch(
        &self,
        batch_id: Uuid,
    ) -> Result<Vec<RegistrationRecord>, DatabaseError> {
        let mut records: Vec<_> = self
            .state
            .read()
            .registrations
            .values()
            .filter(|r| r.batch_id == Some(batch_id))
            .cloned()
            .collect();
        records.sort_by(|a, b| a.full_name.cmp(&b.full_name));
        Ok(records)
    }

    async fn list_registrations_for_instructor(
        &self,
        instructor_id: Uuid,
    ) -> Result<Vec<RegistrationRecord>, DatabaseError> {
        let mut records: Vec<_> = self
            .state
            .read()
            .registrations
            .values()
            .filter(|r| {
                r.registered_by == Some(instructor_id)
                    || r.assigned_instructor_id == Some(instructor_id)
            })
            .cloned()
            .collect();
        newest_registrations_first(&mut records);
        Ok(records)
    }

    async fn update_registration_details(
        &self,
        record: &RegistrationRecord,
    ) -> Result<RegistrationRecord, DatabaseError> {
        let mut state = self.state.write();
        state.check_registration_unique(record)?;
        let stored = state.registration_mut(record.id)?;

        stored.full_name = record.full_name.clone();
        stored.email = record.email.clone();
        stored.email_hash = record.email_hash.clone();
        stored.phone = record.phone.clone();
        stored.city_country = record.city_country.clone();
        stored.region = record.region;
        stored.mode = record.mode;
        stored.referrer_name = record.referrer_name.clone();
        stored.assigned_instructor_id = record.assigned_instructor_id;
        stored.manual_date = record.manual_date;
        stored.management_notes = record.management_notes.clone();
        Ok(stored.clone())
    }

    async fn update_payment(
        &self,
        id: Uuid,
        change: &PaymentChange,
    ) -> Result<RegistrationRecord, DatabaseError> {
        let mut state = self.state.write();
        let stored = state.registration_mut(id)?;

        if change.payment_status == PaymentStatus::Paid && stored.payment_status != PaymentStatus::Paid {
            stored.payment_date = Some(change.paid_at);
        }
        stored.payment_status = change.payment_status;
        if let Some(mode) = change.payment_mode {
            stored.payment_mode = Some(mode);
        }
        if let Some(transaction_id) = &change.transaction_id {
            stored.transaction_id = transaction_id.clone();
        }
        Ok(stored.clone())
    }

    async fn set_registration_batch(
        &self,
        id: Uuid,
        batch_id: Option<Uuid>,
        assigned_instructor_id: Option<Uuid>,
    ) -> Result<RegistrationRecord, DatabaseError> {
        let mut state = self.state.write();
        let stored = state.registration_mut(id)?;
        stored.batch_id = batch_id;
        stored.assigned_instructor_id = assigned_instructor_id;
        Ok(stored.clone())
    }

    async fn assign_instructor(
        &self,
        ids: &[Uuid],
        instructor_id: Uuid,
    ) -> Result<u64, DatabaseError> {
        let mut state = self.state.write();
        let mut updated = 0;
        for id in ids {
            if let Some(record) = state.registrations.get_mut(id) {
                record.assigned_instructor_id = Some(instructor_id);
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn delete_registration(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let mut state = self.state.write();
        let removed = state.registrations.remove(&id).is_some();
        if removed {
            state.attendance.retain(|a| a.registration_id != id);
            state.certificates.retain(|_, c| c.registration_id != id);
            state.notes.retain(|n| n.registration_id != id);
        }
        Ok(removed)
    }
}

#[async_trait]
impl BatchStore for MemoryStore {
    async fn insert_batch(&self, batch: &Batch, student_ids: &[Uuid]) -> Result<(), DatabaseError> {
        let mut state = self.state.write();
        if state.batches.values().any(|b| b.batch_code == batch.batch_code) {
            return Err(DatabaseError::Duplicate(BATCH_CODE_KEY.to_string()));
        }
        state.batches.insert(batch.id, batch.clone());
        for id in student_ids {
            if let Some(record) = state.registrations.get_mut(id) {
                record.batch_id = Some(batch.id);
                record.assigned_instructor_id = Some(batch.instructor_id);
            }
        }
        Ok(())
    }

    async fn get_batch(&self, id: Uuid) -> Result<Option<Batch>, DatabaseError> {
        Ok(self.state.read().batches.get(&id).cloned())
    }

    async fn list_batches(&self) -> Result<Vec<Batch>, DatabaseError> {
        let mut batches: Vec<_> = self.state.read().batches.values().cloned().collect();
        batches.sort_by(|a, b| b.start_date.cmp(&a.start_date));
        Ok(batches)
    }

    async fn list_batches_for_instructor(
        &self,
        instructor_id: Uuid,
    ) -> Result<Vec<Batch>, DatabaseError> {
        let mut batches: Vec<_> = self
            .state
            .read()
            .batches
            .values()
            .filter(|b| b.instructor_id == instructor_id)
            .cloned()
            .collect();
        batches.sort_by(|a, b| b.start_date.cmp(&a.start_date));
        Ok(batches)
    }

    async fn count_batches_with_code_prefix(&self, prefix: &str) -> Result<u64, DatabaseError> {
        Ok(self
            .state
            .read()
            .batches
            .values()
            .filter(|b| b.batch_code.starts_with(prefix))
            .count() as u64)
    }
}

#[async_trait]
impl AttendanceStore for MemoryStore {
    async fn upsert_attendance(
        &self,
        marks: &[AttendanceMark],
    ) -> Result<Vec<Attendance>, DatabaseError> {
        let mut state = self.state.write();
        let now = OffsetDateTime::now_utc();
        let mut written = Vec::with_capacity(marks.len());

        for mark in marks {
            let existing = state.attendance.iter_mut().find(|a| {
                a.registration_id == mark.registration_id
                    && a.batch_id == Some(mark.batch_id)
                    && a.session_date == mark.session_date
            });

            let row = match existing {
                Some(row) => {
                    row.status = mark.status;
                    row.instructor_id = mark.instructor_id;
                    row.program_level = mark.program_level;
                    row.updated_at = now;
                    row.clone()
                }
                None => {
                    let row = Attendance {
                        id: Uuid::now_v7(),
                        registration_id: mark.registration_id,
                        instructor_id: mark.instructor_id,
                        batch_id: Some(mark.batch_id),
                        session_date: mark.session_date,
                        status: mark.status,
                        program_level: mark.program_level,
                        created_at: now,
                        updated_at: now,
                    };
                    state.attendance.push(row.clone());
                    row
                }
            };
            written.push(row);
        }

        Ok(written)
    }

    async fn attendance_for(
        &self,
        registration_id: Uuid,
        batch_id: Option<Uuid>,
    ) -> Result<Vec<Attendance>, DatabaseError> {
        let mut records: Vec<_> = self
            .state
            .read()
            .attendance
            .iter()
            .filter(|a| a.registration_id == registration_id)
            .filter(|a| batch_id.is_none() || a.batch_id == batch_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.session_date.cmp(&b.session_date));
        Ok(records)
    }

    async fn attendance_tallies(&self) -> Result<Vec<AttendanceTally>, DatabaseError> {
        let state = self.state.read();
        let mut tallies: HashMap<(Uuid, Option<Uuid>), AttendanceTally> = HashMap::new();
        for record in &state.attendance {
            let tally = tallies
                .entry((record.registration_id, record.batch_id))
                .or_insert(AttendanceTally {
                    registration_id: record.registration_id,
                    batch_id: record.batch_id,
                    present: 0,
                    absent: 0,
                });
            match record.status {
                AttendanceStatus::Present => tally.present += 1,
                AttendanceStatus::Absent => tally.absent += 1,
            }
        }
        Ok(tallies.into_values().collect())
    }
}

#[async_trait]
impl CertificateStore for MemoryStore {
    async fn issue_certificate(
        &self,
        certificate: &Certificate,
        notes: Option<&str>,
    ) -> Result<RegistrationRecord, DatabaseError> {
        let mut state = self.state.write();

        if state
            .certificates
            .values()
            .any(|c| c.certificate_number == certificate.certificate_number)
        {
            return Err(DatabaseError::Duplicate(CERTIFICATE_NUMBER_KEY.to_string()));
        }
        if state.certificates.values().any(|c| {
            c.registration_id == certificate.registration_id
                && c.program_level == certificate.program_level
        }) {
            return Err(DatabaseError::Duplicate(CERTIFICATE_HOLDER_KEY.to_string()));
        }

        let record = state.move_certificate_status(
            certificate.registration_id,
            CertificateStatus::Pending,
            CertificateStatus::Issued,
        )?;
        record.certificate_issued_at = Some(certificate.created_at);
        if let Some(notes) = notes {
            record.management_notes = Some(notes.to_string());
        }
        let issued = record.clone();

        state.certificates.insert(certificate.id, certificate.clone());
        Ok(issued)
    }

    async fn reject_certificate(
        &self,
        registration_id: Uuid,
        notes: Option<&str>,
    ) -> Result<RegistrationRecord, DatabaseError> {
        let mut state = self.state.write();
        let record = state.move_certificate_status(
            registration_id,
            CertificateStatus::Pending,
            CertificateStatus::Rejected,
        )?;
        if let Some(notes) = notes {
            record.management_notes = Some(notes.to_string());
        }
        Ok(record.clone())
    }

    async fn get_certificate(&self, id: Uuid) -> Result<Option<Certificate>, DatabaseError> {
        Ok(self.state.read().certificates.get(&id).cloned())
    }

    async fn find_certificate_by_number(
        &self,
        certificate_number: &str,
    ) -> Result<Option<Certificate>, DatabaseError> {
        Ok(self
            .state
            .read()
            .certificates
            .values()
            .find(|c| c.certificate_number == certificate_number)
            .cloned())
    }

    async fn find_certificate_for(
        &self,
        registration_id: Uuid,
        program_level: ProgramLevel,
    ) -> Result<Option<Certificate>, DatabaseError> {
        Ok(self
            .state
            .read()
            .certificates
            .values()
            .find(|c| c.registration_id == registration_id && c.program_level == program_level)
            .cloned())
    }

    async fn count_certificates_with_prefix(&self, prefix: &str) -> Result<u64, DatabaseError> {
        Ok(self
            .state
            .read()
            .certificates
            .values()
            .filter(|c| c.certificate_number.starts_with(prefix))
            .count() as u64)
    }

    async fn list_certificates(&self) -> Result<Vec<Certificate>, DatabaseError> {
        let mut certificates: Vec<_> = self.state.read().certificates.values().cloned().collect();
        certificates.sort_by(|a, b| b.issue_date.cmp(&a.issue_date));
        Ok(certificates)
    }

    async fn update_delivery_status(
        &self,
        certificate_id: Uuid,
        delivery: &DeliveryStatus,
    ) -> Result<(), DatabaseError> {
        let mut state = self.state.write();
        let certificate = state
            .certificates
            .get_mut(&certificate_id)
            .ok_or(DatabaseError::NotFound)?;
        certificate.delivery = delivery.clone();
        Ok(())
    }

    async fn revoke_certificate(
        &self,
        certificate_id: Uuid,
        notes: &str,
        trail: &AuditEntry,
    ) -> Result<RegistrationRecord, DatabaseError> {
        let mut state = self.state.write();
        let registration_id = state
            .certificates
            .get(&certificate_id)
            .map(|c| c.registration_id)
            .ok_or(DatabaseError::NotFound)?;

        let record = state.move_certificate_status(
            registration_id,
            CertificateStatus::Issued,
            CertificateStatus::Revoked,
        )?;
        record.management_notes = Some(notes.to_string());
        let revoked = record.clone();

        state.certificates.remove(&certificate_id);
        state.audit.push(trail.clone());
        Ok(revoked)
    }
}

#[async_trait]
impl StaffStore for MemoryStore {
    async fn insert_staff(&self, member: &StaffMember) -> Result<(), DatabaseError> {
        let mut state = self.state.write();
        let email = member.email.to_lowercase();
        if state.staff.values().any(|m| m.email == email) {
            return Err(DatabaseError::Duplicate(STAFF_EMAIL_KEY.to_string()));
        }
        let mut member = member.clone();
        member.email = email;
        state.staff.insert(member.id, member);
        Ok(())
    }

    async fn get_staff(&self, id: Uuid) -> Result<Option<StaffMember>, DatabaseError> {
        Ok(self.state.read().staff.get(&id).cloned())
    }

    async fn find_instructor_by_name(
        &self,
        full_name: &str,
    ) -> Result<Option<StaffMember>, DatabaseError> {
        let wanted = full_name.trim().to_lowercase();
        let state = self.state.read();
        let mut matches: Vec<_> = state
            .staff
            .values()
            .filter(|m| m.role == StaffRole::Instructor && m.full_name.to_lowercase() == wanted)
            .collect();
        matches.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(matches.first().map(|m| (*m).clone()))
    }

    async fn list_staff(&self) -> Result<Vec<StaffMember>, DatabaseError> {
        let mut members: Vec<_> = self.state.read().staff.values().cloned().collect();
        members.sort_by(|a, b| a.full_name.cmp(&b.full_name));
        Ok(members)
    }
}

#[async_trait]
impl NoteStore for MemoryStore {
    async fn insert_note(&self, note: &StudentNote) -> Result<(), DatabaseError> {
        let mut state = self.state.write();
        if !state.registrations.contains_key(&note.registration_id) {
            return Err(DatabaseError::InvalidInput(
                "Note refers to an unknown registration".to_string(),
            ));
        }
        state.notes.push(note.clone());
        Ok(())
    }

    async fn list_notes(&self, registration_id: Uuid) -> Result<Vec<StudentNote>, DatabaseError> {
        let mut notes: Vec<_> = self
            .state
            .read()
            .notes
            .iter()
            .filter(|n| n.registration_id == registration_id)
            .cloned()
            .collect();
        notes.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(notes)
    }
}

#[async_trait]
impl TemplateStore for MemoryStore {
    async fn insert_template(&self, template: &CertificateTemplate) -> Result<(), DatabaseError> {
        let mut state = self.state.write();
        if state.templates.values().any(|t| t.name == template.name) {
            return Err(DatabaseError::Duplicate(TEMPLATE_NAME_KEY.to_string()));
        }
        if template.is_active {
            for existing in state.templates.values_mut() {
                existing.is_active = false;
            }
        }
        state.templates.insert(template.id, template.clone());
        Ok(())
    }

    async fn list_templates(&self) -> Result<Vec<CertificateTemplate>, DatabaseError> {
        let mut templates: Vec<_> = self.state.read().templates.values().cloned().collect();
        templates.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(templates)
    }

    async fn activate_template(&self, id: Uuid) -> Result<CertificateTemplate, DatabaseError> {
        let mut state = self.state.write();
        if !state.templates.contains_key(&id) {
            return Err(DatabaseError::NotFound);
        }
        for template in state.templates.values_mut() {
            template.is_active = template.id == id;
        }
        state.templates.get(&id).cloned().ok_or(DatabaseError::NotFound)
    }

    async fn active_template(&self) -> Result<Option<CertificateTemplate>, DatabaseError> {
        Ok(self
            .state
            .read()
            .templates
            .values()
            .find(|t| t.is_active)
            .cloned())
    }
}

#[async_trait]
impl AuditStore for MemoryStore {
    async fn insert_audit_entry(&self, entry: &AuditEntry) -> Result<(), DatabaseError> {
        self.state.write().audit.push(entry.clone());
        Ok(())
    }

    async fn list_audit_entries(
        &self,
        filter: &AuditFilter,
    ) -> Result<(Vec<AuditEntry>, u64), DatabaseError> {
        let state = self.state.read();
        let mut matches: Vec<_> = state.audit.iter().filter(|e| filter.matches(e)).collect();
        matches.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = matches.len() as u64;
        let page = matches
            .into_iter()
            .skip(filter.offset() as usize)
            .take(filter.limit() as usize)
            .cloned()
            .collect();
        Ok((page, total))
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> Result<(), DatabaseError> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
