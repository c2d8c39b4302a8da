use std::sync::Arc;

use time::OffsetDateTime;
use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::crypto::{DecryptedField, FieldCipher};
use crate::db::models::{
    AssignInstructor, Batch, CertificateStatus, NewRegistration, PaymentChange,
    PaymentStatistics, PaymentStatus, ProgramLevel, Registration, RegistrationRecord, StaffRole,
    UpdatePayment, UpdateRegistration,
};
use crate::db::store::{RegistrationStore, StaffStore, Store};
use crate::error::{AppError, AppResult};

/// Registration access with transparent PII encryption.
///
/// Email and phone are sealed on the way in and opened in [`hydrate`] on the
/// way out. Nothing else in the crate decrypts registration fields.
///
/// [`hydrate`]: RegistrationRepository::hydrate
#[derive(Clone)]
pub struct RegistrationRepository {
    store: Arc<dyn Store>,
    cipher: Arc<FieldCipher>,
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

impl RegistrationRepository {
    pub fn new(store: Arc<dyn Store>, cipher: Arc<FieldCipher>) -> Self {
        Self { store, cipher }
    }

    /// The lookup hash stored alongside the encrypted email.
    pub fn email_hash(&self, email: &str) -> String {
        self.cipher.hash(&normalize_email(email))
    }

    pub fn hydrate(&self, record: &RegistrationRecord) -> Registration {
        let email = self.open(record.id, "email", &record.email);
        let phone = self.open(record.id, "phone", &record.phone);

        Registration {
            id: record.id,
            full_name: record.full_name.clone(),
            email,
            phone,
            city_country: record.city_country.clone(),
            region: record.region,
            program_level: record.program_level,
            mode: record.mode,
            referral_source: record.referral_source.clone(),
            referrer_name: record.referrer_name.clone(),
            assigned_instructor_id: record.assigned_instructor_id,
            batch_id: record.batch_id,
            registered_by: record.registered_by,
            payment_status: record.payment_status,
            payment_mode: record.payment_mode,
            transaction_id: record.transaction_id.clone(),
            payment_date: record.payment_date,
            certificate_status: record.certificate_status,
            certificate_issued_at: record.certificate_issued_at,
            management_notes: record.management_notes.clone(),
            manual_date: record.manual_date,
            registered_at: record.registered_at,
        }
    }

    fn open(&self, id: Uuid, field: &'static str, stored: &str) -> String {
        let opened = self.cipher.decrypt(stored);
        if let DecryptedField::PassThrough(_) = &opened {
            if !stored.is_empty() {
                warn!(registration_id = %id, field, "Stored field did not decrypt; returning it as stored");
            }
        }
        opened.into_inner()
    }

    fn seal(&self, plaintext: &str) -> AppResult<String> {
        self.cipher
            .encrypt(plaintext)
            .map_err(|e| AppError::InternalServerError(e.to_string()))
    }

    /// Creates a registration.
    ///
    /// With `registered_by` set the registering instructor is also the
    /// assigned one. Otherwise an instructor whose full name matches the
    /// referrer name is assigned.
    pub async fn create(
        &self,
        new: NewRegistration,
        registered_by: Option<Uuid>,
    ) -> AppResult<Registration> {
        new.validate()?;

        let email = normalize_email(&new.email);
        let email_hash = self.cipher.hash(&email);

        if self
            .store
            .find_registration_by_email_hash(&email_hash, new.program_level)
            .await?
            .is_some()
        {
            return Err(AppError::Conflict(
                "Email already registered for this program level".to_string(),
            ));
        }

        let referrer_name = new
            .referrer_name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty());

        let assigned_instructor_id = match (registered_by, referrer_name.as_deref()) {
            (Some(instructor_id), _) => Some(instructor_id),
            (None, Some(name)) => self
                .store
                .find_instructor_by_name(name)
                .await?
                .map(|instructor| instructor.id),
            (None, None) => None,
        };

        let record = RegistrationRecord {
            id: Uuid::now_v7(),
            full_name: new.full_name.trim().to_string(),
            email: self.seal(&email)?,
            email_hash,
            phone: self.seal(new.phone.trim())?,
            city_country: new.city_country.trim().to_string(),
            region: new.region,
            program_level: new.program_level,
            mode: new.mode,
            referral_source: new.referral_source,
            referrer_name,
            assigned_instructor_id,
            batch_id: None,
            registered_by,
            payment_status: PaymentStatus::Pending,
            payment_mode: None,
            transaction_id: None,
            payment_date: None,
            certificate_status: CertificateStatus::Pending,
            certificate_issued_at: None,
            management_notes: None,
            manual_date: new.manual_date,
            registered_at: OffsetDateTime::now_utc(),
        };

        self.store.insert_registration(&record).await?;
        info!(registration_id = %record.id, program_level = ?record.program_level, "Registration created");

        Ok(self.hydrate(&record))
    }

    /// The stored row, still sealed. Callers that need field values go
    /// through [`hydrate`](Self::hydrate).
    pub async fn get_record(&self, id: Uuid) -> AppResult<RegistrationRecord> {
        self.store
            .get_registration(id)
            .await?
            .ok_or_else(|| AppError::not_found("Registration"))
    }

    pub async fn get(&self, id: Uuid) -> AppResult<Registration> {
        let record = self.get_record(id).await?;
        Ok(self.hydrate(&record))
    }

    pub async fn list(&self) -> AppResult<Vec<Registration>> {
        let records = self.store.list_registrations().await?;
        Ok(records.iter().map(|r| self.hydrate(r)).collect())
    }

    pub async fn list_by_batch(&self, batch_id: Uuid) -> AppResult<Vec<Registration>> {
        let records = self.store.list_registrations_by_batch(batch_id).await?;
        Ok(records.iter().map(|r| self.hydrate(r)).collect())
    }

    pub async fn list_for_instructor(&self, instructor_id: Uuid) -> AppResult<Vec<Registration>> {
        let records = self
            .store
            .list_registrations_for_instructor(instructor_id)
            .await?;
        Ok(records.iter().map(|r| self.hydrate(r)).collect())
    }

    pub async fn find_by_email(
        &self,
        email: &str,
        program_level: ProgramLevel,
    ) -> AppResult<Option<Registration>> {
        let record = self
            .store
            .find_registration_by_email_hash(&self.email_hash(email), program_level)
            .await?;
        Ok(record.map(|r| self.hydrate(&r)))
    }

    /// Admin edit. Email and phone are re-sealed only when they change.
    pub async fn update(&self, id: Uuid, changes: UpdateRegistration) -> AppResult<Registration> {
        changes.validate()?;

        let mut record = self.get_record(id).await?;
        let current = self.hydrate(&record);

        if let Some(email) = changes.email {
            let email = normalize_email(&email);
            if email != current.email {
                let email_hash = self.cipher.hash(&email);
                let taken = self
                    .store
                    .find_registration_by_email_hash(&email_hash, record.program_level)
                    .await?
                    .is_some_and(|other| other.id != id);
                if taken {
                    return Err(AppError::Conflict(
                        "Email already registered for this program level".to_string(),
                    ));
                }
                record.email = self.seal(&email)?;
                record.email_hash = email_hash;
            }
        }

        if let Some(phone) = changes.phone {
            let phone = phone.trim().to_string();
            if phone != current.phone {
                record.phone = self.seal(&phone)?;
            }
        }

        if let Some(full_name) = changes.full_name {
            record.full_name = full_name.trim().to_string();
        }
        if let Some(city_country) = changes.city_country {
            record.city_country = city_country.trim().to_string();
        }
        if let Some(region) = changes.region {
            record.region = region;
        }
        if let Some(mode) = changes.mode {
            record.mode = mode;
        }
        if let Some(referrer_name) = changes.referrer_name {
            record.referrer_name = Some(referrer_name.trim().to_string()).filter(|n| !n.is_empty());
        }
        if let Some(instructor_id) = changes.assigned_instructor_id {
            record.assigned_instructor_id = Some(instructor_id);
        }
        if let Some(manual_date) = changes.manual_date {
            record.manual_date = Some(manual_date);
        }
        if let Some(notes) = changes.management_notes {
            record.management_notes = Some(notes);
        }

        let updated = self.store.update_registration_details(&record).await?;
        Ok(self.hydrate(&updated))
    }

    /// Finance update. Moving to `Paid` stamps the payment date.
    pub async fn update_payment(&self, id: Uuid, payment: UpdatePayment) -> AppResult<Registration> {
        payment.validate()?;

        let change = PaymentChange {
            payment_status: payment.payment_status,
            payment_mode: payment.payment_mode,
            transaction_id: payment
                .transaction_id
                .map(|t| Some(t.trim().to_string()).filter(|t| !t.is_empty())),
            paid_at: OffsetDateTime::now_utc(),
        };

        let updated = self.store.update_payment(id, &change).await?;
        info!(registration_id = %id, payment_status = ?updated.payment_status, "Payment updated");
        Ok(self.hydrate(&updated))
    }

    /// Moves the student into `batch` under the batch's instructor.
    pub async fn assign_batch(&self, id: Uuid, batch: &Batch) -> AppResult<Registration> {
        let updated = self
            .store
            .set_registration_batch(id, Some(batch.id), Some(batch.instructor_id))
            .await?;
        Ok(self.hydrate(&updated))
    }

    /// Bulk admin assignment. The target must be an instructor.
    pub async fn assign_instructor(&self, assignment: AssignInstructor) -> AppResult<u64> {
        assignment.validate()?;

        let instructor = self
            .store
            .get_staff(assignment.instructor_id)
            .await?
            .filter(|member| member.role == StaffRole::Instructor)
            .ok_or_else(|| AppError::not_found("Instructor"))?;

        let updated = self
            .store
            .assign_instructor(&assignment.registration_ids, instructor.id)
            .await?;
        info!(instructor_id = %instructor.id, updated, "Registrations assigned to instructor");
        Ok(updated)
    }

    pub async fn payment_statistics(&self) -> AppResult<PaymentStatistics> {
        let records = self.store.list_registrations().await?;
        let total = records.len();
        let paid = records
            .iter()
            .filter(|r| r.payment_status == PaymentStatus::Paid)
            .count();
        let payment_rate = if total == 0 {
            0.0
        } else {
            (paid as f64 / total as f64 * 10_000.0).round() / 100.0
        };

        Ok(PaymentStatistics {
            total_registrations: total,
            paid_registrations: paid,
            pending_payments: total - paid,
            payment_rate,
        })
    }

    pub async fn delete(&self, id: Uuid) -> AppResult<()> {
        if !self.store.delete_registration(id).await? {
            return Err(AppError::not_found("Registration"));
        }
        info!(registration_id = %id, "Registration deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{DeliveryMode, Region, StaffMember, StaffRole};
    use crate::db::MemoryStore;

    fn repo() -> (RegistrationRepository, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let cipher = Arc::new(FieldCipher::from_secret("registration-tests"));
        (RegistrationRepository::new(store.clone(), cipher), store)
    }

    fn new_registration(email: &str, level: ProgramLevel) -> NewRegistration {
        NewRegistration {
            full_name: "Asha Verma".to_string(),
            email: email.to_string(),
            phone: "+91 98765 43210".to_string(),
            city_country: "Pune, India".to_string(),
            region: Region::India,
            program_level: level,
            mode: DeliveryMode::Online,
            referral_source: Some("Friend".to_string()),
            referrer_name: None,
            manual_date: None,
        }
    }

    #[tokio::test]
    async fn create_seals_pii_and_hydrates_plaintext() {
        let (repo, store) = repo();
        let created = repo
            .create(new_registration("Asha@Example.com", ProgramLevel::Level1), None)
            .await
            .unwrap();

        assert_eq!(created.email, "asha@example.com");
        assert_eq!(created.phone, "+91 98765 43210");

        let raw = store.get_registration(created.id).await.unwrap().unwrap();
        assert_ne!(raw.email, "asha@example.com");
        assert!(raw.email.contains(':'));
        assert_eq!(raw.email_hash, repo.email_hash("asha@example.com"));
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected_per_level_only() {
        let (repo, _) = repo();
        repo.create(new_registration("dup@example.com", ProgramLevel::Level1), None)
            .await
            .unwrap();

        let err = repo
            .create(new_registration("DUP@Example.com", ProgramLevel::Level1), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        repo.create(new_registration("dup@example.com", ProgramLevel::Level2), None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn find_by_email_ignores_case() {
        let (repo, _) = repo();
        let created = repo
            .create(new_registration("find@example.com", ProgramLevel::Level3), None)
            .await
            .unwrap();

        let found = repo
            .find_by_email("FIND@example.com", ProgramLevel::Level3)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, created.id);
        assert!(repo
            .find_by_email("find@example.com", ProgramLevel::Level1)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn referrer_name_assigns_matching_instructor() {
        let (repo, store) = repo();
        let instructor = StaffMember {
            id: Uuid::now_v7(),
            full_name: "Sonia Kapoor".to_string(),
            email: "sonia@example.com".to_string(),
            role: StaffRole::Instructor,
            created_at: OffsetDateTime::now_utc(),
        };
        store.insert_staff(&instructor).await.unwrap();

        let mut new = new_registration("ref@example.com", ProgramLevel::Level1);
        new.referrer_name = Some("  sonia kapoor ".to_string());
        let created = repo.create(new, None).await.unwrap();

        assert_eq!(created.assigned_instructor_id, Some(instructor.id));
        assert_eq!(created.referrer_name.as_deref(), Some("sonia kapoor"));
    }

    #[tokio::test]
    async fn update_reseals_only_changed_fields() {
        let (repo, store) = repo();
        let created = repo
            .create(new_registration("old@example.com", ProgramLevel::Level1), None)
            .await
            .unwrap();
        let before = store.get_registration(created.id).await.unwrap().unwrap();

        let updated = repo
            .update(
                created.id,
                UpdateRegistration {
                    email: Some("new@example.com".to_string()),
                    phone: Some("+91 98765 43210".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let after = store.get_registration(created.id).await.unwrap().unwrap();

        assert_eq!(updated.email, "new@example.com");
        assert_ne!(after.email, before.email);
        assert_eq!(after.email_hash, repo.email_hash("new@example.com"));
        assert_eq!(after.phone, before.phone);
    }

    #[tokio::test]
    async fn legacy_plaintext_rows_read_back_as_stored() {
        let (repo, store) = repo();
        let created = repo
            .create(new_registration("legacy@example.com", ProgramLevel::Level1), None)
            .await
            .unwrap();

        let mut raw = store.get_registration(created.id).await.unwrap().unwrap();
        raw.phone = "12345 67890".to_string();
        store.update_registration_details(&raw).await.unwrap();

        let read = repo.get(created.id).await.unwrap();
        assert_eq!(read.phone, "12345 67890");
        assert_eq!(read.email, "legacy@example.com");
    }

    #[tokio::test]
    async fn paid_stamps_payment_date() {
        let (repo, _) = repo();
        let created = repo
            .create(new_registration("pay@example.com", ProgramLevel::Level1), None)
            .await
            .unwrap();
        assert!(created.payment_date.is_none());

        let paid = repo
            .update_payment(
                created.id,
                UpdatePayment {
                    payment_status: PaymentStatus::Paid,
                    payment_mode: None,
                    transaction_id: Some("TXN-1".to_string()),
                },
            )
            .await
            .unwrap();
        assert_eq!(paid.payment_status, PaymentStatus::Paid);
        assert!(paid.payment_date.is_some());
        assert_eq!(paid.transaction_id.as_deref(), Some("TXN-1"));
    }

    #[tokio::test]
    async fn repeat_paid_keeps_first_payment_date() {
        let (repo, _) = repo();
        let created = repo
            .create(new_registration("twice@example.com", ProgramLevel::Level1), None)
            .await
            .unwrap();
        let paid = UpdatePayment {
            payment_status: PaymentStatus::Paid,
            payment_mode: None,
            transaction_id: None,
        };

        let first = repo.update_payment(created.id, paid.clone()).await.unwrap();
        let second = repo.update_payment(created.id, paid).await.unwrap();
        assert_eq!(first.payment_date, second.payment_date);
        assert!(second.transaction_id.is_none());
    }

    #[tokio::test]
    async fn assign_instructor_requires_an_instructor() {
        let (repo, store) = repo();
        let a = repo
            .create(new_registration("a@example.com", ProgramLevel::Level1), None)
            .await
            .unwrap();
        let b = repo
            .create(new_registration("b@example.com", ProgramLevel::Level1), None)
            .await
            .unwrap();

        let finance = StaffMember {
            id: Uuid::now_v7(),
            full_name: "Ravi Finance".to_string(),
            email: "ravi@example.com".to_string(),
            role: StaffRole::Finance,
            created_at: OffsetDateTime::now_utc(),
        };
        let instructor = StaffMember {
            id: Uuid::now_v7(),
            full_name: "Meera Iyer".to_string(),
            email: "meera@example.com".to_string(),
            role: StaffRole::Instructor,
            created_at: OffsetDateTime::now_utc(),
        };
        store.insert_staff(&finance).await.unwrap();
        store.insert_staff(&instructor).await.unwrap();

        let err = repo
            .assign_instructor(AssignInstructor {
                registration_ids: vec![a.id],
                instructor_id: finance.id,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        let updated = repo
            .assign_instructor(AssignInstructor {
                registration_ids: vec![a.id, b.id, Uuid::now_v7()],
                instructor_id: instructor.id,
            })
            .await
            .unwrap();
        assert_eq!(updated, 2);
        assert_eq!(repo.get(b.id).await.unwrap().assigned_instructor_id, Some(instructor.id));
    }

    #[tokio::test]
    async fn payment_statistics_count_paid_share() {
        let (repo, _) = repo();
        let empty = repo.payment_statistics().await.unwrap();
        assert_eq!(empty.total_registrations, 0);
        assert_eq!(empty.payment_rate, 0.0);

        let mut ids = Vec::new();
        for email in ["s1@example.com", "s2@example.com", "s3@example.com"] {
            let created = repo
                .create(new_registration(email, ProgramLevel::Level1), None)
                .await
                .unwrap();
            ids.push(created.id);
        }
        repo.update_payment(
            ids[0],
            UpdatePayment {
                payment_status: PaymentStatus::Paid,
                payment_mode: None,
                transaction_id: None,
            },
        )
        .await
        .unwrap();

        let stats = repo.payment_statistics().await.unwrap();
        assert_eq!(stats.total_registrations, 3);
        assert_eq!(stats.paid_registrations, 1);
        assert_eq!(stats.pending_payments, 2);
        assert_eq!(stats.payment_rate, 33.33);
    }

    #[tokio::test]
    async fn delete_unknown_is_not_found() {
        let (repo, _) = repo();
        let err = repo.delete(Uuid::now_v7()).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
