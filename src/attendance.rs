//! Per-session attendance, keyed by (student, batch, date).

use std::collections::HashSet;
use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::db::models::{
    Actor, Attendance, AttendanceMark, AttendanceTally, Batch, BulkMarkAttendance, MarkAttendance,
};
use crate::db::repositories::RegistrationRepository;
use crate::db::store::{AttendanceStore, BatchStore, RegistrationStore, Store};
use crate::error::{AppError, AppResult};

#[derive(Clone)]
pub struct AttendanceLedger {
    store: Arc<dyn Store>,
    registrations: RegistrationRepository,
}

fn join_ids(ids: &[Uuid]) -> String {
    ids.iter().map(Uuid::to_string).collect::<Vec<_>>().join(", ")
}

impl AttendanceLedger {
    pub fn new(store: Arc<dyn Store>, registrations: RegistrationRepository) -> Self {
        Self {
            store,
            registrations,
        }
    }

    async fn batch(&self, id: Uuid) -> AppResult<Batch> {
        self.store
            .get_batch(id)
            .await?
            .ok_or_else(|| AppError::not_found("Batch"))
    }

    /// Marks one session. Re-marking the same date overwrites the status.
    pub async fn mark_one(&self, actor: &Actor, request: MarkAttendance) -> AppResult<Attendance> {
        let registration = self.registrations.get_record(request.registration_id).await?;
        let batch = self.batch(request.batch_id).await?;

        if registration.batch_id != Some(batch.id) {
            return Err(AppError::Validation(format!(
                "Student is not enrolled in batch {}",
                batch.batch_code
            )));
        }

        if !actor.is_admin() {
            let responsible = registration
                .assigned_instructor_id
                .unwrap_or(batch.instructor_id);
            if responsible != actor.id {
                return Err(AppError::Authorization(
                    "You are not the assigned instructor for this student".to_string(),
                ));
            }
        }

        let mark = AttendanceMark {
            registration_id: registration.id,
            batch_id: batch.id,
            session_date: request.date,
            status: request.status,
            instructor_id: if actor.is_admin() { batch.instructor_id } else { actor.id },
            program_level: batch.program_level,
        };

        let mut written = self.store.upsert_attendance(&[mark]).await?;
        let record = written
            .pop()
            .ok_or_else(|| AppError::InternalServerError("Attendance upsert returned no row".to_string()))?;

        info!(
            registration_id = %record.registration_id,
            batch_id = %batch.id,
            date = %record.session_date,
            status = ?record.status,
            "Attendance marked"
        );
        Ok(record)
    }

    /// Marks a whole session for a batch. Either every record is written or
    /// none is.
    pub async fn mark_bulk(
        &self,
        actor: &Actor,
        request: BulkMarkAttendance,
    ) -> AppResult<Vec<Attendance>> {
        if request.records.is_empty() {
            return Err(AppError::Validation("No attendance records supplied".to_string()));
        }

        let batch = self.batch(request.batch_id).await?;
        if !actor.is_admin() && batch.instructor_id != actor.id {
            return Err(AppError::Authorization(
                "You can only mark attendance for your own batches".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        let duplicates: Vec<Uuid> = request
            .records
            .iter()
            .map(|entry| entry.registration_id)
            .filter(|id| !seen.insert(*id))
            .collect();
        if !duplicates.is_empty() {
            return Err(AppError::Validation(format!(
                "Students listed more than once: {}",
                join_ids(&duplicates)
            )));
        }

        let enrolled: HashSet<Uuid> = self
            .store
            .list_registrations_by_batch(batch.id)
            .await?
            .into_iter()
            .map(|r| r.id)
            .collect();
        let outsiders: Vec<Uuid> = request
            .records
            .iter()
            .map(|entry| entry.registration_id)
            .filter(|id| !enrolled.contains(id))
            .collect();
        if !outsiders.is_empty() {
            return Err(AppError::Validation(format!(
                "Students not enrolled in batch {}: {}",
                batch.batch_code,
                join_ids(&outsiders)
            )));
        }

        let instructor_id = if actor.is_admin() { batch.instructor_id } else { actor.id };
        let marks: Vec<AttendanceMark> = request
            .records
            .iter()
            .map(|entry| AttendanceMark {
                registration_id: entry.registration_id,
                batch_id: batch.id,
                session_date: request.date,
                status: entry.status,
                instructor_id,
                program_level: batch.program_level,
            })
            .collect();

        let written = self.store.upsert_attendance(&marks).await?;
        info!(
            batch_code = %batch.batch_code,
            date = %request.date,
            records = written.len(),
            "Bulk attendance marked"
        );
        Ok(written)
    }

    /// Chronological records for a student, optionally limited to one batch.
    pub async fn attendance_for(
        &self,
        registration_id: Uuid,
        batch_id: Option<Uuid>,
    ) -> AppResult<Vec<Attendance>> {
        self.registrations.get_record(registration_id).await?;
        Ok(self.store.attendance_for(registration_id, batch_id).await?)
    }

    pub async fn tallies(&self) -> AppResult<Vec<AttendanceTally>> {
        Ok(self.store.attendance_tallies().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::FieldCipher;
    use crate::db::models::{
        AttendanceEntry, AttendanceStatus, BatchStatus, DeliveryMode, NewRegistration, ProgramLevel,
        Region, StaffRole,
    };
    use crate::db::MemoryStore;
    use time::macros::date;
    use time::OffsetDateTime;

    struct Fixture {
        ledger: AttendanceLedger,
        registrations: RegistrationRepository,
        store: Arc<MemoryStore>,
        instructor: Actor,
        batch: Batch,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let cipher = Arc::new(FieldCipher::from_secret("attendance-tests"));
        let registrations = RegistrationRepository::new(store.clone(), cipher);
        let ledger = AttendanceLedger::new(store.clone(), registrations.clone());
        let instructor = Actor::new(Uuid::now_v7(), StaffRole::Instructor);

        let now = OffsetDateTime::now_utc();
        let batch = Batch {
            id: Uuid::now_v7(),
            batch_code: "DECODE-L1-SK-150825-0001".to_string(),
            program_level: ProgramLevel::Level1,
            instructor_id: instructor.id,
            start_date: date!(2025 - 08 - 15),
            end_date: None,
            mode: DeliveryMode::Online,
            max_students: 30,
            current_students: 0,
            status: BatchStatus::Active,
            total_sessions: 4,
            created_by: Some(instructor.id),
            created_at: now,
            updated_at: now,
        };
        store.insert_batch(&batch, &[]).await.unwrap();

        Fixture {
            ledger,
            registrations,
            store,
            instructor,
            batch,
        }
    }

    async fn enrolled_student(f: &Fixture, email: &str) -> Uuid {
        let registration = f
            .registrations
            .create(
                NewRegistration {
                    full_name: "Student".to_string(),
                    email: email.to_string(),
                    phone: "9876543210".to_string(),
                    city_country: "Delhi, India".to_string(),
                    region: Region::India,
                    program_level: ProgramLevel::Level1,
                    mode: DeliveryMode::Online,
                    referral_source: None,
                    referrer_name: None,
                    manual_date: None,
                },
                None,
            )
            .await
            .unwrap();
        f.registrations
            .assign_batch(registration.id, &f.batch)
            .await
            .unwrap();
        registration.id
    }

    fn mark(f: &Fixture, registration_id: Uuid, status: AttendanceStatus) -> MarkAttendance {
        MarkAttendance {
            registration_id,
            batch_id: f.batch.id,
            date: date!(2025 - 08 - 16),
            status,
        }
    }

    #[tokio::test]
    async fn remarking_a_session_overwrites_it() {
        let f = fixture().await;
        let student = enrolled_student(&f, "a@example.com").await;

        f.ledger
            .mark_one(&f.instructor, mark(&f, student, AttendanceStatus::Absent))
            .await
            .unwrap();
        f.ledger
            .mark_one(&f.instructor, mark(&f, student, AttendanceStatus::Present))
            .await
            .unwrap();

        let records = f.ledger.attendance_for(student, Some(f.batch.id)).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, AttendanceStatus::Present);
    }

    #[tokio::test]
    async fn other_instructor_is_forbidden() {
        let f = fixture().await;
        let student = enrolled_student(&f, "b@example.com").await;
        let stranger = Actor::new(Uuid::now_v7(), StaffRole::Instructor);

        let err = f
            .ledger
            .mark_one(&stranger, mark(&f, student, AttendanceStatus::Present))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Authorization(_)));

        let admin = Actor::new(Uuid::now_v7(), StaffRole::Admin);
        let record = f
            .ledger
            .mark_one(&admin, mark(&f, student, AttendanceStatus::Present))
            .await
            .unwrap();
        assert_eq!(record.instructor_id, f.instructor.id);
    }

    #[tokio::test]
    async fn student_outside_batch_is_rejected() {
        let f = fixture().await;
        let student = enrolled_student(&f, "c@example.com").await;
        let raw = f.store.get_registration(student).await.unwrap().unwrap();
        f.store
            .set_registration_batch(student, None, raw.assigned_instructor_id)
            .await
            .unwrap();

        let err = f
            .ledger
            .mark_one(&f.instructor, mark(&f, student, AttendanceStatus::Present))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn bulk_is_all_or_nothing() {
        let f = fixture().await;
        let inside = enrolled_student(&f, "in@example.com").await;
        let outside = Uuid::now_v7();

        let err = f
            .ledger
            .mark_bulk(
                &f.instructor,
                BulkMarkAttendance {
                    batch_id: f.batch.id,
                    date: date!(2025 - 08 - 16),
                    records: vec![
                        AttendanceEntry {
                            registration_id: inside,
                            status: AttendanceStatus::Present,
                        },
                        AttendanceEntry {
                            registration_id: outside,
                            status: AttendanceStatus::Present,
                        },
                    ],
                },
            )
            .await
            .unwrap_err();
        match err {
            AppError::Validation(msg) => assert!(msg.contains(&outside.to_string())),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(f.ledger.attendance_for(inside, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn bulk_rejects_duplicates_and_empty_lists() {
        let f = fixture().await;
        let student = enrolled_student(&f, "dup@example.com").await;
        let entry = AttendanceEntry {
            registration_id: student,
            status: AttendanceStatus::Present,
        };

        let duplicate = f
            .ledger
            .mark_bulk(
                &f.instructor,
                BulkMarkAttendance {
                    batch_id: f.batch.id,
                    date: date!(2025 - 08 - 16),
                    records: vec![entry.clone(), entry],
                },
            )
            .await;
        assert!(matches!(duplicate, Err(AppError::Validation(_))));

        let empty = f
            .ledger
            .mark_bulk(
                &f.instructor,
                BulkMarkAttendance {
                    batch_id: f.batch.id,
                    date: date!(2025 - 08 - 16),
                    records: vec![],
                },
            )
            .await;
        assert!(matches!(empty, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn tallies_count_per_batch() {
        let f = fixture().await;
        let student = enrolled_student(&f, "t@example.com").await;
        for (day, status) in [
            (date!(2025 - 08 - 16), AttendanceStatus::Present),
            (date!(2025 - 08 - 17), AttendanceStatus::Present),
            (date!(2025 - 08 - 18), AttendanceStatus::Absent),
        ] {
            f.ledger
                .mark_one(
                    &f.instructor,
                    MarkAttendance {
                        registration_id: student,
                        batch_id: f.batch.id,
                        date: day,
                        status,
                    },
                )
                .await
                .unwrap();
        }

        let tallies = f.ledger.tallies().await.unwrap();
        assert_eq!(tallies.len(), 1);
        assert_eq!(tallies[0].present, 2);
        assert_eq!(tallies[0].absent, 1);
    }
}
