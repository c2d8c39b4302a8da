use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use time::OffsetDateTime;
use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

use super::RegistrationRepository;
use crate::certification::{numbering, SequenceLocks};
use crate::db::models::{
    Actor, Attendance, Batch, BatchCodeQuery, BatchOverview, BatchStatus, DeliveryMode, MoveStudent,
    NewBatch, ProgramLevel, Registration, StaffMember, DEFAULT_MAX_STUDENTS,
};
use crate::db::store::{AttendanceStore, BatchStore, StaffStore, Store, BATCH_CODE_KEY};
use crate::error::{AppError, AppResult};

const MAX_CODE_ATTEMPTS: u64 = 5;

/// A student in a batch with their attendance in that batch.
#[derive(Debug, Clone, Serialize)]
pub struct RosterEntry {
    #[serde(flatten)]
    pub registration: Registration,
    pub attendance: Vec<Attendance>,
}

#[derive(Clone)]
pub struct BatchRepository {
    store: Arc<dyn Store>,
    registrations: RegistrationRepository,
    locks: Arc<SequenceLocks>,
}

impl BatchRepository {
    pub fn new(
        store: Arc<dyn Store>,
        registrations: RegistrationRepository,
        locks: Arc<SequenceLocks>,
    ) -> Self {
        Self {
            store,
            registrations,
            locks,
        }
    }

    async fn instructor(&self, id: Uuid) -> AppResult<StaffMember> {
        self.store
            .get_staff(id)
            .await?
            .ok_or_else(|| AppError::not_found("Instructor"))
    }

    fn code_prefix(&self, level: ProgramLevel, instructor: &StaffMember, start: time::Date) -> String {
        numbering::batch_code_prefix(level, &instructor.full_name, start)
    }

    /// The code the next batch with these parameters would get. Nothing is
    /// reserved.
    pub async fn preview_code(&self, actor: &Actor, query: BatchCodeQuery) -> AppResult<String> {
        let instructor = self.instructor(actor.id).await?;
        let prefix = self.code_prefix(query.program_level, &instructor, query.start_date);
        let existing = self.store.count_batches_with_code_prefix(&prefix).await?;
        Ok(numbering::batch_code(&prefix, existing))
    }

    /// Creates a batch owned by the acting instructor and moves the listed
    /// students into it.
    pub async fn create(&self, actor: &Actor, new: NewBatch) -> AppResult<Batch> {
        new.validate()?;
        if let Some(end) = new.end_date {
            if end < new.start_date {
                return Err(AppError::Validation(
                    "End date must not be before start date".to_string(),
                ));
            }
        }

        let max_students = new.max_students.unwrap_or(DEFAULT_MAX_STUDENTS);
        if new.student_ids.len() > max_students as usize {
            return Err(AppError::Validation(format!(
                "Batch holds at most {} students",
                max_students
            )));
        }
        for id in &new.student_ids {
            self.registrations.get_record(*id).await?;
        }

        let instructor = self.instructor(actor.id).await?;
        let prefix = self.code_prefix(new.program_level, &instructor, new.start_date);
        let _guard = self.locks.lock(&prefix).await;

        for attempt in 0..MAX_CODE_ATTEMPTS {
            let existing = self.store.count_batches_with_code_prefix(&prefix).await?;
            let now = OffsetDateTime::now_utc();
            let batch = Batch {
                id: Uuid::now_v7(),
                batch_code: numbering::batch_code(&prefix, existing + attempt),
                program_level: new.program_level,
                instructor_id: instructor.id,
                start_date: new.start_date,
                end_date: new.end_date,
                mode: new.mode.unwrap_or(DeliveryMode::Online),
                max_students,
                current_students: new.student_ids.len() as i32,
                status: BatchStatus::Upcoming,
                total_sessions: new.total_sessions.unwrap_or(0),
                created_by: Some(actor.id),
                created_at: now,
                updated_at: now,
            };

            match self.store.insert_batch(&batch, &new.student_ids).await {
                Ok(()) => {
                    info!(
                        batch_code = %batch.batch_code,
                        instructor_id = %instructor.id,
                        students = new.student_ids.len(),
                        "Batch created"
                    );
                    return Ok(batch);
                }
                Err(e) if e.is_duplicate_of(BATCH_CODE_KEY) => {
                    warn!(batch_code = %batch.batch_code, "Batch code taken, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(AppError::Conflict(format!(
            "Could not allocate a batch code for prefix {}",
            prefix
        )))
    }

    pub async fn get(&self, id: Uuid) -> AppResult<Batch> {
        self.store
            .get_batch(id)
            .await?
            .ok_or_else(|| AppError::not_found("Batch"))
    }

    /// Every batch with its instructor's name and live student count.
    pub async fn list(&self) -> AppResult<Vec<BatchOverview>> {
        let batches = self.store.list_batches().await?;
        self.overview(batches).await
    }

    pub async fn list_for_instructor(&self, instructor_id: Uuid) -> AppResult<Vec<BatchOverview>> {
        let batches = self.store.list_batches_for_instructor(instructor_id).await?;
        self.overview(batches).await
    }

    async fn overview(&self, batches: Vec<Batch>) -> AppResult<Vec<BatchOverview>> {
        let names: HashMap<Uuid, String> = self
            .store
            .list_staff()
            .await?
            .into_iter()
            .map(|s| (s.id, s.full_name))
            .collect();

        let mut counts: HashMap<Uuid, usize> = HashMap::new();
        for registration in self.registrations.list().await? {
            if let Some(batch_id) = registration.batch_id {
                *counts.entry(batch_id).or_default() += 1;
            }
        }

        Ok(batches
            .into_iter()
            .map(|batch| BatchOverview {
                instructor_name: names.get(&batch.instructor_id).cloned(),
                student_count: counts.get(&batch.id).copied().unwrap_or(0),
                batch,
            })
            .collect())
    }

    pub async fn students(&self, batch_id: Uuid) -> AppResult<Vec<Registration>> {
        self.get(batch_id).await?;
        self.registrations.list_by_batch(batch_id).await
    }

    /// Batch students with their attendance in this batch.
    pub async fn roster(&self, batch_id: Uuid) -> AppResult<Vec<RosterEntry>> {
        let students = self.students(batch_id).await?;
        let mut roster = Vec::with_capacity(students.len());
        for registration in students {
            let attendance = self
                .store
                .attendance_for(registration.id, Some(batch_id))
                .await?;
            roster.push(RosterEntry {
                registration,
                attendance,
            });
        }
        Ok(roster)
    }

    /// Moves a student into a batch the actor manages.
    pub async fn move_student(&self, actor: &Actor, request: MoveStudent) -> AppResult<Registration> {
        let registration = self.registrations.get(request.registration_id).await?;
        let target = self.get(request.target_batch_id).await?;

        if !actor.is_admin() && target.instructor_id != actor.id {
            return Err(AppError::Authorization(
                "You can only move students to batches you manage".to_string(),
            ));
        }
        if registration.batch_id == Some(target.id) {
            return Ok(registration);
        }

        let enrolled = self.registrations.list_by_batch(target.id).await?.len();
        if enrolled >= target.max_students as usize {
            return Err(AppError::Validation(format!(
                "Batch {} is full",
                target.batch_code
            )));
        }

        let moved = self.registrations.assign_batch(registration.id, &target).await?;
        info!(
            registration_id = %moved.id,
            batch_code = %target.batch_code,
            "Student moved to batch"
        );
        Ok(moved)
    }
}
