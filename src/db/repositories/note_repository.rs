use std::collections::HashMap;
use std::sync::Arc;

use time::OffsetDateTime;
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use super::RegistrationRepository;
use crate::db::models::{Actor, NewStudentNote, StudentNote, StudentNoteView};
use crate::db::store::{NoteStore, StaffStore, Store};
use crate::error::{AppError, AppResult};

/// Instructors only see students they registered or teach. Admins see all.
pub fn ensure_instructor_of(
    actor: &Actor,
    assigned_instructor_id: Option<Uuid>,
    registered_by: Option<Uuid>,
) -> AppResult<()> {
    if actor.is_admin()
        || assigned_instructor_id == Some(actor.id)
        || registered_by == Some(actor.id)
    {
        return Ok(());
    }
    Err(AppError::Authorization(
        "This student is not assigned to you".to_string(),
    ))
}

/// Instructor notes on students.
#[derive(Clone)]
pub struct NoteRepository {
    store: Arc<dyn Store>,
    registrations: RegistrationRepository,
}

impl NoteRepository {
    pub fn new(store: Arc<dyn Store>, registrations: RegistrationRepository) -> Self {
        Self {
            store,
            registrations,
        }
    }

    pub async fn add(&self, actor: &Actor, new: NewStudentNote) -> AppResult<StudentNote> {
        new.validate()?;
        let record = self.registrations.get_record(new.registration_id).await?;
        ensure_instructor_of(actor, record.assigned_instructor_id, record.registered_by)?;

        let note = StudentNote {
            id: Uuid::now_v7(),
            registration_id: record.id,
            instructor_id: actor.id,
            note: new.note.trim().to_string(),
            created_at: OffsetDateTime::now_utc(),
        };
        if note.note.is_empty() {
            return Err(AppError::Validation("Note must not be blank".to_string()));
        }

        self.store.insert_note(&note).await?;
        info!(registration_id = %note.registration_id, instructor_id = %actor.id, "Student note added");
        Ok(note)
    }

    /// Newest first, each with the writing instructor's name.
    pub async fn list(&self, actor: &Actor, registration_id: Uuid) -> AppResult<Vec<StudentNoteView>> {
        let record = self.registrations.get_record(registration_id).await?;
        ensure_instructor_of(actor, record.assigned_instructor_id, record.registered_by)?;

        let notes = self.store.list_notes(registration_id).await?;
        let mut names: HashMap<Uuid, Option<String>> = HashMap::new();
        let mut views = Vec::with_capacity(notes.len());
        for note in notes {
            let instructor_name = match names.get(&note.instructor_id) {
                Some(name) => name.clone(),
                None => {
                    let name = self
                        .store
                        .get_staff(note.instructor_id)
                        .await?
                        .map(|staff| staff.full_name);
                    names.insert(note.instructor_id, name.clone());
                    name
                }
            };
            views.push(StudentNoteView {
                note,
                instructor_name,
            });
        }
        Ok(views)
    }
}
