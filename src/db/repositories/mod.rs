mod batch_repository;
mod note_repository;
mod registration_repository;
mod template_repository;

pub use batch_repository::{BatchRepository, RosterEntry};
pub use note_repository::{ensure_instructor_of, NoteRepository};
pub use registration_repository::RegistrationRepository;
pub use template_repository::TemplateRepository;
