use axum::{
    routing::{get, post},
    Router,
};

use super::handlers::{
    add_note, batch_roster, bulk_mark_attendance, create_batch, mark_attendance, move_student,
    my_batches, my_students, preview_batch_code, register_student, student_attendance,
    student_notes,
};
use crate::app_state::AppState;

pub fn instructor_routes() -> Router<AppState> {
    Router::new()
        .route("/students", get(my_students).post(register_student))
        .route("/students/{id}/attendance", get(student_attendance))
        .route("/batches", get(my_batches).post(create_batch))
        .route("/batches/code-preview", get(preview_batch_code))
        .route("/batches/move-student", post(move_student))
        .route("/batches/{id}/students", get(batch_roster))
        .route("/attendance", post(mark_attendance))
        .route("/attendance/bulk", post(bulk_mark_attendance))
        .route("/notes", post(add_note))
        .route("/notes/{registration_id}", get(student_notes))
}
