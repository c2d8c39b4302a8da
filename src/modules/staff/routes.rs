use axum::{routing::get, Router};

use super::handlers::{create_staff, list_instructors, list_staff};
use crate::app_state::AppState;

pub fn staff_routes() -> Router<AppState> {
    Router::new()
        .route("/staff", get(list_staff).post(create_staff))
        .route("/instructors", get(list_instructors))
}
