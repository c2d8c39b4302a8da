use axum::{routing::get, Router};

use super::handlers::verify_certificate;
use crate::app_state::AppState;

pub fn certificate_routes() -> Router<AppState> {
    Router::new().route("/certificates/verify/{number}", get(verify_certificate))
}
