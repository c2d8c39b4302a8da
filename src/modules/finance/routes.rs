use axum::{
    routing::{get, put},
    Router,
};

use super::handlers::{list_payments, payment_statistics, update_payment};
use crate::app_state::AppState;

pub fn finance_routes() -> Router<AppState> {
    Router::new()
        .route("/payments", get(list_payments))
        .route("/payments/{id}", put(update_payment))
        .route("/statistics", get(payment_statistics))
}
