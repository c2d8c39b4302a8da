use std::path::Path;

use axum::{extract::State, middleware, routing::get, Json, Router};
use serde_json::json;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tower_http::services::ServeDir;

use crate::{
    app_state::AppState,
    db::Store,
    middleware::tracing::observability_middleware,
    modules::{
        certificates::routes::certificate_routes, finance::routes::finance_routes,
        instructor::routes::instructor_routes, management::routes::management_routes,
        registrations::routes::{public_registration_routes, registration_admin_routes},
        staff::routes::staff_routes,
    },
};

pub fn create_router(state: AppState, certificates_dir: impl AsRef<Path>) -> Router {
    let public_api = public_registration_routes().merge(certificate_routes());
    let admin_api = registration_admin_routes().merge(staff_routes());

    Router::new()
        .route("/", get(hello))
        .route("/health", get(health_check))
        .nest("/api", public_api)
        .nest("/api/admin", admin_api)
        .nest("/api/instructor", instructor_routes())
        .nest("/api/finance", finance_routes())
        .nest("/api/management", management_routes())
        .nest_service("/certificates", ServeDir::new(certificates_dir.as_ref()))
        .layer(middleware::from_fn(observability_middleware))
        .with_state(state)
}

async fn hello() -> &'static str {
    "Training portal says hello!\n"
}

async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    let store_status = match state.store.ping().await {
        Ok(()) => "healthy",
        Err(e) => {
            tracing::info!("Store health check failed: {}", e);
            "unhealthy"
        }
    };

    let telemetry_health = crate::telemetry::telemetry_health_check();

    Json(json!({
        "status": "ok",
        "timestamp": OffsetDateTime::now_utc().format(&Rfc3339).ok(),
        "version": env!("CARGO_PKG_VERSION"),
        "services": {
            "store": {
                "backend": state.store.backend_name(),
                "status": store_status,
            },
            "telemetry": telemetry_health
        }
    }))
}
