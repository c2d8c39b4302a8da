use axum::{extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::db::models::{Actor, StaffRole};
use crate::error::{AppError, AppResult};

/// Set by the authenticating gateway in front of this service.
pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";

fn header<'a>(parts: &'a Parts, name: &str) -> AppResult<&'a str> {
    parts
        .headers
        .get(name)
        .ok_or_else(|| AppError::Authentication(format!("Missing {} header", name)))?
        .to_str()
        .map_err(|_| AppError::Authentication(format!("Malformed {} header", name)))
}

impl FromRequestParts<AppState> for Actor {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let id = header(parts, ACTOR_ID_HEADER)?
            .trim()
            .parse::<Uuid>()
            .map_err(|_| AppError::Authentication("Actor id is not a valid UUID".to_string()))?;
        let role = header(parts, ACTOR_ROLE_HEADER)?
            .trim()
            .parse::<StaffRole>()
            .map_err(AppError::Authentication)?;

        Ok(Actor::new(id, role))
    }
}

/// Admins pass every check.
pub fn require_role(actor: &Actor, roles: &[StaffRole]) -> AppResult<()> {
    if actor.has_any_role(roles) {
        Ok(())
    } else {
        Err(AppError::Authorization(format!(
            "Role {:?} may not perform this action",
            actor.role
        )))
    }
}
