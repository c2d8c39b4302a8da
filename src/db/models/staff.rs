use serde::{Deserialize, Serialize};
use sqlx::types::Uuid;
use time::OffsetDateTime;
use validator::Validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "staff_role", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum StaffRole {
    Admin,
    RegistrationAdmin,
    Instructor,
    Finance,
    Management,
}

impl StaffRole {
    /// Wire name, as accepted by the actor role header.
    pub fn as_str(&self) -> &'static str {
        match self {
            StaffRole::Admin => "admin",
            StaffRole::RegistrationAdmin => "registration_admin",
            StaffRole::Instructor => "instructor",
            StaffRole::Finance => "finance",
            StaffRole::Management => "management",
        }
    }
}

impl std::str::FromStr for StaffRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "admin" => Ok(StaffRole::Admin),
            "registration_admin" | "registrationadmin" => Ok(StaffRole::RegistrationAdmin),
            "instructor" => Ok(StaffRole::Instructor),
            "finance" => Ok(StaffRole::Finance),
            "management" => Ok(StaffRole::Management),
            _ => Err(format!("Unknown staff role: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize, Deserialize)]
pub struct StaffMember {
    pub id: Uuid,
    pub full_name: String,
    pub email: String,
    pub role: StaffRole,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewStaffMember {
    #[validate(length(min = 1))]
    pub full_name: String,
    #[validate(email)]
    pub email: String,
    pub role: StaffRole,
}

/// The staff member a request acts as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub id: Uuid,
    pub role: StaffRole,
}

impl Actor {
    pub fn new(id: Uuid, role: StaffRole) -> Self {
        Self { id, role }
    }

    pub fn is_admin(&self) -> bool {
        self.role == StaffRole::Admin
    }

    /// Admins pass every role check.
    pub fn has_any_role(&self, roles: &[StaffRole]) -> bool {
        self.is_admin() || roles.contains(&self.role)
    }
}
