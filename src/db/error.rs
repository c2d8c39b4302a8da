use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database error: {0}")]
    Sqlx(sqlx::Error),

    #[error("Record not found")]
    NotFound,

    /// Unique constraint violation; carries the constraint name.
    #[error("Duplicate record ({0})")]
    Duplicate(String),

    /// A conditional write found the row in another state.
    #[error("State conflict: {0}")]
    Conflict(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Migration error: {0}")]
    MigrationError(String),
}

impl DatabaseError {
    pub fn is_duplicate_of(&self, constraint: &str) -> bool {
        matches!(self, DatabaseError::Duplicate(name) if name == constraint)
    }
}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DatabaseError::NotFound,
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                DatabaseError::Duplicate(db.constraint().unwrap_or_default().to_string())
            }
            sqlx::Error::Database(ref db)
                if db.is_foreign_key_violation() || db.is_check_violation() =>
            {
                DatabaseError::InvalidInput(db.message().to_string())
            }
            other => DatabaseError::Sqlx(other),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DatabaseError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DatabaseError::MigrationError(err.to_string())
    }
}
