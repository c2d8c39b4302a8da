pub mod actor;
pub mod tracing;
