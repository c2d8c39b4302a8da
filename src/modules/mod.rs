pub mod certificates;
pub mod finance;
pub mod instructor;
pub mod management;
pub mod registrations;
pub mod staff;
