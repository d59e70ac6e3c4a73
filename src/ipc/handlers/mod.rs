pub mod attendance;
pub mod backup_exchange;
pub mod classes;
pub mod core;
pub mod grades;
pub mod messages;
pub mod reports;
pub mod students;
pub mod teachers;
