pub mod accounts;
pub mod core;
pub mod photos;
pub mod students;
