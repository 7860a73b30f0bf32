pub mod models;
pub mod providers;
pub mod segment;
pub mod session;
