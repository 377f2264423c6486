pub mod analysis;
pub mod attendance;
pub mod backup;
pub mod core;
pub mod inventory;
pub mod settings;
pub mod students;
