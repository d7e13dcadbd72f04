/// Database configuration and connection management
pub mod database;

/// Engine settings loading from config.toml
pub mod settings;
