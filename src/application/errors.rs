//! Application layer errors

use thiserror::Error;

/// General bot errors
#[derive(Error, Debug)]
pub enum BotError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Module error: {0}")]
    Module(#[from] ModuleError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

/// Module lifecycle errors.
///
/// The `Display` text of every variant is what ends up in the registry's
/// `error_message` column and in admin panel responses.
#[derive(Error, Debug)]
pub enum ModuleError {
    /// `module.yaml` could not be read or parsed
    #[error("Invalid module manifest: {0}")]
    Manifest(String),

    /// Manifest parsed but breaks an identity rule
    #[error("{0}")]
    Validation(String),

    /// Entry point missing or exporting the wrong kind of capability
    #[error("{0}")]
    EntryPoint(String),

    #[error("Table '{table}' must be prefixed with {module_id}_")]
    SchemaIsolation { module_id: String, table: String },

    #[error("Schema error: {0}")]
    SchemaExecution(String),

    #[error("Dependency not enabled: {0}")]
    Dependency(String),

    #[error("Dependent modules: {}", .0.join(", "))]
    DependentExists(Vec<String>),

    #[error("{0}")]
    Handler(String),

    #[error("Module not found: {0}")]
    NotFound(String),

    #[error("Cleanup failed: {0}")]
    Cleanup(String),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for module lifecycle operations
pub type ModuleResult<T> = Result<T, ModuleError>;
