//! Module system - Feature packages attached to the running bot and panel
//!
//! A module is a directory `<modules_dir>/<module_id>/` holding a
//! `module.yaml` manifest. Its code comes from a [`ModuleSource`]; its
//! schema and settings may also be plain `.sql` / `.yaml` files next to the
//! manifest.

pub mod archive;
pub mod exports;
pub mod loader;
pub mod safety;
pub mod schema;

pub use exports::{CleanupFn, Export, LoadedCode, ModuleExports, ModuleSource, SchemaSql};
pub use loader::{LoadedModule, ModuleLoader};
pub use safety::{FaultReporter, SafetyMiddleware, ERROR_TEXT_LIMIT};
pub use schema::validate_schema;
