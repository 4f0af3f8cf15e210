//! Module contract: what module code hands to the loader
//!
//! A module's code is reduced to a table of capabilities keyed by
//! `(entry name, symbol)`, mirroring the files a manifest names. The loader
//! looks up `(bot_entry, "router")`, `(panel_entry, "bp")`,
//! `(db_schema, "SCHEMA_SQL")`, `(db_cleanup, "cleanup")` and
//! `(settings_schema, "SETTINGS")`, and checks each value's kind.

use std::any::Any;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use rusqlite::Connection;

use crate::application::errors::{BotError, ModuleResult};
use crate::application::messaging::HandlerGroup;
use crate::domain::entities::{ModuleManifest, SettingDescriptor};
use crate::infrastructure::web::RouteGroup;

pub const ROUTER_SYMBOL: &str = "router";
pub const BLUEPRINT_SYMBOL: &str = "bp";
pub const SCHEMA_SYMBOL: &str = "SCHEMA_SQL";
pub const CLEANUP_SYMBOL: &str = "cleanup";
pub const SETTINGS_SYMBOL: &str = "SETTINGS";

/// Deletion hook; the module drops its own tables
pub type CleanupFn = Arc<dyn Fn(&Connection) -> Result<(), BotError> + Send + Sync>;

/// Storage schema as a module declares it
#[derive(Clone)]
pub enum SchemaSql {
    /// One SQL script, run as a single batch
    Text(String),
    /// Statements run one batch each
    Statements(Vec<String>),
    /// Computed when the module loads
    Generator(Arc<dyn Fn() -> SchemaSql + Send + Sync>),
}

impl SchemaSql {
    pub fn generator<F>(f: F) -> Self
    where
        F: Fn() -> SchemaSql + Send + Sync + 'static,
    {
        SchemaSql::Generator(Arc::new(f))
    }

    /// Flatten to the list of batches to execute, dropping blank ones
    pub fn into_statements(self) -> Vec<String> {
        match self {
            SchemaSql::Text(text) => {
                if text.trim().is_empty() {
                    Vec::new()
                } else {
                    vec![text]
                }
            }
            SchemaSql::Statements(list) => list.into_iter().filter(|s| !s.trim().is_empty()).collect(),
            SchemaSql::Generator(f) => f().into_statements(),
        }
    }
}

impl std::fmt::Debug for SchemaSql {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchemaSql::Text(text) => f.debug_tuple("Text").field(text).finish(),
            SchemaSql::Statements(list) => f.debug_tuple("Statements").field(list).finish(),
            SchemaSql::Generator(_) => f.write_str("Generator(..)"),
        }
    }
}

/// One exported capability
#[derive(Clone)]
pub enum Export {
    Router(Arc<HandlerGroup>),
    Blueprint(Arc<RouteGroup>),
    SchemaSql(SchemaSql),
    Cleanup(CleanupFn),
    Settings(Vec<SettingDescriptor>),
}

impl Export {
    pub fn kind(&self) -> &'static str {
        match self {
            Export::Router(_) => "handler group",
            Export::Blueprint(_) => "route group",
            Export::SchemaSql(_) => "schema",
            Export::Cleanup(_) => "cleanup function",
            Export::Settings(_) => "settings list",
        }
    }

    pub fn cleanup<F>(f: F) -> Self
    where
        F: Fn(&Connection) -> Result<(), BotError> + Send + Sync + 'static,
    {
        Export::Cleanup(Arc::new(f))
    }
}

/// Capability table of one module instance
#[derive(Default)]
pub struct ModuleExports {
    entries: HashMap<(String, String), Export>,
}

impl ModuleExports {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, entry: impl Into<String>, symbol: impl Into<String>, export: Export) -> Self {
        self.insert(entry, symbol, export);
        self
    }

    pub fn insert(&mut self, entry: impl Into<String>, symbol: impl Into<String>, export: Export) {
        self.entries.insert((entry.into(), symbol.into()), export);
    }

    /// Remove and return an export
    pub fn take(&mut self, entry: &str, symbol: &str) -> Option<Export> {
        self.entries.remove(&(entry.to_string(), symbol.to_string()))
    }

    pub fn has_entry(&self, entry: &str) -> bool {
        self.entries.keys().any(|(e, _)| e == entry)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Code claimed by a [`ModuleSource`] for one module
pub struct LoadedCode {
    /// Identifiers of everything imported, dropped together on unload
    pub imports: Vec<String>,
    pub exports: ModuleExports,
    /// Keeps backing code (a shared library) alive while the module is loaded
    pub handle: Option<Box<dyn Any + Send + Sync>>,
}

impl LoadedCode {
    pub fn new(import: impl Into<String>, exports: ModuleExports) -> Self {
        Self {
            imports: vec![import.into()],
            exports,
            handle: None,
        }
    }

    pub fn with_handle(mut self, handle: Box<dyn Any + Send + Sync>) -> Self {
        self.handle = Some(handle);
        self
    }
}

impl std::fmt::Debug for LoadedCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedCode")
            .field("imports", &self.imports)
            .field("exports", &self.exports.len())
            .field("handle", &self.handle.is_some())
            .finish()
    }
}

/// Where module code comes from
pub trait ModuleSource: Send + Sync {
    fn name(&self) -> &str;

    /// Produce a fresh instance of the module's code, or `None` if this
    /// source has nothing for it.
    fn instantiate(&self, manifest: &ModuleManifest, dir: &Path) -> ModuleResult<Option<LoadedCode>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_text_and_list() {
        let text = SchemaSql::Text("CREATE TABLE a_x (id INTEGER);".into());
        assert_eq!(text.into_statements().len(), 1);

        let list = SchemaSql::Statements(vec!["CREATE TABLE a_x (id INTEGER)".into(), "  ".into()]);
        assert_eq!(list.into_statements(), vec!["CREATE TABLE a_x (id INTEGER)".to_string()]);

        assert!(SchemaSql::Text("\n".into()).into_statements().is_empty());
    }

    #[test]
    fn test_schema_generator_is_called() {
        let schema = SchemaSql::generator(|| {
            SchemaSql::Statements(vec!["CREATE TABLE a_one (id INTEGER)".into(), "CREATE TABLE a_two (id INTEGER)".into()])
        });
        assert_eq!(schema.into_statements().len(), 2);
    }

    #[test]
    fn test_exports_take_removes_entry() {
        let mut exports = ModuleExports::new()
            .with("settings_schema", SETTINGS_SYMBOL, Export::Settings(Vec::new()));

        assert!(exports.has_entry("settings_schema"));
        assert!(matches!(exports.take("settings_schema", SETTINGS_SYMBOL), Some(Export::Settings(_))));
        assert!(exports.take("settings_schema", SETTINGS_SYMBOL).is_none());
        assert!(exports.is_empty());
    }
}
