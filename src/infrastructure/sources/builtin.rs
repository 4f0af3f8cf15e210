//! Compiled-in module bundles

use std::collections::BTreeMap;
use std::path::Path;

use crate::application::errors::ModuleResult;
use crate::application::modules::{LoadedCode, ModuleExports, ModuleSource};
use crate::domain::entities::ModuleManifest;

/// Builds a fresh export table on every load
pub type ModuleFactory = fn() -> ModuleExports;

/// Registry of bundles linked into the binary, keyed by module id
#[derive(Default, Clone)]
pub struct BuiltinModules {
    factories: BTreeMap<String, ModuleFactory>,
}

impl BuiltinModules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a bundle (builder style)
    pub fn with(mut self, module_id: impl Into<String>, factory: ModuleFactory) -> Self {
        self.register(module_id, factory);
        self
    }

    pub fn register(&mut self, module_id: impl Into<String>, factory: ModuleFactory) {
        let module_id = module_id.into();
        if self.factories.insert(module_id.clone(), factory).is_some() {
            tracing::warn!("Builtin module registered twice: {}", module_id);
        }
    }

    pub fn contains(&self, module_id: &str) -> bool {
        self.factories.contains_key(module_id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }
}

impl ModuleSource for BuiltinModules {
    fn name(&self) -> &str {
        "builtin"
    }

    fn instantiate(&self, manifest: &ModuleManifest, _dir: &Path) -> ModuleResult<Option<LoadedCode>> {
        let Some(factory) = self.factories.get(&manifest.id) else {
            return Ok(None);
        };
        let exports = factory();
        Ok(Some(LoadedCode::new(format!("builtin:{}", manifest.id), exports)))
    }
}

impl std::fmt::Debug for BuiltinModules {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuiltinModules")
            .field("modules", &self.ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::modules::{Export, SchemaSql};

    fn sample() -> ModuleExports {
        ModuleExports::new().with(
            "schema",
            "SCHEMA_SQL",
            Export::SchemaSql(SchemaSql::Text("CREATE TABLE sample_items (id INTEGER);".into())),
        )
    }

    #[test]
    fn test_claims_registered_id_only() {
        let source = BuiltinModules::new().with("sample", sample);
        let dir = Path::new(".");

        let code = source
            .instantiate(&ModuleManifest::new("sample", "Sample", "1.0"), dir)
            .unwrap()
            .unwrap();
        assert_eq!(code.imports, vec!["builtin:sample".to_string()]);
        assert!(code.exports.has_entry("schema"));

        let other = source
            .instantiate(&ModuleManifest::new("other", "Other", "1.0"), dir)
            .unwrap();
        assert!(other.is_none());
    }

    #[test]
    fn test_factory_runs_per_load() {
        let source = BuiltinModules::new().with("sample", sample);
        let manifest = ModuleManifest::new("sample", "Sample", "1.0");
        let dir = Path::new(".");

        let mut first = source.instantiate(&manifest, dir).unwrap().unwrap();
        assert!(first.exports.take("schema", "SCHEMA_SQL").is_some());
        let second = source.instantiate(&manifest, dir).unwrap().unwrap();
        assert_eq!(second.exports.len(), 1);
    }
}
