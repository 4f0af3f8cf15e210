//! Module model: manifest, lifecycle status and registry rows

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};

use crate::application::errors::{ModuleError, ModuleResult};

/// Manifest file expected in every module directory
pub const MANIFEST_FILE: &str = "module.yaml";

static MODULE_ID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9_]+$").expect("module id pattern is valid")
});

/// Lifecycle status of a module as seen by the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleStatus {
    Enabled,
    Disabled,
    Error,
    /// No registry row exists for the id
    Missing,
}

impl ModuleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleStatus::Enabled => "enabled",
            ModuleStatus::Disabled => "disabled",
            ModuleStatus::Error => "error",
            ModuleStatus::Missing => "missing",
        }
    }
}

impl fmt::Display for ModuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for ModuleStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "enabled" => Ok(ModuleStatus::Enabled),
            "disabled" => Ok(ModuleStatus::Disabled),
            "error" => Ok(ModuleStatus::Error),
            "missing" => Ok(ModuleStatus::Missing),
            other => Err(format!("Unknown module status: {}", other)),
        }
    }
}

/// Navigation entry shown in the admin panel while the module is enabled
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MenuItem {
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub icon: String,
}

/// Kind of value a module setting holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettingType {
    #[default]
    Text,
    Number,
    Boolean,
    Json,
}

/// One entry of a module's settings schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingDescriptor {
    pub key: String,
    #[serde(default)]
    pub label: String,
    #[serde(rename = "type", default)]
    pub kind: SettingType,
    #[serde(default)]
    pub default: serde_json::Value,
}

impl SettingDescriptor {
    pub fn new(key: impl Into<String>, label: impl Into<String>, kind: SettingType, default: serde_json::Value) -> Self {
        Self {
            key: key.into(),
            label: label.into(),
            kind,
            default,
        }
    }

    /// Settings-store key, namespaced by module id
    pub fn full_key(&self, module_id: &str) -> String {
        format!("{}_{}", module_id, self.key)
    }
}

/// Serialize a setting value the way the settings store keeps it:
/// booleans as `true`/`false`, composites as JSON, null as empty text.
pub fn setting_value_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::Bool(b) => if *b { "true" } else { "false" }.to_string(),
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        composite => composite.to_string(),
    }
}

/// Static descriptor of a module, read from `module.yaml`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ModuleManifest {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author: String,
    /// Module ids that must be enabled before this one
    #[serde(default)]
    pub requires: Vec<String>,
    #[serde(default)]
    pub bot_entry: Option<String>,
    #[serde(default)]
    pub panel_entry: Option<String>,
    #[serde(default)]
    pub db_schema: Option<String>,
    #[serde(default)]
    pub db_cleanup: Option<String>,
    #[serde(default)]
    pub settings_schema: Option<String>,
    #[serde(default)]
    pub menu_items: Vec<MenuItem>,
}

impl ModuleManifest {
    pub fn new(id: impl Into<String>, name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: version.into(),
            ..Self::default()
        }
    }

    /// Parse a manifest from YAML text
    pub fn from_yaml(content: &str) -> ModuleResult<Self> {
        let manifest: Self = serde_yaml::from_str(content)
            .map_err(|e| ModuleError::Manifest(e.to_string()))?;
        Ok(manifest.normalized())
    }

    /// Parse the manifest of a module directory
    pub fn from_dir(dir: impl AsRef<Path>) -> ModuleResult<Self> {
        let path = dir.as_ref().join(MANIFEST_FILE);
        let content = std::fs::read_to_string(&path)
            .map_err(|e| ModuleError::Manifest(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::from_yaml(&content)
    }

    pub fn to_yaml(&self) -> ModuleResult<String> {
        serde_yaml::to_string(self).map_err(|e| ModuleError::Manifest(e.to_string()))
    }

    /// Trim text fields, drop blank entry names and blank requirements
    fn normalized(mut self) -> Self {
        fn entry(value: Option<String>) -> Option<String> {
            value
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        }

        self.id = self.id.trim().to_string();
        self.name = self.name.trim().to_string();
        self.version = self.version.trim().to_string();
        self.description = self.description.trim().to_string();
        self.author = self.author.trim().to_string();
        self.requires = self
            .requires
            .into_iter()
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .collect();
        self.bot_entry = entry(self.bot_entry);
        self.panel_entry = entry(self.panel_entry);
        self.db_schema = entry(self.db_schema);
        self.db_cleanup = entry(self.db_cleanup);
        self.settings_schema = entry(self.settings_schema);
        self
    }

    /// Check identity rules against the directory the manifest was found in
    pub fn validate(&self, folder_name: &str) -> ModuleResult<()> {
        if !is_valid_module_id(&self.id) {
            return Err(ModuleError::Validation(format!("Module id invalid: '{}'", self.id)));
        }
        if self.id != folder_name {
            return Err(ModuleError::Validation(format!(
                "Module id mismatch: {} vs folder {}",
                self.id, folder_name
            )));
        }
        if self.name.is_empty() || self.version.is_empty() {
            return Err(ModuleError::Validation(format!(
                "Module meta missing name/version: {}",
                self.id
            )));
        }
        Ok(())
    }

    /// Menu items with both a label and a url
    pub fn visible_menu_items(&self) -> impl Iterator<Item = &MenuItem> {
        self.menu_items
            .iter()
            .filter(|item| !item.label.is_empty() && !item.url.is_empty())
    }
}

pub fn is_valid_module_id(id: &str) -> bool {
    MODULE_ID_RE.is_match(id)
}

/// Durable registry row, one per discovered module id
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistryRow {
    pub module_id: String,
    pub name: String,
    pub version: String,
    pub status: String,
    pub enabled_at: Option<String>,
    pub error_message: Option<String>,
    pub metadata: String,
}

impl RegistryRow {
    /// Stored status; unknown text reads as `error`
    pub fn status(&self) -> ModuleStatus {
        self.status.parse().unwrap_or(ModuleStatus::Error)
    }
}

/// Module summary for the admin panel
#[derive(Debug, Clone, Serialize)]
pub struct ModuleInfo {
    pub id: String,
    pub name: String,
    pub version: String,
    pub description: String,
    pub author: String,
    pub requires: Vec<String>,
    pub status: ModuleStatus,
    pub enabled_at: Option<String>,
    pub error_message: Option<String>,
    pub has_settings: bool,
    pub menu_items: Vec<MenuItem>,
    pub path: Option<String>,
}
