//! Module loader - discovery, loading and the enable/disable/delete lifecycle
//!
//! One [`ModuleLoader`] owns all module state of the process. Every public
//! operation takes the state lock for its whole duration, so lifecycle calls
//! for the same module never interleave.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, error, info, warn};

use crate::application::errors::{ModuleError, ModuleResult};
use crate::application::messaging::{AttachError, Dispatcher, HandlerGroup};
use crate::domain::entities::{
    setting_value_text, MenuItem, ModuleInfo, ModuleManifest, ModuleStatus,
    SettingDescriptor, MANIFEST_FILE,
};
use crate::infrastructure::database::Database;
use crate::infrastructure::web::{RouteGroup, WebEngine};
use super::archive;
use super::exports::{
    CleanupFn, Export, ModuleExports, ModuleSource, SchemaSql, BLUEPRINT_SYMBOL, CLEANUP_SYMBOL, ROUTER_SYMBOL,
    SCHEMA_SYMBOL, SETTINGS_SYMBOL,
};
use super::safety::{FaultReporter, SafetyMiddleware};
use super::schema::validate_schema;

/// A module whose code is currently imported
pub struct LoadedModule {
    pub manifest: ModuleManifest,
    pub path: PathBuf,
    pub router: Option<Arc<HandlerGroup>>,
    pub blueprint: Option<Arc<RouteGroup>>,
    pub settings_schema: Vec<SettingDescriptor>,
    pub cleanup: Option<CleanupFn>,
    pub schema_sql: Vec<String>,
    /// Everything imported for this module, released on unload
    pub imports: Vec<String>,
    // Declared last: backing code must outlive the handlers above.
    _code: Option<Box<dyn Any + Send + Sync>>,
}

impl LoadedModule {
    pub fn id(&self) -> &str {
        &self.manifest.id
    }

    /// Template directory of the route group, resolved against the module dir
    fn template_dir(&self) -> Option<PathBuf> {
        let folder = self.blueprint.as_ref()?.template_folder()?;
        if folder.is_absolute() {
            Some(folder.to_path_buf())
        } else {
            Some(self.path.join(folder))
        }
    }
}

impl std::fmt::Debug for LoadedModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModule")
            .field("id", &self.manifest.id)
            .field("path", &self.path)
            .field("router", &self.router.as_ref().map(|r| r.name().to_string()))
            .field("blueprint", &self.blueprint.as_ref().map(|b| b.name().to_string()))
            .field("settings", &self.settings_schema.len())
            .field("cleanup", &self.cleanup.is_some())
            .field("schema_sql", &self.schema_sql.len())
            .field("imports", &self.imports)
            .finish()
    }
}

#[derive(Default)]
struct LoaderState {
    discovered: bool,
    manifests: BTreeMap<String, ModuleManifest>,
    paths: BTreeMap<String, PathBuf>,
    loaded: HashMap<String, Arc<LoadedModule>>,
    active: BTreeSet<String>,
    dispatcher: Option<Arc<Dispatcher>>,
    web: Option<Arc<WebEngine>>,
}

/// Discovers, loads and manages modules
pub struct ModuleLoader {
    modules_dir: PathBuf,
    db: Arc<Database>,
    sources: Vec<Arc<dyn ModuleSource>>,
    state: Mutex<LoaderState>,
}

impl ModuleLoader {
    pub fn new(modules_dir: impl Into<PathBuf>, db: Arc<Database>) -> Self {
        Self {
            modules_dir: modules_dir.into(),
            db,
            sources: Vec::new(),
            state: Mutex::new(LoaderState::default()),
        }
    }

    /// Add a code source. Sources are asked in the order they were added.
    pub fn with_source(mut self, source: Arc<dyn ModuleSource>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn modules_dir(&self) -> &Path {
        &self.modules_dir
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    fn lock(&self) -> MutexGuard<'_, LoaderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ------------------------------------------------------------------
    // Host collaborators
    // ------------------------------------------------------------------

    /// Bind the bot dispatcher and replay modules enabled in a previous run.
    /// Groups attached to a previously bound dispatcher move to the new one.
    pub fn set_dispatcher(&self, dispatcher: Arc<Dispatcher>) {
        let mut state = self.lock();
        if let Some(previous) = state.dispatcher.take() {
            if !Arc::ptr_eq(&previous, &dispatcher) {
                for loaded in state.loaded.values() {
                    if let Some(router) = &loaded.router {
                        previous.detach_group(router);
                    }
                }
            }
        }
        state.dispatcher = Some(dispatcher);

        let active: Vec<Arc<LoadedModule>> = state
            .active
            .iter()
            .filter_map(|id| state.loaded.get(id).cloned())
            .collect();
        for loaded in active {
            self.attach_router(&state, &loaded);
        }
        self.activate_locked(&mut state);
    }

    /// Bind the web engine and replay modules enabled in a previous run
    pub fn set_web_engine(&self, engine: Arc<WebEngine>) {
        let mut state = self.lock();
        if let Some(previous) = state.web.take() {
            if !Arc::ptr_eq(&previous, &engine) {
                for loaded in state.loaded.values().filter(|l| l.blueprint.is_some()) {
                    previous.unregister_module(loaded.id());
                }
            }
        }
        state.web = Some(engine);

        let active: Vec<Arc<LoadedModule>> = state
            .active
            .iter()
            .filter_map(|id| state.loaded.get(id).cloned())
            .collect();
        for loaded in active {
            if let Err(e) = self.attach_blueprint(&state, &loaded) {
                warn!("Module routes not attached ({}): {}", loaded.id(), e);
            }
        }
        self.activate_locked(&mut state);
    }

    /// Re-enable every module the registry says is enabled but that is not
    /// active in this process yet. Buttons of all other modules are forced off.
    pub fn activate_enabled_modules(&self) {
        let mut state = self.lock();
        self.activate_locked(&mut state);
    }

    fn activate_locked(&self, state: &mut LoaderState) {
        if state.dispatcher.is_none() && state.web.is_none() {
            return;
        }
        self.discover_locked(state);

        let rows = match self.db.list_registry() {
            Ok(rows) => rows,
            Err(e) => {
                warn!("Failed to read module registry: {}", e);
                return;
            }
        };

        for row in rows {
            if row.status() == ModuleStatus::Enabled {
                if state.active.contains(&row.module_id) {
                    continue;
                }
                match self.enable_locked(state, &row.module_id, true) {
                    Ok(()) => info!("Module restored: {}", row.module_id),
                    Err(e) => warn!("Module {} not restored: {}", row.module_id, e),
                }
            } else if let Err(e) = self.db.set_module_buttons_active(&row.module_id, false) {
                warn!("Failed to deactivate buttons of {}: {}", row.module_id, e);
            }
        }
    }

    // ------------------------------------------------------------------
    // Discovery
    // ------------------------------------------------------------------

    /// Scan the modules directory once per process. Later calls return the
    /// cached result.
    pub fn discover_modules(&self) -> BTreeMap<String, ModuleManifest> {
        let mut state = self.lock();
        self.discover_locked(&mut state);
        state.manifests.clone()
    }

    fn discover_locked(&self, state: &mut LoaderState) {
        if state.discovered {
            return;
        }
        state.discovered = true;

        if !self.modules_dir.is_dir() {
            info!("Modules directory not found: {}", self.modules_dir.display());
            return;
        }

        let entries = match std::fs::read_dir(&self.modules_dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Failed to read modules directory {}: {}", self.modules_dir.display(), e);
                return;
            }
        };

        let mut dirs: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .collect();
        dirs.sort();

        for dir in dirs {
            let Some(folder) = dir.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
                continue;
            };
            if folder.starts_with('.') || !dir.join(MANIFEST_FILE).is_file() {
                continue;
            }

            let manifest = match ModuleManifest::from_dir(&dir).and_then(|m| m.validate(&folder).map(|_| m)) {
                Ok(manifest) => manifest,
                Err(e) => {
                    error!("Module manifest rejected for {}: {}", folder, e);
                    self.record_error(&folder, &e.to_string());
                    continue;
                }
            };

            if let Err(e) = self.db.upsert_registry(&manifest) {
                warn!("Failed to update registry for {}: {}", manifest.id, e);
            }
            debug!("Module discovered: {} v{}", manifest.id, manifest.version);
            state.paths.insert(manifest.id.clone(), dir);
            state.manifests.insert(manifest.id.clone(), manifest);
        }

        info!("Discovered {} module(s)", state.manifests.len());
    }

    // ------------------------------------------------------------------
    // Status queries
    // ------------------------------------------------------------------

    /// Registry status; `Missing` when no row exists
    pub fn get_module_status(&self, module_id: &str) -> ModuleResult<ModuleStatus> {
        self.registry_status(module_id)
    }

    fn registry_status(&self, module_id: &str) -> ModuleResult<ModuleStatus> {
        Ok(self
            .db
            .get_registry(module_id)?
            .map(|row| row.status())
            .unwrap_or(ModuleStatus::Missing))
    }

    /// All discovered modules plus registry rows whose files are gone
    pub fn list_modules(&self) -> ModuleResult<Vec<ModuleInfo>> {
        let mut state = self.lock();
        self.discover_locked(&mut state);

        let mut rows: BTreeMap<String, _> = self
            .db
            .list_registry()?
            .into_iter()
            .map(|row| (row.module_id.clone(), row))
            .collect();

        let mut modules = Vec::new();
        for (id, manifest) in &state.manifests {
            let row = rows.remove(id);
            modules.push(ModuleInfo {
                id: id.clone(),
                name: manifest.name.clone(),
                version: manifest.version.clone(),
                description: manifest.description.clone(),
                author: manifest.author.clone(),
                requires: manifest.requires.clone(),
                status: row.as_ref().map(|r| r.status()).unwrap_or(ModuleStatus::Disabled),
                enabled_at: row.as_ref().and_then(|r| r.enabled_at.clone()),
                error_message: row.and_then(|r| r.error_message),
                has_settings: manifest.settings_schema.is_some(),
                menu_items: manifest.menu_items.clone(),
                path: state.paths.get(id).map(|p| p.display().to_string()),
            });
        }

        for (id, row) in rows {
            // Directory still there means discovery rejected it; keep its error
            let on_disk = self.modules_dir.join(&id).is_dir();
            let (status, error_message) = if on_disk {
                (row.status(), row.error_message.clone())
            } else {
                (
                    ModuleStatus::Missing,
                    Some(row.error_message.clone().unwrap_or_else(|| "Module files missing".to_string())),
                )
            };
            modules.push(ModuleInfo {
                name: if row.name.is_empty() { id.clone() } else { row.name.clone() },
                id,
                version: row.version.clone(),
                description: "Module files not found".to_string(),
                author: String::new(),
                requires: Vec::new(),
                status,
                enabled_at: row.enabled_at.clone(),
                error_message,
                has_settings: false,
                menu_items: Vec::new(),
                path: None,
            });
        }

        modules.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(modules)
    }

    pub fn is_loaded(&self, module_id: &str) -> bool {
        self.lock().loaded.contains_key(module_id)
    }

    /// Enabled and attached in this process
    pub fn is_active(&self, module_id: &str) -> bool {
        self.lock().active.contains(module_id)
    }

    pub fn loaded_module(&self, module_id: &str) -> Option<Arc<LoadedModule>> {
        self.lock().loaded.get(module_id).cloned()
    }

    // ------------------------------------------------------------------
    // Loading
    // ------------------------------------------------------------------

    /// Import module code and resolve its entry points. Cached per process.
    /// Failures are recorded as `error` in the registry.
    pub fn load_module(&self, module_id: &str) -> ModuleResult<Arc<LoadedModule>> {
        let mut state = self.lock();
        self.load_locked(&mut state, module_id)
    }

    fn load_locked(&self, state: &mut LoaderState, module_id: &str) -> ModuleResult<Arc<LoadedModule>> {
        self.discover_locked(state);
        if let Some(loaded) = state.loaded.get(module_id) {
            return Ok(Arc::clone(loaded));
        }

        let manifest = state
            .manifests
            .get(module_id)
            .cloned()
            .ok_or_else(|| ModuleError::NotFound(module_id.to_string()))?;
        let path = state
            .paths
            .get(module_id)
            .cloned()
            .ok_or_else(|| ModuleError::NotFound(module_id.to_string()))?;

        match self.build_module(manifest, path) {
            Ok(loaded) => {
                let loaded = Arc::new(loaded);
                info!("Module loaded: {} ({} import(s))", module_id, loaded.imports.len());
                state.loaded.insert(module_id.to_string(), Arc::clone(&loaded));
                Ok(loaded)
            }
            Err(e) => {
                error!("Module load failed ({}): {}", module_id, e);
                self.record_error(module_id, &e.to_string());
                Err(e)
            }
        }
    }

    fn build_module(&self, manifest: ModuleManifest, path: PathBuf) -> ModuleResult<LoadedModule> {
        let mut code = None;
        for source in &self.sources {
            if let Some(found) = source.instantiate(&manifest, &path)? {
                debug!("Module {} claimed by source {}", manifest.id, source.name());
                code = Some(found);
                break;
            }
        }
        let (mut imports, mut exports, handle) = match code {
            Some(code) => (code.imports, code.exports, code.handle),
            None => (Vec::new(), ModuleExports::new(), None),
        };

        let module_id = manifest.id.as_str();

        let router = match &manifest.bot_entry {
            Some(entry) => Some(self.take_router(module_id, entry, &mut exports)?),
            None => None,
        };

        let blueprint = match &manifest.panel_entry {
            Some(entry) => match exports.take(entry, BLUEPRINT_SYMBOL) {
                Some(Export::Blueprint(group)) => Some(group),
                Some(other) => {
                    return Err(ModuleError::EntryPoint(format!(
                        "panel_entry.bp must be a route group, got {}",
                        other.kind()
                    )))
                }
                None => return Err(ModuleError::EntryPoint(format!("panel_entry missing: {}", entry))),
            },
            None => None,
        };

        let schema_sql = match &manifest.db_schema {
            Some(entry) => {
                let schema = match exports.take(entry, SCHEMA_SYMBOL) {
                    Some(Export::SchemaSql(schema)) => schema,
                    Some(other) => {
                        return Err(ModuleError::EntryPoint(format!(
                            "db_schema.SCHEMA_SQL must be SQL text, a statement list or a generator, got {}",
                            other.kind()
                        )))
                    }
                    None => {
                        let file = path.join(format!("{}.sql", entry));
                        if !file.is_file() {
                            return Err(ModuleError::EntryPoint(format!("db_schema missing: {}", file.display())));
                        }
                        let text = std::fs::read_to_string(&file)?;
                        imports.push(format!("file:{}", file.display()));
                        SchemaSql::Text(text)
                    }
                };
                let statements = schema.into_statements();
                validate_schema(module_id, &statements)?;
                statements
            }
            None => Vec::new(),
        };

        let cleanup = match &manifest.db_cleanup {
            Some(entry) => match exports.take(entry, CLEANUP_SYMBOL) {
                Some(Export::Cleanup(f)) => Some(f),
                Some(other) => {
                    return Err(ModuleError::EntryPoint(format!(
                        "db_cleanup.cleanup must be callable, got {}",
                        other.kind()
                    )))
                }
                None => return Err(ModuleError::EntryPoint(format!("db_cleanup missing: {}", entry))),
            },
            None => None,
        };

        let settings_schema = match &manifest.settings_schema {
            Some(entry) => match exports.take(entry, SETTINGS_SYMBOL) {
                Some(Export::Settings(list)) => list,
                Some(other) => {
                    return Err(ModuleError::EntryPoint(format!(
                        "settings_schema.SETTINGS must be a list, got {}",
                        other.kind()
                    )))
                }
                None => {
                    let file = path.join(format!("{}.yaml", entry));
                    if !file.is_file() {
                        return Err(ModuleError::EntryPoint(format!(
                            "settings_schema missing: {}",
                            file.display()
                        )));
                    }
                    let text = std::fs::read_to_string(&file)?;
                    let list: Vec<SettingDescriptor> = serde_yaml::from_str(&text).map_err(|e| {
                        ModuleError::EntryPoint(format!("settings_schema.SETTINGS must be a list: {}", e))
                    })?;
                    imports.push(format!("file:{}", file.display()));
                    list
                }
            },
            None => Vec::new(),
        };

        Ok(LoadedModule {
            manifest,
            path,
            router,
            blueprint,
            settings_schema,
            cleanup,
            schema_sql,
            imports,
            _code: handle,
        })
    }

    fn take_router(&self, module_id: &str, entry: &str, exports: &mut ModuleExports) -> ModuleResult<Arc<HandlerGroup>> {
        match exports.take(entry, ROUTER_SYMBOL) {
            Some(Export::Router(group)) => {
                let reporter: Arc<dyn FaultReporter> = self.db.clone();
                group
                    .message
                    .add_outer_middleware(Arc::new(SafetyMiddleware::new(module_id, Arc::clone(&reporter))));
                group
                    .callback_query
                    .add_outer_middleware(Arc::new(SafetyMiddleware::new(module_id, reporter)));
                Ok(group)
            }
            Some(other) => Err(ModuleError::EntryPoint(format!(
                "bot_entry.router must be a handler group, got {}",
                other.kind()
            ))),
            None => Err(ModuleError::EntryPoint(format!("bot_entry missing: {}", entry))),
        }
    }

    /// Detach the module from the host and drop its code. No-op if not loaded.
    pub fn unload_module(&self, module_id: &str) {
        let mut state = self.lock();
        self.unload_locked(&mut state, module_id);
    }

    fn unload_locked(&self, state: &mut LoaderState, module_id: &str) {
        let Some(loaded) = state.loaded.remove(module_id) else {
            return;
        };
        self.detach(state, &loaded);
        state.active.remove(module_id);
        info!("Module unloaded: {} ({} import(s) released)", module_id, loaded.imports.len());
    }

    // ------------------------------------------------------------------
    // Host attachment
    // ------------------------------------------------------------------

    fn attach_router(&self, state: &LoaderState, loaded: &LoadedModule) {
        let (Some(dispatcher), Some(router)) = (&state.dispatcher, &loaded.router) else {
            return;
        };
        if dispatcher.contains_group(router) {
            return;
        }
        match dispatcher.include_group(Arc::clone(router)) {
            Ok(()) => info!("Module router attached: {}", loaded.id()),
            Err(AttachError::AlreadyAttached { parent, .. }) => {
                debug!("Module router {} already attached to {}", loaded.id(), parent);
            }
        }
    }

    fn attach_blueprint(&self, state: &LoaderState, loaded: &LoadedModule) -> ModuleResult<()> {
        let (Some(web), Some(blueprint)) = (&state.web, &loaded.blueprint) else {
            return Ok(());
        };
        web.register_module(loaded.id(), blueprint, loaded.template_dir())
            .map_err(ModuleError::EntryPoint)?;
        info!("Module routes attached: {} at {}", loaded.id(), blueprint.url_prefix());
        Ok(())
    }

    fn detach(&self, state: &LoaderState, loaded: &LoadedModule) {
        if let (Some(dispatcher), Some(router)) = (&state.dispatcher, &loaded.router) {
            if dispatcher.detach_group(router) {
                info!("Module router detached: {}", loaded.id());
            }
        }
        if let (Some(web), Some(_)) = (&state.web, &loaded.blueprint) {
            if web.unregister_module(loaded.id()) {
                info!("Module routes detached: {}", loaded.id());
            }
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Enable a module: check dependencies, load, apply schema, default
    /// settings, attach to the host and mark it enabled.
    ///
    /// With `from_startup` the registry row is left as is; the call only
    /// re-attaches a module that was enabled in a previous run.
    pub fn enable_module(&self, module_id: &str, from_startup: bool) -> ModuleResult<()> {
        let mut state = self.lock();
        self.enable_locked(&mut state, module_id, from_startup)
    }

    fn enable_locked(&self, state: &mut LoaderState, module_id: &str, from_startup: bool) -> ModuleResult<()> {
        self.discover_locked(state);
        let manifest = state
            .manifests
            .get(module_id)
            .cloned()
            .ok_or_else(|| ModuleError::NotFound(module_id.to_string()))?;

        for required in &manifest.requires {
            if self.registry_status(required)? != ModuleStatus::Enabled {
                return Err(ModuleError::Dependency(required.clone()));
            }
        }

        let loaded = self.load_locked(state, module_id)?;

        if !loaded.schema_sql.is_empty() {
            if let Err(e) = self.db.apply_schema(&loaded.schema_sql) {
                let err = ModuleError::SchemaExecution(e.to_string());
                error!("Module schema failed ({}): {}", module_id, e);
                self.record_error(module_id, &err.to_string());
                return Err(err);
            }
        }

        for setting in &loaded.settings_schema {
            if setting.key.is_empty() {
                continue;
            }
            self.db
                .insert_setting_if_absent(&setting.full_key(module_id), &setting_value_text(&setting.default))?;
        }

        self.attach_router(state, &loaded);
        if let Err(e) = self.attach_blueprint(state, &loaded) {
            error!("Module routes failed ({}): {}", module_id, e);
            self.detach(state, &loaded);
            self.record_error(module_id, &e.to_string());
            return Err(e);
        }

        self.db.set_module_buttons_active(module_id, true)?;
        if !from_startup {
            self.db.set_module_status(module_id, ModuleStatus::Enabled, None)?;
        }
        state.active.insert(module_id.to_string());

        info!("Module enabled: {}", module_id);
        Ok(())
    }

    /// Detach from the host and mark `disabled`. Code stays loaded.
    pub fn disable_module(&self, module_id: &str) -> ModuleResult<()> {
        let mut state = self.lock();
        self.disable_locked(&mut state, module_id)
    }

    fn disable_locked(&self, state: &mut LoaderState, module_id: &str) -> ModuleResult<()> {
        if let Some(loaded) = state.loaded.get(module_id).cloned() {
            self.detach(state, &loaded);
        }
        self.db.set_module_buttons_active(module_id, false)?;
        state.active.remove(module_id);
        self.db.set_module_status(module_id, ModuleStatus::Disabled, None)?;

        info!("Module disabled: {}", module_id);
        Ok(())
    }

    /// Remove a module with its data, registry row and files.
    /// Refused while another discovered module requires it.
    pub fn delete_module(&self, module_id: &str) -> ModuleResult<()> {
        let mut state = self.lock();
        self.delete_locked(&mut state, module_id)
    }

    fn delete_locked(&self, state: &mut LoaderState, module_id: &str) -> ModuleResult<()> {
        self.discover_locked(state);
        if !state.manifests.contains_key(module_id) && self.db.get_registry(module_id)?.is_none() {
            return Err(ModuleError::NotFound(module_id.to_string()));
        }

        let dependents: Vec<String> = state
            .manifests
            .values()
            .filter(|m| m.id != module_id && m.requires.iter().any(|r| r == module_id))
            .map(|m| m.id.clone())
            .collect();
        if !dependents.is_empty() {
            return Err(ModuleError::DependentExists(dependents));
        }

        let needs_code = state
            .manifests
            .get(module_id)
            .is_some_and(|m| m.db_cleanup.is_some());
        if needs_code && !state.loaded.contains_key(module_id) {
            if let Err(e) = self.load_locked(state, module_id) {
                warn!("Module cleanup unavailable ({}): {}", module_id, e);
            }
        }
        let cleanup = state.loaded.get(module_id).and_then(|l| l.cleanup.clone());
        match cleanup {
            Some(cleanup) => {
                if let Err(e) = self.db.with_connection(|conn| cleanup(conn)) {
                    error!("Module cleanup failed ({}): {}", module_id, e);
                    self.record_error(module_id, &e.to_string());
                    return Err(ModuleError::Cleanup(e.to_string()));
                }
            }
            None => {
                let removed = self.db.delete_settings_prefix(&format!("{}_", module_id))?;
                debug!("Removed {} setting(s) of {}", removed, module_id);
            }
        }

        self.disable_locked(state, module_id)?;
        self.unload_locked(state, module_id);
        self.db.delete_registry(module_id)?;

        if let Some(path) = state.paths.remove(module_id) {
            if path.exists() {
                if let Err(e) = std::fs::remove_dir_all(&path) {
                    warn!("Failed to delete module files {}: {}", module_id, e);
                }
            }
        }
        state.manifests.remove(module_id);

        info!("Module deleted: {}", module_id);
        Ok(())
    }

    /// Record a failure for `module_id` (registry status `error`)
    pub fn set_module_error(&self, module_id: &str, message: &str) -> ModuleResult<()> {
        self.db.record_module_error(module_id, message)?;
        Ok(())
    }

    fn record_error(&self, module_id: &str, message: &str) {
        if let Err(e) = self.db.record_module_error(module_id, message) {
            warn!("Failed to record error for {}: {}", module_id, e);
        }
    }

    // ------------------------------------------------------------------
    // Panel data
    // ------------------------------------------------------------------

    /// Menu items of every enabled module
    pub fn get_menu_items(&self) -> ModuleResult<Vec<MenuItem>> {
        let mut state = self.lock();
        self.discover_locked(&mut state);

        let mut items = Vec::new();
        for (id, manifest) in &state.manifests {
            if self.registry_status(id)? != ModuleStatus::Enabled {
                continue;
            }
            items.extend(manifest.visible_menu_items().cloned());
        }
        Ok(items)
    }

    /// Settings descriptors, loading the module if needed
    pub fn get_settings_schema(&self, module_id: &str) -> ModuleResult<Vec<SettingDescriptor>> {
        let mut state = self.lock();
        self.settings_schema_locked(&mut state, module_id)
    }

    fn settings_schema_locked(&self, state: &mut LoaderState, module_id: &str) -> ModuleResult<Vec<SettingDescriptor>> {
        self.discover_locked(state);
        let declared = state
            .manifests
            .get(module_id)
            .map(|m| m.settings_schema.is_some())
            .ok_or_else(|| ModuleError::NotFound(module_id.to_string()))?;
        if !declared {
            return Ok(Vec::new());
        }
        Ok(self.load_locked(state, module_id)?.settings_schema.clone())
    }

    /// Stored value of each declared setting, keyed by full key
    pub fn get_settings_values(&self, module_id: &str) -> ModuleResult<BTreeMap<String, Option<String>>> {
        let mut state = self.lock();
        let schema = self.settings_schema_locked(&mut state, module_id)?;

        let mut values = BTreeMap::new();
        for setting in schema.iter().filter(|s| !s.key.is_empty()) {
            let key = setting.full_key(module_id);
            let value = self.db.get_setting(&key)?;
            values.insert(key, value);
        }
        Ok(values)
    }

    /// Store values for declared settings. Keys may be short (`limit`) or
    /// full (`alpha_limit`); undeclared keys are ignored. Returns how many
    /// were written.
    pub fn set_settings_values(
        &self,
        module_id: &str,
        values: &BTreeMap<String, serde_json::Value>,
    ) -> ModuleResult<usize> {
        let mut state = self.lock();
        let schema = self.settings_schema_locked(&mut state, module_id)?;

        let mut written = 0;
        for setting in schema.iter().filter(|s| !s.key.is_empty()) {
            let full_key = setting.full_key(module_id);
            let Some(value) = values.get(&setting.key).or_else(|| values.get(&full_key)) else {
                continue;
            };
            self.db.set_setting(&full_key, &setting_value_text(value))?;
            written += 1;
        }
        Ok(written)
    }

    // ------------------------------------------------------------------
    // Packaged import
    // ------------------------------------------------------------------

    /// Install a module from a zip archive holding one `<module_id>/` directory,
    /// then rediscover and optionally enable it. Returns the module id.
    pub fn import_module_from_zip(&self, archive_path: impl AsRef<Path>, auto_enable: bool) -> ModuleResult<String> {
        let mut state = self.lock();

        let module_id = archive::extract_module(archive_path.as_ref(), &self.modules_dir)?;

        state.discovered = false;
        self.discover_locked(&mut state);
        if !state.manifests.contains_key(&module_id) {
            let reason = self
                .db
                .get_registry(&module_id)?
                .and_then(|row| row.error_message)
                .unwrap_or_else(|| "Invalid module manifest".to_string());
            return Err(ModuleError::Archive(reason));
        }
        info!("Module imported: {}", module_id);

        if auto_enable {
            self.enable_locked(&mut state, &module_id, false)?;
        }
        Ok(module_id)
    }
}

impl FaultReporter for Database {
    fn record_fault(&self, module_id: &str, message: &str) -> Result<(), crate::application::errors::BotError> {
        self.record_module_error(module_id, message)?;
        Ok(())
    }

    fn admin_ids(&self) -> Vec<String> {
        Database::admin_ids(self).unwrap_or_else(|e| {
            warn!("Failed to read admin ids: {}", e);
            Vec::new()
        })
    }
}
