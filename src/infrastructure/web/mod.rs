//! Web engine - admin panel plus routes contributed by modules
//!
//! Module routes are not compiled into the axum router. Each enabled module
//! gets a slot in [`DynamicRoutes`]; the fallback handler looks the request
//! path up there and forwards the request to that module's router. Slots can
//! be added and removed while the server is running.

pub mod panel;

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use axum::extract::Request;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::MethodRouter;
use axum::Router;
use tower::ServiceExt;

use crate::application::errors::BotError;
use crate::application::modules::ModuleLoader;

/// One route of a [`RouteGroup`]
#[derive(Clone)]
pub struct RouteDef {
    pub rule: String,
    pub endpoint: String,
    method: MethodRouter,
}

/// Web-side unit of routes a module contributes
#[derive(Clone)]
pub struct RouteGroup {
    name: String,
    url_prefix: String,
    template_folder: Option<PathBuf>,
    routes: Vec<RouteDef>,
}

impl RouteGroup {
    pub fn new(name: impl Into<String>, url_prefix: impl Into<String>) -> Self {
        let prefix = url_prefix.into();
        let trimmed = prefix.trim().trim_end_matches('/');
        let url_prefix = if trimmed.is_empty() || trimmed.starts_with('/') {
            trimmed.to_string()
        } else {
            format!("/{}", trimmed)
        };

        Self {
            name: name.into(),
            url_prefix,
            template_folder: None,
            routes: Vec::new(),
        }
    }

    /// Templates shipped with the module, relative to the module directory
    pub fn with_template_folder(mut self, folder: impl Into<PathBuf>) -> Self {
        self.template_folder = Some(folder.into());
        self
    }

    pub fn route(mut self, rule: impl Into<String>, endpoint: impl Into<String>, method: MethodRouter) -> Self {
        self.routes.push(RouteDef {
            rule: rule.into(),
            endpoint: endpoint.into(),
            method,
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn url_prefix(&self) -> &str {
        &self.url_prefix
    }

    pub fn template_folder(&self) -> Option<&Path> {
        self.template_folder.as_deref()
    }

    pub fn routes(&self) -> &[RouteDef] {
        &self.routes
    }

    /// Endpoint names qualified by the group name, e.g. `example_module.index`
    pub fn endpoints(&self) -> Vec<String> {
        self.routes
            .iter()
            .map(|r| format!("{}.{}", self.name, r.endpoint))
            .collect()
    }

    fn full_path(&self, rule: &str) -> String {
        let rule = if rule.starts_with('/') { rule.to_string() } else { format!("/{}", rule) };
        format!("{}{}", self.url_prefix, rule)
    }

    /// Compile the group into a standalone router serving absolute paths.
    /// Panics on invalid or conflicting rules, like `Router::route`.
    pub fn build_router(&self) -> Router {
        let mut router = Router::new();
        for def in &self.routes {
            router = router.route(&self.full_path(&def.rule), def.method.clone());
            // `<prefix>/` also answers on `<prefix>`
            if def.rule == "/" && !self.url_prefix.is_empty() {
                router = router.route(&self.url_prefix, def.method.clone());
            }
        }
        router
    }
}

impl std::fmt::Debug for RouteGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteGroup")
            .field("name", &self.name)
            .field("url_prefix", &self.url_prefix)
            .field("template_folder", &self.template_folder)
            .field("endpoints", &self.endpoints())
            .finish()
    }
}

struct RouteSlot {
    prefix: String,
    router: Router,
}

/// Per-module routing table consulted on every request
#[derive(Default)]
pub struct DynamicRoutes {
    slots: RwLock<BTreeMap<String, RouteSlot>>,
}

impl DynamicRoutes {
    pub fn insert(&self, module_id: impl Into<String>, prefix: impl Into<String>, router: Router) {
        self.slots.write().unwrap_or_else(PoisonError::into_inner).insert(
            module_id.into(),
            RouteSlot {
                prefix: prefix.into(),
                router,
            },
        );
    }

    pub fn remove(&self, module_id: &str) -> bool {
        self.slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(module_id)
            .is_some()
    }

    pub fn contains(&self, module_id: &str) -> bool {
        self.slots.read().unwrap_or_else(PoisonError::into_inner).contains_key(module_id)
    }

    /// Module whose prefix matches `path`; the longest prefix wins
    pub fn resolve(&self, path: &str) -> Option<(String, Router)> {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        slots
            .iter()
            .filter(|(_, slot)| path == slot.prefix || path.starts_with(&format!("{}/", slot.prefix)))
            .max_by_key(|(_, slot)| slot.prefix.len())
            .map(|(id, slot)| (id.clone(), slot.router.clone()))
    }
}

/// Template search path: host directories first, then module directories
pub struct TemplateChain {
    host: Vec<PathBuf>,
    modules: RwLock<Vec<(String, PathBuf)>>,
}

impl TemplateChain {
    pub fn new(host: Vec<PathBuf>) -> Self {
        Self {
            host,
            modules: RwLock::new(Vec::new()),
        }
    }

    /// Add a module's template directory; re-adding replaces the old entry
    pub fn add_module_dir(&self, module_id: &str, dir: PathBuf) {
        let mut modules = self.modules.write().unwrap_or_else(PoisonError::into_inner);
        modules.retain(|(id, _)| id != module_id);
        modules.push((module_id.to_string(), dir));
    }

    pub fn remove_module_dirs(&self, module_id: &str) -> usize {
        let mut modules = self.modules.write().unwrap_or_else(PoisonError::into_inner);
        let before = modules.len();
        modules.retain(|(id, _)| id != module_id);
        before - modules.len()
    }

    pub fn search_path(&self) -> Vec<PathBuf> {
        let modules = self.modules.read().unwrap_or_else(PoisonError::into_inner);
        self.host
            .iter()
            .cloned()
            .chain(modules.iter().map(|(_, dir)| dir.clone()))
            .collect()
    }

    /// First existing file named `name` along the search path
    pub fn resolve(&self, name: &str) -> Option<PathBuf> {
        let relative = Path::new(name);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return None;
        }
        self.search_path()
            .into_iter()
            .map(|dir| dir.join(relative))
            .find(|path| path.is_file())
    }

    pub fn render(&self, name: &str) -> Option<String> {
        let path = self.resolve(name)?;
        std::fs::read_to_string(path).ok()
    }
}

/// Host web engine modules attach their route groups to
pub struct WebEngine {
    routes: DynamicRoutes,
    templates: Arc<TemplateChain>,
}

impl WebEngine {
    pub fn new(host_templates: Vec<PathBuf>) -> Self {
        Self {
            routes: DynamicRoutes::default(),
            templates: Arc::new(TemplateChain::new(host_templates)),
        }
    }

    pub fn routes(&self) -> &DynamicRoutes {
        &self.routes
    }

    pub fn templates(&self) -> &Arc<TemplateChain> {
        &self.templates
    }

    /// Compile `group` and publish it under `module_id`, replacing any
    /// previous slot of that module.
    pub fn register_module(&self, module_id: &str, group: &RouteGroup, template_dir: Option<PathBuf>) -> Result<(), String> {
        let router = std::panic::catch_unwind(AssertUnwindSafe(|| group.build_router()))
            .map_err(|_| format!("Route group '{}' has invalid or conflicting routes", group.name()))?;

        self.routes.insert(module_id, group.url_prefix(), router);
        tracing::debug!("Module {} endpoints: {}", module_id, group.endpoints().join(", "));
        if let Some(dir) = template_dir {
            self.templates.add_module_dir(module_id, dir);
        }
        Ok(())
    }

    /// Remove the module's slot and template directory
    pub fn unregister_module(&self, module_id: &str) -> bool {
        self.templates.remove_module_dirs(module_id);
        self.routes.remove(module_id)
    }

    pub fn has_module(&self, module_id: &str) -> bool {
        self.routes.contains(module_id)
    }

    /// Forward a request to the module owning its path
    pub async fn dispatch(&self, mut req: Request) -> Response {
        let Some((module_id, router)) = self.routes.resolve(req.uri().path()) else {
            return (StatusCode::NOT_FOUND, "Not Found").into_response();
        };
        tracing::debug!("{} {} -> module {}", req.method(), req.uri().path(), module_id);

        req.extensions_mut().insert(Arc::clone(&self.templates));
        match router.oneshot(req).await {
            Ok(response) => response,
            Err(never) => match never {},
        }
    }
}

/// Full application router: admin panel plus the module dispatch fallback
pub fn app(engine: Arc<WebEngine>, loader: Arc<ModuleLoader>, admin_token: Option<String>) -> Router {
    Router::new()
        .merge(panel::router(loader, admin_token))
        .fallback(move |req: Request| {
            let engine = Arc::clone(&engine);
            async move { engine.dispatch(req).await }
        })
}

pub async fn serve(bind: &str, app: Router) -> Result<(), BotError> {
    let addr: SocketAddr = bind
        .parse()
        .map_err(|e| BotError::Config(format!("Invalid web bind address '{}': {}", bind, e)))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| BotError::Network(format!("Failed to bind {}: {}", addr, e)))?;

    tracing::info!("Admin panel listening on http://{}", addr);
    axum::serve(listener, app)
        .await
        .map_err(|e| BotError::Network(format!("Web server error: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::routing::get;

    fn group(prefix: &str, reply: &'static str) -> RouteGroup {
        RouteGroup::new("g", prefix).route("/", "index", get(move || async move { reply }))
    }

    #[test]
    fn test_prefix_normalized() {
        assert_eq!(RouteGroup::new("a", "modules/a/").url_prefix(), "/modules/a");
        assert_eq!(RouteGroup::new("a", "/").url_prefix(), "");
    }

    #[test]
    fn test_longest_prefix_wins() {
        let routes = DynamicRoutes::default();
        routes.insert("outer", "/modules", Router::new());
        routes.insert("inner", "/modules/inner", Router::new());

        assert_eq!(routes.resolve("/modules/inner/x").map(|(id, _)| id).as_deref(), Some("inner"));
        assert_eq!(routes.resolve("/modules/other").map(|(id, _)| id).as_deref(), Some("outer"));
        assert!(routes.resolve("/modulesx").is_none());
    }

    #[test]
    fn test_conflicting_routes_are_rejected() {
        let engine = WebEngine::new(vec![]);
        let bad = RouteGroup::new("bad", "/bad")
            .route("/x", "one", get(|| async { "1" }))
            .route("/x", "two", get(|| async { "2" }));

        assert!(engine.register_module("bad", &bad, None).is_err());
        assert!(!engine.has_module("bad"));
    }

    #[tokio::test]
    async fn test_dispatch_reaches_module_router() {
        let engine = WebEngine::new(vec![]);
        engine.register_module("alpha", &group("/modules/alpha", "alpha home"), None).unwrap();

        let req = axum::http::Request::builder().uri("/modules/alpha/").body(Body::empty()).unwrap();
        let resp = engine.dispatch(req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        assert!(engine.unregister_module("alpha"));
        let req = axum::http::Request::builder().uri("/modules/alpha/").body(Body::empty()).unwrap();
        assert_eq!(engine.dispatch(req).await.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_template_chain_order_and_removal() {
        let host = tempfile::tempdir().unwrap();
        let module = tempfile::tempdir().unwrap();
        std::fs::write(host.path().join("base.html"), "host").unwrap();
        std::fs::write(module.path().join("base.html"), "module").unwrap();
        std::fs::write(module.path().join("only.html"), "module only").unwrap();

        let chain = TemplateChain::new(vec![host.path().to_path_buf()]);
        chain.add_module_dir("alpha", module.path().to_path_buf());
        chain.add_module_dir("alpha", module.path().to_path_buf());

        assert_eq!(chain.search_path().len(), 2);
        assert_eq!(chain.render("base.html").as_deref(), Some("host"));
        assert_eq!(chain.render("only.html").as_deref(), Some("module only"));
        assert!(chain.resolve("../etc/passwd").is_none());

        assert_eq!(chain.remove_module_dirs("alpha"), 1);
        assert!(chain.render("only.html").is_none());
    }
}
