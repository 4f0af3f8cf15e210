//! Admin panel JSON API for module management
//!
//! Lifecycle calls do blocking storage and filesystem work, so they run on
//! the blocking pool.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{Path, Query, State};
use axum::http::{header, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::application::errors::ModuleError;
use crate::application::modules::ModuleLoader;

#[derive(Clone)]
struct PanelState {
    loader: Arc<ModuleLoader>,
    admin_token: Option<Arc<str>>,
}

#[derive(Debug, Serialize)]
struct ActionResponse {
    ok: bool,
    message: String,
}

impl ActionResponse {
    fn ok(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            ok: true,
            message: message.into(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ImportQuery {
    #[serde(default)]
    enable: bool,
}

/// Failure mapped onto an HTTP status
struct PanelError(StatusCode, String);

impl From<ModuleError> for PanelError {
    fn from(e: ModuleError) -> Self {
        let status = match &e {
            ModuleError::NotFound(_) => StatusCode::NOT_FOUND,
            ModuleError::Dependency(_) | ModuleError::DependentExists(_) => StatusCode::CONFLICT,
            ModuleError::Storage(_) | ModuleError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::UNPROCESSABLE_ENTITY,
        };
        PanelError(status, e.to_string())
    }
}

impl IntoResponse for PanelError {
    fn into_response(self) -> Response {
        let body = ActionResponse {
            ok: false,
            message: self.1,
        };
        (self.0, Json(body)).into_response()
    }
}

type PanelResult<T> = Result<T, PanelError>;

/// Run a loader call on the blocking pool
async fn blocking<T, F>(loader: &Arc<ModuleLoader>, f: F) -> PanelResult<T>
where
    T: Send + 'static,
    F: FnOnce(&ModuleLoader) -> Result<T, ModuleError> + Send + 'static,
{
    let loader = Arc::clone(loader);
    tokio::task::spawn_blocking(move || f(&loader))
        .await
        .map_err(|e| PanelError(StatusCode::INTERNAL_SERVER_ERROR, format!("Task failed: {}", e)))?
        .map_err(PanelError::from)
}

/// Module management routes under `/admin/modules`
pub fn router(loader: Arc<ModuleLoader>, admin_token: Option<String>) -> Router {
    let state = PanelState {
        loader,
        admin_token: admin_token.filter(|t| !t.is_empty()).map(Arc::from),
    };

    Router::new()
        .route("/admin/modules", get(list_modules))
        .route("/admin/modules/menu", get(menu_items))
        .route("/admin/modules/import", post(import_module))
        .route("/admin/modules/{id}", get(module_status))
        .route("/admin/modules/{id}/enable", post(enable_module))
        .route("/admin/modules/{id}/disable", post(disable_module))
        .route("/admin/modules/{id}/delete", post(delete_module))
        .route("/admin/modules/{id}/settings", get(get_settings).post(set_settings))
        .layer(middleware::from_fn_with_state(state.clone(), require_token))
        .with_state(state)
}

/// Bearer token check, only when a token is configured
async fn require_token(State(state): State<PanelState>, request: Request<Body>, next: Next) -> Response {
    let Some(expected) = state.admin_token.as_deref() else {
        return next.run(request).await;
    };

    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    if presented == Some(expected) {
        next.run(request).await
    } else {
        PanelError(StatusCode::UNAUTHORIZED, "Unauthorized".to_string()).into_response()
    }
}

/// GET /admin/modules
async fn list_modules(State(state): State<PanelState>) -> PanelResult<Response> {
    let modules = blocking(&state.loader, |loader| loader.list_modules()).await?;
    Ok(Json(modules).into_response())
}

/// GET /admin/modules/menu
async fn menu_items(State(state): State<PanelState>) -> PanelResult<Response> {
    let items = blocking(&state.loader, |loader| loader.get_menu_items()).await?;
    Ok(Json(items).into_response())
}

/// GET /admin/modules/{id}
async fn module_status(State(state): State<PanelState>, Path(id): Path<String>) -> PanelResult<Response> {
    let module_id = id.clone();
    let status = blocking(&state.loader, move |loader| loader.get_module_status(&module_id)).await?;
    Ok(Json(json!({ "id": id, "status": status })).into_response())
}

/// POST /admin/modules/{id}/enable
async fn enable_module(State(state): State<PanelState>, Path(id): Path<String>) -> PanelResult<Json<ActionResponse>> {
    blocking(&state.loader, move |loader| loader.enable_module(&id, false)).await?;
    Ok(ActionResponse::ok("Module enabled"))
}

/// POST /admin/modules/{id}/disable
async fn disable_module(State(state): State<PanelState>, Path(id): Path<String>) -> PanelResult<Json<ActionResponse>> {
    blocking(&state.loader, move |loader| loader.disable_module(&id)).await?;
    Ok(ActionResponse::ok("Module disabled"))
}

/// POST /admin/modules/{id}/delete
async fn delete_module(State(state): State<PanelState>, Path(id): Path<String>) -> PanelResult<Json<ActionResponse>> {
    blocking(&state.loader, move |loader| loader.delete_module(&id)).await?;
    Ok(ActionResponse::ok("Module deleted"))
}

/// GET /admin/modules/{id}/settings
async fn get_settings(State(state): State<PanelState>, Path(id): Path<String>) -> PanelResult<Response> {
    let (schema, values) = blocking(&state.loader, move |loader| {
        Ok((loader.get_settings_schema(&id)?, loader.get_settings_values(&id)?))
    })
    .await?;
    Ok(Json(json!({ "schema": schema, "values": values })).into_response())
}

/// POST /admin/modules/{id}/settings
async fn set_settings(
    State(state): State<PanelState>,
    Path(id): Path<String>,
    Json(values): Json<BTreeMap<String, Value>>,
) -> PanelResult<Json<ActionResponse>> {
    let written = blocking(&state.loader, move |loader| loader.set_settings_values(&id, &values)).await?;
    Ok(ActionResponse::ok(format!("{} setting(s) saved", written)))
}

/// POST /admin/modules/import[?enable=true], body is the zip archive
async fn import_module(
    State(state): State<PanelState>,
    Query(query): Query<ImportQuery>,
    body: Bytes,
) -> PanelResult<Json<ActionResponse>> {
    if body.is_empty() {
        return Err(PanelError(StatusCode::BAD_REQUEST, "Empty upload".to_string()));
    }

    let upload = std::env::temp_dir().join(format!("shop-bot-import-{}.zip", uuid::Uuid::new_v4()));
    let enable = query.enable;
    let module_id = blocking(&state.loader, move |loader| {
        std::fs::write(&upload, &body)?;
        let result = loader.import_module_from_zip(&upload, enable);
        if let Err(e) = std::fs::remove_file(&upload) {
            tracing::debug!("Failed to remove upload {}: {}", upload.display(), e);
        }
        result
    })
    .await?;

    Ok(ActionResponse::ok(format!("Module imported: {}", module_id)))
}
