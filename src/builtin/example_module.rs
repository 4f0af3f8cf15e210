//! Sample module with bot and panel hooks

use std::sync::Arc;

use axum::extract::Extension;
use axum::response::Html;
use axum::routing::get;
use rusqlite::Connection;
use serde_json::json;

use crate::application::errors::BotError;
use crate::application::messaging::{Context, HandlerGroup, HandlerResult};
use crate::application::modules::{Export, ModuleExports, SchemaSql};
use crate::domain::entities::{SettingDescriptor, SettingType};
use crate::infrastructure::web::{RouteGroup, TemplateChain};

pub const MODULE_ID: &str = "example_module";
pub const PING_CALLBACK: &str = "mod:example_module:ping";
pub const INDEX_TEMPLATE: &str = "modules/example_module/index.html";

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS example_module_items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP
);";

async fn ping(ctx: Context) -> HandlerResult {
    if let Some(bot) = &ctx.bot {
        bot.answer_callback(&ctx.message.id, Some("Pong from example_module")).await?;
    }
    Ok(Some("Example module says hi.".to_string()))
}

async fn index(templates: Option<Extension<Arc<TemplateChain>>>) -> Html<String> {
    let page = templates.and_then(|Extension(chain)| chain.render(INDEX_TEMPLATE));
    Html(page.unwrap_or_else(|| "<h1>Example Module</h1><p>Template not found.</p>".to_string()))
}

fn cleanup(conn: &Connection) -> Result<(), BotError> {
    conn.execute_batch("DROP TABLE IF EXISTS example_module_items;")?;
    conn.execute(
        "DELETE FROM bot_settings WHERE substr(key, 1, length(?1)) = ?1",
        [format!("{}_", MODULE_ID)],
    )?;
    Ok(())
}

fn settings() -> Vec<SettingDescriptor> {
    vec![
        SettingDescriptor::new("greeting", "Greeting text", SettingType::Text, json!("Hello from example_module")),
        SettingDescriptor::new("show_button", "Show menu button", SettingType::Boolean, json!(true)),
        SettingDescriptor::new("max_items", "Max items", SettingType::Number, json!(10)),
    ]
}

/// Fresh export table for one load
pub fn exports() -> ModuleExports {
    let router = HandlerGroup::new(MODULE_ID).on_callback(PING_CALLBACK, ping);
    let bp = RouteGroup::new(MODULE_ID, "/modules/example_module")
        .with_template_folder("templates")
        .route("/", "index", get(index));

    ModuleExports::new()
        .with("bot_handlers", "router", Export::Router(Arc::new(router)))
        .with("panel_routes", "bp", Export::Blueprint(Arc::new(bp)))
        .with("db_schema", "SCHEMA_SQL", Export::SchemaSql(SchemaSql::Text(SCHEMA.to_string())))
        .with("db_cleanup", "cleanup", Export::cleanup(cleanup))
        .with("settings_schema", "SETTINGS", Export::Settings(settings()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::modules::validate_schema;
    use crate::infrastructure::database::Database;

    #[test]
    fn test_exports_cover_every_entry() {
        let mut exports = exports();
        assert_eq!(exports.len(), 5);
        assert!(matches!(exports.take("bot_handlers", "router"), Some(Export::Router(_))));
        assert!(matches!(exports.take("panel_routes", "bp"), Some(Export::Blueprint(_))));
    }

    #[test]
    fn test_schema_is_prefixed() {
        let statements = SchemaSql::Text(SCHEMA.to_string()).into_statements();
        assert!(validate_schema(MODULE_ID, &statements).is_ok());
    }

    #[test]
    fn test_cleanup_drops_table_and_settings() {
        let db = Database::open_in_memory().unwrap();
        db.apply_schema(&[SCHEMA.to_string()]).unwrap();
        db.set_setting("example_module_greeting", "hi").unwrap();
        db.set_setting("other_greeting", "keep").unwrap();
        db.set_setting("example_modulex", "keep").unwrap();

        db.with_connection(cleanup).unwrap();

        assert!(!db.table_exists("example_module_items").unwrap());
        assert_eq!(db.get_setting("example_module_greeting").unwrap(), None);
        assert_eq!(db.get_setting("other_greeting").unwrap().as_deref(), Some("keep"));
        assert_eq!(db.get_setting("example_modulex").unwrap().as_deref(), Some("keep"));
    }

    #[tokio::test]
    async fn test_ping_without_bot_replies() {
        let message = crate::domain::entities::Message::from_callback("1", PING_CALLBACK);
        let reply = ping(Context::new(message)).await.unwrap();
        assert_eq!(reply.as_deref(), Some("Example module says hi."));
    }
}
