#![allow(dead_code)]

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::routing::get;
use serde_json::json;

use shop_bot::application::errors::BotError;
use shop_bot::application::messaging::{Context, HandlerGroup};
use shop_bot::application::modules::{Export, ModuleExports, ModuleLoader, SchemaSql};
use shop_bot::domain::entities::{SettingDescriptor, SettingType};
use shop_bot::domain::traits::{Bot, BotInfo, KeyboardButton};
use shop_bot::infrastructure::database::Database;
use shop_bot::infrastructure::sources::BuiltinModules;
use shop_bot::infrastructure::web::RouteGroup;

pub const ALPHA_MANIFEST: &str = "id: alpha
name: Alpha
version: '1.0'
description: Test module with every entry point
bot_entry: bot
panel_entry: panel
db_schema: schema
db_cleanup: cleanup
settings_schema: settings
menu_items:
  - label: Alpha
    url: /modules/alpha/
    icon: plug
";

/// Write `<root>/<id>/module.yaml` plus extra files
pub fn write_module(root: &Path, id: &str, manifest: &str, files: &[(&str, &str)]) {
    let dir = root.join(id);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("module.yaml"), manifest).unwrap();
    for (name, body) in files {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, body).unwrap();
    }
}

pub fn data_manifest(id: &str, extra: &str) -> String {
    format!("id: {id}\nname: {id}\nversion: '0.1'\n{extra}")
}

pub fn alpha_exports() -> ModuleExports {
    let router = HandlerGroup::new("alpha")
        .on_command("alpha", |_ctx: Context| async { Ok(Some("alpha here".to_string())) })
        .on_callback("mod:alpha:ping", |_ctx: Context| async { Ok(Some("pong".to_string())) })
        .on_callback("mod:alpha:boom", |_ctx: Context| async {
            Err(BotError::Internal("boom".to_string()))
        })
        .on_any_callback(|_ctx: Context| async { Ok(Some("alpha saw it".to_string())) });

    let bp = RouteGroup::new("alpha", "/modules/alpha").route("/", "index", get(|| async { "alpha index" }));

    let settings = vec![
        SettingDescriptor::new("limit", "Limit", SettingType::Number, json!(5)),
        SettingDescriptor::new("enabled", "Enabled", SettingType::Boolean, json!(true)),
    ];

    ModuleExports::new()
        .with("bot", "router", Export::Router(Arc::new(router)))
        .with("panel", "bp", Export::Blueprint(Arc::new(bp)))
        .with(
            "schema",
            "SCHEMA_SQL",
            Export::SchemaSql(SchemaSql::Text(
                "CREATE TABLE IF NOT EXISTS alpha_items (id INTEGER PRIMARY KEY, name TEXT);".to_string(),
            )),
        )
        .with(
            "cleanup",
            "cleanup",
            Export::cleanup(|conn| {
                conn.execute_batch("DROP TABLE IF EXISTS alpha_items;")?;
                Ok(())
            }),
        )
        .with("settings", "SETTINGS", Export::Settings(settings))
}

pub fn builtins() -> BuiltinModules {
    BuiltinModules::new().with("alpha", alpha_exports)
}

pub fn new_loader(root: &Path, db: &Arc<Database>) -> ModuleLoader {
    ModuleLoader::new(root, Arc::clone(db)).with_source(Arc::new(builtins()))
}

pub fn memory_db() -> Arc<Database> {
    Arc::new(Database::open_in_memory().unwrap())
}

/// Zip `files` (paths relative to the archive root) into `path`
pub fn build_zip(path: &Path, files: &[(&str, &str)]) {
    let mut writer = zip::ZipWriter::new(File::create(path).unwrap());
    for (name, body) in files {
        writer
            .start_file(*name, zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(body.as_bytes()).unwrap();
    }
    writer.finish().unwrap();
}

/// Bot that records outgoing messages
#[derive(Default)]
pub struct RecordingBot {
    pub sent: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl Bot for RecordingBot {
    async fn send_message(&self, chat_id: &str, text: &str) -> Result<String, BotError> {
        self.sent.lock().unwrap().push((chat_id.to_string(), text.to_string()));
        Ok("1".to_string())
    }

    async fn send_with_keyboard(&self, chat_id: &str, text: &str, _buttons: Vec<Vec<KeyboardButton>>) -> Result<String, BotError> {
        self.send_message(chat_id, text).await
    }

    async fn answer_callback(&self, _callback_id: &str, _text: Option<&str>) -> Result<(), BotError> {
        Ok(())
    }

    fn bot_info(&self) -> BotInfo {
        BotInfo {
            id: "0".to_string(),
            name: "test".to_string(),
            username: "test_bot".to_string(),
        }
    }
}
