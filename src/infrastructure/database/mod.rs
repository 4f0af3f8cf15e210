//! SQLite storage: users, settings, the module registry and menu buttons

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use rusqlite::{Connection, OptionalExtension, Result as SqliteResult};
use serde::{Deserialize, Serialize};

use crate::domain::entities::{ModuleManifest, ModuleStatus, RegistryRow};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub telegram_id: String,
    pub username: Option<String>,
    pub role: String, // owner, admin, user
    pub created_at: String,
}

/// Inline menu button; `module_id` links it to the module that owns it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ButtonConfig {
    pub id: i64,
    pub label: String,
    pub callback_data: Option<String>,
    pub url: Option<String>,
    pub module_id: Option<String>,
    pub is_active: bool,
}

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn new(path: impl AsRef<Path>) -> SqliteResult<Self> {
        let conn = Connection::open(path)?;
        let db = Self { conn: Mutex::new(conn) };
        db.init_tables()?;
        Ok(db)
    }

    pub fn open_in_memory() -> SqliteResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn: Mutex::new(conn) };
        db.init_tables()?;
        Ok(db)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn init_tables(&self) -> SqliteResult<()> {
        self.conn().execute_batch(
            "CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                telegram_id TEXT UNIQUE NOT NULL,
                username TEXT,
                role TEXT NOT NULL DEFAULT 'user',
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS bot_settings (
                key TEXT PRIMARY KEY,
                value TEXT
            );

            CREATE TABLE IF NOT EXISTS modules_registry (
                module_id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                version TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'disabled',
                enabled_at TIMESTAMP,
                error_message TEXT,
                metadata TEXT NOT NULL DEFAULT '{}'
            );

            CREATE TABLE IF NOT EXISTS button_configs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                label TEXT NOT NULL,
                callback_data TEXT,
                url TEXT,
                module_id TEXT,
                is_active INTEGER NOT NULL DEFAULT 1
            );

            CREATE INDEX IF NOT EXISTS idx_button_configs_module ON button_configs(module_id);",
        )
    }

    /// Run `f` against the shared connection
    pub fn with_connection<T>(&self, f: impl FnOnce(&Connection) -> T) -> T {
        let conn = self.conn();
        f(&conn)
    }

    pub fn table_exists(&self, name: &str) -> SqliteResult<bool> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [name],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    // User management
    pub fn add_user(&self, telegram_id: &str, username: Option<&str>, role: &str) -> SqliteResult<i64> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO users (telegram_id, username, role) VALUES (?1, ?2, ?3)
             ON CONFLICT(telegram_id) DO UPDATE SET role = excluded.role",
            rusqlite::params![telegram_id, username.unwrap_or(""), role],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_user_by_telegram_id(&self, telegram_id: &str) -> SqliteResult<Option<User>> {
        self.conn()
            .query_row(
                "SELECT id, telegram_id, username, role, created_at FROM users WHERE telegram_id = ?1",
                [telegram_id],
                |row| {
                    Ok(User {
                        id: row.get(0)?,
                        telegram_id: row.get(1)?,
                        username: row.get(2)?,
                        role: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                },
            )
            .optional()
    }

    /// Telegram ids of every owner and admin
    pub fn admin_ids(&self) -> SqliteResult<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT telegram_id FROM users WHERE role IN ('owner', 'admin') ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        rows.collect()
    }

    // Settings
    pub fn get_setting(&self, key: &str) -> SqliteResult<Option<String>> {
        let value: Option<Option<String>> = self
            .conn()
            .query_row("SELECT value FROM bot_settings WHERE key = ?1", [key], |row| row.get(0))
            .optional()?;
        Ok(value.flatten())
    }

    pub fn set_setting(&self, key: &str, value: &str) -> SqliteResult<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO bot_settings (key, value) VALUES (?1, ?2)",
            [key, value],
        )?;
        Ok(())
    }

    /// Store `value` unless the key already has one. Returns true if inserted.
    pub fn insert_setting_if_absent(&self, key: &str, value: &str) -> SqliteResult<bool> {
        let rows = self.conn().execute(
            "INSERT OR IGNORE INTO bot_settings (key, value) VALUES (?1, ?2)",
            [key, value],
        )?;
        Ok(rows > 0)
    }

    /// Delete every setting whose key starts with `prefix`.
    /// Matches the literal text, so `_` in the prefix is not a wildcard.
    pub fn delete_settings_prefix(&self, prefix: &str) -> SqliteResult<usize> {
        self.conn().execute(
            "DELETE FROM bot_settings WHERE substr(key, 1, length(?1)) = ?1",
            [prefix],
        )
    }

    // Module registry
    pub fn get_registry(&self, module_id: &str) -> SqliteResult<Option<RegistryRow>> {
        self.conn()
            .query_row(
                "SELECT module_id, name, version, status, enabled_at, error_message, metadata
                 FROM modules_registry WHERE module_id = ?1",
                [module_id],
                registry_row,
            )
            .optional()
    }

    pub fn list_registry(&self) -> SqliteResult<Vec<RegistryRow>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT module_id, name, version, status, enabled_at, error_message, metadata
             FROM modules_registry ORDER BY module_id",
        )?;
        let rows = stmt.query_map([], registry_row)?;
        rows.collect()
    }

    /// Insert a `disabled` row for a new module, or refresh name, version and
    /// metadata of an existing one. Status is never touched here.
    pub fn upsert_registry(&self, manifest: &ModuleManifest) -> SqliteResult<()> {
        let metadata = serde_json::to_string(manifest).unwrap_or_else(|_| "{}".to_string());
        self.conn().execute(
            "INSERT INTO modules_registry (module_id, name, version, status, enabled_at, error_message, metadata)
             VALUES (?1, ?2, ?3, 'disabled', NULL, NULL, ?4)
             ON CONFLICT(module_id) DO UPDATE SET
                name = excluded.name,
                version = excluded.version,
                metadata = excluded.metadata",
            rusqlite::params![manifest.id, manifest.name, manifest.version, metadata],
        )?;
        Ok(())
    }

    /// Set status and error message. `enabled_at` is stamped only when the
    /// new status is `enabled`. Returns the number of rows changed.
    pub fn set_module_status(
        &self,
        module_id: &str,
        status: ModuleStatus,
        error_message: Option<&str>,
    ) -> SqliteResult<usize> {
        self.conn().execute(
            "UPDATE modules_registry
                SET status = ?2,
                    enabled_at = CASE WHEN ?2 = 'enabled' THEN CURRENT_TIMESTAMP ELSE enabled_at END,
                    error_message = ?3
              WHERE module_id = ?1",
            rusqlite::params![module_id, status.as_str(), error_message],
        )
    }

    /// Flag a module as failed, creating its row if discovery never got that far
    pub fn record_module_error(&self, module_id: &str, message: &str) -> SqliteResult<()> {
        self.conn().execute(
            "INSERT INTO modules_registry (module_id, name, version, status, enabled_at, error_message, metadata)
             VALUES (?1, ?1, '', 'error', NULL, ?2, '{}')
             ON CONFLICT(module_id) DO UPDATE SET
                status = 'error',
                error_message = excluded.error_message",
            [module_id, message],
        )?;
        Ok(())
    }

    pub fn delete_registry(&self, module_id: &str) -> SqliteResult<bool> {
        let rows = self
            .conn()
            .execute("DELETE FROM modules_registry WHERE module_id = ?1", [module_id])?;
        Ok(rows > 0)
    }

    /// Run each statement as its own batch
    pub fn apply_schema(&self, statements: &[String]) -> SqliteResult<()> {
        let conn = self.conn();
        for statement in statements {
            conn.execute_batch(statement)?;
        }
        Ok(())
    }

    // Menu buttons
    pub fn add_button(
        &self,
        label: &str,
        callback_data: Option<&str>,
        url: Option<&str>,
        module_id: Option<&str>,
    ) -> SqliteResult<i64> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO button_configs (label, callback_data, url, module_id, is_active)
             VALUES (?1, ?2, ?3, ?4, 1)",
            rusqlite::params![label, callback_data, url, module_id],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn set_module_buttons_active(&self, module_id: &str, active: bool) -> SqliteResult<usize> {
        self.conn().execute(
            "UPDATE button_configs SET is_active = ?2 WHERE module_id = ?1",
            rusqlite::params![module_id, active],
        )
    }

    pub fn list_buttons(&self, only_active: bool) -> SqliteResult<Vec<ButtonConfig>> {
        let conn = self.conn();
        let sql = if only_active {
            "SELECT id, label, callback_data, url, module_id, is_active FROM button_configs
             WHERE is_active = 1 ORDER BY id"
        } else {
            "SELECT id, label, callback_data, url, module_id, is_active FROM button_configs ORDER BY id"
        };
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map([], |row| {
            Ok(ButtonConfig {
                id: row.get(0)?,
                label: row.get(1)?,
                callback_data: row.get(2)?,
                url: row.get(3)?,
                module_id: row.get(4)?,
                is_active: row.get(5)?,
            })
        })?;
        rows.collect()
    }
}

fn registry_row(row: &rusqlite::Row<'_>) -> SqliteResult<RegistryRow> {
    Ok(RegistryRow {
        module_id: row.get(0)?,
        name: row.get(1)?,
        version: row.get(2)?,
        status: row.get(3)?,
        enabled_at: row.get(4)?,
        error_message: row.get(5)?,
        metadata: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_keeps_status() {
        let db = Database::open_in_memory().unwrap();
        let manifest = ModuleManifest::new("alpha", "Alpha", "1.0");
        db.upsert_registry(&manifest).unwrap();
        assert_eq!(db.get_registry("alpha").unwrap().unwrap().status(), ModuleStatus::Disabled);

        db.set_module_status("alpha", ModuleStatus::Enabled, None).unwrap();
        db.upsert_registry(&ModuleManifest::new("alpha", "Alpha Renamed", "1.1")).unwrap();

        let row = db.get_registry("alpha").unwrap().unwrap();
        assert_eq!(row.status(), ModuleStatus::Enabled);
        assert_eq!(row.name, "Alpha Renamed");
        assert_eq!(row.version, "1.1");
        assert!(row.enabled_at.is_some());
    }

    #[test]
    fn test_enabled_at_only_set_on_enable() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_registry(&ModuleManifest::new("alpha", "Alpha", "1.0")).unwrap();

        db.set_module_status("alpha", ModuleStatus::Disabled, None).unwrap();
        assert!(db.get_registry("alpha").unwrap().unwrap().enabled_at.is_none());

        db.set_module_status("alpha", ModuleStatus::Enabled, None).unwrap();
        let stamped = db.get_registry("alpha").unwrap().unwrap().enabled_at;
        assert!(stamped.is_some());

        db.set_module_status("alpha", ModuleStatus::Error, Some("boom")).unwrap();
        let row = db.get_registry("alpha").unwrap().unwrap();
        assert_eq!(row.enabled_at, stamped);
        assert_eq!(row.error_message.as_deref(), Some("boom"));
    }

    #[test]
    fn test_record_error_inserts_missing_row() {
        let db = Database::open_in_memory().unwrap();
        db.record_module_error("ghost", "Invalid module manifest").unwrap();

        let row = db.get_registry("ghost").unwrap().unwrap();
        assert_eq!(row.status(), ModuleStatus::Error);
        assert_eq!(row.error_message.as_deref(), Some("Invalid module manifest"));
    }

    #[test]
    fn test_settings_defaults_never_overwrite() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.insert_setting_if_absent("alpha_limit", "10").unwrap());
        db.set_setting("alpha_limit", "25").unwrap();
        assert!(!db.insert_setting_if_absent("alpha_limit", "10").unwrap());
        assert_eq!(db.get_setting("alpha_limit").unwrap().as_deref(), Some("25"));
    }

    #[test]
    fn test_delete_prefix_is_literal() {
        let db = Database::open_in_memory().unwrap();
        db.set_setting("alpha_limit", "1").unwrap();
        db.set_setting("alphax_limit", "2").unwrap();
        db.set_setting("shop_name", "3").unwrap();

        assert_eq!(db.delete_settings_prefix("alpha_").unwrap(), 1);
        assert!(db.get_setting("alpha_limit").unwrap().is_none());
        assert_eq!(db.get_setting("alphax_limit").unwrap().as_deref(), Some("2"));
    }

    #[test]
    fn test_module_buttons_toggle() {
        let db = Database::open_in_memory().unwrap();
        db.add_button("Alpha", Some("mod:alpha:menu"), None, Some("alpha")).unwrap();
        db.add_button("Help", Some("help"), None, None).unwrap();

        db.set_module_buttons_active("alpha", false).unwrap();
        let active = db.list_buttons(true).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].label, "Help");
    }

    #[test]
    fn test_admin_ids() {
        let db = Database::open_in_memory().unwrap();
        db.add_user("1", Some("owner"), "owner").unwrap();
        db.add_user("2", None, "user").unwrap();
        db.add_user("3", None, "admin").unwrap();
        assert_eq!(db.admin_ids().unwrap(), vec!["1".to_string(), "3".to_string()]);
    }
}
