//! Infrastructure layer - External concerns
//!
//! This layer contains:
//! - Config: Configuration loading
//! - Database: SQLite persistence (users, settings, module registry, buttons)
//! - Sources: Where module code comes from (compiled-in bundles, shared libraries)
//! - Web: Panel HTTP engine, module route groups and templates
//! - Adapters: Platform integrations (Telegram, console)

pub mod adapters;
pub mod config;
pub mod database;
pub mod sources;
pub mod web;
