//! shop-bot - Telegram shop bot with hot-pluggable feature modules
//!
//! Modules live under a modules directory, each with a `module.yaml`
//! manifest. The [`ModuleLoader`](application::modules::ModuleLoader) takes
//! them through discover, load, enable, disable and delete, attaching their
//! bot handlers to the dispatcher and their panel routes to the web engine.

pub mod application;
pub mod builtin;
pub mod domain;
pub mod infrastructure;
