//! Module code sources
//!
//! A source turns a manifest plus its directory into a table of exports.
//! Compiled-in bundles are tried first, shared libraries second; a module
//! no source claims is a data-only module.

pub mod builtin;
pub mod dylib;

pub use builtin::{BuiltinModules, ModuleFactory};
pub use dylib::{DylibSource, ModuleInitFn, ABI_VERSION, ABI_VERSION_SYMBOL, INIT_SYMBOL};
