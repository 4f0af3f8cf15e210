//! Capability bundles compiled into the binary
//!
//! Each bundle still needs its `module.yaml` under the modules directory;
//! the bundle only supplies the code half.

pub mod example_module;

use crate::infrastructure::sources::BuiltinModules;

/// All bundles shipped with this build
pub fn registry() -> BuiltinModules {
    BuiltinModules::new().with(example_module::MODULE_ID, example_module::exports)
}
