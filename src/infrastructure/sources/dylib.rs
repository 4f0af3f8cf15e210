//! Shared-library modules loaded with libloading
//!
//! A module directory may ship `lib<module_id>.so` exporting
//! `shop_module_init`, which returns a heap-allocated export table. The
//! library handle travels with the loaded module; dropping it unloads the
//! code.

use std::path::{Path, PathBuf};

use libloading::{Library, Symbol};

use crate::application::errors::{ModuleError, ModuleResult};
use crate::application::modules::{LoadedCode, ModuleExports, ModuleSource};
use crate::domain::entities::ModuleManifest;

/// Function signature for module initialization
pub type ModuleInitFn = extern "C" fn() -> *mut ModuleExports;

/// Optional `extern "C" fn() -> u32` reporting the contract version
pub type AbiVersionFn = extern "C" fn() -> u32;

pub const INIT_SYMBOL: &[u8] = b"shop_module_init";
pub const ABI_VERSION_SYMBOL: &[u8] = b"shop_module_abi_version";

/// Contract version this host understands
pub const ABI_VERSION: u32 = 1;

#[derive(Debug, Default, Clone, Copy)]
pub struct DylibSource;

impl DylibSource {
    pub fn new() -> Self {
        Self
    }

    /// Expected library path for a module directory
    pub fn library_path(dir: &Path, module_id: &str) -> PathBuf {
        dir.join(format!("lib{}.so", module_id))
    }
}

impl ModuleSource for DylibSource {
    fn name(&self) -> &str {
        "dylib"
    }

    fn instantiate(&self, manifest: &ModuleManifest, dir: &Path) -> ModuleResult<Option<LoadedCode>> {
        let library_path = Self::library_path(dir, &manifest.id);
        if !library_path.is_file() {
            return Ok(None);
        }

        // Load the library
        let library = unsafe {
            Library::new(&library_path)
                .map_err(|e| ModuleError::EntryPoint(format!("Failed to load library: {}", e)))?
        };

        check_abi_version(&library)?;

        let exports = {
            // Get the init function
            let init_fn: Symbol<ModuleInitFn> = unsafe {
                library
                    .get(INIT_SYMBOL)
                    .map_err(|e| ModuleError::EntryPoint(format!("Failed to find init function: {}", e)))?
            };
            let ptr = init_fn();
            if ptr.is_null() {
                return Err(ModuleError::EntryPoint("Module init returned null".to_string()));
            }
            unsafe { Box::from_raw(ptr) }
        };

        tracing::info!("Loaded module library: {}", library_path.display());

        Ok(Some(
            LoadedCode::new(format!("dylib:{}", library_path.display()), *exports)
                .with_handle(Box::new(library)),
        ))
    }
}

fn check_abi_version(library: &Library) -> ModuleResult<()> {
    let version: Symbol<AbiVersionFn> = match unsafe { library.get(ABI_VERSION_SYMBOL) } {
        Ok(symbol) => symbol,
        Err(_) => return Ok(()),
    };
    let found = version();
    if found != ABI_VERSION {
        return Err(ModuleError::EntryPoint(format!(
            "Module ABI version {} not supported (host is {})",
            found, ABI_VERSION
        )));
    }
    Ok(())
}
