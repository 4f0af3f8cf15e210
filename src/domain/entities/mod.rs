//! Domain entities - Core business objects

pub mod user;
pub mod message;
pub mod module;

pub use user::User;
pub use message::{Message, MessageType, Content};
pub use module::{
    is_valid_module_id, setting_value_text, MenuItem, ModuleInfo, ModuleManifest, ModuleStatus,
    RegistryRow, SettingDescriptor, SettingType, MANIFEST_FILE,
};
