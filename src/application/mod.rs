//! Application layer - Use cases and business logic
//! 
//! This layer contains:
//! - Errors: Bot and module lifecycle errors
//! - Messaging: Message parsing, middleware, dispatching
//! - Modules: Module discovery, loading and lifecycle

pub mod errors;
pub mod messaging;
pub mod modules;
