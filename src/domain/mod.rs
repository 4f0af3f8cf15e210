//! Domain layer - Core business objects
//! 
//! This layer contains:
//! - Entities: Users, messages and the module model (manifest, status, registry rows)
//! - Traits: Abstractions for infrastructure (Bot)

pub mod entities;
pub mod traits;
