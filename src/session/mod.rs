//! Session Connection Registry

mod registry;
mod store;
mod types;

pub use registry::{SessionConnections, UserSession};
pub use store::{MemorySessionStore, SessionStore};
pub use types::{HandleBundle, RegistryEntry, TunnelMetadata};
