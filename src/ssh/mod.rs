//! SSH module - login and channel plumbing on top of russh
//!
//! # Features
//! - Password and private-key (with independent passphrase) authentication
//! - Host key policy: accept-and-log or pinned fingerprints
//! - Single-owner handle task for opening direct-tcpip channels

mod client;
mod config;
mod error;
mod handle_owner;
mod keys;

pub use client::{fingerprint, ClientHandler, ClientOptions, SshClient};
pub use config::{SshEndpoint, TunnelAuth};
pub use error::SshError;
pub use handle_owner::{spawn_handle_owner_task, HandleCommand, HandleController};
pub use keys::decode_private_key;
