//! Tunnel Broker
//!
//! SSH-forwarded loopback sockets with guaranteed teardown.

mod broker;
mod error;
mod forward;

pub use broker::{Tunnel, TunnelBroker, TunnelHandle, TunnelProvider};
pub use error::TunnelError;
pub use forward::{start_local_forward, ForwardStats, LocalForwardHandle, RemoteTarget, LOOPBACK_BIND};
