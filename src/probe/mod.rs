//! Connectivity Prober
//!
//! Side-effect-free connection tests, optionally through an SSH tunnel, plus
//! the data-source driver seam and the built-in network driver.

mod driver;
mod network;
mod prober;

pub use driver::{DataSource, DataSourceDriver, DriverParams, ProbeError, CONNECTION_SUCCESSFUL};
pub use network::{NetworkDataSource, NetworkDriver};
pub use prober::{ConnectivityProber, ProbeOutcome, ProbeRequest};
