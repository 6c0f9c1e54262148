//! Configuration Management Module
//!
//! Runtime settings for the core and their on-disk storage.

pub mod settings;
pub mod storage;

pub use settings::{CoreSettings, HostKeyPolicy, SETTINGS_VERSION};
pub use storage::{config_dir, data_dir, SettingsStorage, StorageError};
