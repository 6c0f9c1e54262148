//! Shared core state
//!
//! One instance per process. Commands borrow it; the session value travels
//! separately and is handed back to the caller after each mutation.

use std::sync::Arc;

use tracing::info;

use crate::config::{data_dir, CoreSettings};
use crate::error::CoreError;
use crate::probe::{ConnectivityProber, DataSourceDriver, NetworkDriver};
use crate::store::types::UserId;
use crate::store::{
    ConnectionRepository, DescriptorStore, GroupStore, MemoryRepository, RedbRepository,
};
use crate::tunnel::{TunnelBroker, TunnelProvider};
use crate::vault::{KeyManager, UserKey};

/// Database file name inside the data directory
const DATABASE_FILE: &str = "connections.redb";

pub struct CoreState {
    settings: CoreSettings,
    descriptors: DescriptorStore,
    groups: GroupStore,
    keys: KeyManager,
    driver: Arc<dyn DataSourceDriver>,
    prober: ConnectivityProber,
}

impl CoreState {
    /// Assemble from explicit collaborators
    pub fn new(
        settings: CoreSettings,
        repo: Arc<dyn ConnectionRepository>,
        driver: Arc<dyn DataSourceDriver>,
        tunnels: Arc<dyn TunnelProvider>,
    ) -> Self {
        let prober = ConnectivityProber::new(driver.clone(), tunnels, settings.connect_timeout());
        Self {
            keys: KeyManager::new(settings.key_ttl()),
            descriptors: DescriptorStore::new(repo.clone()),
            groups: GroupStore::new(repo),
            driver,
            prober,
            settings,
        }
    }

    /// Durable state: redb under the data directory, built-in driver, SSH broker
    pub fn open(settings: CoreSettings) -> Result<Self, CoreError> {
        let path = data_dir(&settings)?.join(DATABASE_FILE);
        let repo = RedbRepository::new(path.clone())?;
        info!("Opened connection database at {:?}", path);

        let tunnels = TunnelBroker::from_settings(&settings);
        Ok(Self::new(
            settings,
            Arc::new(repo),
            Arc::new(NetworkDriver::default()),
            Arc::new(tunnels),
        ))
    }

    /// Ephemeral state for tools and tests
    pub fn in_memory(settings: CoreSettings) -> Self {
        let tunnels = TunnelBroker::from_settings(&settings);
        Self::new(
            settings,
            Arc::new(MemoryRepository::new()),
            Arc::new(NetworkDriver::default()),
            Arc::new(tunnels),
        )
    }

    pub fn settings(&self) -> &CoreSettings {
        &self.settings
    }

    pub fn descriptors(&self) -> &DescriptorStore {
        &self.descriptors
    }

    pub fn groups(&self) -> &GroupStore {
        &self.groups
    }

    pub fn keys(&self) -> &KeyManager {
        &self.keys
    }

    pub fn driver(&self) -> &Arc<dyn DataSourceDriver> {
        &self.driver
    }

    pub fn prober(&self) -> &ConnectivityProber {
        &self.prober
    }

    /// Login hook: make `key` the user's active key
    pub fn login(&self, user: UserId, key: UserKey) {
        self.keys.install(user, key);
    }

    /// Logout hook: forget the user's key
    pub fn logout(&self, user: UserId) -> bool {
        self.keys.evict(user)
    }
}
