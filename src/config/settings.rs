//! Core settings

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Current settings file version
pub const SETTINGS_VERSION: u32 = 1;

fn default_version() -> u32 {
    SETTINGS_VERSION
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_keepalive_interval() -> u64 {
    120
}

fn default_key_ttl() -> Option<u64> {
    Some(12 * 60 * 60)
}

/// How the tunnel broker treats server host keys
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum HostKeyPolicy {
    /// Accept any host key and log its fingerprint
    #[default]
    AcceptUnknown,
    /// Accept only keys whose `SHA256:` fingerprint is listed
    Pinned { fingerprints: Vec<String> },
}

/// Runtime settings for the tunnel broker, prober and key cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreSettings {
    #[serde(default = "default_version")]
    pub version: u32,

    /// Bound on SSH connect+auth and on a whole probe
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// SSH keepalive interval for tunnel sessions
    #[serde(default = "default_keepalive_interval")]
    pub keepalive_interval_secs: u64,

    /// Lifetime of an installed user key; `None` keeps it until logout
    #[serde(default = "default_key_ttl")]
    pub key_ttl_secs: Option<u64>,

    #[serde(default)]
    pub host_key_policy: HostKeyPolicy,

    /// Where the repository lives; defaults to the config directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
}

impl Default for CoreSettings {
    fn default() -> Self {
        Self {
            version: SETTINGS_VERSION,
            connect_timeout_secs: default_connect_timeout(),
            keepalive_interval_secs: default_keepalive_interval(),
            key_ttl_secs: default_key_ttl(),
            host_key_policy: HostKeyPolicy::default(),
            data_dir: None,
        }
    }
}

impl CoreSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }

    pub fn keepalive_interval(&self) -> Option<Duration> {
        (self.keepalive_interval_secs > 0).then(|| Duration::from_secs(self.keepalive_interval_secs))
    }

    pub fn key_ttl(&self) -> Option<Duration> {
        self.key_ttl_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_fills_defaults() {
        let settings: CoreSettings =
            serde_json::from_str(r#"{"connect_timeout_secs": 5}"#).unwrap();
        assert_eq!(settings.connect_timeout(), Duration::from_secs(5));
        assert_eq!(settings.keepalive_interval(), Some(Duration::from_secs(120)));
        assert_eq!(settings.key_ttl(), Some(Duration::from_secs(43200)));
        assert_eq!(settings.host_key_policy, HostKeyPolicy::AcceptUnknown);
    }

    #[test]
    fn test_pinned_policy_shape() {
        let settings: CoreSettings = serde_json::from_str(
            r#"{"host_key_policy": {"mode": "pinned", "fingerprints": ["SHA256:abc"]}}"#,
        )
        .unwrap();
        assert_eq!(
            settings.host_key_policy,
            HostKeyPolicy::Pinned {
                fingerprints: vec!["SHA256:abc".into()]
            }
        );
    }

    #[test]
    fn test_zero_keepalive_disables() {
        let settings = CoreSettings {
            keepalive_interval_secs: 0,
            key_ttl_secs: None,
            ..Default::default()
        };
        assert!(settings.keepalive_interval().is_none());
        assert!(settings.key_ttl().is_none());
    }
}
