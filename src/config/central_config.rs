use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::bluetooth::{
    DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_DIRECT_RECONNECT_DELAY_MS, DEFAULT_DISCOVERY_TIMEOUT_MS,
    DEFAULT_SUBSCRIBE_TIMEOUT_MS, MIN_RECONNECT_DELAY_MS, ReconnectPolicy,
};

/// Central role settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CentralConfig {
    /// Deadline for `Connecting`
    pub connect_timeout_ms: u64,
    /// Deadline for `ConnectedDiscovering`
    pub discovery_timeout_ms: u64,
    /// Deadline for `ConnectedSubscribing`
    pub subscribe_timeout_ms: u64,
    /// Backoff applied to automatic restarts after a scan or link failure
    pub reconnect: ReconnectPolicy,
    /// Fixed delay between attempts when connecting to a known device without scanning
    pub direct_reconnect_delay_ms: u64,
}

impl Default for CentralConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            discovery_timeout_ms: DEFAULT_DISCOVERY_TIMEOUT_MS,
            subscribe_timeout_ms: DEFAULT_SUBSCRIBE_TIMEOUT_MS,
            reconnect: ReconnectPolicy::default(),
            direct_reconnect_delay_ms: DEFAULT_DIRECT_RECONNECT_DELAY_MS,
        }
    }
}

impl CentralConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }

    pub fn subscribe_timeout(&self) -> Duration {
        Duration::from_millis(self.subscribe_timeout_ms)
    }

    /// Never below `MIN_RECONNECT_DELAY_MS`
    pub fn direct_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.direct_reconnect_delay_ms.max(MIN_RECONNECT_DELAY_MS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_direct_delay_is_floored() {
        let config = CentralConfig {
            direct_reconnect_delay_ms: 0,
            ..CentralConfig::default()
        };
        assert_eq!(
            config.direct_reconnect_delay(),
            Duration::from_millis(MIN_RECONNECT_DELAY_MS)
        );
    }
}
