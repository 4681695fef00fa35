//! Session hub configuration

use serde::Deserialize;
use std::time::Duration;

use crate::application::hub::{HubSettings, RetryPolicy};
use crate::domain::session::AutoFinishPolicy;

use super::error::ValidationError;

/// Hub tuning: queue sizes, timers, storage retry.
#[derive(Debug, Clone, Deserialize)]
pub struct HubConfig {
    #[serde(default = "default_command_queue_capacity")]
    pub command_queue_capacity: usize,

    /// Frames a connection may fall behind before it is disconnected
    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,

    #[serde(default = "default_idle_teardown")]
    pub idle_teardown_secs: u64,

    #[serde(default = "default_roster_grace")]
    pub roster_grace_secs: u64,

    #[serde(default = "default_storage_max_retries")]
    pub storage_max_retries: u32,

    #[serde(default = "default_storage_retry_base")]
    pub storage_retry_base_ms: u64,

    #[serde(default = "default_flush_timeout")]
    pub flush_timeout_secs: u64,

    #[serde(default)]
    pub battle: KindConfig,

    #[serde(default)]
    pub storyboard: KindConfig,
}

/// Per session-kind behaviour.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct KindConfig {
    /// Count disconnected voters (within the grace window) when deciding
    /// whether everyone has voted
    #[serde(default)]
    pub auto_finish_counts_disconnected: bool,
}

impl KindConfig {
    fn policy(&self) -> AutoFinishPolicy {
        AutoFinishPolicy {
            counts_disconnected: self.auto_finish_counts_disconnected,
        }
    }
}

impl HubConfig {
    /// Validate hub configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        let positive = [
            ("command_queue_capacity", self.command_queue_capacity as u64),
            ("outbound_queue_capacity", self.outbound_queue_capacity as u64),
            ("idle_teardown_secs", self.idle_teardown_secs),
            ("storage_retry_base_ms", self.storage_retry_base_ms),
            ("flush_timeout_secs", self.flush_timeout_secs),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(ValidationError::ZeroHubSetting(name));
            }
        }
        Ok(())
    }

    /// Runtime settings for `Hub::new`.
    pub fn settings(&self) -> HubSettings {
        HubSettings {
            command_queue_capacity: self.command_queue_capacity,
            outbound_queue_capacity: self.outbound_queue_capacity,
            idle_teardown: Duration::from_secs(self.idle_teardown_secs),
            roster_grace: Duration::from_secs(self.roster_grace_secs),
            retry: RetryPolicy {
                max_retries: self.storage_max_retries,
                base_delay: Duration::from_millis(self.storage_retry_base_ms),
            },
            flush_timeout: Duration::from_secs(self.flush_timeout_secs),
            battle_policy: self.battle.policy(),
            storyboard_policy: self.storyboard.policy(),
        }
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            command_queue_capacity: default_command_queue_capacity(),
            outbound_queue_capacity: default_outbound_queue_capacity(),
            idle_teardown_secs: default_idle_teardown(),
            roster_grace_secs: default_roster_grace(),
            storage_max_retries: default_storage_max_retries(),
            storage_retry_base_ms: default_storage_retry_base(),
            flush_timeout_secs: default_flush_timeout(),
            battle: KindConfig::default(),
            storyboard: KindConfig::default(),
        }
    }
}

fn default_command_queue_capacity() -> usize {
    256
}

fn default_outbound_queue_capacity() -> usize {
    64
}

fn default_idle_teardown() -> u64 {
    60
}

fn default_roster_grace() -> u64 {
    120
}

fn default_storage_max_retries() -> u32 {
    5
}

fn default_storage_retry_base() -> u64 {
    200
}

fn default_flush_timeout() -> u64 {
    10
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::session::SessionKind;

    #[test]
    fn test_defaults_match_hub_defaults() {
        let settings = HubConfig::default().settings();
        let expected = HubSettings::default();

        assert_eq!(settings.command_queue_capacity, expected.command_queue_capacity);
        assert_eq!(settings.outbound_queue_capacity, expected.outbound_queue_capacity);
        assert_eq!(settings.idle_teardown, expected.idle_teardown);
        assert_eq!(settings.roster_grace, expected.roster_grace);
        assert_eq!(settings.retry, expected.retry);
        assert_eq!(settings.flush_timeout, expected.flush_timeout);
    }

    #[test]
    fn test_per_kind_policy() {
        let config = HubConfig {
            storyboard: KindConfig {
                auto_finish_counts_disconnected: true,
            },
            ..Default::default()
        };
        let settings = config.settings();

        assert!(!settings.policy_for(SessionKind::Battle).counts_disconnected);
        assert!(settings.policy_for(SessionKind::Storyboard).counts_disconnected);
    }

    #[test]
    fn test_zero_capacity_is_rejected() {
        let config = HubConfig {
            outbound_queue_capacity: 0,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ValidationError::ZeroHubSetting("outbound_queue_capacity"))
        );
    }
}
