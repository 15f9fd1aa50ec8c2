//! Link watchdog
//!
//! The controller gives no unsolicited sign of life, so silence is the only
//! way to notice a dead link. The watchdog ticks at a fixed period and
//! compares the time since the robot was last heard from against two
//! thresholds:
//!
//! - `min_comm_interval`: idle time after which one filler is written so the
//!   controller answers and refreshes the activity time
//! - `timeout`: silence after which the link is deemed dead (multiplied
//!   while the connection is still being opened)
//!
//! `min_comm_interval` must stay below `timeout`, otherwise the filler
//! cannot prevent a timeout on a healthy but idle link.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::session::LinkState;
use super::{
    LinkError, CONNECTING_TIMEOUT_MULTIPLIER, DEFAULT_MIN_COMM_INTERVAL_MS, DEFAULT_TICK_MS,
    DEFAULT_TIMEOUT_MS,
};

/// Watchdog thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    /// Idle time before a keepalive filler is written (ms)
    pub min_comm_interval_ms: u64,
    /// Silence after which the link is dropped (ms)
    pub timeout_ms: u64,
    /// Timeout multiplier while connecting
    pub connecting_multiplier: u32,
    /// Tick period (ms)
    pub tick_ms: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            min_comm_interval_ms: DEFAULT_MIN_COMM_INTERVAL_MS,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            connecting_multiplier: CONNECTING_TIMEOUT_MULTIPLIER,
            tick_ms: DEFAULT_TICK_MS,
        }
    }
}

impl WatchdogConfig {
    /// Check the threshold ordering
    pub fn validate(&self) -> Result<(), LinkError> {
        if self.tick_ms == 0 {
            return Err(LinkError::InvalidConfig("tick must be non-zero".into()));
        }
        if self.connecting_multiplier == 0 {
            return Err(LinkError::InvalidConfig(
                "connecting multiplier must be non-zero".into(),
            ));
        }
        if self.min_comm_interval_ms >= self.timeout_ms {
            return Err(LinkError::InvalidConfig(format!(
                "keepalive interval ({}ms) must be shorter than timeout ({}ms)",
                self.min_comm_interval_ms, self.timeout_ms
            )));
        }
        Ok(())
    }

    pub fn min_comm_interval(&self) -> Duration {
        Duration::from_millis(self.min_comm_interval_ms)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    /// Effective timeout for the given state
    pub fn timeout_for(&self, state: LinkState) -> Duration {
        let ms = match state {
            LinkState::Connecting => self
                .timeout_ms
                .saturating_mul(self.connecting_multiplier as u64),
            _ => self.timeout_ms,
        };
        Duration::from_millis(ms)
    }
}

/// What a tick decided
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogAction {
    /// Link is fine
    None,
    /// Write the idle filler
    Keepalive,
    /// Link is dead, disconnect
    Timeout,
}

/// Tick decision logic, independent of threads and clocks
#[derive(Debug, Clone, Copy, Default)]
pub struct Watchdog {
    config: WatchdogConfig,
}

impl Watchdog {
    pub fn new(config: WatchdogConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &WatchdogConfig {
        &self.config
    }

    /// Decide the action for one tick given the time since last activity
    pub fn check(&self, state: LinkState, busy: bool, idle: Duration) -> WatchdogAction {
        if state == LinkState::Idle {
            return WatchdogAction::None;
        }
        if idle > self.config.timeout_for(state) {
            return WatchdogAction::Timeout;
        }
        if state == LinkState::Connected && !busy && idle > self.config.min_comm_interval() {
            return WatchdogAction::Keepalive;
        }
        WatchdogAction::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = WatchdogConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.timeout_for(LinkState::Connected), ms(3000));
        assert_eq!(config.timeout_for(LinkState::Connecting), ms(12000));
    }

    #[test]
    fn test_invalid_ordering_rejected() {
        let config = WatchdogConfig {
            min_comm_interval_ms: 3000,
            timeout_ms: 3000,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(LinkError::InvalidConfig(_))));
    }

    #[test]
    fn test_keepalive_only_when_connected_and_idle() {
        let dog = Watchdog::default();
        assert_eq!(dog.check(LinkState::Connected, false, ms(500)), WatchdogAction::None);
        assert_eq!(
            dog.check(LinkState::Connected, false, ms(901)),
            WatchdogAction::Keepalive
        );
        assert_eq!(dog.check(LinkState::Connected, true, ms(901)), WatchdogAction::None);
        assert_eq!(dog.check(LinkState::Connecting, false, ms(901)), WatchdogAction::None);
    }

    #[test]
    fn test_timeout_thresholds() {
        let dog = Watchdog::default();
        assert_eq!(
            dog.check(LinkState::Connected, true, ms(3001)),
            WatchdogAction::Timeout
        );
        assert_eq!(
            dog.check(LinkState::Connected, false, ms(3100)),
            WatchdogAction::Timeout
        );
        assert_eq!(dog.check(LinkState::Connecting, false, ms(3100)), WatchdogAction::None);
        assert_eq!(
            dog.check(LinkState::Connecting, false, ms(12001)),
            WatchdogAction::Timeout
        );
        assert_eq!(dog.check(LinkState::Idle, false, ms(60000)), WatchdogAction::None);
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let config: WatchdogConfig = serde_json::from_str(r#"{"timeout_ms": 5000}"#).unwrap();
        assert_eq!(config.timeout_ms, 5000);
        assert_eq!(config.min_comm_interval_ms, DEFAULT_MIN_COMM_INTERVAL_MS);
    }
}
