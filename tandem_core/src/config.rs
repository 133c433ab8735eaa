//! Session configuration.
//!
//! Defaults: topic `game`, 100 ms publish window, 0.3 smoothing factor, 5 units of
//! movement per tick, spawn at (400, 300).

use serde::{Deserialize, Serialize};
use std::time::Duration;

// ============================================================================
// IDENTITY
// ============================================================================

/// Shape of generated participant identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityStyle {
    /// `<prefix>_<9 base-36 chars>`
    #[default]
    Short,
    /// `<prefix>_<uuid v4>`
    Uuid,
}

/// Configuration for the identity provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Identifier prefix (default: "player")
    pub prefix: String,

    /// Random suffix style (default: Short)
    pub style: IdentityStyle,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            prefix: "player".to_string(),
            style: IdentityStyle::Short,
        }
    }
}

// ============================================================================
// THROTTLE
// ============================================================================

/// What happens to an announcement that arrives while the throttle is cooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Discard it. Remote peers may see a state up to one window stale.
    #[default]
    Drop,
    /// Keep only the newest one and send it when the window closes.
    Coalesce,
}

/// Configuration for the per-participant publish throttle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    /// Minimum interval between actual `track` calls (default: 100 ms)
    pub interval_ms: u64,

    /// Overflow handling (default: Drop)
    pub policy: OverflowPolicy,
}

impl ThrottleConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            interval_ms: 100,
            policy: OverflowPolicy::Drop,
        }
    }
}

// ============================================================================
// INTERPOLATION
// ============================================================================

/// Configuration for remote entity smoothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpolationConfig {
    /// Fraction of the remaining distance covered per tick (default: 0.3)
    pub factor: f64,

    /// Remaining distance below which an entity snaps to its target (default: 0.01)
    pub snap_epsilon: f64,
}

impl Default for InterpolationConfig {
    fn default() -> Self {
        Self {
            factor: 0.3,
            snap_epsilon: 0.01,
        }
    }
}

// ============================================================================
// MOVEMENT
// ============================================================================

/// Configuration for the local entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MovementConfig {
    /// Distance moved per tick while a direction is held (default: 5.0)
    pub speed: f64,

    /// Initial local position (default: [400, 300])
    pub spawn: [f64; 2],
}

impl Default for MovementConfig {
    fn default() -> Self {
        Self {
            speed: 5.0,
            spawn: [400.0, 300.0],
        }
    }
}

// ============================================================================
// SESSION
// ============================================================================

/// Configuration for a replication session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Presence topic all participants join (default: "game")
    pub topic: String,

    pub identity: IdentityConfig,
    pub throttle: ThrottleConfig,
    pub interpolation: InterpolationConfig,
    pub movement: MovementConfig,

    /// How long to wait for the transport to confirm a subscription (default: 5000 ms)
    pub subscribe_timeout_ms: u64,
}

impl SessionConfig {
    pub fn subscribe_timeout(&self) -> Duration {
        Duration::from_millis(self.subscribe_timeout_ms)
    }

    /// Sets the presence topic.
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    /// Sets the throttle window and policy.
    pub fn with_throttle(mut self, interval_ms: u64, policy: OverflowPolicy) -> Self {
        self.throttle = ThrottleConfig {
            interval_ms,
            policy,
        };
        self
    }

    /// Sets the spawn position.
    pub fn with_spawn(mut self, x: f64, y: f64) -> Self {
        self.movement.spawn = [x, y];
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            topic: "game".to_string(),
            identity: IdentityConfig::default(),
            throttle: ThrottleConfig::default(),
            interpolation: InterpolationConfig::default(),
            movement: MovementConfig::default(),
            subscribe_timeout_ms: 5_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_config_default() {
        let config = SessionConfig::default();
        assert_eq!(config.topic, "game");
        assert_eq!(config.throttle.interval(), Duration::from_millis(100));
        assert_eq!(config.throttle.policy, OverflowPolicy::Drop);
        assert_eq!(config.interpolation.factor, 0.3);
        assert_eq!(config.movement.speed, 5.0);
        assert_eq!(config.movement.spawn, [400.0, 300.0]);
    }

    #[test]
    fn test_builders_touch_only_their_fields() {
        let config = SessionConfig::default()
            .with_topic("lobby")
            .with_throttle(250, OverflowPolicy::Coalesce)
            .with_spawn(10.0, 20.0);

        assert_eq!(config.topic, "lobby");
        assert_eq!(config.throttle.interval(), Duration::from_millis(250));
        assert_eq!(config.throttle.policy, OverflowPolicy::Coalesce);
        assert_eq!(config.movement.spawn, [10.0, 20.0]);
        assert_eq!(config.movement.speed, 5.0);
        assert_eq!(config.interpolation, InterpolationConfig::default());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: SessionConfig = serde_json::from_str(
            r#"{ "topic": "lobby", "throttle": { "policy": "coalesce" } }"#,
        )
        .unwrap();

        assert_eq!(config.topic, "lobby");
        assert_eq!(config.throttle.policy, OverflowPolicy::Coalesce);
        assert_eq!(config.throttle.interval_ms, 100);
        assert_eq!(config.identity.prefix, "player");
    }
}
