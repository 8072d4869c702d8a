use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{
    channel::ConnectionMode,
    error::{ControlError, ControlResult},
    types::{EntityId, Point, SimTime},
};

/// Where and how to reach the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub host:               String,
    pub port:               u16,
    pub mode:               ConnectionMode,
    pub connect_timeout_ms: u64,
    /// None blocks forever waiting for the engine's reply.
    pub read_timeout_ms:    Option<u64>,
    /// Ask the engine to attach its GUI.
    pub gui_mode:           bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            host:               "localhost".into(),
            port:               9999,
            mode:               ConnectionMode::Client,
            connect_timeout_ms: 30_000,
            read_timeout_ms:    None,
            gui_mode:           false,
        }
    }
}

impl SessionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_ms.map(Duration::from_millis)
    }
}

/// Parameters of the corridor-distribution controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorridorConfig {
    pub center:       Point,
    pub radius:       f64,
    /// Seconds between two reassignments.
    pub interval:     SimTime,
    /// Targets handed out round-robin, in this order.
    pub target_ids:   Vec<EntityId>,
    /// Subscription the controller reads positions from.
    pub subscription: String,
}

impl Default for CorridorConfig {
    fn default() -> Self {
        Self {
            center:       Point::new(15.0, 5.0),
            radius:       7.5,
            interval:     30.0,
            target_ids:   ["11", "21", "31", "41", "51"].map(String::from).to_vec(),
            subscription: "default".into(),
        }
    }
}

impl CorridorConfig {
    pub fn validate(&self) -> ControlResult<()> {
        if self.target_ids.is_empty() {
            return Err(ControlError::Config("corridor target_ids must not be empty".into()));
        }
        if !(self.radius.is_finite() && self.radius >= 0.0) {
            return Err(ControlError::Config(format!(
                "corridor radius must be finite and >= 0, got {}",
                self.radius
            )));
        }
        if !(self.interval.is_finite() && self.interval > 0.0) {
            return Err(ControlError::Config(format!(
                "corridor interval must be finite and > 0, got {}",
                self.interval
            )));
        }
        if self.subscription.trim().is_empty() {
            return Err(ControlError::Config("corridor subscription name must not be empty".into()));
        }
        Ok(())
    }
}

/// Everything the runner needs, loadable from one JSON file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub session:         SessionConfig,
    pub controller_type: Option<String>,
    pub scenario:        Option<String>,
    pub corridor:        CorridorConfig,
}

impl RunnerConfig {
    /// Load from a JSON file. Missing fields fall back to defaults.
    /// In tests, use RunnerConfig::default_test().
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: RunnerConfig = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Cannot parse {path}: {e}"))?;
        config.corridor.validate()?;
        Ok(config)
    }

    /// Config with hardcoded defaults for use in unit tests.
    pub fn default_test() -> Self {
        Self {
            session: SessionConfig {
                host:               "127.0.0.1".into(),
                port:               0,
                connect_timeout_ms: 1_000,
                read_timeout_ms:    Some(5_000),
                ..SessionConfig::default()
            },
            controller_type: Some("corridors".into()),
            scenario:        None,
            corridor:        CorridorConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: RunnerConfig = serde_json::from_str(
            r#"{"session": {"port": 9997, "mode": "server"}, "corridor": {"radius": 3.0}}"#,
        )
        .unwrap();
        assert_eq!(config.session.port, 9997);
        assert_eq!(config.session.mode, ConnectionMode::Server);
        assert_eq!(config.session.host, "localhost");
        assert_eq!(config.corridor.radius, 3.0);
        assert_eq!(config.corridor.target_ids.len(), 5);
    }

    #[test]
    fn corridor_validation() {
        let mut c = CorridorConfig::default();
        c.validate().unwrap();
        c.target_ids.clear();
        assert!(c.validate().is_err());

        let c = CorridorConfig { interval: 0.0, ..CorridorConfig::default() };
        assert!(c.validate().is_err());
        let c = CorridorConfig { radius: f64::INFINITY, ..CorridorConfig::default() };
        assert!(c.validate().is_err());
    }

    #[test]
    fn load_reports_missing_file() {
        let err = RunnerConfig::load("/definitely/not/here.json").unwrap_err();
        assert!(err.to_string().contains("Cannot read"), "got {err}");
    }
}
