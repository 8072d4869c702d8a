//! Shared primitive types used across the controller.

/// Simulation time in seconds. Assigned by the engine, never by us.
pub type SimTime = f64;

/// A stable identifier for any simulated entity (pedestrian, polygon, ...).
pub type EntityId = String;

/// Identifier of one controller-engine session. Only used in log lines.
pub type SessionId = String;

/// A position or velocity in the scenario's planar coordinate system.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

impl std::fmt::Display for Point {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.3}, {:.3})", self.x, self.y)
    }
}
