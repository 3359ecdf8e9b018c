//! Level configuration.
//!
//! The room server hands every joining client one `LevelConfig`; the client
//! consumes it once to build the corridors, lights, pickups and spawn point.

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::math::Vec3;

/// Corridor piece shapes. Each maps onto one corridor prefab.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CorridorKind {
    Corridor,
    Corridor4,
    CorridorT,
    CorridorL,
}

/// One placed corridor piece.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorridorConfig {
    pub kind: CorridorKind,
    pub position: Vec3,
    /// Yaw in radians.
    #[serde(default)]
    pub rotation: f32,
}

/// Point light placement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LightConfig {
    pub position: Vec3,
    #[serde(default = "default_intensity")]
    pub intensity: f32,
}

fn default_intensity() -> f32 {
    1.0
}

/// Interactive pickup placement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PickupConfig {
    pub id: String,
    pub position: Vec3,
}

/// Static level layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelConfig {
    #[serde(default)]
    pub corridors: Vec<CorridorConfig>,
    #[serde(default)]
    pub lights: Vec<LightConfig>,
    #[serde(default)]
    pub pickups: Vec<PickupConfig>,
    pub spawn_point: Vec3,
}

impl LevelConfig {
    /// Parses a level from JSON.
    pub fn from_json_str(s: &str) -> anyhow::Result<Self> {
        let level: Self = serde_json::from_str(s).context("parse level")?;
        level.validate()?;
        Ok(level)
    }

    /// Reads a level file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read level {}", path.display()))?;
        let level =
            Self::from_json_str(&text).with_context(|| format!("level {}", path.display()))?;
        info!(path = %path.display(), pickups = level.pickups.len(), "Level loaded");
        Ok(level)
    }

    /// Pickup ids must be unique; they key the interaction zones.
    pub fn validate(&self) -> anyhow::Result<()> {
        let mut seen = BTreeSet::new();
        for pickup in &self.pickups {
            if !seen.insert(pickup.id.as_str()) {
                bail!("duplicate pickup id {:?}", pickup.id);
            }
        }
        Ok(())
    }

    /// Small built-in level: a cross of corridors with two pickups.
    pub fn sample() -> Self {
        Self {
            corridors: vec![
                CorridorConfig {
                    kind: CorridorKind::Corridor4,
                    position: Vec3::ZERO,
                    rotation: 0.0,
                },
                CorridorConfig {
                    kind: CorridorKind::Corridor,
                    position: Vec3::from_array([0.0, 0.0, 10.0]),
                    rotation: 0.0,
                },
                CorridorConfig {
                    kind: CorridorKind::CorridorT,
                    position: Vec3::from_array([10.0, 0.0, 0.0]),
                    rotation: std::f32::consts::FRAC_PI_2,
                },
                CorridorConfig {
                    kind: CorridorKind::CorridorL,
                    position: Vec3::from_array([0.0, 0.0, -10.0]),
                    rotation: std::f32::consts::PI,
                },
            ],
            lights: vec![
                LightConfig {
                    position: Vec3::from_array([0.0, 4.0, 0.0]),
                    intensity: 1.0,
                },
                LightConfig {
                    position: Vec3::from_array([10.0, 4.0, 0.0]),
                    intensity: 0.6,
                },
            ],
            pickups: vec![
                PickupConfig {
                    id: "pickup-1".to_string(),
                    position: Vec3::from_array([0.0, 0.0, 10.0]),
                },
                PickupConfig {
                    id: "pickup-2".to_string(),
                    position: Vec3::from_array([10.0, 0.0, 0.0]),
                },
            ],
            spawn_point: Vec3::from_array([0.0, 1.0, 0.0]),
        }
    }
}
