//! Scene files – the TOML description of a world and its initial agents.
//!
//! ```toml
//! [world]
//! width = 20.0
//! height = 10.0
//! resolution = 10.0
//! interval_ms = 100
//!
//! [[agent]]
//! name = "robot"
//! pose = { x = 2.0, y = 5.0, a = 0.0 }
//! size = { x = 0.4, y = 0.4 }
//! velocity = { x = 0.3, y = 0.0, a = 0.0 }
//!
//! [agent.device]
//! kind = "laser"
//! samples = 90
//!
//! [[agent]]
//! name = "mast"
//! parent = "robot"
//! pose = { x = 0.1, y = 0.0, a = 0.0 }
//! size = { x = 0.1, y = 0.1 }
//! returns = { obstacle = false }
//! ```
//!
//! Parents are referenced by name and must be declared before their
//! children.  Every problem (bad TOML, unknown parent, degenerate outline,
//! invalid bounds) surfaces as [`SimError::Scene`] naming the offending
//! agent.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use arena_types::{
    AgentSpec, DeviceConfig, Geometry, Line, Outline, Pose, Rect, ReturnFlags, SimError, Size,
    Velocity,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::world::{World, WorldConfig};

/// Top-level scene document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SceneConfig {
    #[serde(default)]
    pub world: WorldConfig,
    #[serde(default, rename = "agent")]
    pub agents: Vec<SceneAgent>,
}

/// One `[[agent]]` entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SceneAgent {
    pub name: String,
    /// Name of an agent declared earlier in the file.
    pub parent: Option<String>,
    pub pose: Pose,
    pub size: Option<Size>,
    /// Offset of the outline inside the agent frame.
    pub origin: Option<Pose>,
    pub lines: Vec<Line>,
    pub rects: Vec<Rect>,
    pub returns: ReturnFlags,
    pub fiducial_id: Option<u32>,
    pub velocity: Velocity,
    pub device: Option<DeviceConfig>,
}

impl SceneAgent {
    fn outline(&self) -> Result<Outline, SimError> {
        match (self.lines.is_empty(), self.rects.is_empty()) {
            (true, true) => Ok(Outline::Rectangle),
            (false, true) => Ok(Outline::Lines(self.lines.clone())),
            (true, false) => Ok(Outline::Rects(self.rects.clone())),
            (false, false) => Err(SimError::Scene(format!(
                "agent '{}' sets both lines and rects",
                self.name
            ))),
        }
    }
}

impl SceneConfig {
    /// Read and parse a scene file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SimError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| SimError::Scene(format!("cannot read {}: {e}", path.display())))?;
        Self::parse(&text).map_err(|e| match e {
            SimError::Scene(msg) => SimError::Scene(format!("{}: {msg}", path.display())),
            other => other,
        })
    }

    /// Parse a scene from TOML text.
    pub fn parse(text: &str) -> Result<Self, SimError> {
        toml::from_str(text).map_err(|e| SimError::Scene(e.to_string()))
    }

    /// Create the world and every agent, in file order.
    pub fn build(&self) -> Result<World, SimError> {
        let mut world = World::new(self.world.clone())
            .map_err(|e| SimError::Scene(format!("[world]: {e}")))?;
        let mut ids = HashMap::new();

        for entry in &self.agents {
            if entry.name.is_empty() {
                return Err(SimError::Scene("agent without a name".into()));
            }
            if ids.contains_key(entry.name.as_str()) {
                return Err(SimError::Scene(format!("duplicate agent name '{}'", entry.name)));
            }
            let parent = match &entry.parent {
                Some(name) => Some(*ids.get(name.as_str()).ok_or_else(|| {
                    SimError::Scene(format!(
                        "agent '{}' names unknown parent '{name}' (parents must come first)",
                        entry.name
                    ))
                })?),
                None => None,
            };

            let mut geometry = Geometry::default();
            if let Some(size) = entry.size {
                geometry.size = size;
            }
            if let Some(origin) = entry.origin {
                geometry.pose = origin;
            }
            let spec = AgentSpec {
                name: entry.name.clone(),
                parent,
                pose: entry.pose,
                velocity: entry.velocity,
                geometry,
                outline: entry.outline()?,
                returns: entry.returns,
                fiducial_id: entry.fiducial_id,
                device: entry.device.clone(),
            };
            let id = world
                .create_agent(spec)
                .map_err(|e| SimError::Scene(format!("agent '{}': {e}", entry.name)))?;
            ids.insert(entry.name.as_str(), id);
        }

        info!(agents = world.len(), "scene built");
        Ok(world)
    }
}

/// Load and build a scene file in one step.
pub fn load_world(path: impl AsRef<Path>) -> Result<World, SimError> {
    SceneConfig::load(path)?.build()
}
