//! Fiducial (beacon) finder.

use arena_types::{AgentId, FiducialConfig, SensorKind, SimError, normalize_angle};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{SenseContext, Sensor};

/// One detected beacon, in the finder's own frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FiducialReading {
    pub agent: AgentId,
    /// Reported only within `range_id`.
    pub id: Option<u32>,
    pub range: f64,
    pub bearing: f64,
    /// Beacon heading relative to the finder heading.
    pub orientation: f64,
}

/// Detects agents with the fiducial return flag set, inside the field of
/// view and `range_anon`, that are not hidden behind an obstacle.
#[derive(Debug, Clone)]
pub struct FiducialDevice {
    config: FiducialConfig,
    readings: Vec<FiducialReading>,
}

impl FiducialDevice {
    pub fn new(config: FiducialConfig) -> Self {
        Self {
            config,
            readings: Vec::new(),
        }
    }

    /// Latest detections, nearest first.
    pub fn readings(&self) -> &[FiducialReading] {
        &self.readings
    }
}

impl Sensor for FiducialDevice {
    fn kind(&self) -> &'static str {
        "fiducial"
    }

    fn update(&mut self, ctx: &SenseContext<'_>) -> Result<(), SimError> {
        let world = ctx.world();
        let me = ctx.agent_id();
        let origin = ctx.mounted_pose(self.config.pose)?;

        let mut readings = Vec::new();
        for target in world.agents() {
            let id = target.id();
            if !world.admits(me, id, SensorKind::Fiducial) {
                continue;
            }
            let Ok(pose) = world.global_pose(id) else {
                continue;
            };
            let (dx, dy) = (pose.x - origin.x, pose.y - origin.y);
            let range = dx.hypot(dy);
            if range > self.config.range_anon {
                continue;
            }
            let bearing = normalize_angle(dy.atan2(dx) - origin.a);
            if bearing.abs() > self.config.fov / 2.0 {
                continue;
            }
            // The first obstacle or the beacon itself, whichever is nearer.
            let blocker = world.cast_between_with(me, (origin.x, origin.y), (pose.x, pose.y), |c| {
                c == id || world.admits(me, c, SensorKind::Obstacle)
            });
            if blocker.is_some_and(|hit| hit.owner != id) {
                continue;
            }
            readings.push(FiducialReading {
                agent: id,
                id: target.fiducial_id().filter(|_| range <= self.config.range_id),
                range,
                bearing,
                orientation: normalize_angle(pose.a - origin.a),
            });
        }
        readings.sort_by(|a, b| a.range.total_cmp(&b.range));
        self.readings = readings;
        Ok(())
    }

    fn serialize_data(&self) -> serde_json::Value {
        json!({ "fiducials": self.readings })
    }
}
