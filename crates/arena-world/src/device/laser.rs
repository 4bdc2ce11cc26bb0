//! Scanning laser range finder.

use arena_types::{LaserConfig, SensorKind, SimError};
use serde_json::json;

use super::{SenseContext, Sensor};

/// `samples` beams spread evenly across `fov`, starting at the right-hand
/// edge (`heading - fov/2`).  Only agents with the laser return flag stop a
/// beam.  Readings below `range_min` clamp to it; misses read `range_max`.
#[derive(Debug, Clone)]
pub struct LaserDevice {
    config: LaserConfig,
    ranges: Vec<f64>,
}

impl LaserDevice {
    pub fn new(config: LaserConfig) -> Self {
        Self {
            config,
            ranges: Vec::new(),
        }
    }

    pub fn config(&self) -> &LaserConfig {
        &self.config
    }

    /// Latest scan, one range per beam.
    pub fn ranges(&self) -> &[f64] {
        &self.ranges
    }

    /// Bearing of beam `i` relative to the laser's own heading.
    pub fn beam_bearing(&self, i: u32) -> f64 {
        let samples = self.config.samples.max(1) as f64;
        -self.config.fov / 2.0 + i as f64 * self.config.fov / samples
    }
}

impl Sensor for LaserDevice {
    fn kind(&self) -> &'static str {
        "laser"
    }

    fn update(&mut self, ctx: &SenseContext<'_>) -> Result<(), SimError> {
        let origin = ctx.mounted_pose(self.config.pose)?;
        let LaserConfig {
            samples,
            range_min,
            range_max,
            ..
        } = self.config;

        let ranges = (0..samples)
            .map(|i| {
                let bearing = origin.a + self.beam_bearing(i);
                ctx.cast(SensorKind::Laser, origin, bearing, range_max)
                    .map_or(range_max, |hit| hit.range.max(range_min))
            })
            .collect();
        self.ranges = ranges;
        Ok(())
    }

    fn serialize_data(&self) -> serde_json::Value {
        json!({
            "fov": self.config.fov,
            "range_max": self.config.range_max,
            "ranges": self.ranges,
        })
    }
}
