//! Sonar ring: one single-beam range transducer per entry.

use arena_types::{RangerConfig, SensorKind, SimError};
use serde_json::json;

use super::{SenseContext, Sensor};

#[derive(Debug, Clone)]
pub struct RangerDevice {
    config: RangerConfig,
    ranges: Vec<f64>,
}

impl RangerDevice {
    pub fn new(config: RangerConfig) -> Self {
        Self {
            config,
            ranges: Vec::new(),
        }
    }

    pub fn ranges(&self) -> &[f64] {
        &self.ranges
    }

    pub fn transducer_count(&self) -> usize {
        self.config.transducers.len()
    }
}

impl Sensor for RangerDevice {
    fn kind(&self) -> &'static str {
        "ranger"
    }

    fn update(&mut self, ctx: &SenseContext<'_>) -> Result<(), SimError> {
        let mut ranges = Vec::with_capacity(self.config.transducers.len());
        for t in &self.config.transducers {
            let pose = ctx.mounted_pose(t.pose)?;
            let range = ctx
                .cast(SensorKind::Sonar, pose, pose.a, t.range_max)
                .map_or(t.range_max, |hit| hit.range.max(t.range_min));
            ranges.push(range);
        }
        self.ranges = ranges;
        Ok(())
    }

    fn serialize_data(&self) -> serde_json::Value {
        json!({ "ranges": self.ranges })
    }
}
