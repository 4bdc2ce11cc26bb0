//! Position device: odometry for a velocity-driven agent.

use arena_types::{Pose, SimError, Velocity, normalize_angle};
use serde_json::json;

use super::{SenseContext, Sensor};

/// Integrates the commanded velocity into an odometric pose.
///
/// Odometry starts at the origin and only advances on ticks where the agent
/// actually moved; a stalled agent's odometry holds still.
#[derive(Debug, Clone, Default)]
pub struct PositionDevice {
    odom: Pose,
    velocity: Velocity,
    global: Pose,
    stalled: bool,
}

impl PositionDevice {
    pub fn odometry(&self) -> Pose {
        self.odom
    }

    pub fn stalled(&self) -> bool {
        self.stalled
    }

    /// Reset odometry to `pose`.
    pub fn set_odometry(&mut self, pose: Pose) {
        self.odom = pose;
    }
}

impl Sensor for PositionDevice {
    fn kind(&self) -> &'static str {
        "position"
    }

    fn update(&mut self, ctx: &SenseContext<'_>) -> Result<(), SimError> {
        let agent = ctx.agent()?;
        self.velocity = agent.velocity();
        self.stalled = agent.stalled();
        self.global = ctx.global_pose()?;

        if !self.stalled && !self.velocity.is_zero() {
            let v = self.velocity;
            let (s, c) = self.odom.a.sin_cos();
            self.odom = Pose::new(
                self.odom.x + ctx.dt * (v.x * c - v.y * s),
                self.odom.y + ctx.dt * (v.x * s + v.y * c),
                normalize_angle(self.odom.a + ctx.dt * v.a),
            );
        }
        Ok(())
    }

    fn serialize_data(&self) -> serde_json::Value {
        json!({
            "odom": self.odom,
            "pose": self.global,
            "velocity": self.velocity,
            "stalled": self.stalled,
        })
    }
}
