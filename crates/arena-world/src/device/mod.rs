//! Devices – the sensing and actuation logic attached to agents.
//!
//! Every device kind implements the small [`Sensor`] trait and is stored in
//! the [`Device`] sum type, chosen once when the agent is created from its
//! [`DeviceConfig`].  The world updates each device once per tick, after the
//! owning agent has moved, through a read-only [`SenseContext`].
//!
//! | Kind | Output |
//! |---|---|
//! | [`PositionDevice`] | Integrated odometry, commanded velocity, stall flag |
//! | [`LaserDevice`] | One range per beam across the field of view |
//! | [`RangerDevice`] | One range per sonar transducer |
//! | [`InfraredDevice`] | Strongest message received since the last update |
//! | [`FiducialDevice`] | Visible beacons with range, bearing, and id |

pub mod fiducial;
pub mod infrared;
pub mod laser;
pub mod position;
pub mod ranger;

pub use fiducial::{FiducialDevice, FiducialReading};
pub use infrared::{InfraredDevice, IrDelivery, IrMessage};
pub use laser::LaserDevice;
pub use position::PositionDevice;
pub use ranger::RangerDevice;

use arena_spatial::Hit;
use arena_types::{AgentId, DeviceConfig, Pose, SensorKind, SimError};

use crate::agent::Agent;
use crate::world::World;

// ────────────────────────────────────────────────────────────────────────────
// Sensor trait
// ────────────────────────────────────────────────────────────────────────────

/// Behaviour shared by every device kind.
pub trait Sensor {
    /// Short name of the device kind, e.g. `"laser"`.
    fn kind(&self) -> &'static str;

    /// Refresh the device's data from the current world state.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::NonFinitePose`] or [`SimError::UnknownAgent`] when
    /// the owning agent's pose cannot be resolved.  The previous data is
    /// kept in that case.
    fn update(&mut self, ctx: &SenseContext<'_>) -> Result<(), SimError>;

    /// The latest data as JSON, ready to publish to subscribers.
    fn serialize_data(&self) -> serde_json::Value;
}

// ────────────────────────────────────────────────────────────────────────────
// SenseContext
// ────────────────────────────────────────────────────────────────────────────

/// Read-only view of the world handed to a device during its update.
pub struct SenseContext<'a> {
    world: &'a World,
    agent: AgentId,
    /// Seconds simulated by this tick.
    pub dt: f64,
    pub sim_time_ms: u64,
}

impl<'a> SenseContext<'a> {
    pub fn new(world: &'a World, agent: AgentId, dt: f64, sim_time_ms: u64) -> Self {
        Self {
            world,
            agent,
            dt,
            sim_time_ms,
        }
    }

    pub fn world(&self) -> &'a World {
        self.world
    }

    pub fn agent_id(&self) -> AgentId {
        self.agent
    }

    /// The agent owning the device.
    pub fn agent(&self) -> Result<&'a Agent, SimError> {
        self.world.agent(self.agent).ok_or(SimError::UnknownAgent(self.agent))
    }

    /// Global pose of the owning agent.
    pub fn global_pose(&self) -> Result<Pose, SimError> {
        self.world.global_pose(self.agent)
    }

    /// Global pose of something mounted at `mount` on the owning agent.
    pub fn mounted_pose(&self, mount: Pose) -> Result<Pose, SimError> {
        arena_spatial::transform::mounted_pose(self.world, self.agent, mount)
    }

    /// Cast a beam for a `kind` sensor owned by this agent.
    pub fn cast(&self, kind: SensorKind, origin: Pose, bearing: f64, max_range: f64) -> Option<Hit> {
        self.world
            .cast(self.agent, kind, (origin.x, origin.y), bearing, max_range)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Device
// ────────────────────────────────────────────────────────────────────────────

/// The device attached to an agent.
#[derive(Debug, Clone)]
pub enum Device {
    Position(PositionDevice),
    Laser(LaserDevice),
    Ranger(RangerDevice),
    Infrared(InfraredDevice),
    Fiducial(FiducialDevice),
}

impl Device {
    pub fn from_config(config: &DeviceConfig) -> Self {
        match config {
            DeviceConfig::Position => Self::Position(PositionDevice::default()),
            DeviceConfig::Laser(c) => Self::Laser(LaserDevice::new(c.clone())),
            DeviceConfig::Ranger(c) => Self::Ranger(RangerDevice::new(c.clone())),
            DeviceConfig::Infrared(c) => Self::Infrared(InfraredDevice::new(c.clone())),
            DeviceConfig::Fiducial(c) => Self::Fiducial(FiducialDevice::new(c.clone())),
        }
    }

    /// Messages this device produced for other agents during its last update.
    pub fn take_deliveries(&mut self) -> Vec<IrDelivery> {
        match self {
            Self::Infrared(ir) => ir.take_deliveries(),
            _ => Vec::new(),
        }
    }

    fn sensor(&self) -> &dyn Sensor {
        match self {
            Self::Position(d) => d,
            Self::Laser(d) => d,
            Self::Ranger(d) => d,
            Self::Infrared(d) => d,
            Self::Fiducial(d) => d,
        }
    }

    fn sensor_mut(&mut self) -> &mut dyn Sensor {
        match self {
            Self::Position(d) => d,
            Self::Laser(d) => d,
            Self::Ranger(d) => d,
            Self::Infrared(d) => d,
            Self::Fiducial(d) => d,
        }
    }
}

impl Sensor for Device {
    fn kind(&self) -> &'static str {
        self.sensor().kind()
    }

    fn update(&mut self, ctx: &SenseContext<'_>) -> Result<(), SimError> {
        self.sensor_mut().update(ctx)
    }

    fn serialize_data(&self) -> serde_json::Value {
        self.sensor().serialize_data()
    }
}
