use std::f64::consts::{PI, TAU};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

// ────────────────────────────────────────────────────────────────────────────
// Handles
// ────────────────────────────────────────────────────────────────────────────

/// Stable, opaque reference to an agent in a world's agent table.
///
/// `index` names a slot in the table; `generation` is bumped every time the
/// slot is freed, so a handle to a destroyed agent never resolves to the
/// agent that later reuses its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentId {
    pub index: u32,
    pub generation: u32,
}

impl AgentId {
    pub fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "agent#{}.{}", self.index, self.generation)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Geometry primitives
// ────────────────────────────────────────────────────────────────────────────

/// Wrap an angle into `(-π, π]`.  Non-finite input is returned unchanged so
/// that callers can still detect it.
pub fn normalize_angle(a: f64) -> f64 {
    if !a.is_finite() {
        return a;
    }
    let mut a = a % TAU;
    if a > PI {
        a -= TAU;
    } else if a <= -PI {
        a += TAU;
    }
    a
}

/// A 2-D pose in metres/radians, relative to some parent frame.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    /// Heading in radians.
    pub a: f64,
}

impl Pose {
    pub fn new(x: f64, y: f64, a: f64) -> Self {
        Self { x, y, a }
    }

    /// The identity pose (the world root's frame).
    pub fn identity() -> Self {
        Self::default()
    }

    /// Rigid-body composition `self ⊕ local`: express `local` (given in the
    /// frame described by `self`) in `self`'s parent frame.
    ///
    /// The resulting heading is normalized to `(-π, π]`.
    pub fn compose(self, local: Pose) -> Pose {
        let (sin, cos) = self.a.sin_cos();
        Pose::new(
            self.x + local.x * cos - local.y * sin,
            self.y + local.x * sin + local.y * cos,
            normalize_angle(self.a + local.a),
        )
    }

    /// Map a point given in this pose's frame into the parent frame.
    pub fn transform_point(self, x: f64, y: f64) -> (f64, f64) {
        let (sin, cos) = self.a.sin_cos();
        (self.x + x * cos - y * sin, self.y + x * sin + y * cos)
    }

    /// True when every component is finite.
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.a.is_finite()
    }
}

/// A velocity expressed in the agent's own frame (m/s, m/s, rad/s).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Velocity {
    pub x: f64,
    pub y: f64,
    pub a: f64,
}

impl Velocity {
    pub fn new(x: f64, y: f64, a: f64) -> Self {
        Self { x, y, a }
    }

    pub fn is_zero(&self) -> bool {
        self.x == 0.0 && self.y == 0.0 && self.a == 0.0
    }
}

/// Extent of an agent's outline, in metres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Size {
    pub x: f64,
    pub y: f64,
}

impl Size {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

impl Default for Size {
    fn default() -> Self {
        Self::new(1.0, 1.0)
    }
}

/// Anchors an agent's normalized outline inside the agent's own frame:
/// the outline is scaled to `size`, centred, then offset by `pose`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Geometry {
    pub pose: Pose,
    pub size: Size,
}

impl Geometry {
    pub fn new(pose: Pose, size: Size) -> Self {
        Self { pose, size }
    }

    /// Geometry of the given size with no offset.
    pub fn sized(x: f64, y: f64) -> Self {
        Self::new(Pose::identity(), Size::new(x, y))
    }
}

/// A straight line segment `(x1, y1) – (x2, y2)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Line {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl Line {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn length(&self) -> f64 {
        (self.x2 - self.x1).hypot(self.y2 - self.y1)
    }

    pub fn is_finite(&self) -> bool {
        self.x1.is_finite() && self.y1.is_finite() && self.x2.is_finite() && self.y2.is_finite()
    }
}

/// An axis-aligned rectangle `(x, y)` lower-left corner, `w × h`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, w: f64, h: f64) -> Self {
        Self { x, y, w, h }
    }
}

/// Source description of an agent's outline before normalization.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Outline {
    /// The unit rectangle (the default body of every agent).
    #[default]
    Rectangle,
    /// An arbitrary set of segments.
    Lines(Vec<Line>),
    /// A set of rectangles, e.g. produced by a bitmap-to-rectangle loader.
    Rects(Vec<Rect>),
}

// ────────────────────────────────────────────────────────────────────────────
// Sensor visibility
// ────────────────────────────────────────────────────────────────────────────

/// The kind of query performing a ray cast.  Selects which return flag a
/// candidate must have enabled to count as a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    Obstacle,
    Laser,
    Sonar,
    Fiducial,
    Infrared,
}

/// Per-sensor-type visibility of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReturnFlags {
    pub obstacle: bool,
    pub laser: bool,
    pub sonar: bool,
    pub fiducial: bool,
    pub infrared: bool,
}

impl ReturnFlags {
    /// An agent invisible to every sensor (e.g. a pure sensor mount).
    pub fn transparent() -> Self {
        Self {
            obstacle: false,
            laser: false,
            sonar: false,
            fiducial: false,
            infrared: false,
        }
    }

    /// True when an agent with these flags is a valid hit for `kind`.
    pub fn admits(&self, kind: SensorKind) -> bool {
        match kind {
            SensorKind::Obstacle => self.obstacle,
            SensorKind::Laser => self.laser,
            SensorKind::Sonar => self.sonar,
            SensorKind::Fiducial => self.fiducial,
            SensorKind::Infrared => self.infrared,
        }
    }
}

impl Default for ReturnFlags {
    fn default() -> Self {
        Self {
            obstacle: true,
            laser: true,
            sonar: true,
            fiducial: false,
            infrared: true,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Device configuration
// ────────────────────────────────────────────────────────────────────────────

/// Scanning laser range finder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaserConfig {
    /// Mounting pose relative to the owning agent.
    pub pose: Pose,
    pub fov: f64,
    pub samples: u32,
    pub range_min: f64,
    pub range_max: f64,
}

impl Default for LaserConfig {
    fn default() -> Self {
        Self {
            pose: Pose::identity(),
            fov: PI,
            samples: 180,
            range_min: 0.0,
            range_max: 8.0,
        }
    }
}

/// One sonar/IR range transducer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransducerConfig {
    pub pose: Pose,
    pub fov: f64,
    pub range_min: f64,
    pub range_max: f64,
}

impl Default for TransducerConfig {
    fn default() -> Self {
        Self {
            pose: Pose::identity(),
            fov: 15f64.to_radians(),
            range_min: 0.0,
            range_max: 5.0,
        }
    }
}

/// An array of single-beam range transducers (sonar ring).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RangerConfig {
    pub transducers: Vec<TransducerConfig>,
}

/// Infrared data transceiver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InfraredConfig {
    pub scanlines: u32,
    pub transmit_angle: f64,
    pub receive_angle: f64,
    pub max_range: f64,
    /// Whether this transceiver accepts messages from other transmitters.
    pub receive: bool,
    /// Message transmitted on every update; empty means silent.
    pub message: Vec<u8>,
}

impl Default for InfraredConfig {
    fn default() -> Self {
        Self {
            scanlines: 5,
            transmit_angle: PI / 4.0,
            receive_angle: PI / 4.0,
            max_range: 1.0,
            receive: true,
            message: Vec::new(),
        }
    }
}

/// Fiducial (beacon) finder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FiducialConfig {
    pub pose: Pose,
    pub fov: f64,
    /// Beyond this range nothing is detected.
    pub range_anon: f64,
    /// Within this range the fiducial id is reported.
    pub range_id: f64,
}

impl Default for FiducialConfig {
    fn default() -> Self {
        Self {
            pose: Pose::identity(),
            fov: PI,
            range_anon: 4.0,
            range_id: 1.5,
        }
    }
}

/// Device attached to an agent, chosen once at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeviceConfig {
    Position,
    Laser(LaserConfig),
    Ranger(RangerConfig),
    Infrared(InfraredConfig),
    Fiducial(FiducialConfig),
}

// ────────────────────────────────────────────────────────────────────────────
// Agent creation & commands
// ────────────────────────────────────────────────────────────────────────────

/// Everything needed to create an agent.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AgentSpec {
    pub name: String,
    pub parent: Option<AgentId>,
    /// Pose relative to the parent (or the world).
    pub pose: Pose,
    pub velocity: Velocity,
    pub geometry: Geometry,
    pub outline: Outline,
    pub returns: ReturnFlags,
    pub fiducial_id: Option<u32>,
    pub device: Option<DeviceConfig>,
}

impl AgentSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_parent(mut self, parent: AgentId) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_pose(mut self, pose: Pose) -> Self {
        self.pose = pose;
        self
    }

    pub fn with_velocity(mut self, velocity: Velocity) -> Self {
        self.velocity = velocity;
        self
    }

    pub fn with_size(mut self, x: f64, y: f64) -> Self {
        self.geometry.size = Size::new(x, y);
        self
    }

    pub fn with_geometry(mut self, geometry: Geometry) -> Self {
        self.geometry = geometry;
        self
    }

    pub fn with_outline(mut self, outline: Outline) -> Self {
        self.outline = outline;
        self
    }

    pub fn with_returns(mut self, returns: ReturnFlags) -> Self {
        self.returns = returns;
        self
    }

    pub fn with_fiducial_id(mut self, id: u32) -> Self {
        self.fiducial_id = Some(id);
        self
    }

    pub fn with_device(mut self, device: DeviceConfig) -> Self {
        self.device = Some(device);
        self
    }
}

/// Requests that mutate or observe the world.  Every command is applied on
/// the simulation task between ticks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command", content = "payload")]
pub enum Command {
    Create(AgentSpec),
    SetPose { agent: AgentId, pose: Pose },
    SetVelocity { agent: AgentId, velocity: Velocity },
    Destroy { agent: AgentId },
    /// Publish this agent's device data after every tick.
    Subscribe { agent: AgentId },
    Unsubscribe { agent: AgentId },
}

// ────────────────────────────────────────────────────────────────────────────
// Bus events
// ────────────────────────────────────────────────────────────────────────────

/// Read-only view of an agent for visualizers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSnapshot {
    pub id: AgentId,
    pub name: String,
    pub pose: Pose,
    pub footprint: Vec<Line>,
    pub stalled: bool,
}

/// Unified event wrapper for the simulation event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g., "arena-runtime::sim_loop"
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Variants of data routed over the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    /// Device output of a subscribed agent after a tick.
    SensorData {
        agent: AgentId,
        sim_time_ms: u64,
        data: serde_json::Value,
    },
    /// Global poses and outlines of every agent after a tick.
    Truth {
        sim_time_ms: u64,
        agents: Vec<AgentSnapshot>,
    },
    /// A move was rejected because the candidate outline hit an obstacle.
    Stalled { agent: AgentId, sim_time_ms: u64 },
    Fault { component: String, message: String },
}

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// Global error type for world construction, mapping, and command handling.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SimError {
    #[error("Unknown agent: {0}")]
    UnknownAgent(AgentId),

    #[error("Unknown parent: {0}")]
    UnknownParent(String),

    #[error("Non-finite pose for {context}: ({x}, {y}, {a})")]
    NonFinitePose { context: String, x: f64, y: f64, a: f64 },

    #[error("Degenerate geometry: {0}")]
    DegenerateGeometry(String),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Scene error: {0}")]
    Scene(String),

    #[error("Channel error: {0}")]
    Channel(String),
}
