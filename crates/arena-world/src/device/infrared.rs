//! Infrared data transceiver.
//!
//! Each update the transceiver reports the strongest message it received
//! since the previous update, then (if it has a message) transmits it over a
//! fan of scanlines.  The first infrared-visible agent on each scanline
//! stops the beam:
//!
//! - if that agent carries a receiving transceiver it is handed the message
//!   with a *direct* intensity;
//! - every stopped beam also reflects the message back into the
//!   transmitter's own receiver with a *reflection* intensity.
//!
//! Intensities come from empirically measured range tables (inches).  A
//! receiver keeps only the most intense message, and rejects direct messages
//! arriving from outside half its receive angle.

use arena_types::{AgentId, InfraredConfig, Pose, SensorKind, SimError, normalize_angle};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::trace;

use super::{Device, SenseContext, Sensor};

const INCHES_PER_METRE: f64 = 39.37;

/// `(range_in, intensity)` for a message reflected back to its sender.
const REFLECTION_TABLE: [(i32, u8); 10] = [
    (0, 150),
    (1, 129),
    (7, 117),
    (10, 115),
    (14, 112),
    (26, 104),
    (28, 103),
    (31, 102),
    (35, 101),
    (39, 100),
];

/// `(range_in, intensity)` for a message received from another transmitter.
const DIRECT_TABLE: [(i32, u8); 29] = [
    (6, 130),
    (9, 126),
    (12, 125),
    (15, 123),
    (18, 122),
    (21, 121),
    (24, 120),
    (28, 119),
    (32, 118),
    (36, 117),
    (40, 115),
    (44, 114),
    (48, 112),
    (52, 112),
    (56, 111),
    (60, 109),
    (64, 108),
    (68, 107),
    (72, 106),
    (76, 105),
    (80, 104),
    (84, 103),
    (88, 101),
    (92, 97),
    (96, 96),
    (100, 95),
    (104, 94),
    (108, 93),
    (120, 90),
];

/// Intensity for a beam that travelled `range_m` metres.
///
/// Below the first table range the strongest intensity is returned; above
/// the last, zero.  In between the table is interpolated linearly in whole
/// inches.
pub fn lookup_intensity(range_m: f64, reflection: bool) -> u8 {
    let table: &[(i32, u8)] = if reflection {
        &REFLECTION_TABLE
    } else {
        &DIRECT_TABLE
    };
    let (Some(&first), Some(&last)) = (table.first(), table.last()) else {
        return 0;
    };
    let irange = (range_m * INCHES_PER_METRE) as i32;
    if irange < first.0 {
        return first.1;
    }
    if irange > last.0 {
        return 0;
    }
    for pair in table.windows(2) {
        let (lo, hi) = (pair[0], pair[1]);
        if irange == hi.0 {
            return hi.1;
        }
        if irange < hi.0 {
            let (lo_i, hi_i) = (i32::from(lo.1), i32::from(hi.1));
            let value = (irange - lo.0) * (hi_i - lo_i) / (hi.0 - lo.0) + lo_i;
            return value.clamp(0, i32::from(u8::MAX)) as u8;
        }
    }
    first.1
}

// ────────────────────────────────────────────────────────────────────────────
// Messages
// ────────────────────────────────────────────────────────────────────────────

/// A message as seen by a receiver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IrMessage {
    pub from: AgentId,
    pub data: Vec<u8>,
    pub intensity: u8,
    pub reflection: bool,
    pub sim_time_ms: u64,
}

/// A direct message addressed to another agent's transceiver, applied by the
/// world once the transmitter's update has finished.
#[derive(Debug, Clone, PartialEq)]
pub struct IrDelivery {
    pub to: AgentId,
    pub message: IrMessage,
    /// Global pose of the transmitter, for the incidence check.
    pub sender_pose: Pose,
}

// ────────────────────────────────────────────────────────────────────────────
// Device
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct InfraredDevice {
    config: InfraredConfig,
    inbox: Option<IrMessage>,
    last: Option<IrMessage>,
    outgoing: Vec<IrDelivery>,
}

impl InfraredDevice {
    pub fn new(config: InfraredConfig) -> Self {
        Self {
            config,
            inbox: None,
            last: None,
            outgoing: Vec::new(),
        }
    }

    pub fn config(&self) -> &InfraredConfig {
        &self.config
    }

    /// Whether this transceiver accepts messages from other transmitters.
    pub fn receives(&self) -> bool {
        self.config.receive
    }

    /// Replace the message transmitted on every update.
    pub fn set_message(&mut self, data: Vec<u8>) {
        self.config.message = data;
    }

    /// Strongest message received before the last update.
    pub fn last_message(&self) -> Option<&IrMessage> {
        self.last.as_ref()
    }

    /// Offer a message to this receiver.  Returns `true` when it was kept.
    ///
    /// Reflections are always considered; direct messages need receive mode
    /// and must arrive within half the receive angle of the receiver heading.
    pub fn receive(&mut self, message: IrMessage, sender: Pose, receiver: Pose) -> bool {
        if let Some(current) = &self.inbox
            && message.intensity < current.intensity
        {
            return false;
        }
        if !message.reflection {
            if !self.config.receive {
                return false;
            }
            let towards_sender = (sender.y - receiver.y).atan2(sender.x - receiver.x);
            let incidence = normalize_angle(towards_sender - receiver.a);
            if incidence.abs() > self.config.receive_angle / 2.0 {
                return false;
            }
        }
        self.inbox = Some(message);
        true
    }

    pub fn take_deliveries(&mut self) -> Vec<IrDelivery> {
        std::mem::take(&mut self.outgoing)
    }

    fn transmit(&mut self, ctx: &SenseContext<'_>) -> Result<(), SimError> {
        let world = ctx.world();
        let me = ctx.agent_id();
        let agent = ctx.agent()?;
        let parent = agent.parent();
        let half_width = agent.geometry().size.x / 2.0;
        let origin = ctx.global_pose()?;

        let scanlines = self.config.scanlines.max(1);
        let per_line = self.config.transmit_angle / scanlines as f64;
        let start = origin.a - self.config.transmit_angle / 2.0 + per_line / 2.0;
        let data = self.config.message.clone();

        for s in 0..scanlines {
            let bearing = start + s as f64 * per_line;
            // Siblings share our parent: other sensors on the same body.
            let range_max = self.config.max_range;
            let hit = world.cast_with(me, (origin.x, origin.y), bearing, range_max, |c| {
                world.admits(me, c, SensorKind::Infrared)
                    && !(parent.is_some() && world.agent(c).and_then(|a| a.parent()) == parent)
            });
            let Some(hit) = hit else {
                continue;
            };
            let range = hit.range - half_width;
            let message = |intensity, reflection| IrMessage {
                from: me,
                data: data.clone(),
                intensity,
                reflection,
                sim_time_ms: ctx.sim_time_ms,
            };

            let receiving = world
                .agent(hit.owner)
                .and_then(|a| a.device())
                .is_some_and(|d| matches!(d, Device::Infrared(ir) if ir.receives()));
            if receiving {
                let intensity = lookup_intensity(range, false);
                if intensity > 0 {
                    trace!(from = %me, to = %hit.owner, intensity, "infrared direct");
                    let delivery = IrDelivery {
                        to: hit.owner,
                        message: message(intensity, false),
                        sender_pose: origin,
                    };
                    self.outgoing.push(delivery);
                }
            }

            let intensity = lookup_intensity(range, true);
            if intensity > 0 {
                let reflected = message(intensity, true);
                self.receive(reflected, origin, origin);
            }
        }
        Ok(())
    }
}

impl Sensor for InfraredDevice {
    fn kind(&self) -> &'static str {
        "infrared"
    }

    fn update(&mut self, ctx: &SenseContext<'_>) -> Result<(), SimError> {
        self.last = self.inbox.take();
        self.outgoing.clear();
        if self.config.message.is_empty() {
            return Ok(());
        }
        self.transmit(ctx)
    }

    fn serialize_data(&self) -> serde_json::Value {
        json!({ "message": self.last })
    }
}
