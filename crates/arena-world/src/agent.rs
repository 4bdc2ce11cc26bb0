//! [`Agent`] – one simulated entity (robot, obstacle, beacon, sensor mount).
//!
//! An agent owns its outline, its pose relative to its parent, and the exact
//! global segments currently drawn into the [`SpatialIndex`] on its behalf.
//! Those stored segments are the only thing ever removed from the index for
//! this agent, which keeps insertion and removal in lockstep.

use arena_spatial::{SpatialIndex, Shape};
use arena_types::{AgentId, Geometry, Line, Pose, ReturnFlags, Velocity};

use crate::device::Device;

/// A live agent in the [`World`][crate::world::World] arena.
#[derive(Debug, Clone)]
pub struct Agent {
    pub(crate) id: AgentId,
    pub(crate) name: String,
    pub(crate) parent: Option<AgentId>,
    pub(crate) children: Vec<AgentId>,
    pub(crate) pose: Pose,
    pub(crate) velocity: Velocity,
    pub(crate) geometry: Geometry,
    pub(crate) shape: Shape,
    pub(crate) returns: ReturnFlags,
    pub(crate) fiducial_id: Option<u32>,
    pub(crate) footprint: Vec<Line>,
    pub(crate) stalled: bool,
    pub(crate) device: Option<Device>,
}

impl Agent {
    pub fn id(&self) -> AgentId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<AgentId> {
        self.parent
    }

    pub fn children(&self) -> &[AgentId] {
        &self.children
    }

    /// Pose relative to the parent (or the world).
    pub fn pose(&self) -> Pose {
        self.pose
    }

    pub fn velocity(&self) -> Velocity {
        self.velocity
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn returns(&self) -> ReturnFlags {
        self.returns
    }

    pub fn fiducial_id(&self) -> Option<u32> {
        self.fiducial_id
    }

    /// Global segments currently mapped into the index.
    pub fn footprint(&self) -> &[Line] {
        &self.footprint
    }

    /// True when the last attempted move was blocked.
    pub fn stalled(&self) -> bool {
        self.stalled
    }

    pub fn device(&self) -> Option<&Device> {
        self.device.as_ref()
    }

    /// Replace the mapped footprint: remove exactly what was inserted last
    /// time, insert `footprint`, and remember it for the next removal.
    pub fn remap(&mut self, index: &mut SpatialIndex, footprint: Vec<Line>) {
        index.remove_lines(&self.footprint, self.id);
        index.insert_lines(&footprint, self.id);
        self.footprint = footprint;
    }

    /// Remove the footprint from the index entirely.
    pub fn unmap(&mut self, index: &mut SpatialIndex) {
        index.remove_lines(&self.footprint, self.id);
        // Anything left behind (e.g. after a resize) goes too.
        index.remove_owner_everywhere(self.id);
        self.footprint.clear();
    }
}
