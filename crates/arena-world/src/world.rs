//! [`World`] – the agent arena, the spatial index, and the tick.
//!
//! The world exclusively owns the [`SpatialIndex`] and every [`Agent`].
//! Agents live in a slot arena addressed by [`AgentId`] (`index` +
//! `generation`); destroying an agent bumps its slot's generation so stale
//! handles stop resolving.
//!
//! # Mapping
//!
//! Every change that moves an agent's outline (pose, geometry, outline)
//! recomputes the global footprints of the agent *and all its descendants*
//! through [`footprint`], then swaps each agent's stored footprint in the
//! index.  If any footprint in the subtree cannot be computed (non-finite
//! pose, degenerate size) the change is rolled back and nothing touches the
//! index.
//!
//! # Stepping
//!
//! [`World::step`] visits live agents in slot order.  For each agent it
//!
//! 1. integrates the agent's velocity in its local frame,
//! 2. ray-casts the candidate outline against obstacles, committing the move
//!    or marking the agent stalled,
//! 3. updates the agent's device.
//!
//! Each agent's update, including its remap, finishes before the next one
//! starts.

use arena_spatial::transform::{self, Frame, FrameTree, checked_compose};
use arena_spatial::{Hit, RayCaster, Shape, SpatialIndex, footprint};
use arena_types::{
    AgentId, AgentSnapshot, AgentSpec, Geometry, Line, Outline, Pose, SensorKind, SimError,
    Velocity, normalize_angle,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::agent::Agent;
use crate::device::{Device, IrDelivery, SenseContext, Sensor};

// ────────────────────────────────────────────────────────────────────────────
// Configuration
// ────────────────────────────────────────────────────────────────────────────

/// World bounds, grid resolution, and tick length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    /// Metres along x.
    pub width: f64,
    /// Metres along y.
    pub height: f64,
    /// Grid cells per metre.
    pub resolution: f64,
    /// Simulated milliseconds per tick.
    pub interval_ms: u64,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            width: 10.0,
            height: 10.0,
            resolution: 20.0,
            interval_ms: 100,
        }
    }
}

/// What happened during one [`World::step`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepReport {
    pub sim_time_ms: u64,
    /// Agents whose move was blocked this tick.
    pub stalled: Vec<AgentId>,
    /// Agents whose move or device update failed, with the reason.
    pub faults: Vec<(AgentId, SimError)>,
}

#[derive(Debug, Clone, Default)]
struct Slot {
    generation: u32,
    agent: Option<Agent>,
}

// ────────────────────────────────────────────────────────────────────────────
// World
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct World {
    config: WorldConfig,
    index: SpatialIndex,
    slots: Vec<Slot>,
    free: Vec<u32>,
    sim_time_ms: u64,
    ticks: u64,
}

impl World {
    /// Create an empty world.
    ///
    /// # Errors
    ///
    /// [`SimError::InvalidConfig`] for non-positive bounds, resolution, or
    /// tick interval.
    pub fn new(config: WorldConfig) -> Result<Self, SimError> {
        if config.interval_ms == 0 {
            return Err(SimError::InvalidConfig("interval_ms must be positive".into()));
        }
        let index = SpatialIndex::new(config.width, config.height, config.resolution)?;
        info!(
            width = config.width,
            height = config.height,
            resolution = config.resolution,
            interval_ms = config.interval_ms,
            "world created"
        );
        Ok(Self {
            config,
            index,
            slots: Vec::new(),
            free: Vec::new(),
            sim_time_ms: 0,
            ticks: 0,
        })
    }

    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    /// Read-only access to the occupancy grid.
    pub fn index(&self) -> &SpatialIndex {
        &self.index
    }

    pub fn sim_time_ms(&self) -> u64 {
        self.sim_time_ms
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Seconds simulated per tick.
    pub fn dt(&self) -> f64 {
        self.config.interval_ms as f64 / 1000.0
    }

    // ── Handles ─────────────────────────────────────────────────────────────

    /// Resolve a handle.  `None` for destroyed or never-issued handles.
    pub fn agent(&self, id: AgentId) -> Option<&Agent> {
        self.slots
            .get(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.agent.as_ref())
    }

    fn agent_mut(&mut self, id: AgentId) -> Option<&mut Agent> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.agent.as_mut())
    }

    fn require(&self, id: AgentId) -> Result<&Agent, SimError> {
        self.agent(id).ok_or(SimError::UnknownAgent(id))
    }

    /// Live agents in slot order.
    pub fn agents(&self) -> impl Iterator<Item = &Agent> + '_ {
        self.slots.iter().filter_map(|s| s.agent.as_ref())
    }

    pub fn ids(&self) -> Vec<AgentId> {
        self.agents().map(Agent::id).collect()
    }

    pub fn len(&self) -> usize {
        self.agents().count()
    }

    pub fn is_empty(&self) -> bool {
        self.agents().next().is_none()
    }

    /// First live agent called `name`.
    pub fn find(&self, name: &str) -> Option<AgentId> {
        self.agents().find(|a| a.name() == name).map(Agent::id)
    }

    fn allocate(&mut self) -> AgentId {
        match self.free.pop() {
            Some(index) => {
                let generation = self.slots[index as usize].generation;
                AgentId::new(index, generation)
            }
            None => {
                self.slots.push(Slot::default());
                AgentId::new((self.slots.len() - 1) as u32, 0)
            }
        }
    }

    // ── Lifecycle ───────────────────────────────────────────────────────────

    /// Create an agent and map its footprint.
    ///
    /// # Errors
    ///
    /// - [`SimError::UnknownParent`] when `spec.parent` is not live.
    /// - [`SimError::DegenerateGeometry`] / [`SimError::NonFinitePose`] when
    ///   the outline cannot be placed.  Nothing is created in that case.
    pub fn create_agent(&mut self, spec: AgentSpec) -> Result<AgentId, SimError> {
        let origin = match spec.parent {
            Some(parent) => {
                if self.agent(parent).is_none() {
                    return Err(SimError::UnknownParent(parent.to_string()));
                }
                self.global_pose(parent)?
            }
            None => Pose::identity(),
        };
        let v = spec.velocity;
        if !(v.x.is_finite() && v.y.is_finite() && v.a.is_finite()) {
            return Err(SimError::InvalidConfig(format!(
                "velocity of '{}' is not finite",
                spec.name
            )));
        }
        let shape = Shape::from_outline(&spec.outline)?;
        let global = checked_compose(origin, spec.pose, &spec.name)?;
        let lines = footprint(&shape, &spec.geometry, &global)?;

        let id = self.allocate();
        let mut agent = Agent {
            id,
            name: spec.name,
            parent: spec.parent,
            children: Vec::new(),
            pose: spec.pose,
            velocity: spec.velocity,
            geometry: spec.geometry,
            shape,
            returns: spec.returns,
            fiducial_id: spec.fiducial_id,
            footprint: Vec::new(),
            stalled: false,
            device: spec.device.as_ref().map(Device::from_config),
        };
        agent.remap(&mut self.index, lines);
        info!(agent = %id, name = %agent.name, device = ?agent.device.as_ref().map(|d| d.kind()), "agent created");

        self.slots[id.index as usize].agent = Some(agent);
        if let Some(parent) = spec.parent
            && let Some(p) = self.agent_mut(parent)
        {
            p.children.push(id);
        }
        Ok(id)
    }

    /// Destroy an agent and, first, all of its descendants.  Their
    /// footprints are removed from the index and their handles go stale.
    pub fn destroy_agent(&mut self, id: AgentId) -> Result<(), SimError> {
        let children = self.require(id)?.children.clone();
        for child in children {
            self.destroy_agent(child)?;
        }

        let slot = &mut self.slots[id.index as usize];
        let Some(mut agent) = slot.agent.take() else {
            return Err(SimError::UnknownAgent(id));
        };
        slot.generation = slot.generation.wrapping_add(1);
        agent.unmap(&mut self.index);
        self.free.push(id.index);

        if let Some(parent) = agent.parent
            && let Some(p) = self.agent_mut(parent)
        {
            p.children.retain(|&c| c != id);
        }
        info!(agent = %id, name = %agent.name, "agent destroyed");
        Ok(())
    }

    // ── Poses ───────────────────────────────────────────────────────────────

    /// Pose of `id` in the world frame, derived from the current tree.
    pub fn global_pose(&self, id: AgentId) -> Result<Pose, SimError> {
        transform::global_pose(self, id)
    }

    /// Global footprints for `id` and its descendants at their current poses.
    fn subtree_footprints(&self, id: AgentId) -> Result<Vec<(AgentId, Vec<Line>)>, SimError> {
        self.subtree_footprints_at(id, self.global_pose(id)?)
    }

    /// Global footprints for the subtree of `id` with `id` placed at `global`.
    /// Descendants keep their local poses relative to it.
    fn subtree_footprints_at(
        &self,
        id: AgentId,
        global: Pose,
    ) -> Result<Vec<(AgentId, Vec<Line>)>, SimError> {
        let mut queue = vec![(id, global)];
        let mut out = Vec::new();
        let mut i = 0;
        while i < queue.len() {
            let (member, pose) = queue[i];
            let agent = self.require(member)?;
            out.push((member, footprint(&agent.shape, &agent.geometry, &pose)?));
            for &child in &agent.children {
                let child_agent = self.require(child)?;
                queue.push((child, checked_compose(pose, child_agent.pose, &child_agent.name)?));
            }
            i += 1;
        }
        Ok(out)
    }

    /// Recompute and swap in the footprints of `id` and its descendants.
    pub fn remap(&mut self, id: AgentId) -> Result<(), SimError> {
        let footprints = self.subtree_footprints(id)?;
        let Self { index, slots, .. } = self;
        for (member, lines) in footprints {
            if let Some(agent) = slots
                .get_mut(member.index as usize)
                .and_then(|s| s.agent.as_mut())
            {
                agent.remap(index, lines);
            }
        }
        Ok(())
    }

    /// Apply `change` to `id`, then remap its subtree.  When the new
    /// footprints cannot be computed `undo` restores the agent and the error
    /// is returned with the index untouched.
    fn change_and_remap(
        &mut self,
        id: AgentId,
        change: impl FnOnce(&mut Agent),
        undo: impl FnOnce(&mut Agent),
    ) -> Result<(), SimError> {
        change(self.agent_mut(id).ok_or(SimError::UnknownAgent(id))?);
        match self.remap(id) {
            Ok(()) => Ok(()),
            Err(e) => {
                if let Some(agent) = self.agent_mut(id) {
                    undo(agent);
                }
                warn!(agent = %id, error = %e, "change rejected, agent left in place");
                Err(e)
            }
        }
    }

    /// Place `id` at `pose` relative to its parent without a collision
    /// check.  Clears the stall flag.
    pub fn set_pose(&mut self, id: AgentId, pose: Pose) -> Result<(), SimError> {
        let old = self.require(id)?.pose;
        self.change_and_remap(id, |a| a.pose = pose, |a| a.pose = old)?;
        if let Some(agent) = self.agent_mut(id) {
            agent.stalled = false;
        }
        Ok(())
    }

    /// Move `id` to `pose` unless its outline would hit an obstacle.
    ///
    /// Returns `Ok(true)` when the move was committed and `Ok(false)` when it
    /// was blocked; a blocked agent keeps its pose and footprint and is
    /// flagged stalled.
    pub fn try_move(&mut self, id: AgentId, pose: Pose) -> Result<bool, SimError> {
        if let Some(hit) = self.would_collide(id, pose)? {
            debug!(agent = %id, blocker = %hit.owner, range = hit.range, "move blocked");
            if let Some(agent) = self.agent_mut(id) {
                agent.stalled = true;
            }
            return Ok(false);
        }
        self.set_pose(id, pose)?;
        Ok(true)
    }

    pub fn set_velocity(&mut self, id: AgentId, velocity: Velocity) -> Result<(), SimError> {
        if !(velocity.x.is_finite() && velocity.y.is_finite() && velocity.a.is_finite()) {
            return Err(SimError::InvalidConfig(format!("velocity for {id} is not finite")));
        }
        let agent = self.agent_mut(id).ok_or(SimError::UnknownAgent(id))?;
        agent.velocity = velocity;
        Ok(())
    }

    pub fn set_geometry(&mut self, id: AgentId, geometry: Geometry) -> Result<(), SimError> {
        let old = self.require(id)?.geometry;
        self.change_and_remap(id, |a| a.geometry = geometry, |a| a.geometry = old)
    }

    /// Replace the outline of `id`.
    pub fn set_outline(&mut self, id: AgentId, outline: &Outline) -> Result<(), SimError> {
        let shape = Shape::from_outline(outline)?;
        let old = self.require(id)?.shape.clone();
        self.change_and_remap(id, |a| a.shape = shape, |a| a.shape = old)
    }

    // ── Queries ─────────────────────────────────────────────────────────────

    /// Whether `candidate` counts as a hit for a `kind` sensor on `caster`:
    /// not the caster, an ancestor, or a descendant, and with the matching
    /// return flag set.
    pub fn admits(&self, caster: AgentId, candidate: AgentId, kind: SensorKind) -> bool {
        !transform::is_related(self, caster, candidate)
            && self
                .agent(candidate)
                .is_some_and(|a| a.returns.admits(kind))
    }

    /// Beam from `origin` along `bearing` for a `kind` sensor on `caster`.
    pub fn cast(
        &self,
        caster: AgentId,
        kind: SensorKind,
        origin: (f64, f64),
        bearing: f64,
        max_range: f64,
    ) -> Option<Hit> {
        self.cast_with(caster, origin, bearing, max_range, |c| self.admits(caster, c, kind))
    }

    /// Beam with a caller-supplied acceptance test.
    pub fn cast_with<F>(
        &self,
        caster: AgentId,
        origin: (f64, f64),
        bearing: f64,
        max_range: f64,
        mut accept: F,
    ) -> Option<Hit>
    where
        F: FnMut(AgentId) -> bool,
    {
        RayCaster::new(&self.index)
            .point_to_bearing_range(caster, origin, bearing, max_range, |_, c| accept(c))
    }

    /// Segment cast with a caller-supplied acceptance test.
    pub fn cast_between_with<F>(
        &self,
        caster: AgentId,
        from: (f64, f64),
        to: (f64, f64),
        mut accept: F,
    ) -> Option<Hit>
    where
        F: FnMut(AgentId) -> bool,
    {
        RayCaster::new(&self.index).point_to_point(caster, from, to, |_, c| accept(c))
    }

    /// First obstacle any of `candidate`'s segments runs into, ignoring
    /// `id` itself and its relatives.  The index is read as it stands, so
    /// `id`'s current footprint is still present.
    pub fn check_collision(&self, id: AgentId, candidate: &[Line]) -> Option<Hit> {
        let caster = RayCaster::new(&self.index);
        candidate.iter().find_map(|l| {
            caster.point_to_point(id, (l.x1, l.y1), (l.x2, l.y2), |me, c| {
                self.admits(me, c, SensorKind::Obstacle)
            })
        })
    }

    /// The obstacle `id` or one of its descendants would hit if `id` were
    /// placed at `pose`, if any.
    pub fn would_collide(&self, id: AgentId, pose: Pose) -> Result<Option<Hit>, SimError> {
        let agent = self.require(id)?;
        let origin = match agent.parent {
            Some(parent) => self.global_pose(parent)?,
            None => Pose::identity(),
        };
        let global = checked_compose(origin, pose, &agent.name)?;
        // Children ride along, so their outlines are tested too.  Casting
        // as `id` excludes the whole moving subtree and its ancestors.
        let candidates = self.subtree_footprints_at(id, global)?;
        Ok(candidates
            .iter()
            .find_map(|(_, lines)| self.check_collision(id, lines)))
    }

    /// Latest device output of `id`, if it has a device.
    pub fn device_data(&self, id: AgentId) -> Option<serde_json::Value> {
        self.agent(id)?.device.as_ref().map(Sensor::serialize_data)
    }

    /// Read-only view of every live agent for visualizers.
    pub fn snapshot(&self) -> Vec<AgentSnapshot> {
        self.agents()
            .filter_map(|a| {
                let pose = self.global_pose(a.id).ok()?;
                Some(AgentSnapshot {
                    id: a.id,
                    name: a.name.clone(),
                    pose,
                    footprint: a.footprint.clone(),
                    stalled: a.stalled,
                })
            })
            .collect()
    }

    // ── Grid ────────────────────────────────────────────────────────────────

    /// Rebuild the index at new bounds and resolution and remap every live
    /// agent from its current footprint.
    pub fn resize(&mut self, width: f64, height: f64, resolution: f64) -> Result<(), SimError> {
        self.index.resize(width, height, resolution)?;
        self.config.width = width;
        self.config.height = height;
        self.config.resolution = resolution;
        for agent in self.slots.iter().filter_map(|s| s.agent.as_ref()) {
            self.index.insert_lines(&agent.footprint, agent.id);
        }
        info!(width, height, resolution, agents = self.len(), "world resized");
        Ok(())
    }

    // ── Tick ────────────────────────────────────────────────────────────────

    /// Advance simulated time by one interval.
    pub fn step(&mut self) -> StepReport {
        let dt = self.dt();
        self.sim_time_ms += self.config.interval_ms;
        self.ticks += 1;
        let mut report = StepReport {
            sim_time_ms: self.sim_time_ms,
            ..StepReport::default()
        };

        for id in self.ids() {
            match self.integrate(id, dt) {
                Ok(true) => {}
                Ok(false) => report.stalled.push(id),
                Err(e) => {
                    warn!(agent = %id, error = %e, "move failed");
                    report.faults.push((id, e));
                }
            }
            if let Err(e) = self.update_device(id, dt) {
                warn!(agent = %id, error = %e, "device update failed");
                report.faults.push((id, e));
            }
        }
        report
    }

    /// Integrate velocity in the agent's local frame.  `Ok(false)` when the
    /// move was blocked.
    fn integrate(&mut self, id: AgentId, dt: f64) -> Result<bool, SimError> {
        let agent = self.require(id)?;
        if agent.velocity.is_zero() {
            return Ok(true);
        }
        let (p, v) = (agent.pose, agent.velocity);
        let (s, c) = p.a.sin_cos();
        let next = Pose::new(
            p.x + dt * (v.x * c - v.y * s),
            p.y + dt * (v.x * s + v.y * c),
            normalize_angle(p.a + dt * v.a),
        );
        self.try_move(id, next)
    }

    fn update_device(&mut self, id: AgentId, dt: f64) -> Result<(), SimError> {
        let Some(mut device) = self.agent_mut(id).and_then(|a| a.device.take()) else {
            return Ok(());
        };
        let ctx = SenseContext::new(self, id, dt, self.sim_time_ms);
        let result = device.update(&ctx);
        let deliveries = device.take_deliveries();
        if let Some(agent) = self.agent_mut(id) {
            agent.device = Some(device);
        }
        for delivery in deliveries {
            self.deliver(delivery);
        }
        result
    }

    fn deliver(&mut self, delivery: IrDelivery) {
        let Ok(receiver_pose) = self.global_pose(delivery.to) else {
            return;
        };
        if let Some(Device::Infrared(ir)) = self.agent_mut(delivery.to).and_then(|a| a.device.as_mut()) {
            ir.receive(delivery.message, delivery.sender_pose, receiver_pose);
        }
    }
}

impl FrameTree for World {
    fn frame(&self, id: AgentId) -> Option<Frame> {
        self.agent(id).map(|a| Frame {
            parent: a.parent,
            pose: a.pose,
        })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use arena_types::{
        DeviceConfig, FiducialConfig, InfraredConfig, LaserConfig, RangerConfig, ReturnFlags,
        TransducerConfig,
    };
    use std::collections::BTreeSet;
    use std::f64::consts::{FRAC_PI_2, PI};

    fn world(width: f64, height: f64, resolution: f64) -> World {
        World::new(WorldConfig {
            width,
            height,
            resolution,
            interval_ms: 100,
        })
        .unwrap()
    }

    fn boxed(name: &str, x: f64, y: f64) -> AgentSpec {
        AgentSpec::new(name).with_pose(Pose::new(x, y, 0.0))
    }

    /// Cells the index currently attributes to `id`.
    fn indexed_cells(world: &World, id: AgentId) -> BTreeSet<(usize, usize)> {
        world
            .index()
            .occupied_cells()
            .filter(|(_, occ)| occ.contains(&id))
            .map(|(cell, _)| cell)
            .collect()
    }

    /// Cells a fresh rasterization of `id`'s outline at its current global
    /// pose passes through.
    fn expected_cells(world: &World, id: AgentId) -> BTreeSet<(usize, usize)> {
        let agent = world.agent(id).unwrap();
        let global = world.global_pose(id).unwrap();
        footprint(agent.shape(), &agent.geometry(), &global)
            .unwrap()
            .iter()
            .flat_map(|l| world.index().line_cells(l).map(|(cx, cy, _)| (cx, cy)))
            .collect()
    }

    fn assert_index_consistent(world: &World) {
        for agent in world.agents() {
            assert_eq!(
                indexed_cells(world, agent.id()),
                expected_cells(world, agent.id()),
                "index out of sync for {}",
                agent.name()
            );
        }
    }

    // ── Construction ────────────────────────────────────────────────────────

    #[test]
    fn invalid_world_config_is_rejected() {
        let bad = WorldConfig {
            interval_ms: 0,
            ..WorldConfig::default()
        };
        assert!(World::new(bad).is_err());
        let bad = WorldConfig {
            resolution: 0.0,
            ..WorldConfig::default()
        };
        assert!(World::new(bad).is_err());
    }

    #[test]
    fn created_agent_is_mapped() {
        let mut w = world(10.0, 10.0, 10.0);
        let id = w.create_agent(boxed("a", 5.0, 5.0)).unwrap();
        assert!(!indexed_cells(&w, id).is_empty());
        assert_index_consistent(&w);
        assert_eq!(w.find("a"), Some(id));
    }

    #[test]
    fn child_pose_composes_with_parent() {
        let mut w = world(10.0, 10.0, 10.0);
        let base = w
            .create_agent(AgentSpec::new("base").with_pose(Pose::new(2.0, 2.0, FRAC_PI_2)))
            .unwrap();
        let arm = w
            .create_agent(
                AgentSpec::new("arm")
                    .with_parent(base)
                    .with_pose(Pose::new(1.0, 0.0, 0.0))
                    .with_size(0.2, 0.2),
            )
            .unwrap();
        let g = w.global_pose(arm).unwrap();
        assert!((g.x - 2.0).abs() < 1e-9, "x={}", g.x);
        assert!((g.y - 3.0).abs() < 1e-9, "y={}", g.y);
        assert_eq!(w.agent(base).unwrap().children(), &[arm]);
    }

    #[test]
    fn unknown_parent_is_rejected() {
        let mut w = world(10.0, 10.0, 10.0);
        let ghost = AgentId::new(42, 0);
        let err = w.create_agent(boxed("orphan", 1.0, 1.0).with_parent(ghost)).unwrap_err();
        assert!(matches!(err, SimError::UnknownParent(_)));
        assert!(w.is_empty());
    }

    #[test]
    fn degenerate_geometry_is_rejected_before_mapping() {
        let mut w = world(10.0, 10.0, 10.0);
        let err = w.create_agent(boxed("flat", 1.0, 1.0).with_size(0.0, 1.0)).unwrap_err();
        assert!(matches!(err, SimError::DegenerateGeometry(_)));
        let err = w
            .create_agent(AgentSpec::new("nan").with_pose(Pose::new(f64::NAN, 1.0, 0.0)))
            .unwrap_err();
        assert!(matches!(err, SimError::NonFinitePose { .. }));
        assert_eq!(w.index().occupied_cells().count(), 0);
        assert!(w.is_empty());
    }

    // ── Mapping invariant ───────────────────────────────────────────────────

    #[test]
    fn index_tracks_every_pose_change() {
        let mut w = world(10.0, 10.0, 10.0);
        let a = w.create_agent(boxed("a", 2.0, 2.0).with_size(1.3, 0.7)).unwrap();
        let _b = w.create_agent(boxed("b", 8.0, 8.0)).unwrap();

        let poses = [
            Pose::new(2.5, 2.1, 0.3),
            Pose::new(3.7, 4.4, 1.9),
            Pose::new(3.71, 4.41, -2.8),
            Pose::new(9.8, 0.2, 0.0),
            Pose::new(5.0, 5.0, PI),
        ];
        for pose in poses {
            w.set_pose(a, pose).unwrap();
            assert_index_consistent(&w);
        }
    }

    #[test]
    fn moving_parent_remaps_children() {
        let mut w = world(10.0, 10.0, 10.0);
        let base = w.create_agent(boxed("base", 2.0, 2.0)).unwrap();
        let mast = w
            .create_agent(
                AgentSpec::new("mast")
                    .with_parent(base)
                    .with_pose(Pose::new(0.8, 0.0, 0.0))
                    .with_size(0.3, 0.3),
            )
            .unwrap();
        let before = indexed_cells(&w, mast);
        w.set_pose(base, Pose::new(6.0, 6.0, FRAC_PI_2)).unwrap();
        assert_ne!(indexed_cells(&w, mast), before);
        assert_index_consistent(&w);
    }

    #[test]
    fn rejected_change_leaves_agent_in_place() {
        let mut w = world(10.0, 10.0, 10.0);
        let a = w.create_agent(boxed("a", 3.0, 3.0)).unwrap();
        let before = indexed_cells(&w, a);

        assert!(w.set_pose(a, Pose::new(f64::INFINITY, 0.0, 0.0)).is_err());
        assert!(w.set_geometry(a, Geometry::sized(-1.0, 1.0)).is_err());
        assert!(w.set_outline(a, &Outline::Lines(vec![])).is_err());

        assert_eq!(indexed_cells(&w, a), before);
        assert!((w.agent(a).unwrap().pose().x - 3.0).abs() < 1e-12);
        assert_index_consistent(&w);
    }

    #[test]
    fn outline_change_is_remapped() {
        let mut w = world(10.0, 10.0, 10.0);
        let a = w.create_agent(boxed("a", 5.0, 5.0).with_size(2.0, 2.0)).unwrap();
        w.set_outline(a, &Outline::Lines(vec![Line::new(0.0, 0.0, 1.0, 1.0)]))
            .unwrap();
        assert_eq!(w.agent(a).unwrap().footprint().len(), 1);
        assert_index_consistent(&w);
    }

    // ── Destruction ─────────────────────────────────────────────────────────

    #[test]
    fn destroy_removes_subtree_and_invalidates_handles() {
        let mut w = world(10.0, 10.0, 10.0);
        let base = w.create_agent(boxed("base", 5.0, 5.0)).unwrap();
        let child = w
            .create_agent(AgentSpec::new("child").with_parent(base).with_size(0.2, 0.2))
            .unwrap();
        let other = w.create_agent(boxed("other", 1.0, 1.0)).unwrap();

        w.destroy_agent(base).unwrap();
        assert!(w.agent(base).is_none());
        assert!(w.agent(child).is_none());
        assert_eq!(w.len(), 1);
        assert!(w.index().occupied_cells().all(|(_, occ)| occ == [other]));
        assert_eq!(w.destroy_agent(base), Err(SimError::UnknownAgent(base)));

        // Freed slots are reused with a fresh generation.
        let reused = w.create_agent(boxed("new", 8.0, 8.0)).unwrap();
        assert!(reused != base && reused != child);
        assert!(w.agent(base).is_none());
    }

    #[test]
    fn destroying_child_detaches_it_from_parent() {
        let mut w = world(10.0, 10.0, 10.0);
        let base = w.create_agent(boxed("base", 5.0, 5.0)).unwrap();
        let child = w
            .create_agent(AgentSpec::new("child").with_parent(base).with_size(0.2, 0.2))
            .unwrap();
        w.destroy_agent(child).unwrap();
        assert!(w.agent(base).unwrap().children().is_empty());
        assert_index_consistent(&w);
    }

    // ── Ray casts ───────────────────────────────────────────────────────────

    #[test]
    fn corridor_cast_hits_near_edge_of_other_agent() {
        let mut w = world(20.0, 10.0, 10.0);
        let a = w.create_agent(boxed("a", 5.0, 5.0)).unwrap();
        let b = w.create_agent(boxed("b", 10.0, 5.0)).unwrap();
        let hit = w.cast(a, SensorKind::Obstacle, (5.0, 5.0), 0.0, 10.0).unwrap();
        assert_eq!(hit.owner, b);
        assert!((hit.range - 4.5).abs() < 1e-6, "range={}", hit.range);
    }

    #[test]
    fn casts_skip_relatives_and_invisible_agents() {
        let mut w = world(20.0, 10.0, 10.0);
        let a = w.create_agent(boxed("a", 5.0, 5.0)).unwrap();
        // A mount sticking out of A along the beam.
        let _mount = w
            .create_agent(
                AgentSpec::new("mount")
                    .with_parent(a)
                    .with_pose(Pose::new(1.0, 0.0, 0.0))
                    .with_size(0.5, 0.5),
            )
            .unwrap();
        let _glass = w
            .create_agent(boxed("glass", 8.0, 5.0).with_returns(ReturnFlags {
                laser: false,
                ..ReturnFlags::default()
            }))
            .unwrap();
        let b = w.create_agent(boxed("b", 12.0, 5.0)).unwrap();

        let laser = w.cast(a, SensorKind::Laser, (5.0, 5.0), 0.0, 10.0).unwrap();
        assert_eq!(laser.owner, b);
        assert!((laser.range - 6.5).abs() < 1e-6, "range={}", laser.range);
        let sonar = w.cast(a, SensorKind::Sonar, (5.0, 5.0), 0.0, 10.0).unwrap();
        assert_eq!(w.agent(sonar.owner).unwrap().name(), "glass");
    }

    #[test]
    fn mounted_laser_sees_through_its_enclosing_parent() {
        let mut w = world(10.0, 10.0, 10.0);
        let scout = w
            .create_agent(
                AgentSpec::new("scout")
                    .with_pose(Pose::new(3.0, 5.0, 0.0))
                    .with_size(0.5, 0.5),
            )
            .unwrap();
        // Laser inside the scout body, facing backwards through its left edge.
        let laser = w
            .create_agent(
                AgentSpec::new("scout-laser")
                    .with_parent(scout)
                    .with_pose(Pose::new(0.0, 0.0, PI))
                    .with_size(0.1, 0.1)
                    .with_returns(ReturnFlags {
                        obstacle: false,
                        laser: false,
                        sonar: false,
                        fiducial: false,
                        infrared: false,
                    })
                    .with_device(DeviceConfig::Laser(LaserConfig {
                        samples: 1,
                        fov: 0.0,
                        range_max: 5.0,
                        ..LaserConfig::default()
                    })),
            )
            .unwrap();
        let wall = w
            .create_agent(
                AgentSpec::new("wall")
                    .with_pose(Pose::new(1.0, 5.0, 0.0))
                    .with_size(0.2, 8.0),
            )
            .unwrap();

        // Only the relatives rule keeps the parent out of the beam.
        let naive = w.cast_with(laser, (3.0, 5.0), PI, 5.0, |c| c != laser).unwrap();
        assert_eq!(naive.owner, scout);

        let hit = w.cast(laser, SensorKind::Laser, (3.0, 5.0), PI, 5.0).unwrap();
        assert_eq!(hit.owner, wall);
        assert!((hit.range - 1.8).abs() < 0.11, "range={}", hit.range);

        w.step();
        let data = w.device_data(laser).unwrap();
        let range = data["ranges"][0].as_f64().unwrap();
        assert!((range - 1.8).abs() < 0.11, "range={range}");
    }

    // ── Stepping ────────────────────────────────────────────────────────────

    #[test]
    fn velocity_integrates_in_local_frame() {
        let mut w = world(10.0, 10.0, 10.0);
        let a = w
            .create_agent(
                AgentSpec::new("a")
                    .with_pose(Pose::new(2.0, 2.0, FRAC_PI_2))
                    .with_size(0.4, 0.4)
                    .with_velocity(Velocity::new(1.0, 0.0, 0.0)),
            )
            .unwrap();
        for _ in 0..10 {
            let report = w.step();
            assert!(report.stalled.is_empty() && report.faults.is_empty());
        }
        let p = w.agent(a).unwrap().pose();
        assert!((p.x - 2.0).abs() < 1e-9, "x={}", p.x);
        assert!((p.y - 3.0).abs() < 1e-9, "y={}", p.y);
        assert_eq!(w.sim_time_ms(), 1000);
        assert_index_consistent(&w);
    }

    #[test]
    fn blocked_move_stalls_and_keeps_pose() {
        let mut w = world(10.0, 10.0, 10.0);
        let robot = w
            .create_agent(
                AgentSpec::new("robot")
                    .with_pose(Pose::new(2.0, 5.0, 0.0))
                    .with_size(0.5, 0.5)
                    .with_velocity(Velocity::new(1.0, 0.0, 0.0)),
            )
            .unwrap();
        let _wall = w
            .create_agent(
                AgentSpec::new("wall")
                    .with_pose(Pose::new(4.0, 5.0, 0.0))
                    .with_size(0.2, 8.0),
            )
            .unwrap();

        let mut stalled_at = None;
        for tick in 0..40 {
            let report = w.step();
            if report.stalled.contains(&robot) {
                stalled_at = Some(tick);
                break;
            }
        }
        assert!(stalled_at.is_some(), "robot never reached the wall");
        let agent = w.agent(robot).unwrap();
        assert!(agent.stalled());
        // Right edge of the robot must still be short of the wall's left edge.
        assert!(agent.pose().x + 0.25 < 3.9 + 0.1, "x={}", agent.pose().x);

        let before = agent.pose();
        w.step();
        assert_eq!(w.agent(robot).unwrap().pose(), before, "stalled robot must not move");
        assert_index_consistent(&w);
    }

    #[test]
    fn child_outline_blocks_parent_move() {
        let mut w = world(10.0, 10.0, 10.0);
        let robot = w
            .create_agent(
                AgentSpec::new("robot")
                    .with_pose(Pose::new(1.5, 5.0, 0.0))
                    .with_size(0.5, 0.5),
            )
            .unwrap();
        // A solid arm reaching 1 m ahead of the robot.
        let arm = w
            .create_agent(
                AgentSpec::new("arm")
                    .with_parent(robot)
                    .with_pose(Pose::new(1.0, 0.0, 0.0))
                    .with_size(0.3, 0.3),
            )
            .unwrap();
        let wall = w
            .create_agent(
                AgentSpec::new("wall")
                    .with_pose(Pose::new(3.5, 5.0, 0.0))
                    .with_size(0.2, 8.0),
            )
            .unwrap();

        // The body alone would fit at 2.6, the arm would end up inside the wall.
        let hit = w.would_collide(robot, Pose::new(2.6, 5.0, 0.0)).unwrap().unwrap();
        assert_eq!(hit.owner, wall);
        let arm_before = w.agent(arm).unwrap().footprint().to_vec();
        assert!(!w.try_move(robot, Pose::new(2.6, 5.0, 0.0)).unwrap());
        assert!(w.agent(robot).unwrap().stalled());
        assert_eq!(w.agent(robot).unwrap().pose(), Pose::new(1.5, 5.0, 0.0));
        assert_eq!(w.agent(arm).unwrap().footprint(), arm_before.as_slice());
        assert!(indexed_cells(&w, arm).is_disjoint(&indexed_cells(&w, wall)));

        assert!(w.try_move(robot, Pose::new(2.0, 5.0, 0.0)).unwrap());
        assert!((w.global_pose(arm).unwrap().x - 3.0).abs() < 1e-9);
        assert_index_consistent(&w);
    }

    #[test]
    fn set_pose_clears_stall() {
        let mut w = world(10.0, 10.0, 10.0);
        let a = w.create_agent(boxed("a", 2.0, 2.0)).unwrap();
        let _b = w.create_agent(boxed("b", 3.5, 2.0)).unwrap();
        assert!(!w.try_move(a, Pose::new(2.8, 2.0, 0.0)).unwrap());
        assert!(w.agent(a).unwrap().stalled());
        w.set_pose(a, Pose::new(7.0, 7.0, 0.0)).unwrap();
        assert!(!w.agent(a).unwrap().stalled());
    }

    // ── Devices ─────────────────────────────────────────────────────────────

    #[test]
    fn laser_scan_sees_wall() {
        let mut w = world(10.0, 10.0, 20.0);
        let robot = w
            .create_agent(
                AgentSpec::new("robot")
                    .with_pose(Pose::new(2.0, 5.0, 0.0))
                    .with_size(0.4, 0.4)
                    .with_device(DeviceConfig::Laser(LaserConfig {
                        samples: 3,
                        fov: FRAC_PI_2,
                        range_max: 5.0,
                        ..LaserConfig::default()
                    })),
            )
            .unwrap();
        let _wall = w
            .create_agent(
                AgentSpec::new("wall")
                    .with_pose(Pose::new(5.0, 5.0, 0.0))
                    .with_size(0.2, 9.0),
            )
            .unwrap();
        w.step();

        let data = w.device_data(robot).unwrap();
        let ranges: Vec<f64> = serde_json::from_value(data["ranges"].clone()).unwrap();
        assert_eq!(ranges.len(), 3);
        // Beam 0 at -45°, beam 1 at -15°, beam 2 at +15°.
        let to_wall = 4.9 - 2.0;
        for (i, r) in ranges.iter().enumerate() {
            let bearing = -PI / 4.0 + i as f64 * PI / 6.0;
            let expected = to_wall / bearing.cos();
            assert!((r - expected).abs() < 0.08, "beam {i}: {r} vs {expected}");
        }
    }

    #[test]
    fn ranger_reports_max_range_on_miss() {
        let mut w = world(10.0, 10.0, 10.0);
        let robot = w
            .create_agent(
                AgentSpec::new("robot")
                    .with_pose(Pose::new(5.0, 5.0, 0.0))
                    .with_size(0.4, 0.4)
                    .with_device(DeviceConfig::Ranger(RangerConfig {
                        transducers: vec![
                            TransducerConfig {
                                range_max: 2.0,
                                ..TransducerConfig::default()
                            },
                            TransducerConfig {
                                pose: Pose::new(0.0, 0.0, PI),
                                range_max: 2.0,
                                ..TransducerConfig::default()
                            },
                        ],
                    })),
            )
            .unwrap();
        let _post = w
            .create_agent(boxed("post", 6.5, 5.0).with_size(0.2, 0.2))
            .unwrap();
        w.step();

        let data = w.device_data(robot).unwrap();
        let ranges: Vec<f64> = serde_json::from_value(data["ranges"].clone()).unwrap();
        assert!((ranges[0] - 1.4).abs() < 0.11, "front={}", ranges[0]);
        assert_eq!(ranges[1], 2.0);
    }

    #[test]
    fn infrared_message_reaches_facing_receiver() {
        let mut w = world(10.0, 10.0, 20.0);
        let ir = |message: Vec<u8>| {
            DeviceConfig::Infrared(InfraredConfig {
                message,
                ..InfraredConfig::default()
            })
        };
        let tx = w
            .create_agent(
                AgentSpec::new("tx")
                    .with_pose(Pose::new(4.0, 5.0, 0.0))
                    .with_size(0.2, 0.2)
                    .with_device(ir(vec![7])),
            )
            .unwrap();
        let rx = w
            .create_agent(
                AgentSpec::new("rx")
                    .with_pose(Pose::new(4.6, 5.0, PI))
                    .with_size(0.2, 0.2)
                    .with_device(ir(Vec::new())),
            )
            .unwrap();

        // Tick 1 delivers; tick 2 makes the received message visible.
        w.step();
        w.step();

        let Some(Device::Infrared(rx_dev)) = w.agent(rx).unwrap().device() else {
            panic!("rx must carry an infrared device");
        };
        let got = rx_dev.last_message().expect("rx must hear tx");
        assert_eq!(got.from, tx);
        assert_eq!(got.data, vec![7]);
        assert!(!got.reflection);

        let Some(Device::Infrared(tx_dev)) = w.agent(tx).unwrap().device() else {
            panic!("tx must carry an infrared device");
        };
        let echo = tx_dev.last_message().expect("tx must see its reflection");
        assert!(echo.reflection);
    }

    #[test]
    fn fiducial_reports_id_only_when_close() {
        let mut w = world(10.0, 10.0, 10.0);
        let finder = w
            .create_agent(
                AgentSpec::new("finder")
                    .with_pose(Pose::new(2.0, 5.0, 0.0))
                    .with_size(0.4, 0.4)
                    .with_device(DeviceConfig::Fiducial(FiducialConfig {
                        range_anon: 5.0,
                        range_id: 2.0,
                        ..FiducialConfig::default()
                    })),
            )
            .unwrap();
        let beacon = |name: &str, x: f64, y: f64, id: u32| {
            boxed(name, x, y)
                .with_size(0.2, 0.2)
                .with_fiducial_id(id)
                .with_returns(ReturnFlags {
                    fiducial: true,
                    ..ReturnFlags::default()
                })
        };
        let near = w.create_agent(beacon("near", 3.5, 5.0, 1)).unwrap();
        let far = w.create_agent(beacon("far", 5.0, 7.0, 2)).unwrap();
        // Behind the finder: outside the 180° field of view.
        w.create_agent(beacon("behind", 0.5, 5.0, 3)).unwrap();
        // Hidden behind a wall.
        w.create_agent(beacon("hidden", 6.0, 3.0, 4)).unwrap();
        w.create_agent(
            AgentSpec::new("wall")
                .with_pose(Pose::new(4.0, 3.6, 0.0))
                .with_size(0.2, 1.0),
        )
        .unwrap();
        w.step();

        let Some(Device::Fiducial(dev)) = w.agent(finder).unwrap().device() else {
            panic!("finder must carry a fiducial device");
        };
        let seen: Vec<_> = dev.readings().iter().map(|r| (r.agent, r.id)).collect();
        assert_eq!(seen, vec![(near, Some(1)), (far, None)]);
        let first = &dev.readings()[0];
        assert!((first.range - 1.5).abs() < 1e-9);
        assert!(first.bearing.abs() < 1e-9);
    }

    #[test]
    fn position_device_tracks_odometry() {
        let mut w = world(10.0, 10.0, 10.0);
        let robot = w
            .create_agent(
                AgentSpec::new("robot")
                    .with_pose(Pose::new(5.0, 5.0, 0.0))
                    .with_size(0.4, 0.4)
                    .with_velocity(Velocity::new(0.5, 0.0, 0.0))
                    .with_device(DeviceConfig::Position),
            )
            .unwrap();
        for _ in 0..4 {
            w.step();
        }
        let data = w.device_data(robot).unwrap();
        let odom: Pose = serde_json::from_value(data["odom"].clone()).unwrap();
        assert!((odom.x - 0.2).abs() < 1e-9, "odom.x={}", odom.x);
        assert_eq!(data["stalled"], serde_json::json!(false));
    }

    // ── Resize & snapshot ───────────────────────────────────────────────────

    #[test]
    fn resize_matches_fresh_build_at_new_resolution() {
        let specs = [
            boxed("a", 2.0, 2.0).with_size(1.3, 0.6),
            AgentSpec::new("b").with_pose(Pose::new(6.3, 4.1, 0.7)),
            boxed("c", 8.2, 8.9).with_size(0.5, 1.5),
        ];
        let mut resized = world(10.0, 10.0, 10.0);
        for spec in specs.iter().cloned() {
            resized.create_agent(spec).unwrap();
        }
        resized.resize(12.0, 10.0, 7.0).unwrap();

        let mut fresh = world(12.0, 10.0, 7.0);
        for spec in specs.iter().cloned() {
            fresh.create_agent(spec).unwrap();
        }

        let cells = |w: &World| -> Vec<((usize, usize), Vec<AgentId>)> {
            w.index()
                .occupied_cells()
                .map(|(c, occ)| {
                    let mut occ = occ.to_vec();
                    occ.sort();
                    (c, occ)
                })
                .collect()
        };
        assert_eq!(cells(&resized), cells(&fresh));
        assert_index_consistent(&resized);
    }

    #[test]
    fn snapshot_lists_global_poses() {
        let mut w = world(10.0, 10.0, 10.0);
        let base = w.create_agent(boxed("base", 3.0, 3.0)).unwrap();
        w.create_agent(
            AgentSpec::new("top")
                .with_parent(base)
                .with_pose(Pose::new(0.0, 1.0, 0.0))
                .with_size(0.2, 0.2),
        )
        .unwrap();
        let snap = w.snapshot();
        assert_eq!(snap.len(), 2);
        let top = snap.iter().find(|s| s.name == "top").unwrap();
        assert!((top.pose.y - 4.0).abs() < 1e-9);
        assert_eq!(top.footprint.len(), 4);
    }
}
