//! [`SimLoop`] – the single owner of the [`World`].
//!
//! Everything that changes the world goes through a [`SimHandle`]: each call
//! queues a [`Command`] on an `mpsc` channel together with a `oneshot`
//! reply, and the loop applies queued commands strictly between ticks.  No
//! other task ever holds a reference to the world, so a tick always sees a
//! consistent index.
//!
//! After every tick the loop publishes on the [`EventBus`]:
//!
//! - [`Topic::SensorData`] – device data of every subscribed agent,
//! - [`Topic::Truth`] – a snapshot of every agent (only when someone listens),
//! - [`Topic::Alerts`] – stalls and device faults.
//!
//! The loop stops on [`SimHandle::shutdown`], once every handle has been
//! dropped, or after [`SimLoopConfig::max_ticks`] ticks.
//!
//! # Example
//!
//! ```rust,no_run
//! use arena_runtime::{EventBus, SimLoop, SimLoopConfig};
//! use arena_types::AgentSpec;
//! use arena_world::{World, WorldConfig};
//!
//! # async fn demo() -> Result<(), arena_types::SimError> {
//! let world = World::new(WorldConfig::default())?;
//! let (sim, handle) = SimLoop::new(world, EventBus::default(), SimLoopConfig::default());
//! let task = tokio::spawn(sim.run());
//!
//! let robot = handle.create(AgentSpec::new("robot")).await?;
//! handle.subscribe(robot).await.ok();
//! handle.shutdown().await;
//! let outcome = task.await.map_err(|e| arena_types::SimError::Channel(e.to_string()))?;
//! println!("ran {} ticks", outcome.ticks);
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeSet;
use std::ops::ControlFlow;
use std::time::Duration;

use arena_types::{
    AgentId, AgentSnapshot, AgentSpec, Command, Event, EventPayload, Pose, SimError, Velocity,
};
use arena_world::{StepReport, World};
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, info_span, warn};

use crate::bus::{EventBus, Topic};

const SOURCE: &str = "arena-runtime::sim_loop";

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SimLoopConfig {
    /// Pace ticks at the world's `interval_ms`; otherwise run as fast as
    /// possible.
    pub realtime: bool,
    /// Stop after this many ticks.
    pub max_ticks: Option<u64>,
    /// Depth of the command queue.
    pub command_capacity: usize,
}

impl Default for SimLoopConfig {
    fn default() -> Self {
        Self {
            realtime: true,
            max_ticks: None,
            command_capacity: 64,
        }
    }
}

/// Successful result of a [`Command`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    Created(AgentId),
    Done,
}

/// What the loop hands back when it stops.
#[derive(Debug)]
pub struct SimOutcome {
    pub ticks: u64,
    pub sim_time_ms: u64,
    pub world: World,
}

enum Message {
    Command {
        command: Command,
        reply: oneshot::Sender<Result<CommandOutcome, SimError>>,
    },
    Snapshot(oneshot::Sender<Vec<AgentSnapshot>>),
    Shutdown,
}

// ─────────────────────────────────────────────────────────────────────────────
// SimHandle
// ─────────────────────────────────────────────────────────────────────────────

/// Cloneable client of a running [`SimLoop`].
#[derive(Clone, Debug)]
pub struct SimHandle {
    tx: mpsc::Sender<Message>,
}

impl SimHandle {
    /// Queue `command` and wait for the loop to apply it.
    ///
    /// # Errors
    ///
    /// The command's own error, or [`SimError::Channel`] when the loop has
    /// stopped.
    pub async fn send(&self, command: Command) -> Result<CommandOutcome, SimError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Message::Command { command, reply })
            .await
            .map_err(|_| stopped())?;
        rx.await.map_err(|_| stopped())?
    }

    pub async fn create(&self, spec: AgentSpec) -> Result<AgentId, SimError> {
        match self.send(Command::Create(spec)).await? {
            CommandOutcome::Created(id) => Ok(id),
            CommandOutcome::Done => Err(SimError::Channel("create returned no agent".into())),
        }
    }

    pub async fn set_pose(&self, agent: AgentId, pose: Pose) -> Result<(), SimError> {
        self.send(Command::SetPose { agent, pose }).await.map(drop)
    }

    pub async fn set_velocity(&self, agent: AgentId, velocity: Velocity) -> Result<(), SimError> {
        self.send(Command::SetVelocity { agent, velocity }).await.map(drop)
    }

    pub async fn destroy(&self, agent: AgentId) -> Result<(), SimError> {
        self.send(Command::Destroy { agent }).await.map(drop)
    }

    /// Publish `agent`'s device data on [`Topic::SensorData`] after every tick.
    pub async fn subscribe(&self, agent: AgentId) -> Result<(), SimError> {
        self.send(Command::Subscribe { agent }).await.map(drop)
    }

    pub async fn unsubscribe(&self, agent: AgentId) -> Result<(), SimError> {
        self.send(Command::Unsubscribe { agent }).await.map(drop)
    }

    /// Current snapshot of every agent, taken between ticks.
    pub async fn snapshot(&self) -> Result<Vec<AgentSnapshot>, SimError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Message::Snapshot(reply))
            .await
            .map_err(|_| stopped())?;
        rx.await.map_err(|_| stopped())
    }

    /// Ask the loop to stop after the current tick.  A no-op if it already
    /// has.
    pub async fn shutdown(&self) {
        let _ = self.tx.send(Message::Shutdown).await;
    }

    /// True once the loop has stopped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

fn stopped() -> SimError {
    SimError::Channel("simulation loop has stopped".into())
}

// ─────────────────────────────────────────────────────────────────────────────
// SimLoop
// ─────────────────────────────────────────────────────────────────────────────

pub struct SimLoop {
    world: World,
    bus: EventBus,
    config: SimLoopConfig,
    rx: mpsc::Receiver<Message>,
    subscribed: BTreeSet<AgentId>,
    ticks: u64,
}

impl SimLoop {
    pub fn new(world: World, bus: EventBus, config: SimLoopConfig) -> (Self, SimHandle) {
        let (tx, rx) = mpsc::channel(config.command_capacity.max(1));
        let sim = Self {
            world,
            bus,
            config,
            rx,
            subscribed: BTreeSet::new(),
            ticks: 0,
        };
        (sim, SimHandle { tx })
    }

    /// Drive the simulation until shutdown, handle drop, or the tick limit.
    pub async fn run(mut self) -> SimOutcome {
        info!(
            agents = self.world.len(),
            realtime = self.config.realtime,
            max_ticks = ?self.config.max_ticks,
            "simulation loop started"
        );
        if self.config.realtime {
            self.run_paced().await;
        } else {
            self.run_unpaced().await;
        }
        info!(ticks = self.ticks, sim_time_ms = self.world.sim_time_ms(), "simulation loop stopped");
        SimOutcome {
            ticks: self.ticks,
            sim_time_ms: self.world.sim_time_ms(),
            world: self.world,
        }
    }

    async fn run_paced(&mut self) {
        let period = Duration::from_millis(self.world.config().interval_ms);
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !self.limit_reached() {
            tokio::select! {
                message = self.rx.recv() => match message {
                    Some(message) => {
                        if self.handle(message).is_break() {
                            break;
                        }
                    }
                    None => {
                        debug!("all handles dropped");
                        break;
                    }
                },
                _ = interval.tick() => self.tick(),
            }
        }
    }

    async fn run_unpaced(&mut self) {
        while !self.limit_reached() {
            loop {
                match self.rx.try_recv() {
                    Ok(message) => {
                        if self.handle(message).is_break() {
                            return;
                        }
                    }
                    Err(mpsc::error::TryRecvError::Empty) => break,
                    Err(mpsc::error::TryRecvError::Disconnected) => {
                        debug!("all handles dropped");
                        return;
                    }
                }
            }
            self.tick();
            tokio::task::yield_now().await;
        }
    }

    fn limit_reached(&self) -> bool {
        self.config.max_ticks.is_some_and(|max| self.ticks >= max)
    }

    // ── Commands ─────────────────────────────────────────────────────────────

    fn handle(&mut self, message: Message) -> ControlFlow<()> {
        match message {
            Message::Command { command, reply } => {
                let result = self.apply(command);
                if let Err(e) = &result {
                    warn!(error = %e, "command rejected");
                }
                let _ = reply.send(result);
                ControlFlow::Continue(())
            }
            Message::Snapshot(reply) => {
                let _ = reply.send(self.world.snapshot());
                ControlFlow::Continue(())
            }
            Message::Shutdown => {
                info!("shutdown requested");
                ControlFlow::Break(())
            }
        }
    }

    fn apply(&mut self, command: Command) -> Result<CommandOutcome, SimError> {
        debug!(?command, "applying command");
        match command {
            Command::Create(spec) => self.world.create_agent(spec).map(CommandOutcome::Created),
            Command::SetPose { agent, pose } => {
                self.world.set_pose(agent, pose).map(|()| CommandOutcome::Done)
            }
            Command::SetVelocity { agent, velocity } => self
                .world
                .set_velocity(agent, velocity)
                .map(|()| CommandOutcome::Done),
            Command::Destroy { agent } => {
                self.world.destroy_agent(agent)?;
                let world = &self.world;
                self.subscribed.retain(|&id| world.agent(id).is_some());
                Ok(CommandOutcome::Done)
            }
            Command::Subscribe { agent } => {
                let subject = self.world.agent(agent).ok_or(SimError::UnknownAgent(agent))?;
                if subject.device().is_none() {
                    return Err(SimError::InvalidConfig(format!(
                        "agent '{}' has no device to subscribe to",
                        subject.name()
                    )));
                }
                self.subscribed.insert(agent);
                Ok(CommandOutcome::Done)
            }
            Command::Unsubscribe { agent } => {
                self.subscribed.remove(&agent);
                Ok(CommandOutcome::Done)
            }
        }
    }

    // ── Tick ─────────────────────────────────────────────────────────────────

    fn tick(&mut self) {
        let span = info_span!("tick", n = self.ticks + 1);
        let _enter = span.enter();

        let report = self.world.step();
        self.ticks += 1;
        self.publish_alerts(&report);

        for &agent in &self.subscribed {
            if let Some(data) = self.world.device_data(agent) {
                self.publish(
                    Topic::SensorData,
                    EventPayload::SensorData {
                        agent,
                        sim_time_ms: report.sim_time_ms,
                        data,
                    },
                );
            }
        }

        if self.bus.subscriber_count(Topic::Truth) > 0 {
            self.publish(
                Topic::Truth,
                EventPayload::Truth {
                    sim_time_ms: report.sim_time_ms,
                    agents: self.world.snapshot(),
                },
            );
        }
    }

    fn publish_alerts(&self, report: &StepReport) {
        for &agent in &report.stalled {
            self.publish(
                Topic::Alerts,
                EventPayload::Stalled {
                    agent,
                    sim_time_ms: report.sim_time_ms,
                },
            );
        }
        for (agent, error) in &report.faults {
            self.publish(
                Topic::Alerts,
                EventPayload::Fault {
                    component: agent.to_string(),
                    message: error.to_string(),
                },
            );
        }
    }

    /// Publish unless nobody listens on `topic`.
    fn publish(&self, topic: Topic, payload: EventPayload) {
        if self.bus.subscriber_count(topic) == 0 {
            return;
        }
        if let Err(e) = self.bus.publish_to(topic, Event::new(SOURCE, payload)) {
            debug!(?topic, error = %e, "publish dropped");
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
