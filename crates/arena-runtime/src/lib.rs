//! `arena-runtime` – Running a world.
//!
//! # Modules
//!
//! - [`sim_loop`] – [`SimLoop`][sim_loop::SimLoop]: the only owner of the
//!   [`World`][arena_world::World].  It applies queued
//!   [`Command`][arena_types::Command]s between ticks, paces ticks in real
//!   time or runs them back to back, and publishes results after each one.
//!   [`SimHandle`][sim_loop::SimHandle] is the cloneable client.
//! - [`bus`] – [`EventBus`][bus::EventBus]: broadcast channels per
//!   [`Topic`][bus::Topic] carrying sensor data, truth snapshots, and alerts.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: installs the
//!   `tracing` subscriber, with OTLP span export when
//!   `OTEL_EXPORTER_OTLP_ENDPOINT` is set.

pub mod bus;
pub mod sim_loop;
pub mod telemetry;

pub use bus::{EventBus, Topic, TopicReceiver};
pub use sim_loop::{CommandOutcome, SimHandle, SimLoop, SimLoopConfig, SimOutcome};
pub use telemetry::{TracerProviderGuard, init_tracing};
