//! `arena-world` – The agent arena and its sensors.
//!
//! Owns every simulated agent, keeps the shared
//! [`SpatialIndex`][arena_spatial::SpatialIndex] in step with their outlines,
//! and advances them one tick at a time.
//!
//! # Modules
//!
//! - [`world`] – [`World`][world::World]: the slot arena of agents, pose
//!   changes with subtree remapping, collision-checked moves, sensor casts
//!   that skip the caster's own family, and [`step`][world::World::step].
//! - [`agent`] – [`Agent`][agent::Agent]: one entity with its outline, local
//!   pose, return flags, and the global segments mapped on its behalf.
//! - [`device`] – [`Device`][device::Device]: the position, laser, ranger,
//!   infrared, and fiducial sensors behind the [`Sensor`][device::Sensor]
//!   trait.
//! - [`scene`] – [`SceneConfig`][scene::SceneConfig]: TOML scene files with a
//!   `[world]` table and `[[agent]]` entries.
//!
//! # Example
//!
//! ```rust
//! use arena_types::{AgentSpec, Pose, SensorKind};
//! use arena_world::{World, WorldConfig};
//!
//! let mut world = World::new(WorldConfig {
//!     width: 20.0,
//!     height: 10.0,
//!     resolution: 10.0,
//!     interval_ms: 100,
//! })
//! .unwrap();
//! let a = world.create_agent(AgentSpec::new("a").with_pose(Pose::new(5.0, 5.0, 0.0))).unwrap();
//! let b = world.create_agent(AgentSpec::new("b").with_pose(Pose::new(10.0, 5.0, 0.0))).unwrap();
//!
//! let hit = world.cast(a, SensorKind::Obstacle, (5.0, 5.0), 0.0, 10.0).unwrap();
//! assert_eq!(hit.owner, b);
//! assert!((hit.range - 4.5).abs() < 1e-6);
//! ```

pub mod agent;
pub mod device;
pub mod scene;
pub mod world;

pub use agent::Agent;
pub use device::{Device, IrMessage, Sensor};
pub use scene::{SceneConfig, load_world};
pub use world::{StepReport, World, WorldConfig};
