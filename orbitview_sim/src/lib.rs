//! OrbitView Deterministic Simulation Harness
//!
//! A controlled environment where the tracking engine runs against a
//! scripted backend, frame by frame, with every source of nondeterminism
//! pinned to a single 64-bit seed:
//! - **Time**: a virtual host clock advanced one frame at a time
//! - **Backend**: a constellation of circular orbits served as real wire text
//! - **Faults**: clock skew, dropped streams, garbage lines, failing or
//!   oddly-framed propagations, stale element sets
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        ScenarioRunner                        │
//! │                                                              │
//! │  SimContext (virtual clock)                                  │
//! │       │                                                      │
//! │  ┌────▼─────┐  stream lines / bodies  ┌──────────────────┐   │
//! │  │SimServer │────────────────────────▶│ TrackingEngine   │   │
//! │  │ (faults) │◀────────────────────────│  + SceneRecorder │   │
//! │  └────┬─────┘   EngineCommands        └──────────────────┘   │
//! │       │                                        │             │
//! │  ┌────▼──────────┐      ground truth vs. rendered positions  │
//! │  │ Constellation │◀──────────────────────────────┘           │
//! │  └───────────────┘                                           │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use orbitview_sim::{ScenarioRunner, ScenarioId};
//!
//! let result = ScenarioRunner::new(42, 50).run(ScenarioId::Flapping);
//! assert!(result.passed, "{:?}", result.failure_reason);
//! ```

mod backend;
mod constellation;
mod context;
mod exporter;
mod runner;
pub mod scenarios;

pub use backend::{iso8601, FaultPlan, OrbitFrame, OrbitUnits, ServerStats, SimServer};
pub use constellation::{CircularOrbit, Constellation, EARTH_RADIUS, FIRST_OBJECT_ID};
pub use context::{SimContext, DEFAULT_EPOCH_SECS};
pub use exporter::{ObjectPosition, OrbitSummary, SimEvent, SimExport, SimFrame};
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner};
pub use scenarios::ScenarioId;
