//! Sensor coordinator pipeline for the IAQ monitor.
//!
//! The core of the monitor firmware, kept hardware-agnostic: physical
//! transports sit behind the [`driver::SensorPort`] capability trait and
//! network surfaces consume [`snapshot::Snapshot`]s. What lives here is the
//! hard part: per-sensor lifecycle and scheduling under failure, the
//! mutex-guarded shared record, cross-sensor fusion, and the bounded-memory
//! metrics pipeline.
//!
//! Task layout (see [`pipeline::start`]):
//! - `sensor_coord` owns every driver, runs the per-sensor state machine,
//!   executes staggered periodic reads, and serves the command queue.
//! - `fusion` applies cross-sensor compensation at 1 Hz.
//! - `metrics` derives AQI, comfort, trends, and scores at 0.2 Hz.

pub mod clock;
pub mod coordinator;
pub mod driver;
pub mod error;
pub mod fusion;
pub mod metrics;
pub mod pipeline;
pub mod sensors;
pub mod settings;
pub mod snapshot;
pub mod state;
pub mod thread_util;
pub mod watchdog;

pub use clock::WallClock;
pub use coordinator::{CadenceReport, CoordinatorHandle, RuntimeInfo};
pub use error::Error;
pub use fusion::FusionEngine;
pub use sensors::{Field, SensorId, SensorState, SENSOR_COUNT};
pub use settings::{JsonFileStore, MemoryStore, SettingsHandle};
pub use snapshot::Snapshot;
pub use state::StateHandle;
