//! Pipeline assembly: wire the ports up and spawn the worker tasks.

use log::info;

use crate::clock::WallClock;
use crate::coordinator::{Coordinator, CoordinatorHandle};
use crate::driver::{SensorDriver, SensorPort};
use crate::fusion::FusionEngine;
use crate::metrics::MetricsEngine;
use crate::sensors::{SensorId, SENSOR_COUNT};
use crate::settings::SettingsHandle;
use crate::state::StateHandle;
use crate::thread_util;

/// A running pipeline. Dropping the handle (and every clone of it) stops the
/// coordinator; fusion and metrics run for the life of the process.
pub struct Pipeline {
    pub state: StateHandle,
    pub commands: CoordinatorHandle,
}

/// Spawn the coordinator, fusion, and metrics tasks over the given ports
/// (one per sensor, in ordinal order).
#[must_use]
pub fn start(
    ports: [Box<dyn SensorPort>; SENSOR_COUNT],
    settings: SettingsHandle,
    wall_clock: Option<Box<dyn WallClock>>,
) -> Pipeline {
    let state = StateHandle::new();

    let mut ports = ports.into_iter();
    let drivers = SensorId::ALL.map(|sensor| {
        SensorDriver::new(sensor, ports.next().expect("one port per sensor"))
    });

    let (coordinator, commands) = Coordinator::new(drivers, state.clone(), settings.clone());
    thread_util::spawn_named("sensor_coord", move || coordinator.run());

    let fusion = FusionEngine::new(state.clone(), settings.clone(), wall_clock);
    thread_util::spawn_named("fusion", move || fusion.run());

    let metrics = MetricsEngine::new(state.clone());
    thread_util::spawn_named("metrics", move || metrics.run());

    info!("Pipeline running");
    Pipeline { state, commands }
}
