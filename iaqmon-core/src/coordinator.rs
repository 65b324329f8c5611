//! Sensor coordinator: lifecycle, scheduling, commands, and recovery.
//!
//! Architecture:
//! - A single worker thread owns every driver and serializes all driver I/O.
//! - Foreign tasks talk to it through a bounded command channel; commands
//!   carry an optional one-shot reply port (fire-and-forget passes none).
//! - Scheduling state lives here; a compact mirror of each sensor's runtime
//!   is published into the shared state so snapshot consumers see it in the
//!   same lock acquisition as the data.
//!
//! The shared-state lock is never held across a driver call.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::time::Duration;

use log::{debug, info, warn};

use crate::clock::boot_millis;
use crate::driver::{AmbientConditions, SensorDriver};
use crate::error::Error;
use crate::sensors::{SensorId, SensorState, SENSOR_COUNT};
use crate::settings::SettingsHandle;
use crate::state::{SensorRuntimeView, StateHandle};
use crate::watchdog::WatchdogHandle;

/// Command queue capacity.
pub const COMMAND_QUEUE_DEPTH: usize = 16;

/// Consecutive read failures before a sensor is declared in error.
const ERROR_THRESHOLD: u32 = 3;

/// Auto-recovery backoff: initial delay, doubling per failure, capped.
const INITIAL_RETRY_DELAY_MS: u64 = 30_000;
const MAX_RETRY_DELAY_MS: u64 = 300_000;

/// SGP41 conditioning: 1 Hz pulses during the first 10 s of warm-up.
const CONDITIONING_WINDOW_MS: u64 = 10_000;
const CONDITIONING_PERIOD_MS: u64 = 1_000;

/// Minimum sleep keeps a burst of simultaneous deadlines from busy-looping;
/// maximum sleep keeps the watchdog fed.
const MIN_SLEEP_MS: u64 = 10;
const MAX_SLEEP_MS: u64 = 1_000;

/// Reply timeout for the plain command wrappers on the handle.
const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(2);

/// Per-sensor operations accepted over the command channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Read,
    Reset,
    Calibrate(u16),
    Enable,
    Disable,
    SetCadence(u32),
}

/// Cadence table response: values plus whether each came from the
/// persistent store.
#[derive(Debug, Clone, Copy)]
pub struct CadenceReport {
    pub cadence_ms: [u32; SENSOR_COUNT],
    pub from_store: [bool; SENSOR_COUNT],
}

/// One sensor's runtime as reported over the command surface.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeInfo {
    pub sensor: SensorId,
    pub state: SensorState,
    pub warmup_remaining_s: u64,
    /// `None` until the first successful read.
    pub last_read_age_s: Option<u64>,
    pub error_count: u32,
    pub retry_count: u32,
    pub next_retry_delay_ms: u64,
}

/// A queued command. Fire-and-forget commands carry no reply port; their
/// eventual result is dropped.
pub enum Command {
    Sensor {
        sensor: SensorId,
        kind: CommandKind,
        reply: Option<oneshot::Sender<Result<(), Error>>>,
    },
    GetCadences {
        reply: oneshot::Sender<CadenceReport>,
    },
    GetRuntimeInfo {
        sensor: SensorId,
        reply: oneshot::Sender<RuntimeInfo>,
    },
}

#[derive(Debug, Clone, Copy)]
struct Recovery {
    last_retry_ms: u64,
    retry_count: u32,
    next_retry_delay_ms: u64,
}

impl Default for Recovery {
    fn default() -> Self {
        Self {
            last_retry_ms: 0,
            retry_count: 0,
            next_retry_delay_ms: INITIAL_RETRY_DELAY_MS,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct SensorRuntime {
    state: SensorState,
    warmup_deadline_ms: u64,
    /// 0 = never.
    last_read_ms: u64,
    error_count: u32,
    recovery: Recovery,
}

impl Default for SensorRuntime {
    fn default() -> Self {
        Self {
            state: SensorState::Uninit,
            warmup_deadline_ms: 0,
            last_read_ms: 0,
            error_count: 0,
            recovery: Recovery::default(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Schedule {
    cadence_ms: u32,
    next_due_ms: u64,
    enabled: bool,
    from_store: bool,
}

/// Cheap cloneable command surface. Usable from any task; everything is
/// enqueued, nothing here touches a driver.
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: SyncSender<Command>,
}

impl CoordinatorHandle {
    fn enqueue(&self, command: Command) -> Result<(), Error> {
        match self.tx.try_send(command) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(Error::Overflow),
            Err(TrySendError::Disconnected(_)) => Err(Error::InvalidState),
        }
    }

    fn sensor_command_sync(
        &self,
        sensor: SensorId,
        kind: CommandKind,
        timeout: Duration,
    ) -> Result<(), Error> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.enqueue(Command::Sensor {
            sensor,
            kind,
            reply: Some(reply_tx),
        })?;
        // On timeout the command stays queued; its eventual reply send just
        // lands on a dropped receiver.
        reply_rx.recv_timeout(timeout).map_err(|_| Error::Timeout)?
    }

    /// Enqueue a read, fire-and-forget.
    pub fn force_read(&self, sensor: SensorId) -> Result<(), Error> {
        self.enqueue(Command::Sensor {
            sensor,
            kind: CommandKind::Read,
            reply: None,
        })
    }

    /// Enqueue a read and wait for its result.
    pub fn force_read_sync(&self, sensor: SensorId, timeout: Duration) -> Result<(), Error> {
        self.sensor_command_sync(sensor, CommandKind::Read, timeout)
    }

    pub fn reset(&self, sensor: SensorId) -> Result<(), Error> {
        self.sensor_command_sync(sensor, CommandKind::Reset, DEFAULT_COMMAND_TIMEOUT)
    }

    pub fn enable(&self, sensor: SensorId) -> Result<(), Error> {
        self.sensor_command_sync(sensor, CommandKind::Enable, DEFAULT_COMMAND_TIMEOUT)
    }

    pub fn disable(&self, sensor: SensorId) -> Result<(), Error> {
        self.sensor_command_sync(sensor, CommandKind::Disable, DEFAULT_COMMAND_TIMEOUT)
    }

    pub fn calibrate(&self, sensor: SensorId, value: u16) -> Result<(), Error> {
        self.sensor_command_sync(sensor, CommandKind::Calibrate(value), DEFAULT_COMMAND_TIMEOUT)
    }

    /// Set a sensor's periodic cadence; 0 disables periodic reads. Persisted.
    pub fn set_cadence(&self, sensor: SensorId, ms: u32) -> Result<(), Error> {
        self.sensor_command_sync(sensor, CommandKind::SetCadence(ms), DEFAULT_COMMAND_TIMEOUT)
    }

    pub fn get_cadences(&self) -> Result<CadenceReport, Error> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.enqueue(Command::GetCadences { reply: reply_tx })?;
        reply_rx
            .recv_timeout(DEFAULT_COMMAND_TIMEOUT)
            .map_err(|_| Error::Timeout)
    }

    pub fn get_runtime_info(&self, sensor: SensorId) -> Result<RuntimeInfo, Error> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.enqueue(Command::GetRuntimeInfo {
            sensor,
            reply: reply_tx,
        })?;
        reply_rx
            .recv_timeout(DEFAULT_COMMAND_TIMEOUT)
            .map_err(|_| Error::Timeout)
    }
}

/// The coordinator worker. Owns all drivers; runs as a single thread via
/// [`Coordinator::run`].
pub struct Coordinator {
    drivers: [SensorDriver; SENSOR_COUNT],
    runtime: [SensorRuntime; SENSOR_COUNT],
    schedule: [Schedule; SENSOR_COUNT],
    state: StateHandle,
    settings: SettingsHandle,
    rx: Receiver<Command>,
    /// End of the SGP41 conditioning window; 0 = not conditioning.
    conditioning_until_ms: u64,
    next_conditioning_ms: u64,
}

impl Coordinator {
    /// Build the coordinator and its command handle. `drivers` must be in
    /// ordinal order (one per sensor).
    ///
    /// # Panics
    /// Panics if the driver array is not in [`SensorId::ALL`] order.
    #[must_use]
    pub fn new(
        drivers: [SensorDriver; SENSOR_COUNT],
        state: StateHandle,
        settings: SettingsHandle,
    ) -> (Self, CoordinatorHandle) {
        for (i, driver) in drivers.iter().enumerate() {
            assert_eq!(
                driver.id().index(),
                i,
                "driver array must be in sensor ordinal order"
            );
        }
        let (tx, rx) = mpsc::sync_channel(COMMAND_QUEUE_DEPTH);
        let coordinator = Self {
            drivers,
            runtime: [SensorRuntime::default(); SENSOR_COUNT],
            schedule: [Schedule {
                cadence_ms: 0,
                next_due_ms: 0,
                enabled: false,
                from_store: false,
            }; SENSOR_COUNT],
            state,
            settings,
            rx,
            conditioning_until_ms: 0,
            next_conditioning_ms: 0,
        };
        (coordinator, CoordinatorHandle { tx })
    }

    /// Worker entry point. Returns when every command handle is dropped.
    pub fn run(mut self) {
        let watchdog = WatchdogHandle::register("sensor_coord");
        let now = boot_millis();
        self.start(now);
        info!("Sensor coordinator started");

        loop {
            watchdog.feed();
            let now = boot_millis();
            let next_wake = self.tick(now);
            let sleep_ms = next_wake
                .saturating_sub(now)
                .clamp(MIN_SLEEP_MS, MAX_SLEEP_MS);

            match self.rx.recv_timeout(Duration::from_millis(sleep_ms)) {
                Ok(command) => {
                    self.handle_command(command, boot_millis());
                    // Drain any burst before going back to sleep
                    while let Ok(command) = self.rx.try_recv() {
                        self.handle_command(command, boot_millis());
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    info!("Coordinator command channel closed, shutting down");
                    break;
                }
            }
        }
    }

    /// Boot: load cadences, bring every driver up, stagger first due times
    /// so the bus doesn't see all sensors at once.
    fn start(&mut self, now_ms: u64) {
        for sensor in SensorId::ALL {
            let i = sensor.index();
            let (cadence, from_store) = self.settings.load_cadence_ms(sensor);
            self.schedule[i] = Schedule {
                cadence_ms: cadence,
                next_due_ms: 0,
                enabled: cadence > 0,
                from_store,
            };
        }

        for sensor in SensorId::ALL {
            let i = sensor.index();
            match self.drivers[i].init() {
                Ok(()) => {
                    self.runtime[i].state = SensorState::Init;
                    self.publish_runtime(i);
                    if let Err(e) = self.bring_up(i, now_ms) {
                        warn!("{} enable failed at boot: {e}", sensor.name());
                        self.enter_error(i, now_ms);
                    }
                }
                Err(e) => {
                    warn!("{} init failed: {e}", sensor.name());
                    self.enter_error(i, now_ms);
                }
            }
        }

        // Staggered start: next_due[i] = now + cadence_i * i / N
        for sensor in SensorId::ALL {
            let i = sensor.index();
            let cadence = u64::from(self.schedule[i].cadence_ms);
            #[allow(clippy::cast_possible_truncation)]
            let offset = cadence * i as u64 / SENSOR_COUNT as u64;
            self.schedule[i].next_due_ms = now_ms + offset;
        }
    }

    /// Enable the driver and enter Warming (or Ready with no warm-up).
    fn bring_up(&mut self, i: usize, now_ms: u64) -> Result<(), Error> {
        self.drivers[i].enable()?;
        self.enter_warmup(i, now_ms);
        Ok(())
    }

    /// Post-enable/reset state: Warming when the sensor has a warm-up time,
    /// Ready otherwise. Restarts SGP41 conditioning.
    fn enter_warmup(&mut self, i: usize, now_ms: u64) {
        let sensor = self.drivers[i].id();
        let warmup = sensor.warmup_ms();
        if warmup > 0 {
            self.runtime[i].state = SensorState::Warming;
            self.runtime[i].warmup_deadline_ms = now_ms + warmup;
            if self.drivers[i].wants_conditioning() {
                self.conditioning_until_ms = now_ms + CONDITIONING_WINDOW_MS;
                self.next_conditioning_ms = now_ms;
            }
            debug!("{} warming for {warmup}ms", sensor.name());
        } else {
            self.runtime[i].state = SensorState::Ready;
            debug!("{} ready", sensor.name());
        }
        self.publish_runtime(i);
    }

    fn enter_error(&mut self, i: usize, now_ms: u64) {
        let sensor = self.drivers[i].id();
        self.runtime[i].state = SensorState::Error;
        self.runtime[i].recovery = Recovery {
            last_retry_ms: now_ms,
            retry_count: 0,
            next_retry_delay_ms: INITIAL_RETRY_DELAY_MS,
        };
        warn!(
            "{} entering error state, retry in {}s",
            sensor.name(),
            INITIAL_RETRY_DELAY_MS / 1000
        );
        self.publish_runtime(i);
    }

    /// Mirror one sensor's runtime into the shared state.
    fn publish_runtime(&self, i: usize) {
        let rt = &self.runtime[i];
        let view = SensorRuntimeView {
            state: rt.state,
            warmup_deadline_ms: rt.warmup_deadline_ms,
            last_read_ms: rt.last_read_ms,
            error_count: rt.error_count,
        };
        self.state.with(|s| s.sensors[i] = view);
    }

    /// One scheduling pass. Returns the next wake deadline in ms.
    fn tick(&mut self, now_ms: u64) -> u64 {
        // Lifecycle transitions first so reads below see fresh states
        for i in 0..SENSOR_COUNT {
            match self.runtime[i].state {
                SensorState::Warming => {
                    if now_ms >= self.runtime[i].warmup_deadline_ms
                        && self.drivers[i].is_reporting_ready()
                    {
                        self.runtime[i].state = SensorState::Ready;
                        info!("{} ready", self.drivers[i].id().name());
                        self.publish_runtime(i);
                    }
                }
                SensorState::Error => {
                    let recovery = self.runtime[i].recovery;
                    if now_ms.saturating_sub(recovery.last_retry_ms)
                        >= recovery.next_retry_delay_ms
                    {
                        self.attempt_recovery(i, now_ms);
                    }
                }
                _ => {}
            }
        }

        // SGP41 conditioning pulses, 1 Hz while the window is open
        if self.conditioning_until_ms > now_ms {
            if now_ms >= self.next_conditioning_ms {
                let env = self.ambient();
                for i in 0..SENSOR_COUNT {
                    if self.drivers[i].wants_conditioning()
                        && self.runtime[i].state == SensorState::Warming
                    {
                        if let Err(e) = self.drivers[i].conditioning_tick(&env) {
                            debug!("conditioning tick failed: {e}");
                        }
                    }
                }
                self.next_conditioning_ms = now_ms + CONDITIONING_PERIOD_MS;
            }
        } else {
            self.conditioning_until_ms = 0;
        }

        // Periodic reads for due sensors
        for i in 0..SENSOR_COUNT {
            if !self.schedule[i].enabled || self.runtime[i].state != SensorState::Ready {
                continue;
            }
            if now_ms >= self.schedule[i].next_due_ms {
                let _ = self.perform_read(i, now_ms);
                // Drift-free: advance by whole periods, never re-anchor on now
                let cadence = u64::from(self.schedule[i].cadence_ms);
                while self.schedule[i].next_due_ms <= now_ms {
                    self.schedule[i].next_due_ms += cadence;
                }
            }
        }

        self.next_wake(now_ms)
    }

    /// Earliest of: periodic due times, recovery deadlines, warm-up
    /// deadlines, conditioning pulses. Bounded by the watchdog-friendly
    /// maximum sleep.
    fn next_wake(&self, now_ms: u64) -> u64 {
        let mut wake = now_ms + MAX_SLEEP_MS;
        for i in 0..SENSOR_COUNT {
            match self.runtime[i].state {
                SensorState::Ready => {
                    if self.schedule[i].enabled {
                        wake = wake.min(self.schedule[i].next_due_ms);
                    }
                }
                SensorState::Warming => {
                    wake = wake.min(self.runtime[i].warmup_deadline_ms);
                }
                SensorState::Error => {
                    let r = self.runtime[i].recovery;
                    wake = wake.min(r.last_retry_ms + r.next_retry_delay_ms);
                }
                _ => {}
            }
        }
        if self.conditioning_until_ms > now_ms {
            wake = wake.min(self.next_conditioning_ms);
        }
        wake.max(now_ms + MIN_SLEEP_MS)
    }

    /// Backoff-gated reset attempt for a sensor in Error.
    fn attempt_recovery(&mut self, i: usize, now_ms: u64) {
        let sensor = self.drivers[i].id();
        info!(
            "{} auto-recovery attempt {}",
            sensor.name(),
            self.runtime[i].recovery.retry_count + 1
        );
        match self.drivers[i].reset() {
            Ok(()) => {
                info!("{} reset ok, re-warming", sensor.name());
                self.runtime[i].error_count = 0;
                self.runtime[i].recovery = Recovery::default();
                self.enter_warmup(i, now_ms);
            }
            Err(e) => {
                let recovery = &mut self.runtime[i].recovery;
                recovery.retry_count += 1;
                recovery.last_retry_ms = now_ms;
                recovery.next_retry_delay_ms =
                    (recovery.next_retry_delay_ms * 2).min(MAX_RETRY_DELAY_MS);
                warn!(
                    "{} reset failed ({e}), next retry in {}s",
                    sensor.name(),
                    recovery.next_retry_delay_ms / 1000
                );
                self.publish_runtime(i);
            }
        }
    }

    /// Current ambient conditions for drivers that compensate internally.
    fn ambient(&self) -> AmbientConditions {
        self.state.with(|s| AmbientConditions {
            temp_c: s.raw.temp_c,
            rh_pct: s.raw.rh_pct,
        })
    }

    /// One driver read. The state lock is taken only after the I/O returns.
    fn perform_read(&mut self, i: usize, now_ms: u64) -> Result<(), Error> {
        let sensor = self.drivers[i].id();
        let env = self.ambient();
        match self.drivers[i].read(&env) {
            Ok(measurement) => {
                self.runtime[i].last_read_ms = now_ms;
                self.runtime[i].error_count = 0;
                self.runtime[i].recovery = Recovery::default();
                let view = SensorRuntimeView {
                    state: self.runtime[i].state,
                    warmup_deadline_ms: self.runtime[i].warmup_deadline_ms,
                    last_read_ms: now_ms,
                    error_count: 0,
                };
                // One lock hold: measurement, validity, timestamp, runtime
                self.state.with(|s| {
                    s.apply_measurement(sensor, &measurement, now_ms);
                    s.sensors[i] = view;
                });
                Ok(())
            }
            Err(e) => {
                self.runtime[i].error_count += 1;
                warn!(
                    "{} read failed ({e}), consecutive errors: {}",
                    sensor.name(),
                    self.runtime[i].error_count
                );
                if self.runtime[i].error_count >= ERROR_THRESHOLD {
                    self.enter_error(i, now_ms);
                } else {
                    self.publish_runtime(i);
                }
                Err(e)
            }
        }
    }

    fn handle_command(&mut self, command: Command, now_ms: u64) {
        match command {
            Command::Sensor {
                sensor,
                kind,
                reply,
            } => {
                let result = self.exec_sensor_command(sensor, kind, now_ms);
                if let Err(ref e) = result {
                    debug!("{} command {kind:?} failed: {e}", sensor.name());
                }
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
            Command::GetCadences { reply } => {
                let _ = reply.send(self.cadence_report());
            }
            Command::GetRuntimeInfo { sensor, reply } => {
                let _ = reply.send(self.runtime_info(sensor, now_ms));
            }
        }
    }

    fn exec_sensor_command(
        &mut self,
        sensor: SensorId,
        kind: CommandKind,
        now_ms: u64,
    ) -> Result<(), Error> {
        let i = sensor.index();
        match kind {
            CommandKind::Read => {
                if self.runtime[i].state != SensorState::Ready {
                    return Err(Error::InvalidState);
                }
                self.perform_read(i, now_ms)
            }
            CommandKind::Reset => {
                if self.runtime[i].state == SensorState::Disabled {
                    return Err(Error::InvalidState);
                }
                self.drivers[i].reset()?;
                // Reset does not clear validity or the archive
                self.runtime[i].error_count = 0;
                self.runtime[i].recovery = Recovery::default();
                self.enter_warmup(i, now_ms);
                Ok(())
            }
            CommandKind::Calibrate(value) => {
                if self.runtime[i].state != SensorState::Ready {
                    return Err(Error::InvalidState);
                }
                self.drivers[i].calibrate(value)
            }
            CommandKind::Enable => {
                if self.runtime[i].state != SensorState::Disabled {
                    return Err(Error::InvalidState);
                }
                self.bring_up(i, now_ms)
            }
            CommandKind::Disable => {
                if self.runtime[i].state == SensorState::Disabled {
                    return Ok(());
                }
                self.drivers[i].disable()?;
                self.runtime[i].state = SensorState::Disabled;
                let view = SensorRuntimeView {
                    state: SensorState::Disabled,
                    warmup_deadline_ms: self.runtime[i].warmup_deadline_ms,
                    last_read_ms: self.runtime[i].last_read_ms,
                    error_count: self.runtime[i].error_count,
                };
                // Validity drops in the same lock hold as the state change
                self.state.with(|s| {
                    s.invalidate_sensor(sensor);
                    s.sensors[i] = view;
                });
                info!("{} disabled", sensor.name());
                Ok(())
            }
            CommandKind::SetCadence(ms) => {
                self.schedule[i].cadence_ms = ms;
                self.schedule[i].enabled = ms > 0;
                self.schedule[i].next_due_ms = now_ms + u64::from(ms);
                self.schedule[i].from_store = true;
                self.settings.store_cadence_ms(sensor, ms);
                info!("{} cadence set to {ms}ms", sensor.name());
                Ok(())
            }
        }
    }

    fn cadence_report(&self) -> CadenceReport {
        let mut cadence_ms = [0u32; SENSOR_COUNT];
        let mut from_store = [false; SENSOR_COUNT];
        for i in 0..SENSOR_COUNT {
            cadence_ms[i] = self.schedule[i].cadence_ms;
            from_store[i] = self.schedule[i].from_store;
        }
        CadenceReport {
            cadence_ms,
            from_store,
        }
    }

    fn runtime_info(&self, sensor: SensorId, now_ms: u64) -> RuntimeInfo {
        let i = sensor.index();
        let rt = &self.runtime[i];
        let warmup_remaining_s = if rt.state == SensorState::Warming {
            rt.warmup_deadline_ms.saturating_sub(now_ms) / 1000
        } else {
            0
        };
        let last_read_age_s = if rt.last_read_ms == 0 {
            None
        } else {
            Some(now_ms.saturating_sub(rt.last_read_ms) / 1000)
        };
        RuntimeInfo {
            sensor,
            state: rt.state,
            warmup_remaining_s,
            last_read_age_s,
            error_count: rt.error_count,
            retry_count: rt.recovery.retry_count,
            next_retry_delay_ms: rt.recovery.next_retry_delay_ms,
        }
    }
}
