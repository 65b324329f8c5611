//! Host simulator for the IAQ monitor pipeline.
//!
//! Stands in for the hardware the way a bench rig would: every sensor port
//! is simulated against one drifting indoor environment, and the real
//! coordinator/fusion/metrics stack runs on top, so the whole lifecycle
//! (warm-up, staggered reads, failures, recovery, metrics) can be watched
//! from a terminal.
//!
//! Usage: cargo run -p iaqmon-sim -- --interval-s 5
//!        cargo run -p iaqmon-sim -- --json | jq .metrics

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{Local, Timelike};
use clap::Parser;
use log::{info, warn};

use iaqmon_core::clock::{boot_millis, WallClock};
use iaqmon_core::driver::{AmbientConditions, Measurement, SensorPort};
use iaqmon_core::error::Error;
use iaqmon_core::pipeline;
use iaqmon_core::sensors::SensorId;
use iaqmon_core::watchdog;
use iaqmon_core::{JsonFileStore, SettingsHandle, Snapshot};

#[derive(Parser, Debug)]
#[command(name = "iaqmon-sim", about = "Run the IAQ pipeline over simulated sensors")]
struct Args {
    /// Seconds between snapshot prints
    #[arg(long, default_value_t = 5)]
    interval_s: u64,

    /// Print JSON snapshots instead of the status block
    #[arg(long)]
    json: bool,

    /// Settings file path
    #[arg(long, default_value = "iaqmon-settings.json")]
    settings: String,

    /// Per-read fault probability in permille (0 = healthy sensors)
    #[arg(long, default_value_t = 0)]
    fault_permille: u32,

    /// PRNG seed for the simulated environment
    #[arg(long, default_value_t = 0x5eed_1a9)]
    seed: u64,
}

/// xorshift64*: deterministic and plenty for a bench simulator.
struct Rng(u64);

impl Rng {
    fn next(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x.wrapping_mul(0x2545_f491_4f6c_dd1d)
    }

    /// Uniform in [-1.0, 1.0].
    fn jitter(&mut self) -> f32 {
        #[allow(clippy::cast_precision_loss)]
        let unit = (self.next() >> 11) as f32 / (1u64 << 53) as f32;
        unit * 2.0 - 1.0
    }

    fn chance(&mut self, permille: u32) -> bool {
        permille > 0 && self.next() % 1000 < u64::from(permille)
    }
}

/// One coherent indoor environment all sensors observe.
struct SimWorld {
    rng: Rng,
    fault_permille: u32,
    temp_c: f32,
    rh_pct: f32,
    pressure_pa: f32,
    co2_ppm: f32,
    pm25: f32,
    voc_index: f32,
    nox_index: f32,
}

impl SimWorld {
    fn new(seed: u64, fault_permille: u32) -> Self {
        Self {
            rng: Rng(seed | 1),
            fault_permille,
            temp_c: 22.0,
            rh_pct: 48.0,
            pressure_pa: 101_100.0,
            co2_ppm: 650.0,
            pm25: 6.0,
            voc_index: 95.0,
            nox_index: 1.0,
        }
    }

    /// Random-walk the environment. Called once per sample so sensors see a
    /// slowly moving room, not white noise.
    fn step(&mut self) {
        self.temp_c = (self.temp_c + self.rng.jitter() * 0.05).clamp(15.0, 30.0);
        self.rh_pct = (self.rh_pct + self.rng.jitter() * 0.2).clamp(25.0, 75.0);
        self.pressure_pa = (self.pressure_pa + self.rng.jitter() * 5.0).clamp(98_000.0, 103_000.0);
        self.co2_ppm = (self.co2_ppm + self.rng.jitter() * 4.0).clamp(420.0, 2200.0);
        self.pm25 = (self.pm25 + self.rng.jitter() * 0.3).clamp(0.5, 80.0);
        self.voc_index = (self.voc_index + self.rng.jitter() * 2.0).clamp(1.0, 500.0);
        self.nox_index = (self.nox_index + self.rng.jitter() * 0.5).clamp(1.0, 500.0);
    }

    fn sample(&mut self, sensor: SensorId) -> Result<Measurement, Error> {
        if self.rng.chance(self.fault_permille) {
            return Err(Error::Bus("simulated fault".to_string()));
        }
        self.step();
        Ok(match sensor {
            SensorId::Mcu => Measurement::McuTemp {
                temp_c: self.temp_c + 12.0 + self.rng.jitter(),
            },
            SensorId::Sht45 => Measurement::TempHumidity {
                temp_c: self.temp_c + self.rng.jitter() * 0.1,
                rh_pct: self.rh_pct + self.rng.jitter() * 0.5,
            },
            SensorId::Bmp280 => Measurement::Pressure {
                pressure_pa: self.pressure_pa + self.rng.jitter() * 10.0,
            },
            SensorId::Sgp41 => {
                // Indices are clamped to 1..=500 above, so the casts are safe
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let (voc_index, nox_index) =
                    (self.voc_index.round() as u16, self.nox_index.round() as u16);
                Measurement::GasIndices { voc_index, nox_index }
            }
            SensorId::Pms5003 => {
                let pm25 = (self.pm25 + self.rng.jitter()).max(0.0);
                Measurement::Particulates {
                    pm1: pm25 * 0.75,
                    pm25,
                    pm10: pm25 * 1.6,
                }
            }
            SensorId::S8 => Measurement::Co2 {
                co2_ppm: self.co2_ppm + self.rng.jitter() * 5.0,
            },
        })
    }
}

/// Simulated port: one sensor's view of the shared world.
struct SimPort {
    sensor: SensorId,
    world: Arc<Mutex<SimWorld>>,
    powered: bool,
}

impl SensorPort for SimPort {
    fn set_power(&mut self, on: bool) -> Result<(), Error> {
        self.powered = on;
        Ok(())
    }

    fn sample(&mut self, _env: &AmbientConditions) -> Result<Measurement, Error> {
        if !self.powered {
            return Err(Error::InvalidState);
        }
        self.world.lock().unwrap().sample(self.sensor)
    }
}

/// Wall clock backed by the host's local time; a real device would gate this
/// on SNTP sync, a host is always synchronized.
struct SystemLocalClock;

impl WallClock for SystemLocalClock {
    fn local_minutes(&self) -> Option<u16> {
        let now = Local::now();
        #[allow(clippy::cast_possible_truncation)]
        let minutes = (now.hour() * 60 + now.minute()) as u16;
        Some(minutes)
    }
}

fn fmt_opt(value: f32, unit: &str) -> String {
    if value.is_nan() {
        "--".to_string()
    } else {
        format!("{value:.1}{unit}")
    }
}

fn print_status(snapshot: &Snapshot) {
    println!("── uptime {:>5}s ──────────────────────────────", snapshot.uptime_s);
    for (name, status) in &snapshot.sensors {
        let age = status
            .last_read_age_s
            .map_or("never".to_string(), |s| format!("{s}s ago"));
        println!(
            "  {name:<8} {:<9} errors={} last_read={age}",
            format!("{:?}", status.state).to_lowercase(),
            status.error_count,
        );
    }
    println!(
        "  air     temp={} rh={} co2={} pm2.5={}",
        fmt_opt(snapshot.fused.temp_c, "C"),
        fmt_opt(snapshot.fused.rh_pct, "%"),
        fmt_opt(snapshot.fused.co2_ppm, "ppm"),
        fmt_opt(snapshot.fused.pm25, "ug/m3"),
    );
    let aqi = if snapshot.metrics.aqi.value == u16::MAX {
        "--".to_string()
    } else {
        format!("{} ({:?})", snapshot.metrics.aqi.value, snapshot.metrics.aqi.category)
    };
    println!(
        "  metrics aqi={aqi} comfort={:?} co2_score={:?} iaq={:?} trend={:?}",
        snapshot.metrics.comfort.score,
        snapshot.metrics.co2_score,
        snapshot.metrics.overall_iaq_score,
        snapshot.metrics.pressure_trend.direction,
    );
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    info!("Starting iaqmon simulator (faults: {}‰)", args.fault_permille);

    let settings = match JsonFileStore::open(&args.settings) {
        Ok(store) => SettingsHandle::new(Box::new(store)),
        Err(e) => {
            warn!("Settings store unavailable ({e}), running volatile");
            SettingsHandle::in_memory()
        }
    };

    let world = Arc::new(Mutex::new(SimWorld::new(args.seed, args.fault_permille)));
    let ports = SensorId::ALL.map(|sensor| {
        Box::new(SimPort {
            sensor,
            world: world.clone(),
            powered: false,
        }) as Box<dyn SensorPort>
    });

    let pipeline = pipeline::start(ports, settings, Some(Box::new(SystemLocalClock)));

    loop {
        std::thread::sleep(Duration::from_secs(args.interval_s.max(1)));

        let snapshot = Snapshot::capture(&pipeline.state, boot_millis());
        if args.json {
            match serde_json::to_string(&snapshot) {
                Ok(json) => println!("{json}"),
                Err(e) => warn!("Snapshot serialization failed: {e}"),
            }
        } else {
            print_status(&snapshot);
        }

        for task in watchdog::starved_tasks() {
            warn!("Watchdog: task '{task}' is starved");
        }
    }
}
