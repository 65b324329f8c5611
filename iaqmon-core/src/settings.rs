//! Typed settings persistence.
//!
//! A namespaced key-value store holds the per-sensor cadences and the fusion
//! coefficients. Boot behavior is read-or-default-and-write; runtime changes
//! are written immediately. A missing or corrupted value falls back to its
//! default (logged), since configuration must never stop the pipeline.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde_json::Value;

use crate::sensors::SensorId;

/// Namespace for per-sensor cadences, keys `cad_<sensor>`.
pub const NS_SENSOR: &str = "sensor_cfg";
/// Namespace for fusion coefficients and the ABC baseline.
pub const NS_FUSION: &str = "fusion_cfg";

pub const KEY_ABC_BASELINE: &str = "abc_baseline_ppm";
pub const KEY_PM_RH_A: &str = "pm_rh_a";
pub const KEY_PM_RH_B: &str = "pm_rh_b";
pub const KEY_TEMP_OFFSET: &str = "temp_self_heat_offset_c";

/// Default humidity-correction coefficients (see the fusion engine).
pub const DEFAULT_PM_RH_A: f32 = iaqmon_air_lib::pm::DEFAULT_RH_COEFFICIENTS.0;
pub const DEFAULT_PM_RH_B: f32 = iaqmon_air_lib::pm::DEFAULT_RH_COEFFICIENTS.1;
/// Default self-heating offset; calibrated per enclosure, so zero until set.
pub const DEFAULT_TEMP_OFFSET_C: f32 = 0.0;

/// Namespaced key-value backend. Values are JSON scalars; typed access and
/// defaulting live in [`SettingsHandle`].
pub trait KvStore: Send {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<Value>>;
    fn set(&mut self, namespace: &str, key: &str, value: Value) -> Result<()>;
}

/// Volatile store for tests and clean-slate runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: BTreeMap<(String, String), Value>,
}

impl KvStore for MemoryStore {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<Value>> {
        Ok(self
            .entries
            .get(&(namespace.to_string(), key.to_string()))
            .cloned())
    }

    fn set(&mut self, namespace: &str, key: &str, value: Value) -> Result<()> {
        self.entries
            .insert((namespace.to_string(), key.to_string()), value);
        Ok(())
    }
}

/// File-backed store: one JSON object per namespace, whole blob rewritten on
/// every set. Corrupt content is discarded with a warning.
pub struct JsonFileStore {
    path: PathBuf,
    root: BTreeMap<String, BTreeMap<String, Value>>,
}

impl JsonFileStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let root = match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(root) => {
                    debug!("Loaded settings from {}", path.display());
                    root
                }
                Err(e) => {
                    warn!("Corrupt settings file {}: {e}, starting empty", path.display());
                    BTreeMap::new()
                }
            },
            Err(_) => {
                info!("No settings file at {}, starting empty", path.display());
                BTreeMap::new()
            }
        };
        Ok(Self { path, root })
    }

    fn flush(&self) -> Result<()> {
        let json = serde_json::to_vec_pretty(&self.root)?;
        std::fs::write(&self.path, json)
            .with_context(|| format!("writing settings to {}", self.path.display()))
    }
}

impl KvStore for JsonFileStore {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<Value>> {
        Ok(self.root.get(namespace).and_then(|ns| ns.get(key)).cloned())
    }

    fn set(&mut self, namespace: &str, key: &str, value: Value) -> Result<()> {
        self.root
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value);
        self.flush()
    }
}

/// Fusion coefficients as loaded at boot.
#[derive(Debug, Clone, Copy)]
pub struct FusionSettings {
    pub abc_baseline_ppm: Option<u16>,
    pub pm_rh_a: f32,
    pub pm_rh_b: f32,
    pub temp_self_heat_offset_c: f32,
}

/// Shared handle over a store. The inner mutex must never be taken while the
/// shared-state lock is held; callers persist after releasing it.
#[derive(Clone)]
pub struct SettingsHandle {
    store: Arc<Mutex<Box<dyn KvStore>>>,
}

impl SettingsHandle {
    #[must_use]
    pub fn new(store: Box<dyn KvStore>) -> Self {
        Self {
            store: Arc::new(Mutex::new(store)),
        }
    }

    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryStore::default()))
    }

    fn cadence_key(sensor: SensorId) -> String {
        format!("cad_{}", sensor.name())
    }

    /// Load a sensor's cadence. Returns the value and whether it came from
    /// the store; a missing or unreadable entry is replaced with the default
    /// (read-or-default-and-write).
    pub fn load_cadence_ms(&self, sensor: SensorId) -> (u32, bool) {
        let key = Self::cadence_key(sensor);
        let default = sensor.default_cadence_ms();
        let mut store = self.store.lock().unwrap();
        match store.get(NS_SENSOR, &key) {
            Ok(Some(value)) => {
                if let Some(ms) = value.as_u64().and_then(|v| u32::try_from(v).ok()) {
                    return (ms, true);
                }
                warn!("Corrupt cadence for {}: {value}, using default", sensor.name());
            }
            Ok(None) => {}
            Err(e) => warn!("Failed to read cadence for {}: {e}", sensor.name()),
        }
        if let Err(e) = store.set(NS_SENSOR, &key, Value::from(default)) {
            warn!("Failed to write default cadence for {}: {e}", sensor.name());
        }
        (default, false)
    }

    pub fn store_cadence_ms(&self, sensor: SensorId, ms: u32) {
        let key = Self::cadence_key(sensor);
        let mut store = self.store.lock().unwrap();
        if let Err(e) = store.set(NS_SENSOR, &key, Value::from(ms)) {
            warn!("Failed to persist cadence for {}: {e}", sensor.name());
        } else {
            debug!("Persisted cadence {}={ms}ms", sensor.name());
        }
    }

    fn get_f32(&self, store: &dyn KvStore, key: &str, default: f32) -> f32 {
        match store.get(NS_FUSION, key) {
            Ok(Some(value)) => match value.as_f64() {
                #[allow(clippy::cast_possible_truncation)]
                Some(v) => v as f32,
                None => {
                    warn!("Corrupt fusion setting {key}: {value}, using default");
                    default
                }
            },
            Ok(None) => default,
            Err(e) => {
                warn!("Failed to read fusion setting {key}: {e}");
                default
            }
        }
    }

    /// Load the fusion coefficients, defaulting anything missing.
    #[must_use]
    pub fn load_fusion(&self) -> FusionSettings {
        let store = self.store.lock().unwrap();
        let abc_baseline_ppm = match store.get(NS_FUSION, KEY_ABC_BASELINE) {
            Ok(Some(value)) => value.as_u64().and_then(|v| u16::try_from(v).ok()),
            Ok(None) => None,
            Err(e) => {
                warn!("Failed to read ABC baseline: {e}");
                None
            }
        };
        FusionSettings {
            abc_baseline_ppm,
            pm_rh_a: self.get_f32(store.as_ref(), KEY_PM_RH_A, DEFAULT_PM_RH_A),
            pm_rh_b: self.get_f32(store.as_ref(), KEY_PM_RH_B, DEFAULT_PM_RH_B),
            temp_self_heat_offset_c: self.get_f32(
                store.as_ref(),
                KEY_TEMP_OFFSET,
                DEFAULT_TEMP_OFFSET_C,
            ),
        }
    }

    pub fn store_abc_baseline(&self, ppm: u16) {
        let mut store = self.store.lock().unwrap();
        if let Err(e) = store.set(NS_FUSION, KEY_ABC_BASELINE, Value::from(ppm)) {
            warn!("Failed to persist ABC baseline: {e}");
        } else {
            info!("Persisted ABC baseline {ppm} ppm");
        }
    }

    pub fn store_temp_offset(&self, offset_c: f32) {
        let mut store = self.store.lock().unwrap();
        if let Err(e) = store.set(NS_FUSION, KEY_TEMP_OFFSET, Value::from(f64::from(offset_c))) {
            warn!("Failed to persist self-heat offset: {e}");
        }
    }
}
