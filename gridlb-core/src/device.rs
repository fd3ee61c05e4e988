//! Physical device abstraction
//!
//! Devices are owned by an external simulator; the agent holds
//! read-and-actuate references through the `PhysicalDevice` trait and looks
//! them up in a `DeviceManager`. A settings-map simulation device is
//! provided for the demo binary and for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::error::DeviceError;

/// Kinds of physical devices attached to a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceType {
    /// Distributed renewable energy resource (e.g. PV panel)
    Drer,
    /// Distributed energy storage device (battery)
    Desd,
    /// Power consumer
    Load,
    /// Diesel generator, a dispatchable source
    Dg,
    /// AC link to the main grid
    Grid,
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceType::Drer => write!(f, "DRER"),
            DeviceType::Desd => write!(f, "DESD"),
            DeviceType::Load => write!(f, "LOAD"),
            DeviceType::Dg => write!(f, "DG"),
            DeviceType::Grid => write!(f, "GRID"),
        }
    }
}

/// A physical device shared with the external device manager.
///
/// `lock` guards a multi-step read or actuate sequence against the
/// simulator side; callers hold the guard for the duration of the sequence.
pub trait PhysicalDevice: Send + Sync {
    fn id(&self) -> &str;

    fn device_type(&self) -> DeviceType;

    /// Signed power reading in raw simulator units
    fn power_level(&self) -> Result<f64, DeviceError>;

    fn turn_on(&self) -> Result<(), DeviceError>;

    fn turn_off(&self) -> Result<(), DeviceError>;

    /// Take the device lock
    fn lock(&self) -> MutexGuard<'_, ()>;

    /// Take the device lock without blocking
    fn try_lock(&self) -> Option<MutexGuard<'_, ()>>;
}

/// Registry of the devices attached to this node
#[derive(Default)]
pub struct DeviceManager {
    devices: std::collections::BTreeMap<String, Arc<dyn PhysicalDevice>>,
}

impl DeviceManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a device under its own identifier
    pub fn register(&mut self, device: Arc<dyn PhysicalDevice>) {
        self.devices.insert(device.id().to_string(), device);
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn PhysicalDevice>> {
        self.devices.get(id).cloned()
    }

    pub fn exists(&self, id: &str) -> bool {
        self.devices.contains_key(id)
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Iterate devices in identifier order
    pub fn iterate(&self) -> impl Iterator<Item = (&String, &Arc<dyn PhysicalDevice>)> {
        self.devices.iter()
    }
}

/// Simulated device backed by a settings map.
///
/// The grid-link breaker setting is inverted with respect to the on/off
/// verbs: `turn_on` writes `onOffSwitch = 0` (breaker closed, power flows)
/// and `turn_off` writes `1`.
pub struct SimDevice {
    id: String,
    device_type: DeviceType,
    settings: Mutex<HashMap<String, f64>>,
    device_lock: Mutex<()>,
    failing: AtomicBool,
}

/// Settings key for the signed power reading
pub const POWER_LEVEL: &str = "powerLevel";

/// Settings key for the breaker switch
pub const ON_OFF_SWITCH: &str = "onOffSwitch";

impl SimDevice {
    pub fn new(id: impl Into<String>, device_type: DeviceType) -> Self {
        let mut settings = HashMap::new();
        settings.insert(POWER_LEVEL.to_string(), 0.0);
        // Breaker starts open: no power flowing through the link
        settings.insert(ON_OFF_SWITCH.to_string(), 1.0);
        Self {
            id: id.into(),
            device_type,
            settings: Mutex::new(settings),
            device_lock: Mutex::new(()),
            failing: AtomicBool::new(false),
        }
    }

    /// Create a device with an initial power reading
    pub fn with_power(id: impl Into<String>, device_type: DeviceType, power: f64) -> Self {
        let device = Self::new(id, device_type);
        device.set_power(power);
        device
    }

    /// Overwrite the power reading, as the external simulator would
    pub fn set_power(&self, power: f64) {
        self.settings.lock().insert(POWER_LEVEL.to_string(), power);
    }

    /// Read a raw setting
    pub fn setting(&self, key: &str) -> Option<f64> {
        self.settings.lock().get(key).copied()
    }

    /// Write a raw setting
    pub fn set(&self, key: impl Into<String>, value: f64) {
        self.settings.lock().insert(key.into(), value);
    }

    /// Make every read fail, as on a simulator disconnect
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl PhysicalDevice for SimDevice {
    fn id(&self) -> &str {
        &self.id
    }

    fn device_type(&self) -> DeviceType {
        self.device_type
    }

    fn power_level(&self) -> Result<f64, DeviceError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(DeviceError::Read {
                id: self.id.clone(),
                reason: "simulator disconnected".to_string(),
            });
        }
        Ok(self.setting(POWER_LEVEL).unwrap_or(0.0))
    }

    fn turn_on(&self) -> Result<(), DeviceError> {
        let value = match self.device_type {
            DeviceType::Grid => 0.0,
            _ => 1.0,
        };
        self.set(ON_OFF_SWITCH, value);
        Ok(())
    }

    fn turn_off(&self) -> Result<(), DeviceError> {
        let value = match self.device_type {
            DeviceType::Grid => 1.0,
            _ => 0.0,
        };
        self.set(ON_OFF_SWITCH, value);
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.device_lock.lock()
    }

    fn try_lock(&self) -> Option<MutexGuard<'_, ()>> {
        self.device_lock.try_lock()
    }
}
