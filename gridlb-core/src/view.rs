//! Read-only projection over the node's devices, plus the migration
//! actuator on its grid link.

use std::sync::Arc;

use tracing::{error, info};

use crate::device::{DeviceManager, DeviceType};
use crate::error::DeviceError;

/// Aggregate device readings for one control-loop tick, in kW
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DeviceSnapshot {
    /// Summed DRER generation
    pub net_gen: f64,
    /// Summed DESD storage
    pub net_storage: f64,
    /// Summed LOAD consumption
    pub net_load: f64,
    /// Signed power of the gateway device; positive when donating to the
    /// main grid, negative when receiving
    pub gateway_flow: f64,
    pub drer_count: usize,
    pub desd_count: usize,
    pub load_count: usize,
}

/// Projection over the registered devices of one node
pub struct DeviceView {
    devices: Arc<DeviceManager>,
    gateway_id: String,
    unit_scale: f64,
    last: DeviceSnapshot,
}

impl DeviceView {
    pub fn new(devices: Arc<DeviceManager>, gateway_id: impl Into<String>, unit_scale: f64) -> Self {
        Self {
            devices,
            gateway_id: gateway_id.into(),
            unit_scale,
            last: DeviceSnapshot::default(),
        }
    }

    pub fn device_count(&self) -> usize {
        self.devices.device_count()
    }

    /// Aggregate the current device readings.
    ///
    /// A missing gateway or any failed reading leaves the previous
    /// snapshot in force; the next tick retries.
    pub fn snapshot(&mut self) -> DeviceSnapshot {
        let mut snap = DeviceSnapshot::default();

        for (id, device) in self.devices.iterate() {
            let bucket = match device.device_type() {
                DeviceType::Drer => &mut snap.net_gen,
                DeviceType::Desd => &mut snap.net_storage,
                DeviceType::Load => &mut snap.net_load,
                DeviceType::Dg | DeviceType::Grid => continue,
            };
            match device.power_level() {
                Ok(level) => *bucket += level,
                Err(e) => {
                    error!("Snapshot: reading {} failed ({}), keeping previous snapshot", id, e);
                    return self.last;
                }
            }
            match device.device_type() {
                DeviceType::Drer => snap.drer_count += 1,
                DeviceType::Desd => snap.desd_count += 1,
                DeviceType::Load => snap.load_count += 1,
                _ => {}
            }
        }

        snap.net_gen *= self.unit_scale;
        snap.net_storage *= self.unit_scale;
        snap.net_load *= self.unit_scale;

        let gateway = match self.devices.get(&self.gateway_id) {
            Some(device) => device,
            None => {
                error!(
                    "Snapshot: gateway device {} missing, keeping previous snapshot",
                    self.gateway_id
                );
                return self.last;
            }
        };
        match gateway.power_level() {
            Ok(flow) => snap.gateway_flow = truncate_milli_kw(flow),
            Err(e) => {
                error!("Snapshot: reading gateway {} failed ({}), keeping previous snapshot", self.gateway_id, e);
                return self.last;
            }
        }

        self.last = snap;
        snap
    }

    /// Close the grid-link breaker so surplus power flows out to the main
    /// grid. Safe to repeat within a drafting round.
    pub fn actuate_donate(&self) -> Result<(), DeviceError> {
        self.close_grid_link("donating")
    }

    /// Close the grid-link breaker so migrated power flows in from the
    /// main grid. The simulator treats inbound flow symmetrically.
    pub fn actuate_receive(&self) -> Result<(), DeviceError> {
        self.close_grid_link("receiving")
    }

    fn close_grid_link(&self, direction: &str) -> Result<(), DeviceError> {
        let gateway = self
            .devices
            .get(&self.gateway_id)
            .ok_or_else(|| DeviceError::NotFound(self.gateway_id.clone()))?;

        // Hold the device lock across the switch write
        let _guard = gateway.lock();
        gateway.turn_on()?;
        info!("Migration: grid link {} closed, {} power", self.gateway_id, direction);
        Ok(())
    }
}

/// Truncate toward zero at millikilowatt precision, so noise at the
/// boundary cannot oscillate the classification.
fn truncate_milli_kw(value: f64) -> f64 {
    if value > 0.0 {
        (value * 1000.0).floor() / 1000.0
    } else {
        (value * 1000.0).ceil() / 1000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{SimDevice, ON_OFF_SWITCH};

    fn grid_fixture(gateway_flow: f64) -> (Arc<DeviceManager>, Arc<SimDevice>) {
        let mut manager = DeviceManager::new();
        manager.register(Arc::new(SimDevice::with_power("solar1", DeviceType::Drer, 5.0)));
        manager.register(Arc::new(SimDevice::with_power("battery1", DeviceType::Desd, 2.0)));
        manager.register(Arc::new(SimDevice::with_power("load1", DeviceType::Load, 3.0)));
        let grid = Arc::new(SimDevice::with_power("grid3", DeviceType::Grid, gateway_flow));
        manager.register(grid.clone());
        (Arc::new(manager), grid)
    }

    #[test]
    fn test_snapshot_sums_by_type() {
        let (manager, _grid) = grid_fixture(0.5);
        let mut view = DeviceView::new(manager, "grid3", 1.0);

        let snap = view.snapshot();
        assert_eq!(snap.net_gen, 5.0);
        assert_eq!(snap.net_storage, 2.0);
        assert_eq!(snap.net_load, 3.0);
        assert_eq!(snap.gateway_flow, 0.5);
        assert_eq!((snap.drer_count, snap.desd_count, snap.load_count), (1, 1, 1));
    }

    #[test]
    fn test_snapshot_applies_unit_scale() {
        let (manager, _grid) = grid_fixture(0.0);
        let mut view = DeviceView::new(manager, "grid3", 1000.0);

        let snap = view.snapshot();
        assert_eq!(snap.net_gen, 5000.0);
        assert_eq!(snap.net_load, 3000.0);
        // Gateway flow is consumed raw
        assert_eq!(snap.gateway_flow, 0.0);
    }

    #[test]
    fn test_gateway_flow_truncates_toward_zero() {
        assert_eq!(truncate_milli_kw(0.12345), 0.123);
        assert_eq!(truncate_milli_kw(-0.12345), -0.123);
        assert_eq!(truncate_milli_kw(0.0), 0.0);
        assert_eq!(truncate_milli_kw(0.0004), 0.0);
        assert_eq!(truncate_milli_kw(-0.0004), 0.0);
    }

    #[test]
    fn test_failed_read_keeps_previous_snapshot() {
        let mut manager = DeviceManager::new();
        let solar = Arc::new(SimDevice::with_power("solar1", DeviceType::Drer, 5.0));
        manager.register(solar.clone());
        manager.register(Arc::new(SimDevice::with_power("load1", DeviceType::Load, 3.0)));
        manager.register(Arc::new(SimDevice::with_power("grid3", DeviceType::Grid, 0.0)));
        let mut view = DeviceView::new(Arc::new(manager), "grid3", 1.0);

        let first = view.snapshot();
        assert_eq!(first.net_gen, 5.0);

        // A disconnect mid-run must not zero the classification inputs
        solar.set_failing(true);
        let second = view.snapshot();
        assert_eq!(second, first);

        solar.set_failing(false);
        solar.set_power(6.0);
        assert_eq!(view.snapshot().net_gen, 6.0);
    }

    #[test]
    fn test_missing_gateway_keeps_previous_snapshot() {
        let mut manager = DeviceManager::new();
        manager.register(Arc::new(SimDevice::with_power("solar1", DeviceType::Drer, 5.0)));
        let mut view = DeviceView::new(Arc::new(manager), "grid3", 1.0);

        assert_eq!(view.snapshot(), DeviceSnapshot::default());
    }

    #[test]
    fn test_actuators_close_the_breaker() {
        let (manager, grid) = grid_fixture(0.0);
        let view = DeviceView::new(manager, "grid3", 1.0);

        assert_eq!(grid.setting(ON_OFF_SWITCH), Some(1.0));
        view.actuate_donate().unwrap();
        assert_eq!(grid.setting(ON_OFF_SWITCH), Some(0.0));

        // Idempotent within a round
        view.actuate_donate().unwrap();
        view.actuate_receive().unwrap();
        assert_eq!(grid.setting(ON_OFF_SWITCH), Some(0.0));
    }
}
