//! Agent configuration

use std::time::Duration;

/// Canonical control-loop period in seconds
pub const LOAD_TIMEOUT_SECS: u64 = 15;

/// Configuration for a load-balancing agent
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Time between control-loop iterations
    pub tick_period: Duration,

    /// Identifier of the GRID-link device whose signed power is the
    /// gateway flow
    pub gateway_device_id: String,

    /// Multiplier applied to raw DRER/DESD/LOAD readings to yield kW
    pub unit_scale: f64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            tick_period: Duration::from_secs(LOAD_TIMEOUT_SECS),
            gateway_device_id: "grid3".to_string(),
            unit_scale: 1000.0,
        }
    }
}

impl AgentConfig {
    /// Set the control-loop period
    pub fn with_tick_period(mut self, period: Duration) -> Self {
        self.tick_period = period;
        self
    }

    /// Set the gateway device identifier
    pub fn with_gateway_device(mut self, id: impl Into<String>) -> Self {
        self.gateway_device_id = id.into();
        self
    }

    /// Set the raw-reading-to-kW multiplier
    pub fn with_unit_scale(mut self, scale: f64) -> Self {
        self.unit_scale = scale;
        self
    }
}
