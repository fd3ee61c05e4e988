//! Load classification
//!
//! Pure function from a device snapshot to the node's load state. The
//! gateway flow shifts the comparison: power already being donated or
//! received counts against the local surplus or deficit.

use crate::types::LoadState;
use crate::view::DeviceSnapshot;

/// Outcome of classifying one snapshot
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Classification {
    Supply,
    Normal,
    /// Load exceeds available generation by `deficit_kw`
    Demand { deficit_kw: f64 },
}

impl Classification {
    pub fn state(&self) -> LoadState {
        match self {
            Classification::Supply => LoadState::Supply,
            Classification::Normal => LoadState::Normal,
            Classification::Demand { .. } => LoadState::Demand,
        }
    }

    /// The demand magnitude; zero unless classified DEMAND
    pub fn deficit_kw(&self) -> f64 {
        match self {
            Classification::Demand { deficit_kw } => *deficit_kw,
            _ => 0.0,
        }
    }
}

/// Classify a node from its device snapshot.
///
/// With no gateway flow, generation against load decides directly. While
/// donating, the outbound flow is subtracted from generation before the
/// comparison; while receiving, the inbound flow must cover the load or
/// the node is still in demand. Degenerate comparisons resolve to NORMAL.
pub fn classify(snap: &DeviceSnapshot) -> Classification {
    let gen = snap.net_gen;
    let load = snap.net_load;
    let m = snap.gateway_flow;

    if m == 0.0 {
        if gen > load {
            Classification::Supply
        } else if gen < load {
            Classification::Demand { deficit_kw: load - gen }
        } else {
            Classification::Normal
        }
    } else if m > 0.0 {
        // Donating to the main grid
        if gen - m > load {
            Classification::Supply
        } else {
            Classification::Normal
        }
    } else {
        // Receiving from the main grid
        if gen - m >= load {
            Classification::Normal
        } else {
            Classification::Demand { deficit_kw: load - (gen - m) }
        }
    }
}
