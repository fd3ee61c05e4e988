//! Error types for device access and peer transport

use crate::types::NodeId;
use thiserror::Error;

/// Failures reading from or actuating a physical device
#[derive(Debug, Error)]
pub enum DeviceError {
    /// No device registered under this identifier
    #[error("device {0} not found")]
    NotFound(String),

    /// The device reading could not be obtained
    #[error("device {id} read failed: {reason}")]
    Read { id: String, reason: String },

    /// Switching the device on or off failed
    #[error("device {id} actuation failed: {reason}")]
    Actuate { id: String, reason: String },
}

/// Failures on the peer transport
#[derive(Debug, Error)]
pub enum TransportError {
    /// No route to the peer
    #[error("peer {0} unreachable")]
    Unreachable(NodeId),

    /// The send itself failed
    #[error("send to {peer} failed: {reason}")]
    Send { peer: NodeId, reason: String },
}
