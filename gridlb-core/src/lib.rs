//! GridLB Core Library
//!
//! Distributed drafting load balancer for microgrid nodes.
//! Each node samples its physical devices, classifies itself as a supplier
//! or demander of power, and negotiates power migrations with its peers
//! using the Ni-Xu-Gendreau drafting protocol over an abstract transport.

pub mod agent;
pub mod classifier;
pub mod config;
pub mod device;
pub mod error;
pub mod peers;
pub mod types;
pub mod view;

pub use agent::LbAgent;
pub use classifier::{classify, Classification};
pub use config::AgentConfig;
pub use device::{DeviceManager, DeviceType, PhysicalDevice, SimDevice};
pub use error::{DeviceError, TransportError};
pub use peers::{Peer, PeerConnector, PeerHandle, PeerRegistry};
pub use types::*;
pub use view::{DeviceSnapshot, DeviceView};
