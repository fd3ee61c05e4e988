//! Core types for the drafting protocol

use serde::{Deserialize, Serialize};

/// Unique identifier for a microgrid node
pub type NodeId = String;

/// Load classification of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadState {
    /// Local generation exceeds local load
    Supply,
    /// Local load exceeds local generation
    Demand,
    /// Generation and load are balanced
    Normal,
    /// Remote peer whose state has not been observed yet
    Unknown,
}

impl std::fmt::Display for LoadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadState::Supply => write!(f, "SUPPLY"),
            LoadState::Demand => write!(f, "DEMAND"),
            LoadState::Normal => write!(f, "NORMAL"),
            LoadState::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Drafting protocol messages, routed under the `lb` tag
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "lb")]
pub enum LbMessage {
    /// Group roster replacement from the leader
    #[serde(rename = "peerList")]
    PeerList {
        source: NodeId,
        /// Comma-joined member UUIDs
        peers: String,
    },

    /// Sender has entered DEMAND
    #[serde(rename = "demand")]
    Demand { source: NodeId },

    /// Sender has entered NORMAL
    #[serde(rename = "normal")]
    Normal { source: NodeId },

    /// Sender has entered SUPPLY
    #[serde(rename = "supply")]
    Supply { source: NodeId },

    /// A supply node solicits takers for its surplus
    #[serde(rename = "request")]
    Request { source: NodeId },

    /// A demand node accepts a draft request
    #[serde(rename = "yes")]
    Yes { source: NodeId },

    /// Recipient declines a draft request
    #[serde(rename = "no")]
    No { source: NodeId },

    /// Supplier confirms the draft to a single accepter
    #[serde(rename = "drafting")]
    Drafting { source: NodeId },

    /// Demander acknowledges and requests `value` kW
    #[serde(rename = "accept")]
    Accept {
        source: NodeId,
        /// Decimal representation of the requested kW
        value: String,
    },

    /// State-collection query for the current load status
    #[serde(rename = "load")]
    Load { source: NodeId },
}

impl LbMessage {
    /// UUID of the node that emitted this message
    pub fn source(&self) -> &NodeId {
        match self {
            LbMessage::PeerList { source, .. }
            | LbMessage::Demand { source }
            | LbMessage::Normal { source }
            | LbMessage::Supply { source }
            | LbMessage::Request { source }
            | LbMessage::Yes { source }
            | LbMessage::No { source }
            | LbMessage::Drafting { source }
            | LbMessage::Accept { source, .. }
            | LbMessage::Load { source } => source,
        }
    }
}

/// State-collection replies, routed under the `sc` tag
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "sc")]
pub enum ScMessage {
    /// Reply to an `lb` load query
    #[serde(rename = "load")]
    LoadStatus { source: NodeId, status: String },
}

/// Wire envelope, dispatched by its top-level tag
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Lb(LbMessage),
    Sc(ScMessage),
}

impl Message {
    /// Serialize message to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize message from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Join member UUIDs into the roster wire format (comma-separated, no
/// surrounding whitespace)
pub fn join_roster(uuids: &[NodeId]) -> String {
    uuids.join(",")
}

/// Split a roster string into member UUIDs. Empty tokens are dropped; some
/// leaders emit a leading comma.
pub fn split_roster(peers: &str) -> Vec<NodeId> {
    peers
        .split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(String::from)
        .collect()
}
