//! GridLB Node
//!
//! Runs a small in-process microgrid: one drafting agent per node, wired
//! over byte channels standing in for the broker transport. Messages are
//! serialized on send and parsed back on delivery, as they would be on
//! the wire. Node 0's side of the fabric also hosts the group leader,
//! which announces the roster at startup.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::mpsc;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use uuid::Uuid;

use gridlb_core::{
    join_roster, AgentConfig, DeviceManager, DeviceType, LbAgent, LbMessage, Message, NodeId,
    PeerConnector, PeerHandle, SimDevice, TransportError,
};

/// Microgrid load-balancing node
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Number of agents in the demo microgrid
    #[arg(short, long, default_value = "3")]
    nodes: usize,

    /// Seconds between control-loop ticks
    #[arg(short, long, default_value = "15")]
    tick_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

/// Peer handle that serializes onto the recipient's wire channel
struct ChannelPeer {
    peer: NodeId,
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl PeerHandle for ChannelPeer {
    fn send(&self, msg: &Message) -> Result<(), TransportError> {
        let bytes = msg.to_bytes().map_err(|e| TransportError::Send {
            peer: self.peer.clone(),
            reason: e.to_string(),
        })?;
        self.tx
            .send(bytes)
            .map_err(|_| TransportError::Unreachable(self.peer.clone()))
    }
}

/// Routes peer UUIDs onto node wire channels
struct ChannelBroker {
    routes: HashMap<NodeId, mpsc::UnboundedSender<Vec<u8>>>,
}

impl PeerConnector for ChannelBroker {
    fn connect(&self, uuid: &NodeId) -> Result<Arc<dyn PeerHandle>, TransportError> {
        let tx = self
            .routes
            .get(uuid)
            .ok_or_else(|| TransportError::Unreachable(uuid.clone()))?;
        Ok(Arc::new(ChannelPeer {
            peer: uuid.clone(),
            tx: tx.clone(),
        }))
    }
}

/// Parse inbound frames and hand them to the agent's inbox, dropping
/// whatever does not parse
fn spawn_dispatcher(uuid: NodeId, mut wire_rx: mpsc::UnboundedReceiver<Vec<u8>>) -> mpsc::UnboundedReceiver<Message> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(bytes) = wire_rx.recv().await {
            match Message::from_bytes(&bytes) {
                Ok(msg) => {
                    if tx.send(msg).is_err() {
                        break;
                    }
                }
                Err(e) => warn!("Dispatcher: {} dropping unparseable message: {}", uuid, e),
            }
        }
    });
    rx
}

/// Device fleet for the demo: surplus, deficit, and balanced profiles
fn demo_devices(index: usize) -> DeviceManager {
    let mut manager = DeviceManager::new();
    let (gen, load) = match index % 3 {
        0 => (10.0, 4.0),
        1 => (2.0, 6.0),
        _ => (5.0, 5.0),
    };
    manager.register(Arc::new(SimDevice::with_power("solar1", DeviceType::Drer, gen)));
    manager.register(Arc::new(SimDevice::with_power("battery1", DeviceType::Desd, 3.0)));
    manager.register(Arc::new(SimDevice::with_power("load1", DeviceType::Load, load)));
    manager.register(Arc::new(SimDevice::with_power("dg1", DeviceType::Dg, 0.0)));
    manager.register(Arc::new(SimDevice::with_power("grid3", DeviceType::Grid, 0.0)));
    manager
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("GridLB demo microgrid starting with {} nodes", args.nodes);

    let uuids: Vec<NodeId> = (0..args.nodes)
        .map(|i| format!("node{}-{}", i, &Uuid::new_v4().to_string()[..8]))
        .collect();

    // One wire channel per node, plus one for the group leader so roster
    // replies have somewhere to go
    let mut wire_inboxes = Vec::new();
    let mut routes = HashMap::new();
    for uuid in &uuids {
        let (tx, rx) = mpsc::unbounded_channel();
        routes.insert(uuid.clone(), tx);
        wire_inboxes.push(rx);
    }

    let leader: NodeId = "group-leader".to_string();
    let (leader_tx, mut leader_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    routes.insert(leader.clone(), leader_tx);
    tokio::spawn(async move {
        while let Some(bytes) = leader_rx.recv().await {
            debug!("Leader: absorbing {} byte reply", bytes.len());
        }
    });

    // Announce the roster before the agents start ticking
    let roster = Message::Lb(LbMessage::PeerList {
        source: leader,
        peers: join_roster(&uuids),
    });
    let frame = roster.to_bytes()?;
    for uuid in &uuids {
        if let Some(tx) = routes.get(uuid) {
            let _ = tx.send(frame.clone());
        }
    }

    let broker = Arc::new(ChannelBroker { routes });
    let config = AgentConfig::default()
        .with_tick_period(Duration::from_secs(args.tick_secs))
        .with_unit_scale(1.0);

    for (index, (uuid, wire_rx)) in uuids.iter().zip(wire_inboxes).enumerate() {
        let inbox = spawn_dispatcher(uuid.clone(), wire_rx);
        let agent = LbAgent::new(
            uuid.clone(),
            Arc::new(demo_devices(index)),
            broker.clone(),
            config.clone(),
        );
        tokio::spawn(agent.run(inbox));
    }

    tokio::signal::ctrl_c().await?;
    info!("GridLB demo microgrid shutting down");
    Ok(())
}
