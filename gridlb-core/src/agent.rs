//! The load-balancing agent
//!
//! Runs the periodic control loop that classifies the node from its
//! device readings, and the drafting state machine that negotiates power
//! migrations with peers. The tick and the message handlers are
//! serialized on a single task; neither observes the other mid-flight.

use std::fmt::Write as _;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::classifier::classify;
use crate::config::AgentConfig;
use crate::device::DeviceManager;
use crate::peers::{PeerConnector, PeerRegistry};
use crate::types::{split_roster, LbMessage, LoadState, Message, NodeId, ScMessage};
use crate::view::{DeviceSnapshot, DeviceView};

/// One node's drafting agent
pub struct LbAgent {
    uuid: NodeId,
    state: LoadState,
    prev_state: LoadState,
    demand_kw: f64,
    peers: PeerRegistry,
    view: DeviceView,
    connector: Arc<dyn PeerConnector>,
    config: AgentConfig,
}

impl LbAgent {
    pub fn new(
        uuid: NodeId,
        devices: Arc<DeviceManager>,
        connector: Arc<dyn PeerConnector>,
        config: AgentConfig,
    ) -> Self {
        let view = DeviceView::new(devices, config.gateway_device_id.clone(), config.unit_scale);
        Self {
            uuid: uuid.clone(),
            state: LoadState::Normal,
            prev_state: LoadState::Normal,
            demand_kw: 0.0,
            peers: PeerRegistry::new(uuid),
            view,
            connector,
            config,
        }
    }

    pub fn uuid(&self) -> &NodeId {
        &self.uuid
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    /// The deficit advertised in `accept`; zero unless in DEMAND
    pub fn demand_kw(&self) -> f64 {
        self.demand_kw
    }

    pub fn registry(&self) -> &PeerRegistry {
        &self.peers
    }

    /// Drive the agent until its inbox closes.
    ///
    /// Ticks and inbound messages are handled on this one task, which is
    /// what serializes them. Dropping every sender cancels the timer and
    /// exits cleanly.
    pub async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<Message>) {
        info!(
            "Drafting: agent {} entering control loop ({} devices, tick {:?})",
            self.uuid,
            self.view.device_count(),
            self.config.tick_period
        );
        let mut ticker = interval(self.config.tick_period);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.on_tick(),
                msg = inbox.recv() => match msg {
                    Some(Message::Lb(msg)) => self.handle_message(msg),
                    Some(Message::Sc(msg)) => {
                        debug!("Drafting: ignoring state-collection traffic {:?}", msg)
                    }
                    None => {
                        info!("Drafting: inbox closed, agent {} shutting down", self.uuid);
                        break;
                    }
                }
            }
        }
    }

    /// One control-loop iteration: sample devices, reclassify, advertise.
    pub fn on_tick(&mut self) {
        let snap = self.view.snapshot();

        self.prev_state = self.state;
        let class = classify(&snap);
        self.state = class.state();
        self.demand_kw = class.deficit_kw();

        let uuid = self.uuid.clone();
        self.peers.reclassify(&uuid, self.state);

        debug!("LoadTable:\n{}", self.render_load_table(&snap));

        if self.state == LoadState::Demand {
            // Rebroadcast every tick spent in DEMAND; peers may have
            // missed an earlier announcement.
            info!(
                "Drafting: broadcasting load change {} -> DEMAND ({:.3} kW short)",
                self.prev_state, self.demand_kw
            );
            self.broadcast(&Message::Lb(LbMessage::Demand { source: self.uuid.clone() }));
        } else if self.prev_state != LoadState::Normal && self.state == LoadState::Normal {
            info!("Drafting: broadcasting load change {} -> NORMAL", self.prev_state);
            self.broadcast(&Message::Lb(LbMessage::Normal { source: self.uuid.clone() }));
        }

        if self.state == LoadState::Supply {
            self.send_draft_request();
        }
    }

    /// Solicit takers for the local surplus from every peer
    fn send_draft_request(&self) {
        info!("Drafting: sending draft request from {}", self.uuid);
        self.broadcast(&Message::Lb(LbMessage::Request { source: self.uuid.clone() }));
    }

    /// Handle one inbound `lb` message
    pub fn handle_message(&mut self, msg: LbMessage) {
        if *msg.source() == self.uuid {
            return;
        }
        let source = msg.source().clone();
        self.observe_peer(&source);

        match msg {
            LbMessage::PeerList { peers, .. } => self.handle_peer_list(&source, &peers),
            LbMessage::Demand { .. } => {
                info!("Drafting: demand message received from {}", source);
                self.peers.reclassify(&source, LoadState::Demand);
            }
            LbMessage::Normal { .. } => {
                info!("Drafting: normal message received from {}", source);
                self.peers.reclassify(&source, LoadState::Normal);
            }
            LbMessage::Supply { .. } => {
                info!("Drafting: supply message received from {}", source);
                self.peers.reclassify(&source, LoadState::Supply);
            }
            LbMessage::Request { .. } => self.handle_request(&source),
            LbMessage::Yes { .. } => self.handle_yes(&source),
            LbMessage::No { .. } => {
                info!("Drafting: (no) from {}", source);
            }
            LbMessage::Drafting { .. } => self.handle_drafting(&source),
            LbMessage::Accept { value, .. } => self.handle_accept(&source, &value),
            LbMessage::Load { .. } => self.handle_load_query(&source),
        }
    }

    /// Make sure the sender has a registry entry before handling
    fn observe_peer(&mut self, source: &NodeId) {
        if self.peers.contains(source) {
            return;
        }
        match self.connector.connect(source) {
            Ok(handle) => self.peers.upsert(source.clone(), handle),
            Err(e) => {
                info!("Drafting: no return route to {}: {}", source, e);
                self.peers.track(source.clone());
            }
        }
    }

    /// New group roster from the leader
    fn handle_peer_list(&mut self, source: &NodeId, peers: &str) {
        info!("Drafting: peer list <{}> received from group leader {}", peers, source);
        let roster = split_roster(peers);
        self.peers.replace_group(&roster, self.connector.as_ref());
        let uuid = self.uuid.clone();
        self.peers.reclassify(&uuid, self.state);
    }

    /// Draft request from a supply node
    fn handle_request(&mut self, source: &NodeId) {
        info!("Drafting: request message received from {}", source);
        self.peers.reclassify(source, LoadState::Supply);

        let reply = if self.state == LoadState::Demand {
            LbMessage::Yes { source: self.uuid.clone() }
        } else {
            LbMessage::No { source: self.uuid.clone() }
        };
        self.send_to(source, &Message::Lb(reply));
    }

    /// A demand node accepted our solicitation
    fn handle_yes(&mut self, source: &NodeId) {
        if self.state != LoadState::Supply {
            debug!("Drafting: late (yes) from {} dropped", source);
            return;
        }
        info!("Drafting: (yes) from {}, initiating draft", source);
        self.send_to(source, &Message::Lb(LbMessage::Drafting { source: self.uuid.clone() }));
    }

    /// The supplier confirmed our acceptance
    fn handle_drafting(&mut self, source: &NodeId) {
        if self.state != LoadState::Demand {
            debug!("Drafting: late drafting message from {} dropped", source);
            return;
        }
        info!("Drafting: drafting message received from {}", source);
        let accept = LbMessage::Accept {
            source: self.uuid.clone(),
            value: self.demand_kw.to_string(),
        };
        self.send_to(source, &Message::Lb(accept));

        if let Err(e) = self.view.actuate_receive() {
            error!("Drafting: receive actuation failed: {}", e);
        }
    }

    /// The demand node we agreed to supply is awaiting migration
    fn handle_accept(&mut self, source: &NodeId, value: &str) {
        let requested_kw: f64 = match value.parse() {
            Ok(v) => v,
            Err(_) => {
                warn!("Drafting: accept from {} with unparseable value {:?} dropped", source, value);
                return;
            }
        };

        if self.state != LoadState::Supply {
            warn!("Drafting: unexpected accept message from {}", source);
            return;
        }

        // The requested kW is advisory; the migration is not sized to it
        info!(
            "Drafting: migrating power on request from {} ({} kW demanded)",
            source, requested_kw
        );
        if let Err(e) = self.view.actuate_donate() {
            error!("Drafting: donate actuation failed: {}", e);
        }
    }

    /// State-collection asked for our current load status
    fn handle_load_query(&mut self, source: &NodeId) {
        info!("Drafting: current load state requested by {}", source);
        let reply = ScMessage::LoadStatus {
            source: self.uuid.clone(),
            status: self.state.to_string(),
        };
        self.send_to(source, &Message::Sc(reply));
    }

    /// Send to one peer; failures are logged and swallowed
    fn send_to(&self, uuid: &NodeId, msg: &Message) {
        let Some(peer) = self.peers.get(uuid) else {
            debug!("Drafting: no registry entry for {}, dropping reply", uuid);
            return;
        };
        match &peer.handle {
            Some(handle) => {
                if let Err(e) = handle.send(msg) {
                    info!("Drafting: could not send message to peer: {}", e);
                }
            }
            None => debug!("Drafting: peer {} has no route, dropping reply", uuid),
        }
    }

    /// Send to every peer except ourselves; failures are logged per peer
    fn broadcast(&self, msg: &Message) {
        for peer in self.peers.iter_remote() {
            match &peer.handle {
                Some(handle) => {
                    if let Err(e) = handle.send(msg) {
                        info!("Drafting: could not send message to peer: {}", e);
                    }
                }
                None => debug!("Drafting: peer {} has no route, skipping", peer.uuid),
            }
        }
    }

    /// Render the load table logged at debug on every tick
    fn render_load_table(&self, snap: &DeviceSnapshot) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "----------- LOAD TABLE (power management) -----------");
        let _ = writeln!(
            out,
            "net DRER ({}): {:.3}   net DESD ({}): {:.3}",
            snap.drer_count, snap.net_gen, snap.desd_count, snap.net_storage
        );
        let _ = writeln!(
            out,
            "net LOAD ({}): {:.3}   gateway: {:.3}",
            snap.load_count, snap.net_load, snap.gateway_flow
        );
        let _ = writeln!(
            out,
            "supply: {}  demand: {}  normal: {}",
            self.peers.iter_by_class(LoadState::Supply).count(),
            self.peers.iter_by_class(LoadState::Demand).count(),
            self.peers.iter_by_class(LoadState::Normal).count(),
        );
        for peer in self.peers.iter_all() {
            let _ = writeln!(out, "{:<28} {}", peer.uuid, peer.classification);
        }
        out.push_str("------------------------------------------------------");
        out
    }
}
