//! The routing engine: the single authority for all group state.
//!
//! The `Router` itself is plain synchronous state; the relay runs it inside
//! one task and every connection reaches it only through [`RouterMsg`] on an
//! mpsc channel, so no locking is ever needed on group state. Outbound frames
//! leave through per-connection writer channels.
//!
//! # Per-group state
//! - `members`: insertion-ordered client identifiers (join order drives the
//!   dispatch iteration, which keeps tie-breaking deterministic).
//! - `broadcast_slot`: the most recent broadcast payload; replaced on every
//!   new broadcast, handed once to every later joiner.
//! - `consumables`: FIFO payload queue, optionally capped (oldest dropped).
//! - `pending_consumers`: member id -> how many consumables that member is
//!   still owed. Keys are always exactly the members.

use std::collections::{BTreeMap, HashMap, VecDeque};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use rr_protocol::{AckRegistry, RelayEnvelope, relay_frame};

use crate::config::{GroupLimits, GroupPolicy};

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// Instructions for a connection's writer half.
#[derive(Debug)]
pub enum WriterCmd {
    /// Write these exact bytes to the transport.
    Frame(Vec<u8>),
    /// Close the connection cleanly.
    Close,
}

pub type Writer = mpsc::UnboundedSender<WriterCmd>;

/// Everything the wire layer can ask of the router.
#[derive(Debug)]
pub enum RouterMsg {
    /// A transport connected; the router greets it with HELLO.
    Connected { conn: u64, writer: Writer },
    /// The peer's HELLO reply with its declared groups.
    Hello {
        conn: u64,
        groups: Vec<String>,
        accepted: oneshot::Sender<bool>,
    },
    /// A payload for the given destination map.
    Obj {
        conn: u64,
        dest: BTreeMap<String, i64>,
        payload: Vec<u8>,
    },
    /// Consumer readiness per origin group.
    Ntf {
        conn: u64,
        origins: BTreeMap<String, i64>,
    },
    /// Acknowledgement of a relay-sent stamp.
    Ack { stamp: u64 },
    /// The transport is gone; tear down the client record.
    Disconnected { conn: u64 },
    /// How many relay sends are still unacknowledged (shutdown drain).
    PendingAcks { reply: oneshot::Sender<usize> },
}

// ---------------------------------------------------------------------------
// Group
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct Group {
    pub members: Vec<u64>,
    pub broadcast_slot: Option<Vec<u8>>,
    pub consumables: VecDeque<Vec<u8>>,
    pub max_consumables: Option<usize>,
    pub pending_consumers: HashMap<u64, u64>,
}

impl Group {
    fn with_limits(limits: GroupLimits) -> Self {
        Group {
            max_consumables: limits.max_consumables,
            ..Group::default()
        }
    }

    /// Append a consumable, dropping the oldest entries past the cap.
    fn push_consumable(&mut self, payload: Vec<u8>) {
        if let Some(cap) = self.max_consumables {
            if cap == 0 {
                return;
            }
            while self.consumables.len() >= cap {
                self.consumables.pop_front();
            }
        }
        self.consumables.push_back(payload);
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

struct ClientHandle {
    conn: u64,
    writer: Writer,
}

pub struct Router {
    policy: GroupPolicy,
    header_size: usize,
    /// Greeted connections that have not completed HELLO yet.
    connecting: HashMap<u64, Writer>,
    /// Admitted clients by identifier.
    clients: HashMap<u64, ClientHandle>,
    conn_to_client: HashMap<u64, u64>,
    groups: HashMap<String, Group>,
    next_client_id: u64,
    /// Relay-global stamps and pending acknowledgements.
    registry: AckRegistry,
    /// stamp -> conn, so a dead connection's pending entries can be purged.
    owners: HashMap<u64, u64>,
}

impl Router {
    pub fn new(policy: GroupPolicy, header_size: usize) -> Self {
        Router {
            policy,
            header_size,
            connecting: HashMap::new(),
            clients: HashMap::new(),
            conn_to_client: HashMap::new(),
            groups: HashMap::new(),
            next_client_id: 0,
            registry: AckRegistry::new(),
            owners: HashMap::new(),
        }
    }

    pub fn handle(&mut self, msg: RouterMsg) {
        match msg {
            RouterMsg::Connected { conn, writer } => self.connected(conn, writer),
            RouterMsg::Hello {
                conn,
                groups,
                accepted,
            } => {
                let admitted = self.hello(conn, &groups);
                let _ = accepted.send(admitted.is_some());
            }
            RouterMsg::Obj {
                conn,
                dest,
                payload,
            } => self.obj(conn, &dest, payload),
            RouterMsg::Ntf { conn, origins } => self.ntf(conn, &origins),
            RouterMsg::Ack { stamp } => self.ack(stamp),
            RouterMsg::Disconnected { conn } => self.disconnected(conn),
            RouterMsg::PendingAcks { reply } => {
                let _ = reply.send(self.registry.len());
            }
        }
    }

    // -----------------------------------------------------------------------
    // Connection lifecycle
    // -----------------------------------------------------------------------

    /// Greet a fresh transport with the relay HELLO.
    pub fn connected(&mut self, conn: u64, writer: Writer) {
        let stamp = self.registry.next_stamp();
        let hello = RelayEnvelope::hello(stamp);
        match relay_frame(&hello, self.header_size) {
            Ok(frame) => {
                self.registry.track(stamp, frame.clone());
                self.owners.insert(stamp, conn);
                let _ = writer.send(WriterCmd::Frame(frame));
            }
            Err(e) => warn!(error = %e, "failed to frame HELLO"),
        }
        self.connecting.insert(conn, writer);
    }

    /// The peer's HELLO: verify its declared groups and admit or reject.
    ///
    /// On admission the new member immediately receives every joined group's
    /// current broadcast slot, once.
    pub fn hello(&mut self, conn: u64, declared: &[String]) -> Option<u64> {
        let Some(writer) = self.connecting.remove(&conn) else {
            warn!(conn, "HELLO from unknown connection");
            return None;
        };
        if !self.check_new_client(declared) {
            let _ = writer.send(WriterCmd::Close);
            return None;
        }
        let id = self.next_client_id;
        self.next_client_id += 1;
        info!(client = id, groups = ?declared, "new client");
        self.clients.insert(id, ClientHandle { conn, writer });
        self.conn_to_client.insert(conn, id);
        let mut slots = Vec::new();
        for name in declared {
            if self.try_add_group(name) {
                let group = self
                    .groups
                    .get_mut(name)
                    .unwrap_or_else(|| unreachable!("group was just ensured"));
                debug!(client = id, group = %name, "joining group");
                group.members.push(id);
                group.pending_consumers.insert(id, 0);
                if let Some(slot) = &group.broadcast_slot {
                    slots.push(slot.clone());
                }
            }
        }
        for slot in slots {
            self.send_obj(id, slot);
        }
        Some(id)
    }

    /// Tear down whatever the connection had: pending acks, membership,
    /// client record. Idempotent.
    pub fn disconnected(&mut self, conn: u64) {
        let owned: Vec<u64> = self
            .owners
            .iter()
            .filter(|&(_, owner)| *owner == conn)
            .map(|(stamp, _)| *stamp)
            .collect();
        for stamp in owned {
            self.owners.remove(&stamp);
            self.registry.acknowledge(stamp);
        }
        self.connecting.remove(&conn);
        if let Some(id) = self.conn_to_client.remove(&conn) {
            self.drop_client(id);
        }
    }

    /// Remove a client from every group and from the live-clients map.
    pub fn drop_client(&mut self, id: u64) {
        for (name, group) in &mut self.groups {
            if let Some(pos) = group.members.iter().position(|&m| m == id) {
                debug!(client = id, group = %name, "removing from group");
                group.members.remove(pos);
                group.pending_consumers.remove(&id);
            }
        }
        if self.clients.remove(&id).is_some() {
            debug!(client = id, "removing client");
        }
    }

    // -----------------------------------------------------------------------
    // Routing
    // -----------------------------------------------------------------------

    /// Route a payload: per destination entry, negative counts broadcast,
    /// positive counts enqueue that many consumables, zero is a no-op.
    pub fn obj(&mut self, conn: u64, dest: &BTreeMap<String, i64>, payload: Vec<u8>) {
        let Some(&client) = self.conn_to_client.get(&conn) else {
            warn!(conn, "OBJ from unadmitted connection");
            return;
        };
        debug!(client, groups = ?dest.keys().collect::<Vec<_>>(), "routing object");
        for (name, &count) in dest {
            if !self.try_add_group(name) {
                continue;
            }
            if count < 0 {
                self.broadcast(name, &payload);
            } else if count > 0 {
                let group = self
                    .groups
                    .get_mut(name)
                    .unwrap_or_else(|| unreachable!("group was just ensured"));
                debug!(group = %name, copies = count, "enqueueing consumables");
                for _ in 0..count {
                    group.push_consumable(payload.clone());
                }
                self.dispatch(name);
            }
        }
    }

    /// Record consumer readiness: positive counts add pending credit and run
    /// dispatch; a negative count drains the whole queue to this client.
    pub fn ntf(&mut self, conn: u64, origins: &BTreeMap<String, i64>) {
        let Some(&client) = self.conn_to_client.get(&conn) else {
            warn!(conn, "NTF from unadmitted connection");
            return;
        };
        for (name, &count) in origins {
            let Some(group) = self.groups.get_mut(name) else {
                warn!(group = %name, "notify for unknown group");
                continue;
            };
            if !group.members.contains(&client) {
                continue;
            }
            if count > 0 {
                let pending = group
                    .pending_consumers
                    .entry(client)
                    .or_insert(0);
                *pending += count.unsigned_abs();
                debug!(client, group = %name, pending = *pending, "pending consumables");
                self.dispatch(name);
            } else if count < 0 {
                let drained: Vec<Vec<u8>> = group.consumables.drain(..).collect();
                for payload in drained {
                    self.send_obj(client, payload);
                }
            }
        }
    }

    /// Clear a pending relay send; unknown stamps only warrant a warning.
    pub fn ack(&mut self, stamp: u64) {
        if self.registry.acknowledge(stamp).is_none() {
            warn!(stamp, "ACK for stamp not in pending ACKs");
        }
        self.owners.remove(&stamp);
    }

    pub fn pending_acks(&self) -> usize {
        self.registry.len()
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    /// Whether the declared groups pass policy and member caps.
    fn check_new_client(&self, declared: &[String]) -> bool {
        if let GroupPolicy::Restricted(accepted) = &self.policy {
            for name in declared {
                let Some(limits) = accepted.get(name) else {
                    info!(group = %name, "invalid group");
                    return false;
                };
                if let (Some(max), Some(group)) = (limits.max_count, self.groups.get(name)) {
                    if group.members.len() >= max {
                        info!(group = %name, max, "group is full");
                        return false;
                    }
                }
            }
        }
        true
    }

    /// Ensure the group exists if policy allows it.
    fn try_add_group(&mut self, name: &str) -> bool {
        if !self.policy.allows(name) {
            info!(group = %name, "invalid group");
            return false;
        }
        if !self.groups.contains_key(name) {
            debug!(group = %name, "adding group");
            let limits = self.policy.limits(name);
            self.groups
                .insert(name.to_owned(), Group::with_limits(limits));
        }
        true
    }

    /// Set the broadcast slot and fan the payload out to every member.
    fn broadcast(&mut self, name: &str, payload: &[u8]) {
        let Some(group) = self.groups.get_mut(name) else {
            return;
        };
        group.broadcast_slot = Some(payload.to_vec());
        let members = group.members.clone();
        for member in members {
            debug!(group = %name, client = member, "broadcasting object");
            self.send_obj(member, payload.to_vec());
        }
    }

    /// Hand queued consumables to owed members, in join order, until either
    /// the queue or the pending credit runs dry.
    fn dispatch(&mut self, name: &str) {
        let mut sends = Vec::new();
        if let Some(group) = self.groups.get_mut(name) {
            for i in 0..group.members.len() {
                let member = group.members[i];
                let Some(pending) = group.pending_consumers.get_mut(&member) else {
                    continue;
                };
                while *pending > 0 {
                    let Some(payload) = group.consumables.pop_front() else {
                        break;
                    };
                    *pending -= 1;
                    debug!(group = %name, client = member, remaining = *pending, "dispatching consumable");
                    sends.push((member, payload));
                }
            }
        }
        for (member, payload) in sends {
            self.send_obj(member, payload);
        }
    }

    /// Stamp, track and hand a payload frame to the client's writer.
    fn send_obj(&mut self, client: u64, payload: Vec<u8>) {
        let Some(handle) = self.clients.get(&client) else {
            warn!(client, "send to unknown client");
            return;
        };
        let stamp = self.registry.next_stamp();
        let envelope = RelayEnvelope::obj(stamp, payload);
        match relay_frame(&envelope, self.header_size) {
            Ok(frame) => {
                self.registry.track(stamp, frame.clone());
                self.owners.insert(stamp, handle.conn);
                if handle.writer.send(WriterCmd::Frame(frame)).is_err() {
                    debug!(client, "writer gone, frame dropped");
                }
            }
            Err(e) => warn!(client, error = %e, "failed to frame object"),
        }
    }

    // -----------------------------------------------------------------------
    // Introspection (tests)
    // -----------------------------------------------------------------------

    pub fn group(&self, name: &str) -> Option<&Group> {
        self.groups.get(name)
    }

    pub fn group_names(&self) -> impl Iterator<Item = &String> {
        self.groups.keys()
    }

    pub fn has_client(&self, id: u64) -> bool {
        self.clients.contains_key(&id)
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }
}

/// Drive the router from its channel until every sender is gone.
pub(crate) async fn run_router(mut rx: mpsc::Receiver<RouterMsg>, mut router: Router) {
    while let Some(msg) = rx.recv().await {
        router.handle(msg);
    }
    debug!("router task finished");
}
