//! The `Link` actor (spec §4.6): reliable unicast with per-message retry
//! timers and duplicate suppression.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use p2pdoc_core::{ComponentKind, ComponentSink, LinkOrigin, LinkWireSink, PeerId, PeerRuntime};

use crate::wire::{decode, encode, MsgId, WireMessage};

/// How many `msg_id`s the duplicate-suppression window remembers before
/// evicting the oldest (spec §4.6: "`seen` may be trimmed ... bounded LRU").
const SEEN_CAPACITY: usize = 4096;

struct PendingSend {
    to: PeerId,
    target: ComponentKind,
    body: Vec<u8>,
    retry_task: JoinHandle<()>,
}

pub enum Command {
    Send {
        to: PeerId,
        target: ComponentKind,
        body: Vec<u8>,
    },
    OnWireMessage {
        bytes: Vec<u8>,
    },
    RetryFire {
        msg_id: MsgId,
    },
    RemovePeer {
        peer: PeerId,
    },
}

/// Per-peer transport state: outstanding sends awaiting ack, and the
/// duplicate-suppression window for inbound delivers.
pub struct Link {
    node_id: PeerId,
    retry_interval: Duration,
    next_seq: u64,
    pending: HashMap<MsgId, PendingSend>,
    seen: HashSet<MsgId>,
    seen_order: VecDeque<MsgId>,
    mailbox: mpsc::Receiver<Command>,
    shutdown: mpsc::Receiver<()>,
    self_tx: mpsc::Sender<Command>,
    peer_runtime: Arc<dyn PeerRuntime>,
    echo_wave_sink: Arc<dyn ComponentSink>,
    mesh_sink: Arc<dyn ComponentSink>,
}

impl Link {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        node_id: PeerId,
        retry_interval: Duration,
        peer_runtime: Arc<dyn PeerRuntime>,
        echo_wave_sink: Arc<dyn ComponentSink>,
        mesh_sink: Arc<dyn ComponentSink>,
    ) -> (Self, mpsc::Sender<Command>, mpsc::Sender<()>) {
        let (tx, rx) = mpsc::channel(256);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let link = Self {
            node_id,
            retry_interval,
            next_seq: 0,
            pending: HashMap::new(),
            seen: HashSet::new(),
            seen_order: VecDeque::new(),
            mailbox: rx,
            shutdown: shutdown_rx,
            self_tx: tx.clone(),
            peer_runtime,
            echo_wave_sink,
            mesh_sink,
        };
        (link, tx, shutdown_tx)
    }

    pub async fn run(mut self) {
        tracing::info!(peer = %self.node_id, "Link starting");
        loop {
            tokio::select! {
                maybe_cmd = self.mailbox.recv() => {
                    match maybe_cmd {
                        Some(cmd) => self.handle(cmd).await,
                        None => break,
                    }
                }
                _ = self.shutdown.recv() => {
                    tracing::info!(peer = %self.node_id, "Link shutting down");
                    break;
                }
            }
        }
        for (_, pending) in self.pending.drain() {
            pending.retry_task.abort();
        }
    }

    async fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Send { to, target, body } => self.send(to, target, body).await,
            Command::OnWireMessage { bytes } => self.on_wire_message(bytes).await,
            Command::RetryFire { msg_id } => self.retry(msg_id).await,
            Command::RemovePeer { peer } => self.remove_peer(peer),
        }
    }

    /// Spec §4.6 "send": allocate a `msg_id`, forward the deliver message,
    /// arm a retry timer, and remember it in `pending`.
    async fn send(&mut self, to: PeerId, target: ComponentKind, body: Vec<u8>) {
        let msg_id = MsgId {
            origin: self.node_id.clone(),
            seq: self.next_seq,
        };
        self.next_seq += 1;

        self.transmit(&msg_id, &to, target, &body).await;

        let retry_task = self.arm_retry(msg_id.clone());
        self.pending.insert(
            msg_id,
            PendingSend {
                to,
                target,
                body,
                retry_task,
            },
        );
    }

    async fn transmit(&self, msg_id: &MsgId, to: &PeerId, target: ComponentKind, body: &[u8]) {
        let wire = WireMessage::Deliver {
            msg_id: msg_id.clone(),
            from: self.node_id.clone(),
            to: to.clone(),
            target,
            body: body.to_vec(),
        };
        if let Err(err) = self.peer_runtime.send_raw(to, encode(&wire)).await {
            tracing::warn!(peer = %to, error = ?err, "link transmit failed, will retry");
        }
    }

    fn arm_retry(&self, msg_id: MsgId) -> JoinHandle<()> {
        let interval = self.retry_interval;
        let self_tx = self.self_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            let _ = self_tx.send(Command::RetryFire { msg_id }).await;
        })
    }

    async fn retry(&mut self, msg_id: MsgId) {
        let Some(pending) = self.pending.get(&msg_id) else {
            return;
        };
        tracing::debug!(peer = %pending.to, "retransmitting unacked link message");
        self.transmit(&msg_id, &pending.to, pending.target, &pending.body)
            .await;
        let retry_task = self.arm_retry(msg_id.clone());
        if let Some(pending) = self.pending.get_mut(&msg_id) {
            pending.retry_task = retry_task;
        }
    }

    /// Spec §4.6 "on deliver" / "on ack".
    async fn on_wire_message(&mut self, bytes: Vec<u8>) {
        match decode(&bytes) {
            Ok(WireMessage::Deliver {
                msg_id,
                from,
                target,
                body,
                ..
            }) => {
                if self.seen.contains(&msg_id) {
                    self.send_ack(&from, msg_id).await;
                    return;
                }
                self.remember_seen(msg_id.clone());
                match target {
                    ComponentKind::EchoWave => self.echo_wave_sink.on_deliver(from.clone(), body).await,
                    ComponentKind::Mesh => self.mesh_sink.on_deliver(from.clone(), body).await,
                }
                self.send_ack(&from, msg_id).await;
            }
            Ok(WireMessage::Ack { msg_id }) => {
                if let Some(pending) = self.pending.remove(&msg_id) {
                    pending.retry_task.abort();
                }
            }
            Err(err) => tracing::warn!(error = %err, "dropping malformed link wire message"),
        }
    }

    async fn send_ack(&self, to: &PeerId, msg_id: MsgId) {
        let wire = WireMessage::Ack { msg_id };
        if let Err(err) = self.peer_runtime.send_raw(to, encode(&wire)).await {
            tracing::warn!(peer = %to, error = ?err, "failed to send ack");
        }
    }

    fn remember_seen(&mut self, msg_id: MsgId) {
        if self.seen.insert(msg_id.clone()) {
            self.seen_order.push_back(msg_id);
            while self.seen_order.len() > SEEN_CAPACITY {
                if let Some(oldest) = self.seen_order.pop_front() {
                    self.seen.remove(&oldest);
                }
            }
        }
    }

    /// Spec §4.6 "Failure semantics": `Mesh` prunes pending entries
    /// targeting a peer it has removed.
    fn remove_peer(&mut self, peer: PeerId) {
        let dead: Vec<MsgId> = self
            .pending
            .iter()
            .filter(|(_, p)| p.to == peer)
            .map(|(id, _)| id.clone())
            .collect();
        for msg_id in dead {
            if let Some(pending) = self.pending.remove(&msg_id) {
                pending.retry_task.abort();
            }
        }
    }
}

/// A cheaply cloneable front for a running [`Link`] actor.
#[derive(Clone)]
pub struct LinkHandle {
    tx: mpsc::Sender<Command>,
}

impl LinkHandle {
    pub fn new(tx: mpsc::Sender<Command>) -> Self {
        Self { tx }
    }

    pub async fn remove_peer(&self, peer: PeerId) {
        if self.tx.send(Command::RemovePeer { peer }).await.is_err() {
            tracing::warn!("Link actor gone, dropping remove_peer");
        }
    }
}

#[async_trait]
impl LinkOrigin for LinkHandle {
    async fn send(&self, to: PeerId, target: ComponentKind, body: Vec<u8>) {
        if self
            .tx
            .send(Command::Send { to, target, body })
            .await
            .is_err()
        {
            tracing::warn!("Link actor gone, dropping send");
        }
    }
}

#[async_trait]
impl LinkWireSink for LinkHandle {
    async fn on_wire_message(&self, _from: PeerId, bytes: Vec<u8>) {
        if self
            .tx
            .send(Command::OnWireMessage { bytes })
            .await
            .is_err()
        {
            tracing::warn!("Link actor gone, dropping wire message");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    use p2pdoc_core::{ConnectOutcome, TransientNetworkError};

    fn peer(s: &str) -> PeerId {
        PeerId::new_unchecked(s)
    }

    struct RecordingComponentSink {
        delivered: StdMutex<Vec<(PeerId, Vec<u8>)>>,
    }

    #[async_trait]
    impl ComponentSink for RecordingComponentSink {
        async fn on_deliver(&self, from: PeerId, body: Vec<u8>) {
            self.delivered.lock().unwrap().push((from, body));
        }
    }

    /// A loopback peer runtime wiring two `Link`s directly together, so
    /// tests exercise real wire encode/decode without real sockets.
    struct LoopbackRuntime {
        peer_tx: StdMutex<HashMap<PeerId, mpsc::Sender<Command>>>,
        drop_first_n: StdMutex<HashMap<PeerId, usize>>,
    }

    #[async_trait]
    impl PeerRuntime for LoopbackRuntime {
        async fn connect(&self, _peer: &PeerId) -> Result<ConnectOutcome, TransientNetworkError> {
            Ok(ConnectOutcome::Connected)
        }
        async fn disconnect(&self, _peer: &PeerId) {}
        async fn send_raw(&self, to: &PeerId, bytes: Vec<u8>) -> Result<(), TransientNetworkError> {
            {
                let mut drops = self.drop_first_n.lock().unwrap();
                if let Some(remaining) = drops.get_mut(to) {
                    if *remaining > 0 {
                        *remaining -= 1;
                        return Ok(()); // simulate a dropped packet
                    }
                }
            }
            let tx = self.peer_tx.lock().unwrap().get(to).cloned();
            if let Some(tx) = tx {
                let _ = tx.send(Command::OnWireMessage { bytes }).await;
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn duplicate_delivery_is_suppressed() {
        let sink = Arc::new(RecordingComponentSink {
            delivered: StdMutex::new(Vec::new()),
        });
        let runtime = Arc::new(LoopbackRuntime {
            peer_tx: StdMutex::new(HashMap::new()),
            drop_first_n: StdMutex::new(HashMap::new()),
        });
        let (link, tx, _shutdown) = Link::new(
            peer("b@2.2.2.2"),
            Duration::from_secs(5),
            runtime,
            sink.clone(),
            sink.clone(),
        );
        tokio::spawn(link.run());
        let handle = LinkHandle::new(tx);

        let msg_id = MsgId {
            origin: peer("a@1.1.1.1"),
            seq: 0,
        };
        let wire = WireMessage::Deliver {
            msg_id: msg_id.clone(),
            from: peer("a@1.1.1.1"),
            to: peer("b@2.2.2.2"),
            target: ComponentKind::EchoWave,
            body: vec![1, 2, 3],
        };
        handle
            .on_wire_message(peer("a@1.1.1.1"), encode(&wire))
            .await;
        handle
            .on_wire_message(peer("a@1.1.1.1"), encode(&wire))
            .await;
        tokio::task::yield_now().await;

        assert_eq!(sink.delivered.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn a_dropped_send_is_retransmitted_and_then_acked() {
        let sink_a = Arc::new(RecordingComponentSink {
            delivered: StdMutex::new(Vec::new()),
        });
        let sink_b = Arc::new(RecordingComponentSink {
            delivered: StdMutex::new(Vec::new()),
        });

        let mut drop_first_n = HashMap::new();
        drop_first_n.insert(peer("b@2.2.2.2"), 1);
        let runtime = Arc::new(LoopbackRuntime {
            peer_tx: StdMutex::new(HashMap::new()),
            drop_first_n: StdMutex::new(drop_first_n),
        });

        let (link_a, tx_a, _shutdown_a) = Link::new(
            peer("a@1.1.1.1"),
            Duration::from_millis(20),
            runtime.clone(),
            sink_a.clone(),
            sink_a.clone(),
        );
        let (link_b, tx_b, _shutdown_b) = Link::new(
            peer("b@2.2.2.2"),
            Duration::from_millis(20),
            runtime.clone(),
            sink_b.clone(),
            sink_b.clone(),
        );
        runtime
            .peer_tx
            .lock()
            .unwrap()
            .insert(peer("a@1.1.1.1"), tx_a.clone());
        runtime
            .peer_tx
            .lock()
            .unwrap()
            .insert(peer("b@2.2.2.2"), tx_b.clone());

        tokio::spawn(link_a.run());
        tokio::spawn(link_b.run());
        let handle_a = LinkHandle::new(tx_a);

        handle_a
            .send(peer("b@2.2.2.2"), ComponentKind::EchoWave, vec![9])
            .await;

        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(sink_b.delivered.lock().unwrap().len(), 1);
    }
}
