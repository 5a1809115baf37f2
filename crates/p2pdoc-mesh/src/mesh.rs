//! The `Mesh` actor (spec §4.7): tracks direct neighbors, bootstraps new
//! joiners with a full state transfer, and stitches remaining neighbors
//! together on graceful departure.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use p2pdoc_core::{
    ClockSink, ComponentKind, ComponentSink, DocSink, LinkOrigin, NeighborObserver, PeerId,
    PeerRuntime, StateSource,
};

use crate::message::{decode, encode, JoinMode, MeshMessage};

pub enum Command {
    Join { peer: PeerId, mode: JoinMode },
    Leave { peer: PeerId },
    LeaveAll,
    OnDeliver { from: PeerId, body: Vec<u8> },
}

/// Per-peer neighbor-set state.
pub struct Mesh {
    my_id: PeerId,
    neighbors: BTreeSet<PeerId>,
    mailbox: mpsc::Receiver<Command>,
    shutdown: mpsc::Receiver<()>,
    peer_runtime: Arc<dyn PeerRuntime>,
    link_origin: Arc<dyn LinkOrigin>,
    neighbor_observers: Vec<Arc<dyn NeighborObserver>>,
    doc_sink: Arc<dyn DocSink>,
    clock_sink: Arc<dyn ClockSink>,
    state_source: Arc<dyn StateSource>,
}

impl Mesh {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        my_id: PeerId,
        peer_runtime: Arc<dyn PeerRuntime>,
        link_origin: Arc<dyn LinkOrigin>,
        neighbor_observers: Vec<Arc<dyn NeighborObserver>>,
        doc_sink: Arc<dyn DocSink>,
        clock_sink: Arc<dyn ClockSink>,
        state_source: Arc<dyn StateSource>,
    ) -> (Self, mpsc::Sender<Command>, mpsc::Sender<()>) {
        let (tx, rx) = mpsc::channel(256);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let mesh = Self {
            my_id,
            neighbors: BTreeSet::new(),
            mailbox: rx,
            shutdown: shutdown_rx,
            peer_runtime,
            link_origin,
            neighbor_observers,
            doc_sink,
            clock_sink,
            state_source,
        };
        (mesh, tx, shutdown_tx)
    }

    pub async fn run(mut self) {
        tracing::info!(peer = %self.my_id, "Mesh starting");
        loop {
            tokio::select! {
                maybe_cmd = self.mailbox.recv() => {
                    match maybe_cmd {
                        Some(cmd) => self.handle(cmd).await,
                        None => break,
                    }
                }
                _ = self.shutdown.recv() => {
                    tracing::info!(peer = %self.my_id, "Mesh shutting down");
                    break;
                }
            }
        }
    }

    async fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Join { peer, mode } => self.join(peer, mode).await,
            Command::Leave { peer } => self.leave(peer).await,
            Command::LeaveAll => self.leave_all().await,
            Command::OnDeliver { from, body } => self.on_deliver(from, body).await,
        }
    }

    /// Spec §4.7 `join(peer, mode)`.
    async fn join(&mut self, peer: PeerId, mode: JoinMode) {
        use p2pdoc_core::ConnectOutcome;
        let outcome = match self.peer_runtime.connect(&peer).await {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::warn!(peer = %peer, error = ?err, "join: connect failed");
                return;
            }
        };
        if matches!(outcome, ConnectOutcome::Refused) {
            tracing::warn!(peer = %peer, "join: peer refused connection");
            return;
        }

        self.neighbors.insert(peer.clone());
        self.notify_neighbors_changed().await;

        if mode == JoinMode::Ask {
            self.link_origin
                .send(peer, ComponentKind::Mesh, encode(&MeshMessage::RequestState))
                .await;
        }
    }

    /// Spec §4.7 `leave(peer)`.
    async fn leave(&mut self, peer: PeerId) {
        self.neighbors.remove(&peer);
        self.peer_runtime.disconnect(&peer).await;
        self.notify_neighbors_changed().await;
    }

    /// Spec §4.7 `leave_all` (graceful exit): stitch every ordered pair of
    /// current neighbors together before disconnecting from each.
    async fn leave_all(&mut self) {
        let neighbors: Vec<PeerId> = self.neighbors.iter().cloned().collect();
        for (i, n1) in neighbors.iter().enumerate() {
            for n2 in neighbors.iter().skip(i + 1) {
                let (n1, n2) = if n1 < n2 { (n1, n2) } else { (n2, n1) };
                self.link_origin
                    .send(
                        n1.clone(),
                        ComponentKind::Mesh,
                        encode(&MeshMessage::Join {
                            peer: n2.clone(),
                            mode: JoinMode::NoAsk,
                        }),
                    )
                    .await;
                self.link_origin
                    .send(
                        n2.clone(),
                        ComponentKind::Mesh,
                        encode(&MeshMessage::Join {
                            peer: n1.clone(),
                            mode: JoinMode::NoAsk,
                        }),
                    )
                    .await;
            }
        }
        for n in neighbors {
            self.leave(n).await;
        }
    }

    async fn on_deliver(&mut self, from: PeerId, body: Vec<u8>) {
        let msg = match decode(&body) {
            Ok(msg) => msg,
            Err(err) => {
                tracing::warn!(error = %err, "dropping malformed mesh message");
                return;
            }
        };
        match msg {
            MeshMessage::RequestState => {
                let (chars, t_bytes, d_bytes) = self.state_source.snapshot().await;
                self.link_origin
                    .send(
                        from.clone(),
                        ComponentKind::Mesh,
                        encode(&MeshMessage::InstallCrdt { chars }),
                    )
                    .await;
                self.link_origin
                    .send(
                        from,
                        ComponentKind::Mesh,
                        encode(&MeshMessage::InstallVc { t_bytes, d_bytes }),
                    )
                    .await;
            }
            MeshMessage::InstallCrdt { chars } => {
                self.doc_sink.install_snapshot(chars).await;
            }
            MeshMessage::InstallVc { t_bytes, d_bytes } => {
                self.clock_sink.install(t_bytes, d_bytes).await;
            }
            MeshMessage::Join { peer, mode } => {
                self.join(peer, mode).await;
            }
        }
    }

    async fn notify_neighbors_changed(&self) {
        let neighbors: Vec<PeerId> = self.neighbors.iter().cloned().collect();
        for observer in &self.neighbor_observers {
            observer.neighbors_changed(neighbors.clone()).await;
        }
    }
}

/// A cheaply cloneable front for a running [`Mesh`] actor.
#[derive(Clone)]
pub struct MeshHandle {
    tx: mpsc::Sender<Command>,
}

impl MeshHandle {
    pub fn new(tx: mpsc::Sender<Command>) -> Self {
        Self { tx }
    }

    pub async fn join(&self, peer: PeerId, mode: JoinMode) {
        if self.tx.send(Command::Join { peer, mode }).await.is_err() {
            tracing::warn!("Mesh actor gone, dropping join");
        }
    }

    pub async fn leave(&self, peer: PeerId) {
        if self.tx.send(Command::Leave { peer }).await.is_err() {
            tracing::warn!("Mesh actor gone, dropping leave");
        }
    }

    pub async fn leave_all(&self) {
        if self.tx.send(Command::LeaveAll).await.is_err() {
            tracing::warn!("Mesh actor gone, dropping leave_all");
        }
    }
}

#[async_trait]
impl ComponentSink for MeshHandle {
    async fn on_deliver(&self, from: PeerId, body: Vec<u8>) {
        if self
            .tx
            .send(Command::OnDeliver { from, body })
            .await
            .is_err()
        {
            tracing::warn!("Mesh actor gone, dropping on_deliver");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    use p2pdoc_core::{Char, ConnectOutcome, TransientNetworkError};

    fn peer(s: &str) -> PeerId {
        PeerId::new_unchecked(s)
    }

    struct AlwaysConnect;

    #[async_trait]
    impl PeerRuntime for AlwaysConnect {
        async fn connect(&self, _peer: &PeerId) -> Result<ConnectOutcome, TransientNetworkError> {
            Ok(ConnectOutcome::Connected)
        }
        async fn disconnect(&self, _peer: &PeerId) {}
        async fn send_raw(&self, _to: &PeerId, _bytes: Vec<u8>) -> Result<(), TransientNetworkError> {
            Ok(())
        }
    }

    struct RecordingLinkOrigin {
        sent: StdMutex<Vec<(PeerId, Vec<u8>)>>,
    }

    #[async_trait]
    impl LinkOrigin for RecordingLinkOrigin {
        async fn send(&self, to: PeerId, _target: ComponentKind, body: Vec<u8>) {
            self.sent.lock().unwrap().push((to, body));
        }
    }

    struct RecordingObserver {
        seen: StdMutex<Vec<Vec<PeerId>>>,
    }

    #[async_trait]
    impl NeighborObserver for RecordingObserver {
        async fn neighbors_changed(&self, neighbors: Vec<PeerId>) {
            self.seen.lock().unwrap().push(neighbors);
        }
    }

    struct NoopDocSink;
    #[async_trait]
    impl DocSink for NoopDocSink {
        async fn apply_remote_op(&self, _op: p2pdoc_core::Op) {}
        async fn install_snapshot(&self, _chars: Vec<Char>) {}
    }

    struct NoopClockSink;
    #[async_trait]
    impl ClockSink for NoopClockSink {
        async fn install(&self, _t_bytes: Vec<u8>, _d_bytes: Vec<u8>) {}
    }

    struct EmptyStateSource;
    #[async_trait]
    impl StateSource for EmptyStateSource {
        async fn snapshot(&self) -> (Vec<Char>, Vec<u8>, Vec<u8>) {
            (Vec::new(), Vec::new(), Vec::new())
        }
    }

    #[tokio::test]
    async fn join_adds_neighbor_and_notifies_observers() {
        let observer = Arc::new(RecordingObserver {
            seen: StdMutex::new(Vec::new()),
        });
        let link = Arc::new(RecordingLinkOrigin {
            sent: StdMutex::new(Vec::new()),
        });
        let (mesh, tx, _shutdown) = Mesh::new(
            peer("a@1.1.1.1"),
            Arc::new(AlwaysConnect),
            link,
            vec![observer.clone()],
            Arc::new(NoopDocSink),
            Arc::new(NoopClockSink),
            Arc::new(EmptyStateSource),
        );
        tokio::spawn(mesh.run());
        let handle = MeshHandle::new(tx);

        handle.join(peer("b@2.2.2.2"), JoinMode::NoAsk).await;
        tokio::task::yield_now().await;

        let seen = observer.seen.lock().unwrap();
        assert_eq!(seen.last().unwrap(), &vec![peer("b@2.2.2.2")]);
    }

    #[tokio::test]
    async fn leave_all_stitches_remaining_neighbors_pairwise() {
        let link = Arc::new(RecordingLinkOrigin {
            sent: StdMutex::new(Vec::new()),
        });
        let (mesh, tx, _shutdown) = Mesh::new(
            peer("b@2.2.2.2"),
            Arc::new(AlwaysConnect),
            link.clone(),
            Vec::new(),
            Arc::new(NoopDocSink),
            Arc::new(NoopClockSink),
            Arc::new(EmptyStateSource),
        );
        tokio::spawn(mesh.run());
        let handle = MeshHandle::new(tx);

        handle.join(peer("a@1.1.1.1"), JoinMode::NoAsk).await;
        handle.join(peer("c@3.3.3.3"), JoinMode::NoAsk).await;
        tokio::task::yield_now().await;

        handle.leave_all().await;
        tokio::task::yield_now().await;

        let sent = link.sent.lock().unwrap();
        // Both a and c should have been told to join the other.
        assert!(sent
            .iter()
            .any(|(to, _)| *to == peer("a@1.1.1.1")));
        assert!(sent
            .iter()
            .any(|(to, _)| *to == peer("c@3.3.3.3")));
    }
}
