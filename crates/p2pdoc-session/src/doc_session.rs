//! The `DocSession` actor (spec §4.8): maps editor edit events onto
//! `DocCRDT` calls, routes outbound operations through `CausalBus`, and
//! drives `Mesh` join/leave on behalf of the editor's connect/disconnect
//! commands.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use p2pdoc_bus::CausalBusHandle;
use p2pdoc_core::{Char, DocSink, EditorSink, NeighborObserver, Op, PeerId};
use p2pdoc_crdt::DocCrdt;
use p2pdoc_mesh::{JoinMode, MeshHandle};

use crate::persistence;

pub enum Command {
    LocalInsert {
        index: usize,
        value: char,
    },
    LocalDelete {
        index: usize,
    },
    Connect {
        peer_address: String,
    },
    Disconnect {
        peer_id: Option<PeerId>,
    },
    GetClientId(oneshot::Sender<PeerId>),
    GetInitialContent(oneshot::Sender<String>),
    ApplyRemoteOp(Op),
    InstallSnapshot(Vec<Char>),
    NeighborsChanged(Vec<PeerId>),
    Snapshot(oneshot::Sender<Vec<Char>>),
}

/// Per-peer editing session state: the live document, the current neighbor
/// set mirrored from `Mesh`, and autosave bookkeeping.
pub struct DocSession {
    doc: DocCrdt,
    neighbors: Vec<PeerId>,
    mailbox: mpsc::Receiver<Command>,
    shutdown: mpsc::Receiver<()>,
    editor_sink: Arc<dyn EditorSink>,
    causal_bus: CausalBusHandle,
    mesh: MeshHandle,
    autosave_threshold: u32,
    edits_since_save: u32,
    save_path: PathBuf,
}

impl DocSession {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        peer_id: PeerId,
        editor_sink: Arc<dyn EditorSink>,
        causal_bus: CausalBusHandle,
        mesh: MeshHandle,
        autosave_threshold: u32,
        save_path: PathBuf,
    ) -> (Self, mpsc::Sender<Command>, mpsc::Sender<()>) {
        let (tx, rx) = mpsc::channel(256);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let session = Self {
            doc: DocCrdt::new(peer_id),
            neighbors: Vec::new(),
            mailbox: rx,
            shutdown: shutdown_rx,
            editor_sink,
            causal_bus,
            mesh,
            autosave_threshold,
            edits_since_save: 0,
            save_path,
        };
        (session, tx, shutdown_tx)
    }

    pub async fn run(mut self) {
        let peer_id = self.doc.peer_id().clone();
        tracing::info!(peer = %peer_id, "DocSession starting");
        loop {
            tokio::select! {
                maybe_cmd = self.mailbox.recv() => {
                    match maybe_cmd {
                        Some(cmd) => self.handle(cmd).await,
                        None => break,
                    }
                }
                _ = self.shutdown.recv() => {
                    tracing::info!(peer = %peer_id, "DocSession shutting down");
                    break;
                }
            }
        }
    }

    async fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::LocalInsert { index, value } => self.local_insert(index, value).await,
            Command::LocalDelete { index } => self.local_delete(index).await,
            Command::Connect { peer_address } => self.connect(peer_address).await,
            Command::Disconnect { peer_id } => self.disconnect(peer_id).await,
            Command::GetClientId(reply) => {
                let _ = reply.send(self.doc.peer_id().clone());
            }
            Command::GetInitialContent(reply) => {
                let _ = reply.send(self.doc.to_text());
            }
            Command::ApplyRemoteOp(op) => self.apply_remote_op(op).await,
            Command::InstallSnapshot(chars) => self.install_snapshot(chars).await,
            Command::NeighborsChanged(neighbors) => self.neighbors_changed(neighbors).await,
            Command::Snapshot(reply) => {
                let _ = reply.send(self.doc.snapshot());
            }
        }
    }

    /// Spec §4.8 `local_insert`: apply locally, broadcast, maybe autosave.
    /// An out-of-range index is a contract violation attributable to the
    /// editor adapter's own index tracking, not a user-visible condition
    /// (spec §7) — it is logged and the edit is dropped.
    async fn local_insert(&mut self, index: usize, value: char) {
        match self.doc.insert_local(index, value) {
            Ok(ch) => {
                self.causal_bus.broadcast(Op::Insert(ch)).await;
                self.after_local_edit().await;
            }
            Err(err) => {
                tracing::warn!(peer = %self.doc.peer_id(), error = %err, "local_insert out of range");
            }
        }
    }

    /// Spec §4.8 `local_delete`.
    async fn local_delete(&mut self, index: usize) {
        match self.doc.delete_local(index) {
            Ok(id) => {
                self.causal_bus.broadcast(Op::Delete(id)).await;
                self.after_local_edit().await;
            }
            Err(err) => {
                tracing::warn!(peer = %self.doc.peer_id(), error = %err, "local_delete out of range");
            }
        }
    }

    async fn after_local_edit(&mut self) {
        self.edits_since_save += 1;
        if self.edits_since_save >= self.autosave_threshold {
            self.autosave();
            self.edits_since_save = 0;
        }
    }

    fn autosave(&self) {
        let content = self.doc.to_text();
        if let Err(err) = persistence::write_autosave(&self.save_path, &content) {
            tracing::warn!(peer = %self.doc.peer_id(), error = %err, "autosave failed");
        }
    }

    /// Spec §4.8 `connect`: parse the address, fail visibly on a malformed
    /// one (the one user-visible contract error per spec §7), otherwise ask
    /// `Mesh` to join and request state.
    async fn connect(&mut self, peer_address: String) {
        match PeerId::parse(&peer_address) {
            Ok(peer) => {
                self.mesh.join(peer, JoinMode::Ask).await;
            }
            Err(_) => {
                self.editor_sink.error("invalid_peer_address").await;
            }
        }
    }

    async fn disconnect(&mut self, peer_id: Option<PeerId>) {
        match peer_id {
            Some(peer) => self.mesh.leave(peer).await,
            None => self.mesh.leave_all().await,
        }
    }

    async fn apply_remote_op(&mut self, op: Op) {
        match op {
            Op::Insert(ch) => {
                if let Some(index) = self.doc.apply_remote_insert(ch.clone()) {
                    if let Some(value) = ch.value {
                        self.editor_sink.remote_insert(index, value).await;
                    }
                }
            }
            Op::Delete(id) => {
                if let Some(index) = self.doc.apply_remote_delete(&id) {
                    self.editor_sink.remote_delete(index).await;
                }
            }
        }
    }

    /// Spec §4.7 state transfer landing on the joiner: rebuild `DocCRDT`
    /// from the snapshot and push a fresh `init` to the editor.
    async fn install_snapshot(&mut self, chars: Vec<Char>) {
        let peer_id = self.doc.peer_id().clone();
        self.doc = DocCrdt::from_snapshot(peer_id.clone(), chars);
        self.editor_sink
            .init(self.doc.to_text(), peer_id, self.neighbors.clone())
            .await;
    }

    /// Spec §4.8: neighbor-set changes are pushed straight to the editor as
    /// a fresh `init` so the client's neighbor list stays current.
    async fn neighbors_changed(&mut self, neighbors: Vec<PeerId>) {
        self.neighbors = neighbors;
        self.editor_sink
            .init(
                self.doc.to_text(),
                self.doc.peer_id().clone(),
                self.neighbors.clone(),
            )
            .await;
    }
}

/// A cheaply cloneable front for a running [`DocSession`] actor.
#[derive(Clone)]
pub struct DocSessionHandle {
    tx: mpsc::Sender<Command>,
}

impl DocSessionHandle {
    pub fn new(tx: mpsc::Sender<Command>) -> Self {
        Self { tx }
    }

    pub async fn local_insert(&self, index: usize, value: char) {
        if self
            .tx
            .send(Command::LocalInsert { index, value })
            .await
            .is_err()
        {
            tracing::warn!("DocSession actor gone, dropping local_insert");
        }
    }

    pub async fn local_delete(&self, index: usize) {
        if self.tx.send(Command::LocalDelete { index }).await.is_err() {
            tracing::warn!("DocSession actor gone, dropping local_delete");
        }
    }

    pub async fn connect(&self, peer_address: String) {
        if self
            .tx
            .send(Command::Connect { peer_address })
            .await
            .is_err()
        {
            tracing::warn!("DocSession actor gone, dropping connect");
        }
    }

    pub async fn disconnect(&self, peer_id: Option<PeerId>) {
        if self.tx.send(Command::Disconnect { peer_id }).await.is_err() {
            tracing::warn!("DocSession actor gone, dropping disconnect");
        }
    }

    pub async fn client_id(&self) -> Option<PeerId> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send(Command::GetClientId(reply_tx)).await.is_err() {
            return None;
        }
        reply_rx.await.ok()
    }

    pub async fn initial_content(&self) -> String {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .tx
            .send(Command::GetInitialContent(reply_tx))
            .await
            .is_err()
        {
            return String::new();
        }
        reply_rx.await.unwrap_or_default()
    }

    pub async fn snapshot(&self) -> Vec<Char> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send(Command::Snapshot(reply_tx)).await.is_err() {
            return Vec::new();
        }
        reply_rx.await.unwrap_or_default()
    }
}

#[async_trait]
impl DocSink for DocSessionHandle {
    async fn apply_remote_op(&self, op: Op) {
        if self.tx.send(Command::ApplyRemoteOp(op)).await.is_err() {
            tracing::warn!("DocSession actor gone, dropping apply_remote_op");
        }
    }

    async fn install_snapshot(&self, chars: Vec<Char>) {
        if self
            .tx
            .send(Command::InstallSnapshot(chars))
            .await
            .is_err()
        {
            tracing::warn!("DocSession actor gone, dropping install_snapshot");
        }
    }
}

#[async_trait]
impl NeighborObserver for DocSessionHandle {
    async fn neighbors_changed(&self, neighbors: Vec<PeerId>) {
        if self
            .tx
            .send(Command::NeighborsChanged(neighbors))
            .await
            .is_err()
        {
            tracing::warn!("DocSession actor gone, dropping neighbors_changed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    use p2pdoc_core::{
        ClockSink, ComponentKind, ComponentSink, ConnectOutcome, LinkOrigin, PeerRuntime,
        StateSource, TransientNetworkError, WaveOrigin,
    };

    fn peer(s: &str) -> PeerId {
        PeerId::new_unchecked(s)
    }

    struct RecordingEditorSink {
        inits: StdMutex<Vec<(String, PeerId, Vec<PeerId>)>>,
        inserts: StdMutex<Vec<(usize, char)>>,
        deletes: StdMutex<Vec<usize>>,
        errors: StdMutex<Vec<&'static str>>,
    }

    impl RecordingEditorSink {
        fn new() -> Self {
            Self {
                inits: StdMutex::new(Vec::new()),
                inserts: StdMutex::new(Vec::new()),
                deletes: StdMutex::new(Vec::new()),
                errors: StdMutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl EditorSink for RecordingEditorSink {
        async fn init(&self, content: String, client_id: PeerId, neighbors: Vec<PeerId>) {
            self.inits.lock().unwrap().push((content, client_id, neighbors));
        }
        async fn remote_insert(&self, index: usize, value: char) {
            self.inserts.lock().unwrap().push((index, value));
        }
        async fn remote_delete(&self, index: usize) {
            self.deletes.lock().unwrap().push(index);
        }
        async fn error(&self, kind: &'static str) {
            self.errors.lock().unwrap().push(kind);
        }
    }

    struct NoopWaveOrigin;
    #[async_trait]
    impl WaveOrigin for NoopWaveOrigin {
        async fn start_wave(&self, _wave_id: Vec<u8>, _envelope: Vec<u8>) {}
    }

    struct RefusingPeerRuntime;
    #[async_trait]
    impl PeerRuntime for RefusingPeerRuntime {
        async fn connect(&self, peer: &PeerId) -> Result<ConnectOutcome, TransientNetworkError> {
            Err(TransientNetworkError::ConnectRefused(peer.to_string()))
        }
        async fn disconnect(&self, _peer: &PeerId) {}
        async fn send_raw(&self, _to: &PeerId, _bytes: Vec<u8>) -> Result<(), TransientNetworkError> {
            Ok(())
        }
    }

    struct NoopLinkOrigin;
    #[async_trait]
    impl LinkOrigin for NoopLinkOrigin {
        async fn send(&self, _to: PeerId, _target: ComponentKind, _body: Vec<u8>) {}
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

    fn make_session(
        editor: Arc<RecordingEditorSink>,
    ) -> (DocSessionHandle, tokio::task::JoinHandle<()>) {
        let (bus, bus_tx, _bus_shutdown) =
            p2pdoc_bus::CausalBus::new(peer("a@1.1.1.1"), Arc::new(NoopWaveOrigin), Arc::new(NoopDoc));
        tokio::spawn(bus.run());
        let causal_bus = CausalBusHandle::new(bus_tx);

        let (mesh, mesh_tx, _mesh_shutdown) = p2pdoc_mesh::Mesh::new(
            peer("a@1.1.1.1"),
            Arc::new(RefusingPeerRuntime),
            Arc::new(NoopLinkOrigin),
            Vec::new(),
            Arc::new(NoopDoc),
            Arc::new(NoopClockSink),
            Arc::new(EmptyStateSource),
        );
        tokio::spawn(mesh.run());
        let mesh = MeshHandle::new(mesh_tx);

        let (session, tx, _shutdown) = DocSession::new(
            peer("a@1.1.1.1"),
            editor,
            causal_bus,
            mesh,
            1000,
            std::env::temp_dir().join("p2pdoc-session-unused.txt"),
        );
        let join = tokio::spawn(session.run());
        (DocSessionHandle::new(tx), join)
    }

    struct NoopDoc;
    #[async_trait]
    impl DocSink for NoopDoc {
        async fn apply_remote_op(&self, _op: Op) {}
        async fn install_snapshot(&self, _chars: Vec<Char>) {}
    }

    #[tokio::test]
    async fn local_insert_then_delete_round_trips_through_content() {
        let editor = Arc::new(RecordingEditorSink::new());
        let (handle, _join) = make_session(editor);

        handle.local_insert(0, 'h').await;
        handle.local_insert(1, 'i').await;
        assert_eq!(handle.initial_content().await, "hi");

        handle.local_delete(1).await;
        assert_eq!(handle.initial_content().await, "h");
    }

    #[tokio::test]
    async fn connect_with_malformed_address_surfaces_editor_error() {
        let editor = Arc::new(RecordingEditorSink::new());
        let (handle, _join) = make_session(editor.clone());

        handle.connect("not-an-address".to_string()).await;
        tokio::task::yield_now().await;

        assert_eq!(editor.errors.lock().unwrap().as_slice(), &["invalid_peer_address"]);
    }

    #[tokio::test]
    async fn remote_insert_notifies_editor_sink() {
        let editor = Arc::new(RecordingEditorSink::new());
        let (handle, _join) = make_session(editor.clone());

        let ch = Char::new(
            p2pdoc_core::CharId::new(peer("b@2.2.2.2"), 0),
            p2pdoc_core::Position::begin(),
            'z',
        );
        // Drive the insert the same way CausalBus would: via the trait.
        let sink: Arc<dyn DocSink> = Arc::new(handle.clone());
        sink.apply_remote_op(Op::Insert(ch)).await;
        tokio::task::yield_now().await;

        // `DocCrdt::new` seeds a sentinel BEGIN char at `Position::begin()`
        // with id `$`; `ch` ties on position and loses the `id` tiebreak
        // (`"$" < "b@2.2.2.2"` bytewise), so it lands at tree rank 2 and
        // `apply_remote_insert` reports index 1.
        assert_eq!(editor.inserts.lock().unwrap().as_slice(), &[(1, 'z')]);
    }
}
