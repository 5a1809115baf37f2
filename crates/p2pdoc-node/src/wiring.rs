//! Actor-graph wiring. `CausalBus`, `EchoWave`, `Link`, `Mesh`, and
//! `DocSession` each need a trait-object handle to one or more of the
//! others *at construction time*, but the handles only exist once their
//! owning actor has been spawned — the five form a genuine construction
//! cycle. [`LateBound`] breaks it: a trait implementation is handed out
//! before the concrete handle exists, and bound to it once the owning
//! actor is up, mirroring the injected-trait-object style
//! `p2pdoc_core::interfaces` already uses for test doubles.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::OnceCell;

use p2pdoc_bus::{CausalBus, CausalBusHandle};
use p2pdoc_core::{
    Char, ClockSink, ComponentKind, ComponentSink, DocSink, EditorSink, EnvelopeSink, LinkOrigin,
    LinkWireSink, NeighborObserver, NodeConfig, Op, PeerId, PeerRuntime, StateSource, WaveOrigin,
};
use p2pdoc_mesh::{Mesh, MeshHandle};
use p2pdoc_session::{DocSession, DocSessionHandle};
use p2pdoc_wave::{EchoWave, EchoWaveHandle};

use crate::transport::TcpPeerRuntime;

/// A trait-object placeholder filled exactly once, after construction, with
/// the concrete handle it forwards to. Reading before binding is a wiring
/// bug, not a runtime condition — actors never exchange messages until
/// every placeholder used in this module has been bound.
pub struct LateBound<H> {
    inner: OnceCell<H>,
}

impl<H: Clone> LateBound<H> {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: OnceCell::new(),
        })
    }

    fn bind(&self, handle: H) {
        self.inner
            .set(handle)
            .unwrap_or_else(|_| panic!("LateBound handle bound twice"));
    }

    fn get(&self) -> H {
        self.inner
            .get()
            .expect("LateBound handle read before the actor graph finished wiring")
            .clone()
    }
}

#[async_trait]
impl WaveOrigin for LateBound<EchoWaveHandle> {
    async fn start_wave(&self, wave_id: Vec<u8>, envelope: Vec<u8>) {
        self.get().start_wave(wave_id, envelope).await;
    }
}

#[async_trait]
impl ComponentSink for LateBound<EchoWaveHandle> {
    async fn on_deliver(&self, from: PeerId, body: Vec<u8>) {
        self.get().on_deliver(from, body).await;
    }
}

#[async_trait]
impl NeighborObserver for LateBound<EchoWaveHandle> {
    async fn neighbors_changed(&self, neighbors: Vec<PeerId>) {
        self.get().neighbors_changed(neighbors).await;
    }
}

#[async_trait]
impl EnvelopeSink for LateBound<CausalBusHandle> {
    async fn receive(&self, envelope: Vec<u8>) {
        self.get().receive(envelope).await;
    }
}

#[async_trait]
impl ClockSink for LateBound<CausalBusHandle> {
    async fn install(&self, t_bytes: Vec<u8>, d_bytes: Vec<u8>) {
        ClockSink::install(&self.get(), t_bytes, d_bytes).await;
    }
}

#[async_trait]
impl LinkOrigin for LateBound<p2pdoc_link::LinkHandle> {
    async fn send(&self, to: PeerId, target: ComponentKind, body: Vec<u8>) {
        self.get().send(to, target, body).await;
    }
}

#[async_trait]
impl LinkWireSink for LateBound<p2pdoc_link::LinkHandle> {
    async fn on_wire_message(&self, from: PeerId, bytes: Vec<u8>) {
        self.get().on_wire_message(from, bytes).await;
    }
}

#[async_trait]
impl ComponentSink for LateBound<MeshHandle> {
    async fn on_deliver(&self, from: PeerId, body: Vec<u8>) {
        self.get().on_deliver(from, body).await;
    }
}

#[async_trait]
impl DocSink for LateBound<DocSessionHandle> {
    async fn apply_remote_op(&self, op: Op) {
        self.get().apply_remote_op(op).await;
    }

    async fn install_snapshot(&self, chars: Vec<Char>) {
        self.get().install_snapshot(chars).await;
    }
}

#[async_trait]
impl NeighborObserver for LateBound<DocSessionHandle> {
    async fn neighbors_changed(&self, neighbors: Vec<PeerId>) {
        self.get().neighbors_changed(neighbors).await;
    }
}

/// `Mesh`'s answer to a joiner's `RequestState`: combines `DocSession`'s
/// CRDT snapshot with `CausalBus`'s `(T, D)` pair (spec §4.7 state
/// transfer). Built from the same late-bound placeholders as everything
/// else, so it can be constructed before either actor exists.
struct NodeStateSource {
    doc_session: Arc<LateBound<DocSessionHandle>>,
    causal_bus: Arc<LateBound<CausalBusHandle>>,
}

#[async_trait]
impl StateSource for NodeStateSource {
    async fn snapshot(&self) -> (Vec<Char>, Vec<u8>, Vec<u8>) {
        let chars = self.doc_session.get().snapshot().await;
        let (t, d) = self.causal_bus.get().snapshot().await;
        (
            chars,
            bincode::serialize(&t).unwrap_or_default(),
            bincode::serialize(&d).unwrap_or_default(),
        )
    }
}

/// Every actor handle a running node needs to expose to its WebSocket and
/// CLI edges.
pub struct NodeHandles {
    pub doc_session: DocSessionHandle,
    pub mesh: MeshHandle,
    pub causal_bus: CausalBusHandle,
}

/// Construct the full actor graph for one peer, spawn every actor, and
/// return handles the node's external edges (WebSocket, CLI) drive.
pub fn spawn_node(config: &NodeConfig, editor_sink: Arc<dyn EditorSink>) -> (NodeHandles, Arc<TcpPeerRuntime>) {
    let my_id = PeerId::parse(&config.peer_id).expect("peer_id validated at config load");

    let late_echo_wave: Arc<LateBound<EchoWaveHandle>> = LateBound::new();
    let late_causal_bus: Arc<LateBound<CausalBusHandle>> = LateBound::new();
    let late_link: Arc<LateBound<p2pdoc_link::LinkHandle>> = LateBound::new();
    let late_mesh: Arc<LateBound<MeshHandle>> = LateBound::new();
    let late_doc_session: Arc<LateBound<DocSessionHandle>> = LateBound::new();

    let tcp_runtime = TcpPeerRuntime::new(my_id.clone(), config.wire_port, late_link.clone());
    let peer_runtime: Arc<dyn PeerRuntime> = tcp_runtime.clone();

    let state_source: Arc<dyn StateSource> = Arc::new(NodeStateSource {
        doc_session: late_doc_session.clone(),
        causal_bus: late_causal_bus.clone(),
    });

    let (bus, bus_tx, _bus_shutdown) = CausalBus::new(
        my_id.clone(),
        late_echo_wave.clone() as Arc<dyn WaveOrigin>,
        late_doc_session.clone() as Arc<dyn DocSink>,
    );
    let causal_bus = CausalBusHandle::new(bus_tx);
    late_causal_bus.bind(causal_bus.clone());

    let (wave, wave_tx, _wave_shutdown) = EchoWave::new(
        my_id.clone(),
        late_causal_bus.clone() as Arc<dyn EnvelopeSink>,
        late_link.clone() as Arc<dyn LinkOrigin>,
    );
    let echo_wave = EchoWaveHandle::new(wave_tx);
    late_echo_wave.bind(echo_wave.clone());

    let (link, link_tx, _link_shutdown) = p2pdoc_link::Link::new(
        my_id.clone(),
        config.retry_interval(),
        peer_runtime.clone(),
        late_echo_wave.clone() as Arc<dyn ComponentSink>,
        late_mesh.clone() as Arc<dyn ComponentSink>,
    );
    let link_handle = p2pdoc_link::LinkHandle::new(link_tx);
    late_link.bind(link_handle.clone());

    let (mesh, mesh_tx, _mesh_shutdown) = Mesh::new(
        my_id.clone(),
        peer_runtime.clone(),
        late_link.clone() as Arc<dyn LinkOrigin>,
        vec![
            late_echo_wave.clone() as Arc<dyn NeighborObserver>,
            late_doc_session.clone() as Arc<dyn NeighborObserver>,
        ],
        late_doc_session.clone() as Arc<dyn DocSink>,
        late_causal_bus.clone() as Arc<dyn ClockSink>,
        state_source,
    );
    let mesh_handle = MeshHandle::new(mesh_tx);
    late_mesh.bind(mesh_handle.clone());

    let (session, session_tx, _session_shutdown) = DocSession::new(
        my_id.clone(),
        editor_sink,
        causal_bus.clone(),
        mesh_handle.clone(),
        config.autosave_threshold,
        config.save_path(),
    );
    let doc_session = DocSessionHandle::new(session_tx);
    late_doc_session.bind(doc_session.clone());

    tokio::spawn(bus.run());
    tokio::spawn(wave.run());
    tokio::spawn(link.run());
    tokio::spawn(mesh.run());
    tokio::spawn(session.run());

    (
        NodeHandles {
            doc_session,
            mesh: mesh_handle,
            causal_bus,
        },
        tcp_runtime,
    )
}

/// Where the crash-recovery snapshot for this peer lives, alongside the
/// plain-text autosave (spec §9 "Process-wide state").
pub fn state_snapshot_path(config: &NodeConfig) -> PathBuf {
    let filename = config.peer_id.replace(['@', '.'], "_");
    config.save_dir.join(format!("{filename}.state"))
}

/// Restore a peer's document and causal-clock state from its last
/// crash-recovery snapshot, if one exists (supplemented feature 1).
pub async fn restore_from_snapshot(config: &NodeConfig, handles: &NodeHandles) {
    let path = state_snapshot_path(config);
    let Some((chars, t, d)) = p2pdoc_session::persistence::read_state_snapshot(&path) else {
        return;
    };
    tracing::info!(peer = %config.peer_id, "restoring state from crash-recovery snapshot");
    handles.doc_session.install_snapshot(chars).await;
    handles.causal_bus.install(t, d).await;
}
