//! The `CausalBus` actor (spec §4.4): stamps local broadcasts with a vector
//! clock, buffers incoming envelopes, and delivers them to the document in
//! an order that respects causal precedence.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use p2pdoc_clock::VectorClock;
use p2pdoc_core::{ClockSink, DocSink, EnvelopeSink, Op, PeerId, WaveOrigin};

use crate::envelope::{decode, encode, encode_stamp, Envelope};

/// Mailbox commands understood by the [`CausalBus`] actor.
pub enum Command {
    Broadcast(Op),
    ReceiveEnvelope(Envelope),
    Snapshot(oneshot::Sender<(VectorClock, VectorClock)>),
    Install(VectorClock, VectorClock),
}

/// Per-peer causal broadcast state: `T` (own send/merge history) and `D`
/// (delivered-per-origin counters), plus the buffer of envelopes not yet
/// deliverable.
pub struct CausalBus {
    my_id: PeerId,
    t: VectorClock,
    d: VectorClock,
    buffer: Vec<Envelope>,
    mailbox: mpsc::Receiver<Command>,
    shutdown: mpsc::Receiver<()>,
    wave_origin: Arc<dyn WaveOrigin>,
    doc_sink: Arc<dyn DocSink>,
}

impl CausalBus {
    /// Returns `(actor, command_sender, shutdown_sender)`; spawn
    /// `actor.run()` on the runtime and keep the senders to drive it.
    pub fn new(
        my_id: PeerId,
        wave_origin: Arc<dyn WaveOrigin>,
        doc_sink: Arc<dyn DocSink>,
    ) -> (Self, mpsc::Sender<Command>, mpsc::Sender<()>) {
        let (tx, rx) = mpsc::channel(256);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let bus = Self {
            t: VectorClock::with_peer(my_id.clone()),
            d: VectorClock::new(),
            buffer: Vec::new(),
            my_id,
            mailbox: rx,
            shutdown: shutdown_rx,
            wave_origin,
            doc_sink,
        };
        (bus, tx, shutdown_tx)
    }

    pub async fn run(mut self) {
        tracing::info!(peer = %self.my_id, "CausalBus starting");
        loop {
            tokio::select! {
                maybe_cmd = self.mailbox.recv() => {
                    match maybe_cmd {
                        Some(cmd) => self.handle(cmd).await,
                        None => break,
                    }
                }
                _ = self.shutdown.recv() => {
                    tracing::info!(peer = %self.my_id, "CausalBus shutting down");
                    break;
                }
            }
        }
    }

    async fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Broadcast(op) => self.broadcast(op).await,
            Command::ReceiveEnvelope(e) => self.receive(e).await,
            Command::Snapshot(reply) => {
                let _ = reply.send((self.t.clone(), self.d.clone()));
            }
            Command::Install(t, d) => {
                tracing::info!(peer = %self.my_id, "installing transferred vector clocks");
                self.t = t;
                self.d = d;
            }
        }
    }

    /// Spec §4.4 "Broadcast": stamp, then hand off to `EchoWave`. A local
    /// broadcast is never self-delivered through the bus — `DocSession`
    /// already applied it to `DocCRDT` before calling this.
    async fn broadcast(&mut self, op: Op) {
        self.t.increment_mut(&self.my_id);
        let envelope = Envelope {
            origin: self.my_id.clone(),
            stamp: self.t.clone(),
            payload: op,
        };
        let wave_id = encode_stamp(&envelope.stamp);
        let bytes = encode(&envelope);
        self.wave_origin.start_wave(wave_id, bytes).await;
    }

    /// Spec §4.4 "Receive": merge the stamp, buffer the envelope, then
    /// drain every envelope that has become deliverable, in a loop, since
    /// delivering one envelope can make another deliverable.
    async fn receive(&mut self, e: Envelope) {
        self.t.merge_mut(&e.stamp);
        self.buffer.push(e);

        loop {
            let deliverable = self.buffer.iter().position(|e| {
                let bumped = self.d.increment(&e.origin);
                e.stamp.le(&bumped)
            });
            let Some(idx) = deliverable else { break };
            let e = self.buffer.remove(idx);
            self.d.increment_mut(&e.origin);
            self.doc_sink.apply_remote_op(e.payload).await;
        }
    }
}

/// A cheaply cloneable front for a running [`CausalBus`] actor. Implements
/// [`EnvelopeSink`] so `EchoWave` can hand it envelopes without depending on
/// this crate's concrete types.
#[derive(Clone)]
pub struct CausalBusHandle {
    tx: mpsc::Sender<Command>,
}

impl CausalBusHandle {
    pub fn new(tx: mpsc::Sender<Command>) -> Self {
        Self { tx }
    }

    /// Stamp and originate a local operation (spec §4.4 step 1-3).
    pub async fn broadcast(&self, op: Op) {
        if self.tx.send(Command::Broadcast(op)).await.is_err() {
            tracing::warn!("CausalBus actor gone, dropping broadcast");
        }
    }

    /// `(T, D)` for bootstrapping a joiner (spec §4.4 "State handoff").
    pub async fn snapshot(&self) -> (VectorClock, VectorClock) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send(Command::Snapshot(reply_tx)).await.is_err() {
            return (VectorClock::new(), VectorClock::new());
        }
        reply_rx
            .await
            .unwrap_or_else(|_| (VectorClock::new(), VectorClock::new()))
    }

    /// Install a transferred `(T, D)` pair (spec §4.7 state-transfer
    /// contract).
    pub async fn install(&self, t: VectorClock, d: VectorClock) {
        if self.tx.send(Command::Install(t, d)).await.is_err() {
            tracing::warn!("CausalBus actor gone, dropping install");
        }
    }
}

#[async_trait]
impl EnvelopeSink for CausalBusHandle {
    async fn receive(&self, envelope: Vec<u8>) {
        match decode(&envelope) {
            Ok(e) => {
                if self.tx.send(Command::ReceiveEnvelope(e)).await.is_err() {
                    tracing::warn!("CausalBus actor gone, dropping envelope");
                }
            }
            Err(err) => tracing::warn!(error = %err, "dropping malformed envelope"),
        }
    }
}

#[async_trait]
impl ClockSink for CausalBusHandle {
    async fn install(&self, t_bytes: Vec<u8>, d_bytes: Vec<u8>) {
        let t: VectorClock = match bincode::deserialize(&t_bytes) {
            Ok(t) => t,
            Err(err) => {
                tracing::warn!(error = %err, "dropping malformed transferred T clock");
                return;
            }
        };
        let d: VectorClock = match bincode::deserialize(&d_bytes) {
            Ok(d) => d,
            Err(err) => {
                tracing::warn!(error = %err, "dropping malformed transferred D clock");
                return;
            }
        };
        self.install(t, d).await;
    }
}
