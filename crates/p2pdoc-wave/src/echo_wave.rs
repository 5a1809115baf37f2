//! The `EchoWave` actor (spec §4.5): floods a broadcast envelope across the
//! current neighbor mesh using Chang's echo algorithm, suppressing
//! duplicate delivery and reporting completion back to the originator.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use p2pdoc_core::{ComponentKind, ComponentSink, EnvelopeSink, LinkOrigin, NeighborObserver, PeerId, WaveOrigin};

use crate::token::{decode, encode, Token};

/// Bookkeeping for one wave in flight at this peer.
struct Wave {
    parent: PeerId,
    remaining: BTreeSet<PeerId>,
    count: u32,
}

pub enum Command {
    StartWave { wave_id: Vec<u8>, envelope: Vec<u8> },
    OnDeliver { body: Vec<u8> },
    NeighborsChanged(Vec<PeerId>),
}

/// Per-peer echo-wave state: the current neighbor set and every wave
/// presently in flight, keyed by wave id.
pub struct EchoWave {
    id: PeerId,
    neighbors: BTreeSet<PeerId>,
    pending_waves: HashMap<Vec<u8>, Wave>,
    mailbox: mpsc::Receiver<Command>,
    shutdown: mpsc::Receiver<()>,
    envelope_sink: Arc<dyn EnvelopeSink>,
    link_origin: Arc<dyn LinkOrigin>,
}

impl EchoWave {
    pub fn new(
        id: PeerId,
        envelope_sink: Arc<dyn EnvelopeSink>,
        link_origin: Arc<dyn LinkOrigin>,
    ) -> (Self, mpsc::Sender<Command>, mpsc::Sender<()>) {
        let (tx, rx) = mpsc::channel(256);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let wave = Self {
            id,
            neighbors: BTreeSet::new(),
            pending_waves: HashMap::new(),
            mailbox: rx,
            shutdown: shutdown_rx,
            envelope_sink,
            link_origin,
        };
        (wave, tx, shutdown_tx)
    }

    pub async fn run(mut self) {
        tracing::info!(peer = %self.id, "EchoWave starting");
        loop {
            tokio::select! {
                maybe_cmd = self.mailbox.recv() => {
                    match maybe_cmd {
                        Some(cmd) => self.handle(cmd).await,
                        None => break,
                    }
                }
                _ = self.shutdown.recv() => {
                    tracing::info!(peer = %self.id, "EchoWave shutting down");
                    break;
                }
            }
        }
    }

    async fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::StartWave { wave_id, envelope } => {
                let from = self.id.clone();
                self.on_token(from, wave_id, 0, Some(envelope)).await;
            }
            Command::OnDeliver { body } => match decode(&body) {
                Ok(token) => {
                    self.on_token(token.from, token.wave_id, token.count, token.envelope)
                        .await;
                }
                Err(err) => tracing::warn!(error = %err, "dropping malformed wave token"),
            },
            Command::NeighborsChanged(neighbors) => {
                tracing::debug!(peer = %self.id, count = neighbors.len(), "neighbor set updated");
                self.neighbors = neighbors.into_iter().collect();
                // Pending waves keep their recorded `remaining` set
                // unchanged (spec §4.5): a wave that loses a neighbor it
                // is still waiting on stalls rather than misbehaves.
            }
        }
    }

    async fn on_token(&mut self, from: PeerId, wave_id: Vec<u8>, count: u32, env: Option<Vec<u8>>) {
        if !self.pending_waves.contains_key(&wave_id) {
            // First arrival: deliver locally, flood to every neighbor but
            // the one we heard it from, and record the wave.
            if let Some(envelope) = env.clone() {
                self.envelope_sink.receive(envelope).await;
            }
            let children: BTreeSet<PeerId> = self
                .neighbors
                .iter()
                .filter(|n| **n != from)
                .cloned()
                .collect();

            for child in &children {
                let token = Token {
                    wave_id: wave_id.clone(),
                    from: self.id.clone(),
                    count: 0,
                    envelope: env.clone(),
                };
                self.link_origin
                    .send(child.clone(), ComponentKind::EchoWave, encode(&token))
                    .await;
            }

            self.pending_waves.insert(
                wave_id.clone(),
                Wave {
                    parent: from,
                    remaining: children,
                    count: count + 1,
                },
            );
        } else {
            let wave = self
                .pending_waves
                .get_mut(&wave_id)
                .expect("checked contains_key above");
            wave.remaining.remove(&from);
            wave.count += count;
        }

        let Some(wave) = self.pending_waves.get(&wave_id) else {
            return;
        };
        if !wave.remaining.is_empty() {
            return;
        }

        if wave.parent == self.id {
            tracing::info!(peer = %self.id, count = wave.count, "wave complete");
            self.pending_waves.remove(&wave_id);
        } else {
            let token = Token {
                wave_id: wave_id.clone(),
                from: self.id.clone(),
                count: wave.count,
                envelope: None,
            };
            let parent = wave.parent.clone();
            self.pending_waves.remove(&wave_id);
            self.link_origin
                .send(parent, ComponentKind::EchoWave, encode(&token))
                .await;
        }
    }
}

/// A cheaply cloneable front for a running [`EchoWave`] actor.
#[derive(Clone)]
pub struct EchoWaveHandle {
    tx: mpsc::Sender<Command>,
}

impl EchoWaveHandle {
    pub fn new(tx: mpsc::Sender<Command>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl WaveOrigin for EchoWaveHandle {
    async fn start_wave(&self, wave_id: Vec<u8>, envelope: Vec<u8>) {
        if self
            .tx
            .send(Command::StartWave { wave_id, envelope })
            .await
            .is_err()
        {
            tracing::warn!("EchoWave actor gone, dropping start_wave");
        }
    }
}

#[async_trait]
impl ComponentSink for EchoWaveHandle {
    async fn on_deliver(&self, _from: PeerId, body: Vec<u8>) {
        if self.tx.send(Command::OnDeliver { body }).await.is_err() {
            tracing::warn!("EchoWave actor gone, dropping on_deliver");
        }
    }
}

#[async_trait]
impl NeighborObserver for EchoWaveHandle {
    async fn neighbors_changed(&self, neighbors: Vec<PeerId>) {
        if self
            .tx
            .send(Command::NeighborsChanged(neighbors))
            .await
            .is_err()
        {
            tracing::warn!("EchoWave actor gone, dropping neighbor update");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    fn peer(s: &str) -> PeerId {
        PeerId::new_unchecked(s)
    }

    struct RecordingEnvelopeSink {
        received: StdMutex<Vec<Vec<u8>>>,
    }

    #[async_trait]
    impl EnvelopeSink for RecordingEnvelopeSink {
        async fn receive(&self, envelope: Vec<u8>) {
            self.received.lock().unwrap().push(envelope);
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

    #[tokio::test]
    async fn first_arrival_delivers_locally_and_floods_children() {
        let envelope_sink = Arc::new(RecordingEnvelopeSink {
            received: StdMutex::new(Vec::new()),
        });
        let link = Arc::new(RecordingLinkOrigin {
            sent: StdMutex::new(Vec::new()),
        });
        let (wave, tx, _shutdown) = EchoWave::new(peer("a@1.1.1.1"), envelope_sink.clone(), link.clone());
        tokio::spawn(wave.run());
        let handle = EchoWaveHandle::new(tx);

        handle.neighbors_changed(vec![peer("b@2.2.2.2"), peer("c@3.3.3.3")]).await;
        tokio::task::yield_now().await;

        handle.start_wave(vec![1, 2, 3], vec![9, 9]).await;
        tokio::task::yield_now().await;

        assert_eq!(envelope_sink.received.lock().unwrap().len(), 1);
        assert_eq!(link.sent.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn leaf_wave_closes_without_flooding_when_no_other_neighbors() {
        let envelope_sink = Arc::new(RecordingEnvelopeSink {
            received: StdMutex::new(Vec::new()),
        });
        let link = Arc::new(RecordingLinkOrigin {
            sent: StdMutex::new(Vec::new()),
        });
        let (wave, tx, _shutdown) = EchoWave::new(peer("b@2.2.2.2"), envelope_sink.clone(), link.clone());
        tokio::spawn(wave.run());
        let handle = EchoWaveHandle::new(tx);

        // b's only neighbor is the sender a: on first arrival, children is
        // empty, so the wave closes immediately by echoing straight back.
        handle.neighbors_changed(vec![peer("a@1.1.1.1")]).await;
        tokio::task::yield_now().await;

        let token = Token {
            wave_id: vec![1],
            from: peer("a@1.1.1.1"),
            count: 0,
            envelope: Some(vec![7]),
        };
        handle.on_deliver(peer("a@1.1.1.1"), encode(&token)).await;
        tokio::task::yield_now().await;

        assert_eq!(envelope_sink.received.lock().unwrap().len(), 1);
        // Echoes straight back to the parent, a.
        let sent = link.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, peer("a@1.1.1.1"));
    }
}
