//! The peer-to-peer wire transport (spec §6 "peer runtime"): plain TCP with
//! a length-prefixed frame, grounded on the same bind/accept/frame shape as
//! `aura_agent::runtime::services::lan_transport` and
//! `aura_agent::runtime::effects::network`.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use p2pdoc_core::{ConnectOutcome, LinkWireSink, PeerId, PeerRuntime, TransientNetworkError};

/// Every frame is a `u32` big-endian length prefix followed by that many
/// bytes. The very first frame on a fresh connection, in either direction,
/// is the sender's own `PeerId`, so the peer on the other end knows `from`
/// without guessing it from the socket address.
async fn write_frame(write: &mut OwnedWriteHalf, bytes: &[u8]) -> std::io::Result<()> {
    write.write_all(&(bytes.len() as u32).to_be_bytes()).await?;
    write.write_all(bytes).await
}

async fn read_frame(read: &mut OwnedReadHalf) -> std::io::Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    read.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;
    let mut buf = vec![0u8; len];
    read.read_exact(&mut buf).await?;
    Ok(buf)
}

struct Connection {
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

/// A `PeerRuntime` backed by real TCP sockets. A connection, once
/// established in either direction, is used bidirectionally: `Link`'s
/// delivers and acks both ride the one socket between two peers.
pub struct TcpPeerRuntime {
    my_id: PeerId,
    wire_port: u16,
    connections: Mutex<HashMap<PeerId, Connection>>,
    link_wire_sink: Arc<dyn LinkWireSink>,
}

impl TcpPeerRuntime {
    pub fn new(my_id: PeerId, wire_port: u16, link_wire_sink: Arc<dyn LinkWireSink>) -> Arc<Self> {
        Arc::new(Self {
            my_id,
            wire_port,
            connections: Mutex::new(HashMap::new()),
            link_wire_sink,
        })
    }

    /// Bind the wire listener and accept inbound connections for the
    /// lifetime of the process. Spawned once at node startup.
    pub async fn listen(self: Arc<Self>) -> std::io::Result<()> {
        let listener = TcpListener::bind(("0.0.0.0", self.wire_port)).await?;
        tracing::info!(peer = %self.my_id, port = self.wire_port, "wire transport listening");
        loop {
            let (stream, addr) = listener.accept().await?;
            let this = self.clone();
            tokio::spawn(async move {
                if let Err(err) = this.accept_inbound(stream).await {
                    tracing::debug!(%addr, error = %err, "inbound wire connection closed");
                }
            });
        }
    }

    async fn accept_inbound(&self, stream: TcpStream) -> std::io::Result<()> {
        let (read, write) = stream.into_split();
        let mut read = read;
        let handshake = read_frame(&mut read).await?;
        let from = PeerId::new_unchecked(String::from_utf8_lossy(&handshake).into_owned());
        self.spawn_pump(from, read, write).await;
        Ok(())
    }

    /// Spawn the read and write loops for one connection and record its
    /// sender, replacing any prior connection to the same peer.
    async fn spawn_pump(&self, peer: PeerId, mut read: OwnedReadHalf, mut write: OwnedWriteHalf) {
        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
        tokio::spawn(async move {
            while let Some(bytes) = rx.recv().await {
                if write_frame(&mut write, &bytes).await.is_err() {
                    break;
                }
            }
        });

        let sink = self.link_wire_sink.clone();
        let read_peer = peer.clone();
        tokio::spawn(async move {
            loop {
                match read_frame(&mut read).await {
                    Ok(bytes) => sink.on_wire_message(read_peer.clone(), bytes).await,
                    Err(_) => break,
                }
            }
        });

        self.connections.lock().insert(peer, Connection { tx });
    }

    fn wire_address(&self, peer: &PeerId) -> Option<String> {
        peer.host().map(|host| format!("{host}:{}", self.wire_port))
    }
}

#[async_trait::async_trait]
impl PeerRuntime for TcpPeerRuntime {
    async fn connect(&self, peer: &PeerId) -> Result<ConnectOutcome, TransientNetworkError> {
        if self.connections.lock().contains_key(peer) {
            return Ok(ConnectOutcome::AlreadyConnected);
        }
        let Some(addr) = self.wire_address(peer) else {
            return Err(TransientNetworkError::PeerUnreachable(peer.to_string()));
        };
        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|_| TransientNetworkError::ConnectRefused(peer.to_string()))?;
        let (read, mut write) = stream.into_split();
        write_frame(&mut write, self.my_id.as_str().as_bytes())
            .await
            .map_err(|_| TransientNetworkError::ConnectRefused(peer.to_string()))?;

        self.spawn_pump(peer.clone(), read, write).await;
        Ok(ConnectOutcome::Connected)
    }

    async fn disconnect(&self, peer: &PeerId) {
        self.connections.lock().remove(peer);
    }

    async fn send_raw(&self, to: &PeerId, bytes: Vec<u8>) -> Result<(), TransientNetworkError> {
        let connections = self.connections.lock();
        let Some(conn) = connections.get(to) else {
            return Err(TransientNetworkError::PeerUnreachable(to.to_string()));
        };
        conn.tx
            .send(bytes)
            .map_err(|_| TransientNetworkError::PeerUnreachable(to.to_string()))
    }
}
