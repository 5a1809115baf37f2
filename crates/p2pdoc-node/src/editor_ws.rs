//! The editor WebSocket protocol edge (spec §6 "Editor protocol"): the one
//! piece of the node binary that talks JSON instead of bincode, bridging
//! the browser editor (out of scope itself) to `DocSession`.

use std::sync::Arc;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use p2pdoc_core::{EditorSink, PeerId};
use p2pdoc_session::{ClientMessage, OperationMessage, ServerMessage};

use crate::wiring::NodeHandles;

/// Fans `DocSession`'s notifications out to whichever editor client is
/// currently attached. A node serves one logical editor (one browser tab);
/// a freshly connected client simply replaces the previous one.
pub struct SharedEditorSink {
    client: RwLock<Option<mpsc::UnboundedSender<ServerMessage>>>,
}

impl SharedEditorSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            client: RwLock::new(None),
        })
    }

    fn attach(&self, tx: mpsc::UnboundedSender<ServerMessage>) {
        *self.client.write() = Some(tx);
    }

    fn detach(&self) {
        *self.client.write() = None;
    }

    fn push(&self, msg: ServerMessage) {
        if let Some(tx) = self.client.read().as_ref() {
            let _ = tx.send(msg);
        }
    }
}

#[async_trait]
impl EditorSink for SharedEditorSink {
    async fn init(&self, content: String, client_id: PeerId, neighbors: Vec<PeerId>) {
        self.push(ServerMessage::Init {
            client_id: client_id.to_string(),
            content,
            neighbors: neighbors.iter().map(PeerId::to_string).collect(),
        });
    }

    async fn remote_insert(&self, index: usize, value: char) {
        self.push(ServerMessage::Operations {
            operations: vec![OperationMessage::Insert { index, char: value }],
        });
    }

    async fn remote_delete(&self, index: usize) {
        self.push(ServerMessage::Operations {
            operations: vec![OperationMessage::Delete { index }],
        });
    }

    async fn error(&self, kind: &'static str) {
        self.push(ServerMessage::Error { message: kind });
    }
}

/// Accept editor connections for the lifetime of the process.
pub async fn serve(
    port: u16,
    handles: Arc<NodeHandles>,
    editor_sink: Arc<SharedEditorSink>,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, "editor protocol listening");
    loop {
        let (stream, addr) = listener.accept().await?;
        let handles = handles.clone();
        let editor_sink = editor_sink.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_connection(stream, handles, editor_sink).await {
                tracing::debug!(%addr, error = %err, "editor connection closed");
            }
        });
    }
}

async fn handle_connection(
    stream: tokio::net::TcpStream,
    handles: Arc<NodeHandles>,
    editor_sink: Arc<SharedEditorSink>,
) -> anyhow::Result<()> {
    let ws = tokio_tungstenite::accept_async(stream).await?;
    let (mut write, mut read) = ws.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    editor_sink.attach(tx.clone());

    send_init(&handles, &tx).await;

    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let Ok(text) = serde_json::to_string(&msg) else {
                continue;
            };
            if write.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = read.next().await {
        let frame = frame?;
        let Message::Text(text) = frame else {
            continue;
        };
        let Ok(client_msg) = serde_json::from_str::<ClientMessage>(&text) else {
            tracing::warn!(%text, "dropping malformed editor message");
            continue;
        };
        dispatch(client_msg, &handles, &tx).await;
    }

    editor_sink.detach();
    writer.abort();
    Ok(())
}

async fn send_init(handles: &NodeHandles, tx: &mpsc::UnboundedSender<ServerMessage>) {
    let client_id = handles
        .doc_session
        .client_id()
        .await
        .map(|id| id.to_string())
        .unwrap_or_default();
    let content = handles.doc_session.initial_content().await;
    let _ = tx.send(ServerMessage::Init {
        client_id,
        content,
        neighbors: Vec::new(),
    });
}

async fn dispatch(
    msg: ClientMessage,
    handles: &NodeHandles,
    tx: &mpsc::UnboundedSender<ServerMessage>,
) {
    match msg {
        ClientMessage::Ping => {
            let _ = tx.send(ServerMessage::Pong);
        }
        ClientMessage::GetClientId => send_init(handles, tx).await,
        ClientMessage::Connect { peer_address } => {
            handles.doc_session.connect(peer_address).await;
        }
        ClientMessage::Disconnect { peer_id } => {
            let peer_id = peer_id.and_then(|s| PeerId::parse(&s).ok());
            handles.doc_session.disconnect(peer_id).await;
        }
        ClientMessage::Insert {
            index,
            char,
            client_id: _,
        } => {
            handles.doc_session.local_insert(index, char).await;
        }
        ClientMessage::Delete {
            index,
            client_id: _,
        } => {
            if let Some(index) = index.as_u64() {
                handles.doc_session.local_delete(index as usize).await;
            }
        }
    }
}
