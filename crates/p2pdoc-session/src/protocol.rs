//! The editor JSON protocol (spec §6): full-duplex, one message per frame,
//! `type`-tagged in the manner of a WebSocket application protocol.

use serde::{Deserialize, Serialize};

/// Client → server. `index` on `Delete` is `serde_json::Value` because the
/// wire allows the literal string `"marker"` in place of a numeric index;
/// the handler treats that as a no-op (spec §6: `local_delete` only "if
/// index≠\"marker\"").
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Ping,
    GetClientId,
    Connect {
        peer_address: String,
    },
    Disconnect {
        #[serde(default)]
        peer_id: Option<String>,
    },
    Insert {
        index: usize,
        char: char,
        #[serde(default)]
        client_id: Option<String>,
    },
    Delete {
        index: serde_json::Value,
        #[serde(default)]
        client_id: Option<String>,
    },
}

/// Server → client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Init {
        client_id: String,
        content: String,
        neighbors: Vec<String>,
    },
    Operations {
        operations: Vec<OperationMessage>,
    },
    Error {
        message: &'static str,
    },
    Ping,
    Pong,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperationMessage {
    Insert { index: usize, char: char },
    Delete { index: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delete_with_marker_index_parses_as_non_numeric() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"delete","index":"marker","client_id":"a@1.1.1.1"}"#)
                .unwrap();
        match msg {
            ClientMessage::Delete { index, .. } => assert!(index.as_u64().is_none()),
            _ => panic!("expected Delete"),
        }
    }

    #[test]
    fn insert_round_trips_through_json() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"insert","index":1,"char":"x","client_id":"a@1.1.1.1"}"#)
                .unwrap();
        assert!(matches!(msg, ClientMessage::Insert { index: 1, char: 'x', .. }));
    }

    #[test]
    fn server_init_serializes_with_tag() {
        let msg = ServerMessage::Init {
            client_id: "a@1.1.1.1".to_string(),
            content: "hi".to_string(),
            neighbors: vec!["b@2.2.2.2".to_string()],
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""type":"init""#));
        assert!(json.contains(r#""content":"hi""#));
    }
}
