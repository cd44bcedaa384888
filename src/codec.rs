//! C2: stable, versioned node/edge encode/decode over [`crate::kv`] values.
//!
//! Every encoded record is prefixed with a one-byte format version so a
//! future on-disk format change can add a new `CODEC_V2` branch to
//! `decode_node`/`decode_edge` without invalidating existing stores.

use serde::{Deserialize, Serialize};

use crate::error::{GraphError, Result};
use crate::model::{Edge, Node};

/// Current on-disk record version.
pub const CODEC_VERSION: u8 = 1;

/// Encodes a [`Node`] as a versioned byte string.
pub fn encode_node(node: &Node) -> Result<Vec<u8>> {
    encode(node)
}

/// Decodes a [`Node`] previously produced by [`encode_node`].
pub fn decode_node(bytes: &[u8]) -> Result<Node> {
    decode(bytes)
}

/// Encodes an [`Edge`] as a versioned byte string.
pub fn encode_edge(edge: &Edge) -> Result<Vec<u8>> {
    encode(edge)
}

/// Decodes an [`Edge`] previously produced by [`encode_edge`].
pub fn decode_edge(bytes: &[u8]) -> Result<Edge> {
    decode(bytes)
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buf = vec![CODEC_VERSION];
    serde_json::to_writer(&mut buf, value)
        .map_err(|e| GraphError::Serialization(format!("encode failed: {e}")))?;
    Ok(buf)
}

fn decode<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T> {
    let (version, payload) = bytes
        .split_first()
        .ok_or_else(|| GraphError::Serialization("empty record".into()))?;
    match version {
        1 => serde_json::from_slice(payload)
            .map_err(|e| GraphError::Serialization(format!("decode failed: {e}"))),
        other => Err(GraphError::Serialization(format!(
            "unsupported codec version: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_round_trips() {
        let node = Node::new("n1")
            .with_label("Person")
            .with_property("age", crate::model::Value::Int(30));
        let encoded = encode_node(&node).unwrap();
        assert_eq!(encoded[0], CODEC_VERSION);
        let decoded = decode_node(&encoded).unwrap();
        assert_eq!(node, decoded);
    }

    #[test]
    fn edge_round_trips() {
        let edge = Edge::new("e1", "a", "b", "KNOWS")
            .with_property("since", crate::model::Value::Int(2020));
        let encoded = encode_edge(&edge).unwrap();
        let decoded = decode_edge(&encoded).unwrap();
        assert_eq!(edge, decoded);
    }

    #[test]
    fn unsupported_version_is_rejected() {
        let mut bytes = encode_node(&Node::new("n1")).unwrap();
        bytes[0] = 0xFF;
        let err = decode_node(&bytes).unwrap_err();
        assert!(matches!(err, GraphError::Serialization(_)));
    }

    #[test]
    fn empty_record_is_rejected() {
        let err = decode_node(&[]).unwrap_err();
        assert!(matches!(err, GraphError::Serialization(_)));
    }
}
