//! C3: byte-prefix key schema for the KV backend.
//!
//! Every key is `prefix-byte | components joined by 0x00`. A single 0x00
//! separator is safe because node/edge IDs and label strings are validated
//! non-empty UTF-8 and 0x00 never appears inside a UTF-8-encoded string, so
//! decoders can split at the first 0x00 after the prefix unambiguously.

const NODE: u8 = 0x01;
const EDGE: u8 = 0x02;
const LABEL_INDEX: u8 = 0x03;
const OUTGOING: u8 = 0x04;
const INCOMING: u8 = 0x05;
const PROPERTY_INDEX: u8 = 0x06;
const RANGE_INDEX: u8 = 0x07;
const COMPOSITE_INDEX: u8 = 0x08;

const SEP: u8 = 0x00;

fn push_sep(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(s.as_bytes());
    buf.push(SEP);
}

/// `node | id`
pub fn node_key(id: &str) -> Vec<u8> {
    let mut buf = vec![NODE];
    buf.extend_from_slice(id.as_bytes());
    buf
}

/// Prefix matching every node row.
pub fn all_nodes_prefix() -> Vec<u8> {
    vec![NODE]
}

/// `edge | id`
pub fn edge_key(id: &str) -> Vec<u8> {
    let mut buf = vec![EDGE];
    buf.extend_from_slice(id.as_bytes());
    buf
}

/// Prefix matching every edge row.
pub fn all_edges_prefix() -> Vec<u8> {
    vec![EDGE]
}

/// Strips the one-byte `node`/`edge` prefix, returning the ID string.
pub fn decode_id_key(key: &[u8]) -> Option<String> {
    if key.is_empty() {
        return None;
    }
    String::from_utf8(key[1..].to_vec()).ok()
}

/// `label-index | lowercase(label) | 0x00 | node_id`
pub fn label_index_key(label: &str, node_id: &str) -> Vec<u8> {
    let mut buf = vec![LABEL_INDEX];
    push_sep(&mut buf, &label.to_lowercase());
    buf.extend_from_slice(node_id.as_bytes());
    buf
}

/// Prefix matching every node ID indexed under `label`.
pub fn label_index_prefix(label: &str) -> Vec<u8> {
    let mut buf = vec![LABEL_INDEX];
    push_sep(&mut buf, &label.to_lowercase());
    buf
}

/// Splits a [`label_index_key`] into `(label, node_id)`.
pub fn decode_label_index_key(key: &[u8]) -> Option<(String, String)> {
    decode_prefixed_pair(key, LABEL_INDEX)
}

/// `outgoing | node_id | 0x00 | edge_id`
pub fn outgoing_key(node_id: &str, edge_id: &str) -> Vec<u8> {
    let mut buf = vec![OUTGOING];
    push_sep(&mut buf, node_id);
    buf.extend_from_slice(edge_id.as_bytes());
    buf
}

/// Prefix matching every outgoing-edge row for `node_id`.
pub fn outgoing_prefix(node_id: &str) -> Vec<u8> {
    let mut buf = vec![OUTGOING];
    push_sep(&mut buf, node_id);
    buf
}

/// `incoming | node_id | 0x00 | edge_id`
pub fn incoming_key(node_id: &str, edge_id: &str) -> Vec<u8> {
    let mut buf = vec![INCOMING];
    push_sep(&mut buf, node_id);
    buf.extend_from_slice(edge_id.as_bytes());
    buf
}

/// Prefix matching every incoming-edge row for `node_id`.
pub fn incoming_prefix(node_id: &str) -> Vec<u8> {
    let mut buf = vec![INCOMING];
    push_sep(&mut buf, node_id);
    buf
}

/// Splits an [`outgoing_key`]/[`incoming_key`] into `(node_id, edge_id)`.
pub fn decode_incidence_key(key: &[u8]) -> Option<(String, String)> {
    if key.first() != Some(&OUTGOING) && key.first() != Some(&INCOMING) {
        return None;
    }
    split_first_sep(&key[1..])
}

/// `property-index | lowercase(label) | 0x00 | property | 0x00 | value_repr | 0x00 | node_id`
pub fn property_index_key(label: &str, property: &str, value_repr: &str, node_id: &str) -> Vec<u8> {
    let mut buf = vec![PROPERTY_INDEX];
    push_sep(&mut buf, &label.to_lowercase());
    push_sep(&mut buf, property);
    push_sep(&mut buf, value_repr);
    buf.extend_from_slice(node_id.as_bytes());
    buf
}

/// Prefix matching every node indexed under `(label, property, value_repr)`.
pub fn property_index_prefix(label: &str, property: &str, value_repr: &str) -> Vec<u8> {
    let mut buf = vec![PROPERTY_INDEX];
    push_sep(&mut buf, &label.to_lowercase());
    push_sep(&mut buf, property);
    push_sep(&mut buf, value_repr);
    buf
}

/// `range-index | lowercase(label) | 0x00 | property | 0x00 | big-endian sortable f64 | 0x00 | node_id`
///
/// The numeric key is encoded so that byte-lexicographic order matches
/// numeric order for any `f64` (flips the sign bit for positives, inverts
/// all bits for negatives).
pub fn range_index_key(label: &str, property: &str, value: f64, node_id: &str) -> Vec<u8> {
    let mut buf = vec![RANGE_INDEX];
    push_sep(&mut buf, &label.to_lowercase());
    push_sep(&mut buf, property);
    buf.extend_from_slice(&sortable_f64(value));
    buf.push(SEP);
    buf.extend_from_slice(node_id.as_bytes());
    buf
}

/// Prefix matching every range-index row for `(label, property)`, for a
/// full ascending scan.
pub fn range_index_prefix(label: &str, property: &str) -> Vec<u8> {
    let mut buf = vec![RANGE_INDEX];
    push_sep(&mut buf, &label.to_lowercase());
    push_sep(&mut buf, property);
    buf
}

/// Encodes `value` so unsigned byte-lexicographic order equals numeric
/// order across the full `f64` range.
pub fn sortable_f64(value: f64) -> [u8; 8] {
    let bits = value.to_bits();
    let flipped = if bits & (1 << 63) != 0 {
        !bits
    } else {
        bits | (1 << 63)
    };
    flipped.to_be_bytes()
}

/// `composite-index | hash (32 bytes, SHA-256) | 0x00 | node_id`
pub fn composite_index_key(hash: &[u8; 32], node_id: &str) -> Vec<u8> {
    let mut buf = vec![COMPOSITE_INDEX];
    buf.extend_from_slice(hash);
    buf.push(SEP);
    buf.extend_from_slice(node_id.as_bytes());
    buf
}

/// Prefix matching every node under a given composite-index hash (full key
/// or a prefix hash, per spec composite-index prefix-lookup support).
pub fn composite_index_prefix(hash_prefix: &[u8]) -> Vec<u8> {
    let mut buf = vec![COMPOSITE_INDEX];
    buf.extend_from_slice(hash_prefix);
    buf
}

fn decode_prefixed_pair(key: &[u8], expect_prefix: u8) -> Option<(String, String)> {
    if key.first() != Some(&expect_prefix) {
        return None;
    }
    split_first_sep(&key[1..])
}

fn split_first_sep(rest: &[u8]) -> Option<(String, String)> {
    let sep_pos = rest.iter().position(|b| *b == SEP)?;
    let first = String::from_utf8(rest[..sep_pos].to_vec()).ok()?;
    let second = String::from_utf8(rest[sep_pos + 1..].to_vec()).ok()?;
    Some((first, second))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_index_key_round_trips() {
        let key = label_index_key("Person", "n1");
        assert!(key.starts_with(&label_index_prefix("PERSON")));
        let (label, node_id) = decode_label_index_key(&key).unwrap();
        assert_eq!(label, "person");
        assert_eq!(node_id, "n1");
    }

    #[test]
    fn incidence_keys_round_trip() {
        let out_key = outgoing_key("a", "e1");
        assert!(out_key.starts_with(&outgoing_prefix("a")));
        let (node_id, edge_id) = decode_incidence_key(&out_key).unwrap();
        assert_eq!(node_id, "a");
        assert_eq!(edge_id, "e1");
    }

    #[test]
    fn sortable_f64_preserves_numeric_order() {
        let values = [-100.0, -1.5, -0.0, 0.0, 1.5, 100.0];
        let mut sorted = values;
        sorted.sort_by(|a, b| sortable_f64(*a).cmp(&sortable_f64(*b)));
        let mut expected = values;
        expected.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(sorted, expected);
    }

    #[test]
    fn range_index_scan_order_matches_value_order() {
        let mut keys = vec![
            range_index_key("Metric", "score", 5.0, "n5"),
            range_index_key("Metric", "score", -3.0, "n-3"),
            range_index_key("Metric", "score", 0.0, "n0"),
        ];
        keys.sort();
        assert!(keys[0].ends_with(b"n-3"));
        assert!(keys[1].ends_with(b"n0"));
        assert!(keys[2].ends_with(b"n5"));
    }
}
