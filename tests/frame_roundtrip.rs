//! Integration-level framing tests against the crate's public `codec`
//! surface: multi-frame pipelining through `FrameCodec`, and the
//! `DisplayValue` -> JSON bridge the WebSocket Bridge depends on.

use bytes::BytesMut;
use nodebooks_kernel::codec::value::{DisplayValue, GraphValue, ValueGraph};
use nodebooks_kernel::codec::{self, frame, FrameCodec, FrameKind};
use tokio_util::codec::Decoder;

#[test]
fn frame_codec_decodes_multiple_pipelined_frames_from_one_buffer() {
    let mut codec = FrameCodec::new(1024 * 1024);
    let mut buf = BytesMut::new();

    let hash = frame::job_id_hash("job-1");
    buf.extend_from_slice(&frame::encode_text(FrameKind::Stdout, hash, "first\n", false));
    buf.extend_from_slice(&frame::encode_text(FrameKind::Stdout, hash, "second\n", true));

    let first = codec.decode(&mut buf).unwrap().expect("first frame");
    assert_eq!(first.payload, b"first\n");
    assert!(!first.final_);

    let second = codec.decode(&mut buf).unwrap().expect("second frame");
    assert_eq!(second.payload, b"second\n");
    assert!(second.final_);

    assert!(codec.decode(&mut buf).unwrap().is_none());
}

#[test]
fn frame_codec_handles_a_partial_trailing_frame() {
    let mut codec = FrameCodec::new(1024 * 1024);
    let mut buf = BytesMut::new();
    let complete = frame::encode_text(FrameKind::Log, 1, "done", false);
    let partial = frame::encode_text(FrameKind::Log, 1, "not yet complete", false);

    buf.extend_from_slice(&complete);
    buf.extend_from_slice(&partial[..partial.len() - 3]);

    let decoded = codec.decode(&mut buf).unwrap().expect("the complete frame decodes");
    assert_eq!(decoded.payload, b"done");
    assert!(codec.decode(&mut buf).unwrap().is_none(), "partial trailing frame must not decode yet");
}

#[test]
fn display_value_to_json_preserves_structure() {
    let mut map = std::collections::BTreeMap::new();
    map.insert("ok".to_string(), DisplayValue::Bool(true));
    map.insert("n".to_string(), DisplayValue::Number(2.5));
    map.insert("items".to_string(), DisplayValue::Array(vec![DisplayValue::String("a".into()), DisplayValue::Null]));
    let value = DisplayValue::Map(map);

    let json = value.to_json();
    assert_eq!(json["ok"], serde_json::json!(true));
    assert_eq!(json["n"], serde_json::json!(2.5));
    assert_eq!(json["items"], serde_json::json!(["a", null]));
}

#[test]
fn display_value_circular_sentinel_survives_the_json_bridge() {
    let mut graph = ValueGraph::new();
    let mut entries = std::collections::BTreeMap::new();
    entries.insert("self".to_string(), 0usize);
    graph.insert(0, GraphValue::Map(entries));

    let flattened = graph.flatten(0);
    let encoded = codec::value::encode(&flattened).expect("bincode encode");
    let decoded = codec::value::decode(&encoded).expect("bincode decode");
    let json = decoded.to_json();

    assert_eq!(json["self"], serde_json::json!("[Circular]"));
}
