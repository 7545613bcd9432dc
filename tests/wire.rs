//! Wire-level tests: skipping, framing validation and length backfill, driven
//! through the public FrameReader / FrameWriter API.

use protochain::wire::{self, zigzag_decode64, zigzag_encode64};
use protochain::{CodecError, FrameReader, FrameWriter, SliceSource, StreamSink, StreamSource, WireType};
use std::io::Cursor;

/// One field of every wire type, then `15: 1` as a sentinel.
fn every_wire_type() -> Vec<u8> {
    let mut bytes = vec![0x08, 0xAC, 0x02]; // 1: 300
    bytes.push(0x11); // 2: fixed64
    bytes.extend_from_slice(&wire::encode_fixed64(0x0102_0304_0506_0708));
    bytes.extend_from_slice(&[0x1A, 0x05]); // 3: "hello"
    bytes.extend_from_slice(b"hello");
    bytes.extend_from_slice(&[0x23, 0x08, 0x05, 0x24]); // 4: group { 1: 5 }
    bytes.push(0x2D); // 5: fixed32
    bytes.extend_from_slice(&wire::encode_fixed32(7));
    bytes.extend_from_slice(&[0x33, 0x3B, 0x08, 0x01, 0x3C, 0x34]); // 6: group { 7: group { 1: 1 } }
    bytes.extend_from_slice(&[0x78, 0x01]);
    bytes
}

#[test]
fn skipping_every_wire_type_lands_on_the_next_header() {
    let bytes = every_wire_type();
    let mut src = SliceSource::new(&bytes);
    let mut r = FrameReader::new(&mut src, 16);
    let mut seen = Vec::new();
    loop {
        let field = r.read_field_header().expect("header");
        if field == 0 || field == 15 {
            seen.push(field);
            break;
        }
        seen.push(field);
        r.skip_field().expect("skip");
    }
    assert_eq!(seen, vec![1, 2, 3, 4, 5, 6, 15]);
    assert_eq!(r.read_u32().unwrap(), 1);
    assert_eq!(r.read_field_header().unwrap(), 0);
    assert_eq!(r.depth(), 0);
}

#[test]
fn captured_fields_reassemble_the_input() {
    let bytes = every_wire_type();
    let mut src = SliceSource::new(&bytes);
    let mut r = FrameReader::new(&mut src, 16);
    let mut captured = Vec::new();
    while r.read_field_header().unwrap() != 15 {
        captured.extend(r.capture_field().unwrap());
    }
    assert_eq!(captured, &bytes[..bytes.len() - 2]);
}

#[test]
fn skipping_inside_a_block_keeps_the_block_balanced() {
    // 1: { 2: "ab", 3: 9 }, 4: 1
    let bytes = [0x0A, 0x06, 0x12, 0x02, b'a', b'b', 0x18, 0x09, 0x20, 0x01];
    let mut src = SliceSource::new(&bytes);
    let mut r = FrameReader::new(&mut src, 16);
    assert_eq!(r.read_field_header().unwrap(), 1);
    let token = r.start_sub_item().unwrap();
    assert_eq!(r.depth(), 1);
    while r.read_field_header().unwrap() > 0 {
        r.skip_field().unwrap();
    }
    assert!(r.is_block_end().unwrap());
    r.end_sub_item(token).unwrap();
    assert_eq!(r.read_field_header().unwrap(), 4);
    assert!(r.read_bool().unwrap());
}

#[test]
fn unread_block_content_is_a_framing_error() {
    let bytes = [0x12, 0x02, 0x08, 0x01];
    let mut src = SliceSource::new(&bytes);
    let mut r = FrameReader::new(&mut src, 16);
    r.read_field_header().unwrap();
    let token = r.start_sub_item().unwrap();
    let err = r.end_sub_item(token).unwrap_err();
    assert!(matches!(err, CodecError::Framing { .. }), "{}", err);
    assert!(err.to_string().contains("not read entirely"), "{}", err);
}

#[test]
fn closing_with_another_fields_end_group_is_a_framing_error() {
    // 3: group { 1: 1 } closed by an end-group for field 4
    let bytes = [0x1B, 0x08, 0x01, 0x24];
    let mut src = SliceSource::new(&bytes);
    let mut r = FrameReader::new(&mut src, 16);
    assert_eq!(r.read_field_header().unwrap(), 3);
    let token = r.start_sub_item().unwrap();
    assert_eq!(r.read_field_header().unwrap(), 1);
    assert_eq!(r.read_u32().unwrap(), 1);
    assert_eq!(r.read_field_header().unwrap(), 0);
    let err = r.end_sub_item(token).unwrap_err();
    assert!(err.to_string().contains("wrong group was ended"), "{}", err);
}

#[test]
fn inner_length_past_the_outer_block_is_rejected() {
    // 1: { 2: <5 bytes> } but the outer block only holds 3
    let bytes = [0x0A, 0x03, 0x12, 0x05, 0x00];
    let mut src = SliceSource::new(&bytes);
    let mut r = FrameReader::new(&mut src, 16);
    r.read_field_header().unwrap();
    let _outer = r.start_sub_item().unwrap();
    assert_eq!(r.read_field_header().unwrap(), 2);
    assert!(matches!(r.start_sub_item(), Err(CodecError::Framing { .. })));
}

#[test]
fn non_boolean_varint_is_rejected() {
    let bytes = [0x08, 0x02];
    let mut src = SliceSource::new(&bytes);
    let mut r = FrameReader::new(&mut src, 16);
    r.read_field_header().unwrap();
    assert!(matches!(r.read_bool(), Err(CodecError::WireFormat { .. })));
}

/// `1: { 2: <payload> }` as the encoder must lay it out.
fn nested_bytes(payload: &[u8]) -> Vec<u8> {
    let mut inner = vec![0x12];
    wire::write_varint(&mut inner, payload.len() as u64);
    inner.extend_from_slice(payload);
    let mut outer = vec![0x0A];
    wire::write_varint(&mut outer, inner.len() as u64);
    outer.extend(inner);
    outer
}

fn write_nested(w: &mut FrameWriter<'_>, payload: &[u8]) -> Result<(), CodecError> {
    w.write_field_header(1, WireType::LengthDelimited)?;
    let token = w.start_sub_item(None)?;
    w.write_field_header(2, WireType::LengthDelimited)?;
    w.write_bytes(payload)?;
    w.end_sub_item(token)
}

#[test]
fn long_payload_widens_the_length_placeholder() {
    let payload = vec![0x5Au8; 200];
    let expected = nested_bytes(&payload);
    // 200 + 3 header bytes needs a two-byte length
    assert_eq!(&expected[..3], &[0x0A, 0xCB, 0x01]);

    let mut out = Vec::new();
    let mut w = FrameWriter::new(&mut out, 16);
    write_nested(&mut w, &payload).unwrap();
    w.close().unwrap();
    assert_eq!(out, expected);
}

#[test]
fn nested_widening_matches_on_a_stream_sink() {
    let payload = vec![0x01u8; 130];
    let mut sink = StreamSink::new(Vec::new());
    let mut w = FrameWriter::new(&mut sink, 16);
    w.write_field_header(3, WireType::LengthDelimited).unwrap();
    let token = w.start_sub_item(None).unwrap();
    write_nested(&mut w, &payload).unwrap();
    w.end_sub_item(token).unwrap();
    w.close().unwrap();
    let out = sink.into_inner().unwrap();

    let inner = nested_bytes(&payload);
    let mut expected = vec![0x1A];
    wire::write_varint(&mut expected, inner.len() as u64);
    expected.extend(inner);
    assert_eq!(out, expected);
}

#[test]
fn packed_block_omits_element_headers() {
    let mut out = Vec::new();
    let mut w = FrameWriter::new(&mut out, 16);
    w.write_field_header(4, WireType::LengthDelimited).unwrap();
    let token = w.start_sub_item(None).unwrap();
    w.set_packed_field(4).unwrap();
    for v in [2u32, 1, 300] {
        w.write_field_header(4, WireType::Varint).unwrap();
        w.write_u32(v).unwrap();
    }
    assert!(w.write_field_header(5, WireType::Varint).is_err());
    w.clear_packed_field(4).unwrap();
    w.end_sub_item(token).unwrap();
    w.close().unwrap();
    assert_eq!(out, [0x22, 0x04, 0x02, 0x01, 0xAC, 0x02]);
}

#[test]
fn closing_with_an_open_sub_item_fails() {
    let mut out = Vec::new();
    let mut w = FrameWriter::new(&mut out, 16);
    w.write_field_header(1, WireType::LengthDelimited).unwrap();
    let _token = w.start_sub_item(None).unwrap();
    assert!(matches!(w.close(), Err(CodecError::Framing { .. })));
}

#[test]
fn signed_varint_and_narrowing_writes() {
    let mut out = Vec::new();
    let mut w = FrameWriter::new(&mut out, 16);
    w.write_field_header(1, WireType::SignedVarint).unwrap();
    w.write_i32(-2).unwrap();
    w.write_field_header(2, WireType::Fixed32).unwrap();
    assert!(matches!(w.write_u64(1 << 40), Err(CodecError::Overflow { .. })));
    assert_eq!(out, [0x08, 0x03, 0x15]);
}

#[test]
fn stream_source_reads_like_a_slice() {
    let bytes = every_wire_type();
    let mut src = StreamSource::new(Cursor::new(bytes.clone()));
    let mut r = FrameReader::new(&mut src, 16);
    assert_eq!(r.read_field_header().unwrap(), 1);
    assert_eq!(r.read_u64().unwrap(), 300);
    assert_eq!(r.read_field_header().unwrap(), 2);
    assert_eq!(r.read_u64().unwrap(), 0x0102_0304_0506_0708);
    assert_eq!(r.read_field_header().unwrap(), 3);
    assert_eq!(r.read_string().unwrap(), "hello");
    while r.read_field_header().unwrap() != 15 {
        r.skip_field().unwrap();
    }
    assert_eq!(r.read_i64().unwrap(), 1);
    assert_eq!(r.read_field_header().unwrap(), 0);
    assert_eq!(r.position(), bytes.len() as u64);
}

#[test]
fn zigzag_keeps_small_magnitudes_short() {
    for (v, len) in [(0i64, 1), (-1, 1), (63, 1), (-64, 1), (64, 2), (i64::MIN, 10)] {
        assert_eq!(wire::varint_len(zigzag_encode64(v)), len, "{}", v);
        assert_eq!(zigzag_decode64(zigzag_encode64(v)), v);
    }
}

/// `1: <length 2^63 + 1>` with no payload behind it.
const HUGE_LENGTH: [u8; 11] = [0x0A, 0x81, 0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x01];

#[test]
fn huge_declared_length_fails_without_allocating() {
    let mut src = SliceSource::new(&HUGE_LENGTH);
    let mut r = FrameReader::new(&mut src, 16);
    assert_eq!(r.read_field_header().unwrap(), 1);
    let err = r.read_bytes().unwrap_err();
    assert!(matches!(err, CodecError::EndOfStream { .. }), "{}", err);

    let mut src = StreamSource::new(Cursor::new(HUGE_LENGTH.to_vec()));
    let mut r = FrameReader::new(&mut src, 16);
    assert_eq!(r.read_field_header().unwrap(), 1);
    assert!(r.read_string().is_err());
}

#[test]
fn uint32_varint_is_bounded_to_five_bytes() {
    let bytes = [0x08, 0xFF, 0xFF, 0xFF, 0xFF, 0x0F, 0x10, 0x80, 0x80, 0x80, 0x80, 0x10];
    let mut src = SliceSource::new(&bytes);
    let mut r = FrameReader::new(&mut src, 16);
    assert_eq!(r.read_field_header().unwrap(), 1);
    assert_eq!(r.read_u32().unwrap(), u32::MAX);
    assert_eq!(r.read_field_header().unwrap(), 2);
    let err = r.read_u32().unwrap_err();
    assert!(matches!(err, CodecError::Overflow { .. }), "{}", err);
    assert_eq!(err.position().unwrap().field, 2);
}
