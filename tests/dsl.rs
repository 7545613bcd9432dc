//! DSL tests: syntax (parse success/failure) and semantics (resolve into a schema, then use it).

use protochain::ast::{Literal, TypeSpec};
use protochain::{parse, Codec, CodecError, FieldRule, FieldType, Message, ScalarKind, Value};
use std::sync::Arc;

const FULL: &str = r#"
// every construct the grammar knows
message Base [preserve_unknown] {
  test: int32 = 10 [default(0)];
  tags: list<string> = 3;
  values: list<sint32> = 4 [packed];
  items: map<string, Item> = 5;
  legacy: group<Item> = 6;
  subtype Derived = 2;
}

message Derived {
  foo: string = 11;
}

/* referenced before and after its declaration */
message Item {
  id: uint32 = 1 [strict];
}
"#;

fn resolve_err(src: &str) -> String {
    let file = parse(src).expect("parse");
    match file.resolve() {
        Err(CodecError::Schema(msg)) => msg,
        Err(other) => panic!("expected a schema error, got {}", other),
        Ok(_) => panic!("expected a schema error"),
    }
}

// ==================== Syntax ====================

#[test]
fn parse_empty_schema() {
    let file = parse("").expect("empty schema can parse");
    assert!(file.messages.is_empty());
}

#[test]
fn parse_full_example() {
    let file = parse(FULL).expect("parse");
    assert_eq!(file.messages.len(), 3);
    let base = file.get_message("Base").expect("Base");
    assert!(base.preserve_unknown);
    assert_eq!(base.fields.len(), 5);
    assert_eq!(base.sub_types.len(), 1);
    assert_eq!(base.sub_types[0].name, "Derived");
    assert_eq!(base.sub_types[0].number, 2);

    let test = &base.fields[0];
    assert_eq!(test.number, 10);
    assert_eq!(test.default, Some(Literal::Int(0)));
    assert_eq!(base.fields[1].type_spec, TypeSpec::List(Box::new(TypeSpec::Named("string".into()))));
    assert!(base.fields[2].packed);
    assert_eq!(
        base.fields[3].type_spec,
        TypeSpec::Map {
            key: "string".into(),
            value: Box::new(TypeSpec::Named("Item".into())),
        }
    );
    assert_eq!(base.fields[4].type_spec, TypeSpec::Group("Item".into()));
    assert!(file.get_message("Item").expect("Item").fields[0].strict);
}

#[test]
fn parse_literals() {
    let src = r#"
message L {
  a: uint32 = 1 [default(0x1F)];
  b: sint64 = 2 [default(-3)];
  c: double = 3 [default(1.5)];
  d: bool = 4 [default(true)];
  e: string = 5 [default("say \"hi\"")];
}
"#;
    let file = parse(src).expect("parse");
    let defaults: Vec<_> = file.messages[0]
        .fields
        .iter()
        .map(|f| f.default.clone().expect("default"))
        .collect();
    assert_eq!(
        defaults,
        vec![
            Literal::Hex(0x1F),
            Literal::Int(-3),
            Literal::Float(1.5),
            Literal::Bool(true),
            Literal::String("say \"hi\"".into()),
        ]
    );
}

#[test]
fn parse_escaped_backslash_is_not_reescaped() {
    let src = r#"
message L {
  a: string = 1 [default("a\\n")];
  b: string = 2 [default("tab\there\\")];
}
"#;
    let file = parse(src).expect("parse");
    let fields = &file.messages[0].fields;
    assert_eq!(fields[0].default, Some(Literal::String("a\\n".into())));
    assert_eq!(fields[1].default, Some(Literal::String("tab\there\\".into())));
}

#[test]
fn parse_missing_semicolon_fails() {
    assert!(parse("message M { x: int32 = 1 }").is_err());
}

#[test]
fn parse_missing_field_number_fails() {
    assert!(parse("message M { x: int32; }").is_err());
}

#[test]
fn parse_nested_collection_fails() {
    assert!(parse("message M { x: list<list<int32>> = 1; }").is_err());
}

#[test]
fn parse_unknown_option_fails() {
    assert!(parse("message M { x: int32 = 1 [compressed]; }").is_err());
}

#[test]
fn parse_field_number_out_of_u32_range_fails() {
    let err = parse("message M { x: int32 = 99999999999; }").unwrap_err();
    assert!(err.contains("field number"), "{}", err);
}

// ==================== Semantics ====================

#[test]
fn resolve_full_example() {
    let schema = parse(FULL).expect("parse").resolve().expect("resolve");
    assert_eq!(schema.len(), 3);
    let base = schema.type_id("Base").unwrap();
    let derived = schema.type_id("Derived").unwrap();
    let item = schema.type_id("Item").unwrap();
    assert_eq!(schema.sub_types(base), &[(2, derived)]);

    let def = schema.definition(base).unwrap();
    assert_eq!(def.fields[0].default, Some(Value::I32(0)));
    assert_eq!(def.fields[2].rule, FieldRule::Repeated { packed: true });
    assert_eq!(def.fields[2].ty, FieldType::Scalar(ScalarKind::SInt32));
    assert_eq!(def.fields[3].rule, FieldRule::Map { key: ScalarKind::String });
    assert_eq!(def.fields[3].ty, FieldType::Message(item));
    assert_eq!(def.fields[4].ty, FieldType::Group(item));
}

#[test]
fn resolve_unknown_type() {
    let msg = resolve_err("message A { x: Missing = 1; }");
    assert!(msg.contains("unknown type: Missing"), "{}", msg);
    let msg = resolve_err("message A { subtype Missing = 2; }");
    assert!(msg.contains("unknown type: Missing"), "{}", msg);
}

#[test]
fn resolve_packed_outside_a_list() {
    let msg = resolve_err("message A { x: int32 = 1 [packed]; }");
    assert!(msg.contains("only lists can be packed"), "{}", msg);
}

#[test]
fn resolve_packed_strings() {
    let msg = resolve_err("message A { x: list<string> = 1 [packed]; }");
    assert!(msg.contains("cannot be packed"), "{}", msg);
}

#[test]
fn resolve_default_of_wrong_kind() {
    let msg = resolve_err(r#"message A { x: int32 = 1 [default("no")]; }"#);
    assert!(msg.contains("does not fit"), "{}", msg);
    let msg = resolve_err("message A { x: uint32 = 1 [default(-1)]; }");
    assert!(msg.contains("does not fit"), "{}", msg);
}

#[test]
fn resolve_default_on_a_message_field() {
    let msg = resolve_err("message A { b: B = 1 [default(1)]; } message B { }");
    assert!(msg.contains("cannot have a default value"), "{}", msg);
}

#[test]
fn resolve_float_map_key() {
    let msg = resolve_err("message A { m: map<double, string> = 1; }");
    assert!(msg.contains("map key"), "{}", msg);
}

#[test]
fn resolve_duplicate_field_number() {
    let msg = resolve_err("message A { x: int32 = 1; y: string = 1; }");
    assert!(msg.contains("duplicate field number 1"), "{}", msg);
}

#[test]
fn resolve_sub_type_claimed_twice() {
    let msg = resolve_err(
        "message A { subtype C = 1; } message B { subtype C = 1; } message C { }",
    );
    assert!(msg.contains("sub-type of both"), "{}", msg);
}

// ==================== Using a resolved schema ====================

#[test]
fn dsl_schema_encodes_derived_level_first() {
    let src = r#"
message Base {
  test: int32 = 10;
  subtype Derived = 2;
}
message Derived {
  foo: string = 11;
}
"#;
    let schema = Arc::new(parse(src).expect("parse").resolve().expect("resolve"));
    let derived = schema.type_id("Derived").unwrap();
    let codec = Codec::new(schema);
    let msg = Message::new(derived).with("test", 12345).with("foo", "abc");
    let bytes = codec.encode_message(&msg).expect("encode");
    assert_eq!(bytes, vec![0x12, 0x05, 0x5A, 0x03, 0x61, 0x62, 0x63, 0x50, 0xB9, 0x60]);
    assert_eq!(codec.decode_message("Base", &bytes).expect("decode"), msg);
}

#[test]
fn dsl_schema_handles_every_field_shape() {
    let schema = Arc::new(parse(FULL).expect("parse").resolve().expect("resolve"));
    let base = schema.type_id("Base").unwrap();
    let item = schema.type_id("Item").unwrap();
    let codec = Codec::new(schema);

    let msg = Message::new(base)
        .with("test", 5)
        .with("tags", Value::List(vec!["a".into()]))
        .with("values", Value::List(vec![Value::I32(-1), Value::I32(2)]))
        .with(
            "items",
            Value::Map(vec![("k".into(), Message::new(item).with("id", 3u32).into())]),
        )
        .with("legacy", Message::new(item).with("id", 1u32));
    let bytes = codec.encode_message(&msg).expect("encode");
    #[rustfmt::skip]
    let expected = vec![
        0x1A, 0x01, b'a',                               // 3: "a"
        0x22, 0x02, 0x01, 0x04,                         // 4: packed [-1, 2]
        0x2A, 0x07, 0x0A, 0x01, b'k', 0x12, 0x02, 0x08, 0x03, // 5: {"k": {1: 3}}
        0x33, 0x08, 0x01, 0x34,                         // 6: group {1: 1}
        0x50, 0x05,                                     // 10: 5
    ];
    assert_eq!(bytes, expected);
    assert_eq!(codec.decode_message("Base", &bytes).expect("decode"), msg);
}

#[test]
fn dsl_preserve_unknown_round_trips_foreign_fields() {
    let schema = Arc::new(parse(FULL).expect("parse").resolve().expect("resolve"));
    let base = schema.type_id("Base").unwrap();
    let codec = Codec::new(schema);

    let decoded = codec.decode_message("Base", &[0x48, 0x01, 0x50, 0x05]).expect("decode");
    assert_eq!(decoded.get("test"), Some(&Value::I32(5)));
    assert_eq!(decoded.unknown_fields(base), Some(&[0x48, 0x01][..]));
    let bytes = codec.encode_message(&decoded).expect("encode");
    assert_eq!(bytes, vec![0x50, 0x05, 0x48, 0x01]);
}

#[test]
fn dsl_strict_field_rejects_other_wire_types() {
    let schema = Arc::new(parse(FULL).expect("parse").resolve().expect("resolve"));
    let codec = Codec::new(schema);
    // Item.id arriving as fixed32
    let err = codec.decode_message("Item", &[0x0D, 0x01, 0x00, 0x00, 0x00]).unwrap_err();
    assert!(matches!(err, CodecError::WireFormat { .. }), "{}", err);
    let ok = codec.decode_message("Item", &[0x08, 0x01]).expect("decode");
    assert_eq!(ok.get("id"), Some(&Value::U32(1)));
}
