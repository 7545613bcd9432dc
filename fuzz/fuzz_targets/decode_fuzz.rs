//! Decoder fuzz target: arbitrary bytes decoded against a small inheritance
//! schema, re-encoded when they decode, and rendered by the raw dumper.
//! Build with: cargo fuzz run decode_fuzz (requires nightly and cargo fuzz).

#![cfg_attr(fuzzing, no_main)]

#[cfg(fuzzing)]
use libfuzzer_sys::fuzz_target;

#[cfg(fuzzing)]
const SCHEMA: &str = r#"
message Base [preserve_unknown] {
  test: int32 = 10;
  values: list<sint64> = 4 [packed];
  items: map<string, Base> = 5;
  legacy: group<Base> = 6;
  subtype Derived = 2;
}
message Derived {
  foo: string = 11;
  next: Base = 12;
}
"#;

#[cfg(fuzzing)]
fuzz_target!(|data: &[u8]| {
    use protochain::{Codec, CodecConfig};
    use std::sync::Arc;

    let schema = match protochain::parse(SCHEMA).ok().and_then(|f| f.resolve().ok()) {
        Some(s) => s,
        None => return,
    };
    let codec = Codec::with_config(Arc::new(schema), CodecConfig::default().with_max_depth(32));
    if let Ok(message) = codec.decode_message("Base", data) {
        let _ = codec.encode_message(&message);
    }
    let _ = protochain::dump::dump_raw(data);
});

#[cfg(not(fuzzing))]
fn main() {
    eprintln!("Build with: cargo fuzz run decode_fuzz");
}
