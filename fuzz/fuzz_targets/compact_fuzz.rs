//! Skip arbitrary compact-protocol bytes as a struct. Must not panic or
//! allocate without bound.
//! Build with: cargo fuzz run compact_fuzz (requires nightly and cargo fuzz).

#![cfg_attr(fuzzing, no_main)]

#[cfg(fuzzing)]
use libfuzzer_sys::fuzz_target;

#[cfg(fuzzing)]
fuzz_target!(|data: &[u8]| {
    use thrift_schema::protocol::CompactProtocol;
    use thrift_schema::{Protocol, TType};
    let mut p = CompactProtocol::new(std::io::Cursor::new(data.to_vec()))
        .with_string_limit(1 << 16)
        .with_container_limit(1 << 12);
    let _ = p.skip(TType::STRUCT);
});

#[cfg(not(fuzzing))]
fn main() {
    eprintln!("Build with: cargo fuzz run compact_fuzz");
}
