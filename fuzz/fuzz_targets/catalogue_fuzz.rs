//! Catalogue fuzz target: feed arbitrary text to the catalogue loader.
//! Loading must return Ok or Err(String), never panic.
//! Build with: cargo fuzz run catalogue_fuzz (requires nightly and cargo fuzz).

#![cfg_attr(fuzzing, no_main)]

#[cfg(fuzzing)]
use libfuzzer_sys::fuzz_target;

#[cfg(fuzzing)]
fuzz_target!(|data: &[u8]| {
    let s = match std::str::from_utf8(data) {
        Ok(x) => x,
        Err(_) => return,
    };
    let _ = qgcproto::schema::load(s);
});

#[cfg(not(fuzzing))]
fn main() {
    eprintln!("Build with: cargo fuzz run catalogue_fuzz");
}
