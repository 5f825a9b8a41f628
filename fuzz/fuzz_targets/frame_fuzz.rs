//! Frame fuzz target: arbitrary bytes go through the static parser in every mode and
//! through a stream reader selecting all protocols. Neither may panic.
//! Build with: cargo fuzz run frame_fuzz (requires nightly and cargo fuzz).

#![cfg_attr(fuzzing, no_main)]

#[cfg(fuzzing)]
use libfuzzer_sys::fuzz_target;

#[cfg(fuzzing)]
fuzz_target!(|data: &[u8]| {
    use qgcproto::{parse, ErrorPolicy, MsgMode, ParseOptions, ProtocolFilter, QgcReader, ReaderOptions};

    for mode in [MsgMode::Get, MsgMode::Set, MsgMode::Poll, MsgMode::SetPoll] {
        for validate in [true, false] {
            let opts = ParseOptions { validate, mode, parse_bitfields: true };
            if let Ok(msg) = parse(data, &opts) {
                let _ = msg.to_string();
                let _ = msg.serialize();
            }
        }
    }

    let options = ReaderOptions {
        protocols: ProtocolFilter::ALL,
        error_policy: ErrorPolicy::Ignore,
        ..ReaderOptions::default()
    };
    for item in QgcReader::new(data, options).with_error_handler(|_| {}) {
        if item.is_err() {
            break;
        }
    }
});

#[cfg(not(fuzzing))]
fn main() {
    eprintln!("Build with: cargo fuzz run frame_fuzz");
}
