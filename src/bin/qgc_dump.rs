//! Dump the frames of a QGC capture (file or stdin), one per line.
//!
//! Usage:
//!   qgc_dump [OPTIONS] [FILE]
//!
//! Options:
//!   --mode=get|set|poll|setpoll    Layout table to decode with (default get)
//!   --errors=raise|log|ignore      Error policy (default log)
//!   --protocols=qgc,nmea,rtcm3     Protocols to print (default qgc)
//!   --catalogue=FILE               Decode with a catalogue file instead of the built-in one
//!   --no-validate                  Skip header, length and checksum checks
//!   --no-bitfields                 Keep bitfields as byte blobs
//!   --raw                          Print raw frames only, do not decode
//!   --verbose, -v                  Also print the raw bytes of decoded frames
//!
//! Diagnostics go through `env_logger`; set `RUST_LOG=debug` for more.

use anyhow::{anyhow, bail};
use qgcproto::types::escape_all;
use qgcproto::{schema, Codec, ErrorPolicy, MsgMode, Protocol, ProtocolFilter, QgcReader, ReaderOptions};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufReader, Read};

fn take_flag(args: &mut Vec<String>, names: &[&str]) -> bool {
    match args.iter().position(|a| names.contains(&a.as_str())) {
        Some(pos) => {
            args.remove(pos);
            true
        }
        None => false,
    }
}

fn take_value(args: &mut Vec<String>, prefix: &str) -> Option<String> {
    let pos = args.iter().position(|a| a.starts_with(prefix))?;
    let arg = args.remove(pos);
    arg.strip_prefix(prefix).map(str::to_string)
}

fn parse_mode(s: &str) -> anyhow::Result<MsgMode> {
    Ok(match s.to_ascii_lowercase().as_str() {
        "get" => MsgMode::Get,
        "set" => MsgMode::Set,
        "poll" => MsgMode::Poll,
        "setpoll" => MsgMode::SetPoll,
        other => bail!("unknown mode {}", other),
    })
}

fn parse_policy(s: &str) -> anyhow::Result<ErrorPolicy> {
    Ok(match s.to_ascii_lowercase().as_str() {
        "raise" => ErrorPolicy::Raise,
        "log" => ErrorPolicy::Log,
        "ignore" => ErrorPolicy::Ignore,
        other => bail!("unknown error policy {}", other),
    })
}

fn parse_protocols(s: &str) -> anyhow::Result<ProtocolFilter> {
    let mut filter = ProtocolFilter::from_bits(0);
    for name in s.split(',').map(str::trim).filter(|n| !n.is_empty()) {
        filter = filter
            | match name.to_ascii_lowercase().as_str() {
                "qgc" => ProtocolFilter::QGC,
                "nmea" => ProtocolFilter::NMEA,
                "rtcm3" => ProtocolFilter::RTCM3,
                other => bail!("unknown protocol {}", other),
            };
    }
    Ok(filter)
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let verbose = take_flag(&mut args, &["--verbose", "-v"]);
    let mut options = ReaderOptions {
        validate: !take_flag(&mut args, &["--no-validate"]),
        parse_bitfields: !take_flag(&mut args, &["--no-bitfields"]),
        parsing: !take_flag(&mut args, &["--raw"]),
        ..ReaderOptions::default()
    };
    if let Some(mode) = take_value(&mut args, "--mode=") {
        options.mode = parse_mode(&mode)?;
    }
    if let Some(policy) = take_value(&mut args, "--errors=") {
        options.error_policy = parse_policy(&policy)?;
    }
    if let Some(protocols) = take_value(&mut args, "--protocols=") {
        options.protocols = parse_protocols(&protocols)?;
    }
    let catalogue = match take_value(&mut args, "--catalogue=") {
        Some(path) => {
            let src = std::fs::read_to_string(&path)?;
            Some(schema::load(&src).map_err(|e| anyhow!("{}: {}", path, e))?)
        }
        None => None,
    };
    if let Some(unknown) = args.iter().find(|a| a.starts_with('-')) {
        bail!("unknown option {}", unknown);
    }

    let input: Box<dyn Read> = match args.first() {
        Some(path) => Box::new(File::open(path)?),
        None => Box::new(io::stdin()),
    };
    let codec = match &catalogue {
        Some(cat) => Codec::new(cat),
        None => Codec::builtin(),
    };

    let mut errors = 0usize;
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    let reader = QgcReader::with_codec(BufReader::new(input), codec, options).with_error_handler(|e| {
        errors += 1;
        eprintln!("error: {}", e);
    });
    for item in reader {
        let item = item?;
        let label = match (&item.protocol, &item.message) {
            (Protocol::Qgc, Some(msg)) => {
                println!("{}", msg);
                if verbose {
                    println!("  {}", escape_all(&item.raw));
                }
                msg.identity().to_string()
            }
            (protocol, _) => {
                println!("{:?} {}", protocol, escape_all(&item.raw));
                format!("{:?}", protocol)
            }
        };
        *counts.entry(label).or_default() += 1;
    }

    for (label, n) in &counts {
        eprintln!("{:>6}  {}", n, label);
    }
    if errors > 0 {
        eprintln!("{} error(s)", errors);
        std::process::exit(1);
    }
    Ok(())
}
