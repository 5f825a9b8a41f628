//! # qgcproto: QGC binary protocol codec and stream reader
//!
//! Decode and encode the length-prefixed, checksummed binary "QGC" messages spoken by
//! Quectel GNSS/IMU receivers, driven by a declarative message catalogue.
//!
//! ## Pieces
//!
//! - **Catalogue**: identities `(group, id) -> NAME` and per-mode (GET/SET/POLL) payload
//!   layouts, written in a small description language (`src/catalogue.qgc`) parsed with
//!   PEST and resolved into a [`Catalogue`].
//! - **Codec**: [`Codec`] walks a layout to turn payload bytes into named, typed
//!   attributes and back, handling repeating groups, bitfields and scaling.
//! - **Frames**: [`parse`] validates and decodes one complete frame.
//! - **Streams**: [`QgcReader`] pulls frames out of any [`ByteSource`] (every `BufRead`),
//!   skipping or passing through interleaved NMEA and RTCM3 traffic.
//!
//! ## Frame
//!
//! ```text
//! 0x51 0x47 | grp | id | len (u16 LE) | payload | ck_a ck_b
//! ```
//!
//! ## Usage
//!
//! ```
//! use qgcproto::{parse, MsgMode, ParseOptions, QgcMessage};
//!
//! let poll = QgcMessage::builder_for("CFG-CAN", MsgMode::Poll)
//!     .unwrap()
//!     .field("intfid", 3u8)
//!     .build()
//!     .unwrap();
//! assert_eq!(poll.serialize(), [0x51, 0x47, 0x02, 0x04, 0x01, 0x00, 0x03, 0x0a, 0x20]);
//!
//! let opts = ParseOptions { mode: MsgMode::Poll, ..ParseOptions::default() };
//! let msg = parse(&poll.serialize(), &opts).unwrap();
//! assert_eq!(msg.to_string(), "<QGC(CFG-CAN, intfid=3)>");
//! ```

pub mod ast;
pub mod codec;
pub mod error;
pub mod frame;
pub mod message;
pub mod parser;
pub mod reader;
pub mod schema;
pub mod types;
pub mod value;

pub use ast::{Catalogue, MessageSchema};
pub use codec::{Codec, FrameParts, Overrides};
pub use error::{ConversionError, MessageError, ParseError, QgcError, StreamError, TypeError};
pub use frame::{is_valid_checksum, parse, parse_with, ParseOptions, QGC_HDR};
pub use message::{MessageBuilder, QgcMessage};
pub use reader::{ByteSource, ErrorPolicy, FrameItem, Protocol, ProtocolFilter, QgcReader, ReaderOptions};
pub use types::{calc_checksum, get_bits, AttrKind, AttrType, MsgMode, Width};
pub use value::{FieldKey, Value};
