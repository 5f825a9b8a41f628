//! Streaming frame reader.
//!
//! [`QgcReader`] scans a byte source for frame starts, pulls whole frames out by
//! their length prefix and hands QGC frames to [`crate::frame::parse_with`]:
//!
//! | First bytes | Protocol | Frame end |
//! |-------------|----------|-----------|
//! | `0x51 0x47` (`QG`) | QGC | 4 header bytes, then `len + 2` |
//! | `$G` / `$P` | NMEA | end of line |
//! | `0xD3`, 6 zero bits | RTCM3 | 10-bit length, then `len + 3` |
//!
//! Anything else is skipped a byte at a time. A start byte whose follow-up does not
//! match is skipped alone; the follow-up bytes go back to the scan, so a QGC frame
//! right behind a stray `$` or `0xD3` is still found. NMEA and RTCM3 frames are not decoded
//! here; they are yielded raw when selected by the [`ProtocolFilter`] and dropped
//! otherwise. Errors follow the configured [`ErrorPolicy`].
//!
//! ```
//! use qgcproto::{QgcReader, ReaderOptions};
//!
//! let stream: &[u8] = &[0x51, 0x47, 0x01, 0x01, 0x04, 0x00, 0x03, 0x02, 0x00, 0x00, 0x0b, 0x39];
//! let mut reader = QgcReader::new(stream, ReaderOptions::default());
//! let item = reader.read().unwrap().unwrap();
//! assert_eq!(item.message.unwrap().identity(), "ACK-ACK");
//! assert!(reader.read().unwrap().is_none());
//! ```

use crate::codec::Codec;
use crate::error::{ParseError, QgcError, StreamError};
use crate::frame::{self, QGC_HDR};
use crate::message::QgcMessage;
use crate::types::MsgMode;
use log::{debug, error, trace};
use std::io::{BufRead, ErrorKind};
use std::ops::BitOr;

const NMEA_START: u8 = b'$';
const RTCM3_PREAMBLE: u8 = 0xd3;

/// Read-exactly / read-line access to a transport.
///
/// Implemented for every [`BufRead`]; wrap files and serial ports in a `BufReader`.
pub trait ByteSource {
    /// Exactly `n` bytes, `Ok(None)` if the source was already at its end, or
    /// [`StreamError::Truncated`] if it ended part way.
    fn read_bytes(&mut self, n: usize) -> Result<Option<Vec<u8>>, StreamError>;

    /// One line including its terminating `\n`, `Ok(None)` at end of source.
    fn read_line_bytes(&mut self) -> Result<Option<Vec<u8>>, StreamError>;
}

impl<R: BufRead> ByteSource for R {
    fn read_bytes(&mut self, n: usize) -> Result<Option<Vec<u8>>, StreamError> {
        let mut buf = vec![0u8; n];
        let mut filled = 0;
        while filled < n {
            match self.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(k) => filled += k,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(StreamError::Io(e)),
            }
        }
        match filled {
            0 if n > 0 => Ok(None),
            f if f < n => Err(StreamError::Truncated { requested: n, returned: f }),
            _ => Ok(Some(buf)),
        }
    }

    fn read_line_bytes(&mut self) -> Result<Option<Vec<u8>>, StreamError> {
        let mut buf = Vec::new();
        let returned = self.read_until(b'\n', &mut buf)?;
        match returned {
            0 => Ok(None),
            _ if buf.last() != Some(&b'\n') => Err(StreamError::TruncatedLine { returned }),
            _ => Ok(Some(buf)),
        }
    }
}

/// What to do when a frame cannot be read or parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorPolicy {
    /// Return the error; the iterator stops after yielding it.
    Raise,
    /// Report it to the error handler (or `log::error!`) and carry on scanning.
    #[default]
    Log,
    /// Carry on scanning. Stream errors are still reported.
    Ignore,
}

impl TryFrom<u8> for ErrorPolicy {
    type Error = u8;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(ErrorPolicy::Ignore),
            1 => Ok(ErrorPolicy::Log),
            2 => Ok(ErrorPolicy::Raise),
            other => Err(other),
        }
    }
}

/// Protocols a reader yields, combinable with `|`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProtocolFilter(u8);

impl ProtocolFilter {
    pub const NMEA: ProtocolFilter = ProtocolFilter(1);
    pub const QGC: ProtocolFilter = ProtocolFilter(2);
    pub const RTCM3: ProtocolFilter = ProtocolFilter(4);
    pub const ALL: ProtocolFilter = ProtocolFilter(7);

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn from_bits(bits: u8) -> Self {
        ProtocolFilter(bits & Self::ALL.0)
    }

    pub fn contains(self, other: ProtocolFilter) -> bool {
        self.0 & other.0 == other.0
    }
}

impl Default for ProtocolFilter {
    fn default() -> Self {
        ProtocolFilter::QGC
    }
}

impl BitOr for ProtocolFilter {
    type Output = ProtocolFilter;

    fn bitor(self, rhs: Self) -> Self::Output {
        ProtocolFilter(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Nmea,
    Qgc,
    Rtcm3,
}

impl Protocol {
    fn filter(self) -> ProtocolFilter {
        match self {
            Protocol::Nmea => ProtocolFilter::NMEA,
            Protocol::Qgc => ProtocolFilter::QGC,
            Protocol::Rtcm3 => ProtocolFilter::RTCM3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderOptions {
    pub validate: bool,
    pub mode: MsgMode,
    pub parse_bitfields: bool,
    /// Decode QGC frames; when off only raw frames are yielded.
    pub parsing: bool,
    pub error_policy: ErrorPolicy,
    pub protocols: ProtocolFilter,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        ReaderOptions {
            validate: true,
            mode: MsgMode::Get,
            parse_bitfields: true,
            parsing: true,
            error_policy: ErrorPolicy::Log,
            protocols: ProtocolFilter::QGC,
        }
    }
}

/// One extracted frame. `message` is set for QGC frames when parsing is on.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameItem {
    pub protocol: Protocol,
    pub raw: Vec<u8>,
    pub message: Option<QgcMessage>,
}

enum Step {
    Frame(FrameItem),
    Skip,
    Eof,
}

type ErrorHandler<'c> = Box<dyn FnMut(&QgcError) + 'c>;

pub struct QgcReader<'c, S> {
    source: S,
    codec: Codec<'c>,
    options: ReaderOptions,
    error_handler: Option<ErrorHandler<'c>>,
    /// Bytes looked at and handed back to the scan, last one first.
    pushback: Vec<u8>,
    halted: bool,
}

impl<S: ByteSource> QgcReader<'static, S> {
    /// Reader over the built-in catalogue.
    pub fn new(source: S, options: ReaderOptions) -> Self {
        QgcReader::with_codec(source, Codec::builtin(), options)
    }
}

impl<'c, S: ByteSource> QgcReader<'c, S> {
    pub fn with_codec(source: S, codec: Codec<'c>, options: ReaderOptions) -> Self {
        QgcReader {
            source,
            codec: codec.with_bitfields(options.parse_bitfields),
            options,
            error_handler: None,
            pushback: Vec::new(),
            halted: false,
        }
    }

    /// Receive errors reported under [`ErrorPolicy::Log`] (and stream errors under
    /// [`ErrorPolicy::Ignore`]) instead of logging them.
    pub fn with_error_handler(mut self, handler: impl FnMut(&QgcError) + 'c) -> Self {
        self.error_handler = Some(Box::new(handler));
        self
    }

    pub fn options(&self) -> &ReaderOptions {
        &self.options
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// The source back. A byte the scan had looked at but not consumed is dropped
    /// with the reader.
    pub fn into_inner(self) -> S {
        self.source
    }

    /// Next selected frame, `Ok(None)` at a clean end of stream.
    ///
    /// I/O failures of the source are always returned, whatever the policy.
    pub fn read(&mut self) -> Result<Option<FrameItem>, QgcError> {
        loop {
            match self.read_frame() {
                Ok(Step::Frame(item)) => return Ok(Some(item)),
                Ok(Step::Skip) => continue,
                Ok(Step::Eof) => return Ok(None),
                Err(QgcError::Stream(StreamError::Io(e))) => return Err(StreamError::Io(e).into()),
                Err(err) => self.handle_error(err)?,
            }
        }
    }

    fn read_frame(&mut self) -> Result<Step, QgcError> {
        let Some(first) = self.next_byte()? else {
            return Ok(Step::Eof);
        };
        match first {
            b if b == QGC_HDR[0] => self.read_qgc(),
            NMEA_START => self.read_nmea(),
            RTCM3_PREAMBLE => self.read_rtcm3(),
            _ => Ok(Step::Skip),
        }
    }

    fn read_qgc(&mut self) -> Result<Step, QgcError> {
        let Some(second) = self.next_byte()? else {
            return Ok(Step::Eof);
        };
        if second != QGC_HDR[1] {
            self.unread(second);
            return Err(ParseError::UnknownHeader([QGC_HDR[0], second]).into());
        }
        let header = self.read_in_frame(4)?;
        let len = u16::from_le_bytes([header[2], header[3]]) as usize;
        let body = self.read_in_frame(len + 2)?;

        let mut raw = Vec::with_capacity(len + 8);
        raw.extend_from_slice(&QGC_HDR);
        raw.extend_from_slice(&header);
        raw.extend_from_slice(&body);
        trace!("QGC frame {:02x}{:02x}, {} bytes", header[0], header[1], raw.len());
        if !self.options.protocols.contains(ProtocolFilter::QGC) {
            debug!("dropping QGC frame, not selected");
            return Ok(Step::Skip);
        }
        let message = if self.options.parsing {
            Some(frame::parse_with(&self.codec, &raw, self.options.validate, self.options.mode)?)
        } else {
            None
        };
        Ok(Step::Frame(FrameItem { protocol: Protocol::Qgc, raw, message }))
    }

    fn read_nmea(&mut self) -> Result<Step, QgcError> {
        let Some(second) = self.next_byte()? else {
            return Ok(Step::Eof);
        };
        if !matches!(second, b'G' | b'P') {
            self.unread(second);
            return Ok(Step::Skip);
        }
        let mut raw = vec![NMEA_START, second];
        raw.extend_from_slice(&self.read_line_in_frame()?);
        Ok(self.foreign(Protocol::Nmea, raw))
    }

    fn read_rtcm3(&mut self) -> Result<Step, QgcError> {
        let Some(hi) = self.next_byte()? else {
            return Ok(Step::Eof);
        };
        if hi & 0xfc != 0 {
            self.unread(hi);
            return Ok(Step::Skip);
        }
        let lo = self.read_in_frame(1)?[0];
        let len = (((hi & 0x03) as usize) << 8) | lo as usize;
        let body = self.read_in_frame(len + 3)?;
        let mut raw = vec![RTCM3_PREAMBLE, hi, lo];
        raw.extend_from_slice(&body);
        Ok(self.foreign(Protocol::Rtcm3, raw))
    }

    fn foreign(&self, protocol: Protocol, raw: Vec<u8>) -> Step {
        if self.options.protocols.contains(protocol.filter()) {
            trace!("{:?} frame, {} bytes", protocol, raw.len());
            Step::Frame(FrameItem { protocol, raw, message: None })
        } else {
            debug!("dropping {:?} frame of {} bytes, not selected", protocol, raw.len());
            Step::Skip
        }
    }

    fn next_byte(&mut self) -> Result<Option<u8>, StreamError> {
        if let Some(b) = self.pushback.pop() {
            return Ok(Some(b));
        }
        Ok(self.source.read_bytes(1)?.map(|b| b[0]))
    }

    fn unread(&mut self, byte: u8) {
        self.pushback.push(byte);
    }

    /// Once a frame has started, running out of data is a truncation, not an end.
    fn read_in_frame(&mut self, n: usize) -> Result<Vec<u8>, StreamError> {
        let mut buf = Vec::with_capacity(n);
        while buf.len() < n {
            match self.pushback.pop() {
                Some(b) => buf.push(b),
                None => break,
            }
        }
        let held = buf.len();
        if held < n {
            match self.source.read_bytes(n - held) {
                Ok(Some(rest)) => buf.extend_from_slice(&rest),
                Ok(None) => return Err(StreamError::Truncated { requested: n, returned: held }),
                Err(StreamError::Truncated { returned, .. }) => {
                    return Err(StreamError::Truncated { requested: n, returned: held + returned })
                }
                Err(e) => return Err(e),
            }
        }
        Ok(buf)
    }

    fn read_line_in_frame(&mut self) -> Result<Vec<u8>, StreamError> {
        let mut line = Vec::new();
        while let Some(b) = self.pushback.pop() {
            line.push(b);
            if b == b'\n' {
                return Ok(line);
            }
        }
        let held = line.len();
        match self.source.read_line_bytes() {
            Ok(Some(rest)) => line.extend_from_slice(&rest),
            Ok(None) => return Err(StreamError::TruncatedLine { returned: held }),
            Err(StreamError::TruncatedLine { returned }) => {
                return Err(StreamError::TruncatedLine { returned: held + returned })
            }
            Err(e) => return Err(e),
        }
        Ok(line)
    }

    fn handle_error(&mut self, err: QgcError) -> Result<(), QgcError> {
        match self.options.error_policy {
            ErrorPolicy::Raise => Err(err),
            ErrorPolicy::Log => {
                self.report(&err);
                Ok(())
            }
            ErrorPolicy::Ignore => {
                if matches!(err, QgcError::Stream(_)) {
                    self.report(&err);
                }
                Ok(())
            }
        }
    }

    fn report(&mut self, err: &QgcError) {
        match self.error_handler.as_mut() {
            Some(handler) => handler(err),
            None => error!("{}", err),
        }
    }
}

impl<S: ByteSource> Iterator for QgcReader<'_, S> {
    type Item = Result<FrameItem, QgcError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.halted {
            return None;
        }
        match self.read() {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => {
                self.halted = true;
                None
            }
            Err(e) => {
                self.halted = true;
                Some(Err(e))
            }
        }
    }
}
