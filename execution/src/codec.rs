//! Framing codecs for worker streams.
//!
//! - [`ContentLengthCodec`]: `Content-Length: <n>\r\n\r\n` header block
//!   followed by exactly `n` payload bytes (the language-server convention),
//!   used for JSON-RPC over a worker's stdin/stdout.
//! - [`FrameCodec::lines`]: one JSON document per `\n`-terminated line, used
//!   by the stdio message protocol and by ipc sockets.

use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::error::{ExecError, Result};

/// Default upper bound for a single frame.
pub const DEFAULT_MAX_FRAME: usize = 16 * 1024 * 1024;

/// Upper bound for a header block before its terminating blank line.
const MAX_HEADER_BYTES: usize = 8 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    Header,
    Body(usize),
}

#[derive(Debug, Clone)]
pub struct ContentLengthCodec {
    max_frame: usize,
    state: DecodeState,
}

impl ContentLengthCodec {
    pub fn new() -> Self {
        Self::with_max_frame(DEFAULT_MAX_FRAME)
    }

    pub fn with_max_frame(max_frame: usize) -> Self {
        Self {
            max_frame,
            state: DecodeState::Header,
        }
    }

    pub fn max_frame(&self) -> usize {
        self.max_frame
    }
}

impl Default for ContentLengthCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for ContentLengthCodec {
    type Item = BytesMut;
    type Error = ExecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<BytesMut>> {
        loop {
            match self.state {
                DecodeState::Header => {
                    // The blank line may follow a full-size block by at most CRLF.
                    let window = &src[..src.len().min(MAX_HEADER_BYTES + 2)];
                    let Some((block_len, consumed)) = find_header_end(window) else {
                        if src.len() > MAX_HEADER_BYTES {
                            return Err(header_too_large());
                        }
                        return Ok(None);
                    };
                    if block_len > MAX_HEADER_BYTES {
                        return Err(header_too_large());
                    }
                    let header = src.split_to(consumed);
                    let length = parse_content_length(&header[..block_len])?;
                    if length > self.max_frame {
                        return Err(ExecError::FrameTooLarge {
                            limit: self.max_frame,
                        });
                    }
                    src.reserve(length);
                    self.state = DecodeState::Body(length);
                }
                DecodeState::Body(length) => {
                    if src.len() < length {
                        return Ok(None);
                    }
                    self.state = DecodeState::Header;
                    return Ok(Some(src.split_to(length)));
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<BytesMut>> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() && self.state == DecodeState::Header => Ok(None),
            None => Err(ExecError::Protocol(
                "stream ended in the middle of a frame".to_string(),
            )),
        }
    }
}

impl Encoder<Bytes> for ContentLengthCodec {
    type Error = ExecError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<()> {
        if item.is_empty() {
            return Err(ExecError::Protocol("refusing to encode an empty frame".to_string()));
        }
        if item.len() > self.max_frame {
            return Err(ExecError::FrameTooLarge {
                limit: self.max_frame,
            });
        }
        let header = format!("Content-Length: {}\r\n\r\n", item.len());
        dst.reserve(header.len() + item.len());
        dst.put_slice(header.as_bytes());
        dst.put_slice(&item);
        Ok(())
    }
}

fn header_too_large() -> ExecError {
    ExecError::Protocol(format!("header block exceeds {MAX_HEADER_BYTES} bytes"))
}

/// Returns `(header block length, bytes consumed including the blank line)`.
fn find_header_end(buf: &[u8]) -> Option<(usize, usize)> {
    let mut line_start = 0;
    while let Some(offset) = buf[line_start..].iter().position(|b| *b == b'\n') {
        let line_end = line_start + offset;
        let line = &buf[line_start..line_end];
        if line.is_empty() || line == b"\r" {
            return Some((line_start, line_end + 1));
        }
        line_start = line_end + 1;
    }
    None
}

fn parse_content_length(block: &[u8]) -> Result<usize> {
    let text = std::str::from_utf8(block)
        .map_err(|_| ExecError::Protocol("frame header is not valid UTF-8".to_string()))?;

    let mut length = None;
    for line in text.lines().filter(|line| !line.is_empty()) {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| ExecError::Protocol(format!("malformed header line {line:?}")))?;
        if name.trim().eq_ignore_ascii_case("content-length") {
            let parsed = value.trim().parse::<usize>().map_err(|_| {
                ExecError::Protocol(format!("invalid Content-Length {:?}", value.trim()))
            })?;
            length = Some(parsed);
        }
    }

    match length {
        Some(0) | None => Err(ExecError::Protocol(
            "missing or zero Content-Length".to_string(),
        )),
        Some(length) => Ok(length),
    }
}

/// The framings a worker stream can use.
#[derive(Debug)]
pub enum FrameCodec {
    ContentLength(ContentLengthCodec),
    Lines(LinesCodec),
}

impl FrameCodec {
    pub fn content_length() -> Self {
        FrameCodec::ContentLength(ContentLengthCodec::new())
    }

    pub fn lines() -> Self {
        FrameCodec::Lines(LinesCodec::new_with_max_length(DEFAULT_MAX_FRAME))
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = ExecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        match self {
            FrameCodec::ContentLength(codec) => Ok(codec.decode(src)?.map(BytesMut::freeze)),
            FrameCodec::Lines(codec) => codec
                .decode(src)
                .map(|line| line.map(Bytes::from))
                .map_err(lines_error),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        match self {
            FrameCodec::ContentLength(codec) => Ok(codec.decode_eof(src)?.map(BytesMut::freeze)),
            FrameCodec::Lines(codec) => codec
                .decode_eof(src)
                .map(|line| line.map(Bytes::from))
                .map_err(lines_error),
        }
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = ExecError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<()> {
        match self {
            FrameCodec::ContentLength(codec) => codec.encode(item, dst),
            FrameCodec::Lines(codec) => {
                if item.len() > codec.max_length() {
                    return Err(ExecError::FrameTooLarge {
                        limit: codec.max_length(),
                    });
                }
                if item.contains(&b'\n') {
                    return Err(ExecError::Protocol(
                        "line-framed message contains a newline".to_string(),
                    ));
                }
                dst.reserve(item.len() + 1);
                dst.put_slice(&item);
                dst.put_u8(b'\n');
                Ok(())
            }
        }
    }
}

fn lines_error(error: LinesCodecError) -> ExecError {
    match error {
        LinesCodecError::MaxLineLengthExceeded => ExecError::FrameTooLarge {
            limit: DEFAULT_MAX_FRAME,
        },
        LinesCodecError::Io(e) if e.kind() == std::io::ErrorKind::InvalidData => {
            ExecError::Protocol(format!("worker wrote an undecodable line: {e}"))
        }
        LinesCodecError::Io(e) => ExecError::Io(e),
    }
}
