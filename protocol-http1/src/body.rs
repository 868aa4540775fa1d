//! Message body framing.
//!
//! [`BodyEncoder`] frames outgoing request bodies (length-delimited or
//! chunked). [`BodyDecoder`] incrementally decodes response bodies and yields
//! [`BodyEvent`]s as bytes arrive; it never needs the whole body buffered.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{EncodeError, ParseError};
use crate::response::ResponseHead;

/// Longest chunk-size or trailer line accepted before giving up.
const MAX_LINE: usize = 4096;

/// Body framing for an outgoing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyEncoder {
    /// Exactly `declared` bytes follow the head. A zero length means no body.
    Length { declared: u64, remaining: u64 },
    /// `transfer-encoding: chunked`; the terminating chunk is written by `finish`.
    Chunked { finished: bool },
}

impl BodyEncoder {
    pub fn empty() -> Self {
        Self::length(0)
    }

    pub fn length(declared: u64) -> Self {
        BodyEncoder::Length {
            declared,
            remaining: declared,
        }
    }

    pub fn chunked() -> Self {
        BodyEncoder::Chunked { finished: false }
    }

    /// True if body bytes or a terminator still have to be written.
    pub fn expects_body(&self) -> bool {
        match self {
            BodyEncoder::Length { declared, .. } => *declared > 0,
            BodyEncoder::Chunked { .. } => true,
        }
    }

    /// Frame `chunk` into `dst`. Nothing is written on error.
    pub fn encode(&mut self, chunk: &[u8], dst: &mut BytesMut) -> Result<(), EncodeError> {
        if chunk.is_empty() {
            return Ok(());
        }
        match self {
            BodyEncoder::Length {
                declared,
                remaining,
            } => {
                if *declared == 0 {
                    return Err(EncodeError::BodyNotAllowed);
                }
                let len = chunk.len() as u64;
                if len > *remaining {
                    return Err(EncodeError::BodyTooLong {
                        declared: *declared,
                        written: *declared - *remaining + len,
                    });
                }
                *remaining -= len;
                dst.put_slice(chunk);
            }
            BodyEncoder::Chunked { finished } => {
                if *finished {
                    return Err(EncodeError::BodyNotAllowed);
                }
                dst.reserve(chunk.len() + 20);
                dst.put_slice(format!("{:x}\r\n", chunk.len()).as_bytes());
                dst.put_slice(chunk);
                dst.put_slice(b"\r\n");
            }
        }
        Ok(())
    }

    /// Terminate the body.
    pub fn finish(&mut self, dst: &mut BytesMut) -> Result<(), EncodeError> {
        match self {
            BodyEncoder::Length {
                declared,
                remaining,
            } => {
                if *remaining > 0 {
                    return Err(EncodeError::BodyTooShort {
                        declared: *declared,
                        written: *declared - *remaining,
                    });
                }
            }
            BodyEncoder::Chunked { finished } => {
                if !*finished {
                    dst.put_slice(b"0\r\n\r\n");
                    *finished = true;
                }
            }
        }
        Ok(())
    }
}

/// One step of response body decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyEvent {
    Data(Bytes),
    End,
}

/// Incremental response body decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BodyDecoder {
    kind: Kind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Kind {
    Length { remaining: u64 },
    Chunked(Chunk),
    UntilClose,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Chunk {
    Size,
    Data { remaining: u64 },
    DataEnd,
    Trailers,
}

impl BodyDecoder {
    pub fn length(len: u64) -> Self {
        Self {
            kind: Kind::Length { remaining: len },
        }
    }

    pub fn chunked() -> Self {
        Self {
            kind: Kind::Chunked(Chunk::Size),
        }
    }

    pub fn until_close() -> Self {
        Self {
            kind: Kind::UntilClose,
        }
    }

    /// Pick the framing for a response body (RFC 9112 section 6.3).
    ///
    /// Responses to `HEAD`, informational responses, `204` and `304` have no
    /// body. Otherwise chunked transfer-encoding wins over `content-length`,
    /// and a response with neither is delimited by the peer closing.
    pub fn for_response(head: &ResponseHead, request_was_head: bool) -> Result<Self, ParseError> {
        let status = head.status();
        if request_was_head || head.is_informational() || status == 204 || status == 304 {
            return Ok(Self::length(0));
        }
        if head.is_chunked() {
            return Ok(Self::chunked());
        }
        Ok(match head.content_length()? {
            Some(len) => Self::length(len),
            None => Self::until_close(),
        })
    }

    /// True once `End` has been returned.
    pub fn is_done(&self) -> bool {
        self.kind == Kind::Done
    }

    /// Decode the next event from `src`, consuming what it uses.
    ///
    /// Returns `Ok(None)` when more bytes are needed. After `End` the decoder
    /// consumes nothing and keeps returning `Ok(None)`, leaving any following
    /// bytes (the next pipelined response) in `src`.
    pub fn decode(&mut self, src: &mut BytesMut) -> Result<Option<BodyEvent>, ParseError> {
        loop {
            match &mut self.kind {
                Kind::Done => return Ok(None),
                Kind::Length { remaining } => {
                    if *remaining == 0 {
                        self.kind = Kind::Done;
                        return Ok(Some(BodyEvent::End));
                    }
                    if src.is_empty() {
                        return Ok(None);
                    }
                    let n = (*remaining).min(src.len() as u64) as usize;
                    *remaining -= n as u64;
                    return Ok(Some(BodyEvent::Data(src.split_to(n).freeze())));
                }
                Kind::UntilClose => {
                    if src.is_empty() {
                        return Ok(None);
                    }
                    return Ok(Some(BodyEvent::Data(src.split().freeze())));
                }
                Kind::Chunked(state) => match *state {
                    Chunk::Size => {
                        let Some(line) = take_line(src)? else {
                            return Ok(None);
                        };
                        let size = parse_chunk_size(&line)?;
                        *state = if size == 0 {
                            Chunk::Trailers
                        } else {
                            Chunk::Data { remaining: size }
                        };
                    }
                    Chunk::Data { remaining } => {
                        if src.is_empty() {
                            return Ok(None);
                        }
                        let n = remaining.min(src.len() as u64) as usize;
                        let left = remaining - n as u64;
                        *state = if left == 0 {
                            Chunk::DataEnd
                        } else {
                            Chunk::Data { remaining: left }
                        };
                        return Ok(Some(BodyEvent::Data(src.split_to(n).freeze())));
                    }
                    Chunk::DataEnd => {
                        if src.len() < 2 {
                            return Ok(None);
                        }
                        if &src[..2] != b"\r\n" {
                            return Err(ParseError::InvalidChunk);
                        }
                        src.advance(2);
                        *state = Chunk::Size;
                    }
                    Chunk::Trailers => {
                        let Some(line) = take_line(src)? else {
                            return Ok(None);
                        };
                        // Trailer fields are read and discarded.
                        if line.is_empty() {
                            self.kind = Kind::Done;
                            return Ok(Some(BodyEvent::End));
                        }
                    }
                },
            }
        }
    }

    /// The peer closed the stream. Completes an until-close body; any other
    /// unfinished body is truncated.
    pub fn finish_eof(&mut self) -> Result<BodyEvent, ParseError> {
        match self.kind {
            Kind::UntilClose | Kind::Length { remaining: 0 } => {
                self.kind = Kind::Done;
                Ok(BodyEvent::End)
            }
            Kind::Done => Ok(BodyEvent::End),
            _ => Err(ParseError::UnexpectedEof),
        }
    }
}

/// Split off one CRLF-terminated line, without the terminator.
fn take_line(src: &mut BytesMut) -> Result<Option<BytesMut>, ParseError> {
    match find_crlf(src) {
        Some(pos) => {
            let line = src.split_to(pos);
            src.advance(2);
            Ok(Some(line))
        }
        None if src.len() > MAX_LINE => Err(ParseError::InvalidChunk),
        None => Ok(None),
    }
}

fn parse_chunk_size(line: &[u8]) -> Result<u64, ParseError> {
    let text = std::str::from_utf8(line).map_err(|_| ParseError::InvalidChunk)?;
    // Strip chunk extensions (;key=value).
    let hex = text.split(';').next().unwrap_or("").trim();
    if hex.is_empty() || hex.len() > 16 {
        return Err(ParseError::InvalidChunk);
    }
    u64::from_str_radix(hex, 16).map_err(|_| ParseError::InvalidChunk)
}

pub(crate) fn find_crlf(data: &[u8]) -> Option<usize> {
    (0..data.len().saturating_sub(1)).find(|&i| data[i] == b'\r' && data[i + 1] == b'\n')
}
