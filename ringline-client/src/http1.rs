//! HTTP/1.1 codec built on `protocol-http1`.

use bytes::{Buf, BytesMut};
use protocol_http1::{
    BodyDecoder, BodyEvent, EncodeError, MAX_HEAD_SIZE, ParseError, Request, ResponseHead,
};
use tracing::{debug, trace};

use crate::codec::{BodyEncoder, Codec, Decoded};
use crate::error::ClientError;

/// HTTP/1.1 request and response framing.
///
/// Interim `1xx` responses other than `101` are consumed silently. A `101`
/// is only accepted as the answer to an upgrade request.
#[derive(Debug)]
pub struct Http1Codec {
    read: ReadState,
    pipelining: bool,
    max_head_size: usize,
}

#[derive(Debug)]
enum ReadState {
    Head,
    Body(BodyDecoder),
}

impl Http1Codec {
    pub fn new() -> Self {
        Self {
            read: ReadState::Head,
            pipelining: true,
            max_head_size: MAX_HEAD_SIZE,
        }
    }

    /// Allow or forbid sending a request before the previous response.
    pub fn with_pipelining(mut self, enabled: bool) -> Self {
        self.pipelining = enabled;
        self
    }

    /// Largest response head accepted before failing the connection.
    pub fn with_max_head_size(mut self, max: usize) -> Self {
        self.max_head_size = max;
        self
    }
}

impl Default for Http1Codec {
    fn default() -> Self {
        Self::new()
    }
}

impl BodyEncoder for protocol_http1::BodyEncoder {
    fn expects_body(&self) -> bool {
        protocol_http1::BodyEncoder::expects_body(self)
    }

    fn encode(&mut self, chunk: &[u8], dst: &mut BytesMut) -> Result<(), ClientError> {
        protocol_http1::BodyEncoder::encode(self, chunk, dst).map_err(invalid)
    }

    fn finish(&mut self, dst: &mut BytesMut) -> Result<(), ClientError> {
        protocol_http1::BodyEncoder::finish(self, dst).map_err(invalid)
    }
}

impl Codec for Http1Codec {
    type Request = Request;
    type Response = ResponseHead;
    type BodyEncoder = protocol_http1::BodyEncoder;

    fn validate(&self, request: &Request) -> Result<(), ClientError> {
        request.validate().map_err(invalid)
    }

    fn is_upgrade_request(&self, request: &Request) -> bool {
        request.is_upgrade()
    }

    fn supports_pipelining(&self) -> bool {
        self.pipelining
    }

    fn encode_head(
        &mut self,
        request: &Request,
        dst: &mut BytesMut,
    ) -> Result<protocol_http1::BodyEncoder, ClientError> {
        let encoder = request.body_encoder().map_err(invalid)?;
        request.encode_head(dst);
        Ok(encoder)
    }

    fn decode(
        &mut self,
        request: &Request,
        src: &mut BytesMut,
    ) -> Result<Option<Decoded<ResponseHead>>, ClientError> {
        loop {
            match &mut self.read {
                ReadState::Head => {
                    let Some((head, consumed)) =
                        ResponseHead::parse_with_limit(&src[..], self.max_head_size)
                            .map_err(protocol)?
                    else {
                        return Ok(None);
                    };
                    src.advance(consumed);
                    if head.is_switching_protocols() {
                        if !request.is_upgrade() {
                            return Err(ClientError::Protocol(
                                "101 switching protocols without an upgrade request".into(),
                            ));
                        }
                        return Ok(Some(Decoded::Head(head)));
                    }
                    if head.is_informational() {
                        trace!(status = head.status(), "skipping interim response");
                        continue;
                    }
                    let decoder =
                        BodyDecoder::for_response(&head, request.is_head()).map_err(protocol)?;
                    self.read = ReadState::Body(decoder);
                    return Ok(Some(Decoded::Head(head)));
                }
                ReadState::Body(decoder) => {
                    return match decoder.decode(src).map_err(protocol)? {
                        None => Ok(None),
                        Some(BodyEvent::Data(data)) => Ok(Some(Decoded::Data(data))),
                        Some(BodyEvent::End) => {
                            self.read = ReadState::Head;
                            Ok(Some(Decoded::End))
                        }
                    };
                }
            }
        }
    }

    fn decode_eof(
        &mut self,
        _request: &Request,
    ) -> Result<Option<Decoded<ResponseHead>>, ClientError> {
        let ReadState::Body(decoder) = &mut self.read else {
            return Ok(None);
        };
        match decoder.finish_eof() {
            Ok(_) => {
                self.read = ReadState::Head;
                Ok(Some(Decoded::End))
            }
            Err(e) => {
                // A truncated body is reported as a reset, not a framing error.
                debug!(error = %e, "response body truncated by close");
                Ok(None)
            }
        }
    }

    fn is_upgrade_accepted(&self, request: &Request, response: &ResponseHead) -> bool {
        request.is_upgrade() && response.is_switching_protocols()
    }
}

fn invalid(err: EncodeError) -> ClientError {
    ClientError::InvalidRequest(err.to_string())
}

fn protocol(err: ParseError) -> ClientError {
    ClientError::Protocol(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn get() -> Request {
        Request::get("/").header("host", "example.com")
    }

    fn input(data: &[u8]) -> BytesMut {
        BytesMut::from(data)
    }

    fn head(decoded: Option<Decoded<ResponseHead>>) -> ResponseHead {
        match decoded {
            Some(Decoded::Head(head)) => head,
            other => panic!("expected head, got {other:?}"),
        }
    }

    #[test]
    fn encodes_head_and_reports_framing() {
        let mut codec = Http1Codec::new();
        let mut dst = BytesMut::new();
        let encoder = codec.encode_head(&get(), &mut dst).unwrap();
        assert!(!BodyEncoder::expects_body(&encoder));
        assert_eq!(&dst[..], b"GET / HTTP/1.1\r\nhost: example.com\r\n\r\n");

        let post = Request::post("/submit")
            .header("host", "example.com")
            .header("content-length", "3");
        let mut encoder = codec.encode_head(&post, &mut dst).unwrap();
        assert!(BodyEncoder::expects_body(&encoder));
        BodyEncoder::encode(&mut encoder, b"abc", &mut dst).unwrap();
        assert!(matches!(
            BodyEncoder::encode(&mut encoder, b"d", &mut dst),
            Err(ClientError::InvalidRequest(_))
        ));
    }

    #[test]
    fn validate_maps_to_invalid_request() {
        let codec = Http1Codec::new();
        let err = codec.validate(&Request::get("/")).unwrap_err();
        assert!(matches!(err, ClientError::InvalidRequest(_)));
    }

    #[test]
    fn pipelined_responses_stay_separate() {
        let mut codec = Http1Codec::new();
        let request = get();
        let mut src = input(
            b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\n\r\nhi\
              HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\n\r\n",
        );
        assert_eq!(head(codec.decode(&request, &mut src).unwrap()).status(), 200);
        assert_eq!(
            codec.decode(&request, &mut src).unwrap(),
            Some(Decoded::Data(Bytes::from_static(b"hi")))
        );
        assert_eq!(codec.decode(&request, &mut src).unwrap(), Some(Decoded::End));
        assert_eq!(head(codec.decode(&request, &mut src).unwrap()).status(), 404);
        assert_eq!(codec.decode(&request, &mut src).unwrap(), Some(Decoded::End));
        assert!(src.is_empty());
    }

    #[test]
    fn interim_responses_are_skipped() {
        let mut codec = Http1Codec::new();
        let mut src = input(
            b"HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 204 No Content\r\n\r\n",
        );
        assert_eq!(head(codec.decode(&get(), &mut src).unwrap()).status(), 204);
        assert_eq!(codec.decode(&get(), &mut src).unwrap(), Some(Decoded::End));
    }

    #[test]
    fn head_request_has_no_body() {
        let mut codec = Http1Codec::new();
        let request = Request::head("/").header("host", "example.com");
        let mut src = input(b"HTTP/1.1 200 OK\r\ncontent-length: 1000\r\n\r\n");
        head(codec.decode(&request, &mut src).unwrap());
        assert_eq!(codec.decode(&request, &mut src).unwrap(), Some(Decoded::End));
    }

    #[test]
    fn partial_head_needs_more() {
        let mut codec = Http1Codec::new();
        let mut src = input(b"HTTP/1.1 200 OK\r\ncontent-le");
        assert_eq!(codec.decode(&get(), &mut src).unwrap(), None);
        assert_eq!(src.len(), 27);
    }

    #[test]
    fn switching_protocols() {
        let mut codec = Http1Codec::new();
        let upgrade = get().upgrade("websocket");
        assert!(codec.is_upgrade_request(&upgrade));

        let mut src =
            input(b"HTTP/1.1 101 Switching Protocols\r\nupgrade: websocket\r\n\r\n\x81\x00");
        let response = head(codec.decode(&upgrade, &mut src).unwrap());
        assert!(codec.is_upgrade_accepted(&upgrade, &response));
        // Bytes after the 101 belong to the new protocol.
        assert_eq!(&src[..], b"\x81\x00");

        let mut src = input(b"HTTP/1.1 101 Switching Protocols\r\n\r\n");
        assert!(matches!(
            codec.decode(&get(), &mut src),
            Err(ClientError::Protocol(_))
        ));
    }

    #[test]
    fn close_delimited_body_ends_at_eof() {
        let mut codec = Http1Codec::new();
        let request = get();
        let mut src = input(b"HTTP/1.1 200 OK\r\n\r\npartial");
        head(codec.decode(&request, &mut src).unwrap());
        assert!(matches!(
            codec.decode(&request, &mut src).unwrap(),
            Some(Decoded::Data(_))
        ));
        assert_eq!(codec.decode_eof(&request).unwrap(), Some(Decoded::End));
    }

    #[test]
    fn truncated_body_is_not_completed() {
        let mut codec = Http1Codec::new();
        let request = get();
        let mut src = input(b"HTTP/1.1 200 OK\r\ncontent-length: 10\r\n\r\nabc");
        head(codec.decode(&request, &mut src).unwrap());
        codec.decode(&request, &mut src).unwrap();
        assert_eq!(codec.decode_eof(&request).unwrap(), None);
    }

    #[test]
    fn garbage_is_protocol_error() {
        let mut codec = Http1Codec::new();
        let mut src = input(b"SMTP ready\r\n\r\n");
        assert!(matches!(
            codec.decode(&get(), &mut src),
            Err(ClientError::Protocol(_))
        ));
    }
}
