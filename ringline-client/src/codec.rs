//! The wire-encoding seam.
//!
//! A [`Codec`] turns requests into bytes and bytes into responses. It owns
//! the protocol's framing rules; the connection owns ordering, buffering and
//! lifecycle. Codecs are sans-IO and synchronous.

use bytes::{Bytes, BytesMut};

use crate::error::ClientError;

/// Progress of the most recently admitted request's outbound side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteProgress {
    /// Head encoded but not yet fully written to the transport.
    HeadPending,
    /// Head written; body still streaming.
    Body,
    /// Head and body fully encoded.
    Complete,
}

/// One decoded step of a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded<R> {
    /// The full response head arrived.
    Head(R),
    /// A slice of the response body.
    Data(Bytes),
    /// The response is complete.
    End,
}

/// Frames one request's body.
pub trait BodyEncoder {
    /// False when the request carries no body: the exchange's outbound side
    /// is complete as soon as the head is encoded.
    fn expects_body(&self) -> bool;

    fn encode(&mut self, chunk: &[u8], dst: &mut BytesMut) -> Result<(), ClientError>;

    fn finish(&mut self, dst: &mut BytesMut) -> Result<(), ClientError>;
}

/// Encoding collaborator for one connection.
///
/// `decode` and `decode_eof` are always given the request whose response is
/// currently being read (the oldest admitted exchange that has not finished
/// reading), so framing that depends on the request, such as `HEAD`, can be
/// decided there.
pub trait Codec {
    type Request: 'static;
    type Response: 'static;
    type BodyEncoder: BodyEncoder + 'static;

    /// Reject a malformed request before it is queued.
    fn validate(&self, request: &Self::Request) -> Result<(), ClientError> {
        let _ = request;
        Ok(())
    }

    /// True if a successful response to `request` switches protocols.
    fn is_upgrade_request(&self, request: &Self::Request) -> bool;

    /// True if the protocol allows a request to be sent before the previous
    /// response arrived.
    fn supports_pipelining(&self) -> bool;

    /// Framing decision: may a new request head follow a request whose
    /// outbound side is at `previous`? The default requires the previous
    /// request to be fully encoded.
    fn can_begin(&self, previous: WriteProgress) -> bool {
        previous == WriteProgress::Complete
    }

    /// Append the request head to `dst` and return the body framing.
    fn encode_head(
        &mut self,
        request: &Self::Request,
        dst: &mut BytesMut,
    ) -> Result<Self::BodyEncoder, ClientError>;

    /// Decode the next step of the response to `request` from `src`.
    /// Returns `Ok(None)` when more bytes are needed.
    fn decode(
        &mut self,
        request: &Self::Request,
        src: &mut BytesMut,
    ) -> Result<Option<Decoded<Self::Response>>, ClientError>;

    /// The peer closed the stream while the response to `request` was being
    /// read. Return `End` if closing completes the response.
    fn decode_eof(
        &mut self,
        request: &Self::Request,
    ) -> Result<Option<Decoded<Self::Response>>, ClientError>;

    /// True if `response` accepts the protocol switch asked for by `request`.
    fn is_upgrade_accepted(&self, request: &Self::Request, response: &Self::Response) -> bool;
}
