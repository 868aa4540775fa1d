//! Line-oriented codec used by unit tests.
//!
//! Requests are single words written as `WORD\n`. `POST` requests carry a
//! body terminated by an empty line; `UPGRADE` asks for a protocol switch.
//! Responses are `WORD\n` heads with no body; `SWITCH` accepts an upgrade.

use bytes::{Buf, BytesMut};

use crate::codec::{BodyEncoder, Codec, Decoded};
use crate::error::ClientError;

pub(crate) struct LineBody {
    pub(crate) expects: bool,
}

impl BodyEncoder for LineBody {
    fn expects_body(&self) -> bool {
        self.expects
    }

    fn encode(&mut self, chunk: &[u8], dst: &mut BytesMut) -> Result<(), ClientError> {
        if !self.expects {
            return Err(ClientError::BodyComplete);
        }
        dst.extend_from_slice(chunk);
        Ok(())
    }

    fn finish(&mut self, dst: &mut BytesMut) -> Result<(), ClientError> {
        if self.expects {
            dst.extend_from_slice(b"\n\n");
        }
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct Lines {
    pub(crate) pipelining: bool,
}

impl Lines {
    pub(crate) fn pipelined() -> Self {
        Self { pipelining: true }
    }
}

impl Codec for Lines {
    type Request = String;
    type Response = String;
    type BodyEncoder = LineBody;

    fn validate(&self, request: &String) -> Result<(), ClientError> {
        if request.is_empty() || request.contains('\n') {
            return Err(ClientError::InvalidRequest(format!("{request:?}")));
        }
        Ok(())
    }

    fn is_upgrade_request(&self, request: &String) -> bool {
        request == "UPGRADE"
    }

    fn supports_pipelining(&self) -> bool {
        self.pipelining
    }

    fn encode_head(
        &mut self,
        request: &String,
        dst: &mut BytesMut,
    ) -> Result<LineBody, ClientError> {
        dst.extend_from_slice(request.as_bytes());
        dst.extend_from_slice(b"\n");
        Ok(LineBody {
            expects: request == "POST",
        })
    }

    fn decode(
        &mut self,
        _request: &String,
        src: &mut BytesMut,
    ) -> Result<Option<Decoded<String>>, ClientError> {
        let Some(pos) = src.iter().position(|&b| b == b'\n') else {
            return Ok(None);
        };
        let line = src.split_to(pos);
        src.advance(1);
        let word = String::from_utf8(line.to_vec())
            .map_err(|_| ClientError::Protocol("non-utf8 response".into()))?;
        if word.is_empty() {
            return Ok(Some(Decoded::End));
        }
        Ok(Some(Decoded::Head(word)))
    }

    fn decode_eof(&mut self, _request: &String) -> Result<Option<Decoded<String>>, ClientError> {
        Ok(None)
    }

    fn is_upgrade_accepted(&self, request: &String, response: &String) -> bool {
        request == "UPGRADE" && response == "SWITCH"
    }
}
