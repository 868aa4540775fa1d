//! Request heads and their wire encoding.

use bytes::{BufMut, BytesMut};

use crate::body::BodyEncoder;
use crate::error::EncodeError;

/// HTTP/1.x protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    Http10,
    Http11,
}

impl Version {
    pub fn as_str(&self) -> &'static str {
        match self {
            Version::Http10 => "HTTP/1.0",
            Version::Http11 => "HTTP/1.1",
        }
    }

    pub(crate) fn parse(s: &str) -> Option<Self> {
        match s {
            "HTTP/1.0" => Some(Version::Http10),
            "HTTP/1.1" => Some(Version::Http11),
            _ => None,
        }
    }
}

/// An HTTP/1.x request head.
///
/// The body is not part of the request: how it is framed on the wire is
/// decided by the `content-length` and `transfer-encoding` headers, and its
/// bytes are streamed separately through the [`BodyEncoder`] returned by
/// [`Request::body_encoder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    method: String,
    target: String,
    version: Version,
    headers: Vec<(String, String)>,
}

impl Request {
    /// Create an HTTP/1.1 request with no headers.
    pub fn new(method: &str, target: &str) -> Self {
        Self {
            method: method.to_string(),
            target: target.to_string(),
            version: Version::Http11,
            headers: Vec::new(),
        }
    }

    pub fn get(target: &str) -> Self {
        Self::new("GET", target)
    }

    pub fn head(target: &str) -> Self {
        Self::new("HEAD", target)
    }

    pub fn post(target: &str) -> Self {
        Self::new("POST", target)
    }

    pub fn put(target: &str) -> Self {
        Self::new("PUT", target)
    }

    pub fn delete(target: &str) -> Self {
        Self::new("DELETE", target)
    }

    /// Add a header. Repeated names are kept in insertion order.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    /// Request a protocol switch (`connection: upgrade` + `upgrade: <protocol>`).
    pub fn upgrade(self, protocol: &str) -> Self {
        self.header("connection", "upgrade")
            .header("upgrade", protocol)
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Value of the first header named `name` (case-insensitive).
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// True if this request asks the peer to switch protocols.
    pub fn is_upgrade(&self) -> bool {
        self.header_value("upgrade").is_some()
    }

    /// True for `HEAD`, whose response never carries a body.
    pub fn is_head(&self) -> bool {
        self.method.eq_ignore_ascii_case("HEAD")
    }

    /// True if the final transfer coding is `chunked`.
    pub fn is_chunked(&self) -> bool {
        is_chunked(&self.headers)
    }

    /// Declared body length, if any.
    pub fn content_length(&self) -> Result<Option<u64>, EncodeError> {
        match self.header_value("content-length") {
            None => Ok(None),
            Some(v) => v
                .trim()
                .parse::<u64>()
                .map(Some)
                .map_err(|_| EncodeError::InvalidContentLength(v.to_string())),
        }
    }

    /// Check that the head can be put on the wire as-is.
    pub fn validate(&self) -> Result<(), EncodeError> {
        if !is_token(&self.method) {
            return Err(EncodeError::InvalidMethod(self.method.clone()));
        }
        if self.target.is_empty()
            || self
                .target
                .bytes()
                .any(|b| b == b' ' || b.is_ascii_control())
        {
            return Err(EncodeError::InvalidTarget(self.target.clone()));
        }
        for (name, value) in &self.headers {
            if !is_token(name) {
                return Err(EncodeError::InvalidHeaderName(name.clone()));
            }
            if value.bytes().any(|b| b == b'\r' || b == b'\n' || b == 0) {
                return Err(EncodeError::InvalidHeaderValue(name.clone()));
            }
        }
        if self.version == Version::Http11 && self.header_value("host").is_none() {
            return Err(EncodeError::MissingHost);
        }
        if self.content_length()?.is_some() && self.is_chunked() {
            return Err(EncodeError::ConflictingFraming);
        }
        Ok(())
    }

    /// Append the request line and headers, terminated by an empty line.
    pub fn encode_head(&self, dst: &mut BytesMut) {
        let len = self.encoded_len();
        dst.reserve(len);
        dst.put_slice(self.method.as_bytes());
        dst.put_u8(b' ');
        dst.put_slice(self.target.as_bytes());
        dst.put_u8(b' ');
        dst.put_slice(self.version.as_str().as_bytes());
        dst.put_slice(b"\r\n");
        for (name, value) in &self.headers {
            dst.put_slice(name.as_bytes());
            dst.put_slice(b": ");
            dst.put_slice(value.as_bytes());
            dst.put_slice(b"\r\n");
        }
        dst.put_slice(b"\r\n");
    }

    /// Body framing implied by the headers.
    pub fn body_encoder(&self) -> Result<BodyEncoder, EncodeError> {
        if self.is_chunked() {
            return Ok(BodyEncoder::chunked());
        }
        Ok(match self.content_length()? {
            Some(n) => BodyEncoder::length(n),
            None => BodyEncoder::empty(),
        })
    }

    fn encoded_len(&self) -> usize {
        // "METHOD SP target SP HTTP/1.1 CRLF" + headers + CRLF
        let line = self.method.len() + self.target.len() + 8 + 4;
        let headers: usize = self
            .headers
            .iter()
            .map(|(k, v)| k.len() + v.len() + 4)
            .sum();
        line + headers + 2
    }
}

pub(crate) fn is_chunked(headers: &[(String, String)]) -> bool {
    headers
        .iter()
        .rev()
        .find(|(k, _)| k.eq_ignore_ascii_case("transfer-encoding"))
        .and_then(|(_, v)| v.rsplit(',').next())
        .is_some_and(|coding| coding.trim().eq_ignore_ascii_case("chunked"))
}

pub(crate) fn is_token(s: &str) -> bool {
    !s.is_empty()
        && s.bytes().all(|b| {
            b.is_ascii_alphanumeric()
                || matches!(
                    b,
                    b'!' | b'#'
                        | b'$'
                        | b'%'
                        | b'&'
                        | b'\''
                        | b'*'
                        | b'+'
                        | b'-'
                        | b'.'
                        | b'^'
                        | b'_'
                        | b'`'
                        | b'|'
                        | b'~'
                )
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_get() {
        let req = Request::get("/index.html").header("host", "example.com");
        req.validate().unwrap();
        let mut buf = BytesMut::new();
        req.encode_head(&mut buf);
        assert_eq!(
            &buf[..],
            b"GET /index.html HTTP/1.1\r\nhost: example.com\r\n\r\n"
        );
    }

    #[test]
    fn encode_http10() {
        let req = Request::get("/").with_version(Version::Http10);
        req.validate().unwrap();
        let mut buf = BytesMut::new();
        req.encode_head(&mut buf);
        assert_eq!(&buf[..], b"GET / HTTP/1.0\r\n\r\n");
    }

    #[test]
    fn missing_host() {
        assert_eq!(
            Request::get("/").validate(),
            Err(EncodeError::MissingHost)
        );
    }

    #[test]
    fn invalid_method_and_target() {
        let req = Request::new("GE T", "/").header("host", "h");
        assert!(matches!(req.validate(), Err(EncodeError::InvalidMethod(_))));

        let req = Request::get("/a b").header("host", "h");
        assert!(matches!(req.validate(), Err(EncodeError::InvalidTarget(_))));

        let req = Request::get("").header("host", "h");
        assert!(matches!(req.validate(), Err(EncodeError::InvalidTarget(_))));
    }

    #[test]
    fn header_injection_rejected() {
        let req = Request::get("/")
            .header("host", "h")
            .header("x-evil", "a\r\nset-cookie: b");
        assert_eq!(
            req.validate(),
            Err(EncodeError::InvalidHeaderValue("x-evil".to_string()))
        );

        let req = Request::get("/").header("host", "h").header("bad name", "v");
        assert!(matches!(
            req.validate(),
            Err(EncodeError::InvalidHeaderName(_))
        ));
    }

    #[test]
    fn conflicting_framing() {
        let req = Request::post("/")
            .header("host", "h")
            .header("content-length", "3")
            .header("transfer-encoding", "chunked");
        assert_eq!(req.validate(), Err(EncodeError::ConflictingFraming));
    }

    #[test]
    fn body_encoder_selection() {
        let req = Request::post("/").header("content-length", "5");
        assert!(matches!(
            req.body_encoder(),
            Ok(BodyEncoder::Length { remaining: 5, .. })
        ));

        let req = Request::post("/").header("Transfer-Encoding", "gzip, chunked");
        assert!(req.is_chunked());
        assert!(matches!(req.body_encoder(), Ok(BodyEncoder::Chunked { .. })));

        let req = Request::get("/");
        assert!(!req.body_encoder().unwrap().expects_body());

        let req = Request::post("/").header("content-length", "five");
        assert!(matches!(
            req.body_encoder(),
            Err(EncodeError::InvalidContentLength(_))
        ));
    }

    #[test]
    fn upgrade_headers() {
        let req = Request::get("/chat").header("host", "h").upgrade("websocket");
        assert!(req.is_upgrade());
        assert_eq!(req.header_value("Connection"), Some("upgrade"));
        assert_eq!(req.header_value("UPGRADE"), Some("websocket"));
        assert!(!Request::get("/").is_upgrade());
    }

    #[test]
    fn head_method() {
        assert!(Request::head("/").is_head());
        assert!(Request::new("head", "/").is_head());
        assert!(!Request::get("/").is_head());
    }
}
