//! Response head parsing.

use crate::error::ParseError;
use crate::request::{Version, is_chunked, is_token};

/// Default cap on the size of a response head.
pub const MAX_HEAD_SIZE: usize = 64 * 1024;

/// A parsed response status line and header block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    version: Version,
    status: u16,
    reason: String,
    headers: Vec<(String, String)>,
}

impl ResponseHead {
    /// Parse a response head from the start of `data`.
    ///
    /// Returns the head and the number of bytes it occupied (including the
    /// blank line), or `Ok(None)` if the head has not fully arrived yet.
    pub fn parse(data: &[u8]) -> Result<Option<(Self, usize)>, ParseError> {
        Self::parse_with_limit(data, MAX_HEAD_SIZE)
    }

    /// Like [`parse`](Self::parse) with an explicit head size limit.
    pub fn parse_with_limit(data: &[u8], max: usize) -> Result<Option<(Self, usize)>, ParseError> {
        let Some(end) = find_header_end(data) else {
            if data.len() > max {
                return Err(ParseError::HeadTooLarge {
                    len: data.len(),
                    max,
                });
            }
            return Ok(None);
        };
        if end > max {
            return Err(ParseError::HeadTooLarge { len: end, max });
        }
        let head = parse_head(&data[..end])?;
        Ok(Some((head, end + 4)))
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Value of the first header named `name` (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// `1xx` status.
    pub fn is_informational(&self) -> bool {
        (100..200).contains(&self.status)
    }

    /// `101 Switching Protocols`.
    pub fn is_switching_protocols(&self) -> bool {
        self.status == 101
    }

    pub fn is_chunked(&self) -> bool {
        is_chunked(&self.headers)
    }

    /// Declared body length. Repeated headers must agree.
    pub fn content_length(&self) -> Result<Option<u64>, ParseError> {
        let mut found: Option<u64> = None;
        for (name, value) in &self.headers {
            if !name.eq_ignore_ascii_case("content-length") {
                continue;
            }
            let len: u64 = value
                .trim()
                .parse()
                .map_err(|_| ParseError::InvalidContentLength(value.clone()))?;
            if let Some(prev) = found
                && prev != len
            {
                return Err(ParseError::InvalidContentLength(value.clone()));
            }
            found = Some(len);
        }
        Ok(found)
    }

    /// True if the peer will close the connection after this response.
    pub fn wants_close(&self) -> bool {
        let has = |token: &str| {
            self.headers
                .iter()
                .filter(|(k, _)| k.eq_ignore_ascii_case("connection"))
                .flat_map(|(_, v)| v.split(','))
                .any(|t| t.trim().eq_ignore_ascii_case(token))
        };
        match self.version {
            Version::Http10 => !has("keep-alive"),
            Version::Http11 => has("close"),
        }
    }

    /// Protocol named by the `upgrade` header, if any.
    pub fn upgrade_protocol(&self) -> Option<&str> {
        self.header("upgrade")
    }
}

/// Find the position of `\r\n\r\n` in data, returns index of the first `\r`.
pub(crate) fn find_header_end(data: &[u8]) -> Option<usize> {
    (0..data.len().saturating_sub(3)).find(|&i| {
        data[i] == b'\r' && data[i + 1] == b'\n' && data[i + 2] == b'\r' && data[i + 3] == b'\n'
    })
}

/// Parse everything before `\r\n\r\n`.
fn parse_head(data: &[u8]) -> Result<ResponseHead, ParseError> {
    let text = std::str::from_utf8(data).map_err(|_| ParseError::InvalidStatusLine)?;
    let mut lines = text.split("\r\n");

    // Status line: HTTP/1.1 200 OK
    let status_line = lines.next().ok_or(ParseError::InvalidStatusLine)?;
    let mut parts = status_line.splitn(3, ' ');
    let version_str = parts.next().ok_or(ParseError::InvalidStatusLine)?;
    let version = Version::parse(version_str).ok_or_else(|| {
        if version_str.starts_with("HTTP/") {
            ParseError::UnsupportedVersion(version_str.to_string())
        } else {
            ParseError::InvalidStatusLine
        }
    })?;
    let status_str = parts.next().ok_or(ParseError::InvalidStatusLine)?;
    if status_str.len() != 3 || !status_str.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ParseError::InvalidStatusLine);
    }
    let status: u16 = status_str
        .parse()
        .map_err(|_| ParseError::InvalidStatusLine)?;
    if status < 100 {
        return Err(ParseError::InvalidStatusLine);
    }
    let reason = parts.next().unwrap_or("").to_string();

    let mut headers = Vec::new();
    for line in lines {
        // Obsolete line folding is rejected (RFC 9112 section 5.2).
        if line.starts_with(' ') || line.starts_with('\t') {
            return Err(ParseError::InvalidHeader(line.to_string()));
        }
        let Some((name, value)) = line.split_once(':') else {
            return Err(ParseError::InvalidHeader(line.to_string()));
        };
        if !is_token(name) {
            return Err(ParseError::InvalidHeader(line.to_string()));
        }
        headers.push((name.to_string(), value.trim().to_string()));
    }

    Ok(ResponseHead {
        version,
        status,
        reason,
        headers,
    })
}
