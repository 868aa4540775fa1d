//! Sans-IO HTTP/1.1 client framing.
//!
//! This crate encodes request heads and bodies and incrementally decodes
//! response heads and bodies. It performs no I/O: callers feed it byte
//! buffers and write out what it produces.
//!
//! ## Example
//!
//! ```
//! use bytes::BytesMut;
//! use protocol_http1::{BodyDecoder, BodyEvent, Request, ResponseHead};
//!
//! // Encode a GET request head
//! let request = Request::get("/status").header("host", "example.com");
//! request.validate().unwrap();
//! let mut out = BytesMut::new();
//! request.encode_head(&mut out);
//!
//! // Parse the response head, then its body
//! let mut input = BytesMut::from(&b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\n\r\nok"[..]);
//! let (head, consumed) = ResponseHead::parse(&input).unwrap().unwrap();
//! let _ = input.split_to(consumed);
//! assert_eq!(head.status(), 200);
//!
//! let mut body = BodyDecoder::for_response(&head, request.is_head()).unwrap();
//! assert!(matches!(body.decode(&mut input), Ok(Some(BodyEvent::Data(_)))));
//! assert_eq!(body.decode(&mut input), Ok(Some(BodyEvent::End)));
//! ```
//!
//! ## Pipelining
//!
//! Decoders never consume past the end of the message they frame, so bytes
//! of the next pipelined response stay in the input buffer.

mod body;
mod error;
mod request;
mod response;

pub use body::{BodyDecoder, BodyEncoder, BodyEvent};
pub use error::{EncodeError, ParseError};
pub use request::{Request, Version};
pub use response::{MAX_HEAD_SIZE, ResponseHead};
