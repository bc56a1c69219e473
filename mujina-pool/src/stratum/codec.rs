//! Newline framing for the stratum byte stream.
//!
//! Wraps [`LinesCodec`] with the leniency pools need: blank lines are
//! skipped, and an oversized or non-UTF-8 line is dropped without ending
//! the stream.

use std::io;

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::tracing::prelude::*;

/// Longest line accepted from a pool.
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Codec for line-delimited JSON-RPC.
///
/// Decoding yields lines without their `\n` or `\r\n` terminator. Encoding
/// appends `\n`.
#[derive(Debug)]
pub struct LineCodec {
    inner: LinesCodec,
}

impl LineCodec {
    pub fn new() -> Self {
        Self {
            inner: LinesCodec::new_with_max_length(MAX_LINE_LEN),
        }
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>, io::Error> {
        loop {
            match self.inner.decode(src) {
                Ok(Some(line)) if line.is_empty() => continue,
                Ok(line) => return Ok(line),
                // The inner codec keeps discarding up to the next newline
                Err(LinesCodecError::MaxLineLengthExceeded) => {
                    warn!(max = MAX_LINE_LEN, "Discarding oversized line");
                }
                Err(LinesCodecError::Io(e)) if e.kind() == io::ErrorKind::InvalidData => {
                    warn!("Discarding non-UTF-8 line");
                }
                Err(LinesCodecError::Io(e)) => return Err(e),
            }
        }
    }
}

impl Encoder<String> for LineCodec {
    type Error = io::Error;

    fn encode(&mut self, line: String, dst: &mut BytesMut) -> Result<(), io::Error> {
        self.inner.encode(line, dst).map_err(|e| match e {
            LinesCodecError::Io(e) => e,
            LinesCodecError::MaxLineLengthExceeded => {
                io::Error::new(io::ErrorKind::InvalidInput, "line too long")
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(codec: &mut LineCodec, buf: &mut BytesMut) -> Vec<String> {
        std::iter::from_fn(|| codec.decode(buf).unwrap()).collect()
    }

    #[test]
    fn test_split_across_chunks() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"{\"id\":1,"[..]);
        assert!(decode_all(&mut codec, &mut buf).is_empty());

        buf.extend_from_slice(b"\"result\":true}\n{\"id\"");
        assert_eq!(decode_all(&mut codec, &mut buf), vec!["{\"id\":1,\"result\":true}"]);

        buf.extend_from_slice(b":2}\r\n");
        assert_eq!(decode_all(&mut codec, &mut buf), vec!["{\"id\":2}"]);
    }

    #[test]
    fn test_blank_lines_skipped() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"\n\r\na\n\nb\n"[..]);
        assert_eq!(decode_all(&mut codec, &mut buf), vec!["a", "b"]);
    }

    #[test]
    fn test_oversized_line_dropped() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&vec![b'x'; MAX_LINE_LEN + 10][..]);
        assert!(decode_all(&mut codec, &mut buf).is_empty());

        buf.extend_from_slice(b"yyy");
        assert!(decode_all(&mut codec, &mut buf).is_empty());

        buf.extend_from_slice(b"\nnext\n");
        assert_eq!(decode_all(&mut codec, &mut buf), vec!["next"]);
    }

    #[test]
    fn test_oversized_complete_line_dropped() {
        let mut codec = LineCodec::new();
        let mut data = vec![b'x'; MAX_LINE_LEN + 1];
        data.extend_from_slice(b"\nok\n");
        let mut buf = BytesMut::from(&data[..]);
        assert_eq!(decode_all(&mut codec, &mut buf), vec!["ok"]);
    }

    #[test]
    fn test_non_utf8_line_dropped() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"\xff\xfe\n{\"id\":3}\n"[..]);
        assert_eq!(decode_all(&mut codec, &mut buf), vec!["{\"id\":3}"]);
    }

    #[test]
    fn test_encode_appends_newline() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::new();
        codec.encode("{\"id\":1}".to_string(), &mut buf).unwrap();
        assert_eq!(&buf[..], b"{\"id\":1}\n");
    }
}
