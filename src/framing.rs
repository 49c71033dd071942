//! Prefix/suffix delimited message framing
//!
//! A frame on the wire is `prefix + payload + suffix`. The prefix may be
//! empty; the suffix never is. When a prefix is configured, anything before
//! it is line noise and gets discarded.

use std::fmt;
use std::io;

use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, trace};

/// Upper bound for one buffered frame
pub const MAX_FRAME_LENGTH: usize = 16 * 1024 * 1024;

/// HL7 MLLP start block
pub const HL7_START: &[u8] = &[0x0b];
/// HL7 MLLP end block followed by carriage return
pub const HL7_END: &[u8] = &[0x1c, 0x0d];

#[derive(Debug, Error)]
pub enum FramingError {
    #[error("invalid {field} hex {value:?}: {source}")]
    InvalidHex {
        field: &'static str,
        value: String,
        #[source]
        source: hex::FromHexError,
    },

    #[error("frame suffix must not be empty")]
    EmptySuffix,
}

/// Markers around each message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameBoundary {
    prefix: Bytes,
    suffix: Bytes,
}

impl FrameBoundary {
    pub fn new(prefix: impl Into<Bytes>, suffix: impl Into<Bytes>) -> Result<Self, FramingError> {
        let suffix = suffix.into();
        if suffix.is_empty() {
            return Err(FramingError::EmptySuffix);
        }
        Ok(Self {
            prefix: prefix.into(),
            suffix,
        })
    }

    /// MLLP markers used by HL7 interfaces
    pub fn hl7() -> Self {
        Self {
            prefix: Bytes::from_static(HL7_START),
            suffix: Bytes::from_static(HL7_END),
        }
    }

    /// Build a boundary from hex strings as given on the command line.
    ///
    /// Returns `None` when both are empty. A prefix given alone is used as
    /// the suffix.
    pub fn from_hex(prefix: &str, suffix: &str) -> Result<Option<Self>, FramingError> {
        let prefix = decode_hex("prefix", prefix)?;
        let suffix = decode_hex("suffix", suffix)?;

        match (prefix.is_empty(), suffix.is_empty()) {
            (true, true) => Ok(None),
            (false, true) => Self::new(Bytes::new(), prefix).map(Some),
            _ => Self::new(prefix, suffix).map(Some),
        }
    }

    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    pub fn suffix(&self) -> &[u8] {
        &self.suffix
    }
}

impl fmt::Display for FrameBoundary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "prefix={:?} suffix={:?}",
            hex::encode(&self.prefix),
            hex::encode(&self.suffix)
        )
    }
}

fn decode_hex(field: &'static str, value: &str) -> Result<Vec<u8>, FramingError> {
    hex::decode(value.trim()).map_err(|source| FramingError::InvalidHex {
        field,
        value: value.to_string(),
        source,
    })
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Codec splitting a byte stream into the payloads between boundaries
#[derive(Debug, Clone)]
pub struct FrameSplitter {
    boundary: FrameBoundary,
    max_frame_length: usize,
    /// Prefix of the current frame has been consumed
    in_frame: bool,
    /// Bytes of the current frame already searched for the suffix
    searched: usize,
}

impl FrameSplitter {
    pub fn new(boundary: FrameBoundary) -> Self {
        Self::with_max_length(boundary, MAX_FRAME_LENGTH)
    }

    pub fn with_max_length(boundary: FrameBoundary, max_frame_length: usize) -> Self {
        Self {
            boundary,
            max_frame_length,
            in_frame: false,
            searched: 0,
        }
    }

    pub fn boundary(&self) -> &FrameBoundary {
        &self.boundary
    }

    /// Skip to the payload of the next frame. Returns false if no prefix has
    /// arrived yet.
    fn sync_prefix(&mut self, src: &mut BytesMut) -> bool {
        let prefix = &self.boundary.prefix;
        if self.in_frame || prefix.is_empty() {
            return true;
        }

        match find(src, prefix) {
            Some(pos) => {
                if pos > 0 {
                    trace!("Discarding {} bytes before frame prefix", pos);
                }
                src.advance(pos + prefix.len());
                self.in_frame = true;
                self.searched = 0;
                true
            }
            None => {
                // A prefix may straddle two reads
                let keep = prefix.len() - 1;
                if src.len() > keep {
                    src.advance(src.len() - keep);
                }
                false
            }
        }
    }
}

impl Decoder for FrameSplitter {
    type Item = Bytes;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if !self.sync_prefix(src) {
            return Ok(None);
        }

        let suffix_len = self.boundary.suffix.len();
        match find(&src[self.searched..], &self.boundary.suffix) {
            Some(pos) => {
                let payload = src.split_to(self.searched + pos).freeze();
                src.advance(suffix_len);
                self.in_frame = false;
                self.searched = 0;
                Ok(Some(payload))
            }
            None => {
                if src.len() > self.max_frame_length {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("frame exceeds {} bytes", self.max_frame_length),
                    ));
                }
                self.searched = src.len().saturating_sub(suffix_len - 1);
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }

        if !src.is_empty() {
            debug!("Dropping {} bytes of incomplete frame at end of stream", src.len());
            src.clear();
        }
        self.in_frame = false;
        self.searched = 0;
        Ok(None)
    }
}

impl Encoder<Bytes> for FrameSplitter {
    type Error = io::Error;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.len() > self.max_frame_length {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("frame exceeds {} bytes", self.max_frame_length),
            ));
        }

        let boundary = &self.boundary;
        dst.reserve(boundary.prefix.len() + item.len() + boundary.suffix.len());
        dst.extend_from_slice(&boundary.prefix);
        dst.extend_from_slice(&item);
        dst.extend_from_slice(&boundary.suffix);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn splitter(prefix: &[u8], suffix: &[u8]) -> FrameSplitter {
        FrameSplitter::new(
            FrameBoundary::new(Bytes::copy_from_slice(prefix), Bytes::copy_from_slice(suffix))
                .unwrap(),
        )
    }

    fn decode_all(codec: &mut FrameSplitter, input: &[u8]) -> Vec<Bytes> {
        let mut src = BytesMut::from(input);
        let mut frames = Vec::new();
        while let Some(frame) = codec.decode(&mut src).unwrap() {
            frames.push(frame);
        }
        while let Some(frame) = codec.decode_eof(&mut src).unwrap() {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn test_two_messages() {
        let mut codec = splitter(b"<", b">");
        let frames = decode_all(&mut codec, b"<msg1><msg2>");
        assert_eq!(frames, vec![Bytes::from("msg1"), Bytes::from("msg2")]);
    }

    #[test]
    fn test_partial_frame_dropped() {
        let mut codec = splitter(b"<", b">");
        assert!(decode_all(&mut codec, b"<partial").is_empty());

        let mut codec = splitter(b"<", b">");
        let frames = decode_all(&mut codec, b"<done><partial");
        assert_eq!(frames, vec![Bytes::from("done")]);
    }

    #[test]
    fn test_junk_before_prefix() {
        let mut codec = splitter(b"\x02", b"\x03");
        let frames = decode_all(&mut codec, b"noise\x02one\x03more noise\x02two\x03");
        assert_eq!(frames, vec![Bytes::from("one"), Bytes::from("two")]);
    }

    #[test]
    fn test_byte_by_byte() {
        let mut codec = splitter(b"BEGIN", b"END");
        let input = b"xxBEGINfirstENDBEGINsecondEN";
        let mut src = BytesMut::new();
        let mut frames = Vec::new();
        for &b in input.iter().chain(b"D") {
            src.extend_from_slice(&[b]);
            if let Some(frame) = codec.decode(&mut src).unwrap() {
                frames.push(frame);
            }
        }
        assert_eq!(frames, vec![Bytes::from("first"), Bytes::from("second")]);
    }

    #[test]
    fn test_empty_prefix() {
        let mut codec = splitter(b"", b"\r\n");
        let frames = decode_all(&mut codec, b"a\r\nbb\r\n\r\nccc");
        assert_eq!(
            frames,
            vec![Bytes::from("a"), Bytes::from("bb"), Bytes::new()]
        );
    }

    #[test]
    fn test_hl7_round_trip() {
        let mut codec = FrameSplitter::new(FrameBoundary::hl7());
        let mut wire = BytesMut::new();
        codec
            .encode(Bytes::from("MSH|^~\\&|A\rPID|1"), &mut wire)
            .unwrap();
        assert_eq!(wire[0], 0x0b);
        assert_eq!(&wire[wire.len() - 2..], &[0x1c, 0x0d]);

        let frames = decode_all(&mut codec, &wire);
        assert_eq!(frames, vec![Bytes::from("MSH|^~\\&|A\rPID|1")]);
    }

    #[test]
    fn test_frame_too_long() {
        let boundary = FrameBoundary::new(Bytes::new(), Bytes::from_static(b";")).unwrap();
        let mut codec = FrameSplitter::with_max_length(boundary, 8);
        let mut src = BytesMut::from(&b"0123456789"[..]);
        let err = codec.decode(&mut src).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_from_hex() {
        assert_eq!(FrameBoundary::from_hex("", "").unwrap(), None);

        let boundary = FrameBoundary::from_hex("0b", "1c0d").unwrap().unwrap();
        assert_eq!(boundary, FrameBoundary::hl7());

        // Prefix alone acts as the suffix
        let boundary = FrameBoundary::from_hex("0a", "").unwrap().unwrap();
        assert!(boundary.prefix().is_empty());
        assert_eq!(boundary.suffix(), b"\n");

        let err = FrameBoundary::from_hex("zz", "").unwrap_err();
        assert!(err.to_string().contains("prefix"));
        let err = FrameBoundary::from_hex("", "abc").unwrap_err();
        assert!(err.to_string().contains("suffix"));
    }

    #[test]
    fn test_empty_suffix_rejected() {
        assert!(matches!(
            FrameBoundary::new(Bytes::from_static(b"<"), Bytes::new()),
            Err(FramingError::EmptySuffix)
        ));
    }
}
