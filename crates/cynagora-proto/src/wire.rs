// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Line-framed wire protocol: fields separated by a single space,
//! records terminated by newline, with backslash-escaping of the three
//! special bytes. Encoder and decoder each hold a bounded ring buffer
//! so a caller never has to size anything itself.

use std::collections::VecDeque;
use std::io::{self, Write};
use thiserror::Error;

/// Maximum size, in bytes, of the buffered (encoded) form of one message.
pub const MAX_BUF_LEN: usize = 2000;
/// Maximum number of fields in one message.
pub const MAX_FIELDS: usize = 20;

const FS: u8 = b' ';
const RS: u8 = b'\n';
const ESC: u8 = b'\\';

/// Errors raised while framing or parsing wire messages.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtoError {
    /// More fields were supplied/parsed than [`MAX_FIELDS`] allows.
    #[error("too many fields ({0})")]
    TooManyFields(usize),
    /// The encoded message would not fit in the remaining buffer space.
    /// The caller should flush pending output and retry.
    #[error("output buffer full, flush and retry")]
    BufferFull,
    /// No complete record fits within [`MAX_BUF_LEN`] bytes; the
    /// connection is unrecoverable and should be torn down.
    #[error("message exceeds {MAX_BUF_LEN} bytes")]
    MessageTooLong,
}

/// Encodes field lists into ring-buffered, escaped wire records.
#[derive(Debug, Default)]
pub struct FrameEncoder {
    buf: VecDeque<u8>,
}

impl FrameEncoder {
    /// Create an empty encoder.
    pub fn new() -> Self {
        Self {
            buf: VecDeque::with_capacity(MAX_BUF_LEN),
        }
    }

    /// Whether there is buffered output waiting to be written.
    pub fn has_pending(&self) -> bool {
        !self.buf.is_empty()
    }

    /// Number of bytes currently buffered.
    pub fn pending_len(&self) -> usize {
        self.buf.len()
    }

    /// Encode `fields` as one record and append it to the output buffer.
    /// Fails with [`ProtoError::BufferFull`] and leaves the buffer
    /// untouched if the record would not fit; the caller should drain
    /// with [`FrameEncoder::write_to`] and retry.
    pub fn put_fields(&mut self, fields: &[&str]) -> Result<(), ProtoError> {
        if fields.len() > MAX_FIELDS {
            return Err(ProtoError::TooManyFields(fields.len()));
        }
        let mut encoded = Vec::new();
        for (i, field) in fields.iter().enumerate() {
            if i > 0 {
                encoded.push(FS);
            }
            for &b in field.as_bytes() {
                if b == FS || b == RS || b == ESC {
                    encoded.push(ESC);
                }
                encoded.push(b);
            }
        }
        encoded.push(RS);
        if self.buf.len() + encoded.len() > MAX_BUF_LEN {
            return Err(ProtoError::BufferFull);
        }
        self.buf.extend(encoded);
        Ok(())
    }

    /// Write as much buffered output as `w` accepts without blocking.
    /// Returns `Ok(0)` if the buffer was already empty.
    pub fn write_to<W: Write>(&mut self, w: &mut W) -> io::Result<usize> {
        if self.buf.is_empty() {
            return Ok(0);
        }
        let slice = self.buf.make_contiguous();
        let n = w.write(slice)?;
        self.buf.drain(..n);
        Ok(n)
    }
}

/// Accumulates raw bytes and yields complete, decoded field records.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: VecDeque<u8>,
}

impl FrameDecoder {
    /// Create an empty decoder.
    pub fn new() -> Self {
        Self {
            buf: VecDeque::with_capacity(MAX_BUF_LEN),
        }
    }

    /// Whether the input buffer is at capacity with no framed record
    /// available — the peer must be sending more than one message's
    /// worth of bytes with no newline in sight.
    pub fn is_full(&self) -> bool {
        self.buf.len() >= MAX_BUF_LEN
    }

    /// Append freshly-read bytes. Fails with [`ProtoError::MessageTooLong`]
    /// if this would exceed the buffer bound with no record boundary in
    /// sight; the connection should be dropped in that case.
    pub fn push_bytes(&mut self, data: &[u8]) -> Result<(), ProtoError> {
        if self.buf.len() + data.len() > MAX_BUF_LEN {
            return Err(ProtoError::MessageTooLong);
        }
        self.buf.extend(data.iter().copied());
        Ok(())
    }

    /// Pull one complete, unescaped message out of the buffer, if a
    /// terminating (unescaped) newline is present. An empty line decodes
    /// to zero fields, not one empty field.
    pub fn next_message(&mut self) -> Result<Option<Vec<String>>, ProtoError> {
        let Some(end) = self.find_unescaped_rs() else {
            return Ok(None);
        };
        let record: Vec<u8> = self.buf.drain(..=end).collect();
        let fields = split_fields(&record[..record.len() - 1])?;
        Ok(Some(fields))
    }

    fn find_unescaped_rs(&self) -> Option<usize> {
        let mut i = 0;
        while i < self.buf.len() {
            if self.buf[i] == RS {
                let mut nesc = 0;
                while i > nesc && self.buf[i - (nesc + 1)] == ESC {
                    nesc += 1;
                }
                if nesc % 2 == 0 {
                    return Some(i);
                }
            }
            i += 1;
        }
        None
    }
}

fn split_fields(data: &[u8]) -> Result<Vec<String>, ProtoError> {
    if data.is_empty() {
        return Ok(Vec::new());
    }
    let mut fields = Vec::new();
    let mut current = Vec::new();
    let mut i = 0;
    while i < data.len() {
        match data[i] {
            FS => {
                fields.push(String::from_utf8_lossy(&current).into_owned());
                current.clear();
                if fields.len() >= MAX_FIELDS {
                    return Err(ProtoError::TooManyFields(fields.len() + 1));
                }
            }
            ESC if i + 1 < data.len() => {
                i += 1;
                current.push(data[i]);
            }
            b => current.push(b),
        }
        i += 1;
    }
    fields.push(String::from_utf8_lossy(&current).into_owned());
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_plain_fields() {
        let mut enc = FrameEncoder::new();
        enc.put_fields(&["check", "q1", "alice", "s1", "1000", "audio"])
            .unwrap();
        let mut out = Vec::new();
        enc.write_to(&mut out).unwrap();
        assert_eq!(out, b"check q1 alice s1 1000 audio\n");

        let mut dec = FrameDecoder::new();
        dec.push_bytes(&out).unwrap();
        let fields = dec.next_message().unwrap().unwrap();
        assert_eq!(fields, vec!["check", "q1", "alice", "s1", "1000", "audio"]);
    }

    #[test]
    fn escapes_special_bytes() {
        let mut enc = FrameEncoder::new();
        enc.put_fields(&["a b", "c\nd", "e\\f"]).unwrap();
        let mut out = Vec::new();
        enc.write_to(&mut out).unwrap();

        let mut dec = FrameDecoder::new();
        dec.push_bytes(&out).unwrap();
        let fields = dec.next_message().unwrap().unwrap();
        assert_eq!(fields, vec!["a b", "c\nd", "e\\f"]);
    }

    #[test]
    fn empty_line_decodes_to_zero_fields() {
        let mut dec = FrameDecoder::new();
        dec.push_bytes(b"\n").unwrap();
        let fields = dec.next_message().unwrap().unwrap();
        assert!(fields.is_empty());
    }

    #[test]
    fn preserves_empty_trailing_field() {
        let mut dec = FrameDecoder::new();
        dec.push_bytes(b"a \n").unwrap();
        let fields = dec.next_message().unwrap().unwrap();
        assert_eq!(fields, vec!["a", ""]);
    }

    #[test]
    fn rejects_too_many_fields_on_encode() {
        let fields: Vec<&str> = (0..21).map(|_| "x").collect();
        let mut enc = FrameEncoder::new();
        assert_eq!(
            enc.put_fields(&fields).unwrap_err(),
            ProtoError::TooManyFields(21)
        );
    }

    #[test]
    fn rejects_too_many_fields_on_decode() {
        let line = "a ".repeat(25) + "\n";
        let mut dec = FrameDecoder::new();
        dec.push_bytes(line.as_bytes()).unwrap();
        assert!(matches!(
            dec.next_message(),
            Err(ProtoError::TooManyFields(_))
        ));
    }

    #[test]
    fn incremental_feed_waits_for_terminator() {
        let mut dec = FrameDecoder::new();
        dec.push_bytes(b"check q1 a").unwrap();
        assert_eq!(dec.next_message().unwrap(), None);
        dec.push_bytes(b"lice\n").unwrap();
        let fields = dec.next_message().unwrap().unwrap();
        assert_eq!(fields, vec!["check", "q1", "alice"]);
    }

    #[test]
    fn buffer_full_without_terminator_is_an_error() {
        let mut dec = FrameDecoder::new();
        let chunk = vec![b'x'; MAX_BUF_LEN];
        assert!(dec.push_bytes(&chunk).is_ok());
        assert!(dec.push_bytes(b"y").is_err());
        assert!(dec.is_full());
    }
}
