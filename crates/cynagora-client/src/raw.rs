// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The bare request/reply round-trip shared by every socket kind, with
//! the wire codec but none of the command-specific shape checking.

use crate::ClientError;
use cynagora_proto::wire::{FrameDecoder, FrameEncoder};
use std::io::Read;
use std::os::unix::net::UnixStream;
use std::path::Path;

/// One synchronous connection, framed but not yet bound to a
/// particular command vocabulary.
pub struct RawConnection {
    stream: UnixStream,
    encoder: FrameEncoder,
    decoder: FrameDecoder,
}

impl RawConnection {
    /// Connect to the unix socket at `path`.
    pub fn connect(path: &Path) -> Result<Self, ClientError> {
        Ok(Self {
            stream: UnixStream::connect(path)?,
            encoder: FrameEncoder::new(),
            decoder: FrameDecoder::new(),
        })
    }

    /// Send one request and block for its reply.
    pub fn roundtrip(&mut self, fields: &[&str]) -> Result<Vec<String>, ClientError> {
        self.encoder.put_fields(fields)?;
        self.encoder.write_to(&mut self.stream)?;
        loop {
            if let Some(reply) = self.decoder.next_message()? {
                return Ok(reply);
            }
            let mut buf = [0u8; 4096];
            let n = self.stream.read(&mut buf)?;
            if n == 0 {
                return Err(ClientError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "daemon closed the connection",
                )));
            }
            self.decoder.push_bytes(&buf[..n])?;
        }
    }
}
