//! Newline-delimited JSON framing codec.
//!
//! Each envelope is one UTF-8 line terminated by `\n`. Lines longer than
//! [`MAX_MESSAGE_SIZE`] are rejected instead of buffered.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec};

use crate::constants::MAX_MESSAGE_SIZE;
use crate::error::{NodeError, NodeResult};
use crate::protocol::Envelope;

#[derive(Debug)]
pub struct EnvelopeCodec {
    lines: LinesCodec,
}

impl EnvelopeCodec {
    pub fn new() -> Self {
        Self::with_max_length(MAX_MESSAGE_SIZE)
    }

    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(max_length),
        }
    }
}

impl Default for EnvelopeCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for EnvelopeCodec {
    type Item = Envelope;
    type Error = NodeError;

    fn decode(&mut self, src: &mut BytesMut) -> NodeResult<Option<Envelope>> {
        match self.lines.decode(src)? {
            Some(line) => Envelope::from_line(&line).map(Some),
            None => Ok(None),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> NodeResult<Option<Envelope>> {
        if let Some(envelope) = self.decode(src)? {
            return Ok(Some(envelope));
        }
        if src.iter().all(u8::is_ascii_whitespace) {
            src.clear();
            Ok(None)
        } else {
            let partial = src.len();
            src.clear();
            Err(NodeError::Framing(format!(
                "connection closed inside a message ({partial} bytes unterminated)"
            )))
        }
    }
}

impl Encoder<Envelope> for EnvelopeCodec {
    type Error = NodeError;

    fn encode(&mut self, envelope: Envelope, dst: &mut BytesMut) -> NodeResult<()> {
        let line = envelope.to_line()?;
        self.lines.encode(line, dst)?;
        Ok(())
    }
}
