//! Delimiter-tolerant line framing.
//!
//! IRC servers terminate lines with CR+LF, but real-world traffic contains
//! bare CR and bare LF as well, and the two bytes of a CR+LF pair may arrive
//! in different reads. [`LineReader`] is a [`Decoder`] that accepts all
//! three delimiters, enforces a maximum line length by dropping the
//! offending line and resuming at the next delimiter, and yields the final
//! undelimited segment (possibly empty) exactly once at end of stream.
//!
//! Lines are byte vectors: RECEIVE traffic is journaled verbatim and is not
//! necessarily valid UTF-8.

use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;

/// Tolerant line decoder with bounded line length.
#[derive(Debug)]
pub struct LineReader {
    max_len: usize,
    // Discarding bytes of an overlong line until the next delimiter.
    skipping: bool,
    // Last consumed delimiter was CR; a directly following LF is part of it.
    pending_cr: bool,
    // The final EOF segment has been produced.
    eof_done: bool,
}

/// Default bound matching the IRC-side limit of 1000 bytes per line.
pub const DEFAULT_MAX_LINE_LEN: usize = 1000;

impl LineReader {
    /// Decoder with the default 1000-byte line bound.
    pub fn new() -> Self {
        Self::with_max_len(DEFAULT_MAX_LINE_LEN)
    }

    /// Decoder with a custom line bound.
    pub fn with_max_len(max_len: usize) -> Self {
        LineReader {
            max_len,
            skipping: false,
            pending_cr: false,
            eof_done: false,
        }
    }
}

impl Default for LineReader {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LineReader {
    type Item = Vec<u8>;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Vec<u8>>, Self::Error> {
        loop {
            if self.pending_cr {
                if src.is_empty() {
                    return Ok(None);
                }
                if src[0] == b'\n' {
                    src.advance(1);
                }
                self.pending_cr = false;
            }

            match src.iter().position(|&b| b == b'\r' || b == b'\n') {
                Some(pos) => {
                    let delim = src[pos];
                    let line = src.split_to(pos);
                    src.advance(1);
                    self.pending_cr = delim == b'\r';
                    if self.skipping {
                        // Tail end of an already-dropped overlong line.
                        self.skipping = false;
                        continue;
                    }
                    if line.len() > self.max_len {
                        continue;
                    }
                    return Ok(Some(line.to_vec()));
                }
                None => {
                    if src.len() > self.max_len {
                        src.clear();
                        self.skipping = true;
                    }
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Vec<u8>>, Self::Error> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        if self.eof_done {
            return Ok(None);
        }
        self.eof_done = true;
        let line = src.split_to(src.len());
        if self.skipping || line.len() > self.max_len {
            self.skipping = false;
            return Ok(None);
        }
        Ok(Some(line.to_vec()))
    }
}
