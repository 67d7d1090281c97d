//! Replay input for the binary.
//!
//! One captured packet per line: `<elapsed_micros> <hex bytes>`. The hex may
//! be split by whitespace. Blank lines and `#` comments are skipped.

use std::io::BufRead;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("line {line}: no packet bytes")]
    MissingPacket { line: usize },

    #[error("line {line}: not valid UTF-8")]
    BadText { line: usize },

    #[error("line {line}: bad elapsed time '{value}'")]
    BadElapsed { line: usize, value: String },

    #[error("line {line}: bad packet hex: {source}")]
    BadHex {
        line: usize,
        #[source]
        source: hex::FromHexError,
    },

    #[error("failed to read capture: {0}")]
    Io(#[from] std::io::Error),
}

impl CaptureError {
    /// A bad line can be skipped; an I/O failure ends the replay
    pub fn is_malformed_line(&self) -> bool {
        !matches!(self, CaptureError::Io(_))
    }
}

/// One packet from a capture file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedPacket {
    /// 1-based line number
    pub line: usize,
    /// Scan clock when the packet arrived. Wider values wrap to 32 bits,
    /// the same way the prober's clock does.
    pub elapsed: u32,
    pub bytes: Vec<u8>,
}

/// Parse one capture line. `Ok(None)` for blank and comment lines.
pub fn parse_line(line: usize, text: &str) -> Result<Option<CapturedPacket>, CaptureError> {
    let text = text.trim();
    if text.is_empty() || text.starts_with('#') {
        return Ok(None);
    }

    let mut fields = text.split_whitespace();
    let elapsed_field = fields.next().unwrap_or_default();
    let elapsed = elapsed_field
        .parse::<u64>()
        .map_err(|_| CaptureError::BadElapsed {
            line,
            value: elapsed_field.to_string(),
        })? as u32;

    let hex_text: String = fields.collect();
    if hex_text.is_empty() {
        return Err(CaptureError::MissingPacket { line });
    }
    let bytes = hex::decode(&hex_text).map_err(|source| CaptureError::BadHex { line, source })?;

    Ok(Some(CapturedPacket {
        line,
        elapsed,
        bytes,
    }))
}

/// Iterator over the packets of a capture
pub struct CaptureReader<R> {
    reader: R,
    line: usize,
    buf: Vec<u8>,
}

impl<R: BufRead> CaptureReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: 0,
            buf: Vec::new(),
        }
    }
}

impl<R: BufRead> Iterator for CaptureReader<R> {
    type Item = Result<CapturedPacket, CaptureError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.buf.clear();
            match self.reader.read_until(b'\n', &mut self.buf) {
                Ok(0) => return None,
                Ok(_) => {
                    self.line += 1;
                    let Ok(text) = std::str::from_utf8(&self.buf) else {
                        return Some(Err(CaptureError::BadText { line: self.line }));
                    };
                    match parse_line(self.line, text) {
                        Ok(Some(packet)) => return Some(Ok(packet)),
                        Ok(None) => continue,
                        Err(e) => return Some(Err(e)),
                    }
                }
                Err(e) => return Some(Err(e.into())),
            }
        }
    }
}
