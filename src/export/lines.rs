use anyhow::Result;
use std::io::Write;

use crate::config::OutputMode;
use crate::state::{IcmpResponse, Outcome};

/// Placeholder target for responses that quote nothing usable
pub const NO_QUOTE: &str = "no-quote";

/// Render one response as a result line (without the trailing newline)
pub fn format_line(response: &IcmpResponse, mode: OutputMode) -> Result<String> {
    let line = match mode {
        OutputMode::Plain => response.source().to_string(),
        OutputMode::ProbeType => {
            let target = response
                .target()
                .map(|t| t.to_string())
                .unwrap_or_else(|| NO_QUOTE.to_string());
            format!("{}, {}, {}", response.source(), response.label(), target)
        }
        OutputMode::Json => serde_json::to_string(response)?,
    };
    Ok(line)
}

/// Streams result lines for classified responses
pub struct LineWriter<W: Write> {
    writer: W,
    mode: OutputMode,
    written: u64,
}

impl<W: Write> LineWriter<W> {
    pub fn new(writer: W, mode: OutputMode) -> Self {
        Self {
            writer,
            mode,
            written: 0,
        }
    }

    /// Write a line if the sink decided this response should be emitted.
    /// Returns whether anything was written.
    pub fn write(&mut self, response: &IcmpResponse, outcome: &Outcome) -> Result<bool> {
        if !outcome.emit {
            return Ok(false);
        }
        writeln!(self.writer, "{}", format_line(response, self.mode)?)?;
        self.written += 1;
        Ok(true)
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}
