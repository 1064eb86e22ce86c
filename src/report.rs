use std::io::{self, Write};
use std::time::Duration;

use crate::types::{ExecutionResult, UnitStatus};

pub const HEADER: &str = "Compilation unit\tRuntime or failure";
pub const FAIL_MARKER: &str = "FAIL";

/// Streams one TSV row per finished unit, flushing after every row.
pub struct Reporter<W: Write> {
    out: W,
    rows: usize,
}

impl<W: Write> Reporter<W> {
    pub fn new(out: W) -> Self {
        Self { out, rows: 0 }
    }

    pub fn write_header(&mut self) -> io::Result<()> {
        writeln!(self.out, "{HEADER}")?;
        self.out.flush()
    }

    pub fn report(&mut self, result: &ExecutionResult) -> io::Result<()> {
        writeln!(self.out, "{}", format_row(result))?;
        self.out.flush()?;
        self.rows += 1;
        Ok(())
    }

    /// Rows written so far, excluding the header.
    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

/// `name<TAB>seconds` for successes, `name<TAB>FAIL` otherwise.
pub fn format_row(result: &ExecutionResult) -> String {
    match result.status {
        UnitStatus::Success => format!("{}\t{}", result.unit.name, format_seconds(result.duration)),
        UnitStatus::Failure | UnitStatus::TimedOut => {
            format!("{}\t{}", result.unit.name, FAIL_MARKER)
        }
    }
}

/// Seconds with millisecond precision, e.g. "0.103".
pub fn format_seconds(duration: Duration) -> String {
    format!("{:.3}", duration.as_secs_f64())
}
