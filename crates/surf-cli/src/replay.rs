//! Replay files: one `{"at": <ms>, "event": <SensorEvent>}` per line.
//!
//! Ticks run on the file's clock. Every detection tick due at or before a
//! line's `at` runs before that line is handled, and one more tick runs
//! after the last line.

use std::io::{BufRead, Write};

use anyhow::{Context, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use surf_core::{SensorEvent, Timestamp};

use crate::runner::{Outbound, Runner};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ReplayLine {
    pub at: Timestamp,
    pub event: SensorEvent,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReplaySummary {
    /// Lines handled.
    pub lines: usize,
    /// Malformed lines dropped.
    pub skipped: usize,
    /// Outbound events written.
    pub emitted: usize,
    /// Clock of the last handled line.
    pub last_at: Option<Timestamp>,
}

/// Feeds lines to a runner on one virtual clock and writes what it emits.
#[derive(Debug, Default)]
pub struct Replay {
    summary: ReplaySummary,
}

impl Replay {
    /// Run the ticks due by `line.at`, then handle the line. Returns what
    /// was written.
    pub fn step<W: Write>(
        &mut self,
        runner: &mut Runner,
        line: ReplayLine,
        output: &mut W,
    ) -> Result<Vec<Outbound>> {
        // The clock never runs backwards.
        let at = match self.summary.last_at {
            Some(previous) if line.at < previous => {
                tracing::debug!("replay line at {} before {previous}, clamped", line.at);
                previous
            }
            _ => line.at,
        };
        self.summary.last_at = Some(at);

        let mut out = runner.advance_to(at)?;
        out.extend(runner.handle(at, line.event)?);
        self.summary.lines += 1;
        self.summary.emitted += write_lines(output, &out)?;
        Ok(out)
    }

    pub fn skip(&mut self) {
        self.summary.skipped += 1;
    }

    /// Run one more tick after the last line and flush.
    pub fn finish<W: Write>(mut self, runner: &mut Runner, output: &mut W) -> Result<ReplaySummary> {
        if let Some(at) = self.summary.last_at {
            let out = runner.advance_to(at + runner.tick_interval())?;
            self.summary.emitted += write_lines(output, &out)?;
        }
        output.flush().context("failed to flush output")?;
        Ok(self.summary)
    }
}

pub fn replay<R: BufRead, W: Write>(
    runner: &mut Runner,
    input: R,
    output: &mut W,
) -> Result<ReplaySummary> {
    let mut replay = Replay::default();

    for (index, line) in input.lines().enumerate() {
        let line = line.context("failed to read replay input")?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<ReplayLine>(line) {
            Ok(parsed) => {
                replay.step(runner, parsed, output)?;
            }
            Err(e) => {
                tracing::warn!("replay line {} skipped: {e}", index + 1);
                replay.skip();
            }
        }
    }

    replay.finish(runner, output)
}

/// Write a replay stream, one line per entry.
pub fn write_script<W: Write>(output: &mut W, lines: &[ReplayLine]) -> Result<()> {
    for line in lines {
        serde_json::to_writer(&mut *output, line).context("failed to encode replay line")?;
        writeln!(output).context("failed to write replay line")?;
    }
    output.flush().context("failed to flush replay script")?;
    Ok(())
}

pub fn write_lines<W: Write>(output: &mut W, lines: &[Outbound]) -> Result<usize> {
    for line in lines {
        serde_json::to_writer(&mut *output, line).context("failed to encode event")?;
        writeln!(output).context("failed to write event")?;
    }
    Ok(lines.len())
}
