//! Progress aggregation and rendering.
//!
//! The aggregator is the only owner of [`ProgressState`]. It accepts
//! percentages through [`ProgressAggregator::ingest`] and re-renders a single
//! line of the form `[#####     ]10% 1024/10240` after every value.
//! The bar is 50 glyphs wide, one glyph per 2%, and never shrinks.

use crate::error::TransferError;
use crate::streaming::channel::ProgressReceiver;
use console::Term;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use serde::Serialize;
use std::io::{self, Write};
use tracing::{debug, warn};

/// Width of the rendered bar in glyphs
pub const BAR_WIDTH: usize = 50;

const BAR_GLYPH: char = '#';

/// Aggregator lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Phase {
    /// No value received yet
    Idle,
    /// At least one value rendered
    Active,
    /// Handoff closed
    Done,
}

/// Rendered progress, kept as high-water marks
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressState {
    /// Acknowledged bytes derived from the percentage
    pub cur: u64,
    /// File size in bytes
    pub total: u64,
    /// Integer percentage shown on the line
    pub percent: u64,
    /// Filled part of the bar
    pub bars: String,
}

impl ProgressState {
    fn new(total: u64) -> Self {
        Self {
            cur: 0,
            total,
            percent: 0,
            bars: String::with_capacity(BAR_WIDTH),
        }
    }

    /// Number of filled glyphs.
    pub fn filled(&self) -> usize {
        self.bars.len()
    }

    /// The rendered line, without carriage return.
    pub fn line(&self) -> String {
        format!(
            "[{:<width$}]{}% {}/{}",
            self.bars,
            self.percent,
            self.cur,
            self.total,
            width = BAR_WIDTH
        )
    }
}

// =============================================================================
// Sinks
// =============================================================================

/// Where rendered lines go.
pub trait ProgressSink: Send {
    /// Overwrite the current line.
    fn draw(&mut self, line: &str) -> io::Result<()>;

    /// Terminate the line and print the completion message.
    fn finish(&mut self, message: &str) -> io::Result<()>;
}

/// Plain writer sink: `\r` before every line, newline on finish.
pub struct WriterSink<W> {
    out: W,
}

impl<W: Write + Send> WriterSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send> ProgressSink for WriterSink<W> {
    fn draw(&mut self, line: &str) -> io::Result<()> {
        write!(self.out, "\r{line}")?;
        self.out.flush()
    }

    fn finish(&mut self, message: &str) -> io::Result<()> {
        writeln!(self.out)?;
        writeln!(self.out, "{message}")?;
        self.out.flush()
    }
}

/// Terminal sink backed by an indicatif bar that only shows our own line.
pub struct TerminalSink {
    bar: ProgressBar,
}

impl TerminalSink {
    /// Draw on stdout. The target is not rate limited, so every value is shown.
    pub fn stdout() -> Result<Self, TransferError> {
        Self::with_target(ProgressDrawTarget::term_like(Box::new(Term::stdout())))
    }

    pub fn with_target(target: ProgressDrawTarget) -> Result<Self, TransferError> {
        let style = ProgressStyle::with_template("{msg}")
            .map_err(|e| TransferError::Render(e.to_string()))?;
        let bar = ProgressBar::with_draw_target(None, target);
        bar.set_style(style);
        Ok(Self { bar })
    }
}

impl ProgressSink for TerminalSink {
    fn draw(&mut self, line: &str) -> io::Result<()> {
        self.bar.set_message(line.to_string());
        Ok(())
    }

    fn finish(&mut self, message: &str) -> io::Result<()> {
        self.bar.finish();
        let mut out = io::stdout().lock();
        writeln!(out, "{message}")?;
        out.flush()
    }
}

// =============================================================================
// Aggregator
// =============================================================================

/// What the aggregator saw by the time its handoff closed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressOutcome {
    /// Phase reached before Done (`Idle` if no value ever arrived)
    pub reached: Phase,
    pub state: ProgressState,
    /// Renders attempted, failed ones included
    pub renders: u64,
    pub render_failures: u64,
}

/// Sole owner of the transfer's progress state
pub struct ProgressAggregator {
    state: ProgressState,
    phase: Phase,
    renders: u64,
    render_failures: u64,
    sink: Box<dyn ProgressSink>,
}

impl ProgressAggregator {
    pub fn new(total: u64, sink: Box<dyn ProgressSink>) -> Self {
        Self {
            state: ProgressState::new(total),
            phase: Phase::Idle,
            renders: 0,
            render_failures: 0,
            sink,
        }
    }

    /// Accept one percentage and re-render.
    ///
    /// NaN is dropped; anything else is clamped to `[0, 100]`. Glyphs,
    /// percent and `cur` only ever grow.
    pub fn ingest(&mut self, percent: f64) {
        if self.phase == Phase::Done {
            return;
        }
        if percent.is_nan() {
            warn!("ignoring NaN progress value");
            return;
        }

        let p = percent.clamp(0.0, 100.0);

        let filled = ((p / 2.0).floor() as usize).min(BAR_WIDTH);
        while self.state.bars.len() < filled {
            self.state.bars.push(BAR_GLYPH);
        }

        self.state.percent = self.state.percent.max(p.floor() as u64);
        let cur = ((p / 100.0) * self.state.total as f64).floor() as u64;
        self.state.cur = self.state.cur.max(cur.min(self.state.total));

        self.phase = Phase::Active;
        self.render();
    }

    /// Consume the handoff until it closes, then finish.
    pub async fn run(mut self, mut progress: ProgressReceiver) -> ProgressOutcome {
        while let Some(p) = progress.recv().await {
            self.ingest(p);
        }
        self.finish()
    }

    fn render(&mut self) {
        self.renders += 1;
        if let Err(e) = self.sink.draw(&self.state.line()) {
            self.render_failures += 1;
            let err = TransferError::Render(e.to_string());
            warn!(error = %err, "progress render failed, continuing");
        }
    }

    fn finish(mut self) -> ProgressOutcome {
        let reached = self.phase;
        self.phase = Phase::Done;

        let message = match reached {
            Phase::Idle => "transfer finished, peer reported no progress".to_string(),
            _ if self.state.percent >= 100 => "transfer complete".to_string(),
            _ => format!("transfer finished at {}%", self.state.percent),
        };
        if let Err(e) = self.sink.finish(&message) {
            let err = TransferError::Render(e.to_string());
            warn!(error = %err, "progress finish failed");
        }
        debug!(?reached, renders = self.renders, "progress renderer done");

        ProgressOutcome {
            reached,
            state: self.state,
            renders: self.renders,
            render_failures: self.render_failures,
        }
    }
}
