//! Presentation
//!
//! Formats registry records into fixed-width rows and writes them to a
//! [`DisplaySink`]. Rows that do not fit are dropped without notice.

use crate::registry::ConnectionRecord;
use crossterm::cursor::{Hide, MoveTo, Show};
use crossterm::style::Print;
use crossterm::terminal::{self, Clear, ClearType, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::{execute, queue};
use log::debug;
use std::io::{self, Stdout, Write};

/// Status line plus column titles.
pub const HEADER_LINES: usize = 2;

pub trait DisplaySink {
    /// Number of record rows that fit below the header.
    fn capacity(&self) -> usize;

    /// Replaces the visible contents with `lines`.
    fn draw(&mut self, lines: &[String]) -> io::Result<()>;
}

#[derive(Debug, Clone, Copy)]
pub struct Status {
    pub active: usize,
    pub tracked: usize,
    pub interval_secs: u64,
}

pub fn column_titles() -> String {
    format!(
        "{:<6} {:<15} {:>10} {:<40} {:<5} {:<21} {:<21}",
        "ACTIVE", "NAME", "TIME", "DOMAIN", "LAYER", "REMOTE ADDRESS", "LOCAL ADDRESS"
    )
}

pub fn status_line(status: &Status) -> String {
    format!(
        "connwatch - {} active / {} tracked - every {}s - {} - Ctrl-C to quit",
        status.active,
        status.tracked,
        status.interval_secs,
        chrono::Local::now().format("%H:%M:%S")
    )
}

pub fn format_row(record: &ConnectionRecord) -> String {
    format!(
        "{:<6} {:<15.15} {:>10.2} {:<40.40} {:<5.5} {:<21.21} {:<21.21}",
        if record.is_active { "yes" } else { "no" },
        record.name,
        record.time_connected.as_secs_f64(),
        record.domain,
        record.transport_layer.to_string(),
        record.remote_address.to_string(),
        record.local_address.to_string(),
    )
}

/// Draws `records` (already in display order) under the header. Returns the
/// number of record rows actually shown.
pub fn render<S: DisplaySink>(sink: &mut S, status: &Status, records: &[&ConnectionRecord]) -> io::Result<usize> {
    let visible = records.len().min(sink.capacity());
    if visible < records.len() {
        debug!("Display full: {} of {} rows not shown", records.len() - visible, records.len());
    }

    let mut lines = Vec::with_capacity(HEADER_LINES + visible);
    lines.push(status_line(status));
    lines.push(column_titles());
    lines.extend(records.iter().take(visible).map(|r| format_row(r)));

    sink.draw(&lines)?;
    Ok(visible)
}

/// Full-screen terminal output. Creating it switches to the alternate screen
/// and hides the cursor; dropping it puts the terminal back.
pub struct TerminalScreen {
    out: Stdout,
}

impl TerminalScreen {
    pub fn enter() -> io::Result<Self> {
        let mut out = io::stdout();
        execute!(out, EnterAlternateScreen, Hide)?;
        Ok(TerminalScreen { out })
    }
}

impl DisplaySink for TerminalScreen {
    fn capacity(&self) -> usize {
        match terminal::size() {
            Ok((_, rows)) => (rows as usize).saturating_sub(HEADER_LINES),
            Err(_) => 0,
        }
    }

    fn draw(&mut self, lines: &[String]) -> io::Result<()> {
        let (cols, rows) = terminal::size()?;
        queue!(self.out, Clear(ClearType::All))?;
        for (i, line) in lines.iter().take(rows as usize).enumerate() {
            let clipped: String = line.chars().take(cols as usize).collect();
            queue!(self.out, MoveTo(0, i as u16), Print(clipped))?;
        }
        self.out.flush()
    }
}

impl Drop for TerminalScreen {
    fn drop(&mut self) {
        let _ = execute!(self.out, Show, LeaveAlternateScreen);
    }
}
