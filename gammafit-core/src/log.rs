//! Buffered fit log.
//!
//! Text is accumulated in memory and written to the enabled sinks
//! (stdout, stderr, a file) once the buffer exceeds `max_size`
//! characters, on an explicit [`FitLog::flush`], and on drop. Each
//! written line is also emitted as a `tracing` debug event.
//!
//! Lines may be prefixed with the UTC date (`YYYY-MM-DDThh:mm:ss`) and a
//! task name.
//!
//! Formatting goes through `std::fmt::Write`, so `writeln!(log, ...)`
//! works; [`FitLog::parameter`] writes aligned key/value lines.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use tracing::{debug, warn};

/// Default flush threshold in characters.
pub const DEFAULT_MAX_SIZE: usize = 8192;

/// Column at which parameter values start.
const PARAMETER_WIDTH: usize = 30;

#[derive(Debug)]
pub struct FitLog {
    buffer: String,
    max_size: usize,
    indent: usize,
    name: String,
    date: bool,
    stdout: bool,
    stderr: bool,
    file: Option<File>,
    filename: Option<PathBuf>,
    at_line_start: bool,
}

impl Default for FitLog {
    fn default() -> Self {
        Self::new()
    }
}

impl FitLog {
    /// Log without sinks; text only reaches `tracing`.
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
            max_size: DEFAULT_MAX_SIZE,
            indent: 0,
            name: String::new(),
            date: false,
            stdout: false,
            stderr: false,
            file: None,
            filename: None,
            at_line_start: true,
        }
    }

    /// Open `path` as file sink, truncating it when `clobber` is set and
    /// appending otherwise. A previously opened file is flushed and closed.
    pub fn open(&mut self, path: &Path, clobber: bool) -> Result<()> {
        self.close()?;
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(!clobber)
            .truncate(clobber)
            .open(path)
            .with_context(|| format!("Unable to open log file {}", path.display()))?;
        self.file = Some(file);
        self.filename = Some(path.to_path_buf());
        Ok(())
    }

    /// Flush and close the file sink.
    pub fn close(&mut self) -> Result<()> {
        if self.file.is_some() {
            self.flush(true)?;
        }
        self.file = None;
        self.filename = None;
        Ok(())
    }

    pub fn filename(&self) -> Option<&Path> {
        self.filename.as_deref()
    }

    pub fn set_stdout(&mut self, enable: bool) {
        self.stdout = enable;
    }

    pub fn set_stderr(&mut self, enable: bool) {
        self.stderr = enable;
    }

    /// Prefix written as `name: ` at the start of every line.
    pub fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    /// Prefix every line with the current UTC date and time.
    pub fn set_date(&mut self, enable: bool) {
        self.date = enable;
    }

    pub fn date(&self) -> bool {
        self.date
    }

    pub fn set_max_size(&mut self, size: usize) {
        self.max_size = size;
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn set_indent(&mut self, indent: usize) {
        self.indent = indent;
    }

    pub fn indent(&self) -> usize {
        self.indent
    }

    /// Number of buffered characters.
    pub fn size(&self) -> usize {
        self.buffer.len()
    }

    /// Buffered text not yet written.
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    /// Drop buffered text without writing it.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.at_line_start = true;
    }

    /// Append text, prefixing every new line.
    pub fn append(&mut self, text: &str) {
        for piece in text.split_inclusive('\n') {
            if self.at_line_start {
                if self.date {
                    self.buffer.push_str(&strdate(SystemTime::now()));
                    self.buffer.push_str(": ");
                }
                if !self.name.is_empty() {
                    self.buffer.push_str(&self.name);
                    self.buffer.push_str(": ");
                }
                self.buffer.extend(std::iter::repeat(' ').take(self.indent));
            }
            self.buffer.push_str(piece);
            self.at_line_start = piece.ends_with('\n');
        }
        if self.buffer.len() > self.max_size {
            if let Err(e) = self.flush(false) {
                warn!("Fit log flush failed: {:#}", e);
            }
        }
    }

    /// Append one line.
    pub fn line(&mut self, text: &str) {
        self.append(text);
        self.append("\n");
    }

    /// Append `name ....: value` with the value in a fixed column.
    pub fn parameter(&mut self, name: &str, value: impl fmt::Display) {
        let width = PARAMETER_WIDTH.saturating_sub(self.indent);
        let dots = width.saturating_sub(name.len() + 1);
        let text = format!(" {} {}: {}", name, ".".repeat(dots), value);
        self.line(&text);
    }

    /// Section header; level 0 is the most prominent.
    pub fn header(&mut self, text: &str, level: u8) {
        match level {
            0 | 1 => {
                let c = if level == 0 { '=' } else { '-' };
                let bar = format!("+{}+", c.to_string().repeat(text.len() + 2));
                self.line(&bar);
                self.line(&format!("| {} |", text));
                self.line(&bar);
            }
            2 => self.line(&format!("=== {} ===", text)),
            _ => self.line(&format!("--- {} ---", text)),
        }
    }

    pub fn header0(&mut self, text: &str) {
        self.header(text, 0);
    }

    pub fn header1(&mut self, text: &str) {
        self.header(text, 1);
    }

    pub fn header2(&mut self, text: &str) {
        self.header(text, 2);
    }

    pub fn header3(&mut self, text: &str) {
        self.header(text, 3);
    }

    /// Write buffered text to the sinks. Without `force` only complete
    /// lines are written once the buffer exceeds `max_size`.
    pub fn flush(&mut self, force: bool) -> Result<()> {
        if self.buffer.is_empty() || (!force && self.buffer.len() <= self.max_size) {
            return Ok(());
        }
        let cut = if force {
            self.buffer.len()
        } else {
            match self.buffer.rfind('\n') {
                Some(pos) => pos + 1,
                None => self.buffer.len(),
            }
        };
        let text: String = self.buffer.drain(..cut).collect();

        for line in text.lines() {
            debug!(target: "gammafit::fitlog", "{}", line);
        }
        if self.stdout {
            std::io::stdout().write_all(text.as_bytes())?;
        }
        if self.stderr {
            std::io::stderr().write_all(text.as_bytes())?;
        }
        if let Some(file) = self.file.as_mut() {
            file.write_all(text.as_bytes())
                .and_then(|_| file.flush())
                .context("Unable to write log file")?;
        }
        Ok(())
    }
}

/// `YYYY-MM-DDThh:mm:ss` in UTC; times before the epoch print as the epoch.
fn strdate(time: SystemTime) -> String {
    let secs = time.duration_since(UNIX_EPOCH).map_or(0, |d| d.as_secs());
    let days = (secs / 86_400) as i64;
    let rem = secs % 86_400;
    let (year, month, day) = civil_from_days(days);
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}",
        year,
        month,
        day,
        rem / 3600,
        rem % 3600 / 60,
        rem % 60
    )
}

/// Proleptic Gregorian date of a day count since 1970-01-01.
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let year = yoe + era * 400 + i64::from(month <= 2);
    (year, month, day)
}

impl fmt::Write for FitLog {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.append(s);
        Ok(())
    }
}

impl Drop for FitLog {
    fn drop(&mut self) {
        if let Err(e) = self.flush(true) {
            warn!("Fit log flush failed: {:#}", e);
        }
    }
}
