//! Run transcript and console formatting.
//!
//! `RunReport` accumulates the human-readable transcript of a run. Every line
//! is also emitted through `tracing`, so a subscriber sees the same progress
//! the caller gets back as console text.

use tracing::{debug, error, info, warn};

pub mod format;

pub use format::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub level: Level,
    pub text: String,
}

impl LogLine {
    fn render(&self) -> String {
        match self.level {
            Level::Info => self.text.clone(),
            Level::Warn => format!("WARNING: {}", self.text),
            Level::Error => format!("ERROR: {}", self.text),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunReport {
    lines: Vec<LogLine>,
    files: Vec<String>,
}

impl RunReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn info(&mut self, text: impl Into<String>) {
        let text = text.into();
        info!("{text}");
        self.push(Level::Info, text);
    }

    pub fn warn(&mut self, text: impl Into<String>) {
        let text = text.into();
        warn!("{text}");
        self.push(Level::Warn, text);
    }

    pub fn error(&mut self, text: impl Into<String>) {
        let text = text.into();
        error!("{text}");
        self.push(Level::Error, text);
    }

    /// Append a pre-formatted multi-line block (tables, headers).
    pub fn block(&mut self, text: &str) {
        debug!("{text}");
        for line in text.lines() {
            self.push(Level::Info, line.to_string());
        }
    }

    fn push(&mut self, level: Level, text: String) {
        self.lines.push(LogLine { level, text });
    }

    pub fn lines(&self) -> &[LogLine] {
        &self.lines
    }

    pub fn count(&self, level: Level) -> usize {
        self.lines.iter().filter(|l| l.level == level).count()
    }

    /// Record the manifest of output files.
    pub fn set_files(&mut self, files: Vec<String>) {
        self.files = files;
    }

    pub fn files(&self) -> &[String] {
        &self.files
    }

    /// The transcript as returned to the caller and written to the run log.
    pub fn console_text(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            out.push_str(&line.render());
            out.push('\n');
        }
        out
    }
}
