//! Terminal output and progress rendering.

use cragsync_core::{JobId, ProgressPhase, ProgressSink};
use serde_json::Value;
use std::io::Write;
use std::sync::Mutex;

/// Renders progress on stderr, one line per job and phase.
///
/// Updates for the same job and phase overwrite the current line.
#[derive(Debug, Default)]
pub struct ConsoleProgress {
    last: Mutex<Option<(JobId, ProgressPhase)>>,
}

impl ProgressSink for ConsoleProgress {
    fn post(&self, job_id: JobId, phase: ProgressPhase, done: i64, total: i64) {
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        let mut stderr = std::io::stderr().lock();
        if last.is_some_and(|previous| previous != (job_id, phase)) {
            let _ = writeln!(stderr);
        }
        let label = match phase {
            ProgressPhase::Download => "download",
            ProgressPhase::Manifest => "manifest",
            ProgressPhase::Enumerate => "enumerate",
            ProgressPhase::Checksum => "checksum",
            ProgressPhase::Refresh => "refresh",
        };
        let _ = if total < 0 {
            write!(stderr, "\r{:<10} {}", label, done)
        } else {
            write!(stderr, "\r{:<10} {}/{}", label, done, total)
        };
        let _ = stderr.flush();
        *last = Some((job_id, phase));
    }
}

/// Text or JSON output on stdout.
#[derive(Debug, Clone, Copy)]
pub struct Output {
    json: bool,
}

impl Output {
    pub fn new(json: bool) -> Self {
        Self { json }
    }

    /// Print `text` in text mode or `value` in JSON mode.
    pub fn emit(&self, text: impl std::fmt::Display, value: Value) {
        if self.json {
            println!("{}", value);
        } else {
            println!("{}", text);
        }
    }

    pub fn is_json(&self) -> bool {
        self.json
    }
}
