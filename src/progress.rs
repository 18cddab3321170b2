//! Reconcile progress reporting.
//!
//! Reports observable progress during `sidx index` so users see how much of
//! the corpus is stale and how far embedding has got. Progress is emitted on
//! **stderr** so stdout remains parseable for scripts.

use std::io::Write;

/// A single progress event emitted by the index builder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReconcileProgress {
    /// Change detection finished: `pending` of `scanned` documents need embedding.
    Planned { scanned: u64, pending: u64 },
    /// A batch finished: `done` of `total` pending documents processed.
    Embedding { done: u64, total: u64, failed: u64 },
}

/// Receives progress events. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ReconcileProgress);
}

/// Human-friendly progress on stderr: "index  embedding  1,234 / 5,000 documents".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ReconcileProgress) {
        let line = match &event {
            ReconcileProgress::Planned { scanned, pending } => format!(
                "index  planned  {} stale of {} documents\n",
                format_number(*pending),
                format_number(*scanned)
            ),
            ReconcileProgress::Embedding {
                done,
                total,
                failed,
            } => {
                let mut line = format!(
                    "index  embedding  {} / {} documents",
                    format_number(*done),
                    format_number(*total)
                );
                if *failed > 0 {
                    line.push_str(&format!("  ({} failed)", format_number(*failed)));
                }
                line.push('\n');
                line
            }
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ReconcileProgress) {
        let obj = match &event {
            ReconcileProgress::Planned { scanned, pending } => serde_json::json!({
                "event": "progress",
                "phase": "planned",
                "scanned": scanned,
                "pending": pending
            }),
            ReconcileProgress::Embedding {
                done,
                total,
                failed,
            } => serde_json::json!({
                "event": "progress",
                "phase": "embedding",
                "n": done,
                "total": total,
                "failed": failed
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ReconcileProgress) {}
}

pub(crate) fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
