//! Download and extraction progress reporting.
//!
//! Progress is an observability concern only: reporters never fail, and a
//! download without a declared content length reports bytes with no total.
//! Output goes to **stderr** so stdout stays parseable for scripts.

use std::io::Write;

/// A single progress event from the installer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProgressEvent {
    /// Bytes of `label` transferred so far; `total` is the declared length.
    Downloading {
        label: String,
        bytes: u64,
        total: Option<u64>,
    },
    /// Archive entries of `label` unpacked so far.
    Extracting {
        label: String,
        n: u64,
        total: Option<u64>,
    },
    /// `label` is fully installed.
    Finished { label: String },
}

/// Receives installer progress. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly progress on stderr: "download ollama  12.5 MiB / 1.2 GiB".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = match &event {
            ProgressEvent::Downloading {
                label,
                bytes,
                total,
            } => match total {
                Some(total) => format!(
                    "\rdownload {}  {} / {}",
                    label,
                    format_bytes(*bytes),
                    format_bytes(*total)
                ),
                None => format!("\rdownload {}  {}", label, format_bytes(*bytes)),
            },
            ProgressEvent::Extracting { label, n, total } => match total {
                Some(total) => format!(
                    "\rextract {}  {} / {} entries",
                    label,
                    format_number(*n),
                    format_number(*total)
                ),
                None => format!("\rextract {}  {} entries", label, format_number(*n)),
            },
            ProgressEvent::Finished { label } => format!("\rinstalled {}\n", label),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        let obj = match &event {
            ProgressEvent::Downloading {
                label,
                bytes,
                total,
            } => serde_json::json!({
                "event": "progress",
                "target": label,
                "phase": "downloading",
                "bytes": bytes,
                "total": total
            }),
            ProgressEvent::Extracting { label, n, total } => serde_json::json!({
                "event": "progress",
                "target": label,
                "phase": "extracting",
                "n": n,
                "total": total
            }),
            ProgressEvent::Finished { label } => serde_json::json!({
                "event": "progress",
                "target": label,
                "phase": "finished"
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
    fn report(&self, _event: ProgressEvent) {}
}

/// Forwards download events only when at least `step` new bytes arrived,
/// so per-chunk callbacks do not flood the terminal.
pub struct Throttle {
    step: u64,
    last: Option<u64>,
}

impl Throttle {
    pub fn new(step: u64) -> Self {
        Self { step, last: None }
    }

    /// Returns true when `bytes` should be reported.
    pub fn should_report(&mut self, bytes: u64, total: Option<u64>) -> bool {
        let due = match self.last {
            None => true,
            Some(last) => bytes.saturating_sub(last) >= self.step || Some(bytes) == total,
        };
        if due {
            self.last = Some(bytes);
        }
        due
    }
}

fn format_number(n: u64) -> String {
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

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64;
    let mut unit = "B";
    for next in UNITS {
        if value < 1024.0 {
            break;
        }
        value /= 1024.0;
        unit = next;
    }
    format!("{:.1} {}", value, unit)
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
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
