//! Console rendering of run progress
//!
//! Turns engine events into the line-oriented log the tool has always
//! printed: one line per directory entered and per object uploaded or
//! removed. A spinner ticks through unchanged files so long runs over an
//! up-to-date tree still show signs of life.

use std::cell::{Cell, RefCell};

use clonus_core::{SyncDecision, SyncEvent, SyncObserver, TransferStats};
use humansize::{BINARY, format_size};
use indicatif::{ProgressBar, ProgressStyle};

use super::Formatter;

/// [`SyncObserver`] that prints progress through a [`Formatter`]
pub struct ConsoleObserver {
    formatter: Formatter,
    bucket: String,
    spinner: Option<ProgressBar>,
    /// Start of an action line, completed by the event that ends the action
    pending: RefCell<Option<String>>,
    unchanged: Cell<u64>,
}

impl ConsoleObserver {
    pub fn new(formatter: Formatter, bucket: &str) -> Self {
        let spinner = (!formatter.is_quiet() && !formatter.is_json()).then(|| {
            let pb = ProgressBar::new_spinner();
            pb.set_style(
                ProgressStyle::default_spinner()
                    .template("{spinner:.green} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            pb
        });

        Self {
            formatter,
            bucket: bucket.to_string(),
            spinner,
            pending: RefCell::new(None),
            unchanged: Cell::new(0),
        }
    }

    /// Remove the spinner from the terminal
    pub fn finish(&self) {
        if let Some(pb) = &self.spinner {
            pb.finish_and_clear();
        }
    }

    fn suspend<F: FnOnce()>(&self, f: F) {
        match &self.spinner {
            Some(pb) => pb.suspend(f),
            None => f(),
        }
    }

    fn line(&self, message: &str) {
        self.suspend(|| self.formatter.println(message));
    }

    fn start(&self, line: String) {
        *self.pending.borrow_mut() = Some(line);
    }

    fn complete(&self, suffix: &str) {
        let pending = self.pending.borrow_mut().take();
        if let Some(start) = pending {
            self.line(&format!("{start}{suffix}"));
        }
    }

    fn action(&self, marker: &str, verb: &str, subject: &str) -> String {
        format!(
            "{} {verb} {}",
            self.formatter.style_marker(marker),
            self.formatter.style_path(subject)
        )
    }
}

impl SyncObserver for ConsoleObserver {
    fn on_event(&self, event: &SyncEvent<'_>) {
        match event {
            SyncEvent::Listing => {
                self.line(&format!(
                    "  Listing bucket {}",
                    self.formatter.style_name(&self.bucket)
                ));
                if let Some(pb) = &self.spinner {
                    pb.set_message("Listing bucket");
                    pb.tick();
                }
            }
            SyncEvent::Scanning(dir) => {
                self.line(&format!("  Scanning {}", dir.display()));
            }
            SyncEvent::Unchanged(file) => {
                let count = self.unchanged.get() + 1;
                self.unchanged.set(count);
                if let Some(pb) = &self.spinner {
                    pb.set_message(format!("{count} unchanged, last {}", file.key));
                    pb.tick();
                }
            }
            SyncEvent::Uploading { file, decision } => {
                let (marker, verb) = match decision {
                    SyncDecision::Stale => ("+", "Updating"),
                    _ => ("!", "Uploading"),
                };
                let size = self.formatter.style_size(&format_size(file.size, BINARY));
                let subject = file.path.display().to_string();
                self.start(format!("{} - {size}", self.action(marker, verb, &subject)));
            }
            SyncEvent::Uploaded { stats, .. } => {
                let suffix = throughput_suffix(stats);
                self.complete(&suffix);
            }
            SyncEvent::Deleting { key } => {
                self.start(self.action("-", "Unstoring", key));
            }
            SyncEvent::Deleted { .. } => self.complete(""),
            SyncEvent::DryRun => self.complete(" (dry run)"),
            SyncEvent::ConsistencyWarning { key } => {
                self.suspend(|| {
                    self.formatter.warning(&format!(
                        "S3 does not match cache for {key}. Who messed with my bucket?"
                    ))
                });
            }
            SyncEvent::Failed(failure) => {
                self.complete(" failed");
                self.suspend(|| {
                    self.formatter
                        .error(&format!("{}: {}", failure.subject, failure.message))
                });
            }
            SyncEvent::Listed { .. } | SyncEvent::CacheRebuilt(_) => {}
        }
    }
}

/// ` in <secs>s [<rate>/s]` appended to a finished upload line
pub fn throughput_suffix(stats: &TransferStats) -> String {
    format!(
        " in {:.2}s [{}/s]",
        stats.elapsed.as_secs_f64(),
        format_size(stats.bytes_per_second() as u64, BINARY)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::OutputConfig;
    use std::time::Duration;

    fn plain() -> Formatter {
        Formatter::new(OutputConfig {
            no_color: true,
            quiet: true,
            ..Default::default()
        })
    }

    #[test]
    fn test_throughput_suffix() {
        let stats = TransferStats {
            bytes: 2048,
            elapsed: Duration::from_millis(500),
        };
        assert_eq!(throughput_suffix(&stats), " in 0.50s [4 KiB/s]");
    }

    #[test]
    fn test_action_line_completed_once() {
        let observer = ConsoleObserver::new(plain(), "backup");
        assert!(observer.spinner.is_none());

        observer.on_event(&SyncEvent::Deleting { key: "old/gone.txt" });
        assert_eq!(
            observer.pending.borrow().as_deref(),
            Some("- Unstoring old/gone.txt")
        );
        observer.on_event(&SyncEvent::DryRun);
        assert!(observer.pending.borrow().is_none());
    }

    #[test]
    fn test_unchanged_files_are_counted() {
        let observer = ConsoleObserver::new(plain(), "backup");
        let file = clonus_core::LocalFile {
            root: "/srv".into(),
            path: "/srv/a.txt".into(),
            key: "a.txt".into(),
            mtime: 1000,
            size: 100,
        };
        observer.on_event(&SyncEvent::Unchanged(&file));
        observer.on_event(&SyncEvent::Unchanged(&file));
        assert_eq!(observer.unchanged.get(), 2);
    }
}
