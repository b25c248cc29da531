//! Output handling: human-readable and JSON formatting, run progress

mod formatter;
mod progress;

pub use formatter::Formatter;
pub use progress::ConsoleObserver;

/// Output configuration derived from the global flags
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputConfig {
    /// Print the final summary as JSON and nothing else on stdout
    pub json: bool,
    /// Disable colored output
    pub no_color: bool,
    /// Only print errors and the final summary
    pub quiet: bool,
}
