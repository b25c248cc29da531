//! Output formatter for human-readable and JSON output
//!
//! Every line clonus prints goes through [`Formatter`] so quiet, JSON and
//! no-color modes are honored in one place.

use console::Style;
use serde::Serialize;

use super::OutputConfig;

/// Color theme for styled output
#[derive(Debug, Clone)]
pub struct Theme {
    /// Local paths and object keys - default
    pub path: Style,
    /// Sizes and rates - green
    pub size: Style,
    /// Bucket names - bold
    pub name: Style,
    /// Action markers (`!`, `+`, `-`) - cyan
    pub marker: Style,
    /// Success messages - green
    pub success: Style,
    /// Error messages - red
    pub error: Style,
    /// Warning messages - yellow
    pub warning: Style,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            path: Style::new(),
            size: Style::new().green(),
            name: Style::new().bold(),
            marker: Style::new().cyan(),
            success: Style::new().green(),
            error: Style::new().red(),
            warning: Style::new().yellow(),
        }
    }
}

impl Theme {
    /// Returns a theme with no styling (for no-color mode)
    pub fn plain() -> Self {
        Self {
            path: Style::new(),
            size: Style::new(),
            name: Style::new(),
            marker: Style::new(),
            success: Style::new(),
            error: Style::new(),
            warning: Style::new(),
        }
    }
}

/// Formatter for CLI output
///
/// When JSON mode is enabled, stdout carries a single JSON document and
/// nothing else; errors go to stderr as JSON objects.
#[derive(Debug, Clone)]
pub struct Formatter {
    config: OutputConfig,
    theme: Theme,
}

impl Formatter {
    /// Create a new formatter with the given configuration
    pub fn new(config: OutputConfig) -> Self {
        let theme = if config.no_color || config.json {
            Theme::plain()
        } else {
            Theme::default()
        };
        Self { config, theme }
    }

    /// Check if JSON output mode is enabled
    pub fn is_json(&self) -> bool {
        self.config.json
    }

    /// Check if quiet mode is enabled
    pub fn is_quiet(&self) -> bool {
        self.config.quiet
    }

    // ========== Style helper methods ==========

    pub fn style_path(&self, text: &str) -> String {
        self.theme.path.apply_to(text).to_string()
    }

    pub fn style_size(&self, text: &str) -> String {
        self.theme.size.apply_to(text).to_string()
    }

    pub fn style_name(&self, text: &str) -> String {
        self.theme.name.apply_to(text).to_string()
    }

    pub fn style_marker(&self, text: &str) -> String {
        self.theme.marker.apply_to(text).to_string()
    }

    // ========== Output methods ==========

    /// Output the final summary
    ///
    /// Printed even in quiet mode. In JSON mode `value` is serialized,
    /// otherwise `line` is printed.
    pub fn summary<T: Serialize>(&self, value: &T, line: &str) {
        if self.config.json {
            self.json(value);
        } else {
            let checkmark = self.theme.success.apply_to("✓");
            println!("{checkmark} {line}");
        }
    }

    /// Output an error message
    ///
    /// Errors are always printed, even in quiet mode.
    pub fn error(&self, message: &str) {
        if self.config.json {
            let error = serde_json::json!({
                "error": message
            });
            eprintln!(
                "{}",
                serde_json::to_string_pretty(&error).unwrap_or_else(|_| message.to_string())
            );
        } else {
            let cross = self.theme.error.apply_to("✗");
            eprintln!("{cross} {message}");
        }
    }

    /// Output a warning message
    pub fn warning(&self, message: &str) {
        if self.config.quiet || self.config.json {
            return;
        }

        let warn_icon = self.theme.warning.apply_to("⚠");
        eprintln!("{warn_icon} {message}");
    }

    /// Output JSON directly
    pub fn json<T: Serialize>(&self, value: &T) {
        match serde_json::to_string_pretty(value) {
            Ok(json) => println!("{json}"),
            Err(e) => eprintln!("Error serializing output: {e}"),
        }
    }

    /// Print a progress line (suppressed in quiet and JSON mode)
    pub fn println(&self, message: &str) {
        if self.config.quiet || self.config.json {
            return;
        }
        println!("{message}");
    }
}

impl Default for Formatter {
    fn default() -> Self {
        Self::new(OutputConfig::default())
    }
}
