//! Golden tests for the binary's exit codes and JSON error output
//!
//! Only failure paths that never reach the network are covered here; the
//! reconciliation itself is tested in clonus-core.

use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;

fn clonus(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_clonus"))
        .args(args)
        .current_dir(dir)
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute clonus")
}

fn stderr_json(output: &Output) -> serde_json::Value {
    let stderr = String::from_utf8_lossy(&output.stderr);
    serde_json::from_str(&stderr).expect("stderr should be valid JSON")
}

mod config_tests {
    use super::*;

    #[test]
    fn test_missing_config_is_not_found() {
        let dir = TempDir::new().unwrap();

        let output = clonus(dir.path(), &["--json", "backup.toml"]);

        assert_eq!(output.status.code(), Some(5));
        assert!(output.stdout.is_empty());
        insta::assert_json_snapshot!(stderr_json(&output), @r#"
        {
          "error": "Failed to load backup.toml: Not found: config file backup.toml"
        }
        "#);
    }

    #[test]
    fn test_config_without_roots_is_usage_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("backup.toml"), "bucket = \"b\"\nroots = []\n").unwrap();

        let output = clonus(dir.path(), &["--json", "backup.toml"]);

        assert_eq!(output.status.code(), Some(2));
        insta::assert_json_snapshot!(stderr_json(&output), @r#"
        {
          "error": "Failed to load backup.toml: Configuration error: at least one root is required"
        }
        "#);
    }

    #[test]
    fn test_relative_root_is_rejected() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("backup.toml"),
            "bucket = \"b\"\nroots = [\"data\"]\n",
        )
        .unwrap();

        let output = clonus(dir.path(), &["--json", "backup.toml"]);

        assert_eq!(output.status.code(), Some(2));
        let error = stderr_json(&output);
        assert!(
            error["error"]
                .as_str()
                .unwrap()
                .contains("root must be an absolute path")
        );
    }
}

mod usage_tests {
    use super::*;

    #[test]
    fn test_missing_argument_is_usage_error() {
        let dir = TempDir::new().unwrap();

        let output = clonus(dir.path(), &["--delete"]);

        assert_eq!(output.status.code(), Some(2));
    }

    #[test]
    fn test_help_succeeds() {
        let dir = TempDir::new().unwrap();

        let output = clonus(dir.path(), &["--help"]);

        assert!(output.status.success());
        let stdout = String::from_utf8_lossy(&output.stdout);
        assert!(stdout.contains("--no-rebuild-cache"));
        assert!(stdout.contains("--dry-run"));
    }
}
