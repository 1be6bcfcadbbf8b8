//! Integration tests for CLI commands
//!
//! None of these reach a cluster: every case fails or finishes before a
//! connection is attempted.

use std::io::Write;
use std::process::Command;

/// Helper to run the chartops binary with a clean environment
fn chartops(args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_chartops"))
        .args(args)
        .env_remove("CHARTOPS_URL")
        .env_remove("CHARTOPS_CONFIG")
        .env_remove("CHARTOPS_TOKEN")
        .env_remove("CHARTOPS_LOG_FORMAT")
        .output()
        .expect("Failed to execute chartops")
}

fn config_file(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

const SUITE: &str = r#"
catalog:
  url: https://rancher.example.com
  clusterId: c-m-abc
charts:
  - name: monitoring
    namespace: cattle-monitoring
    crd: true
    createNamespace: true
"#;

mod help {
    use super::*;

    #[test]
    fn test_help() {
        let output = chartops(&["--help"]);
        assert!(output.status.success());
        let stdout = String::from_utf8_lossy(&output.stdout);
        assert!(stdout.contains("install"));
        assert!(stdout.contains("lifecycle"));
    }

    #[test]
    fn test_install_help() {
        let output = chartops(&["install", "--help"]);
        assert!(output.status.success());
        let stdout = String::from_utf8_lossy(&output.stdout);
        assert!(stdout.contains("--create-namespace"));
        assert!(stdout.contains("--timeout"));
    }

    #[test]
    fn test_unknown_subcommand() {
        let output = chartops(&["frobnicate"]);
        assert!(!output.status.success());
    }
}

mod configuration {
    use super::*;

    #[test]
    fn test_missing_url_is_config_error() {
        let output = chartops(&["status", "sample", "-n", "ns-a"]);
        assert_eq!(output.status.code(), Some(2));
        let stderr = String::from_utf8_lossy(&output.stderr);
        assert!(stderr.contains("catalog url is not set"));
    }

    #[test]
    fn test_bad_url_is_config_error() {
        let output = chartops(&["--url", "not a url", "status", "sample", "-n", "ns-a"]);
        assert_eq!(output.status.code(), Some(2));
    }

    #[test]
    fn test_missing_config_file_is_io_error() {
        let output = chartops(&[
            "--config",
            "/nonexistent/chartops.yaml",
            "status",
            "sample",
        ]);
        assert_eq!(output.status.code(), Some(6));
    }

    #[test]
    fn test_invalid_yaml_is_config_error() {
        let file = config_file("catalog: [not, a, map\n");
        let path = file.path().to_str().unwrap();
        let output = chartops(&["--config", path, "status", "monitoring"]);
        assert_eq!(output.status.code(), Some(2));
    }

    #[test]
    fn test_duplicate_chart_is_config_error() {
        let file = config_file(
            r#"
catalog:
  url: https://rancher.example.com
charts:
  - name: monitoring
    namespace: a
  - name: monitoring
    namespace: b
"#,
        );
        let path = file.path().to_str().unwrap();
        let output = chartops(&["--config", path, "status", "monitoring"]);
        assert_eq!(output.status.code(), Some(2));
    }
}

mod usage {
    use super::*;

    #[test]
    fn test_unknown_chart_needs_namespace() {
        let output = chartops(&["--url", "https://rancher.example.com", "install", "sample"]);
        assert_eq!(output.status.code(), Some(64));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let output = chartops(&[
            "--url",
            "https://rancher.example.com",
            "install",
            "sample",
            "-n",
            "ns-a",
            "--timeout",
            "0",
        ]);
        assert_eq!(output.status.code(), Some(64));
    }

    #[test]
    fn test_lifecycle_without_families() {
        let output = chartops(&["--url", "https://rancher.example.com", "lifecycle"]);
        assert_eq!(output.status.code(), Some(64));
        let stderr = String::from_utf8_lossy(&output.stderr);
        assert!(stderr.contains("no chart families selected"));
    }

    #[test]
    fn test_crd_flags_conflict() {
        let output = chartops(&[
            "--url",
            "https://rancher.example.com",
            "status",
            "sample",
            "-n",
            "ns-a",
            "--crd",
            "--crd-name",
            "sample-crds",
        ]);
        assert!(!output.status.success());
    }
}

mod uninstall_command {
    use super::*;

    #[test]
    fn test_dry_run_lists_teardown_order() {
        let file = config_file(SUITE);
        let path = file.path().to_str().unwrap();
        let output = chartops(&["--config", path, "uninstall", "monitoring", "--dry-run"]);

        assert!(output.status.success());
        let stdout = String::from_utf8_lossy(&output.stdout);
        let primary = stdout
            .find("uninstall chart cattle-monitoring/monitoring\n")
            .expect("primary step listed");
        let crd = stdout
            .find("uninstall chart cattle-monitoring/monitoring-crd")
            .expect("crd step listed");
        let namespace = stdout
            .find("delete namespace cattle-monitoring")
            .expect("namespace step listed");
        assert!(primary < crd);
        assert!(crd < namespace);
        assert!(stdout.contains("3 step(s) would run"));
    }

    #[test]
    fn test_dry_run_ad_hoc_chart() {
        let output = chartops(&[
            "--url",
            "https://rancher.example.com",
            "uninstall",
            "sample",
            "-n",
            "ns-a",
            "--dry-run",
        ]);

        assert!(output.status.success());
        let stdout = String::from_utf8_lossy(&output.stdout);
        assert!(stdout.contains("uninstall chart ns-a/sample"));
        assert!(!stdout.contains("delete namespace"));
        assert!(stdout.contains("1 step(s) would run"));
    }
}
