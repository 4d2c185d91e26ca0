//! Integration tests for Shipload

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    fn shipload() -> Command {
        cargo_bin_cmd!("shipload")
    }

    /// Config that keeps every path inside `dir`
    fn isolated_config(dir: &Path) -> PathBuf {
        let path = dir.join("config.toml");
        let content = format!(
            "[cache]\ndirectory = '{}'\nmax_size_bytes = 4096\n\n[network]\nretries = 0\ntimeout_secs = 2\n",
            dir.join("cache").display()
        );
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn help_displays() {
        shipload()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("manifest-driven module loader"));
    }

    #[test]
    fn version_displays() {
        shipload()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("shipload"));
    }

    #[test]
    fn download_requires_manifest_url() {
        let dir = TempDir::new().unwrap();
        shipload()
            .args(["download", "-D"])
            .arg(dir.path())
            .assert()
            .failure()
            .stderr(predicate::str::contains("--manifest-url"));
    }

    #[test]
    fn download_requires_download_dir() {
        shipload()
            .args(["download", "-M", "https://example.com/manifest.json"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("--download-dir"));
    }

    #[test]
    fn download_reports_unreachable_manifest() {
        let dir = TempDir::new().unwrap();
        let config = isolated_config(dir.path());
        let out = dir.path().join("out");

        shipload()
            .arg("--config")
            .arg(&config)
            .args(["download", "-M", "http://127.0.0.1:9/manifest.json", "-D"])
            .arg(&out)
            .assert()
            .failure()
            .stderr(predicate::str::contains("No manifest available"))
            .stderr(predicate::str::contains("Hint:"));
        assert!(!out.join("manifest.json").exists());
    }

    #[test]
    fn config_path() {
        shipload()
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_show() {
        let dir = TempDir::new().unwrap();
        let config = isolated_config(dir.path());
        shipload()
            .arg("--config")
            .arg(&config)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[loader]"))
            .stdout(predicate::str::contains("max_size_bytes = 4096"));
    }

    #[test]
    fn invalid_config_is_reported() {
        let dir = TempDir::new().unwrap();
        let config = dir.path().join("config.toml");
        std::fs::write(&config, "[loader]\nconcurrent_downloads = 0\n").unwrap();

        shipload()
            .arg("--config")
            .arg(&config)
            .args(["cache", "info"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("concurrent_downloads"));
    }

    #[test]
    fn cache_info_on_empty_cache() {
        let dir = TempDir::new().unwrap();
        let config = isolated_config(dir.path());

        shipload()
            .arg("--config")
            .arg(&config)
            .args(["cache", "info"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Modules: 0"))
            .stdout(predicate::str::contains("4.0 KB"));
        assert!(dir.path().join("cache").join("index.sqlite").exists());
    }

    #[test]
    fn cache_prune_on_empty_cache() {
        let dir = TempDir::new().unwrap();
        let config = isolated_config(dir.path());

        shipload()
            .arg("--config")
            .arg(&config)
            .args(["cache", "prune", "--max-bytes", "0"])
            .assert()
            .success()
            .stdout(predicate::str::contains("already within"));
    }

    #[test]
    fn cache_list_json_on_empty_cache() {
        let dir = TempDir::new().unwrap();
        let config = isolated_config(dir.path());

        shipload()
            .arg("--config")
            .arg(&config)
            .args(["cache", "list", "--format", "json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[]"));
    }
}
