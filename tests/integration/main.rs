//! Integration tests for Beaver

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use std::path::Path;
    use tempfile::TempDir;

    const PIPELINE: &str = r#"
[[transform]]
kind = "shell"
outputs = ["b.txt"]
inputs = ["a.txt"]
cmd = "cp $< $@"

[[transform]]
kind = "subprocess"
outputs = ["c.txt"]
inputs = ["b.txt"]
cmd = ["sh", "-c", "tr a-z A-Z < b.txt > c.txt"]

[[group]]
name = "all"
members = ["c.txt"]
"#;

    fn beaver() -> Command {
        cargo_bin_cmd!("beaver")
    }

    /// Command isolated from the user's config, running in `dir`
    fn beaver_in(dir: &Path) -> Command {
        let mut cmd = beaver();
        cmd.current_dir(dir)
            .env_remove("RUST_LOG")
            .env("NO_COLOR", "1")
            .arg("--no-local")
            .arg("--config")
            .arg(dir.join("global-config.toml"));
        cmd
    }

    fn project(manifest: &str) -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("beaver.toml"), manifest).unwrap();
        std::fs::write(dir.path().join("a.txt"), "hello").unwrap();
        dir
    }

    #[test]
    fn help_displays() {
        beaver()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("incremental content-addressed builds"));
    }

    #[test]
    fn version_displays() {
        beaver()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("beaver"));
    }

    #[test]
    fn build_runs_then_skips() {
        let dir = project(PIPELINE);

        beaver_in(dir.path())
            .args(["build", "all", "--format", "plain"])
            .assert()
            .success()
            .stdout(predicate::str::contains("succeeded\tc.txt"));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("c.txt")).unwrap(),
            "HELLO"
        );
        assert!(dir.path().join(".beaverdigests").exists());

        beaver_in(dir.path())
            .args(["build", "all", "--format", "plain"])
            .assert()
            .success()
            .stdout(predicate::str::contains("up to date\tb.txt"))
            .stdout(predicate::str::contains("up to date\tc.txt"));
    }

    #[test]
    fn build_json_report() {
        let dir = project(PIPELINE);

        let output = beaver_in(dir.path())
            .args(["build", "c.txt", "--format", "json"])
            .output()
            .unwrap();
        assert!(output.status.success());
        let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(report["outcomes"].as_array().unwrap().len(), 2);
        assert_eq!(report["outcomes"][1]["status"], "succeeded");
    }

    #[test]
    fn dry_run_changes_nothing() {
        let dir = project(PIPELINE);

        beaver_in(dir.path())
            .args(["build", "c.txt", "--dry-run", "--format", "plain"])
            .assert()
            .success()
            .stdout(predicate::str::contains("would run\tc.txt"));
        assert!(!dir.path().join("c.txt").exists());
    }

    #[test]
    fn failed_build_exits_nonzero() {
        let dir = project(
            r#"
[[transform]]
kind = "shell"
outputs = ["x.txt"]
cmd = "exit 4"

[[transform]]
kind = "shell"
outputs = ["y.txt"]
inputs = ["x.txt"]
cmd = "cp $< $@"
"#,
        );

        beaver_in(dir.path())
            .args(["build", "y.txt", "--format", "plain"])
            .assert()
            .failure()
            .stdout(predicate::str::contains("failed\tx.txt"))
            .stdout(predicate::str::contains("cancelled\ty.txt"));
    }

    #[test]
    fn unknown_target_reports_hint() {
        let dir = project(PIPELINE);

        beaver_in(dir.path())
            .args(["build", "nope"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Unknown artifact: nope"))
            .stderr(predicate::str::contains("beaver list"));
    }

    #[test]
    fn missing_manifest() {
        let dir = TempDir::new().unwrap();

        beaver_in(dir.path())
            .args(["build", "x"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Build manifest not found"));
    }

    #[test]
    fn directory_flag_selects_root() {
        let dir = project(PIPELINE);
        let elsewhere = TempDir::new().unwrap();

        beaver_in(elsewhere.path())
            .arg("-C")
            .arg(dir.path())
            .args(["build", "b.txt", "--format", "plain"])
            .assert()
            .success();
        assert!(dir.path().join("b.txt").exists());
    }

    #[test]
    fn list_plain_and_json() {
        let dir = project(PIPELINE);

        beaver_in(dir.path())
            .args(["list", "--format", "plain"])
            .assert()
            .success()
            .stdout(predicate::str::contains("a.txt"))
            .stdout(predicate::str::contains("all"));

        let output = beaver_in(dir.path())
            .args(["list", "c", "--format", "json"])
            .output()
            .unwrap();
        let entries: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(entries[0]["name"], "c.txt");
        assert_eq!(entries[0]["operation"], "subprocess");
    }

    #[test]
    fn forget_forces_rebuild() {
        let dir = project(PIPELINE);

        beaver_in(dir.path()).args(["build", "c.txt"]).assert().success();
        beaver_in(dir.path()).args(["forget", "c.txt"]).assert().success();

        beaver_in(dir.path())
            .args(["build", "c.txt", "--format", "plain"])
            .assert()
            .success()
            .stdout(predicate::str::contains("up to date\tb.txt"))
            .stdout(predicate::str::contains("succeeded\tc.txt"));
    }

    #[test]
    fn config_path() {
        let dir = TempDir::new().unwrap();

        beaver_in(dir.path())
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("global-config.toml"));
    }

    #[test]
    fn config_show() {
        let dir = TempDir::new().unwrap();

        beaver_in(dir.path())
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[build]"))
            .stdout(predicate::str::contains("digest_file = \".beaverdigests\""));
    }

    #[test]
    fn config_set_local_is_picked_up() {
        let dir = project(PIPELINE);

        beaver_in(dir.path())
            .args(["config", "set", "build.digest_file", "state.json", "--local"])
            .assert()
            .success();
        assert!(dir.path().join(".beaver.toml").exists());

        // Local discovery enabled for this run
        beaver()
            .current_dir(dir.path())
            .arg("--config")
            .arg(dir.path().join("global-config.toml"))
            .args(["build", "b.txt"])
            .assert()
            .success();
        assert!(dir.path().join("state.json").exists());
    }

    #[test]
    fn completions_generate() {
        beaver()
            .args(["completions", "bash"])
            .assert()
            .success()
            .stdout(predicate::str::contains("beaver"));
    }
}
