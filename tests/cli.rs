use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const ENV_VARS: &[&str] = &[
    "SSHDEPLOY_CONFIG",
    "SSHDEPLOY_HOST",
    "SSHDEPLOY_PORT",
    "SSHDEPLOY_USERNAME",
    "SSHDEPLOY_PASSWORD",
    "SSHDEPLOY_SOURCE",
    "SSHDEPLOY_TARGET",
    "SSHDEPLOY_PRE",
    "SSHDEPLOY_POST",
    "SSHDEPLOY_EXCLUDE",
    "SSHDEPLOY_MONITOR",
    "SSHDEPLOY_INTERVAL",
    "SSHDEPLOY_LOG",
];

/// A command isolated from the caller's environment and config files.
fn sshdeploy(home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("sshdeploy").unwrap();
    for var in ENV_VARS {
        cmd.env_remove(var);
    }
    cmd.current_dir(home.path())
        .env("HOME", home.path())
        .env("XDG_CONFIG_HOME", home.path().join(".config"));
    cmd
}

#[test]
fn help_lists_verbs() {
    let home = TempDir::new().unwrap();
    sshdeploy(&home)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("push"))
        .stdout(predicate::str::contains("monitor"))
        .stdout(predicate::str::contains("shell"));
}

#[test]
fn completions_are_generated() {
    let home = TempDir::new().unwrap();
    sshdeploy(&home)
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("sshdeploy"));
}

#[test]
fn dry_run_push_plans_uploads() {
    let home = TempDir::new().unwrap();
    let source = home.path().join("out");
    std::fs::create_dir_all(source.join("wwwroot")).unwrap();
    std::fs::write(source.join("app.dll"), b"assembly").unwrap();
    std::fs::write(source.join("wwwroot/index.html"), b"<html/>").unwrap();
    std::fs::write(source.join("sshdeploy.ready"), b"").unwrap();

    sshdeploy(&home)
        .args(["push", "--dry-run", "-t", "/home/pi/app", "-s"])
        .arg(&source)
        .assert()
        .success()
        .stdout(predicate::str::contains("Dry run: 2 uploads"));
}

#[test]
fn missing_source_folder_fails() {
    let home = TempDir::new().unwrap();
    sshdeploy(&home)
        .args(["push", "--dry-run", "-t", "/home/pi/app", "-s", "does-not-exist"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("was not found"));
}

#[test]
fn relative_target_fails() {
    let home = TempDir::new().unwrap();
    sshdeploy(&home)
        .args(["push", "--dry-run", "-t", "home/pi/app", "-s", "."])
        .assert()
        .failure()
        .stderr(predicate::str::contains("absolute"));
}

#[test]
fn monitor_rejects_bad_interval_before_connecting() {
    let home = TempDir::new().unwrap();
    // An unroutable host: the interval check must fail first.
    sshdeploy(&home)
        .args([
            "monitor", "-H", "192.0.2.1", "-t", "/home/pi/app", "-s", ".", "--interval", "0",
        ])
        .timeout(std::time::Duration::from_secs(20))
        .assert()
        .failure()
        .stderr(predicate::str::contains("interval"));
}

#[test]
fn push_without_host_fails() {
    let home = TempDir::new().unwrap();
    sshdeploy(&home)
        .args(["push", "-t", "/home/pi/app", "-s", "."])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--host"));
}

#[test]
fn unknown_config_keys_are_reported() {
    let home = TempDir::new().unwrap();
    std::fs::write(home.path().join("sshdeploy.toml"), "hostname = \"pi\"\n").unwrap();
    sshdeploy(&home)
        .args(["push", "--dry-run"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("sshdeploy.toml"));
}
