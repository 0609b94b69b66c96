use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const TEST_STUB: &str = "com.example.testtype.TestStub";

fn write_module(dir: &Path, name: &str, token: Option<&str>) {
    let preparer = token
        .map(|t| {
            format!(
                r#"<target_preparer class="com.example.targetprep.TokenRequirement">
                    <option name="token" value="{t}" />
                </target_preparer>"#
            )
        })
        .unwrap_or_default();
    let config = format!(
        r#"<configuration description="{name}">
            {preparer}
            <test class="{TEST_STUB}"><option name="module" value="{name}" /></test>
        </configuration>"#
    );
    fs::write(dir.join(format!("{name}.config")), config).unwrap();
}

/// A workspace with three modules, one needing the `foobar` token.
fn workspace() -> TempDir {
    let dir = TempDir::new().unwrap();
    let tests_dir = dir.path().join("testcases");
    fs::create_dir(&tests_dir).unwrap();
    write_module(&tests_dir, "FooModuleA", None);
    write_module(&tests_dir, "FooModuleB", None);
    write_module(&tests_dir, "FooModuleC", Some("foobar"));

    let config = format!(
        r#"
device_tokens = ["ghi:foobar"]
test_args = ["{TEST_STUB}:foo:bar"]

[suite]
tests_dir = "testcases"
root_dir = "results"
name = "suite"
shards = 2
start_time_ms = 0

[abi]
build_arch = "arm64"

[classes."{TEST_STUB}"]
options = {{ foo = "string" }}
"#
    );
    fs::write(dir.path().join("modshard.toml"), config).unwrap();
    dir
}

fn modshard(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("modshard").unwrap();
    cmd.arg("--config").arg(dir.path().join("modshard.toml"));
    cmd
}

#[test]
fn help_mentions_subcommands() {
    let out = Command::cargo_bin("modshard")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let s = String::from_utf8(out).unwrap();
    for needle in ["plan", "list", "match", "validate", "--config"] {
        assert!(s.contains(needle), "help missing `{needle}`");
    }
}

#[test]
fn list_prints_module_ids() {
    let dir = workspace();
    modshard(&dir)
        .args(["list", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"armeabi-v7a FooModuleA\""))
        .stdout(predicate::str::contains("\"arm64-v8a FooModuleC\""));
}

#[test]
fn plan_writes_json_and_result_dir() {
    let dir = workspace();
    let plan_path = dir.path().join("plan.json");
    modshard(&dir)
        .args(["plan", "--shard-index", "1", "--json"])
        .arg(&plan_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("Planned 6 modules across 2 shards"));

    let doc: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&plan_path).unwrap()).unwrap();
    let shards = doc["plan"]["shards"].as_array().unwrap();
    assert_eq!(shards.len(), 2);
    assert_eq!(doc["plan"]["devices"][0]["serial"], "ghi");
    assert_eq!(doc["plan"]["devices"][0]["modules"].as_array().unwrap().len(), 2);
    assert_eq!(doc["summary"]["token_modules"], 2);

    let result_dir = dir
        .path()
        .join("results/android-suite/results/1970.01.01_00.00.00/shard_1");
    assert!(result_dir.join("test_runs.json").is_file());
}

#[test]
fn plan_dry_run_creates_nothing() {
    let dir = workspace();
    modshard(&dir)
        .args(["plan", "--dry-run", "--shards", "3"])
        .assert()
        .success()
        .stdout(predicate::str::contains("across 3 shards"));
    assert!(!dir.path().join("results").exists());
}

#[test]
fn match_prefers_exact_name() {
    let dir = workspace();
    modshard(&dir)
        .args(["match", "FooModuleA"])
        .assert()
        .success()
        .stdout("FooModuleA\n");
    modshard(&dir)
        .args(["match", "Nope"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No module matches"));
}

#[test]
fn validate_reports_settings() {
    let dir = workspace();
    modshard(&dir)
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid!"))
        .stdout(predicate::str::contains("Module configs: 3"))
        .stdout(predicate::str::contains("ABIs: armeabi-v7a, arm64-v8a"));
}

#[test]
fn validate_rejects_unknown_checker() {
    let dir = workspace();
    let path = dir.path().join("modshard.toml");
    let mut config = fs::read_to_string(&path).unwrap();
    config.push_str("\n[checkers]\nknown = [\"A\"]\nwhitelist = [\"B\"]\n");
    fs::write(&path, config).unwrap();

    modshard(&dir)
        .arg("validate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("'B' was not found"));
}

#[test]
fn missing_config_fails() {
    let dir = TempDir::new().unwrap();
    modshard(&dir).arg("list").assert().failure();
}
