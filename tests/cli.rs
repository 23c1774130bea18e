use assert_cmd::Command;
use predicates::prelude::*;

fn medraxctl() -> Command {
    let mut cmd = Command::cargo_bin("medraxctl").unwrap();
    // Isolate from whatever the host environment happens to define
    for var in [
        "DEVICE",
        "MODEL",
        "TEMP_DIR",
        "TEMPERATURE",
        "TOP_P",
        "MODEL_WEIGHTS_PATH",
        "MODEL_CACHE_DIR",
        "OPENAI_API_KEY",
        "OPENAI_BASE_URL",
    ] {
        cmd.env_remove(var);
    }
    cmd
}

#[test]
fn unknown_command_prints_usage_and_fails() {
    medraxctl()
        .arg("frobnicate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn no_command_prints_usage_and_fails() {
    medraxctl()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn help_lists_lifecycle_commands() {
    medraxctl()
        .arg("--help")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("build")
                .and(predicate::str::contains("start"))
                .and(predicate::str::contains("stop"))
                .and(predicate::str::contains("restart"))
                .and(predicate::str::contains("status"))
                .and(predicate::str::contains("logs"))
                .and(predicate::str::contains("shell"))
                .and(predicate::str::contains("exec"))
                .and(predicate::str::contains("cleanup")),
        );
}

#[test]
fn start_without_credential_aborts_with_guidance() {
    // Pre-flight runs before any Docker connection, so this works without a
    // daemon and must not leave anything behind in the temp dir.
    let dir = tempfile::tempdir().unwrap();
    medraxctl()
        .current_dir(dir.path())
        .arg("start")
        .assert()
        .failure()
        .stderr(
            predicate::str::contains("OPENAI_API_KEY")
                .and(predicate::str::contains(".env")),
        );
    assert!(!dir.path().join("temp").exists());
}

#[test]
fn start_reads_credential_guidance_even_with_env_file_present() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(".env"), "MODEL=gpt-4o-mini\n").unwrap();
    medraxctl()
        .current_dir(dir.path())
        .arg("start")
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not define OPENAI_API_KEY"));
}

#[test]
fn invalid_device_is_a_configuration_error() {
    let dir = tempfile::tempdir().unwrap();
    medraxctl()
        .current_dir(dir.path())
        .env("DEVICE", "tpu")
        .arg("start")
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid DEVICE"));
}

#[test]
fn exec_requires_a_command() {
    medraxctl()
        .arg("exec")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn build_without_dockerfile_fails_fast() {
    let dir = tempfile::tempdir().unwrap();
    medraxctl()
        .current_dir(dir.path())
        .arg("build")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Dockerfile"));
}
