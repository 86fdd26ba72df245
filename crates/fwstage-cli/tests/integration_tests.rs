//! Integration tests for fwstagectl CLI
//!
//! Each test drives the binary against a simulated device and a fake
//! removable storage tree in a temporary directory.

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

type TestResult = Result<(), Box<dyn std::error::Error>>;

/// Custom predicate to check if output is valid JSON
fn is_json() -> impl predicates::Predicate<[u8]> {
    predicates::function::function(|s: &[u8]| {
        if let Ok(text) = std::str::from_utf8(s) {
            serde_json::from_str::<Value>(text).is_ok()
        } else {
            false
        }
    })
}

fn image(len: usize) -> Vec<u8> {
    let mut data = vec![0xE9u8, 2, 2, 0x20, 0x00, 0x00, 0x08, 0x40];
    data.resize(len, 0x5A);
    data
}

/// Temporary device directory and storage root
struct Bench {
    dir: TempDir,
}

impl Bench {
    fn new() -> Result<Self, Box<dyn std::error::Error>> {
        let dir = TempDir::new()?;
        let firmware = dir.path().join("sd/firmware");
        fs::create_dir_all(&firmware)?;
        fs::write(firmware.join("app.bin"), image(200_000))?;
        fs::write(firmware.join("huge.bin"), image(300_000))?;
        fs::write(firmware.join("notes.txt"), b"release notes")?;
        fs::write(dir.path().join("launcher.bin"), image(40_000))?;
        Ok(Self { dir })
    }

    fn device(&self) -> PathBuf {
        self.dir.path().join("device")
    }

    fn cmd(&self) -> Result<Command, Box<dyn std::error::Error>> {
        let mut cmd = Command::cargo_bin("fwstagectl")?;
        cmd.env_remove("FWSTAGE_CONFIG")
            .env_remove("RUST_LOG")
            .env("FWSTAGE_DEVICE", self.device())
            .env("FWSTAGE_STORAGE", self.dir.path().join("sd"));
        Ok(cmd)
    }

    fn init(&self) -> TestResult {
        self.cmd()?
            .arg("init")
            .arg(self.dir.path().join("launcher.bin"))
            .args(["--staging-capacity", "262144"])
            .assert()
            .success();
        Ok(())
    }

    fn json(&self, args: &[&str]) -> Result<Value, Box<dyn std::error::Error>> {
        let output = self.cmd()?.args(args).arg("--json").output()?;
        Ok(serde_json::from_slice(&output.stdout)?)
    }
}

#[test]
fn test_cli_help() -> TestResult {
    Command::cargo_bin("fwstagectl")?
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Firmware Staging CLI"));
    Ok(())
}

#[test]
fn test_cli_version() -> TestResult {
    Command::cargo_bin("fwstagectl")?
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("fwstagectl"));
    Ok(())
}

#[test]
fn test_commands_require_initialized_device() -> TestResult {
    let bench = Bench::new()?;
    bench
        .cmd()?
        .arg("status")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("fwstagectl init"));
    Ok(())
}

#[test]
fn test_init_refuses_to_overwrite() -> TestResult {
    let bench = Bench::new()?;
    bench.init()?;

    bench
        .cmd()?
        .arg("init")
        .arg(bench.dir.path().join("launcher.bin"))
        .assert()
        .code(1)
        .stderr(predicate::str::contains("--force"));

    bench
        .cmd()?
        .arg("init")
        .arg(bench.dir.path().join("launcher.bin"))
        .arg("--force")
        .assert()
        .success();
    Ok(())
}

#[test]
fn test_init_rejects_launcher_without_magic() -> TestResult {
    let bench = Bench::new()?;
    let bogus = bench.dir.path().join("bogus.bin");
    fs::write(&bogus, [0x00u8; 64])?;

    bench
        .cmd()?
        .arg("init")
        .arg(&bogus)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Bad image magic"));
    assert!(!bench.device().exists());
    Ok(())
}

#[test]
fn test_status_json() -> TestResult {
    let bench = Bench::new()?;
    bench.init()?;

    bench
        .cmd()?
        .args(["status", "--json"])
        .assert()
        .success()
        .stdout(is_json());

    let status = bench.json(&["status"])?;
    assert_eq!(status["success"], true);
    assert_eq!(status["status"]["launcher"]["trust"], "valid");
    assert_eq!(status["status"]["staging"]["region"]["capacity"], 262_144);
    assert_eq!(status["status"]["next_boot"], "launcher");
    assert_eq!(status["status"]["firmware_staged"], false);
    Ok(())
}

#[test]
fn test_scan_lists_bin_files_sorted() -> TestResult {
    let bench = Bench::new()?;

    let scan = bench.json(&["scan"])?;
    let names: Vec<&str> = scan["images"]
        .as_array()
        .ok_or("images is not an array")?
        .iter()
        .filter_map(|c| c["name"].as_str())
        .collect();
    assert_eq!(names, vec!["app.bin", "huge.bin"]);

    let limited = bench.json(&["scan", "firmware", "--max", "1"])?;
    assert_eq!(limited["images"].as_array().map(Vec::len), Some(1));
    Ok(())
}

#[test]
fn test_scan_missing_directory_is_empty() -> TestResult {
    let bench = Bench::new()?;
    bench
        .cmd()?
        .args(["scan", "nowhere"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No firmware images found"));
    Ok(())
}

#[test]
fn test_validate_exit_codes() -> TestResult {
    let bench = Bench::new()?;
    bench.init()?;

    bench
        .cmd()?
        .args(["validate", "firmware/app.bin"])
        .assert()
        .success()
        .stdout(predicate::str::contains("valid image"));

    bench
        .cmd()?
        .args(["validate", "firmware/notes.txt"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Unsupported file extension"));

    bench
        .cmd()?
        .args(["validate", "firmware/huge.bin", "--json"])
        .assert()
        .code(2)
        .stdout(predicate::str::contains("\"type\": \"validation\""));
    Ok(())
}

#[test]
fn test_flash_rejects_oversized_image() -> TestResult {
    let bench = Bench::new()?;
    bench.init()?;

    bench
        .cmd()?
        .args(["flash", "firmware/huge.bin"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("Image too large"));

    let status = bench.json(&["status"])?;
    assert_eq!(status["status"]["firmware_staged"], false);
    Ok(())
}

#[test]
fn test_run_once_without_staged_image() -> TestResult {
    let bench = Bench::new()?;
    bench.init()?;

    bench
        .cmd()?
        .arg("run-once")
        .assert()
        .code(4)
        .stderr(predicate::str::contains("No firmware staged"));

    let status = bench.json(&["status"])?;
    assert_eq!(status["status"]["run_once_requested"], false);
    Ok(())
}

#[test]
fn test_invalid_config_exit_code() -> TestResult {
    let bench = Bench::new()?;
    bench.init()?;
    let config = bench.dir.path().join("fwstage.json");
    fs::write(&config, r#"{"chunk_size": 0}"#)?;

    bench
        .cmd()?
        .arg("status")
        .arg("--config")
        .arg(&config)
        .assert()
        .code(5)
        .stderr(predicate::str::contains("chunk_size"));
    Ok(())
}

#[test]
fn test_one_shot_boot_and_rollback() -> TestResult {
    let bench = Bench::new()?;
    bench.init()?;

    let flash = bench.json(&["flash", "firmware/app.bin"])?;
    assert_eq!(flash["success"], true);
    assert_eq!(flash["report"]["bytes_written"], 200_000);

    bench.cmd()?.arg("run-once").assert().success();

    let first = bench.json(&["boot"])?;
    assert_eq!(first["outcome"]["state"], "AwaitingManualRestart");
    assert_eq!(first["outcome"]["next_boot"], "staging");
    assert_eq!(first["restart_required"], true);

    // A second evaluation before reset reports the same decision
    let again = bench.json(&["boot"])?;
    assert_eq!(again["outcome"], first["outcome"]);

    let reset = bench.json(&["reset"])?;
    assert_eq!(reset["running"], "staging");

    bench
        .cmd()?
        .arg("boot")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("staging region is running"));

    // Staged image never confirmed itself, so the bootloader rolls back
    let reset = bench.json(&["reset"])?;
    assert_eq!(reset["running"], "launcher");

    let after = bench.json(&["boot"])?;
    assert_eq!(after["outcome"]["state"], "Confirmed");
    assert_eq!(after["outcome"]["one_shot"], false);
    assert_eq!(after["outcome"]["next_boot"], "launcher");

    let status = bench.json(&["status"])?;
    assert_eq!(status["status"]["staging"]["trust"], "aborted");
    assert_eq!(status["status"]["next_boot"], "launcher");
    assert_eq!(status["status"]["run_once_requested"], false);
    Ok(())
}

#[test]
fn test_boot_refuses_erased_staging_after_run_once() -> TestResult {
    let bench = Bench::new()?;
    bench.init()?;
    bench
        .cmd()?
        .args(["flash", "firmware/app.bin"])
        .assert()
        .success();
    bench.cmd()?.arg("run-once").assert().success();

    // Staging header lost after the one-shot was requested
    let staging = bench.device().join("staging.bin");
    let mut contents = fs::read(&staging)?;
    if let Some(first) = contents.first_mut() {
        *first = 0xFF;
    }
    fs::write(&staging, contents)?;

    bench
        .cmd()?
        .arg("boot")
        .assert()
        .code(4)
        .stderr(predicate::str::contains("No firmware staged"));

    let again = bench.json(&["boot"])?;
    assert_eq!(again["outcome"]["state"], "Confirmed");
    assert_eq!(again["outcome"]["one_shot"], true);
    assert_eq!(again["outcome"]["next_boot"], "launcher");

    let reset = bench.json(&["reset"])?;
    assert_eq!(reset["running"], "launcher");
    Ok(())
}
