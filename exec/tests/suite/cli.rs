#![cfg(unix)]
#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use assert_cmd::Command;
use predicates::str::contains;
use tempfile::TempDir;

/// A `PYVAL_HOME` whose config points at a shell script sandbox.
struct TestHome {
    home: TempDir,
}

impl TestHome {
    fn new(sandbox_body: &str) -> Self {
        let home = TempDir::new().expect("home");
        let script = home.path().join("fake-sandbox");
        std::fs::write(&script, format!("#!/bin/sh\n{sandbox_body}\n")).expect("script");
        let mut perms = std::fs::metadata(&script).expect("metadata").permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&script, perms).expect("chmod");
        Self::with_program(home, &script)
    }

    fn with_program(home: TempDir, program: &Path) -> Self {
        let config = format!(
            "[sandbox]\nprogram = {:?}\nargs = []\n\n[paste]\nenabled = false\n",
            program.display().to_string()
        );
        std::fs::write(home.path().join("pyval.toml"), config).expect("config");
        Self { home }
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_pyval-exec"));
        cmd.env("PYVAL_HOME", self.home.path());
        cmd.env_remove("RUST_LOG");
        cmd
    }
}

#[test]
fn prints_the_result_quietly() {
    let test = TestHome::new("cat >/dev/null\necho okay");
    test.cmd()
        .args(["-q", "print('okay')"])
        .assert()
        .success()
        .stdout("okay\n");
}

#[test]
fn status_lines_unless_quiet() {
    let test = TestHome::new("cat >/dev/null\necho okay");
    test.cmd()
        .arg("print('okay')")
        .assert()
        .success()
        .stdout(contains("Content: print('okay')"))
        .stdout(contains("Results (safe output):"));
}

#[test]
fn raw_mode_keeps_newlines() {
    let test = TestHome::new("cat");
    test.cmd()
        .args(["-q", "-r", "a\\nb"])
        .assert()
        .success()
        .stdout("a\nb\n");
}

#[test]
fn safe_mode_escapes_newlines() {
    let test = TestHome::new("cat");
    test.cmd()
        .args(["-q", "a\\nb"])
        .assert()
        .success()
        .stdout("a\\nb\n");
}

#[test]
fn reads_code_from_stdin() {
    let test = TestHome::new("cat");
    test.cmd()
        .arg("-q")
        .write_stdin("print(1)")
        .assert()
        .success()
        .stdout("print(1)\n");
}

#[test]
fn file_contents_are_passed_verbatim() {
    let test = TestHome::new("cat");
    let file = test.home.path().join("snippet.py");
    std::fs::write(&file, "x = '?(\\n'").expect("snippet");
    test.cmd()
        .args(["-q", "-r"])
        .arg(&file)
        .assert()
        .success()
        .stdout("x = '?(\\n'\n");
}

#[test]
fn blacklist_rejection_exits_non_zero() {
    let test = TestHome::new("cat");
    test.cmd()
        .args(["-q", "-b", "import os"])
        .assert()
        .code(1)
        .stdout("")
        .stderr(contains("no imports allowed."));
}

#[test]
fn prints_the_blacklist() {
    let test = TestHome::new("cat");
    test.cmd()
        .arg("-p")
        .assert()
        .success()
        .stdout(contains("import: no imports allowed."))
        .stdout(contains("os.: no os module allowed."));
}

#[test]
fn timeout_exits_non_zero() {
    let test = TestHome::new("cat >/dev/null\nexec sleep 30");
    test.cmd()
        .args(["-q", "-t", "1", "print(1)"])
        .timeout(std::time::Duration::from_secs(20))
        .assert()
        .code(1)
        .stderr(contains("Operation timed out. (1s)"));
}

#[test]
fn crash_exits_non_zero() {
    let test = TestHome::new("cat >/dev/null\nkill -SEGV $$");
    test.cmd()
        .args(["-q", "boom()"])
        .assert()
        .code(1)
        .stderr(contains("crash! the interpreter choked."));
}

#[test]
fn missing_sandbox_is_reported() {
    let home = TempDir::new().expect("home");
    let missing = home.path().join("no-such-sandbox");
    let test = TestHome::with_program(home, &missing);
    test.cmd()
        .args(["-q", "print(1)"])
        .assert()
        .code(1)
        .stderr(contains("not found"));
}
