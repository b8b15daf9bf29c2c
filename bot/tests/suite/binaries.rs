use std::process::Command as StdCommand;
use std::time::Duration;

use assert_cmd::Command;
use predicates::str::contains;
use tempfile::TempDir;

fn bot_cmd(home: &TempDir) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_pyval-bot"));
    cmd.env("PYVAL_HOME", home.path());
    cmd
}

fn restart_cmd(home: &TempDir) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_pyval-restart"));
    cmd.env("PYVAL_HOME", home.path());
    cmd
}

#[test]
fn dumpconfig_merges_flags_over_the_file() {
    let home = TempDir::new().expect("home");
    std::fs::write(
        home.path().join("pyval.toml"),
        "[irc]\nserver = \"irc.example.org\"\nnick = \"fromfile\"\n",
    )
    .expect("config");

    bot_cmd(&home)
        .args(["-D", "-n", "evalbot", "-c", "#python,#rust"])
        .assert()
        .success()
        .stdout(contains("server = \"irc.example.org\""))
        .stdout(contains("nick = \"evalbot\""))
        .stdout(contains("\"#python\""))
        .stdout(contains("\"#rust\""));
}

#[test]
fn invalid_config_is_fatal() {
    let home = TempDir::new().expect("home");
    std::fs::write(home.path().join("pyval.toml"), "[irc]\nbogus = 1\n").expect("config");

    bot_cmd(&home)
        .arg("-D")
        .assert()
        .code(1)
        .stderr(contains("invalid config"));
}

#[test]
fn restart_without_pid_file_fails() {
    let home = TempDir::new().expect("home");
    restart_cmd(&home)
        .assert()
        .code(1)
        .stderr(contains("no pid file found"));
}

#[test]
fn restart_with_empty_pid_file_fails() {
    let home = TempDir::new().expect("home");
    std::fs::write(home.path().join("pyval.pid"), "").expect("pid file");
    restart_cmd(&home)
        .assert()
        .code(1)
        .stderr(contains("pid file is empty"));
}

#[cfg(target_os = "linux")]
#[test]
fn restart_relaunches_with_the_same_arguments() {
    let home = TempDir::new().expect("home");
    let mut old = StdCommand::new("sleep")
        .arg("30")
        .current_dir(home.path())
        .spawn()
        .expect("spawn sleep");
    let old_pid = old.id();
    std::fs::write(home.path().join("pyval.pid"), format!("{old_pid}\n")).expect("pid file");

    // Reap the old process as soon as it exits so it does not linger as a
    // zombie while the restart tool waits for it.
    let reaper = std::thread::spawn(move || old.wait());

    let output = restart_cmd(&home)
        .args(["--wait", "10"])
        .timeout(Duration::from_secs(20))
        .output()
        .expect("run restart");
    assert!(output.status.success(), "{output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains(&format!("pid {old_pid} -> ")), "{stdout}");

    let status = reaper.join().expect("reaper").expect("wait");
    assert!(!status.success());

    let new_pid: i32 = stdout
        .trim()
        .rsplit(' ')
        .next()
        .expect("new pid")
        .parse()
        .expect("numeric pid");
    let cmdline = std::fs::read(format!("/proc/{new_pid}/cmdline")).expect("cmdline");
    assert_eq!(cmdline, b"sleep\x0030\x00");
    let cwd = std::fs::read_link(format!("/proc/{new_pid}/cwd")).expect("cwd");
    assert_eq!(cwd, home.path().canonicalize().expect("canonical home"));

    unsafe {
        libc::kill(new_pid, libc::SIGKILL);
    }
}
