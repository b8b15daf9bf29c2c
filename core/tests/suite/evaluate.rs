use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use pretty_assertions::assert_eq;
use pyval_core::Blacklist;
use pyval_core::EvaluationRequest;
use pyval_core::ExitOutcome;
use pyval_core::InputMode;
use pyval_core::PyvalErr;
use pyval_core::evaluate::chat_reply;
use pyval_core::paste::PasteUploader;
use tempfile::TempDir;

use crate::suite::support::FakeSandbox;
use crate::suite::support::RecordingUploader;

fn request(code: &str) -> EvaluationRequest {
    EvaluationRequest::from_chat(code, "alice")
}

#[tokio::test]
async fn print_okay() {
    let sandbox = FakeSandbox::new("cat >/dev/null\necho okay");
    let evaluator = sandbox.evaluator(None);

    let reply = evaluator
        .evaluate(&request("print('okay')"), &Blacklist::default())
        .await
        .expect("evaluation");
    assert_eq!(reply.text, "okay");
    assert!(!reply.truncated);
    assert_eq!(reply.paste_url, None);
}

#[tokio::test]
async fn source_reaches_the_interpreter_on_stdin() {
    let sandbox = FakeSandbox::new("cat");
    let evaluator = sandbox.evaluator(None);

    let raw = EvaluationRequest::new("for i in x:\\n    pass", "cli", true, InputMode::Chat);
    let reply = evaluator
        .evaluate(&raw, &Blacklist::default())
        .await
        .expect("evaluation");
    assert_eq!(reply.text, "for i in x:\n    pass");
}

#[tokio::test]
async fn two_lines_are_escaped_unless_raw() {
    let sandbox = FakeSandbox::new("cat >/dev/null\nprintf 'a\\nb\\n'");
    let evaluator = sandbox.evaluator(None);
    let blacklist = Blacklist::default();

    let escaped = evaluator
        .evaluate(&request("print('a\\nb')"), &blacklist)
        .await
        .expect("evaluation");
    assert_eq!(escaped.text, "a\\nb");

    let raw_request = EvaluationRequest::new("print('a\\nb')", "cli", true, InputMode::Verbatim);
    let raw = evaluator
        .evaluate(&raw_request, &blacklist)
        .await
        .expect("evaluation");
    assert_eq!(raw.text, "a\nb");
}

#[tokio::test]
async fn long_output_is_truncated_and_pasted() {
    let sandbox = FakeSandbox::new(
        "cat >/dev/null\ni=0\nwhile [ $i -lt 100 ]; do\n  printf '%050d\\n' $i\n  i=$((i+1))\ndone",
    );
    let uploader = Arc::new(RecordingUploader::default());
    let evaluator = sandbox.evaluator(Some(uploader.clone() as Arc<dyn PasteUploader>));

    let reply = evaluator
        .evaluate(&request("for i in range(100): print(str(i).zfill(50))"), &Blacklist::default())
        .await
        .expect("evaluation");

    assert!(reply.truncated);
    assert_eq!(reply.paste_url.as_deref(), Some("https://paste.example/1"));
    assert!(
        reply.text.ends_with(" - full: https://paste.example/1"),
        "{}",
        reply.text
    );
    let excerpt = reply.text.trim_end_matches(" - full: https://paste.example/1");
    assert_eq!(excerpt.chars().count(), 100);
    assert!(!excerpt.contains('\n'));

    let pastes = uploader.pastes();
    assert_eq!(pastes.len(), 1);
    assert_eq!(pastes[0].author, "PyVal (for alice)");
    assert!(pastes[0].content.starts_with("Query:\n"));
    assert!(pastes[0].content.ends_with("..truncated at 65 lines."));
}

#[tokio::test]
async fn multibyte_output_past_the_byte_budget_is_pasted() {
    let sandbox = FakeSandbox::new(
        "cat >/dev/null\ni=0\nwhile [ $i -lt 150 ]; do\n  printf '\\342\\202\\254'\n  i=$((i+1))\ndone",
    );
    let uploader = Arc::new(RecordingUploader::default());
    let evaluator = sandbox.evaluator(Some(uploader.clone() as Arc<dyn PasteUploader>));
    let blacklist = Blacklist::default();

    // 150 euro signs: inline-sized by characters, 450 bytes.
    let reply = evaluator
        .evaluate(&request("print('\u{20ac}' * 150)"), &blacklist)
        .await
        .expect("evaluation");
    assert!(!reply.truncated);
    assert_eq!(reply.text, "\u{20AC}".repeat(150));

    let reply = evaluator
        .evaluate(
            &request("print('\u{20ac}' * 150)").with_max_reply_bytes(200),
            &blacklist,
        )
        .await
        .expect("evaluation");
    assert!(reply.truncated);
    assert_eq!(reply.paste_url.as_deref(), Some("https://paste.example/1"));
    assert!(reply.text.len() <= 200, "{} bytes", reply.text.len());
    assert!(
        reply.text.ends_with(" - full: https://paste.example/1"),
        "{}",
        reply.text
    );
    assert_eq!(uploader.pastes().len(), 1);
}

#[tokio::test]
async fn failed_paste_still_replies_with_the_excerpt() {
    let sandbox = FakeSandbox::new("cat >/dev/null\nhead -c 400 /dev/zero | tr '\\0' 'x'");
    let uploader = Arc::new(RecordingUploader::failing());
    let evaluator = sandbox.evaluator(Some(uploader.clone() as Arc<dyn PasteUploader>));

    let reply = evaluator
        .evaluate(&request("print('x' * 400)"), &Blacklist::default())
        .await
        .expect("evaluation");
    assert_eq!(
        reply.text,
        format!("{} (...truncated, paste failed)", "x".repeat(100))
    );
    assert_eq!(reply.paste_url, None);
    assert_eq!(uploader.pastes().len(), 1);
}

#[tokio::test]
async fn crash_is_reported_not_fatal() {
    let sandbox = FakeSandbox::new("cat >/dev/null\nkill -SEGV $$");
    let evaluator = sandbox.evaluator(None);

    let result = evaluator
        .evaluate(&request("boom()"), &Blacklist::default())
        .await;
    assert!(matches!(result, Err(PyvalErr::SandboxCrash { .. })), "{result:?}");
    assert_eq!(chat_reply(&result), "crash! the interpreter choked.");
}

#[tokio::test]
async fn sigiot_report_counts_as_a_crash() {
    let sandbox = FakeSandbox::new("cat >/dev/null\necho '[Subprocess killed by SIGIOT]' >&2");
    let invoker = sandbox.invoker(Duration::from_secs(5));

    let result = invoker.invoke("x").await.expect("invoke");
    assert_eq!(result.exit_status, ExitOutcome::Crashed);
}

#[tokio::test]
async fn user_errors_are_ordinary_results() {
    let sandbox = FakeSandbox::new(
        "cat >/dev/null\necho 'NameError: name x is not defined' >&2\nexit 1",
    );
    let evaluator = sandbox.evaluator(None);

    let reply = evaluator
        .evaluate(&request("x"), &Blacklist::default())
        .await
        .expect("evaluation");
    assert_eq!(reply.text, "NameError: name x is not defined");
}

#[tokio::test]
async fn timeout_kills_the_process_and_later_requests_still_run() {
    let sandbox = FakeSandbox::new(
        "src=$(cat)\ncase \"$src\" in\n  *sleep*) exec sleep 30 ;;\n  *) echo done ;;\nesac",
    );
    let evaluator = pyval_core::Evaluator::new(
        sandbox.invoker(Duration::from_secs(1)),
        None,
        Default::default(),
        "t".to_string(),
    );
    let blacklist = Blacklist::default();

    let started = Instant::now();
    let result = evaluator.evaluate(&request("sleep()"), &blacklist).await;
    assert!(matches!(result, Err(PyvalErr::SandboxTimeout { .. })), "{result:?}");
    assert_eq!(chat_reply(&result), "result: timed out.");
    assert!(started.elapsed() < Duration::from_secs(10));

    let reply = evaluator
        .evaluate(&request("print('done')"), &blacklist)
        .await
        .expect("evaluation after timeout");
    assert_eq!(reply.text, "done");
}

#[tokio::test]
async fn blacklisted_code_never_starts_the_sandbox() {
    let markers = TempDir::new().expect("tempdir");
    let marker = markers.path().join("ran");
    let sandbox = FakeSandbox::new(&format!("touch '{}'\necho ran", marker.display()));
    let evaluator = sandbox.evaluator(None);
    let mut blacklist = Blacklist::default();
    blacklist.set_enabled(true);

    for code in ["import os", "__import__('os')", "o p e n('x')"] {
        let result = evaluator.evaluate(&request(code), &blacklist).await;
        assert!(
            matches!(result, Err(PyvalErr::BlacklistRejection { .. })),
            "{code}: {result:?}"
        );
    }
    assert!(!marker.exists());

    let reply = evaluator
        .evaluate(&request("print(1)"), &blacklist)
        .await
        .expect("allowed code runs");
    assert_eq!(reply.text, "ran");
    assert!(marker.exists());
}

#[tokio::test]
async fn empty_code_is_rejected() {
    let sandbox = FakeSandbox::new("echo unreachable");
    let evaluator = sandbox.evaluator(None);
    let result = evaluator
        .evaluate(&request("   "), &Blacklist::default())
        .await;
    assert!(matches!(result, Err(PyvalErr::EmptyInput(_))));
}

/// True while `pid` exists and is not a zombie.
#[cfg(target_os = "linux")]
fn process_running(pid: &str) -> bool {
    match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        Ok(stat) => stat
            .rsplit(')')
            .next()
            .and_then(|rest| rest.split_whitespace().next())
            .is_some_and(|state| state != "Z"),
        Err(_) => false,
    }
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn timeout_kills_the_interpreter_started_by_the_controller() {
    let sandbox = FakeSandbox::new(
        "cat >/dev/null\nsleep 30 &\necho $! > \"$(dirname \"$0\")/interpreter.pid\"\nwait",
    );
    let invoker = sandbox.invoker(Duration::from_secs(1));

    let result = invoker.invoke("while True: pass").await.expect("invoke");
    assert_eq!(result.exit_status, ExitOutcome::TimedOut);

    let pid = std::fs::read_to_string(sandbox.dir.path().join("interpreter.pid"))
        .expect("interpreter pid");
    let pid = pid.trim();
    let deadline = Instant::now() + Duration::from_secs(5);
    while process_running(pid) && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(!process_running(pid), "interpreter {pid} outlived the timeout");
}
