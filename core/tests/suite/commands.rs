use std::sync::Arc;

use pretty_assertions::assert_eq;
use pyval_core::BotState;
use pyval_core::ChatMessage;
use pyval_core::CommandHandler;
use pyval_core::Config;
use pyval_core::config::ADMINS_FILENAME;
use pyval_core::config::BANNED_FILENAME;
use tempfile::TempDir;
use tokio::sync::Mutex;

use crate::suite::support::FakeSandbox;

struct Harness {
    home: TempDir,
    handler: CommandHandler,
    _sandbox: FakeSandbox,
}

fn harness(sandbox_body: &str) -> Harness {
    let home = TempDir::new().expect("home");
    std::fs::write(home.path().join(ADMINS_FILENAME), "root\n").expect("admins");
    let config = Config::default();
    let state = BotState::load(&config, home.path()).expect("state");
    let sandbox = FakeSandbox::new(sandbox_body);
    let handler = CommandHandler::new(
        Arc::new(Mutex::new(state)),
        Arc::new(sandbox.evaluator(None)),
    );
    Harness {
        home,
        handler,
        _sandbox: sandbox,
    }
}

fn from(nick: &str, target: &str, text: &str) -> ChatMessage {
    ChatMessage {
        nick: nick.to_string(),
        host: "user@example.org".to_string(),
        target: target.to_string(),
        text: text.to_string(),
    }
}

/// Sends `text` as if nobody had spoken recently.
async fn reply(handler: &CommandHandler, nick: &str, text: &str) -> Option<String> {
    {
        let mut state = handler.state().lock().await;
        state.throttle.last_handle = None;
        state.throttle.last_nick = None;
        state.throttle.last_command = None;
    }
    send(handler, nick, text).await
}

async fn send(handler: &CommandHandler, nick: &str, text: &str) -> Option<String> {
    handler
        .handle(&from(nick, "#python", text))
        .await
        .and_then(|response| response.text)
}

#[tokio::test]
async fn partall_empties_the_roster() {
    let h = harness("cat >/dev/null\necho okay");
    {
        let mut state = h.handler.state().lock().await;
        state.roster.insert("#python");
        state.roster.insert("#rust");
    }

    let parted = h
        .handler
        .handle(&from("root", "pyval", "!partall"))
        .await
        .expect("partall response");
    assert_eq!(parted.text, None);
    assert_eq!(
        parted.irc_lines(),
        vec!["PART #python".to_string(), "PART #rust".to_string()]
    );
    assert!(h.handler.state().lock().await.roster.is_empty());

    assert_eq!(
        reply(&h.handler, "root", "!channels").await.as_deref(),
        Some("root, not in any channels.")
    );
}

#[tokio::test]
async fn py_command_replies_in_channel() {
    let h = harness("cat >/dev/null\necho okay");
    assert_eq!(
        reply(&h.handler, "bob", "!py print('okay')").await.as_deref(),
        Some("bob, okay")
    );
    assert_eq!(
        reply(&h.handler, "bob", "!python").await,
        None,
        "no code means no reply"
    );
}

#[tokio::test]
async fn blacklist_toggle_reaches_evaluations() {
    let h = harness("cat >/dev/null\necho ran");
    assert_eq!(
        reply(&h.handler, "bob", "!py import os").await.as_deref(),
        Some("bob, ran")
    );
    assert_eq!(
        reply(&h.handler, "root", "!blacklist on").await.as_deref(),
        Some("root, blacklist enabled: true")
    );
    assert_eq!(
        reply(&h.handler, "bob", "!py import os").await.as_deref(),
        Some("bob, error: no imports allowed.")
    );
}

#[tokio::test]
async fn flooding_ends_in_a_persisted_ban() {
    let h = harness("cat >/dev/null\necho okay");
    let handler = &h.handler;

    assert_eq!(
        send(handler, "eve", "!py 1").await.as_deref(),
        Some("eve, okay")
    );
    assert_eq!(
        send(handler, "eve", "!py 2").await.as_deref(),
        Some("eve, slow down with your commands.")
    );
    assert_eq!(
        send(handler, "eve", "!py 3").await.as_deref(),
        Some("eve, really, slow down with your commands.")
    );
    assert_eq!(
        send(handler, "eve", "!py 4").await.as_deref(),
        Some("eve, no more.")
    );
    assert_eq!(send(handler, "eve", "!py 5").await, None);

    let banned = std::fs::read_to_string(h.home.path().join(BANNED_FILENAME)).expect("ban file");
    assert_eq!(banned, "eve\n");
}

#[tokio::test]
async fn stats_count_handled_requests() {
    let h = harness("cat >/dev/null\necho okay");
    reply(&h.handler, "bob", "!py 1").await;
    let stats = reply(&h.handler, "root", "!stats").await.expect("stats");
    assert!(stats.starts_with("root, uptime: "), "{stats}");
    assert!(stats.ends_with(", handled: 1"), "{stats}");
}
