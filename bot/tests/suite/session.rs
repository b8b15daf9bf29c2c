use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use pyval_bot::Credentials;
use pyval_bot::IrcClient;
use pyval_core::BotState;
use pyval_core::CommandHandler;
use pyval_core::Config;
use pyval_core::Evaluator;
use pyval_core::config::ADMINS_FILENAME;
use tempfile::TempDir;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;
use tokio::io::Lines;
use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const READ_TIMEOUT: Duration = Duration::from_secs(10);

/// A bot pointed at a local listener standing in for the IRC server.
struct TestBot {
    home: TempDir,
    listener: TcpListener,
    handler: CommandHandler,
    shutdown: CancellationToken,
    task: JoinHandle<std::io::Result<()>>,
}

async fn start_bot(credentials: Credentials) -> TestBot {
    let home = TempDir::new().expect("home");
    std::fs::write(home.path().join(ADMINS_FILENAME), "root\n").expect("admins");
    let script = home.path().join("fake-sandbox");
    std::fs::write(&script, "#!/bin/sh\ncat >/dev/null\necho okay\n").expect("script");
    let mut perms = std::fs::metadata(&script).expect("metadata").permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&script, perms).expect("chmod");

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("addr").port();

    let mut config = Config::default();
    config.irc.server = "127.0.0.1".to_string();
    config.irc.port = port;
    config.irc.channels = vec!["#python".to_string()];
    config.sandbox.program = script.display().to_string();
    config.sandbox.args = Vec::new();
    config.paste.enabled = false;

    let state = BotState::load(&config, home.path()).expect("state");
    let evaluator = Evaluator::from_config(&config, home.path());
    let handler = CommandHandler::new(Arc::new(Mutex::new(state)), Arc::new(evaluator));
    let client = IrcClient::new(config.irc.clone(), credentials, handler.clone());

    let shutdown = CancellationToken::new();
    let task = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { client.run(shutdown).await }
    });
    TestBot {
        home,
        listener,
        handler,
        shutdown,
        task,
    }
}

struct Server {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl Server {
    async fn accept(listener: &TcpListener) -> Self {
        let (socket, _) = tokio::time::timeout(READ_TIMEOUT, listener.accept())
            .await
            .expect("bot connects")
            .expect("accept");
        Self::new(socket)
    }

    fn new(socket: TcpStream) -> Self {
        let (read, writer) = socket.into_split();
        Self {
            lines: BufReader::new(read).lines(),
            writer,
        }
    }

    async fn send(&mut self, line: &str) {
        self.writer
            .write_all(format!("{line}\r\n").as_bytes())
            .await
            .expect("write");
    }

    async fn expect_line(&mut self) -> String {
        tokio::time::timeout(READ_TIMEOUT, self.lines.next_line())
            .await
            .expect("line before timeout")
            .expect("read")
            .expect("connection open")
    }

    /// Round-trip a PING so every earlier line has been handled.
    async fn sync(&mut self) {
        self.send("PING :sync").await;
        assert_eq!(self.expect_line().await, "PONG :sync");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn registers_joins_and_answers_commands() {
    let bot = start_bot(Credentials {
        server_password: Some("letmein".to_string()),
        nickserv_password: Some("hunter2".to_string()),
    })
    .await;
    let mut server = Server::accept(&bot.listener).await;

    assert_eq!(server.expect_line().await, "PASS letmein");
    assert_eq!(server.expect_line().await, "NICK pyval");
    assert_eq!(server.expect_line().await, "USER pyval 0 * :PyVal");

    server
        .send(":irc.test 433 * pyval :Nickname is already in use")
        .await;
    assert_eq!(server.expect_line().await, "NICK pyval_");

    server.send(":irc.test 001 pyval_ :Welcome").await;
    assert_eq!(
        server.expect_line().await,
        "PRIVMSG NickServ :IDENTIFY pyval_ hunter2"
    );
    assert_eq!(server.expect_line().await, "JOIN #python");

    server.send(":pyval_!u@h JOIN #python").await;
    server.sync().await;
    assert!(bot.handler.state().lock().await.roster.contains("#python"));

    server
        .send(":bob!b@example.org PRIVMSG #python :!py print('okay')")
        .await;
    assert_eq!(server.expect_line().await, "PRIVMSG #python :bob, okay");

    server
        .send(":bob!b@example.org PRIVMSG pyval_ :\u{1}VERSION\u{1}")
        .await;
    let version = server.expect_line().await;
    assert!(
        version.starts_with("NOTICE bob :\u{1}VERSION PyVal "),
        "{version}"
    );

    server
        .send(":NickServ!s@services NOTICE pyval_ :You are now identified")
        .await;
    assert_eq!(
        server.expect_line().await,
        "PRIVMSG root :notice from NickServ: You are now identified"
    );

    server.send(":op!o@h KICK #python pyval_ :bye").await;
    server.sync().await;
    assert!(bot.handler.state().lock().await.roster.is_empty());

    bot.shutdown.cancel();
    assert_eq!(server.expect_line().await, "QUIT :shutting down...");
    tokio::time::timeout(READ_TIMEOUT, bot.task)
        .await
        .expect("bot stops")
        .expect("join")
        .expect("clean exit");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn join_failures_drop_the_channel() {
    let bot = start_bot(Credentials::default()).await;
    let mut server = Server::accept(&bot.listener).await;
    assert_eq!(server.expect_line().await, "NICK pyval");
    assert_eq!(server.expect_line().await, "USER pyval 0 * :PyVal");
    server.send(":irc.test 001 pyval :Welcome").await;
    assert_eq!(server.expect_line().await, "JOIN #python");

    server
        .send(":root!r@h PRIVMSG pyval :!join #secret")
        .await;
    assert_eq!(server.expect_line().await, "JOIN #secret");
    assert!(bot.handler.state().lock().await.roster.contains("#secret"));

    server
        .send(":irc.test 475 pyval #secret :Cannot join channel (+k)")
        .await;
    server.sync().await;
    assert!(!bot.handler.state().lock().await.roster.contains("#secret"));

    bot.shutdown.cancel();
    assert_eq!(server.expect_line().await, "QUIT :shutting down...");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn admin_shutdown_ends_the_session() {
    let bot = start_bot(Credentials::default()).await;
    let mut server = Server::accept(&bot.listener).await;
    assert_eq!(server.expect_line().await, "NICK pyval");
    assert_eq!(server.expect_line().await, "USER pyval 0 * :PyVal");
    server.send(":irc.test 001 pyval :Welcome").await;
    assert_eq!(server.expect_line().await, "JOIN #python");

    server.send(":root!r@h PRIVMSG pyval :!shutdown").await;
    assert_eq!(server.expect_line().await, "QUIT :shutting down...");
    tokio::time::timeout(READ_TIMEOUT, bot.task)
        .await
        .expect("bot stops")
        .expect("join")
        .expect("clean exit");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reconnects_after_the_server_hangs_up() {
    let bot = start_bot(Credentials::default()).await;
    {
        let mut server = Server::accept(&bot.listener).await;
        assert_eq!(server.expect_line().await, "NICK pyval");
    }

    let mut server = Server::accept(&bot.listener).await;
    assert_eq!(server.expect_line().await, "NICK pyval");
    assert_eq!(server.expect_line().await, "USER pyval 0 * :PyVal");

    bot.shutdown.cancel();
    assert_eq!(server.expect_line().await, "QUIT :shutting down...");
    assert!(bot.home.path().join(ADMINS_FILENAME).exists());
}
