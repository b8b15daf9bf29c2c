//! The IRC connection.
//!
//! One task reads server lines and answers protocol traffic inline. Each
//! command that passes screening runs in its own task, and everything bound
//! for the server goes through a channel to a single writer task, so a slow
//! evaluation never holds up PING/PONG. A dropped connection is retried with
//! [`Backoff`] until shutdown is requested.

use std::io;
use std::time::Duration;

use pyval_core::ChatMessage;
use pyval_core::CommandHandler;
use pyval_core::commands::MAX_IRC_LINE_BYTES;
use pyval_core::commands::QUIT_MESSAGE;
use pyval_core::config::IrcConfig;
use pyval_utils_string::take_bytes_at_char_boundary;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::trace;
use tracing::warn;

use crate::backoff::Backoff;
use crate::irc::IrcMessage;
use crate::irc::ctcp_reply;
use crate::irc::mask_secrets;
use crate::irc::parse_ctcp;
use crate::irc::split_login;

/// Lines queued for the writer before senders wait.
const CHANNEL_CAPACITY: usize = 128;

/// How long the QUIT line gets to reach the server on shutdown.
const QUIT_GRACE: Duration = Duration::from_secs(2);

const RPL_WELCOME: &str = "001";
const ERR_NICKNAMEINUSE: &str = "433";
const JOIN_FAILURES: &[&str] = &["403", "405", "471", "473", "474", "475"];

const REALNAME: &str = "PyVal";

/// Secrets read at startup. Never written to a log.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    /// Sent with `PASS` during registration.
    pub server_password: Option<String>,
    /// Sent to NickServ after registration.
    pub nickserv_password: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    Quit,
    Disconnected { registered: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterExit {
    Quit,
    Closed,
    Failed,
}

pub struct IrcClient {
    config: IrcConfig,
    username: String,
    credentials: Credentials,
    handler: CommandHandler,
}

impl IrcClient {
    pub fn new(config: IrcConfig, mut credentials: Credentials, handler: CommandHandler) -> Self {
        let username = match config.username.as_deref().map(split_login) {
            Some((user, password)) => {
                if credentials.server_password.is_none() {
                    credentials.server_password = password;
                }
                user
            }
            None => config.nick.clone(),
        };
        Self {
            config,
            username,
            credentials,
            handler,
        }
    }

    /// Connect and serve until `shutdown` is cancelled or an admin asks the
    /// bot to quit.
    pub async fn run(&self, shutdown: CancellationToken) -> io::Result<()> {
        let mut backoff = Backoff::default();
        loop {
            match self.run_session(&shutdown).await {
                Ok(SessionEnd::Quit) => {
                    info!("disconnected from {}", self.config.server);
                    return Ok(());
                }
                Ok(SessionEnd::Disconnected { registered }) => {
                    warn!("lost connection to {}", self.config.server);
                    if registered {
                        backoff.reset();
                    }
                }
                Err(err) => {
                    warn!(
                        "connection to {}:{} failed: {err}",
                        self.config.server, self.config.port
                    );
                }
            }

            if shutdown.is_cancelled() {
                return Ok(());
            }
            let delay = backoff.next_delay();
            info!("reconnecting in {}s", delay.as_secs());
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.cancelled() => return Ok(()),
            }
        }
    }

    async fn run_session(&self, shutdown: &CancellationToken) -> io::Result<SessionEnd> {
        info!("connecting to {}:{}", self.config.server, self.config.port);
        let stream = TcpStream::connect((self.config.server.as_str(), self.config.port)).await?;
        let (read_half, write_half) = stream.into_split();

        let (outgoing_tx, outgoing_rx) = mpsc::channel::<String>(CHANNEL_CAPACITY);
        let mut writer = tokio::spawn(write_lines(
            write_half,
            outgoing_rx,
            self.config.monitor_data,
        ));

        let mut session = Session::new(self, outgoing_tx);
        session.start().await;

        let mut reader = BufReader::new(read_half);
        let mut buf = Vec::new();
        let end = loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    session.send(format!("QUIT :{QUIT_MESSAGE}")).await;
                    if tokio::time::timeout(QUIT_GRACE, &mut writer).await.is_err() {
                        warn!("timed out sending QUIT");
                    }
                    break SessionEnd::Quit;
                }
                exit = &mut writer => {
                    break match exit {
                        Ok(WriterExit::Quit) => SessionEnd::Quit,
                        Ok(WriterExit::Closed | WriterExit::Failed) => SessionEnd::Disconnected {
                            registered: session.registered,
                        },
                        Err(err) => {
                            error!("writer task failed: {err}");
                            SessionEnd::Disconnected { registered: session.registered }
                        }
                    };
                }
                read = reader.read_until(b'\n', &mut buf) => match read {
                    Ok(0) => {
                        info!("server closed the connection");
                        break SessionEnd::Disconnected { registered: session.registered };
                    }
                    Ok(_) => {
                        let line = String::from_utf8_lossy(&buf).into_owned();
                        buf.clear();
                        session.handle_line(&line).await;
                    }
                    Err(err) => {
                        warn!("failed to read from server: {err}");
                        break SessionEnd::Disconnected { registered: session.registered };
                    }
                }
            }
        };
        writer.abort();
        Ok(end)
    }
}

/// Per-connection protocol state.
struct Session<'a> {
    client: &'a IrcClient,
    outgoing: mpsc::Sender<String>,
    nick: String,
    registered: bool,
}

impl<'a> Session<'a> {
    fn new(client: &'a IrcClient, outgoing: mpsc::Sender<String>) -> Self {
        Self {
            client,
            outgoing,
            nick: client.config.nick.clone(),
            registered: false,
        }
    }

    async fn send(&self, line: String) {
        if self.outgoing.send(line).await.is_err() {
            debug!("writer closed, dropping line");
        }
    }

    /// Forget the previous connection's channels and register.
    async fn start(&mut self) {
        {
            let mut state = self.client.handler.state().lock().await;
            state.roster.clear();
            state.nickname = self.nick.clone();
        }
        if let Some(password) = &self.client.credentials.server_password {
            self.send(format!("PASS {password}")).await;
        }
        self.send(format!("NICK {}", self.nick)).await;
        self.send(format!(
            "USER {} 0 * :{REALNAME}",
            self.client.username
        ))
        .await;
    }

    async fn handle_line(&mut self, line: &str) {
        let line = line.trim_end_matches(['\r', '\n']);
        if self.client.config.monitor_data {
            info!("<<< {line}");
        }
        let Some(msg) = IrcMessage::parse(line) else {
            return;
        };

        match msg.command.as_str() {
            "PING" => {
                let token = msg.text();
                if !self.client.config.no_heartbeat_log {
                    info!("heartbeat: {token}");
                }
                self.send(format!("PONG :{token}")).await;
            }
            RPL_WELCOME => self.on_welcome(&msg).await,
            ERR_NICKNAMEINUSE => self.on_nick_in_use().await,
            "NICK" => self.on_nick(&msg).await,
            "JOIN" | "PART" | "KICK" => self.on_membership(&msg).await,
            code if JOIN_FAILURES.contains(&code) => self.on_join_failed(&msg).await,
            "NOTICE" => self.on_notice(&msg).await,
            "PRIVMSG" => self.on_privmsg(&msg).await,
            "ERROR" => warn!("server error: {}", msg.text()),
            _ => trace!("unhandled: {line}"),
        }
    }

    async fn on_welcome(&mut self, msg: &IrcMessage) {
        self.registered = true;
        if let Some(nick) = msg.param(0) {
            self.nick = nick.to_string();
        }
        self.client.handler.state().lock().await.nickname = self.nick.clone();
        info!("registered with {} as {}", self.client.config.server, self.nick);

        if let Some(password) = &self.client.credentials.nickserv_password {
            info!("identifying with NickServ...");
            self.send(format!("PRIVMSG NickServ :IDENTIFY {} {password}", self.nick))
                .await;
        }
        for channel in self.client.config.join_channels() {
            info!("joining: {channel}");
            self.send(format!("JOIN {channel}")).await;
        }
    }

    async fn on_nick_in_use(&mut self) {
        if self.registered {
            return;
        }
        let fallback = format!("{}_", self.nick);
        warn!("nick {} is in use, trying {fallback}", self.nick);
        self.nick = fallback;
        self.client.handler.state().lock().await.nickname = self.nick.clone();
        self.send(format!("NICK {}", self.nick)).await;
    }

    async fn on_nick(&mut self, msg: &IrcMessage) {
        if !self.is_me(msg.nick()) {
            return;
        }
        let new_nick = msg.text().to_string();
        info!("nick changed to {new_nick}");
        self.client.handler.state().lock().await.nickname = new_nick.clone();
        self.nick = new_nick;
    }

    async fn on_membership(&self, msg: &IrcMessage) {
        let Some(channel) = msg.param(0) else {
            return;
        };
        let mut state = self.client.handler.state().lock().await;
        match msg.command.as_str() {
            "JOIN" if self.is_me(msg.nick()) => {
                info!("joined {channel}");
                state.roster.insert(channel);
            }
            "PART" if self.is_me(msg.nick()) => {
                info!("left {channel}");
                state.roster.remove(channel);
            }
            "KICK" if self.is_me(msg.param(1)) => {
                warn!(
                    "kicked from {channel} by {}: {}",
                    msg.nick().unwrap_or("server"),
                    msg.text()
                );
                state.roster.remove(channel);
            }
            _ => {}
        }
    }

    async fn on_join_failed(&self, msg: &IrcMessage) {
        let Some(channel) = msg.param(1) else {
            return;
        };
        warn!("unable to join {channel}: {}", msg.text());
        self.client.handler.state().lock().await.roster.remove(channel);
    }

    /// Private notices from users are logged and passed on to the admins.
    async fn on_notice(&self, msg: &IrcMessage) {
        let (Some(sender), Some(target)) = (msg.nick(), msg.param(0)) else {
            return;
        };
        if !self.is_me(Some(target)) {
            return;
        }
        let text = msg.text();
        info!("notice from {sender}: {text}");
        let admins = self.client.handler.state().lock().await.admins.list();
        for admin in admins.iter().filter(|admin| !admin.eq_ignore_ascii_case(sender)) {
            self.send(format!("PRIVMSG {admin} :notice from {sender}: {text}"))
                .await;
        }
    }

    async fn on_privmsg(&self, msg: &IrcMessage) {
        let (Some(nick), Some(target)) = (msg.nick(), msg.param(0)) else {
            return;
        };
        let text = msg.text();

        if let Some((command, _)) = parse_ctcp(text) {
            if command == "VERSION" {
                debug!("version request from {nick}");
                let version = format!("PyVal {}", env!("CARGO_PKG_VERSION"));
                self.send(ctcp_reply(nick, "VERSION", &version)).await;
            }
            return;
        }

        let host = msg.host().unwrap_or_default();
        if self.client.config.monitor {
            if self.client.config.monitor_ips {
                info!("[{target}] <{nick}!{host}> {text}");
            } else {
                info!("[{target}] <{nick}> {text}");
            }
        }

        let chat = ChatMessage {
            nick: nick.to_string(),
            host: host.to_string(),
            target: target.to_string(),
            text: text.to_string(),
        };
        let Some(job) = self.client.handler.prepare(&chat).await else {
            return;
        };
        let handler = self.client.handler.clone();
        let outgoing = self.outgoing.clone();
        tokio::spawn(async move {
            let response = handler.execute(job).await;
            if !response.delay.is_zero() {
                tokio::time::sleep(response.delay).await;
            }
            for line in response.irc_lines() {
                if outgoing.send(line).await.is_err() {
                    debug!("connection closed before the reply was sent");
                    break;
                }
            }
        });
    }

    fn is_me(&self, nick: Option<&str>) -> bool {
        nick.is_some_and(|nick| nick.eq_ignore_ascii_case(&self.nick))
    }
}

/// Drain `outgoing_rx` to the socket. Stops after a QUIT line.
async fn write_lines(
    mut writer: OwnedWriteHalf,
    mut outgoing_rx: mpsc::Receiver<String>,
    log_data: bool,
) -> WriterExit {
    while let Some(line) = outgoing_rx.recv().await {
        let line = line.replace(['\r', '\n'], " ");
        if line.len() > MAX_IRC_LINE_BYTES {
            warn!("cutting {}-byte line to {MAX_IRC_LINE_BYTES}", line.len());
        }
        let line = take_bytes_at_char_boundary(&line, MAX_IRC_LINE_BYTES);
        if log_data {
            info!(">>> {}", mask_secrets(line));
        }
        let data = format!("{line}\r\n");
        if let Err(err) = writer.write_all(data.as_bytes()).await {
            error!("failed to write to server: {err}");
            return WriterExit::Failed;
        }
        if line.starts_with("QUIT") {
            let _ = writer.shutdown().await;
            return WriterExit::Quit;
        }
    }
    info!("writer exited (channel closed)");
    WriterExit::Closed
}
