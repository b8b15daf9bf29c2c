//! Chat command recognition and dispatch.
//!
//! Handling a line is split in two: [`CommandHandler::prepare`] runs in
//! arrival order and applies bans, flood throttling and load shedding;
//! [`CommandHandler::execute`] runs the command (possibly a slow sandbox
//! evaluation) and can be spawned onto its own task.

use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use chrono::Local;
use pyval_utils_string::split_comma_list;
use pyval_utils_string::strip_blanks;
use tokio::sync::Mutex;
use tracing::debug;
use tracing::info;

use crate::evaluate::EvaluationRequest;
use crate::evaluate::Evaluator;
use crate::evaluate::chat_reply;
use crate::help::Role;
use crate::state::BotState;
use crate::state::Screening;
use crate::state::normalize_channel;
use crate::util::humantime;
use crate::util::parse_bool_word;
use crate::util::timefromsecs;

pub const USER_COMMANDS: &[&str] = &[
    "help", "py", "python", "pyval", "time", "uptime", "version",
];

pub const ADMIN_COMMANDS: &[&str] = &[
    "adminadd",
    "adminhelp",
    "adminlist",
    "adminreload",
    "adminrem",
    "adminremove",
    "ban",
    "banned",
    "banwarns",
    "blacklist",
    "channels",
    "id",
    "identify",
    "join",
    "limitrate",
    "me",
    "msg",
    "part",
    "partall",
    "say",
    "sendline",
    "shutdown",
    "stats",
    "unban",
];

pub const QUIT_MESSAGE: &str = "shutting down...";
/// Longest IRC line, without the trailing CRLF.
pub const MAX_IRC_LINE_BYTES: usize = 510;

/// A PRIVMSG as seen by the bot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub nick: String,
    pub host: String,
    /// Channel name, or the bot's own nick for a private message.
    pub target: String,
    pub text: String,
}

/// Side effects a command asks the transport to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotAction {
    Join(String),
    Part(String),
    Privmsg { target: String, text: String },
    Action { target: String, text: String },
    Raw(String),
    Quit(String),
}

impl BotAction {
    pub fn to_irc_line(&self) -> String {
        match self {
            BotAction::Join(channel) => format!("JOIN {channel}"),
            BotAction::Part(channel) => format!("PART {channel}"),
            BotAction::Privmsg { target, text } => format!("PRIVMSG {target} :{text}"),
            BotAction::Action { target, text } => {
                format!("PRIVMSG {target} :\u{1}ACTION {text}\u{1}")
            }
            BotAction::Raw(line) => line.clone(),
            BotAction::Quit(message) => format!("QUIT :{message}"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutcome {
    pub reply: Option<String>,
    pub actions: Vec<BotAction>,
}

impl CommandOutcome {
    fn reply(text: impl Into<String>) -> Self {
        Self {
            reply: Some(text.into()),
            actions: Vec::new(),
        }
    }

    fn silent() -> Self {
        Self::default()
    }

    fn action(action: BotAction) -> Self {
        Self {
            reply: None,
            actions: vec![action],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum JobKind {
    Warning(String),
    User { name: String, rest: String },
    Admin { name: String, rest: String },
}

/// A command line that passed screening.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    nick: String,
    reply_to: String,
    in_channel: bool,
    kind: JobKind,
}

impl Job {
    /// Bytes left for the reply text in `PRIVMSG <target> :[<nick>, ]<text>`.
    fn reply_budget(&self) -> usize {
        let mut framing = "PRIVMSG ".len() + self.reply_to.len() + " :".len();
        if self.in_channel {
            framing += self.nick.len() + ", ".len();
        }
        MAX_IRC_LINE_BYTES.saturating_sub(framing)
    }
}

/// Everything to send back for one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub target: String,
    pub text: Option<String>,
    pub actions: Vec<BotAction>,
    /// Hold the reply back this long.
    pub delay: Duration,
}

impl Response {
    /// Actions first, then the reply.
    pub fn irc_lines(&self) -> Vec<String> {
        let mut lines: Vec<String> = self.actions.iter().map(BotAction::to_irc_line).collect();
        if let Some(text) = &self.text {
            lines.push(format!("PRIVMSG {} :{text}", self.target));
        }
        lines
    }

    pub fn quits(&self) -> bool {
        self.actions
            .iter()
            .any(|action| matches!(action, BotAction::Quit(_)))
    }
}

#[derive(Clone)]
pub struct CommandHandler {
    state: Arc<Mutex<BotState>>,
    evaluator: Arc<Evaluator>,
}

impl CommandHandler {
    pub fn new(state: Arc<Mutex<BotState>>, evaluator: Arc<Evaluator>) -> Self {
        Self { state, evaluator }
    }

    pub fn state(&self) -> &Arc<Mutex<BotState>> {
        &self.state
    }

    /// Screen and recognize a chat line. `None` means nothing is sent.
    pub async fn prepare(&self, msg: &ChatMessage) -> Option<Job> {
        self.prepare_at(msg, Instant::now()).await
    }

    async fn prepare_at(&self, msg: &ChatMessage, now: Instant) -> Option<Job> {
        let mut state = self.state.lock().await;
        let in_channel = msg.target != state.nickname;
        let reply_to = if in_channel {
            msg.target.clone()
        } else {
            msg.nick.clone()
        };

        if !state.is_command(&msg.text) {
            if !in_channel {
                info!("message from {}: {}", msg.nick, msg.text);
            }
            return None;
        }

        let kind = match state.screen(&msg.nick, &msg.text, now) {
            Screening::Ignore => return None,
            Screening::Warn(warning) => JobKind::Warning(warning),
            Screening::Dispatch => {
                let body = &msg.text[state.command_char.len()..];
                let (name, rest) = body.split_once(' ').unwrap_or((body, ""));
                let name = name.to_lowercase();
                let rest = rest.trim().to_string();
                let is_admin = state.is_admin(&msg.nick);
                if is_admin && ADMIN_COMMANDS.contains(&name.as_str()) {
                    JobKind::Admin { name, rest }
                } else if USER_COMMANDS.contains(&name.as_str()) {
                    JobKind::User { name, rest }
                } else {
                    if ADMIN_COMMANDS.contains(&name.as_str()) {
                        info!("ignoring admin command from {}: {}", msg.nick, msg.text);
                    }
                    return None;
                }
            }
        };

        if !matches!(kind, JobKind::Warning(_)) {
            state.throttle.last_command = Some(msg.text.clone());
        }
        if state.too_busy(&msg.nick) {
            info!("too busy, ignoring command: {}", msg.text);
            return None;
        }
        state.begin_request();
        state.mark_handled(&msg.nick, now);

        Some(Job {
            nick: msg.nick.clone(),
            reply_to,
            in_channel,
            kind,
        })
    }

    /// Run a prepared job and build the response.
    pub async fn execute(&self, job: Job) -> Response {
        let outcome = match &job.kind {
            JobKind::Warning(warning) => CommandOutcome::reply(warning.clone()),
            JobKind::User { name, rest } => self.run_user(name, rest, &job).await,
            JobKind::Admin { name, rest } => self.run_admin(name, rest, &job.nick).await,
        };
        let delay = self.state.lock().await.finish_request();
        if !delay.is_zero() {
            debug!("delaying reply to {} by {}s", job.nick, delay.as_secs());
        }

        let text = outcome.reply.filter(|text| !text.is_empty()).map(|text| {
            if job.in_channel {
                format!("{}, {text}", job.nick)
            } else {
                text
            }
        });
        Response {
            target: job.reply_to,
            text,
            actions: outcome.actions,
            delay,
        }
    }

    /// [`Self::prepare`] then [`Self::execute`].
    pub async fn handle(&self, msg: &ChatMessage) -> Option<Response> {
        let job = self.prepare(msg).await?;
        Some(self.execute(job).await)
    }

    async fn run_user(&self, name: &str, rest: &str, job: &Job) -> CommandOutcome {
        let nick = job.nick.as_str();
        match name {
            "help" => self.help(Role::User, rest, nick).await,
            "py" | "python" => self.python(rest, job).await,
            "pyval" => {
                if strip_blanks(rest).is_empty() {
                    let cc = self.state.lock().await.command_char.clone();
                    CommandOutcome::reply(format!("try {cc}help, {cc}py help, or {cc}help py"))
                } else {
                    info!("message from {nick}: {rest}");
                    CommandOutcome::silent()
                }
            }
            "time" => CommandOutcome::reply(humantime(&Local::now())),
            "uptime" => {
                let state = self.state.lock().await;
                CommandOutcome::reply(format!(
                    "start: {}, up: {}",
                    humantime(&state.started_at),
                    timefromsecs(state.uptime().as_secs())
                ))
            }
            "version" => CommandOutcome::reply(format!("PyVal: {}", env!("CARGO_PKG_VERSION"))),
            _ => CommandOutcome::silent(),
        }
    }

    async fn help(&self, role: Role, rest: &str, nick: &str) -> CommandOutcome {
        let state = self.state.lock().await;
        CommandOutcome::reply(state.help.describe(
            role,
            rest,
            &state.command_char,
            state.is_admin(nick),
        ))
    }

    async fn python(&self, rest: &str, job: &Job) -> CommandOutcome {
        let nick = job.nick.as_str();
        if rest.is_empty() {
            return CommandOutcome::silent();
        }
        if rest.to_lowercase().starts_with("help") {
            return self.help(Role::User, rest, nick).await;
        }

        let request =
            EvaluationRequest::from_chat(rest, nick).with_max_reply_bytes(job.reply_budget());
        let blacklist = self.state.lock().await.blacklist.clone();
        let result = self.evaluator.evaluate(&request, &blacklist).await;
        if let Err(err) = &result {
            info!("evaluation for {nick} failed: {err}");
        }
        CommandOutcome::reply(chat_reply(&result))
    }

    async fn run_admin(&self, name: &str, rest: &str, nick: &str) -> CommandOutcome {
        if name == "adminhelp" {
            return self.help(Role::Admin, rest, nick).await;
        }

        let mut state = self.state.lock().await;
        let cc = state.command_char.clone();
        let usage = |args: &str| CommandOutcome::reply(format!("usage: {cc}{name} {args}"));
        match name {
            "adminadd" => {
                if rest.is_empty() {
                    return usage("<nick>");
                }
                if !state.admins.insert(rest) {
                    return CommandOutcome::reply(format!("already an admin: {rest}"));
                }
                match state.admins.save() {
                    Ok(()) => CommandOutcome::reply(format!("added admin: {rest}")),
                    Err(err) => {
                        info!("unable to save admins: {err}");
                        CommandOutcome::reply(format!(
                            "unable to save admins, {rest} is not permanent."
                        ))
                    }
                }
            }
            "adminlist" => {
                CommandOutcome::reply(format!("admins: {}", state.admins.list().join(", ")))
            }
            "adminreload" => match state.admins.reload() {
                Ok(()) => CommandOutcome::reply("admins loaded."),
                Err(err) => CommandOutcome::reply(format!("unable to load admins: {err}")),
            },
            "adminrem" | "adminremove" => {
                if rest.is_empty() {
                    return usage("<nick>");
                }
                if !state.admins.remove(rest) {
                    return CommandOutcome::reply(format!("not an admin: {rest}"));
                }
                if let Err(err) = state.admins.save() {
                    info!("unable to save admins: {err}");
                }
                CommandOutcome::reply(format!("removed admin: {rest}"))
            }
            "ban" => {
                if rest.is_empty() {
                    return usage("<nick>");
                }
                let mut banned = Vec::new();
                let mut already = Vec::new();
                let mut refused = Vec::new();
                for target in rest.split_whitespace() {
                    if state.bans.is_banned(target) {
                        already.push(target);
                    } else if state.is_admin(target) || !state.bans.ban(target) {
                        refused.push(target);
                    } else {
                        banned.push(target);
                    }
                }
                let mut parts = Vec::new();
                if !banned.is_empty() {
                    parts.push(format!("banned: {}", banned.join(", ")));
                }
                if !already.is_empty() {
                    parts.push(format!("already banned: {}", already.join(", ")));
                }
                if !refused.is_empty() {
                    parts.push(format!("unable to ban: {}", refused.join(", ")));
                }
                CommandOutcome::reply(parts.join(", "))
            }
            "banned" => {
                let banned = state.bans.banned.list();
                if banned.is_empty() {
                    CommandOutcome::reply("nobody is banned.")
                } else {
                    CommandOutcome::reply(format!("currently banned: {}", banned.join(", ")))
                }
            }
            "banwarns" => {
                if state.bans.warnings.is_empty() {
                    return CommandOutcome::reply("no ban warnings issued.");
                }
                let warns = state
                    .bans
                    .warnings
                    .iter()
                    .map(|(warned, warning)| format!("[{warned}: {}]", warning.count))
                    .collect::<String>();
                CommandOutcome::reply(warns)
            }
            "blacklist" => {
                let current = state.blacklist.is_enabled();
                match toggle_option(current, rest) {
                    Some(enabled) => {
                        state.blacklist.set_enabled(enabled);
                        if enabled != current {
                            info!("{nick} set blacklist enabled: {enabled}");
                        }
                        CommandOutcome::reply(format!("blacklist enabled: {enabled}"))
                    }
                    None => {
                        CommandOutcome::reply("invalid value for blacklist option (true/false).")
                    }
                }
            }
            "channels" => {
                if state.roster.is_empty() {
                    CommandOutcome::reply("not in any channels.")
                } else {
                    CommandOutcome::reply(format!(
                        "current channels: {}",
                        state.roster.list().join(", ")
                    ))
                }
            }
            "id" | "identify" => {
                if rest.is_empty() {
                    return CommandOutcome::reply("no password supplied.");
                }
                info!("identifying with NickServ...");
                CommandOutcome::action(BotAction::Privmsg {
                    target: "NickServ".to_string(),
                    text: format!("IDENTIFY {} {rest}", state.nickname),
                })
            }
            "join" => {
                let channels = split_comma_list(rest);
                if channels.is_empty() {
                    return usage("<chan[,chan...]>");
                }
                let mut outcome = CommandOutcome::silent();
                let mut already = Vec::new();
                for channel in channels.iter().map(|chan| normalize_channel(chan)) {
                    if state.roster.insert(&channel) {
                        info!("joining: {channel}");
                        outcome.actions.push(BotAction::Join(channel));
                    } else {
                        already.push(channel);
                    }
                }
                if !already.is_empty() {
                    outcome.reply = Some(format!(
                        "Already in {}: {}",
                        plural_channels(already.len()),
                        already.join(", ")
                    ));
                }
                outcome
            }
            "limitrate" => match toggle_option(state.limit_rate, rest) {
                Some(enabled) => {
                    state.limit_rate = enabled;
                    CommandOutcome::reply(format!("limitrate enabled: {enabled}"))
                }
                None => CommandOutcome::reply("invalid value for limitrate option (true/false)."),
            },
            "me" => {
                let Some((channel, text)) = split_target(rest) else {
                    return usage("<channel> <text>");
                };
                let channel = normalize_channel(channel);
                if !state.roster.contains(&channel) {
                    return CommandOutcome::reply(format!("not in that channel: {channel}"));
                }
                CommandOutcome::action(BotAction::Action {
                    target: channel,
                    text: text.to_string(),
                })
            }
            "msg" => {
                let Some((target, text)) = split_target(rest) else {
                    return CommandOutcome::reply("need target and message.");
                };
                CommandOutcome::action(BotAction::Privmsg {
                    target: target.to_string(),
                    text: text.to_string(),
                })
            }
            "part" => {
                let channels = split_comma_list(rest);
                if channels.is_empty() {
                    return usage("<chan[,chan...]>");
                }
                let mut outcome = CommandOutcome::silent();
                let mut missing = Vec::new();
                for channel in channels.iter().map(|chan| normalize_channel(chan)) {
                    if state.roster.remove(&channel) {
                        info!("parting from: {channel}");
                        outcome.actions.push(BotAction::Part(channel));
                    } else {
                        missing.push(channel);
                    }
                }
                if !missing.is_empty() {
                    outcome.reply = Some(format!(
                        "Not in {}: {}",
                        plural_channels(missing.len()),
                        missing.join(", ")
                    ));
                }
                outcome
            }
            "partall" => {
                let parted = state.roster.clear();
                if parted.is_empty() {
                    return CommandOutcome::reply("not in any channels.");
                }
                info!("parting from all channels: {}", parted.join(", "));
                CommandOutcome {
                    reply: None,
                    actions: parted.into_iter().map(BotAction::Part).collect(),
                }
            }
            "say" => {
                info!("saying: {rest}");
                CommandOutcome::reply(rest)
            }
            "sendline" => {
                if rest.is_empty() {
                    return usage("<line>");
                }
                info!("sending line: {rest}");
                CommandOutcome::action(BotAction::Raw(rest.to_string()))
            }
            "shutdown" => {
                info!("shutdown requested by {nick}");
                CommandOutcome::action(BotAction::Quit(QUIT_MESSAGE.to_string()))
            }
            "stats" => CommandOutcome::reply(format!(
                "uptime: {}, handled: {}",
                timefromsecs(state.uptime().as_secs()),
                state.throttle.handled
            )),
            "unban" => {
                if rest.is_empty() {
                    return usage("<nick>");
                }
                let (unbanned, not_banned): (Vec<&str>, Vec<&str>) = rest
                    .split_whitespace()
                    .partition(|target| state.bans.unban(target));
                let mut parts = Vec::new();
                if !unbanned.is_empty() {
                    parts.push(format!("unbanned: {}", unbanned.join(", ")));
                }
                if !not_banned.is_empty() {
                    parts.push(format!("not banned: {}", not_banned.join(", ")));
                }
                CommandOutcome::reply(parts.join(", "))
            }
            _ => CommandOutcome::silent(),
        }
    }
}

/// `?` or nothing keeps the value, `-` flips it, otherwise a bool word.
fn toggle_option(current: bool, arg: &str) -> Option<bool> {
    match arg {
        "" | "?" => Some(current),
        "-" => Some(!current),
        word => parse_bool_word(word),
    }
}

fn split_target(rest: &str) -> Option<(&str, &str)> {
    let (target, text) = rest.split_once(char::is_whitespace)?;
    let text = text.trim();
    if target.is_empty() || text.is_empty() {
        return None;
    }
    Some((target, text))
}

fn plural_channels(count: usize) -> &'static str {
    if count == 1 { "channel" } else { "channels" }
}
