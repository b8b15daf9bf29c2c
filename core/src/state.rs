//! Process-wide bot state: blacklist toggle, channel roster, admins, bans and
//! request throttling.
//!
//! The bot keeps one [`BotState`] behind a `tokio::sync::Mutex`, so every
//! mutation made by an admin command is serialized.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;
use std::time::Instant;

use chrono::DateTime;
use chrono::Local;
use tracing::info;
use tracing::warn;

use crate::blacklist::Blacklist;
use crate::config::ADMINS_FILENAME;
use crate::config::BANNED_FILENAME;
use crate::config::Config;
use crate::error::Result;
use crate::help::HelpInfo;

pub const FIRST_WARNING: &str = "slow down with your commands.";
pub const LAST_WARNING: &str = "really, slow down with your commands.";
pub const BANNED_REPLY: &str = "no more.";

/// Prefix `#` unless the name already has it.
pub fn normalize_channel(name: &str) -> String {
    let name = name.trim();
    if name.starts_with('#') {
        name.to_string()
    } else {
        format!("#{name}")
    }
}

/// Channels the bot is currently in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelRoster {
    channels: BTreeSet<String>,
}

impl ChannelRoster {
    pub fn insert(&mut self, channel: &str) -> bool {
        self.channels.insert(normalize_channel(channel))
    }

    pub fn remove(&mut self, channel: &str) -> bool {
        self.channels.remove(&normalize_channel(channel))
    }

    pub fn contains(&self, channel: &str) -> bool {
        self.channels.contains(&normalize_channel(channel))
    }

    pub fn clear(&mut self) -> Vec<String> {
        std::mem::take(&mut self.channels).into_iter().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn list(&self) -> Vec<String> {
        self.channels.iter().cloned().collect()
    }
}

/// Nicks persisted one per line. Blank lines and `#` comments are skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NickList {
    path: Option<PathBuf>,
    nicks: BTreeSet<String>,
}

impl NickList {
    pub fn in_memory<I, S>(nicks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            path: None,
            nicks: nicks.into_iter().map(Into::into).collect(),
        }
    }

    /// Load `path`. When it does not exist yet, start from `seed`.
    pub fn load(path: PathBuf, seed: &[String]) -> Result<Self> {
        let nicks = match std::fs::read_to_string(&path) {
            Ok(contents) => parse_nick_lines(&contents),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                seed.iter().cloned().collect()
            }
            Err(err) => return Err(err.into()),
        };
        Ok(Self {
            path: Some(path),
            nicks,
        })
    }

    /// Re-read the backing file, if any.
    pub fn reload(&mut self) -> Result<()> {
        if let Some(path) = &self.path
            && path.exists()
        {
            self.nicks = parse_nick_lines(&std::fs::read_to_string(path)?);
        }
        Ok(())
    }

    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let mut contents = self.nicks.iter().cloned().collect::<Vec<_>>().join("\n");
        contents.push('\n');
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn contains(&self, nick: &str) -> bool {
        self.nicks.contains(nick)
    }

    pub fn insert(&mut self, nick: &str) -> bool {
        self.nicks.insert(nick.to_string())
    }

    pub fn remove(&mut self, nick: &str) -> bool {
        self.nicks.remove(nick)
    }

    pub fn list(&self) -> Vec<String> {
        self.nicks.iter().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.nicks.is_empty()
    }
}

fn parse_nick_lines(contents: &str) -> BTreeSet<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

pub type AdminList = NickList;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BanWarning {
    pub count: u32,
    pub last: Instant,
}

#[derive(Debug, Clone, Default)]
pub struct BanList {
    pub banned: NickList,
    pub warnings: BTreeMap<String, BanWarning>,
}

impl BanList {
    pub fn is_banned(&self, nick: &str) -> bool {
        self.banned.contains(nick)
    }

    /// Ban for good. False when already banned.
    pub fn ban(&mut self, nick: &str) -> bool {
        let added = self.banned.insert(nick);
        if added && let Err(err) = self.banned.save() {
            warn!("unable to save ban list: {err}");
        }
        added
    }

    /// Lift a ban and reset the nick's warnings.
    pub fn unban(&mut self, nick: &str) -> bool {
        let removed = self.banned.remove(nick);
        if removed {
            self.warnings.remove(nick);
            if let Err(err) = self.banned.save() {
                warn!("unable to save ban list: {err}");
            }
        }
        removed
    }
}

/// Bookkeeping for abuse throttling.
#[derive(Debug, Clone, Default)]
pub struct Throttle {
    pub last_handle: Option<Instant>,
    pub last_nick: Option<String>,
    pub last_command: Option<String>,
    /// Requests accepted but not yet answered.
    pub handling: usize,
    pub handled: u64,
}

/// What to do with an incoming command line before dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Screening {
    Dispatch,
    Ignore,
    /// Send this warning instead of running the command.
    Warn(String),
}

pub struct BotState {
    pub nickname: String,
    pub command_char: String,
    pub blacklist: Blacklist,
    pub roster: ChannelRoster,
    pub admins: AdminList,
    pub bans: BanList,
    pub throttle: Throttle,
    pub limit_rate: bool,
    pub msg_timelimit: Duration,
    pub banwarn_limit: u32,
    pub help: HelpInfo,
    pub started_at: DateTime<Local>,
    started: Instant,
}

impl BotState {
    /// State backed by the admin and ban files in `home`.
    pub fn load(config: &Config, home: &Path) -> Result<Self> {
        let mut state = Self::in_memory(config);
        state.admins = NickList::load(home.join(ADMINS_FILENAME), &config.bot.admins)?;
        state.bans.banned = NickList::load(home.join(BANNED_FILENAME), &[])?;
        state.help = HelpInfo::load(home)?;
        info!(
            "loaded {} admins, {} banned nicks",
            state.admins.list().len(),
            state.bans.banned.list().len()
        );
        Ok(state)
    }

    /// State with nothing persisted.
    pub fn in_memory(config: &Config) -> Self {
        Self {
            nickname: config.irc.nick.clone(),
            command_char: config.bot.command_char.clone(),
            blacklist: Blacklist::from_config(&config.blacklist),
            roster: ChannelRoster::default(),
            admins: NickList::in_memory(config.bot.admins.iter().cloned()),
            bans: BanList::default(),
            throttle: Throttle::default(),
            limit_rate: config.bot.limit_rate,
            msg_timelimit: Duration::from_secs(config.bot.msg_timelimit_secs),
            banwarn_limit: config.bot.banwarn_limit,
            help: HelpInfo::builtin(),
            started_at: Local::now(),
            started: Instant::now(),
        }
    }

    pub fn is_admin(&self, nick: &str) -> bool {
        self.admins.contains(nick)
    }

    pub fn is_command(&self, message: &str) -> bool {
        message.starts_with(&self.command_char)
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// Ban checks and flood throttling for a command line from `nick`.
    pub fn screen(&mut self, nick: &str, message: &str, now: Instant) -> Screening {
        if self.bans.is_banned(nick) {
            return Screening::Ignore;
        }

        let limit = self.msg_timelimit;
        let mut flooding = false;
        if self.is_command(message)
            && let (Some(last_handle), Some(last_nick)) =
                (self.throttle.last_handle, self.throttle.last_nick.as_deref())
        {
            let since_last = now.saturating_duration_since(last_handle);
            match self.bans.warnings.get_mut(nick) {
                Some(entry) if now.saturating_duration_since(entry.last) < limit => {
                    flooding = true;
                }
                Some(entry) => entry.last = now,
                None => flooding = last_nick == nick && since_last < limit,
            }
        }

        let warning = if flooding {
            self.ban_warn(nick, now)
        } else {
            None
        };
        if let Some(message) = warning {
            self.mark_handled(nick, now);
            return Screening::Warn(message);
        }
        if !self.is_admin(nick) && self.throttle.last_command.as_deref() == Some(message) {
            return Screening::Ignore;
        }
        Screening::Dispatch
    }

    /// Add a warning for `nick`; the last one is a permanent ban.
    /// Admins are never warned.
    pub fn ban_warn(&mut self, nick: &str, now: Instant) -> Option<String> {
        if self.is_admin(nick) {
            return None;
        }
        let entry = self
            .bans
            .warnings
            .entry(nick.to_string())
            .and_modify(|warning| {
                warning.count += 1;
                warning.last = now;
            })
            .or_insert(BanWarning {
                count: 1,
                last: now,
            });
        let count = entry.count;
        if count >= self.banwarn_limit {
            info!("banning {nick} after {count} warnings");
            self.bans.ban(nick);
            Some(BANNED_REPLY.to_string())
        } else if count + 1 == self.banwarn_limit {
            Some(LAST_WARNING.to_string())
        } else {
            Some(FIRST_WARNING.to_string())
        }
    }

    pub fn mark_handled(&mut self, nick: &str, now: Instant) {
        self.throttle.last_handle = Some(now);
        self.throttle.last_nick = Some(nick.to_string());
    }

    /// Whether a new request from a non-admin should be dropped for load.
    pub fn too_busy(&self, nick: &str) -> bool {
        self.limit_rate
            && !self.is_admin(nick)
            && self.throttle.handling > self.banwarn_limit as usize
    }

    pub fn begin_request(&mut self) {
        self.throttle.handling += 1;
    }

    /// Returns how long to hold the reply back under load.
    pub fn finish_request(&mut self) -> Duration {
        let delay = if self.throttle.handling > 1 {
            Duration::from_secs(2 * self.throttle.handling as u64)
        } else {
            Duration::ZERO
        };
        self.throttle.handling = self.throttle.handling.saturating_sub(1);
        self.throttle.handled += 1;
        delay
    }
}
