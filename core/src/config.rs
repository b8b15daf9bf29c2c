//! On-disk configuration (`<home>/pyval.toml`).
//!
//! Every field has a default so an empty or missing file yields a working
//! setup; command-line flags are layered on top by the binaries.

use std::collections::BTreeMap;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::error::PyvalErr;
use crate::error::Result;
use crate::sanitize::OutputLimits;

pub const CONFIG_FILENAME: &str = "pyval.toml";
pub const ADMINS_FILENAME: &str = "pyval_admins.lst";
pub const BANNED_FILENAME: &str = "pyval_banned.lst";
pub const HELP_FILENAME: &str = "pyval_help.json";
pub const LOG_FILENAME: &str = "pyval.log";
pub const PID_FILENAME: &str = "pyval.pid";

pub const DEFAULT_SANDBOX_PROGRAM: &str = "pypy-sandbox";
pub const DEFAULT_SANDBOX_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 64 * 1024;
pub const DEFAULT_PASTE_PROGRAM: &str = "pastebinit";

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub irc: IrcConfig,
    pub bot: BotConfig,
    pub sandbox: SandboxConfig,
    pub paste: PasteConfig,
    pub output: OutputConfig,
    pub blacklist: BlacklistConfig,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct IrcConfig {
    pub server: String,
    pub port: u16,
    pub nick: String,
    /// Login name; `user:password` sends the password with `PASS`.
    pub username: Option<String>,
    /// Channels joined after registration. Empty means `##<nick>`.
    pub channels: Vec<String>,
    /// Log every PRIVMSG seen.
    pub monitor: bool,
    /// Log every raw line sent and received (passwords masked).
    pub monitor_data: bool,
    /// Include user hosts in monitor logs.
    pub monitor_ips: bool,
    /// Don't log heartbeat PONGs.
    pub no_heartbeat_log: bool,
    /// Log to `<home>/pyval.log` instead of stderr.
    pub logfile: bool,
}

impl Default for IrcConfig {
    fn default() -> Self {
        Self {
            server: "irc.libera.chat".to_string(),
            port: 6667,
            nick: "pyval".to_string(),
            username: None,
            channels: Vec::new(),
            monitor: false,
            monitor_data: false,
            monitor_ips: false,
            no_heartbeat_log: false,
            logfile: false,
        }
    }
}

impl IrcConfig {
    /// Channels to join on connect, normalized with a leading `#`.
    pub fn join_channels(&self) -> Vec<String> {
        if self.channels.is_empty() {
            return vec![format!("##{}", self.nick)];
        }
        self.channels
            .iter()
            .map(|chan| crate::state::normalize_channel(chan))
            .collect()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct BotConfig {
    /// Prefix marking a message as a command.
    pub command_char: String,
    /// Nicks seeded into the admin list when no admin file exists yet.
    pub admins: Vec<String>,
    /// Drop non-admin commands while too many requests are in flight.
    pub limit_rate: bool,
    /// Minimum seconds between commands from one nick before a ban warning.
    pub msg_timelimit_secs: u64,
    /// Warnings before a permanent ban; also the in-flight request ceiling.
    pub banwarn_limit: u32,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            command_char: "!".to_string(),
            admins: Vec::new(),
            limit_rate: true,
            msg_timelimit_secs: 3,
            banwarn_limit: 3,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SandboxConfig {
    /// Sandbox executable; a bare name is searched for on PATH.
    pub program: String,
    /// Arguments; `{timeout}` and `{sandbox_dir}` are expanded.
    pub args: Vec<String>,
    /// Directory exposed to the sandbox as its tmp dir.
    /// Defaults to `<home>/pyval_sandbox`.
    pub sandbox_dir: Option<PathBuf>,
    pub timeout_secs: u64,
    /// Per-stream capture cap.
    pub max_output_bytes: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            program: DEFAULT_SANDBOX_PROGRAM.to_string(),
            args: vec![
                "--timeout={timeout}".to_string(),
                "--tmp={sandbox_dir}".to_string(),
                "/tmp/pyval_sandbox.py".to_string(),
            ],
            sandbox_dir: None,
            timeout_secs: DEFAULT_SANDBOX_TIMEOUT_SECS,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }
}

impl SandboxConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn resolved_sandbox_dir(&self, home: &Path) -> PathBuf {
        self.sandbox_dir
            .clone()
            .unwrap_or_else(|| home.join("pyval_sandbox"))
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct PasteConfig {
    pub enabled: bool,
    /// Paste CLI; reads the document on stdin and prints a URL.
    pub program: String,
    /// Arguments; `{title}` and `{author}` are expanded.
    pub args: Vec<String>,
    pub title: String,
    pub timeout_secs: u64,
}

impl Default for PasteConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            program: DEFAULT_PASTE_PROGRAM.to_string(),
            args: vec![
                "-t".to_string(),
                "{title}".to_string(),
                "-a".to_string(),
                "{author}".to_string(),
            ],
            title: "PyVal Evaluation Results".to_string(),
            timeout_secs: 10,
        }
    }
}

impl PasteConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    pub max_lines: usize,
    pub max_line_chars: usize,
    /// Longest reply sent inline before the output is pasted.
    pub inline_max_chars: usize,
    /// Length of the excerpt kept inline next to a paste link.
    pub excerpt_chars: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            max_lines: 65,
            max_line_chars: 240,
            inline_max_chars: 160,
            excerpt_chars: 100,
        }
    }
}

impl OutputConfig {
    pub fn inline_limits(&self) -> OutputLimits {
        OutputLimits {
            max_lines: self.max_lines,
            max_line_chars: self.max_line_chars,
            max_total_chars: self.inline_max_chars,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct BlacklistConfig {
    /// Initial state of the process-wide toggle.
    pub enabled: bool,
    /// Forbidden substring -> refusal message.
    pub rules: BTreeMap<String, String>,
}

impl Default for BlacklistConfig {
    fn default() -> Self {
        let rules = [
            ("__bases__", "too complicated for this bot."),
            ("__import__", "no __import__ allowed."),
            ("__subclasses__", "too complicated for this bot."),
            ("builtin", "no builtins allowed."),
            ("eval(", "no eval() allowed."),
            ("exec(", "no exec() allowed."),
            ("exit", "no exit allowed."),
            ("help(", "no help() allowed."),
            ("import", "no imports allowed."),
            ("KABOOM", "no way."),
            ("kaboom", "no way."),
            ("open", "no open() allowed."),
            ("os.", "no os module allowed."),
            ("self", "no self allowed."),
            ("super", "no super() allowed."),
            ("sys", "no sys allowed."),
            ("SystemExit", "no SystemExit allowed."),
        ]
        .into_iter()
        .map(|(pattern, message)| (pattern.to_string(), message.to_string()))
        .collect();
        Self {
            enabled: false,
            rules,
        }
    }
}

impl Config {
    pub fn default_path(home: &Path) -> PathBuf {
        home.join(CONFIG_FILENAME)
    }

    /// Load `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("no config file at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(err) => return Err(err.into()),
        };
        let config = Self::from_toml_str(&contents).map_err(|message| PyvalErr::Config {
            path: path.to_path_buf(),
            message,
        })?;
        tracing::info!("loaded config file: {}", path.display());
        Ok(config)
    }

    fn from_toml_str(contents: &str) -> std::result::Result<Self, String> {
        let config: Self = toml::from_str(contents).map_err(|err| err.to_string())?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if self.bot.command_char.trim().is_empty() {
            return Err("bot.command_char must not be empty".to_string());
        }
        if self.sandbox.timeout_secs == 0 {
            return Err("sandbox.timeout_secs must be at least 1".to_string());
        }
        if self.output.max_lines == 0 || self.output.max_line_chars == 0 {
            return Err("output limits must be at least 1".to_string());
        }
        Ok(())
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|err| PyvalErr::Config {
            path: PathBuf::from(CONFIG_FILENAME),
            message: err.to_string(),
        })
    }
}
