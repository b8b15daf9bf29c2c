use std::path::PathBuf;

use clap::Parser;
use pyval_core::Config;
use pyval_utils_string::split_comma_list;

/// Command-line options for `pyval-bot`. Every option overrides the value
/// from the config file.
#[derive(Parser, Debug, Default)]
#[command(version, about = "IRC bot that evaluates python code in a sandbox.")]
pub struct Cli {
    /// Comma-separated channels to join.
    #[arg(long, short = 'c', value_name = "CHANNELS")]
    pub channels: Option<String>,

    /// Character (or string) that marks a command.
    #[arg(long = "commandchar", short = 'C', value_name = "CHAR")]
    pub command_char: Option<String>,

    /// Print the merged config as TOML and exit.
    #[arg(long = "dumpconfig", short = 'D', default_value_t = false)]
    pub dump_config: bool,

    /// Log all traffic sent and received. Passwords are masked.
    #[arg(long, short = 'd', default_value_t = false)]
    pub data: bool,

    /// Config file to use instead of `$PYVAL_HOME/pyval.toml`.
    #[arg(long = "config", short = 'f', value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Include user hosts in monitor logs.
    #[arg(long, short = 'i', default_value_t = false)]
    pub ips: bool,

    /// Read the server password from stdin (`user:password` is accepted).
    #[arg(long = "loginpw", short = 'L', default_value_t = false)]
    pub login_password: bool,

    /// Log to `$PYVAL_HOME/pyval.log` instead of stderr.
    #[arg(long, short = 'l', default_value_t = false)]
    pub logfile: bool,

    /// Log every message the bot sees.
    #[arg(long, short = 'm', default_value_t = false)]
    pub monitor: bool,

    /// Nick to use.
    #[arg(long, short = 'n', value_name = "NICK")]
    pub nick: Option<String>,

    /// Read the NickServ password from stdin.
    #[arg(long, short = 'P', default_value_t = false)]
    pub password: bool,

    #[arg(long, short = 'p', value_name = "PORT")]
    pub port: Option<u16>,

    #[arg(long, short = 's', value_name = "HOST")]
    pub server: Option<String>,

    /// Login name, optionally `user:password`.
    #[arg(long, short = 'U', value_name = "USER")]
    pub username: Option<String>,

    /// Don't log heartbeat messages.
    #[arg(long = "noheartbeat", short = 'b', default_value_t = false)]
    pub no_heartbeat: bool,

    /// Log at debug level.
    #[arg(long, default_value_t = false)]
    pub debug: bool,
}

impl Cli {
    /// Layer the command-line options over `config`.
    pub fn apply(&self, config: &mut Config) {
        let irc = &mut config.irc;
        if let Some(channels) = &self.channels {
            irc.channels = split_comma_list(channels);
        }
        if let Some(nick) = &self.nick {
            irc.nick = nick.clone();
        }
        if let Some(port) = self.port {
            irc.port = port;
        }
        if let Some(server) = &self.server {
            irc.server = server.clone();
        }
        if let Some(username) = &self.username {
            irc.username = Some(username.clone());
        }
        irc.monitor_data |= self.data;
        irc.monitor_ips |= self.ips;
        irc.monitor |= self.monitor;
        irc.no_heartbeat_log |= self.no_heartbeat;
        irc.logfile |= self.logfile;

        if let Some(command_char) = &self.command_char {
            config.bot.command_char = command_char.clone();
        }
    }
}
