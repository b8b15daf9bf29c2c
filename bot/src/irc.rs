//! Just enough of the IRC line format for the bot.

use std::borrow::Cow;

/// CTCP delimiter.
pub const CTCP_DELIM: char = '\u{1}';

/// One parsed protocol line: `[:prefix] COMMAND params... [:trailing]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrcMessage {
    pub prefix: Option<String>,
    pub command: String,
    /// Middle params followed by the trailing param, if any.
    pub params: Vec<String>,
}

impl IrcMessage {
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        let (prefix, rest) = match line.strip_prefix(':') {
            Some(stripped) => {
                let (prefix, rest) = stripped.split_once(' ')?;
                (Some(prefix.to_string()), rest)
            }
            None => (None, line),
        };

        let (middle, trailing) = match rest.split_once(" :") {
            Some((middle, trailing)) => (middle, Some(trailing)),
            None => match rest.strip_prefix(':') {
                Some(trailing) => ("", Some(trailing)),
                None => (rest, None),
            },
        };

        let mut words = middle.split(' ').filter(|word| !word.is_empty());
        let command = words.next()?.to_uppercase();
        let mut params: Vec<String> = words.map(str::to_string).collect();
        if let Some(trailing) = trailing {
            params.push(trailing.to_string());
        }
        Some(Self {
            prefix,
            command,
            params,
        })
    }

    pub fn param(&self, index: usize) -> Option<&str> {
        self.params.get(index).map(String::as_str)
    }

    /// Last param, which carries the text of PRIVMSG, NOTICE and numerics.
    pub fn text(&self) -> &str {
        self.params.last().map(String::as_str).unwrap_or_default()
    }

    /// Sender nick, when the prefix is a user mask (`nick!user@host`).
    pub fn nick(&self) -> Option<&str> {
        let prefix = self.prefix.as_deref()?;
        let (nick, _) = prefix.split_once('!')?;
        Some(nick)
    }

    /// `user@host` part of a user mask.
    pub fn host(&self) -> Option<&str> {
        let prefix = self.prefix.as_deref()?;
        prefix.split_once('!').map(|(_, host)| host)
    }
}

/// The CTCP command and argument of a `\x01CMD args\x01` payload.
pub fn parse_ctcp(text: &str) -> Option<(String, &str)> {
    let inner = text.strip_prefix(CTCP_DELIM)?;
    let inner = inner.strip_suffix(CTCP_DELIM).unwrap_or(inner);
    let (command, args) = inner.split_once(' ').unwrap_or((inner, ""));
    Some((command.to_uppercase(), args))
}

pub fn ctcp_reply(nick: &str, command: &str, reply: &str) -> String {
    format!("NOTICE {nick} :{CTCP_DELIM}{command} {reply}{CTCP_DELIM}")
}

/// Hide passwords in a line before it is written to a log.
pub fn mask_secrets(line: &str) -> Cow<'_, str> {
    if line.starts_with("PASS ") {
        return Cow::Borrowed("PASS ********");
    }
    const TO_NICKSERV: &str = "PRIVMSG NickServ :";
    if let Some(head) = line.get(..TO_NICKSERV.len())
        && head.eq_ignore_ascii_case(TO_NICKSERV)
    {
        let text = &line[TO_NICKSERV.len()..];
        let mut words = text.split(' ');
        if let Some(command) = words.next()
            && command.eq_ignore_ascii_case("identify")
        {
            let nick = words.next().unwrap_or_default();
            return Cow::Owned(format!("PRIVMSG NickServ :{command} {nick} ********"));
        }
    }
    Cow::Borrowed(line)
}

/// Split `user:password` as accepted by `--username`.
pub fn split_login(login: &str) -> (String, Option<String>) {
    match login.split_once(':') {
        Some((user, password)) if !password.is_empty() => {
            (user.to_string(), Some(password.to_string()))
        }
        Some((user, _)) => (user.to_string(), None),
        None => (login.to_string(), None),
    }
}
