use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use serde::Serialize;
use tracing::info;
use tracing::warn;

use crate::config::HELP_FILENAME;
use crate::error::Result;

const BUILTIN_HELP: &str = include_str!("help.json");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Admin,
}

impl Role {
    fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct HelpEntry {
    #[serde(default)]
    pub args: String,
    pub desc: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct HelpInfo {
    #[serde(default)]
    pub user: BTreeMap<String, HelpEntry>,
    #[serde(default)]
    pub admin: BTreeMap<String, HelpEntry>,
}

impl HelpInfo {
    pub fn builtin() -> Self {
        serde_json::from_str(BUILTIN_HELP).unwrap_or_else(|err| {
            warn!("built-in help is invalid: {err}");
            Self::default()
        })
    }

    /// `<home>/pyval_help.json` when present, else the built-in entries.
    pub fn load(home: &Path) -> Result<Self> {
        let path = home.join(HELP_FILENAME);
        if !path.exists() {
            return Ok(Self::builtin());
        }
        let help = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        info!("loaded help from {}", path.display());
        Ok(help)
    }

    fn entries(&self, role: Role) -> &BTreeMap<String, HelpEntry> {
        match role {
            Role::User => &self.user,
            Role::Admin => &self.admin,
        }
    }

    /// Help text for `query`: one command, or the whole list when empty.
    ///
    /// `py`, `help py`, `help(py)` and `help('py')` all name the same command.
    pub fn describe(&self, role: Role, query: &str, command_char: &str, is_admin: bool) -> String {
        if self.user.is_empty() && self.admin.is_empty() {
            return "help isn't available right now.".to_string();
        }

        match normalize_query(query) {
            Some(name) => match self.entries(role).get(&name) {
                Some(entry) if entry.args.is_empty() => {
                    format!("{command_char}{name}: {}", entry.desc)
                }
                Some(entry) => format!("{command_char}{name} {}: {}", entry.args, entry.desc),
                None => format!("no {} command named: {name}", role.as_str()),
            },
            None => {
                let mut names: Vec<&str> = Vec::new();
                if role == Role::User && is_admin {
                    names.push("adminhelp");
                }
                names.extend(self.entries(role).keys().map(String::as_str));
                format!("{} commands: {}", role.as_str(), names.join(", "))
            }
        }
    }
}

fn normalize_query(query: &str) -> Option<String> {
    let cleaned: String = query
        .chars()
        .map(|c| if c == '(' { ' ' } else { c })
        .filter(|c| !matches!(c, ')' | '\'' | '"'))
        .collect();
    let mut words: Vec<&str> = cleaned.split_whitespace().collect();
    if words.first().is_some_and(|word| word.eq_ignore_ascii_case("help")) {
        words.remove(0);
    }
    words.first().map(|word| word.to_lowercase())
}
