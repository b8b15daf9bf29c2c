use std::collections::BTreeMap;

use pyval_utils_string::strip_blanks;

use crate::config::BlacklistConfig;
use crate::error::PyvalErr;
use crate::error::Result;

/// Forbidden substrings and the refusal shown for each.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blacklist {
    enabled: bool,
    rules: BTreeMap<String, String>,
}

impl Blacklist {
    pub fn new(rules: BTreeMap<String, String>, enabled: bool) -> Self {
        Self { enabled, rules }
    }

    pub fn from_config(config: &BlacklistConfig) -> Self {
        Self::new(config.rules.clone(), config.enabled)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn rules(&self) -> impl Iterator<Item = (&str, &str)> {
        self.rules
            .iter()
            .map(|(pattern, message)| (pattern.as_str(), message.as_str()))
    }

    /// First rule matching `source` as written or with blanks removed.
    pub fn find_violation(&self, source: &str) -> Option<(&str, &str)> {
        let stripped = strip_blanks(source);
        self.rules()
            .find(|(pattern, _)| source.contains(pattern) || stripped.contains(pattern))
    }

    /// Ok when the list is disabled or nothing matches.
    pub fn check(&self, source: &str) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        match self.find_violation(source) {
            Some((pattern, message)) => Err(PyvalErr::BlacklistRejection {
                pattern: pattern.to_string(),
                message: message.to_string(),
            }),
            None => Ok(()),
        }
    }

    /// One `pattern: message` line per rule, patterns aligned.
    pub fn describe(&self) -> String {
        let width = self
            .rules
            .keys()
            .map(|pattern| pattern.chars().count())
            .max()
            .unwrap_or(0);
        self.rules()
            .map(|(pattern, message)| format!("{pattern:>width$}: {message}"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl Default for Blacklist {
    fn default() -> Self {
        Self::from_config(&BlacklistConfig::default())
    }
}
