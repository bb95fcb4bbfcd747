// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The registry of named agents a connection can advertise itself as,
//! answering `ask`-verdict rules that name it.

use std::collections::HashMap;
use thiserror::Error;

/// Errors [`AgentRegistry::add`]/[`AgentRegistry::remove_by_name`] report.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AgentError {
    /// An agent with this name is already registered.
    #[error("agent already exists")]
    Exists,
    /// The name fails [`is_valid_name`].
    #[error("invalid agent name")]
    BadName,
    /// No agent with this name is registered.
    #[error("agent not found")]
    NotFound,
}

/// Whether `name` is a legal agent name: 1 to 255 characters, each
/// alphanumeric or one of `@_-$`.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 255
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '@' | '_' | '-' | '$'))
}

/// Maps agent names to the connection currently answering for them.
#[derive(Default)]
pub struct AgentRegistry {
    agents: HashMap<String, u64>,
}

impl AgentRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name` as answered by connection `holder`.
    pub fn add(&mut self, name: &str, holder: u64) -> Result<(), AgentError> {
        if !is_valid_name(name) {
            return Err(AgentError::BadName);
        }
        if self.agents.contains_key(name) {
            return Err(AgentError::Exists);
        }
        self.agents.insert(name.to_string(), holder);
        Ok(())
    }

    /// Unregister `name`.
    pub fn remove_by_name(&mut self, name: &str) -> Result<(), AgentError> {
        self.agents.remove(name).map(|_| ()).ok_or(AgentError::NotFound)
    }

    /// Unregister whatever agent names `holder` is currently answering
    /// for — used on disconnect.
    pub fn remove_by_holder(&mut self, holder: u64) {
        self.agents.retain(|_, &mut h| h != holder);
    }

    /// The connection currently answering for `name`, if any.
    pub fn lookup(&self, name: &str) -> Option<u64> {
        self.agents.get(name).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_the_allowed_character_set() {
        assert!(is_valid_name("vasum@session-1_ok$"));
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("bad name"));
        assert!(!is_valid_name(&"a".repeat(256)));
    }

    #[test]
    fn rejects_duplicate_names() {
        let mut reg = AgentRegistry::new();
        reg.add("vasum", 1).unwrap();
        assert_eq!(reg.add("vasum", 2), Err(AgentError::Exists));
    }

    #[test]
    fn disconnect_clears_all_names_for_that_holder() {
        let mut reg = AgentRegistry::new();
        reg.add("a", 1).unwrap();
        reg.add("b", 1).unwrap();
        reg.add("c", 2).unwrap();
        reg.remove_by_holder(1);
        assert_eq!(reg.lookup("a"), None);
        assert_eq!(reg.lookup("b"), None);
        assert_eq!(reg.lookup("c"), Some(2));
    }
}
