//! System status checker selection.
//!
//! A suite configures a list of checkers that run before and after every
//! module. Operators narrow that list with a whitelist and a blacklist, or
//! turn checking off altogether. Names that do not refer to a known checker
//! are rejected before any module is discovered.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// A whitelist or blacklist entry names no known checker.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{list} must contain valid checkers, '{name}' was not found")]
pub struct InvalidSystemStatusCheckerError {
    /// Which list the name came from: `whitelist` or `blacklist`.
    pub list: &'static str,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct CheckerSelection {
    /// Checkers configured for the suite, in run order.
    pub known: Vec<String>,
    pub whitelist: Vec<String>,
    pub blacklist: Vec<String>,
    pub skip_all: bool,
}

impl CheckerSelection {
    /// Fails on the first list entry that is not a known checker.
    pub fn validate(&self) -> Result<(), InvalidSystemStatusCheckerError> {
        let lists = [("whitelist", &self.whitelist), ("blacklist", &self.blacklist)];
        for (list, names) in lists {
            if let Some(name) = names.iter().find(|n| !self.known.contains(n)) {
                return Err(InvalidSystemStatusCheckerError {
                    list,
                    name: name.clone(),
                });
            }
        }
        Ok(())
    }

    /// Whether a checker passes the whitelist and blacklist.
    pub fn should_include(&self, checker: &str) -> bool {
        let included = self.whitelist.is_empty() || self.whitelist.iter().any(|c| c == checker);
        let excluded = self.blacklist.iter().any(|c| c == checker);
        included && !excluded
    }

    /// Validates the lists and returns the checkers to run, in configured
    /// order. Nothing runs when `skip_all` is set; the lists are not even
    /// validated then.
    pub fn active(&self) -> Result<Vec<&str>, InvalidSystemStatusCheckerError> {
        if self.skip_all {
            debug!("Skipping system status checkers");
            return Ok(Vec::new());
        }
        self.validate()?;
        Ok(self
            .known
            .iter()
            .map(String::as_str)
            .filter(|c| self.should_include(c))
            .collect())
    }
}
