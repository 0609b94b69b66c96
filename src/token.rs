//! Device capability tokens.
//!
//! Some modules need a physical capability on the device (a SIM card, an
//! accessory). They declare it with a `TokenRequirement` preparer, and the
//! operator tells the harness which device holds which token with
//! `--device-token <serial>:<token>`.

use std::collections::{BTreeMap, BTreeSet};

use crate::module::PreparerSpec;

/// Errors from parsing device token arguments.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("could not parse device token '{0}', expected <serial>:<token>")]
    Malformed(String),
}

/// Returns the tokens a preparer list requires, or `None` if it requires
/// none.
pub fn classify(preparers: &[PreparerSpec]) -> Option<BTreeSet<String>> {
    let tokens: BTreeSet<String> = preparers
        .iter()
        .filter_map(|p| match p {
            PreparerSpec::TokenRequirement { token } => Some(token.clone()),
            PreparerSpec::Generic { .. } => None,
        })
        .collect();
    (!tokens.is_empty()).then_some(tokens)
}

/// Device serial → tokens held by that device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenRegistry {
    tokens: BTreeMap<String, BTreeSet<String>>,
    order: Vec<String>,
}

impl TokenRegistry {
    /// Parses `"<serial>:<token>"` strings.
    ///
    /// A serial may appear several times to hold several tokens. Devices are
    /// remembered in order of first appearance.
    pub fn from_device_tokens(entries: &[String]) -> Result<Self, TokenError> {
        let mut registry = Self::default();
        for entry in entries {
            let parts: Vec<&str> = entry.split(':').collect();
            let [serial, token] = parts.as_slice() else {
                return Err(TokenError::Malformed(entry.clone()));
            };
            if serial.is_empty() || token.is_empty() {
                return Err(TokenError::Malformed(entry.clone()));
            }
            registry.insert(serial, token);
        }
        Ok(registry)
    }

    fn insert(&mut self, serial: &str, token: &str) {
        if !self.tokens.contains_key(serial) {
            self.order.push(serial.to_string());
        }
        self.tokens
            .entry(serial.to_string())
            .or_default()
            .insert(token.to_string());
    }

    /// Tokens held by a device, if it holds any.
    pub fn tokens_for(&self, serial: &str) -> Option<&BTreeSet<String>> {
        self.tokens.get(serial)
    }

    /// Devices in first-appearance order.
    pub fn devices(&self) -> &[String] {
        &self.order
    }

    /// Whether `serial` holds every token in `required`.
    pub fn satisfies(&self, serial: &str, required: &BTreeSet<String>) -> bool {
        self.tokens_for(serial)
            .is_some_and(|held| held.is_superset(required))
    }

    pub fn as_map(&self) -> &BTreeMap<String, BTreeSet<String>> {
        &self.tokens
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}
