//! Module descriptors.
//!
//! A [`ModuleDef`] is one test module instantiated for one ABI: the unit the
//! filter engine accepts or rejects and the partitioner assigns to shards.
//! Its identity is the `(abi, name)` pair, rendered as the id
//! `"<abi> <name>"`.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::abi::{Abi, create_id};
use crate::runnable::Test;
use crate::token;

/// Runtime hint assumed for modules that do not declare one.
pub const DEFAULT_RUNTIME_HINT: Duration = Duration::from_secs(60);

/// Metadata key → ordered values, from `config-descriptor:metadata` options.
pub type Metadata = BTreeMap<String, Vec<String>>;

/// A setup step declared by a module config.
///
/// Token requirements are decoded from the preparer list while the config is
/// parsed, so nothing downstream has to look inside generic preparers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PreparerSpec {
    /// The module can only run on a device holding `token`.
    TokenRequirement { token: String },

    /// Any other preparer, kept for the runner.
    Generic {
        class: String,
        options: Vec<(String, String)>,
    },
}

/// One test module for one ABI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleDef {
    id: String,
    name: String,
    abi: Abi,
    description: String,
    test: Test,
    preparers: Vec<PreparerSpec>,
    metadata: Metadata,
    tokens: BTreeSet<String>,
}

impl ModuleDef {
    /// Builds a descriptor and decodes its token requirement.
    pub fn new(
        name: impl Into<String>,
        abi: Abi,
        test: Test,
        preparers: Vec<PreparerSpec>,
        metadata: Metadata,
    ) -> Self {
        let name = name.into();
        let tokens = token::classify(&preparers).unwrap_or_default();
        Self {
            id: create_id(&abi.name, &name),
            name,
            abi,
            description: String::new(),
            test,
            preparers,
            metadata,
            tokens,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// The `"<abi> <name>"` id.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn abi(&self) -> &Abi {
        &self.abi
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn test(&self) -> &Test {
        &self.test
    }

    pub fn preparers(&self) -> &[PreparerSpec] {
        &self.preparers
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Tokens a device must hold to run this module; empty if none.
    pub fn tokens(&self) -> &BTreeSet<String> {
        &self.tokens
    }

    pub fn requires_token(&self) -> bool {
        !self.tokens.is_empty()
    }

    /// Expected execution time; zero or missing hints use
    /// [`DEFAULT_RUNTIME_HINT`].
    pub fn runtime_hint(&self) -> Duration {
        match self.test.object().runtime_hint() {
            Some(hint) if !hint.is_zero() => hint,
            _ => DEFAULT_RUNTIME_HINT,
        }
    }

    /// Partition weight in milliseconds.
    pub fn weight(&self) -> u64 {
        u64::try_from(self.runtime_hint().as_millis()).unwrap_or(u64::MAX)
    }

    /// Returns one child descriptor per shard of a self-shardable test.
    ///
    /// Children share the parent's id, abi, preparers and metadata. Plain
    /// tests come back unchanged.
    pub fn split(self, count: usize) -> Vec<ModuleDef> {
        if !self.test.is_self_shardable() || count <= 1 {
            return vec![self];
        }
        let ModuleDef {
            id,
            name,
            abi,
            description,
            test,
            preparers,
            metadata,
            tokens,
        } = self;
        test.split(count)
            .into_iter()
            .map(|child| ModuleDef {
                id: id.clone(),
                name: name.clone(),
                abi: abi.clone(),
                description: description.clone(),
                test: child,
                preparers: preparers.clone(),
                metadata: metadata.clone(),
                tokens: tokens.clone(),
            })
            .collect()
    }
}

impl fmt::Display for ModuleDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.test.object().slot() {
            Some(slot) => write!(f, "{} [{}/{}]", self.id, slot.index, slot.count),
            None => f.write_str(&self.id),
        }
    }
}

/// Counts distinct module ids, so split children count once.
pub fn count_unique(modules: &[ModuleDef]) -> usize {
    modules
        .iter()
        .map(|m| m.id())
        .collect::<BTreeSet<_>>()
        .len()
}
