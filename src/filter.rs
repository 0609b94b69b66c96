//! Module filtering by name and by metadata.
//!
//! A [`FilterSpec`] is built once per run and passed by reference; it never
//! changes after construction.
//!
//! # Name filters
//!
//! Include and exclude filters are [`TestFilter`] strings of the form
//! `[abi] module [test]`:
//!
//! | Filter | Effect on module `m` for abi `a` |
//! |--------|----------------------------------|
//! | `m` | matches every abi |
//! | `a m` | matches only abi `a` |
//! | `m test` / `a m test` | keeps the module; forwards `test` to its test object |
//!
//! An exclude wins over an include. Only module-level excludes (no test
//! part) remove a module; test-level excludes narrow what runs inside it.
//!
//! # Metadata filters
//!
//! Metadata filters map a key to acceptable values. A filter matches a module
//! when any of its `(key, value)` pairs appears in the module's metadata. An
//! empty filter map places no constraint.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::abi;
use crate::module::{Metadata, ModuleDef};

/// Errors from parsing filter strings.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FilterError {
    #[error("invalid filter '{0}', expected [abi] module [test]")]
    Malformed(String),
}

/// Metadata key → acceptable values.
pub type MetadataFilter = BTreeMap<String, BTreeSet<String>>;

/// A parsed `[abi] module [test]` filter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TestFilter {
    pub abi: Option<String>,
    pub module: String,
    pub test: Option<String>,
}

impl TestFilter {
    /// Parses a filter string.
    ///
    /// With two words, the first is taken as an abi only if it is a known
    /// abi name; otherwise the pair is `module test`.
    pub fn parse(filter: &str) -> Result<Self, FilterError> {
        let parts: Vec<&str> = filter.split_whitespace().collect();
        let malformed = || FilterError::Malformed(filter.to_string());
        let (abi, module, test) = match parts.as_slice() {
            [module] => (None, *module, None),
            [first, second] if abi::is_supported(first) => (Some(*first), *second, None),
            [module, test] => (None, *module, Some(*test)),
            [abi, module, test] => (Some(*abi), *module, Some(*test)),
            _ => return Err(malformed()),
        };
        Ok(Self {
            abi: abi.map(str::to_string),
            module: module.to_string(),
            test: test.map(str::to_string),
        })
    }

    /// Whether this filter names the module `name` for `abi`.
    pub fn applies_to(&self, abi: &str, name: &str) -> bool {
        self.module == name && self.abi.as_deref().is_none_or(|a| a == abi)
    }

    /// Module-level filters have no test part.
    pub fn is_module_level(&self) -> bool {
        self.test.is_none()
    }
}

impl fmt::Display for TestFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(abi) = &self.abi {
            write!(f, "{} ", abi)?;
        }
        f.write_str(&self.module)?;
        if let Some(test) = &self.test {
            write!(f, " {}", test)?;
        }
        Ok(())
    }
}

/// Include/exclude filters for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterSpec {
    pub include: Vec<TestFilter>,
    pub exclude: Vec<TestFilter>,
    pub metadata_include: MetadataFilter,
    pub metadata_exclude: MetadataFilter,
}

impl FilterSpec {
    /// Builds filters from raw include and exclude strings.
    pub fn from_strings(include: &[String], exclude: &[String]) -> Result<Self, FilterError> {
        Ok(Self {
            include: parse_all(include)?,
            exclude: parse_all(exclude)?,
            ..Default::default()
        })
    }

    pub fn with_metadata_include(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata_include
            .entry(key.into())
            .or_default()
            .insert(value.into());
        self
    }

    pub fn with_metadata_exclude(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata_exclude
            .entry(key.into())
            .or_default()
            .insert(value.into());
        self
    }

    /// Name phase: decides whether `(abi, name)` should be loaded at all.
    ///
    /// Runs before the module's config is parsed, so excluded modules are
    /// never read from disk.
    pub fn accepts_id(&self, abi: &str, name: &str) -> bool {
        let excluded = self
            .exclude
            .iter()
            .any(|f| f.is_module_level() && f.applies_to(abi, name));
        if excluded {
            return false;
        }
        self.include.is_empty() || self.include.iter().any(|f| f.applies_to(abi, name))
    }

    /// Metadata phase, evaluated on the parsed config.
    pub fn accepts_metadata(&self, metadata: &Metadata) -> bool {
        if !self.metadata_exclude.is_empty() && matches_any(&self.metadata_exclude, metadata) {
            return false;
        }
        self.metadata_include.is_empty() || matches_any(&self.metadata_include, metadata)
    }

    /// Both phases against a built module.
    pub fn accept(&self, module: &ModuleDef) -> bool {
        self.accepts_id(&module.abi().name, module.name()) && self.accepts_metadata(module.metadata())
    }

    /// Whether an include filter names this module explicitly.
    pub fn is_explicitly_included(&self, name: &str) -> bool {
        self.include.iter().any(|f| f.module == name)
    }

    /// Test-level include filters that apply to `(abi, name)`.
    pub fn test_includes<'a>(&'a self, abi: &'a str, name: &'a str) -> impl Iterator<Item = &'a str> {
        test_level(&self.include, abi, name)
    }

    /// Test-level exclude filters that apply to `(abi, name)`.
    pub fn test_excludes<'a>(&'a self, abi: &'a str, name: &'a str) -> impl Iterator<Item = &'a str> {
        test_level(&self.exclude, abi, name)
    }
}

fn parse_all(filters: &[String]) -> Result<Vec<TestFilter>, FilterError> {
    filters.iter().map(|f| TestFilter::parse(f)).collect()
}

fn test_level<'a>(
    filters: &'a [TestFilter],
    abi: &'a str,
    name: &'a str,
) -> impl Iterator<Item = &'a str> {
    filters
        .iter()
        .filter(move |f| f.applies_to(abi, name))
        .filter_map(|f| f.test.as_deref())
}

fn matches_any(filter: &MetadataFilter, metadata: &Metadata) -> bool {
    filter.iter().any(|(key, values)| {
        metadata
            .get(key)
            .is_some_and(|present| present.iter().any(|v| values.contains(v)))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(pairs: &[(&str, &str)]) -> Metadata {
        let mut metadata = Metadata::new();
        for (k, v) in pairs {
            metadata.entry(k.to_string()).or_default().push(v.to_string());
        }
        metadata
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_filters() {
        let f = TestFilter::parse("FooModuleA").unwrap();
        assert_eq!((f.abi, f.test), (None, None));

        let f = TestFilter::parse("arm64-v8a FooModuleA").unwrap();
        assert_eq!(f.abi.as_deref(), Some("arm64-v8a"));
        assert!(f.is_module_level());

        let f = TestFilter::parse("FooModuleA com.example.FooTest#testBar").unwrap();
        assert_eq!(f.abi, None);
        assert_eq!(f.test.as_deref(), Some("com.example.FooTest#testBar"));

        let f = TestFilter::parse("x86 FooModuleA FooTest").unwrap();
        assert_eq!(f.to_string(), "x86 FooModuleA FooTest");

        assert!(TestFilter::parse("").is_err());
        assert!(TestFilter::parse("a b c d").is_err());
    }

    #[test]
    fn test_include_and_exclude_by_name_and_id() {
        let spec = FilterSpec::from_strings(
            &strings(&["FooModuleA"]),
            &strings(&["armeabi-v7a FooModuleA", "FooModuleB"]),
        )
        .unwrap();

        assert!(!spec.accepts_id("armeabi-v7a", "FooModuleA"));
        assert!(spec.accepts_id("arm64-v8a", "FooModuleA"));
        assert!(!spec.accepts_id("arm64-v8a", "FooModuleB"));
        assert!(!spec.accepts_id("arm64-v8a", "FooModuleC"));
    }

    #[test]
    fn test_test_level_exclude_keeps_module() {
        let spec =
            FilterSpec::from_strings(&[], &strings(&["FooModuleA FooTest#testFlaky"])).unwrap();
        assert!(spec.accepts_id("arm64-v8a", "FooModuleA"));
        let excludes: Vec<_> = spec.test_excludes("arm64-v8a", "FooModuleA").collect();
        assert_eq!(excludes, vec!["FooTest#testFlaky"]);
    }

    #[test]
    fn test_accept_is_pure() {
        let spec = FilterSpec::from_strings(&strings(&["FooModuleA"]), &[]).unwrap();
        let first = spec.accepts_id("x86", "FooModuleA");
        let second = spec.accepts_id("x86", "FooModuleA");
        assert_eq!(first, second);
    }

    #[test]
    fn test_metadata_filter_empty_filters() {
        let spec = FilterSpec::default();
        assert!(spec.accepts_metadata(&Metadata::new()));
        assert!(spec.accepts_metadata(&metadata(&[("component", "foo")])));
    }

    #[test]
    fn test_metadata_filter_match_include() {
        let spec = FilterSpec::default().with_metadata_include("component", "foo");
        assert!(spec.accepts_metadata(&metadata(&[("component", "foo")])));
    }

    #[test]
    fn test_metadata_filter_no_match_include_mismatch_value() {
        let spec = FilterSpec::default().with_metadata_include("component", "bar");
        assert!(!spec.accepts_metadata(&metadata(&[("component", "foo")])));
    }

    #[test]
    fn test_metadata_filter_no_match_include_mismatch_key() {
        let spec = FilterSpec::default().with_metadata_include("group", "bar");
        assert!(!spec.accepts_metadata(&metadata(&[("component", "foo")])));
    }

    #[test]
    fn test_metadata_filter_match_exclude() {
        let spec = FilterSpec::default().with_metadata_exclude("component", "foo");
        assert!(!spec.accepts_metadata(&metadata(&[("component", "foo")])));
    }

    #[test]
    fn test_metadata_filter_no_match_exclude() {
        let spec = FilterSpec::default().with_metadata_exclude("component", "bar");
        assert!(spec.accepts_metadata(&metadata(&[("component", "foo")])));
        let spec = FilterSpec::default().with_metadata_exclude("group", "bar");
        assert!(spec.accepts_metadata(&metadata(&[("component", "foo")])));
    }

    #[test]
    fn test_metadata_filter_multiple_metadata_values() {
        let md = metadata(&[("component", "foo"), ("component", "bar")]);
        let include = FilterSpec::default().with_metadata_include("component", "foo");
        assert!(include.accepts_metadata(&md));
        let exclude = FilterSpec::default().with_metadata_exclude("component", "foo");
        assert!(!exclude.accepts_metadata(&md));
    }

    #[test]
    fn test_metadata_filter_multiple_filters() {
        let md = metadata(&[("component", "foo")]);
        let include = FilterSpec::default()
            .with_metadata_include("component", "foo")
            .with_metadata_include("component", "bar");
        assert!(include.accepts_metadata(&md));
        let exclude = FilterSpec::default()
            .with_metadata_exclude("component", "foo")
            .with_metadata_exclude("component", "bar");
        assert!(!exclude.accepts_metadata(&md));
    }

    #[test]
    fn test_metadata_filter_multiple_metadata_and_filters() {
        let md = metadata(&[("component", "foo1"), ("group", "bar1")]);
        let include = FilterSpec::default()
            .with_metadata_include("component", "foo1")
            .with_metadata_include("group", "bar2");
        assert!(include.accepts_metadata(&md));
        let exclude = FilterSpec::default()
            .with_metadata_exclude("component", "foo1")
            .with_metadata_exclude("group", "bar2");
        assert!(!exclude.accepts_metadata(&md));
    }

    #[test]
    fn test_metadata_filter_include_and_exclude() {
        let md = metadata(&[("component", "foo"), ("group", "bar1")]);
        let spec = FilterSpec::default()
            .with_metadata_include("component", "foo")
            .with_metadata_exclude("group", "bar2");
        assert!(spec.accepts_metadata(&md));
    }

    #[test]
    fn test_metadata_filter_include_then_exclude() {
        let md = metadata(&[("component", "foo"), ("group", "bar")]);
        let spec = FilterSpec::default()
            .with_metadata_include("component", "foo")
            .with_metadata_exclude("group", "bar");
        assert!(!spec.accepts_metadata(&md));
    }
}
