//! Test classes and the test objects modules wrap.
//!
//! A module config names its test by class (`<test class="...">`). The
//! [`ClassRegistry`] is the explicit schema of those classes: which options
//! each accepts and whether it can split itself into shards. Instantiating a
//! class yields a [`Test`], which the partitioner inspects by variant rather
//! than by probing for capabilities at runtime.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::abi::Abi;
use crate::module::DEFAULT_RUNTIME_HINT;
use crate::options::{OptionError, OptionKind, OptionSchema, OptionSet};

/// Option every test class accepts: the module's base name.
pub const MODULE_OPTION: &str = "module";

/// Option every test class accepts: expected execution time.
pub const RUNTIME_HINT_OPTION: &str = "runtime-hint";

/// Declaration of a test class.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct TestClass {
    /// Options the class accepts, beyond the implicit `module` and
    /// `runtime-hint`.
    #[serde(default)]
    pub options: OptionSchema,

    /// Whether the class can produce shard `i` of `n` of itself.
    #[serde(default)]
    pub shardable: bool,
}

impl TestClass {
    /// Declares an option on this class.
    pub fn with_option(mut self, name: impl Into<String>, kind: OptionKind) -> Self {
        self.options.insert(name.into(), kind);
        self
    }

    /// Marks the class as able to split itself.
    pub fn shardable(mut self) -> Self {
        self.shardable = true;
        self
    }

    fn schema(&self) -> OptionSchema {
        let mut schema = self.options.clone();
        schema.insert(MODULE_OPTION.to_string(), OptionKind::String);
        schema.insert(RUNTIME_HINT_OPTION.to_string(), OptionKind::Duration);
        schema
    }
}

/// Known test classes, keyed by fully qualified class name.
#[derive(Debug, Clone, Default)]
pub struct ClassRegistry {
    classes: BTreeMap<String, TestClass>,
}

impl ClassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a class, builder style.
    pub fn with_class(mut self, name: impl Into<String>, class: TestClass) -> Self {
        self.register(name, class);
        self
    }

    /// Adds or replaces a class.
    pub fn register(&mut self, name: impl Into<String>, class: TestClass) {
        self.classes.insert(name.into(), class);
    }

    pub fn get(&self, name: &str) -> Option<&TestClass> {
        self.classes.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Creates a fresh test of the named class, or `None` if unknown.
    pub fn instantiate(&self, name: &str) -> Option<Test> {
        let class = self.classes.get(name)?;
        let object = TestObject::new(name, class.schema());
        Some(if class.shardable {
            Test::SelfShardable(object)
        } else {
            Test::Plain(object)
        })
    }
}

/// Position of a child test produced by splitting a shardable test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ShardSlot {
    pub index: usize,
    pub count: usize,
}

/// The configured state of one test: its options, abi and filters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestObject {
    class_name: String,
    options: OptionSet,
    abi: Option<Abi>,
    include_filters: BTreeSet<String>,
    exclude_filters: BTreeSet<String>,
    slot: Option<ShardSlot>,
}

impl TestObject {
    fn new(class_name: &str, schema: OptionSchema) -> Self {
        Self {
            class_name: class_name.to_string(),
            options: OptionSet::new(schema),
            abi: None,
            include_filters: BTreeSet::new(),
            exclude_filters: BTreeSet::new(),
            slot: None,
        }
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn options(&self) -> &OptionSet {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut OptionSet {
        &mut self.options
    }

    /// Sets a single option value, as an `<option>` element would.
    pub fn set_option(&mut self, name: &str, value: &str) -> Result<(), OptionError> {
        self.options.set(name, value)
    }

    pub fn abi(&self) -> Option<&Abi> {
        self.abi.as_ref()
    }

    pub fn set_abi(&mut self, abi: Abi) {
        self.abi = Some(abi);
    }

    pub fn add_include_filter(&mut self, filter: impl Into<String>) {
        self.include_filters.insert(filter.into());
    }

    pub fn add_exclude_filter(&mut self, filter: impl Into<String>) {
        self.exclude_filters.insert(filter.into());
    }

    pub fn include_filters(&self) -> &BTreeSet<String> {
        &self.include_filters
    }

    pub fn exclude_filters(&self) -> &BTreeSet<String> {
        &self.exclude_filters
    }

    pub fn slot(&self) -> Option<ShardSlot> {
        self.slot
    }

    /// The declared runtime hint, if any.
    pub fn runtime_hint(&self) -> Option<Duration> {
        self.options.get_duration(RUNTIME_HINT_OPTION)
    }
}

/// A module's runnable test.
///
/// `SelfShardable` tests know how to produce a slice of themselves via
/// [`Test::get_test_shard`]; `Plain` tests always run whole.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Test {
    Plain(TestObject),
    SelfShardable(TestObject),
}

impl Test {
    pub fn object(&self) -> &TestObject {
        match self {
            Test::Plain(object) | Test::SelfShardable(object) => object,
        }
    }

    pub fn object_mut(&mut self) -> &mut TestObject {
        match self {
            Test::Plain(object) | Test::SelfShardable(object) => object,
        }
    }

    pub fn is_self_shardable(&self) -> bool {
        matches!(self, Test::SelfShardable(_))
    }

    /// Returns shard `index` of `count` of a self-shardable test.
    ///
    /// The child keeps every option and filter of its parent. Its runtime
    /// hint is the parent's (or the default hint) divided by `count`, and at
    /// least one millisecond. Plain tests return `None`.
    pub fn get_test_shard(&self, count: usize, index: usize) -> Option<Test> {
        let Test::SelfShardable(parent) = self else {
            return None;
        };
        if count == 0 || index >= count {
            return None;
        }

        let mut child = parent.clone();
        child.slot = Some(ShardSlot { index, count });
        let total = parent
            .runtime_hint()
            .filter(|hint| !hint.is_zero())
            .unwrap_or(DEFAULT_RUNTIME_HINT);
        let per_shard = (total / u32::try_from(count).unwrap_or(u32::MAX))
            .max(Duration::from_millis(1));
        if let Err(e) = child.options.set_duration(RUNTIME_HINT_OPTION, per_shard) {
            warn!(
                "Could not set runtime hint of {} shard {}: {}",
                parent.class_name, index, e
            );
        }
        Some(Test::SelfShardable(child))
    }

    /// Splits into `count` children, or returns `self` alone when the test
    /// cannot split.
    pub fn split(self, count: usize) -> Vec<Test> {
        if !self.is_self_shardable() || count <= 1 {
            return vec![self];
        }
        (0..count)
            .filter_map(|index| self.get_test_shard(count, index))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ClassRegistry {
        ClassRegistry::new()
            .with_class(
                "com.example.TestStub",
                TestClass::default().with_option("foo", OptionKind::String),
            )
            .with_class("com.example.ShardableTestStub", TestClass::default().shardable())
    }

    #[test]
    fn test_instantiate_unknown_class() {
        assert!(registry().instantiate("com.example.Missing").is_none());
    }

    #[test]
    fn test_instantiate_declares_implicit_options() {
        let mut test = registry().instantiate("com.example.TestStub").unwrap();
        assert!(!test.is_self_shardable());

        let object = test.object_mut();
        object.set_option("module", "FooModuleA").unwrap();
        object.set_option("runtime-hint", "2m").unwrap();
        object.set_option("foo", "bar").unwrap();
        assert_eq!(object.runtime_hint(), Some(Duration::from_secs(120)));
        assert!(object.set_option("bar", "x").is_err());
    }

    #[test]
    fn test_plain_test_does_not_split() {
        let test = registry().instantiate("com.example.TestStub").unwrap();
        assert!(test.get_test_shard(2, 0).is_none());
        assert_eq!(test.split(3).len(), 1);
    }

    #[test]
    fn test_split_shardable_test() {
        let mut test = registry()
            .instantiate("com.example.ShardableTestStub")
            .unwrap();
        test.object_mut().set_option("runtime-hint", "90s").unwrap();

        let children = test.split(3);
        assert_eq!(children.len(), 3);
        for (i, child) in children.iter().enumerate() {
            assert!(child.is_self_shardable());
            assert_eq!(child.object().slot(), Some(ShardSlot { index: i, count: 3 }));
            assert_eq!(child.object().runtime_hint(), Some(Duration::from_secs(30)));
        }
    }

    #[test]
    fn test_split_without_hint_shares_default() {
        let test = registry()
            .instantiate("com.example.ShardableTestStub")
            .unwrap();
        let children = test.split(3);
        for child in &children {
            assert_eq!(child.object().runtime_hint(), Some(DEFAULT_RUNTIME_HINT / 3));
        }
    }

    #[test]
    fn test_split_small_hint_keeps_one_millisecond() {
        let mut test = registry()
            .instantiate("com.example.ShardableTestStub")
            .unwrap();
        test.object_mut().set_option("runtime-hint", "2ms").unwrap();
        for child in test.split(4) {
            assert_eq!(child.object().runtime_hint(), Some(Duration::from_millis(1)));
        }
    }

    #[test]
    fn test_get_test_shard_out_of_range() {
        let test = registry()
            .instantiate("com.example.ShardableTestStub")
            .unwrap();
        assert!(test.get_test_shard(2, 2).is_none());
        assert!(test.get_test_shard(0, 0).is_none());
    }
}
