//! Run configuration schema.
//!
//! # Schema Overview
//!
//! ```text
//! Config (root)
//! ├── SuiteConfig         - tests directory, result root, shard count
//! ├── AbiConfig           - build arch and device abis to intersect
//! ├── FiltersConfig       - include/exclude names and metadata
//! ├── device_tokens       - "serial:token" strings
//! ├── test_args           - "class:option:value" strings
//! ├── module_args         - "module:option:value" strings
//! ├── CheckerSelection    - system status checker lists
//! ├── OrderingConfig      - modules that always run last
//! ├── classes             - test class schemas, keyed by class name
//! └── ReportConfig        - plan output
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::abi::{self, Abi, AbiRequest, NoMatchingAbiError};
use crate::checker::CheckerSelection;
use crate::filter::{FilterError, FilterSpec};
use crate::runnable::{ClassRegistry, TestClass};
use crate::sink::BuildInfo;

/// Root configuration structure.
///
/// # TOML Structure
///
/// ```toml
/// device_tokens = ["ghi:sim-card"]
/// module_args = ["FooModuleA:blah:foobar"]
///
/// [suite]
/// tests_dir = "testcases"
/// shards = 3
///
/// [abi]
/// build_arch = "arm64"
/// device_abis = ["arm64-v8a", "armeabi-v7a"]
///
/// [filters]
/// exclude = ["armeabi-v7a FooModuleB"]
///
/// [classes."com.example.TestStub"]
/// options = { foo = "string" }
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub suite: SuiteConfig,

    #[serde(default)]
    pub abi: AbiConfig,

    #[serde(default)]
    pub filters: FiltersConfig,

    /// `serial:token` pairs naming which device holds which capability.
    #[serde(default)]
    pub device_tokens: Vec<String>,

    /// `<test class>:<option>:<value>` overrides.
    #[serde(default)]
    pub test_args: Vec<String>,

    /// `<module name or id>:<option>:<value>` overrides.
    #[serde(default)]
    pub module_args: Vec<String>,

    #[serde(default)]
    pub checkers: CheckerSelection,

    #[serde(default)]
    pub ordering: OrderingConfig,

    /// Test classes module configs may name.
    #[serde(default)]
    pub classes: BTreeMap<String, TestClass>,

    #[serde(default)]
    pub report: ReportConfig,
}

impl Config {
    pub fn class_registry(&self) -> ClassRegistry {
        self.classes
            .iter()
            .fold(ClassRegistry::new(), |registry, (name, class)| {
                registry.with_class(name.clone(), class.clone())
            })
    }
}

/// Where modules come from and where results go.
///
/// # Defaults
///
/// | Field | Default |
/// |-------|---------|
/// | `root_dir` | `.` |
/// | `name` | `cts` |
/// | `shards` | 1 |
/// | `shard_index` | None (plan every shard) |
/// | `start_time_ms` | now |
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SuiteConfig {
    /// Directory of `<module>.config` files.
    pub tests_dir: PathBuf,

    /// Root under which the result tree is created.
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,

    #[serde(default = "default_suite_name")]
    pub name: String,

    #[serde(default = "default_shards")]
    pub shards: usize,

    pub shard_index: Option<usize>,

    /// Session start used to name the result directory.
    pub start_time_ms: Option<i64>,
}

impl SuiteConfig {
    pub fn build_info(&self) -> BuildInfo {
        let start = self
            .start_time_ms
            .unwrap_or_else(|| chrono::Utc::now().timestamp_millis());
        BuildInfo::new(self.root_dir.clone(), self.name.clone(), start)
    }
}

fn default_root_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_suite_name() -> String {
    "cts".to_string()
}

fn default_shards() -> usize {
    1
}

/// ABI selection.
///
/// The build's abis come from `build_abis` if given, else from
/// `build_arch`. Without `device_abis` the build's abis are used as if the
/// device reported them.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AbiConfig {
    pub build_arch: Option<String>,
    pub build_abis: Vec<String>,
    pub device_abis: Vec<String>,
    /// Run a single abi only.
    pub abi: Option<String>,
    pub skip_host_arch_check: bool,
}

impl AbiConfig {
    pub fn resolve(&self) -> Result<Vec<Abi>, NoMatchingAbiError> {
        let build_abis = if self.build_abis.is_empty() {
            self.build_arch
                .as_deref()
                .map(abi::abis_for_arch)
                .unwrap_or_default()
        } else {
            self.build_abis.clone()
        };
        let device_abis = if self.device_abis.is_empty() {
            build_abis.clone()
        } else {
            self.device_abis.clone()
        };
        abi::resolve_abis(&AbiRequest {
            build_abis: &build_abis,
            device_abis: &device_abis,
            requested: self.abi.as_deref(),
            skip_host_arch_check: self.skip_host_arch_check,
        })
    }
}

/// Include and exclude filters.
///
/// ```toml
/// [filters]
/// include = ["FooModuleA", "arm64-v8a FooModuleB"]
/// exclude = ["FooModuleA FooTest#testFlaky"]
/// metadata_include = { component = ["media"] }
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct FiltersConfig {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub metadata_include: BTreeMap<String, Vec<String>>,
    pub metadata_exclude: BTreeMap<String, Vec<String>>,
}

impl FiltersConfig {
    pub fn to_filter_spec(&self) -> Result<FilterSpec, FilterError> {
        let mut spec = FilterSpec::from_strings(&self.include, &self.exclude)?;
        for (key, values) in &self.metadata_include {
            for value in values {
                spec = spec.with_metadata_include(key.clone(), value.clone());
            }
        }
        for (key, values) in &self.metadata_exclude {
            for value in values {
                spec = spec.with_metadata_exclude(key.clone(), value.clone());
            }
        }
        Ok(spec)
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct OrderingConfig {
    /// Module names run after all others in their shard.
    pub run_last: BTreeSet<String>,
}

/// Plan output settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReportConfig {
    /// Write the plan as JSON to this file.
    pub plan_file: Option<PathBuf>,

    /// Print the console summary.
    #[serde(default = "default_true")]
    pub console: bool,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            plan_file: None,
            console: true,
        }
    }
}

fn default_true() -> bool {
    true
}
