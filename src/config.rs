//! Run configuration loading.
//!
//! A run is described by a `modshard.toml` file; see [`schema`] for the
//! layout. [`Config::init_options`] turns a loaded config into the inputs of
//! [`ModuleIndex::initialize`](crate::index::ModuleIndex::initialize).

pub mod schema;

pub use schema::*;

use std::path::Path;

use anyhow::{Context, Result};

use crate::index::InitOptions;

/// Loads configuration from a TOML file.
///
/// Relative `tests_dir` and `root_dir` paths are resolved against the
/// directory containing the file.
///
/// # Example
///
/// ```no_run
/// use modshard::config::load_config;
/// use std::path::Path;
///
/// let config = load_config(Path::new("modshard.toml"))?;
/// println!("Shards: {}", config.suite.shards);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    if let Some(base) = path.parent() {
        if config.suite.tests_dir.is_relative() {
            config.suite.tests_dir = base.join(&config.suite.tests_dir);
        }
        if config.suite.root_dir.is_relative() {
            config.suite.root_dir = base.join(&config.suite.root_dir);
        }
    }

    Ok(config)
}

/// Loads configuration from a TOML string.
///
/// ```
/// use modshard::config::load_config_str;
///
/// let config = load_config_str(r#"
///     [suite]
///     tests_dir = "testcases"
///     shards = 4
/// "#)?;
///
/// assert_eq!(config.suite.shards, 4);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn load_config_str(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).context("Failed to parse config")?;

    Ok(config)
}

impl Config {
    /// Resolves abis and filters and assembles the index inputs.
    pub fn init_options(&self) -> Result<InitOptions> {
        let abis = self.abi.resolve().context("Failed to resolve abis")?;
        let filters = self
            .filters
            .to_filter_spec()
            .context("Invalid filter in [filters]")?;

        let mut opts = InitOptions::new(self.suite.tests_dir.clone(), abis)
            .with_shards(self.suite.shards)
            .with_device_tokens(self.device_tokens.clone())
            .with_test_args(self.test_args.clone())
            .with_module_args(self.module_args.clone())
            .with_filters(filters)
            .with_build(self.suite.build_info())
            .with_run_last(self.ordering.run_last.clone());
        if let Some(index) = self.suite.shard_index {
            opts = opts.with_shard_index(index);
        }
        Ok(opts)
    }
}
