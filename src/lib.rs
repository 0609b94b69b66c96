//! modshard: test module repository and shard planner.
//!
//! This crate indexes the test modules of a device compatibility suite and
//! splits them into balanced shards for parallel executors. Modules that
//! need a device capability (a "token") follow the device that holds it, on
//! whichever shard that device runs.
//!
//! # Architecture
//!
//! The main components are:
//!
//! - **Discovery**: Find `<module>.config` files and parse them ([`discovery`])
//! - **Filter**: Include/exclude modules by name and metadata ([`filter`])
//! - **Options**: Apply `target:option:value` overrides to tests ([`options`])
//! - **Index**: Build the accepted module set once per run ([`index`])
//! - **Shard**: Partition modules by runtime and route token modules ([`shard`])
//! - **Report**: Print or write the resulting plan ([`report`])
//!
//! # Example
//!
//! ```no_run
//! use modshard::config::load_config;
//! use modshard::index::ModuleIndex;
//! use modshard::sink::NullSink;
//!
//! let config = load_config(std::path::Path::new("modshard.toml"))?;
//! let mut index = ModuleIndex::new();
//! index.initialize(config.init_options()?, &config.class_registry(), &NullSink)?;
//! for module in index.get_modules("device-serial", 0) {
//!     println!("{}", module);
//! }
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod abi;
pub mod checker;
pub mod config;
pub mod discovery;
pub mod filter;
pub mod index;
pub mod module;
pub mod options;
pub mod report;
pub mod runnable;
pub mod shard;
pub mod sink;
pub mod token;

// Re-export commonly used types
pub use config::{Config, load_config};
pub use filter::FilterSpec;
pub use index::{IndexError, InitOptions, ModuleIndex};
pub use module::ModuleDef;
pub use report::Reporter;
pub use runnable::{ClassRegistry, Test, TestClass};
pub use shard::ShardPlan;
