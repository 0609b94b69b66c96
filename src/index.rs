//! The module index: discovery, filtering and shard planning in one pass.
//!
//! [`ModuleIndex::initialize`] is called once per run. It reads the tests
//! directory, builds one [`ModuleDef`] per accepted `(config, abi)` pair,
//! applies option overrides, separates token modules from the rest and
//! computes the [`ShardPlan`]. Everything after that is a read.
//!
//! # Pipeline
//!
//! ```text
//! tests_dir ──► config_files ──► name filter ──► parse_config ──► metadata filter
//!                                  (per abi)      (once per file)
//!                                                        │
//!            ┌───────────────────────────────────────────┘
//!            ▼
//!   per abi: bind abi ─► test filters ─► module args ─► test args ─► ModuleDef
//!                                                                     │
//!                       split self-shardable tests (shard_count > 1) ◄┘
//!                                        │
//!                       token modules ◄──┴──► non-token modules
//!                                        │
//!                                   ShardPlan::build
//! ```
//!
//! # Failure policy
//!
//! | Situation | Outcome |
//! |-----------|---------|
//! | config fails to parse | module skipped with a warning |
//! | config fails to parse, module explicitly included | [`IndexError::ExplicitModule`] |
//! | no config files at all | [`IndexError::NoConfigs`] |
//! | malformed `serial:token` or `target:option:value` | fatal |
//! | option override that does not fit the test | warning, override skipped |

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::abi::{Abi, create_id};
use crate::discovery::{self, ConfigParseError};
use crate::filter::FilterSpec;
use crate::module::{self, ModuleDef};
use crate::options::{self, ArgMap, OptionError};
use crate::runnable::{ClassRegistry, MODULE_OPTION};
use crate::shard::{PlanInput, ShardPlan};
use crate::sink::{BuildInfo, ResultSink};
use crate::token::{TokenError, TokenRegistry};

pub type IndexResult<T> = Result<T, IndexError>;

/// Errors that abort [`ModuleIndex::initialize`].
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("module index is already initialized")]
    AlreadyInitialized,

    /// The tests directory holds no module configs.
    #[error("no config files found in {}", .0.display())]
    NoConfigs(PathBuf),

    #[error(transparent)]
    InvalidDeviceToken(#[from] TokenError),

    /// A `--module-arg` or `--test-arg` is malformed.
    #[error(transparent)]
    InvalidArgument(#[from] OptionError),

    #[error("shard index {index} is out of range for {count} shards")]
    InvalidShardIndex { index: usize, count: usize },

    /// A module named by an include filter could not be loaded.
    #[error("failed to load explicitly included module {name}: {source}")]
    ExplicitModule {
        name: String,
        #[source]
        source: ConfigParseError,
    },

    #[error("duplicate module {0}")]
    DuplicateModule(String),

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Everything [`ModuleIndex::initialize`] needs.
#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    pub shard_count: usize,
    /// The shard this process runs, if it runs only one.
    pub shard_index: Option<usize>,
    pub tests_dir: PathBuf,
    pub abis: Vec<Abi>,
    /// `serial:token` strings.
    pub device_tokens: Vec<String>,
    /// `<test class>:<option>:<value>` strings.
    pub test_args: Vec<String>,
    /// `<module name or id>:<option>:<value>` strings.
    pub module_args: Vec<String>,
    pub filters: FilterSpec,
    pub build: BuildInfo,
    /// Module names that always run after everything else in their shard.
    pub run_last: BTreeSet<String>,
}

impl InitOptions {
    pub fn new(tests_dir: impl Into<PathBuf>, abis: Vec<Abi>) -> Self {
        Self {
            shard_count: 1,
            tests_dir: tests_dir.into(),
            abis,
            ..Default::default()
        }
    }

    pub fn with_shards(mut self, shard_count: usize) -> Self {
        self.shard_count = shard_count;
        self
    }

    pub fn with_shard_index(mut self, index: usize) -> Self {
        self.shard_index = Some(index);
        self
    }

    pub fn with_device_tokens(mut self, tokens: Vec<String>) -> Self {
        self.device_tokens = tokens;
        self
    }

    pub fn with_test_args(mut self, args: Vec<String>) -> Self {
        self.test_args = args;
        self
    }

    pub fn with_module_args(mut self, args: Vec<String>) -> Self {
        self.module_args = args;
        self
    }

    pub fn with_filters(mut self, filters: FilterSpec) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_build(mut self, build: BuildInfo) -> Self {
        self.build = build;
        self
    }

    pub fn with_run_last(mut self, names: BTreeSet<String>) -> Self {
        self.run_last = names;
        self
    }
}

/// The repository of accepted modules and their shard assignment.
#[derive(Debug, Default)]
pub struct ModuleIndex {
    initialized: bool,
    shard_count: usize,
    shard_index: Option<usize>,
    tokens: TokenRegistry,
    token_modules: Vec<ModuleDef>,
    non_token_modules: Vec<ModuleDef>,
    module_ids: Vec<String>,
    test_runs: BTreeMap<String, usize>,
    plan: ShardPlan,
    result_dir: Option<PathBuf>,
}

struct Overrides {
    test_args: ArgMap,
    module_args: ArgMap,
}

impl ModuleIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discovers, filters and plans all modules. May be called once.
    pub fn initialize(
        &mut self,
        opts: InitOptions,
        registry: &ClassRegistry,
        sink: &dyn ResultSink,
    ) -> IndexResult<()> {
        if self.initialized {
            return Err(IndexError::AlreadyInitialized);
        }
        let shard_count = opts.shard_count.max(1);
        if let Some(index) = opts.shard_index {
            if index >= shard_count {
                return Err(IndexError::InvalidShardIndex {
                    index,
                    count: shard_count,
                });
            }
        }

        let tokens = TokenRegistry::from_device_tokens(&opts.device_tokens)?;
        let overrides = Overrides {
            test_args: options::parse_args(&opts.test_args)?,
            module_args: options::parse_args(&opts.module_args)?,
        };

        let files = discovery::config_files(&opts.tests_dir).map_err(|source| IndexError::Io {
            path: opts.tests_dir.clone(),
            source,
        })?;
        if files.is_empty() {
            return Err(IndexError::NoConfigs(opts.tests_dir.clone()));
        }

        // `self` is replaced only once every module has loaded.
        let mut next = ModuleIndex {
            shard_count,
            shard_index: opts.shard_index,
            ..Self::default()
        };
        for path in &files {
            next.load_module(path, &opts, registry, &overrides)?;
        }

        next.plan = ShardPlan::build(PlanInput {
            non_token: &next.non_token_modules,
            token: &next.token_modules,
            shard_count,
            tokens: &tokens,
            run_last: &opts.run_last,
        });
        next.tokens = tokens;

        let io_error = |source: std::io::Error| IndexError::Io {
            path: opts.build.results_dir(),
            source,
        };
        let dir = sink
            .allocate(&opts.build, opts.shard_index)
            .map_err(io_error)?;
        sink.record_test_runs(&dir, &next.test_runs)
            .map_err(io_error)?;
        next.result_dir = Some(dir);

        info!(
            "Indexed {} modules ({} token, {} non-token) into {} shards",
            next.module_ids.len(),
            next.token_modules.len(),
            next.non_token_modules.len(),
            shard_count
        );
        next.initialized = true;
        *self = next;
        Ok(())
    }

    fn load_module(
        &mut self,
        path: &Path,
        opts: &InitOptions,
        registry: &ClassRegistry,
        overrides: &Overrides,
    ) -> IndexResult<()> {
        let Some(name) = discovery::module_name(path) else {
            return Ok(());
        };
        let filters = &opts.filters;

        let abis: Vec<&Abi> = opts
            .abis
            .iter()
            .filter(|abi| filters.accepts_id(&abi.name, name))
            .collect();
        if abis.is_empty() {
            debug!("Skipping {}: excluded by name", name);
            return Ok(());
        }

        let raw = match discovery::parse_config(path, registry) {
            Ok(raw) => raw,
            Err(source) if filters.is_explicitly_included(name) => {
                return Err(IndexError::ExplicitModule {
                    name: name.to_string(),
                    source,
                });
            }
            Err(e) => {
                warn!("Skipping module {}: {}", name, e);
                return Ok(());
            }
        };

        if let Some(declared) = raw.test.object().options().get_str(MODULE_OPTION) {
            if declared != name {
                warn!(
                    "Config {} declares module '{}', using the file name",
                    path.display(),
                    declared
                );
            }
        }
        if !filters.accepts_metadata(&raw.metadata) {
            debug!("Skipping {}: excluded by metadata", name);
            return Ok(());
        }

        for abi in abis {
            let id = create_id(&abi.name, name);
            if self.module_ids.contains(&id) {
                return Err(IndexError::DuplicateModule(id));
            }

            let mut test = raw.test.clone();
            let object = test.object_mut();
            object.set_abi(abi.clone());
            for filter in filters.test_includes(&abi.name, name) {
                object.add_include_filter(filter);
            }
            for filter in filters.test_excludes(&abi.name, name) {
                object.add_exclude_filter(filter);
            }
            let module_options = options::merged_options(&overrides.module_args, [name, id.as_str()]);
            options::inject(&module_options, object.options_mut());
            if let Some(test_options) = overrides.test_args.get(object.class_name()) {
                options::inject(test_options, object.options_mut());
            }

            let def = ModuleDef::new(
                name,
                abi.clone(),
                test,
                raw.preparers.clone(),
                raw.metadata.clone(),
            )
            .with_description(raw.description.clone());

            let children = def.split(self.shard_count);
            if children.len() > 1 {
                self.test_runs.insert(id.clone(), children.len());
            }
            for child in children {
                if child.requires_token() {
                    self.token_modules.push(child);
                } else {
                    self.non_token_modules.push(child);
                }
            }
            debug!("Loaded module {}", id);
            self.module_ids.push(id);
        }
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn number_of_shards(&self) -> usize {
        self.shard_count
    }

    pub fn shard_index(&self) -> Option<usize> {
        self.shard_index
    }

    /// Device serial → tokens held, as given on the command line.
    pub fn device_tokens(&self) -> &BTreeMap<String, BTreeSet<String>> {
        self.tokens.as_map()
    }

    pub fn token_modules(&self) -> &[ModuleDef] {
        &self.token_modules
    }

    pub fn non_token_modules(&self) -> &[ModuleDef] {
        &self.non_token_modules
    }

    /// Accepted module ids in discovery order: file name, then abi.
    pub fn module_ids(&self) -> &[String] {
        &self.module_ids
    }

    /// Modules counted once regardless of how many shards they split into.
    pub fn unique_module_count(&self) -> usize {
        let all: Vec<ModuleDef> = self
            .non_token_modules
            .iter()
            .chain(&self.token_modules)
            .cloned()
            .collect();
        module::count_unique(&all)
    }

    /// Module id → run count, for modules split into several runs.
    pub fn test_runs(&self) -> &BTreeMap<String, usize> {
        &self.test_runs
    }

    pub fn plan(&self) -> &ShardPlan {
        &self.plan
    }

    pub fn result_dir(&self) -> Option<&Path> {
        self.result_dir.as_deref()
    }

    /// The modules shard `shard_index` should run on device `serial`.
    pub fn get_modules(&self, serial: &str, shard_index: usize) -> Vec<ModuleDef> {
        self.plan.modules_for(serial, shard_index)
    }
}
