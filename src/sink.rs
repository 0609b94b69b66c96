//! Result directory allocation.
//!
//! Planning has one filesystem side effect: it prepares the directory the
//! shard's results will be written to and records how many runs each split
//! module will produce, so result merging knows what to expect. Both go
//! through the [`ResultSink`] trait so the index itself never touches the
//! filesystem.
//!
//! Layout produced by [`FsResultSink`]:
//!
//! ```text
//! <root_dir>/android-<suite_name>/results/<YYYY.MM.DD_HH.MM.SS>/[shard_<i>/]test_runs.json
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// File holding the per-module run counts.
pub const TEST_RUNS_FILE: &str = "test_runs.json";

/// Attributes of the build under test that locate its results.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct BuildInfo {
    pub root_dir: PathBuf,
    pub suite_name: String,
    /// Session start, in milliseconds since the epoch.
    pub start_time_ms: i64,
}

impl BuildInfo {
    pub fn new(root_dir: impl Into<PathBuf>, suite_name: impl Into<String>, start_time_ms: i64) -> Self {
        Self {
            root_dir: root_dir.into(),
            suite_name: suite_name.into(),
            start_time_ms,
        }
    }

    /// `<root_dir>/android-<suite_name>/results`.
    pub fn results_dir(&self) -> PathBuf {
        self.root_dir
            .join(format!("android-{}", self.suite_name))
            .join("results")
    }

    /// The session directory name derived from the start time (UTC).
    pub fn dir_suffix(&self) -> io::Result<String> {
        let start = DateTime::from_timestamp_millis(self.start_time_ms).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("start time {} is out of range", self.start_time_ms),
            )
        })?;
        Ok(start.format("%Y.%m.%d_%H.%M.%S").to_string())
    }
}

/// Receives the planning side effects.
pub trait ResultSink {
    /// Creates the result directory for `shard_index` and returns it.
    fn allocate(&self, build: &BuildInfo, shard_index: Option<usize>) -> io::Result<PathBuf>;

    /// Records module id → number of test runs for modules that run more
    /// than once.
    fn record_test_runs(&self, dir: &Path, runs: &BTreeMap<String, usize>) -> io::Result<()>;
}

/// Writes results under the build's root directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsResultSink;

impl ResultSink for FsResultSink {
    fn allocate(&self, build: &BuildInfo, shard_index: Option<usize>) -> io::Result<PathBuf> {
        let mut dir = build.results_dir().join(build.dir_suffix()?);
        if let Some(index) = shard_index {
            dir = dir.join(format!("shard_{}", index));
        }
        fs::create_dir_all(&dir)?;
        debug!("Allocated result directory {}", dir.display());
        Ok(dir)
    }

    fn record_test_runs(&self, dir: &Path, runs: &BTreeMap<String, usize>) -> io::Result<()> {
        let json = serde_json::to_string_pretty(runs).map_err(io::Error::other)?;
        fs::write(dir.join(TEST_RUNS_FILE), json)
    }
}

/// Discards everything. Used when planning without a result tree.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl ResultSink for NullSink {
    fn allocate(&self, _build: &BuildInfo, _shard_index: Option<usize>) -> io::Result<PathBuf> {
        Ok(PathBuf::new())
    }

    fn record_test_runs(&self, _dir: &Path, _runs: &BTreeMap<String, usize>) -> io::Result<()> {
        Ok(())
    }
}

/// Reads back a file written by [`FsResultSink::record_test_runs`].
pub fn read_test_runs(dir: &Path) -> io::Result<BTreeMap<String, usize>> {
    let content = fs::read_to_string(dir.join(TEST_RUNS_FILE))?;
    serde_json::from_str(&content).map_err(io::Error::other)
}
