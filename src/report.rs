//! Plan reporting.
//!
//! Reporters receive events once planning has finished: a summary of what
//! the index accepted, each shard in order, then the complete plan. The core
//! never calls them itself; the CLI drives them after
//! [`ModuleIndex::initialize`](crate::index::ModuleIndex::initialize).
//!
//! | Reporter | Output |
//! |----------|--------|
//! | [`ConsoleReporter`] | styled summary on stdout |
//! | [`JsonReporter`] | plan document written to a file |
//! | [`MultiReporter`] | fans events out to several reporters |
//! | [`NullReporter`] | nothing |

pub mod json;

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::index::ModuleIndex;
use crate::shard::{Shard, ShardPlan};

pub use json::JsonReporter;

/// What the index accepted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexSummary {
    pub module_ids: Vec<String>,
    pub unique_modules: usize,
    pub token_modules: usize,
    pub non_token_modules: usize,
    pub shard_count: usize,
    pub device_tokens: BTreeMap<String, BTreeSet<String>>,
}

impl IndexSummary {
    pub fn from_index(index: &ModuleIndex) -> Self {
        Self {
            module_ids: index.module_ids().to_vec(),
            unique_modules: index.unique_module_count(),
            token_modules: index.token_modules().len(),
            non_token_modules: index.non_token_modules().len(),
            shard_count: index.number_of_shards(),
            device_tokens: index.device_tokens().clone(),
        }
    }
}

/// Receives planning events.
#[async_trait]
pub trait Reporter: Send + Sync {
    /// Called once the index has accepted its modules.
    async fn on_index_complete(&self, summary: &IndexSummary);

    /// Called for each shard, in index order.
    async fn on_shard_planned(&self, shard: &Shard);

    /// Called after the last shard.
    async fn on_plan_complete(&self, plan: &ShardPlan);
}

/// Replays a finished index into a reporter.
pub async fn report_plan(reporter: &dyn Reporter, index: &ModuleIndex) {
    reporter
        .on_index_complete(&IndexSummary::from_index(index))
        .await;
    for shard in index.plan().shards() {
        reporter.on_shard_planned(shard).await;
    }
    reporter.on_plan_complete(index.plan()).await;
}

/// A reporter that does nothing.
pub struct NullReporter;

#[async_trait]
impl Reporter for NullReporter {
    async fn on_index_complete(&self, _summary: &IndexSummary) {}
    async fn on_shard_planned(&self, _shard: &Shard) {}
    async fn on_plan_complete(&self, _plan: &ShardPlan) {}
}

/// A reporter that combines multiple reporters.
pub struct MultiReporter {
    reporters: Vec<Box<dyn Reporter>>,
}

impl MultiReporter {
    pub fn new() -> Self {
        Self {
            reporters: Vec::new(),
        }
    }

    pub fn with_reporter<R: Reporter + 'static>(mut self, reporter: R) -> Self {
        self.reporters.push(Box::new(reporter));
        self
    }

    pub fn len(&self) -> usize {
        self.reporters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reporters.is_empty()
    }
}

impl Default for MultiReporter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Reporter for MultiReporter {
    async fn on_index_complete(&self, summary: &IndexSummary) {
        for reporter in &self.reporters {
            reporter.on_index_complete(summary).await;
        }
    }

    async fn on_shard_planned(&self, shard: &Shard) {
        for reporter in &self.reporters {
            reporter.on_shard_planned(shard).await;
        }
    }

    async fn on_plan_complete(&self, plan: &ShardPlan) {
        for reporter in &self.reporters {
            reporter.on_plan_complete(plan).await;
        }
    }
}

/// Prints the plan to the terminal.
pub struct ConsoleReporter {
    verbose: bool,
}

impl ConsoleReporter {
    /// With `verbose`, every module of every shard is listed.
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    fn render_summary(summary: &IndexSummary) -> String {
        let mut out = format!(
            "Indexed {} modules ({} unique): {} non-token, {} token\n",
            summary.module_ids.len(),
            summary.unique_modules,
            console::style(summary.non_token_modules).green(),
            console::style(summary.token_modules).yellow(),
        );
        for (serial, tokens) in &summary.device_tokens {
            let tokens: Vec<&str> = tokens.iter().map(String::as_str).collect();
            out.push_str(&format!("  {} holds {}\n", serial, tokens.join(", ")));
        }
        out
    }

    fn render_shard(&self, shard: &Shard) -> String {
        let mut out = format!(
            "Shard {}: {} modules, ~{}\n",
            console::style(shard.index).bold(),
            shard.modules.len(),
            format_duration(Duration::from_millis(shard.total_weight())),
        );
        if self.verbose {
            for module in &shard.modules {
                out.push_str(&format!("  - {}\n", module));
            }
        }
        out
    }

    fn render_plan(plan: &ShardPlan) -> String {
        let empty = plan.shards().iter().filter(|s| s.modules.is_empty()).count();
        if plan.module_count() == 0 {
            return format!("{}\n", console::style("No modules to run.").yellow().bold());
        }
        let mut out = format!(
            "{}\n",
            console::style(format!(
                "Planned {} modules across {} shards",
                plan.module_count(),
                plan.len()
            ))
            .green()
            .bold()
        );
        if empty > 0 {
            out.push_str(&format!(
                "{}\n",
                console::style(format!("{} shards have nothing to run", empty)).dim()
            ));
        }
        for device in plan.devices() {
            out.push_str(&format!(
                "  {} adds {} token modules to the shard it runs\n",
                console::style(&device.serial).cyan(),
                device.modules.len()
            ));
        }
        out
    }
}

#[async_trait]
impl Reporter for ConsoleReporter {
    async fn on_index_complete(&self, summary: &IndexSummary) {
        print!("{}", Self::render_summary(summary));
    }

    async fn on_shard_planned(&self, shard: &Shard) {
        print!("{}", self.render_shard(shard));
    }

    async fn on_plan_complete(&self, plan: &ShardPlan) {
        println!();
        print!("{}", Self::render_plan(plan));
    }
}

/// Formats a duration as `1h02m`, `3m05s` or `12s`.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    match (secs / 3600, secs % 3600 / 60, secs % 60) {
        (0, 0, s) => format!("{}s", s),
        (0, m, s) => format!("{}m{:02}s", m, s),
        (h, m, _) => format!("{}h{:02}m", h, m),
    }
}
