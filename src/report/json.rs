//! JSON plan output.
//!
//! Writes one document per run for the execution driver:
//!
//! ```json
//! {
//!   "summary": { "module_ids": ["armeabi-v7a FooModuleA", ...], "shard_count": 2, ... },
//!   "plan": {
//!     "shards": [ { "index": 0, "modules": ["armeabi-v7a FooModuleA"] } ],
//!     "devices": [ { "serial": "ghi", "modules": ["armeabi-v7a FooModuleC"] } ]
//!   }
//! }
//! ```

use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Serialize;

use super::{IndexSummary, Reporter};
use crate::shard::{Shard, ShardPlan};

#[derive(Serialize)]
struct PlanDocument<'a> {
    summary: &'a IndexSummary,
    plan: &'a ShardPlan,
}

/// Writes the plan as JSON when planning completes.
///
/// Parent directories are created if missing. Write failures are logged,
/// not propagated.
pub struct JsonReporter {
    output_path: PathBuf,
    summary: Mutex<IndexSummary>,
}

impl JsonReporter {
    pub fn new(output_path: PathBuf) -> Self {
        Self {
            output_path,
            summary: Mutex::new(IndexSummary::default()),
        }
    }

    fn render(&self, plan: &ShardPlan) -> serde_json::Result<String> {
        let summary = self
            .summary
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default();
        serde_json::to_string_pretty(&PlanDocument {
            summary: &summary,
            plan,
        })
    }
}

#[async_trait]
impl Reporter for JsonReporter {
    async fn on_index_complete(&self, summary: &IndexSummary) {
        if let Ok(mut stored) = self.summary.lock() {
            *stored = summary.clone();
        }
    }

    async fn on_shard_planned(&self, _shard: &Shard) {}

    async fn on_plan_complete(&self, plan: &ShardPlan) {
        let json = match self.render(plan) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!("Failed to serialize plan: {}", e);
                return;
            }
        };

        if let Some(parent) = self.output_path.parent()
            && !parent.as_os_str().is_empty()
            && let Err(e) = tokio::fs::create_dir_all(parent).await
        {
            tracing::error!("Failed to create output directory: {}", e);
            return;
        }

        if let Err(e) = tokio::fs::write(&self.output_path, json).await {
            tracing::error!("Failed to write plan: {}", e);
        } else {
            tracing::info!("Plan written to: {}", self.output_path.display());
        }
    }
}
