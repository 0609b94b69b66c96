//! Shard planning.
//!
//! Accepted modules are split into `N` shards in two passes:
//!
//! 1. **Non-token modules** are put in execution order and cut into `N`
//!    contiguous runs by [`linear_partition`], which minimises the heaviest
//!    run's total runtime hint.
//! 2. **Token modules** are assigned to the first device (in command line
//!    order) holding every token they require. Whichever shard that device
//!    asks for picks them up. Token modules no device can run land on the
//!    last shard.
//!
//! ```text
//!   non-token (sorted)          token modules
//!   ┌──┬──┬─────┬─────┐         ┌────┐ ┌────┐ ┌────┐
//!   │A │A │B  B │D  D │         │C32 │ │C64 │ │E32 │
//!   └──┴──┴─────┴─────┘         └─┬──┘ └─┬──┘ └─┬──┘
//!    0  1   2     3  ◄────────────┼──────┼──────┘  (no device holds "unheld")
//!                                 ▼      ▼
//!                            ghi (holds "foobar"), on whatever shard it runs
//! ```
//!
//! The plan is computed once and never changes; executors only read it.
//! Each device serial is expected to drive a single shard.

use std::cmp::Reverse;
use std::collections::BTreeSet;
use std::ops::Range;

use serde::Serialize;
use tracing::debug;

use crate::module::ModuleDef;
use crate::token::TokenRegistry;

/// Splits `weights` into at most `k` contiguous ranges minimising the
/// largest range sum.
///
/// Among equally good splits the one with the earliest cut points wins. With
/// `k >= weights.len()` every item gets its own range. Empty input yields no
/// ranges.
pub fn linear_partition(weights: &[u64], k: usize) -> Vec<Range<usize>> {
    let n = weights.len();
    if n == 0 {
        return Vec::new();
    }
    let k = k.max(1);
    if k >= n {
        return (0..n).map(|i| i..i + 1).collect();
    }

    let mut prefix = vec![0u64; n + 1];
    for (i, w) in weights.iter().enumerate() {
        prefix[i + 1] = prefix[i].saturating_add(*w);
    }

    // cost[i][j]: best max-sum for the first i items in j ranges.
    // divider[i][j]: item count before the last of those j ranges.
    let mut cost = vec![vec![0u64; k + 1]; n + 1];
    let mut divider = vec![vec![0usize; k + 1]; n + 1];
    for i in 1..=n {
        cost[i][1] = prefix[i];
    }
    for j in 2..=k {
        for i in j..=n {
            let mut best = u64::MAX;
            for x in (j - 1)..i {
                let candidate = cost[x][j - 1].max(prefix[i] - prefix[x]);
                if candidate < best {
                    best = candidate;
                    divider[i][j] = x;
                }
            }
            cost[i][j] = best;
        }
    }

    let mut ranges = Vec::with_capacity(k);
    let mut end = n;
    for j in (2..=k).rev() {
        let start = divider[end][j];
        ranges.push(start..end);
        end = start;
    }
    ranges.push(0..end);
    ranges.reverse();
    ranges
}

/// Returns shard `index` of `count` of `modules`, or `None` if that shard
/// would be empty.
///
/// With `count <= 1` shard 0 is the whole list. The input order is kept
/// within and across shards.
pub fn get_shard(modules: &[ModuleDef], index: usize, count: usize) -> Option<Vec<ModuleDef>> {
    if count <= 1 {
        return (index == 0).then(|| modules.to_vec());
    }
    let weights: Vec<u64> = modules.iter().map(ModuleDef::weight).collect();
    linear_partition(&weights, count)
        .get(index)
        .map(|range| modules[range.clone()].to_vec())
}

/// Sorts modules into execution order.
///
/// Modules named in `run_last` go to the end. Otherwise longer runtime hints
/// come first, then module name. The sort is stable, so modules that tie
/// (the abis of one module) keep their relative order.
pub fn sort_for_execution(modules: &mut [ModuleDef], run_last: &BTreeSet<String>) {
    modules.sort_by(|a, b| {
        let key = |m: &ModuleDef| (run_last.contains(m.name()), Reverse(m.weight()));
        key(a).cmp(&key(b)).then_with(|| a.name().cmp(b.name()))
    });
}

/// One shard of the plan: its slice of the non-token modules, plus the
/// token modules no device can run when it is the last shard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Shard {
    pub index: usize,
    #[serde(serialize_with = "serialize_ids")]
    pub modules: Vec<ModuleDef>,
}

impl Shard {
    /// Sum of the runtime hints of this shard's modules, in milliseconds.
    pub fn total_weight(&self) -> u64 {
        self.modules
            .iter()
            .fold(0, |total, m| total.saturating_add(m.weight()))
    }
}

/// Token modules routed to the device that holds their tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceModules {
    pub serial: String,
    #[serde(serialize_with = "serialize_ids")]
    pub modules: Vec<ModuleDef>,
}

fn serialize_ids<S: serde::Serializer>(modules: &[ModuleDef], s: S) -> Result<S::Ok, S::Error> {
    s.collect_seq(modules.iter().map(|m| m.to_string()))
}

/// Inputs to [`ShardPlan::build`].
#[derive(Debug, Clone, Copy)]
pub struct PlanInput<'a> {
    pub non_token: &'a [ModuleDef],
    pub token: &'a [ModuleDef],
    pub shard_count: usize,
    pub tokens: &'a TokenRegistry,
    pub run_last: &'a BTreeSet<String>,
}

/// The complete assignment of modules to shards and token devices.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ShardPlan {
    shards: Vec<Shard>,
    devices: Vec<DeviceModules>,
    #[serde(skip)]
    run_last: BTreeSet<String>,
}

impl ShardPlan {
    /// Computes the plan. Every input module lands on exactly one shard or
    /// exactly one device.
    pub fn build(input: PlanInput<'_>) -> Self {
        let count = input.shard_count.max(1);

        let mut ordered = input.non_token.to_vec();
        sort_for_execution(&mut ordered, input.run_last);
        let weights: Vec<u64> = ordered.iter().map(ModuleDef::weight).collect();
        let mut ranges = linear_partition(&weights, count).into_iter();

        let mut shards: Vec<Shard> = (0..count)
            .map(|index| Shard {
                index,
                modules: ranges
                    .next()
                    .map(|range| ordered[range].to_vec())
                    .unwrap_or_default(),
            })
            .collect();
        let mut devices: Vec<DeviceModules> = input
            .tokens
            .devices()
            .iter()
            .map(|serial| DeviceModules {
                serial: serial.clone(),
                modules: Vec::new(),
            })
            .collect();

        for module in input.token {
            let holder = devices
                .iter_mut()
                .find(|d| input.tokens.satisfies(&d.serial, module.tokens()));
            match holder {
                Some(device) => {
                    debug!("Routing token module {} to device {}", module, device.serial);
                    device.modules.push(module.clone());
                }
                None => {
                    debug!("No device holds the tokens of {}; using the last shard", module);
                    shards[count - 1].modules.push(module.clone());
                }
            }
        }

        for shard in &mut shards {
            sort_for_execution(&mut shard.modules, input.run_last);
        }
        for device in &mut devices {
            sort_for_execution(&mut device.modules, input.run_last);
        }
        Self {
            shards,
            devices,
            run_last: input.run_last.clone(),
        }
    }

    pub fn shards(&self) -> &[Shard] {
        &self.shards
    }

    pub fn shard(&self, index: usize) -> Option<&Shard> {
        self.shards.get(index)
    }

    /// Token devices in command line order, with the modules routed to each.
    pub fn devices(&self) -> &[DeviceModules] {
        &self.devices
    }

    pub fn device(&self, serial: &str) -> Option<&DeviceModules> {
        self.devices.iter().find(|d| d.serial == serial)
    }

    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    /// Modules for shard `index` as run on device `serial`.
    ///
    /// The shard's own modules plus the token modules routed to `serial`, in
    /// execution order. Unknown shards get nothing, including token modules.
    pub fn modules_for(&self, serial: &str, index: usize) -> Vec<ModuleDef> {
        let Some(shard) = self.shard(index) else {
            return Vec::new();
        };
        let mut modules = shard.modules.clone();
        if let Some(device) = self.device(serial) {
            modules.extend(device.modules.iter().cloned());
            sort_for_execution(&mut modules, &self.run_last);
        }
        modules
    }

    /// Total number of module entries across shards and devices.
    pub fn module_count(&self) -> usize {
        let on_shards: usize = self.shards.iter().map(|s| s.modules.len()).sum();
        let on_devices: usize = self.devices.iter().map(|d| d.modules.len()).sum();
        on_shards + on_devices
    }
}
