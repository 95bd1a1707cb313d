use crate::models::{LoadOrder, LoadOrderError, PluginCategory};
use serde::Serialize;
use std::fmt;

/// Why a batch was planned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchKind {
    Sanity,
    Standard,
    Subdivision,
    Mega,
    Retest,
}

impl fmt::Display for BatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BatchKind::Sanity => "sanity",
            BatchKind::Standard => "standard",
            BatchKind::Subdivision => "subdivision",
            BatchKind::Mega => "mega",
            BatchKind::Retest => "retest",
        };
        f.write_str(s)
    }
}

/// Plugins tested together on top of the baseline.
///
/// Only the planner builds batches, and it validates every member against
/// the load order, so a batch never holds a failed or quarantined plugin.
/// The baseline is not stored: it grows while a batch is subdivided and is
/// resolved at launch time with [`LoadOrder::active_set`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    members: Vec<String>,
    kind: BatchKind,
}

impl Batch {
    pub fn members(&self) -> &[String] {
        &self.members
    }

    pub fn kind(&self) -> BatchKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Only the sanity batch is empty.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Result of splitting a failing batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subdivision {
    /// The batch had one member: it is the culprit
    Culprit(String),

    /// Left gets the ceiling, right the floor
    Halves { left: Batch, right: Batch },
}

/// Picks the next subset to test
#[derive(Debug, Clone, Copy)]
pub struct BatchPlanner {
    batch_size: usize,
}

impl BatchPlanner {
    /// A zero batch size is treated as 1.
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Baseline-only batch that confirms the core plugins are stable.
    pub fn initial_sanity_batch(&self) -> Batch {
        Batch {
            members: Vec::new(),
            kind: BatchKind::Sanity,
        }
    }

    /// Up to `batch_size` untested plugins, normal plugins before patches.
    ///
    /// # Returns
    /// `None` once the untested pool is empty
    pub fn next_standard_batch(&self, load_order: &LoadOrder) -> Result<Option<Batch>, LoadOrderError> {
        let pool = self.ordered_pool(load_order);
        let members: Vec<String> = pool.into_iter().take(self.batch_size).collect();
        self.build(load_order, members, BatchKind::Standard)
    }

    /// The whole remaining untested pool as one batch.
    pub fn mega_batch(&self, load_order: &LoadOrder) -> Result<Option<Batch>, LoadOrderError> {
        let pool = self.ordered_pool(load_order);
        self.build(load_order, pool, BatchKind::Mega)
    }

    /// A single plugin tested alone on top of the full baseline.
    pub fn retest_batch(&self, load_order: &LoadOrder, plugin: &str) -> Result<Batch, LoadOrderError> {
        let name = load_order.batchable(plugin)?.name.clone();
        Ok(Batch {
            members: vec![name],
            kind: BatchKind::Retest,
        })
    }

    /// Split a failing batch.
    ///
    /// # Returns
    /// `None` for an empty batch, which has nothing to split
    pub fn subdivide(&self, batch: &Batch) -> Option<Subdivision> {
        match batch.members.as_slice() {
            [] => None,
            [only] => Some(Subdivision::Culprit(only.clone())),
            members => {
                let mid = members.len().div_ceil(2);
                let (left, right) = members.split_at(mid);
                Some(Subdivision::Halves {
                    left: Batch {
                        members: left.to_vec(),
                        kind: BatchKind::Subdivision,
                    },
                    right: Batch {
                        members: right.to_vec(),
                        kind: BatchKind::Subdivision,
                    },
                })
            }
        }
    }

    fn ordered_pool(&self, load_order: &LoadOrder) -> Vec<String> {
        let (patches, normal): (Vec<String>, Vec<String>) =
            load_order.untested_pool().into_iter().partition(|name| {
                load_order
                    .get(name)
                    .is_some_and(|p| p.category == PluginCategory::Patch)
            });
        normal.into_iter().chain(patches).collect()
    }

    fn build(
        &self,
        load_order: &LoadOrder,
        members: Vec<String>,
        kind: BatchKind,
    ) -> Result<Option<Batch>, LoadOrderError> {
        if members.is_empty() {
            return Ok(None);
        }
        for id in &members {
            load_order.batchable(id)?;
        }
        Ok(Some(Batch { members, kind }))
    }
}
