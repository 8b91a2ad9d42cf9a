//! Per-stage grouping of a deal collection.
//!
//! # Responsibility
//! - Partition deals by stage for the pipeline board.
//! - Derive per-stage monetary totals.
//!
//! # Invariants
//! - Every stage has a group, including stages with no deals.
//! - Deals keep their collection order inside a group.
//! - `total` always equals the sum of `value` over `deals`.

use crate::model::deal::{Deal, Stage};
use serde::Serialize;
use std::collections::BTreeMap;

/// Deals currently assigned to one stage, plus their summed value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageGroup {
    pub stage: Stage,
    pub deals: Vec<Deal>,
    pub total: f64,
}

impl StageGroup {
    fn empty(stage: Stage) -> Self {
        Self {
            stage,
            deals: Vec::new(),
            total: 0.0,
        }
    }

    /// Number of deals in this stage.
    pub fn count(&self) -> usize {
        self.deals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deals.is_empty()
    }
}

/// Groups `deals` by stage, keyed and iterated in board order.
pub fn group_by_stage(deals: &[Deal]) -> BTreeMap<Stage, StageGroup> {
    let mut groups: BTreeMap<Stage, StageGroup> = Stage::ALL
        .iter()
        .map(|stage| (*stage, StageGroup::empty(*stage)))
        .collect();

    for deal in deals {
        if let Some(group) = groups.get_mut(&deal.stage) {
            group.total += deal.value;
            group.deals.push(deal.clone());
        }
    }

    groups
}

/// Sum of `value` over deals in `stage`.
pub fn stage_total(deals: &[Deal], stage: Stage) -> f64 {
    deals
        .iter()
        .filter(|deal| deal.stage == stage)
        .map(|deal| deal.value)
        .sum()
}
