//! Pipeline summary metrics for dashboards and reports.
//!
//! # Invariants
//! - Metrics are pure functions of the given deal slice.
//! - Every stage appears in `count_by_stage`, zero-filled.

use crate::model::deal::{Deal, Stage};
use serde::Serialize;
use std::collections::BTreeMap;

/// Aggregate figures over a deal collection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineSummary {
    pub total_deals: usize,
    pub count_by_stage: BTreeMap<Stage, usize>,
    /// Sum of values for deals not yet won.
    pub open_value: f64,
    /// Sum of values in `ClosedWon`.
    pub won_value: f64,
    pub won_deals: usize,
    /// Won deals as a percentage of all deals, one decimal.
    pub conversion_rate: f64,
    /// Mean won deal value, rounded to whole currency units.
    pub average_won_value: f64,
    /// Open value scaled by each deal's probability.
    pub weighted_value: f64,
}

/// Computes summary metrics over `deals`.
pub fn summarize(deals: &[Deal]) -> PipelineSummary {
    let mut count_by_stage: BTreeMap<Stage, usize> =
        Stage::ALL.iter().map(|stage| (*stage, 0)).collect();
    let mut open_value = 0.0;
    let mut won_value = 0.0;
    let mut won_deals = 0;
    let mut weighted_value = 0.0;

    for deal in deals {
        *count_by_stage.entry(deal.stage).or_insert(0) += 1;
        if deal.stage.is_won() {
            won_value += deal.value;
            won_deals += 1;
        } else {
            open_value += deal.value;
            weighted_value += deal.weighted_value();
        }
    }

    let conversion_rate = if deals.is_empty() {
        0.0
    } else {
        round_to_tenth(won_deals as f64 / deals.len() as f64 * 100.0)
    };
    let average_won_value = if won_deals == 0 {
        0.0
    } else {
        (won_value / won_deals as f64).round()
    };

    PipelineSummary {
        total_deals: deals.len(),
        count_by_stage,
        open_value,
        won_value,
        won_deals,
        conversion_rate,
        average_won_value,
        weighted_value,
    }
}

fn round_to_tenth(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
