use serde::{Deserialize, Serialize};

use crate::poll::Response;

/// Per-option tally in input order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionTally {
    pub option: String,
    pub count: u32,
    pub percentage: f64,
}

/// Derived result snapshot. Never stored — recomputed on demand.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateResult {
    pub results: Vec<OptionTally>,
    pub total_responses: u32,
    pub total_students: u32,
}

/// Count responses per option, in option order. Answers that match no
/// listed option still count toward `total_responses` but land in no
/// bucket, so percentages may sum below 100 — callers tolerate this.
/// Deterministic and side-effect-free.
pub fn compute(options: &[String], responses: &[Response], total_students: u32) -> AggregateResult {
    let total_responses = responses.len() as u32;

    let results = options
        .iter()
        .map(|option| {
            let count = responses.iter().filter(|r| &r.answer == option).count() as u32;
            let percentage = if total_responses == 0 {
                0.0
            } else {
                round1(count as f64 / total_responses as f64 * 100.0)
            };
            OptionTally {
                option: option.clone(),
                count,
                percentage,
            }
        })
        .collect();

    AggregateResult {
        results,
        total_responses,
        total_students,
    }
}

fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}
