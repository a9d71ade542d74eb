//! Ranking (C10): objective scoring, sort-key construction, and the
//! UI-facing grouped hand-frequency breakdown.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::settings::Objective;
use crate::simulate::SimulationResult;

/// Fraction (0.0..=1.0) of a result's total scoring groups matching
/// `objective`. `MaxScore` has no per-result score; rank by [`rank_key`] instead.
pub fn objective_score(result: &SimulationResult, objective: Objective) -> f64 {
    if result.total_groups == 0 {
        return 0.0;
    }
    let total = result.total_groups as f64;
    let tag = |name: &str| *result.tag_counts.get(name).unwrap_or(&0) as f64;

    match objective {
        Objective::MaxScore => 0.0,
        Objective::SingleOne => tag("single_1") / total,
        Objective::SingleFive => tag("single_5") / total,
        Objective::Straight1To5 => tag("straight_1_5") / total,
        Objective::Straight2To6 => tag("straight_2_6") / total,
        Objective::Straight1To6 => tag("straight_1_6") / total,
        Objective::Straight => {
            (tag("straight_1_5") + tag("straight_2_6") + tag("straight_1_6")) / total
        }
        Objective::Kind3Plus(face) => {
            let prefix = format!("kind_{face}_");
            let sum: f64 = result
                .tag_counts
                .iter()
                .filter(|(k, _)| k.starts_with(&prefix))
                .map(|(_, &v)| v as f64)
                .sum();
            sum / total
        }
    }
}

/// Ascending sort key: smaller is better. `MaxScore` ranks by
/// `(ev_turns, -ev_points)`; every other objective ranks by
/// `(-objective_score, ev_turns)`.
pub fn rank_key(result: &SimulationResult, objective: Objective) -> (f64, f64) {
    match objective {
        Objective::MaxScore => (result.metrics.ev_turns, -result.metrics.ev_points),
        other => (-objective_score(result, other), result.metrics.ev_turns),
    }
}

/// Sorts `results` best-first under `objective`.
pub fn rank<'a>(results: &'a [SimulationResult], objective: Objective) -> Vec<&'a SimulationResult> {
    let mut ranked: Vec<&SimulationResult> = results.iter().collect();
    ranked.sort_by(|a, b| {
        rank_key(a, objective)
            .partial_cmp(&rank_key(b, objective))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    ranked
}

/// UI-facing hand-frequency breakdown: integer percentages of `total_groups`,
/// rounded half-to-even.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupedHandPercentages {
    /// `single_1` frequency.
    #[serde(rename = "1_ok")]
    pub single_ones: i64,
    /// Combined `kind_<face>_3ok` frequency across all faces.
    #[serde(rename = "3_ok")]
    pub three_ok: i64,
    /// Combined `kind_<face>_4ok` frequency across all faces.
    #[serde(rename = "4_ok")]
    pub four_ok: i64,
    /// Combined `kind_<face>_5ok` frequency across all faces.
    #[serde(rename = "5_ok")]
    pub five_ok: i64,
    /// Combined `kind_<face>_6ok` frequency across all faces.
    #[serde(rename = "6_ok")]
    pub six_ok: i64,
    /// `straight_1_5` frequency: straights topping out at 5.
    #[serde(rename = "5_s")]
    pub straight_to_five: i64,
    /// Combined `straight_2_6` + `straight_1_6` frequency: straights topping out at 6.
    #[serde(rename = "6_s")]
    pub straight_to_six: i64,
}

impl GroupedHandPercentages {
    /// Builds the grouped breakdown from raw tag counts.
    pub fn from_tag_counts(tag_counts: &HashMap<String, u64>, total_groups: u64) -> Self {
        if total_groups == 0 {
            return Self::default();
        }
        let total = total_groups as f64;
        let tag = |name: &str| *tag_counts.get(name).unwrap_or(&0);
        let kind_sum_ending = |suffix: &str| -> u64 {
            tag_counts
                .iter()
                .filter(|(k, _)| k.starts_with("kind_") && k.ends_with(suffix))
                .map(|(_, &v)| v)
                .sum()
        };
        let pct = |count: u64| round_half_to_even(count as f64 / total * 100.0);

        Self {
            single_ones: pct(tag("single_1")),
            three_ok: pct(kind_sum_ending("_3ok")),
            four_ok: pct(kind_sum_ending("_4ok")),
            five_ok: pct(kind_sum_ending("_5ok")),
            six_ok: pct(kind_sum_ending("_6ok")),
            straight_to_five: pct(tag("straight_1_5")),
            straight_to_six: pct(tag("straight_2_6") + tag("straight_1_6")),
        }
    }
}

fn round_half_to_even(x: f64) -> i64 {
    let down = x.floor();
    let frac = x - down;
    let down = down as i64;
    if (frac - 0.5).abs() < 1e-9 {
        if down % 2 == 0 {
            down
        } else {
            down + 1
        }
    } else if frac < 0.5 {
        down
    } else {
        down + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::TurnMetrics;
    use std::collections::BTreeMap;

    fn result_with(tag_counts: HashMap<String, u64>, total_groups: u64, ev_turns: f64, ev_points: f64) -> SimulationResult {
        SimulationResult {
            counts: vec![6],
            metrics: TurnMetrics {
                ev_turns,
                p_within: BTreeMap::new(),
                ev_points,
                p50_turns: 1.0,
                p90_turns: 1.0,
                ev_points_se: 0.0,
            },
            mean_points: ev_points,
            std: 0.0,
            tag_counts,
            total_groups,
            scoring_turns: 1,
        }
    }

    #[test]
    fn s7_grouped_percentages_match_spec_example() {
        let tags: HashMap<String, u64> = [
            ("single_1".to_string(), 10),
            ("kind_1_3ok".to_string(), 5),
            ("kind_2_4ok".to_string(), 3),
            ("kind_3_5ok".to_string(), 2),
            ("kind_4_6ok".to_string(), 1),
            ("straight_1_5".to_string(), 4),
            ("straight_1_6".to_string(), 2),
        ]
        .into_iter()
        .collect();
        let grouped = GroupedHandPercentages::from_tag_counts(&tags, 27);
        assert_eq!(grouped.single_ones, 37);
        assert_eq!(grouped.three_ok, 19);
        assert_eq!(grouped.four_ok, 11);
        assert_eq!(grouped.five_ok, 7);
        assert_eq!(grouped.six_ok, 4);
        assert_eq!(grouped.straight_to_five, 15);
        assert_eq!(grouped.straight_to_six, 7);
    }

    #[test]
    fn p11_max_score_prefers_lower_ev_turns_then_higher_ev_points() {
        let a = result_with(HashMap::new(), 0, 5.0, 1000.0);
        let b = result_with(HashMap::new(), 0, 4.0, 500.0);
        let c = result_with(HashMap::new(), 0, 4.0, 900.0);
        let ranked = rank(&[a, b, c], Objective::MaxScore);
        assert_eq!(ranked[0].metrics.ev_turns, 4.0);
        assert_eq!(ranked[0].metrics.ev_points, 900.0);
        assert_eq!(ranked[2].metrics.ev_turns, 5.0);
    }

    #[test]
    fn p11_other_objective_prefers_higher_score_then_lower_ev_turns() {
        let tags_high: HashMap<String, u64> = [("single_1".to_string(), 8)].into_iter().collect();
        let tags_low: HashMap<String, u64> = [("single_1".to_string(), 2)].into_iter().collect();
        let a = result_with(tags_high, 10, 6.0, 100.0);
        let b = result_with(tags_low, 10, 3.0, 100.0);
        let ranked = rank(&[a, b], Objective::SingleOne);
        assert_eq!(ranked[0].tag_counts.get("single_1"), Some(&8));
    }

    #[test]
    fn zero_total_groups_yields_zero_percentages() {
        let grouped = GroupedHandPercentages::from_tag_counts(&HashMap::new(), 0);
        assert_eq!(grouped, GroupedHandPercentages::default());
    }
}
