//! Settings & validators (C11): run configuration, risk profiles, and the
//! efficiency (staged-pruning) plan.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Named risk appetite, each mapping to a fixed `(alpha, beta, bank_threshold,
/// bust_limit)` tuple (see [`RiskPolicy::for_profile`]).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskProfile {
    /// Bank early, avoid risk.
    Conservative,
    /// The default middle ground.
    Balanced,
    /// Push turns further, accept higher bust odds.
    Aggressive,
}

/// `(alpha, beta, bank_threshold, bust_limit)`: how the turn simulator weighs
/// continuation value against bust risk, and when it banks regardless.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RiskPolicy {
    /// Weight applied to the expected continuation value.
    pub alpha: f64,
    /// Weight applied to the bust probability penalty.
    pub beta: f64,
    /// Accumulated-points threshold above which the turn banks unconditionally.
    pub bank_threshold: u32,
    /// Bust-probability ceiling above which the turn banks rather than rolls.
    pub bust_limit: f64,
}

impl RiskPolicy {
    /// The fixed risk-profile table from the external interface contract.
    pub const fn for_profile(profile: RiskProfile) -> Self {
        match profile {
            RiskProfile::Conservative => Self {
                alpha: 0.6,
                beta: 1.4,
                bank_threshold: 300,
                bust_limit: 0.25,
            },
            RiskProfile::Balanced => Self {
                alpha: 0.8,
                beta: 1.1,
                bank_threshold: 200,
                bust_limit: 0.35,
            },
            RiskProfile::Aggressive => Self {
                alpha: 1.0,
                beta: 0.9,
                bank_threshold: 120,
                bust_limit: 0.45,
            },
        }
    }
}

/// The rank function the caller wants loadouts optimized for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Objective {
    /// Minimize expected turns to target (ties broken by higher expected points).
    MaxScore,
    /// Maximize frequency of the `single_1` tag.
    SingleOne,
    /// Maximize frequency of the `single_5` tag.
    SingleFive,
    /// Maximize frequency of the `straight_1_5` tag.
    Straight1To5,
    /// Maximize frequency of the `straight_2_6` tag.
    Straight2To6,
    /// Maximize frequency of the `straight_1_6` tag.
    Straight1To6,
    /// Maximize frequency across all three straight tags combined.
    Straight,
    /// Maximize frequency of `kind_<face>_*ok` tags for a specific face (3+ of a kind).
    Kind3Plus(u8),
}

/// One row of the staged-pruning efficiency plan.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EfficiencyStage {
    /// Stage is skipped unless at least this many candidates remain.
    pub min_total: u64,
    /// Turns simulated per loadout during this stage (pilot fidelity).
    pub pilot_turns: u32,
    /// Percentage of candidates kept after ranking (0, 100].
    pub keep_percent: f64,
    /// Slack applied to the survivor cutoff.
    pub epsilon: f64,
    /// Minimum number of survivors retained regardless of `keep_percent`.
    pub min_survivors: u64,
}

/// The default four-stage plan from the external interface contract.
pub const DEFAULT_EFFICIENCY_PLAN: [EfficiencyStage; 4] = [
    EfficiencyStage {
        min_total: 100_000,
        pilot_turns: 100,
        keep_percent: 30.0,
        epsilon: 0.10,
        min_survivors: 100,
    },
    EfficiencyStage {
        min_total: 10_000,
        pilot_turns: 500,
        keep_percent: 10.0,
        epsilon: 0.05,
        min_survivors: 100,
    },
    EfficiencyStage {
        min_total: 1_000,
        pilot_turns: 1000,
        keep_percent: 10.0,
        epsilon: 0.00,
        min_survivors: 100,
    },
    EfficiencyStage {
        min_total: 0,
        pilot_turns: 50_000,
        keep_percent: 100.0,
        epsilon: 0.00,
        min_survivors: 100,
    },
];

/// Full run configuration for an optimization pass.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OptimizationSettings {
    /// Accumulated-points target that ends a turn in a `banked` state.
    pub target: u32,
    /// Hard cap on turns considered by the DP metric fold.
    pub turn_cap: u32,
    /// Number of Monte Carlo turns simulated per loadout (overridden per stage).
    pub num_turns: u32,
    /// Which named risk profile governs the turn simulator's policy.
    pub risk_profile: RiskProfile,
    /// The rank function used to order and prune candidates.
    pub objective: Objective,
    /// Turn checkpoints to report `p_within` for (default `{10, 15, 20}`).
    pub prob_turn_checkpoints: Vec<u32>,
    /// Whether staged pruning (pilot -> full) is enabled.
    pub efficiency_enabled: bool,
    /// Base seed offset added to the stage index to seed pilot stages.
    pub efficiency_seed: u64,
    /// The staged-pruning plan, validated by [`EfficiencyPlanValidator`].
    pub stages: Vec<EfficiencyStage>,
}

impl OptimizationSettings {
    /// Convenience constructor using the default efficiency plan and checkpoints.
    pub fn new(target: u32, num_turns: u32, risk_profile: RiskProfile, objective: Objective) -> Self {
        Self {
            target,
            turn_cap: 60,
            num_turns,
            risk_profile,
            objective,
            prob_turn_checkpoints: vec![10, 15, 20],
            efficiency_enabled: true,
            efficiency_seed: 0,
            stages: DEFAULT_EFFICIENCY_PLAN.to_vec(),
        }
    }

    /// The resolved [`RiskPolicy`] for this run's risk profile.
    pub fn risk_policy(&self) -> RiskPolicy {
        RiskPolicy::for_profile(self.risk_profile)
    }
}

/// Validates an [`EfficiencyStage`] plan: per-row bounds, and cross-row
/// monotonicity (non-increasing `min_total`, strictly increasing `pilot_turns`).
pub struct EfficiencyPlanValidator;

impl EfficiencyPlanValidator {
    /// Validates `stages`, returning the collected error list on failure.
    pub fn validate(stages: &[EfficiencyStage]) -> Result<()> {
        let mut errors = Vec::new();

        for (i, stage) in stages.iter().enumerate() {
            if stage.pilot_turns < 1 {
                errors.push(format!("stage {i}: pilot_turns must be >= 1"));
            }
            if !(stage.keep_percent > 0.0 && stage.keep_percent <= 100.0) {
                errors.push(format!("stage {i}: keep_percent must be in (0, 100]"));
            }
            if stage.epsilon < 0.0 {
                errors.push(format!("stage {i}: epsilon must be >= 0"));
            }
            if stage.min_survivors < 1 {
                errors.push(format!("stage {i}: min_survivors must be >= 1"));
            }
        }

        for pair in stages.windows(2) {
            if pair[1].min_total > pair[0].min_total {
                errors.push(format!(
                    "stage min_total must be non-increasing: {} then {}",
                    pair[0].min_total, pair[1].min_total
                ));
            }
            if pair[1].pilot_turns <= pair[0].pilot_turns {
                errors.push(format!(
                    "stage pilot_turns must be strictly increasing: {} then {}",
                    pair[0].pilot_turns, pair[1].pilot_turns
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(EngineError::InvalidPlan { errors })
        }
    }
}

/// A heterogeneous, not-yet-validated stage row as it might arrive from an
/// external settings source (e.g. a config file with loosely typed numerics).
#[derive(Clone, Debug, Deserialize)]
pub struct RawEfficiencyStage {
    /// See [`EfficiencyStage::min_total`]; accepted as any JSON number.
    pub min_total: serde_json::Number,
    /// See [`EfficiencyStage::pilot_turns`].
    pub pilot_turns: serde_json::Number,
    /// See [`EfficiencyStage::keep_percent`].
    pub keep_percent: serde_json::Number,
    /// See [`EfficiencyStage::epsilon`].
    pub epsilon: serde_json::Number,
    /// See [`EfficiencyStage::min_survivors`].
    pub min_survivors: serde_json::Number,
}

/// Coerces and clamps external, loosely-typed stage rows into valid
/// [`EfficiencyStage`]s, dropping rows whose numerics can't be coerced.
pub struct Normalizer;

impl Normalizer {
    /// Normalizes raw rows, collecting one error string per dropped row.
    pub fn normalize(rows: &[RawEfficiencyStage]) -> (Vec<EfficiencyStage>, Vec<String>) {
        let mut stages = Vec::new();
        let mut errors = Vec::new();

        for (i, row) in rows.iter().enumerate() {
            let parsed = (|| -> Option<EfficiencyStage> {
                Some(EfficiencyStage {
                    min_total: coerce_u64(&row.min_total)?,
                    pilot_turns: coerce_u64(&row.pilot_turns)?.max(1) as u32,
                    keep_percent: row.keep_percent.as_f64()?.clamp(0.0001, 100.0),
                    epsilon: row.epsilon.as_f64()?.max(0.0),
                    min_survivors: coerce_u64(&row.min_survivors)?.max(1),
                })
            })();

            match parsed {
                Some(stage) => stages.push(stage),
                None => errors.push(format!("row {i}: could not coerce numeric fields")),
            }
        }

        (stages, errors)
    }
}

/// Coerces a JSON number to `u64`, accepting integral floats (e.g. `100000.0`)
/// in addition to integer literals. Rejects negative or non-finite values.
fn coerce_u64(n: &serde_json::Number) -> Option<u64> {
    if let Some(v) = n.as_u64() {
        return Some(v);
    }
    let f = n.as_f64()?;
    if !f.is_finite() || f < 0.0 {
        return None;
    }
    Some(f.round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_plan_validates() {
        assert!(EfficiencyPlanValidator::validate(&DEFAULT_EFFICIENCY_PLAN).is_ok());
    }

    #[test]
    fn rejects_non_monotonic_min_total() {
        let mut stages = DEFAULT_EFFICIENCY_PLAN.to_vec();
        stages[1].min_total = stages[0].min_total + 1;
        assert!(EfficiencyPlanValidator::validate(&stages).is_err());
    }

    #[test]
    fn rejects_non_increasing_pilot_turns() {
        let mut stages = DEFAULT_EFFICIENCY_PLAN.to_vec();
        stages[1].pilot_turns = stages[0].pilot_turns;
        assert!(EfficiencyPlanValidator::validate(&stages).is_err());
    }

    #[test]
    fn risk_profile_table_matches_spec() {
        let balanced = RiskPolicy::for_profile(RiskProfile::Balanced);
        assert_eq!(balanced.alpha, 0.8);
        assert_eq!(balanced.beta, 1.1);
        assert_eq!(balanced.bank_threshold, 200);
        assert_eq!(balanced.bust_limit, 0.35);
    }

    #[test]
    fn normalizer_drops_uncoercible_rows() {
        let rows = vec![RawEfficiencyStage {
            min_total: serde_json::Number::from(10),
            pilot_turns: serde_json::Number::from(5),
            keep_percent: serde_json::Number::from_f64(50.0).unwrap(),
            epsilon: serde_json::Number::from_f64(0.1).unwrap(),
            min_survivors: serde_json::Number::from(1),
        }];
        let (stages, errors) = Normalizer::normalize(&rows);
        assert_eq!(stages.len(), 1);
        assert!(errors.is_empty());
    }

    #[test]
    fn normalizer_coerces_integral_float_rows() {
        let rows = vec![RawEfficiencyStage {
            min_total: serde_json::Number::from_f64(100_000.0).unwrap(),
            pilot_turns: serde_json::Number::from_f64(30.0).unwrap(),
            keep_percent: serde_json::Number::from_f64(50.0).unwrap(),
            epsilon: serde_json::Number::from_f64(0.1).unwrap(),
            min_survivors: serde_json::Number::from_f64(5.0).unwrap(),
        }];
        let (stages, errors) = Normalizer::normalize(&rows);
        assert!(errors.is_empty());
        assert_eq!(stages.len(), 1);
        assert_eq!(stages[0].min_total, 100_000);
        assert_eq!(stages[0].pilot_turns, 30);
        assert_eq!(stages[0].min_survivors, 5);
    }

    #[test]
    fn normalizer_drops_negative_rows() {
        let rows = vec![RawEfficiencyStage {
            min_total: serde_json::Number::from_f64(-1.0).unwrap(),
            pilot_turns: serde_json::Number::from(5),
            keep_percent: serde_json::Number::from_f64(50.0).unwrap(),
            epsilon: serde_json::Number::from_f64(0.1).unwrap(),
            min_survivors: serde_json::Number::from(1),
        }];
        let (stages, errors) = Normalizer::normalize(&rows);
        assert!(stages.is_empty());
        assert_eq!(errors.len(), 1);
    }
}
