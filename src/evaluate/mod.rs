//! Evaluator (C6): the single entry point from a CountVector to a
//! [`SimulationResult`], plus an ordered, cancellable batch driver.

use crate::cancel::CancellationToken;
use crate::dice::Catalog;
use crate::error::{EngineError, Result};
use crate::loadout::{CountVector, Loadout};
use crate::settings::OptimizationSettings;
use crate::simulate::{self, SimulationResult};

/// Evaluates one CountVector under `settings`, delegating to the turn
/// simulator (C4).
pub fn evaluate_single(
    counts: &CountVector,
    catalog: &Catalog,
    settings: &OptimizationSettings,
    seed_base: Option<u64>,
) -> Result<SimulationResult> {
    let loadout = Loadout::expand(catalog, counts)?;
    let policy = settings.risk_policy();
    simulate::simulate_turns(
        &loadout,
        &policy,
        settings.target,
        settings.num_turns,
        settings.turn_cap,
        &settings.prob_turn_checkpoints,
        seed_base,
    )
}

/// Evaluates every CountVector in `list`, in order, checking `cancellation`
/// before each element. A token canceled before this call returns `Canceled`
/// immediately without evaluating anything.
pub fn evaluate_batch(
    list: &[CountVector],
    catalog: &Catalog,
    settings: &OptimizationSettings,
    seed_base: Option<u64>,
    cancellation: &CancellationToken,
) -> Result<Vec<SimulationResult>> {
    let mut out = Vec::with_capacity(list.len());
    for counts in list {
        if cancellation.is_canceled() {
            return Err(EngineError::Canceled);
        }
        out.push(evaluate_single(counts, catalog, settings, seed_base)?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dice::DieType;
    use crate::settings::{Objective, RiskProfile};

    fn catalog() -> Catalog {
        Catalog::new(vec![DieType::new(
            "Lucky",
            [0.0, 0.30, 0.10, 0.10, 0.10, 0.20, 0.20],
        )
        .unwrap()])
        .unwrap()
    }

    #[test]
    fn evaluate_single_matches_simulate_directly() {
        let catalog = catalog();
        let settings = OptimizationSettings::new(2000, 50, RiskProfile::Balanced, Objective::MaxScore);
        let counts = vec![6u32];
        let result = evaluate_single(&counts, &catalog, &settings, Some(3)).unwrap();
        assert_eq!(result.counts, counts);
    }

    #[test]
    fn evaluate_batch_preserves_order() {
        let catalog = catalog();
        let settings = OptimizationSettings::new(2000, 20, RiskProfile::Balanced, Objective::MaxScore);
        let list = vec![vec![6u32]];
        let token = CancellationToken::new();
        let results = evaluate_batch(&list, &catalog, &settings, Some(1), &token).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].counts, list[0]);
    }

    #[test]
    fn p12_precanceled_token_stops_batch_immediately() {
        let catalog = catalog();
        let settings = OptimizationSettings::new(2000, 20, RiskProfile::Balanced, Objective::MaxScore);
        let list = vec![vec![6u32]];
        let token = CancellationToken::new();
        token.cancel();
        let result = evaluate_batch(&list, &catalog, &settings, Some(1), &token);
        assert!(matches!(result, Err(EngineError::Canceled)));
    }
}
