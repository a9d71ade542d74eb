//! Turn simulator (C4): Monte Carlo campaigns of N turns for a loadout under
//! a risk policy, feeding the resulting score distribution into the DP
//! metrics fold (C3).

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::loadout::Loadout;
use crate::metrics::{self, TurnMetrics};
use crate::policy::{self, PolicyEstimator};
use crate::scoring::{score_packed, FaceCount};
use crate::seed;
use crate::settings::RiskPolicy;

/// Outcome of a full N-turn campaign for one loadout.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimulationResult {
    /// The CountVector this result was simulated for.
    pub counts: Vec<u32>,
    /// DP metrics folded from the campaign's per-turn score histogram.
    pub metrics: TurnMetrics,
    /// Mean points per turn (including busted turns, which score 0).
    pub mean_points: f64,
    /// Population standard deviation of points per turn.
    pub std: f64,
    /// Total multiplicity of each scoring-group tag across every banked turn.
    pub tag_counts: HashMap<String, u64>,
    /// Sum of every value in `tag_counts`; the ranking stage's percentage base.
    pub total_groups: u64,
    /// Number of turns (of the campaign) that ended banked rather than busted.
    pub scoring_turns: u64,
}

/// Runs `num_turns` independent turns for `loadout` under `policy`, banking
/// toward `target`.
///
/// `seed_base`, if given, makes the campaign reproducible: the RNG is seeded
/// once from `seed(seed_base, loadout.counts)` and consumed across every
/// turn. Without it, the RNG is seeded from the process clock.
#[allow(clippy::too_many_arguments)]
pub fn simulate_turns(
    loadout: &Loadout,
    policy: &RiskPolicy,
    target: u32,
    num_turns: u32,
    turn_cap: u32,
    prob_turn_checkpoints: &[u32],
    seed_base: Option<u64>,
) -> Result<SimulationResult> {
    let probs: Vec<&[f64; 7]> = loadout.dice.iter().map(|d| &d.probabilities).collect();
    let avg = policy::average_distribution(&probs);

    let rng_seed = match seed_base {
        Some(base) => seed::seed(base, &loadout.counts) as u64,
        None => clock_seed(),
    };
    let mut rng = SmallRng::seed_from_u64(rng_seed);

    let mut estimator = PolicyEstimator::new();
    let mut memo: HashMap<u32, usize> = HashMap::new();

    let mut histogram: HashMap<u32, u64> = HashMap::new();
    let mut tag_counts: HashMap<String, u64> = HashMap::new();
    let mut scoring_turns: u64 = 0;
    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;

    for _ in 0..num_turns {
        match run_one_turn(loadout, &avg, policy, target, &mut estimator, &mut memo, &mut rng)? {
            Some((points, turn_tags)) => {
                scoring_turns += 1;
                *histogram.entry(points).or_insert(0) += 1;
                sum += points as f64;
                sum_sq += (points as f64) * (points as f64);
                for (tag, count) in turn_tags {
                    *tag_counts.entry(tag).or_insert(0) += count as u64;
                }
            }
            None => {
                *histogram.entry(0).or_insert(0) += 1;
            }
        }
    }

    let n = num_turns as f64;
    let mean_points = if n > 0.0 { sum / n } else { 0.0 };
    let variance = if n > 0.0 {
        (sum_sq / n - mean_points * mean_points).max(0.0)
    } else {
        0.0
    };
    let std = variance.sqrt();

    let max_score = histogram.keys().copied().max().unwrap_or(0);
    let mut turn_distribution = vec![0.0f64; max_score as usize + 1];
    for (&points, &count) in &histogram {
        turn_distribution[points as usize] = count as f64 / n;
    }

    let mut turn_metrics = metrics::compute(&turn_distribution, target, turn_cap, prob_turn_checkpoints);
    turn_metrics.ev_points_se = if n > 0.0 { std / n.sqrt() } else { 0.0 };

    let total_groups = tag_counts.values().sum();

    Ok(SimulationResult {
        counts: loadout.counts.clone(),
        metrics: turn_metrics,
        mean_points,
        std,
        tag_counts,
        total_groups,
        scoring_turns,
    })
}

fn clock_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

fn sample_face(probabilities: &[f64; 7], rng: &mut SmallRng) -> u8 {
    let draw: f64 = rng.random();
    let mut cumulative = 0.0;
    for face in 1u8..=6 {
        cumulative += probabilities[face as usize];
        if draw < cumulative {
            return face;
        }
    }
    6
}

/// Runs a single turn to its `banked` or `busted` conclusion.
///
/// Returns `None` on bust (the whole turn's accumulation is forfeit), or
/// `Some((points, tags))` on bank.
fn run_one_turn(
    loadout: &Loadout,
    avg: &[f64; 6],
    policy: &RiskPolicy,
    target: u32,
    estimator: &mut PolicyEstimator,
    memo: &mut HashMap<u32, usize>,
    rng: &mut SmallRng,
) -> Result<Option<(u32, HashMap<String, u32>)>> {
    let mut remaining: Vec<usize> = (0..loadout.dice.len()).collect();
    let mut accumulated: u32 = 0;
    let mut turn_tags: HashMap<String, u32> = HashMap::new();

    loop {
        let mut face_count = FaceCount::ZERO;
        let mut by_face: [Vec<usize>; 6] =
            [Vec::new(), Vec::new(), Vec::new(), Vec::new(), Vec::new(), Vec::new()];
        for &idx in &remaining {
            let face = sample_face(&loadout.dice[idx].probabilities, rng);
            face_count.add_face(face);
            by_face[(face - 1) as usize].push(idx);
        }

        let key = face_count.pack();
        let selections = score_packed(key);
        if selections.is_empty() {
            return Ok(None);
        }

        let best_idx = *memo.entry(key).or_insert_with(|| {
            let total = face_count.total();
            let mut best = 0usize;
            let mut best_value = f64::NEG_INFINITY;
            for (i, sel) in selections.iter().enumerate() {
                let remaining_after = total.saturating_sub(sel.used_dice);
                let (bust, ev) = estimator.bust_and_ev(avg, remaining_after).unwrap_or((0.0, 0.0));
                let value = sel.points as f64 + policy.alpha * ev - policy.beta * bust * 500.0;
                if value > best_value {
                    best_value = value;
                    best = i;
                }
            }
            best
        });
        let selection = &selections[best_idx];

        for face in 0..6usize {
            let need = selection.used_counts[face] as usize;
            if need == 0 {
                continue;
            }
            let mut candidates = by_face[face].clone();
            candidates.sort_by(|&a, &b| {
                loadout.dice[a]
                    .quality
                    .partial_cmp(&loadout.dice[b].quality)
                    .unwrap()
            });
            for &idx in candidates.iter().take(need) {
                remaining.retain(|&x| x != idx);
            }
        }

        accumulated += selection.points;
        for (tag, mult) in &selection.tags {
            *turn_tags.entry(tag.clone()).or_insert(0) += *mult as u32;
        }

        if accumulated >= target {
            return Ok(Some((accumulated, turn_tags)));
        }
        if remaining.is_empty() {
            remaining = (0..loadout.dice.len()).collect();
            continue;
        }
        if accumulated >= policy.bank_threshold {
            return Ok(Some((accumulated, turn_tags)));
        }
        let (bust_now, _) = estimator.bust_and_ev(avg, remaining.len() as u8)?;
        if bust_now <= policy.bust_limit {
            continue;
        }
        return Ok(Some((accumulated, turn_tags)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dice::{Catalog, DieType};
    use crate::settings::{RiskPolicy, RiskProfile};

    fn deterministic_die(name: &str, face: u8) -> DieType {
        let mut probs = [0.0f64; 7];
        probs[face as usize] = 1.0;
        DieType::new(name, probs).unwrap()
    }

    #[test]
    fn always_ones_die_never_busts() {
        let catalog = Catalog::new(vec![deterministic_die("AlwaysOne", 1)]).unwrap();
        let loadout = Loadout::expand(&catalog, &vec![6]).unwrap();
        let policy = RiskPolicy::for_profile(RiskProfile::Conservative);
        let result = simulate_turns(&loadout, &policy, 100_000, 50, 60, &[10, 15, 20], Some(7)).unwrap();
        assert_eq!(result.scoring_turns, 50);
        assert!(result.mean_points > 0.0);
    }

    #[test]
    fn guaranteed_bust_loadout_never_scores() {
        let catalog = Catalog::new(vec![
            deterministic_die("Always2", 2),
            deterministic_die("Always3", 3),
            deterministic_die("Always4", 4),
        ])
        .unwrap();
        let loadout = Loadout::expand(&catalog, &vec![2, 2, 2]).unwrap();
        let policy = RiskPolicy::for_profile(RiskProfile::Balanced);
        let result = simulate_turns(&loadout, &policy, 2000, 25, 60, &[10], Some(11)).unwrap();
        assert_eq!(result.scoring_turns, 0);
        assert_eq!(result.mean_points, 0.0);
        assert_eq!(result.std, 0.0);
        assert!(result.tag_counts.is_empty());
    }

    #[test]
    fn same_seed_is_deterministic() {
        let catalog = Catalog::new(vec![
            DieType::new("Lucky", [0.0, 0.30, 0.10, 0.10, 0.10, 0.20, 0.20]).unwrap(),
        ])
        .unwrap();
        let loadout = Loadout::expand(&catalog, &vec![6]).unwrap();
        let policy = RiskPolicy::for_profile(RiskProfile::Balanced);
        let a = simulate_turns(&loadout, &policy, 2000, 200, 60, &[10, 15], Some(42)).unwrap();
        let b = simulate_turns(&loadout, &policy, 2000, 200, 60, &[10, 15], Some(42)).unwrap();
        assert_eq!(a.mean_points, b.mean_points);
        assert_eq!(a.scoring_turns, b.scoring_turns);
        assert_eq!(a.tag_counts, b.tag_counts);
    }

    #[test]
    fn counts_invariant_i1_holds() {
        let catalog = Catalog::new(vec![
            DieType::new("Lucky", [0.0, 0.30, 0.10, 0.10, 0.10, 0.20, 0.20]).unwrap(),
        ])
        .unwrap();
        let counts = vec![6u32];
        let loadout = Loadout::expand(&catalog, &counts).unwrap();
        let policy = RiskPolicy::for_profile(RiskProfile::Balanced);
        let result = simulate_turns(&loadout, &policy, 2000, 10, 60, &[10], Some(1)).unwrap();
        assert_eq!(result.counts, counts);
        assert_eq!(result.counts.iter().sum::<u32>(), 6);
    }
}
