//! DP metrics (C3): folds a per-turn score distribution into expected turns
//! to target, percentiles, and reach-by-turn probabilities.
//!
//! Each turn is treated as an independent draw from `turn_distribution`
//! (indexed by score, `turn_distribution[s]` is the probability of scoring
//! exactly `s` points in one turn). The "below-target" state distribution is
//! propagated forward turn by turn; once its surviving mass is negligible the
//! iteration stops early.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Folded metrics describing how quickly a score distribution reaches a target.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TurnMetrics {
    /// Expected number of turns to reach `target`.
    pub ev_turns: f64,
    /// Probability of having reached `target` by each requested checkpoint turn.
    pub p_within: BTreeMap<u32, f64>,
    /// Unconditional expected points per turn (`Σ s·p(s)`).
    pub ev_points: f64,
    /// Smallest turn at which cumulative reach probability is >= 0.5 (or `+inf`).
    pub p50_turns: f64,
    /// Smallest turn at which cumulative reach probability is >= 0.9 (or `+inf`).
    pub p90_turns: f64,
    /// Standard error of `ev_points`, filled in by the caller (e.g. `std/sqrt(N)`).
    pub ev_points_se: f64,
}

const CONVERGENCE_THRESHOLD: f64 = 0.995;

/// Computes [`TurnMetrics`] for a per-turn score distribution.
///
/// `turn_distribution[s]` is the probability of scoring exactly `s` points in
/// one turn (including `turn_distribution[0]` for a bust/zero turn).
pub fn compute(
    turn_distribution: &[f64],
    target: u32,
    max_turns: u32,
    prob_turn_checkpoints: &[u32],
) -> TurnMetrics {
    let ev_points: f64 = turn_distribution
        .iter()
        .enumerate()
        .map(|(s, &p)| s as f64 * p)
        .sum();

    if target == 0 {
        return TurnMetrics {
            ev_turns: 0.0,
            p_within: prob_turn_checkpoints.iter().map(|&t| (t, 1.0)).collect(),
            ev_points,
            p50_turns: 1.0,
            p90_turns: 1.0,
            ev_points_se: 0.0,
        };
    }

    let support = turn_distribution.iter().filter(|&&p| p > 0.0).count();
    if support <= 1 {
        return TurnMetrics {
            ev_turns: f64::INFINITY,
            p_within: prob_turn_checkpoints.iter().map(|&t| (t, 0.0)).collect(),
            ev_points,
            p50_turns: f64::INFINITY,
            p90_turns: f64::INFINITY,
            ev_points_se: 0.0,
        };
    }

    let target = target as usize;
    let mut below = vec![0.0f64; target];
    below[0] = 1.0;

    let mut reached_by: Vec<f64> = Vec::with_capacity(max_turns as usize);

    for _turn in 1..=max_turns {
        let mut next_below = vec![0.0f64; target];
        for (x, &mass) in below.iter().enumerate() {
            if mass <= 0.0 {
                continue;
            }
            for (s, &p) in turn_distribution.iter().enumerate() {
                if p <= 0.0 || s >= target {
                    continue;
                }
                let nx = x + s;
                if nx < target {
                    next_below[nx] += mass * p;
                }
            }
        }
        let reached = 1.0 - next_below.iter().sum::<f64>();
        reached_by.push(reached);
        below = next_below;
        if reached >= CONVERGENCE_THRESHOLD {
            break;
        }
    }

    let ev_turns: f64 = reached_by.iter().map(|&r| 1.0 - r).sum();

    let lookup = |t: u32| -> f64 {
        if t == 0 {
            return 0.0;
        }
        let idx = t as usize - 1;
        if idx < reached_by.len() {
            reached_by[idx]
        } else {
            *reached_by.last().unwrap_or(&0.0)
        }
    };

    let p_within = prob_turn_checkpoints
        .iter()
        .map(|&t| (t, lookup(t)))
        .collect();

    let percentile = |p: f64| -> f64 {
        reached_by
            .iter()
            .position(|&r| r >= p)
            .map(|idx| (idx + 1) as f64)
            .unwrap_or(f64::INFINITY)
    };

    TurnMetrics {
        ev_turns,
        p_within,
        ev_points,
        p50_turns: percentile(0.5),
        p90_turns: percentile(0.9),
        ev_points_se: 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dist_at(points: &[(usize, f64)], len: usize) -> Vec<f64> {
        let mut d = vec![0.0; len];
        for &(s, p) in points {
            d[s] = p;
        }
        d
    }

    #[test]
    fn s2_two_point_distribution() {
        let dist = dist_at(&[(0, 0.5), (200, 0.5)], 201);
        let metrics = compute(&dist, 200, 5, &[1, 2]);
        assert!((metrics.p_within[&1] - 0.5).abs() < 1e-9);
        assert!((metrics.p_within[&2] - 0.75).abs() < 1e-9);
    }

    #[test]
    fn p5_p_within_nondecreasing_and_percentiles_ordered() {
        let dist = dist_at(&[(0, 0.3), (50, 0.3), (150, 0.4)], 200);
        let metrics = compute(&dist, 200, 60, &[5, 10, 20, 40]);
        let mut prev = 0.0;
        for &t in &[5u32, 10, 20, 40] {
            let v = metrics.p_within[&t];
            assert!(v + 1e-9 >= prev);
            prev = v;
        }
        assert!(metrics.p50_turns <= metrics.p90_turns);
    }

    #[test]
    fn p5_zero_target_boundary() {
        let dist = dist_at(&[(0, 0.5), (10, 0.5)], 11);
        let metrics = compute(&dist, 0, 60, &[10, 15, 20]);
        assert_eq!(metrics.ev_turns, 0.0);
        assert_eq!(metrics.p50_turns, 1.0);
        assert_eq!(metrics.p90_turns, 1.0);
        for &t in &[10u32, 15, 20] {
            assert_eq!(metrics.p_within[&t], 1.0);
        }
    }

    #[test]
    fn p5_degenerate_distribution_is_infinite() {
        let dist = dist_at(&[(50, 1.0)], 60);
        let metrics = compute(&dist, 200, 60, &[10]);
        assert_eq!(metrics.ev_turns, f64::INFINITY);
        assert_eq!(metrics.p50_turns, f64::INFINITY);
        assert_eq!(metrics.p90_turns, f64::INFINITY);
    }
}
