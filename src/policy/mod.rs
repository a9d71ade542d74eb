//! Policy estimator (C2): exact bust probability and expected single-decision
//! points for `k` remaining dice drawn from a loadout's averaged face
//! distribution.

use std::collections::HashMap;

use crate::error::{EngineError, Result};
use crate::scoring::score_packed;

/// Averages a loadout's per-die face-probability vectors into a single
/// length-6 distribution (`avg[i]` is the probability of face `i + 1`).
pub fn average_distribution(dice_probabilities: &[&[f64; 7]]) -> [f64; 6] {
    let mut avg = [0.0f64; 6];
    if dice_probabilities.is_empty() {
        return avg;
    }
    for probs in dice_probabilities {
        for face in 1..=6usize {
            avg[face - 1] += probs[face];
        }
    }
    let n = dice_probabilities.len() as f64;
    for v in &mut avg {
        *v /= n;
    }
    avg
}

fn avg_key(avg: &[f64; 6]) -> [u64; 6] {
    let mut key = [0u64; 6];
    for (i, &v) in avg.iter().enumerate() {
        key[i] = v.to_bits();
    }
    key
}

/// Exactly computes `(bust_probability, expected_value)` for `k` dice drawn
/// iid from `avg`, by summing over every multinomial face pattern of size `k`.
pub fn estimate_bust_and_ev_exact(avg: &[f64; 6], k: u8) -> Result<(f64, f64)> {
    let sum: f64 = avg.iter().sum();
    if sum <= 0.0 {
        return Err(EngineError::InvalidLoadout(
            "average face distribution sums to zero".to_string(),
        ));
    }
    if k == 0 {
        return Ok((0.0, 0.0));
    }

    let mut bust = 0.0;
    let mut ev = 0.0;

    for_each_pattern(k, &mut |counts| {
        let prob = multinomial_probability(counts, avg);
        if prob <= 0.0 {
            return;
        }
        let key = pack(counts);
        let selections = score_packed(key);
        if selections.is_empty() {
            bust += prob;
        } else {
            let best = selections.iter().map(|s| s.points).max().unwrap_or(0);
            ev += prob * best as f64;
        }
    });

    Ok((bust, ev))
}

fn pack(counts: &[u8; 6]) -> u32 {
    (counts[0] as u32)
        | ((counts[1] as u32) << 3)
        | ((counts[2] as u32) << 6)
        | ((counts[3] as u32) << 9)
        | ((counts[4] as u32) << 12)
        | ((counts[5] as u32) << 15)
}

fn multinomial_probability(counts: &[u8; 6], avg: &[f64; 6]) -> f64 {
    let n: u32 = counts.iter().map(|&c| c as u32).sum();
    let mut coeff = factorial(n);
    for &c in counts {
        coeff /= factorial(c as u32);
    }
    let mut prob = coeff as f64;
    for (face, &c) in counts.iter().enumerate() {
        if c > 0 {
            prob *= avg[face].powi(c as i32);
        }
    }
    prob
}

fn factorial(n: u32) -> u64 {
    (1..=n as u64).product::<u64>().max(1)
}

fn for_each_pattern<F: FnMut(&[u8; 6])>(k: u8, f: &mut F) {
    fn recurse<F: FnMut(&[u8; 6])>(counts: &mut [u8; 6], face: usize, remaining: u8, f: &mut F) {
        if face == 5 {
            counts[5] = remaining;
            f(counts);
            return;
        }
        for c in 0..=remaining {
            counts[face] = c;
            recurse(counts, face + 1, remaining - c, f);
        }
    }
    let mut counts = [0u8; 6];
    recurse(&mut counts, 0, k, f);
}

/// Memoizes `(bust, ev)` pairs per `(averaged distribution, k)`, avoiding
/// redundant enumeration for loadouts sharing the same averaged distribution.
#[derive(Default)]
pub struct PolicyEstimator {
    cache: HashMap<([u64; 6], u8), (f64, f64)>,
}

impl PolicyEstimator {
    /// Creates an empty estimator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `(bust, ev)` for `k` dice drawn from `avg`, computing and
    /// caching it on first request.
    pub fn bust_and_ev(&mut self, avg: &[f64; 6], k: u8) -> Result<(f64, f64)> {
        let cache_key = (avg_key(avg), k);
        if let Some(&cached) = self.cache.get(&cache_key) {
            return Ok(cached);
        }
        let result = estimate_bust_and_ev_exact(avg, k)?;
        self.cache.insert(cache_key, result);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn brute_force(avg: &[f64; 6], k: u8) -> (f64, f64) {
        let mut bust = 0.0;
        let mut ev = 0.0;
        let mut faces = vec![0u8; k as usize];
        brute_recurse(&mut faces, 0, avg, &mut bust, &mut ev);
        (bust, ev)
    }

    fn brute_recurse(faces: &mut [u8], pos: usize, avg: &[f64; 6], bust: &mut f64, ev: &mut f64) {
        if pos == faces.len() {
            let mut counts = [0u8; 6];
            let mut prob = 1.0;
            for &f in faces.iter() {
                counts[(f - 1) as usize] += 1;
                prob *= avg[(f - 1) as usize];
            }
            let selections = score_packed(pack(&counts));
            if selections.is_empty() {
                *bust += prob;
            } else {
                let best = selections.iter().map(|s| s.points).max().unwrap_or(0);
                *ev += prob * best as f64;
            }
            return;
        }
        for face in 1u8..=6 {
            faces[pos] = face;
            brute_recurse(faces, pos + 1, avg, bust, ev);
        }
    }

    #[test]
    fn s3_exact_matches_brute_force() {
        let avg = [0.30, 0.15, 0.05, 0.10, 0.20, 0.20];
        let (bust_exact, ev_exact) = estimate_bust_and_ev_exact(&avg, 3).unwrap();
        let (bust_brute, ev_brute) = brute_force(&avg, 3);
        assert!((bust_exact - bust_brute).abs() < 1e-9);
        assert!((ev_exact - ev_brute).abs() < 1e-9);
    }

    #[test]
    fn p4_matches_brute_force_for_k_one_to_four() {
        let avg = [0.30, 0.10, 0.10, 0.10, 0.20, 0.20];
        for k in 1u8..=4 {
            let (be, ee) = estimate_bust_and_ev_exact(&avg, k).unwrap();
            let (bb, eb) = brute_force(&avg, k);
            assert!((be - bb).abs() < 1e-9, "bust mismatch at k={k}");
            assert!((ee - eb).abs() < 1e-9, "ev mismatch at k={k}");
        }
    }

    #[test]
    fn zero_sum_distribution_is_invalid_loadout() {
        let avg = [0.0; 6];
        assert!(estimate_bust_and_ev_exact(&avg, 2).is_err());
    }

    #[test]
    fn memoization_returns_same_result() {
        let mut estimator = PolicyEstimator::new();
        let avg = [0.30, 0.15, 0.05, 0.10, 0.20, 0.20];
        let first = estimator.bust_and_ev(&avg, 3).unwrap();
        let second = estimator.bust_and_ev(&avg, 3).unwrap();
        assert_eq!(first, second);
    }
}
