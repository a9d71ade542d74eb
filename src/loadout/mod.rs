//! Loadout search (C5): enumerating and sampling CountVectors over a die
//! inventory, and expanding a CountVector into a concrete [`Loadout`].

use std::collections::HashSet;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::dice::Catalog;
use crate::error::{EngineError, Result};

/// A length-N vector of non-negative per-catalog-index die counts.
pub type CountVector = Vec<u32>;

/// One die within an expanded loadout: its catalog identity, tie-break
/// quality, and face-probability vector, copied out so the simulator can run
/// without re-touching the catalog.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LoadoutDie {
    /// Index of this die's type in the originating catalog.
    pub catalog_index: usize,
    /// `DieType::quality`, used as the spend-order tie-break.
    pub quality: f64,
    /// `DieType::probabilities`, the length-7 face distribution.
    pub probabilities: [f64; 7],
}

/// A concrete multiset of six dice, expanded from a [`CountVector`].
#[derive(Clone, Debug, PartialEq)]
pub struct Loadout {
    /// The six dice, in catalog order (not spend order).
    pub dice: Vec<LoadoutDie>,
    /// The CountVector this loadout was expanded from.
    pub counts: CountVector,
}

impl Loadout {
    /// Expands a CountVector against a catalog into a concrete loadout.
    ///
    /// `counts` must have one entry per catalog die and sum to exactly 6.
    pub fn expand(catalog: &Catalog, counts: &CountVector) -> Result<Self> {
        if counts.len() != catalog.len() {
            return Err(EngineError::InvalidLoadout(format!(
                "count vector has {} entries, catalog has {}",
                counts.len(),
                catalog.len()
            )));
        }
        let total: u32 = counts.iter().sum();
        if total != 6 {
            return Err(EngineError::InvalidLoadout(format!(
                "loadout must total 6 dice, got {total}"
            )));
        }
        let mut dice = Vec::with_capacity(6);
        for (idx, &count) in counts.iter().enumerate() {
            let die = &catalog.dice()[idx];
            for _ in 0..count {
                dice.push(LoadoutDie {
                    catalog_index: idx,
                    quality: die.quality(),
                    probabilities: *die.probabilities(),
                });
            }
        }
        Ok(Loadout {
            dice,
            counts: counts.clone(),
        })
    }
}

/// Counts the number of CountVectors over `inventory` summing to `total`, by
/// bounded 1-D DP over positions (stars-and-bars with per-component caps).
pub fn count_combinations(inventory: &[u32], total: u32) -> u64 {
    let total = total as usize;
    let mut dp = vec![0u64; total + 1];
    dp[0] = 1;
    for &cap in inventory {
        let cap = cap as usize;
        let mut next = vec![0u64; total + 1];
        for (t, slot) in next.iter_mut().enumerate() {
            let max_c = cap.min(t);
            *slot = (0..=max_c).map(|c| dp[t - c]).sum();
        }
        dp = next;
    }
    dp[total]
}

/// Depth-first enumeration of every CountVector over `inventory` summing to
/// `total`, in lexicographic order. Empty inventory yields no results (unless
/// `total == 0`, which yields the single empty vector). Stops early once
/// `limit` results have been produced.
pub fn enumerate_loadouts(inventory: &[u32], total: u32, limit: Option<usize>) -> Vec<CountVector> {
    let mut out = Vec::new();
    if inventory.is_empty() {
        return out;
    }
    let mut counts = vec![0u32; inventory.len()];
    enumerate_recurse(inventory, total, 0, &mut counts, &mut out, limit);
    out
}

fn enumerate_recurse(
    inventory: &[u32],
    remaining: u32,
    idx: usize,
    counts: &mut [u32],
    out: &mut Vec<CountVector>,
    limit: Option<usize>,
) {
    if let Some(l) = limit {
        if out.len() >= l {
            return;
        }
    }
    if idx == inventory.len() {
        if remaining == 0 {
            out.push(counts.to_vec());
        }
        return;
    }
    let max_c = inventory[idx].min(remaining);
    for c in 0..=max_c {
        if let Some(l) = limit {
            if out.len() >= l {
                return;
            }
        }
        counts[idx] = c;
        enumerate_recurse(inventory, remaining - c, idx + 1, counts, out, limit);
    }
    counts[idx] = 0;
}

/// Weighted, rejection-free random sampling of distinct CountVectors.
///
/// Each draw builds one CountVector by repeatedly picking a catalog index
/// with probability proportional to `qualities[i]` among indices with
/// remaining inventory, depleting that index's cap as it is used. Duplicate
/// draws (by a `,`-joined string fingerprint of counts) are discarded.
/// Attempts are capped at `max(limit * 50, 1)` to guarantee termination when
/// the space is nearly exhausted.
pub fn random_loadouts(
    inventory: &[u32],
    qualities: &[f64],
    total: u32,
    limit: usize,
    seed: u64,
) -> Vec<CountVector> {
    let mut out = Vec::new();
    if inventory.is_empty() || inventory.len() != qualities.len() || limit == 0 {
        return out;
    }
    let max_attempts = (limit * 50).max(1);
    let mut rng = SmallRng::seed_from_u64(seed);
    let mut seen: HashSet<String> = HashSet::new();

    for _ in 0..max_attempts {
        if out.len() >= limit {
            break;
        }
        if let Some(counts) = sample_one(inventory, qualities, total, &mut rng) {
            let fingerprint = counts
                .iter()
                .map(u32::to_string)
                .collect::<Vec<_>>()
                .join(",");
            if seen.insert(fingerprint) {
                out.push(counts);
            }
        }
    }
    out
}

fn sample_one(
    inventory: &[u32],
    qualities: &[f64],
    total: u32,
    rng: &mut SmallRng,
) -> Option<CountVector> {
    let n = inventory.len();
    let mut remaining_cap = inventory.to_vec();
    let mut counts = vec![0u32; n];

    for _ in 0..total {
        let mut total_weight = 0.0;
        for i in 0..n {
            if remaining_cap[i] > 0 {
                total_weight += qualities[i].max(1e-9);
            }
        }
        if total_weight <= 0.0 {
            return None;
        }
        let mut draw = rng.random::<f64>() * total_weight;
        let mut chosen = None;
        for i in 0..n {
            if remaining_cap[i] == 0 {
                continue;
            }
            let w = qualities[i].max(1e-9);
            if draw < w {
                chosen = Some(i);
                break;
            }
            draw -= w;
        }
        let chosen = chosen.unwrap_or_else(|| (0..n).rev().find(|&i| remaining_cap[i] > 0).unwrap());
        counts[chosen] += 1;
        remaining_cap[chosen] -= 1;
    }
    Some(counts)
}
