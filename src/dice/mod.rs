//! Dice catalog: the universe of weighted die types an inventory draws from.
//!
//! A [`DieType`] is an identity plus a length-7 probability vector (index 0 is
//! always zero; indices 1..=6 are the probability of rolling that face). A
//! [`Catalog`] is the catalog's canonical, name-sorted sequence of die types;
//! loadouts reference dice by their index into this sequence.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{EngineError, Result};

/// A single weighted six-sided die type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DieType {
    /// Unique display name, also the catalog's sort key.
    name: String,
    /// Length-7 probability vector; `probabilities[0]` is always `0.0`.
    probabilities: [f64; 7],
}

impl DieType {
    /// Creates a die type, validating the probability vector.
    ///
    /// `probabilities[0]` must be `0.0` (within `1e-12`) and `probabilities[1..=6]`
    /// must be non-negative and sum to `1.0` (within `1e-9`).
    pub fn new(name: impl Into<String>, probabilities: [f64; 7]) -> Result<Self> {
        let name = name.into();
        if probabilities[0].abs() > 1e-12 {
            return Err(EngineError::InvalidInput(format!(
                "die {name}: probabilities[0] must be zero, got {}",
                probabilities[0]
            )));
        }
        let mut sum = 0.0;
        for (face, &p) in probabilities.iter().enumerate().skip(1) {
            if p < 0.0 {
                return Err(EngineError::InvalidInput(format!(
                    "die {name}: probability for face {face} is negative ({p})"
                )));
            }
            sum += p;
        }
        if (sum - 1.0).abs() > 1e-9 {
            return Err(EngineError::InvalidInput(format!(
                "die {name}: probabilities[1..=6] sum to {sum}, expected 1.0"
            )));
        }
        Ok(Self { name, probabilities })
    }

    /// The die's display name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The full length-7 probability vector (index 0 is always zero).
    #[inline]
    pub fn probabilities(&self) -> &[f64; 7] {
        &self.probabilities
    }

    /// Probability of rolling `face` (1..=6).
    #[inline]
    pub fn probability(&self, face: u8) -> f64 {
        debug_assert!((1..=6).contains(&face));
        self.probabilities[face as usize]
    }

    /// `quality = 100*p1 + 50*p5 + 20*(p2+p3+p4+p6)`, used as a tie-breaker
    /// when choosing which dice to spend on a scoring selection.
    pub fn quality(&self) -> f64 {
        let p = &self.probabilities;
        100.0 * p[1] + 50.0 * p[5] + 20.0 * (p[2] + p[3] + p[4] + p[6])
    }

    /// True if every face is equally likely (within `1e-12`): a fair, uniform die.
    pub fn is_uniform(&self) -> bool {
        let first = self.probabilities[1];
        self.probabilities[2..=6]
            .iter()
            .all(|&p| (p - first).abs() <= 1e-12)
    }

    /// Name used for the "canonical ordinary die" special inventory rule.
    pub const ORDINARY_NAME: &'static str = "Ordinary die";
}

/// An ordered catalog of die types, indexed 0..N-1 in canonical (lexicographic
/// by name) order.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Catalog {
    dice: Vec<DieType>,
}

impl Catalog {
    /// Builds a catalog from a set of die types, sorting them into canonical order.
    pub fn new(mut dice: Vec<DieType>) -> Result<Self> {
        dice.sort_by(|a, b| a.name.cmp(&b.name));
        for pair in dice.windows(2) {
            if pair[0].name == pair[1].name {
                return Err(EngineError::InvalidInput(format!(
                    "duplicate die name in catalog: {}",
                    pair[0].name
                )));
            }
        }
        Ok(Self { dice })
    }

    /// Parses a catalog from the external JSON shape: an object mapping die
    /// name to its length-7 probability array.
    pub fn from_json(text: &str) -> Result<Self> {
        let raw: BTreeMap<String, [f64; 7]> = serde_json::from_str(text)?;
        let dice = raw
            .into_iter()
            .map(|(name, probs)| DieType::new(name, probs))
            .collect::<Result<Vec<_>>>()?;
        Self::new(dice)
    }

    /// Number of die types in the catalog.
    #[inline]
    pub fn len(&self) -> usize {
        self.dice.len()
    }

    /// True if the catalog holds no die types.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.dice.is_empty()
    }

    /// The die types in canonical order.
    #[inline]
    pub fn dice(&self) -> &[DieType] {
        &self.dice
    }

    /// Looks up a die by catalog index.
    #[inline]
    pub fn get(&self, index: usize) -> Option<&DieType> {
        self.dice.get(index)
    }

    /// Finds a die's catalog index by name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.dice.iter().position(|d| d.name() == name)
    }

    /// Applies the special inventory rule: a uniform die is forced to inventory
    /// zero at search time, except the canonical "Ordinary die" which is forced
    /// to inventory 6 regardless of what the raw inventory says.
    pub fn apply_inventory_rule(&self, inventory: &[u32]) -> Vec<u32> {
        debug_assert_eq!(inventory.len(), self.dice.len());
        self.dice
            .iter()
            .zip(inventory.iter())
            .map(|(die, &count)| {
                if die.name() == DieType::ORDINARY_NAME {
                    6
                } else if die.is_uniform() {
                    0
                } else {
                    count
                }
            })
            .collect()
    }
}
