//! Scoring engine (C1): the precomputed decision lattice over face counts.
//!
//! ```rust
//! use dicesmith_engine::scoring::{score, FaceCount};
//!
//! let counts = FaceCount::new([1, 1, 1, 1, 1, 1]).unwrap();
//! let selections = score(&counts).unwrap();
//! assert!(selections.iter().any(|s| s.points == 1500));
//! ```

pub mod face_count;
pub mod table;

pub use face_count::FaceCount;
pub use table::{ScoreSelection, ScoringTable, SCORING_TABLE};

use crate::error::Result;

/// Returns every undominated [`ScoreSelection`] for a [`FaceCount`]. An empty
/// slice means the roll is a bust: no scoring selection is possible.
pub fn score(face_counts: &FaceCount) -> Result<&'static [ScoreSelection]> {
    Ok(SCORING_TABLE.get(face_counts))
}

/// Hot-path entry point: looks up selections directly by packed key, skipping
/// `FaceCount` reconstruction. Callers must ensure the key was produced by
/// [`FaceCount::pack`].
#[inline]
pub fn score_packed(key: u32) -> &'static [ScoreSelection] {
    SCORING_TABLE.get_packed(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bust_is_empty() {
        let fc = FaceCount::new([0, 1, 1, 0, 0, 0]).unwrap();
        assert!(score(&fc).unwrap().is_empty());
    }

    #[test]
    fn scoring_never_overconsumes() {
        let fc = FaceCount::new([2, 1, 0, 0, 2, 0]).unwrap();
        for sel in score(&fc).unwrap() {
            for (used, avail) in sel.used_counts.iter().zip(fc.counts().iter()) {
                assert!(used <= avail);
            }
            assert_eq!(sel.used_dice, sel.used_counts.iter().sum::<u8>());
        }
    }
}
