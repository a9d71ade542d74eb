//! Precomputed scoring decision lattice (Layer 1 of the scoring engine).
//!
//! For every reachable [`FaceCount`] (totals 0..=6) this builds the full set
//! of scoring selections reachable by combining non-overlapping primitive
//! groups (singles, n-of-a-kind, straights). Selections that decompose into
//! the same `(used_counts, points, tags)` after tag-merging collapse into one
//! entry, so the table never repeats an identical selection under two names.

use std::collections::HashMap;
use std::sync::LazyLock;

use super::face_count::FaceCount;

/// A single undominated way to use some of a [`FaceCount`]'s dice for points.
#[derive(Clone, Debug, PartialEq)]
pub struct ScoreSelection {
    /// Dice consumed per face by this selection.
    pub used_counts: [u8; 6],
    /// Total dice consumed (`used_counts.iter().sum()`).
    pub used_dice: u8,
    /// Points awarded by this selection.
    pub points: u32,
    /// `(tag, multiplicity)` pairs describing which scoring groups contributed.
    pub tags: Vec<(String, u8)>,
}

impl ScoreSelection {
    fn used_total(used_counts: &[u8; 6]) -> u8 {
        used_counts.iter().sum()
    }
}

/// A single non-overlapping scoring group considered during table construction.
struct Primitive {
    used: [u8; 6],
    points: u32,
    tag: String,
    mult: u8,
}

fn build_primitives(c: &[u8; 6]) -> Vec<Primitive> {
    let mut groups = Vec::new();

    for n in 1..=c[0] {
        let mut used = [0u8; 6];
        used[0] = n;
        groups.push(Primitive {
            used,
            points: 100 * n as u32,
            tag: "single_1".to_string(),
            mult: n,
        });
    }

    for n in 1..=c[4] {
        let mut used = [0u8; 6];
        used[4] = n;
        groups.push(Primitive {
            used,
            points: 50 * n as u32,
            tag: "single_5".to_string(),
            mult: n,
        });
    }

    for face in 1u8..=6 {
        let idx = (face - 1) as usize;
        let base: u32 = if face == 1 { 1000 } else { 100 * face as u32 };
        for n in 3..=c[idx] {
            let mut used = [0u8; 6];
            used[idx] = n;
            groups.push(Primitive {
                used,
                points: base * (n as u32 - 2),
                tag: format!("kind_{face}_{n}ok"),
                mult: 1,
            });
        }
    }

    if c[0..5].iter().all(|&x| x >= 1) {
        groups.push(Primitive {
            used: [1, 1, 1, 1, 1, 0],
            points: 500,
            tag: "straight_1_5".to_string(),
            mult: 1,
        });
    }
    if c[1..6].iter().all(|&x| x >= 1) {
        groups.push(Primitive {
            used: [0, 1, 1, 1, 1, 1],
            points: 750,
            tag: "straight_2_6".to_string(),
            mult: 1,
        });
    }
    if c.iter().all(|&x| x >= 1) {
        groups.push(Primitive {
            used: [1, 1, 1, 1, 1, 1],
            points: 1500,
            tag: "straight_1_6".to_string(),
            mult: 1,
        });
    }

    groups
}

fn merge_tag(tags: &mut Vec<(String, u8)>, name: &str, mult: u8) {
    if let Some(entry) = tags.iter_mut().find(|(n, _)| n == name) {
        entry.1 += mult;
    } else {
        tags.push((name.to_string(), mult));
    }
}

fn recurse(
    groups: &[Primitive],
    idx: usize,
    remaining: [u8; 6],
    used_so_far: [u8; 6],
    points_so_far: u32,
    tags_so_far: &[(String, u8)],
    out: &mut Vec<ScoreSelection>,
) {
    if idx == groups.len() {
        if points_so_far > 0 {
            out.push(ScoreSelection {
                used_counts: used_so_far,
                used_dice: ScoreSelection::used_total(&used_so_far),
                points: points_so_far,
                tags: tags_so_far.to_vec(),
            });
        }
        return;
    }

    // Skip this group.
    recurse(groups, idx + 1, remaining, used_so_far, points_so_far, tags_so_far, out);

    // Take this group, if it fits in the remaining budget.
    let g = &groups[idx];
    if (0..6).all(|i| g.used[i] <= remaining[i]) {
        let mut new_remaining = remaining;
        let mut new_used = used_so_far;
        for i in 0..6 {
            new_remaining[i] -= g.used[i];
            new_used[i] += g.used[i];
        }
        let mut new_tags = tags_so_far.to_vec();
        merge_tag(&mut new_tags, &g.tag, g.mult);
        recurse(
            groups,
            idx + 1,
            new_remaining,
            new_used,
            points_so_far + g.points,
            &new_tags,
            out,
        );
    }
}

fn dedupe(mut selections: Vec<ScoreSelection>) -> Vec<ScoreSelection> {
    selections.sort_by(|a, b| {
        a.used_counts
            .cmp(&b.used_counts)
            .then(a.points.cmp(&b.points))
            .then_with(|| {
                let mut at = a.tags.clone();
                let mut bt = b.tags.clone();
                at.sort();
                bt.sort();
                at.cmp(&bt)
            })
    });
    selections.dedup_by(|a, b| {
        if a.used_counts != b.used_counts || a.points != b.points {
            return false;
        }
        let mut at = a.tags.clone();
        let mut bt = b.tags.clone();
        at.sort();
        bt.sort();
        at == bt
    });
    selections
}

/// Enumerates every undominated scoring selection reachable from `c`.
fn enumerate_selections(c: &[u8; 6]) -> Vec<ScoreSelection> {
    let groups = build_primitives(c);
    let mut out = Vec::new();
    recurse(&groups, 0, *c, [0; 6], 0, &[], &mut out);
    dedupe(out)
}

/// The full precomputed scoring lattice, keyed by packed [`FaceCount`].
pub struct ScoringTable {
    entries: HashMap<u32, Vec<ScoreSelection>>,
}

impl ScoringTable {
    /// Builds the table for every face count totaling 0..=6.
    pub fn build() -> Self {
        let mut entries = HashMap::new();
        for_each_face_count(|counts| {
            let fc = FaceCount::new_unchecked(counts);
            entries.insert(fc.pack(), enumerate_selections(&counts));
        });
        Self { entries }
    }

    /// Returns the selections for a packed key, or an empty slice for a bust
    /// or an undefined key.
    pub fn get_packed(&self, key: u32) -> &[ScoreSelection] {
        self.entries.get(&key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Returns the selections for a [`FaceCount`].
    pub fn get(&self, fc: &FaceCount) -> &[ScoreSelection] {
        self.get_packed(fc.pack())
    }

    /// Number of distinct face-count keys covered by the table.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if the table has no entries (never true once built).
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn for_each_face_count<F: FnMut([u8; 6])>(mut f: F) {
    for total in 0u8..=6 {
        distribute(total, 6, &mut [0u8; 6], 0, &mut f);
    }
}

fn distribute<F: FnMut([u8; 6])>(remaining: u8, faces_left: u8, acc: &mut [u8; 6], pos: usize, f: &mut F) {
    if faces_left == 1 {
        acc[pos] = remaining;
        f(*acc);
        return;
    }
    for take in 0..=remaining {
        acc[pos] = take;
        distribute(remaining - take, faces_left - 1, acc, pos + 1, f);
    }
}

/// The global precomputed scoring table, lazily built on first access.
pub static SCORING_TABLE: LazyLock<ScoringTable> = LazyLock::new(ScoringTable::build);
