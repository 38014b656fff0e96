//! Reciprocal rank fusion.
//!
//! An item at 1-indexed rank `r` of a ranking contributes `weight / (r + k)`.
//! Results are ordered by accumulated score; equal scores keep the order in
//! which items were first seen (earlier ranking first, then earlier rank).

use std::collections::{HashMap, HashSet};

use hopsearch_core::types::{Identified, RankedList, SourceKind};
use hopsearch_core::{Error, Result};

pub const DEFAULT_RRF_K: f32 = 60.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RrfConfig {
    pub k: f32,
}

impl Default for RrfConfig {
    fn default() -> Self {
        Self { k: DEFAULT_RRF_K }
    }
}

impl RrfConfig {
    pub fn new(k: f32) -> Result<Self> {
        if !k.is_finite() || k < 0.0 {
            return Err(Error::InvalidConfig(format!("rrf k must be a non-negative number, got {k}")));
        }
        Ok(Self { k })
    }
}

/// Fuses rankings of identities with equal weights.
pub fn reciprocal_rank_fusion<S: AsRef<str>>(rankings: &[Vec<S>], k: f32) -> Vec<(String, f32)> {
    let mut acc = Accumulator::default();
    for ranking in rankings {
        acc.add(ranking, 1.0, k);
    }
    acc.finish()
}

/// Fuses rankings, scaling the contribution of ranking `i` by `weights[i]`.
pub fn weighted_reciprocal_rank_fusion<S: AsRef<str>>(
    rankings: &[Vec<S>],
    weights: &[f32],
    k: f32,
) -> Result<Vec<(String, f32)>> {
    if weights.len() != rankings.len() {
        return Err(Error::InvalidConfig(format!(
            "{} weights given for {} rankings",
            weights.len(),
            rankings.len()
        )));
    }
    let mut acc = Accumulator::default();
    for (ranking, &weight) in rankings.iter().zip(weights) {
        acc.add(ranking, weight, k);
    }
    Ok(acc.finish())
}

/// Fuses ranked lists of items by identity. The first occurrence of an item
/// is the one kept; `sources` of the result is the union of the inputs'.
pub fn fuse_ranked<T: Identified>(lists: Vec<RankedList<T>>, weights: Option<&[f32]>, config: RrfConfig) -> Result<RankedList<T>> {
    let rankings: Vec<Vec<String>> = lists
        .iter()
        .map(|l| l.identities().into_iter().map(str::to_string).collect())
        .collect();
    let fused = match weights {
        Some(w) => weighted_reciprocal_rank_fusion(&rankings, w, config.k)?,
        None => reciprocal_rank_fusion(&rankings, config.k),
    };

    let mut sources: Vec<SourceKind> = Vec::new();
    let mut items: HashMap<String, T> = HashMap::new();
    for list in lists {
        for s in list.sources() {
            if !sources.contains(s) {
                sources.push(*s);
            }
        }
        for entry in list.into_entries() {
            let id = entry.item.identity().to_string();
            items.entry(id).or_insert(entry.item);
        }
    }

    let mut out = RankedList::from_scored(std::iter::empty(), sources);
    for (id, score) in fused {
        if let Some(item) = items.remove(&id) {
            out.push(item, score);
        }
    }
    Ok(out)
}

#[derive(Default)]
struct Accumulator {
    order: Vec<(String, f32)>,
    slot: HashMap<String, usize>,
}

impl Accumulator {
    fn add<S: AsRef<str>>(&mut self, ranking: &[S], weight: f32, k: f32) {
        let mut seen_here: HashSet<usize> = HashSet::with_capacity(ranking.len());
        for (i, id) in ranking.iter().enumerate() {
            let id = id.as_ref();
            let slot = match self.slot.get(id) {
                Some(&s) => s,
                None => {
                    self.order.push((id.to_string(), 0.0));
                    self.slot.insert(id.to_string(), self.order.len() - 1);
                    self.order.len() - 1
                }
            };
            // A repeated identity only counts at its best rank.
            if !seen_here.insert(slot) {
                continue;
            }
            self.order[slot].1 += weight / ((i + 1) as f32 + k);
        }
    }

    fn finish(mut self) -> Vec<(String, f32)> {
        // Stable: equal scores stay in first-seen order.
        self.order.sort_by(|a, b| b.1.total_cmp(&a.1));
        self.order
    }
}
