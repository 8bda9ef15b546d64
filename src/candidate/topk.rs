//! Top-K selection over flat score arrays.

use std::cmp::Ordering;

/// Score paired with its position in the flattened input.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Ranked {
    /// Flat index into the scored array.
    pub index: usize,
    pub score: f32,
}

fn ranked_cmp_desc(a: &Ranked, b: &Ranked) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.index.cmp(&b.index))
}

/// Sorts by descending score; equal scores keep ascending index order.
pub(crate) fn sort_ranked_desc(items: &mut [Ranked]) {
    items.sort_by(ranked_cmp_desc);
}

/// Top-K container with O(k) insertion cost.
pub struct TopK {
    k: usize,
    items: Vec<Ranked>,
}

impl TopK {
    /// Creates a new Top-K collector.
    pub fn new(k: usize) -> Self {
        Self {
            k,
            items: Vec::with_capacity(k),
        }
    }

    /// Pushes a candidate, evicting the lowest ranked one if at capacity.
    pub fn push(&mut self, item: Ranked) {
        if self.k == 0 {
            return;
        }
        if self.items.len() < self.k {
            self.items.push(item);
            return;
        }

        let mut worst_idx = 0usize;
        for (idx, current) in self.items.iter().enumerate().skip(1) {
            if ranked_cmp_desc(current, &self.items[worst_idx]) == Ordering::Greater {
                worst_idx = idx;
            }
        }

        if ranked_cmp_desc(&item, &self.items[worst_idx]) == Ordering::Less {
            self.items[worst_idx] = item;
        }
    }

    /// Returns candidates sorted by descending score.
    pub fn into_sorted_desc(mut self) -> Vec<Ranked> {
        sort_ranked_desc(&mut self.items);
        self.items
    }
}

/// Selects the `k` highest scores, best first, ties broken by lower index.
///
/// Partitions around the k-th element before sorting the head, so the cost
/// is linear in `scores.len()` plus `k log k`.
pub(crate) fn top_k(scores: &[f32], k: usize) -> Vec<Ranked> {
    let mut all: Vec<Ranked> = scores
        .iter()
        .enumerate()
        .map(|(index, &score)| Ranked { index, score })
        .collect();
    if k == 0 {
        return Vec::new();
    }
    if k < all.len() {
        all.select_nth_unstable_by(k - 1, ranked_cmp_desc);
        all.truncate(k);
    }
    sort_ranked_desc(&mut all);
    all
}
