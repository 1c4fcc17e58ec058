//! Best-N selection over per-row scores
//!
//! **Problem**: "best so far" reporting only needs the N lowest rows; a full
//! sort is O(N log N).
//!
//! **Solution**: bounded max-heap keeping the N smallest keys, O(N log K).
//!
//! Ties are broken by row index, so the result equals a stable ascending sort
//! truncated to N. Rows without a numeric score sort after every scored row.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

// Max-heap item: the largest kept key sits on top so it can be evicted.
#[derive(Debug)]
struct MaxHeapItem {
    score: Option<f64>,
    index: usize,
}

impl MaxHeapItem {
    fn key_cmp(&self, other: &Self) -> Ordering {
        let by_score = match (self.score, other.score) {
            (Some(a), Some(b)) => a.total_cmp(&b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        by_score.then(self.index.cmp(&other.index))
    }
}

impl PartialEq for MaxHeapItem {
    fn eq(&self, other: &Self) -> bool {
        self.key_cmp(other) == Ordering::Equal
    }
}

impl Eq for MaxHeapItem {}

impl Ord for MaxHeapItem {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key_cmp(other)
    }
}

impl PartialOrd for MaxHeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Select the indices of the `n` smallest scores, ascending.
///
/// `None` scores (non-numeric rows) rank last. Equal scores keep their
/// original row order.
///
/// # Examples
///
/// ```rust
/// use experiment_ledger::topk::select_n_smallest;
///
/// let scores = [Some(3.0), Some(1.0), None, Some(1.0)];
/// assert_eq!(select_n_smallest(&scores, 3), vec![1, 3, 0]);
/// ```
#[must_use]
pub fn select_n_smallest(scores: &[Option<f64>], n: usize) -> Vec<usize> {
    if n == 0 {
        return Vec::new();
    }

    let mut heap: BinaryHeap<MaxHeapItem> = BinaryHeap::with_capacity(n.min(scores.len()));

    for (index, score) in scores.iter().enumerate() {
        let item = MaxHeapItem {
            score: *score,
            index,
        };

        if heap.len() < n {
            heap.push(item);
        } else if let Some(top) = heap.peek() {
            if item < *top {
                heap.pop();
                heap.push(item);
            }
        }
    }

    heap.into_sorted_vec()
        .into_iter()
        .map(|item| item.index)
        .collect()
}
