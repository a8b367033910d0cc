//! Structural deltas over ordered sequences.
//!
//! Recipes and file lists evolve slowly between versions, so each version
//! stores only a [`SliceDelta`] against the aggregated prior sequence:
//! deleted source indices plus segments inserted at target positions.
//! Applying every version's delta in order rebuilds the latest sequence.

use serde::{Deserialize, Serialize};

/// A segment spliced into the target at `index`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insertion<T> {
    pub index: usize,
    pub items: Vec<T>,
}

/// Edit script turning one sequence into another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SliceDelta<T> {
    /// Source indices to drop, ascending.
    pub del: Vec<usize>,
    /// Segments to splice in, ascending by target index.
    pub ins: Vec<Insertion<T>>,
}

impl<T> Default for SliceDelta<T> {
    fn default() -> Self {
        Self {
            del: Vec::new(),
            ins: Vec::new(),
        }
    }
}

impl<T> SliceDelta<T> {
    /// An empty delta means source and target are identical.
    pub fn is_empty(&self) -> bool {
        self.del.is_empty() && self.ins.is_empty()
    }
}

/// Compute the delta from `source` to `target`.
///
/// Single left-to-right pass: each source item is looked for from the
/// current target cursor onwards. A match further ahead turns the skipped
/// target segment into an insertion; a miss becomes a deletion. Worst case
/// is O(n*m) but near-identical sequences, the expected shape between
/// versions, stay effectively linear.
pub fn diff<T: PartialEq + Clone>(source: &[T], target: &[T]) -> SliceDelta<T> {
    let mut delta = SliceDelta::default();
    let mut ti = 0;
    for (si, item) in source.iter().enumerate() {
        match target[ti..].iter().position(|t| t == item) {
            Some(offset) => {
                if offset > 0 {
                    delta.ins.push(Insertion {
                        index: ti,
                        items: target[ti..ti + offset].to_vec(),
                    });
                }
                ti += offset + 1;
            }
            None => delta.del.push(si),
        }
    }
    if ti < target.len() {
        delta.ins.push(Insertion {
            index: ti,
            items: target[ti..].to_vec(),
        });
    }
    delta
}

/// Apply a delta: drop the deleted indices, then splice every insertion at
/// its recorded target index, then carry over the remaining items.
pub fn patch<T: Clone>(source: &[T], delta: &SliceDelta<T>) -> Vec<T> {
    let mut kept = Vec::with_capacity(source.len().saturating_sub(delta.del.len()));
    let mut del = delta.del.iter().peekable();
    for (si, item) in source.iter().enumerate() {
        if del.peek() == Some(&&si) {
            del.next();
            continue;
        }
        kept.push(item.clone());
    }

    let added: usize = delta.ins.iter().map(|ins| ins.items.len()).sum();
    let mut target = Vec::with_capacity(kept.len() + added);
    let mut ki = 0;
    for ins in &delta.ins {
        while target.len() < ins.index && ki < kept.len() {
            target.push(kept[ki].clone());
            ki += 1;
        }
        target.extend(ins.items.iter().cloned());
    }
    target.extend(kept[ki..].iter().cloned());
    target
}
