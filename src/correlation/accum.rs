// This file is part of demorec.
// Licensed under the MIT license, see LICENSE.md for details.
// SPDX-License-Identifier: MIT

//! Bounded accumulator for the most-correlated neighbors.
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use ordered_float::NotNan;

use crate::errors::{ModelError, ModelResult};

/// Keep the `limit` highest-weighted entities seen so far.
///
/// Internally a min-heap, so the weakest retained neighbor is always at the
/// top and can be evicted in logarithmic time.
pub(crate) struct NeighborAccumulator {
    limit: usize,
    heap: BinaryHeap<NeighborEntry>,
}

impl NeighborAccumulator {
    pub fn new(limit: usize) -> Self {
        NeighborAccumulator {
            limit,
            heap: BinaryHeap::with_capacity(limit + 1),
        }
    }

    /// Offer a candidate neighbor.
    pub fn add(&mut self, id: u32, weight: f32) -> ModelResult<()> {
        if self.limit == 0 {
            return Ok(());
        }
        let entry = NeighborEntry::new(id, weight)?;
        if self.heap.len() < self.limit {
            self.heap.push(entry);
        } else if let Some(worst) = self.heap.peek() {
            if entry.key() > worst.key() {
                self.heap.push(entry);
                while self.heap.len() > self.limit {
                    self.heap.pop();
                }
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Retained neighbors, strongest first.
    pub fn into_sorted(self) -> Vec<(u32, f32)> {
        // the reversed ordering makes ascending order best-first
        self.heap
            .into_sorted_vec()
            .into_iter()
            .map(|e| (e.id, e.weight.into_inner()))
            .collect()
    }
}

#[derive(Debug, Clone, Copy)]
struct NeighborEntry {
    weight: NotNan<f32>,
    id: u32,
}

impl NeighborEntry {
    fn new(id: u32, weight: f32) -> ModelResult<Self> {
        let weight = NotNan::new(weight)
            .map_err(|_| ModelError::InvalidValue(format!("correlation for entity {} is NaN", id)))?;
        Ok(NeighborEntry { weight, id })
    }

    /// Ranking key: higher weight wins, then lower id.
    fn key(&self) -> (NotNan<f32>, Reverse<u32>) {
        (self.weight, Reverse(self.id))
    }
}

impl PartialEq for NeighborEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for NeighborEntry {}

impl PartialOrd for NeighborEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for NeighborEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // reverse the ordering to make a min-heap
        other.key().cmp(&self.key())
    }
}
