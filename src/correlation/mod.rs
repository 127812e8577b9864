// This file is part of demorec.
// Licensed under the MIT license, see LICENSE.md for details.
// SPDX-License-Identifier: MIT

//! Symmetric entity-entity correlation matrices.
//!
//! Correlations are computed once, either from binary attribute rows (cosine)
//! or from ratings (Pearson), and are read-only afterwards.
mod accum;
mod cosine;
mod pearson;

use log::*;
use rayon::prelude::*;

use crate::errors::ModelResult;
use crate::progress::ProgressHandle;

use accum::NeighborAccumulator;

/// Which side of the rating matrix a correlation is computed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityType {
    User,
    Item,
}

/// A symmetric correlation matrix with unit diagonal.
///
/// Only the upper triangle (diagonal included) is stored, packed row by row.
#[derive(Debug, Clone)]
pub struct CorrelationMatrix {
    size: usize,
    data: Vec<f32>,
}

impl CorrelationMatrix {
    /// Create an all-zero matrix with unit diagonal.
    pub fn new(size: usize) -> Self {
        let mut mat = CorrelationMatrix {
            size,
            data: vec![0.0; arith_tot(size)],
        };
        for i in 0..size {
            let idx = mat.compute_index(i, i);
            mat.data[idx] = 1.0;
        }
        mat
    }

    /// Number of entities.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Correlation of a pair; 0 for entities outside the matrix.
    pub fn get(&self, a: usize, b: usize) -> f32 {
        if a >= self.size || b >= self.size {
            return 0.0;
        }
        let (row, col) = order_coords(a, b);
        self.data[self.compute_index(row, col)]
    }

    /// Set the correlation of a pair (and its mirror).
    pub fn set(&mut self, a: usize, b: usize, value: f32) {
        assert!(a < self.size && b < self.size, "entity out of range");
        let (row, col) = order_coords(a, b);
        let idx = self.compute_index(row, col);
        self.data[idx] = value;
    }

    /// The `k` entities most correlated with `entity`, strongest first.
    ///
    /// The entity itself is never its own neighbor; equal correlations are
    /// ordered by ascending id.
    pub fn nearest_neighbors(&self, entity: usize, k: usize) -> ModelResult<Vec<u32>> {
        let mut acc = NeighborAccumulator::new(k);
        if entity < self.size && k > 0 {
            for other in 0..self.size {
                if other != entity {
                    acc.add(other as u32, self.get(entity, other))?;
                }
            }
        }
        Ok(acc.into_sorted().into_iter().map(|(id, _)| id).collect())
    }

    /// Assemble a matrix from per-row upper-triangle entries, computing rows
    /// in parallel.
    ///
    /// `row_fn(r)` returns `(col, value)` pairs with `col > r`.
    fn from_row_fn<F>(label: &'static str, size: usize, row_fn: F) -> Self
    where
        F: Fn(usize) -> Vec<(u32, f32)> + Sync,
    {
        let progress = ProgressHandle::new(label, size);
        let rows: Vec<Vec<(u32, f32)>> = (0..size)
            .into_par_iter()
            .map(|r| {
                let row = row_fn(r);
                progress.tick();
                row
            })
            .collect();
        progress.finish();

        let mut mat = CorrelationMatrix::new(size);
        let mut nnz = 0;
        for (r, row) in rows.into_iter().enumerate() {
            for (c, v) in row {
                debug_assert!(c as usize > r);
                let idx = mat.compute_index(r, c as usize);
                mat.data[idx] = v;
                nnz += 1;
            }
        }
        debug!("{}: stored {} correlations among {} entities", label, nnz, size);
        mat
    }

    fn compute_index(&self, row: usize, col: usize) -> usize {
        debug_assert!(col >= row);
        // total array size
        let total = self.data.len();
        // array capacity used by current & later rows
        let remaining = arith_tot(self.size - row);
        // difference is the array capacity used by earlier rows
        let base = total - remaining;
        base + col - row
    }
}

fn order_coords(a: usize, b: usize) -> (usize, usize) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Compute the total of an arithmetic series.
fn arith_tot(n: usize) -> usize {
    let num = n * (n + 1);
    num >> 1
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_arith() {
        assert_eq!(arith_tot(0), 0);
        assert_eq!(arith_tot(1), 1);
        assert_eq!(arith_tot(2), 3);
        assert_eq!(arith_tot(250), (1..=250).sum::<usize>());
    }

    #[test]
    fn test_index_layout() {
        let mat = CorrelationMatrix::new(1000);
        assert_eq!(mat.compute_index(0, 0), 0);
        assert_eq!(mat.compute_index(0, 999), 999);
        assert_eq!(mat.compute_index(1, 1), 1000);
        assert_eq!(mat.compute_index(1, 999), 1998);
        assert_eq!(mat.compute_index(999, 999), mat.data.len() - 1);
    }

    #[test]
    fn test_symmetric_storage() {
        let mut mat = CorrelationMatrix::new(4);
        assert_eq!(mat.get(2, 2), 1.0);
        mat.set(3, 1, 0.25);
        assert_eq!(mat.get(1, 3), 0.25);
        assert_eq!(mat.get(3, 1), 0.25);
        assert_eq!(mat.get(0, 1), 0.0);
        assert_eq!(mat.get(7, 1), 0.0);
    }

    #[test]
    fn test_nearest_neighbors() {
        let mut mat = CorrelationMatrix::new(5);
        mat.set(0, 1, 0.2);
        mat.set(0, 2, 0.9);
        mat.set(0, 3, 0.2);
        mat.set(0, 4, -0.5);
        let nbrs = mat.nearest_neighbors(0, 3).unwrap();
        assert_eq!(nbrs, vec![2, 1, 3]);
        let nbrs = mat.nearest_neighbors(0, 10).unwrap();
        assert_eq!(nbrs, vec![2, 1, 3, 4]);
    }

    #[test]
    fn test_nearest_neighbors_edges() {
        let mat = CorrelationMatrix::new(3);
        assert!(mat.nearest_neighbors(0, 0).unwrap().is_empty());
        assert!(mat.nearest_neighbors(8, 2).unwrap().is_empty());
        let empty = CorrelationMatrix::new(0);
        assert!(empty.nearest_neighbors(0, 2).unwrap().is_empty());
    }
}
