// This file is part of demorec.
// Licensed under the MIT license, see LICENSE.md for details.
// SPDX-License-Identifier: MIT

//! Latent factor, implicit feedback, and item attribute factor blocks.
use ndarray::{Array1, Array2, ArrayView1};

use crate::data::{BinaryMatrix, Ratings};
use crate::sparse::CsrStructure;

use super::{grow_matrix, Initializer};

/// User factors `P` and item factors `Q`.
#[derive(Debug, Clone)]
pub struct LatentFactors {
    pub(crate) user: Array2<f32>,
    pub(crate) item: Array2<f32>,
}

impl LatentFactors {
    /// Random rows for entities with ratings, zero rows for the rest.
    pub(crate) fn new(
        ratings: &Ratings,
        n_users: usize,
        n_items: usize,
        n_factors: usize,
        init: &mut Initializer<'_>,
    ) -> Self {
        LatentFactors {
            user: init.matrix(n_users, n_factors, |u| ratings.count_by_user(u) > 0),
            item: init.matrix(n_items, n_factors, |i| ratings.count_by_item(i) > 0),
        }
    }

    pub fn n_factors(&self) -> usize {
        self.user.ncols()
    }

    pub fn user_factors(&self) -> &Array2<f32> {
        &self.user
    }

    pub fn item_factors(&self) -> &Array2<f32> {
        &self.item
    }

    pub(crate) fn expand(&mut self, n_users: usize, n_items: usize) {
        let nf = self.n_factors();
        grow_matrix(&mut self.user, n_users, nf);
        grow_matrix(&mut self.item, n_items, nf);
    }

    pub(crate) fn is_finite(&self) -> bool {
        self.user.iter().chain(self.item.iter()).all(|v| v.is_finite())
    }
}

/// Implicit feedback factors `Y`, one row per item.
///
/// A user's implicit contribution is the sum of the `Y` rows of the items
/// they rated, divided by the square root of that count.
#[derive(Debug, Clone)]
pub struct ImplicitFeedback {
    pub(crate) y: Array2<f32>,
    pub(crate) rated: CsrStructure,
}

impl ImplicitFeedback {
    pub(crate) fn new(
        ratings: &Ratings,
        n_items: usize,
        n_factors: usize,
        init: &mut Initializer<'_>,
    ) -> Self {
        ImplicitFeedback {
            y: init.matrix(n_items, n_factors, |i| ratings.count_by_item(i) > 0),
            rated: ratings.items_rated_by_user(),
        }
    }

    pub fn factors(&self) -> &Array2<f32> {
        &self.y
    }

    /// Items whose `Y` rows feed a user's implicit vector.
    pub fn rated_items(&self, user: usize) -> &[u32] {
        self.rated.row_cols(user)
    }

    /// Add the normalized implicit sum for a user into `out`.
    pub(crate) fn accumulate(&self, user: usize, out: &mut Array1<f64>) {
        let items = self.rated_items(user);
        if items.is_empty() {
            return;
        }
        let norm = (items.len() as f64).sqrt();
        for j in items {
            let j = *j as usize;
            if j < self.y.nrows() {
                add_row(out, self.y.row(j), norm);
            }
        }
    }

    pub(crate) fn expand(&mut self, n_items: usize) {
        let nf = self.y.ncols();
        grow_matrix(&mut self.y, n_items, nf);
    }

    pub(crate) fn is_finite(&self) -> bool {
        self.y.iter().all(|v| v.is_finite())
    }
}

/// Item attribute factors `X`, one row per item attribute column.
///
/// An item's effective vector adds the mean of the `X` rows of its active
/// attributes.
#[derive(Debug, Clone)]
pub struct ItemAttributeFactors {
    pub(crate) x: Array2<f32>,
    /// Number of items carrying each attribute.
    pub(crate) carriers: Vec<usize>,
}

impl ItemAttributeFactors {
    pub(crate) fn new(
        attributes: Option<&BinaryMatrix>,
        n_factors: usize,
        init: &mut Initializer<'_>,
    ) -> Self {
        let carriers = attributes.map(BinaryMatrix::column_counts).unwrap_or_default();
        ItemAttributeFactors {
            x: init.matrix(carriers.len(), n_factors, |_| true),
            carriers,
        }
    }

    /// Number of items carrying an attribute.
    pub fn carrier_count(&self, attribute: usize) -> usize {
        self.carriers.get(attribute).copied().unwrap_or(0)
    }

    pub fn factors(&self) -> &Array2<f32> {
        &self.x
    }

    /// Add the attribute mean for an item's active attributes into `out`.
    pub(crate) fn accumulate(&self, attributes: &[u32], out: &mut Array1<f64>) {
        if attributes.is_empty() {
            return;
        }
        let norm = attributes.len() as f64;
        for a in attributes {
            let a = *a as usize;
            if a < self.x.nrows() {
                add_row(out, self.x.row(a), norm);
            }
        }
    }

    pub(crate) fn expand(&mut self, attributes: Option<&BinaryMatrix>) {
        if let Some(m) = attributes {
            self.carriers = m.column_counts();
        }
        let nf = self.x.ncols();
        grow_matrix(&mut self.x, self.carriers.len(), nf);
    }

    pub(crate) fn is_finite(&self) -> bool {
        self.x.iter().all(|v| v.is_finite())
    }
}

fn add_row(out: &mut Array1<f64>, row: ArrayView1<'_, f32>, norm: f64) {
    for (o, v) in out.iter_mut().zip(row.iter()) {
        *o += *v as f64 / norm;
    }
}

#[cfg(test)]
mod test {
    use ndarray::array;

    use super::*;
    use crate::data::fixtures::small_ratings;

    #[test]
    fn test_implicit_sum() {
        let ratings = small_ratings();
        let imp = ImplicitFeedback {
            y: array![[1.0, 2.0], [3.0, -2.0]],
            rated: ratings.items_rated_by_user(),
        };
        let mut out = Array1::zeros(2);
        imp.accumulate(0, &mut out);
        let norm = 2f64.sqrt();
        assert!((out[0] - 4.0 / norm).abs() < 1e-9);
        assert!(out[1].abs() < 1e-9);

        let mut out = Array1::zeros(2);
        imp.accumulate(5, &mut out);
        assert_eq!(out.to_vec(), vec![0.0, 0.0]);
    }

    #[test]
    fn test_attribute_mean() {
        let xf = ItemAttributeFactors {
            x: array![[1.0, 0.0], [3.0, 2.0]],
            carriers: vec![1, 1],
        };
        let mut out = Array1::zeros(2);
        xf.accumulate(&[0, 1], &mut out);
        assert_eq!(out.to_vec(), vec![2.0, 1.0]);
        let mut out = Array1::zeros(2);
        xf.accumulate(&[], &mut out);
        assert_eq!(out.to_vec(), vec![0.0, 0.0]);
    }
}
