// This file is part of demorec.
// Licensed under the MIT license, see LICENSE.md for details.
// SPDX-License-Identifier: MIT

//! Residual blending over attribute-matched correlated users.
use log::*;
use ndarray::{s, Array2};

use crate::correlation::{CorrelationMatrix, EntityType};
use crate::data::{Dataset, Demographics};
use crate::errors::ModelResult;

use super::Initializer;

/// Learned pairwise weights `W` and the cached neighbor lists they apply to.
///
/// For each user, `matched` caches the top-K Pearson neighbors whose active
/// attributes equal the user's in every demographic dimension.  The cache
/// depends only on correlations and attributes, so it is rebuilt when
/// attributes change; whether a neighbor rated the queried item is checked
/// per query.
#[derive(Debug, Clone)]
pub struct NeighborBlend {
    k: usize,
    correlation: CorrelationMatrix,
    pub(crate) weights: Array2<f32>,
    matched: Vec<Vec<u32>>,
}

impl NeighborBlend {
    pub(crate) fn new(
        k: usize,
        shrinkage: f32,
        data: &Dataset,
        init: &mut Initializer<'_>,
    ) -> ModelResult<Self> {
        let n_users = data.n_users();
        let correlation =
            CorrelationMatrix::pearson(data.ratings(), EntityType::User, n_users, shrinkage);
        let mut blend = NeighborBlend {
            k,
            correlation,
            weights: init.matrix(n_users, n_users, |_| true),
            matched: Vec::new(),
        };
        blend.rebuild(data.demographics())?;
        Ok(blend)
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn correlation(&self) -> &CorrelationMatrix {
        &self.correlation
    }

    /// Cached attribute-matched neighbors of a user.
    pub fn matched(&self, user: usize) -> &[u32] {
        self.matched.get(user).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn weight(&self, user: usize, other: usize) -> f32 {
        self.weights.get((user, other)).copied().unwrap_or(0.0)
    }

    /// Recompute the attribute-matched neighbor cache.
    pub(crate) fn rebuild(&mut self, demographics: &Demographics) -> ModelResult<()> {
        let n = self.weights.nrows();
        let mut matched = Vec::with_capacity(n);
        let mut total = 0;
        for u in 0..n {
            let nbrs: Vec<u32> = self
                .correlation
                .nearest_neighbors(u, self.k)?
                .into_iter()
                .filter(|v| demographics.same_signature(u, *v as usize))
                .collect();
            total += nbrs.len();
            matched.push(nbrs);
        }
        debug!("cached {} attribute-matched neighbors for {} users", total, n);
        self.matched = matched;
        Ok(())
    }

    /// Matched neighbors of `user` who rated `item`, with their ratings.
    pub fn qualifying(&self, data: &Dataset, user: usize, item: usize) -> Vec<(usize, f64)> {
        self.matched(user)
            .iter()
            .filter_map(|v| {
                let v = *v as usize;
                data.ratings().get(v, item).map(|r| (v, r as f64))
            })
            .collect()
    }

    /// Grow `W` to cover `n_users` users, keeping existing weights.
    pub(crate) fn expand(&mut self, n_users: usize) {
        let old = self.weights.nrows();
        if n_users <= old {
            return;
        }
        let mut grown = Array2::zeros((n_users, n_users));
        grown.slice_mut(s![..old, ..old]).assign(&self.weights);
        self.weights = grown;
    }

    pub(crate) fn is_finite(&self) -> bool {
        self.weights.iter().all(|v| v.is_finite())
    }
}
