// This file is part of demorec.
// Licensed under the MIT license, see LICENSE.md for details.
// SPDX-License-Identifier: MIT

use ndarray::Array1;

use crate::data::Dataset;

use super::{grow_vector, ScoreTerm};

/// Per-user and per-item scalar biases.
#[derive(Debug, Clone)]
pub struct EntityBiases {
    pub(crate) user: Array1<f32>,
    pub(crate) item: Array1<f32>,
}

impl EntityBiases {
    pub fn zeros(n_users: usize, n_items: usize) -> Self {
        EntityBiases {
            user: Array1::zeros(n_users),
            item: Array1::zeros(n_items),
        }
    }

    pub fn user_bias(&self) -> &Array1<f32> {
        &self.user
    }

    pub fn item_bias(&self) -> &Array1<f32> {
        &self.item
    }

    pub(crate) fn expand(&mut self, n_users: usize, n_items: usize) {
        grow_vector(&mut self.user, n_users);
        grow_vector(&mut self.item, n_items);
    }

    pub(crate) fn is_finite(&self) -> bool {
        self.user.iter().chain(self.item.iter()).all(|b| b.is_finite())
    }
}

impl ScoreTerm for EntityBiases {
    fn score(&self, _data: &Dataset, user: usize, item: usize) -> f64 {
        let bu = self.user.get(user).copied().unwrap_or(0.0);
        let bi = self.item.get(item).copied().unwrap_or(0.0);
        bu as f64 + bi as f64
    }
}
