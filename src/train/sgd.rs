// This file is part of demorec.
// Licensed under the MIT license, see LICENSE.md for details.
// SPDX-License-Identifier: MIT

//! Per-rating stochastic gradient descent.
use log::*;
use ndarray::Array1;

use crate::config::ModelConfig;
use crate::data::Dataset;
use crate::errors::{ModelError, ModelResult};
use crate::model::{sigmoid, FactorModel, OutputMode};
use crate::progress::ProgressHandle;

/// Online trainer for every model kind except the similarity-regularized one.
///
/// Later ratings in an epoch see the parameters as updated by earlier ones.
#[derive(Debug, Clone)]
pub struct SgdTrainer {
    config: ModelConfig,
    current_learn_rate: f32,
}

/// Which sides of the model an epoch may update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateFlags {
    pub user: bool,
    pub item: bool,
}

impl UpdateFlags {
    pub const BOTH: UpdateFlags = UpdateFlags {
        user: true,
        item: true,
    };
}

impl SgdTrainer {
    pub fn new(config: &ModelConfig) -> Self {
        SgdTrainer {
            config: config.clone(),
            current_learn_rate: config.learn_rate,
        }
    }

    /// The learning rate the next epoch will use.
    pub fn current_learn_rate(&self) -> f32 {
        self.current_learn_rate
    }

    /// Run one pass over `indices` in the given order, returning the RMSE of
    /// the unbounded predictions made along the way.
    ///
    /// Fails with [ModelError::InvalidValue] before touching the model if any
    /// index is not a rating position.
    pub fn epoch(
        &mut self,
        model: &mut FactorModel,
        data: &Dataset,
        indices: &[usize],
        flags: UpdateFlags,
    ) -> ModelResult<f64> {
        check_indices(indices, data.ratings().len())?;
        model.invalidate_user_cache();
        let progress = ProgressHandle::new("sgd epoch", indices.len());

        let mut sse = 0.0;
        for idx in indices {
            let err = self.update_rating(model, data, *idx, flags);
            sse += err * err;
            progress.tick();
        }
        progress.finish();

        model.refresh_user_factors();
        if let Some(block) = model.first_non_finite() {
            return Err(ModelError::NonFinite(block));
        }

        let rmse = if indices.is_empty() {
            0.0
        } else {
            (sse / indices.len() as f64).sqrt()
        };
        debug!(
            "epoch finished with RMSE {:.4} at learning rate {}",
            rmse, self.current_learn_rate
        );
        self.current_learn_rate *= self.config.decay;
        Ok(rmse)
    }

    /// Apply the gradient step for one rating and return its residual.
    fn update_rating(
        &self,
        model: &mut FactorModel,
        data: &Dataset,
        index: usize,
        flags: UpdateFlags,
    ) -> f64 {
        let cfg = &self.config;
        let ratings = data.ratings();
        let u = ratings.user(index);
        let i = ratings.item(index);
        let rating = ratings.value(index) as f64;

        let score = model.raw_score(data, u, i);
        let pred = model.transform(score);
        let err = rating - pred;
        let gc = match model.output {
            OutputMode::Clamp => err,
            OutputMode::Logistic => {
                let range = model.max_rating - model.min_rating;
                cfg.loss.gradient_common(sigmoid(score), err, range)
            }
        };
        debug_assert!(gc.is_finite(), "non-finite gradient at rating {}", index);

        let lr = self.current_learn_rate as f64;
        let reg = cfg.regularization as f64;
        let bias_reg = cfg.bias_reg as f64;
        let bias_step = cfg.bias_learn_rate as f64 * lr;
        let user_reg = self.frequency_weight(reg, ratings.count_by_user(u));
        let item_reg = self.frequency_weight(reg, ratings.count_by_item(i));

        if let Some(b) = &mut model.biases {
            if flags.user && u < b.user.len() {
                let bu = b.user[u] as f64;
                b.user[u] = (bu + bias_step * (gc - bias_reg * user_reg * bu)) as f32;
            }
            if flags.item && i < b.item.len() {
                let bi = b.item[i] as f64;
                b.item[i] = (bi + bias_step * (gc - bias_reg * item_reg * bi)) as f32;
            }
        }

        // every active attribute takes the full gradient
        if let Some(demo) = &mut model.demographic {
            for (m, w) in data.demographics().dims().iter().zip(demo.weights.iter_mut()) {
                for a in m.row(u) {
                    if let Some(wa) = w.get_mut(*a as usize) {
                        let v = *wa as f64;
                        *wa = (v + bias_step * (gc - bias_reg * reg * v)) as f32;
                    }
                }
            }
        }

        if let Some(inter) = &mut model.interactions {
            let item_attrs = data.item_attribute_row(i);
            if !item_attrs.is_empty() {
                let n_item = item_attrs.len() as f64;
                for (m, h) in data.demographics().dims().iter().zip(inter.h.iter_mut()) {
                    let user_attrs = m.row(u);
                    if user_attrs.is_empty() {
                        continue;
                    }
                    let grad = gc / n_item / user_attrs.len() as f64;
                    for ua in user_attrs {
                        for ia in item_attrs {
                            if let Some(v) = h.get_mut((*ua as usize, *ia as usize)) {
                                let hv = *v as f64;
                                *v = (hv + lr * (grad - reg * hv)) as f32;
                            }
                        }
                    }
                }
            }
        }

        self.update_factors(model, data, u, i, gc, flags, user_reg, item_reg);

        // the neighbor step uses residuals against the freshly updated biases
        if model.neighbors.is_some() {
            self.update_neighbors(model, data, u, i, err);
        }

        err
    }

    #[allow(clippy::too_many_arguments)]
    fn update_factors(
        &self,
        model: &mut FactorModel,
        data: &Dataset,
        u: usize,
        i: usize,
        gc: f64,
        flags: UpdateFlags,
        user_reg: f64,
        item_reg: f64,
    ) {
        // snapshot both effective vectors before touching any factor
        let (eu, ei) = match (model.user_vector(u), model.item_vector(data, i)) {
            (Some(eu), Some(ei)) => (eu, ei),
            _ => return,
        };
        let lr = self.current_learn_rate as f64;
        let reg = self.config.regularization as f64;
        let ratings = data.ratings();

        if let Some(latent) = &mut model.latent {
            if flags.user {
                let mut pu = latent.user.row_mut(u);
                for (p, e) in pu.iter_mut().zip(ei.iter()) {
                    let pv = *p as f64;
                    *p = (pv + lr * (gc * e - user_reg * pv)) as f32;
                }
            }
            if flags.item {
                let mut qi = latent.item.row_mut(i);
                for (q, e) in qi.iter_mut().zip(eu.iter()) {
                    let qv = *q as f64;
                    *q = (qv + lr * (gc * e - item_reg * qv)) as f32;
                }
            }
        }

        if !flags.item {
            return;
        }

        if let Some(imp) = &mut model.implicit {
            let rated = imp.rated.row_cols(u);
            if !rated.is_empty() {
                let common = scaled(&ei, gc / (rated.len() as f64).sqrt());
                for j in rated {
                    let j = *j as usize;
                    let y_reg = self.frequency_weight(reg, ratings.count_by_item(j));
                    if j < imp.y.nrows() {
                        let mut yj = imp.y.row_mut(j);
                        for (y, c) in yj.iter_mut().zip(common.iter()) {
                            let yv = *y as f64;
                            *y = (yv + lr * (c - y_reg * yv)) as f32;
                        }
                    }
                }
            }
        }

        if let Some(xf) = &mut model.item_attributes {
            let attrs = data.item_attribute_row(i);
            if !attrs.is_empty() {
                let common = scaled(&eu, gc / attrs.len() as f64);
                for a in attrs {
                    let a = *a as usize;
                    let x_reg = self.frequency_weight(reg, xf.carrier_count(a));
                    if a < xf.x.nrows() {
                        let mut xa = xf.x.row_mut(a);
                        for (x, c) in xa.iter_mut().zip(common.iter()) {
                            let xv = *x as f64;
                            *x = (xv + lr * (c - x_reg * xv)) as f32;
                        }
                    }
                }
            }
        }
    }

    fn update_neighbors(&self, model: &mut FactorModel, data: &Dataset, u: usize, i: usize, err: f64) {
        let lr = self.current_learn_rate as f64;
        let reg = self.config.regularization as f64;
        let nbrs = match &model.neighbors {
            Some(nb) => nb.qualifying(data, u, i),
            None => return,
        };
        if nbrs.is_empty() {
            return;
        }
        let norm_err = err / (nbrs.len() as f64).sqrt();
        let residuals: Vec<(usize, f64)> = nbrs
            .iter()
            .map(|(v, r)| (*v, r - model.base_score(data, *v, i)))
            .collect();
        if let Some(nb) = &mut model.neighbors {
            for (v, resid) in residuals {
                if let Some(w) = nb.weights.get_mut((u, v)) {
                    let wv = *w as f64;
                    *w = (wv + lr * (norm_err * resid - reg * wv)) as f32;
                }
            }
        }
    }

    /// Regularization weight for an entity, scaled down by the root of its
    /// observation count when frequency regularization is on.
    fn frequency_weight(&self, reg: f64, count: usize) -> f64 {
        if self.config.frequency_regularization {
            if count > 0 {
                reg / (count as f64).sqrt()
            } else {
                0.0
            }
        } else {
            reg
        }
    }
}

/// Reject rating positions at or beyond `n`.
pub(crate) fn check_indices(indices: &[usize], n: usize) -> ModelResult<()> {
    match indices.iter().find(|i| **i >= n) {
        Some(bad) => Err(ModelError::InvalidValue(format!(
            "rating index {} out of range for {} ratings",
            bad, n
        ))),
        None => Ok(()),
    }
}

fn scaled(vec: &Array1<f64>, factor: f64) -> Array1<f64> {
    vec.mapv(|v| v * factor)
}
