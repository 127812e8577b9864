// This file is part of demorec.
// Licensed under the MIT license, see LICENSE.md for details.
// SPDX-License-Identifier: MIT

//! Full-batch gradient descent with backtracking line search, for
//! factorizations regularized toward user attribute similarity.
use log::*;
use ndarray::{Array2, ArrayView1, ArrayViewMut1, Zip};
use rayon::prelude::*;

use crate::config::ModelConfig;
use crate::correlation::CorrelationMatrix;
use crate::data::Dataset;
use crate::errors::{ModelError, ModelResult};
use crate::model::FactorModel;
use crate::ok_or_err;

/// Where a line-search run stands.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LineSearchState {
    /// No loss computed yet.
    Initializing,
    /// At least one step accepted; `step` is the last accepted step size.
    Iterating { loss: f64, step: f64 },
    /// Relative improvement fell to the stopping threshold.
    Converged { loss: f64 },
}

/// Batch trainer minimizing
///
/// ```text
/// 0.5 Σ (r_ui - P_u·Q_i)²
///   + α 0.5 Σ_{u≠v} (corr(u, v) - P_u·P_v)²
///   + 0.5 λ (‖P‖² + ‖Q‖²)
/// ```
///
/// where the similarity sum runs over ordered pairs of users with ratings
/// and `corr` is the binary cosine of their primary attributes.
pub struct LineSearchTrainer {
    alpha: f64,
    regularization: f64,
    stop_condition: f64,
    initial_step: f64,
    max_halvings: usize,
    correlation: CorrelationMatrix,
    state: LineSearchState,
}

impl LineSearchTrainer {
    pub fn new(config: &ModelConfig, data: &Dataset) -> ModelResult<Self> {
        let primary = ok_or_err!(
            data.demographics().primary(),
            ModelError::MissingData,
            "{} requires primary user attributes",
            config.kind
        )?;
        Ok(LineSearchTrainer {
            alpha: config.alpha as f64,
            regularization: config.regularization as f64,
            stop_condition: config.stop_condition,
            initial_step: config.initial_step,
            max_halvings: config.max_halvings,
            correlation: CorrelationMatrix::binary_cosine(primary),
            state: LineSearchState::Initializing,
        })
    }

    pub fn state(&self) -> LineSearchState {
        self.state
    }

    pub fn is_converged(&self) -> bool {
        matches!(self.state, LineSearchState::Converged { .. })
    }

    pub fn correlation(&self) -> &CorrelationMatrix {
        &self.correlation
    }

    /// Batch loss of the model's current factors.
    pub fn loss(&self, model: &FactorModel, data: &Dataset) -> ModelResult<f64> {
        let latent = ok_or_err!(
            model.latent(),
            ModelError::Config,
            "{} has no latent factors",
            model.kind()
        )?;
        Ok(self.compute_loss(&latent.user, &latent.item, data))
    }

    /// Run one gradient step, backtracking until the loss decreases.
    ///
    /// Returns the loss after the step.  Once converged, further calls leave
    /// the model alone.
    pub fn iterate(&mut self, model: &mut FactorModel, data: &Dataset) -> ModelResult<f64> {
        let kind = model.kind();
        let latent = ok_or_err!(
            model.latent.as_mut(),
            ModelError::Config,
            "{} has no latent factors",
            kind
        )?;

        let (old_loss, proposal) = match self.state {
            LineSearchState::Initializing => (
                self.compute_loss(&latent.user, &latent.item, data),
                self.initial_step,
            ),
            LineSearchState::Iterating { loss, step } => (loss, step * 2.0),
            LineSearchState::Converged { loss } => return Ok(loss),
        };

        let (grad_p, grad_q) = self.gradients(&latent.user, &latent.item, data);
        let grad_norm = sq_norm(&grad_p) + sq_norm(&grad_q);
        if grad_norm == 0.0 || old_loss == 0.0 {
            info!("line search converged at stationary loss {:.6}", old_loss);
            self.state = LineSearchState::Converged { loss: old_loss };
            return Ok(old_loss);
        }

        let mut step = proposal;
        let mut halvings = 0;
        let new_loss = loop {
            let cand_p = descend(&latent.user, &grad_p, step);
            let cand_q = descend(&latent.item, &grad_q, step);
            let loss = self.compute_loss(&cand_p, &cand_q, data);
            if loss < old_loss {
                latent.user = cand_p;
                latent.item = cand_q;
                break loss;
            }
            if halvings >= self.max_halvings {
                return Err(ModelError::LineSearchStalled {
                    halvings,
                    loss: old_loss,
                });
            }
            step *= 0.5;
            halvings += 1;
        };

        let delta = (old_loss - new_loss) / old_loss;
        debug!(
            "line search: loss {:.6} -> {:.6} (step {:.3e}, {} halvings)",
            old_loss, new_loss, step, halvings
        );
        if delta <= self.stop_condition {
            info!(
                "line search converged at loss {:.6} (improvement {:.3e})",
                new_loss, delta
            );
            self.state = LineSearchState::Converged { loss: new_loss };
        } else {
            self.state = LineSearchState::Iterating {
                loss: new_loss,
                step,
            };
        }
        Ok(new_loss)
    }

    fn compute_loss(&self, p: &Array2<f32>, q: &Array2<f32>, data: &Dataset) -> f64 {
        let ratings = data.ratings();
        let mut rating_loss = 0.0;
        for idx in 0..ratings.len() {
            let u = ratings.user(idx);
            let i = ratings.item(idx);
            if u < p.nrows() && i < q.nrows() {
                let err = ratings.value(idx) as f64 - dot(p.row(u), q.row(i));
                rating_loss += err * err;
            }
        }

        // each unordered pair once; the ordered sum is twice this
        let known = ratings.all_users();
        let pair_rows: Vec<f64> = known
            .par_iter()
            .enumerate()
            .map(|(a, u)| {
                let u = *u as usize;
                known[a + 1..]
                    .iter()
                    .map(|v| {
                        let v = *v as usize;
                        let err = self.correlation.get(u, v) as f64 - dot(p.row(u), p.row(v));
                        err * err
                    })
                    .sum::<f64>()
            })
            .collect();
        let pair_loss: f64 = pair_rows.iter().sum();

        0.5 * rating_loss
            + self.alpha * pair_loss
            + 0.5 * self.regularization * (sq_norm32(p) + sq_norm32(q))
    }

    fn gradients(
        &self,
        p: &Array2<f32>,
        q: &Array2<f32>,
        data: &Dataset,
    ) -> (Array2<f64>, Array2<f64>) {
        let mut grad_p = Array2::zeros(p.dim());
        grad_p
            .outer_iter_mut()
            .into_par_iter()
            .enumerate()
            .for_each(|(u, row)| self.user_gradient(u, row, p, q, data));

        let mut grad_q = Array2::zeros(q.dim());
        grad_q
            .outer_iter_mut()
            .into_par_iter()
            .enumerate()
            .for_each(|(i, row)| self.item_gradient(i, row, p, q, data));

        (grad_p, grad_q)
    }

    fn user_gradient(
        &self,
        u: usize,
        mut grad: ArrayViewMut1<'_, f64>,
        p: &Array2<f32>,
        q: &Array2<f32>,
        data: &Dataset,
    ) {
        let ratings = data.ratings();
        let pu = p.row(u);
        for idx in ratings.by_user(u) {
            let idx = *idx as usize;
            let i = ratings.item(idx);
            if i >= q.nrows() {
                continue;
            }
            let err = dot(pu, q.row(i)) - ratings.value(idx) as f64;
            add_scaled(&mut grad, q.row(i), err);
        }

        if ratings.count_by_user(u) > 0 {
            for v in ratings.all_users() {
                let v = *v as usize;
                if v == u {
                    continue;
                }
                let err = dot(pu, p.row(v)) - self.correlation.get(u, v) as f64;
                add_scaled(&mut grad, p.row(v), 2.0 * self.alpha * err);
            }
        }

        add_scaled(&mut grad, pu, self.regularization);
    }

    fn item_gradient(
        &self,
        i: usize,
        mut grad: ArrayViewMut1<'_, f64>,
        p: &Array2<f32>,
        q: &Array2<f32>,
        data: &Dataset,
    ) {
        let ratings = data.ratings();
        let qi = q.row(i);
        for idx in ratings.by_item(i) {
            let idx = *idx as usize;
            let u = ratings.user(idx);
            if u >= p.nrows() {
                continue;
            }
            let err = dot(p.row(u), qi) - ratings.value(idx) as f64;
            add_scaled(&mut grad, p.row(u), err);
        }
        add_scaled(&mut grad, qi, self.regularization);
    }
}

fn dot(a: ArrayView1<'_, f32>, b: ArrayView1<'_, f32>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| *x as f64 * *y as f64).sum()
}

fn add_scaled(out: &mut ArrayViewMut1<'_, f64>, row: ArrayView1<'_, f32>, scale: f64) {
    Zip::from(out).and(&row).for_each(|o, r| *o += *r as f64 * scale);
}

fn sq_norm(m: &Array2<f64>) -> f64 {
    m.iter().map(|v| v * v).sum()
}

fn sq_norm32(m: &Array2<f32>) -> f64 {
    m.iter().map(|v| *v as f64 * *v as f64).sum()
}

/// `m - step * grad`, rounded back to parameter precision.
fn descend(m: &Array2<f32>, grad: &Array2<f64>, step: f64) -> Array2<f32> {
    let mut out = m.clone();
    Zip::from(&mut out)
        .and(grad)
        .for_each(|v, g| *v = (*v as f64 - step * g) as f32);
    out
}

#[cfg(test)]
mod test {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;
    use crate::config::ModelKind;
    use crate::data::fixtures::{grouped, small_ratings};

    fn setup(cfg: &ModelConfig) -> (Dataset, FactorModel, LineSearchTrainer) {
        let data = grouped();
        let mut rng = StdRng::seed_from_u64(23);
        let model = FactorModel::init(cfg, &data, &mut rng).unwrap();
        let trainer = LineSearchTrainer::new(cfg, &data).unwrap();
        (data, model, trainer)
    }

    fn config() -> ModelConfig {
        ModelConfig {
            num_factors: 3,
            ..ModelConfig::for_kind(ModelKind::DemoUserSimilarity)
        }
    }

    #[test]
    fn test_requires_primary_attributes() {
        let data = Dataset::new(small_ratings());
        let res = LineSearchTrainer::new(&config(), &data);
        assert!(matches!(res, Err(ModelError::MissingData(_))));
    }

    #[test]
    fn test_monotonic_until_converged() {
        let cfg = config();
        let (data, mut model, mut trainer) = setup(&cfg);
        assert_eq!(trainer.state(), LineSearchState::Initializing);
        let mut prev = trainer.loss(&model, &data).unwrap();
        let mut iters = 0;
        while !trainer.is_converged() {
            let loss = trainer.iterate(&mut model, &data).unwrap();
            assert!(loss < prev, "loss went from {} to {}", prev, loss);
            assert_eq!(loss, trainer.loss(&model, &data).unwrap());
            prev = loss;
            iters += 1;
            assert!(iters < 2000, "no convergence after {} iterations", iters);
        }
        assert!(matches!(trainer.state(), LineSearchState::Converged { .. }));
    }

    #[test]
    fn test_converged_is_idempotent() {
        let cfg = ModelConfig {
            stop_condition: 0.5,
            ..config()
        };
        let (data, mut model, mut trainer) = setup(&cfg);
        let mut loss = trainer.iterate(&mut model, &data).unwrap();
        while !trainer.is_converged() {
            loss = trainer.iterate(&mut model, &data).unwrap();
        }
        let before = model.latent().unwrap().user_factors().clone();
        let again = trainer.iterate(&mut model, &data).unwrap();
        assert_eq!(again, loss);
        assert_eq!(model.latent().unwrap().user_factors(), &before);
    }

    #[test]
    fn test_first_step_starts_from_initial() {
        let cfg = config();
        let (data, mut model, mut trainer) = setup(&cfg);
        trainer.iterate(&mut model, &data).unwrap();
        match trainer.state() {
            LineSearchState::Iterating { step, .. } => assert!(step <= cfg.initial_step),
            LineSearchState::Converged { .. } => (),
            LineSearchState::Initializing => panic!("state did not advance"),
        }
    }

    #[test]
    fn test_stall_is_an_error() {
        let cfg = ModelConfig {
            initial_step: 1e12,
            max_halvings: 2,
            ..config()
        };
        let (data, mut model, mut trainer) = setup(&cfg);
        let res = trainer.iterate(&mut model, &data);
        assert!(matches!(
            res,
            Err(ModelError::LineSearchStalled { halvings: 2, .. })
        ));
    }

    #[test]
    fn test_gradient_matches_finite_difference() {
        let cfg = config();
        let (data, model, trainer) = setup(&cfg);
        let latent = model.latent().unwrap();
        let (gp, gq) = trainer.gradients(&latent.user, &latent.item, &data);

        let eps = 1e-2f32;
        for (u, f) in [(0usize, 0usize), (3, 2), (6, 1)] {
            let mut plus = latent.user.clone();
            plus[(u, f)] += eps;
            let mut minus = latent.user.clone();
            minus[(u, f)] -= eps;
            let numeric = (trainer.compute_loss(&plus, &latent.item, &data)
                - trainer.compute_loss(&minus, &latent.item, &data))
                / (2.0 * eps as f64);
            assert!(
                (numeric - gp[(u, f)]).abs() < 1e-2 * (1.0 + numeric.abs()),
                "P[{}, {}]: numeric {} analytic {}",
                u,
                f,
                numeric,
                gp[(u, f)]
            );
        }
        for (i, f) in [(0usize, 0usize), (4, 2)] {
            let mut plus = latent.item.clone();
            plus[(i, f)] += eps;
            let mut minus = latent.item.clone();
            minus[(i, f)] -= eps;
            let numeric = (trainer.compute_loss(&latent.user, &plus, &data)
                - trainer.compute_loss(&latent.user, &minus, &data))
                / (2.0 * eps as f64);
            assert!((numeric - gq[(i, f)]).abs() < 1e-2 * (1.0 + numeric.abs()));
        }
    }
}
