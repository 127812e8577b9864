// This file is part of demorec.
// Licensed under the MIT license, see LICENSE.md for details.
// SPDX-License-Identifier: MIT

//! Training driver and prediction front end.
use std::fmt;

use log::*;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::config::{ModelConfig, ModelKind};
use crate::data::{BinaryMatrix, Dataset, Demographics};
use crate::errors::ModelResult;
use crate::model::{FactorModel, OutputMode};
use crate::progress::CancelToken;
use crate::train::{check_indices, LineSearchState, LineSearchTrainer, SgdTrainer, UpdateFlags};

/// Outcome of one epoch or line-search iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochReport {
    /// 1-based count of epochs run since the model was initialized.
    pub epoch: usize,
    /// Training RMSE for SGD epochs, batch loss for line-search iterations.
    pub value: f64,
    /// Learning rate (SGD) or accepted step size (line search) of the epoch.
    pub learn_rate: f64,
}

/// Outcome of a full training run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainingReport {
    pub epochs: usize,
    /// Whether line search reached its stopping threshold.  Always false for
    /// SGD runs, which stop after a fixed epoch count.
    pub converged: bool,
    /// RMSE or loss of the last epoch; `None` when no epoch ran.
    pub final_value: Option<f64>,
}

enum Trainer {
    Sgd(SgdTrainer),
    LineSearch(LineSearchTrainer),
}

impl Trainer {
    fn new(config: &ModelConfig, data: &Dataset) -> ModelResult<Trainer> {
        if config.kind.uses_line_search() {
            Ok(Trainer::LineSearch(LineSearchTrainer::new(config, data)?))
        } else {
            Ok(Trainer::Sgd(SgdTrainer::new(config)))
        }
    }
}

/// A demographic-augmented rating predictor bundled with its training data.
pub struct DemoRecommender {
    config: ModelConfig,
    data: Dataset,
    model: FactorModel,
    trainer: Trainer,
    rng: StdRng,
    epochs: usize,
    cancel: CancelToken,
}

impl DemoRecommender {
    /// Validate the configuration and initialize a model over `data`.
    pub fn new(config: ModelConfig, data: Dataset) -> ModelResult<Self> {
        config.validate()?;
        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let model = FactorModel::init(&config, &data, &mut rng)?;
        let trainer = Trainer::new(&config, &data)?;
        info!(
            "created {} over {} ratings ({} users, {} items)",
            config.kind,
            data.ratings().len(),
            data.n_users(),
            data.n_items()
        );
        Ok(DemoRecommender {
            config,
            data,
            model,
            trainer,
            rng,
            epochs: 0,
            cancel: CancelToken::new(),
        })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn data(&self) -> &Dataset {
        &self.data
    }

    pub fn model(&self) -> &FactorModel {
        &self.model
    }

    /// Epochs run since the last initialization.
    pub fn epochs(&self) -> usize {
        self.epochs
    }

    /// Token that stops [train](Self::train) at the next epoch boundary.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// State of the line-search trainer, if this kind uses one.
    pub fn line_search_state(&self) -> Option<LineSearchState> {
        match &self.trainer {
            Trainer::LineSearch(ls) => Some(ls.state()),
            Trainer::Sgd(_) => None,
        }
    }

    /// Discard learned parameters and draw a fresh initialization.
    pub fn init_model(&mut self) -> ModelResult<()> {
        self.model = FactorModel::init(&self.config, &self.data, &mut self.rng)?;
        self.trainer = Trainer::new(&self.config, &self.data)?;
        self.epochs = 0;
        Ok(())
    }

    /// Run one epoch over all ratings in shuffled order.
    pub fn iterate(&mut self) -> ModelResult<EpochReport> {
        let mut indices: Vec<usize> = (0..self.data.ratings().len()).collect();
        indices.shuffle(&mut self.rng);
        self.iterate_indices(&indices, UpdateFlags::BOTH)
    }

    /// Run one epoch over `indices` in the given order.
    ///
    /// The flags restrict SGD updates of user-side or item-side biases and
    /// factors.  Line search always runs one full-batch iteration and ignores
    /// both the order and the flags.
    pub fn iterate_indices(
        &mut self,
        indices: &[usize],
        flags: UpdateFlags,
    ) -> ModelResult<EpochReport> {
        check_indices(indices, self.data.ratings().len())?;

        let (value, learn_rate) = match &mut self.trainer {
            Trainer::Sgd(sgd) => {
                let lr = sgd.current_learn_rate() as f64;
                (sgd.epoch(&mut self.model, &self.data, indices, flags)?, lr)
            }
            Trainer::LineSearch(ls) => {
                let loss = ls.iterate(&mut self.model, &self.data)?;
                let step = match ls.state() {
                    LineSearchState::Iterating { step, .. } => step,
                    _ => 0.0,
                };
                (loss, step)
            }
        };
        self.epochs += 1;
        Ok(EpochReport {
            epoch: self.epochs,
            value,
            learn_rate,
        })
    }

    /// Train to completion: `num_iter` SGD epochs, or line search until it
    /// converges or runs `max_line_search_iter` iterations.
    pub fn train(&mut self) -> ModelResult<TrainingReport> {
        let (budget, line_search) = if self.config.kind.uses_line_search() {
            (self.config.max_line_search_iter, true)
        } else {
            (self.config.num_iter, false)
        };

        let mut run = 0;
        let mut last = None;
        while run < budget {
            self.cancel.check()?;
            let report = self.iterate()?;
            trace!("epoch {}: {:.6}", report.epoch, report.value);
            last = Some(report);
            run += 1;
            if self.is_converged() {
                break;
            }
        }

        let converged = self.is_converged();
        if line_search && !converged {
            warn!(
                "{} did not converge within {} line-search iterations",
                self.config.kind, budget
            );
        }
        let final_value = last.map(|r| r.value);
        match final_value {
            Some(v) => info!(
                "trained {} for {} epochs, final {} {:.6}",
                self.config.kind,
                run,
                if line_search { "loss" } else { "RMSE" },
                v
            ),
            None => info!("{} training budget is empty, no epochs run", self.config.kind),
        }
        Ok(TrainingReport {
            epochs: run,
            converged,
            final_value,
        })
    }

    fn is_converged(&self) -> bool {
        match &self.trainer {
            Trainer::LineSearch(ls) => ls.is_converged(),
            Trainer::Sgd(_) => false,
        }
    }

    /// Predict a rating clipped to the observed rating range.
    pub fn predict(&self, user: usize, item: usize) -> f64 {
        self.model.predict(&self.data, user, item, true)
    }

    /// Predict a rating without clipping.
    pub fn predict_unbounded(&self, user: usize, item: usize) -> f64 {
        self.model.predict(&self.data, user, item, false)
    }

    /// Replace the user demographic attributes, growing the model to cover
    /// any new users or attribute columns.
    pub fn set_user_attributes(&mut self, demographics: Demographics) -> ModelResult<()> {
        self.data.demographics = demographics;
        self.model.expand(&self.data)?;
        if let Trainer::LineSearch(_) = self.trainer {
            self.trainer = Trainer::new(&self.config, &self.data)?;
        }
        Ok(())
    }

    /// Replace the item attributes, growing the model to match.
    pub fn set_item_attributes(&mut self, attributes: BinaryMatrix) -> ModelResult<()> {
        self.data.item_attributes = Some(attributes);
        self.model.expand(&self.data)
    }
}

impl fmt::Display for DemoRecommender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cfg = &self.config;
        write!(f, "{}", cfg.kind)?;
        if cfg.kind == ModelKind::DemoUserSimilarity {
            return write!(
                f,
                " num_factors={} regularization={} alpha={} stop_condition={}",
                cfg.num_factors, cfg.regularization, cfg.alpha, cfg.stop_condition
            );
        }

        if cfg.kind.has_latent_factors() {
            write!(f, " num_factors={}", cfg.num_factors)?;
        }
        write!(
            f,
            " bias_reg={} reg={} frequency_regularization={} learn_rate={} bias_learn_rate={} decay={} num_iter={}",
            cfg.bias_reg,
            cfg.regularization,
            cfg.frequency_regularization,
            cfg.learn_rate,
            cfg.bias_learn_rate,
            cfg.decay,
            cfg.num_iter
        )?;
        if self.model.output() == OutputMode::Logistic {
            write!(f, " loss={:?}", cfg.loss)?;
        }
        if cfg.kind == ModelKind::DemoUserKnn {
            write!(f, " K={} shrinkage={}", cfg.k, cfg.shrinkage)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::errors::ModelError;
    use crate::data::fixtures::{grouped, small_ratings};

    fn seeded(kind: ModelKind) -> ModelConfig {
        ModelConfig {
            seed: Some(7),
            num_factors: 4,
            ..ModelConfig::for_kind(kind)
        }
    }

    #[test]
    fn test_rejects_bad_config() {
        let cfg = ModelConfig {
            k: 0,
            ..seeded(ModelKind::DemoUserKnn)
        };
        let res = DemoRecommender::new(cfg, grouped());
        assert!(matches!(res, Err(ModelError::Config(_))));
    }

    #[test]
    fn test_missing_item_attributes() {
        let data = Dataset::new(small_ratings());
        let res = DemoRecommender::new(seeded(ModelKind::DemoUserItemAttributes), data);
        assert!(matches!(res, Err(ModelError::MissingData(_))));
    }

    #[test]
    fn test_sgd_training_reduces_error() {
        let cfg = ModelConfig {
            learn_rate: 0.05,
            num_iter: 40,
            ..seeded(ModelKind::DemoSvdPlusPlus)
        };
        let mut rec = DemoRecommender::new(cfg, grouped()).unwrap();
        let first = rec.iterate().unwrap();
        assert_eq!(first.epoch, 1);
        let report = rec.train().unwrap();
        assert_eq!(report.epochs, 40);
        assert!(!report.converged);
        assert!(report.final_value.unwrap() < first.value);
        assert_eq!(rec.epochs(), 41);
    }

    #[test]
    fn test_line_search_training_converges() {
        let mut rec =
            DemoRecommender::new(seeded(ModelKind::DemoUserSimilarity), grouped()).unwrap();
        assert_eq!(rec.line_search_state(), Some(LineSearchState::Initializing));
        let report = rec.train().unwrap();
        assert!(report.converged);
        assert!(report.epochs <= rec.config().max_line_search_iter);
        assert!(matches!(
            rec.line_search_state(),
            Some(LineSearchState::Converged { .. })
        ));
    }

    #[test]
    fn test_line_search_budget_exhausted() {
        let cfg = ModelConfig {
            max_line_search_iter: 2,
            stop_condition: 1e-12,
            ..seeded(ModelKind::DemoUserSimilarity)
        };
        let mut rec = DemoRecommender::new(cfg, grouped()).unwrap();
        let report = rec.train().unwrap();
        assert_eq!(report.epochs, 2);
        assert!(!report.converged);
    }

    #[test]
    fn test_empty_budget_has_no_final_value() {
        let cfg = ModelConfig {
            num_iter: 0,
            ..seeded(ModelKind::DemoBaseline)
        };
        let mut rec = DemoRecommender::new(cfg, grouped()).unwrap();
        let report = rec.train().unwrap();
        assert_eq!(report.epochs, 0);
        assert_eq!(report.final_value, None);
    }

    #[test]
    fn test_cancelled_before_training() {
        let mut rec = DemoRecommender::new(seeded(ModelKind::DemoBaseline), grouped()).unwrap();
        rec.cancel_token().cancel();
        assert!(matches!(rec.train(), Err(ModelError::Cancelled)));
        assert_eq!(rec.epochs(), 0);

        rec.cancel_token().reset();
        assert!(rec.train().is_ok());
    }

    #[test]
    fn test_predictions_bounded() {
        let cfg = ModelConfig {
            num_iter: 10,
            ..seeded(ModelKind::DemoUserKnn)
        };
        let mut rec = DemoRecommender::new(cfg, grouped()).unwrap();
        rec.train().unwrap();
        let (lo, hi) = rec.model().rating_range();
        for u in 0..10 {
            for i in 0..8 {
                let p = rec.predict(u, i);
                assert!(p >= lo && p <= hi, "prediction {} for ({}, {})", p, u, i);
                assert!(rec.predict_unbounded(u, i).is_finite());
            }
        }
    }

    #[test]
    fn test_same_seed_same_model() {
        let mut a = DemoRecommender::new(seeded(ModelKind::DemoMatrixFactorization), grouped())
            .unwrap();
        let mut b = DemoRecommender::new(seeded(ModelKind::DemoMatrixFactorization), grouped())
            .unwrap();
        a.iterate().unwrap();
        b.iterate().unwrap();
        for (u, i) in [(0, 0), (3, 4), (7, 5)] {
            assert_eq!(a.predict(u, i), b.predict(u, i));
        }
    }

    #[test]
    fn test_init_model_resets() {
        let mut rec = DemoRecommender::new(seeded(ModelKind::DemoBaseline), grouped()).unwrap();
        rec.iterate().unwrap();
        rec.init_model().unwrap();
        assert_eq!(rec.epochs(), 0);
        let avg = rec.data().ratings().average() as f64;
        assert!((rec.predict_unbounded(1, 1) - avg).abs() < 1e-6);
    }

    #[test]
    fn test_partial_updates() {
        let mut rec = DemoRecommender::new(seeded(ModelKind::DemoBaseline), grouped()).unwrap();
        let all: Vec<usize> = (0..rec.data().ratings().len()).collect();
        let report = rec
            .iterate_indices(
                &all,
                UpdateFlags {
                    user: false,
                    item: true,
                },
            )
            .unwrap();
        assert_eq!(report.epoch, 1);
        let biases = rec.model().biases().unwrap();
        assert!(biases.user.iter().all(|b| *b == 0.0));
        assert!(biases.item.iter().any(|b| *b != 0.0));
    }

    #[test]
    fn test_index_out_of_range() {
        let mut rec = DemoRecommender::new(seeded(ModelKind::DemoBaseline), grouped()).unwrap();
        let res = rec.iterate_indices(&[0, 1000], UpdateFlags::BOTH);
        assert!(matches!(res, Err(ModelError::InvalidValue(_))));
        assert_eq!(rec.epochs(), 0);
    }

    #[test]
    fn test_new_users_from_attributes() {
        let mut rec = DemoRecommender::new(seeded(ModelKind::DemoUserKnn), grouped()).unwrap();
        rec.train().unwrap();

        let rows: Vec<Vec<u32>> = (0..12).map(|u| vec![u % 2]).collect();
        let primary = BinaryMatrix::from_rows(&rows, 2).unwrap();
        rec.set_user_attributes(Demographics::new(primary, vec![]))
            .unwrap();
        assert_eq!(rec.data().n_users(), 12);
        assert_eq!(rec.model().biases().unwrap().user.len(), 12);
        assert_eq!(rec.model().neighbors().unwrap().weights.nrows(), 12);
        assert!(rec.predict_unbounded(11, 0).is_finite());
        assert!(rec.predict_unbounded(2, 3).is_finite());
    }

    #[test]
    fn test_summary() {
        let rec = DemoRecommender::new(seeded(ModelKind::DemoUserKnn), grouped()).unwrap();
        let text = rec.to_string();
        assert!(text.starts_with("DemoUserKnn "));
        assert!(text.contains("bias_reg=0.01"));
        assert!(text.contains("K=30"));
        assert!(!text.contains("num_factors"));

        let rec =
            DemoRecommender::new(seeded(ModelKind::DemoMatrixFactorization), grouped()).unwrap();
        let text = rec.to_string();
        assert!(text.contains("num_factors=4"));
        assert!(text.contains("loss=Rmse"));

        let rec =
            DemoRecommender::new(seeded(ModelKind::DemoUserSimilarity), grouped()).unwrap();
        assert_eq!(
            rec.to_string(),
            "DemoUserSimilarity num_factors=4 regularization=0.015 alpha=0.1 stop_condition=0.0001"
        );
    }
}
