// This file is part of demorec.
// Licensed under the MIT license, see LICENSE.md for details.
// SPDX-License-Identifier: MIT

//! Model hyperparameters and variant selection.
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::{ModelError, ModelResult};

/// The model variants this crate can train.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelKind {
    /// Biases plus demographic biases.
    DemoBaseline,
    /// Biased matrix factorization with demographic biases and a logistic output.
    DemoMatrixFactorization,
    /// SVD++ with implicit feedback, item attribute factors, and demographic biases.
    DemoSvdPlusPlus,
    /// Demographic baseline with user-attribute × item-attribute interactions.
    DemoUserItemAttributes,
    /// Attribute interactions combined with SVD++-style latent factors.
    DemoMfUserItemAttributes,
    /// Demographic baseline with attribute-matched neighbor blending.
    DemoUserKnn,
    /// Unbiased factorization regularized toward user attribute similarity.
    DemoUserSimilarity,
}

impl ModelKind {
    pub fn name(&self) -> &'static str {
        match self {
            ModelKind::DemoBaseline => "DemoBaseline",
            ModelKind::DemoMatrixFactorization => "DemoMatrixFactorization",
            ModelKind::DemoSvdPlusPlus => "DemoSVDPlusPlus",
            ModelKind::DemoUserItemAttributes => "DemoUserItemAtt",
            ModelKind::DemoMfUserItemAttributes => "DemoMFUserItemAtt",
            ModelKind::DemoUserKnn => "DemoUserKnn",
            ModelKind::DemoUserSimilarity => "DemoUserSimilarity",
        }
    }

    /// Whether this variant is fit with full-batch line search instead of SGD.
    pub fn uses_line_search(&self) -> bool {
        matches!(self, ModelKind::DemoUserSimilarity)
    }

    /// Whether this variant has latent factor matrices.
    pub fn has_latent_factors(&self) -> bool {
        matches!(
            self,
            ModelKind::DemoMatrixFactorization
                | ModelKind::DemoSvdPlusPlus
                | ModelKind::DemoMfUserItemAttributes
                | ModelKind::DemoUserSimilarity
        )
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Loss whose gradient drives the logistic-output variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OptimizationTarget {
    #[default]
    Rmse,
    Mae,
    Logistic,
}

impl OptimizationTarget {
    /// Compute the common gradient factor for a squashed prediction.
    ///
    /// `sig` is the logistic output in (0, 1), `err` the rating residual, and
    /// `range` the width of the rating scale.
    pub fn gradient_common(&self, sig: f64, err: f64, range: f64) -> f64 {
        match self {
            OptimizationTarget::Rmse => err * sig * (1.0 - sig) * range,
            OptimizationTarget::Mae => {
                let sign = if err == 0.0 { 0.0 } else { err.signum() };
                sign * sig * (1.0 - sig) * range
            }
            OptimizationTarget::Logistic => err,
        }
    }
}

/// Hyperparameters for every model variant.
///
/// Fields a variant does not use are ignored by it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub kind: ModelKind,
    pub num_factors: usize,
    pub init_mean: f32,
    pub init_std_dev: f32,
    /// Base regularization for latent, implicit, and interaction terms.
    pub regularization: f32,
    /// Multiplier on the regularization of bias terms.
    pub bias_reg: f32,
    pub learn_rate: f32,
    /// Multiplier on the learning rate for bias terms.
    pub bias_learn_rate: f32,
    /// Geometric learning-rate decay applied after every epoch.
    pub decay: f32,
    /// Number of SGD epochs for a full training run.
    pub num_iter: usize,
    pub frequency_regularization: bool,
    pub loss: OptimizationTarget,
    /// Number of correlated neighbors per user.
    pub k: usize,
    /// Pearson shrinkage constant.
    pub shrinkage: f32,
    /// Weight of the user-similarity loss term.
    pub alpha: f32,
    /// Relative loss improvement at which line search stops.
    pub stop_condition: f64,
    /// Step size proposed on the first line-search iteration.
    pub initial_step: f64,
    /// Maximum step halvings per line-search iteration.
    pub max_halvings: usize,
    /// Maximum line-search iterations for a full training run.
    pub max_line_search_iter: usize,
    pub seed: Option<u64>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        ModelConfig {
            kind: ModelKind::DemoMatrixFactorization,
            num_factors: 10,
            init_mean: 0.0,
            init_std_dev: 0.1,
            regularization: 0.015,
            bias_reg: 0.01,
            learn_rate: 0.01,
            bias_learn_rate: 1.0,
            decay: 1.0,
            num_iter: 30,
            frequency_regularization: false,
            loss: OptimizationTarget::Rmse,
            k: 30,
            shrinkage: 10.0,
            alpha: 0.1,
            stop_condition: 1e-4,
            initial_step: 0.1,
            max_halvings: 64,
            max_line_search_iter: 500,
            seed: None,
        }
    }
}

fn check_nonnegative(name: &str, value: f32) -> ModelResult<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ModelError::Config(format!(
            "{} must be finite and non-negative, got {}",
            name, value
        )))
    }
}

fn check_positive(name: &str, value: f64) -> ModelResult<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ModelError::Config(format!(
            "{} must be finite and positive, got {}",
            name, value
        )))
    }
}

impl ModelConfig {
    /// Create a default configuration for a model kind.
    pub fn for_kind(kind: ModelKind) -> Self {
        ModelConfig {
            kind,
            ..Default::default()
        }
    }

    /// Parse a configuration from JSON; missing fields take their defaults.
    pub fn from_json(json: &str) -> ModelResult<Self> {
        let config: ModelConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that would fail or silently produce NaNs.
    pub fn validate(&self) -> ModelResult<()> {
        check_nonnegative("regularization", self.regularization)?;
        check_nonnegative("bias_reg", self.bias_reg)?;
        check_nonnegative("init_std_dev", self.init_std_dev)?;
        check_nonnegative("alpha", self.alpha)?;
        check_nonnegative("shrinkage", self.shrinkage)?;
        if !self.init_mean.is_finite() {
            return Err(ModelError::Config(format!(
                "init_mean must be finite, got {}",
                self.init_mean
            )));
        }

        if self.kind.uses_line_search() {
            check_positive("stop_condition", self.stop_condition)?;
            check_positive("initial_step", self.initial_step)?;
            if self.max_halvings == 0 {
                return Err(ModelError::Config(
                    "max_halvings must be at least 1".into(),
                ));
            }
        } else {
            check_positive("learn_rate", self.learn_rate as f64)?;
            check_positive("bias_learn_rate", self.bias_learn_rate as f64)?;
            if !(self.decay > 0.0 && self.decay <= 1.0) {
                return Err(ModelError::Config(format!(
                    "decay must be in (0, 1], got {}",
                    self.decay
                )));
            }
        }

        if self.kind.has_latent_factors() && self.num_factors == 0 {
            return Err(ModelError::Config(format!(
                "{} requires at least one latent factor",
                self.kind
            )));
        }

        if self.kind == ModelKind::DemoUserKnn && self.k == 0 {
            return Err(ModelError::Config(
                "neighbor count K must be positive".into(),
            ));
        }

        Ok(())
    }
}
