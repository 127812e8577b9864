// This file is part of demorec.
// Licensed under the MIT license, see LICENSE.md for details.
// SPDX-License-Identifier: MIT

//! Rating prediction with latent factor models augmented by user demographics
//! and item attributes.
//!
//! A [DemoRecommender] bundles a [Dataset], a [FactorModel] whose parameter
//! blocks are chosen by [ModelKind], and the optimizer that fits it.

pub mod errors;

pub mod config;
pub mod correlation;
pub mod data;
pub mod model;
pub mod progress;
mod recommender;
mod sparse;
pub mod train;
mod types;

pub use config::{ModelConfig, ModelKind, OptimizationTarget};
pub use data::{BinaryMatrix, Dataset, Demographics, Ratings};
pub use errors::{ModelError, ModelResult};
pub use model::FactorModel;
pub use progress::CancelToken;
pub use recommender::{DemoRecommender, EpochReport, TrainingReport};
