// This file is part of demorec.
// Licensed under the MIT license, see LICENSE.md for details.
// SPDX-License-Identifier: MIT

//! Optimizers that fit a [FactorModel](crate::model::FactorModel).
mod linesearch;
mod sgd;

pub use linesearch::{LineSearchState, LineSearchTrainer};
pub use sgd::{SgdTrainer, UpdateFlags};
pub(crate) use sgd::check_indices;
