// This file is part of demorec.
// Licensed under the MIT license, see LICENSE.md for details.
// SPDX-License-Identifier: MIT

//! Error types for model construction and training.
use thiserror::Error;

/// Errors surfaced by data loading, model initialization, and training.
#[derive(Error, Debug)]
pub enum ModelError {
    /// The hyperparameters cannot produce a usable model.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// The selected model needs data that was not supplied.
    #[error("missing data: {0}")]
    MissingData(String),
    /// An Arrow input array has the wrong type.
    #[error("invalid {name} type {found}, expected {expected}")]
    ArrayType {
        name: String,
        found: String,
        expected: String,
    },
    /// Input arrays or matrices have inconsistent dimensions.
    #[error("shape mismatch: {0}")]
    Shape(String),
    /// An input value is outside its domain (negative id, null, NaN).
    #[error("invalid value: {0}")]
    InvalidValue(String),
    /// Backtracking could not find a step that decreases the loss.
    #[error("line search failed to decrease loss {loss} after {halvings} halvings")]
    LineSearchStalled { halvings: usize, loss: f64 },
    /// Training produced a NaN or infinite value.
    #[error("non-finite {0} encountered during training")]
    NonFinite(&'static str),
    /// Training was stopped through a cancellation token.
    #[error("training cancelled")]
    Cancelled,
    #[error("configuration parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

pub type ModelResult<T> = Result<T, ModelError>;

/// Convert an option into a result with a formatted error message.
#[macro_export]
macro_rules! ok_or_err {
    ($opt:expr, $variant:path, $($arg:expr),*) => {
        $opt.ok_or_else(|| $variant(format!($($arg),*)))
    };
}
