// This file is part of demorec.
// Licensed under the MIT license, see LICENSE.md for details.
// SPDX-License-Identifier: MIT

//! Demographic bias and user × item attribute interaction blocks.
use ndarray::{Array1, Array2};

use crate::data::{BinaryMatrix, Dataset, Demographics};

use super::{grow_matrix, grow_vector, Initializer, ScoreTerm};

/// One bias per attribute column, for every demographic dimension.
///
/// Dimension 0 holds `main_demo`, the rest hold `second_demo[d]`.  The
/// prediction averages the biases of a user's active attributes within each
/// dimension.
#[derive(Debug, Clone)]
pub struct DemographicBiases {
    pub(crate) weights: Vec<Array1<f32>>,
}

impl DemographicBiases {
    pub fn zeros(demographics: &Demographics) -> Self {
        DemographicBiases {
            weights: demographics
                .dims()
                .iter()
                .map(|m| Array1::zeros(m.n_cols()))
                .collect(),
        }
    }

    /// Biases of the primary attribute columns.
    pub fn main_demo(&self) -> Option<&Array1<f32>> {
        self.weights.first()
    }

    /// Biases of additional dimension `d` (0-based, excluding the primary).
    pub fn second_demo(&self, d: usize) -> Option<&Array1<f32>> {
        self.weights.get(d + 1)
    }

    pub(crate) fn expand(&mut self, demographics: &Demographics) {
        for (d, m) in demographics.dims().iter().enumerate() {
            if d < self.weights.len() {
                grow_vector(&mut self.weights[d], m.n_cols());
            } else {
                self.weights.push(Array1::zeros(m.n_cols()));
            }
        }
    }

    pub(crate) fn is_finite(&self) -> bool {
        self.weights.iter().all(|w| w.iter().all(|b| b.is_finite()))
    }
}

impl ScoreTerm for DemographicBiases {
    fn score(&self, data: &Dataset, user: usize, _item: usize) -> f64 {
        let mut total = 0.0;
        for (m, w) in data.demographics().dims().iter().zip(self.weights.iter()) {
            let attrs = m.row(user);
            if attrs.is_empty() {
                continue;
            }
            let sum: f64 = attrs
                .iter()
                .filter_map(|a| w.get(*a as usize))
                .map(|b| *b as f64)
                .sum();
            total += sum / attrs.len() as f64;
        }
        total
    }
}

/// Interaction weights `H[d]` between the attributes of demographic dimension
/// `d` and the item attributes.
#[derive(Debug, Clone)]
pub struct AttributeInteractions {
    pub(crate) h: Vec<Array2<f32>>,
}

impl AttributeInteractions {
    pub(crate) fn new(
        demographics: &Demographics,
        item_attributes: &BinaryMatrix,
        init: &mut Initializer<'_>,
    ) -> Self {
        let n_item_cols = item_attributes.n_cols();
        AttributeInteractions {
            h: demographics
                .dims()
                .iter()
                .map(|m| init.matrix(m.n_cols(), n_item_cols, |_| true))
                .collect(),
        }
    }

    /// Interaction matrix of dimension `d` (0 is the primary dimension).
    pub fn matrix(&self, d: usize) -> Option<&Array2<f32>> {
        self.h.get(d)
    }

    pub(crate) fn expand(&mut self, demographics: &Demographics, n_item_cols: usize) {
        for (d, m) in demographics.dims().iter().enumerate() {
            if d < self.h.len() {
                grow_matrix(&mut self.h[d], m.n_cols(), n_item_cols);
            } else {
                self.h.push(Array2::zeros((m.n_cols(), n_item_cols)));
            }
        }
    }

    pub(crate) fn is_finite(&self) -> bool {
        self.h.iter().all(|h| h.iter().all(|v| v.is_finite()))
    }
}

impl ScoreTerm for AttributeInteractions {
    fn score(&self, data: &Dataset, user: usize, item: usize) -> f64 {
        let item_attrs = data.item_attribute_row(item);
        if item_attrs.is_empty() {
            return 0.0;
        }
        let n_item = item_attrs.len() as f64;
        let mut total = 0.0;
        for (m, h) in data.demographics().dims().iter().zip(self.h.iter()) {
            let user_attrs = m.row(user);
            if user_attrs.is_empty() {
                continue;
            }
            let mut sum = 0.0;
            for ua in user_attrs {
                for ia in item_attrs {
                    if let Some(v) = h.get((*ua as usize, *ia as usize)) {
                        sum += *v as f64;
                    }
                }
            }
            total += sum / n_item / user_attrs.len() as f64;
        }
        total
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::data::fixtures::{grouped, small_demographic};

    #[test]
    fn test_demo_average() {
        let data = grouped();
        let mut demo = DemographicBiases::zeros(data.demographics());
        demo.weights[0][1] = 0.5;
        demo.weights[1][0] = -0.25;
        demo.weights[1][1] = 1.0;
        // user 1: primary attr 1, age attr 0
        let s = demo.score(&data, 1, 0);
        assert!((s - 0.25).abs() < 1e-9);
        // user 4: primary attr 0, age attr 1
        let s = demo.score(&data, 4, 0);
        assert!((s - 1.0).abs() < 1e-9);
        assert_eq!(demo.second_demo(0).map(|w| w.len()), Some(3));
    }

    #[test]
    fn test_demo_empty_attributes() {
        let data = small_demographic();
        let mut demo = DemographicBiases::zeros(data.demographics());
        demo.weights[0][0] = 2.0;
        assert_eq!(demo.score(&data, 2, 0), 0.0);
        assert_eq!(demo.score(&data, 40, 0), 0.0);
        assert_eq!(demo.score(&data, 0, 0), 2.0);
    }

    #[test]
    fn test_interaction_normalization() {
        let data = grouped();
        let mut h = AttributeInteractions {
            h: vec![Array2::zeros((2, 3)), Array2::zeros((3, 3))],
        };
        h.h[0][(1, 1)] = 1.0;
        h.h[0][(1, 2)] = 3.0;
        // user 1 has primary attribute 1; item 1 has attributes {1, 2}
        let s = h.score(&data, 1, 1);
        assert!((s - 2.0).abs() < 1e-9);
        // item 5 has no attributes
        assert_eq!(h.score(&data, 1, 5), 0.0);
    }

    #[test]
    fn test_expand_zero_fills() {
        let data = small_demographic();
        let mut demo = DemographicBiases::zeros(data.demographics());
        demo.weights[0][0] = 1.5;
        let wider = BinaryMatrix::from_rows(&[vec![0], vec![2]], 3).unwrap();
        let extra = BinaryMatrix::from_rows(&[vec![1]], 2).unwrap();
        demo.expand(&Demographics::new(wider, vec![extra]));
        assert_eq!(demo.weights.len(), 2);
        assert_eq!(demo.weights[0].to_vec(), vec![1.5, 0.0, 0.0]);
        assert_eq!(demo.weights[1].len(), 2);
    }
}
