// This file is part of demorec.
// Licensed under the MIT license, see LICENSE.md for details.
// SPDX-License-Identifier: MIT

//! Binary cosine similarity over attribute rows.
use crate::data::BinaryMatrix;
use crate::sparse::CsrStructure;

use super::CorrelationMatrix;

impl CorrelationMatrix {
    /// Cosine similarity between the rows of a binary matrix:
    /// `|A ∩ B| / sqrt(|A| |B|)`.  Rows with no active entries correlate 0
    /// with everything but themselves.
    pub fn binary_cosine(matrix: &BinaryMatrix) -> CorrelationMatrix {
        let columns = matrix.columns();
        CorrelationMatrix::from_row_fn("binary cosine", matrix.n_rows(), |r| {
            cosine_row(r, matrix, &columns)
        })
    }
}

fn cosine_row(row: usize, matrix: &BinaryMatrix, columns: &CsrStructure) -> Vec<(u32, f32)> {
    let attrs = matrix.row(row);
    if attrs.is_empty() {
        return Vec::new();
    }

    // shared-attribute counts, plus the slots in use
    let mut counts = vec![0u32; matrix.n_rows()];
    let mut used = Vec::new();
    for a in attrs {
        for other in columns.row_cols(*a as usize) {
            let other = *other as usize;
            if other <= row {
                continue;
            }
            if counts[other] == 0 {
                used.push(other);
            }
            counts[other] += 1;
        }
    }

    used.sort_unstable();
    let len = attrs.len() as f64;
    used.into_iter()
        .map(|other| {
            let o_len = matrix.row(other).len() as f64;
            let sim = counts[other] as f64 / (len * o_len).sqrt();
            (other as u32, sim as f32)
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_cosine_values() {
        let m = BinaryMatrix::from_rows(&[vec![0, 1], vec![1], vec![2], vec![]], 3).unwrap();
        let corr = CorrelationMatrix::binary_cosine(&m);
        assert_eq!(corr.size(), 4);
        assert!((corr.get(0, 1) - 1.0 / 2f32.sqrt()).abs() < 1e-6);
        assert_eq!(corr.get(1, 0), corr.get(0, 1));
        assert_eq!(corr.get(0, 2), 0.0);
        assert_eq!(corr.get(3, 0), 0.0);
        assert_eq!(corr.get(3, 3), 1.0);
    }

    #[test]
    fn test_identical_rows() {
        let m = BinaryMatrix::from_rows(&[vec![0, 2], vec![0, 2]], 3).unwrap();
        let corr = CorrelationMatrix::binary_cosine(&m);
        assert!((corr.get(0, 1) - 1.0).abs() < 1e-6);
    }
}
