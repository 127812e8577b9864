// This file is part of demorec.
// Licensed under the MIT license, see LICENSE.md for details.
// SPDX-License-Identifier: MIT

//! Binary attribute matrices for users and items.
use crate::errors::{ModelError, ModelResult};
use crate::sparse::CsrStructure;

/// A binary entity × attribute matrix.
///
/// Each row holds the sorted, de-duplicated indices of the attributes active
/// for that entity.  Rows past the end of the matrix read as empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BinaryMatrix {
    csr: CsrStructure,
}

impl BinaryMatrix {
    /// Create a matrix with no active entries.
    pub fn empty(n_rows: usize, n_cols: usize) -> Self {
        BinaryMatrix {
            csr: CsrStructure::empty(n_rows, n_cols),
        }
    }

    /// Build a matrix from `(row, column)` entries.
    ///
    /// The row count grows to cover every entry; columns must be below `n_cols`.
    pub fn from_entries<I>(n_rows: usize, n_cols: usize, entries: I) -> ModelResult<Self>
    where
        I: IntoIterator<Item = (u32, u32)>,
    {
        let mut coords = Vec::new();
        for (r, c) in entries {
            if c as usize >= n_cols {
                return Err(ModelError::Shape(format!(
                    "attribute column {} out of range for {} columns",
                    c, n_cols
                )));
            }
            coords.push((r as usize, c));
        }
        let csr = CsrStructure::from_coords(n_rows, n_cols, &coords).normalize_rows();
        Ok(BinaryMatrix { csr })
    }

    /// Build a matrix from one attribute list per row.
    pub fn from_rows(rows: &[Vec<u32>], n_cols: usize) -> ModelResult<Self> {
        let entries = rows
            .iter()
            .enumerate()
            .flat_map(|(r, cols)| cols.iter().map(move |c| (r as u32, *c)));
        Self::from_entries(rows.len(), n_cols, entries)
    }

    pub fn n_rows(&self) -> usize {
        self.csr.n_rows
    }

    pub fn n_cols(&self) -> usize {
        self.csr.n_cols
    }

    /// Number of active entries.
    pub fn nnz(&self) -> usize {
        self.csr.nnz()
    }

    /// Active attribute indices of an entity.
    pub fn row(&self, row: usize) -> &[u32] {
        self.csr.row_cols(row)
    }

    /// Number of entities carrying each attribute.
    pub fn column_counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.n_cols()];
        for r in 0..self.n_rows() {
            for c in self.row(r) {
                counts[*c as usize] += 1;
            }
        }
        counts
    }

    /// Column-major view: for each attribute, the entities carrying it.
    pub(crate) fn columns(&self) -> CsrStructure {
        self.csr.transpose()
    }
}

/// User demographic dimensions: a primary attribute matrix plus zero or more
/// additional ones.
///
/// Dimension 0 is the primary matrix when one is configured.  A value with no
/// dimensions contributes nothing to any model term.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Demographics {
    dims: Vec<BinaryMatrix>,
}

impl Demographics {
    /// No demographic attributes.
    pub fn none() -> Self {
        Demographics { dims: Vec::new() }
    }

    pub fn new(primary: BinaryMatrix, additional: Vec<BinaryMatrix>) -> Self {
        let mut dims = Vec::with_capacity(additional.len() + 1);
        dims.push(primary);
        dims.extend(additional);
        Demographics { dims }
    }

    pub fn primary(&self) -> Option<&BinaryMatrix> {
        self.dims.first()
    }

    pub fn additional(&self) -> &[BinaryMatrix] {
        if self.dims.is_empty() {
            &[]
        } else {
            &self.dims[1..]
        }
    }

    /// All dimensions, primary first.
    pub fn dims(&self) -> &[BinaryMatrix] {
        &self.dims
    }

    pub fn n_dims(&self) -> usize {
        self.dims.len()
    }

    /// Largest row count over all dimensions.
    pub fn n_rows(&self) -> usize {
        self.dims.iter().map(BinaryMatrix::n_rows).max().unwrap_or(0)
    }

    /// Active attributes of a user in dimension `dim`.
    pub fn user_attributes(&self, dim: usize, user: usize) -> &[u32] {
        self.dims[dim].row(user)
    }

    /// Whether two users have identical active attributes in every dimension.
    pub fn same_signature(&self, u: usize, v: usize) -> bool {
        self.dims.iter().all(|m| m.row(u) == m.row(v))
    }
}
