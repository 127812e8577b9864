// This file is part of demorec.
// Licensed under the MIT license, see LICENSE.md for details.
// SPDX-License-Identifier: MIT

//! Compressed sparse row structures.

/// A compressed sparse row matrix with only structure, not values.
///
/// Rows are addressed by entity id; the column entries of a row are stored
/// contiguously in `col_inds`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CsrStructure {
    pub n_rows: usize,
    pub n_cols: usize,
    row_ptrs: Vec<usize>,
    col_inds: Vec<u32>,
}

impl CsrStructure {
    /// Create an empty structure with the given shape.
    pub fn empty(n_rows: usize, n_cols: usize) -> CsrStructure {
        CsrStructure {
            n_rows,
            n_cols,
            row_ptrs: vec![0; n_rows + 1],
            col_inds: Vec::new(),
        }
    }

    /// Group entry positions by key.
    ///
    /// Row `k` of the result lists, in order, the positions `p` at which
    /// `keys[p] == k`.  This is the structure of the by-user and by-item
    /// rating indexes.
    pub fn group_positions(n_rows: usize, keys: &[usize]) -> CsrStructure {
        let coords: Vec<(usize, u32)> = keys
            .iter()
            .enumerate()
            .map(|(pos, k)| (*k, pos as u32))
            .collect();
        Self::from_coords(n_rows, keys.len(), &coords)
    }

    /// Build a structure from (row, column) coordinates, keeping input order
    /// within each row.
    pub fn from_coords(n_rows: usize, n_cols: usize, coords: &[(usize, u32)]) -> CsrStructure {
        let n_rows = coords
            .iter()
            .map(|(r, _)| r + 1)
            .max()
            .unwrap_or(0)
            .max(n_rows);
        let mut row_ptrs = vec![0usize; n_rows + 1];

        // step 1: count row entries, placing counts in rps[r+1].
        for (r, _c) in coords {
            row_ptrs[r + 1] += 1;
        }

        // step 2: convert counts into row offsets
        for i in 1..=n_rows {
            row_ptrs[i] += row_ptrs[i - 1];
        }

        // step 3: insert column indices at each row's insertion point
        let mut row_ips = row_ptrs.clone();
        let mut col_inds = vec![0u32; coords.len()];
        for (r, c) in coords {
            col_inds[row_ips[*r]] = *c;
            row_ips[*r] += 1;
        }

        CsrStructure {
            n_rows,
            n_cols,
            row_ptrs,
            col_inds,
        }
    }

    /// Sort and de-duplicate the column indices of every row.
    pub fn normalize_rows(self) -> CsrStructure {
        let mut coords = Vec::with_capacity(self.nnz());
        for row in 0..self.n_rows {
            let mut cols = self.row_cols(row).to_vec();
            cols.sort_unstable();
            cols.dedup();
            coords.extend(cols.into_iter().map(|c| (row, c)));
        }
        Self::from_coords(self.n_rows, self.n_cols, &coords)
    }

    /// Transpose the structure, so columns become rows.
    pub fn transpose(&self) -> CsrStructure {
        let mut coords = Vec::with_capacity(self.nnz());
        for row in 0..self.n_rows {
            for c in self.row_cols(row) {
                coords.push((*c as usize, row as u32));
            }
        }
        Self::from_coords(self.n_cols, self.n_rows, &coords)
    }

    /// Get the "length" (number of rows) in the matrix.
    pub fn len(&self) -> usize {
        self.n_rows
    }

    pub fn is_empty(&self) -> bool {
        self.n_rows == 0
    }

    /// Get the number of stored entries.
    pub fn nnz(&self) -> usize {
        self.col_inds.len()
    }

    /// Get the extent in the underlying arrays for a row in the matrix.
    pub fn extent(&self, row: usize) -> (usize, usize) {
        (self.row_ptrs[row], self.row_ptrs[row + 1])
    }

    /// Get the column indices for a row, or an empty slice for rows past the end.
    pub fn row_cols(&self, row: usize) -> &[u32] {
        if row >= self.n_rows {
            return &[];
        }
        let (start, end) = self.extent(row);
        &self.col_inds[start..end]
    }

    /// Number of entries in a row (0 for rows past the end).
    pub fn row_len(&self, row: usize) -> usize {
        self.row_cols(row).len()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_group_positions() {
        let csr = CsrStructure::group_positions(3, &[2, 0, 2, 1, 0]);
        assert_eq!(csr.len(), 3);
        assert_eq!(csr.nnz(), 5);
        assert_eq!(csr.row_cols(0), &[1, 4]);
        assert_eq!(csr.row_cols(1), &[3]);
        assert_eq!(csr.row_cols(2), &[0, 2]);
    }

    #[test]
    fn test_grows_for_large_keys() {
        let csr = CsrStructure::group_positions(1, &[0, 3]);
        assert_eq!(csr.len(), 4);
        assert_eq!(csr.row_cols(3), &[1]);
        assert!(csr.row_cols(2).is_empty());
    }

    #[test]
    fn test_row_past_end_is_empty() {
        let csr = CsrStructure::empty(2, 5);
        assert!(csr.row_cols(10).is_empty());
        assert_eq!(csr.row_len(10), 0);
    }

    #[test]
    fn test_normalize_rows() {
        let csr = CsrStructure::from_coords(2, 4, &[(0, 3), (0, 1), (0, 3), (1, 2)]);
        let csr = csr.normalize_rows();
        assert_eq!(csr.row_cols(0), &[1, 3]);
        assert_eq!(csr.row_cols(1), &[2]);
    }

    #[test]
    fn test_transpose() {
        let csr = CsrStructure::from_coords(2, 3, &[(0, 0), (0, 2), (1, 2)]);
        let t = csr.transpose();
        assert_eq!(t.len(), 3);
        assert_eq!(t.row_cols(0), &[0]);
        assert!(t.row_cols(1).is_empty());
        assert_eq!(t.row_cols(2), &[0, 1]);
    }
}
