// This file is part of demorec.
// Licensed under the MIT license, see LICENSE.md for details.
// SPDX-License-Identifier: MIT

//! Training data: ratings plus user and item side information.

mod attributes;
mod ratings;

pub use attributes::{BinaryMatrix, Demographics};
pub use ratings::Ratings;

/// Ratings together with the attribute matrices a model reads.
pub struct Dataset {
    pub(crate) ratings: Ratings,
    pub(crate) demographics: Demographics,
    pub(crate) item_attributes: Option<BinaryMatrix>,
}

impl Dataset {
    /// A dataset with ratings only.
    pub fn new(ratings: Ratings) -> Self {
        Dataset {
            ratings,
            demographics: Demographics::none(),
            item_attributes: None,
        }
    }

    /// Attach user demographic attributes.
    pub fn with_demographics(mut self, demographics: Demographics) -> Self {
        self.demographics = demographics;
        self
    }

    /// Attach item attributes.
    pub fn with_item_attributes(mut self, attributes: BinaryMatrix) -> Self {
        self.item_attributes = Some(attributes);
        self
    }

    pub fn ratings(&self) -> &Ratings {
        &self.ratings
    }

    pub fn demographics(&self) -> &Demographics {
        &self.demographics
    }

    pub fn item_attributes(&self) -> Option<&BinaryMatrix> {
        self.item_attributes.as_ref()
    }

    /// Active attributes of an item (empty if no item attributes are loaded).
    pub fn item_attribute_row(&self, item: usize) -> &[u32] {
        match &self.item_attributes {
            Some(m) => m.row(item),
            None => &[],
        }
    }

    /// Number of user rows any per-user array must cover.
    pub fn n_users(&self) -> usize {
        self.ratings.n_users().max(self.demographics.n_rows())
    }

    /// Number of item rows any per-item array must cover.
    pub fn n_items(&self) -> usize {
        let attr_rows = self.item_attributes.as_ref().map_or(0, BinaryMatrix::n_rows);
        self.ratings.n_items().max(attr_rows)
    }
}


#[cfg(test)]
mod test {
    use super::fixtures::*;

    #[test]
    fn test_dataset_sizes_cover_attributes() {
        let data = small_demographic();
        assert_eq!(data.ratings().n_users(), 2);
        assert_eq!(data.n_users(), 3);
        assert_eq!(data.n_items(), 2);
        assert!(data.item_attribute_row(0).is_empty());
    }

    #[test]
    fn test_grouped_fixture() {
        let data = grouped();
        assert_eq!(data.n_users(), 8);
        assert_eq!(data.n_items(), 6);
        assert_eq!(data.demographics().n_dims(), 2);
        assert!(data.item_attribute_row(5).is_empty());
        assert_eq!(data.item_attribute_row(1), &[1, 2]);
    }
}
