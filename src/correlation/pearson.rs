// This file is part of demorec.
// Licensed under the MIT license, see LICENSE.md for details.
// SPDX-License-Identifier: MIT

//! Shrunk Pearson correlation over co-rated entries.
use crate::data::Ratings;

use super::{CorrelationMatrix, EntityType};

/// Running sums for one entity pair.
#[derive(Debug, Default, Clone, Copy)]
struct PairStats {
    n: u32,
    sum_x: f64,
    sum_y: f64,
    sum_xy: f64,
    sum_xx: f64,
    sum_yy: f64,
}

impl PairStats {
    fn add(&mut self, x: f64, y: f64) {
        self.n += 1;
        self.sum_x += x;
        self.sum_y += y;
        self.sum_xy += x * y;
        self.sum_xx += x * x;
        self.sum_yy += y * y;
    }

    fn correlation(&self, shrinkage: f64) -> f64 {
        if self.n < 2 {
            return 0.0;
        }
        let n = self.n as f64;
        let num = n * self.sum_xy - self.sum_x * self.sum_y;
        let den_x = n * self.sum_xx - self.sum_x * self.sum_x;
        let den_y = n * self.sum_yy - self.sum_y * self.sum_y;
        let den = (den_x * den_y).sqrt();
        if !(den > 0.0) {
            return 0.0;
        }
        let pearson = num / den;
        pearson * n / (n + shrinkage)
    }
}

impl EntityType {
    fn other(&self) -> EntityType {
        match self {
            EntityType::User => EntityType::Item,
            EntityType::Item => EntityType::User,
        }
    }

    /// Indices of the ratings belonging to an entity of this type.
    fn rating_indices<'a>(&self, ratings: &'a Ratings, entity: usize) -> &'a [u32] {
        match self {
            EntityType::User => ratings.by_user(entity),
            EntityType::Item => ratings.by_item(entity),
        }
    }

    /// The entity of this type that a rating belongs to.
    fn owner(&self, ratings: &Ratings, index: usize) -> usize {
        match self {
            EntityType::User => ratings.user(index),
            EntityType::Item => ratings.item(index),
        }
    }
}

impl CorrelationMatrix {
    /// Pearson correlation between users (or items) over the entries both
    /// rated, shrunk by `n / (n + shrinkage)`.
    ///
    /// `size` may exceed the number of rated entities; extra entities
    /// correlate 0 with everything else.
    pub fn pearson(ratings: &Ratings, entity: EntityType, size: usize, shrinkage: f32) -> Self {
        let shrinkage = shrinkage as f64;
        CorrelationMatrix::from_row_fn("pearson", size, |r| {
            pearson_row(r, ratings, entity, size, shrinkage)
        })
    }
}

fn pearson_row(
    row: usize,
    ratings: &Ratings,
    entity: EntityType,
    size: usize,
    shrinkage: f64,
) -> Vec<(u32, f32)> {
    let own = entity.rating_indices(ratings, row);
    if own.is_empty() {
        return Vec::new();
    }
    let other_side = entity.other();

    let mut stats = vec![PairStats::default(); size];
    let mut used = Vec::new();
    for idx in own {
        let idx = *idx as usize;
        let x = ratings.value(idx) as f64;
        let via = other_side.owner(ratings, idx);
        for oidx in other_side.rating_indices(ratings, via) {
            let oidx = *oidx as usize;
            let other = entity.owner(ratings, oidx);
            if other <= row || other >= size {
                continue;
            }
            if stats[other].n == 0 {
                used.push(other);
            }
            stats[other].add(x, ratings.value(oidx) as f64);
        }
    }

    used.sort_unstable();
    used.into_iter()
        .filter_map(|other| {
            let c = stats[other].correlation(shrinkage);
            if c != 0.0 {
                Some((other as u32, c as f32))
            } else {
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    fn ratings() -> Ratings {
        Ratings::from_triples(vec![
            (0, 0, 1.0),
            (0, 1, 2.0),
            (0, 2, 3.0),
            (1, 0, 2.0),
            (1, 1, 4.0),
            (1, 2, 6.0),
            (2, 0, 3.0),
            (2, 1, 2.0),
            (2, 2, 1.0),
            (3, 0, 5.0),
        ])
        .unwrap()
    }

    #[test]
    fn test_perfect_correlations() {
        let corr = CorrelationMatrix::pearson(&ratings(), EntityType::User, 4, 0.0);
        assert!((corr.get(0, 1) - 1.0).abs() < 1e-6);
        assert!((corr.get(0, 2) + 1.0).abs() < 1e-6);
        assert!((corr.get(2, 1) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_too_few_corated() {
        let corr = CorrelationMatrix::pearson(&ratings(), EntityType::User, 4, 0.0);
        assert_eq!(corr.get(0, 3), 0.0);
    }

    #[test]
    fn test_shrinkage() {
        let corr = CorrelationMatrix::pearson(&ratings(), EntityType::User, 4, 3.0);
        // three co-rated items: 3 / (3 + 3)
        assert!((corr.get(0, 1) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_item_correlation() {
        let corr = CorrelationMatrix::pearson(&ratings(), EntityType::Item, 3, 0.0);
        assert_eq!(corr.size(), 3);
        assert_eq!(corr.get(0, 0), 1.0);
        // items 1 and 2 over users 0, 1, 2: (2,3), (4,6), (2,1)
        let c = corr.get(1, 2);
        assert!(c > 0.0 && c < 1.0);
    }

    #[test]
    fn test_zero_variance() {
        let r = Ratings::from_triples(vec![(0, 0, 3.0), (0, 1, 3.0), (1, 0, 1.0), (1, 1, 5.0)])
            .unwrap();
        let corr = CorrelationMatrix::pearson(&r, EntityType::User, 2, 0.0);
        assert_eq!(corr.get(0, 1), 0.0);
    }
}
