// This file is part of demorec.
// Licensed under the MIT license, see LICENSE.md for details.
// SPDX-License-Identifier: MIT

//! Rating store with by-user and by-item indexes.
use arrow::array::{Array, Float32Array, Int32Array};
use arrow::datatypes::{Float32Type, Int32Type};
use log::*;
use rustc_hash::FxHashMap;

use crate::errors::{ModelError, ModelResult};
use crate::sparse::CsrStructure;
use crate::types::{checked_array, require_valid};

/// Explicit ratings, stored as parallel Arrow columns.
///
/// Rating `index` is the triple `(users[index], items[index], values[index])`.
/// The store is immutable once built; models only read through it.
pub struct Ratings {
    users: Int32Array,
    items: Int32Array,
    values: Float32Array,
    by_user: CsrStructure,
    by_item: CsrStructure,
    lookup: FxHashMap<(u32, u32), u32>,
    all_users: Vec<u32>,
    all_items: Vec<u32>,
    average: f32,
    min_rating: f32,
    max_rating: f32,
}

impl Ratings {
    /// Build a rating store from Arrow columns, checking their types.
    pub fn from_arrow(users: &dyn Array, items: &dyn Array, values: &dyn Array) -> ModelResult<Self> {
        let users = checked_array::<Int32Type>("users", users)?;
        let items = checked_array::<Int32Type>("items", items)?;
        let values = checked_array::<Float32Type>("ratings", values)?;
        Self::from_columns(users, items, values)
    }

    /// Build a rating store from `(user, item, rating)` triples.
    pub fn from_triples<I>(triples: I) -> ModelResult<Self>
    where
        I: IntoIterator<Item = (u32, u32, f32)>,
    {
        let mut users = Vec::new();
        let mut items = Vec::new();
        let mut values = Vec::new();
        for (u, i, r) in triples {
            users.push(to_i32("user", u)?);
            items.push(to_i32("item", i)?);
            values.push(r);
        }
        Self::from_columns(users.into(), items.into(), values.into())
    }

    fn from_columns(users: Int32Array, items: Int32Array, values: Float32Array) -> ModelResult<Self> {
        let n = users.len();
        if items.len() != n || values.len() != n {
            return Err(ModelError::Shape(format!(
                "{} users, {} items, {} ratings",
                n,
                items.len(),
                values.len()
            )));
        }
        require_valid("users", &users)?;
        require_valid("items", &items)?;
        require_valid("ratings", &values)?;

        let uids = to_indices("user", users.values())?;
        let iids = to_indices("item", items.values())?;

        let mut sum = 0.0f64;
        let mut min_rating = f32::INFINITY;
        let mut max_rating = f32::NEG_INFINITY;
        for r in values.values().iter() {
            if !r.is_finite() {
                return Err(ModelError::InvalidValue(format!("rating {} is not finite", r)));
            }
            sum += *r as f64;
            min_rating = min_rating.min(*r);
            max_rating = max_rating.max(*r);
        }
        let average = if n > 0 { (sum / n as f64) as f32 } else { 0.0 };
        if n == 0 {
            min_rating = 0.0;
            max_rating = 0.0;
        }

        let by_user = CsrStructure::group_positions(0, &uids);
        let by_item = CsrStructure::group_positions(0, &iids);

        let mut lookup = FxHashMap::default();
        lookup.reserve(n);
        for (pos, (u, i)) in uids.iter().zip(iids.iter()).enumerate() {
            lookup.insert((*u as u32, *i as u32), pos as u32);
        }

        let all_users = (0..by_user.len())
            .filter(|u| by_user.row_len(*u) > 0)
            .map(|u| u as u32)
            .collect();
        let all_items = (0..by_item.len())
            .filter(|i| by_item.row_len(*i) > 0)
            .map(|i| i as u32)
            .collect();

        debug!(
            "indexed {} ratings for {} users and {} items",
            n,
            by_user.len(),
            by_item.len()
        );

        Ok(Ratings {
            users,
            items,
            values,
            by_user,
            by_item,
            lookup,
            all_users,
            all_items,
            average,
            min_rating,
            max_rating,
        })
    }

    /// Number of ratings.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn user(&self, index: usize) -> usize {
        self.users.value(index) as usize
    }

    pub fn item(&self, index: usize) -> usize {
        self.items.value(index) as usize
    }

    pub fn value(&self, index: usize) -> f32 {
        self.values.value(index)
    }

    /// Number of user rows (maximum user id + 1).
    pub fn n_users(&self) -> usize {
        self.by_user.len()
    }

    /// Number of item rows (maximum item id + 1).
    pub fn n_items(&self) -> usize {
        self.by_item.len()
    }

    /// Indices of the ratings made by a user.
    pub fn by_user(&self, user: usize) -> &[u32] {
        self.by_user.row_cols(user)
    }

    /// Indices of the ratings of an item.
    pub fn by_item(&self, item: usize) -> &[u32] {
        self.by_item.row_cols(item)
    }

    pub fn count_by_user(&self, user: usize) -> usize {
        self.by_user.row_len(user)
    }

    pub fn count_by_item(&self, item: usize) -> usize {
        self.by_item.row_len(item)
    }

    /// Users with at least one rating, ascending.
    pub fn all_users(&self) -> &[u32] {
        &self.all_users
    }

    /// Items with at least one rating, ascending.
    pub fn all_items(&self) -> &[u32] {
        &self.all_items
    }

    pub fn average(&self) -> f32 {
        self.average
    }

    pub fn min_rating(&self) -> f32 {
        self.min_rating
    }

    pub fn max_rating(&self) -> f32 {
        self.max_rating
    }

    /// Look up the rating a user gave an item.
    ///
    /// If the pair was rated more than once, the last rating wins.
    pub fn get(&self, user: usize, item: usize) -> Option<f32> {
        self.lookup
            .get(&(user as u32, item as u32))
            .map(|pos| self.values.value(*pos as usize))
    }

    pub fn has_rated(&self, user: usize, item: usize) -> bool {
        self.lookup.contains_key(&(user as u32, item as u32))
    }

    /// Structure listing, for each user, the items they rated (in rating order).
    pub fn items_rated_by_user(&self) -> CsrStructure {
        let coords: Vec<(usize, u32)> = (0..self.len())
            .map(|idx| (self.user(idx), self.item(idx) as u32))
            .collect();
        CsrStructure::from_coords(self.n_users(), self.n_items(), &coords)
    }
}

fn to_i32(kind: &str, id: u32) -> ModelResult<i32> {
    i32::try_from(id).map_err(|_| ModelError::InvalidValue(format!("{} id {} too large", kind, id)))
}

fn to_indices(kind: &str, ids: &[i32]) -> ModelResult<Vec<usize>> {
    ids.iter()
        .map(|id| {
            if *id < 0 {
                Err(ModelError::InvalidValue(format!("negative {} id {}", kind, id)))
            } else {
                Ok(*id as usize)
            }
        })
        .collect()
}

#[cfg(test)]
mod test {
    use arrow::array::{Float64Array, Int32Array};

    use super::*;
    use crate::data::fixtures::small_ratings;

    #[test]
    fn test_indexes() {
        let ratings = small_ratings();
        assert_eq!(ratings.len(), 3);
        assert_eq!(ratings.n_users(), 2);
        assert_eq!(ratings.n_items(), 2);
        assert_eq!(ratings.by_user(0), &[0, 1]);
        assert_eq!(ratings.by_item(0), &[0, 2]);
        assert_eq!(ratings.count_by_user(1), 1);
        assert_eq!(ratings.count_by_item(1), 1);
        assert_eq!(ratings.count_by_user(7), 0);
        assert_eq!(ratings.all_users(), &[0, 1]);
        assert_eq!(ratings.all_items(), &[0, 1]);
    }

    #[test]
    fn test_statistics() {
        let ratings = small_ratings();
        assert!((ratings.average() - 11.0 / 3.0).abs() < 1e-6);
        assert_eq!(ratings.min_rating(), 2.0);
        assert_eq!(ratings.max_rating(), 5.0);
    }

    #[test]
    fn test_lookup() {
        let ratings = small_ratings();
        assert_eq!(ratings.get(0, 1), Some(2.0));
        assert_eq!(ratings.get(1, 1), None);
        assert!(ratings.has_rated(1, 0));
        assert!(!ratings.has_rated(5, 0));
    }

    #[test]
    fn test_items_rated_by_user() {
        let ratings = small_ratings();
        let rated = ratings.items_rated_by_user();
        assert_eq!(rated.row_cols(0), &[0, 1]);
        assert_eq!(rated.row_cols(1), &[0]);
    }

    #[test]
    fn test_from_arrow() {
        let users = Int32Array::from(vec![0, 2]);
        let items = Int32Array::from(vec![1, 1]);
        let values = Float32Array::from(vec![3.0, 4.0]);
        let ratings = Ratings::from_arrow(&users, &items, &values).expect("load failed");
        assert_eq!(ratings.n_users(), 3);
        assert_eq!(ratings.all_users(), &[0, 2]);
        assert_eq!(ratings.by_item(1), &[0, 1]);
    }

    #[test]
    fn test_from_arrow_wrong_type() {
        let users = Int32Array::from(vec![0]);
        let items = Int32Array::from(vec![1]);
        let values = Float64Array::from(vec![3.0]);
        let res = Ratings::from_arrow(&users, &items, &values);
        assert!(matches!(res, Err(ModelError::ArrayType { .. })));
    }

    #[test]
    fn test_rejects_negative_ids() {
        let users = Int32Array::from(vec![0, -1]);
        let items = Int32Array::from(vec![1, 1]);
        let values = Float32Array::from(vec![3.0, 4.0]);
        let res = Ratings::from_arrow(&users, &items, &values);
        assert!(matches!(res, Err(ModelError::InvalidValue(_))));
    }

    #[test]
    fn test_rejects_mismatched_lengths() {
        let users = Int32Array::from(vec![0, 1]);
        let items = Int32Array::from(vec![1]);
        let values = Float32Array::from(vec![3.0, 4.0]);
        let res = Ratings::from_arrow(&users, &items, &values);
        assert!(matches!(res, Err(ModelError::Shape(_))));
    }

    #[test]
    fn test_rejects_nan_rating() {
        let res = Ratings::from_triples(vec![(0, 0, f32::NAN)]);
        assert!(matches!(res, Err(ModelError::InvalidValue(_))));
    }

    #[test]
    fn test_empty() {
        let ratings = Ratings::from_triples(Vec::new()).expect("empty load failed");
        assert!(ratings.is_empty());
        assert_eq!(ratings.n_users(), 0);
        assert_eq!(ratings.average(), 0.0);
    }
}
