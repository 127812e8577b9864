// This file is part of demorec.
// Licensed under the MIT license, see LICENSE.md for details.
// SPDX-License-Identifier: MIT

//! Factorization model assembled from optional parameter blocks.
//!
//! A [FactorModel] holds one value per enabled block and scores a
//! `(user, item)` pair by summing the terms of the blocks it has.  Which
//! blocks exist is decided by the [ModelKind] at initialization.
mod bias;
mod demographic;
mod latent;
mod neighbor;

use log::*;
use ndarray::{s, Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use rayon::prelude::*;

use crate::config::{ModelConfig, ModelKind};
use crate::data::Dataset;
use crate::errors::{ModelError, ModelResult};
use crate::ok_or_err;

pub use bias::EntityBiases;
pub use demographic::{AttributeInteractions, DemographicBiases};
pub use latent::{ImplicitFeedback, ItemAttributeFactors, LatentFactors};
pub use neighbor::NeighborBlend;

/// An additive prediction term contributed by one parameter block.
pub trait ScoreTerm {
    /// The term's contribution for a user and item; 0 when the block has
    /// nothing for them.
    fn score(&self, data: &Dataset, user: usize, item: usize) -> f64;
}

/// The parameter blocks enabled for a model kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TermSet {
    pub global: bool,
    pub biases: bool,
    pub demographic: bool,
    pub interactions: bool,
    pub latent: bool,
    pub implicit: bool,
    pub item_attributes: bool,
    pub neighbors: bool,
}

impl TermSet {
    pub fn for_kind(kind: ModelKind) -> TermSet {
        let base = TermSet {
            global: true,
            biases: true,
            demographic: true,
            interactions: false,
            latent: false,
            implicit: false,
            item_attributes: false,
            neighbors: false,
        };
        match kind {
            ModelKind::DemoBaseline => base,
            ModelKind::DemoMatrixFactorization => TermSet {
                latent: true,
                ..base
            },
            ModelKind::DemoSvdPlusPlus => TermSet {
                latent: true,
                implicit: true,
                item_attributes: true,
                ..base
            },
            ModelKind::DemoUserItemAttributes => TermSet {
                interactions: true,
                ..base
            },
            ModelKind::DemoMfUserItemAttributes => TermSet {
                interactions: true,
                latent: true,
                implicit: true,
                ..base
            },
            ModelKind::DemoUserKnn => TermSet {
                neighbors: true,
                ..base
            },
            ModelKind::DemoUserSimilarity => TermSet {
                global: false,
                biases: false,
                demographic: false,
                latent: true,
                ..base
            },
        }
    }
}

/// How the summed score becomes a rating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// The score is the prediction; bounded predictions are clipped.
    Clamp,
    /// `min + sigmoid(score) * (max - min)`.
    Logistic,
}

pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Draws normally-distributed initial parameters.
pub(crate) struct Initializer<'r> {
    normal: Normal<f32>,
    rng: &'r mut StdRng,
}

impl<'r> Initializer<'r> {
    pub fn new(config: &ModelConfig, rng: &'r mut StdRng) -> ModelResult<Self> {
        let normal = Normal::new(config.init_mean, config.init_std_dev)
            .map_err(|e| ModelError::Config(format!("invalid initial distribution: {}", e)))?;
        Ok(Initializer { normal, rng })
    }

    /// A matrix whose active rows are drawn from the initial distribution,
    /// other rows are zero.
    pub fn matrix<F>(&mut self, rows: usize, cols: usize, active: F) -> Array2<f32>
    where
        F: Fn(usize) -> bool,
    {
        let normal = self.normal;
        let rng = &mut *self.rng;
        Array2::from_shape_fn((rows, cols), |(r, _c)| {
            if active(r) {
                normal.sample(rng)
            } else {
                0.0
            }
        })
    }
}

/// Grow a vector with zeros; never shrinks.
pub(crate) fn grow_vector(arr: &mut Array1<f32>, len: usize) {
    let old = arr.len();
    if len <= old {
        return;
    }
    let mut grown = Array1::zeros(len);
    grown.slice_mut(s![..old]).assign(arr);
    *arr = grown;
}

/// Grow a matrix with zero rows and columns; never shrinks.
pub(crate) fn grow_matrix(arr: &mut Array2<f32>, rows: usize, cols: usize) {
    let (old_r, old_c) = arr.dim();
    if rows <= old_r && cols <= old_c {
        return;
    }
    let mut grown = Array2::zeros((rows.max(old_r), cols.max(old_c)));
    grown.slice_mut(s![..old_r, ..old_c]).assign(arr);
    *arr = grown;
}

/// A demographic-augmented rating prediction model.
pub struct FactorModel {
    kind: ModelKind,
    terms: TermSet,
    pub(crate) output: OutputMode,
    pub(crate) global_bias: f64,
    pub(crate) min_rating: f64,
    pub(crate) max_rating: f64,
    pub(crate) biases: Option<EntityBiases>,
    pub(crate) demographic: Option<DemographicBiases>,
    pub(crate) interactions: Option<AttributeInteractions>,
    pub(crate) latent: Option<LatentFactors>,
    pub(crate) implicit: Option<ImplicitFeedback>,
    pub(crate) item_attributes: Option<ItemAttributeFactors>,
    pub(crate) neighbors: Option<NeighborBlend>,
    /// Precomputed effective user vectors `P[u] + |N(u)|^-1/2 ΣY`.
    user_cache: Option<Array2<f32>>,
}

impl FactorModel {
    /// Allocate and initialize every block the configured kind uses.
    ///
    /// The configuration is validated first.
    pub fn init(config: &ModelConfig, data: &Dataset, rng: &mut StdRng) -> ModelResult<Self> {
        config.validate()?;
        let kind = config.kind;
        let terms = TermSet::for_kind(kind);
        let ratings = data.ratings();
        let n_users = data.n_users();
        let n_items = data.n_items();
        let nf = config.num_factors;
        let mut init = Initializer::new(config, rng)?;

        let min_rating = ratings.min_rating() as f64;
        let max_rating = ratings.max_rating() as f64;
        let average = ratings.average() as f64;
        let output = if kind == ModelKind::DemoMatrixFactorization {
            OutputMode::Logistic
        } else {
            OutputMode::Clamp
        };
        let global_bias = match output {
            OutputMode::Clamp => average,
            OutputMode::Logistic => {
                let range = max_rating - min_rating;
                if range > 0.0 {
                    let norm = (average - min_rating) / range;
                    (norm / (1.0 - norm)).ln()
                } else {
                    0.0
                }
            }
        };

        let biases = terms.biases.then(|| EntityBiases::zeros(n_users, n_items));
        let demographic = terms
            .demographic
            .then(|| DemographicBiases::zeros(data.demographics()));
        let interactions = if terms.interactions {
            let item_attrs = ok_or_err!(
                data.item_attributes(),
                ModelError::MissingData,
                "{} requires item attributes",
                kind
            )?;
            Some(AttributeInteractions::new(
                data.demographics(),
                item_attrs,
                &mut init,
            ))
        } else {
            None
        };
        let latent = terms
            .latent
            .then(|| LatentFactors::new(ratings, n_users, n_items, nf, &mut init));
        let implicit = terms
            .implicit
            .then(|| ImplicitFeedback::new(ratings, n_items, nf, &mut init));
        let item_attributes = terms
            .item_attributes
            .then(|| ItemAttributeFactors::new(data.item_attributes(), nf, &mut init));
        let neighbors = if terms.neighbors {
            Some(NeighborBlend::new(config.k, config.shrinkage, data, &mut init)?)
        } else {
            None
        };

        debug!(
            "initialized {} for {} users, {} items, {} factors, {} demographic dimensions",
            kind,
            n_users,
            n_items,
            if terms.latent { nf } else { 0 },
            data.demographics().n_dims()
        );

        Ok(FactorModel {
            kind,
            terms,
            output,
            global_bias,
            min_rating,
            max_rating,
            biases,
            demographic,
            interactions,
            latent,
            implicit,
            item_attributes,
            neighbors,
            user_cache: None,
        })
    }

    pub fn kind(&self) -> ModelKind {
        self.kind
    }

    pub fn terms(&self) -> TermSet {
        self.terms
    }

    pub fn output(&self) -> OutputMode {
        self.output
    }

    pub fn global_bias(&self) -> f64 {
        self.global_bias
    }

    pub fn rating_range(&self) -> (f64, f64) {
        (self.min_rating, self.max_rating)
    }

    pub fn biases(&self) -> Option<&EntityBiases> {
        self.biases.as_ref()
    }

    pub fn demographic(&self) -> Option<&DemographicBiases> {
        self.demographic.as_ref()
    }

    pub fn interactions(&self) -> Option<&AttributeInteractions> {
        self.interactions.as_ref()
    }

    pub fn latent(&self) -> Option<&LatentFactors> {
        self.latent.as_ref()
    }

    pub fn implicit(&self) -> Option<&ImplicitFeedback> {
        self.implicit.as_ref()
    }

    pub fn item_attribute_factors(&self) -> Option<&ItemAttributeFactors> {
        self.item_attributes.as_ref()
    }

    pub fn neighbors(&self) -> Option<&NeighborBlend> {
        self.neighbors.as_ref()
    }

    /// The blocks whose terms are simple per-block sums.
    fn additive_terms(&self) -> impl Iterator<Item = &dyn ScoreTerm> + '_ {
        let biases = self.biases.as_ref().map(|b| b as &dyn ScoreTerm);
        let demographic = self.demographic.as_ref().map(|b| b as &dyn ScoreTerm);
        let interactions = self.interactions.as_ref().map(|b| b as &dyn ScoreTerm);
        biases.into_iter().chain(demographic).chain(interactions)
    }

    /// Effective user vector, or `None` if the user has no factor row.
    pub fn user_vector(&self, user: usize) -> Option<Array1<f64>> {
        let latent = self.latent.as_ref()?;
        if let Some(cache) = &self.user_cache {
            return (user < cache.nrows()).then(|| cache.row(user).mapv(|v| v as f64));
        }
        if user >= latent.user.nrows() {
            return None;
        }
        let mut vec = latent.user.row(user).mapv(|v| v as f64);
        if let Some(imp) = &self.implicit {
            imp.accumulate(user, &mut vec);
        }
        Some(vec)
    }

    /// Effective item vector, or `None` if the item has no factor row.
    pub fn item_vector(&self, data: &Dataset, item: usize) -> Option<Array1<f64>> {
        let latent = self.latent.as_ref()?;
        if item >= latent.item.nrows() {
            return None;
        }
        let mut vec = latent.item.row(item).mapv(|v| v as f64);
        if let Some(xf) = &self.item_attributes {
            xf.accumulate(data.item_attribute_row(item), &mut vec);
        }
        Some(vec)
    }

    fn latent_term(&self, data: &Dataset, user: usize, item: usize) -> f64 {
        if self.latent.is_none() {
            return 0.0;
        }
        match (self.user_vector(user), self.item_vector(data, item)) {
            (Some(pu), Some(qi)) => pu.dot(&qi),
            _ => 0.0,
        }
    }

    /// Score without the neighbor correction.
    pub fn base_score(&self, data: &Dataset, user: usize, item: usize) -> f64 {
        let mut score = if self.terms.global {
            self.global_bias
        } else {
            0.0
        };
        for term in self.additive_terms() {
            score += term.score(data, user, item);
        }
        score + self.latent_term(data, user, item)
    }

    /// Neighbor correction: matched neighbors' residuals against their base
    /// score, weighted by `W` and divided by the root of their count.
    pub fn neighbor_term(&self, data: &Dataset, user: usize, item: usize) -> f64 {
        let blend = match &self.neighbors {
            Some(b) => b,
            None => return 0.0,
        };
        let nbrs = blend.qualifying(data, user, item);
        if nbrs.is_empty() {
            return 0.0;
        }
        let sum: f64 = nbrs
            .iter()
            .map(|(v, r)| (r - self.base_score(data, *v, item)) * blend.weight(user, *v) as f64)
            .sum();
        sum / (nbrs.len() as f64).sqrt()
    }

    /// The summed score of every enabled term, before the output transform.
    pub fn raw_score(&self, data: &Dataset, user: usize, item: usize) -> f64 {
        self.base_score(data, user, item) + self.neighbor_term(data, user, item)
    }

    /// Apply the output transform to a raw score.
    pub fn transform(&self, score: f64) -> f64 {
        match self.output {
            OutputMode::Clamp => score,
            OutputMode::Logistic => {
                self.min_rating + sigmoid(score) * (self.max_rating - self.min_rating)
            }
        }
    }

    /// Predict a rating.  Bounded predictions are clipped to the observed
    /// rating range; unbounded ones never are.
    pub fn predict(&self, data: &Dataset, user: usize, item: usize, bounded: bool) -> f64 {
        if !self.terms.global && !self.covers(user, item) {
            return self.global_bias;
        }
        let pred = self.transform(self.raw_score(data, user, item));
        if bounded {
            pred.clamp(self.min_rating, self.max_rating)
        } else {
            pred
        }
    }

    /// Whether both entities have factor rows.
    fn covers(&self, user: usize, item: usize) -> bool {
        match &self.latent {
            Some(l) => user < l.user.nrows() && item < l.item.nrows(),
            None => false,
        }
    }

    /// Drop the effective user vector cache.
    pub(crate) fn invalidate_user_cache(&mut self) {
        self.user_cache = None;
    }

    /// Recompute effective user vectors for implicit-feedback models.
    pub(crate) fn refresh_user_factors(&mut self) {
        self.user_cache = None;
        let (latent, implicit) = match (&self.latent, &self.implicit) {
            (Some(l), Some(i)) => (l, i),
            _ => return,
        };
        let mut cache = latent.user.clone();
        cache
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .enumerate()
            .for_each(|(u, mut row)| {
                let mut extra = Array1::zeros(row.len());
                implicit.accumulate(u, &mut extra);
                row.zip_mut_with(&extra, |p, y| *p += *y as f32);
            });
        self.user_cache = Some(cache);
    }

    /// Grow every block to cover the entities and attributes of `data`,
    /// zero-filling new entries, and rebuild the neighbor cache.
    pub(crate) fn expand(&mut self, data: &Dataset) -> ModelResult<()> {
        let n_users = data.n_users();
        let n_items = data.n_items();
        let n_item_attrs = data.item_attributes().map_or(0, |m| m.n_cols());
        if let Some(b) = &mut self.biases {
            b.expand(n_users, n_items);
        }
        if let Some(d) = &mut self.demographic {
            d.expand(data.demographics());
        }
        if let Some(h) = &mut self.interactions {
            h.expand(data.demographics(), n_item_attrs);
        }
        if let Some(l) = &mut self.latent {
            l.expand(n_users, n_items);
        }
        if let Some(y) = &mut self.implicit {
            y.expand(n_items);
        }
        if let Some(x) = &mut self.item_attributes {
            x.expand(data.item_attributes());
        }
        if let Some(nb) = &mut self.neighbors {
            nb.expand(n_users);
            nb.rebuild(data.demographics())?;
        }
        self.invalidate_user_cache();
        debug!("expanded {} to {} users and {} items", self.kind, n_users, n_items);
        Ok(())
    }

    /// Name of the first parameter block holding a NaN or infinity.
    pub(crate) fn first_non_finite(&self) -> Option<&'static str> {
        if !self.global_bias.is_finite() {
            return Some("global bias");
        }
        if self.biases.as_ref().is_some_and(|b| !b.is_finite()) {
            return Some("entity bias");
        }
        if self.demographic.as_ref().is_some_and(|b| !b.is_finite()) {
            return Some("demographic bias");
        }
        if self.interactions.as_ref().is_some_and(|b| !b.is_finite()) {
            return Some("attribute interaction");
        }
        if self.latent.as_ref().is_some_and(|b| !b.is_finite()) {
            return Some("latent factor");
        }
        if self.implicit.as_ref().is_some_and(|b| !b.is_finite()) {
            return Some("implicit factor");
        }
        if self.item_attributes.as_ref().is_some_and(|b| !b.is_finite()) {
            return Some("item attribute factor");
        }
        if self.neighbors.as_ref().is_some_and(|b| !b.is_finite()) {
            return Some("neighbor weight");
        }
        None
    }
}
