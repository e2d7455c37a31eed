//! Business re-ranking of vector candidates
//!
//! Combines vector closeness with the customer's category affinity and the
//! product's remaining inventory into one score, keeping the per-signal
//! contributions for explanation.

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use storefront_core::{Distance, Product, ProductId};

/// Stock level at and above which inventory contributes fully.
pub const INVENTORY_CAP: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RerankWeights {
    pub similarity: f32,
    pub affinity: f32,
    pub inventory: f32,
}

impl Default for RerankWeights {
    fn default() -> Self {
        Self {
            similarity: 0.7,
            affinity: 0.2,
            inventory: 0.1,
        }
    }
}

impl RerankWeights {
    /// Clamp negatives to zero and rescale to sum to 1. All-zero weights
    /// fall back to the defaults.
    pub fn normalized(self) -> Self {
        let similarity = self.similarity.max(0.0);
        let affinity = self.affinity.max(0.0);
        let inventory = self.inventory.max(0.0);
        let total = similarity + affinity + inventory;
        if total <= f32::EPSILON || !total.is_finite() {
            return Self::default();
        }
        Self {
            similarity: similarity / total,
            affinity: affinity / total,
            inventory: inventory / total,
        }
    }
}

/// Share of a customer's purchased quantity per category, in [0, 1].
#[derive(Debug, Clone, Default)]
pub struct CategoryAffinity {
    shares: AHashMap<String, f32>,
}

impl CategoryAffinity {
    pub fn from_quantities(quantities: &BTreeMap<String, u64>) -> Self {
        let total: u64 = quantities.values().sum();
        if total == 0 {
            return Self::default();
        }
        Self {
            shares: quantities
                .iter()
                .map(|(category, &q)| (category.clone(), q as f32 / total as f32))
                .collect(),
        }
    }

    /// Full affinity for one category; used for "more like this".
    pub fn single(category: &str) -> Self {
        Self {
            shares: AHashMap::from_iter([(category.to_string(), 1.0)]),
        }
    }

    pub fn share(&self, category: &str) -> f32 {
        self.shares.get(category).copied().unwrap_or(0.0)
    }

    pub fn is_empty(&self) -> bool {
        self.shares.is_empty()
    }
}

/// Weighted contribution of each signal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub similarity: f32,
    pub affinity: f32,
    pub inventory: f32,
}

impl ScoreBreakdown {
    pub fn total(&self) -> f32 {
        self.similarity + self.affinity + self.inventory
    }
}

#[derive(Debug, Clone)]
pub struct RankedProduct {
    pub product: Product,
    pub distance: f32,
    pub score: f32,
    pub breakdown: ScoreBreakdown,
}

#[derive(Debug, Clone)]
pub struct Reranker {
    weights: RerankWeights,
    distance: Distance,
}

impl Reranker {
    pub fn new(distance: Distance) -> Self {
        Self {
            weights: RerankWeights::default(),
            distance,
        }
    }

    pub fn with_weights(mut self, weights: RerankWeights) -> Self {
        self.weights = weights.normalized();
        self
    }

    pub fn weights(&self) -> RerankWeights {
        self.weights
    }

    pub fn score(&self, product: &Product, distance: f32, affinity: &CategoryAffinity) -> ScoreBreakdown {
        let closeness = 1.0 - self.distance.normalized(distance);
        let inventory = product.stock_quantity.min(INVENTORY_CAP) as f32 / INVENTORY_CAP as f32;
        ScoreBreakdown {
            similarity: closeness * self.weights.similarity,
            affinity: affinity.share(&product.category) * self.weights.affinity,
            inventory: inventory * self.weights.inventory,
        }
    }

    /// Score and order candidates, best first; equal scores go to the lower
    /// product id.
    pub fn rerank(
        &self,
        candidates: Vec<(Product, f32)>,
        affinity: &CategoryAffinity,
    ) -> Vec<RankedProduct> {
        let mut ranked: Vec<RankedProduct> = candidates
            .into_iter()
            .map(|(product, distance)| {
                let breakdown = self.score(&product, distance, affinity);
                RankedProduct {
                    score: breakdown.total(),
                    product,
                    distance,
                    breakdown,
                }
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.product.id.cmp(&b.product.id))
        });
        ranked
    }
}

/// Products ranked by units sold, ids breaking ties.
pub fn popularity_order(products: &mut [(Product, u64)]) {
    products.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.id.cmp(&b.0.id)));
}

/// Category with the largest purchased quantity; ties go to the first name.
pub fn favourite_category(quantities: &BTreeMap<String, u64>) -> Option<&str> {
    quantities
        .iter()
        .filter(|(_, &q)| q > 0)
        .fold(None, |best: Option<(&String, u64)>, (category, &q)| match best {
            Some((_, best_q)) if best_q >= q => best,
            _ => Some((category, q)),
        })
        .map(|(category, _)| category.as_str())
}

pub(crate) fn product_id_of(metadata: Option<&serde_json::Value>) -> Option<ProductId> {
    metadata
        .and_then(|m| m.get("product_id"))
        .and_then(serde_json::Value::as_u64)
        .map(ProductId)
}
