use crate::{DocId, Document, Error, Filter, QueryHit, Result, Vector};
use ordered_float::OrderedFloat;
use parking_lot::RwLock;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Embedding width of the text-embedding-ada-002 family.
pub const DEFAULT_VECTOR_DIM: usize = 1536;

/// Candidates fetched per requested result before post-filtering.
pub const DEFAULT_OVERFETCH_FACTOR: usize = 4;

/// Configuration for an index; fixed at creation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexConfig {
    pub name: String,
    pub vector_dim: usize,
    pub distance: Distance,
    pub overfetch_factor: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            vector_dim: DEFAULT_VECTOR_DIM,
            distance: Distance::Cosine,
            overfetch_factor: DEFAULT_OVERFETCH_FACTOR,
        }
    }
}

impl IndexConfig {
    pub fn new(name: &str, vector_dim: usize, distance: Distance) -> Self {
        Self {
            name: name.to_string(),
            vector_dim,
            distance,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Distance {
    /// 1 − cosine similarity, in [0, 2]
    Cosine,
    /// L2 distance
    Euclidean,
}

impl Distance {
    #[inline]
    pub fn between(self, a: &Vector, b: &Vector) -> f32 {
        match self {
            Distance::Cosine => 1.0 - a.cosine_similarity(b),
            Distance::Euclidean => a.l2_distance(b),
        }
    }

    /// Similarity in [0, 1] for a distance: cosine similarity clamped at
    /// zero, or `1 / (1 + d)` for L2.
    #[inline]
    pub fn similarity(self, distance: f32) -> f32 {
        match self {
            Distance::Cosine => (1.0 - distance).clamp(0.0, 1.0),
            Distance::Euclidean => 1.0 / (1.0 + distance.max(0.0)),
        }
    }

    /// Largest distance whose similarity is still at least `min_similarity`.
    pub fn max_distance(self, min_similarity: f32) -> f32 {
        match self {
            Distance::Cosine => 1.0 - min_similarity,
            Distance::Euclidean if min_similarity <= 0.0 => f32::INFINITY,
            Distance::Euclidean => 1.0 / min_similarity - 1.0,
        }
    }

    /// Distance rescaled onto [0, 1], 0 meaning identical.
    #[inline]
    pub fn normalized(self, distance: f32) -> f32 {
        match self {
            Distance::Cosine => (distance / 2.0).clamp(0.0, 1.0),
            Distance::Euclidean => {
                let d = distance.max(0.0);
                d / (1.0 + d)
            }
        }
    }
}

impl std::str::FromStr for Distance {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Cosine" | "cosine" => Ok(Distance::Cosine),
            "Euclidean" | "euclidean" | "l2" => Ok(Distance::Euclidean),
            other => Err(Error::validation(other, "unknown distance metric")),
        }
    }
}

/// Exact nearest-neighbour index over documents of a fixed dimensionality
///
/// Queries scan every document in parallel, order by (distance, id) and
/// post-filter by metadata, widening the candidate window by the over-fetch
/// factor until `k` hits survive or the index is exhausted. Reads may run
/// alongside writes; a query sees the documents present when it takes the
/// read lock.
pub struct VectorIndex {
    config: IndexConfig,
    documents: Arc<RwLock<HashMap<DocId, Document>>>,
}

impl VectorIndex {
    pub fn new(config: IndexConfig) -> Self {
        Self {
            config,
            documents: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn vector_dim(&self) -> usize {
        self.config.vector_dim
    }

    pub fn distance(&self) -> Distance {
        self.config.distance
    }

    pub fn count(&self) -> usize {
        self.documents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.read().is_empty()
    }

    /// Check that `vector` could be stored here: right dimension, finite
    /// components. `id` names the failing entity in the error.
    pub fn validate_vector(&self, id: &str, vector: &Vector) -> Result<()> {
        if vector.dim() != self.config.vector_dim {
            return Err(Error::Dimension {
                id: id.to_string(),
                expected: self.config.vector_dim,
                actual: vector.dim(),
            });
        }
        if !vector.is_finite() {
            return Err(Error::validation(id, "vector contains non-finite components"));
        }
        Ok(())
    }

    /// Insert or replace a document, returning its new version.
    pub fn upsert(
        &self,
        id: impl Into<DocId>,
        vector: Vector,
        metadata: Option<serde_json::Value>,
    ) -> Result<u64> {
        self.upsert_document(Document::new(id, vector, metadata))
    }

    pub fn upsert_document(&self, mut document: Document) -> Result<u64> {
        self.validate_vector(document.id.as_ref(), &document.vector)?;

        let mut documents = self.documents.write();
        document.version = documents
            .get(&document.id)
            .map(|existing| existing.version + 1)
            .unwrap_or(0);
        let version = document.version;
        debug!(index = %self.config.name, doc = %document.id, version, "upsert");
        documents.insert(document.id.clone(), document);
        Ok(version)
    }

    /// Insert a document only if its id is not taken yet.
    pub fn insert_new(&self, document: Document) -> Result<()> {
        self.validate_vector(document.id.as_ref(), &document.vector)?;

        let mut documents = self.documents.write();
        if documents.contains_key(&document.id) {
            return Err(Error::constraint(&document.id, "document already exists"));
        }
        documents.insert(document.id.clone(), document);
        Ok(())
    }

    /// Upsert many documents; nothing is written if any of them is invalid.
    pub fn batch_upsert(&self, documents: Vec<Document>) -> Result<()> {
        for document in &documents {
            self.validate_vector(document.id.as_ref(), &document.vector)?;
        }

        let mut stored = self.documents.write();
        for mut document in documents {
            document.version = stored
                .get(&document.id)
                .map(|existing| existing.version + 1)
                .unwrap_or(0);
            stored.insert(document.id.clone(), document);
        }
        Ok(())
    }

    /// Replace the metadata of an existing document, keeping its vector.
    pub fn update_metadata(&self, id: &str, metadata: serde_json::Value) -> Result<bool> {
        let mut documents = self.documents.write();
        match documents.get_mut(id) {
            Some(document) => {
                document.metadata = Some(metadata);
                document.version += 1;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Get a document by ID
    pub fn get(&self, id: &str) -> Option<Document> {
        self.documents.read().get(id).cloned()
    }

    /// Delete a document by ID
    pub fn delete(&self, id: &str) -> Result<bool> {
        let mut documents = self.documents.write();
        Ok(documents.remove(id).is_some())
    }

    /// Nearest neighbours of `query`, ascending by distance, ties by id.
    pub fn query(
        &self,
        query: &Vector,
        k: usize,
        filter: Option<&dyn Filter>,
    ) -> Result<Vec<QueryHit>> {
        self.query_within(query, k, filter, None)
    }

    /// Like [`VectorIndex::query`], dropping hits farther than `max_distance`.
    pub fn query_within(
        &self,
        query: &Vector,
        k: usize,
        filter: Option<&dyn Filter>,
        max_distance: Option<f32>,
    ) -> Result<Vec<QueryHit>> {
        self.validate_vector("query", query)?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let documents = self.documents.read();
        let distance = self.config.distance;

        let mut ranked: Vec<(OrderedFloat<f32>, &Document)> = documents
            .par_iter()
            .map(|(_, document)| {
                (OrderedFloat(distance.between(query, &document.vector)), document)
            })
            .filter(|(d, _)| max_distance.map(|max| d.0 <= max).unwrap_or(true))
            .collect();
        ranked.sort_unstable_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.id.cmp(&b.1.id)));

        let hits = match filter {
            None => ranked.iter().take(k).map(|(d, doc)| hit(doc, d.0)).collect(),
            Some(filter) => {
                let factor = self.config.overfetch_factor.max(2);
                let mut window = k.saturating_mul(factor);
                loop {
                    let candidates = &ranked[..window.min(ranked.len())];
                    let hits: Vec<QueryHit> = candidates
                        .iter()
                        .filter(|(_, doc)| filter.matches(doc))
                        .take(k)
                        .map(|(d, doc)| hit(doc, d.0))
                        .collect();
                    if hits.len() >= k || candidates.len() == ranked.len() {
                        break hits;
                    }
                    debug!(index = %self.config.name, window, found = hits.len(), "widening candidate window");
                    window = window.saturating_mul(factor);
                }
            }
        };

        Ok(hits)
    }

    /// Neighbours of a stored document, excluding the document itself.
    pub fn similar_to(
        &self,
        id: &str,
        k: usize,
        filter: Option<&dyn Filter>,
    ) -> Result<Vec<QueryHit>> {
        let source = self
            .get(id)
            .ok_or_else(|| Error::not_found("document", id))?;

        let mut hits = self.query(&source.vector, k + 1, filter)?;
        hits.retain(|h| h.id != source.id);
        hits.truncate(k);
        Ok(hits)
    }

    /// Get all documents
    pub fn documents(&self) -> Vec<Document> {
        self.documents.read().values().cloned().collect()
    }
}

fn hit(document: &Document, distance: f32) -> QueryHit {
    QueryHit {
        id: document.id.clone(),
        distance,
        metadata: document.metadata.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FilterCondition;
    use serde_json::json;

    fn index(dim: usize) -> VectorIndex {
        VectorIndex::new(IndexConfig::new("test", dim, Distance::Cosine))
    }

    #[test]
    fn test_query_returns_at_most_count() {
        let index = index(3);
        index.upsert("a", Vector::new(vec![1.0, 0.0, 0.0]), None).unwrap();
        index.upsert("b", Vector::new(vec![0.7, 0.7, 0.0]), None).unwrap();
        index.upsert("c", Vector::new(vec![0.0, 0.0, 1.0]), None).unwrap();

        let hits = index.query(&Vector::new(vec![1.0, 0.1, 0.0]), 5, None).unwrap();
        assert_eq!(hits.len(), 3);
        assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));
        assert_eq!(hits[0].id.as_ref(), "a");
        assert_eq!(hits[2].id.as_ref(), "c");
    }

    #[test]
    fn test_ties_broken_by_id() {
        let index = index(2);
        for id in ["delta", "alpha", "charlie", "bravo"] {
            index.upsert(id, Vector::new(vec![1.0, 1.0]), None).unwrap();
        }

        let hits = index.query(&Vector::new(vec![1.0, 1.0]), 3, None).unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_ref()).collect();
        assert_eq!(ids, vec!["alpha", "bravo", "charlie"]);
    }

    #[test]
    fn test_wrong_dimension_leaves_index_unchanged() {
        let index = index(3);
        index.upsert("a", Vector::new(vec![1.0, 0.0, 0.0]), Some(json!({"v": 1}))).unwrap();

        let err = index.upsert("a", Vector::new(vec![1.0, 0.0]), Some(json!({"v": 2}))).unwrap_err();
        assert!(matches!(err, Error::Dimension { expected: 3, actual: 2, .. }));

        let err = index.upsert("b", Vector::new(vec![1.0; 4]), None).unwrap_err();
        assert!(matches!(err, Error::Dimension { .. }));

        assert_eq!(index.count(), 1);
        let stored = index.get("a").unwrap();
        assert_eq!(stored.vector.dim(), 3);
        assert_eq!(stored.metadata, Some(json!({"v": 1})));
    }

    #[test]
    fn test_query_dimension_checked() {
        let index = index(3);
        let err = index.query(&Vector::new(vec![1.0]), 1, None).unwrap_err();
        assert!(matches!(err, Error::Dimension { .. }));
    }

    #[test]
    fn test_filter_overfetch_does_not_starve_results() {
        let index = index(2);
        // The 20 nearest documents are all inactive; only the far ones match.
        for i in 0..20 {
            index
                .upsert(format!("near-{i:02}"), Vector::new(vec![1.0, 0.01 * i as f32]), Some(json!({"is_active": false, "stock": 5})))
                .unwrap();
        }
        for i in 0..5 {
            index
                .upsert(format!("far-{i}"), Vector::new(vec![0.1 * i as f32, 1.0]), Some(json!({"is_active": true, "stock": 5})))
                .unwrap();
        }

        let filter = FilterCondition::available_products();
        let hits = index.query(&Vector::new(vec![1.0, 0.0]), 3, Some(&filter)).unwrap();
        assert_eq!(hits.len(), 3);
        assert!(hits.iter().all(|h| h.id.as_ref().starts_with("far-")));
    }

    #[test]
    fn test_upsert_bumps_version_and_delete() {
        let index = index(2);
        assert_eq!(index.upsert("a", Vector::new(vec![1.0, 0.0]), None).unwrap(), 0);
        assert_eq!(index.upsert("a", Vector::new(vec![0.0, 1.0]), None).unwrap(), 1);
        assert_eq!(index.count(), 1);

        assert!(index.delete("a").unwrap());
        assert!(!index.delete("a").unwrap());
        assert!(index.is_empty());
    }

    #[test]
    fn test_insert_new_rejects_existing_id() {
        let index = index(2);
        index.insert_new(Document::new("r1", Vector::new(vec![1.0, 0.0]), None)).unwrap();
        let err = index
            .insert_new(Document::new("r1", Vector::new(vec![0.0, 1.0]), None))
            .unwrap_err();
        assert!(matches!(err, Error::Constraint { .. }));
        assert_eq!(index.get("r1").unwrap().vector.as_slice(), &[1.0, 0.0]);
    }

    #[test]
    fn test_batch_upsert_is_all_or_nothing() {
        let index = index(2);
        let err = index
            .batch_upsert(vec![
                Document::new("ok", Vector::new(vec![1.0, 0.0]), None),
                Document::new("bad", Vector::new(vec![1.0]), None),
            ])
            .unwrap_err();
        assert!(matches!(err, Error::Dimension { .. }));
        assert!(index.is_empty());
    }

    #[test]
    fn test_similar_to_excludes_source() {
        let index = index(2);
        index.upsert("a", Vector::new(vec![1.0, 0.0]), None).unwrap();
        index.upsert("b", Vector::new(vec![0.9, 0.1]), None).unwrap();
        index.upsert("c", Vector::new(vec![0.0, 1.0]), None).unwrap();

        let hits = index.similar_to("a", 2, None).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id.as_ref(), "b");
        assert!(index.similar_to("missing", 2, None).is_err());
    }

    #[test]
    fn test_similarity_threshold_maps_to_distance() {
        let cosine = Distance::Cosine;
        assert!((cosine.max_distance(0.6) - 0.4).abs() < 1e-6);
        assert!((cosine.similarity(0.4) - 0.6).abs() < 1e-6);
        assert_eq!(cosine.normalized(2.0), 1.0);

        let l2 = Distance::Euclidean;
        assert!((l2.similarity(l2.max_distance(0.5)) - 0.5).abs() < 1e-6);
        assert_eq!(l2.max_distance(0.0), f32::INFINITY);
    }

    #[test]
    fn test_euclidean_and_max_distance() {
        let index = VectorIndex::new(IndexConfig::new("l2", 2, Distance::Euclidean));
        index.upsert("origin", Vector::new(vec![0.0, 0.0]), None).unwrap();
        index.upsert("far", Vector::new(vec![3.0, 4.0]), None).unwrap();

        let hits = index
            .query_within(&Vector::new(vec![0.0, 0.0]), 5, None, Some(1.0))
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id.as_ref(), "origin");
    }
}
