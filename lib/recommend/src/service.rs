//! Recommendation service
//!
//! Candidate generation from a [`CandidateIndex`], verification against the
//! schema store, business re-ranking and a popularity fallback used when the
//! embedding provider or the index cannot answer.

use crate::embedder::EmbeddingProvider;
use crate::rerank::{
    favourite_category, popularity_order, product_id_of, CategoryAffinity, RankedProduct, Reranker,
};
use crate::source::CandidateIndex;
use ahash::{AHashMap, AHashSet};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use storefront_core::{
    bounded, product_doc_id, CustomerId, Error, ErrorKind, FilterCondition, Product, ProductId,
    QueryHit, Result, Vector, DEFAULT_OVERFETCH_FACTOR,
};
use storefront_store::SchemaStore;
use tracing::{debug, info, warn};

/// Minimum similarity for semantic product search.
pub const DEFAULT_MIN_SIMILARITY: f32 = 0.6;

#[derive(Debug, Clone)]
pub struct RecommendationSettings {
    /// Deadline for each call to the embedding provider or the index.
    pub timeout: Duration,
    pub overfetch_factor: usize,
    pub min_similarity: f32,
}

impl Default for RecommendationSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(5_000),
            overfetch_factor: DEFAULT_OVERFETCH_FACTOR,
            min_similarity: DEFAULT_MIN_SIMILARITY,
        }
    }
}

#[derive(Debug, Clone)]
pub enum RecommendationQuery {
    Text(String),
    Vector(Vector),
}

/// A recommended or matched product.
#[derive(Debug, Clone, Serialize)]
pub struct ProductRef {
    pub product_id: ProductId,
    pub sku: String,
    pub name: String,
    pub category: String,
    pub unit_price: f64,
    pub stock_quantity: u32,
    pub score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<f32>,
}

impl ProductRef {
    fn new(product: Product, score: f32, distance: Option<f32>) -> Self {
        Self {
            product_id: product.id,
            sku: product.sku,
            name: product.name,
            category: product.category,
            unit_price: product.unit_price,
            stock_quantity: product.stock_quantity,
            score,
            distance,
        }
    }
}

impl From<RankedProduct> for ProductRef {
    fn from(ranked: RankedProduct) -> Self {
        ProductRef::new(ranked.product, ranked.score, Some(ranked.distance))
    }
}

/// Why a result came from the fallback path.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DegradedReason {
    pub dependency: String,
    pub kind: ErrorKind,
    pub message: String,
}

impl DegradedReason {
    fn from_error(dependency: &str, error: &Error) -> Self {
        Self {
            dependency: dependency.to_string(),
            kind: error.kind(),
            message: error.to_string(),
        }
    }

    fn new(dependency: &str, kind: ErrorKind, message: &str) -> Self {
        Self {
            dependency: dependency.to_string(),
            kind,
            message: message.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Recommendations {
    pub items: Vec<ProductRef>,
    /// Set when the items come from the fallback ranking.
    pub degraded: Option<DegradedReason>,
}

impl Recommendations {
    fn ranked(items: Vec<ProductRef>) -> Self {
        Self { items, degraded: None }
    }

    pub fn is_partial(&self) -> bool {
        self.degraded.is_some()
    }
}

pub struct RecommendationService {
    store: Arc<SchemaStore>,
    index: Arc<dyn CandidateIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    reranker: Reranker,
    settings: RecommendationSettings,
}

impl RecommendationService {
    pub fn new(
        store: Arc<SchemaStore>,
        index: Arc<dyn CandidateIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
        settings: RecommendationSettings,
    ) -> Self {
        let reranker = Reranker::new(index.distance());
        Self {
            store,
            index,
            embedder,
            reranker,
            settings,
        }
    }

    pub fn with_reranker(mut self, reranker: Reranker) -> Self {
        self.reranker = reranker;
        self
    }

    pub fn settings(&self) -> &RecommendationSettings {
        &self.settings
    }

    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedder
    }

    /// Up to `k` products for a query, best first.
    ///
    /// Embedding or index failures that are timeouts or unavailability yield
    /// a popularity ranking marked as degraded. Invalid input and dimension
    /// mismatches are returned as errors.
    pub async fn recommend(
        &self,
        query: RecommendationQuery,
        customer: Option<CustomerId>,
        k: usize,
    ) -> Result<Recommendations> {
        if k == 0 {
            return Err(Error::validation("k", "must be at least 1"));
        }
        let quantities = match customer {
            Some(id) => self.store.category_quantities(id)?,
            None => BTreeMap::new(),
        };

        let vector = match query {
            RecommendationQuery::Vector(vector) => vector,
            RecommendationQuery::Text(text) => {
                if text.trim().is_empty() {
                    return Err(Error::validation("query", "query text is empty"));
                }
                match self.embed(&text).await {
                    Ok(vector) => vector,
                    Err(e) if e.is_degradable() => {
                        let reason = DegradedReason::from_error(self.embedder.name(), &e);
                        return Ok(self.popularity_fallback(&quantities, k, reason));
                    }
                    Err(e) => return Err(e),
                }
            }
        };

        let hits = match self.available_candidates(&vector, k).await {
            Ok(hits) => hits,
            Err(e) if e.is_degradable() => {
                let reason = DegradedReason::from_error(self.index.name(), &e);
                return Ok(self.popularity_fallback(&quantities, k, reason));
            }
            Err(e) => return Err(e),
        };

        let candidates = self.verify(hits, None);
        if candidates.is_empty() {
            let reason = DegradedReason::new(
                self.index.name(),
                ErrorKind::Unavailable,
                "no eligible candidates in index",
            );
            return Ok(self.popularity_fallback(&quantities, k, reason));
        }

        let affinity = CategoryAffinity::from_quantities(&quantities);
        let items: Vec<ProductRef> = self
            .reranker
            .rerank(candidates, &affinity)
            .into_iter()
            .take(k)
            .map(ProductRef::from)
            .collect();
        debug!(customer = ?customer, returned = items.len(), "recommendations ranked");
        Ok(Recommendations::ranked(items))
    }

    /// Available products closest to `product_id`, ranked with full affinity
    /// for its category. Without an embedding for the product, or when the
    /// index fails, same-category best sellers are returned instead.
    pub async fn similar_products(&self, product_id: ProductId, k: usize) -> Result<Recommendations> {
        if k == 0 {
            return Err(Error::validation("k", "must be at least 1"));
        }
        let source = self.store.get_product(product_id)?;
        let doc_id = product_doc_id(product_id);
        let n = k.saturating_mul(self.settings.overfetch_factor.max(1));

        let operation = format!("{}.neighbours", self.index.name());
        let filter = FilterCondition::available_products();
        let result = bounded(
            &operation,
            self.settings.timeout,
            self.index.neighbours(&doc_id, n, &filter),
        )
        .await;

        let hits = match result {
            Ok(hits) => hits,
            Err(e @ Error::NotFound { .. }) => {
                let reason = DegradedReason::from_error(self.index.name(), &e);
                return Ok(self.category_fallback(&source, k, reason));
            }
            Err(e) if e.is_degradable() => {
                let reason = DegradedReason::from_error(self.index.name(), &e);
                return Ok(self.category_fallback(&source, k, reason));
            }
            Err(e) => return Err(e),
        };

        let candidates = self.verify(hits, Some(product_id));
        let affinity = CategoryAffinity::single(&source.category);
        let items = self
            .reranker
            .rerank(candidates, &affinity)
            .into_iter()
            .take(k)
            .map(ProductRef::from)
            .collect();
        Ok(Recommendations::ranked(items))
    }

    /// Active products whose similarity to `text` reaches `min_similarity`
    /// (the configured default when `None`), closest first.
    pub async fn search(&self, text: &str, k: usize, min_similarity: Option<f32>) -> Result<Vec<ProductRef>> {
        if k == 0 {
            return Err(Error::validation("k", "must be at least 1"));
        }
        if text.trim().is_empty() {
            return Err(Error::validation("query", "query text is empty"));
        }
        let min_similarity = min_similarity.unwrap_or(self.settings.min_similarity);
        if !(0.0..=1.0).contains(&min_similarity) {
            return Err(Error::validation("min_similarity", "must be within [0, 1]"));
        }

        let vector = self.embed(text).await?;
        let distance = self.index.distance();
        let max_distance = distance.max_distance(min_similarity);
        let n = k.saturating_mul(self.settings.overfetch_factor.max(1));
        let filter = FilterCondition::equals("is_active", true);

        let operation = format!("{}.query", self.index.name());
        let hits = bounded(
            &operation,
            self.settings.timeout,
            self.index.candidates(&vector, n, &filter, Some(max_distance)),
        )
        .await?;

        let products = self.products_for(&hits);
        let mut seen = AHashSet::new();
        Ok(hits
            .into_iter()
            .filter_map(|hit| {
                let id = product_id_of(hit.metadata.as_ref())?;
                let product = products.get(&id).filter(|p| p.is_active)?;
                seen.insert(id).then(|| {
                    ProductRef::new(product.clone(), distance.similarity(hit.distance), Some(hit.distance))
                })
            })
            .take(k)
            .collect())
    }

    async fn embed(&self, text: &str) -> Result<Vector> {
        let operation = format!("{}.embed", self.embedder.name());
        bounded(&operation, self.settings.timeout, self.embedder.embed(text)).await
    }

    async fn available_candidates(&self, vector: &Vector, k: usize) -> Result<Vec<QueryHit>> {
        let count_op = format!("{}.count", self.index.name());
        let count = bounded(&count_op, self.settings.timeout, self.index.count()).await?;
        if count == 0 {
            return Err(Error::unavailable(self.index.name(), "index is empty"));
        }

        let n = k.saturating_mul(self.settings.overfetch_factor.max(1));
        let filter = FilterCondition::available_products();
        let query_op = format!("{}.query", self.index.name());
        bounded(
            &query_op,
            self.settings.timeout,
            self.index.candidates(vector, n, &filter, None),
        )
        .await
    }

    fn products_for(&self, hits: &[QueryHit]) -> AHashMap<ProductId, Product> {
        let ids: Vec<ProductId> = hits
            .iter()
            .filter_map(|hit| product_id_of(hit.metadata.as_ref()))
            .collect();
        self.store
            .get_products(&ids)
            .into_iter()
            .map(|p| (p.id, p))
            .collect()
    }

    /// Index metadata may lag the store; keep hits whose product is still
    /// available, one per product at its closest distance.
    fn verify(&self, hits: Vec<QueryHit>, exclude: Option<ProductId>) -> Vec<(Product, f32)> {
        let products = self.products_for(&hits);
        let mut seen = AHashSet::new();
        let mut candidates = Vec::new();
        for hit in hits {
            let Some(id) = product_id_of(hit.metadata.as_ref()) else {
                continue;
            };
            if Some(id) == exclude || !seen.insert(id) {
                continue;
            }
            match products.get(&id) {
                Some(product) if product.is_available() => candidates.push((product.clone(), hit.distance)),
                _ => debug!(product = %id, "dropping stale candidate"),
            }
        }
        candidates
    }

    fn units_sold(&self) -> AHashMap<ProductId, u64> {
        self.store
            .product_performance(usize::MAX)
            .into_iter()
            .map(|p| (p.product_id, p.units_sold))
            .collect()
    }

    /// Best sellers, the customer's most-purchased category first.
    fn popularity_fallback(
        &self,
        quantities: &BTreeMap<String, u64>,
        k: usize,
        reason: DegradedReason,
    ) -> Recommendations {
        warn!(dependency = %reason.dependency, kind = ?reason.kind, "falling back to popularity ranking");
        let units = self.units_sold();
        let favourite = favourite_category(quantities);

        let mut ranked: Vec<(Product, u64)> = self
            .store
            .products()
            .into_iter()
            .filter(Product::is_available)
            .map(|p| {
                let sold = units.get(&p.id).copied().unwrap_or(0);
                (p, sold)
            })
            .collect();
        popularity_order(&mut ranked);
        if let Some(favourite) = favourite {
            // Stable, so popularity order holds within each group.
            ranked.sort_by_key(|(p, _)| p.category != favourite);
        }

        Recommendations {
            items: popularity_refs(ranked, k),
            degraded: Some(reason),
        }
    }

    fn category_fallback(&self, source: &Product, k: usize, reason: DegradedReason) -> Recommendations {
        info!(product = %source.id, dependency = %reason.dependency, "similar products from category best sellers");
        let units = self.units_sold();
        let mut ranked: Vec<(Product, u64)> = self
            .store
            .products_by_category(&source.category)
            .into_iter()
            .filter(|p| p.id != source.id && p.is_available())
            .map(|p| {
                let sold = units.get(&p.id).copied().unwrap_or(0);
                (p, sold)
            })
            .collect();
        popularity_order(&mut ranked);

        Recommendations {
            items: popularity_refs(ranked, k),
            degraded: Some(reason),
        }
    }
}

/// Score fallback items by their share of the top seller's units.
fn popularity_refs(ranked: Vec<(Product, u64)>, k: usize) -> Vec<ProductRef> {
    let top = ranked.iter().map(|(_, units)| *units).max().unwrap_or(0).max(1);
    ranked
        .into_iter()
        .take(k)
        .map(|(product, units)| ProductRef::new(product, units as f32 / top as f32, None))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::HashingEmbedder;
    use async_trait::async_trait;
    use storefront_core::{
        Distance, IndexConfig, NewCustomer, NewOrderItem, NewProduct, VectorIndex,
    };

    const DIM: usize = 128;

    struct UnavailableIndex;

    #[async_trait]
    impl CandidateIndex for UnavailableIndex {
        fn name(&self) -> &str {
            "remote-index"
        }

        fn distance(&self) -> Distance {
            Distance::Cosine
        }

        async fn count(&self) -> Result<usize> {
            Err(Error::unavailable("remote-index", "connection refused"))
        }

        async fn candidates(
            &self,
            _query: &Vector,
            _n: usize,
            _filter: &FilterCondition,
            _max_distance: Option<f32>,
        ) -> Result<Vec<QueryHit>> {
            Err(Error::unavailable("remote-index", "connection refused"))
        }

        async fn neighbours(&self, _id: &str, _n: usize, _filter: &FilterCondition) -> Result<Vec<QueryHit>> {
            Err(Error::unavailable("remote-index", "connection refused"))
        }
    }

    struct SlowIndex;

    #[async_trait]
    impl CandidateIndex for SlowIndex {
        fn name(&self) -> &str {
            "slow-index"
        }

        fn distance(&self) -> Distance {
            Distance::Cosine
        }

        async fn count(&self) -> Result<usize> {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok(1)
        }

        async fn candidates(
            &self,
            _query: &Vector,
            _n: usize,
            _filter: &FilterCondition,
            _max_distance: Option<f32>,
        ) -> Result<Vec<QueryHit>> {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok(Vec::new())
        }

        async fn neighbours(&self, _id: &str, _n: usize, _filter: &FilterCondition) -> Result<Vec<QueryHit>> {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok(Vec::new())
        }
    }

    struct DownEmbedder;

    #[async_trait]
    impl EmbeddingProvider for DownEmbedder {
        fn name(&self) -> &str {
            "down-embedder"
        }

        fn dimension(&self) -> usize {
            DIM
        }

        async fn embed(&self, _text: &str) -> Result<Vector> {
            Err(Error::unavailable("down-embedder", "503 Service Unavailable"))
        }
    }

    struct Fixture {
        store: Arc<SchemaStore>,
        index: Arc<VectorIndex>,
        embedder: Arc<HashingEmbedder>,
        customer: CustomerId,
        headphones: ProductId,
        speaker: ProductId,
        kettle: ProductId,
        toaster: ProductId,
    }

    impl Fixture {
        fn new() -> Self {
            let store = Arc::new(SchemaStore::new());
            let embedder = Arc::new(HashingEmbedder::new(DIM));
            let index = Arc::new(VectorIndex::new(IndexConfig::new("products", DIM, Distance::Cosine)));

            let add = |sku: &str, name: &str, description: &str, category: &str, stock: u32| {
                let id = store
                    .create_product(NewProduct {
                        sku: sku.to_string(),
                        name: name.to_string(),
                        description: description.to_string(),
                        category: category.to_string(),
                        subcategory: None,
                        unit_price: 50.0,
                        stock_quantity: stock,
                    })
                    .unwrap();
                let product = store.get_product(id).unwrap();
                index
                    .upsert(product.doc_id(), embedder.embed_sync(description), Some(product.index_metadata()))
                    .unwrap();
                id
            };

            let headphones = add("AUD-1", "Studio Headphones", "wireless bluetooth headphones", "Audio", 30);
            let speaker = add("AUD-2", "Bluetooth Speaker", "portable bluetooth speaker", "Audio", 30);
            let kettle = add("KIT-1", "Electric Kettle", "stainless steel electric kettle", "Kitchen", 30);
            let toaster = add("KIT-2", "Toaster", "two slice toaster", "Kitchen", 30);

            let customer = store
                .create_customer(NewCustomer::new("Grace", "Hopper", "grace@example.com"))
                .unwrap();
            store
                .create_order(customer, &[NewOrderItem::new(kettle, 3), NewOrderItem::new(toaster, 1)])
                .unwrap();

            Self {
                store,
                index,
                embedder,
                customer,
                headphones,
                speaker,
                kettle,
                toaster,
            }
        }

        fn service(&self) -> RecommendationService {
            RecommendationService::new(
                self.store.clone(),
                self.index.clone(),
                self.embedder.clone(),
                RecommendationSettings::default(),
            )
        }

        fn service_with(
            &self,
            index: Arc<dyn CandidateIndex>,
            embedder: Arc<dyn EmbeddingProvider>,
            timeout_ms: u64,
        ) -> RecommendationService {
            RecommendationService::new(
                self.store.clone(),
                index,
                embedder,
                RecommendationSettings {
                    timeout: Duration::from_millis(timeout_ms),
                    ..Default::default()
                },
            )
        }
    }

    #[tokio::test]
    async fn test_recommend_ranks_closest_first() {
        let fx = Fixture::new();
        let result = fx
            .service()
            .recommend(RecommendationQuery::Text("bluetooth headphones".into()), None, 2)
            .await
            .unwrap();

        assert!(!result.is_partial());
        assert_eq!(result.items.len(), 2);
        assert_eq!(result.items[0].product_id, fx.headphones);
        assert_eq!(result.items[1].product_id, fx.speaker);
        assert!(result.items[0].score >= result.items[1].score);
    }

    #[tokio::test]
    async fn test_recommend_skips_unavailable_products() {
        let fx = Fixture::new();
        fx.store.set_product_stock(fx.headphones, 0).unwrap();

        // The index projection still says in stock; the store wins.
        let result = fx
            .service()
            .recommend(RecommendationQuery::Text("bluetooth headphones".into()), None, 4)
            .await
            .unwrap();
        assert!(result.items.iter().all(|p| p.product_id != fx.headphones));
        assert_eq!(result.items.len(), 3);
    }

    #[tokio::test]
    async fn test_recommend_never_exceeds_k() {
        let fx = Fixture::new();
        let result = fx
            .service()
            .recommend(RecommendationQuery::Vector(fx.embedder.embed_sync("kettle")), Some(fx.customer), 1)
            .await
            .unwrap();
        assert_eq!(result.items.len(), 1);
        assert_eq!(result.items[0].product_id, fx.kettle);
    }

    #[tokio::test]
    async fn test_unavailable_index_degrades_to_popularity() {
        let fx = Fixture::new();
        let service = fx.service_with(Arc::new(UnavailableIndex), fx.embedder.clone(), 1_000);
        let result = service
            .recommend(RecommendationQuery::Text("bluetooth headphones".into()), Some(fx.customer), 3)
            .await
            .unwrap();

        let reason = result.degraded.as_ref().unwrap();
        assert_eq!(reason.dependency, "remote-index");
        assert_eq!(reason.kind, ErrorKind::Unavailable);
        // Kitchen is the customer's category; the kettle sold the most units.
        let ids: Vec<ProductId> = result.items.iter().map(|p| p.product_id).collect();
        assert_eq!(ids, vec![fx.kettle, fx.toaster, fx.headphones]);
    }

    #[tokio::test]
    async fn test_embedder_outage_degrades() {
        let fx = Fixture::new();
        let service = fx.service_with(fx.index.clone(), Arc::new(DownEmbedder), 1_000);
        let result = service
            .recommend(RecommendationQuery::Text("anything".into()), None, 2)
            .await
            .unwrap();
        assert!(result.is_partial());
        assert_eq!(result.degraded.unwrap().dependency, "down-embedder");
        assert_eq!(result.items[0].product_id, fx.kettle);
    }

    #[tokio::test]
    async fn test_slow_index_times_out_into_fallback() {
        let fx = Fixture::new();
        let service = fx.service_with(Arc::new(SlowIndex), fx.embedder.clone(), 20);
        let result = service
            .recommend(RecommendationQuery::Text("toaster".into()), None, 2)
            .await
            .unwrap();
        assert_eq!(result.degraded.unwrap().kind, ErrorKind::Timeout);
        assert_eq!(result.items.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_index_degrades() {
        let fx = Fixture::new();
        let empty = Arc::new(VectorIndex::new(IndexConfig::new("products", DIM, Distance::Cosine)));
        let service = fx.service_with(empty, fx.embedder.clone(), 1_000);
        let result = service
            .recommend(RecommendationQuery::Text("speaker".into()), None, 4)
            .await
            .unwrap();
        assert!(result.is_partial());
        assert_eq!(result.items.len(), 4);
    }

    #[tokio::test]
    async fn test_validation_errors_propagate() {
        let fx = Fixture::new();
        let service = fx.service();

        let err = service
            .recommend(RecommendationQuery::Text("speaker".into()), Some(CustomerId(999)), 3)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = service
            .recommend(RecommendationQuery::Text("speaker".into()), None, 0)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = service
            .recommend(RecommendationQuery::Vector(Vector::new(vec![1.0; 3])), None, 3)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Dimension);
    }

    #[tokio::test]
    async fn test_similar_products_excludes_source() {
        let fx = Fixture::new();
        let result = fx.service().similar_products(fx.speaker, 2).await.unwrap();
        assert!(!result.is_partial());
        assert!(result.items.iter().all(|p| p.product_id != fx.speaker));
        assert_eq!(result.items[0].product_id, fx.headphones);
    }

    #[tokio::test]
    async fn test_similar_products_without_embedding_uses_category() {
        let fx = Fixture::new();
        fx.index.delete(&product_doc_id(fx.toaster)).unwrap();
        let result = fx.service().similar_products(fx.toaster, 3).await.unwrap();
        assert_eq!(result.degraded.as_ref().unwrap().kind, ErrorKind::NotFound);
        let ids: Vec<ProductId> = result.items.iter().map(|p| p.product_id).collect();
        assert_eq!(ids, vec![fx.kettle]);

        let err = fx.service().similar_products(ProductId(404), 3).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_search_applies_similarity_threshold() {
        let fx = Fixture::new();
        let service = fx.service();

        let hits = service.search("portable bluetooth speaker", 5, Some(0.99)).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].product_id, fx.speaker);
        assert!(hits[0].score > 0.99);

        let loose = service.search("portable bluetooth speaker", 5, Some(0.0)).await.unwrap();
        assert_eq!(loose.len(), 4);

        let err = service.search("speaker", 5, Some(1.5)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
}
