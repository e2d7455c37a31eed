use crate::analytics::AnalyticsAggregator;
use crate::persistence::{IndexSnapshot, SnapshotData, SnapshotPersistence};
use crate::analytics::Granularity;
use crate::reviews::{
    self, ReviewMatch, ReviewSummary, ReviewThemes, SentimentComparison, SentimentTrend,
    TopRatedProduct,
};
use crate::store::{SchemaStore, Tables};
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use storefront_core::model::product_doc_id;
use storefront_core::{
    Distance, Document, Error, Filter, FilterCondition, IndexConfig, NewProduct, NewReview,
    Product, ProductId, Result, ReviewDocument, Vector, VectorIndex, DEFAULT_OVERFETCH_FACTOR,
    DEFAULT_VECTOR_DIM,
};
use tracing::{error, info, warn};

pub const PRODUCTS_INDEX: &str = "products";
pub const REVIEWS_INDEX: &str = "reviews";

#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub vector_dim: usize,
    pub distance: Distance,
    pub overfetch_factor: usize,
    pub snapshot_interval: Option<Duration>,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            vector_dim: DEFAULT_VECTOR_DIM,
            distance: Distance::Cosine,
            overfetch_factor: DEFAULT_OVERFETCH_FACTOR,
            snapshot_interval: Some(Duration::from_secs(300)),
        }
    }
}

/// Owns the schema store, the named vector indexes and their persistence
pub struct StorageManager {
    store: Arc<SchemaStore>,
    analytics: Arc<AnalyticsAggregator>,
    indexes: Arc<RwLock<HashMap<String, Arc<VectorIndex>>>>,
    data_dir: PathBuf,
    persistence: Arc<SnapshotPersistence>,
    settings: StorageSettings,
}

impl StorageManager {
    pub fn new<P: AsRef<Path>>(data_dir: P, settings: StorageSettings) -> Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&data_dir)?;

        let persistence = Arc::new(SnapshotPersistence::new(&data_dir));

        let (tables, mut indexes) = match persistence.load()? {
            Some(snapshot) => {
                info!("Loading snapshot from disk...");
                let mut indexes = HashMap::new();
                for index_snapshot in snapshot.indexes {
                    let index = index_snapshot.restore()?;
                    indexes.insert(index.name().to_string(), Arc::new(index));
                }
                info!(
                    customers = snapshot.tables.customers.len(),
                    products = snapshot.tables.products.len(),
                    orders = snapshot.tables.orders.len(),
                    indexes = indexes.len(),
                    "snapshot loaded"
                );
                (snapshot.tables, indexes)
            }
            None => (Tables::default(), HashMap::new()),
        };

        for name in [PRODUCTS_INDEX, REVIEWS_INDEX] {
            if let Some(existing) = indexes.get(name) {
                if existing.vector_dim() != settings.vector_dim {
                    return Err(Error::Dimension {
                        id: name.to_string(),
                        expected: settings.vector_dim,
                        actual: existing.vector_dim(),
                    });
                }
                continue;
            }
            let config = IndexConfig {
                name: name.to_string(),
                vector_dim: settings.vector_dim,
                distance: settings.distance,
                overfetch_factor: settings.overfetch_factor,
            };
            indexes.insert(name.to_string(), Arc::new(VectorIndex::new(config)));
        }

        let store = Arc::new(SchemaStore::from_tables(tables));
        Ok(Self {
            analytics: Arc::new(AnalyticsAggregator::new(store.clone())),
            store,
            indexes: Arc::new(RwLock::new(indexes)),
            data_dir,
            persistence,
            settings,
        })
    }

    #[inline]
    pub fn store(&self) -> &Arc<SchemaStore> {
        &self.store
    }

    #[inline]
    pub fn analytics(&self) -> &Arc<AnalyticsAggregator> {
        &self.analytics
    }

    #[inline]
    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn settings(&self) -> &StorageSettings {
        &self.settings
    }

    // ==================== Indexes ====================

    pub fn create_index(&self, config: IndexConfig) -> Result<Arc<VectorIndex>> {
        let name = config.name.clone();
        let mut indexes = self.indexes.write();

        if indexes.contains_key(&name) {
            return Err(Error::constraint(&name, "index already exists"));
        }

        let index = Arc::new(VectorIndex::new(config));
        indexes.insert(name, index.clone());
        Ok(index)
    }

    #[inline]
    pub fn get_index(&self, name: &str) -> Option<Arc<VectorIndex>> {
        self.indexes.read().get(name).cloned()
    }

    pub fn index(&self, name: &str) -> Result<Arc<VectorIndex>> {
        self.get_index(name)
            .ok_or_else(|| Error::not_found("index", name))
    }

    #[inline]
    #[must_use]
    pub fn list_indexes(&self) -> Vec<String> {
        let mut names: Vec<String> = self.indexes.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn products_index(&self) -> Result<Arc<VectorIndex>> {
        self.index(PRODUCTS_INDEX)
    }

    pub fn reviews_index(&self) -> Result<Arc<VectorIndex>> {
        self.index(REVIEWS_INDEX)
    }

    /// Create a product together with its index entry.
    ///
    /// The vector is checked against the products index before the catalog
    /// row is written, so a bad vector leaves nothing behind.
    pub fn create_product(&self, attrs: NewProduct, vector: Option<Vector>) -> Result<Product> {
        attrs.validate()?;
        let index = self.products_index()?;
        if let Some(vector) = &vector {
            index.validate_vector(&attrs.sku, vector)?;
        }
        let id = self.store.create_product(attrs)?;
        let product = self.store.get_product(id)?;
        if let Some(vector) = vector {
            index.upsert(product.doc_id(), vector, Some(product.index_metadata()))?;
        }
        Ok(product)
    }

    /// Upsert a product's embedding, projecting its current catalog fields
    /// into the document metadata.
    pub fn index_product(&self, id: ProductId, vector: Vector) -> Result<u64> {
        let product = self.store.get_product(id)?;
        self.products_index()?
            .upsert(product.doc_id(), vector, Some(product.index_metadata()))
    }

    pub fn remove_product_embedding(&self, id: ProductId) -> Result<bool> {
        self.products_index()?.delete(&product_doc_id(id))
    }

    /// Copy the product's current price, stock and active flag into its
    /// index entry. Returns `false` if the product has no embedding.
    pub fn refresh_product_projection(&self, id: ProductId) -> Result<bool> {
        let product = self.store.get_product(id)?;
        self.products_index()?
            .update_metadata(&product.doc_id(), product.index_metadata())
    }

    pub fn set_product_stock(&self, id: ProductId, stock: u32) -> Result<Product> {
        let product = self.store.set_product_stock(id, stock)?;
        self.refresh_product_projection(id)?;
        Ok(product)
    }

    pub fn set_product_active(&self, id: ProductId, active: bool) -> Result<Product> {
        let product = self.store.set_product_active(id, active)?;
        self.refresh_product_projection(id)?;
        Ok(product)
    }

    // ==================== Reviews ====================

    /// Publish a review. Reviews are append-only: an existing review id is
    /// rejected rather than overwritten.
    pub fn publish_review(&self, review: NewReview, vector: Vector) -> Result<ReviewDocument> {
        review.validate()?;
        if self.store.get_product(review.product_id).is_err() {
            return Err(Error::constraint(review.product_id, "product does not exist"));
        }
        if let Some(customer) = review.customer_id {
            if self.store.get_customer(customer).is_err() {
                return Err(Error::constraint(customer, "customer does not exist"));
            }
        }

        let document = ReviewDocument {
            review_id: review
                .review_id
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            product_id: review.product_id,
            customer_id: review.customer_id,
            rating: review.rating,
            title: review.title,
            text: review.text,
            verified_purchase: review.verified_purchase,
            created_at: Utc::now(),
        };
        self.reviews_index()?.insert_new(Document::new(
            document.review_id.as_str(),
            vector,
            Some(document.metadata()),
        ))?;
        info!(review = %document.review_id, product = %document.product_id, "review published");
        Ok(document)
    }

    pub fn reviews_for(&self, product: ProductId) -> Result<Vec<ReviewDocument>> {
        Ok(reviews::reviews_for(&*self.reviews_index()?, product))
    }

    pub fn review_summary(&self, product: ProductId) -> Result<ReviewSummary> {
        self.store.get_product(product)?;
        Ok(reviews::review_summary(&*self.reviews_index()?, product))
    }

    pub fn sentiment_trend(&self, product: ProductId, granularity: Granularity) -> Result<SentimentTrend> {
        self.store.get_product(product)?;
        Ok(reviews::sentiment_trend(&*self.reviews_index()?, product, granularity))
    }

    pub fn compare_sentiment(&self, first: ProductId, second: ProductId) -> Result<SentimentComparison> {
        self.store.get_product(first)?;
        self.store.get_product(second)?;
        Ok(reviews::compare_sentiment(&*self.reviews_index()?, first, second))
    }

    pub fn review_themes(&self, product: ProductId, limit: usize) -> Result<ReviewThemes> {
        self.store.get_product(product)?;
        Ok(reviews::common_themes(&*self.reviews_index()?, product, limit))
    }

    /// Reviews nearest to `vector`, optionally restricted to one product.
    pub fn search_reviews(
        &self,
        vector: &Vector,
        product: Option<ProductId>,
        limit: usize,
    ) -> Result<Vec<ReviewMatch>> {
        let index = self.reviews_index()?;
        let filter = product.map(|id| FilterCondition::equals("product_id", id.0));
        let hits = index.query(vector, limit, filter.as_ref().map(|f| f as &dyn Filter))?;
        let distance = index.distance();
        Ok(hits
            .into_iter()
            .filter_map(|hit| {
                let review = ReviewDocument::from_metadata(hit.metadata.as_ref()?)?;
                Some(ReviewMatch {
                    review,
                    distance: hit.distance,
                    similarity: distance.similarity(hit.distance),
                })
            })
            .collect())
    }

    pub fn top_rated_products(
        &self,
        category: Option<&str>,
        min_reviews: usize,
        limit: usize,
    ) -> Result<Vec<TopRatedProduct>> {
        Ok(reviews::top_rated_products(
            &*self.reviews_index()?,
            &self.store,
            category,
            min_reviews,
            limit,
        ))
    }

    // ==================== Persistence ====================

    fn capture(
        store: &SchemaStore,
        indexes: &RwLock<HashMap<String, Arc<VectorIndex>>>,
    ) -> SnapshotData {
        let indexes: Vec<Arc<VectorIndex>> = indexes.read().values().cloned().collect();
        SnapshotData {
            tables: store.snapshot(),
            indexes: indexes.iter().map(|i| IndexSnapshot::capture(i)).collect(),
            created_at: Utc::now().timestamp(),
        }
    }

    /// Write a snapshot now. Returns `false` if a save was already running.
    pub fn save(&self) -> Result<bool> {
        let snapshot = Self::capture(&self.store, &self.indexes);
        Ok(self.persistence.save(&snapshot)?)
    }

    pub fn last_save_time(&self) -> i64 {
        self.persistence.last_save_time()
    }

    pub fn is_save_in_progress(&self) -> bool {
        self.persistence.is_save_in_progress()
    }

    /// Start the background save thread, if an interval is configured.
    pub fn start_background_save(&self) {
        let Some(interval) = self.settings.snapshot_interval else {
            return;
        };
        let store = self.store.clone();
        let indexes = self.indexes.clone();
        let persistence = self.persistence.clone();

        std::thread::spawn(move || loop {
            std::thread::sleep(interval);

            if persistence.is_save_in_progress() {
                warn!("previous snapshot still being written, skipping");
                continue;
            }
            let snapshot = Self::capture(&store, &indexes);
            if let Err(e) = persistence.save(&snapshot) {
                error!("Background save error: {}", e);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::{customer, product};
    use storefront_core::{FilterCondition, NewOrderItem};
    use tempfile::tempdir;

    fn settings(dim: usize) -> StorageSettings {
        StorageSettings {
            vector_dim: dim,
            snapshot_interval: None,
            ..Default::default()
        }
    }

    fn review(product: ProductId, rating: u8, verified: bool) -> NewReview {
        NewReview {
            review_id: None,
            product_id: product,
            customer_id: None,
            rating,
            title: "title".to_string(),
            text: "text".to_string(),
            verified_purchase: verified,
        }
    }

    #[test]
    fn test_default_indexes_exist() {
        let dir = tempdir().unwrap();
        let manager = StorageManager::new(dir.path(), settings(4)).unwrap();
        assert_eq!(manager.list_indexes(), vec!["products".to_string(), "reviews".to_string()]);
        assert_eq!(manager.products_index().unwrap().vector_dim(), 4);
        assert!(manager
            .create_index(IndexConfig::new("products", 4, Distance::Cosine))
            .is_err());
    }

    #[test]
    fn test_index_product_projection() {
        let dir = tempdir().unwrap();
        let manager = StorageManager::new(dir.path(), settings(2)).unwrap();
        let p = product(manager.store(), "SKU-1", "Audio", 10.0, 3);

        manager.index_product(p, Vector::new(vec![1.0, 0.0])).unwrap();
        let filter = FilterCondition::available_products();
        let index = manager.products_index().unwrap();
        let query = Vector::new(vec![1.0, 0.0]);
        assert_eq!(index.query(&query, 5, Some(&filter)).unwrap().len(), 1);

        manager.set_product_stock(p, 0).unwrap();
        assert!(index.query(&query, 5, Some(&filter)).unwrap().is_empty());

        let err = manager.index_product(p, Vector::new(vec![1.0, 0.0, 0.0])).unwrap_err();
        assert!(matches!(err, Error::Dimension { .. }));
        assert!(manager.index_product(ProductId(99), Vector::new(vec![1.0, 0.0])).is_err());
    }

    #[test]
    fn test_reviews_are_append_only_and_summarised() {
        let dir = tempdir().unwrap();
        let manager = StorageManager::new(dir.path(), settings(2)).unwrap();
        let p = product(manager.store(), "SKU-1", "Audio", 10.0, 3);
        let q = product(manager.store(), "SKU-2", "Audio", 10.0, 3);

        let first = manager
            .publish_review(NewReview { review_id: Some("r-1".to_string()), ..review(p, 5, true) }, Vector::new(vec![1.0, 0.0]))
            .unwrap();
        assert_eq!(first.review_id, "r-1");
        let dup = manager
            .publish_review(NewReview { review_id: Some("r-1".to_string()), ..review(p, 1, false) }, Vector::new(vec![0.0, 1.0]))
            .unwrap_err();
        assert!(matches!(dup, Error::Constraint { .. }));

        manager.publish_review(review(p, 3, false), Vector::new(vec![0.5, 0.5])).unwrap();
        manager.publish_review(review(q, 4, true), Vector::new(vec![0.5, 0.5])).unwrap();

        let summary = manager.review_summary(p).unwrap();
        assert_eq!(summary.review_count, 2);
        assert_eq!(summary.average_rating, Some(4.0));
        assert_eq!(summary.star_counts, [0, 0, 1, 0, 1]);
        assert_eq!(summary.verified_count, 1);

        let top = manager.top_rated_products(Some("audio"), 1, 10).unwrap();
        assert_eq!(top.len(), 2);
        // Equal averages; the more reviewed product wins.
        assert_eq!(top[0].product_id, p);
        assert_eq!(top[0].review_count, 2);
        assert_eq!(top[1].product_id, q);
        assert_eq!(manager.top_rated_products(None, 2, 10).unwrap().len(), 1);

        assert!(matches!(
            manager.publish_review(review(p, 6, true), Vector::new(vec![1.0, 0.0])),
            Err(Error::Validation { .. })
        ));
        assert!(matches!(
            manager.publish_review(review(ProductId(77), 4, true), Vector::new(vec![1.0, 0.0])),
            Err(Error::Constraint { .. })
        ));
    }

    #[test]
    fn test_create_product_checks_vector_first() {
        let dir = tempdir().unwrap();
        let manager = StorageManager::new(dir.path(), settings(2)).unwrap();
        let attrs = |sku: &str| NewProduct {
            sku: sku.to_string(),
            name: "Headphones".to_string(),
            description: String::new(),
            category: "Audio".to_string(),
            subcategory: None,
            unit_price: 10.0,
            stock_quantity: 3,
        };

        let err = manager
            .create_product(attrs("SKU-1"), Some(Vector::new(vec![1.0, 0.0, 0.0])))
            .unwrap_err();
        assert!(matches!(err, Error::Dimension { expected: 2, actual: 3, .. }));
        assert!(manager.store().products().is_empty());

        let created = manager
            .create_product(attrs("SKU-1"), Some(Vector::new(vec![1.0, 0.0])))
            .unwrap();
        assert_eq!(created.sku, "SKU-1");
        assert!(manager.products_index().unwrap().get(&created.doc_id()).is_some());

        let plain = manager.create_product(attrs("SKU-2"), None).unwrap();
        assert!(manager.products_index().unwrap().get(&plain.doc_id()).is_none());
        assert_eq!(manager.products_index().unwrap().count(), 1);
    }

    #[test]
    fn test_review_search_and_analysis() {
        let dir = tempdir().unwrap();
        let manager = StorageManager::new(dir.path(), settings(2)).unwrap();
        let p = product(manager.store(), "SKU-1", "Audio", 10.0, 3);
        let q = product(manager.store(), "SKU-2", "Audio", 10.0, 3);
        manager
            .publish_review(NewReview { review_id: Some("near".to_string()), ..review(p, 5, true) }, Vector::new(vec![1.0, 0.0]))
            .unwrap();
        manager
            .publish_review(NewReview { review_id: Some("far".to_string()), ..review(p, 2, true) }, Vector::new(vec![0.0, 1.0]))
            .unwrap();
        manager
            .publish_review(NewReview { review_id: Some("other".to_string()), ..review(q, 4, true) }, Vector::new(vec![1.0, 0.1]))
            .unwrap();

        let query = Vector::new(vec![1.0, 0.0]);
        let all = manager.search_reviews(&query, None, 10).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].review.review_id, "near");
        assert!((all[0].similarity - 1.0).abs() < 1e-6);

        let scoped = manager.search_reviews(&query, Some(p), 10).unwrap();
        assert_eq!(
            scoped.iter().map(|m| m.review.review_id.as_str()).collect::<Vec<_>>(),
            vec!["near", "far"]
        );
        assert!(matches!(
            manager.search_reviews(&Vector::new(vec![1.0]), None, 10),
            Err(Error::Dimension { .. })
        ));

        let trend = manager.sentiment_trend(p, Granularity::Month).unwrap();
        assert_eq!((trend.positive, trend.negative), (1, 1));
        assert_eq!(manager.compare_sentiment(p, q).unwrap().better_rated, Some(q));
        assert_eq!(manager.review_themes(p, 5).unwrap().positive_reviews, 1);
        assert!(matches!(
            manager.sentiment_trend(ProductId(99), Granularity::Day),
            Err(Error::NotFound { .. })
        ));
        assert!(manager.compare_sentiment(p, ProductId(99)).is_err());
    }

    #[test]
    fn test_snapshot_round_trip() {
        let dir = tempdir().unwrap();
        let (c, p) = {
            let manager = StorageManager::new(dir.path(), settings(2)).unwrap();
            let c = customer(manager.store(), "Ada");
            let p = product(manager.store(), "SKU-1", "Audio", 25.0, 10);
            manager.store().create_order(c, &[NewOrderItem::new(p, 2)]).unwrap();
            manager.index_product(p, Vector::new(vec![0.0, 1.0])).unwrap();
            manager.publish_review(review(p, 5, true), Vector::new(vec![0.0, 1.0])).unwrap();
            assert!(manager.save().unwrap());
            (c, p)
        };

        let reopened = StorageManager::new(dir.path(), settings(2)).unwrap();
        assert!(reopened.last_save_time() > 0);
        assert_eq!(reopened.store().get_customer(c).unwrap().total_lifetime_value, 50.0);
        assert_eq!(reopened.store().get_product(p).unwrap().stock_quantity, 8);
        assert_eq!(reopened.products_index().unwrap().count(), 1);
        assert_eq!(reopened.review_summary(p).unwrap().review_count, 1);

        // Ids keep counting from where the snapshot left off.
        let next = customer(reopened.store(), "Bob");
        assert_ne!(next, c);

        assert!(matches!(
            StorageManager::new(dir.path(), settings(3)),
            Err(Error::Dimension { .. })
        ));
    }
}
