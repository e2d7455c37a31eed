//! # storefront Recommend
//!
//! Hybrid product recommendations: vector candidates from a
//! [`CandidateIndex`], checked against the schema store and re-ranked with
//! business signals.
//!
//! ## Features
//!
//! - **Embedding providers**: a deterministic local hashing embedder and an
//!   Azure OpenAI REST client behind one async trait
//! - **Re-ranking**: closeness, category affinity and inventory, with a
//!   per-signal breakdown
//! - **Graceful degradation**: popularity ranking, flagged as partial, when
//!   the embedder or the index times out or is unreachable
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use storefront_core::{Distance, IndexConfig, NewProduct, VectorIndex};
//! use storefront_recommend::{
//!     HashingEmbedder, RecommendationQuery, RecommendationService, RecommendationSettings,
//! };
//! use storefront_store::SchemaStore;
//!
//! # tokio_test_block(async {
//! let store = Arc::new(SchemaStore::new());
//! let embedder = Arc::new(HashingEmbedder::new(64));
//! let index = Arc::new(VectorIndex::new(IndexConfig::new("products", 64, Distance::Cosine)));
//!
//! let id = store
//!     .create_product(NewProduct {
//!         sku: "AUD-1".into(),
//!         name: "Headphones".into(),
//!         description: "wireless headphones".into(),
//!         category: "Audio".into(),
//!         unit_price: 99.0,
//!         stock_quantity: 5,
//!         ..Default::default()
//!     })
//!     .unwrap();
//! let product = store.get_product(id).unwrap();
//! index
//!     .upsert(product.doc_id(), embedder.embed_sync(&product.description), Some(product.index_metadata()))
//!     .unwrap();
//!
//! let service = RecommendationService::new(store, index, embedder, RecommendationSettings::default());
//! let result = service
//!     .recommend(RecommendationQuery::Text("headphones".into()), None, 3)
//!     .await
//!     .unwrap();
//! assert_eq!(result.items[0].product_id, id);
//! # });
//! # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
//! # }
//! ```

pub mod embedder;
pub mod rerank;
pub mod service;
pub mod source;

pub use embedder::{
    AzureOpenAiEmbedder, AzureOpenAiSettings, EmbeddingError, EmbeddingProvider, HashingEmbedder,
};
pub use rerank::{CategoryAffinity, RankedProduct, RerankWeights, Reranker, ScoreBreakdown};
pub use service::{
    DegradedReason, ProductRef, RecommendationQuery, RecommendationService,
    RecommendationSettings, Recommendations, DEFAULT_MIN_SIMILARITY,
};
pub use source::CandidateIndex;
