//! # storefront
//!
//! Customer analytics and product recommendations over an in-process
//! relational store and vector index.
//!
//! ## Quick Start
//!
//! ### As a Server
//!
//! ```bash
//! storefront --http-port 8080 --data-dir ./data
//! ```
//!
//! ### As a Library
//!
//! ```rust,no_run
//! use storefront::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn run() -> storefront::Result<()> {
//! let storage = Arc::new(StorageManager::new("./data", StorageSettings::default())?);
//! let store = storage.store();
//!
//! let customer = store.create_customer(NewCustomer::new("Ada", "Lovelace", "ada@example.com"))?;
//! let laptop = store.create_product(NewProduct {
//!     sku: "LAP-1".into(),
//!     name: "Laptop".into(),
//!     category: "Computers".into(),
//!     unit_price: 1_200.0,
//!     stock_quantity: 5,
//!     ..Default::default()
//! })?;
//! store.create_order(customer, &[NewOrderItem::new(laptop, 1)])?;
//!
//! let state = AppState::new(
//!     storage.clone(),
//!     Arc::new(HashingEmbedder::new(storage.settings().vector_dim)),
//!     RecommendationSettings::default(),
//! )?;
//! let result = state
//!     .recommender
//!     .recommend(RecommendationQuery::Text("laptop".into()), Some(customer), 3)
//!     .await?;
//! println!("{} items, partial: {}", result.items.len(), result.is_partial());
//! # Ok(())
//! # }
//! ```
//!
//! ## Crate Structure
//!
//! - `storefront-core` - Data model, error taxonomy, vectors and the vector index
//! - `storefront-store` - Schema store, analytics aggregator and snapshots
//! - `storefront-recommend` - Embedding providers and the recommendation service
//! - `storefront-api` - REST routes and the capability registry

pub mod config;
pub mod jobs;

// Re-export core types
pub use storefront_core::{
    Customer, CustomerId, Distance, Document, Error, ErrorKind, FilterCondition, IndexConfig,
    NewCustomer, NewInteraction, NewOrderItem, NewProduct, NewReview, Order, OrderId,
    OrderStatus, Product, ProductId, QueryHit, Result, Segment, Vector, VectorIndex,
};

// Re-export storage
pub use storefront_store::{AnalyticsAggregator, SchemaStore, StorageManager, StorageSettings};

// Re-export recommendations
pub use storefront_recommend::{
    AzureOpenAiEmbedder, EmbeddingProvider, HashingEmbedder, RecommendationQuery,
    RecommendationService, RecommendationSettings, Recommendations,
};

// Re-export API
pub use storefront_api::{AppState, CapabilityRegistry, RestApi};

pub use config::AppConfig;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        AnalyticsAggregator, AppState, CustomerId, Distance, EmbeddingProvider, Error,
        FilterCondition, HashingEmbedder, IndexConfig, NewCustomer, NewOrderItem, NewProduct,
        OrderStatus, ProductId, RecommendationQuery, RecommendationService,
        RecommendationSettings, Result, SchemaStore, StorageManager, StorageSettings, Vector,
        VectorIndex,
    };
}
