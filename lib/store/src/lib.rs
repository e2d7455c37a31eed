//! # storefront Store
//!
//! Relational schema store, derived-metric aggregation and whole-state
//! snapshot persistence. [`StorageManager`] ties the store together with the
//! `products` and `reviews` vector indexes.

pub mod analytics;
pub mod manager;
pub mod persistence;
pub mod reviews;
pub mod store;

pub use analytics::{
    churn_score, lifetime_value, AnalyticsAggregator, ChurnLevel, CustomerBehavior, Engagement,
    Granularity, PeriodSales, PurchaseFrequency, SegmentStats, SegmentationReport,
};
pub use manager::{StorageManager, StorageSettings, PRODUCTS_INDEX, REVIEWS_INDEX};
pub use persistence::{SnapshotError, SnapshotPersistence};
pub use reviews::{
    ReviewMatch, ReviewSummary, ReviewThemes, Sentiment, SentimentComparison, SentimentPeriod,
    SentimentTrend, ThemeTerm, TopRatedProduct,
};
pub use store::{
    Customer360, OrderDetails, OrderLine, OrderSummary, ProductPerformance, SchemaStore, Tables,
};
