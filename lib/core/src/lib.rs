//! # storefront Core
//!
//! Core library for the storefront customer-analytics and recommendation layer.
//!
//! This crate provides the types every other crate shares:
//!
//! - [`model`] - Customers, products, orders and the rules attached to them
//! - [`Vector`] - Dense embedding vector
//! - [`Document`] - A vector with ID and optional metadata
//! - [`VectorIndex`] - Exact nearest-neighbour index with metadata filtering
//! - [`Error`] - The error taxonomy surfaced to callers
//!
//! ## Example
//!
//! ```rust
//! use storefront_core::{Distance, FilterCondition, IndexConfig, Vector, VectorIndex};
//! use serde_json::json;
//!
//! let index = VectorIndex::new(IndexConfig::new("products", 3, Distance::Cosine));
//!
//! index
//!     .upsert("product-1", Vector::new(vec![1.0, 0.0, 0.0]), Some(json!({"is_active": true, "stock": 4})))
//!     .unwrap();
//!
//! let filter = FilterCondition::available_products();
//! let hits = index
//!     .query(&Vector::new(vec![1.0, 0.0, 0.0]), 10, Some(&filter))
//!     .unwrap();
//! assert_eq!(hits.len(), 1);
//! ```

pub mod bounded;
pub mod document;
pub mod error;
pub mod filter;
pub mod index;
pub mod model;
pub mod vector;

pub use bounded::bounded;
pub use document::{DocId, Document, QueryHit};
pub use error::{Error, ErrorKind, Result};
pub use filter::{Filter, FilterCondition, PayloadFilter};
pub use index::{Distance, IndexConfig, VectorIndex, DEFAULT_OVERFETCH_FACTOR, DEFAULT_VECTOR_DIM};
pub use model::{
    Customer, CustomerId, Interaction, InteractionChannel, InteractionId, NewCustomer,
    NewInteraction, NewOrderItem, NewProduct, NewReview, Order, OrderId, OrderItem, OrderItemId,
    OrderStatus, Product, ProductId, ReviewDocument, Segment, SegmentHistoryEntry, product_doc_id,
};
pub use vector::Vector;
