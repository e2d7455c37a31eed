//! Relational data model
//!
//! Customers, products, orders, order items, interactions, segment history
//! and review documents, plus the pure rules that belong to them: the order
//! status state machine, segment thresholds and line-total arithmetic.

use crate::{Error, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

macro_rules! id_type {
    ($name:ident, $prefix:literal) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, ":{}"), self.0)
            }
        }

        impl From<u64> for $name {
            fn from(id: u64) -> Self {
                $name(id)
            }
        }
    };
}

id_type!(CustomerId, "customer");
id_type!(ProductId, "product");
id_type!(OrderId, "order");
id_type!(OrderItemId, "order_item");
id_type!(InteractionId, "interaction");

/// Lifetime value thresholds, highest first.
pub const SEGMENT_THRESHOLDS: [(f64, Segment); 3] = [
    (10_000.0, Segment::Premium),
    (5_000.0, Segment::Gold),
    (1_000.0, Segment::Silver),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Segment {
    Bronze,
    Silver,
    Gold,
    Premium,
}

impl Segment {
    pub const ALL: [Segment; 4] = [
        Segment::Bronze,
        Segment::Silver,
        Segment::Gold,
        Segment::Premium,
    ];

    pub fn from_lifetime_value(value: f64) -> Segment {
        SEGMENT_THRESHOLDS
            .iter()
            .find(|(threshold, _)| value >= *threshold)
            .map(|(_, segment)| *segment)
            .unwrap_or(Segment::Bronze)
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }

    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed)
                | (Pending, Cancelled)
                | (Confirmed, Shipped)
                | (Confirmed, Cancelled)
                | (Shipped, Delivered)
        )
    }

    /// Checked transition; the order id is only used for the error.
    pub fn transition(self, next: OrderStatus, order: OrderId) -> Result<OrderStatus> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(Error::InvalidTransition {
                id: order.to_string(),
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Round a monetary amount to cents.
#[inline]
pub fn round_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

/// quantity × unit_price × (1 − discount/100), rounded to cents.
pub fn line_total(quantity: u32, unit_price: f64, discount: f64) -> f64 {
    round_cents(quantity as f64 * unit_price * (1.0 - discount / 100.0))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Customer {
    pub id: CustomerId,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub registration_date: DateTime<Utc>,
    pub total_lifetime_value: f64,
    pub last_purchase_date: Option<DateTime<Utc>>,
    pub churn_risk_score: f64,
    pub segment: Segment,
    pub is_active: bool,
}

impl Customer {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewCustomer {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub date_of_birth: Option<NaiveDate>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub registration_date: Option<DateTime<Utc>>,
}

impl NewCustomer {
    pub fn new(first_name: &str, last_name: &str, email: &str) -> Self {
        Self {
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            email: email.to_string(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.first_name.trim().is_empty() || self.last_name.trim().is_empty() {
            return Err(Error::validation(&self.email, "first and last name are required"));
        }
        if !self.email.contains('@') {
            return Err(Error::validation(&self.email, "email address is malformed"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Product {
    pub id: ProductId,
    pub sku: String,
    pub name: String,
    pub description: String,
    pub category: String,
    pub subcategory: Option<String>,
    pub unit_price: f64,
    pub stock_quantity: u32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Product {
    pub fn is_available(&self) -> bool {
        self.is_active && self.stock_quantity > 0
    }

    /// Metadata carried by this product's entry in a vector index.
    ///
    /// The index entry is a projection; price and stock here may lag the store.
    pub fn index_metadata(&self) -> Value {
        json!({
            "product_id": self.id.0,
            "sku": self.sku,
            "name": self.name,
            "category": self.category,
            "price": self.unit_price,
            "stock": self.stock_quantity,
            "is_active": self.is_active,
        })
    }

    /// Document id of this product in the products index.
    pub fn doc_id(&self) -> String {
        product_doc_id(self.id)
    }
}

pub fn product_doc_id(id: ProductId) -> String {
    format!("product-{}", id.0)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewProduct {
    pub sku: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub category: String,
    #[serde(default)]
    pub subcategory: Option<String>,
    pub unit_price: f64,
    #[serde(default)]
    pub stock_quantity: u32,
}

impl NewProduct {
    pub fn validate(&self) -> Result<()> {
        if self.sku.trim().is_empty() {
            return Err(Error::validation(&self.name, "sku is required"));
        }
        if self.category.trim().is_empty() {
            return Err(Error::validation(&self.sku, "category is required"));
        }
        if !self.unit_price.is_finite() || self.unit_price < 0.0 {
            return Err(Error::validation(&self.sku, "unit price must be a non-negative amount"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderItem {
    pub id: OrderItemId,
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub unit_price: f64,
    pub discount: f64,
    pub line_total: f64,
}

/// A requested order line. The unit price defaults to the product's current price.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrderItem {
    pub product_id: ProductId,
    pub quantity: u32,
    #[serde(default)]
    pub discount: f64,
    #[serde(default)]
    pub unit_price: Option<f64>,
}

impl NewOrderItem {
    pub fn new(product_id: ProductId, quantity: u32) -> Self {
        Self {
            product_id,
            quantity,
            discount: 0.0,
            unit_price: None,
        }
    }

    pub fn with_discount(mut self, discount: f64) -> Self {
        self.discount = discount;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.quantity == 0 {
            return Err(Error::validation(self.product_id, "quantity must be at least 1"));
        }
        if !(0.0..=100.0).contains(&self.discount) {
            return Err(Error::validation(self.product_id, "discount must be within [0, 100]"));
        }
        if let Some(price) = self.unit_price {
            if !price.is_finite() || price < 0.0 {
                return Err(Error::validation(self.product_id, "unit price must be a non-negative amount"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    pub id: OrderId,
    pub customer_id: CustomerId,
    pub order_date: DateTime<Utc>,
    pub status: OrderStatus,
    pub total_amount: f64,
    pub items: Vec<OrderItem>,
}

impl Order {
    pub fn items_total(&self) -> f64 {
        round_cents(self.items.iter().map(|item| item.line_total).sum())
    }

    pub fn counts_toward_value(&self) -> bool {
        self.status != OrderStatus::Cancelled
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InteractionChannel {
    Email,
    Phone,
    Chat,
    Web,
    Store,
    Social,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Interaction {
    pub id: InteractionId,
    pub customer_id: CustomerId,
    pub channel: InteractionChannel,
    pub interaction_type: String,
    pub sentiment_score: f64,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewInteraction {
    pub channel: InteractionChannel,
    pub interaction_type: String,
    pub sentiment_score: f64,
    #[serde(default)]
    pub notes: Option<String>,
}

impl NewInteraction {
    pub fn validate(&self, customer: CustomerId) -> Result<()> {
        if !self.sentiment_score.is_finite() || !(-1.0..=1.0).contains(&self.sentiment_score) {
            return Err(Error::validation(customer, "sentiment score must be within [-1, 1]"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SegmentHistoryEntry {
    pub customer_id: CustomerId,
    pub previous: Segment,
    pub current: Segment,
    pub lifetime_value: f64,
    pub changed_at: DateTime<Utc>,
}

/// A published product review; stored in the reviews index with its embedding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReviewDocument {
    pub review_id: String,
    pub product_id: ProductId,
    pub customer_id: Option<CustomerId>,
    pub rating: u8,
    pub title: String,
    pub text: String,
    pub verified_purchase: bool,
    pub created_at: DateTime<Utc>,
}

impl ReviewDocument {
    pub fn metadata(&self) -> Value {
        json!({
            "review_id": self.review_id,
            "product_id": self.product_id.0,
            "customer_id": self.customer_id.map(|c| c.0),
            "rating": self.rating,
            "title": self.title,
            "text": self.text,
            "verified_purchase": self.verified_purchase,
            "created_at": self.created_at.to_rfc3339(),
        })
    }

    pub fn from_metadata(metadata: &Value) -> Option<Self> {
        Some(Self {
            review_id: metadata.get("review_id")?.as_str()?.to_string(),
            product_id: ProductId(metadata.get("product_id")?.as_u64()?),
            customer_id: metadata
                .get("customer_id")
                .and_then(Value::as_u64)
                .map(CustomerId),
            rating: u8::try_from(metadata.get("rating")?.as_u64()?).ok()?,
            title: metadata.get("title")?.as_str()?.to_string(),
            text: metadata.get("text")?.as_str()?.to_string(),
            verified_purchase: metadata
                .get("verified_purchase")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            created_at: metadata
                .get("created_at")
                .and_then(Value::as_str)
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc))?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewReview {
    #[serde(default)]
    pub review_id: Option<String>,
    pub product_id: ProductId,
    #[serde(default)]
    pub customer_id: Option<CustomerId>,
    pub rating: u8,
    #[serde(default)]
    pub title: String,
    pub text: String,
    #[serde(default)]
    pub verified_purchase: bool,
}

impl NewReview {
    pub fn validate(&self) -> Result<()> {
        if !(1..=5).contains(&self.rating) {
            return Err(Error::validation(self.product_id, "rating must be between 1 and 5"));
        }
        if self.text.trim().is_empty() {
            return Err(Error::validation(self.product_id, "review text is required"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_thresholds() {
        assert_eq!(Segment::from_lifetime_value(12_000.0), Segment::Premium);
        assert_eq!(Segment::from_lifetime_value(10_000.0), Segment::Premium);
        assert_eq!(Segment::from_lifetime_value(7_000.0), Segment::Gold);
        assert_eq!(Segment::from_lifetime_value(1_500.0), Segment::Silver);
        assert_eq!(Segment::from_lifetime_value(999.99), Segment::Bronze);
        assert_eq!(Segment::from_lifetime_value(500.0), Segment::Bronze);
        assert_eq!(Segment::from_lifetime_value(0.0), Segment::Bronze);
    }

    #[test]
    fn test_line_total_with_discount() {
        assert_eq!(line_total(3, 10.0, 10.0), 27.0);
        assert_eq!(line_total(1, 19.99, 0.0), 19.99);
        assert_eq!(line_total(2, 5.0, 100.0), 0.0);
    }

    #[test]
    fn test_status_state_machine() {
        use OrderStatus::*;
        assert!(Pending.can_transition_to(Confirmed));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Confirmed.can_transition_to(Shipped));
        assert!(Confirmed.can_transition_to(Cancelled));
        assert!(Shipped.can_transition_to(Delivered));

        assert!(!Shipped.can_transition_to(Cancelled));
        assert!(!Delivered.can_transition_to(Shipped));
        assert!(!Cancelled.can_transition_to(Pending));
        assert!(!Pending.can_transition_to(Delivered));
        assert!(!Pending.can_transition_to(Pending));
    }

    #[test]
    fn test_invalid_transition_error_names_order() {
        let err = OrderStatus::Delivered
            .transition(OrderStatus::Shipped, OrderId(7))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
        assert_eq!(err.identifier(), Some("order:7"));
    }

    #[test]
    fn test_order_item_validation() {
        assert!(NewOrderItem::new(ProductId(1), 0).validate().is_err());
        assert!(NewOrderItem::new(ProductId(1), 1).with_discount(101.0).validate().is_err());
        assert!(NewOrderItem::new(ProductId(1), 1).with_discount(-1.0).validate().is_err());
        assert!(NewOrderItem::new(ProductId(1), 2).with_discount(100.0).validate().is_ok());
    }

    #[test]
    fn test_review_metadata_round_trip() {
        let review = ReviewDocument {
            review_id: "r-1".to_string(),
            product_id: ProductId(3),
            customer_id: Some(CustomerId(9)),
            rating: 4,
            title: "Solid".to_string(),
            text: "Works as described".to_string(),
            verified_purchase: true,
            created_at: DateTime::parse_from_rfc3339("2024-05-01T10:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
        };
        let parsed = ReviewDocument::from_metadata(&review.metadata()).unwrap();
        assert_eq!(parsed, review);
    }

    #[test]
    fn test_id_display() {
        assert_eq!(CustomerId(5).to_string(), "customer:5");
        assert_eq!(product_doc_id(ProductId(12)), "product-12");
    }
}
