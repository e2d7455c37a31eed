//! Named capabilities
//!
//! A closed table of operations an orchestrating agent may invoke by name.
//! Each entry deserialises its JSON arguments into its own struct before
//! touching the store, so a bad call fails with a validation error naming
//! the capability.

use crate::state::AppState;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use storefront_core::{CustomerId, Error, OrderId, OrderStatus, ProductId, Result};
use storefront_recommend::RecommendationQuery;
use storefront_store::Granularity;
use tracing::debug;

#[async_trait]
pub trait Capability: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    async fn invoke(&self, state: &AppState, args: Value) -> Result<Value>;
}

/// A capability with typed arguments; [`Capability`] is derived from it.
#[async_trait]
pub trait TypedCapability: Send + Sync + 'static {
    type Args: DeserializeOwned + Send;

    const NAME: &'static str;
    const DESCRIPTION: &'static str;

    async fn call(&self, state: &AppState, args: Self::Args) -> Result<Value>;
}

#[async_trait]
impl<T: TypedCapability> Capability for T {
    fn name(&self) -> &'static str {
        T::NAME
    }

    fn description(&self) -> &'static str {
        T::DESCRIPTION
    }

    async fn invoke(&self, state: &AppState, args: Value) -> Result<Value> {
        // A missing body means "no arguments".
        let args = if args.is_null() { Value::Object(Default::default()) } else { args };
        let args: T::Args =
            serde_json::from_value(args).map_err(|e| Error::validation(T::NAME, e.to_string()))?;
        self.call(state, args).await
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CapabilityInfo {
    pub name: &'static str,
    pub description: &'static str,
}

pub struct CapabilityRegistry {
    entries: BTreeMap<&'static str, Box<dyn Capability>>,
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(GetCustomerProfile);
        registry.register(GetTopCustomers);
        registry.register(IdentifyChurnRisks);
        registry.register(GetCustomerOrders);
        registry.register(GetSegmentDistribution);
        registry.register(SearchProductsSemantic);
        registry.register(FindSimilarProducts);
        registry.register(GetProductRecommendations);
        registry.register(GetTopRatedProducts);
        registry.register(GetProductCategories);
        registry.register(GetReviewSummary);
        registry.register(GetProductById);
        registry.register(SearchProductsByText);
        registry.register(SearchReviewsSemantic);
        registry.register(AnalyzeSentimentTrend);
        registry.register(CompareProductsSentiment);
        registry.register(FindCommonThemes);
        registry.register(AnalyzeCustomerBehavior);
        registry.register(UpdateOrderStatus);
        registry
    }
}

impl CapabilityRegistry {
    pub fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Add a capability, replacing any entry with the same name.
    pub fn register<C: Capability + 'static>(&mut self, capability: C) {
        self.entries.insert(capability.name(), Box::new(capability));
    }

    pub fn list(&self) -> Vec<CapabilityInfo> {
        self.entries
            .values()
            .map(|c| CapabilityInfo {
                name: c.name(),
                description: c.description(),
            })
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub async fn invoke(&self, state: &AppState, name: &str, args: Value) -> Result<Value> {
        let capability = self
            .entries
            .get(name)
            .ok_or_else(|| Error::not_found("capability", name))?;
        debug!(capability = name, "invoking capability");
        capability.invoke(state, args).await
    }

    /// Invoke with a raw request body. An empty body means no arguments;
    /// anything else must be valid JSON.
    pub async fn invoke_raw(&self, state: &AppState, name: &str, body: &[u8]) -> Result<Value> {
        if !self.contains(name) {
            return Err(Error::not_found("capability", name));
        }
        let args = if body.iter().all(u8::is_ascii_whitespace) {
            Value::Null
        } else {
            serde_json::from_slice(body).map_err(|e| Error::validation(name, e.to_string()))?
        };
        self.invoke(state, name, args).await
    }
}

fn to_value<T: Serialize>(value: T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| Error::Serialization(e.to_string()))
}

fn default_limit() -> usize {
    10
}

fn default_similar_limit() -> usize {
    5
}

fn default_churn_threshold() -> f64 {
    70.0
}

fn default_min_reviews() -> usize {
    1
}

fn default_text_search_limit() -> usize {
    50
}

fn default_granularity() -> Granularity {
    Granularity::Month
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CustomerArgs {
    pub customer_id: CustomerId,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LimitArgs {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct NoArgs {}

pub struct GetCustomerProfile;

#[async_trait]
impl TypedCapability for GetCustomerProfile {
    type Args = CustomerArgs;
    const NAME: &'static str = "get_customer_profile";
    const DESCRIPTION: &'static str = "Customer details with order, value and sentiment summary";

    async fn call(&self, state: &AppState, args: CustomerArgs) -> Result<Value> {
        to_value(state.storage.store().customer_360(args.customer_id)?)
    }
}

pub struct GetTopCustomers;

#[async_trait]
impl TypedCapability for GetTopCustomers {
    type Args = LimitArgs;
    const NAME: &'static str = "get_top_customers";
    const DESCRIPTION: &'static str = "Active customers with the highest lifetime value";

    async fn call(&self, state: &AppState, args: LimitArgs) -> Result<Value> {
        to_value(state.storage.store().top_customers(args.limit))
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChurnArgs {
    #[serde(default = "default_churn_threshold")]
    pub threshold: f64,
}

pub struct IdentifyChurnRisks;

#[async_trait]
impl TypedCapability for IdentifyChurnRisks {
    type Args = ChurnArgs;
    const NAME: &'static str = "identify_churn_risks";
    const DESCRIPTION: &'static str = "Active customers whose churn score is at or above a threshold";

    async fn call(&self, state: &AppState, args: ChurnArgs) -> Result<Value> {
        if !(0.0..=100.0).contains(&args.threshold) {
            return Err(Error::validation(Self::NAME, "threshold must be within [0, 100]"));
        }
        to_value(state.storage.analytics().churn_risk_customers(args.threshold))
    }
}

pub struct GetCustomerOrders;

#[async_trait]
impl TypedCapability for GetCustomerOrders {
    type Args = CustomerArgs;
    const NAME: &'static str = "get_customer_orders";
    const DESCRIPTION: &'static str = "A customer's orders, newest first";

    async fn call(&self, state: &AppState, args: CustomerArgs) -> Result<Value> {
        to_value(state.storage.store().customer_orders(args.customer_id)?)
    }
}

pub struct GetSegmentDistribution;

#[async_trait]
impl TypedCapability for GetSegmentDistribution {
    type Args = NoArgs;
    const NAME: &'static str = "get_segment_distribution";
    const DESCRIPTION: &'static str = "Customer count and lifetime value per segment";

    async fn call(&self, state: &AppState, _args: NoArgs) -> Result<Value> {
        to_value(state.storage.analytics().segment_distribution())
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SearchArgs {
    pub query: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub min_similarity: Option<f32>,
}

pub struct SearchProductsSemantic;

#[async_trait]
impl TypedCapability for SearchProductsSemantic {
    type Args = SearchArgs;
    const NAME: &'static str = "search_products_semantic";
    const DESCRIPTION: &'static str = "Products whose descriptions are semantically close to a query";

    async fn call(&self, state: &AppState, args: SearchArgs) -> Result<Value> {
        to_value(
            state
                .recommender
                .search(&args.query, args.limit, args.min_similarity)
                .await?,
        )
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimilarArgs {
    pub product_id: ProductId,
    #[serde(default = "default_similar_limit")]
    pub limit: usize,
}

pub struct FindSimilarProducts;

#[async_trait]
impl TypedCapability for FindSimilarProducts {
    type Args = SimilarArgs;
    const NAME: &'static str = "find_similar_products";
    const DESCRIPTION: &'static str = "Available products similar to a given product";

    async fn call(&self, state: &AppState, args: SimilarArgs) -> Result<Value> {
        to_value(
            state
                .recommender
                .similar_products(args.product_id, args.limit)
                .await?,
        )
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecommendArgs {
    #[serde(default)]
    pub customer_id: Option<CustomerId>,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default = "default_similar_limit")]
    pub limit: usize,
}

pub struct GetProductRecommendations;

#[async_trait]
impl TypedCapability for GetProductRecommendations {
    type Args = RecommendArgs;
    const NAME: &'static str = "get_product_recommendations";
    const DESCRIPTION: &'static str =
        "Recommendations for a query or, without one, from the customer's purchased categories";

    async fn call(&self, state: &AppState, args: RecommendArgs) -> Result<Value> {
        let query = match (args.query, args.customer_id) {
            (Some(query), _) => query,
            (None, Some(customer)) => {
                let categories = state.storage.store().category_quantities(customer)?;
                if categories.is_empty() {
                    return Err(Error::validation(customer, "no purchase history to recommend from"));
                }
                categories.into_keys().collect::<Vec<_>>().join(" ")
            }
            (None, None) => {
                return Err(Error::validation(Self::NAME, "either query or customer_id is required"))
            }
        };
        to_value(
            state
                .recommender
                .recommend(RecommendationQuery::Text(query), args.customer_id, args.limit)
                .await?,
        )
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TopRatedArgs {
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default = "default_min_reviews")]
    pub min_reviews: usize,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

pub struct GetTopRatedProducts;

#[async_trait]
impl TypedCapability for GetTopRatedProducts {
    type Args = TopRatedArgs;
    const NAME: &'static str = "get_top_rated_products";
    const DESCRIPTION: &'static str = "Products with the best average review rating";

    async fn call(&self, state: &AppState, args: TopRatedArgs) -> Result<Value> {
        to_value(state.storage.top_rated_products(
            args.category.as_deref(),
            args.min_reviews,
            args.limit,
        )?)
    }
}

pub struct GetProductCategories;

#[async_trait]
impl TypedCapability for GetProductCategories {
    type Args = NoArgs;
    const NAME: &'static str = "get_product_categories";
    const DESCRIPTION: &'static str = "Distinct categories of active products";

    async fn call(&self, state: &AppState, _args: NoArgs) -> Result<Value> {
        to_value(state.storage.store().categories())
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProductArgs {
    pub product_id: ProductId,
}

pub struct GetReviewSummary;

#[async_trait]
impl TypedCapability for GetReviewSummary {
    type Args = ProductArgs;
    const NAME: &'static str = "get_review_summary";
    const DESCRIPTION: &'static str = "Review count, average rating and star breakdown for a product";

    async fn call(&self, state: &AppState, args: ProductArgs) -> Result<Value> {
        to_value(state.storage.review_summary(args.product_id)?)
    }
}

pub struct GetProductById;

#[async_trait]
impl TypedCapability for GetProductById {
    type Args = ProductArgs;
    const NAME: &'static str = "get_product_by_id";
    const DESCRIPTION: &'static str = "Catalog details of one product";

    async fn call(&self, state: &AppState, args: ProductArgs) -> Result<Value> {
        to_value(state.storage.store().get_product(args.product_id)?)
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TextSearchArgs {
    pub term: String,
    #[serde(default = "default_text_search_limit")]
    pub limit: usize,
}

pub struct SearchProductsByText;

#[async_trait]
impl TypedCapability for SearchProductsByText {
    type Args = TextSearchArgs;
    const NAME: &'static str = "search_products_by_text";
    const DESCRIPTION: &'static str = "Active products whose name, description or SKU contains a term";

    async fn call(&self, state: &AppState, args: TextSearchArgs) -> Result<Value> {
        to_value(state.storage.store().search_products(&args.term, args.limit)?)
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReviewSearchArgs {
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub vector: Option<Vec<f32>>,
    #[serde(default)]
    pub product_id: Option<ProductId>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

pub struct SearchReviewsSemantic;

#[async_trait]
impl TypedCapability for SearchReviewsSemantic {
    type Args = ReviewSearchArgs;
    const NAME: &'static str = "search_reviews_semantic";
    const DESCRIPTION: &'static str =
        "Reviews closest to a query text or embedding, optionally for one product";

    async fn call(&self, state: &AppState, args: ReviewSearchArgs) -> Result<Value> {
        if args.query.is_none() && args.vector.is_none() {
            return Err(Error::validation(Self::NAME, "either query or vector is required"));
        }
        let query = state
            .vector_or_embed(args.vector, args.query.as_deref().unwrap_or_default())
            .await?;
        to_value(state.storage.search_reviews(&query, args.product_id, args.limit)?)
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrendArgs {
    pub product_id: ProductId,
    #[serde(default = "default_granularity")]
    pub granularity: Granularity,
}

pub struct AnalyzeSentimentTrend;

#[async_trait]
impl TypedCapability for AnalyzeSentimentTrend {
    type Args = TrendArgs;
    const NAME: &'static str = "analyze_sentiment_trend";
    const DESCRIPTION: &'static str =
        "Positive, neutral and negative review shares and average rating per period";

    async fn call(&self, state: &AppState, args: TrendArgs) -> Result<Value> {
        to_value(state.storage.sentiment_trend(args.product_id, args.granularity)?)
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompareArgs {
    pub first_product_id: ProductId,
    pub second_product_id: ProductId,
}

pub struct CompareProductsSentiment;

#[async_trait]
impl TypedCapability for CompareProductsSentiment {
    type Args = CompareArgs;
    const NAME: &'static str = "compare_products_sentiment";
    const DESCRIPTION: &'static str = "Review summaries of two products and which is better rated";

    async fn call(&self, state: &AppState, args: CompareArgs) -> Result<Value> {
        to_value(
            state
                .storage
                .compare_sentiment(args.first_product_id, args.second_product_id)?,
        )
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ThemeArgs {
    pub product_id: ProductId,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

pub struct FindCommonThemes;

#[async_trait]
impl TypedCapability for FindCommonThemes {
    type Args = ThemeArgs;
    const NAME: &'static str = "find_common_themes";
    const DESCRIPTION: &'static str = "Most mentioned words in a product's positive and negative reviews";

    async fn call(&self, state: &AppState, args: ThemeArgs) -> Result<Value> {
        to_value(state.storage.review_themes(args.product_id, args.limit)?)
    }
}

pub struct AnalyzeCustomerBehavior;

#[async_trait]
impl TypedCapability for AnalyzeCustomerBehavior {
    type Args = CustomerArgs;
    const NAME: &'static str = "analyze_customer_behavior";
    const DESCRIPTION: &'static str = "Purchase frequency, recency band and churn level of a customer";

    async fn call(&self, state: &AppState, args: CustomerArgs) -> Result<Value> {
        to_value(state.storage.analytics().customer_behavior(args.customer_id)?)
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OrderStatusArgs {
    pub order_id: OrderId,
    pub status: OrderStatus,
    pub expected_status: OrderStatus,
}

pub struct UpdateOrderStatus;

#[async_trait]
impl TypedCapability for UpdateOrderStatus {
    type Args = OrderStatusArgs;
    const NAME: &'static str = "update_order_status";
    const DESCRIPTION: &'static str =
        "Move an order to a new status if it is still in the expected one";

    async fn call(&self, state: &AppState, args: OrderStatusArgs) -> Result<Value> {
        let order = state.storage.store().update_order_status(
            args.order_id,
            args.expected_status,
            args.status,
        )?;
        if order.status == OrderStatus::Cancelled {
            for item in &order.items {
                state.storage.refresh_product_projection(item.product_id)?;
            }
        }
        to_value(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use storefront_core::{ErrorKind, NewCustomer, NewOrderItem, NewProduct, NewReview};
    use storefront_recommend::{HashingEmbedder, RecommendationSettings};
    use storefront_store::{StorageManager, StorageSettings};
    use tempfile::TempDir;

    fn state() -> (TempDir, AppState) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(
            StorageManager::new(
                dir.path(),
                StorageSettings {
                    vector_dim: 64,
                    snapshot_interval: None,
                    ..Default::default()
                },
            )
            .unwrap(),
        );
        let embedder = Arc::new(HashingEmbedder::new(64));
        let state = AppState::new(storage, embedder, RecommendationSettings::default()).unwrap();
        (dir, state)
    }

    #[test]
    fn test_registry_lists_all_capabilities() {
        let registry = CapabilityRegistry::default();
        let names: Vec<&str> = registry.list().iter().map(|c| c.name).collect();
        assert_eq!(names.len(), 19);
        for name in [
            "get_customer_profile",
            "get_top_customers",
            "identify_churn_risks",
            "get_customer_orders",
            "get_segment_distribution",
            "search_products_semantic",
            "find_similar_products",
            "get_product_recommendations",
            "get_top_rated_products",
            "get_product_categories",
            "get_review_summary",
            "get_product_by_id",
            "search_products_by_text",
            "search_reviews_semantic",
            "analyze_sentiment_trend",
            "compare_products_sentiment",
            "find_common_themes",
            "analyze_customer_behavior",
            "update_order_status",
        ] {
            assert!(registry.contains(name), "{name} missing");
        }
    }

    #[tokio::test]
    async fn test_unknown_capability_is_not_found() {
        let (_dir, state) = state();
        let err = CapabilityRegistry::default()
            .invoke(&state, "drop_tables", Value::Null)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_bad_arguments_are_validation_errors() {
        let (_dir, state) = state();
        let registry = CapabilityRegistry::default();

        let err = registry
            .invoke(&state, "get_customer_profile", serde_json::json!({"customer": 1}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.identifier(), Some("get_customer_profile"));

        let err = registry
            .invoke(&state, "identify_churn_risks", serde_json::json!({"threshold": 150.0}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_typed_capabilities_read_the_store() {
        let (_dir, state) = state();
        let store = state.storage.store();
        let customer = store
            .create_customer(NewCustomer::new("Ada", "Lovelace", "ada@example.com"))
            .unwrap();
        let product = store
            .create_product(NewProduct {
                sku: "AUD-1".into(),
                name: "Headphones".into(),
                description: "wireless headphones".into(),
                category: "Audio".into(),
                unit_price: 120.0,
                stock_quantity: 10,
                ..Default::default()
            })
            .unwrap();
        store
            .create_order(customer, &[NewOrderItem::new(product, 2)])
            .unwrap();

        let registry = CapabilityRegistry::default();
        let profile = registry
            .invoke(&state, "get_customer_profile", serde_json::json!({"customer_id": customer.0}))
            .await
            .unwrap();
        assert_eq!(profile["total_orders"], 1);
        assert_eq!(profile["customer"]["total_lifetime_value"], 240.0);

        let categories = registry
            .invoke(&state, "get_product_categories", Value::Null)
            .await
            .unwrap();
        assert_eq!(categories, serde_json::json!(["Audio"]));

        // Nothing indexed yet, so the recommendation is the popularity fallback.
        let recommendations = registry
            .invoke(
                &state,
                "get_product_recommendations",
                serde_json::json!({"customer_id": customer.0}),
            )
            .await
            .unwrap();
        assert_eq!(recommendations["items"][0]["product_id"], product.0);
        assert!(!recommendations["degraded"].is_null());
    }

    #[tokio::test]
    async fn test_raw_bodies() {
        let (_dir, state) = state();
        let registry = CapabilityRegistry::default();

        let categories = registry
            .invoke_raw(&state, "get_product_categories", b"")
            .await
            .unwrap();
        assert_eq!(categories, serde_json::json!([]));
        assert!(registry
            .invoke_raw(&state, "get_product_categories", b" \n")
            .await
            .is_ok());

        let err = registry
            .invoke_raw(&state, "get_top_customers", b"{\"limit\": 5")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.identifier(), Some("get_top_customers"));

        let err = registry
            .invoke_raw(&state, "drop_tables", b"{not json")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_status_update_requires_expected_status() {
        let (_dir, state) = state();
        let store = state.storage.store();
        let customer = store
            .create_customer(NewCustomer::new("Ada", "Lovelace", "ada@example.com"))
            .unwrap();
        let product = store
            .create_product(NewProduct {
                sku: "AUD-1".into(),
                name: "Headphones".into(),
                category: "Audio".into(),
                unit_price: 10.0,
                stock_quantity: 5,
                ..Default::default()
            })
            .unwrap();
        let order = store.create_order(customer, &[NewOrderItem::new(product, 2)]).unwrap();
        let registry = CapabilityRegistry::default();

        let err = registry
            .invoke(
                &state,
                "update_order_status",
                serde_json::json!({"order_id": order.0, "status": "Cancelled"}),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(store.get_order(order).unwrap().status, OrderStatus::Pending);

        let err = registry
            .invoke(
                &state,
                "update_order_status",
                serde_json::json!({"order_id": order.0, "status": "Cancelled", "expected_status": "Confirmed"}),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConcurrentModification);

        let cancelled = registry
            .invoke(
                &state,
                "update_order_status",
                serde_json::json!({"order_id": order.0, "status": "Cancelled", "expected_status": "Pending"}),
            )
            .await
            .unwrap();
        assert_eq!(cancelled["status"], "Cancelled");
        assert_eq!(store.get_product(product).unwrap().stock_quantity, 5);
    }

    #[tokio::test]
    async fn test_review_and_behavior_capabilities() {
        let (_dir, state) = state();
        let store = state.storage.store();
        let customer = store
            .create_customer(NewCustomer::new("Ada", "Lovelace", "ada@example.com"))
            .unwrap();
        let mut products = Vec::new();
        for (sku, name) in [("AUD-1", "Studio Headphones"), ("AUD-2", "Desk Speaker")] {
            products.push(
                store
                    .create_product(NewProduct {
                        sku: sku.into(),
                        name: name.into(),
                        category: "Audio".into(),
                        unit_price: 50.0,
                        stock_quantity: 5,
                        ..Default::default()
                    })
                    .unwrap(),
            );
        }
        store.create_order(customer, &[NewOrderItem::new(products[0], 1)]).unwrap();
        for (product, rating, text) in [
            (products[0], 5, "clear sound and comfortable"),
            (products[0], 1, "cable broke quickly"),
            (products[1], 4, "loud clear sound"),
        ] {
            let review = NewReview {
                review_id: None,
                product_id: product,
                customer_id: Some(customer),
                rating,
                title: String::new(),
                text: text.to_string(),
                verified_purchase: true,
            };
            let vector = state.vector_or_embed(None, text).await.unwrap();
            state.storage.publish_review(review, vector).unwrap();
        }
        let registry = CapabilityRegistry::default();
        let (state, registry) = (&state, &registry);
        let call = move |name: &'static str, args: Value| async move {
            registry.invoke(state, name, args).await
        };

        let product = call("get_product_by_id", serde_json::json!({"product_id": products[1].0}))
            .await
            .unwrap();
        assert_eq!(product["sku"], "AUD-2");

        let found = call("search_products_by_text", serde_json::json!({"term": "headphones"}))
            .await
            .unwrap();
        assert_eq!(found.as_array().unwrap().len(), 1);

        let trend = call("analyze_sentiment_trend", serde_json::json!({"product_id": products[0].0}))
            .await
            .unwrap();
        assert_eq!(trend["positive"], 1);
        assert_eq!(trend["negative"], 1);
        assert_eq!(trend["overall"], "neutral");

        let comparison = call(
            "compare_products_sentiment",
            serde_json::json!({"first_product_id": products[0].0, "second_product_id": products[1].0}),
        )
        .await
        .unwrap();
        assert_eq!(comparison["better_rated"], products[1].0);

        let themes = call("find_common_themes", serde_json::json!({"product_id": products[0].0}))
            .await
            .unwrap();
        assert_eq!(themes["negative_terms"][0]["reviews"], 1);

        let reviews = call(
            "search_reviews_semantic",
            serde_json::json!({"query": "cable broke quickly", "product_id": products[0].0}),
        )
        .await
        .unwrap();
        assert_eq!(reviews.as_array().unwrap().len(), 2);
        assert_eq!(reviews[0]["rating"], 1);
        let err = call("search_reviews_semantic", serde_json::json!({})).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let behavior = call("analyze_customer_behavior", serde_json::json!({"customer_id": customer.0}))
            .await
            .unwrap();
        assert_eq!(behavior["total_orders"], 1);
        assert_eq!(behavior["frequency"], "occasional");
        assert_eq!(behavior["engagement"], "active");
    }
}
