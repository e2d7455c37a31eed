use crate::capabilities::CapabilityRegistry;
use crate::error::{json_error_handler, path_error_handler, query_error_handler, ApiResult};
use crate::state::AppState;
use actix_cors::Cors;
use actix_web::{web, App, HttpResponse, HttpServer};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use storefront_core::{
    CustomerId, Document, Error, FilterCondition, IndexConfig, NewCustomer, NewInteraction,
    NewOrderItem, NewProduct, NewReview, OrderId, OrderStatus, Product, ProductId, Vector,
};
use storefront_recommend::RecommendationQuery;
use storefront_store::Granularity;
use tracing::{info, warn};

fn ok<T: Serialize>(result: T) -> ApiResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(json!({ "result": result })))
}

fn created<T: Serialize>(result: T) -> ApiResult<HttpResponse> {
    Ok(HttpResponse::Created().json(json!({ "result": result })))
}

fn default_limit() -> usize {
    10
}

fn default_k() -> usize {
    5
}

#[derive(Deserialize)]
struct LimitQuery {
    #[serde(default = "default_limit")]
    limit: usize,
}

#[derive(Deserialize)]
struct SearchCustomersQuery {
    term: String,
}

#[derive(Deserialize)]
struct CreateProductRequest {
    #[serde(flatten)]
    product: NewProduct,
    /// Precomputed embedding; otherwise the description is embedded.
    #[serde(default)]
    vector: Option<Vec<f32>>,
}

#[derive(Serialize)]
struct CreatedProduct {
    product: Product,
    indexed: bool,
}

#[derive(Deserialize)]
struct StockRequest {
    stock_quantity: u32,
}

#[derive(Deserialize)]
struct ActiveRequest {
    is_active: bool,
}

#[derive(Deserialize)]
struct CreateOrderRequest {
    customer_id: CustomerId,
    items: Vec<NewOrderItem>,
}

#[derive(Deserialize)]
struct StatusRequest {
    status: OrderStatus,
    expected_status: OrderStatus,
}

#[derive(Deserialize)]
struct RecentOrdersQuery {
    #[serde(default = "default_recent_days")]
    days: u32,
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_recent_days() -> u32 {
    30
}

#[derive(Deserialize)]
struct ChurnQuery {
    #[serde(default = "default_churn_threshold")]
    threshold: f64,
}

fn default_churn_threshold() -> f64 {
    70.0
}

#[derive(Deserialize)]
struct SalesQuery {
    start: NaiveDate,
    end: NaiveDate,
    #[serde(default = "default_granularity")]
    granularity: Granularity,
}

fn default_granularity() -> Granularity {
    Granularity::Month
}

#[derive(Deserialize)]
struct CreateIndexRequest {
    vector_dim: usize,
    #[serde(default)]
    distance: Option<String>,
}

#[derive(Serialize)]
struct IndexInfo {
    name: String,
    vector_dim: usize,
    distance: String,
    documents_count: usize,
}

#[derive(Deserialize)]
struct UpsertDocumentsRequest {
    documents: Vec<DocumentRequest>,
}

#[derive(Deserialize)]
struct DocumentRequest {
    id: String,
    vector: Vec<f32>,
    #[serde(default)]
    metadata: Option<Value>,
}

#[derive(Deserialize)]
struct QueryRequest {
    vector: Vec<f32>,
    #[serde(default = "default_limit")]
    k: usize,
    #[serde(default)]
    filter: Option<Value>,
}

#[derive(Deserialize)]
struct EmbeddingRequest {
    #[serde(default)]
    vector: Option<Vec<f32>>,
}

#[derive(Deserialize)]
struct PublishReviewRequest {
    #[serde(flatten)]
    review: NewReview,
    #[serde(default)]
    vector: Option<Vec<f32>>,
}

#[derive(Deserialize)]
struct RecommendationRequest {
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    vector: Option<Vec<f32>>,
    #[serde(default)]
    customer_id: Option<CustomerId>,
    #[serde(default = "default_k")]
    k: usize,
}

#[derive(Deserialize)]
struct ProductSearchQuery {
    term: String,
    #[serde(default = "default_text_search_limit")]
    limit: usize,
}

fn default_text_search_limit() -> usize {
    50
}

#[derive(Deserialize)]
struct TrendQuery {
    #[serde(default = "default_granularity")]
    granularity: Granularity,
}

#[derive(Deserialize)]
struct CompareQuery {
    first: ProductId,
    second: ProductId,
}

#[derive(Deserialize)]
struct ReviewSearchRequest {
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    vector: Option<Vec<f32>>,
    #[serde(default)]
    product_id: Option<ProductId>,
    #[serde(default = "default_limit")]
    limit: usize,
}

#[derive(Deserialize)]
struct SimilarQuery {
    #[serde(default = "default_k")]
    k: usize,
}

pub struct RestApi;

impl RestApi {
    pub async fn start(
        state: AppState,
        registry: Arc<CapabilityRegistry>,
        port: u16,
    ) -> std::io::Result<()> {
        info!("Starting HTTP server on port {}", port);
        HttpServer::new(move || {
            let cors = Cors::default()
                .allow_any_origin()
                .allow_any_method()
                .allow_any_header()
                .max_age(3600);

            App::new()
                .wrap(cors)
                .app_data(web::Data::new(state.clone()))
                .app_data(web::Data::from(registry.clone()))
                .configure(configure)
        })
        .bind(("0.0.0.0", port))?
        .run()
        .await
    }
}

/// Register every route and the extractor error handlers.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(json_error_handler))
        .app_data(web::PathConfig::default().error_handler(path_error_handler))
        .app_data(web::QueryConfig::default().error_handler(query_error_handler))
        .route("/health", web::get().to(health))
        .route("/snapshot", web::post().to(save_snapshot))
        // Customers
        .route("/customers", web::post().to(create_customer))
        .route("/customers/search", web::get().to(search_customers))
        .route("/customers/{id}", web::get().to(get_customer))
        .route("/customers/{id}/360", web::get().to(customer_360))
        .route("/customers/{id}/orders", web::get().to(customer_orders))
        .route("/customers/{id}/deactivate", web::post().to(deactivate_customer))
        .route("/customers/{id}/interactions", web::post().to(record_interaction))
        .route("/customers/{id}/interactions", web::get().to(customer_interactions))
        .route("/customers/{id}/segment-history", web::get().to(segment_history))
        // Products
        .route("/products", web::post().to(create_product))
        .route("/products/categories", web::get().to(categories))
        .route("/products/performance", web::get().to(product_performance))
        .route("/products/search", web::get().to(search_products))
        .route("/products/{id}", web::get().to(get_product))
        .route("/products/{id}/stock", web::put().to(set_stock))
        .route("/products/{id}/active", web::put().to(set_active))
        .route("/products/{id}/embedding", web::put().to(index_product))
        .route("/products/{id}/embedding", web::delete().to(remove_product_embedding))
        .route("/products/{id}/similar", web::get().to(similar_products))
        .route("/products/{id}/reviews", web::get().to(product_reviews))
        .route("/products/{id}/reviews/summary", web::get().to(review_summary))
        .route("/products/{id}/reviews/sentiment", web::get().to(sentiment_trend))
        .route("/products/{id}/reviews/themes", web::get().to(review_themes))
        .route("/reviews", web::post().to(publish_review))
        .route("/reviews/top-rated", web::get().to(top_rated))
        .route("/reviews/compare", web::get().to(compare_sentiment))
        .route("/reviews/search", web::post().to(search_reviews))
        // Orders
        .route("/orders", web::post().to(create_order))
        .route("/orders/recent", web::get().to(recent_orders))
        .route("/orders/{id}", web::get().to(get_order))
        .route("/orders/{id}/status", web::put().to(update_order_status))
        // Analytics
        .route("/analytics/customers/{id}/lifetime-value", web::post().to(recompute_lifetime_value))
        .route("/analytics/customers/{id}/churn", web::get().to(compute_churn_risk))
        .route("/analytics/customers/{id}/behavior", web::get().to(customer_behavior))
        .route("/analytics/segmentation", web::post().to(recompute_segmentation))
        .route("/analytics/churn", web::post().to(recompute_churn_scores))
        .route("/analytics/segments", web::get().to(segment_distribution))
        .route("/analytics/top-customers", web::get().to(top_customers))
        .route("/analytics/churn-risks", web::get().to(churn_risks))
        .route("/analytics/sales", web::get().to(sales_by_period))
        // Vector indexes
        .route("/indexes", web::get().to(list_indexes))
        .route("/indexes/{name}", web::get().to(get_index))
        .route("/indexes/{name}", web::put().to(create_index))
        .route("/indexes/{name}/documents", web::put().to(upsert_documents))
        .route("/indexes/{name}/query", web::post().to(query_index))
        .route("/indexes/{name}/documents/{id}", web::get().to(get_document))
        .route("/indexes/{name}/documents/{id}", web::delete().to(delete_document))
        // Recommendations
        .route("/recommendations", web::post().to(recommend))
        .route("/capabilities", web::get().to(list_capabilities))
        .route("/capabilities/{name}", web::post().to(invoke_capability));
}

async fn health(state: web::Data<AppState>) -> ApiResult<HttpResponse> {
    let indexes: Vec<Value> = state
        .storage
        .list_indexes()
        .into_iter()
        .filter_map(|name| state.storage.get_index(&name))
        .map(|index| json!({ "name": index.name(), "documents": index.count() }))
        .collect();
    ok(json!({
        "status": "ok",
        "embedder": state.embedder.name(),
        "indexes": indexes,
        "last_save_time": state.storage.last_save_time(),
    }))
}

async fn save_snapshot(state: web::Data<AppState>) -> ApiResult<HttpResponse> {
    let saved = state.storage.save()?;
    ok(json!({ "saved": saved, "last_save_time": state.storage.last_save_time() }))
}

// ==================== Customers ====================

async fn create_customer(
    state: web::Data<AppState>,
    req: web::Json<NewCustomer>,
) -> ApiResult<HttpResponse> {
    let store = state.storage.store();
    let id = store.create_customer(req.into_inner())?;
    created(store.get_customer(id)?)
}

async fn search_customers(
    state: web::Data<AppState>,
    query: web::Query<SearchCustomersQuery>,
) -> ApiResult<HttpResponse> {
    ok(state.storage.store().search_customers(&query.term))
}

async fn get_customer(state: web::Data<AppState>, path: web::Path<u64>) -> ApiResult<HttpResponse> {
    ok(state.storage.store().get_customer(CustomerId(path.into_inner()))?)
}

async fn customer_360(state: web::Data<AppState>, path: web::Path<u64>) -> ApiResult<HttpResponse> {
    ok(state.storage.store().customer_360(CustomerId(path.into_inner()))?)
}

async fn customer_orders(state: web::Data<AppState>, path: web::Path<u64>) -> ApiResult<HttpResponse> {
    ok(state.storage.store().customer_orders(CustomerId(path.into_inner()))?)
}

async fn deactivate_customer(
    state: web::Data<AppState>,
    path: web::Path<u64>,
) -> ApiResult<HttpResponse> {
    ok(state.storage.store().deactivate_customer(CustomerId(path.into_inner()))?)
}

async fn record_interaction(
    state: web::Data<AppState>,
    path: web::Path<u64>,
    req: web::Json<NewInteraction>,
) -> ApiResult<HttpResponse> {
    let id = state
        .storage
        .store()
        .record_interaction(CustomerId(path.into_inner()), req.into_inner())?;
    created(json!({ "interaction_id": id }))
}

async fn customer_interactions(
    state: web::Data<AppState>,
    path: web::Path<u64>,
) -> ApiResult<HttpResponse> {
    ok(state.storage.store().customer_interactions(CustomerId(path.into_inner()))?)
}

async fn segment_history(state: web::Data<AppState>, path: web::Path<u64>) -> ApiResult<HttpResponse> {
    let id = CustomerId(path.into_inner());
    let store = state.storage.store();
    store.get_customer(id)?;
    ok(store.segment_history(Some(id)))
}

// ==================== Products ====================

async fn create_product(
    state: web::Data<AppState>,
    req: web::Json<CreateProductRequest>,
) -> ApiResult<HttpResponse> {
    let CreateProductRequest { product, vector } = req.into_inner();
    product.validate()?;
    let text = format!("{} {}", product.name, product.description);

    // An unavailable embedder still creates the product; it only stays out
    // of vector candidates. A bad vector creates nothing.
    let vector = match state.vector_or_embed(vector, &text).await {
        Ok(vector) => Some(vector),
        Err(e) if e.is_degradable() => {
            warn!(sku = %product.sku, error = %e, "creating product without embedding");
            None
        }
        Err(e) => return Err(e.into()),
    };
    let indexed = vector.is_some();

    created(CreatedProduct {
        product: state.storage.create_product(product, vector)?,
        indexed,
    })
}

async fn search_products(
    state: web::Data<AppState>,
    query: web::Query<ProductSearchQuery>,
) -> ApiResult<HttpResponse> {
    ok(state.storage.store().search_products(&query.term, query.limit)?)
}

async fn get_product(state: web::Data<AppState>, path: web::Path<u64>) -> ApiResult<HttpResponse> {
    ok(state.storage.store().get_product(ProductId(path.into_inner()))?)
}

async fn categories(state: web::Data<AppState>) -> ApiResult<HttpResponse> {
    ok(state.storage.store().categories())
}

async fn product_performance(
    state: web::Data<AppState>,
    query: web::Query<LimitQuery>,
) -> ApiResult<HttpResponse> {
    ok(state.storage.store().product_performance(query.limit))
}

async fn set_stock(
    state: web::Data<AppState>,
    path: web::Path<u64>,
    req: web::Json<StockRequest>,
) -> ApiResult<HttpResponse> {
    ok(state
        .storage
        .set_product_stock(ProductId(path.into_inner()), req.stock_quantity)?)
}

async fn set_active(
    state: web::Data<AppState>,
    path: web::Path<u64>,
    req: web::Json<ActiveRequest>,
) -> ApiResult<HttpResponse> {
    ok(state
        .storage
        .set_product_active(ProductId(path.into_inner()), req.is_active)?)
}

async fn index_product(
    state: web::Data<AppState>,
    path: web::Path<u64>,
    req: web::Json<EmbeddingRequest>,
) -> ApiResult<HttpResponse> {
    let id = ProductId(path.into_inner());
    let product = state.storage.store().get_product(id)?;
    let text = format!("{} {}", product.name, product.description);
    let vector = state.vector_or_embed(req.into_inner().vector, &text).await?;
    let version = state.storage.index_product(id, vector)?;
    ok(json!({ "doc_id": product.doc_id(), "version": version }))
}

async fn remove_product_embedding(
    state: web::Data<AppState>,
    path: web::Path<u64>,
) -> ApiResult<HttpResponse> {
    let id = ProductId(path.into_inner());
    if !state.storage.remove_product_embedding(id)? {
        return Err(Error::not_found("embedding", id).into());
    }
    ok(true)
}

async fn similar_products(
    state: web::Data<AppState>,
    path: web::Path<u64>,
    query: web::Query<SimilarQuery>,
) -> ApiResult<HttpResponse> {
    ok(state
        .recommender
        .similar_products(ProductId(path.into_inner()), query.k)
        .await?)
}

async fn product_reviews(state: web::Data<AppState>, path: web::Path<u64>) -> ApiResult<HttpResponse> {
    let id = ProductId(path.into_inner());
    state.storage.store().get_product(id)?;
    ok(state.storage.reviews_for(id)?)
}

async fn review_summary(state: web::Data<AppState>, path: web::Path<u64>) -> ApiResult<HttpResponse> {
    ok(state.storage.review_summary(ProductId(path.into_inner()))?)
}

async fn sentiment_trend(
    state: web::Data<AppState>,
    path: web::Path<u64>,
    query: web::Query<TrendQuery>,
) -> ApiResult<HttpResponse> {
    ok(state
        .storage
        .sentiment_trend(ProductId(path.into_inner()), query.granularity)?)
}

async fn review_themes(
    state: web::Data<AppState>,
    path: web::Path<u64>,
    query: web::Query<LimitQuery>,
) -> ApiResult<HttpResponse> {
    ok(state.storage.review_themes(ProductId(path.into_inner()), query.limit)?)
}

async fn compare_sentiment(
    state: web::Data<AppState>,
    query: web::Query<CompareQuery>,
) -> ApiResult<HttpResponse> {
    ok(state.storage.compare_sentiment(query.first, query.second)?)
}

async fn search_reviews(
    state: web::Data<AppState>,
    req: web::Json<ReviewSearchRequest>,
) -> ApiResult<HttpResponse> {
    let req = req.into_inner();
    if req.query.is_none() && req.vector.is_none() {
        return Err(Error::validation("query", "either query or vector is required").into());
    }
    let text = req.query.unwrap_or_default();
    let vector = state.vector_or_embed(req.vector, &text).await?;
    ok(state.storage.search_reviews(&vector, req.product_id, req.limit)?)
}

async fn publish_review(
    state: web::Data<AppState>,
    req: web::Json<PublishReviewRequest>,
) -> ApiResult<HttpResponse> {
    let PublishReviewRequest { review, vector } = req.into_inner();
    review.validate()?;
    let text = format!("{} {}", review.title, review.text);
    let vector = state.vector_or_embed(vector, &text).await?;
    created(state.storage.publish_review(review, vector)?)
}

#[derive(Deserialize)]
struct TopRatedQuery {
    #[serde(default)]
    category: Option<String>,
    #[serde(default = "default_min_reviews")]
    min_reviews: usize,
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_min_reviews() -> usize {
    1
}

async fn top_rated(
    state: web::Data<AppState>,
    query: web::Query<TopRatedQuery>,
) -> ApiResult<HttpResponse> {
    ok(state
        .storage
        .top_rated_products(query.category.as_deref(), query.min_reviews, query.limit)?)
}

// ==================== Orders ====================

async fn create_order(
    state: web::Data<AppState>,
    req: web::Json<CreateOrderRequest>,
) -> ApiResult<HttpResponse> {
    let store = state.storage.store();
    let id = store.create_order(req.customer_id, &req.items)?;
    refresh_projections(&state, &req.items);
    created(store.order_details(id)?)
}

/// Copy post-order stock levels into the products index.
fn refresh_projections(state: &AppState, items: &[NewOrderItem]) {
    for item in items {
        if let Err(e) = state.storage.refresh_product_projection(item.product_id) {
            warn!(product = %item.product_id, error = %e, "failed to refresh index projection");
        }
    }
}

async fn get_order(state: web::Data<AppState>, path: web::Path<u64>) -> ApiResult<HttpResponse> {
    ok(state.storage.store().order_details(OrderId(path.into_inner()))?)
}

async fn update_order_status(
    state: web::Data<AppState>,
    path: web::Path<u64>,
    req: web::Json<StatusRequest>,
) -> ApiResult<HttpResponse> {
    let order = state.storage.store().update_order_status(
        OrderId(path.into_inner()),
        req.expected_status,
        req.status,
    )?;
    if order.status == OrderStatus::Cancelled {
        for item in &order.items {
            if let Err(e) = state.storage.refresh_product_projection(item.product_id) {
                warn!(product = %item.product_id, error = %e, "failed to refresh index projection");
            }
        }
    }
    ok(order)
}

async fn recent_orders(
    state: web::Data<AppState>,
    query: web::Query<RecentOrdersQuery>,
) -> ApiResult<HttpResponse> {
    ok(state.storage.store().recent_orders(query.days, query.limit))
}

// ==================== Analytics ====================

async fn recompute_lifetime_value(
    state: web::Data<AppState>,
    path: web::Path<u64>,
) -> ApiResult<HttpResponse> {
    let id = CustomerId(path.into_inner());
    let value = state.storage.analytics().recompute_lifetime_value(id)?;
    ok(json!({ "customer_id": id, "total_lifetime_value": value }))
}

async fn compute_churn_risk(state: web::Data<AppState>, path: web::Path<u64>) -> ApiResult<HttpResponse> {
    let id = CustomerId(path.into_inner());
    let score = state.storage.analytics().compute_churn_risk(id)?;
    ok(json!({ "customer_id": id, "churn_risk_score": score }))
}

async fn customer_behavior(state: web::Data<AppState>, path: web::Path<u64>) -> ApiResult<HttpResponse> {
    ok(state.storage.analytics().customer_behavior(CustomerId(path.into_inner()))?)
}

async fn recompute_segmentation(state: web::Data<AppState>) -> ApiResult<HttpResponse> {
    ok(state.storage.analytics().recompute_segmentation()?)
}

async fn recompute_churn_scores(state: web::Data<AppState>) -> ApiResult<HttpResponse> {
    let updated = state.storage.analytics().recompute_churn_scores()?;
    ok(json!({ "updated": updated }))
}

async fn segment_distribution(state: web::Data<AppState>) -> ApiResult<HttpResponse> {
    ok(state.storage.analytics().segment_distribution())
}

async fn top_customers(
    state: web::Data<AppState>,
    query: web::Query<LimitQuery>,
) -> ApiResult<HttpResponse> {
    ok(state.storage.store().top_customers(query.limit))
}

async fn churn_risks(
    state: web::Data<AppState>,
    query: web::Query<ChurnQuery>,
) -> ApiResult<HttpResponse> {
    ok(state.storage.analytics().churn_risk_customers(query.threshold))
}

async fn sales_by_period(
    state: web::Data<AppState>,
    query: web::Query<SalesQuery>,
) -> ApiResult<HttpResponse> {
    ok(state
        .storage
        .analytics()
        .sales_by_period(query.start, query.end, query.granularity)?)
}

// ==================== Vector indexes ====================

async fn list_indexes(state: web::Data<AppState>) -> ApiResult<HttpResponse> {
    ok(state.storage.list_indexes())
}

async fn get_index(state: web::Data<AppState>, path: web::Path<String>) -> ApiResult<HttpResponse> {
    let index = state.storage.index(&path.into_inner())?;
    ok(IndexInfo {
        name: index.name().to_string(),
        vector_dim: index.vector_dim(),
        distance: format!("{:?}", index.distance()),
        documents_count: index.count(),
    })
}

async fn create_index(
    state: web::Data<AppState>,
    path: web::Path<String>,
    req: web::Json<CreateIndexRequest>,
) -> ApiResult<HttpResponse> {
    let name = path.into_inner();
    let distance = match req.distance.as_deref() {
        Some(distance) => distance.parse()?,
        None => state.storage.settings().distance,
    };
    let mut config = IndexConfig::new(&name, req.vector_dim, distance);
    config.overfetch_factor = state.storage.settings().overfetch_factor;
    state.storage.create_index(config)?;
    created(true)
}

async fn upsert_documents(
    state: web::Data<AppState>,
    path: web::Path<String>,
    req: web::Json<UpsertDocumentsRequest>,
) -> ApiResult<HttpResponse> {
    let index = state.storage.index(&path.into_inner())?;
    let documents: Vec<Document> = req
        .into_inner()
        .documents
        .into_iter()
        .map(|d| Document::new(d.id, Vector::new(d.vector), d.metadata))
        .collect();
    let count = documents.len();
    index.batch_upsert(documents)?;
    ok(json!({ "upserted": count }))
}

async fn query_index(
    state: web::Data<AppState>,
    path: web::Path<String>,
    req: web::Json<QueryRequest>,
) -> ApiResult<HttpResponse> {
    let index = state.storage.index(&path.into_inner())?;
    let req = req.into_inner();
    let filter = req.filter.as_ref().map(parse_filter).transpose()?;
    let vector = Vector::new(req.vector);
    let hits = match &filter {
        Some(filter) => index.query(&vector, req.k, Some(filter))?,
        None => index.query(&vector, req.k, None)?,
    };
    ok(hits)
}

async fn get_document(
    state: web::Data<AppState>,
    path: web::Path<(String, String)>,
) -> ApiResult<HttpResponse> {
    let (name, id) = path.into_inner();
    let index = state.storage.index(&name)?;
    match index.get(&id) {
        Some(document) => ok(json!({
            "id": document.id,
            "version": document.version,
            "vector": document.vector.as_slice(),
            "metadata": document.metadata,
        })),
        None => Err(Error::not_found("document", id).into()),
    }
}

async fn delete_document(
    state: web::Data<AppState>,
    path: web::Path<(String, String)>,
) -> ApiResult<HttpResponse> {
    let (name, id) = path.into_inner();
    let index = state.storage.index(&name)?;
    if !index.delete(&id)? {
        return Err(Error::not_found("document", id).into());
    }
    ok(true)
}

/// `{"field", "operator", "value"}` leaves combined with `{"and": [...]}`,
/// `{"or": [...]}` and `{"not": {...}}`.
fn parse_filter(filter: &Value) -> Result<FilterCondition, Error> {
    let invalid = |reason: &str| Error::validation("filter", reason);
    let obj = filter.as_object().ok_or_else(|| invalid("filter must be an object"))?;

    let nested = |key: &str| -> Option<Result<Vec<FilterCondition>, Error>> {
        obj.get(key).map(|v| {
            v.as_array()
                .ok_or_else(|| invalid("expected an array of filters"))?
                .iter()
                .map(parse_filter)
                .collect()
        })
    };
    if let Some(conditions) = nested("and") {
        return Ok(FilterCondition::And(conditions?));
    }
    if let Some(conditions) = nested("or") {
        return Ok(FilterCondition::Or(conditions?));
    }
    if let Some(inner) = obj.get("not") {
        return Ok(FilterCondition::Not(Box::new(parse_filter(inner)?)));
    }

    let field = obj
        .get("field")
        .and_then(Value::as_str)
        .ok_or_else(|| invalid("filter needs a field"))?
        .to_string();
    let value = obj.get("value").cloned().ok_or_else(|| invalid("filter needs a value"))?;
    let op = obj.get("operator").and_then(Value::as_str).unwrap_or("eq");
    let number = || value.as_f64().ok_or_else(|| invalid("operator needs a numeric value"));

    Ok(match op {
        "eq" => FilterCondition::Equals { field, value },
        "ne" => FilterCondition::NotEquals { field, value },
        "gt" => FilterCondition::GreaterThan { field, value: number()? },
        "lt" => FilterCondition::LessThan { field, value: number()? },
        "gte" => FilterCondition::GreaterEqual { field, value: number()? },
        "lte" => FilterCondition::LessEqual { field, value: number()? },
        "contains" => FilterCondition::Contains {
            field,
            value: value
                .as_str()
                .ok_or_else(|| invalid("contains needs a string value"))?
                .to_string(),
        },
        other => return Err(Error::validation(other, "unknown filter operator")),
    })
}

// ==================== Recommendations ====================

async fn recommend(
    state: web::Data<AppState>,
    req: web::Json<RecommendationRequest>,
) -> ApiResult<HttpResponse> {
    let req = req.into_inner();
    let query = match (req.vector, req.query) {
        (Some(vector), _) => RecommendationQuery::Vector(Vector::new(vector)),
        (None, Some(text)) => RecommendationQuery::Text(text),
        (None, None) => return Err(Error::validation("query", "either query or vector is required").into()),
    };
    let result = state.recommender.recommend(query, req.customer_id, req.k).await?;
    ok(result)
}

async fn list_capabilities(registry: web::Data<CapabilityRegistry>) -> ApiResult<HttpResponse> {
    ok(registry.list())
}

async fn invoke_capability(
    state: web::Data<AppState>,
    registry: web::Data<CapabilityRegistry>,
    path: web::Path<String>,
    body: web::Bytes,
) -> ApiResult<HttpResponse> {
    ok(registry.invoke_raw(&state, &path.into_inner(), &body).await?)
}
