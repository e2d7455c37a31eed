//! In-process relational store
//!
//! Holds customers, products, orders, interactions and the segment history
//! behind a single lock. Every mutation that touches more than one table
//! (order creation, status changes) happens under one write guard, so
//! readers never observe an order without its stock movement or its
//! customer's refreshed lifetime value.

use crate::analytics::lifetime_value;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use storefront_core::model::{line_total, round_cents};
use storefront_core::{
    Customer, CustomerId, Error, Interaction, InteractionId, NewCustomer, NewInteraction,
    NewOrderItem, NewProduct, Order, OrderId, OrderItem, OrderItemId, OrderStatus, Product,
    ProductId, Result, Segment, SegmentHistoryEntry,
};
use tracing::{debug, info};

/// All relational tables; also the unit of persistence.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Tables {
    pub customers: BTreeMap<CustomerId, Customer>,
    pub products: BTreeMap<ProductId, Product>,
    pub orders: BTreeMap<OrderId, Order>,
    pub interactions: Vec<Interaction>,
    pub segment_history: Vec<SegmentHistoryEntry>,
    next_customer_id: u64,
    next_product_id: u64,
    next_order_id: u64,
    next_order_item_id: u64,
    next_interaction_id: u64,
}

impl Tables {
    fn next_id(counter: &mut u64) -> u64 {
        *counter += 1;
        *counter
    }

    pub fn customer_orders(&self, customer: CustomerId) -> impl Iterator<Item = &Order> {
        self.orders
            .values()
            .filter(move |order| order.customer_id == customer)
    }

    /// Recompute a customer's lifetime value and last purchase date from
    /// their full current order set.
    fn refresh_lifetime_value(&mut self, customer: CustomerId) -> Result<f64> {
        let (value, last_purchase) = lifetime_value(self.customer_orders(customer));
        let record = self
            .customers
            .get_mut(&customer)
            .ok_or_else(|| Error::not_found("customer", customer))?;
        record.total_lifetime_value = value;
        record.last_purchase_date = last_purchase;
        debug!(%customer, value, "lifetime value refreshed");
        Ok(value)
    }
}

/// One line of [`OrderDetails`], joined with the product it references.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderLine {
    #[serde(flatten)]
    pub item: OrderItem,
    pub product_name: String,
    pub sku: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderDetails {
    pub id: OrderId,
    pub customer_id: CustomerId,
    pub order_date: DateTime<Utc>,
    pub status: OrderStatus,
    pub total_amount: f64,
    pub lines: Vec<OrderLine>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderSummary {
    pub id: OrderId,
    pub customer_id: CustomerId,
    pub order_date: DateTime<Utc>,
    pub status: OrderStatus,
    pub total_amount: f64,
    pub item_count: usize,
}

impl From<&Order> for OrderSummary {
    fn from(order: &Order) -> Self {
        Self {
            id: order.id,
            customer_id: order.customer_id,
            order_date: order.order_date,
            status: order.status,
            total_amount: order.total_amount,
            item_count: order.items.len(),
        }
    }
}

/// Everything known about one customer, as shown on a profile page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Customer360 {
    pub customer: Customer,
    pub total_orders: usize,
    pub average_order_value: f64,
    pub days_since_last_order: Option<i64>,
    pub interaction_count: usize,
    pub average_sentiment: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProductPerformance {
    pub product_id: ProductId,
    pub name: String,
    pub category: String,
    pub units_sold: u64,
    pub order_count: usize,
    pub revenue: f64,
}

/// Relational source of truth for customers, products and orders
pub struct SchemaStore {
    tables: RwLock<Tables>,
}

impl Default for SchemaStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
        }
    }

    pub fn from_tables(tables: Tables) -> Self {
        Self {
            tables: RwLock::new(tables),
        }
    }

    /// Point-in-time copy of every table.
    pub fn snapshot(&self) -> Tables {
        self.tables.read().clone()
    }

    /// Run `f` against a consistent read view.
    pub fn read<T>(&self, f: impl FnOnce(&Tables) -> T) -> T {
        f(&self.tables.read())
    }

    // ==================== Customers ====================

    pub fn create_customer(&self, attrs: NewCustomer) -> Result<CustomerId> {
        attrs.validate()?;

        let mut tables = self.tables.write();
        let id = CustomerId(Tables::next_id(&mut tables.next_customer_id));
        let customer = Customer {
            id,
            first_name: attrs.first_name,
            last_name: attrs.last_name,
            email: attrs.email,
            phone: attrs.phone,
            date_of_birth: attrs.date_of_birth,
            country: attrs.country,
            city: attrs.city,
            registration_date: attrs.registration_date.unwrap_or_else(Utc::now),
            total_lifetime_value: 0.0,
            last_purchase_date: None,
            churn_risk_score: 0.0,
            segment: Segment::Bronze,
            is_active: true,
        };
        tables.customers.insert(id, customer);
        info!(customer = %id, "customer registered");
        Ok(id)
    }

    pub fn get_customer(&self, id: CustomerId) -> Result<Customer> {
        self.tables
            .read()
            .customers
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found("customer", id))
    }

    /// Mark a customer inactive. Customers are never removed.
    pub fn deactivate_customer(&self, id: CustomerId) -> Result<Customer> {
        let mut tables = self.tables.write();
        let customer = tables
            .customers
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("customer", id))?;
        customer.is_active = false;
        info!(customer = %id, "customer deactivated");
        Ok(customer.clone())
    }

    /// Case-insensitive substring match on first name, last name or email.
    pub fn search_customers(&self, term: &str) -> Vec<Customer> {
        let needle = term.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }
        self.tables
            .read()
            .customers
            .values()
            .filter(|c| {
                c.first_name.to_lowercase().contains(&needle)
                    || c.last_name.to_lowercase().contains(&needle)
                    || c.email.to_lowercase().contains(&needle)
            })
            .cloned()
            .collect()
    }

    /// Active customers by lifetime value, highest first.
    pub fn top_customers(&self, limit: usize) -> Vec<Customer> {
        let tables = self.tables.read();
        let mut customers: Vec<Customer> = tables
            .customers
            .values()
            .filter(|c| c.is_active)
            .cloned()
            .collect();
        customers.sort_by(|a, b| {
            b.total_lifetime_value
                .total_cmp(&a.total_lifetime_value)
                .then_with(|| a.id.cmp(&b.id))
        });
        customers.truncate(limit);
        customers
    }

    pub fn active_customer_ids(&self) -> Vec<CustomerId> {
        self.tables
            .read()
            .customers
            .values()
            .filter(|c| c.is_active)
            .map(|c| c.id)
            .collect()
    }

    pub fn customer_360(&self, id: CustomerId) -> Result<Customer360> {
        self.customer_360_at(id, Utc::now())
    }

    pub fn customer_360_at(&self, id: CustomerId, now: DateTime<Utc>) -> Result<Customer360> {
        let tables = self.tables.read();
        let customer = tables
            .customers
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found("customer", id))?;

        let total_orders = tables
            .customer_orders(id)
            .filter(|order| order.counts_toward_value())
            .count();
        let average_order_value = if total_orders == 0 {
            0.0
        } else {
            round_cents(customer.total_lifetime_value / total_orders as f64)
        };

        let sentiments: Vec<f64> = tables
            .interactions
            .iter()
            .filter(|i| i.customer_id == id)
            .map(|i| i.sentiment_score)
            .collect();
        let average_sentiment = if sentiments.is_empty() {
            None
        } else {
            Some(sentiments.iter().sum::<f64>() / sentiments.len() as f64)
        };

        Ok(Customer360 {
            days_since_last_order: customer
                .last_purchase_date
                .map(|last| (now - last).num_days().max(0)),
            customer,
            total_orders,
            average_order_value,
            interaction_count: sentiments.len(),
            average_sentiment,
        })
    }

    /// Store a freshly computed churn score.
    pub fn set_churn_score(&self, id: CustomerId, score: f64) -> Result<()> {
        let mut tables = self.tables.write();
        let customer = tables
            .customers
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("customer", id))?;
        customer.churn_risk_score = score.clamp(0.0, 100.0);
        Ok(())
    }

    /// Recompute a customer's lifetime value from their current orders.
    pub fn recompute_lifetime_value(&self, id: CustomerId) -> Result<f64> {
        self.tables.write().refresh_lifetime_value(id)
    }

    /// Re-derive one customer's segment from the lifetime value stored at
    /// the moment the write lock is taken, recording a history entry when
    /// the segment changes.
    pub fn apply_segment(
        &self,
        id: CustomerId,
        at: DateTime<Utc>,
    ) -> Result<Option<SegmentHistoryEntry>> {
        let mut tables = self.tables.write();
        let customer = tables
            .customers
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("customer", id))?;

        let current = Segment::from_lifetime_value(customer.total_lifetime_value);
        if current == customer.segment {
            return Ok(None);
        }

        let entry = SegmentHistoryEntry {
            customer_id: id,
            previous: customer.segment,
            current,
            lifetime_value: customer.total_lifetime_value,
            changed_at: at,
        };
        customer.segment = current;
        tables.segment_history.push(entry.clone());
        debug!(customer = %id, from = %entry.previous, to = %current, "segment changed");
        Ok(Some(entry))
    }

    pub fn segment_history(&self, id: Option<CustomerId>) -> Vec<SegmentHistoryEntry> {
        self.tables
            .read()
            .segment_history
            .iter()
            .filter(|e| id.map(|id| e.customer_id == id).unwrap_or(true))
            .cloned()
            .collect()
    }

    // ==================== Products ====================

    pub fn create_product(&self, attrs: NewProduct) -> Result<ProductId> {
        attrs.validate()?;

        let mut tables = self.tables.write();
        if tables.products.values().any(|p| p.sku == attrs.sku) {
            return Err(Error::constraint(&attrs.sku, "sku already exists"));
        }

        let id = ProductId(Tables::next_id(&mut tables.next_product_id));
        tables.products.insert(
            id,
            Product {
                id,
                sku: attrs.sku,
                name: attrs.name,
                description: attrs.description,
                category: attrs.category,
                subcategory: attrs.subcategory,
                unit_price: attrs.unit_price,
                stock_quantity: attrs.stock_quantity,
                is_active: true,
                created_at: Utc::now(),
            },
        );
        info!(product = %id, "product created");
        Ok(id)
    }

    pub fn get_product(&self, id: ProductId) -> Result<Product> {
        self.tables
            .read()
            .products
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found("product", id))
    }

    /// Look up several products at once; unknown ids are skipped.
    pub fn get_products(&self, ids: &[ProductId]) -> Vec<Product> {
        let tables = self.tables.read();
        ids.iter()
            .filter_map(|id| tables.products.get(id).cloned())
            .collect()
    }

    pub fn products(&self) -> Vec<Product> {
        self.tables.read().products.values().cloned().collect()
    }

    pub fn set_product_stock(&self, id: ProductId, stock: u32) -> Result<Product> {
        self.update_product(id, |p| p.stock_quantity = stock)
    }

    pub fn set_product_active(&self, id: ProductId, active: bool) -> Result<Product> {
        self.update_product(id, |p| p.is_active = active)
    }

    fn update_product(&self, id: ProductId, f: impl FnOnce(&mut Product)) -> Result<Product> {
        let mut tables = self.tables.write();
        let product = tables
            .products
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("product", id))?;
        f(product);
        debug!(product = %id, stock = product.stock_quantity, active = product.is_active, "product updated");
        Ok(product.clone())
    }

    /// Active products of a category, by name.
    pub fn products_by_category(&self, category: &str) -> Vec<Product> {
        let mut products: Vec<Product> = self
            .tables
            .read()
            .products
            .values()
            .filter(|p| p.is_active && p.category.eq_ignore_ascii_case(category))
            .cloned()
            .collect();
        products.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        products
    }

    /// Active products whose name, description or SKU contains `term`,
    /// case-insensitively, by name.
    pub fn search_products(&self, term: &str, limit: usize) -> Result<Vec<Product>> {
        let needle = term.trim().to_lowercase();
        if needle.is_empty() {
            return Err(Error::validation("term", "search term is required"));
        }
        let mut products: Vec<Product> = self
            .tables
            .read()
            .products
            .values()
            .filter(|p| {
                p.is_active
                    && (p.name.to_lowercase().contains(&needle)
                        || p.description.to_lowercase().contains(&needle)
                        || p.sku.to_lowercase().contains(&needle))
            })
            .cloned()
            .collect();
        products.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        products.truncate(limit);
        Ok(products)
    }

    /// Distinct categories of active products, sorted.
    pub fn categories(&self) -> Vec<String> {
        self.tables
            .read()
            .products
            .values()
            .filter(|p| p.is_active)
            .map(|p| p.category.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Units sold and revenue over non-cancelled orders, revenue first.
    pub fn product_performance(&self, limit: usize) -> Vec<ProductPerformance> {
        let tables = self.tables.read();
        let mut totals: BTreeMap<ProductId, (u64, BTreeSet<OrderId>, f64)> = BTreeMap::new();
        for order in tables.orders.values().filter(|o| o.counts_toward_value()) {
            for item in &order.items {
                let entry = totals.entry(item.product_id).or_default();
                entry.0 += u64::from(item.quantity);
                entry.1.insert(order.id);
                entry.2 += item.line_total;
            }
        }

        let mut performance: Vec<ProductPerformance> = totals
            .into_iter()
            .filter_map(|(id, (units, orders, revenue))| {
                tables.products.get(&id).map(|p| ProductPerformance {
                    product_id: id,
                    name: p.name.clone(),
                    category: p.category.clone(),
                    units_sold: units,
                    order_count: orders.len(),
                    revenue: round_cents(revenue),
                })
            })
            .collect();
        performance.sort_by(|a, b| {
            b.revenue
                .total_cmp(&a.revenue)
                .then_with(|| a.product_id.cmp(&b.product_id))
        });
        performance.truncate(limit);
        performance
    }

    /// Quantity the customer bought per category over non-cancelled orders.
    pub fn category_quantities(&self, id: CustomerId) -> Result<BTreeMap<String, u64>> {
        let tables = self.tables.read();
        if !tables.customers.contains_key(&id) {
            return Err(Error::validation(id, "unknown customer"));
        }

        let mut quantities = BTreeMap::new();
        for order in tables.customer_orders(id).filter(|o| o.counts_toward_value()) {
            for item in &order.items {
                if let Some(product) = tables.products.get(&item.product_id) {
                    *quantities.entry(product.category.clone()).or_insert(0) +=
                        u64::from(item.quantity);
                }
            }
        }
        Ok(quantities)
    }

    // ==================== Orders ====================

    pub fn create_order(&self, customer: CustomerId, items: &[NewOrderItem]) -> Result<OrderId> {
        self.create_order_at(customer, items, Utc::now())
    }

    /// Create a pending order dated `order_date`.
    ///
    /// Every item is checked before anything is written: the customer must
    /// exist and be active, every product must exist, be active and have
    /// enough stock for the summed quantity across lines.
    pub fn create_order_at(
        &self,
        customer: CustomerId,
        items: &[NewOrderItem],
        order_date: DateTime<Utc>,
    ) -> Result<OrderId> {
        let mut tables = self.tables.write();

        match tables.customers.get(&customer) {
            None => return Err(Error::constraint(customer, "customer does not exist")),
            Some(c) if !c.is_active => {
                return Err(Error::validation(customer, "customer is inactive"))
            }
            Some(_) => {}
        }
        if items.is_empty() {
            return Err(Error::validation(customer, "an order needs at least one item"));
        }

        let mut requested: BTreeMap<ProductId, u32> = BTreeMap::new();
        for item in items {
            item.validate()?;
            let product = tables
                .products
                .get(&item.product_id)
                .ok_or_else(|| Error::validation(item.product_id, "product does not exist"))?;
            if !product.is_active {
                return Err(Error::validation(item.product_id, "product is inactive"));
            }
            let quantity = requested.entry(item.product_id).or_insert(0);
            *quantity = quantity
                .checked_add(item.quantity)
                .ok_or_else(|| Error::validation(item.product_id, "requested quantity is too large"))?;
            if *quantity > product.stock_quantity {
                return Err(Error::validation(
                    item.product_id,
                    format!(
                        "insufficient stock: requested {}, available {}",
                        quantity, product.stock_quantity
                    ),
                ));
            }
        }

        // Remaining stock per product, settled before anything is written.
        let mut remaining: BTreeMap<ProductId, u32> = BTreeMap::new();
        for (&product_id, &quantity) in &requested {
            let stock = tables
                .products
                .get(&product_id)
                .map(|p| p.stock_quantity)
                .ok_or_else(|| Error::validation(product_id, "product does not exist"))?;
            let left = stock
                .checked_sub(quantity)
                .ok_or_else(|| Error::constraint(product_id, "stock would go negative"))?;
            remaining.insert(product_id, left);
        }

        let order_id = OrderId(Tables::next_id(&mut tables.next_order_id));
        let mut lines = Vec::with_capacity(items.len());
        for item in items {
            let item_id = OrderItemId(Tables::next_id(&mut tables.next_order_item_id));
            let product = tables
                .products
                .get_mut(&item.product_id)
                .ok_or_else(|| Error::validation(item.product_id, "product does not exist"))?;
            if let Some(&left) = remaining.get(&item.product_id) {
                product.stock_quantity = left;
            }
            let unit_price = item.unit_price.unwrap_or(product.unit_price);
            lines.push(OrderItem {
                id: item_id,
                order_id,
                product_id: item.product_id,
                quantity: item.quantity,
                unit_price,
                discount: item.discount,
                line_total: line_total(item.quantity, unit_price, item.discount),
            });
        }

        let mut order = Order {
            id: order_id,
            customer_id: customer,
            order_date,
            status: OrderStatus::Pending,
            total_amount: 0.0,
            items: lines,
        };
        order.total_amount = order.items_total();
        info!(order = %order_id, %customer, total = order.total_amount, "order created");
        tables.orders.insert(order_id, order);
        tables.refresh_lifetime_value(customer)?;

        Ok(order_id)
    }

    /// Move an order along the status state machine.
    ///
    /// The update only applies if the order is still in `expected`;
    /// otherwise it fails with `ConcurrentModification` and the caller should
    /// refetch. Cancelling restores stock. Reaching a terminal status
    /// refreshes the customer's lifetime value.
    pub fn update_order_status(
        &self,
        id: OrderId,
        expected: OrderStatus,
        next: OrderStatus,
    ) -> Result<Order> {
        let mut tables = self.tables.write();
        let order = tables
            .orders
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("order", id))?;

        if order.status != expected {
            return Err(Error::ConcurrentModification {
                id: id.to_string(),
                expected: expected.to_string(),
                actual: order.status.to_string(),
            });
        }

        let previous = order.status;
        order.status = previous.transition(next, id)?;
        let order = order.clone();
        info!(order = %id, from = %previous, to = %next, "order status changed");

        if next == OrderStatus::Cancelled {
            for item in &order.items {
                if let Some(product) = tables.products.get_mut(&item.product_id) {
                    product.stock_quantity = product.stock_quantity.saturating_add(item.quantity);
                }
            }
        }
        if next.is_terminal() {
            tables.refresh_lifetime_value(order.customer_id)?;
        }

        Ok(order)
    }

    pub fn get_order(&self, id: OrderId) -> Result<Order> {
        self.tables
            .read()
            .orders
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found("order", id))
    }

    pub fn order_details(&self, id: OrderId) -> Result<OrderDetails> {
        let tables = self.tables.read();
        let order = tables
            .orders
            .get(&id)
            .ok_or_else(|| Error::not_found("order", id))?;

        let lines = order
            .items
            .iter()
            .map(|item| {
                let (product_name, sku) = tables
                    .products
                    .get(&item.product_id)
                    .map(|p| (p.name.clone(), p.sku.clone()))
                    .unwrap_or_default();
                OrderLine {
                    item: item.clone(),
                    product_name,
                    sku,
                }
            })
            .collect();

        Ok(OrderDetails {
            id: order.id,
            customer_id: order.customer_id,
            order_date: order.order_date,
            status: order.status,
            total_amount: order.total_amount,
            lines,
        })
    }

    /// A customer's orders, newest first.
    pub fn customer_orders(&self, id: CustomerId) -> Result<Vec<OrderSummary>> {
        let tables = self.tables.read();
        if !tables.customers.contains_key(&id) {
            return Err(Error::not_found("customer", id));
        }
        let mut orders: Vec<OrderSummary> =
            tables.customer_orders(id).map(OrderSummary::from).collect();
        orders.sort_by(|a, b| b.order_date.cmp(&a.order_date).then_with(|| b.id.cmp(&a.id)));
        Ok(orders)
    }

    /// Orders placed within the last `days` days, newest first.
    pub fn recent_orders(&self, days: u32, limit: usize) -> Vec<OrderSummary> {
        let since = Utc::now() - Duration::days(i64::from(days));
        let mut orders: Vec<OrderSummary> = self
            .tables
            .read()
            .orders
            .values()
            .filter(|o| o.order_date >= since)
            .map(OrderSummary::from)
            .collect();
        orders.sort_by(|a, b| b.order_date.cmp(&a.order_date).then_with(|| b.id.cmp(&a.id)));
        orders.truncate(limit);
        orders
    }

    // ==================== Interactions ====================

    pub fn record_interaction(
        &self,
        customer: CustomerId,
        attrs: NewInteraction,
    ) -> Result<InteractionId> {
        attrs.validate(customer)?;

        let mut tables = self.tables.write();
        if !tables.customers.contains_key(&customer) {
            return Err(Error::constraint(customer, "customer does not exist"));
        }
        let id = InteractionId(Tables::next_id(&mut tables.next_interaction_id));
        tables.interactions.push(Interaction {
            id,
            customer_id: customer,
            channel: attrs.channel,
            interaction_type: attrs.interaction_type,
            sentiment_score: attrs.sentiment_score,
            notes: attrs.notes,
            occurred_at: Utc::now(),
        });
        debug!(%customer, interaction = %id, "interaction recorded");
        Ok(id)
    }

    pub fn customer_interactions(&self, customer: CustomerId) -> Result<Vec<Interaction>> {
        let tables = self.tables.read();
        if !tables.customers.contains_key(&customer) {
            return Err(Error::not_found("customer", customer));
        }
        Ok(tables
            .interactions
            .iter()
            .filter(|i| i.customer_id == customer)
            .cloned()
            .collect())
    }
}
