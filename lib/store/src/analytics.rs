//! Derived customer metrics
//!
//! Lifetime value, segmentation and churn risk are always recomputed from
//! the current order set, never maintained incrementally, so repeated or
//! reordered runs converge on the same values.

use crate::store::SchemaStore;
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use storefront_core::model::round_cents;
use storefront_core::{Customer, CustomerId, Error, Order, Result, Segment, SegmentHistoryEntry};
use tracing::{debug, info};

const RECENCY_WEIGHT: f64 = 60.0;
const FREQUENCY_WEIGHT: f64 = 25.0;
const MONETARY_WEIGHT: f64 = 15.0;
const RECENCY_HORIZON_DAYS: i64 = 365;

/// Sum of non-cancelled order totals and the latest of their dates.
pub fn lifetime_value<'a>(
    orders: impl IntoIterator<Item = &'a Order>,
) -> (f64, Option<DateTime<Utc>>) {
    let mut total = 0.0;
    let mut last = None;
    for order in orders.into_iter().filter(|o| o.counts_toward_value()) {
        total += order.total_amount;
        last = last.max(Some(order.order_date));
    }
    (round_cents(total), last)
}

/// Churn risk in [0, 100].
///
/// Non-decreasing in `days_since_last_order` (no orders scores as the full
/// horizon) and non-increasing in `order_count` and `lifetime_value`.
pub fn churn_score(days_since_last_order: Option<i64>, order_count: usize, lifetime_value: f64) -> f64 {
    let days = days_since_last_order
        .unwrap_or(RECENCY_HORIZON_DAYS)
        .clamp(0, RECENCY_HORIZON_DAYS);
    let recency = RECENCY_WEIGHT * days as f64 / RECENCY_HORIZON_DAYS as f64;
    let frequency = FREQUENCY_WEIGHT / (1.0 + order_count as f64);
    let monetary = MONETARY_WEIGHT / (1.0 + lifetime_value.max(0.0) / 1000.0);
    (recency + frequency + monetary).clamp(0.0, 100.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Day,
    Week,
    Month,
}

impl Granularity {
    /// First day of the period containing `date`. Weeks start on Monday.
    pub fn period_start(self, date: NaiveDate) -> NaiveDate {
        match self {
            Granularity::Day => date,
            Granularity::Week => {
                date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
            }
            Granularity::Month => date.with_day(1).unwrap_or(date),
        }
    }
}

impl std::str::FromStr for Granularity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "day" => Ok(Granularity::Day),
            "week" => Ok(Granularity::Week),
            "month" => Ok(Granularity::Month),
            other => Err(Error::validation(other, "granularity must be day, week or month")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SegmentStats {
    pub segment: Segment,
    pub customer_count: usize,
    pub total_value: f64,
    pub average_value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PeriodSales {
    pub period_start: NaiveDate,
    pub order_count: usize,
    pub unique_customers: usize,
    pub revenue: f64,
    pub average_order_value: f64,
}

/// How often a customer buys, from their non-cancelled order count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseFrequency {
    /// More than 10 orders.
    Frequent,
    /// 6 to 10 orders.
    Regular,
    Occasional,
}

impl PurchaseFrequency {
    pub fn from_order_count(orders: usize) -> Self {
        match orders {
            n if n > 10 => PurchaseFrequency::Frequent,
            n if n > 5 => PurchaseFrequency::Regular,
            _ => PurchaseFrequency::Occasional,
        }
    }
}

/// Recency band of the last purchase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Engagement {
    /// Bought within the last 30 days.
    Active,
    /// Last purchase 30 to 89 days ago.
    NeedsReengagement,
    /// 90 days or more, or never.
    AtRisk,
}

impl Engagement {
    pub fn from_days(days_since_last_order: Option<i64>) -> Self {
        match days_since_last_order {
            Some(days) if days < 30 => Engagement::Active,
            Some(days) if days < 90 => Engagement::NeedsReengagement,
            _ => Engagement::AtRisk,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChurnLevel {
    High,
    Moderate,
    Low,
}

impl ChurnLevel {
    pub fn from_score(score: f64) -> Self {
        if score > 70.0 {
            ChurnLevel::High
        } else if score > 40.0 {
            ChurnLevel::Moderate
        } else {
            ChurnLevel::Low
        }
    }
}

/// Behavioural profile of one customer, derived from their order history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CustomerBehavior {
    pub customer_id: CustomerId,
    pub segment: Segment,
    pub total_orders: usize,
    pub lifetime_value: f64,
    pub average_order_value: f64,
    pub days_since_last_order: Option<i64>,
    pub churn_risk_score: f64,
    pub frequency: PurchaseFrequency,
    pub engagement: Engagement,
    pub churn_level: ChurnLevel,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SegmentationReport {
    pub evaluated: usize,
    pub changes: Vec<SegmentHistoryEntry>,
}

/// Batch and per-customer recomputation of derived metrics
pub struct AnalyticsAggregator {
    store: Arc<SchemaStore>,
}

impl AnalyticsAggregator {
    pub fn new(store: Arc<SchemaStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<SchemaStore> {
        &self.store
    }

    /// Idempotent; re-running without new orders yields the same value.
    pub fn recompute_lifetime_value(&self, id: CustomerId) -> Result<f64> {
        self.store.recompute_lifetime_value(id)
    }

    /// Re-derive the segment of every active customer from their current
    /// lifetime value.
    ///
    /// Customers are visited one at a time, each under a short write lock,
    /// so order writes interleave freely. A customer whose value moves
    /// mid-run is picked up by the next run.
    pub fn recompute_segmentation(&self) -> Result<SegmentationReport> {
        let now = Utc::now();
        let mut report = SegmentationReport::default();
        for id in self.store.active_customer_ids() {
            report.evaluated += 1;
            if let Some(change) = self.store.apply_segment(id, now)? {
                report.changes.push(change);
            }
        }
        info!(
            evaluated = report.evaluated,
            changed = report.changes.len(),
            "segmentation recomputed"
        );
        Ok(report)
    }

    pub fn compute_churn_risk(&self, id: CustomerId) -> Result<f64> {
        self.compute_churn_risk_at(id, Utc::now())
    }

    pub fn compute_churn_risk_at(&self, id: CustomerId, now: DateTime<Utc>) -> Result<f64> {
        self.store.read(|tables| {
            if !tables.customers.contains_key(&id) {
                return Err(Error::not_found("customer", id));
            }
            let orders: Vec<&Order> = tables
                .customer_orders(id)
                .filter(|o| o.counts_toward_value())
                .collect();
            let (value, last) = lifetime_value(orders.iter().copied());
            let days = last.map(|last| (now - last).num_days().max(0));
            Ok(churn_score(days, orders.len(), value))
        })
    }

    pub fn customer_behavior(&self, id: CustomerId) -> Result<CustomerBehavior> {
        self.customer_behavior_at(id, Utc::now())
    }

    /// Classify a customer's purchase frequency, recency and churn risk.
    /// The churn score is computed fresh rather than read from the record.
    pub fn customer_behavior_at(&self, id: CustomerId, now: DateTime<Utc>) -> Result<CustomerBehavior> {
        let view = self.store.customer_360_at(id, now)?;
        let churn_risk_score = round_cents(self.compute_churn_risk_at(id, now)?);
        Ok(CustomerBehavior {
            customer_id: id,
            segment: view.customer.segment,
            total_orders: view.total_orders,
            lifetime_value: view.customer.total_lifetime_value,
            average_order_value: view.average_order_value,
            days_since_last_order: view.days_since_last_order,
            churn_risk_score,
            frequency: PurchaseFrequency::from_order_count(view.total_orders),
            engagement: Engagement::from_days(view.days_since_last_order),
            churn_level: ChurnLevel::from_score(churn_risk_score),
        })
    }

    /// Store a fresh churn score for every active customer.
    pub fn recompute_churn_scores(&self) -> Result<usize> {
        let now = Utc::now();
        let ids = self.store.active_customer_ids();
        for &id in &ids {
            let score = self.compute_churn_risk_at(id, now)?;
            self.store.set_churn_score(id, score)?;
        }
        info!(customers = ids.len(), "churn scores recomputed");
        Ok(ids.len())
    }

    /// Customer count and lifetime value per segment over active
    /// customers, highest total first.
    pub fn segment_distribution(&self) -> Vec<SegmentStats> {
        let mut stats: Vec<SegmentStats> = self.store.read(|tables| {
            Segment::ALL
                .iter()
                .filter_map(|&segment| {
                    let values: Vec<f64> = tables
                        .customers
                        .values()
                        .filter(|c| c.is_active && c.segment == segment)
                        .map(|c| c.total_lifetime_value)
                        .collect();
                    if values.is_empty() {
                        return None;
                    }
                    let total = values.iter().sum::<f64>();
                    Some(SegmentStats {
                        segment,
                        customer_count: values.len(),
                        total_value: round_cents(total),
                        average_value: round_cents(total / values.len() as f64),
                    })
                })
                .collect()
        });
        stats.sort_by(|a, b| {
            b.total_value
                .total_cmp(&a.total_value)
                .then_with(|| b.segment.cmp(&a.segment))
        });
        stats
    }

    /// Active customers whose stored churn score is at least `threshold`.
    pub fn churn_risk_customers(&self, threshold: f64) -> Vec<Customer> {
        let mut customers: Vec<Customer> = self.store.read(|tables| {
            tables
                .customers
                .values()
                .filter(|c| c.is_active && c.churn_risk_score >= threshold)
                .cloned()
                .collect()
        });
        customers.sort_by(|a, b| {
            b.churn_risk_score
                .total_cmp(&a.churn_risk_score)
                .then_with(|| a.id.cmp(&b.id))
        });
        customers
    }

    /// Order volume and revenue per period over non-cancelled orders dated
    /// within `[start, end]`.
    pub fn sales_by_period(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        granularity: Granularity,
    ) -> Result<Vec<PeriodSales>> {
        if start > end {
            return Err(Error::validation(
                format!("{start}..{end}"),
                "period start must not be after its end",
            ));
        }

        let buckets = self.store.read(|tables| {
            let mut buckets: BTreeMap<NaiveDate, (usize, BTreeSet<CustomerId>, f64)> =
                BTreeMap::new();
            for order in tables.orders.values().filter(|o| o.counts_toward_value()) {
                let date = order.order_date.date_naive();
                if date < start || date > end {
                    continue;
                }
                let bucket = buckets.entry(granularity.period_start(date)).or_default();
                bucket.0 += 1;
                bucket.1.insert(order.customer_id);
                bucket.2 += order.total_amount;
            }
            buckets
        });

        debug!(?granularity, periods = buckets.len(), "sales aggregated");
        Ok(buckets
            .into_iter()
            .map(|(period_start, (orders, customers, revenue))| PeriodSales {
                period_start,
                order_count: orders,
                unique_customers: customers.len(),
                revenue: round_cents(revenue),
                average_order_value: round_cents(revenue / orders as f64),
            })
            .collect())
    }
}
