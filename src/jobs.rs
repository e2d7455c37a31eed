use std::sync::Arc;
use std::time::Duration;
use storefront_core::Result;
use storefront_store::{AnalyticsAggregator, SegmentationReport};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

/// One pass of the periodic analytics job: segments first, then churn
/// scores, both recomputed from the current orders.
pub fn run_analytics(analytics: &AnalyticsAggregator) -> Result<(SegmentationReport, usize)> {
    let report = analytics.recompute_segmentation()?;
    let scored = analytics.recompute_churn_scores()?;
    info!(
        evaluated = report.evaluated,
        segment_changes = report.changes.len(),
        scored,
        "analytics job finished"
    );
    Ok((report, scored))
}

/// Run [`run_analytics`] now and then every `period` on the blocking pool.
pub fn spawn_analytics_job(analytics: Arc<AnalyticsAggregator>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let analytics = analytics.clone();
            match tokio::task::spawn_blocking(move || run_analytics(&analytics)).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => error!("Analytics job error: {}", e),
                Err(e) => error!("Analytics job panicked: {}", e),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use storefront_core::{NewCustomer, NewOrderItem, NewProduct, Segment};
    use storefront_store::SchemaStore;

    fn seeded() -> (Arc<AnalyticsAggregator>, storefront_core::CustomerId) {
        let store = Arc::new(SchemaStore::new());
        let customer = store
            .create_customer(NewCustomer::new("Ada", "Lovelace", "ada@example.com"))
            .unwrap();
        let product = store
            .create_product(NewProduct {
                sku: "LAP-1".into(),
                name: "Laptop".into(),
                category: "Computers".into(),
                unit_price: 2_500.0,
                stock_quantity: 10,
                ..Default::default()
            })
            .unwrap();
        store
            .create_order(customer, &[NewOrderItem::new(product, 3)])
            .unwrap();
        (Arc::new(AnalyticsAggregator::new(store)), customer)
    }

    #[test]
    fn test_run_analytics_updates_segments_and_scores() {
        let (analytics, customer) = seeded();
        let (report, scored) = run_analytics(&analytics).unwrap();
        assert_eq!(report.evaluated, 1);
        assert_eq!(report.changes.len(), 1);
        assert_eq!(scored, 1);

        let stored = analytics.store().get_customer(customer).unwrap();
        assert_eq!(stored.segment, Segment::Gold);
        assert!(stored.churn_risk_score > 0.0);
    }

    #[tokio::test]
    async fn test_job_runs_on_first_tick() {
        let (analytics, customer) = seeded();
        let handle = spawn_analytics_job(analytics.clone(), Duration::from_secs(3600));

        let mut segment = Segment::Bronze;
        for _ in 0..50 {
            segment = analytics.store().get_customer(customer).unwrap().segment;
            if segment == Segment::Gold {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        handle.abort();
        assert_eq!(segment, Segment::Gold);
    }
}
