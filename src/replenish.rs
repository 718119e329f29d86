use std::sync::Arc;
use std::time::Duration;

use chrono::{Days, Months, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::limits::{MAX_INSERT_BATCH, REPLENISH_HORIZON_MONTHS};
use crate::model::{Date, Product};
use crate::observability::{
    REPLENISH_FAILURES_TOTAL, REPLENISH_ROWS_INSERTED_TOTAL, WAL_COMPACTIONS_TOTAL,
};
use crate::store::{Store, StoreError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplenishReport {
    pub products: usize,
    pub inserted: usize,
    pub failed: usize,
}

/// Dates that extend a product's calendar from `latest` (exclusive) up to the
/// horizon counted from `today` (inclusive). Empty if already far enough out.
pub fn missing_dates(latest: Option<Date>, today: Date) -> Vec<Date> {
    let start = latest.unwrap_or_else(|| today - Days::new(1));
    let Some(end) = today.checked_add_months(Months::new(REPLENISH_HORIZON_MONTHS)) else {
        return Vec::new();
    };
    start
        .iter_days()
        .skip(1)
        .take_while(|d| *d <= end)
        .collect()
}

/// Fill one product's gap in batches `insert_many` accepts. Each batch lands
/// whole, so a failure part way leaves a shorter gap for the next run.
async fn replenish_product(store: &Store, product: &Product, today: Date) -> Result<usize, StoreError> {
    let latest = store.get_latest(product.id).await?.map(|a| a.local_date);
    let mut inserted = 0;
    for batch in missing_dates(latest, today).chunks(MAX_INSERT_BATCH) {
        inserted += store.insert_many(product.id, batch).await?.len();
    }
    Ok(inserted)
}

/// One pass over every product. A product that fails is logged and skipped;
/// the rest still get their rows.
pub async fn replenish_once(store: &Store, today: Date) -> ReplenishReport {
    let mut report = ReplenishReport::default();
    for product in store.list_products() {
        report.products += 1;
        match replenish_product(store, &product, today).await {
            Ok(n) => {
                report.inserted += n;
                metrics::counter!(REPLENISH_ROWS_INSERTED_TOTAL).increment(n as u64);
                debug!(product_id = %product.id, inserted = n, "product replenished");
            }
            Err(e) => {
                report.failed += 1;
                metrics::counter!(REPLENISH_FAILURES_TOTAL).increment(1);
                warn!(product_id = %product.id, error = %e, "replenish failed for product");
            }
        }
    }
    report
}

/// Replenish now, then on every `period` until `shutdown` fires.
pub async fn run_replenisher(store: Arc<Store>, period: Duration, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let report = replenish_once(&store, Utc::now().date_naive()).await;
                info!(
                    products = report.products,
                    inserted = report.inserted,
                    failed = report.failed,
                    "replenish run finished"
                );
            }
            _ = shutdown.cancelled() => break,
        }
    }
    debug!("replenisher stopped");
}

/// Background task that compacts the WAL once enough appends pile up.
pub async fn run_compactor(store: Arc<Store>, threshold: u64, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.cancelled() => break,
        }
        let appends = match store.wal_appends_since_compact().await {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "compactor cannot reach WAL writer");
                continue;
            }
        };
        if appends < threshold {
            continue;
        }
        match store.compact_wal().await {
            Ok(()) => {
                metrics::counter!(WAL_COMPACTIONS_TOTAL, "status" => "ok").increment(1);
                info!(appends, "compacted WAL");
            }
            Err(e) => {
                metrics::counter!(WAL_COMPACTIONS_TOTAL, "status" => "error").increment(1);
                warn!(error = %e, "WAL compaction failed");
            }
        }
    }
    debug!("compactor stopped");
}
