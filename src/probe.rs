//! Pool probe: validates pools and runs concurrent borrow/release rounds.

use crate::db::{BorrowRequest, PoolEngine, PoolStats, TransactionRequest};
use crate::models::{EnvironmentKind, PoolOwnership};
use futures_util::future::join_all;
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    pub environment: EnvironmentKind,
    pub ownership: PoolOwnership,
    pub transactions_supported: bool,
    pub pools: Vec<PoolReport>,
    pub usage: UsageReport,
    pub stats: Vec<PoolStats>,
}

impl ProbeReport {
    /// True when every pool validated, no borrow failed and no connection leaked.
    pub fn is_healthy(&self) -> bool {
        self.usage.balanced
            && self
                .pools
                .iter()
                .all(|p| p.error.is_none() && p.failed_borrows == 0)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolReport {
    pub name: String,
    pub lookup_key: String,
    pub validated: bool,
    pub borrows: u64,
    pub failed_borrows: u64,
    /// Whether a borrow inside an open transaction left autocommit alone.
    pub transaction_guard_ok: Option<bool>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UsageReport {
    pub requested: u64,
    pub returned: u64,
    pub outstanding: u64,
    pub balanced: bool,
}

/// Probe each named pool.
pub async fn run_probe(
    engine: &PoolEngine,
    pools: &[String],
    rounds: u32,
    concurrency: usize,
) -> ProbeReport {
    let mark = engine.usage_mark();
    let mut reports = Vec::with_capacity(pools.len());

    for name in pools {
        reports.push(probe_pool(engine, name, rounds, concurrency).await);
    }

    let balanced = match engine.usage().verify_balanced(&mark) {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "Probe left connections outstanding");
            false
        }
    };
    let usage = engine.usage();
    let strategy = engine.strategy();

    ProbeReport {
        environment: strategy.environment,
        ownership: strategy.ownership,
        transactions_supported: engine.transactions().supports_transactions(),
        pools: reports,
        usage: UsageReport {
            requested: usage.total_requested_count(),
            returned: usage.total_returned_count(),
            outstanding: usage.outstanding_count(),
            balanced,
        },
        stats: engine.pool_stats().await,
    }
}

async fn probe_pool(engine: &PoolEngine, name: &str, rounds: u32, concurrency: usize) -> PoolReport {
    let mut report = PoolReport {
        name: name.to_string(),
        lookup_key: engine.lookup_name(name),
        validated: false,
        borrows: 0,
        failed_borrows: 0,
        transaction_guard_ok: None,
        error: None,
    };

    if let Err(e) = engine.validate_pool(name).await {
        warn!(pool = %name, error = %e, "Pool validation failed");
        report.error = Some(e.to_string());
        return report;
    }
    report.validated = true;

    for _ in 0..rounds {
        let cycles = (0..concurrency.max(1)).map(|_| async {
            let handle = engine.borrow(name, BorrowRequest::new()).await?;
            handle.release().await
        });
        for result in join_all(cycles).await {
            report.borrows += 1;
            if let Err(e) = result {
                warn!(pool = %name, error = %e, "Borrow cycle failed");
                report.failed_borrows += 1;
            }
        }
    }

    report.transaction_guard_ok = check_transaction_guard(engine, name).await;

    info!(
        pool = %name,
        borrows = report.borrows,
        failed = report.failed_borrows,
        "Pool probed"
    );
    report
}

/// Borrow inside a fresh transaction and check autocommit was not touched.
async fn check_transaction_guard(engine: &PoolEngine, name: &str) -> Option<bool> {
    let factory = engine.transactions();
    let handle = match factory.request_transaction().await {
        Ok(TransactionRequest::Started(handle)) => handle,
        Ok(TransactionRequest::Unsupported) => return None,
        Err(e) => {
            warn!(pool = %name, error = %e, "Could not start probe transaction");
            return Some(false);
        }
    };

    let request = BorrowRequest::new()
        .with_autocommit(false)
        .in_transaction(handle.clone());
    let outcome = match engine.borrow(name, request).await {
        Ok(conn) => {
            let untouched = !conn.autocommit_changed();
            match conn.release().await {
                Ok(()) => untouched,
                Err(e) => {
                    warn!(pool = %name, error = %e, "Release inside probe transaction failed");
                    false
                }
            }
        }
        Err(e) => {
            warn!(pool = %name, error = %e, "Borrow inside probe transaction failed");
            false
        }
    };

    factory.rollback(Some(&handle)).await;
    Some(outcome)
}
