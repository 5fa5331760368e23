//! Periodic rebuild of the balance cache from the ledger's active-contract
//! set. The source of truth when the event-driven engine misses or
//! reorders an update; grounded on the teacher's `writers/mod.rs` ticker
//! and heartbeat-logging shape.

use std::collections::HashMap;
use std::time::Duration;

use bigdecimal::BigDecimal;
use sqlx::PgPool;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::error::BridgeResult;
use crate::ledger::LedgerClient;
use crate::types::Symbol;

const RECONCILE_CYCLE_DEADLINE: Duration = Duration::from_secs(120);
const SYMBOLS: [Symbol; 2] = [Symbol::Prompt, Symbol::Demo];

pub struct Reconciler {
    db: PgPool,
    ledger: LedgerClient,
    interval: Duration,
}

impl Reconciler {
    pub fn new(db: PgPool, ledger: LedgerClient, interval: Duration) -> Self {
        Self { db, ledger, interval }
    }

    /// Launches the periodic rebuild ticker. Each cycle runs under
    /// `RECONCILE_CYCLE_DEADLINE`; errors are logged, never fatal. Returns
    /// once `shutdown` fires or is dropped.
    pub async fn run(&mut self, mut shutdown: mpsc::Receiver<()>) -> BridgeResult<()> {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut cycle_count = 0u64;

        info!(interval_secs = self.interval.as_secs(), "reconciler starting");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    cycle_count += 1;
                    match tokio::time::timeout(RECONCILE_CYCLE_DEADLINE, self.reconcile_all()).await {
                        Ok(Ok(summary)) => {
                            info!(
                                cycle = cycle_count,
                                holdings = summary.holdings_seen,
                                users_updated = summary.users_updated,
                                "reconciliation cycle complete"
                            );
                        }
                        Ok(Err(e)) => {
                            warn!(cycle = cycle_count, error = %e, "reconciliation cycle failed, will retry next tick");
                        }
                        Err(_) => {
                            warn!(cycle = cycle_count, "reconciliation cycle exceeded deadline, abandoning this cycle");
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("reconciler shutting down");
                    return Ok(());
                }
            }
        }
    }

    /// `ReconcileAll`: pulls every active holding, sums per symbol for the
    /// authoritative total supply, groups by owner party, and overwrites
    /// each registered user's cached balance.
    pub async fn reconcile_all(&mut self) -> BridgeResult<ReconcileSummary> {
        let holdings = self.ledger.all_active_holdings().await?;

        let mut totals: HashMap<Symbol, BigDecimal> = HashMap::new();
        let mut by_party: HashMap<(String, Symbol), BigDecimal> = HashMap::new();
        for holding in &holdings {
            *totals.entry(holding.symbol).or_insert_with(|| BigDecimal::from(0)) += &holding.amount;
            *by_party
                .entry((holding.owner.clone(), holding.symbol))
                .or_insert_with(|| BigDecimal::from(0)) += &holding.amount;
        }

        for symbol in SYMBOLS {
            let total = totals.get(&symbol).cloned().unwrap_or_else(|| BigDecimal::from(0));
            crate::db::set_total_supply(&self.db, symbol, &total).await?;
        }

        crate::db::clear_all_balances(&self.db, Symbol::Prompt).await?;
        crate::db::clear_all_balances(&self.db, Symbol::Demo).await?;

        let mut users_updated = 0u64;
        for ((party, symbol), amount) in &by_party {
            match crate::db::set_user_balance_by_party(&self.db, party, *symbol, amount).await {
                Ok(true) => users_updated += 1,
                Ok(false) => {}
                Err(e) => error!(party = %party, symbol = %symbol, error = %e, "failed to apply reconciled balance"),
            }
        }

        crate::db::mark_reconciled(&self.db).await?;

        Ok(ReconcileSummary { holdings_seen: holdings.len(), users_updated })
    }

    /// `FullBalanceReconciliation`: clears every cached balance and the
    /// bridge event log, then rebuilds from the ledger's current
    /// active-contract set. Used to recover from a corrupted cache; does
    /// not attempt to replay individual bridge events, since `ReconcileAll`
    /// already derives the authoritative state directly from holdings.
    pub async fn full_balance_reconciliation(&mut self) -> BridgeResult<ReconcileSummary> {
        crate::db::clear_bridge_events(&self.db).await?;
        self.reconcile_all().await
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ReconcileSummary {
    pub holdings_seen: usize,
    pub users_updated: u64,
}
