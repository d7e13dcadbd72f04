//! Payment split regeneration - The ground-truth rebuild of a deal's split rows.
//!
//! Regeneration throws away every split row on the deal's active payments and
//! recreates one row per (payment, commission split) pair from the stored AGCI,
//! the deal's category weights and the brokers' current percentages. Drift
//! detection runs the same computation without writing and reports where the
//! stored rows differ.

use crate::{
    core::{
        calculator::{BrokerSplitAmounts, CategoryPolicy, round_money},
        propagation,
    },
    entities::{commission_split, deal, payment, payment_split},
    errors::Result,
};
use rust_decimal::Decimal;
use sea_orm::{DatabaseConnection, TransactionTrait};
use std::collections::HashMap;
use std::fmt;
use tracing::info;

/// Counts returned by [`regenerate_payment_splits`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegenerationSummary {
    /// Split rows deleted
    pub deleted_count: u64,
    /// Split rows created
    pub created_count: u64,
}

impl fmt::Display for RegenerationSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "deleted {}, created {}",
            self.deleted_count, self.created_count
        )
    }
}

/// The row regeneration would write for one (payment, broker) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedSplit {
    /// Payment the row belongs to
    pub payment_id: i64,
    /// Broker the row belongs to
    pub broker_id: i64,
    /// Dollar amounts the row should hold
    pub amounts: BrokerSplitAmounts,
}

/// One difference between stored split rows and what regeneration would produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SplitDrift {
    /// A broker has a commission split but no row on this payment
    Missing {
        /// Payment without the row
        payment_id: i64,
        /// Broker without the row
        broker_id: i64,
        /// Total the row should carry
        expected_total: Decimal,
    },
    /// A stored row has no matching commission split
    Unexpected {
        /// Offending split row
        split_id: i64,
        /// Payment it sits on
        payment_id: i64,
        /// Broker it names
        broker_id: i64,
    },
    /// A stored row's amounts differ from the recomputed ones
    Mismatch {
        /// Offending split row
        split_id: i64,
        /// Payment it sits on
        payment_id: i64,
        /// Broker it names
        broker_id: i64,
        /// Stored broker total
        stored_total: Decimal,
        /// Recomputed broker total
        expected_total: Decimal,
    },
}

/// Computes the rows regeneration would write for the given payments, in payment
/// then broker order.
#[must_use]
pub fn expected_splits(
    deal: &deal::Model,
    payments: &[payment::Model],
    splits: &[commission_split::Model],
    policy: CategoryPolicy,
) -> Vec<ExpectedSplit> {
    payments
        .iter()
        .flat_map(|payment| {
            let amounts = propagation::payment_split_amounts(payment.agci, deal, splits, policy);
            splits
                .iter()
                .zip(amounts)
                .map(move |(split, amounts)| ExpectedSplit {
                    payment_id: payment.id,
                    broker_id: split.broker_id,
                    amounts,
                })
        })
        .collect()
}

/// Deletes and rebuilds every split row on a deal's active payments.
///
/// Running it twice in a row yields identical rows. Archived payments are not
/// touched.
///
/// # Errors
/// Returns [`crate::errors::Error::DealNotFound`] if the deal doesn't exist; no
/// row is deleted in that case.
pub async fn regenerate_payment_splits(
    db: &DatabaseConnection,
    deal_id: i64,
    policy: CategoryPolicy,
) -> Result<RegenerationSummary> {
    let txn = db.begin().await?;
    let deal = propagation::load_deal(&txn, deal_id).await?;
    let payments = propagation::active_payments(&txn, deal_id).await?;
    let splits = propagation::deal_commission_splits(&txn, deal_id).await?;

    let mut summary = RegenerationSummary::default();
    for payment in &payments {
        summary.deleted_count += propagation::delete_payment_splits(&txn, payment.id).await?;
    }

    for payment in &payments {
        let amounts = propagation::payment_split_amounts(payment.agci, &deal, &splits, policy);
        for (split, amounts) in splits.iter().zip(&amounts) {
            propagation::insert_split_row(&txn, payment.id, split, amounts).await?;
            summary.created_count += 1;
        }
    }

    txn.commit().await?;
    info!(deal_id, %summary, "Regenerated payment splits");
    Ok(summary)
}

/// Compares the stored split rows of a deal's active payments with what
/// regeneration would produce. Nothing is written.
///
/// # Errors
/// Returns [`crate::errors::Error::DealNotFound`] if the deal doesn't exist.
pub async fn detect_split_drift(
    db: &DatabaseConnection,
    deal_id: i64,
    policy: CategoryPolicy,
) -> Result<Vec<SplitDrift>> {
    let deal = propagation::load_deal(db, deal_id).await?;
    let payments = propagation::active_payments(db, deal_id).await?;
    let splits = propagation::deal_commission_splits(db, deal_id).await?;
    let stored = crate::core::payment_split::get_splits_for_deal(db, deal_id).await?;

    let mut stored_by_key: HashMap<(i64, i64), payment_split::Model> = stored
        .into_iter()
        .map(|row| ((row.payment_id, row.broker_id), row))
        .collect();

    let mut drift = Vec::new();
    for expected in expected_splits(&deal, &payments, &splits, policy) {
        match stored_by_key.remove(&(expected.payment_id, expected.broker_id)) {
            None => drift.push(SplitDrift::Missing {
                payment_id: expected.payment_id,
                broker_id: expected.broker_id,
                expected_total: expected.amounts.total,
            }),
            Some(row) if !row_matches(&row, &expected.amounts) => {
                drift.push(SplitDrift::Mismatch {
                    split_id: row.id,
                    payment_id: row.payment_id,
                    broker_id: row.broker_id,
                    stored_total: round_money(row.split_broker_total),
                    expected_total: expected.amounts.total,
                });
            }
            Some(_) => {}
        }
    }

    let mut leftovers: Vec<payment_split::Model> = stored_by_key.into_values().collect();
    leftovers.sort_by_key(|row| (row.payment_id, row.broker_id));
    drift.extend(leftovers.into_iter().map(|row| SplitDrift::Unexpected {
        split_id: row.id,
        payment_id: row.payment_id,
        broker_id: row.broker_id,
    }));

    if !drift.is_empty() {
        info!(deal_id, drift = drift.len(), "Stale payment splits detected");
    }
    Ok(drift)
}

fn row_matches(row: &payment_split::Model, expected: &BrokerSplitAmounts) -> bool {
    round_money(row.split_origination_usd) == expected.origination_usd
        && round_money(row.split_site_usd) == expected.site_usd
        && round_money(row.split_deal_usd) == expected.deal_usd
        && round_money(row.split_broker_total) == expected.total
}
