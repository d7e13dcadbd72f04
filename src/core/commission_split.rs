//! Commission split business logic - Assigning brokers to deals and renegotiating shares.
//!
//! Every change to a broker's percentages is propagated to the deal's payment
//! split rows in the same transaction. Percentages that don't add up to 100 across
//! brokers are tolerated (an incomplete assignment is a valid interim state) but
//! reported as warnings.

use crate::{
    core::{
        calculator::{self, BrokerPercents, CategoryPolicy, SplitCategory},
        propagation::{self, CascadeSummary},
    },
    entities::{CommissionSplit, commission_split},
    errors::{Error, Result},
};
use rust_decimal::Decimal;
use sea_orm::{Set, TransactionTrait, prelude::*};
use tracing::{info, warn};

/// A category whose broker percentages don't add up to 100 on a deal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitImbalance {
    /// The category concerned
    pub category: SplitCategory,
    /// Sum of all brokers' percentages for it
    pub total_percent: Decimal,
}

/// Outcome of a commission split write.
#[derive(Debug, Clone)]
pub struct CommissionSplitChange {
    /// The commission split as stored
    pub split: commission_split::Model,
    /// Rows touched by the cascade
    pub cascade: CascadeSummary,
}

fn validate(percents: &BrokerPercents) -> Result<()> {
    calculator::ensure_percent("split_origination_percent", percents.origination)?;
    calculator::ensure_percent("split_site_percent", percents.site)?;
    calculator::ensure_percent("split_deal_percent", percents.deal)?;
    Ok(())
}

/// Returns the categories whose broker percentages don't sum to 100.
///
/// A deal without any brokers reports nothing; that is an unassigned deal, not an
/// unbalanced one.
#[must_use]
pub fn check_commission_split_balance(splits: &[commission_split::Model]) -> Vec<SplitImbalance> {
    if splits.is_empty() {
        return Vec::new();
    }

    let origination: Decimal = splits.iter().map(|s| s.split_origination_percent).sum();
    let site: Decimal = splits.iter().map(|s| s.split_site_percent).sum();
    let deal: Decimal = splits.iter().map(|s| s.split_deal_percent).sum();

    [
        (SplitCategory::Origination, origination),
        (SplitCategory::Site, site),
        (SplitCategory::Deal, deal),
    ]
    .into_iter()
    .filter(|(_, total)| *total != Decimal::ONE_HUNDRED)
    .map(|(category, total_percent)| SplitImbalance {
        category,
        total_percent,
    })
    .collect()
}

async fn warn_if_unbalanced<C>(db: &C, deal_id: i64) -> Result<()>
where
    C: ConnectionTrait,
{
    let splits = propagation::deal_commission_splits(db, deal_id).await?;
    for imbalance in check_commission_split_balance(&splits) {
        warn!(
            deal_id,
            category = ?imbalance.category,
            total = %imbalance.total_percent,
            "Broker split percentages do not sum to 100"
        );
    }
    Ok(())
}

/// Lists the commission splits of a deal, ordered by broker id.
pub async fn get_commission_splits_for_deal(
    db: &DatabaseConnection,
    deal_id: i64,
) -> Result<Vec<commission_split::Model>> {
    propagation::deal_commission_splits(db, deal_id).await
}

/// Finds a commission split by its id.
pub async fn get_commission_split_by_id(
    db: &DatabaseConnection,
    split_id: i64,
) -> Result<Option<commission_split::Model>> {
    CommissionSplit::find_by_id(split_id)
        .one(db)
        .await
        .map_err(Into::into)
}

/// Assigns a broker to a deal and creates the broker's split row on every active
/// payment of the deal.
///
/// # Errors
/// Returns an error if:
/// - Any percentage lies outside 0..=100
/// - The deal doesn't exist
/// - The broker already has a commission split on this deal
pub async fn add_commission_split(
    db: &DatabaseConnection,
    deal_id: i64,
    broker_id: i64,
    percents: BrokerPercents,
    policy: CategoryPolicy,
) -> Result<CommissionSplitChange> {
    validate(&percents)?;

    let txn = db.begin().await?;
    propagation::load_deal(&txn, deal_id).await?;

    let existing = CommissionSplit::find()
        .filter(commission_split::Column::DealId.eq(deal_id))
        .filter(commission_split::Column::BrokerId.eq(broker_id))
        .one(&txn)
        .await?;
    if existing.is_some() {
        return Err(Error::DuplicateBroker { deal_id, broker_id });
    }

    let now = chrono::Utc::now();
    let split = commission_split::ActiveModel {
        deal_id: Set(deal_id),
        broker_id: Set(broker_id),
        split_origination_percent: Set(percents.origination),
        split_site_percent: Set(percents.site),
        split_deal_percent: Set(percents.deal),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(&txn)
    .await?;

    let cascade = propagation::on_commission_split_added(&txn, &split, policy).await?;
    warn_if_unbalanced(&txn, deal_id).await?;
    txn.commit().await?;

    info!(deal_id, broker_id, split_id = split.id, "Broker assigned to deal");
    Ok(CommissionSplitChange { split, cascade })
}

/// Renegotiates a broker's percentages and recomputes the split rows on every
/// unlocked active payment of the deal. Locked payments keep their rows.
///
/// # Errors
/// Returns [`Error::CommissionSplitNotFound`] for an unknown id or
/// [`Error::InvalidPercent`] for an out-of-range value.
pub async fn update_commission_split(
    db: &DatabaseConnection,
    split_id: i64,
    percents: BrokerPercents,
    policy: CategoryPolicy,
) -> Result<CommissionSplitChange> {
    validate(&percents)?;

    let txn = db.begin().await?;
    let existing = CommissionSplit::find_by_id(split_id)
        .one(&txn)
        .await?
        .ok_or(Error::CommissionSplitNotFound { split_id })?;
    let deal_id = existing.deal_id;

    let mut active: commission_split::ActiveModel = existing.into();
    active.split_origination_percent = Set(percents.origination);
    active.split_site_percent = Set(percents.site);
    active.split_deal_percent = Set(percents.deal);
    active.updated_at = Set(chrono::Utc::now());
    let split = active.update(&txn).await?;

    let cascade = propagation::on_commission_split_changed(&txn, &split, policy).await?;
    warn_if_unbalanced(&txn, deal_id).await?;
    txn.commit().await?;

    Ok(CommissionSplitChange { split, cascade })
}

/// Removes a broker from a deal, deleting all of the broker's split rows on the
/// deal's payments and recomputing the remaining rows on unlocked payments.
///
/// # Errors
/// Returns [`Error::CommissionSplitNotFound`] for an unknown id.
pub async fn remove_commission_split(
    db: &DatabaseConnection,
    split_id: i64,
    policy: CategoryPolicy,
) -> Result<CommissionSplitChange> {
    let txn = db.begin().await?;
    let split = CommissionSplit::find_by_id(split_id)
        .one(&txn)
        .await?
        .ok_or(Error::CommissionSplitNotFound { split_id })?;

    let cascade = propagation::on_commission_split_removed(&txn, &split, policy).await?;
    CommissionSplit::delete_by_id(split_id).exec(&txn).await?;
    warn_if_unbalanced(&txn, split.deal_id).await?;
    txn.commit().await?;

    info!(
        deal_id = split.deal_id,
        broker_id = split.broker_id,
        "Broker removed from deal"
    );
    Ok(CommissionSplitChange { split, cascade })
}
