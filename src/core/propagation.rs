//! Change propagation - Keeps payments and payment splits consistent with their inputs.
//!
//! Each public function here corresponds to one mutation event (deal terms edited,
//! broker split renegotiated, payment amount rewritten). They are generic over
//! `ConnectionTrait` and are meant to run on the transaction that performed the
//! originating write, so a cascade is committed or rolled back together with it.
//!
//! Frozen rows:
//! - `locked` payments are skipped by every deal-driven and split-driven update.
//! - `amount_override` payments keep their amount when the fee or count changes,
//!   but still get their AGCI recomputed when the deal's rates change.

use crate::{
    core::calculator::{
        self, BrokerShare, BrokerSplitAmounts, CategoryPolicy, CategoryWeights,
    },
    entities::{
        CommissionSplit, Deal, Payment, PaymentSplit, PaymentStatus, commission_split, deal,
        payment, payment_split,
    },
    errors::{Error, Result},
};
use rust_decimal::Decimal;
use sea_orm::{QueryOrder, Set, prelude::*};
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Tally of the rows touched by one cascade.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CascadeSummary {
    /// Payments appended to the schedule
    pub payments_created: usize,
    /// Payments moved to `Archived`
    pub payments_archived: usize,
    /// Existing payments whose amount or AGCI was rewritten
    pub payments_recomputed: usize,
    /// Payment split rows inserted
    pub splits_created: usize,
    /// Payment split rows rewritten in place
    pub splits_updated: usize,
    /// Payment split rows removed
    pub splits_deleted: usize,
}

impl CascadeSummary {
    /// True when the cascade did not touch any row.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Loads a deal or fails with [`Error::DealNotFound`].
pub async fn load_deal<C>(db: &C, deal_id: i64) -> Result<deal::Model>
where
    C: ConnectionTrait,
{
    Deal::find_by_id(deal_id)
        .one(db)
        .await?
        .ok_or(Error::DealNotFound { deal_id })
}

/// Loads a payment or fails with [`Error::PaymentNotFound`].
pub async fn load_payment<C>(db: &C, payment_id: i64) -> Result<payment::Model>
where
    C: ConnectionTrait,
{
    Payment::find_by_id(payment_id)
        .one(db)
        .await?
        .ok_or(Error::PaymentNotFound { payment_id })
}

/// Active payments of a deal, in schedule order.
pub async fn active_payments<C>(db: &C, deal_id: i64) -> Result<Vec<payment::Model>>
where
    C: ConnectionTrait,
{
    Payment::find()
        .filter(payment::Column::DealId.eq(deal_id))
        .filter(payment::Column::Status.eq(PaymentStatus::Active))
        .order_by_asc(payment::Column::PaymentSequence)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Commission splits of a deal, ordered by broker.
pub async fn deal_commission_splits<C>(
    db: &C,
    deal_id: i64,
) -> Result<Vec<commission_split::Model>>
where
    C: ConnectionTrait,
{
    CommissionSplit::find()
        .filter(commission_split::Column::DealId.eq(deal_id))
        .order_by_asc(commission_split::Column::BrokerId)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Computes every broker's dollar split of a payment's AGCI, in the order of
/// `splits`.
///
/// This is the single formula used by insertion, incremental recalculation,
/// regeneration and drift detection. The whole broker set is needed because
/// rounding residue is settled across brokers.
#[must_use]
pub fn payment_split_amounts(
    agci: Decimal,
    deal: &deal::Model,
    splits: &[commission_split::Model],
    policy: CategoryPolicy,
) -> Vec<BrokerSplitAmounts> {
    // Stored values may come back from the database with float noise
    let agci = calculator::round_money(agci);
    let categories =
        calculator::decompose_categories(agci, &CategoryWeights::from_deal(deal), policy);
    let shares: Vec<BrokerShare> = splits.iter().map(BrokerShare::from).collect();
    calculator::compute_broker_splits(&categories, &shares)
}

fn new_split_row(
    payment_id: i64,
    split: &commission_split::Model,
    amounts: &BrokerSplitAmounts,
) -> payment_split::ActiveModel {
    payment_split::ActiveModel {
        payment_id: Set(payment_id),
        broker_id: Set(split.broker_id),
        split_origination_percent: Set(split.split_origination_percent),
        split_site_percent: Set(split.split_site_percent),
        split_deal_percent: Set(split.split_deal_percent),
        split_origination_usd: Set(amounts.origination_usd),
        split_site_usd: Set(amounts.site_usd),
        split_deal_usd: Set(amounts.deal_usd),
        split_broker_total: Set(amounts.total),
        paid: Set(false),
        paid_date: Set(None),
        ..Default::default()
    }
}

/// Inserts a fresh payment split row for `(payment, broker)`.
pub(crate) async fn insert_split_row<C>(
    db: &C,
    payment_id: i64,
    split: &commission_split::Model,
    amounts: &BrokerSplitAmounts,
) -> Result<payment_split::Model>
where
    C: ConnectionTrait,
{
    new_split_row(payment_id, split, amounts)
        .insert(db)
        .await
        .map_err(Into::into)
}

/// Rewrites (or creates, if missing) the row of one broker on one payment.
/// Paid flags on an existing row are preserved.
async fn upsert_split_row<C>(
    db: &C,
    payment_id: i64,
    split: &commission_split::Model,
    amounts: &BrokerSplitAmounts,
    summary: &mut CascadeSummary,
) -> Result<()>
where
    C: ConnectionTrait,
{
    let existing = PaymentSplit::find()
        .filter(payment_split::Column::PaymentId.eq(payment_id))
        .filter(payment_split::Column::BrokerId.eq(split.broker_id))
        .one(db)
        .await?;

    let Some(row) = existing else {
        insert_split_row(db, payment_id, split, amounts).await?;
        summary.splits_created += 1;
        return Ok(());
    };

    let mut active: payment_split::ActiveModel = row.into();
    active.split_origination_percent = Set(split.split_origination_percent);
    active.split_site_percent = Set(split.split_site_percent);
    active.split_deal_percent = Set(split.split_deal_percent);
    active.split_origination_usd = Set(amounts.origination_usd);
    active.split_site_usd = Set(amounts.site_usd);
    active.split_deal_usd = Set(amounts.deal_usd);
    active.split_broker_total = Set(amounts.total);
    active.update(db).await?;
    summary.splits_updated += 1;
    Ok(())
}

/// Brings every broker row of one payment in line with its current AGCI.
async fn sync_payment_splits<C>(
    db: &C,
    payment: &payment::Model,
    deal: &deal::Model,
    splits: &[commission_split::Model],
    policy: CategoryPolicy,
    summary: &mut CascadeSummary,
) -> Result<()>
where
    C: ConnectionTrait,
{
    let amounts = payment_split_amounts(payment.agci, deal, splits, policy);
    for (split, amounts) in splits.iter().zip(&amounts) {
        upsert_split_row(db, payment.id, split, amounts, summary).await?;
    }
    Ok(())
}

/// Fails with [`Error::PaymentArchived`] unless the payment is active.
pub(crate) fn ensure_active(payment: &payment::Model) -> Result<()> {
    if payment.is_active() {
        Ok(())
    } else {
        Err(Error::PaymentArchived {
            payment_id: payment.id,
        })
    }
}

/// Writes a payment's amount and override flag together with the AGCI fields
/// derived from them, so the stored row is always self-consistent.
pub(crate) async fn write_payment_amount<C>(
    db: &C,
    payment: payment::Model,
    deal: &deal::Model,
    amount: Decimal,
    amount_override: bool,
) -> Result<payment::Model>
where
    C: ConnectionTrait,
{
    let breakdown =
        calculator::apply_agci_formula(amount, deal.referral_fee_percent, deal.house_percent);

    let mut active: payment::ActiveModel = payment.into();
    active.payment_amount = Set(breakdown.payment_amount);
    active.amount_override = Set(amount_override);
    active.agci = Set(breakdown.agci);
    active.referral_fee_usd = Set(breakdown.referral_fee_usd);
    active.updated_at = Set(chrono::Utc::now());
    active.update(db).await.map_err(Into::into)
}

/// Rewrites a payment's amount, recomputes its AGCI and brings its split rows
/// up to date.
pub(crate) async fn rewrite_payment<C>(
    db: &C,
    payment: payment::Model,
    deal: &deal::Model,
    amount: Decimal,
    amount_override: bool,
    policy: CategoryPolicy,
) -> Result<(payment::Model, CascadeSummary)>
where
    C: ConnectionTrait,
{
    let mut summary = CascadeSummary::default();
    let updated = write_payment_amount(db, payment, deal, amount, amount_override).await?;
    summary.payments_recomputed += 1;

    let splits = deal_commission_splits(db, deal.id).await?;
    sync_payment_splits(db, &updated, deal, &splits, policy, &mut summary).await?;
    Ok((updated, summary))
}

/// Re-runs the AGCI formula and the broker split calculation for one payment
/// from its current amount and its deal's current terms.
///
/// # Errors
/// Returns [`Error::PaymentNotFound`] or [`Error::DealNotFound`] if either row is
/// missing, or [`Error::PaymentArchived`] for an archived payment; nothing is
/// written in those cases.
pub async fn recompute_agci_and_splits_for<C>(
    db: &C,
    payment_id: i64,
    policy: CategoryPolicy,
) -> Result<CascadeSummary>
where
    C: ConnectionTrait,
{
    let payment = load_payment(db, payment_id).await?;
    ensure_active(&payment)?;
    let deal = load_deal(db, payment.deal_id).await?;
    let amount = payment.payment_amount;
    let amount_override = payment.amount_override;

    let (_, summary) = rewrite_payment(db, payment, &deal, amount, amount_override, policy).await?;
    debug!(payment_id, deal_id = deal.id, ?summary, "Recomputed payment");
    Ok(summary)
}

/// Inserts a new payment at the given sequence and creates one split row per
/// commission split on the deal. A deal without commission splits gets a
/// payment with no split rows.
pub(crate) async fn insert_payment<C>(
    db: &C,
    deal: &deal::Model,
    sequence: i32,
    splits: &[commission_split::Model],
    policy: CategoryPolicy,
    summary: &mut CascadeSummary,
) -> Result<payment::Model>
where
    C: ConnectionTrait,
{
    let amount = calculator::scheduled_payment_amount(deal.fee, deal.number_of_payments);
    let breakdown =
        calculator::apply_agci_formula(amount, deal.referral_fee_percent, deal.house_percent);
    let now = chrono::Utc::now();

    let payment = payment::ActiveModel {
        deal_id: Set(deal.id),
        payment_sequence: Set(sequence),
        payment_amount: Set(breakdown.payment_amount),
        amount_override: Set(false),
        agci: Set(breakdown.agci),
        referral_fee_usd: Set(breakdown.referral_fee_usd),
        locked: Set(false),
        status: Set(PaymentStatus::Active),
        archived_at: Set(None),
        payment_received: Set(false),
        payment_received_date: Set(None),
        invoice_sent: Set(false),
        payment_invoice_date: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await?;
    summary.payments_created += 1;

    let amounts = payment_split_amounts(payment.agci, deal, splits, policy);
    for (split, amounts) in splits.iter().zip(&amounts) {
        insert_split_row(db, payment.id, split, amounts).await?;
        summary.splits_created += 1;
    }

    if splits.is_empty() {
        debug!(
            deal_id = deal.id,
            payment_id = payment.id,
            "Deal has no commission splits; payment needs broker assignment"
        );
    }

    Ok(payment)
}

/// Moves a payment to `Archived`, stamping the archive time.
pub(crate) async fn archive_payment<C>(db: &C, payment: payment::Model) -> Result<payment::Model>
where
    C: ConnectionTrait,
{
    let now = chrono::Utc::now();
    let mut active: payment::ActiveModel = payment.into();
    active.status = Set(PaymentStatus::Archived);
    active.archived_at = Set(Some(now));
    active.updated_at = Set(now);
    active.update(db).await.map_err(Into::into)
}

/// Deletes every split row of one payment, returning how many were removed.
pub(crate) async fn delete_payment_splits<C>(db: &C, payment_id: i64) -> Result<u64>
where
    C: ConnectionTrait,
{
    let result = PaymentSplit::delete_many()
        .filter(payment_split::Column::PaymentId.eq(payment_id))
        .exec(db)
        .await?;
    Ok(result.rows_affected)
}

/// Appends or archives payments until the deal has `number_of_payments` active
/// ones. Returns the ids of appended payments.
///
/// New payments continue after the highest active sequence. Excess payments are
/// taken from the highest sequence down, never choosing a locked one; if too few
/// unlocked payments exist the schedule is left longer than requested and a
/// warning is logged.
async fn reconcile_payment_count<C>(
    db: &C,
    deal: &deal::Model,
    policy: CategoryPolicy,
    summary: &mut CascadeSummary,
) -> Result<HashSet<i64>>
where
    C: ConnectionTrait,
{
    let target = usize::try_from(calculator::effective_payment_count(deal.number_of_payments))
        .unwrap_or(1);
    let payments = active_payments(db, deal.id).await?;
    let mut created = HashSet::new();

    if payments.len() < target {
        let splits = deal_commission_splits(db, deal.id).await?;
        let mut next_sequence = payments
            .iter()
            .map(|p| p.payment_sequence)
            .max()
            .unwrap_or(0);

        for _ in payments.len()..target {
            next_sequence += 1;
            let payment =
                insert_payment(db, deal, next_sequence, &splits, policy, summary).await?;
            created.insert(payment.id);
        }
        info!(
            deal_id = deal.id,
            added = created.len(),
            "Appended payments to schedule"
        );
    } else if payments.len() > target {
        let excess = payments.len() - target;
        let candidates: Vec<payment::Model> = payments
            .into_iter()
            .rev()
            .filter(|p| !p.locked)
            .take(excess)
            .collect();

        if candidates.len() < excess {
            warn!(
                deal_id = deal.id,
                requested = excess,
                available = candidates.len(),
                "Not enough unlocked payments to shrink schedule"
            );
        }

        for payment in candidates {
            let payment_id = payment.id;
            let deleted = delete_payment_splits(db, payment_id).await?;
            summary.splits_deleted += usize::try_from(deleted).unwrap_or(usize::MAX);
            archive_payment(db, payment).await?;
            summary.payments_archived += 1;
            debug!(deal_id = deal.id, payment_id, "Archived excess payment");
        }
    }

    Ok(created)
}

fn rates_changed(before: &deal::Model, after: &deal::Model) -> bool {
    before.referral_fee_percent != after.referral_fee_percent
        || before.house_percent != after.house_percent
        || before.origination_percent != after.origination_percent
        || before.site_percent != after.site_percent
        || before.deal_percent != after.deal_percent
}

/// Logs a warning when the deal's category weights don't sum to 100.
pub(crate) fn warn_if_unbalanced_weights(deal: &deal::Model) {
    let weights = CategoryWeights::from_deal(deal);
    if !weights.is_balanced() {
        warn!(
            deal_id = deal.id,
            origination = %weights.origination,
            site = %weights.site,
            deal = %weights.deal,
            sum = %weights.sum(),
            "Deal category percentages do not sum to 100"
        );
    }
}

/// Applies the cascade for an edit of a deal's terms.
///
/// - fee or payment count changed: unlocked, non-overridden payments are
///   repriced to `fee / count`
/// - payment count changed: payments are appended or archived
/// - referral, house or category percentages changed: AGCI and splits are
///   recomputed for every unlocked active payment
///
/// `before` and `after` are the deal rows around the write; `after` must already
/// be persisted.
pub async fn on_deal_fields_changed<C>(
    db: &C,
    before: &deal::Model,
    after: &deal::Model,
    policy: CategoryPolicy,
) -> Result<CascadeSummary>
where
    C: ConnectionTrait,
{
    let mut summary = CascadeSummary::default();

    let fee_changed = before.fee != after.fee;
    let count_changed = calculator::effective_payment_count(before.number_of_payments)
        != calculator::effective_payment_count(after.number_of_payments);
    let rates_changed = rates_changed(before, after);

    if !(fee_changed || count_changed || rates_changed) {
        return Ok(summary);
    }

    if rates_changed {
        warn_if_unbalanced_weights(after);
    }

    let created = if count_changed {
        reconcile_payment_count(db, after, policy, &mut summary).await?
    } else {
        HashSet::new()
    };

    let scheduled = calculator::scheduled_payment_amount(after.fee, after.number_of_payments);
    let splits = deal_commission_splits(db, after.id).await?;

    for payment in active_payments(db, after.id).await? {
        if payment.locked || created.contains(&payment.id) {
            continue;
        }

        let current = calculator::round_money(payment.payment_amount);
        let target = if payment.amount_override {
            current
        } else {
            scheduled
        };

        if !rates_changed && current == target {
            continue;
        }

        let amount_override = payment.amount_override;
        let updated = write_payment_amount(db, payment, after, target, amount_override).await?;
        summary.payments_recomputed += 1;
        sync_payment_splits(db, &updated, after, &splits, policy, &mut summary).await?;
    }

    info!(
        deal_id = after.id,
        fee_changed,
        count_changed,
        rates_changed,
        ?summary,
        "Propagated deal term changes"
    );
    Ok(summary)
}

/// Applies the cascade for renegotiated broker percentages: every broker row is
/// recomputed on each unlocked active payment of the deal, since rounding residue
/// may move between brokers.
pub async fn on_commission_split_changed<C>(
    db: &C,
    split: &commission_split::Model,
    policy: CategoryPolicy,
) -> Result<CascadeSummary>
where
    C: ConnectionTrait,
{
    let deal = load_deal(db, split.deal_id).await?;
    let splits = deal_commission_splits(db, deal.id).await?;
    let mut summary = CascadeSummary::default();

    for payment in active_payments(db, deal.id).await? {
        if payment.locked {
            continue;
        }
        sync_payment_splits(db, &payment, &deal, &splits, policy, &mut summary).await?;
    }

    info!(
        deal_id = deal.id,
        broker_id = split.broker_id,
        ?summary,
        "Propagated commission split change"
    );
    Ok(summary)
}

/// Applies the cascade for a broker newly assigned to a deal: a split row is
/// created on every active payment. Unlocked payments also get their other
/// broker rows refreshed; on locked payments only the new row is written.
pub async fn on_commission_split_added<C>(
    db: &C,
    split: &commission_split::Model,
    policy: CategoryPolicy,
) -> Result<CascadeSummary>
where
    C: ConnectionTrait,
{
    let deal = load_deal(db, split.deal_id).await?;
    let splits = deal_commission_splits(db, deal.id).await?;
    let mut summary = CascadeSummary::default();

    for payment in active_payments(db, deal.id).await? {
        if !payment.locked {
            sync_payment_splits(db, &payment, &deal, &splits, policy, &mut summary).await?;
            continue;
        }

        let amounts = payment_split_amounts(payment.agci, &deal, &splits, policy);
        let new_row = splits
            .iter()
            .zip(&amounts)
            .find(|(s, _)| s.id == split.id);
        if let Some((split, amounts)) = new_row {
            upsert_split_row(db, payment.id, split, amounts, &mut summary).await?;
        }
    }

    info!(
        deal_id = deal.id,
        broker_id = split.broker_id,
        ?summary,
        "Created payment splits for new broker"
    );
    Ok(summary)
}

/// Applies the cascade for a broker removed from a deal: all of that broker's
/// split rows on the deal's payments are deleted, and the remaining brokers'
/// rows on unlocked active payments are refreshed.
///
/// Runs before the commission split row itself is deleted.
pub async fn on_commission_split_removed<C>(
    db: &C,
    split: &commission_split::Model,
    policy: CategoryPolicy,
) -> Result<CascadeSummary>
where
    C: ConnectionTrait,
{
    let payment_ids: Vec<i64> = Payment::find()
        .filter(payment::Column::DealId.eq(split.deal_id))
        .all(db)
        .await?
        .into_iter()
        .map(|p| p.id)
        .collect();

    let mut summary = CascadeSummary::default();
    if payment_ids.is_empty() {
        return Ok(summary);
    }

    let result = PaymentSplit::delete_many()
        .filter(payment_split::Column::BrokerId.eq(split.broker_id))
        .filter(payment_split::Column::PaymentId.is_in(payment_ids))
        .exec(db)
        .await?;
    summary.splits_deleted = usize::try_from(result.rows_affected).unwrap_or(usize::MAX);

    let deal = load_deal(db, split.deal_id).await?;
    let remaining: Vec<commission_split::Model> = deal_commission_splits(db, deal.id)
        .await?
        .into_iter()
        .filter(|s| s.id != split.id)
        .collect();
    for payment in active_payments(db, deal.id).await? {
        if payment.locked {
            continue;
        }
        sync_payment_splits(db, &payment, &deal, &remaining, policy, &mut summary).await?;
    }

    info!(
        deal_id = split.deal_id,
        broker_id = split.broker_id,
        deleted = summary.splits_deleted,
        "Removed broker payment splits"
    );
    Ok(summary)
}

/// Archives every active, not-yet-received payment of a deal. Received payments
/// are left untouched. Returns the number archived.
pub async fn archive_unreceived_payments<C>(db: &C, deal_id: i64) -> Result<usize>
where
    C: ConnectionTrait,
{
    let mut archived = 0;
    for payment in active_payments(db, deal_id).await? {
        if payment.payment_received {
            continue;
        }
        archive_payment(db, payment).await?;
        archived += 1;
    }

    info!(deal_id, archived, "Archived unreceived payments of lost deal");
    Ok(archived)
}
