//! Payment business logic - Reading the schedule and editing individual payments.
//!
//! Any write to a payment's amount or override flag goes through the AGCI
//! calculation first and then refreshes the payment's split rows, all in one
//! transaction.

use crate::{
    core::{
        calculator::{self, CategoryPolicy},
        propagation::{self, CascadeSummary},
    },
    entities::{Payment, payment},
    errors::Result,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use sea_orm::{QueryOrder, Set, TransactionTrait, prelude::*};
use tracing::info;

/// Lists a deal's active payments in schedule order.
pub async fn get_active_payments_for_deal(
    db: &DatabaseConnection,
    deal_id: i64,
) -> Result<Vec<payment::Model>> {
    propagation::active_payments(db, deal_id).await
}

/// Lists every payment of a deal, archived ones included, in schedule order.
pub async fn get_all_payments_for_deal(
    db: &DatabaseConnection,
    deal_id: i64,
) -> Result<Vec<payment::Model>> {
    Payment::find()
        .filter(payment::Column::DealId.eq(deal_id))
        .order_by_asc(payment::Column::PaymentSequence)
        .order_by_asc(payment::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Finds a payment by its id.
pub async fn get_payment_by_id(
    db: &DatabaseConnection,
    payment_id: i64,
) -> Result<Option<payment::Model>> {
    Payment::find_by_id(payment_id)
        .one(db)
        .await
        .map_err(Into::into)
}

/// Sets a payment's amount by hand and freezes it against fee changes.
///
/// AGCI, referral fee and the payment's split rows are recomputed immediately.
///
/// # Errors
/// Returns an error if the amount is negative, or the payment doesn't exist or
/// is archived.
pub async fn override_payment_amount(
    db: &DatabaseConnection,
    payment_id: i64,
    amount: Decimal,
    policy: CategoryPolicy,
) -> Result<(payment::Model, CascadeSummary)> {
    calculator::ensure_amount(amount)?;

    let txn = db.begin().await?;
    let payment = propagation::load_payment(&txn, payment_id).await?;
    propagation::ensure_active(&payment)?;
    let deal = propagation::load_deal(&txn, payment.deal_id).await?;

    let result = propagation::rewrite_payment(&txn, payment, &deal, amount, true, policy).await?;
    txn.commit().await?;

    info!(payment_id, %amount, "Payment amount overridden");
    Ok(result)
}

/// Drops a manual override: the payment returns to `fee / number_of_payments`
/// and its AGCI and split rows are recomputed.
///
/// # Errors
/// Returns [`crate::errors::Error::PaymentArchived`] for an archived payment.
pub async fn clear_payment_override(
    db: &DatabaseConnection,
    payment_id: i64,
    policy: CategoryPolicy,
) -> Result<(payment::Model, CascadeSummary)> {
    let txn = db.begin().await?;
    let payment = propagation::load_payment(&txn, payment_id).await?;
    propagation::ensure_active(&payment)?;
    let deal = propagation::load_deal(&txn, payment.deal_id).await?;
    let amount = calculator::scheduled_payment_amount(deal.fee, deal.number_of_payments);

    let result =
        propagation::rewrite_payment(&txn, payment, &deal, amount, false, policy).await?;
    txn.commit().await?;

    info!(payment_id, %amount, "Payment override cleared");
    Ok(result)
}

async fn update_flags<F>(db: &DatabaseConnection, payment_id: i64, apply: F) -> Result<payment::Model>
where
    F: FnOnce(&mut payment::ActiveModel),
{
    let payment = propagation::load_payment(db, payment_id).await?;
    let mut active: payment::ActiveModel = payment.into();
    apply(&mut active);
    active.updated_at = Set(chrono::Utc::now());
    active.update(db).await.map_err(Into::into)
}

/// Locks or unlocks a payment. A locked payment is skipped by every automatic
/// recalculation driven by its deal or by commission split changes.
pub async fn set_payment_locked(
    db: &DatabaseConnection,
    payment_id: i64,
    locked: bool,
) -> Result<payment::Model> {
    update_flags(db, payment_id, |p| p.locked = Set(locked)).await
}

/// Records that a payment has been received. Defaults the date to today.
pub async fn mark_payment_received(
    db: &DatabaseConnection,
    payment_id: i64,
    received_date: Option<NaiveDate>,
) -> Result<payment::Model> {
    let date = received_date.unwrap_or_else(|| chrono::Utc::now().date_naive());
    update_flags(db, payment_id, |p| {
        p.payment_received = Set(true);
        p.payment_received_date = Set(Some(date));
    })
    .await
}

/// Records that an invoice was sent for a payment. Defaults the date to today.
pub async fn mark_invoice_sent(
    db: &DatabaseConnection,
    payment_id: i64,
    invoice_date: Option<NaiveDate>,
) -> Result<payment::Model> {
    let date = invoice_date.unwrap_or_else(|| chrono::Utc::now().date_naive());
    update_flags(db, payment_id, |p| {
        p.invoice_sent = Set(true);
        p.payment_invoice_date = Set(Some(date));
    })
    .await
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::errors::Error;
    use crate::test_utils::*;
    use rust_decimal_macros::dec;
    use sea_orm::{DatabaseBackend, MockDatabase};

    #[tokio::test]
    async fn test_override_rejects_negative_amount() -> Result<()> {
        let db = MockDatabase::new(DatabaseBackend::Sqlite).into_connection();
        let result = override_payment_amount(&db, 1, dec!(-5), CategoryPolicy::Normalized).await;
        assert!(matches!(result, Err(Error::InvalidAmount { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_lock_missing_payment_is_not_found() -> Result<()> {
        let db = MockDatabase::new(DatabaseBackend::Sqlite)
            .append_query_results([Vec::<payment::Model>::new()])
            .into_connection();
        let result = set_payment_locked(&db, 8, true).await;
        assert!(matches!(result, Err(Error::PaymentNotFound { payment_id: 8 })));
        Ok(())
    }

    #[tokio::test]
    async fn test_override_recomputes_agci_and_splits() -> Result<()> {
        let (db, deal, _broker) = setup_scenario_deal().await?;
        let payment = get_active_payments_for_deal(&db, deal.id).await?.remove(0);

        let (updated, summary) =
            override_payment_amount(&db, payment.id, dec!(9810), CategoryPolicy::Normalized)
                .await?;
        assert!(updated.amount_override);
        assert_usd_eq(updated.payment_amount, dec!(9810));
        assert_usd_eq(updated.agci, dec!(4905));
        assert_eq!(summary.splits_updated, 1);

        let splits = splits_of(&db, payment.id).await?;
        assert_usd_eq(splits[0].split_broker_total, dec!(4905));
        Ok(())
    }

    #[tokio::test]
    async fn test_clear_override_returns_to_schedule() -> Result<()> {
        let (db, deal, _broker) = setup_scenario_deal().await?;
        let payment = get_active_payments_for_deal(&db, deal.id).await?.remove(0);
        override_payment_amount(&db, payment.id, dec!(1), CategoryPolicy::Normalized).await?;

        let (cleared, _) =
            clear_payment_override(&db, payment.id, CategoryPolicy::Normalized).await?;
        assert!(!cleared.amount_override);
        assert_usd_eq(cleared.payment_amount, dec!(5000));
        assert_usd_eq(cleared.agci, dec!(2500));
        Ok(())
    }

    #[tokio::test]
    async fn test_archived_payment_rejects_amount_edits() -> Result<()> {
        let (db, deal, _broker) = setup_scenario_deal().await?;
        let payments = get_active_payments_for_deal(&db, deal.id).await?;
        crate::core::deal::update_deal_terms(
            &db,
            deal.id,
            crate::core::deal::DealTermsUpdate {
                number_of_payments: Some(1),
                ..Default::default()
            },
            CategoryPolicy::Normalized,
        )
        .await?;
        let archived = payments[1].id;
        assert!(splits_of(&db, archived).await?.is_empty());

        let result =
            override_payment_amount(&db, archived, dec!(1234), CategoryPolicy::Normalized).await;
        assert!(matches!(
            result,
            Err(Error::PaymentArchived { payment_id }) if payment_id == archived
        ));
        let result = clear_payment_override(&db, archived, CategoryPolicy::Normalized).await;
        assert!(matches!(result, Err(Error::PaymentArchived { .. })));
        let result =
            propagation::recompute_agci_and_splits_for(&db, archived, CategoryPolicy::Normalized)
                .await;
        assert!(matches!(result, Err(Error::PaymentArchived { .. })));

        assert!(splits_of(&db, archived).await?.is_empty());
        let stored = get_payment_by_id(&db, archived).await?.unwrap();
        assert!(!stored.amount_override);
        assert_usd_eq(stored.payment_amount, dec!(5000));
        Ok(())
    }

    #[tokio::test]
    async fn test_received_and_invoice_flags() -> Result<()> {
        let (db, deal, _broker) = setup_scenario_deal().await?;
        let payment = get_active_payments_for_deal(&db, deal.id).await?.remove(0);
        let date = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();

        let invoiced = mark_invoice_sent(&db, payment.id, Some(date)).await?;
        assert!(invoiced.invoice_sent);
        assert_eq!(invoiced.payment_invoice_date, Some(date));

        let received = mark_payment_received(&db, payment.id, Some(date)).await?;
        assert!(received.payment_received);
        assert_eq!(received.payment_received_date, Some(date));

        let stored = get_payment_by_id(&db, payment.id).await?.unwrap();
        assert!(stored.payment_received);
        assert!(stored.invoice_sent);
        Ok(())
    }

    #[tokio::test]
    async fn test_all_payments_include_archived() -> Result<()> {
        let (db, deal, _broker) = setup_scenario_deal().await?;
        crate::core::deal::mark_deal_lost(&db, deal.id).await?;

        assert!(get_active_payments_for_deal(&db, deal.id).await?.is_empty());
        let all = get_all_payments_for_deal(&db, deal.id).await?;
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|p| !p.is_active()));
        Ok(())
    }
}
