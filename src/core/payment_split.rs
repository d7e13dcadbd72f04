//! Payment split queries and payout tracking.
//!
//! Split rows are written only by the propagation and regeneration modules; this
//! module reads them and records when a broker has been paid.

use crate::{
    core::propagation,
    entities::{PaymentSplit, payment_split},
    errors::{Error, Result},
};
use chrono::NaiveDate;
use sea_orm::{QueryOrder, Set, prelude::*};

/// Lists the split rows of one payment, ordered by broker id.
pub async fn get_splits_for_payment<C>(db: &C, payment_id: i64) -> Result<Vec<payment_split::Model>>
where
    C: ConnectionTrait,
{
    PaymentSplit::find()
        .filter(payment_split::Column::PaymentId.eq(payment_id))
        .order_by_asc(payment_split::Column::BrokerId)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Lists the split rows of all active payments of a deal, ordered by payment
/// then broker.
pub async fn get_splits_for_deal<C>(db: &C, deal_id: i64) -> Result<Vec<payment_split::Model>>
where
    C: ConnectionTrait,
{
    let payment_ids: Vec<i64> = propagation::active_payments(db, deal_id)
        .await?
        .into_iter()
        .map(|p| p.id)
        .collect();

    if payment_ids.is_empty() {
        return Ok(Vec::new());
    }

    PaymentSplit::find()
        .filter(payment_split::Column::PaymentId.is_in(payment_ids))
        .order_by_asc(payment_split::Column::PaymentId)
        .order_by_asc(payment_split::Column::BrokerId)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Records that a broker has been paid their share of a payment. Defaults the
/// date to today.
///
/// # Errors
/// Returns [`Error::PaymentSplitNotFound`] for an unknown id.
pub async fn mark_split_paid(
    db: &DatabaseConnection,
    split_id: i64,
    paid_date: Option<NaiveDate>,
) -> Result<payment_split::Model> {
    let split = PaymentSplit::find_by_id(split_id)
        .one(db)
        .await?
        .ok_or(Error::PaymentSplitNotFound { split_id })?;

    let mut active: payment_split::ActiveModel = split.into();
    active.paid = Set(true);
    active.paid_date = Set(Some(
        paid_date.unwrap_or_else(|| chrono::Utc::now().date_naive()),
    ));
    active.update(db).await.map_err(Into::into)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::core::calculator::CategoryPolicy;
    use crate::core::commission_split::update_commission_split;
    use crate::test_utils::*;
    use rust_decimal_macros::dec;
    use sea_orm::{DatabaseBackend, MockDatabase};

    #[tokio::test]
    async fn test_mark_missing_split_is_not_found() -> Result<()> {
        let db = MockDatabase::new(DatabaseBackend::Sqlite)
            .append_query_results([Vec::<payment_split::Model>::new()])
            .into_connection();
        let result = mark_split_paid(&db, 3, None).await;
        assert!(matches!(
            result,
            Err(Error::PaymentSplitNotFound { split_id: 3 })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_splits_for_deal_cover_active_payments() -> Result<()> {
        let (db, deal, _broker) = setup_scenario_deal().await?;
        add_test_broker(&db, deal.id, 500).await?;

        let splits = get_splits_for_deal(&db, deal.id).await?;
        assert_eq!(splits.len(), 4);
        assert!(splits.windows(2).all(|w| w[0].payment_id <= w[1].payment_id));
        Ok(())
    }

    #[tokio::test]
    async fn test_paid_flag_survives_recalculation() -> Result<()> {
        let (db, deal, broker) = setup_scenario_deal().await?;
        let split = get_splits_for_deal(&db, deal.id).await?.remove(0);
        let date = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();

        let paid = mark_split_paid(&db, split.id, Some(date)).await?;
        assert!(paid.paid);
        assert_eq!(paid.paid_date, Some(date));

        update_commission_split(
            &db,
            broker.id,
            percents(dec!(100), dec!(100), dec!(0)),
            CategoryPolicy::Normalized,
        )
        .await?;

        let after = get_splits_for_payment(&db, split.payment_id).await?.remove(0);
        assert_eq!(after.id, split.id);
        assert!(after.paid);
        assert_eq!(after.split_deal_percent, dec!(0));
        Ok(())
    }
}
