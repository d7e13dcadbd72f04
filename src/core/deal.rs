//! Deal business logic - Creating deals and editing their commission terms.
//!
//! Every write here runs in its own database transaction together with the
//! propagation cascade it triggers, so payments and payment splits are never
//! observed out of step with the deal terms that produced them.

use crate::{
    core::{
        calculator::{self, CategoryPolicy},
        propagation::{self, CascadeSummary},
    },
    entities::{Deal, DealStage, deal},
    errors::{Error, Result},
};
use rust_decimal::Decimal;
use sea_orm::{QueryOrder, Set, TransactionTrait, prelude::*};
use tracing::info;

/// Input for opening a new deal.
#[derive(Debug, Clone, Default)]
pub struct NewDeal {
    /// Display name
    pub name: String,
    /// Total commission fee
    pub fee: Decimal,
    /// Number of scheduled payments (null or non-positive means one)
    pub number_of_payments: Option<i32>,
    /// Referral fee percentage
    pub referral_fee_percent: Option<Decimal>,
    /// House percentage
    pub house_percent: Option<Decimal>,
    /// Origination category weight
    pub origination_percent: Option<Decimal>,
    /// Site category weight
    pub site_percent: Option<Decimal>,
    /// Deal category weight
    pub deal_percent: Option<Decimal>,
    /// Property reference
    pub property_id: Option<i64>,
    /// Client reference
    pub client_id: Option<i64>,
}

/// Partial edit of a deal's commission terms. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct DealTermsUpdate {
    /// New total fee
    pub fee: Option<Decimal>,
    /// New payment count
    pub number_of_payments: Option<i32>,
    /// New referral fee percentage
    pub referral_fee_percent: Option<Decimal>,
    /// New house percentage
    pub house_percent: Option<Decimal>,
    /// New origination weight
    pub origination_percent: Option<Decimal>,
    /// New site weight
    pub site_percent: Option<Decimal>,
    /// New deal weight
    pub deal_percent: Option<Decimal>,
}

/// Outcome of a deal terms edit.
#[derive(Debug, Clone)]
pub struct DealUpdateResult {
    /// The deal as stored after the edit
    pub deal: deal::Model,
    /// Rows touched by the cascade
    pub cascade: CascadeSummary,
}

/// Outcome of a stage change.
#[derive(Debug, Clone)]
pub struct DealStageChange {
    /// The deal as stored after the change
    pub deal: deal::Model,
    /// Payments archived because the deal was lost
    pub archived_payments: usize,
}

fn validate_percents(
    referral: Option<Decimal>,
    house: Option<Decimal>,
    origination: Option<Decimal>,
    site: Option<Decimal>,
    deal: Option<Decimal>,
) -> Result<()> {
    calculator::ensure_optional_percent("referral_fee_percent", referral)?;
    calculator::ensure_optional_percent("house_percent", house)?;
    calculator::ensure_optional_percent("origination_percent", origination)?;
    calculator::ensure_optional_percent("site_percent", site)?;
    calculator::ensure_optional_percent("deal_percent", deal)?;
    Ok(())
}

/// Finds a deal by its id.
pub async fn get_deal_by_id(db: &DatabaseConnection, deal_id: i64) -> Result<Option<deal::Model>> {
    Deal::find_by_id(deal_id).one(db).await.map_err(Into::into)
}

/// Lists every deal, newest first.
pub async fn get_all_deals(db: &DatabaseConnection) -> Result<Vec<deal::Model>> {
    Deal::find()
        .order_by_desc(deal::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Opens a new deal and creates its payment schedule.
///
/// The schedule has `number_of_payments` payments at `fee / count` each. Since a
/// new deal has no brokers yet, no payment split rows are created.
///
/// # Errors
/// Returns an error if:
/// - The name is empty or whitespace-only
/// - The fee is negative
/// - Any percentage lies outside 0..=100
/// - A database operation fails
pub async fn create_deal(
    db: &DatabaseConnection,
    new_deal: NewDeal,
    policy: CategoryPolicy,
) -> Result<deal::Model> {
    if new_deal.name.trim().is_empty() {
        return Err(Error::Config {
            message: "Deal name cannot be empty".to_string(),
        });
    }
    calculator::ensure_amount(new_deal.fee)?;
    validate_percents(
        new_deal.referral_fee_percent,
        new_deal.house_percent,
        new_deal.origination_percent,
        new_deal.site_percent,
        new_deal.deal_percent,
    )?;

    let txn = db.begin().await?;
    let now = chrono::Utc::now();

    let deal = deal::ActiveModel {
        name: Set(new_deal.name.trim().to_string()),
        fee: Set(new_deal.fee),
        number_of_payments: Set(new_deal.number_of_payments),
        referral_fee_percent: Set(new_deal.referral_fee_percent),
        house_percent: Set(new_deal.house_percent),
        origination_percent: Set(new_deal.origination_percent),
        site_percent: Set(new_deal.site_percent),
        deal_percent: Set(new_deal.deal_percent),
        property_id: Set(new_deal.property_id),
        client_id: Set(new_deal.client_id),
        stage: Set(DealStage::Open),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(&txn)
    .await?;

    propagation::warn_if_unbalanced_weights(&deal);

    let mut summary = CascadeSummary::default();
    let count = calculator::effective_payment_count(deal.number_of_payments);
    for sequence in 1..=count {
        propagation::insert_payment(&txn, &deal, sequence, &[], policy, &mut summary).await?;
    }

    txn.commit().await?;
    info!(deal_id = deal.id, payments = summary.payments_created, "Created deal");
    Ok(deal)
}

/// Edits a deal's commission terms and propagates the change to its payments
/// and payment splits in the same transaction.
///
/// # Errors
/// Returns [`Error::DealNotFound`] if the deal doesn't exist, or a validation
/// error for a negative fee or out-of-range percentage. No row is modified on
/// error.
pub async fn update_deal_terms(
    db: &DatabaseConnection,
    deal_id: i64,
    update: DealTermsUpdate,
    policy: CategoryPolicy,
) -> Result<DealUpdateResult> {
    if let Some(fee) = update.fee {
        calculator::ensure_amount(fee)?;
    }
    validate_percents(
        update.referral_fee_percent,
        update.house_percent,
        update.origination_percent,
        update.site_percent,
        update.deal_percent,
    )?;

    let txn = db.begin().await?;
    let before = propagation::load_deal(&txn, deal_id).await?;

    let mut active: deal::ActiveModel = before.clone().into();
    if let Some(fee) = update.fee {
        active.fee = Set(fee);
    }
    if let Some(count) = update.number_of_payments {
        active.number_of_payments = Set(Some(count));
    }
    if let Some(percent) = update.referral_fee_percent {
        active.referral_fee_percent = Set(Some(percent));
    }
    if let Some(percent) = update.house_percent {
        active.house_percent = Set(Some(percent));
    }
    if let Some(percent) = update.origination_percent {
        active.origination_percent = Set(Some(percent));
    }
    if let Some(percent) = update.site_percent {
        active.site_percent = Set(Some(percent));
    }
    if let Some(percent) = update.deal_percent {
        active.deal_percent = Set(Some(percent));
    }
    active.updated_at = Set(chrono::Utc::now());
    let after = active.update(&txn).await?;

    let cascade = propagation::on_deal_fields_changed(&txn, &before, &after, policy).await?;
    txn.commit().await?;

    Ok(DealUpdateResult {
        deal: after,
        cascade,
    })
}

/// Moves a deal to a new pipeline stage. Entering `Lost` archives every active
/// payment that has not been received.
pub async fn update_deal_stage(
    db: &DatabaseConnection,
    deal_id: i64,
    stage: DealStage,
) -> Result<DealStageChange> {
    let txn = db.begin().await?;
    let before = propagation::load_deal(&txn, deal_id).await?;
    let previous_stage = before.stage;

    let mut active: deal::ActiveModel = before.into();
    active.stage = Set(stage);
    active.updated_at = Set(chrono::Utc::now());
    let deal = active.update(&txn).await?;

    let archived_payments = if stage == DealStage::Lost && previous_stage != DealStage::Lost {
        propagation::archive_unreceived_payments(&txn, deal_id).await?
    } else {
        0
    };

    txn.commit().await?;
    info!(deal_id, ?previous_stage, ?stage, archived_payments, "Deal stage changed");
    Ok(DealStageChange {
        deal,
        archived_payments,
    })
}

/// Marks a deal as lost, archiving its unreceived payments.
pub async fn mark_deal_lost(db: &DatabaseConnection, deal_id: i64) -> Result<DealStageChange> {
    update_deal_stage(db, deal_id, DealStage::Lost).await
}
