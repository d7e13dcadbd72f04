//! Shared test utilities for the commission engine.
//!
//! This module provides common helper functions for setting up test databases
//! and creating deals and broker splits with sensible defaults.

use crate::{
    core::{
        calculator::{BrokerPercents, CategoryPolicy, round_money},
        commission_split::{self, CommissionSplitChange},
        deal::{self, NewDeal},
        payment_split,
    },
    entities,
    errors::Result,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::DatabaseConnection;

/// Creates an in-memory `SQLite` database with all tables initialized.
/// This is the standard setup for all integration tests.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = sea_orm::Database::connect("sqlite::memory:").await?;
    crate::config::database::create_tables(&db).await?;
    Ok(db)
}

/// Creates a deal with custom commission terms.
///
/// # Arguments
/// * `fee` - Total commission fee
/// * `number_of_payments` - Scheduled payment count
/// * `referral_percent` - Whole-number referral percentage
/// * `house_percent` - Whole-number house percentage
///
/// # Defaults
/// * category weights: 33.33 each
/// * policy: normalized
pub async fn create_custom_deal(
    db: &DatabaseConnection,
    fee: Decimal,
    number_of_payments: Option<i32>,
    referral_percent: Option<i64>,
    house_percent: Option<i64>,
) -> Result<entities::deal::Model> {
    deal::create_deal(
        db,
        NewDeal {
            name: "Test Deal".to_string(),
            fee,
            number_of_payments,
            referral_fee_percent: referral_percent.map(Decimal::from),
            house_percent: house_percent.map(Decimal::from),
            origination_percent: Some(dec!(33.33)),
            site_percent: Some(dec!(33.33)),
            deal_percent: Some(dec!(33.33)),
            ..Default::default()
        },
        CategoryPolicy::Normalized,
    )
    .await
}

/// Sets up the reference deal: fee 10,000 over two payments, no referral,
/// house 50%, categories 33.33 each, and broker 1 holding 100% of every
/// category. Each payment ends up with AGCI 2,500 and one 2,500 split row.
pub async fn setup_scenario_deal() -> Result<(
    DatabaseConnection,
    entities::deal::Model,
    entities::commission_split::Model,
)> {
    let db = setup_test_db().await?;
    let deal = create_custom_deal(&db, dec!(10000), Some(2), Some(0), Some(50)).await?;
    let change = add_test_broker(&db, deal.id, 1).await?;
    Ok((db, deal, change.split))
}

/// Adds a broker with 100% of every category.
pub async fn add_test_broker(
    db: &DatabaseConnection,
    deal_id: i64,
    broker_id: i64,
) -> Result<CommissionSplitChange> {
    commission_split::add_commission_split(
        db,
        deal_id,
        broker_id,
        percents(dec!(100), dec!(100), dec!(100)),
        CategoryPolicy::Normalized,
    )
    .await
}

/// Shorthand for a broker's three category percentages.
#[must_use]
pub const fn percents(origination: Decimal, site: Decimal, deal: Decimal) -> BrokerPercents {
    BrokerPercents {
        origination,
        site,
        deal,
    }
}

/// Split rows of a payment, ordered by broker.
pub async fn splits_of(
    db: &DatabaseConnection,
    payment_id: i64,
) -> Result<Vec<entities::payment_split::Model>> {
    payment_split::get_splits_for_payment(db, payment_id).await
}

/// Asserts two dollar amounts agree to the cent. Stored values come back from
/// `SQLite` as floating point, so exact equality is too strict.
#[track_caller]
pub fn assert_usd_eq(actual: Decimal, expected: Decimal) {
    let diff = (round_money(actual) - round_money(expected)).abs();
    assert!(
        diff < dec!(0.005),
        "expected {expected}, got {actual} (diff {diff})"
    );
}

/// The reference deal as a bare model, for pure calculations that never touch
/// the database.
#[must_use]
pub fn scenario_deal_model() -> entities::deal::Model {
    let now = chrono::Utc::now();
    entities::deal::Model {
        id: 1,
        name: "Scenario".to_string(),
        fee: dec!(10000),
        number_of_payments: Some(2),
        referral_fee_percent: Some(dec!(0)),
        house_percent: Some(dec!(50)),
        origination_percent: Some(dec!(33.33)),
        site_percent: Some(dec!(33.33)),
        deal_percent: Some(dec!(33.33)),
        property_id: None,
        client_id: None,
        stage: entities::DealStage::Open,
        created_at: now,
        updated_at: now,
    }
}
