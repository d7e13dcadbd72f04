//! Deal entity - Holds the negotiated commission terms of a brokerage deal.
//!
//! The fee, payment count, referral and house percentages, and the three category
//! weights (origination, site, deal) drive every derived payment and split amount.
//! Percentages are stored as 0-100 values; a null percentage counts as zero.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Pipeline stage of a deal. Only `Lost` has consequences for the payment schedule.
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
pub enum DealStage {
    /// Deal is being worked
    #[sea_orm(string_value = "open")]
    Open,
    /// Terms agreed, contract pending execution
    #[sea_orm(string_value = "under_contract")]
    UnderContract,
    /// Deal booked, commission expected
    #[sea_orm(string_value = "booked")]
    Booked,
    /// All commission collected
    #[sea_orm(string_value = "closed")]
    Closed,
    /// Deal fell through; unpaid payments are archived
    #[sea_orm(string_value = "lost")]
    Lost,
}

/// Deal database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "deals")]
pub struct Model {
    /// Unique identifier for the deal
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Display name of the deal
    pub name: String,
    /// Total commission fee in dollars
    pub fee: Decimal,
    /// Number of scheduled payments; null or non-positive is treated as one
    pub number_of_payments: Option<i32>,
    /// Referral fee taken off the top of each payment (0-100)
    pub referral_fee_percent: Option<Decimal>,
    /// House share of the post-referral GCI (0-100)
    pub house_percent: Option<Decimal>,
    /// Weight of the origination category (0-100)
    pub origination_percent: Option<Decimal>,
    /// Weight of the site category (0-100)
    pub site_percent: Option<Decimal>,
    /// Weight of the deal category (0-100)
    pub deal_percent: Option<Decimal>,
    /// Property this deal concerns, if recorded
    pub property_id: Option<i64>,
    /// Client this deal is for, if recorded
    pub client_id: Option<i64>,
    /// Current pipeline stage
    pub stage: DealStage,
    /// When the deal was created
    pub created_at: DateTimeUtc,
    /// When the deal terms were last modified
    pub updated_at: DateTimeUtc,
}

/// Defines relationships between Deal and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// One deal has many scheduled payments
    #[sea_orm(has_many = "super::payment::Entity")]
    Payments,
    /// One deal has many broker commission splits
    #[sea_orm(has_many = "super::commission_split::Entity")]
    CommissionSplits,
}

impl Related<super::payment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Payments.def()
    }
}

impl Related<super::commission_split::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CommissionSplits.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
