//! Commission split entity - A broker's negotiated share of a deal.
//!
//! Each row records what percentage of each category (origination, site, deal)
//! a single broker earns on one deal.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Commission split database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "commission_splits")]
pub struct Model {
    /// Unique identifier for the commission split
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Deal this split belongs to
    pub deal_id: i64,
    /// Broker receiving this share
    pub broker_id: i64,
    /// Broker's share of the origination category (0-100)
    pub split_origination_percent: Decimal,
    /// Broker's share of the site category (0-100)
    pub split_site_percent: Decimal,
    /// Broker's share of the deal category (0-100)
    pub split_deal_percent: Decimal,
    /// When the broker was assigned
    pub created_at: DateTimeUtc,
    /// When the percentages were last renegotiated
    pub updated_at: DateTimeUtc,
}

/// Defines relationships between `CommissionSplit` and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each commission split belongs to one deal
    #[sea_orm(
        belongs_to = "super::deal::Entity",
        from = "Column::DealId",
        to = "super::deal::Column::Id"
    )]
    Deal,
}

impl Related<super::deal::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Deal.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
