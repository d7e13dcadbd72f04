//! Payment split entity - A broker's dollar share of one payment.
//!
//! Percentages are copied from the broker's commission split when the row is
//! written; dollar amounts are derived from the payment's AGCI.
//! `split_broker_total` is always the sum of the three category amounts.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Payment split database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "payment_splits")]
pub struct Model {
    /// Unique identifier for the payment split
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Payment this split divides
    pub payment_id: i64,
    /// Broker receiving this share
    pub broker_id: i64,
    /// Origination percentage copied from the commission split
    pub split_origination_percent: Decimal,
    /// Site percentage copied from the commission split
    pub split_site_percent: Decimal,
    /// Deal percentage copied from the commission split
    pub split_deal_percent: Decimal,
    /// Broker's origination dollars
    pub split_origination_usd: Decimal,
    /// Broker's site dollars
    pub split_site_usd: Decimal,
    /// Broker's deal dollars
    pub split_deal_usd: Decimal,
    /// Sum of the three category amounts
    pub split_broker_total: Decimal,
    /// Whether the broker has been paid this share
    pub paid: bool,
    /// Date the broker was paid
    pub paid_date: Option<Date>,
}

/// Defines relationships between `PaymentSplit` and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each split belongs to one payment
    #[sea_orm(
        belongs_to = "super::payment::Entity",
        from = "Column::PaymentId",
        to = "super::payment::Column::Id"
    )]
    Payment,
}

impl Related<super::payment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Payment.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
