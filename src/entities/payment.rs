//! Payment entity - One scheduled installment of a deal's commission.
//!
//! `agci` and `referral_fee_usd` are derived from `payment_amount` and the owning
//! deal's referral and house percentages. Payments are archived, never deleted.
//! `amount_override` freezes the amount against fee changes; `locked` freezes the
//! whole payment against deal-driven and split-driven recalculation.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Lifecycle status of a payment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
pub enum PaymentStatus {
    /// Part of the deal's current payment schedule
    #[sea_orm(string_value = "active")]
    Active,
    /// Removed from the schedule; kept for history
    #[sea_orm(string_value = "archived")]
    Archived,
}

/// Payment database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "payments")]
pub struct Model {
    /// Unique identifier for the payment
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Deal this payment belongs to
    pub deal_id: i64,
    /// Position in the payment schedule, starting at 1
    pub payment_sequence: i32,
    /// Dollar amount of this installment
    pub payment_amount: Decimal,
    /// If true, `payment_amount` was set by hand and ignores fee changes
    pub amount_override: bool,
    /// Agent GCI: amount after referral fee and house split
    pub agci: Decimal,
    /// Referral fee taken from this installment
    pub referral_fee_usd: Decimal,
    /// If true, the payment is frozen against automatic recalculation
    pub locked: bool,
    /// Active or archived
    pub status: PaymentStatus,
    /// When the payment was archived; set together with `status`
    pub archived_at: Option<DateTimeUtc>,
    /// Whether the money has been received
    pub payment_received: bool,
    /// Date the money was received
    pub payment_received_date: Option<Date>,
    /// Whether an invoice has been sent
    pub invoice_sent: bool,
    /// Date the invoice was sent
    pub payment_invoice_date: Option<Date>,
    /// When the payment was created
    pub created_at: DateTimeUtc,
    /// When the payment was last modified
    pub updated_at: DateTimeUtc,
}

impl Model {
    /// Returns true while the payment is part of the active schedule.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == PaymentStatus::Active
    }
}

/// Defines relationships between Payment and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each payment belongs to one deal
    #[sea_orm(
        belongs_to = "super::deal::Entity",
        from = "Column::DealId",
        to = "super::deal::Column::Id"
    )]
    Deal,
    /// One payment has a split row per broker
    #[sea_orm(has_many = "super::payment_split::Entity")]
    PaymentSplits,
}

impl Related<super::deal::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Deal.def()
    }
}

impl Related<super::payment_split::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PaymentSplits.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
