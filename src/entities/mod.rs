//! Entity module - Contains all SeaORM entity definitions for the database.
//! These entities represent the commission ledger tables and their relationships.
//! Each entity has a Model struct for data and an Entity struct for operations.

pub mod commission_split;
pub mod deal;
pub mod payment;
pub mod payment_split;

// Re-export specific types to avoid conflicts
pub use commission_split::{
    Column as CommissionSplitColumn, Entity as CommissionSplit, Model as CommissionSplitModel,
};
pub use deal::{Column as DealColumn, DealStage, Entity as Deal, Model as DealModel};
pub use payment::{Column as PaymentColumn, Entity as Payment, Model as PaymentModel, PaymentStatus};
pub use payment_split::{
    Column as PaymentSplitColumn, Entity as PaymentSplit, Model as PaymentSplitModel,
};
