//! Report generation business logic.
//!
//! This module provides the read side of the commission ledger: a deal's active
//! payment schedule with every broker split, per-broker payout totals, and
//! formatting helpers for operator output. All functions are framework-agnostic
//! and return structured data.

use crate::{
    core::{calculator::round_money, payment_split, propagation},
    entities::{deal, payment, payment_split as payment_split_entity},
    errors::Result,
};
use rust_decimal::Decimal;
use sea_orm::DatabaseConnection;
use std::collections::BTreeMap;

/// Label shown for a payment that has no split rows yet.
pub const NO_BROKER_SPLIT: &str = "No Broker Split";

/// One active payment together with its broker split rows.
#[derive(Debug, Clone)]
pub struct PaymentWithSplits {
    /// The payment
    pub payment: payment::Model,
    /// Its split rows, ordered by broker id
    pub splits: Vec<payment_split_entity::Model>,
}

impl PaymentWithSplits {
    /// True when no broker has been assigned a share of this payment.
    #[must_use]
    pub fn needs_broker_assignment(&self) -> bool {
        self.splits.is_empty()
    }

    /// Sum of the broker totals on this payment.
    #[must_use]
    pub fn split_total(&self) -> Decimal {
        self.splits.iter().map(|s| round_money(s.split_broker_total)).sum()
    }
}

/// A deal's full payment picture, as consumed by the payment dashboard.
#[derive(Debug, Clone)]
pub struct DealPaymentOverview {
    /// The deal
    pub deal: deal::Model,
    /// Active payments in schedule order
    pub payments: Vec<PaymentWithSplits>,
}

impl DealPaymentOverview {
    /// Sum of the active payment amounts.
    #[must_use]
    pub fn total_payment_amount(&self) -> Decimal {
        self.payments
            .iter()
            .map(|p| round_money(p.payment.payment_amount))
            .sum()
    }

    /// Sum of the active payments' AGCI.
    #[must_use]
    pub fn total_agci(&self) -> Decimal {
        self.payments.iter().map(|p| round_money(p.payment.agci)).sum()
    }
}

/// A broker's totals across a deal's active payments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerPayout {
    /// The broker
    pub broker_id: i64,
    /// Everything owed to the broker on this deal
    pub total: Decimal,
    /// Portion already marked paid
    pub paid: Decimal,
    /// Portion still outstanding
    pub outstanding: Decimal,
}

/// Loads a deal's active payments with their split rows.
///
/// # Errors
/// Returns [`crate::errors::Error::DealNotFound`] if the deal doesn't exist.
pub async fn get_deal_payment_overview(
    db: &DatabaseConnection,
    deal_id: i64,
) -> Result<DealPaymentOverview> {
    let deal = propagation::load_deal(db, deal_id).await?;
    let payments = propagation::active_payments(db, deal_id).await?;
    let mut splits_by_payment: BTreeMap<i64, Vec<payment_split_entity::Model>> = BTreeMap::new();
    for split in payment_split::get_splits_for_deal(db, deal_id).await? {
        splits_by_payment
            .entry(split.payment_id)
            .or_default()
            .push(split);
    }

    let payments = payments
        .into_iter()
        .map(|payment| {
            let splits = splits_by_payment.remove(&payment.id).unwrap_or_default();
            PaymentWithSplits { payment, splits }
        })
        .collect();

    Ok(DealPaymentOverview { deal, payments })
}

/// Aggregates broker totals over a deal overview, ordered by broker id.
#[must_use]
pub fn broker_payout_summary(overview: &DealPaymentOverview) -> Vec<BrokerPayout> {
    let mut totals: BTreeMap<i64, (Decimal, Decimal)> = BTreeMap::new();
    for split in overview.payments.iter().flat_map(|p| &p.splits) {
        let amount = round_money(split.split_broker_total);
        let entry = totals.entry(split.broker_id).or_default();
        entry.0 += amount;
        if split.paid {
            entry.1 += amount;
        }
    }

    totals
        .into_iter()
        .map(|(broker_id, (total, paid))| BrokerPayout {
            broker_id,
            total,
            paid,
            outstanding: total - paid,
        })
        .collect()
}

/// Formats a dollar amount like `$2,697.75` or `-$12.50`.
#[must_use]
pub fn format_usd(amount: Decimal) -> String {
    let rounded = round_money(amount);
    let sign = if rounded.is_sign_negative() && !rounded.is_zero() {
        "-"
    } else {
        ""
    };
    let text = format!("{:.2}", rounded.abs());
    let (whole, cents) = text.split_once('.').unwrap_or((text.as_str(), "00"));

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, digit) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }

    format!("{sign}${grouped}.{cents}")
}

/// Describes the split state of a payment: the broker total, or the
/// "No Broker Split" label when nobody is assigned.
#[must_use]
pub fn format_split_status(payment: &PaymentWithSplits) -> String {
    if payment.needs_broker_assignment() {
        NO_BROKER_SPLIT.to_string()
    } else {
        format!(
            "{} across {} broker(s)",
            format_usd(payment.split_total()),
            payment.splits.len()
        )
    }
}

/// One-line summary of a payment for operator output.
#[must_use]
pub fn format_payment_summary(payment: &PaymentWithSplits) -> String {
    let p = &payment.payment;
    let mut flags = Vec::new();
    if p.amount_override {
        flags.push("override");
    }
    if p.locked {
        flags.push("locked");
    }
    if p.payment_received {
        flags.push("received");
    }
    let flags = if flags.is_empty() {
        String::new()
    } else {
        format!(" [{}]", flags.join(", "))
    };

    format!(
        "#{} {} | referral {} | AGCI {} | {}{flags}",
        p.payment_sequence,
        format_usd(p.payment_amount),
        format_usd(p.referral_fee_usd),
        format_usd(p.agci),
        format_split_status(payment),
    )
}
