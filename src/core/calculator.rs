//! Commission arithmetic - AGCI formula, category decomposition, and broker splits.
//!
//! Everything in this module is pure: it takes decimal inputs and returns decimal
//! outputs without touching the database. The propagation and regeneration modules
//! call into these functions so that every write path uses the same formulas.
//!
//! Percentages are 0-100 values. Currency results are rounded to cents, half away
//! from zero; intermediate values keep full precision.

use crate::{
    entities::{commission_split, deal},
    errors::{Error, Result},
};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Deserialize;

/// Number of decimal places kept for stored currency values.
pub const MONEY_SCALE: u32 = 2;

/// Rounds a currency value to cents.
#[must_use]
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

fn percent_or_zero(percent: Option<Decimal>) -> Decimal {
    percent.unwrap_or(Decimal::ZERO)
}

fn fraction(percent: Decimal) -> Decimal {
    percent / Decimal::ONE_HUNDRED
}

/// Rejects percentages outside 0..=100.
pub fn ensure_percent(field: &'static str, value: Decimal) -> Result<()> {
    if value < Decimal::ZERO || value > Decimal::ONE_HUNDRED {
        return Err(Error::InvalidPercent { field, value });
    }
    Ok(())
}

/// Same as [`ensure_percent`], but a missing value is accepted.
pub fn ensure_optional_percent(field: &'static str, value: Option<Decimal>) -> Result<()> {
    value.map_or(Ok(()), |v| ensure_percent(field, v))
}

/// Rejects negative currency amounts.
pub fn ensure_amount(amount: Decimal) -> Result<()> {
    if amount < Decimal::ZERO {
        return Err(Error::InvalidAmount { amount });
    }
    Ok(())
}

/// Payment count used for division: null or non-positive counts become 1.
#[must_use]
pub fn effective_payment_count(number_of_payments: Option<i32>) -> i32 {
    match number_of_payments {
        Some(n) if n > 0 => n,
        _ => 1,
    }
}

/// The scheduled (non-overridden) amount of each payment: `fee / count`.
///
/// Every payment gets the same rounded amount, so the schedule may differ from
/// the fee by a few cents (10,000 over three payments sums to 9,999.99).
#[must_use]
pub fn scheduled_payment_amount(fee: Decimal, number_of_payments: Option<i32>) -> Decimal {
    round_money(fee / Decimal::from(effective_payment_count(number_of_payments)))
}

/// Result of the AGCI formula for one payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgciBreakdown {
    /// Amount the formula was applied to
    pub payment_amount: Decimal,
    /// Referral fee taken off the top
    pub referral_fee_usd: Decimal,
    /// Gross commission income after the referral fee
    pub payment_gci: Decimal,
    /// House share of the GCI
    pub house_split_usd: Decimal,
    /// Agent GCI, the amount divided among brokers
    pub agci: Decimal,
}

/// Computes referral fee, GCI, house split and AGCI for a payment amount.
///
/// ```text
/// referral = amount * referral% / 100
/// gci      = amount - referral
/// house    = house% / 100 * gci
/// agci     = gci - house
/// ```
///
/// Missing percentages count as zero.
#[must_use]
pub fn apply_agci_formula(
    payment_amount: Decimal,
    referral_fee_percent: Option<Decimal>,
    house_percent: Option<Decimal>,
) -> AgciBreakdown {
    let referral_fee_usd = payment_amount * fraction(percent_or_zero(referral_fee_percent));
    let payment_gci = payment_amount - referral_fee_usd;
    let house_split_usd = fraction(percent_or_zero(house_percent)) * payment_gci;
    let agci = payment_gci - house_split_usd;

    AgciBreakdown {
        payment_amount,
        referral_fee_usd: round_money(referral_fee_usd),
        payment_gci: round_money(payment_gci),
        house_split_usd: round_money(house_split_usd),
        agci: round_money(agci),
    }
}

/// How AGCI is divided into the origination, site and deal categories.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryPolicy {
    /// Each category gets `weight / sum_of_weights` of AGCI; subtotals always add
    /// up to AGCI. With all weights zero, AGCI is split evenly three ways.
    #[default]
    Normalized,
    /// Each category gets `weight / 100` of AGCI independently, so subtotals only
    /// add up to AGCI when the weights sum to 100.
    DealWeighted,
}

/// The three categories a payment's AGCI is divided into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitCategory {
    /// Origination
    Origination,
    /// Site
    Site,
    /// Deal
    Deal,
}

impl SplitCategory {
    /// Every category, in column order.
    pub const ALL: [Self; 3] = [Self::Origination, Self::Site, Self::Deal];
}

/// The deal's three category weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CategoryWeights {
    /// Origination weight (0-100)
    pub origination: Decimal,
    /// Site weight (0-100)
    pub site: Decimal,
    /// Deal weight (0-100)
    pub deal: Decimal,
}

impl CategoryWeights {
    /// Reads the weights from a deal, treating nulls as zero.
    #[must_use]
    pub fn from_deal(deal: &deal::Model) -> Self {
        Self {
            origination: percent_or_zero(deal.origination_percent),
            site: percent_or_zero(deal.site_percent),
            deal: percent_or_zero(deal.deal_percent),
        }
    }

    /// Sum of the three weights.
    #[must_use]
    pub fn sum(&self) -> Decimal {
        self.origination + self.site + self.deal
    }

    /// True when the weights add up to exactly 100.
    #[must_use]
    pub fn is_balanced(&self) -> bool {
        self.sum() == Decimal::ONE_HUNDRED
    }
}

/// AGCI divided into the three categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CategoryAmounts {
    /// Origination dollars
    pub origination: Decimal,
    /// Site dollars
    pub site: Decimal,
    /// Deal dollars
    pub deal: Decimal,
}

impl CategoryAmounts {
    /// Sum of the three category amounts.
    #[must_use]
    pub fn total(&self) -> Decimal {
        self.origination + self.site + self.deal
    }

    /// Dollars of one category.
    #[must_use]
    pub const fn get(&self, category: SplitCategory) -> Decimal {
        match category {
            SplitCategory::Origination => self.origination,
            SplitCategory::Site => self.site,
            SplitCategory::Deal => self.deal,
        }
    }
}

/// Splits a payment's AGCI into category subtotals under the given policy.
///
/// Under [`CategoryPolicy::Normalized`] the rounding residue is added to the
/// heaviest category (the first one on a tie), so the subtotals sum exactly to
/// `agci`.
#[must_use]
pub fn decompose_categories(
    agci: Decimal,
    weights: &CategoryWeights,
    policy: CategoryPolicy,
) -> CategoryAmounts {
    match policy {
        CategoryPolicy::DealWeighted => CategoryAmounts {
            origination: round_money(fraction(weights.origination) * agci),
            site: round_money(fraction(weights.site) * agci),
            deal: round_money(fraction(weights.deal) * agci),
        },
        CategoryPolicy::Normalized => {
            let sum = weights.sum();
            let even = Decimal::ONE;
            let (o, s, d) = if sum.is_zero() {
                (even, even, even)
            } else {
                (weights.origination, weights.site, weights.deal)
            };
            let total_weight = o + s + d;

            let mut parts = [
                round_money(o / total_weight * agci),
                round_money(s / total_weight * agci),
                round_money(d / total_weight * agci),
            ];
            let residue = agci - parts.iter().copied().sum::<Decimal>();
            if !residue.is_zero() {
                let heaviest = heaviest_index([o, s, d]);
                parts[heaviest] += residue;
            }

            CategoryAmounts {
                origination: parts[0],
                site: parts[1],
                deal: parts[2],
            }
        }
    }
}

fn heaviest_index(weights: [Decimal; 3]) -> usize {
    let mut best = 0;
    for (i, w) in weights.iter().enumerate().skip(1) {
        if *w > weights[best] {
            best = i;
        }
    }
    best
}

/// A broker's share of each category, as percentages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrokerPercents {
    /// Share of origination (0-100)
    pub origination: Decimal,
    /// Share of site (0-100)
    pub site: Decimal,
    /// Share of deal (0-100)
    pub deal: Decimal,
}

impl BrokerPercents {
    /// Share of one category.
    #[must_use]
    pub const fn get(&self, category: SplitCategory) -> Decimal {
        match category {
            SplitCategory::Origination => self.origination,
            SplitCategory::Site => self.site,
            SplitCategory::Deal => self.deal,
        }
    }
}

impl From<&commission_split::Model> for BrokerPercents {
    fn from(split: &commission_split::Model) -> Self {
        Self {
            origination: split.split_origination_percent,
            site: split.split_site_percent,
            deal: split.split_deal_percent,
        }
    }
}

/// One broker's percentages on a deal, keyed by broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrokerShare {
    /// The broker
    pub broker_id: i64,
    /// The broker's category percentages
    pub percents: BrokerPercents,
}

impl From<&commission_split::Model> for BrokerShare {
    fn from(split: &commission_split::Model) -> Self {
        Self {
            broker_id: split.broker_id,
            percents: BrokerPercents::from(split),
        }
    }
}

/// A broker's dollar share of one payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrokerSplitAmounts {
    /// Origination dollars
    pub origination_usd: Decimal,
    /// Site dollars
    pub site_usd: Decimal,
    /// Deal dollars
    pub deal_usd: Decimal,
    /// Sum of the three
    pub total: Decimal,
}

impl BrokerSplitAmounts {
    const fn get(&self, category: SplitCategory) -> Decimal {
        match category {
            SplitCategory::Origination => self.origination_usd,
            SplitCategory::Site => self.site_usd,
            SplitCategory::Deal => self.deal_usd,
        }
    }

    fn get_mut(&mut self, category: SplitCategory) -> &mut Decimal {
        match category {
            SplitCategory::Origination => &mut self.origination_usd,
            SplitCategory::Site => &mut self.site_usd,
            SplitCategory::Deal => &mut self.deal_usd,
        }
    }
}

/// Applies a broker's percentages to the category subtotals of one payment.
#[must_use]
pub fn compute_broker_split(
    categories: &CategoryAmounts,
    percents: &BrokerPercents,
) -> BrokerSplitAmounts {
    let origination_usd = round_money(categories.origination * fraction(percents.origination));
    let site_usd = round_money(categories.site * fraction(percents.site));
    let deal_usd = round_money(categories.deal * fraction(percents.deal));

    BrokerSplitAmounts {
        origination_usd,
        site_usd,
        deal_usd,
        total: origination_usd + site_usd + deal_usd,
    }
}

/// Computes every broker's share of one payment, in the order of `brokers`.
///
/// Each row follows [`compute_broker_split`]. When the brokers' percentages for
/// a category add up to 100, the cent left over by rounding goes to the broker
/// with the largest share of that category (lowest broker id on a tie), so the
/// rows sum exactly to the category amount.
#[must_use]
pub fn compute_broker_splits(
    categories: &CategoryAmounts,
    brokers: &[BrokerShare],
) -> Vec<BrokerSplitAmounts> {
    let mut amounts: Vec<BrokerSplitAmounts> = brokers
        .iter()
        .map(|b| compute_broker_split(categories, &b.percents))
        .collect();

    for category in SplitCategory::ALL {
        let percent_total: Decimal = brokers.iter().map(|b| b.percents.get(category)).sum();
        // Stored percentages may carry float noise
        if percent_total.round_dp(6) != Decimal::ONE_HUNDRED {
            continue;
        }
        let Some(holder) = residue_holder(brokers, category) else {
            continue;
        };
        let allocated: Decimal = amounts.iter().map(|a| a.get(category)).sum();
        let residue = categories.get(category) - allocated;
        if !residue.is_zero() {
            *amounts[holder].get_mut(category) += residue;
        }
    }

    for row in &mut amounts {
        row.total = row.origination_usd + row.site_usd + row.deal_usd;
    }
    amounts
}

fn residue_holder(brokers: &[BrokerShare], category: SplitCategory) -> Option<usize> {
    brokers
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| {
            a.percents
                .get(category)
                .cmp(&b.percents.get(category))
                .then(b.broker_id.cmp(&a.broker_id))
        })
        .map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn weights(o: Decimal, s: Decimal, d: Decimal) -> CategoryWeights {
        CategoryWeights {
            origination: o,
            site: s,
            deal: d,
        }
    }

    #[test]
    fn test_agci_formula_reference_values() {
        let result = apply_agci_formula(dec!(9810), Some(dec!(50)), Some(dec!(45)));
        assert_eq!(result.referral_fee_usd, dec!(4905));
        assert_eq!(result.payment_gci, dec!(4905));
        assert_eq!(result.house_split_usd, dec!(2207.25));
        assert_eq!(result.agci, dec!(2697.75));
    }

    #[test]
    fn test_agci_formula_missing_percents_are_zero() {
        let result = apply_agci_formula(dec!(1200), None, None);
        assert_eq!(result.referral_fee_usd, Decimal::ZERO);
        assert_eq!(result.house_split_usd, Decimal::ZERO);
        assert_eq!(result.agci, dec!(1200));
    }

    #[test]
    fn test_agci_formula_matches_closed_form() {
        // agci = (amount - amount * r / 100) * (1 - h / 100)
        for (amount, r, h) in [
            (dec!(5000), dec!(0), dec!(50)),
            (dec!(12345.67), dec!(25), dec!(30)),
            (dec!(0), dec!(10), dec!(10)),
            (dec!(800), dec!(100), dec!(0)),
        ] {
            let expected = round_money(
                (amount - amount * r / dec!(100)) * (Decimal::ONE - h / dec!(100)),
            );
            assert_eq!(apply_agci_formula(amount, Some(r), Some(h)).agci, expected);
        }
    }

    #[test]
    fn test_normalized_sums_to_agci() {
        let amounts = decompose_categories(
            dec!(2500),
            &weights(dec!(33.33), dec!(33.33), dec!(33.33)),
            CategoryPolicy::Normalized,
        );
        assert_eq!(amounts.total(), dec!(2500));
        assert_eq!(amounts.site, dec!(833.33));
        assert_eq!(amounts.deal, dec!(833.33));
        assert_eq!(amounts.origination, dec!(833.34));
    }

    #[test]
    fn test_normalized_unbalanced_weights_still_sum_to_agci() {
        let amounts = decompose_categories(
            dec!(1000.01),
            &weights(dec!(20), dec!(30), dec!(40)),
            CategoryPolicy::Normalized,
        );
        assert_eq!(amounts.total(), dec!(1000.01));
        assert_eq!(amounts.origination, dec!(222.22));
        assert_eq!(amounts.site, dec!(333.34));
    }

    #[test]
    fn test_normalized_zero_weights_split_evenly() {
        let amounts = decompose_categories(
            dec!(300),
            &weights(Decimal::ZERO, Decimal::ZERO, Decimal::ZERO),
            CategoryPolicy::Normalized,
        );
        assert_eq!(amounts.origination, dec!(100));
        assert_eq!(amounts.site, dec!(100));
        assert_eq!(amounts.deal, dec!(100));
    }

    #[test]
    fn test_deal_weighted_does_not_normalize() {
        let amounts = decompose_categories(
            dec!(1000),
            &weights(dec!(20), dec!(30), dec!(40)),
            CategoryPolicy::DealWeighted,
        );
        assert_eq!(amounts.origination, dec!(200));
        assert_eq!(amounts.site, dec!(300));
        assert_eq!(amounts.deal, dec!(400));
        assert_eq!(amounts.total(), dec!(900));
    }

    #[test]
    fn test_broker_split_single_broker_takes_everything() {
        let categories = CategoryAmounts {
            origination: dec!(833.34),
            site: dec!(833.33),
            deal: dec!(833.33),
        };
        let split = compute_broker_split(
            &categories,
            &BrokerPercents {
                origination: dec!(100),
                site: dec!(100),
                deal: dec!(100),
            },
        );
        assert_eq!(split.total, dec!(2500));
        assert_eq!(
            split.total,
            split.origination_usd + split.site_usd + split.deal_usd
        );
    }

    fn share(broker_id: i64, o: Decimal, s: Decimal, d: Decimal) -> BrokerShare {
        BrokerShare {
            broker_id,
            percents: BrokerPercents {
                origination: o,
                site: s,
                deal: d,
            },
        }
    }

    #[test]
    fn test_broker_splits_reconcile_to_agci() {
        let categories = decompose_categories(
            dec!(2697.75),
            &weights(dec!(50), dec!(25), dec!(25)),
            CategoryPolicy::Normalized,
        );
        let rows = compute_broker_splits(
            &categories,
            &[
                share(1, dec!(60), dec!(50), dec!(0)),
                share(2, dec!(40), dec!(50), dec!(100)),
            ],
        );
        let total: Decimal = rows.iter().map(|r| r.total).sum();
        assert_eq!(total, dec!(2697.75));
    }

    #[test]
    fn test_even_brokers_leave_no_extra_cent() {
        let categories = decompose_categories(
            dec!(2500),
            &weights(dec!(33.33), dec!(33.33), dec!(33.33)),
            CategoryPolicy::Normalized,
        );
        let rows = compute_broker_splits(
            &categories,
            &[
                share(2, dec!(50), dec!(50), dec!(50)),
                share(1, dec!(50), dec!(50), dec!(50)),
            ],
        );

        // Broker 1 wins the tie and absorbs the residue on site and deal
        assert_eq!(rows[1].origination_usd, dec!(416.67));
        assert_eq!(rows[1].site_usd, dec!(416.66));
        assert_eq!(rows[1].deal_usd, dec!(416.66));
        assert_eq!(rows[1].total, dec!(1249.99));
        assert_eq!(rows[0].total, dec!(1250.01));
        assert_eq!(rows[0].total + rows[1].total, dec!(2500));
    }

    #[test]
    fn test_residue_goes_to_largest_share() {
        let categories = CategoryAmounts {
            origination: dec!(100),
            site: dec!(0),
            deal: dec!(0),
        };
        let rows = compute_broker_splits(
            &categories,
            &[
                share(1, dec!(33.33), dec!(0), dec!(0)),
                share(2, dec!(33.34), dec!(0), dec!(0)),
                share(3, dec!(33.33), dec!(0), dec!(0)),
            ],
        );
        assert_eq!(rows[0].origination_usd, dec!(33.33));
        assert_eq!(rows[1].origination_usd, dec!(33.34));
        assert_eq!(rows[2].origination_usd, dec!(33.33));

        let categories = CategoryAmounts {
            origination: dec!(10),
            site: dec!(0),
            deal: dec!(0),
        };
        let rows = compute_broker_splits(
            &categories,
            &[
                share(1, dec!(33.33), dec!(0), dec!(0)),
                share(2, dec!(33.34), dec!(0), dec!(0)),
                share(3, dec!(33.33), dec!(0), dec!(0)),
            ],
        );
        // 3.333 + 3.334 + 3.333 rounds to 3.33 + 3.33 + 3.33
        assert_eq!(rows[1].origination_usd, dec!(3.34));
        assert_eq!(rows.iter().map(|r| r.total).sum::<Decimal>(), dec!(10));
    }

    #[test]
    fn test_incomplete_assignment_keeps_plain_formula() {
        let categories = CategoryAmounts {
            origination: dec!(833.34),
            site: dec!(833.33),
            deal: dec!(833.33),
        };
        let rows = compute_broker_splits(&categories, &[share(1, dec!(50), dec!(50), dec!(50))]);
        assert_eq!(
            rows[0],
            compute_broker_split(&categories, &share(1, dec!(50), dec!(50), dec!(50)).percents)
        );
        assert_eq!(rows[0].total, dec!(1250.01));
    }

    #[test]
    fn test_deal_weighted_brokers_reconcile_to_category_total() {
        let categories = decompose_categories(
            dec!(2999.99),
            &weights(dec!(20), dec!(30), dec!(40)),
            CategoryPolicy::DealWeighted,
        );
        let rows = compute_broker_splits(
            &categories,
            &[
                share(4, dec!(60), dec!(50), dec!(25)),
                share(9, dec!(40), dec!(50), dec!(75)),
            ],
        );
        let total: Decimal = rows.iter().map(|r| r.total).sum();
        assert_eq!(total, categories.total());
        assert!(categories.total() < dec!(2999.99));
    }

    #[test]
    fn test_effective_payment_count_guards_division() {
        assert_eq!(effective_payment_count(None), 1);
        assert_eq!(effective_payment_count(Some(0)), 1);
        assert_eq!(effective_payment_count(Some(-3)), 1);
        assert_eq!(effective_payment_count(Some(4)), 4);
        assert_eq!(scheduled_payment_amount(dec!(10000), Some(0)), dec!(10000));
        assert_eq!(scheduled_payment_amount(dec!(10000), Some(3)), dec!(3333.33));
    }

    #[test]
    fn test_schedule_keeps_uniform_amounts() {
        let amount = scheduled_payment_amount(dec!(10000), Some(3));
        let schedule_total: Decimal = std::iter::repeat_n(amount, 3).sum();
        assert_eq!(schedule_total, dec!(9999.99));
        assert_eq!(
            scheduled_payment_amount(dec!(10000), Some(4)) * dec!(4),
            dec!(10000)
        );
    }

    #[test]
    fn test_percent_validation() {
        assert!(ensure_percent("house_percent", dec!(0)).is_ok());
        assert!(ensure_percent("house_percent", dec!(100)).is_ok());
        assert!(matches!(
            ensure_percent("house_percent", dec!(100.01)),
            Err(Error::InvalidPercent {
                field: "house_percent",
                ..
            })
        ));
        assert!(ensure_percent("house_percent", dec!(-1)).is_err());
        assert!(ensure_optional_percent("site_percent", None).is_ok());
    }

    #[test]
    fn test_amount_validation() {
        assert!(ensure_amount(dec!(0)).is_ok());
        assert!(ensure_amount(dec!(10.5)).is_ok());
        assert!(matches!(
            ensure_amount(dec!(-0.01)),
            Err(Error::InvalidAmount { .. })
        ));
    }
}
