//! Core business logic - framework-agnostic commission calculations and the
//! change-propagation engine that keeps payments and split rows consistent.

/// Pure money arithmetic: AGCI, category decomposition, broker splits
pub mod calculator;
/// Broker commission split management
pub mod commission_split;
/// Deal lifecycle and commission terms
pub mod deal;
/// Payment schedule reads and per-payment edits
pub mod payment;
/// Payment split queries and payout tracking
pub mod payment_split;
/// Cascades from deal, payment and commission split changes
pub mod propagation;
/// Bulk rebuild and drift detection for payment splits
pub mod regenerate;
/// Read-side overviews and formatting
pub mod report;
