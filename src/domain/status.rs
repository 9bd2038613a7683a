//! Classification of provider-native status strings into canonical states.
//!
//! Onboarding a provider whose vocabulary is not covered here means adding
//! words to this table; orchestration code never inspects native strings.

use super::transaction::TransactionStatus;

const CLASSIFICATION: &[(TransactionStatus, &[&str])] = &[
    (
        TransactionStatus::Completed,
        &["COMPLETED", "APPROVED", "SUCCESS", "SUCCESSFUL"],
    ),
    (
        TransactionStatus::Pending,
        &["PENDING", "CREATED", "INITIALIZED"],
    ),
    (
        TransactionStatus::Processing,
        &["PROCESSING", "IN_PROGRESS", "WAITING"],
    ),
    (
        TransactionStatus::Failed,
        &["FAILED", "DECLINED", "REJECTED", "ERROR"],
    ),
    (TransactionStatus::Refunded, &["REFUNDED", "REVERSED", "VOIDED"]),
    (TransactionStatus::Cancelled, &["CANCELLED", "CANCELED"]),
    (TransactionStatus::Expired, &["EXPIRED", "TIMEOUT"]),
];

/// Looks a native status up in the table, ignoring case and surrounding whitespace.
pub fn classify(native: &str) -> Option<TransactionStatus> {
    let native = native.trim();
    CLASSIFICATION
        .iter()
        .find(|(_, words)| words.iter().any(|w| w.eq_ignore_ascii_case(native)))
        .map(|(status, _)| *status)
}

/// Maps a native status to a canonical one, defaulting to PENDING.
///
/// Unrecognized words are logged so that unmapped terminal statuses show up
/// in operations instead of silently parking transactions.
pub fn normalize(native: &str) -> TransactionStatus {
    classify(native).unwrap_or_else(|| {
        tracing::warn!(native_status = native, "unrecognized provider status, treating as PENDING");
        TransactionStatus::Pending
    })
}
