use super::transaction::TransactionStatus;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub total: usize,
    pub page: usize,
    pub limit: usize,
    pub pages: usize,
}

impl Pagination {
    pub fn new(total: usize, page: usize, limit: usize) -> Self {
        Self {
            total,
            page,
            limit,
            pages: total.div_ceil(limit.max(1)),
        }
    }

    /// Index of the first item on this page.
    pub fn offset(&self) -> usize {
        self.page.saturating_sub(1).saturating_mul(self.limit)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSummary {
    pub status: TransactionStatus,
    pub count: usize,
    pub amount: Decimal,
}

/// Completed transactions grouped by payment method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodSummary {
    pub method_id: Uuid,
    pub method_name: String,
    pub method_code: String,
    pub count: usize,
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailySummary {
    pub day: NaiveDate,
    pub count: usize,
    pub completed: usize,
    /// Sum of completed amounts only.
    pub amount: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Period {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentStats {
    pub transactions_by_status: Vec<StatusSummary>,
    pub payments_by_method: Vec<MethodSummary>,
    pub transactions_by_day: Vec<DailySummary>,
    pub period: Period,
}
