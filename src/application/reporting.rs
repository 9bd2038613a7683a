use super::orchestrator::PaymentOrchestrator;
use crate::domain::report::{
    DailySummary, MethodSummary, Page, Pagination, PaymentStats, Period, StatusSummary,
};
use crate::domain::transaction::{Transaction, TransactionStatus};
use crate::error::{PaymentError, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

impl PaymentOrchestrator {
    /// One page of a payer's transactions, newest first.
    pub async fn get_user_transactions(
        &self,
        payer_id: u64,
        page: usize,
        limit: usize,
        status: Option<TransactionStatus>,
    ) -> Result<Page<Transaction>> {
        if page == 0 || limit == 0 {
            return Err(PaymentError::Validation(
                "page and limit must be at least 1".into(),
            ));
        }
        let limit = limit.min(self.config.max_page_size);

        let mut rows: Vec<Transaction> = self
            .transactions
            .list_by_payer(payer_id)
            .await?
            .into_iter()
            .filter(|tx| status.is_none_or(|s| tx.status == s))
            .collect();
        rows.sort_by_key(|tx| Reverse(tx.created_at));

        let pagination = Pagination::new(rows.len(), page, limit);
        let data = rows
            .into_iter()
            .skip(pagination.offset())
            .take(limit)
            .collect();
        Ok(Page { data, pagination })
    }

    /// Aggregates over transactions created in `[from, to]`.
    ///
    /// `to` defaults to now and `from` to `to` minus the configured window.
    pub async fn get_payment_stats(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<PaymentStats> {
        let to = to.unwrap_or_else(Utc::now);
        let from = from.unwrap_or(to - self.config.stats_window());
        if from > to {
            return Err(PaymentError::Validation(format!(
                "report start {from} is after its end {to}"
            )));
        }
        let rows = self.transactions.list_created_between(from, to).await?;

        let transactions_by_status = TransactionStatus::ALL
            .into_iter()
            .filter_map(|status| {
                let (count, amount) = total(rows.iter().filter(|tx| tx.status == status));
                (count > 0).then_some(StatusSummary { status, count, amount })
            })
            .collect();

        let mut by_method: HashMap<Uuid, (usize, Decimal)> = HashMap::new();
        for tx in rows.iter().filter(|tx| tx.status == TransactionStatus::Completed) {
            let entry = by_method.entry(tx.method_id).or_default();
            entry.0 += 1;
            entry.1 += tx.amount.value();
        }
        let mut payments_by_method = Vec::with_capacity(by_method.len());
        for (method_id, (count, amount)) in by_method {
            let method = self.methods.get(method_id).await?;
            payments_by_method.push(MethodSummary {
                method_id,
                method_name: method.as_ref().map_or_else(|| "Unknown".into(), |m| m.name.clone()),
                method_code: method.map_or_else(|| "unknown".into(), |m| m.code),
                count,
                amount,
            });
        }
        payments_by_method.sort_by(|a, b| b.amount.cmp(&a.amount).then(a.method_code.cmp(&b.method_code)));

        let mut by_day: BTreeMap<NaiveDate, DailySummary> = BTreeMap::new();
        for tx in &rows {
            let day = tx.created_at.date_naive();
            let summary = by_day.entry(day).or_insert(DailySummary {
                day,
                count: 0,
                completed: 0,
                amount: Decimal::ZERO,
            });
            summary.count += 1;
            if tx.status == TransactionStatus::Completed {
                summary.completed += 1;
                summary.amount += tx.amount.value();
            }
        }

        Ok(PaymentStats {
            transactions_by_status,
            payments_by_method,
            transactions_by_day: by_day.into_values().collect(),
            period: Period { from, to },
        })
    }
}

fn total<'a>(rows: impl Iterator<Item = &'a Transaction>) -> (usize, Decimal) {
    rows.fold((0, Decimal::ZERO), |(count, sum), tx| {
        (count + 1, sum + tx.amount.value())
    })
}
