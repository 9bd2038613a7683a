mod common;

use chrono::{Duration, Utc};
use common::{Harness, harness, reference_for};
use paygate::domain::transaction::{ProcessPayment, TransactionStatus};
use paygate::error::PaymentError;
use rstest::rstest;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use uuid::Uuid;

#[tokio::test]
async fn test_create_applies_method_surcharge() {
    let h = harness().await;
    let tx = h
        .orchestrator
        .create_transaction(h.request(7, dec!(50000), &h.card))
        .await
        .unwrap();

    assert_eq!(tx.amount.value(), dec!(51500));
    assert_eq!(tx.base_amount.value(), dec!(50000));
    assert_eq!(tx.currency, "COP");
    assert_eq!(tx.status, TransactionStatus::Pending);
    assert_eq!(tx.gateway_reference, Some(reference_for(tx.id)));
    assert!(tx.payment_url.is_some());
    assert_eq!(tx.expires_at - tx.created_at, Duration::hours(24));
    assert_eq!(h.recorder.audit_count("payment.transaction.create"), 1);
}

#[rstest]
#[case(dec!(0))]
#[case(dec!(-5))]
#[tokio::test]
async fn test_create_rejects_non_positive_amount(#[case] amount: Decimal) {
    let h = harness().await;
    let err = h
        .orchestrator
        .create_transaction(h.request(7, amount, &h.pse))
        .await
        .unwrap_err();

    assert!(matches!(err, PaymentError::Validation(_)));
    let page = h.orchestrator.get_user_transactions(7, 1, 10, None).await.unwrap();
    assert_eq!(page.pagination.total, 0);
    assert_eq!(h.script.calls("create"), 0);
}

#[rstest]
#[case(dec!(999.99))]
#[case(dec!(10000000.01))]
#[tokio::test]
async fn test_create_enforces_method_bounds(#[case] amount: Decimal) {
    let h = harness().await;
    let err = h
        .orchestrator
        .create_transaction(h.request(7, amount, &h.card))
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::Validation(_)));
}

#[tokio::test]
async fn test_create_rejects_unknown_gateway_and_method() {
    let h = harness().await;

    let mut request = h.request(7, dec!(5000), &h.pse);
    request.gateway_id = Uuid::new_v4();
    let err = h.orchestrator.create_transaction(request).await.unwrap_err();
    assert!(matches!(err, PaymentError::Configuration(_)));

    let mut request = h.request(7, dec!(5000), &h.pse);
    request.method_id = Uuid::new_v4();
    let err = h.orchestrator.create_transaction(request).await.unwrap_err();
    assert!(matches!(err, PaymentError::Configuration(_)));
}

#[tokio::test]
async fn test_create_rejects_malformed_currency() {
    let h = harness().await;
    let mut request = h.request(7, dec!(5000), &h.pse);
    request.currency = Some("PESOS".into());
    let err = h.orchestrator.create_transaction(request).await.unwrap_err();
    assert!(matches!(err, PaymentError::Validation(_)));
}

#[tokio::test]
async fn test_create_keeps_pending_record_when_provider_fails() {
    let h = harness().await;
    h.script.fail_create.store(true, Ordering::SeqCst);

    let err = h
        .orchestrator
        .create_transaction(h.request(7, dec!(5000), &h.pse))
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::Gateway(_)));

    let page = h.orchestrator.get_user_transactions(7, 1, 10, None).await.unwrap();
    assert_eq!(page.data.len(), 1);
    let tx = &page.data[0];
    assert_eq!(tx.status, TransactionStatus::Pending);
    assert!(tx.gateway_reference.is_none());
    assert!(tx.error_message.as_deref().unwrap().contains("connection reset"));
}

#[tokio::test]
async fn test_verify_approved_completes_and_settles_invoice() {
    let h = harness().await;
    let tx = h.completed(7, dec!(50000)).await;

    assert_eq!(tx.status, TransactionStatus::Completed);
    assert!(tx.completed_at.is_some());
    assert_eq!(tx.receipt_id.as_deref(), Some("REC-1"));
    assert_eq!(*h.recorder.paid.lock().unwrap(), vec![(1007, dec!(50000))]);
    assert_eq!(h.recorder.notification_count("Payment completed"), 1);
    assert_eq!(h.recorder.audit_count("payment.transaction.completed"), 1);
}

#[tokio::test]
async fn test_repeated_verification_runs_side_effects_once() {
    let h = harness().await;
    let tx = h.completed(7, dec!(50000)).await;

    h.script.set_verify_status("APPROVED");
    let again = h.orchestrator.verify_transaction(tx.id).await.unwrap();

    assert_eq!(again.status, TransactionStatus::Completed);
    assert_eq!(again.completed_at, tx.completed_at);
    assert_eq!(h.recorder.receipt_count(tx.id), 1);
    assert_eq!(h.recorder.notification_count("Payment completed"), 1);
    assert_eq!(h.recorder.audit_count("payment.transaction.completed"), 1);
    assert_eq!(h.recorder.paid.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_verify_declined_fails_transaction() {
    let h = harness().await;
    let tx = h.create(7, dec!(5000)).await;
    h.script.set_verify_status("DECLINED");

    let tx = h.orchestrator.verify_transaction(tx.id).await.unwrap();

    assert_eq!(tx.status, TransactionStatus::Failed);
    assert_eq!(h.recorder.notification_count("Payment failed"), 1);
    assert_eq!(h.recorder.audit_count("payment.transaction.failed"), 1);
    assert!(h.recorder.receipts.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_verify_unrecognized_status_stays_pending() {
    let h = harness().await;
    let tx = h.create(7, dec!(5000)).await;
    h.script.set_verify_status("SETTLING");

    let tx = h.orchestrator.verify_transaction(tx.id).await.unwrap();
    assert_eq!(tx.status, TransactionStatus::Pending);
}

#[tokio::test]
async fn test_verify_without_reference_is_rejected() {
    let h = harness().await;
    h.script.fail_create.store(true, Ordering::SeqCst);
    let _ = h
        .orchestrator
        .create_transaction(h.request(7, dec!(5000), &h.pse))
        .await;
    let page = h.orchestrator.get_user_transactions(7, 1, 10, None).await.unwrap();

    let err = h
        .orchestrator
        .verify_transaction(page.data[0].id)
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::Validation(_)));
    assert_eq!(h.script.calls("verify"), 0);
}

#[tokio::test]
async fn test_duplicate_webhook_runs_completion_once() {
    let h = harness().await;
    let tx = h.create(7, dec!(5000)).await;
    let (body, signature) = h.webhook(&reference_for(tx.id), "APPROVED");

    for _ in 0..2 {
        let ack = h
            .orchestrator
            .process_webhook("scripted", &body, &signature)
            .await
            .unwrap();
        assert!(ack.success);
        assert_eq!(ack.transaction_id, tx.id);
        assert_eq!(ack.status, TransactionStatus::Completed);
    }
    assert_eq!(h.recorder.receipt_count(tx.id), 1);
    assert_eq!(h.recorder.notification_count("Payment completed"), 1);

    let stored = h.orchestrator.transaction(tx.id).await.unwrap();
    h.orchestrator
        .process_webhook("scripted", &body, &signature)
        .await
        .unwrap();
    let redelivered = h.orchestrator.transaction(tx.id).await.unwrap();
    assert_eq!(redelivered.version, stored.version);
}

#[tokio::test]
async fn test_webhook_for_unknown_reference_is_not_found() {
    let h = harness().await;
    let (body, signature) = h.webhook("SCR-missing", "APPROVED");

    let err = h
        .orchestrator
        .process_webhook("scripted", &body, &signature)
        .await
        .unwrap_err();

    assert!(matches!(err, PaymentError::NotFound(_)));
    assert!(h.recorder.receipts.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_webhook_with_bad_signature_changes_nothing() {
    let h = harness().await;
    let tx = h.create(7, dec!(5000)).await;
    let (body, _) = h.webhook(&reference_for(tx.id), "APPROVED");

    let err = h
        .orchestrator
        .process_webhook("scripted", &body, "deadbeef")
        .await
        .unwrap_err();

    assert!(matches!(err, PaymentError::InvalidSignature));
    let stored = h.orchestrator.transaction(tx.id).await.unwrap();
    assert_eq!(stored.status, TransactionStatus::Pending);
}

#[tokio::test]
async fn test_webhook_rejects_unparseable_payload_and_unknown_provider() {
    let h = harness().await;
    let body = b"not json".to_vec();
    let signature =
        paygate::gateway::signature::hmac_sha256_hex(common::WEBHOOK_SECRET.as_bytes(), &body)
            .unwrap();
    let err = h
        .orchestrator
        .process_webhook("scripted", &body, &signature)
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::Validation(_)));

    let err = h
        .orchestrator
        .process_webhook("stripe", &body, &signature)
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::Configuration(_)));
}

#[tokio::test]
async fn test_late_pending_webhook_does_not_reopen_completed() {
    let h = harness().await;
    let tx = h.completed(7, dec!(5000)).await;
    let (body, signature) = h.webhook(&reference_for(tx.id), "PENDING");

    let ack = h
        .orchestrator
        .process_webhook("scripted", &body, &signature)
        .await
        .unwrap();

    assert_eq!(ack.status, TransactionStatus::Completed);
    let stored = h.orchestrator.transaction(tx.id).await.unwrap();
    let sent: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(stored.status, TransactionStatus::Completed);
    assert_eq!(stored.metadata["lastWebhook"], sent);
}

#[tokio::test]
async fn test_completion_resumes_after_receipt_failure() {
    let h = harness().await;
    let tx = h.create(9, dec!(5000)).await;
    h.script.set_verify_status("APPROVED");
    h.recorder.fail_receipts.store(true, Ordering::SeqCst);

    let err = h.orchestrator.verify_transaction(tx.id).await.unwrap_err();
    assert!(matches!(err, PaymentError::Storage(_)));
    let stored = h.orchestrator.transaction(tx.id).await.unwrap();
    assert_eq!(stored.status, TransactionStatus::Completed);
    assert!(stored.receipt_id.is_none());
    assert!(stored.owes_settlement());
    assert_eq!(h.recorder.notification_count("Payment completed"), 0);

    h.recorder.fail_receipts.store(false, Ordering::SeqCst);
    let tx = h.orchestrator.verify_transaction(tx.id).await.unwrap();
    assert_eq!(tx.receipt_id.as_deref(), Some("REC-1"));
    assert!(!tx.owes_settlement());
    assert_eq!(*h.recorder.paid.lock().unwrap(), vec![(1009, dec!(5000))]);
    assert_eq!(h.recorder.notification_count("Payment completed"), 1);
    assert_eq!(h.recorder.audit_count("payment.transaction.completed"), 1);

    h.orchestrator.verify_transaction(tx.id).await.unwrap();
    assert_eq!(h.recorder.receipt_count(tx.id), 1);
    assert_eq!(h.recorder.paid.lock().unwrap().len(), 1);
    assert_eq!(h.recorder.notification_count("Payment completed"), 1);
}

#[tokio::test]
async fn test_completion_resumes_on_webhook_after_invoice_failure() {
    let h = harness().await;
    let tx = h.create(7, dec!(5000)).await;
    h.script.set_verify_status("APPROVED");
    h.recorder.fail_invoices.store(true, Ordering::SeqCst);

    let err = h.orchestrator.verify_transaction(tx.id).await.unwrap_err();
    assert!(matches!(err, PaymentError::Storage(_)));
    assert!(h.recorder.paid.lock().unwrap().is_empty());
    assert_eq!(h.recorder.receipt_count(tx.id), 0);

    h.recorder.fail_invoices.store(false, Ordering::SeqCst);
    let (body, signature) = h.webhook(&reference_for(tx.id), "APPROVED");
    let ack = h
        .orchestrator
        .process_webhook("scripted", &body, &signature)
        .await
        .unwrap();

    assert_eq!(ack.status, TransactionStatus::Completed);
    assert_eq!(*h.recorder.paid.lock().unwrap(), vec![(1007, dec!(5000))]);
    assert_eq!(h.recorder.receipt_count(tx.id), 1);
    assert_eq!(h.recorder.notification_count("Payment completed"), 1);
}

#[tokio::test]
async fn test_refund_waits_for_unfinished_completion() {
    let h = harness().await;
    let tx = h.create(7, dec!(5000)).await;
    h.script.set_verify_status("APPROVED");
    h.recorder.fail_receipts.store(true, Ordering::SeqCst);
    h.orchestrator.verify_transaction(tx.id).await.unwrap_err();

    let err = h
        .orchestrator
        .refund_transaction(tx.id, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::Storage(_)));
    assert_eq!(h.script.calls("refund"), 0);

    h.recorder.fail_receipts.store(false, Ordering::SeqCst);
    let tx = h.orchestrator.refund_transaction(tx.id, None, None).await.unwrap();
    assert_eq!(tx.status, TransactionStatus::Refunded);
    assert_eq!(h.recorder.receipt_count(tx.id), 1);
    assert_eq!(h.script.calls("refund"), 1);
}

#[tokio::test]
async fn test_refund_reopens_invoice_once_ledger_recovers() {
    let h = harness().await;
    let tx = h.completed(7, dec!(5000)).await;
    h.recorder.fail_invoices.store(true, Ordering::SeqCst);

    let err = h
        .orchestrator
        .refund_transaction(tx.id, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::Storage(_)));
    let stored = h.orchestrator.transaction(tx.id).await.unwrap();
    assert_eq!(stored.status, TransactionStatus::Refunded);
    assert!(stored.refund.as_ref().unwrap().completed_at.is_some());
    assert!(h.recorder.unpaid.lock().unwrap().is_empty());
    assert_eq!(h.recorder.notification_count("Payment refunded"), 0);

    h.recorder.fail_invoices.store(false, Ordering::SeqCst);
    let tx = h.orchestrator.verify_transaction(tx.id).await.unwrap();
    assert_eq!(tx.status, TransactionStatus::Refunded);
    assert!(!tx.owes_settlement());
    assert_eq!(*h.recorder.unpaid.lock().unwrap(), vec![1007]);
    assert_eq!(h.recorder.notification_count("Payment refunded"), 1);
    assert_eq!(h.recorder.audit_count("payment.transaction.refunded"), 1);
    assert_eq!(h.script.calls("refund"), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_verify_and_webhook_issue_one_receipt() {
    let h = Arc::new(harness().await);
    let tx = h.create(7, dec!(5000)).await;
    h.script.set_verify_status("APPROVED");
    let (body, signature) = h.webhook(&reference_for(tx.id), "APPROVED");
    let id = tx.id;

    let mut handles = Vec::new();
    for i in 0..8 {
        let h: Arc<Harness> = h.clone();
        let (body, signature) = (body.clone(), signature.clone());
        handles.push(tokio::spawn(async move {
            if i % 2 == 0 {
                h.orchestrator.verify_transaction(id).await.map(|t| t.status)
            } else {
                h.orchestrator
                    .process_webhook("scripted", &body, &signature)
                    .await
                    .map(|ack| ack.status)
            }
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), TransactionStatus::Completed);
    }

    assert_eq!(h.recorder.receipt_count(id), 1);
    assert_eq!(h.recorder.notification_count("Payment completed"), 1);
    assert_eq!(h.recorder.audit_count("payment.transaction.completed"), 1);
}

#[tokio::test]
async fn test_process_with_token_completes_and_saves_instrument() {
    let h = harness().await;
    let tx = h
        .orchestrator
        .create_transaction(h.request(7, dec!(50000), &h.card))
        .await
        .unwrap();

    let tx = h
        .orchestrator
        .process_payment(ProcessPayment {
            transaction_id: tx.id,
            payment_data: json!({ "token": "tok_live_4242", "lastFour": "4242", "brand": "VISA", "installments": 1 }),
            save_payment_method: true,
        })
        .await
        .unwrap();

    assert_eq!(tx.status, TransactionStatus::Completed);
    assert_eq!(tx.attempts, 1);
    assert_eq!(tx.payment_data, json!({ "lastFour": "4242", "brand": "VISA", "installments": 1 }));
    let tokens = h.orchestrator.get_user_payment_tokens(7).await.unwrap();
    assert_eq!(tokens.len(), 1);
    assert_eq!(tokens[0].last_four.as_deref(), Some("4242"));
    assert_eq!(tokens[0].gateway.as_deref(), Some("scripted"));
}

#[tokio::test]
async fn test_process_rejection_is_recorded() {
    let h = harness().await;
    let tx = h.create(7, dec!(5000)).await;

    let err = h
        .orchestrator
        .process_payment(ProcessPayment {
            transaction_id: tx.id,
            payment_data: json!({}),
            save_payment_method: false,
        })
        .await
        .unwrap_err();

    assert!(matches!(err, PaymentError::Gateway(_)));
    let stored = h.orchestrator.transaction(tx.id).await.unwrap();
    assert_eq!(stored.status, TransactionStatus::Processing);
    assert_eq!(stored.error_code.as_deref(), Some("MISSING_TOKEN"));
}

#[tokio::test]
async fn test_process_requires_pending() {
    let h = harness().await;
    let tx = h.completed(7, dec!(5000)).await;

    let err = h
        .orchestrator
        .process_payment(ProcessPayment {
            transaction_id: tx.id,
            payment_data: json!({ "token": "tok" }),
            save_payment_method: false,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::Validation(_)));
    assert_eq!(h.script.calls("process"), 0);
}

#[tokio::test]
async fn test_refund_requires_completed() {
    let h = harness().await;
    let tx = h.create(7, dec!(5000)).await;

    let err = h
        .orchestrator
        .refund_transaction(tx.id, None, None)
        .await
        .unwrap_err();

    assert!(matches!(err, PaymentError::Validation(ref m) if m.contains("only COMPLETED")));
    assert_eq!(h.script.calls("refund"), 0);
}

#[tokio::test]
async fn test_refund_cannot_exceed_charged_amount() {
    let h = harness().await;
    let tx = h.completed(7, dec!(50000)).await;

    let err = h
        .orchestrator
        .refund_transaction(tx.id, Some(dec!(50000.01)), None)
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::Validation(_)));
}

#[tokio::test]
async fn test_partial_refund() {
    let h = harness().await;
    let tx = h.completed(7, dec!(50000)).await;

    let tx = h
        .orchestrator
        .refund_transaction(tx.id, Some(dec!(20000)), Some("Duplicate charge".into()))
        .await
        .unwrap();

    assert_eq!(tx.status, TransactionStatus::Refunded);
    let refund = tx.refund.unwrap();
    assert_eq!(refund.amount, dec!(20000));
    assert_eq!(refund.reason, "Duplicate charge");
    assert_eq!(refund.reference, Some(format!("RF-{}", reference_for(tx.id))));
    assert!(refund.completed_at.is_some());
    assert_eq!(*h.recorder.unpaid.lock().unwrap(), vec![1007]);
    assert_eq!(h.recorder.notification_count("Payment refunded"), 1);
    assert_eq!(h.recorder.audit_count("payment.transaction.refunded"), 1);
}

#[tokio::test]
async fn test_rejected_refund_can_be_retried() {
    let h = harness().await;
    let tx = h.completed(7, dec!(5000)).await;
    h.script.reject_refund.store(true, Ordering::SeqCst);

    let err = h
        .orchestrator
        .refund_transaction(tx.id, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::Gateway(_)));
    let stored = h.orchestrator.transaction(tx.id).await.unwrap();
    assert_eq!(stored.status, TransactionStatus::Completed);
    assert!(stored.refund.is_none());

    h.script.reject_refund.store(false, Ordering::SeqCst);
    let tx = h.orchestrator.refund_transaction(tx.id, None, None).await.unwrap();
    assert_eq!(tx.status, TransactionStatus::Refunded);
    assert_eq!(tx.refund.unwrap().amount, dec!(5000));
}

#[tokio::test]
async fn test_expiry_sweep_only_touches_stale_pending() {
    let h = harness().await;
    let first = h.create(7, dec!(5000)).await;
    let second = h.create(8, dec!(5000)).await;
    let done = h.completed(9, dec!(5000)).await;

    let later = Utc::now() + Duration::hours(25);
    assert_eq!(h.orchestrator.expire_stale_transactions(Utc::now()).await.unwrap(), 0);
    assert_eq!(h.orchestrator.expire_stale_transactions(later).await.unwrap(), 2);
    assert_eq!(h.orchestrator.expire_stale_transactions(later).await.unwrap(), 0);

    for id in [first.id, second.id] {
        let tx = h.orchestrator.transaction(id).await.unwrap();
        assert_eq!(tx.status, TransactionStatus::Expired);
    }
    let done = h.orchestrator.transaction(done.id).await.unwrap();
    assert_eq!(done.status, TransactionStatus::Completed);
}
