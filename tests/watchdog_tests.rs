mod common;

use chrono::{Duration as ChronoDuration, Utc};
use common::{Harness, cash};
use plaquepay::domain::audit::AuditEvent;
use plaquepay::domain::payment::PaymentStatus;
use plaquepay::error::PaymentError;
use rust_decimal_macros::dec;
use serde_json::json;
use std::time::Duration;
use tokio::sync::watch;

const MAX_AGE: Duration = Duration::from_secs(180);

#[tokio::test]
async fn test_fresh_and_terminal_payments_not_flagged() {
    let h = Harness::new();
    h.pending_seamless(dec!(75), "REF-1").await;
    h.pending_seamless(dec!(75), "REF-2").await;
    h.engine
        .handle_result(&json!({"referenceNumber": "REF-2", "transactionStatus": "SUCCESS"}).to_string())
        .await
        .unwrap();

    let now = h.engine.watchdog().check_overdue(MAX_AGE).await.unwrap();
    assert!(now.is_empty());

    let later = Utc::now() + ChronoDuration::minutes(5);
    let overdue = h.engine.watchdog().check_overdue_as_of(later, MAX_AGE).await.unwrap();
    assert_eq!(overdue.len(), 1);
    assert_eq!(overdue[0].reference_number.as_deref(), Some("REF-1"));
}

#[tokio::test]
async fn test_overdue_cash_payment_flagged() {
    let h = Harness::new();
    let payment = h.engine.create_cash_payment(cash(dec!(60))).await.unwrap().payment;

    let later = Utc::now() + ChronoDuration::hours(1);
    let overdue = h.engine.watchdog().check_overdue_as_of(later, MAX_AGE).await.unwrap();
    assert_eq!(overdue.len(), 1);

    let trail = h.engine.audit_trail(payment.id).await.unwrap();
    assert!(trail.iter().any(|e| e.event == AuditEvent::MarkedForVerification));
    assert_eq!(h.engine.get(payment.id).await.unwrap().status, PaymentStatus::Pending);
}

#[tokio::test]
async fn test_manual_flag_messages() {
    let h = Harness::new();
    h.pending_seamless(dec!(75), "REF-M").await;

    let first = h.engine.flag_for_verification("REF-M", None).await.unwrap();
    assert!(first.created);
    assert_eq!(first.message, "Payment marked as to-be-verified.");
    assert!(first.flag.reason.contains("REF-M"));

    let second = h
        .engine
        .flag_for_verification("REF-M", Some("customer called"))
        .await
        .unwrap();
    assert!(!second.created);
    assert_eq!(second.message, "Payment was already marked as to-be-verified.");
    assert_eq!(second.flag, first.flag);
    assert_eq!(h.notifier.sent(), 1);

    // A later sweep reuses the manual flag.
    let later = Utc::now() + ChronoDuration::hours(1);
    h.engine.watchdog().check_overdue_as_of(later, MAX_AGE).await.unwrap();
    assert_eq!(h.notifier.sent(), 1);
}

#[tokio::test]
async fn test_manual_flag_requires_known_reference() {
    let h = Harness::new();
    assert!(matches!(
        h.engine.flag_for_verification("  ", None).await,
        Err(PaymentError::ValidationError(_))
    ));
    assert!(matches!(
        h.engine.flag_for_verification("REF-404", None).await,
        Err(PaymentError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_notification_failure_keeps_flag() {
    let h = Harness::new();
    let payment = h.pending_seamless(dec!(75), "REF-N").await;
    h.notifier.fail();

    let receipt = h.engine.flag_for_verification("REF-N", None).await.unwrap();
    assert!(receipt.created);
    assert_eq!(h.engine.watchdog().flags().await.unwrap().len(), 1);

    let trail = h.engine.audit_trail(payment.id).await.unwrap();
    assert_eq!(trail.last().unwrap().event, AuditEvent::NotificationFailed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_sweeps_flag_once() {
    let h = Harness::new();
    for i in 0..10 {
        h.pending_seamless(dec!(75), &format!("REF-{}", i)).await;
    }
    let later = Utc::now() + ChronoDuration::hours(1);

    let sweeps: Vec<_> = (0..4)
        .map(|_| {
            let watchdog = h.engine.watchdog().clone();
            tokio::spawn(async move { watchdog.check_overdue_as_of(later, MAX_AGE).await })
        })
        .collect();
    for sweep in sweeps {
        assert_eq!(sweep.await.unwrap().unwrap().len(), 10);
    }

    assert_eq!(h.engine.watchdog().flags().await.unwrap().len(), 10);
    assert_eq!(h.notifier.sent(), 10);
}

#[tokio::test]
async fn test_background_sweep_stops_on_shutdown() {
    let h = Harness::new();
    h.pending_seamless(dec!(75), "REF-BG").await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    let (stop, shutdown) = watch::channel(false);
    let task = h
        .engine
        .watchdog()
        .clone()
        .spawn(Duration::from_millis(1), Duration::from_millis(25), shutdown);

    tokio::time::sleep(Duration::from_millis(150)).await;
    stop.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(h.engine.watchdog().flags().await.unwrap().len(), 1);
    assert_eq!(h.notifier.sent(), 1);
}

#[tokio::test]
async fn test_unrepresentable_max_age_is_an_error() {
    let h = Harness::new();
    h.pending_seamless(dec!(75), "REF-AGE").await;

    let result = h
        .engine
        .watchdog()
        .check_overdue(Duration::from_secs(10_000_000_000_000))
        .await;
    assert!(matches!(result, Err(PaymentError::ConfigError(_))));
    assert!(h.engine.watchdog().flags().await.unwrap().is_empty());
}
