mod common;

use common::{Harness, support};
use plaquepay::config::GatewayConfig;
use plaquepay::domain::audit::AuditEvent;
use plaquepay::domain::payment::PaymentStatus;
use plaquepay::error::PaymentError;
use plaquepay::infrastructure::replay_gateway::GatewayOperation;
use rust_decimal_macros::dec;
use std::time::Duration;

#[tokio::test]
async fn test_transport_failure_at_creation_marks_error() {
    let h = Harness::new();
    h.gateway.fail_next(GatewayOperation::CreateTransaction);

    let result = h.engine.create_seamless_payment(support(dec!(75))).await;
    assert!(matches!(result, Err(PaymentError::GatewayTransport(_))));

    let payments = h.engine.payments().await.unwrap();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].status, PaymentStatus::Error);
    assert!(payments[0].reference_number.is_none());

    let trail = h.engine.audit_trail(payments[0].id).await.unwrap();
    assert!(trail.iter().any(|e| e.event == AuditEvent::GatewayCreateFailed));
}

#[tokio::test]
async fn test_transport_failure_at_initiate_marks_error() {
    let h = Harness::new();
    h.gateway.fail_next(GatewayOperation::Initiate);

    let result = h.engine.initiate_redirect_payment(support(dec!(75))).await;
    assert!(matches!(result, Err(PaymentError::GatewayTransport(_))));

    let payment = h.engine.payments().await.unwrap().remove(0);
    assert_eq!(payment.status, PaymentStatus::Error);
    let trail = h.engine.audit_trail(payment.id).await.unwrap();
    assert!(trail.iter().any(|e| e.event == AuditEvent::GatewayInitiateFailed));
}

#[tokio::test]
async fn test_slow_gateway_times_out() {
    let h = Harness::with_config(GatewayConfig {
        timeout_secs: 1,
        ..GatewayConfig::default()
    });
    h.gateway.set_latency(Duration::from_millis(1500));

    let result = h.engine.create_seamless_payment(support(dec!(75))).await;
    match result {
        Err(PaymentError::GatewayTransport(message)) => assert!(message.contains("timed out")),
        other => panic!("expected timeout, got {:?}", other),
    }
    let payment = h.engine.payments().await.unwrap().remove(0);
    assert_eq!(payment.status, PaymentStatus::Error);
}

#[tokio::test]
async fn test_gateway_rejection_marks_error() {
    let h = Harness::new();
    h.gateway.reject_next("Insufficient funds", None);

    let receipt = h.engine.create_seamless_payment(support(dec!(75))).await.unwrap();
    assert_eq!(receipt.message, "Insufficient funds");
    assert_eq!(receipt.payment.status, PaymentStatus::Error);
    assert!(receipt.payment.reward_tier.is_none());

    let trail = h.engine.audit_trail(receipt.payment.id).await.unwrap();
    assert!(trail.iter().any(|e| e.event == AuditEvent::GatewayRejected));
}

#[tokio::test]
async fn test_gateway_failure_status_is_kept() {
    let h = Harness::new();
    h.gateway.reject_next("Card declined", Some("declined"));

    let receipt = h.engine.initiate_redirect_payment(support(dec!(75))).await.unwrap();
    assert_eq!(receipt.message, "Card declined");
    assert_eq!(receipt.payment.status, PaymentStatus::Declined);

    let trail = h.engine.audit_trail(receipt.payment.id).await.unwrap();
    assert!(trail.iter().any(|e| e.event == AuditEvent::GatewayRejected));
    assert!(!trail.iter().any(|e| e.event == AuditEvent::UnknownStatus));
}

#[tokio::test]
async fn test_gateway_non_failure_status_on_rejection_becomes_error() {
    let h = Harness::new();
    h.gateway.reject_next("Try again", Some("PENDING"));

    let receipt = h.engine.create_seamless_payment(support(dec!(75))).await.unwrap();
    assert_eq!(receipt.payment.status, PaymentStatus::Error);
}

#[tokio::test]
async fn test_acceptance_without_reference_marks_error() {
    let h = Harness::new();
    h.gateway.withhold_reference_next();

    let receipt = h.engine.create_seamless_payment(support(dec!(75))).await.unwrap();
    assert_eq!(receipt.message, "Gateway did not return a reference number");
    assert_eq!(receipt.payment.status, PaymentStatus::Error);
    assert!(receipt.payment.reference_number.is_none());

    let trail = h.engine.audit_trail(receipt.payment.id).await.unwrap();
    assert!(trail.iter().any(|e| e.event == AuditEvent::GatewayRejected));
}

#[tokio::test]
async fn test_duplicate_gateway_reference_marks_error() {
    let h = Harness::new();
    let first = h.pending_seamless(dec!(75), "REF-DUP").await;

    h.gateway.expect_reference("REF-DUP");
    let result = h.engine.create_seamless_payment(support(dec!(80))).await;
    assert!(matches!(result, Err(PaymentError::Conflict(_))));

    let second = h
        .engine
        .payments()
        .await
        .unwrap()
        .into_iter()
        .find(|p| p.id != first.id)
        .unwrap();
    assert_eq!(second.status, PaymentStatus::Error);
    assert!(second.reference_number.is_none());
    let trail = h.engine.audit_trail(second.id).await.unwrap();
    assert!(trail.iter().any(|e| e.event == AuditEvent::GatewayRejected));

    // The original owner of the reference is untouched.
    let owner = h.engine.find_by_reference("REF-DUP").await.unwrap();
    assert_eq!(owner.id, first.id);
    assert_eq!(owner.status, PaymentStatus::Initiated);
}

#[tokio::test]
async fn test_poll_without_status_leaves_payment_open() {
    let h = Harness::new();
    let payment = h.pending_seamless(dec!(75), "REF-E").await;
    h.gateway.set_status("REF-E", "  ");

    let polled = h.engine.poll_status("REF-E").await.unwrap();
    assert_eq!(polled.status, PaymentStatus::Initiated);
    assert_eq!(polled.version, payment.version);

    let trail = h.engine.audit_trail(payment.id).await.unwrap();
    assert_eq!(trail.last().unwrap().event, AuditEvent::CallbackWithoutStatus);
    assert!(!trail.iter().any(|e| e.event == AuditEvent::SignalReceived));

    h.gateway.set_status("REF-E", "SUCCESS");
    assert_eq!(
        h.engine.poll_status("REF-E").await.unwrap().status,
        PaymentStatus::Success
    );
}

#[tokio::test]
async fn test_missing_required_fields_rejected_by_gateway() {
    let h = Harness::new();
    let mut request = support(dec!(75));
    request.required_fields.clear();

    // The engine fills in a placeholder field, so the gateway accepts.
    let receipt = h.engine.create_seamless_payment(request).await.unwrap();
    assert!(receipt.payment.reference_number.is_some());
}

#[tokio::test]
async fn test_poll_transport_failure_leaves_status() {
    let h = Harness::new();
    let payment = h.pending_seamless(dec!(75), "REF-T").await;
    h.gateway.fail_next(GatewayOperation::CheckStatus);

    assert!(matches!(
        h.engine.poll_status("REF-T").await,
        Err(PaymentError::GatewayTransport(_))
    ));
    let current = h.engine.get(payment.id).await.unwrap();
    assert_eq!(current.status, PaymentStatus::Initiated);
    assert_eq!(current.version, payment.version);

    let trail = h.engine.audit_trail(payment.id).await.unwrap();
    assert_eq!(trail.last().unwrap().event, AuditEvent::PollFailed);

    // The next poll goes through.
    assert_eq!(
        h.engine.poll_status("REF-T").await.unwrap().status,
        PaymentStatus::Pending
    );
}

#[tokio::test]
async fn test_terminal_payment_not_polled() {
    let h = Harness::new();
    h.pending_seamless(dec!(75), "REF-F").await;
    h.gateway.set_status("REF-F", "CANCELLED");
    assert_eq!(
        h.engine.poll_status("REF-F").await.unwrap().status,
        PaymentStatus::Cancelled
    );

    h.gateway.fail_next(GatewayOperation::CheckStatus);
    let cached = h.engine.poll_status("REF-F").await.unwrap();
    assert_eq!(cached.status, PaymentStatus::Cancelled);
}

#[tokio::test]
async fn test_undecodable_callback() {
    let h = Harness::new();
    assert!(matches!(
        h.engine.handle_result("%%%").await,
        Err(PaymentError::GatewayTransport(_))
    ));
    assert!(matches!(
        h.engine.handle_result(r#"{"transactionStatus":"SUCCESS"}"#).await,
        Err(PaymentError::ValidationError(_))
    ));
}
