mod common;

use chrono::Utc;
use common::{payment_event, TestApp, ADMIN_ID, CUSTOMER_ID, WEBHOOK_SECRET};
use serde_json::{json, Value};
use service_core::utils::signature::sign_webhook_payload;

#[tokio::test]
async fn checkout_payment_then_admin_cancel() {
    let app = TestApp::spawn().await;

    let response = app.create_order(CUSTOMER_ID, &common::order_body()).await;
    assert_eq!(response.status().as_u16(), 201);
    let created: Value = response.json().await.unwrap();
    assert_eq!(created["total"].as_f64(), Some(100.0));
    let order_id = created["orderId"].as_str().unwrap().to_string();

    let response = app
        .send_webhook(&payment_event("evt_paid", "payment_intent.succeeded", &order_id))
        .await;
    assert_eq!(response.status().as_u16(), 200);
    let ack: Value = response.json().await.unwrap();
    assert_eq!(ack["received"], true);

    let order = app.order_json(&order_id).await;
    assert_eq!(order["status"], "processing");
    assert_eq!(order["paymentStatus"], "paid");
    assert_eq!(order["stripePaymentIntentId"], "pi_evt_paid");

    let response = app
        .patch_order(
            ADMIN_ID,
            &order_id,
            &json!({"status": "cancelled", "paymentIntentId": "pi_evt_paid"}),
        )
        .await;
    assert_eq!(response.status().as_u16(), 200);

    assert_eq!(app.order_json(&order_id).await["status"], "cancelled");
    assert_eq!(app.stock_of("p1").await, 12);
}

#[tokio::test]
async fn redelivered_failure_restocks_once() {
    let app = TestApp::spawn().await;
    let order_id = app.place_order(CUSTOMER_ID).await;
    let event = payment_event("evt_failed", "payment_intent.payment_failed", &order_id);

    for _ in 0..3 {
        let response = app.send_webhook(&event).await;
        assert_eq!(response.status().as_u16(), 200);
    }

    let order = app.order_json(&order_id).await;
    assert_eq!(order["status"], "cancelled");
    assert_eq!(order["paymentStatus"], "failed");
    assert_eq!(app.stock_of("p1").await, 12);
}

#[tokio::test]
async fn distinct_cancel_events_restock_once() {
    let app = TestApp::spawn().await;
    let order_id = app.place_order(CUSTOMER_ID).await;

    app.send_webhook(&payment_event("evt_a", "payment_intent.canceled", &order_id))
        .await;
    app.send_webhook(&payment_event("evt_b", "payment_intent.payment_failed", &order_id))
        .await;

    let order = app.order_json(&order_id).await;
    assert_eq!(order["status"], "cancelled");
    assert_eq!(order["paymentStatus"], "cancelled");
    assert_eq!(app.stock_of("p1").await, 12);
}

#[tokio::test]
async fn success_after_cancellation_is_ignored() {
    let app = TestApp::spawn().await;
    let order_id = app.place_order(CUSTOMER_ID).await;

    app.send_webhook(&payment_event("evt_c", "payment_intent.canceled", &order_id))
        .await;
    let response = app
        .send_webhook(&payment_event("evt_s", "payment_intent.succeeded", &order_id))
        .await;

    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(app.order_json(&order_id).await["status"], "cancelled");
}

#[tokio::test]
async fn invalid_signature_never_mutates() {
    let app = TestApp::spawn().await;
    let order_id = app.place_order(CUSTOMER_ID).await;
    let payload =
        serde_json::to_vec(&payment_event("evt_x", "payment_intent.payment_failed", &order_id))
            .unwrap();
    let now = Utc::now().timestamp();

    let wrong_secret = sign_webhook_payload("whsec_wrong", now, &payload).unwrap();
    let stale = sign_webhook_payload(WEBHOOK_SECRET, now - 3600, &payload).unwrap();
    let for_other_body = sign_webhook_payload(WEBHOOK_SECRET, now, b"{}").unwrap();

    for signature in [
        Some(wrong_secret.as_str()),
        Some(stale.as_str()),
        Some(for_other_body.as_str()),
        Some("garbage"),
        None,
    ] {
        let response = app.send_raw_webhook(payload.clone(), signature).await;
        assert_eq!(response.status().as_u16(), 400, "signature: {:?}", signature);
    }

    let order = app.order_json(&order_id).await;
    assert_eq!(order["status"], "pending");
    assert_eq!(order["paymentStatus"], "pending");
    assert_eq!(app.stock_of("p1").await, 10);

    // The event id was not burned by the rejected deliveries.
    let response = app
        .send_webhook(&payment_event("evt_x", "payment_intent.payment_failed", &order_id))
        .await;
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(app.order_json(&order_id).await["status"], "cancelled");
}

#[tokio::test]
async fn informational_and_unknown_events_are_acknowledged() {
    let app = TestApp::spawn().await;
    let order_id = app.place_order(CUSTOMER_ID).await;

    for event_type in ["payment_intent.created", "charge.refunded"] {
        let response = app
            .send_webhook(&payment_event("evt_info", event_type, &order_id))
            .await;
        assert_eq!(response.status().as_u16(), 200);
    }

    assert_eq!(app.order_json(&order_id).await["status"], "pending");
}

#[tokio::test]
async fn events_for_unknown_orders_are_acknowledged() {
    let app = TestApp::spawn().await;

    let response = app
        .send_webhook(&payment_event(
            "evt_missing",
            "payment_intent.succeeded",
            "00000000-0000-0000-0000-000000000000",
        ))
        .await;
    assert_eq!(response.status().as_u16(), 200);

    let mut no_metadata = payment_event("evt_nometa", "payment_intent.succeeded", "x");
    no_metadata["data"]["object"]["metadata"] = json!({});
    let response = app.send_webhook(&no_metadata).await;
    assert_eq!(response.status().as_u16(), 200);
}

#[tokio::test]
async fn signed_but_malformed_payload_is_400() {
    let app = TestApp::spawn().await;
    let payload = b"{\"not\":\"an event\"}".to_vec();
    let header = sign_webhook_payload(WEBHOOK_SECRET, Utc::now().timestamp(), &payload).unwrap();

    let response = app.send_raw_webhook(payload, Some(&header)).await;

    assert_eq!(response.status().as_u16(), 400);
}

#[tokio::test]
async fn extreme_signature_timestamp_is_400() {
    let app = TestApp::spawn().await;
    let order_id = app.place_order(CUSTOMER_ID).await;
    let payload =
        serde_json::to_vec(&payment_event("evt_extreme", "payment_intent.canceled", &order_id))
            .unwrap();

    for header in ["t=-9223372036854775808,v1=00", "t=9223372036854775807,v1=00"] {
        let response = app.send_raw_webhook(payload.clone(), Some(header)).await;
        assert_eq!(response.status().as_u16(), 400, "header: {}", header);
    }

    assert_eq!(app.order_json(&order_id).await["status"], "pending");
    assert_eq!(app.stock_of("p1").await, 10);
}
