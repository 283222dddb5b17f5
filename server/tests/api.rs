use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use parking_server::app::AppState;
use parking_server::config::Config;
use parking_server::routes::create_routes;
use parking_server::services::payments::{MockGateway, RazorpayGateway};
use parking_server::store::MemoryStore;

const PAYMENT_SECRET: &str = "test-payment-secret";

struct TestApp {
    router: Router,
    gateway: MockGateway,
}

impl TestApp {
    fn new() -> Self {
        let config = Config::from_lookup(|_| None).unwrap();
        let gateway = MockGateway::new(PAYMENT_SECRET);
        let state = AppState::new(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(gateway.clone()),
        );
        Self {
            router: create_routes(state),
            gateway,
        }
    }

    async fn raw(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Vec<u8>) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, bytes.to_vec())
    }

    async fn call(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let (status, bytes) = self.raw(method, uri, token, body).await;
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    async fn register(&self, email: &str, role: &str) -> String {
        let (status, body) = self
            .call(
                Method::POST,
                "/api/auth/register",
                None,
                Some(json!({
                    "name": "Test User",
                    "email": email,
                    "password": "parking-pass-1",
                    "role": role,
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["data"]["token"].as_str().unwrap().to_string()
    }
}

/// A provider with one facility, one floor of car slots A1..A3 and a
/// 50/hour, 500/day tariff.
struct Lot {
    provider: String,
    facility_id: String,
    slot_ids: Vec<String>,
}

async fn setup_lot(app: &TestApp) -> Lot {
    let provider = app.register("owner@parking.test", "provider").await;

    let (status, body) = app
        .call(
            Method::POST,
            "/api/facilities",
            Some(&provider),
            Some(json!({
                "name": "Brigade Road Parking",
                "address": "12 Brigade Road",
                "city": "Bengaluru",
                "latitude": 12.9716,
                "longitude": 77.6070,
                "total_floors": 1,
                "amenities": ["cctv", "ev_charging"],
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let facility_id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = app
        .call(
            Method::POST,
            &format!("/api/facilities/{facility_id}/floors"),
            Some(&provider),
            Some(json!({ "number": 0, "name": "Ground" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let floor_id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = app
        .call(
            Method::POST,
            &format!("/api/floors/{floor_id}/slots/bulk"),
            Some(&provider),
            Some(json!({ "prefix": "A", "start": 1, "count": 3, "vehicle_type": "car" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let slot_ids: Vec<String> = body["data"]["created"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(slot_ids.len(), 3);

    let (status, body) = app
        .call(
            Method::PUT,
            &format!("/api/facilities/{facility_id}/pricing"),
            Some(&provider),
            Some(json!({ "vehicle_type": "car", "hourly_rate": "50", "daily_max": "500" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");

    Lot {
        provider,
        facility_id,
        slot_ids,
    }
}

fn slot_status(detail: &Value, slot_id: &str) -> String {
    detail["data"]
        .as_array()
        .unwrap()
        .iter()
        .find(|s| s["id"] == slot_id)
        .map(|s| s["status"].as_str().unwrap().to_string())
        .unwrap()
}

async fn order_for(app: &TestApp, token: &str, lot: &Lot, slot_id: &str, hours: i32) -> String {
    let (status, body) = app
        .call(
            Method::POST,
            "/api/payments/order",
            Some(token),
            Some(json!({
                "facility_id": lot.facility_id,
                "slot_id": slot_id,
                "vehicle_type": "car",
                "duration_hours": hours,
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body["data"]["order"]["order_id"].as_str().unwrap().to_string()
}

fn online_booking(
    lot: &Lot,
    slot_id: &str,
    hours: i32,
    order_id: &str,
    payment_id: &str,
    signature: &str,
) -> Value {
    json!({
        "facility_id": lot.facility_id,
        "slot_id": slot_id,
        "vehicle_number": "KA05MN2024",
        "vehicle_type": "car",
        "duration_hours": hours,
        "payment": {
            "method": "online",
            "order_id": order_id,
            "payment_id": payment_id,
            "signature": signature,
        },
    })
}

#[tokio::test]
async fn health_reports_service() {
    let app = TestApp::new();
    let (status, body) = app.call(Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["service"], "parking-api");
    assert_eq!(body["data"]["status"], "ok");
}

#[tokio::test]
async fn login_and_profile() {
    let app = TestApp::new();
    app.register("Asha@Example.com", "customer").await;

    let (status, body) = app
        .call(
            Method::POST,
            "/api/auth/login",
            None,
            Some(json!({ "email": "asha@example.com", "password": "wrong-password" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "AUTH_ERROR");

    let (status, body) = app
        .call(
            Method::POST,
            "/api/auth/login",
            None,
            Some(json!({ "email": "asha@example.com", "password": "parking-pass-1" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let token = body["data"]["token"].as_str().unwrap().to_string();
    assert!(body["data"]["user"].get("password_hash").is_none());

    let (status, body) = app.call(Method::GET, "/api/auth/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["email"], "asha@example.com");
    assert_eq!(body["data"]["role"], "customer");

    let (status, _) = app.call(Method::GET, "/api/auth/me", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn duplicate_email_is_rejected() {
    let app = TestApp::new();
    app.register("dup@example.com", "customer").await;

    let (status, body) = app
        .call(
            Method::POST,
            "/api/auth/register",
            None,
            Some(json!({
                "name": "Someone Else",
                "email": "DUP@example.com",
                "password": "another-pass",
                "role": "provider",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT, "{body}");
}

#[tokio::test]
async fn customers_cannot_manage_facilities() {
    let app = TestApp::new();
    let customer = app.register("c@example.com", "customer").await;

    let (status, body) = app
        .call(
            Method::POST,
            "/api/facilities",
            Some(&customer),
            Some(json!({
                "name": "Mine",
                "address": "Somewhere",
                "city": "Pune",
                "latitude": 18.52,
                "longitude": 73.85,
            })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "FORBIDDEN");
}

#[tokio::test]
async fn search_reports_free_slots_and_distance() {
    let app = TestApp::new();
    let lot = setup_lot(&app).await;

    let (status, body) = app
        .call(
            Method::GET,
            "/api/facilities?city=bengaluru&lat=12.97&lng=77.60&radius_km=5",
            None,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let results = body["data"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["id"], lot.facility_id.as_str());
    assert_eq!(results[0]["free_slots"], 3);
    assert!(results[0]["distance_km"].as_f64().unwrap() < 5.0);

    let (_, body) = app
        .call(Method::GET, "/api/facilities?city=Mumbai", None, None)
        .await;
    assert!(body["data"].as_array().unwrap().is_empty());

    let (status, body) = app
        .call(
            Method::GET,
            &format!("/api/facilities/{}", lot.facility_id),
            None,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["slots"]["total"], 3);
    assert_eq!(body["data"]["pricing"][0]["vehicle_type"], "car");
}

#[tokio::test]
async fn quote_applies_gst() {
    let app = TestApp::new();
    let lot = setup_lot(&app).await;

    let (status, body) = app
        .call(
            Method::POST,
            "/api/payments/quote",
            None,
            Some(json!({
                "facility_id": lot.facility_id,
                "slot_id": lot.slot_ids[0],
                "vehicle_type": "car",
                "duration_hours": 10,
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["fee"]["base_fee"], "500.00");
    assert_eq!(body["data"]["fee"]["gst"], "90.00");
    assert_eq!(body["data"]["fee"]["total_fee"], "590.00");
    assert_eq!(body["data"]["fee"]["capped"], true);
}

#[tokio::test]
async fn online_booking_lifecycle() {
    let app = TestApp::new();
    let lot = setup_lot(&app).await;
    let customer = app.register("driver@example.com", "customer").await;
    let rival = app.register("rival@example.com", "customer").await;
    let slot_id = lot.slot_ids[0].clone();

    let (status, body) = app
        .call(
            Method::POST,
            "/api/payments/order",
            Some(&customer),
            Some(json!({
                "facility_id": lot.facility_id,
                "slot_id": slot_id,
                "vehicle_type": "car",
                "duration_hours": 3,
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["data"]["quote"]["fee"]["total_fee"], "177.00");
    assert_eq!(body["data"]["order"]["amount_subunits"], 17700);
    let order_id = body["data"]["order"]["order_id"].as_str().unwrap().to_string();

    // Tampered signature.
    let (status, _) = app
        .call(
            Method::POST,
            "/api/bookings",
            Some(&customer),
            Some(json!({
                "facility_id": lot.facility_id,
                "slot_id": slot_id,
                "vehicle_number": "ka 01 ab 1234",
                "vehicle_type": "car",
                "duration_hours": 3,
                "payment": {
                    "method": "online",
                    "order_id": order_id,
                    "payment_id": "pay_001",
                    "signature": app.gateway.sign_payment(&order_id, "pay_002"),
                },
            })),
        )
        .await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);

    let (status, body) = app
        .call(
            Method::POST,
            "/api/bookings",
            Some(&customer),
            Some(json!({
                "facility_id": lot.facility_id,
                "slot_id": slot_id,
                "vehicle_number": "ka 01 ab 1234",
                "vehicle_type": "car",
                "duration_hours": 3,
                "payment": {
                    "method": "online",
                    "order_id": order_id,
                    "payment_id": "pay_001",
                    "signature": app.gateway.sign_payment(&order_id, "pay_001"),
                },
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let ticket = body["data"].clone();
    assert_eq!(ticket["vehicle_number"], "KA01AB1234");
    assert_eq!(ticket["total_fee"], "177.00");
    assert_eq!(ticket["payment_status"], "paid");
    assert_eq!(ticket["status"], "active");
    assert!(ticket["qr_code"]
        .as_str()
        .unwrap()
        .starts_with("data:image/png;base64,"));
    let booking_id = ticket["id"].as_str().unwrap().to_string();

    let (_, slots) = app
        .call(
            Method::GET,
            &format!("/api/facilities/{}/slots", lot.facility_id),
            None,
            None,
        )
        .await;
    assert_eq!(slot_status(&slots, &slot_id), "reserved");

    // Same slot again.
    let (status, body) = app
        .call(
            Method::POST,
            "/api/bookings",
            Some(&rival),
            Some(json!({
                "facility_id": lot.facility_id,
                "slot_id": slot_id,
                "vehicle_number": "MH12DE1433",
                "vehicle_type": "car",
                "duration_hours": 1,
                "payment": { "method": "pay_at_exit" },
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["message"], "Slot is no longer available");

    let (status, body) = app
        .call(
            Method::POST,
            "/api/bookings/verify-qr",
            Some(&lot.provider),
            Some(json!({ "qr": ticket["qr_payload"] })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["id"], booking_id.as_str());

    let (status, body) = app
        .call(
            Method::POST,
            "/api/bookings/verify-qr",
            Some(&lot.provider),
            Some(json!({ "qr": "{\"ticketId\":\"not-a-ticket\"}" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["message"], "Invalid QR code");

    let (status, body) = app
        .call(
            Method::POST,
            &format!("/api/bookings/{booking_id}/cancel"),
            Some(&customer),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["status"], "cancelled");
    assert_eq!(body["data"]["payment_status"], "refunded");

    let (_, slots) = app
        .call(
            Method::GET,
            &format!("/api/facilities/{}/slots", lot.facility_id),
            None,
            None,
        )
        .await;
    assert_eq!(slot_status(&slots, &slot_id), "free");

    let (status, body) = app
        .call(Method::GET, "/api/bookings", Some(&customer), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn pay_at_exit_check_in_and_complete() {
    let app = TestApp::new();
    let lot = setup_lot(&app).await;
    let customer = app.register("walkin@example.com", "customer").await;
    let slot_id = lot.slot_ids[1].clone();

    let (status, body) = app
        .call(
            Method::POST,
            "/api/bookings",
            Some(&customer),
            Some(json!({
                "facility_id": lot.facility_id,
                "slot_id": slot_id,
                "vehicle_number": "TN09BX4455",
                "vehicle_type": "car",
                "duration_hours": 2,
                "payment": { "method": "pay_at_exit" },
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["data"]["payment_status"], "pending");
    let booking_id = body["data"]["id"].as_str().unwrap().to_string();

    // Only the owning provider may check vehicles in.
    let (status, _) = app
        .call(
            Method::POST,
            &format!("/api/bookings/{booking_id}/check-in"),
            Some(&customer),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .call(
            Method::POST,
            &format!("/api/bookings/{booking_id}/check-in"),
            Some(&lot.provider),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert!(body["data"]["checked_in_at"].is_string());

    let (status, _) = app
        .call(
            Method::POST,
            &format!("/api/bookings/{booking_id}/cancel"),
            Some(&customer),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = app
        .call(
            Method::POST,
            &format!("/api/bookings/{booking_id}/complete"),
            Some(&lot.provider),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["status"], "completed");
    assert_eq!(body["data"]["payment_status"], "paid");
    // Under an hour on site bills the one-hour minimum.
    assert_eq!(body["data"]["total_fee"], "59.00");

    let (status, bytes) = app
        .raw(
            Method::GET,
            "/api/provider/bookings/export",
            Some(&lot.provider),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let csv = String::from_utf8(bytes).unwrap();
    assert!(csv.starts_with("booking_id,facility,slot,"));
    assert!(csv.contains("Brigade Road Parking,A2,TN09BX4455,car"));
}

#[tokio::test]
async fn maintenance_slots_are_not_bookable() {
    let app = TestApp::new();
    let lot = setup_lot(&app).await;
    let customer = app.register("late@example.com", "customer").await;
    let slot_id = lot.slot_ids[2].clone();

    let (status, body) = app
        .call(
            Method::PATCH,
            &format!("/api/slots/{slot_id}/status"),
            Some(&lot.provider),
            Some(json!({ "status": "maintenance" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["status"], "maintenance");

    let (status, _) = app
        .call(
            Method::PATCH,
            &format!("/api/slots/{slot_id}/status"),
            Some(&lot.provider),
            Some(json!({ "status": "reserved" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .call(
            Method::POST,
            "/api/bookings",
            Some(&customer),
            Some(json!({
                "facility_id": lot.facility_id,
                "slot_id": slot_id,
                "vehicle_number": "DL3CAB0001",
                "vehicle_type": "car",
                "duration_hours": 1,
                "payment": { "method": "pay_at_exit" },
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn webhook_requires_valid_signature() {
    let app = TestApp::new();
    let payload = json!({ "event": "payment.captured" }).to_string();
    let signature = parking_server::services::payments::sign(PAYMENT_SECRET, payload.as_bytes());

    let request = |sig: &str| {
        Request::builder()
            .method(Method::POST)
            .uri("/api/payments/webhook")
            .header("x-razorpay-signature", sig)
            .body(Body::from(payload.clone()))
            .unwrap()
    };

    let ok = app.router.clone().oneshot(request(&signature)).await.unwrap();
    assert_eq!(ok.status(), StatusCode::OK);

    let bad = app.router.clone().oneshot(request("deadbeef")).await.unwrap();
    assert_eq!(bad.status(), StatusCode::PAYMENT_REQUIRED);
}

#[tokio::test]
async fn refunded_payment_cannot_back_another_booking() {
    let app = TestApp::new();
    let lot = setup_lot(&app).await;
    let customer = app.register("payer@example.com", "customer").await;
    let rival = app.register("walkin@example.com", "customer").await;
    let (first, second) = (lot.slot_ids[0].clone(), lot.slot_ids[1].clone());

    let order_id = order_for(&app, &customer, &lot, &first, 3).await;
    let signature = app.gateway.sign_payment(&order_id, "pay_lost");

    let (status, body) = app
        .call(
            Method::POST,
            "/api/bookings",
            Some(&rival),
            Some(json!({
                "facility_id": lot.facility_id,
                "slot_id": second,
                "vehicle_number": "MH12DE1433",
                "vehicle_type": "car",
                "duration_hours": 3,
                "payment": { "method": "pay_at_exit" },
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");

    // Paid, but the slot is gone: refunded.
    let request = online_booking(&lot, &second, 3, &order_id, "pay_lost", &signature);
    let (status, body) = app
        .call(Method::POST, "/api/bookings", Some(&customer), Some(request.clone()))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["message"], "Slot is no longer available");
    let refunds = app.gateway.refunds().await;
    assert_eq!(refunds.len(), 1);
    assert_eq!(refunds[0].payment_id, "pay_lost");
    assert_eq!(refunds[0].amount.to_string(), "177.00");

    // Submitting again does not refund twice.
    let (status, _) = app
        .call(Method::POST, "/api/bookings", Some(&customer), Some(request))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(app.gateway.refunds().await.len(), 1);

    // Nor does the refunded payment buy a free slot.
    let (status, body) = app
        .call(
            Method::POST,
            "/api/bookings",
            Some(&customer),
            Some(online_booking(&lot, &first, 3, &order_id, "pay_lost", &signature)),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT, "{body}");
    assert_eq!(
        body["error"]["message"],
        "Payment has already been used for another booking"
    );

    let (_, slots) = app
        .call(
            Method::GET,
            &format!("/api/facilities/{}/slots", lot.facility_id),
            None,
            None,
        )
        .await;
    assert_eq!(slot_status(&slots, &first), "free");
    assert_eq!(app.gateway.refunds().await.len(), 1);
}

#[tokio::test]
async fn reused_payment_is_rejected_without_refund() {
    let app = TestApp::new();
    let lot = setup_lot(&app).await;
    let customer = app.register("twice@example.com", "customer").await;
    let (first, second) = (lot.slot_ids[0].clone(), lot.slot_ids[1].clone());

    let order_id = order_for(&app, &customer, &lot, &first, 3).await;
    let signature = app.gateway.sign_payment(&order_id, "pay_once");

    let (status, body) = app
        .call(
            Method::POST,
            "/api/bookings",
            Some(&customer),
            Some(online_booking(&lot, &first, 3, &order_id, "pay_once", &signature)),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");

    let (status, body) = app
        .call(
            Method::POST,
            "/api/bookings",
            Some(&customer),
            Some(online_booking(&lot, &second, 3, &order_id, "pay_once", &signature)),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT, "{body}");
    assert_eq!(
        body["error"]["message"],
        "Payment has already been used for another booking"
    );
    assert!(app.gateway.refunds().await.is_empty());

    let (_, slots) = app
        .call(
            Method::GET,
            &format!("/api/facilities/{}/slots", lot.facility_id),
            None,
            None,
        )
        .await;
    assert_eq!(slot_status(&slots, &first), "reserved");
    assert_eq!(slot_status(&slots, &second), "free");
}

#[tokio::test]
async fn order_amount_must_match_fee() {
    let app = TestApp::new();
    let lot = setup_lot(&app).await;
    let customer = app.register("short@example.com", "customer").await;
    let slot_id = lot.slot_ids[0].clone();

    // Paid for 3 hours (177.00), asks for 2 (118.00).
    let order_id = order_for(&app, &customer, &lot, &slot_id, 3).await;
    let signature = app.gateway.sign_payment(&order_id, "pay_short");
    let (status, body) = app
        .call(
            Method::POST,
            "/api/bookings",
            Some(&customer),
            Some(online_booking(&lot, &slot_id, 2, &order_id, "pay_short", &signature)),
        )
        .await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(
        body["error"]["message"],
        "Payment amount does not match the booking fee"
    );
    assert!(app.gateway.refunds().await.is_empty());
}

#[tokio::test]
async fn unknown_order_is_rejected() {
    let app = TestApp::new();
    let lot = setup_lot(&app).await;
    let customer = app.register("ghost@example.com", "customer").await;
    let slot_id = lot.slot_ids[0].clone();

    let signature = app.gateway.sign_payment("order_missing", "pay_ghost");
    let (status, body) = app
        .call(
            Method::POST,
            "/api/bookings",
            Some(&customer),
            Some(online_booking(&lot, &slot_id, 1, "order_missing", "pay_ghost", &signature)),
        )
        .await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(body["error"]["message"], "Payment order not found");

    let (_, slots) = app
        .call(
            Method::GET,
            &format!("/api/facilities/{}/slots", lot.facility_id),
            None,
            None,
        )
        .await;
    assert_eq!(slot_status(&slots, &slot_id), "free");
}

#[tokio::test]
async fn completed_booking_cannot_be_cancelled_or_refunded() {
    let app = TestApp::new();
    let lot = setup_lot(&app).await;
    let customer = app.register("done@example.com", "customer").await;
    let slot_id = lot.slot_ids[0].clone();

    let order_id = order_for(&app, &customer, &lot, &slot_id, 1).await;
    let signature = app.gateway.sign_payment(&order_id, "pay_done");
    let (status, body) = app
        .call(
            Method::POST,
            "/api/bookings",
            Some(&customer),
            Some(online_booking(&lot, &slot_id, 1, &order_id, "pay_done", &signature)),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let booking_id = body["data"]["id"].as_str().unwrap().to_string();

    for step in ["check-in", "complete"] {
        let (status, body) = app
            .call(
                Method::POST,
                &format!("/api/bookings/{booking_id}/{step}"),
                Some(&lot.provider),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{step}: {body}");
    }

    let (status, _) = app
        .call(
            Method::POST,
            &format!("/api/bookings/{booking_id}/cancel"),
            Some(&customer),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(app.gateway.refunds().await.is_empty());
}

#[tokio::test]
async fn mock_checkout_pays_an_order() {
    let app = TestApp::new();
    let lot = setup_lot(&app).await;
    let customer = app.register("mockpay@example.com", "customer").await;
    let slot_id = lot.slot_ids[2].clone();
    let order_id = order_for(&app, &customer, &lot, &slot_id, 2).await;
    let checkout = format!("/api/payments/mock/{order_id}/pay");

    let (status, _) = app
        .call(Method::POST, &checkout, Some(&lot.provider), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .call(Method::POST, &checkout, Some(&customer), None)
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let paid = body["data"].clone();
    assert_eq!(paid["order_id"], order_id.as_str());

    let (status, body) = app
        .call(
            Method::POST,
            "/api/bookings",
            Some(&customer),
            Some(online_booking(
                &lot,
                &slot_id,
                2,
                &order_id,
                paid["payment_id"].as_str().unwrap(),
                paid["signature"].as_str().unwrap(),
            )),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["data"]["payment_status"], "paid");
    assert_eq!(body["data"]["total_fee"], "118.00");

    let (status, _) = app
        .call(
            Method::POST,
            "/api/payments/mock/order_missing/pay",
            Some(&customer),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
}

#[tokio::test]
async fn mock_checkout_is_absent_with_a_live_gateway() {
    let config = Config::from_lookup(|_| None).unwrap();
    let gateway = RazorpayGateway::new("rzp_test_key".into(), "secret".into(), "hook".into());
    let router = create_routes(AppState::new(
        config,
        Arc::new(MemoryStore::new()),
        Arc::new(gateway),
    ));

    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/payments/mock/order_1/pay")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn empty_export_still_lists_columns() {
    let app = TestApp::new();
    let lot = setup_lot(&app).await;

    let (status, bytes) = app
        .raw(
            Method::GET,
            "/api/provider/bookings/export",
            Some(&lot.provider),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let csv = String::from_utf8(bytes).unwrap();
    assert_eq!(csv.lines().count(), 1);
    assert!(csv.starts_with("booking_id,facility,slot,"));
}
