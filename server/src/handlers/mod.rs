use axum::extract::State;
use axum::response::Response;
use serde::Serialize;

use crate::app::AppState;
use crate::utils::response::success;

pub mod auth;
pub mod bookings;
pub mod facilities;
pub mod payments;
pub mod ws;

#[derive(Serialize)]
struct HealthPayload {
    status: &'static str,
    service: &'static str,
    payment_gateway: &'static str,
}

pub async fn health_check(State(state): State<AppState>) -> Response {
    let payload = HealthPayload {
        status: "ok",
        service: "parking-api",
        payment_gateway: state.payments.name(),
    };

    success(payload, "Health check successful")
}

#[derive(Serialize)]
struct ClientConfig {
    maps_api_key: Option<String>,
    gst_percent: rust_decimal::Decimal,
}

/// Public settings the web clients need at startup.
pub async fn client_config(State(state): State<AppState>) -> Response {
    let payload = ClientConfig {
        maps_api_key: state.config.maps_api_key.clone(),
        gst_percent: state.config.gst_percent,
    };
    success(payload, "Client configuration")
}
