use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::Json;
use serde::Deserialize;

use crate::app::AppState;
use crate::extractors::AuthUser;
use crate::services::booking::QuoteRequest;
use crate::utils::error::AppError;
use crate::utils::response::{created, empty_success, success};

const SIGNATURE_HEADER: &str = "x-razorpay-signature";

#[derive(Debug, Deserialize)]
struct WebhookEvent {
    event: String,
}

/// Price a slot without reserving anything.
pub async fn quote(
    State(state): State<AppState>,
    Json(req): Json<QuoteRequest>,
) -> Result<Response, AppError> {
    let quote = state.bookings.quote(&req).await?;
    Ok(success(quote, "Fee calculated"))
}

pub async fn create_order(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<QuoteRequest>,
) -> Result<Response, AppError> {
    auth.require_customer()?;
    let order = state.bookings.create_payment_order(&req).await?;
    Ok(created(order, "Payment order created"))
}

/// Stands in for the checkout widget when the mock gateway is configured:
/// pays the order and returns what the widget would post back.
pub async fn mock_checkout(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(order_id): Path<String>,
) -> Result<Response, AppError> {
    auth.require_customer()?;
    let paid = state.payments.simulate_checkout(&order_id).await?;
    Ok(success(paid, "Simulated payment captured"))
}

/// Gateway callbacks are acknowledged once their signature checks out;
/// bookings are confirmed by the client flow, not here.
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::PaymentError("Missing webhook signature".to_string()))?;

    if !state.payments.verify_webhook_signature(&body, signature) {
        tracing::warn!("Rejected webhook with bad signature");
        return Err(AppError::PaymentError("Invalid webhook signature".to_string()));
    }

    match serde_json::from_slice::<WebhookEvent>(&body) {
        Ok(event) => tracing::info!(event = %event.event, "Payment webhook received"),
        Err(e) => tracing::warn!(error = %e, "Unreadable webhook payload"),
    }
    Ok(empty_success("Webhook acknowledged"))
}
