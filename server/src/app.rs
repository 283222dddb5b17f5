use std::sync::Arc;

use axum::extract::FromRef;

use crate::config::{Config, PaymentConfig};
use crate::services::auth::TokenKeys;
use crate::services::payments::{MockGateway, PaymentGateway, RazorpayGateway};
use crate::services::realtime::SlotBroadcaster;
use crate::services::{BookingService, InventoryService};
use crate::store::ParkingStore;

/// Shared handler state. Everything inside is cheap to clone.
#[derive(Clone, FromRef)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn ParkingStore>,
    pub payments: Arc<dyn PaymentGateway>,
    pub tokens: TokenKeys,
    pub broadcaster: SlotBroadcaster,
    pub bookings: BookingService,
    pub inventory: InventoryService,
}

impl AppState {
    pub fn new(
        config: Config,
        store: Arc<dyn ParkingStore>,
        payments: Arc<dyn PaymentGateway>,
    ) -> Self {
        let broadcaster = SlotBroadcaster::new();
        let bookings = BookingService::new(
            store.clone(),
            payments.clone(),
            broadcaster.clone(),
            config.gst_percent,
        );
        let inventory =
            InventoryService::new(store.clone(), broadcaster.clone(), config.local_offset);

        Self {
            tokens: TokenKeys::new(&config.jwt_secret, config.jwt_ttl),
            config: Arc::new(config),
            store,
            payments,
            broadcaster,
            bookings,
            inventory,
        }
    }
}

pub fn payment_gateway(config: &PaymentConfig) -> Arc<dyn PaymentGateway> {
    match config {
        PaymentConfig::Mock { secret } => {
            tracing::warn!("Using the mock payment gateway");
            Arc::new(MockGateway::new(secret.clone()))
        }
        PaymentConfig::Razorpay {
            key_id,
            key_secret,
            webhook_secret,
        } => Arc::new(RazorpayGateway::new(
            key_id.clone(),
            key_secret.clone(),
            webhook_secret.clone(),
        )),
    }
}
