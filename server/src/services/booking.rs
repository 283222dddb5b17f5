//! Slot reservation and booking confirmation.
//!
//! A booking moves its slot through `free -> reserved -> occupied -> free`.
//! The first step is a conditional update inside the store, so two customers
//! racing for the same slot cannot both win; the loser gets a conflict and,
//! if they already paid online, an automatic refund.

use std::sync::Arc;

use chrono::{DateTime, Duration, SubsecRound, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{
    Booking, BookingKind, BookingStatus, Facility, PaymentMethod, PaymentStatus, Slot, SlotStatus,
    User, VehicleType,
};
use crate::services::export::{self, ExportLabels};
use crate::services::fees::{self, FeeBreakdown};
use crate::services::payments::{PaymentGateway, PaymentOrder};
use crate::services::qr::QrPayload;
use crate::services::realtime::{SlotBroadcaster, SlotUpdate};
use crate::store::{
    BookingFilter, FacilityFilter, ParkingStore, SlotFilter, StoreError, SLOT_UNAVAILABLE,
};
use crate::utils::error::AppError;

/// How far in the past a requested entry time may lie (clock skew between
/// client and server).
const ENTRY_TIME_TOLERANCE_MINUTES: i64 = 5;
const MAX_ADVANCE_BOOKING_DAYS: i64 = 30;
const MAX_HOURLY_DURATION: i32 = 24 * 7;

#[derive(Debug, Clone, Deserialize)]
pub struct QuoteRequest {
    pub facility_id: Uuid,
    pub slot_id: Uuid,
    pub vehicle_type: VehicleType,
    #[serde(default = "default_kind")]
    pub kind: BookingKind,
    pub duration_hours: Option<i32>,
}

fn default_kind() -> BookingKind {
    BookingKind::Hourly
}

#[derive(Debug, Clone, Serialize)]
pub struct Quote {
    pub facility_id: Uuid,
    pub slot_id: Uuid,
    pub slot_number: String,
    pub vehicle_type: VehicleType,
    pub kind: BookingKind,
    pub fee: FeeBreakdown,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderQuote {
    pub order: PaymentOrder,
    pub quote: Quote,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum PaymentDetails {
    Online {
        order_id: String,
        payment_id: String,
        signature: String,
    },
    PayAtExit,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BookingRequest {
    pub facility_id: Uuid,
    pub slot_id: Uuid,
    pub vehicle_number: String,
    pub vehicle_type: VehicleType,
    #[serde(default = "default_kind")]
    pub kind: BookingKind,
    pub duration_hours: Option<i32>,
    pub entry_time: Option<DateTime<Utc>>,
    pub payment: PaymentDetails,
}

impl BookingRequest {
    fn quote_request(&self) -> QuoteRequest {
        QuoteRequest {
            facility_id: self.facility_id,
            slot_id: self.slot_id,
            vehicle_type: self.vehicle_type,
            kind: self.kind,
            duration_hours: self.duration_hours,
        }
    }
}

/// A booking as handed to its holder: the record plus a scannable QR image.
#[derive(Debug, Clone, Serialize)]
pub struct Ticket {
    #[serde(flatten)]
    pub booking: Booking,
    pub qr_code: String,
}

/// Uppercases and strips spaces/hyphens, e.g. `ka-01 ab 1234` -> `KA01AB1234`.
pub fn normalize_vehicle_number(raw: &str) -> Result<String, AppError> {
    let normalized: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .map(|c| c.to_ascii_uppercase())
        .collect();

    if !(4..=12).contains(&normalized.len())
        || !normalized.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return Err(AppError::ValidationError(format!(
            "Invalid vehicle number '{}'",
            raw.trim()
        )));
    }
    Ok(normalized)
}

#[derive(Clone)]
pub struct BookingService {
    store: Arc<dyn ParkingStore>,
    payments: Arc<dyn PaymentGateway>,
    broadcaster: SlotBroadcaster,
    gst_percent: Decimal,
}

impl BookingService {
    pub fn new(
        store: Arc<dyn ParkingStore>,
        payments: Arc<dyn PaymentGateway>,
        broadcaster: SlotBroadcaster,
        gst_percent: Decimal,
    ) -> Self {
        Self {
            store,
            payments,
            broadcaster,
            gst_percent,
        }
    }

    pub async fn quote(&self, req: &QuoteRequest) -> Result<Quote, AppError> {
        let facility = self.store.get_facility(req.facility_id).await?;
        let slot = self.store.get_slot(req.slot_id).await?;
        self.check_selectable(&facility, &slot, req.vehicle_type)?;

        let rule = self
            .store
            .get_pricing(facility.id, req.vehicle_type)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "No pricing configured for {} at this facility",
                    req.vehicle_type
                ))
            })?;

        let fee = match req.kind {
            BookingKind::Hourly => {
                let hours = req.duration_hours.ok_or_else(|| {
                    AppError::ValidationError("duration_hours is required".to_string())
                })?;
                if hours > MAX_HOURLY_DURATION {
                    return Err(AppError::ValidationError(format!(
                        "Hourly bookings are limited to {MAX_HOURLY_DURATION} hours"
                    )));
                }
                fees::quote_hourly(&rule, hours, self.gst_percent)?
            }
            BookingKind::MonthlyPass => fees::quote_monthly_pass(&rule, self.gst_percent)?,
        };

        Ok(Quote {
            facility_id: facility.id,
            slot_id: slot.id,
            slot_number: slot.slot_number,
            vehicle_type: req.vehicle_type,
            kind: req.kind,
            fee,
        })
    }

    pub async fn create_payment_order(&self, req: &QuoteRequest) -> Result<OrderQuote, AppError> {
        let quote = self.quote(req).await?;
        let receipt = format!("slot_{}", Uuid::new_v4().simple());
        let order = self
            .payments
            .create_order(quote.fee.total_fee, &receipt)
            .await?;

        tracing::info!(
            order_id = %order.order_id,
            slot_id = %quote.slot_id,
            total = %quote.fee.total_fee,
            gateway = self.payments.name(),
            "Payment order created"
        );

        Ok(OrderQuote { order, quote })
    }

    pub async fn confirm(&self, customer: &User, req: BookingRequest) -> Result<Ticket, AppError> {
        let vehicle_number = normalize_vehicle_number(&req.vehicle_number)?;

        // Postgres keeps microseconds; the QR payload must survive a round trip.
        let now = Utc::now().trunc_subsecs(6);
        let entry_time = req.entry_time.unwrap_or(now).trunc_subsecs(6);
        if entry_time < now - Duration::minutes(ENTRY_TIME_TOLERANCE_MINUTES) {
            return Err(AppError::ValidationError(
                "Entry time cannot be in the past".to_string(),
            ));
        }
        if entry_time > now + Duration::days(MAX_ADVANCE_BOOKING_DAYS) {
            return Err(AppError::ValidationError(format!(
                "Bookings can be made at most {MAX_ADVANCE_BOOKING_DAYS} days ahead"
            )));
        }

        let quote = match self.quote(&req.quote_request()).await {
            Ok(quote) => quote,
            Err(AppError::Conflict(reason)) => {
                // The slot went while the customer was paying.
                if let PaymentDetails::Online {
                    order_id,
                    payment_id,
                    signature,
                } = &req.payment
                {
                    if self
                        .payments
                        .verify_payment_signature(order_id, payment_id, signature)
                    {
                        self.refund_unusable_payment(order_id, payment_id, None)
                            .await?;
                    }
                }
                return Err(AppError::Conflict(reason));
            }
            Err(e) => return Err(e),
        };

        let (payment_method, payment_status, payment_order_id, payment_id) = match &req.payment {
            PaymentDetails::Online {
                order_id,
                payment_id,
                signature,
            } => {
                self.verify_online_payment(order_id, payment_id, signature, &quote)
                    .await?;
                (
                    PaymentMethod::Online,
                    PaymentStatus::Paid,
                    Some(order_id.clone()),
                    Some(payment_id.clone()),
                )
            }
            PaymentDetails::PayAtExit => {
                if quote.kind == BookingKind::MonthlyPass {
                    return Err(AppError::ValidationError(
                        "Monthly passes must be paid online".to_string(),
                    ));
                }
                (PaymentMethod::PayAtExit, PaymentStatus::Pending, None, None)
            }
        };

        let mut booking = Booking {
            id: Uuid::new_v4(),
            customer_id: customer.id,
            facility_id: quote.facility_id,
            slot_id: quote.slot_id,
            vehicle_number,
            vehicle_type: quote.vehicle_type,
            kind: quote.kind,
            duration_hours: quote.fee.hours,
            entry_time,
            expected_exit_time: entry_time + Duration::hours(i64::from(quote.fee.hours)),
            checked_in_at: None,
            exit_time: None,
            base_fee: quote.fee.base_fee,
            gst: quote.fee.gst,
            total_fee: quote.fee.total_fee,
            payment_method,
            payment_status,
            payment_order_id,
            payment_id,
            status: BookingStatus::Active,
            qr_payload: String::new(),
            created_at: now,
            updated_at: now,
        };
        let payload = QrPayload::for_booking(&booking);
        booking.qr_payload = payload.encode()?;

        let (booking, slot) = match self.store.create_booking_claiming_slot(&booking).await {
            Ok(claimed) => claimed,
            Err(err) => {
                // A reused payment still backs its original booking.
                if let StoreError::Conflict(reason) = &err {
                    tracing::warn!(slot_id = %booking.slot_id, reason = %reason, "Slot claim lost");
                    if reason == SLOT_UNAVAILABLE && booking.payment_status == PaymentStatus::Paid {
                        if let (Some(order_id), Some(payment_id)) =
                            (&booking.payment_order_id, &booking.payment_id)
                        {
                            self.refund_unusable_payment(
                                order_id,
                                payment_id,
                                Some(booking.total_fee),
                            )
                            .await?;
                        }
                    }
                }
                return Err(err.into());
            }
        };

        tracing::info!(
            booking_id = %booking.id,
            customer_id = %customer.id,
            slot_id = %slot.id,
            method = %booking.payment_method,
            total = %booking.total_fee,
            "Booking confirmed"
        );
        self.broadcaster.publish(SlotUpdate::from(&slot)).await;

        let qr_code = payload.render_png_data_url()?;
        Ok(Ticket { booking, qr_code })
    }

    pub async fn check_in(&self, provider: &User, booking_id: Uuid) -> Result<Booking, AppError> {
        let mut booking = self.active_booking(booking_id).await?;
        self.ensure_facility_owner(provider, booking.facility_id).await?;
        if booking.checked_in_at.is_some() {
            return Err(AppError::Conflict("Vehicle is already checked in".to_string()));
        }

        let seen = booking.updated_at;
        let now = Utc::now().trunc_subsecs(6);
        booking.checked_in_at = Some(now);
        booking.updated_at = now;

        let (booking, slot) = self
            .store
            .update_active_booking(&booking, seen, SlotStatus::Occupied)
            .await?;
        tracing::info!(booking_id = %booking.id, slot_id = %slot.id, "Vehicle checked in");
        self.broadcaster.publish(SlotUpdate::from(&slot)).await;
        Ok(booking)
    }

    /// Closes the booking at exit and frees the slot. Pay-at-exit bookings are
    /// re-priced on the hours actually used and settled here.
    pub async fn complete(&self, provider: &User, booking_id: Uuid) -> Result<Booking, AppError> {
        let mut booking = self.active_booking(booking_id).await?;
        self.ensure_facility_owner(provider, booking.facility_id).await?;

        let seen = booking.updated_at;
        let now = Utc::now().trunc_subsecs(6);
        if booking.payment_method == PaymentMethod::PayAtExit
            && booking.payment_status == PaymentStatus::Pending
        {
            let rule = self
                .store
                .get_pricing(booking.facility_id, booking.vehicle_type)
                .await?
                .ok_or_else(|| {
                    AppError::NotFound(format!(
                        "No pricing configured for {} at this facility",
                        booking.vehicle_type
                    ))
                })?;
            let started = booking.checked_in_at.unwrap_or(booking.entry_time);
            let hours = fees::billable_hours(started, now);
            let fee = fees::quote_hourly(&rule, hours, self.gst_percent)?;

            booking.duration_hours = fee.hours;
            booking.base_fee = fee.base_fee;
            booking.gst = fee.gst;
            booking.total_fee = fee.total_fee;
            booking.payment_status = PaymentStatus::Paid;
        }

        booking.exit_time = Some(now);
        booking.status = BookingStatus::Completed;
        booking.updated_at = now;

        let (booking, slot) = self
            .store
            .update_active_booking(&booking, seen, SlotStatus::Free)
            .await?;
        tracing::info!(
            booking_id = %booking.id,
            total = %booking.total_fee,
            "Booking completed"
        );
        self.broadcaster.publish(SlotUpdate::from(&slot)).await;
        Ok(booking)
    }

    /// Cancels a booking that has not started and frees its slot. Online
    /// payments are refunded once the cancellation is stored.
    pub async fn cancel(&self, actor: &User, booking_id: Uuid) -> Result<Booking, AppError> {
        let mut booking = self.active_booking(booking_id).await?;
        if booking.customer_id != actor.id {
            self.ensure_facility_owner(actor, booking.facility_id).await?;
        }
        if booking.checked_in_at.is_some() {
            return Err(AppError::Conflict(
                "Booking has already started and cannot be cancelled".to_string(),
            ));
        }

        let seen = booking.updated_at;
        booking.status = BookingStatus::Cancelled;
        booking.updated_at = Utc::now().trunc_subsecs(6);

        // Stored before any refund; a concurrent check-in leaves `seen` stale.
        let (booking, slot) = self
            .store
            .update_active_booking(&booking, seen, SlotStatus::Free)
            .await?;
        tracing::info!(booking_id = %booking.id, by = %actor.id, "Booking cancelled");
        self.broadcaster.publish(SlotUpdate::from(&slot)).await;

        if booking.payment_method != PaymentMethod::Online
            || booking.payment_status != PaymentStatus::Paid
        {
            return Ok(booking);
        }
        let payment_id = booking.payment_id.clone().ok_or_else(|| {
            AppError::InternalServerError("paid booking without payment id".to_string())
        })?;
        match self.payments.refund(&payment_id, booking.total_fee).await {
            Ok(refund) => {
                tracing::info!(booking_id = %booking.id, refund_id = %refund.refund_id, "Refund issued");
                Ok(self.store.mark_refunded(booking.id).await?)
            }
            Err(e) => {
                tracing::error!(
                    booking_id = %booking.id,
                    payment_id = %payment_id,
                    error = %e,
                    "Booking cancelled but refund failed, needs manual follow-up"
                );
                Err(e.into())
            }
        }
    }

    /// Validates a scanned ticket at the gate of one of the provider's
    /// facilities.
    pub async fn verify_qr(&self, provider: &User, raw: &str) -> Result<Booking, AppError> {
        let invalid = || AppError::ValidationError("Invalid QR code".to_string());

        let payload = QrPayload::decode(raw)?;
        let booking = match self.store.get_booking(payload.ticket_id).await {
            Ok(booking) => booking,
            Err(StoreError::NotFound(_)) => return Err(invalid()),
            Err(e) => return Err(e.into()),
        };
        if !payload.matches(&booking) {
            tracing::warn!(booking_id = %booking.id, "QR payload does not match booking");
            return Err(invalid());
        }
        self.ensure_facility_owner(provider, booking.facility_id).await?;

        if !booking.is_active() {
            return Err(AppError::Conflict(format!(
                "Ticket is no longer valid (booking {})",
                booking.status
            )));
        }
        Ok(booking)
    }

    pub async fn ticket(&self, user: &User, booking_id: Uuid) -> Result<Ticket, AppError> {
        let booking = self.store.get_booking(booking_id).await?;
        if booking.customer_id != user.id {
            self.ensure_facility_owner(user, booking.facility_id).await?;
        }
        let qr_code = QrPayload::for_booking(&booking).render_png_data_url()?;
        Ok(Ticket { booking, qr_code })
    }

    pub async fn history(&self, customer: &User) -> Result<Vec<Booking>, AppError> {
        let filter = BookingFilter {
            customer_id: Some(customer.id),
            ..Default::default()
        };
        Ok(self.store.list_bookings(&filter).await?)
    }

    pub async fn provider_bookings(
        &self,
        provider: &User,
        facility_id: Option<Uuid>,
        status: Option<BookingStatus>,
    ) -> Result<Vec<Booking>, AppError> {
        if let Some(facility_id) = facility_id {
            self.ensure_facility_owner(provider, facility_id).await?;
        }
        let filter = BookingFilter {
            provider_id: Some(provider.id),
            facility_id,
            status,
            ..Default::default()
        };
        Ok(self.store.list_bookings(&filter).await?)
    }

    /// Provider bookings as CSV, optionally limited to one facility.
    pub async fn export_csv(
        &self,
        provider: &User,
        facility_id: Option<Uuid>,
    ) -> Result<Vec<u8>, AppError> {
        let bookings = self.provider_bookings(provider, facility_id, None).await?;

        let mut labels = ExportLabels::default();
        let facilities = self
            .store
            .list_facilities(&FacilityFilter {
                provider_id: Some(provider.id),
                ..Default::default()
            })
            .await?;
        for facility in facilities {
            if facility_id.is_some_and(|id| id != facility.id) {
                continue;
            }
            let slots = self
                .store
                .list_slots(&SlotFilter {
                    facility_id: Some(facility.id),
                    ..Default::default()
                })
                .await?;
            labels
                .slots
                .extend(slots.into_iter().map(|s| (s.id, s.slot_number)));
            labels.facilities.insert(facility.id, facility.name);
        }

        tracing::info!(provider_id = %provider.id, rows = bookings.len(), "Bookings exported");
        export::bookings_csv(&bookings, &labels)
    }

    fn check_selectable(
        &self,
        facility: &Facility,
        slot: &Slot,
        vehicle_type: VehicleType,
    ) -> Result<(), AppError> {
        if slot.facility_id != facility.id {
            return Err(AppError::ValidationError(
                "Slot does not belong to this facility".to_string(),
            ));
        }
        if slot.vehicle_type != vehicle_type {
            return Err(AppError::ValidationError(format!(
                "Slot {} is reserved for {} parking",
                slot.slot_number, slot.vehicle_type
            )));
        }
        if !slot.status.is_bookable() {
            return Err(AppError::Conflict(SLOT_UNAVAILABLE.to_string()));
        }
        Ok(())
    }

    async fn verify_online_payment(
        &self,
        order_id: &str,
        payment_id: &str,
        signature: &str,
        quote: &Quote,
    ) -> Result<(), AppError> {
        if !self
            .payments
            .verify_payment_signature(order_id, payment_id, signature)
        {
            tracing::warn!(order_id = %order_id, "Payment signature mismatch");
            return Err(AppError::PaymentError("Invalid payment signature".to_string()));
        }

        let order = self.payments.fetch_order(order_id).await?;
        if order.amount != quote.fee.total_fee {
            tracing::warn!(
                order_id = %order_id,
                paid = %order.amount,
                expected = %quote.fee.total_fee,
                "Payment amount mismatch"
            );
            return Err(AppError::PaymentError(
                "Payment amount does not match the booking fee".to_string(),
            ));
        }
        Ok(())
    }

    /// Refunds a payment that can no longer back a booking. The payment is
    /// spent in the store first, so a payment that already backs a booking or
    /// was refunded before is left alone. Without a known amount the order is
    /// looked up at the gateway.
    async fn refund_unusable_payment(
        &self,
        order_id: &str,
        payment_id: &str,
        amount: Option<Decimal>,
    ) -> Result<(), AppError> {
        if !self.store.retire_payment(payment_id).await? {
            tracing::warn!(payment_id = %payment_id, "Payment already spent, not refunding");
            return Ok(());
        }

        let amount = match amount {
            Some(amount) => Ok(amount),
            None => self.payments.fetch_order(order_id).await.map(|o| o.amount),
        };
        let refunded = match amount {
            Ok(amount) => self.payments.refund(payment_id, amount).await,
            Err(e) => Err(e),
        };
        match refunded {
            Ok(refund) => tracing::info!(
                payment_id = %payment_id,
                refund_id = %refund.refund_id,
                "Refunded payment for unavailable slot"
            ),
            Err(e) => tracing::error!(
                payment_id = %payment_id,
                error = %e,
                "Refund for unavailable slot failed, needs manual follow-up"
            ),
        }
        Ok(())
    }

    async fn active_booking(&self, booking_id: Uuid) -> Result<Booking, AppError> {
        let booking = self.store.get_booking(booking_id).await?;
        if !booking.is_active() {
            return Err(AppError::Conflict(format!(
                "Booking is already {}",
                booking.status
            )));
        }
        Ok(booking)
    }

    async fn ensure_facility_owner(&self, user: &User, facility_id: Uuid) -> Result<(), AppError> {
        let facility = self.store.get_facility(facility_id).await?;
        if !user.is_provider() || !facility.is_owned_by(user.id) {
            return Err(AppError::Forbidden(
                "You do not manage this facility".to_string(),
            ));
        }
        Ok(())
    }
}
