//! Persistence for the parking domain.
//!
//! `PgStore` is the production backend; `MemoryStore` keeps the same
//! contract in process memory for tests and database-less local runs.
//! Every operation that must not race (claiming a slot for a booking,
//! releasing it again, deleting something that may still be held) is a
//! single store call so each backend can make it atomic.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    Booking, BookingStatus, Facility, Floor, PricingRule, Slot, SlotStatus, User, VehicleType,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

pub const SLOT_UNAVAILABLE: &str = "Slot is no longer available";
pub const PAYMENT_ALREADY_USED: &str = "Payment has already been used for another booking";
pub const BOOKING_CHANGED: &str = "Booking was changed by another request, reload and retry";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, Default)]
pub struct FacilityFilter {
    pub city: Option<String>,
    /// Case-insensitive substring of name or address.
    pub query: Option<String>,
    pub provider_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default)]
pub struct SlotFilter {
    pub facility_id: Option<Uuid>,
    pub floor_id: Option<Uuid>,
    pub vehicle_type: Option<VehicleType>,
    pub status: Option<SlotStatus>,
}

#[derive(Debug, Clone, Default)]
pub struct BookingFilter {
    pub customer_id: Option<Uuid>,
    pub facility_id: Option<Uuid>,
    /// Bookings at any facility owned by this provider.
    pub provider_id: Option<Uuid>,
    pub slot_id: Option<Uuid>,
    pub status: Option<BookingStatus>,
}

#[async_trait]
pub trait ParkingStore: Send + Sync {
    async fn insert_user(&self, user: &User) -> StoreResult<()>;
    async fn get_user(&self, id: Uuid) -> StoreResult<User>;
    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>>;
    async fn update_user(&self, user: &User) -> StoreResult<()>;

    async fn insert_facility(&self, facility: &Facility) -> StoreResult<()>;
    async fn get_facility(&self, id: Uuid) -> StoreResult<Facility>;
    async fn list_facilities(&self, filter: &FacilityFilter) -> StoreResult<Vec<Facility>>;
    async fn update_facility(&self, facility: &Facility) -> StoreResult<()>;
    /// Fails with `Conflict` while the facility has active bookings.
    async fn delete_facility(&self, id: Uuid) -> StoreResult<()>;

    /// Fails with `Conflict` if the facility already has a floor with this number.
    async fn insert_floor(&self, floor: &Floor) -> StoreResult<()>;
    async fn get_floor(&self, id: Uuid) -> StoreResult<Floor>;
    async fn list_floors(&self, facility_id: Uuid) -> StoreResult<Vec<Floor>>;
    /// Fails with `Conflict` while any slot on the floor is reserved or occupied.
    async fn delete_floor(&self, id: Uuid) -> StoreResult<()>;

    /// Inserts the slots whose number is not yet taken on their floor and
    /// returns the ones actually created.
    async fn insert_slots(&self, slots: &[Slot]) -> StoreResult<Vec<Slot>>;
    async fn get_slot(&self, id: Uuid) -> StoreResult<Slot>;
    async fn list_slots(&self, filter: &SlotFilter) -> StoreResult<Vec<Slot>>;
    /// Conditional status change: succeeds only if the slot is currently `from`.
    async fn transition_slot(&self, id: Uuid, from: SlotStatus, to: SlotStatus)
        -> StoreResult<Slot>;
    /// Fails with `Conflict` unless the slot is free or under maintenance.
    async fn delete_slot(&self, id: Uuid) -> StoreResult<()>;

    async fn upsert_pricing(&self, rule: &PricingRule) -> StoreResult<PricingRule>;
    async fn get_pricing(
        &self,
        facility_id: Uuid,
        vehicle_type: VehicleType,
    ) -> StoreResult<Option<PricingRule>>;
    async fn list_pricing(&self, facility_id: Uuid) -> StoreResult<Vec<PricingRule>>;
    async fn delete_pricing(&self, facility_id: Uuid, vehicle_type: VehicleType)
        -> StoreResult<()>;

    /// Moves the booking's slot from free to reserved, stores the booking and
    /// spends its payment, as one atomic step. A slot that is not free yields
    /// `Conflict(SLOT_UNAVAILABLE)`; a payment that was spent before yields
    /// `Conflict(PAYMENT_ALREADY_USED)`.
    async fn create_booking_claiming_slot(&self, booking: &Booking) -> StoreResult<(Booking, Slot)>;
    async fn get_booking(&self, id: Uuid) -> StoreResult<Booking>;
    async fn list_bookings(&self, filter: &BookingFilter) -> StoreResult<Vec<Booking>>;
    /// Persists an active booking together with the new status of its slot.
    /// `seen` is the `updated_at` the caller read; the write fails with
    /// `Conflict` if the stored booking changed since then or is no longer
    /// active.
    async fn update_active_booking(
        &self,
        booking: &Booking,
        seen: DateTime<Utc>,
        slot_status: SlotStatus,
    ) -> StoreResult<(Booking, Slot)>;
    /// Moves a booking's payment from paid to refunded.
    async fn mark_refunded(&self, booking_id: Uuid) -> StoreResult<Booking>;

    /// Spends a payment that will not back any booking because it is being
    /// refunded. Returns `false` when the payment was already spent, either by
    /// a booking or by an earlier refund, and must not be refunded again.
    async fn retire_payment(&self, payment_id: &str) -> StoreResult<bool>;
}
