use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    BookingFilter, FacilityFilter, ParkingStore, SlotFilter, StoreError, StoreResult,
    BOOKING_CHANGED, PAYMENT_ALREADY_USED, SLOT_UNAVAILABLE,
};
use crate::models::{
    Booking, BookingStatus, Facility, Floor, PaymentStatus, PricingRule, Slot, SlotStatus, User,
    VehicleType,
};

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    facilities: HashMap<Uuid, Facility>,
    floors: HashMap<Uuid, Floor>,
    slots: HashMap<Uuid, Slot>,
    pricing: HashMap<(Uuid, VehicleType), PricingRule>,
    bookings: HashMap<Uuid, Booking>,
    /// Payment ids that backed a booking or were refunded.
    spent_payments: HashSet<String>,
}

impl Tables {
    fn has_active_booking(&self, pred: impl Fn(&Booking) -> bool) -> bool {
        self.bookings
            .values()
            .any(|b| b.status == BookingStatus::Active && pred(b))
    }
}

/// In-process store; one write lock serializes every mutation.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

fn slot_order(slot: &Slot) -> (usize, String) {
    (slot.slot_number.len(), slot.slot_number.clone())
}

#[async_trait]
impl ParkingStore for MemoryStore {
    async fn insert_user(&self, user: &User) -> StoreResult<()> {
        let mut t = self.tables.write().await;
        if t.users.values().any(|u| u.email == user.email) {
            return Err(StoreError::Conflict("Email is already registered".to_string()));
        }
        t.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn get_user(&self, id: Uuid) -> StoreResult<User> {
        let t = self.tables.read().await;
        t.users.get(&id).cloned().ok_or(StoreError::NotFound("user"))
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let t = self.tables.read().await;
        Ok(t.users.values().find(|u| u.email == email).cloned())
    }

    async fn update_user(&self, user: &User) -> StoreResult<()> {
        let mut t = self.tables.write().await;
        let stored = t.users.get_mut(&user.id).ok_or(StoreError::NotFound("user"))?;
        stored.name = user.name.clone();
        stored.phone = user.phone.clone();
        stored.updated_at = user.updated_at;
        Ok(())
    }

    async fn insert_facility(&self, facility: &Facility) -> StoreResult<()> {
        let mut t = self.tables.write().await;
        t.facilities.insert(facility.id, facility.clone());
        Ok(())
    }

    async fn get_facility(&self, id: Uuid) -> StoreResult<Facility> {
        let t = self.tables.read().await;
        t.facilities
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound("facility"))
    }

    async fn list_facilities(&self, filter: &FacilityFilter) -> StoreResult<Vec<Facility>> {
        let t = self.tables.read().await;
        let mut facilities: Vec<Facility> = t
            .facilities
            .values()
            .filter(|f| {
                filter
                    .city
                    .as_deref()
                    .map_or(true, |city| f.city.eq_ignore_ascii_case(city.trim()))
            })
            .filter(|f| {
                filter
                    .query
                    .as_deref()
                    .map_or(true, |q| contains_ci(&f.name, q) || contains_ci(&f.address, q))
            })
            .filter(|f| filter.provider_id.map_or(true, |p| f.provider_id == p))
            .cloned()
            .collect();
        facilities.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(facilities)
    }

    async fn update_facility(&self, facility: &Facility) -> StoreResult<()> {
        let mut t = self.tables.write().await;
        let stored = t
            .facilities
            .get_mut(&facility.id)
            .ok_or(StoreError::NotFound("facility"))?;
        *stored = facility.clone();
        Ok(())
    }

    async fn delete_facility(&self, id: Uuid) -> StoreResult<()> {
        let mut t = self.tables.write().await;
        if !t.facilities.contains_key(&id) {
            return Err(StoreError::NotFound("facility"));
        }
        if t.has_active_booking(|b| b.facility_id == id) {
            return Err(StoreError::Conflict(
                "Facility has active bookings".to_string(),
            ));
        }
        t.facilities.remove(&id);
        t.floors.retain(|_, f| f.facility_id != id);
        t.slots.retain(|_, s| s.facility_id != id);
        t.pricing.retain(|(facility_id, _), _| *facility_id != id);
        t.bookings.retain(|_, b| b.facility_id != id);
        Ok(())
    }

    async fn insert_floor(&self, floor: &Floor) -> StoreResult<()> {
        let mut t = self.tables.write().await;
        if !t.facilities.contains_key(&floor.facility_id) {
            return Err(StoreError::NotFound("facility"));
        }
        if t
            .floors
            .values()
            .any(|f| f.facility_id == floor.facility_id && f.number == floor.number)
        {
            return Err(StoreError::Conflict(format!(
                "Floor {} already exists",
                floor.number
            )));
        }
        t.floors.insert(floor.id, floor.clone());
        Ok(())
    }

    async fn get_floor(&self, id: Uuid) -> StoreResult<Floor> {
        let t = self.tables.read().await;
        t.floors.get(&id).cloned().ok_or(StoreError::NotFound("floor"))
    }

    async fn list_floors(&self, facility_id: Uuid) -> StoreResult<Vec<Floor>> {
        let t = self.tables.read().await;
        let mut floors: Vec<Floor> = t
            .floors
            .values()
            .filter(|f| f.facility_id == facility_id)
            .cloned()
            .collect();
        floors.sort_by_key(|f| f.number);
        Ok(floors)
    }

    async fn delete_floor(&self, id: Uuid) -> StoreResult<()> {
        let mut t = self.tables.write().await;
        if !t.floors.contains_key(&id) {
            return Err(StoreError::NotFound("floor"));
        }
        if t.slots.values().any(|s| s.floor_id == id && s.status.is_held()) {
            return Err(StoreError::Conflict(
                "Floor has reserved or occupied slots".to_string(),
            ));
        }
        let slot_ids: Vec<Uuid> = t
            .slots
            .values()
            .filter(|s| s.floor_id == id)
            .map(|s| s.id)
            .collect();
        t.bookings.retain(|_, b| !slot_ids.contains(&b.slot_id));
        t.slots.retain(|_, s| s.floor_id != id);
        t.floors.remove(&id);
        Ok(())
    }

    async fn insert_slots(&self, slots: &[Slot]) -> StoreResult<Vec<Slot>> {
        let mut t = self.tables.write().await;
        let mut created = Vec::with_capacity(slots.len());
        for slot in slots {
            if !t.floors.contains_key(&slot.floor_id) {
                return Err(StoreError::NotFound("floor"));
            }
            let taken = t
                .slots
                .values()
                .any(|s| s.floor_id == slot.floor_id && s.slot_number == slot.slot_number);
            if !taken {
                t.slots.insert(slot.id, slot.clone());
                created.push(slot.clone());
            }
        }
        Ok(created)
    }

    async fn get_slot(&self, id: Uuid) -> StoreResult<Slot> {
        let t = self.tables.read().await;
        t.slots.get(&id).cloned().ok_or(StoreError::NotFound("slot"))
    }

    async fn list_slots(&self, filter: &SlotFilter) -> StoreResult<Vec<Slot>> {
        let t = self.tables.read().await;
        let mut slots: Vec<Slot> = t
            .slots
            .values()
            .filter(|s| filter.facility_id.map_or(true, |id| s.facility_id == id))
            .filter(|s| filter.floor_id.map_or(true, |id| s.floor_id == id))
            .filter(|s| filter.vehicle_type.map_or(true, |vt| s.vehicle_type == vt))
            .filter(|s| filter.status.map_or(true, |st| s.status == st))
            .cloned()
            .collect();
        slots.sort_by_key(slot_order);
        Ok(slots)
    }

    async fn transition_slot(
        &self,
        id: Uuid,
        from: SlotStatus,
        to: SlotStatus,
    ) -> StoreResult<Slot> {
        let mut t = self.tables.write().await;
        let slot = t.slots.get_mut(&id).ok_or(StoreError::NotFound("slot"))?;
        if slot.status != from {
            return Err(StoreError::Conflict(format!(
                "Slot is {}, expected {}",
                slot.status, from
            )));
        }
        slot.status = to;
        slot.updated_at = Utc::now();
        Ok(slot.clone())
    }

    async fn delete_slot(&self, id: Uuid) -> StoreResult<()> {
        let mut t = self.tables.write().await;
        let slot = t.slots.get(&id).ok_or(StoreError::NotFound("slot"))?;
        if slot.status.is_held() {
            return Err(StoreError::Conflict(format!(
                "Slot is {} and cannot be deleted",
                slot.status
            )));
        }
        t.slots.remove(&id);
        t.bookings.retain(|_, b| b.slot_id != id);
        Ok(())
    }

    async fn upsert_pricing(&self, rule: &PricingRule) -> StoreResult<PricingRule> {
        let mut t = self.tables.write().await;
        if !t.facilities.contains_key(&rule.facility_id) {
            return Err(StoreError::NotFound("facility"));
        }
        let key = (rule.facility_id, rule.vehicle_type);
        let stored = match t.pricing.get(&key) {
            Some(existing) => PricingRule {
                id: existing.id,
                created_at: existing.created_at,
                ..rule.clone()
            },
            None => rule.clone(),
        };
        t.pricing.insert(key, stored.clone());
        Ok(stored)
    }

    async fn get_pricing(
        &self,
        facility_id: Uuid,
        vehicle_type: VehicleType,
    ) -> StoreResult<Option<PricingRule>> {
        let t = self.tables.read().await;
        Ok(t.pricing.get(&(facility_id, vehicle_type)).cloned())
    }

    async fn list_pricing(&self, facility_id: Uuid) -> StoreResult<Vec<PricingRule>> {
        let t = self.tables.read().await;
        let mut rules: Vec<PricingRule> = t
            .pricing
            .values()
            .filter(|r| r.facility_id == facility_id)
            .cloned()
            .collect();
        rules.sort_by_key(|r| r.vehicle_type.as_str());
        Ok(rules)
    }

    async fn delete_pricing(
        &self,
        facility_id: Uuid,
        vehicle_type: VehicleType,
    ) -> StoreResult<()> {
        let mut t = self.tables.write().await;
        t.pricing
            .remove(&(facility_id, vehicle_type))
            .map(|_| ())
            .ok_or(StoreError::NotFound("pricing rule"))
    }

    async fn create_booking_claiming_slot(&self, booking: &Booking) -> StoreResult<(Booking, Slot)> {
        let mut t = self.tables.write().await;
        if let Some(payment_id) = &booking.payment_id {
            if t.spent_payments.contains(payment_id) {
                return Err(StoreError::Conflict(PAYMENT_ALREADY_USED.to_string()));
            }
        }
        let slot = t
            .slots
            .get_mut(&booking.slot_id)
            .ok_or(StoreError::NotFound("slot"))?;
        if !slot.status.is_bookable() {
            return Err(StoreError::Conflict(SLOT_UNAVAILABLE.to_string()));
        }
        slot.status = SlotStatus::Reserved;
        slot.updated_at = Utc::now();
        let slot = slot.clone();

        if let Some(payment_id) = &booking.payment_id {
            t.spent_payments.insert(payment_id.clone());
        }
        t.bookings.insert(booking.id, booking.clone());
        Ok((booking.clone(), slot))
    }

    async fn get_booking(&self, id: Uuid) -> StoreResult<Booking> {
        let t = self.tables.read().await;
        t.bookings
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound("booking"))
    }

    async fn list_bookings(&self, filter: &BookingFilter) -> StoreResult<Vec<Booking>> {
        let t = self.tables.read().await;
        let mut bookings: Vec<Booking> = t
            .bookings
            .values()
            .filter(|b| filter.customer_id.map_or(true, |id| b.customer_id == id))
            .filter(|b| filter.facility_id.map_or(true, |id| b.facility_id == id))
            .filter(|b| filter.slot_id.map_or(true, |id| b.slot_id == id))
            .filter(|b| filter.status.map_or(true, |st| b.status == st))
            .filter(|b| {
                filter.provider_id.map_or(true, |provider| {
                    t.facilities
                        .get(&b.facility_id)
                        .is_some_and(|f| f.provider_id == provider)
                })
            })
            .cloned()
            .collect();
        bookings.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(bookings)
    }

    async fn update_active_booking(
        &self,
        booking: &Booking,
        seen: DateTime<Utc>,
        slot_status: SlotStatus,
    ) -> StoreResult<(Booking, Slot)> {
        let mut t = self.tables.write().await;
        let stored = t
            .bookings
            .get(&booking.id)
            .ok_or(StoreError::NotFound("booking"))?;
        if !stored.is_active() {
            return Err(StoreError::Conflict(format!(
                "Booking is already {}",
                stored.status
            )));
        }
        if stored.updated_at != seen {
            return Err(StoreError::Conflict(BOOKING_CHANGED.to_string()));
        }
        let slot = t
            .slots
            .get_mut(&booking.slot_id)
            .ok_or(StoreError::NotFound("slot"))?;
        slot.status = slot_status;
        slot.updated_at = Utc::now();
        let slot = slot.clone();

        t.bookings.insert(booking.id, booking.clone());
        Ok((booking.clone(), slot))
    }

    async fn mark_refunded(&self, booking_id: Uuid) -> StoreResult<Booking> {
        let mut t = self.tables.write().await;
        let booking = t
            .bookings
            .get_mut(&booking_id)
            .ok_or(StoreError::NotFound("booking"))?;
        if booking.payment_status != PaymentStatus::Paid {
            return Err(StoreError::Conflict(format!(
                "Payment is {}, not paid",
                booking.payment_status
            )));
        }
        booking.payment_status = PaymentStatus::Refunded;
        booking.updated_at = Utc::now();
        Ok(booking.clone())
    }

    async fn retire_payment(&self, payment_id: &str) -> StoreResult<bool> {
        let mut t = self.tables.write().await;
        Ok(t.spent_payments.insert(payment_id.to_string()))
    }
}
