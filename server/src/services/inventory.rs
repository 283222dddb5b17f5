//! Provider-managed inventory: facilities, floors, slots and pricing rules.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use chrono::{FixedOffset, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{
    Facility, Floor, PricingRule, Slot, SlotStatus, SlotSummary, User, VehicleType,
};
use crate::services::realtime::{SlotBroadcaster, SlotUpdate};
use crate::store::{FacilityFilter, ParkingStore, SlotFilter};
use crate::utils::error::AppError;

pub const MAX_BULK_SLOTS: u32 = 500;
const DEFAULT_SEARCH_RADIUS_KM: f64 = 10.0;

#[derive(Debug, Clone, Deserialize)]
pub struct FacilityInput {
    pub name: String,
    pub address: String,
    pub city: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default = "default_floors")]
    pub total_floors: i32,
    pub open_time: Option<NaiveTime>,
    pub close_time: Option<NaiveTime>,
    #[serde(default)]
    pub amenities: Vec<String>,
}

fn default_floors() -> i32 {
    1
}

impl FacilityInput {
    fn validate(&self) -> Result<(), AppError> {
        if self.name.trim().is_empty() || self.address.trim().is_empty() {
            return Err(AppError::ValidationError(
                "Name and address are required".to_string(),
            ));
        }
        if self.city.trim().is_empty() {
            return Err(AppError::ValidationError("City is required".to_string()));
        }
        validate_coordinates(self.latitude, self.longitude)?;
        if self.total_floors < 1 {
            return Err(AppError::ValidationError(
                "A facility needs at least one floor".to_string(),
            ));
        }
        if self.open_time.is_some() != self.close_time.is_some() {
            return Err(AppError::ValidationError(
                "Set both open_time and close_time, or neither".to_string(),
            ));
        }
        Ok(())
    }
}

fn validate_coordinates(latitude: f64, longitude: f64) -> Result<(), AppError> {
    if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
        return Err(AppError::ValidationError("Invalid coordinates".to_string()));
    }
    Ok(())
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FacilitySearch {
    pub city: Option<String>,
    pub q: Option<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub radius_km: Option<f64>,
    pub vehicle_type: Option<VehicleType>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FacilityListing {
    #[serde(flatten)]
    pub facility: Facility,
    pub free_slots: i64,
    pub open_now: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance_km: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FacilityDetail {
    #[serde(flatten)]
    pub facility: Facility,
    pub floors: Vec<Floor>,
    pub pricing: Vec<PricingRule>,
    pub slots: SlotSummary,
    pub open_now: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FloorInput {
    pub number: i32,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SlotInput {
    pub slot_number: String,
    pub vehicle_type: VehicleType,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BulkSlotInput {
    #[serde(default)]
    pub prefix: String,
    #[serde(default = "default_start")]
    pub start: u32,
    pub count: u32,
    pub vehicle_type: VehicleType,
}

fn default_start() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkSlotResult {
    pub created: Vec<Slot>,
    pub skipped: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PricingInput {
    pub vehicle_type: VehicleType,
    pub hourly_rate: Decimal,
    pub daily_max: Decimal,
    pub monthly_pass_rate: Option<Decimal>,
}

impl PricingInput {
    fn validate(&self) -> Result<(), AppError> {
        if self.hourly_rate <= Decimal::ZERO {
            return Err(AppError::ValidationError(
                "hourly_rate must be positive".to_string(),
            ));
        }
        if self.daily_max < self.hourly_rate {
            return Err(AppError::ValidationError(
                "daily_max cannot be lower than hourly_rate".to_string(),
            ));
        }
        if matches!(self.monthly_pass_rate, Some(rate) if rate <= Decimal::ZERO) {
            return Err(AppError::ValidationError(
                "monthly_pass_rate must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Splits `{prefix}{n}` for `n` in `start..start + count` into numbers that
/// still need creating and numbers already present on the floor.
pub fn plan_bulk_slots(
    existing: &HashSet<String>,
    prefix: &str,
    start: u32,
    count: u32,
) -> (Vec<String>, Vec<String>) {
    let prefix = prefix.trim();
    (start..start.saturating_add(count))
        .map(|n| format!("{prefix}{n}"))
        .partition(|number| !existing.contains(number))
}

#[derive(Clone)]
pub struct InventoryService {
    store: Arc<dyn ParkingStore>,
    broadcaster: SlotBroadcaster,
    local_offset: FixedOffset,
}

impl InventoryService {
    pub fn new(
        store: Arc<dyn ParkingStore>,
        broadcaster: SlotBroadcaster,
        local_offset: FixedOffset,
    ) -> Self {
        Self {
            store,
            broadcaster,
            local_offset,
        }
    }

    fn local_time(&self) -> NaiveTime {
        Utc::now().with_timezone(&self.local_offset).time()
    }

    // Facilities

    pub async fn create_facility(
        &self,
        provider: &User,
        input: FacilityInput,
    ) -> Result<Facility, AppError> {
        input.validate()?;
        let now = Utc::now();
        let facility = Facility {
            id: Uuid::new_v4(),
            provider_id: provider.id,
            name: input.name.trim().to_string(),
            address: input.address.trim().to_string(),
            city: input.city.trim().to_string(),
            latitude: input.latitude,
            longitude: input.longitude,
            total_floors: input.total_floors,
            open_time: input.open_time,
            close_time: input.close_time,
            amenities: input.amenities,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_facility(&facility).await?;

        tracing::info!(facility_id = %facility.id, provider_id = %provider.id, "Facility created");
        Ok(facility)
    }

    pub async fn update_facility(
        &self,
        provider: &User,
        facility_id: Uuid,
        input: FacilityInput,
    ) -> Result<Facility, AppError> {
        input.validate()?;
        let mut facility = self.owned_facility(provider, facility_id).await?;

        facility.name = input.name.trim().to_string();
        facility.address = input.address.trim().to_string();
        facility.city = input.city.trim().to_string();
        facility.latitude = input.latitude;
        facility.longitude = input.longitude;
        facility.total_floors = input.total_floors;
        facility.open_time = input.open_time;
        facility.close_time = input.close_time;
        facility.amenities = input.amenities;
        facility.updated_at = Utc::now();

        self.store.update_facility(&facility).await?;
        Ok(facility)
    }

    pub async fn delete_facility(&self, provider: &User, facility_id: Uuid) -> Result<(), AppError> {
        self.owned_facility(provider, facility_id).await?;
        self.store.delete_facility(facility_id).await?;
        tracing::info!(facility_id = %facility_id, "Facility deleted");
        Ok(())
    }

    /// Loads a facility the caller must own.
    pub async fn owned_facility(&self, user: &User, facility_id: Uuid) -> Result<Facility, AppError> {
        let facility = self.store.get_facility(facility_id).await?;
        if !user.is_provider() || !facility.is_owned_by(user.id) {
            return Err(AppError::Forbidden(
                "You do not manage this facility".to_string(),
            ));
        }
        Ok(facility)
    }

    pub async fn provider_facilities(&self, provider: &User) -> Result<Vec<Facility>, AppError> {
        let filter = FacilityFilter {
            provider_id: Some(provider.id),
            ..Default::default()
        };
        Ok(self.store.list_facilities(&filter).await?)
    }

    pub async fn search(&self, search: &FacilitySearch) -> Result<Vec<FacilityListing>, AppError> {
        let origin = match (search.lat, search.lng) {
            (Some(lat), Some(lng)) => {
                validate_coordinates(lat, lng)?;
                Some((lat, lng))
            }
            (None, None) => None,
            _ => {
                return Err(AppError::ValidationError(
                    "lat and lng must be given together".to_string(),
                ))
            }
        };
        let radius = search.radius_km.unwrap_or(DEFAULT_SEARCH_RADIUS_KM);
        if radius <= 0.0 {
            return Err(AppError::ValidationError(
                "radius_km must be positive".to_string(),
            ));
        }

        let filter = FacilityFilter {
            city: search.city.clone().filter(|c| !c.trim().is_empty()),
            query: search.q.clone().filter(|q| !q.trim().is_empty()),
            provider_id: None,
        };
        let facilities = self.store.list_facilities(&filter).await?;
        let now = self.local_time();

        let mut listings = Vec::with_capacity(facilities.len());
        for facility in facilities {
            let distance_km = origin.map(|(lat, lng)| facility.distance_km(lat, lng));
            if matches!(distance_km, Some(d) if d > radius) {
                continue;
            }

            let free = self
                .store
                .list_slots(&SlotFilter {
                    facility_id: Some(facility.id),
                    vehicle_type: search.vehicle_type,
                    status: Some(SlotStatus::Free),
                    ..Default::default()
                })
                .await?;

            listings.push(FacilityListing {
                open_now: facility.is_open_at(now),
                facility,
                free_slots: free.len() as i64,
                distance_km,
            });
        }

        if origin.is_some() {
            listings.sort_by(|a, b| {
                a.distance_km
                    .partial_cmp(&b.distance_km)
                    .unwrap_or(Ordering::Equal)
            });
        }
        Ok(listings)
    }

    pub async fn facility_detail(&self, facility_id: Uuid) -> Result<FacilityDetail, AppError> {
        let facility = self.store.get_facility(facility_id).await?;
        let floors = self.store.list_floors(facility_id).await?;
        let pricing = self.store.list_pricing(facility_id).await?;
        let slots = self
            .store
            .list_slots(&SlotFilter {
                facility_id: Some(facility_id),
                ..Default::default()
            })
            .await?;

        Ok(FacilityDetail {
            open_now: facility.is_open_at(self.local_time()),
            facility,
            floors,
            pricing,
            slots: SlotSummary::from_slots(&slots),
        })
    }

    // Floors

    pub async fn add_floor(
        &self,
        provider: &User,
        facility_id: Uuid,
        input: FloorInput,
    ) -> Result<Floor, AppError> {
        self.owned_facility(provider, facility_id).await?;

        let floor = Floor {
            id: Uuid::new_v4(),
            facility_id,
            number: input.number,
            name: input
                .name
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| format!("Level {}", input.number)),
            created_at: Utc::now(),
        };
        self.store.insert_floor(&floor).await?;
        Ok(floor)
    }

    pub async fn list_floors(&self, facility_id: Uuid) -> Result<Vec<Floor>, AppError> {
        self.store.get_facility(facility_id).await?;
        Ok(self.store.list_floors(facility_id).await?)
    }

    pub async fn delete_floor(&self, provider: &User, floor_id: Uuid) -> Result<(), AppError> {
        let floor = self.store.get_floor(floor_id).await?;
        self.owned_facility(provider, floor.facility_id).await?;
        self.store.delete_floor(floor_id).await?;
        Ok(())
    }

    // Slots

    pub async fn create_slot(
        &self,
        provider: &User,
        floor_id: Uuid,
        input: SlotInput,
    ) -> Result<Slot, AppError> {
        let floor = self.store.get_floor(floor_id).await?;
        self.owned_facility(provider, floor.facility_id).await?;

        let number = input.slot_number.trim();
        if number.is_empty() || number.len() > 20 {
            return Err(AppError::ValidationError(
                "slot_number must be 1 to 20 characters".to_string(),
            ));
        }

        let slot = Slot::new(floor.facility_id, floor.id, number.to_string(), input.vehicle_type);
        let created = self.store.insert_slots(std::slice::from_ref(&slot)).await?;
        created.into_iter().next().ok_or_else(|| {
            AppError::Conflict(format!("Slot {number} already exists on this floor"))
        })
    }

    pub async fn bulk_create_slots(
        &self,
        provider: &User,
        floor_id: Uuid,
        input: BulkSlotInput,
    ) -> Result<BulkSlotResult, AppError> {
        if input.count == 0 || input.count > MAX_BULK_SLOTS {
            return Err(AppError::ValidationError(format!(
                "count must be between 1 and {MAX_BULK_SLOTS}"
            )));
        }
        let floor = self.store.get_floor(floor_id).await?;
        self.owned_facility(provider, floor.facility_id).await?;

        let existing: HashSet<String> = self
            .store
            .list_slots(&SlotFilter {
                floor_id: Some(floor.id),
                ..Default::default()
            })
            .await?
            .into_iter()
            .map(|s| s.slot_number)
            .collect();

        let (to_create, mut skipped) =
            plan_bulk_slots(&existing, &input.prefix, input.start, input.count);
        let slots: Vec<Slot> = to_create
            .iter()
            .map(|number| Slot::new(floor.facility_id, floor.id, number.clone(), input.vehicle_type))
            .collect();

        let created = self.store.insert_slots(&slots).await?;
        // Numbers taken by a concurrent insert since the plan was made.
        if created.len() != slots.len() {
            let created_numbers: HashSet<&str> =
                created.iter().map(|s| s.slot_number.as_str()).collect();
            skipped.extend(
                to_create
                    .into_iter()
                    .filter(|n| !created_numbers.contains(n.as_str())),
            );
        }

        tracing::info!(
            floor_id = %floor.id,
            created = created.len(),
            skipped = skipped.len(),
            "Bulk slot creation"
        );
        Ok(BulkSlotResult { created, skipped })
    }

    pub async fn list_slots(&self, filter: SlotFilter) -> Result<Vec<Slot>, AppError> {
        if let Some(facility_id) = filter.facility_id {
            self.store.get_facility(facility_id).await?;
        }
        Ok(self.store.list_slots(&filter).await?)
    }

    /// Providers may only toggle a slot between free and maintenance.
    pub async fn set_slot_status(
        &self,
        provider: &User,
        slot_id: Uuid,
        status: SlotStatus,
    ) -> Result<Slot, AppError> {
        let slot = self.store.get_slot(slot_id).await?;
        self.owned_facility(provider, slot.facility_id).await?;

        let from = match status {
            SlotStatus::Free => SlotStatus::Maintenance,
            SlotStatus::Maintenance => SlotStatus::Free,
            SlotStatus::Reserved | SlotStatus::Occupied => {
                return Err(AppError::ValidationError(
                    "Slots can only be set to free or maintenance".to_string(),
                ))
            }
        };
        if slot.status == status {
            return Ok(slot);
        }
        if slot.status != from {
            return Err(AppError::Conflict(format!(
                "Slot {} is {} and cannot be changed",
                slot.slot_number, slot.status
            )));
        }

        let slot = self.store.transition_slot(slot_id, from, status).await?;
        tracing::info!(slot_id = %slot.id, status = %slot.status, "Slot status changed");
        self.broadcaster.publish(SlotUpdate::from(&slot)).await;
        Ok(slot)
    }

    pub async fn delete_slot(&self, provider: &User, slot_id: Uuid) -> Result<(), AppError> {
        let slot = self.store.get_slot(slot_id).await?;
        self.owned_facility(provider, slot.facility_id).await?;
        self.store.delete_slot(slot_id).await?;
        Ok(())
    }

    // Pricing

    pub async fn upsert_pricing(
        &self,
        provider: &User,
        facility_id: Uuid,
        input: PricingInput,
    ) -> Result<PricingRule, AppError> {
        input.validate()?;
        self.owned_facility(provider, facility_id).await?;

        let now = Utc::now();
        let rule = PricingRule {
            id: Uuid::new_v4(),
            facility_id,
            vehicle_type: input.vehicle_type,
            hourly_rate: input.hourly_rate,
            daily_max: input.daily_max,
            monthly_pass_rate: input.monthly_pass_rate,
            created_at: now,
            updated_at: now,
        };
        Ok(self.store.upsert_pricing(&rule).await?)
    }

    pub async fn list_pricing(&self, facility_id: Uuid) -> Result<Vec<PricingRule>, AppError> {
        self.store.get_facility(facility_id).await?;
        Ok(self.store.list_pricing(facility_id).await?)
    }

    pub async fn delete_pricing(
        &self,
        provider: &User,
        facility_id: Uuid,
        vehicle_type: VehicleType,
    ) -> Result<(), AppError> {
        self.owned_facility(provider, facility_id).await?;
        self.store.delete_pricing(facility_id, vehicle_type).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn bulk_plan_skips_existing_numbers() {
        let existing: HashSet<String> = ["A2".to_string(), "A4".to_string()].into();
        let (create, skip) = plan_bulk_slots(&existing, "A", 1, 5);
        assert_eq!(create, vec!["A1", "A3", "A5"]);
        assert_eq!(skip, vec!["A2", "A4"]);
    }

    #[test]
    fn bulk_plan_numbers_without_padding() {
        let (create, _) = plan_bulk_slots(&HashSet::new(), "B-", 9, 3);
        assert_eq!(create, vec!["B-9", "B-10", "B-11"]);
    }

    #[test]
    fn pricing_requires_cap_at_least_hourly_rate() {
        let input = PricingInput {
            vehicle_type: VehicleType::Car,
            hourly_rate: dec!(50),
            daily_max: dec!(40),
            monthly_pass_rate: None,
        };
        assert!(input.validate().is_err());

        let ok = PricingInput {
            daily_max: dec!(500),
            ..input
        };
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn facility_hours_must_come_in_pairs() {
        let input = FacilityInput {
            name: "Central".to_string(),
            address: "1 MG Road".to_string(),
            city: "Bengaluru".to_string(),
            latitude: 12.97,
            longitude: 77.59,
            total_floors: 2,
            open_time: NaiveTime::from_hms_opt(8, 0, 0),
            close_time: None,
            amenities: vec![],
        };
        assert!(input.validate().is_err());
    }

    #[test]
    fn coordinates_are_range_checked() {
        assert!(validate_coordinates(12.9, 77.6).is_ok());
        assert!(validate_coordinates(91.0, 0.0).is_err());
        assert!(validate_coordinates(0.0, -181.0).is_err());
    }
}
