use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "vehicle_type", rename_all = "snake_case")]
pub enum VehicleType {
    Car,
    Bike,
    Truck,
}

impl VehicleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VehicleType::Car => "car",
            VehicleType::Bike => "bike",
            VehicleType::Truck => "truck",
        }
    }
}

impl fmt::Display for VehicleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "slot_status", rename_all = "snake_case")]
pub enum SlotStatus {
    Free,
    Occupied,
    Reserved,
    Maintenance,
}

impl SlotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotStatus::Free => "free",
            SlotStatus::Occupied => "occupied",
            SlotStatus::Reserved => "reserved",
            SlotStatus::Maintenance => "maintenance",
        }
    }

    /// Only free slots can be picked for a new booking.
    pub fn is_bookable(&self) -> bool {
        matches!(self, SlotStatus::Free)
    }

    /// Reserved and occupied slots carry a live booking.
    pub fn is_held(&self) -> bool {
        matches!(self, SlotStatus::Reserved | SlotStatus::Occupied)
    }
}

impl fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Slot {
    pub id: Uuid,
    pub facility_id: Uuid,
    pub floor_id: Uuid,
    pub slot_number: String,
    pub vehicle_type: VehicleType,
    pub status: SlotStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Slot {
    pub fn new(facility_id: Uuid, floor_id: Uuid, slot_number: String, vehicle_type: VehicleType) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            facility_id,
            floor_id,
            slot_number,
            vehicle_type,
            status: SlotStatus::Free,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SlotSummary {
    pub total: i64,
    pub free: i64,
    pub reserved: i64,
    pub occupied: i64,
    pub maintenance: i64,
}

impl SlotSummary {
    pub fn from_slots<'a>(slots: impl IntoIterator<Item = &'a Slot>) -> Self {
        slots.into_iter().fold(Self::default(), |mut acc, slot| {
            acc.total += 1;
            match slot.status {
                SlotStatus::Free => acc.free += 1,
                SlotStatus::Reserved => acc.reserved += 1,
                SlotStatus::Occupied => acc.occupied += 1,
                SlotStatus::Maintenance => acc.maintenance += 1,
            }
            acc
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_free_slots_are_bookable() {
        assert!(SlotStatus::Free.is_bookable());
        assert!(!SlotStatus::Occupied.is_bookable());
        assert!(!SlotStatus::Reserved.is_bookable());
        assert!(!SlotStatus::Maintenance.is_bookable());
    }

    #[test]
    fn summary_counts_each_status() {
        let facility = Uuid::new_v4();
        let floor = Uuid::new_v4();
        let mut slots: Vec<Slot> = (1..=4)
            .map(|n| Slot::new(facility, floor, format!("A{n}"), VehicleType::Car))
            .collect();
        slots[1].status = SlotStatus::Reserved;
        slots[2].status = SlotStatus::Maintenance;

        let summary = SlotSummary::from_slots(&slots);
        assert_eq!(summary.total, 4);
        assert_eq!(summary.free, 2);
        assert_eq!(summary.reserved, 1);
        assert_eq!(summary.maintenance, 1);
        assert_eq!(summary.occupied, 0);
    }
}
