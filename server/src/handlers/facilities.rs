use axum::extract::{Path, Query, State};
use axum::response::Response;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::extractors::AuthUser;
use crate::models::{SlotStatus, VehicleType};
use crate::services::inventory::{
    BulkSlotInput, FacilityInput, FacilitySearch, FloorInput, PricingInput, SlotInput,
};
use crate::services::InventoryService;
use crate::store::SlotFilter;
use crate::utils::error::AppError;
use crate::utils::response::{created, empty_success, success};

#[derive(Debug, Deserialize)]
pub struct SlotQuery {
    pub floor_id: Option<Uuid>,
    pub vehicle_type: Option<VehicleType>,
    pub status: Option<SlotStatus>,
}

#[derive(Debug, Deserialize)]
pub struct SlotStatusRequest {
    pub status: SlotStatus,
}

// Facilities

pub async fn search_facilities(
    State(inventory): State<InventoryService>,
    Query(search): Query<FacilitySearch>,
) -> Result<Response, AppError> {
    let listings = inventory.search(&search).await?;
    Ok(success(listings, "Facilities retrieved"))
}

pub async fn get_facility(
    State(inventory): State<InventoryService>,
    Path(facility_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let detail = inventory.facility_detail(facility_id).await?;
    Ok(success(detail, "Facility retrieved"))
}

pub async fn create_facility(
    State(inventory): State<InventoryService>,
    auth: AuthUser,
    Json(input): Json<FacilityInput>,
) -> Result<Response, AppError> {
    let provider = auth.require_provider()?;
    let facility = inventory.create_facility(&provider, input).await?;
    Ok(created(facility, "Facility created"))
}

pub async fn update_facility(
    State(inventory): State<InventoryService>,
    auth: AuthUser,
    Path(facility_id): Path<Uuid>,
    Json(input): Json<FacilityInput>,
) -> Result<Response, AppError> {
    let provider = auth.require_provider()?;
    let facility = inventory
        .update_facility(&provider, facility_id, input)
        .await?;
    Ok(success(facility, "Facility updated"))
}

pub async fn delete_facility(
    State(inventory): State<InventoryService>,
    auth: AuthUser,
    Path(facility_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let provider = auth.require_provider()?;
    inventory.delete_facility(&provider, facility_id).await?;
    Ok(empty_success("Facility deleted"))
}

pub async fn provider_facilities(
    State(inventory): State<InventoryService>,
    auth: AuthUser,
) -> Result<Response, AppError> {
    let provider = auth.require_provider()?;
    let facilities = inventory.provider_facilities(&provider).await?;
    Ok(success(facilities, "Facilities retrieved"))
}

// Floors

pub async fn list_floors(
    State(inventory): State<InventoryService>,
    Path(facility_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let floors = inventory.list_floors(facility_id).await?;
    Ok(success(floors, "Floors retrieved"))
}

pub async fn add_floor(
    State(inventory): State<InventoryService>,
    auth: AuthUser,
    Path(facility_id): Path<Uuid>,
    Json(input): Json<FloorInput>,
) -> Result<Response, AppError> {
    let provider = auth.require_provider()?;
    let floor = inventory.add_floor(&provider, facility_id, input).await?;
    Ok(created(floor, "Floor added"))
}

pub async fn delete_floor(
    State(inventory): State<InventoryService>,
    auth: AuthUser,
    Path(floor_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let provider = auth.require_provider()?;
    inventory.delete_floor(&provider, floor_id).await?;
    Ok(empty_success("Floor deleted"))
}

// Slots

pub async fn list_slots(
    State(inventory): State<InventoryService>,
    Path(facility_id): Path<Uuid>,
    Query(query): Query<SlotQuery>,
) -> Result<Response, AppError> {
    let filter = SlotFilter {
        facility_id: Some(facility_id),
        floor_id: query.floor_id,
        vehicle_type: query.vehicle_type,
        status: query.status,
    };
    let slots = inventory.list_slots(filter).await?;
    Ok(success(slots, "Slots retrieved"))
}

pub async fn create_slot(
    State(inventory): State<InventoryService>,
    auth: AuthUser,
    Path(floor_id): Path<Uuid>,
    Json(input): Json<SlotInput>,
) -> Result<Response, AppError> {
    let provider = auth.require_provider()?;
    let slot = inventory.create_slot(&provider, floor_id, input).await?;
    Ok(created(slot, "Slot created"))
}

pub async fn bulk_create_slots(
    State(inventory): State<InventoryService>,
    auth: AuthUser,
    Path(floor_id): Path<Uuid>,
    Json(input): Json<BulkSlotInput>,
) -> Result<Response, AppError> {
    let provider = auth.require_provider()?;
    let result = inventory
        .bulk_create_slots(&provider, floor_id, input)
        .await?;
    let message = format!(
        "{} slot(s) created, {} skipped",
        result.created.len(),
        result.skipped.len()
    );
    Ok(created(result, message))
}

pub async fn set_slot_status(
    State(inventory): State<InventoryService>,
    auth: AuthUser,
    Path(slot_id): Path<Uuid>,
    Json(req): Json<SlotStatusRequest>,
) -> Result<Response, AppError> {
    let provider = auth.require_provider()?;
    let slot = inventory
        .set_slot_status(&provider, slot_id, req.status)
        .await?;
    Ok(success(slot, "Slot status updated"))
}

pub async fn delete_slot(
    State(inventory): State<InventoryService>,
    auth: AuthUser,
    Path(slot_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let provider = auth.require_provider()?;
    inventory.delete_slot(&provider, slot_id).await?;
    Ok(empty_success("Slot deleted"))
}

// Pricing

pub async fn list_pricing(
    State(inventory): State<InventoryService>,
    Path(facility_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let rules = inventory.list_pricing(facility_id).await?;
    Ok(success(rules, "Pricing retrieved"))
}

pub async fn upsert_pricing(
    State(inventory): State<InventoryService>,
    auth: AuthUser,
    Path(facility_id): Path<Uuid>,
    Json(input): Json<PricingInput>,
) -> Result<Response, AppError> {
    let provider = auth.require_provider()?;
    let rule = inventory
        .upsert_pricing(&provider, facility_id, input)
        .await?;
    Ok(success(rule, "Pricing saved"))
}

pub async fn delete_pricing(
    State(inventory): State<InventoryService>,
    auth: AuthUser,
    Path((facility_id, vehicle_type)): Path<(Uuid, VehicleType)>,
) -> Result<Response, AppError> {
    let provider = auth.require_provider()?;
    inventory
        .delete_pricing(&provider, facility_id, vehicle_type)
        .await?;
    Ok(empty_success("Pricing removed"))
}
