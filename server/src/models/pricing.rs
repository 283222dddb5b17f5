use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::slot::VehicleType;

/// Tariff for one vehicle type at one facility.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PricingRule {
    pub id: Uuid,
    pub facility_id: Uuid,
    pub vehicle_type: VehicleType,
    pub hourly_rate: Decimal,
    pub daily_max: Decimal,
    pub monthly_pass_rate: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
