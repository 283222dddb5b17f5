use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::slot::VehicleType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "booking_status", rename_all = "snake_case")]
pub enum BookingStatus {
    Active,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "booking_kind", rename_all = "snake_case")]
pub enum BookingKind {
    Hourly,
    MonthlyPass,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "payment_method", rename_all = "snake_case")]
pub enum PaymentMethod {
    Online,
    PayAtExit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "payment_status", rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Refunded,
}

macro_rules! display_snake {
    ($ty:ty { $($variant:ident => $name:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $name,)+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

display_snake!(BookingStatus { Active => "active", Completed => "completed", Cancelled => "cancelled" });
display_snake!(BookingKind { Hourly => "hourly", MonthlyPass => "monthly_pass" });
display_snake!(PaymentMethod { Online => "online", PayAtExit => "pay_at_exit" });
display_snake!(PaymentStatus { Pending => "pending", Paid => "paid", Refunded => "refunded" });

/// A confirmed slot reservation. The ticket handed to the customer is this
/// record plus its QR payload.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Booking {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub facility_id: Uuid,
    pub slot_id: Uuid,
    pub vehicle_number: String,
    pub vehicle_type: VehicleType,
    pub kind: BookingKind,
    pub duration_hours: i32,
    pub entry_time: DateTime<Utc>,
    pub expected_exit_time: DateTime<Utc>,
    pub checked_in_at: Option<DateTime<Utc>>,
    pub exit_time: Option<DateTime<Utc>>,
    pub base_fee: Decimal,
    pub gst: Decimal,
    pub total_fee: Decimal,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub payment_order_id: Option<String>,
    pub payment_id: Option<String>,
    pub status: BookingStatus,
    pub qr_payload: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    pub fn is_active(&self) -> bool {
        self.status == BookingStatus::Active
    }
}
