//! CSV export of provider bookings.

use std::collections::HashMap;

use serde::Serialize;
use uuid::Uuid;

use crate::models::Booking;
use crate::utils::error::AppError;

/// Human-readable names for the ids a booking refers to.
#[derive(Debug, Default)]
pub struct ExportLabels {
    pub facilities: HashMap<Uuid, String>,
    pub slots: HashMap<Uuid, String>,
}

/// Column names, in `BookingRow` field order.
const HEADER: [&str; 13] = [
    "booking_id",
    "facility",
    "slot",
    "vehicle_number",
    "vehicle_type",
    "entry_time",
    "exit_time",
    "base_fee",
    "gst",
    "total_fee",
    "payment_method",
    "payment_status",
    "booking_status",
];

#[derive(Serialize)]
struct BookingRow<'a> {
    booking_id: Uuid,
    facility: &'a str,
    slot: &'a str,
    vehicle_number: &'a str,
    vehicle_type: &'static str,
    entry_time: String,
    exit_time: String,
    base_fee: String,
    gst: String,
    total_fee: String,
    payment_method: &'static str,
    payment_status: &'static str,
    booking_status: &'static str,
}

pub fn bookings_csv(bookings: &[Booking], labels: &ExportLabels) -> Result<Vec<u8>, AppError> {
    let export_failed =
        |e: csv::Error| AppError::InternalServerError(format!("csv export failed: {e}"));

    // Written by hand so an export without bookings still names its columns.
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer.write_record(HEADER).map_err(export_failed)?;

    for booking in bookings {
        let row = BookingRow {
            booking_id: booking.id,
            facility: labels
                .facilities
                .get(&booking.facility_id)
                .map(String::as_str)
                .unwrap_or(""),
            slot: labels
                .slots
                .get(&booking.slot_id)
                .map(String::as_str)
                .unwrap_or(""),
            vehicle_number: &booking.vehicle_number,
            vehicle_type: booking.vehicle_type.as_str(),
            entry_time: booking.checked_in_at.unwrap_or(booking.entry_time).to_rfc3339(),
            exit_time: booking
                .exit_time
                .map(|t| t.to_rfc3339())
                .unwrap_or_default(),
            base_fee: booking.base_fee.to_string(),
            gst: booking.gst.to_string(),
            total_fee: booking.total_fee.to_string(),
            payment_method: booking.payment_method.as_str(),
            payment_status: booking.payment_status.as_str(),
            booking_status: booking.status.as_str(),
        };
        writer.serialize(row).map_err(export_failed)?;
    }

    writer
        .into_inner()
        .map_err(|e| AppError::InternalServerError(format!("csv export failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        BookingKind, BookingStatus, PaymentMethod, PaymentStatus, VehicleType,
    };
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn booking() -> Booking {
        let entry = Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap();
        Booking {
            id: Uuid::new_v4(),
            customer_id: Uuid::new_v4(),
            facility_id: Uuid::new_v4(),
            slot_id: Uuid::new_v4(),
            vehicle_number: "KA01AB1234".to_string(),
            vehicle_type: VehicleType::Car,
            kind: BookingKind::Hourly,
            duration_hours: 3,
            entry_time: entry,
            expected_exit_time: entry + chrono::Duration::hours(3),
            checked_in_at: None,
            exit_time: None,
            base_fee: dec!(150.00),
            gst: dec!(27.00),
            total_fee: dec!(177.00),
            payment_method: PaymentMethod::PayAtExit,
            payment_status: PaymentStatus::Pending,
            payment_order_id: None,
            payment_id: None,
            status: BookingStatus::Active,
            qr_payload: String::new(),
            created_at: entry,
            updated_at: entry,
        }
    }

    #[test]
    fn export_has_header_and_labelled_rows() {
        let booking = booking();
        let mut labels = ExportLabels::default();
        labels
            .facilities
            .insert(booking.facility_id, "Central, Block A".to_string());
        labels.slots.insert(booking.slot_id, "A12".to_string());

        let bytes = bookings_csv(std::slice::from_ref(&booking), &labels).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let mut lines = text.lines();

        assert_eq!(
            lines.next().unwrap(),
            "booking_id,facility,slot,vehicle_number,vehicle_type,entry_time,exit_time,\
             base_fee,gst,total_fee,payment_method,payment_status,booking_status"
        );
        let row = lines.next().unwrap();
        assert!(row.contains("\"Central, Block A\",A12,KA01AB1234,car"));
        assert!(row.ends_with("150.00,27.00,177.00,pay_at_exit,pending,active"));
        assert!(lines.next().is_none());
    }

    #[test]
    fn empty_export_still_has_header() {
        let bytes = bookings_csv(&[], &ExportLabels::default()).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(text.lines().count(), 1);
        assert!(text.starts_with("booking_id,facility,slot,"));
        assert!(text.trim_end().ends_with(",booking_status"));
    }
}
