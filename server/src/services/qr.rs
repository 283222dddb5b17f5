//! QR ticket payloads.
//!
//! The payload is camelCase JSON so that scanners built for the web clients
//! can read it unchanged.

use std::io::Cursor;

use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Utc};
use image::{ImageFormat, Luma};
use qrcode::QrCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::models::Booking;

const QR_MIN_DIMENSION: u32 = 240;

#[derive(Debug, Error)]
pub enum QrError {
    #[error("Invalid QR code")]
    Invalid(String),

    #[error("QR rendering failed: {0}")]
    Render(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QrPayload {
    pub ticket_id: Uuid,
    pub slot_id: Uuid,
    pub vehicle_number: String,
    pub entry_time: DateTime<Utc>,
    pub facility_id: Uuid,
}

impl QrPayload {
    pub fn for_booking(booking: &Booking) -> Self {
        Self {
            ticket_id: booking.id,
            slot_id: booking.slot_id,
            vehicle_number: booking.vehicle_number.clone(),
            entry_time: booking.entry_time,
            facility_id: booking.facility_id,
        }
    }

    pub fn encode(&self) -> Result<String, QrError> {
        serde_json::to_string(self).map_err(|e| QrError::Render(e.to_string()))
    }

    pub fn decode(raw: &str) -> Result<Self, QrError> {
        let payload: Self =
            serde_json::from_str(raw.trim()).map_err(|e| QrError::Invalid(e.to_string()))?;

        if payload.vehicle_number.trim().is_empty() {
            return Err(QrError::Invalid("vehicleNumber is empty".to_string()));
        }

        Ok(payload)
    }

    /// Whether this payload describes exactly the given booking.
    pub fn matches(&self, booking: &Booking) -> bool {
        self == &Self::for_booking(booking)
    }

    pub fn render_png_data_url(&self) -> Result<String, QrError> {
        let encoded = self.encode()?;
        render_png_data_url(encoded.as_bytes())
    }
}

pub fn render_png_data_url(data: &[u8]) -> Result<String, QrError> {
    let code = QrCode::new(data).map_err(|e| QrError::Render(e.to_string()))?;
    let image = code
        .render::<Luma<u8>>()
        .min_dimensions(QR_MIN_DIMENSION, QR_MIN_DIMENSION)
        .build();

    let mut png = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .map_err(|e| QrError::Render(e.to_string()))?;

    Ok(format!(
        "data:image/png;base64,{}",
        general_purpose::STANDARD.encode(png)
    ))
}
