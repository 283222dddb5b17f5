use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::extractors::AuthUser;
use crate::models::BookingStatus;
use crate::services::booking::BookingRequest;
use crate::services::BookingService;
use crate::utils::error::AppError;
use crate::utils::response::{created, success};

#[derive(Debug, Deserialize)]
pub struct VerifyQrRequest {
    pub qr: String,
}

#[derive(Debug, Deserialize)]
pub struct ProviderBookingQuery {
    pub facility_id: Option<Uuid>,
    pub status: Option<BookingStatus>,
}

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    pub facility_id: Option<Uuid>,
}

pub async fn create_booking(
    State(bookings): State<BookingService>,
    auth: AuthUser,
    Json(req): Json<BookingRequest>,
) -> Result<Response, AppError> {
    let customer = auth.require_customer()?;
    let ticket = bookings.confirm(&customer, req).await?;
    Ok(created(ticket, "Booking confirmed"))
}

pub async fn booking_history(
    State(bookings): State<BookingService>,
    auth: AuthUser,
) -> Result<Response, AppError> {
    let customer = auth.require_customer()?;
    let history = bookings.history(&customer).await?;
    Ok(success(history, "Bookings retrieved"))
}

pub async fn booking_qr(
    State(bookings): State<BookingService>,
    AuthUser(user): AuthUser,
    Path(booking_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let ticket = bookings.ticket(&user, booking_id).await?;
    Ok(success(ticket, "Ticket retrieved"))
}

pub async fn check_in(
    State(bookings): State<BookingService>,
    auth: AuthUser,
    Path(booking_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let provider = auth.require_provider()?;
    let booking = bookings.check_in(&provider, booking_id).await?;
    Ok(success(booking, "Vehicle checked in"))
}

pub async fn complete(
    State(bookings): State<BookingService>,
    auth: AuthUser,
    Path(booking_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let provider = auth.require_provider()?;
    let booking = bookings.complete(&provider, booking_id).await?;
    Ok(success(booking, "Booking completed"))
}

pub async fn cancel(
    State(bookings): State<BookingService>,
    AuthUser(user): AuthUser,
    Path(booking_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let booking = bookings.cancel(&user, booking_id).await?;
    Ok(success(booking, "Booking cancelled"))
}

pub async fn verify_qr(
    State(bookings): State<BookingService>,
    auth: AuthUser,
    Json(req): Json<VerifyQrRequest>,
) -> Result<Response, AppError> {
    let provider = auth.require_provider()?;
    let booking = bookings.verify_qr(&provider, &req.qr).await?;
    Ok(success(booking, "Ticket is valid"))
}

pub async fn provider_bookings(
    State(bookings): State<BookingService>,
    auth: AuthUser,
    Query(query): Query<ProviderBookingQuery>,
) -> Result<Response, AppError> {
    let provider = auth.require_provider()?;
    let list = bookings
        .provider_bookings(&provider, query.facility_id, query.status)
        .await?;
    Ok(success(list, "Bookings retrieved"))
}

pub async fn export_bookings(
    State(bookings): State<BookingService>,
    auth: AuthUser,
    Query(query): Query<ExportQuery>,
) -> Result<Response, AppError> {
    let provider = auth.require_provider()?;
    let csv = bookings.export_csv(&provider, query.facility_id).await?;

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"bookings.csv\"",
            ),
        ],
        csv,
    )
        .into_response())
}
