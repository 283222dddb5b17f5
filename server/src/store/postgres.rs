use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;

use super::{
    BookingFilter, FacilityFilter, ParkingStore, SlotFilter, StoreError, StoreResult,
    BOOKING_CHANGED, PAYMENT_ALREADY_USED, SLOT_UNAVAILABLE,
};
use crate::models::{Booking, Facility, Floor, PricingRule, Slot, SlotStatus, User, VehicleType};

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn conflict_on_unique(err: sqlx::Error, message: &str) -> StoreError {
    match err.as_database_error() {
        Some(db) if db.is_unique_violation() => StoreError::Conflict(message.to_string()),
        _ => StoreError::Database(err),
    }
}

fn not_found_if_zero(rows: u64, what: &'static str) -> StoreResult<()> {
    if rows == 0 {
        Err(StoreError::NotFound(what))
    } else {
        Ok(())
    }
}

#[async_trait]
impl ParkingStore for PgStore {
    async fn insert_user(&self, user: &User) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO users (id, name, email, phone, role, password_hash, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(user.id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.phone)
        .bind(user.role)
        .bind(&user.password_hash)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| conflict_on_unique(e, "Email is already registered"))?;
        Ok(())
    }

    async fn get_user(&self, id: Uuid) -> StoreResult<User> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound("user"))
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = $1")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn update_user(&self, user: &User) -> StoreResult<()> {
        let result =
            sqlx::query("UPDATE users SET name = $2, phone = $3, updated_at = $4 WHERE id = $1")
                .bind(user.id)
                .bind(&user.name)
                .bind(&user.phone)
                .bind(user.updated_at)
                .execute(&self.pool)
                .await?;
        not_found_if_zero(result.rows_affected(), "user")
    }

    async fn insert_facility(&self, facility: &Facility) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO facilities (id, provider_id, name, address, city, latitude, longitude,
                                     total_floors, open_time, close_time, amenities, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
        )
        .bind(facility.id)
        .bind(facility.provider_id)
        .bind(&facility.name)
        .bind(&facility.address)
        .bind(&facility.city)
        .bind(facility.latitude)
        .bind(facility.longitude)
        .bind(facility.total_floors)
        .bind(facility.open_time)
        .bind(facility.close_time)
        .bind(&facility.amenities)
        .bind(facility.created_at)
        .bind(facility.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_facility(&self, id: Uuid) -> StoreResult<Facility> {
        sqlx::query_as::<_, Facility>("SELECT * FROM facilities WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound("facility"))
    }

    async fn list_facilities(&self, filter: &FacilityFilter) -> StoreResult<Vec<Facility>> {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new("SELECT * FROM facilities WHERE TRUE");
        if let Some(city) = &filter.city {
            qb.push(" AND lower(city) = lower(")
                .push_bind(city.trim().to_string())
                .push(")");
        }
        if let Some(query) = &filter.query {
            let pattern = format!("%{}%", query.trim());
            qb.push(" AND (name ILIKE ")
                .push_bind(pattern.clone())
                .push(" OR address ILIKE ")
                .push_bind(pattern)
                .push(")");
        }
        if let Some(provider_id) = filter.provider_id {
            qb.push(" AND provider_id = ").push_bind(provider_id);
        }
        qb.push(" ORDER BY name");

        let facilities = qb.build_query_as::<Facility>().fetch_all(&self.pool).await?;
        Ok(facilities)
    }

    async fn update_facility(&self, facility: &Facility) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE facilities
                SET name = $2, address = $3, city = $4, latitude = $5, longitude = $6,
                    total_floors = $7, open_time = $8, close_time = $9, amenities = $10,
                    updated_at = $11
              WHERE id = $1",
        )
        .bind(facility.id)
        .bind(&facility.name)
        .bind(&facility.address)
        .bind(&facility.city)
        .bind(facility.latitude)
        .bind(facility.longitude)
        .bind(facility.total_floors)
        .bind(facility.open_time)
        .bind(facility.close_time)
        .bind(&facility.amenities)
        .bind(facility.updated_at)
        .execute(&self.pool)
        .await?;
        not_found_if_zero(result.rows_affected(), "facility")
    }

    async fn delete_facility(&self, id: Uuid) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        let locked: Option<(Uuid,)> =
            sqlx::query_as("SELECT id FROM facilities WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        if locked.is_none() {
            return Err(StoreError::NotFound("facility"));
        }

        let (active,): (bool,) = sqlx::query_as(
            "SELECT EXISTS (SELECT 1 FROM bookings WHERE facility_id = $1 AND status = 'active')",
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;
        if active {
            return Err(StoreError::Conflict(
                "Facility has active bookings".to_string(),
            ));
        }

        sqlx::query("DELETE FROM facilities WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn insert_floor(&self, floor: &Floor) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO floors (id, facility_id, number, name, created_at)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(floor.id)
        .bind(floor.facility_id)
        .bind(floor.number)
        .bind(&floor.name)
        .bind(floor.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| conflict_on_unique(e, &format!("Floor {} already exists", floor.number)))?;
        Ok(())
    }

    async fn get_floor(&self, id: Uuid) -> StoreResult<Floor> {
        sqlx::query_as::<_, Floor>("SELECT * FROM floors WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound("floor"))
    }

    async fn list_floors(&self, facility_id: Uuid) -> StoreResult<Vec<Floor>> {
        let floors =
            sqlx::query_as::<_, Floor>("SELECT * FROM floors WHERE facility_id = $1 ORDER BY number")
                .bind(facility_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(floors)
    }

    async fn delete_floor(&self, id: Uuid) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        let (held,): (bool,) = sqlx::query_as(
            "SELECT EXISTS (SELECT 1 FROM slots
                             WHERE floor_id = $1 AND status IN ('reserved', 'occupied'))",
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;
        if held {
            return Err(StoreError::Conflict(
                "Floor has reserved or occupied slots".to_string(),
            ));
        }

        let result = sqlx::query("DELETE FROM floors WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        not_found_if_zero(result.rows_affected(), "floor")?;
        tx.commit().await?;
        Ok(())
    }

    async fn insert_slots(&self, slots: &[Slot]) -> StoreResult<Vec<Slot>> {
        let mut tx = self.pool.begin().await?;
        let mut created = Vec::with_capacity(slots.len());

        for slot in slots {
            let inserted = sqlx::query_as::<_, Slot>(
                "INSERT INTO slots (id, facility_id, floor_id, slot_number, vehicle_type, status,
                                    created_at, updated_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                 ON CONFLICT (floor_id, slot_number) DO NOTHING
                 RETURNING *",
            )
            .bind(slot.id)
            .bind(slot.facility_id)
            .bind(slot.floor_id)
            .bind(&slot.slot_number)
            .bind(slot.vehicle_type)
            .bind(slot.status)
            .bind(slot.created_at)
            .bind(slot.updated_at)
            .fetch_optional(&mut *tx)
            .await?;

            created.extend(inserted);
        }

        tx.commit().await?;
        Ok(created)
    }

    async fn get_slot(&self, id: Uuid) -> StoreResult<Slot> {
        sqlx::query_as::<_, Slot>("SELECT * FROM slots WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound("slot"))
    }

    async fn list_slots(&self, filter: &SlotFilter) -> StoreResult<Vec<Slot>> {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new("SELECT * FROM slots WHERE TRUE");
        if let Some(facility_id) = filter.facility_id {
            qb.push(" AND facility_id = ").push_bind(facility_id);
        }
        if let Some(floor_id) = filter.floor_id {
            qb.push(" AND floor_id = ").push_bind(floor_id);
        }
        if let Some(vehicle_type) = filter.vehicle_type {
            qb.push(" AND vehicle_type = ").push_bind(vehicle_type);
        }
        if let Some(status) = filter.status {
            qb.push(" AND status = ").push_bind(status);
        }
        qb.push(" ORDER BY length(slot_number), slot_number");

        let slots = qb.build_query_as::<Slot>().fetch_all(&self.pool).await?;
        Ok(slots)
    }

    async fn transition_slot(
        &self,
        id: Uuid,
        from: SlotStatus,
        to: SlotStatus,
    ) -> StoreResult<Slot> {
        let updated = sqlx::query_as::<_, Slot>(
            "UPDATE slots SET status = $3, updated_at = now()
              WHERE id = $1 AND status = $2
              RETURNING *",
        )
        .bind(id)
        .bind(from)
        .bind(to)
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some(slot) => Ok(slot),
            None => {
                let current = self.get_slot(id).await?;
                Err(StoreError::Conflict(format!(
                    "Slot is {}, expected {}",
                    current.status, from
                )))
            }
        }
    }

    async fn delete_slot(&self, id: Uuid) -> StoreResult<()> {
        let result =
            sqlx::query("DELETE FROM slots WHERE id = $1 AND status IN ('free', 'maintenance')")
                .bind(id)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            let current = self.get_slot(id).await?;
            return Err(StoreError::Conflict(format!(
                "Slot is {} and cannot be deleted",
                current.status
            )));
        }
        Ok(())
    }

    async fn upsert_pricing(&self, rule: &PricingRule) -> StoreResult<PricingRule> {
        let stored = sqlx::query_as::<_, PricingRule>(
            "INSERT INTO pricing_rules (id, facility_id, vehicle_type, hourly_rate, daily_max,
                                        monthly_pass_rate, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             ON CONFLICT (facility_id, vehicle_type) DO UPDATE
                SET hourly_rate = EXCLUDED.hourly_rate,
                    daily_max = EXCLUDED.daily_max,
                    monthly_pass_rate = EXCLUDED.monthly_pass_rate,
                    updated_at = EXCLUDED.updated_at
             RETURNING *",
        )
        .bind(rule.id)
        .bind(rule.facility_id)
        .bind(rule.vehicle_type)
        .bind(rule.hourly_rate)
        .bind(rule.daily_max)
        .bind(rule.monthly_pass_rate)
        .bind(rule.created_at)
        .bind(rule.updated_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(stored)
    }

    async fn get_pricing(
        &self,
        facility_id: Uuid,
        vehicle_type: VehicleType,
    ) -> StoreResult<Option<PricingRule>> {
        let rule = sqlx::query_as::<_, PricingRule>(
            "SELECT * FROM pricing_rules WHERE facility_id = $1 AND vehicle_type = $2",
        )
        .bind(facility_id)
        .bind(vehicle_type)
        .fetch_optional(&self.pool)
        .await?;
        Ok(rule)
    }

    async fn list_pricing(&self, facility_id: Uuid) -> StoreResult<Vec<PricingRule>> {
        let rules = sqlx::query_as::<_, PricingRule>(
            "SELECT * FROM pricing_rules WHERE facility_id = $1 ORDER BY vehicle_type",
        )
        .bind(facility_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rules)
    }

    async fn delete_pricing(
        &self,
        facility_id: Uuid,
        vehicle_type: VehicleType,
    ) -> StoreResult<()> {
        let result =
            sqlx::query("DELETE FROM pricing_rules WHERE facility_id = $1 AND vehicle_type = $2")
                .bind(facility_id)
                .bind(vehicle_type)
                .execute(&self.pool)
                .await?;
        not_found_if_zero(result.rows_affected(), "pricing rule")
    }

    async fn create_booking_claiming_slot(&self, booking: &Booking) -> StoreResult<(Booking, Slot)> {
        let mut tx = self.pool.begin().await?;

        // Conditional update: only one transaction can see the slot as free.
        let slot = sqlx::query_as::<_, Slot>(
            "UPDATE slots SET status = 'reserved', updated_at = now()
              WHERE id = $1 AND status = 'free'
              RETURNING *",
        )
        .bind(booking.slot_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(slot) = slot else {
            let exists: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM slots WHERE id = $1")
                .bind(booking.slot_id)
                .fetch_optional(&mut *tx)
                .await?;
            return Err(match exists {
                Some(_) => StoreError::Conflict(SLOT_UNAVAILABLE.to_string()),
                None => StoreError::NotFound("slot"),
            });
        };

        let stored = sqlx::query_as::<_, Booking>(
            "INSERT INTO bookings (id, customer_id, facility_id, slot_id, vehicle_number, vehicle_type,
                                   kind, duration_hours, entry_time, expected_exit_time, checked_in_at,
                                   exit_time, base_fee, gst, total_fee, payment_method, payment_status,
                                   payment_order_id, payment_id, status, qr_payload, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17,
                     $18, $19, $20, $21, $22, $23)
             RETURNING *",
        )
        .bind(booking.id)
        .bind(booking.customer_id)
        .bind(booking.facility_id)
        .bind(booking.slot_id)
        .bind(&booking.vehicle_number)
        .bind(booking.vehicle_type)
        .bind(booking.kind)
        .bind(booking.duration_hours)
        .bind(booking.entry_time)
        .bind(booking.expected_exit_time)
        .bind(booking.checked_in_at)
        .bind(booking.exit_time)
        .bind(booking.base_fee)
        .bind(booking.gst)
        .bind(booking.total_fee)
        .bind(booking.payment_method)
        .bind(booking.payment_status)
        .bind(&booking.payment_order_id)
        .bind(&booking.payment_id)
        .bind(booking.status)
        .bind(&booking.qr_payload)
        .bind(booking.created_at)
        .bind(booking.updated_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            let payment_reused = e
                .as_database_error()
                .and_then(|db| db.constraint())
                .is_some_and(|name| name == "bookings_payment_id_key");
            if payment_reused {
                StoreError::Conflict(PAYMENT_ALREADY_USED.to_string())
            } else {
                conflict_on_unique(e, SLOT_UNAVAILABLE)
            }
        })?;

        if let Some(payment_id) = &booking.payment_id {
            // Also collides with a payment retired by an earlier refund.
            sqlx::query("INSERT INTO spent_payments (payment_id, booking_id) VALUES ($1, $2)")
                .bind(payment_id)
                .bind(booking.id)
                .execute(&mut *tx)
                .await
                .map_err(|e| conflict_on_unique(e, PAYMENT_ALREADY_USED))?;
        }

        tx.commit().await?;
        Ok((stored, slot))
    }

    async fn get_booking(&self, id: Uuid) -> StoreResult<Booking> {
        sqlx::query_as::<_, Booking>("SELECT * FROM bookings WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound("booking"))
    }

    async fn list_bookings(&self, filter: &BookingFilter) -> StoreResult<Vec<Booking>> {
        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT b.* FROM bookings b JOIN facilities f ON f.id = b.facility_id WHERE TRUE");
        if let Some(customer_id) = filter.customer_id {
            qb.push(" AND b.customer_id = ").push_bind(customer_id);
        }
        if let Some(facility_id) = filter.facility_id {
            qb.push(" AND b.facility_id = ").push_bind(facility_id);
        }
        if let Some(provider_id) = filter.provider_id {
            qb.push(" AND f.provider_id = ").push_bind(provider_id);
        }
        if let Some(slot_id) = filter.slot_id {
            qb.push(" AND b.slot_id = ").push_bind(slot_id);
        }
        if let Some(status) = filter.status {
            qb.push(" AND b.status = ").push_bind(status);
        }
        qb.push(" ORDER BY b.created_at DESC");

        let bookings = qb.build_query_as::<Booking>().fetch_all(&self.pool).await?;
        Ok(bookings)
    }

    async fn update_active_booking(
        &self,
        booking: &Booking,
        seen: DateTime<Utc>,
        slot_status: SlotStatus,
    ) -> StoreResult<(Booking, Slot)> {
        let mut tx = self.pool.begin().await?;

        let stored = sqlx::query_as::<_, Booking>(
            "UPDATE bookings
                SET checked_in_at = $2, exit_time = $3, duration_hours = $4, base_fee = $5,
                    gst = $6, total_fee = $7, payment_status = $8, payment_id = $9,
                    status = $10, updated_at = $11
              WHERE id = $1 AND status = 'active' AND updated_at = $12
              RETURNING *",
        )
        .bind(booking.id)
        .bind(booking.checked_in_at)
        .bind(booking.exit_time)
        .bind(booking.duration_hours)
        .bind(booking.base_fee)
        .bind(booking.gst)
        .bind(booking.total_fee)
        .bind(booking.payment_status)
        .bind(&booking.payment_id)
        .bind(booking.status)
        .bind(booking.updated_at)
        .bind(seen)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(stored) = stored else {
            let current: Option<Booking> = sqlx::query_as("SELECT * FROM bookings WHERE id = $1")
                .bind(booking.id)
                .fetch_optional(&mut *tx)
                .await?;
            return Err(match current {
                Some(current) if !current.is_active() => {
                    StoreError::Conflict(format!("Booking is already {}", current.status))
                }
                Some(_) => StoreError::Conflict(BOOKING_CHANGED.to_string()),
                None => StoreError::NotFound("booking"),
            });
        };

        let slot = sqlx::query_as::<_, Slot>(
            "UPDATE slots SET status = $2, updated_at = now() WHERE id = $1 RETURNING *",
        )
        .bind(booking.slot_id)
        .bind(slot_status)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::NotFound("slot"))?;

        tx.commit().await?;
        Ok((stored, slot))
    }

    async fn mark_refunded(&self, booking_id: Uuid) -> StoreResult<Booking> {
        let mut tx = self.pool.begin().await?;

        let stored = sqlx::query_as::<_, Booking>(
            "UPDATE bookings SET payment_status = 'refunded', updated_at = now()
              WHERE id = $1 AND payment_status = 'paid'
              RETURNING *",
        )
        .bind(booking_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(stored) = stored else {
            let current: Option<Booking> = sqlx::query_as("SELECT * FROM bookings WHERE id = $1")
                .bind(booking_id)
                .fetch_optional(&mut *tx)
                .await?;
            return Err(match current {
                Some(current) => StoreError::Conflict(format!(
                    "Payment is {}, not paid",
                    current.payment_status
                )),
                None => StoreError::NotFound("booking"),
            });
        };

        if let Some(payment_id) = &stored.payment_id {
            sqlx::query("UPDATE spent_payments SET refunded = TRUE WHERE payment_id = $1")
                .bind(payment_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(stored)
    }

    async fn retire_payment(&self, payment_id: &str) -> StoreResult<bool> {
        let result = sqlx::query(
            "INSERT INTO spent_payments (payment_id, refunded) VALUES ($1, TRUE)
             ON CONFLICT (payment_id) DO NOTHING",
        )
        .bind(payment_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}
