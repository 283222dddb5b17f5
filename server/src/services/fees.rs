//! Parking fee calculation.
//!
//! Hourly bookings are billed `hourly_rate * hours`, capped at the rule's
//! daily maximum, with GST added on top. Amounts are INR rounded to paise.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use thiserror::Error;

use crate::models::PricingRule;

pub const DEFAULT_GST_PERCENT: Decimal = dec!(18);

/// Hours covered by a monthly pass.
pub const MONTHLY_PASS_HOURS: i32 = 30 * 24;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FeeError {
    #[error("duration must be at least one hour")]
    InvalidDuration,

    #[error("no monthly pass is offered for this vehicle type")]
    NoMonthlyPass,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FeeBreakdown {
    pub hours: i32,
    pub base_fee: Decimal,
    pub gst: Decimal,
    pub total_fee: Decimal,
    pub capped: bool,
}

fn money(amount: Decimal) -> Decimal {
    let mut amount = amount.round_dp(2);
    amount.rescale(2);
    amount
}

fn with_gst(base: Decimal, gst_percent: Decimal) -> (Decimal, Decimal, Decimal) {
    let base = money(base);
    let gst = money(base * gst_percent / dec!(100));
    (base, gst, money(base + gst))
}

pub fn calculate_fee(
    hourly_rate: Decimal,
    daily_max: Decimal,
    hours: i32,
    gst_percent: Decimal,
) -> Result<FeeBreakdown, FeeError> {
    if hours < 1 {
        return Err(FeeError::InvalidDuration);
    }

    let uncapped = hourly_rate * Decimal::from(hours);
    let capped = uncapped > daily_max;
    let base = if capped { daily_max } else { uncapped };
    let (base_fee, gst, total_fee) = with_gst(base, gst_percent);

    Ok(FeeBreakdown {
        hours,
        base_fee,
        gst,
        total_fee,
        capped,
    })
}

pub fn quote_hourly(
    rule: &PricingRule,
    hours: i32,
    gst_percent: Decimal,
) -> Result<FeeBreakdown, FeeError> {
    calculate_fee(rule.hourly_rate, rule.daily_max, hours, gst_percent)
}

pub fn quote_monthly_pass(
    rule: &PricingRule,
    gst_percent: Decimal,
) -> Result<FeeBreakdown, FeeError> {
    let rate = rule.monthly_pass_rate.ok_or(FeeError::NoMonthlyPass)?;
    let (base_fee, gst, total_fee) = with_gst(rate, gst_percent);

    Ok(FeeBreakdown {
        hours: MONTHLY_PASS_HOURS,
        base_fee,
        gst,
        total_fee,
        capped: false,
    })
}

/// Whole hours between entry and exit, rounded up, never less than one.
pub fn billable_hours(entry: DateTime<Utc>, exit: DateTime<Utc>) -> i32 {
    let seconds = (exit - entry).num_seconds();
    if seconds <= 0 {
        return 1;
    }
    let hours = (seconds + 3599) / 3600;
    i32::try_from(hours).unwrap_or(i32::MAX).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use uuid::Uuid;

    use crate::models::VehicleType;

    #[test]
    fn fee_below_daily_cap() {
        let fee = calculate_fee(dec!(50), dec!(500), 3, DEFAULT_GST_PERCENT).unwrap();
        assert_eq!(fee.base_fee, dec!(150));
        assert_eq!(fee.gst, dec!(27));
        assert_eq!(fee.total_fee, dec!(177));
        assert!(!fee.capped);
    }

    #[test]
    fn fee_capped_at_daily_max() {
        let fee = calculate_fee(dec!(100), dec!(800), 10, DEFAULT_GST_PERCENT).unwrap();
        assert_eq!(fee.base_fee, dec!(800));
        assert_eq!(fee.gst, dec!(144));
        assert_eq!(fee.total_fee, dec!(944));
        assert!(fee.capped);
    }

    #[test]
    fn fee_exactly_at_cap_is_not_flagged() {
        let fee = calculate_fee(dec!(100), dec!(800), 8, DEFAULT_GST_PERCENT).unwrap();
        assert_eq!(fee.base_fee, dec!(800));
        assert!(!fee.capped);
    }

    #[test]
    fn gst_rounds_to_paise() {
        let fee = calculate_fee(dec!(33.33), dec!(1000), 1, DEFAULT_GST_PERCENT).unwrap();
        assert_eq!(fee.gst, dec!(6.00));
        assert_eq!(fee.total_fee, dec!(39.33));
        assert_eq!(fee.total_fee.to_string(), "39.33");
    }

    #[test]
    fn zero_hours_is_rejected() {
        assert_eq!(
            calculate_fee(dec!(50), dec!(500), 0, DEFAULT_GST_PERCENT),
            Err(FeeError::InvalidDuration)
        );
    }

    #[test]
    fn monthly_pass_needs_a_rate() {
        let mut rule = PricingRule {
            id: Uuid::new_v4(),
            facility_id: Uuid::new_v4(),
            vehicle_type: VehicleType::Car,
            hourly_rate: dec!(40),
            daily_max: dec!(300),
            monthly_pass_rate: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert_eq!(
            quote_monthly_pass(&rule, DEFAULT_GST_PERCENT),
            Err(FeeError::NoMonthlyPass)
        );

        rule.monthly_pass_rate = Some(dec!(3000));
        let fee = quote_monthly_pass(&rule, DEFAULT_GST_PERCENT).unwrap();
        assert_eq!(fee.total_fee, dec!(3540));
        assert_eq!(fee.hours, MONTHLY_PASS_HOURS);
    }

    #[test]
    fn billable_hours_round_up() {
        let entry = Utc::now();
        assert_eq!(billable_hours(entry, entry), 1);
        assert_eq!(billable_hours(entry, entry - Duration::minutes(5)), 1);
        assert_eq!(billable_hours(entry, entry + Duration::minutes(59)), 1);
        assert_eq!(billable_hours(entry, entry + Duration::minutes(61)), 2);
        assert_eq!(billable_hours(entry, entry + Duration::hours(3)), 3);
    }
}
