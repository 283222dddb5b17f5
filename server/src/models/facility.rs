use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

const EARTH_RADIUS_KM: f64 = 6371.0;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Facility {
    pub id: Uuid,
    pub provider_id: Uuid,
    pub name: String,
    pub address: String,
    pub city: String,
    pub latitude: f64,
    pub longitude: f64,
    pub total_floors: i32,
    /// `None` for both open and close time means the facility never closes.
    pub open_time: Option<NaiveTime>,
    pub close_time: Option<NaiveTime>,
    pub amenities: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Facility {
    pub fn is_owned_by(&self, user_id: Uuid) -> bool {
        self.provider_id == user_id
    }

    pub fn distance_km(&self, latitude: f64, longitude: f64) -> f64 {
        haversine_km(self.latitude, self.longitude, latitude, longitude)
    }

    /// Whether `time` falls inside operating hours. Windows that wrap past
    /// midnight (e.g. 22:00-06:00) are supported; equal open and close times
    /// mean the facility never closes.
    pub fn is_open_at(&self, time: NaiveTime) -> bool {
        match (self.open_time, self.close_time) {
            (Some(open), Some(close)) if open == close => true,
            (Some(open), Some(close)) if open < close => time >= open && time < close,
            (Some(open), Some(close)) => time >= open || time < close,
            _ => true,
        }
    }
}

pub fn haversine_km(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lng = (lng2 - lng1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().asin()
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Floor {
    pub id: Uuid,
    pub facility_id: Uuid,
    pub number: i32,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facility(open: Option<&str>, close: Option<&str>) -> Facility {
        let parse = |s: &str| NaiveTime::parse_from_str(s, "%H:%M").unwrap();
        Facility {
            id: Uuid::new_v4(),
            provider_id: Uuid::new_v4(),
            name: "City Centre Parking".into(),
            address: "MG Road".into(),
            city: "Bengaluru".into(),
            latitude: 12.9756,
            longitude: 77.6050,
            total_floors: 2,
            open_time: open.map(parse),
            close_time: close.map(parse),
            amenities: vec!["cctv".into()],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn haversine_between_known_points() {
        // MG Road to the airport, about 27 km as the crow flies.
        let d = haversine_km(12.9756, 77.6050, 13.1986, 77.7066);
        assert!((d - 27.0).abs() < 5.0, "unexpected distance {d}");
        assert!(haversine_km(10.0, 10.0, 10.0, 10.0).abs() < 1e-9);
    }

    #[test]
    fn operating_hours() {
        let t = |s: &str| NaiveTime::parse_from_str(s, "%H:%M").unwrap();

        let day = facility(Some("08:00"), Some("22:00"));
        assert!(day.is_open_at(t("08:00")));
        assert!(!day.is_open_at(t("22:00")));
        assert!(!day.is_open_at(t("03:00")));

        let night = facility(Some("22:00"), Some("06:00"));
        assert!(night.is_open_at(t("23:30")));
        assert!(night.is_open_at(t("05:59")));
        assert!(!night.is_open_at(t("12:00")));

        assert!(facility(None, None).is_open_at(t("03:00")));
    }

    #[test]
    fn equal_open_and_close_means_always_open() {
        let t = |s: &str| NaiveTime::parse_from_str(s, "%H:%M").unwrap();

        let midnight = facility(Some("00:00"), Some("00:00"));
        assert!(midnight.is_open_at(t("00:00")));
        assert!(midnight.is_open_at(t("13:45")));
        assert!(midnight.is_open_at(t("23:59")));

        assert!(facility(Some("06:00"), Some("06:00")).is_open_at(t("05:59")));
    }
}
