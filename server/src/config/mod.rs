use std::env;
use std::net::{IpAddr, SocketAddr};

use chrono::{Duration, FixedOffset};
use rust_decimal::Decimal;
use thiserror::Error;

use crate::services::fees::DEFAULT_GST_PERCENT;

pub mod cors;
pub mod security;

pub use cors::create_cors_layer;
pub use security::create_security_headers_layer;

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 3001;
const DEFAULT_JWT_TTL_HOURS: i64 = 24;
/// IST, the marketplace's home timezone.
const DEFAULT_UTC_OFFSET_MINUTES: i32 = 330;
const DEV_JWT_SECRET: &str = "dev-only-jwt-secret-change-me";
const DEV_PAYMENT_SECRET: &str = "dev-only-payment-secret";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} has an invalid value '{value}'")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentConfig {
    /// Orders are simulated and signed with a local secret.
    Mock { secret: String },
    Razorpay {
        key_id: String,
        key_secret: String,
        webhook_secret: String,
    },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: Option<String>,
    pub host: IpAddr,
    pub port: u16,
    pub jwt_secret: String,
    pub jwt_ttl: Duration,
    pub payment: PaymentConfig,
    pub gst_percent: Decimal,
    pub cors_allowed_origins: Option<String>,
    pub production: bool,
    pub maps_api_key: Option<String>,
    pub local_offset: FixedOffset,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the configuration from any variable source; empty values count
    /// as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let production = get("RUST_ENV")
            .map(|v| v.eq_ignore_ascii_case("production"))
            .unwrap_or(false);

        let host: IpAddr = parse_or("HOST", get("HOST"), DEFAULT_HOST.parse().ok())?;
        let port = parse_or("PORT", get("PORT"), Some(DEFAULT_PORT))?;
        let jwt_ttl_hours: i64 = parse_or(
            "JWT_TTL_HOURS",
            get("JWT_TTL_HOURS"),
            Some(DEFAULT_JWT_TTL_HOURS),
        )?;
        if jwt_ttl_hours <= 0 {
            return Err(ConfigError::Invalid {
                name: "JWT_TTL_HOURS",
                value: jwt_ttl_hours.to_string(),
            });
        }
        let gst_percent: Decimal =
            parse_or("GST_PERCENT", get("GST_PERCENT"), Some(DEFAULT_GST_PERCENT))?;
        if gst_percent.is_sign_negative() {
            return Err(ConfigError::Invalid {
                name: "GST_PERCENT",
                value: gst_percent.to_string(),
            });
        }

        let offset_minutes: i32 = parse_or(
            "LOCAL_UTC_OFFSET_MINUTES",
            get("LOCAL_UTC_OFFSET_MINUTES"),
            Some(DEFAULT_UTC_OFFSET_MINUTES),
        )?;
        let local_offset =
            FixedOffset::east_opt(offset_minutes * 60).ok_or(ConfigError::Invalid {
                name: "LOCAL_UTC_OFFSET_MINUTES",
                value: offset_minutes.to_string(),
            })?;

        let jwt_secret = match get("JWT_SECRET") {
            Some(secret) => secret,
            None if production => return Err(ConfigError::Missing("JWT_SECRET")),
            None => {
                tracing::warn!("JWT_SECRET not set, using an insecure development secret");
                DEV_JWT_SECRET.to_string()
            }
        };

        let payment = match get("PAYMENT_MODE").as_deref().unwrap_or("mock") {
            "razorpay" => PaymentConfig::Razorpay {
                key_id: get("RAZORPAY_KEY_ID").ok_or(ConfigError::Missing("RAZORPAY_KEY_ID"))?,
                key_secret: get("RAZORPAY_KEY_SECRET")
                    .ok_or(ConfigError::Missing("RAZORPAY_KEY_SECRET"))?,
                webhook_secret: get("RAZORPAY_WEBHOOK_SECRET")
                    .ok_or(ConfigError::Missing("RAZORPAY_WEBHOOK_SECRET"))?,
            },
            "mock" if production => {
                return Err(ConfigError::Invalid {
                    name: "PAYMENT_MODE",
                    value: "mock".to_string(),
                })
            }
            "mock" => PaymentConfig::Mock {
                secret: get("MOCK_PAYMENT_SECRET")
                    .unwrap_or_else(|| DEV_PAYMENT_SECRET.to_string()),
            },
            other => {
                return Err(ConfigError::Invalid {
                    name: "PAYMENT_MODE",
                    value: other.to_string(),
                })
            }
        };

        Ok(Self {
            database_url: get("DATABASE_URL"),
            host,
            port,
            jwt_secret,
            jwt_ttl: Duration::hours(jwt_ttl_hours),
            payment,
            gst_percent,
            cors_allowed_origins: get("CORS_ALLOWED_ORIGINS"),
            production,
            maps_api_key: get("MAPS_API_KEY"),
            local_offset,
        })
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

fn parse_or<T: std::str::FromStr>(
    name: &'static str,
    raw: Option<String>,
    default: Option<T>,
) -> Result<T, ConfigError> {
    match raw {
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
        None => default.ok_or(ConfigError::Missing(name)),
    }
}
