use std::env;
use std::fmt::Display;
use std::ops::RangeInclusive;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// How strictly a payment amount must match the appointment total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmountMatchPolicy {
    Exact,
    /// Accept amounts within this absolute difference of the total.
    Tolerance(Decimal),
    /// Admins may record any non-negative amount; everyone else must match exactly.
    AdminOverride,
}

impl Default for AmountMatchPolicy {
    fn default() -> Self {
        AmountMatchPolicy::Exact
    }
}

impl FromStr for AmountMatchPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim().to_ascii_lowercase();
        match value.as_str() {
            "exact" => Ok(AmountMatchPolicy::Exact),
            "admin_override" => Ok(AmountMatchPolicy::AdminOverride),
            other => {
                let tolerance = other
                    .strip_prefix("tolerance:")
                    .ok_or_else(|| format!("Unknown amount policy: {}", other))?;
                let max_difference = Decimal::from_str(tolerance)
                    .map_err(|e| format!("Invalid tolerance '{}': {}", tolerance, e))?;
                if max_difference.is_sign_negative() {
                    return Err("Tolerance must not be negative".to_string());
                }
                Ok(AmountMatchPolicy::Tolerance(max_difference))
            }
        }
    }
}

/// Accepted range for `MOBILE_MONEY_TIMEOUT_MINUTES`, one minute up to a day.
pub const MOBILE_MONEY_TIMEOUT_RANGE: RangeInclusive<i64> = 1..=1440;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub jwt_secret: String,
    pub mobile_money_base_url: String,
    pub mobile_money_api_key: String,
    pub mobile_money_shortcode: String,
    pub mobile_money_callback_url: String,
    pub mobile_money_callback_token: String,
    pub mobile_money_timeout_minutes: i64,
    pub expiry_sweep_interval_seconds: u64,
    pub amount_policy: AmountMatchPolicy,
    pub confirm_appointment_on_payment: bool,
    pub snapshot_path: Option<String>,
    pub server_port: u16,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            mobile_money_base_url: "https://sandbox.safaricom.co.ke".to_string(),
            mobile_money_api_key: String::new(),
            mobile_money_shortcode: "174379".to_string(),
            mobile_money_callback_url: String::new(),
            mobile_money_callback_token: String::new(),
            mobile_money_timeout_minutes: 15,
            expiry_sweep_interval_seconds: 60,
            amount_policy: AmountMatchPolicy::Exact,
            confirm_appointment_on_payment: true,
            snapshot_path: None,
            server_port: 3000,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let config = Self {
            jwt_secret: env::var("AUTH_JWT_SECRET")
                .unwrap_or_else(|_| {
                    warn!("AUTH_JWT_SECRET not set, using empty value");
                    String::new()
                }),
            mobile_money_base_url: env::var("MOBILE_MONEY_BASE_URL")
                .unwrap_or_else(|_| {
                    warn!("MOBILE_MONEY_BASE_URL not set, using default");
                    defaults.mobile_money_base_url.clone()
                }),
            mobile_money_api_key: env::var("MOBILE_MONEY_API_KEY")
                .unwrap_or_else(|_| {
                    warn!("MOBILE_MONEY_API_KEY not set, using empty value");
                    String::new()
                }),
            mobile_money_shortcode: env::var("MOBILE_MONEY_SHORTCODE")
                .unwrap_or_else(|_| defaults.mobile_money_shortcode.clone()),
            mobile_money_callback_url: env::var("MOBILE_MONEY_CALLBACK_URL")
                .unwrap_or_else(|_| {
                    warn!("MOBILE_MONEY_CALLBACK_URL not set, using empty value");
                    String::new()
                }),
            mobile_money_callback_token: env::var("MOBILE_MONEY_CALLBACK_TOKEN")
                .unwrap_or_default(),
            mobile_money_timeout_minutes: parse_in_range(
                "MOBILE_MONEY_TIMEOUT_MINUTES",
                env::var("MOBILE_MONEY_TIMEOUT_MINUTES").ok(),
                defaults.mobile_money_timeout_minutes,
                MOBILE_MONEY_TIMEOUT_RANGE,
            ),
            expiry_sweep_interval_seconds: parse_env("PAYMENT_EXPIRY_SWEEP_SECONDS", defaults.expiry_sweep_interval_seconds),
            amount_policy: parse_env("PAYMENT_AMOUNT_POLICY", defaults.amount_policy),
            confirm_appointment_on_payment: parse_env("CONFIRM_APPOINTMENT_ON_PAYMENT", defaults.confirm_appointment_on_payment),
            snapshot_path: env::var("STORE_SNAPSHOT_PATH").ok().filter(|p| !p.is_empty()),
            server_port: parse_env("SERVER_PORT", defaults.server_port),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.jwt_secret.is_empty()
    }

    pub fn is_mobile_money_configured(&self) -> bool {
        !self.mobile_money_base_url.is_empty()
            && !self.mobile_money_api_key.is_empty()
            && !self.mobile_money_shortcode.is_empty()
    }
}

fn parse_env<T>(key: &str, default: T) -> T
where
    T: FromStr,
    T::Err: Display,
{
    parse_value(key, env::var(key).ok(), default)
}

fn parse_value<T>(key: &str, raw: Option<String>, default: T) -> T
where
    T: FromStr,
    T::Err: Display,
{
    match raw {
        Some(raw) => match raw.parse::<T>() {
            Ok(value) => value,
            Err(e) => {
                warn!("{} has invalid value '{}' ({}), using default", key, raw, e);
                default
            }
        },
        None => default,
    }
}

fn parse_in_range<T>(key: &str, raw: Option<String>, default: T, range: RangeInclusive<T>) -> T
where
    T: FromStr + PartialOrd + Display + Copy,
    T::Err: Display,
{
    let value = parse_value(key, raw, default);
    if range.contains(&value) {
        value
    } else {
        warn!(
            "{} must be between {} and {}, got {}, using default {}",
            key,
            range.start(),
            range.end(),
            value,
            default
        );
        default
    }
}
