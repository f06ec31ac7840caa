use std::{env, fmt::Display, net::IpAddr, str::FromStr, time::Duration};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::services::geo::{miles_to_meters, GeoPoint};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {key} value {value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
    pub identity_verify_url: Option<String>,
    pub presence: PresenceConfig,
}

/// Timing and geometry knobs for the presence pipeline.
#[derive(Debug, Clone)]
pub struct PresenceConfig {
    pub publish_interval: Duration,
    pub location_fix_timeout: Duration,
    pub store_write_timeout: Duration,
    pub store_retry_delay: Duration,
    pub fallback_center: GeoPoint,
    pub default_radius_meters: f64,
    pub watch_min_distance_meters: f64,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            publish_interval: Duration::from_secs(10),
            location_fix_timeout: Duration::from_millis(8_000),
            store_write_timeout: Duration::from_millis(5_000),
            store_retry_delay: Duration::from_millis(500),
            fallback_center: GeoPoint::AUSTIN,
            default_radius_meters: miles_to_meters(50.0),
            watch_min_distance_meters: 5.0,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let defaults = PresenceConfig::default();

        let fallback_lat: f64 = try_load("FALLBACK_LAT", defaults.fallback_center.lat)?;
        let fallback_lng: f64 = try_load("FALLBACK_LNG", defaults.fallback_center.lng)?;
        let fallback_center =
            GeoPoint::new(fallback_lat, fallback_lng).map_err(|e| ConfigError::Invalid {
                key: "FALLBACK_LAT/FALLBACK_LNG",
                value: format!("{fallback_lat},{fallback_lng}"),
                reason: e.to_string(),
            })?;

        let default_radius_meters: f64 =
            try_load("DEFAULT_RADIUS_METERS", defaults.default_radius_meters)?;
        if !default_radius_meters.is_finite() || default_radius_meters <= 0.0 {
            return Err(ConfigError::Invalid {
                key: "DEFAULT_RADIUS_METERS",
                value: default_radius_meters.to_string(),
                reason: "must be a positive number of meters".to_string(),
            });
        }

        let presence = PresenceConfig {
            publish_interval: Duration::from_secs(
                try_load::<u64>("PRESENCE_PUBLISH_INTERVAL_SECS", 10)?.max(1),
            ),
            location_fix_timeout: Duration::from_millis(try_load("LOCATION_FIX_TIMEOUT_MS", 8_000)?),
            store_write_timeout: Duration::from_millis(try_load("STORE_WRITE_TIMEOUT_MS", 5_000)?),
            store_retry_delay: Duration::from_millis(try_load("STORE_RETRY_DELAY_MS", 500)?),
            fallback_center,
            default_radius_meters,
            watch_min_distance_meters: try_load(
                "WATCH_MIN_DISTANCE_METERS",
                defaults.watch_min_distance_meters,
            )?,
        };

        let host: String = try_load("HOST", "127.0.0.1".to_string())?;
        let identity_verify_url = env::var("IDENTITY_VERIFY_URL")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        check_token_trust(
            &host,
            identity_verify_url.as_deref(),
            try_load("ALLOW_UNVERIFIED_TOKENS", false)?,
        )?;

        Ok(Self {
            database_url: try_load("DATABASE_URL", "sqlite://cirkle.db?mode=rwc".to_string())?,
            host,
            port: try_load("PORT", 8080)?,
            allowed_origins: env::var("ALLOWED_ORIGINS")
                .unwrap_or_default()
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            identity_verify_url,
            presence,
        })
    }

    pub fn log_summary(&self) {
        info!("⚙️  Config loaded: {}", self);
    }
}

fn is_loopback(host: &str) -> bool {
    host.eq_ignore_ascii_case("localhost")
        || host
            .trim_matches(|c| c == '[' || c == ']')
            .parse::<IpAddr>()
            .is_ok_and(|ip| ip.is_loopback())
}

/// Without a verify URL tokens are decoded but not checked, so anything
/// beyond loopback needs an explicit opt-in.
fn check_token_trust(
    host: &str,
    verify_url: Option<&str>,
    allow_unverified: bool,
) -> Result<(), ConfigError> {
    if verify_url.is_some() {
        return Ok(());
    }
    if is_loopback(host) {
        warn!("IDENTITY_VERIFY_URL not set, accepting unverified tokens on {host}");
        return Ok(());
    }
    if allow_unverified {
        warn!("⚠️  ALLOW_UNVERIFIED_TOKENS set, accepting unverified tokens on {host}");
        return Ok(());
    }
    Err(ConfigError::Invalid {
        key: "IDENTITY_VERIFY_URL",
        value: String::new(),
        reason: format!("required when HOST={host} is not loopback"),
    })
}

fn try_load<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr + Display,
    T::Err: Display,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        }),
        Err(_) => {
            debug!("{key} not set, using default: {default}");
            Ok(default)
        }
    }
}

impl Display for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "db={} bind={}:{} identity={} publish_every={:?}",
            self.database_url,
            self.host,
            self.port,
            if self.identity_verify_url.is_some() {
                "remote"
            } else {
                "unverified-dev"
            },
            self.presence.publish_interval
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_published_policy() {
        let p = PresenceConfig::default();
        assert_eq!(p.publish_interval, Duration::from_secs(10));
        assert_eq!(p.fallback_center, GeoPoint::AUSTIN);
        assert!((p.default_radius_meters - 80_467.2).abs() < 1e-6);
    }

    #[test]
    fn unverified_tokens_stay_on_loopback() {
        for host in ["127.0.0.1", "localhost", "::1", "[::1]"] {
            assert!(check_token_trust(host, None, false).is_ok(), "{host}");
        }

        let err = check_token_trust("0.0.0.0", None, false).unwrap_err();
        assert!(err.to_string().contains("IDENTITY_VERIFY_URL"));

        assert!(check_token_trust("0.0.0.0", Some("https://id.example/verify"), false).is_ok());
        assert!(check_token_trust("0.0.0.0", None, true).is_ok());
    }

    #[test]
    fn try_load_parses_or_reports_the_key() {
        env::set_var("CIRKLE_TEST_PORT_OK", " 9090 ");
        assert_eq!(try_load::<u16>("CIRKLE_TEST_PORT_OK", 1).unwrap(), 9090);

        env::set_var("CIRKLE_TEST_PORT_BAD", "ninety");
        let err = try_load::<u16>("CIRKLE_TEST_PORT_BAD", 1).unwrap_err();
        assert!(err.to_string().contains("CIRKLE_TEST_PORT_BAD"));

        assert_eq!(try_load::<u16>("CIRKLE_TEST_PORT_UNSET", 7).unwrap(), 7);
    }
}
