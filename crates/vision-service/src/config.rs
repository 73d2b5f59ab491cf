//! Vision Service configuration.
//!
//! Configuration is loaded from environment variables. All sensitive
//! fields are redacted in Debug output.

use common::jwt::{DEFAULT_CLOCK_SKEW, MAX_CLOCK_SKEW};
use common::secret::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default HTTP bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default base URL of the video collaborator.
pub const DEFAULT_VIDEO_SERVICE_URL: &str = "http://localhost:8090";

/// Vision tokens debited per meeting creation.
pub const DEFAULT_MEETING_TOKEN_COST: i64 = 1;

/// Fallback meeting length when the video duration is unknown (20 minutes).
pub const DEFAULT_MAX_MEETING_DURATION_SECONDS: u64 = 1200;

/// Grace period added on top of the meeting duration before it expires.
pub const DEFAULT_EXPIRY_GRACE_SECONDS: u64 = 30;

/// How long ended meetings are kept before the sweeper purges them.
pub const DEFAULT_ENDED_RETENTION_HOURS: u64 = 24;

/// Default sweeper interval.
pub const DEFAULT_SWEEP_INTERVAL_SECONDS: u64 = 60;

/// Default bound on a single persistent-store call.
pub const DEFAULT_STORE_TIMEOUT_MS: u64 = 5000;

/// Vision Service configuration.
///
/// Database URL and secrets are redacted in Debug output.
#[derive(Clone)]
pub struct Config {
    /// PostgreSQL connection URL.
    pub database_url: String,

    /// Server bind address (default: "0.0.0.0:8080").
    pub bind_address: String,

    /// HS256 key shared with the account system that issues user tokens.
    pub jwt_secret: SecretString,

    /// JWT clock skew tolerance in seconds.
    pub jwt_clock_skew_seconds: i64,

    /// Shared secret the payment collaborator presents in `X-Webhook-Secret`.
    pub webhook_secret: SecretString,

    /// Base URL of the video collaborator.
    pub video_service_url: String,

    /// Tokens debited when a meeting is created.
    pub meeting_token_cost: i64,

    /// Meeting length ceiling used when the video duration is unknown.
    pub max_meeting_duration_seconds: u64,

    pub expiry_grace_seconds: u64,

    pub ended_retention_hours: u64,

    pub sweep_interval_seconds: u64,

    pub store_timeout_ms: u64,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("database_url", &"[REDACTED]")
            .field("bind_address", &self.bind_address)
            .field("jwt_secret", &"[REDACTED]")
            .field("jwt_clock_skew_seconds", &self.jwt_clock_skew_seconds)
            .field("webhook_secret", &"[REDACTED]")
            .field("video_service_url", &self.video_service_url)
            .field("meeting_token_cost", &self.meeting_token_cost)
            .field(
                "max_meeting_duration_seconds",
                &self.max_meeting_duration_seconds,
            )
            .field("expiry_grace_seconds", &self.expiry_grace_seconds)
            .field("ended_retention_hours", &self.ended_retention_hours)
            .field("sweep_interval_seconds", &self.sweep_interval_seconds)
            .field("store_timeout_ms", &self.store_timeout_ms)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid JWT clock skew configuration: {0}")]
    InvalidJwtClockSkew(String),

    #[error("Invalid value for {name}: {reason}")]
    InvalidValue { name: String, reason: String },
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let database_url = required(vars, "DATABASE_URL")?;

        let bind_address = vars
            .get("BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let jwt_secret = SecretString::from(required(vars, "JWT_SECRET")?);

        let jwt_clock_skew_seconds = if let Some(value_str) = vars.get("JWT_CLOCK_SKEW_SECONDS") {
            let value: i64 = value_str.parse().map_err(|e| {
                ConfigError::InvalidJwtClockSkew(format!(
                    "JWT_CLOCK_SKEW_SECONDS must be a valid integer, got '{value_str}': {e}"
                ))
            })?;

            if value <= 0 {
                return Err(ConfigError::InvalidJwtClockSkew(format!(
                    "JWT_CLOCK_SKEW_SECONDS must be positive, got {value}"
                )));
            }

            #[allow(clippy::cast_possible_wrap)]
            let max = MAX_CLOCK_SKEW.as_secs() as i64;
            if value > max {
                return Err(ConfigError::InvalidJwtClockSkew(format!(
                    "JWT_CLOCK_SKEW_SECONDS must not exceed {max} seconds, got {value}"
                )));
            }

            value
        } else {
            #[allow(clippy::cast_possible_wrap)]
            let default = DEFAULT_CLOCK_SKEW.as_secs() as i64;
            default
        };

        let webhook_secret = SecretString::from(required(vars, "WEBHOOK_SECRET")?);

        let video_service_url = vars
            .get("VIDEO_SERVICE_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_VIDEO_SERVICE_URL.to_string());

        let meeting_token_cost =
            positive(vars, "MEETING_TOKEN_COST", DEFAULT_MEETING_TOKEN_COST)?;
        let max_meeting_duration_seconds = positive(
            vars,
            "MAX_MEETING_DURATION_SECONDS",
            DEFAULT_MAX_MEETING_DURATION_SECONDS,
        )?;

        // Zero grace is allowed: meetings expire exactly at their duration.
        let expiry_grace_seconds = parse_or(
            vars,
            "EXPIRY_GRACE_SECONDS",
            DEFAULT_EXPIRY_GRACE_SECONDS,
        )?;

        let ended_retention_hours = positive(
            vars,
            "ENDED_RETENTION_HOURS",
            DEFAULT_ENDED_RETENTION_HOURS,
        )?;
        let sweep_interval_seconds = positive(
            vars,
            "SWEEP_INTERVAL_SECONDS",
            DEFAULT_SWEEP_INTERVAL_SECONDS,
        )?;
        let store_timeout_ms = positive(vars, "STORE_TIMEOUT_MS", DEFAULT_STORE_TIMEOUT_MS)?;

        Ok(Config {
            database_url,
            bind_address,
            jwt_secret,
            jwt_clock_skew_seconds,
            webhook_secret,
            video_service_url,
            meeting_token_cost,
            max_meeting_duration_seconds,
            expiry_grace_seconds,
            ended_retention_hours,
            sweep_interval_seconds,
            store_timeout_ms,
        })
    }

    /// Bound applied to each persistent-store call.
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    /// JWT clock skew as a `Duration`.
    pub fn jwt_clock_skew(&self) -> Duration {
        Duration::from_secs(self.jwt_clock_skew_seconds.unsigned_abs())
    }
}

fn required(vars: &HashMap<String, String>, name: &str) -> Result<String, ConfigError> {
    vars.get(name)
        .filter(|value| !value.is_empty())
        .cloned()
        .ok_or_else(|| ConfigError::MissingEnvVar(name.to_string()))
}

fn parse_or<T>(vars: &HashMap<String, String>, name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match vars.get(name) {
        Some(value_str) => value_str.parse().map_err(|e| ConfigError::InvalidValue {
            name: name.to_string(),
            reason: format!("must be a valid integer, got '{value_str}': {e}"),
        }),
        None => Ok(default),
    }
}

fn positive<T>(vars: &HashMap<String, String>, name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + Default + fmt::Display,
    T::Err: fmt::Display,
{
    let value = parse_or(vars, name, default)?;
    if value <= T::default() {
        return Err(ConfigError::InvalidValue {
            name: name.to_string(),
            reason: format!("must be greater than 0, got {value}"),
        });
    }
    Ok(value)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use common::secret::ExposeSecret;

    fn base_vars() -> HashMap<String, String> {
        HashMap::from([
            (
                "DATABASE_URL".to_string(),
                "postgresql://localhost/vs_test".to_string(),
            ),
            ("JWT_SECRET".to_string(), "jwt-secret-value".to_string()),
            ("WEBHOOK_SECRET".to_string(), "webhook-secret-value".to_string()),
        ])
    }

    #[test]
    fn test_from_vars_success_with_defaults() {
        let config = Config::from_vars(&base_vars()).expect("Config should load successfully");

        assert_eq!(config.database_url, "postgresql://localhost/vs_test");
        assert_eq!(config.bind_address, DEFAULT_BIND_ADDRESS);
        assert_eq!(config.jwt_secret.expose_secret(), "jwt-secret-value");
        assert_eq!(config.jwt_clock_skew_seconds, 300);
        assert_eq!(config.video_service_url, DEFAULT_VIDEO_SERVICE_URL);
        assert_eq!(config.meeting_token_cost, 1);
        assert_eq!(config.max_meeting_duration_seconds, 1200);
        assert_eq!(config.expiry_grace_seconds, 30);
        assert_eq!(config.ended_retention_hours, 24);
        assert_eq!(config.sweep_interval_seconds, 60);
        assert_eq!(config.store_timeout(), Duration::from_millis(5000));
    }

    #[test]
    fn test_from_vars_custom_values() {
        let mut vars = base_vars();
        vars.insert("BIND_ADDRESS".to_string(), "127.0.0.1:9000".to_string());
        vars.insert(
            "VIDEO_SERVICE_URL".to_string(),
            "http://videos.internal:8090/".to_string(),
        );
        vars.insert("MEETING_TOKEN_COST".to_string(), "3".to_string());
        vars.insert("EXPIRY_GRACE_SECONDS".to_string(), "0".to_string());
        vars.insert("SWEEP_INTERVAL_SECONDS".to_string(), "15".to_string());

        let config = Config::from_vars(&vars).unwrap();

        assert_eq!(config.bind_address, "127.0.0.1:9000");
        assert_eq!(config.video_service_url, "http://videos.internal:8090");
        assert_eq!(config.meeting_token_cost, 3);
        assert_eq!(config.expiry_grace_seconds, 0);
        assert_eq!(config.sweep_interval_seconds, 15);
    }

    #[test]
    fn test_missing_required_vars() {
        for name in ["DATABASE_URL", "JWT_SECRET", "WEBHOOK_SECRET"] {
            let mut vars = base_vars();
            vars.remove(name);

            let result = Config::from_vars(&vars);
            assert!(
                matches!(result, Err(ConfigError::MissingEnvVar(ref v)) if v == name),
                "expected missing {name}"
            );
        }
    }

    #[test]
    fn test_empty_secret_rejected() {
        let mut vars = base_vars();
        vars.insert("JWT_SECRET".to_string(), String::new());

        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::MissingEnvVar(_))
        ));
    }

    #[test]
    fn test_jwt_clock_skew_bounds() {
        let mut vars = base_vars();

        vars.insert("JWT_CLOCK_SKEW_SECONDS".to_string(), "0".to_string());
        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidJwtClockSkew(_))
        ));

        vars.insert("JWT_CLOCK_SKEW_SECONDS".to_string(), "601".to_string());
        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidJwtClockSkew(_))
        ));

        vars.insert("JWT_CLOCK_SKEW_SECONDS".to_string(), "600".to_string());
        assert_eq!(
            Config::from_vars(&vars).unwrap().jwt_clock_skew(),
            Duration::from_secs(600)
        );

        vars.insert("JWT_CLOCK_SKEW_SECONDS".to_string(), "abc".to_string());
        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidJwtClockSkew(_))
        ));
    }

    #[test]
    fn test_zero_and_negative_values_rejected() {
        for name in [
            "MEETING_TOKEN_COST",
            "MAX_MEETING_DURATION_SECONDS",
            "ENDED_RETENTION_HOURS",
            "SWEEP_INTERVAL_SECONDS",
            "STORE_TIMEOUT_MS",
        ] {
            let mut vars = base_vars();
            vars.insert(name.to_string(), "0".to_string());

            let result = Config::from_vars(&vars);
            assert!(
                matches!(result, Err(ConfigError::InvalidValue { name: ref n, .. }) if n == name),
                "expected {name}=0 to be rejected"
            );
        }

        let mut vars = base_vars();
        vars.insert("MEETING_TOKEN_COST".to_string(), "-2".to_string());
        assert!(Config::from_vars(&vars).is_err());
    }

    #[test]
    fn test_non_numeric_value_rejected() {
        let mut vars = base_vars();
        vars.insert("STORE_TIMEOUT_MS".to_string(), "soon".to_string());

        let err = Config::from_vars(&vars).unwrap_err();
        assert!(err.to_string().contains("STORE_TIMEOUT_MS"));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = Config::from_vars(&base_vars()).unwrap();
        let debug_output = format!("{config:?}");

        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("postgresql://"));
        assert!(!debug_output.contains("jwt-secret-value"));
        assert!(!debug_output.contains("webhook-secret-value"));
        assert!(debug_output.contains("0.0.0.0:8080"));
    }
}
