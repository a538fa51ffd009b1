use secrecy::{ExposeSecret, Secret};
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;

/// Upper bound on how long abandoned checkouts are kept, in days.
pub const MAX_PENDING_RETENTION_DAYS: i64 = 3650;

#[derive(Debug, Clone)]
pub struct OrderServiceConfig {
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub stripe: StripeConfig,
    pub cron: CronConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: Secret<String>,
    pub max_connections: u32,
    pub min_connections: u32,
}

/// Tokens are issued by the hosted auth provider and signed with a shared
/// HS256 secret.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub jwt_secret: Secret<String>,
    pub audience: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: Secret<String>,
    pub webhook_secret: Secret<String>,
    pub api_base_url: String,
    pub currency: String,
    pub webhook_tolerance_seconds: i64,
}

#[derive(Debug, Clone)]
pub struct CronConfig {
    pub secret: Secret<String>,
    pub pending_retention_days: i64,
    /// When set, the service also purges stale orders on its own schedule.
    pub interval_seconds: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub requests: u32,
    pub window_seconds: u64,
    pub redis_url: Option<Secret<String>>,
    /// Key clients by the first `x-forwarded-for` hop. Only safe behind a
    /// proxy that overwrites the header.
    pub trust_forwarded_for: bool,
}

impl OrderServiceConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let config = OrderServiceConfig {
            common: common_config,
            environment,
            service_name: get_env("SERVICE_NAME", Some("order-service"), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            otlp_endpoint: get_optional_env("OTLP_ENDPOINT"),
            database: DatabaseConfig {
                url: Secret::new(get_env("DATABASE_URL", None, is_prod)?),
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", "10", is_prod)?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", "1", is_prod)?,
            },
            auth: AuthConfig {
                jwt_secret: Secret::new(get_env("AUTH_JWT_SECRET", None, is_prod)?),
                audience: get_optional_env("AUTH_JWT_AUDIENCE"),
            },
            stripe: StripeConfig {
                secret_key: Secret::new(get_env("STRIPE_SECRET_KEY", Some(""), is_prod)?),
                webhook_secret: Secret::new(get_env("STRIPE_WEBHOOK_SECRET", Some(""), is_prod)?),
                api_base_url: get_env(
                    "STRIPE_API_BASE_URL",
                    Some("https://api.stripe.com"),
                    is_prod,
                )?,
                currency: get_env("STRIPE_CURRENCY", Some("usd"), is_prod)?,
                webhook_tolerance_seconds: parse_env(
                    "STRIPE_WEBHOOK_TOLERANCE_SECONDS",
                    "300",
                    is_prod,
                )?,
            },
            cron: CronConfig {
                secret: Secret::new(get_env("CRON_SECRET", Some(""), is_prod)?),
                pending_retention_days: parse_env("PENDING_ORDER_RETENTION_DAYS", "7", is_prod)?,
                interval_seconds: get_optional_env("CLEANUP_INTERVAL_SECONDS")
                    .map(|v| {
                        v.parse().map_err(|e: std::num::ParseIntError| {
                            AppError::ConfigError(anyhow::anyhow!(
                                "CLEANUP_INTERVAL_SECONDS: {}",
                                e
                            ))
                        })
                    })
                    .transpose()?,
            },
            rate_limit: RateLimitConfig {
                requests: parse_env("RATE_LIMIT_REQUESTS", "30", is_prod)?,
                window_seconds: parse_env("RATE_LIMIT_WINDOW_SECONDS", "60", is_prod)?,
                redis_url: get_optional_env("REDIS_URL").map(Secret::new),
                trust_forwarded_for: parse_env(
                    "RATE_LIMIT_TRUST_FORWARDED_FOR",
                    "false",
                    is_prod,
                )?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if !(1..=MAX_PENDING_RETENTION_DAYS).contains(&self.cron.pending_retention_days) {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PENDING_ORDER_RETENTION_DAYS must be between 1 and {}",
                MAX_PENDING_RETENTION_DAYS
            )));
        }

        if self.stripe.webhook_tolerance_seconds <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "STRIPE_WEBHOOK_TOLERANCE_SECONDS must be positive"
            )));
        }

        if self.cron.interval_seconds == Some(0) {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "CLEANUP_INTERVAL_SECONDS must be positive when set"
            )));
        }

        if self.environment == Environment::Prod {
            if self.auth.jwt_secret.expose_secret().len() < 32 {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "AUTH_JWT_SECRET must be at least 32 characters in production"
                )));
            }

            if self.cron.secret.expose_secret().is_empty() {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "CRON_SECRET must be set in production"
                )));
            }

            if self.stripe.webhook_secret.expose_secret().is_empty() {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "STRIPE_WEBHOOK_SECRET must be set in production"
                )));
            }
        }

        Ok(())
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

fn get_optional_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T>(key: &str, default: &str, is_prod: bool) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, Some(default), is_prod)?
        .parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("{}: {}", key, e)))
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> OrderServiceConfig {
        OrderServiceConfig {
            common: core_config::Config::default(),
            environment: Environment::Dev,
            service_name: "order-service".to_string(),
            log_level: "info".to_string(),
            otlp_endpoint: None,
            database: DatabaseConfig {
                url: Secret::new("postgres://localhost/orders".to_string()),
                max_connections: 10,
                min_connections: 1,
            },
            auth: AuthConfig {
                jwt_secret: Secret::new("short".to_string()),
                audience: None,
            },
            stripe: StripeConfig {
                secret_key: Secret::new(String::new()),
                webhook_secret: Secret::new(String::new()),
                api_base_url: "https://api.stripe.com".to_string(),
                currency: "usd".to_string(),
                webhook_tolerance_seconds: 300,
            },
            cron: CronConfig {
                secret: Secret::new(String::new()),
                pending_retention_days: 7,
                interval_seconds: None,
            },
            rate_limit: RateLimitConfig {
                requests: 30,
                window_seconds: 60,
                redis_url: None,
                trust_forwarded_for: false,
            },
        }
    }

    #[test]
    fn environment_parses_case_insensitively() {
        assert_eq!("PROD".parse::<Environment>().unwrap(), Environment::Prod);
        assert_eq!("dev".parse::<Environment>().unwrap(), Environment::Dev);
        assert!("staging".parse::<Environment>().is_err());
    }

    #[test]
    fn dev_config_tolerates_empty_secrets() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn prod_config_requires_secrets() {
        let mut config = sample();
        config.environment = Environment::Prod;
        assert!(config.validate().is_err());

        config.auth.jwt_secret = Secret::new("x".repeat(32));
        config.cron.secret = Secret::new("cron".to_string());
        config.stripe.webhook_secret = Secret::new("whsec".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn retention_must_be_positive() {
        let mut config = sample();
        config.cron.pending_retention_days = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn retention_is_bounded() {
        let mut config = sample();
        config.cron.pending_retention_days = MAX_PENDING_RETENTION_DAYS;
        assert!(config.validate().is_ok());

        for days in [MAX_PENDING_RETENTION_DAYS + 1, i64::MAX] {
            config.cron.pending_retention_days = days;
            assert!(config.validate().is_err());
        }
    }
}
