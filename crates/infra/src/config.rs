//! Runtime configuration from plain environment variables.
//!
//! | Variable | Default |
//! |---|---|
//! | `DATABASE_URL` | unset (in-memory adapters) |
//! | `FLOWOPS_DB_MAX_CONNECTIONS` | 5 |
//! | `FLOWOPS_PUBLISH_MAX_RETRIES` | 3 |
//! | `FLOWOPS_PUBLISH_BASE_DELAY_MS` | 50 |
//! | `FLOWOPS_PLAN_PRICES` | `BASIC=9.99,STANDARD=19.99,PREMIUM=29.99` |
//! | `FLOWOPS_CURRENCY` | PLN |

use std::str::FromStr;
use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

use flowops_billing::{PlanPricing, PricingError};
use flowops_core::DEFAULT_CURRENCY;

use crate::retry::RetryPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },

    #[error("invalid plan price table: {0}")]
    Pricing(#[from] PricingError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowOpsConfig {
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub publish_retry: RetryPolicy,
    pub pricing: PlanPricing,
}

impl Default for FlowOpsConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            db_max_connections: 5,
            publish_retry: RetryPolicy::default(),
            pricing: PlanPricing::standard(),
        }
    }
}

impl FlowOpsConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let db_max_connections =
            parse_or(&get, "FLOWOPS_DB_MAX_CONNECTIONS", defaults.db_max_connections)?;
        let max_retries = parse_or(
            &get,
            "FLOWOPS_PUBLISH_MAX_RETRIES",
            defaults.publish_retry.max_retries,
        )?;
        let base_delay_ms = parse_or(
            &get,
            "FLOWOPS_PUBLISH_BASE_DELAY_MS",
            defaults.publish_retry.base_delay.as_millis() as u64,
        )?;
        if db_max_connections == 0 {
            return Err(ConfigError::Invalid {
                name: "FLOWOPS_DB_MAX_CONNECTIONS",
                value: "0".to_string(),
            });
        }

        let currency = get("FLOWOPS_CURRENCY").unwrap_or_else(|| DEFAULT_CURRENCY.to_string());
        let pricing = match get("FLOWOPS_PLAN_PRICES") {
            Some(table) => PlanPricing::parse(&table, &currency)?,
            None if currency.eq_ignore_ascii_case(DEFAULT_CURRENCY) => PlanPricing::standard(),
            None => {
                let mut pricing = PlanPricing::new(&currency)?;
                for plan in PlanPricing::standard().plans() {
                    pricing = pricing.with_plan(&plan.code, plan.price.amount)?;
                }
                pricing
            }
        };

        Ok(Self {
            database_url: get("DATABASE_URL"),
            db_max_connections,
            publish_retry: RetryPolicy::new(max_retries, Duration::from_millis(base_delay_ms)),
            pricing,
        })
    }

    /// Open a pool when a database is configured.
    pub async fn connect(&self) -> Result<Option<PgPool>, sqlx::Error> {
        let Some(url) = &self.database_url else {
            return Ok(None);
        };
        let pool = PgPoolOptions::new()
            .max_connections(self.db_max_connections)
            .connect(url)
            .await?;
        Ok(Some(pool))
    }
}

fn parse_or<T, G>(get: &G, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(name) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid { name, value: raw }),
    }
}
