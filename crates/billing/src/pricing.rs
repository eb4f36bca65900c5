//! Plan price table.
//!
//! Prices are an explicit value handed to whoever needs them (the billing handler, the plan
//! listing query); there is no process-wide table.

use std::collections::BTreeMap;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use flowops_core::money::normalize_currency;
use flowops_core::{DEFAULT_CURRENCY, Money};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PricingError {
    #[error("unknown plan: {0}")]
    UnknownPlan(String),

    #[error("invalid price table entry: {0}")]
    InvalidEntry(String),
}

/// One row of the plan listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanPrice {
    pub code: String,
    pub price: Money,
}

/// Monthly price per plan code, in a single currency.
///
/// Lookups are case-insensitive and ignore surrounding whitespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanPricing {
    prices: BTreeMap<String, Decimal>,
    currency: String,
}

impl Default for PlanPricing {
    fn default() -> Self {
        Self::standard()
    }
}

impl PlanPricing {
    /// An empty table in `currency`.
    pub fn new(currency: &str) -> Result<Self, PricingError> {
        let currency =
            normalize_currency(currency).map_err(|e| PricingError::InvalidEntry(e.to_string()))?;
        Ok(Self {
            prices: BTreeMap::new(),
            currency,
        })
    }

    /// BASIC 9.99, STANDARD 19.99, PREMIUM 29.99 in PLN.
    pub fn standard() -> Self {
        let prices = [
            ("BASIC", Decimal::new(999, 2)),
            ("STANDARD", Decimal::new(1999, 2)),
            ("PREMIUM", Decimal::new(2999, 2)),
        ]
        .into_iter()
        .map(|(code, price)| (code.to_string(), price))
        .collect();
        Self {
            prices,
            currency: DEFAULT_CURRENCY.to_string(),
        }
    }

    /// Add or replace a plan price.
    pub fn with_plan(mut self, code: &str, price: Decimal) -> Result<Self, PricingError> {
        let key = normalize_code(code);
        if key.is_empty() {
            return Err(PricingError::InvalidEntry("plan code must not be blank".into()));
        }
        if price <= Decimal::ZERO {
            return Err(PricingError::InvalidEntry(format!(
                "price for {key} must be positive, got {price}"
            )));
        }
        self.prices.insert(key, price);
        Ok(self)
    }

    /// Parse `CODE=PRICE` pairs separated by commas, e.g. `BASIC=9.99,PREMIUM=29.99`.
    pub fn parse(table: &str, currency: &str) -> Result<Self, PricingError> {
        let mut pricing = Self::new(currency)?;
        for entry in table.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (code, price) = entry
                .split_once('=')
                .ok_or_else(|| PricingError::InvalidEntry(entry.to_string()))?;
            let price = Decimal::from_str(price.trim())
                .map_err(|e| PricingError::InvalidEntry(format!("{entry}: {e}")))?;
            pricing = pricing.with_plan(code, price)?;
        }
        if pricing.prices.is_empty() {
            return Err(PricingError::InvalidEntry("price table is empty".into()));
        }
        Ok(pricing)
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn price(&self, plan_code: &str) -> Result<Money, PricingError> {
        let key = normalize_code(plan_code);
        self.prices
            .get(&key)
            .map(|amount| Money {
                amount: *amount,
                currency: self.currency.clone(),
            })
            .ok_or(PricingError::UnknownPlan(key))
    }

    /// All plans, cheapest first.
    pub fn plans(&self) -> Vec<PlanPrice> {
        let mut plans: Vec<PlanPrice> = self
            .prices
            .iter()
            .map(|(code, amount)| PlanPrice {
                code: code.clone(),
                price: Money {
                    amount: *amount,
                    currency: self.currency.clone(),
                },
            })
            .collect();
        plans.sort_by(|a, b| a.price.amount.cmp(&b.price.amount).then(a.code.cmp(&b.code)));
        plans
    }
}

fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}
