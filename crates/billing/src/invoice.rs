//! Invoice commands and the events they produce.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use flowops_core::money::normalize_currency;
use flowops_core::{CustomerId, DomainError, DomainResult, InvoiceId, Money, SubscriptionId};
use flowops_events::{EventKind, InvoiceIssued, InvoicePaid, SubscriptionActivated};

use crate::pricing::{PlanPricing, PricingError};

/// Command: IssueInvoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueInvoice {
    pub invoice_id: InvoiceId,
    pub customer_id: CustomerId,
    pub subscription_id: SubscriptionId,
    pub plan_code: String,
    pub price: Money,
    pub issued_at: DateTime<Utc>,
}

impl IssueInvoice {
    /// First invoice of a freshly activated subscription, priced from `pricing`.
    pub fn for_activation(
        activated: &SubscriptionActivated,
        pricing: &PlanPricing,
        issued_at: DateTime<Utc>,
    ) -> Result<Self, PricingError> {
        Ok(Self {
            invoice_id: InvoiceId::new(),
            customer_id: activated.customer_id,
            subscription_id: activated.subscription_id,
            plan_code: activated.plan_code.clone(),
            price: pricing.price(&activated.plan_code)?,
            issued_at,
        })
    }

    pub fn into_event(self) -> DomainResult<EventKind> {
        require_ids(self.customer_id, self.subscription_id)?;
        if self.plan_code.trim().is_empty() {
            return Err(DomainError::validation("plan code must not be blank"));
        }
        let price = Money::positive(self.price.amount, &self.price.currency)?;

        Ok(EventKind::InvoiceIssued(InvoiceIssued {
            invoice_id: self.invoice_id,
            customer_id: self.customer_id,
            subscription_id: self.subscription_id,
            plan_code: self.plan_code.trim().to_uppercase(),
            amount: price.amount,
            currency: price.currency,
            issued_at: self.issued_at,
        }))
    }
}

/// Command: RecordPayment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordPayment {
    pub invoice_id: InvoiceId,
    pub customer_id: CustomerId,
    pub subscription_id: SubscriptionId,
    pub amount: Decimal,
    /// Defaults to PLN when absent.
    pub currency: Option<String>,
    pub payment_method: Option<String>,
    pub transaction_id: Option<String>,
}

impl RecordPayment {
    pub fn into_event(self, paid_at: DateTime<Utc>) -> DomainResult<EventKind> {
        require_ids(self.customer_id, self.subscription_id)?;
        if self.invoice_id.is_nil() {
            return Err(DomainError::validation("invoice id is required"));
        }
        let currency = match self.currency.as_deref() {
            Some(code) => normalize_currency(code)?,
            None => flowops_core::DEFAULT_CURRENCY.to_string(),
        };
        let paid = Money::positive(self.amount, currency)?;

        Ok(EventKind::InvoicePaid(InvoicePaid {
            invoice_id: self.invoice_id,
            customer_id: self.customer_id,
            subscription_id: self.subscription_id,
            amount: paid.amount,
            currency: paid.currency,
            paid_at,
            payment_method: non_blank(self.payment_method),
            transaction_id: non_blank(self.transaction_id),
        }))
    }
}

fn require_ids(customer_id: CustomerId, subscription_id: SubscriptionId) -> DomainResult<()> {
    if customer_id.is_nil() {
        return Err(DomainError::validation("customer id is required"));
    }
    if subscription_id.is_nil() {
        return Err(DomainError::validation("subscription id is required"));
    }
    Ok(())
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn activated() -> SubscriptionActivated {
        let now = Utc::now();
        SubscriptionActivated {
            subscription_id: SubscriptionId::new(),
            customer_id: CustomerId::new(),
            plan_code: "STANDARD".to_string(),
            activated_at: now,
            expires_at: now,
        }
    }

    fn payment(amount: Decimal) -> RecordPayment {
        RecordPayment {
            invoice_id: InvoiceId::new(),
            customer_id: CustomerId::new(),
            subscription_id: SubscriptionId::new(),
            amount,
            currency: None,
            payment_method: Some("  card ".to_string()),
            transaction_id: Some("   ".to_string()),
        }
    }

    #[test]
    fn activation_invoice_uses_the_plan_price() {
        let activated = activated();
        let command =
            IssueInvoice::for_activation(&activated, &PlanPricing::standard(), Utc::now()).unwrap();

        match command.into_event().unwrap() {
            EventKind::InvoiceIssued(issued) => {
                assert_eq!(issued.amount, Decimal::new(1999, 2));
                assert_eq!(issued.currency, "PLN");
                assert_eq!(issued.subscription_id, activated.subscription_id);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn activation_with_unpriced_plan_fails() {
        let mut activated = activated();
        activated.plan_code = "ENTERPRISE".to_string();
        let err = IssueInvoice::for_activation(&activated, &PlanPricing::standard(), Utc::now())
            .unwrap_err();
        assert_eq!(err, PricingError::UnknownPlan("ENTERPRISE".to_string()));
    }

    #[test]
    fn payment_defaults_currency_and_drops_blank_references() {
        match payment(Decimal::new(999, 2)).into_event(Utc::now()).unwrap() {
            EventKind::InvoicePaid(paid) => {
                assert_eq!(paid.currency, "PLN");
                assert_eq!(paid.payment_method.as_deref(), Some("card"));
                assert_eq!(paid.transaction_id, None);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn payment_must_be_positive() {
        let err = payment(Decimal::ZERO).into_event(Utc::now()).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }
}
