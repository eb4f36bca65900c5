//! Billing rules: plan pricing and invoice commands.

pub mod invoice;
pub mod pricing;

pub use invoice::{IssueInvoice, RecordPayment};
pub use pricing::{PlanPrice, PlanPricing, PricingError};
