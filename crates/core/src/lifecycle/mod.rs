//! Quotation lifecycle services: generation, revisions, status changes, draft edits
//! and approval decisions, all persisted through a [`LifecycleStore`].

mod drafts;
mod generator;
mod revision;
mod transitions;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{info, warn};

use crate::audit::AuditEntry;
use crate::config::AppConfig;
use crate::cpq::approval_rules::{self, ApprovalCandidate, ApprovalRequirement};
use crate::cpq::pricing::PricingCalculator;
use crate::domain::quotation::{Quotation, QuotationId};
use crate::errors::{ApplicationError, EntityKind};
use crate::flows::StatusMachine;
use crate::store::{AuditRecorder, QuotationStore, QuoteNumberSequence, UnitOfWork};

pub use drafts::ItemUpdate;
pub use revision::QuotationHistory;
pub use transitions::{ApprovalDecisionInput, ExpirySweep};

/// Everything the lifecycle services need from persistence.
pub trait LifecycleStore: QuotationStore + QuoteNumberSequence + AuditRecorder {}

impl<T> LifecycleStore for T where T: QuotationStore + QuoteNumberSequence + AuditRecorder {}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Clone, Copy, Debug)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("acceptance hook failed: {0}")]
pub struct HookError(pub String);

/// Notified after a quotation has been committed as Accepted.
#[async_trait]
pub trait AcceptanceHook: Send + Sync {
    async fn quotation_accepted(&self, quotation: &Quotation) -> Result<(), HookError>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingAcceptanceHook;

#[async_trait]
impl AcceptanceHook for LoggingAcceptanceHook {
    async fn quotation_accepted(&self, quotation: &Quotation) -> Result<(), HookError> {
        info!(
            event_name = "quotation.accepted",
            quotation_id = %quotation.id,
            quote_number = %quotation.quote_number,
            total_amount = %quotation.total_amount,
            "quotation accepted; sales order creation can proceed"
        );
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct LifecycleSettings {
    pub pricing: PricingCalculator,
    pub number_prefix: String,
    pub validity_days: i64,
    pub default_terms: Option<String>,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl LifecycleSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            pricing: config.pricing.calculator(),
            number_prefix: config.quotation.number_prefix.clone(),
            validity_days: config.quotation.validity_days,
            default_terms: config.quotation.default_terms.clone(),
        }
    }
}

pub struct QuotationService<S> {
    store: Arc<S>,
    settings: LifecycleSettings,
    machine: StatusMachine,
    hook: Arc<dyn AcceptanceHook>,
    clock: Arc<dyn Clock>,
}

impl<S> Clone for QuotationService<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            settings: self.settings.clone(),
            machine: self.machine.clone(),
            hook: Arc::clone(&self.hook),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<S> QuotationService<S>
where
    S: LifecycleStore,
{
    pub fn new(store: Arc<S>, settings: LifecycleSettings) -> Self {
        Self {
            store,
            settings,
            machine: StatusMachine::new(),
            hook: Arc::new(LoggingAcceptanceHook),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_acceptance_hook(mut self, hook: Arc<dyn AcceptanceHook>) -> Self {
        self.hook = hook;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn settings(&self) -> &LifecycleSettings {
        &self.settings
    }

    pub async fn find_quotation(&self, id: &QuotationId) -> Result<Quotation, ApplicationError> {
        self.store
            .find_quotation(id)
            .await?
            .ok_or_else(|| ApplicationError::not_found(EntityKind::Quotation, id))
    }

    /// Approval level the current rules demand for the candidate, if any.
    pub async fn required_approval(
        &self,
        candidate: &ApprovalCandidate,
    ) -> Result<Option<String>, ApplicationError> {
        Ok(self.evaluate_approval(candidate).await?.map(|requirement| requirement.required_level))
    }

    async fn evaluate_approval(
        &self,
        candidate: &ApprovalCandidate,
    ) -> Result<Option<ApprovalRequirement>, ApplicationError> {
        let rules = self.store.approval_rules().await?;
        Ok(approval_rules::evaluate(candidate, &rules))
    }

    async fn commit(
        &self,
        operation: &'static str,
        work: UnitOfWork,
    ) -> Result<Vec<AuditEntry>, ApplicationError> {
        match self.store.commit(work).await {
            Ok(entries) => Ok(entries),
            Err(error) => {
                warn!(
                    event_name = "lifecycle.commit_failed",
                    operation,
                    error = %error,
                    "unit of work was rolled back"
                );
                Err(error.into())
            }
        }
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use chrono::{DateTime, TimeZone, Utc};
    use rust_decimal::Decimal;

    use crate::domain::approval::{ApprovalRule, ApprovalRuleId};
    use crate::domain::customer::{Customer, CustomerId, CustomerType};
    use crate::domain::enquiry::{Enquiry, EnquiryId, EnquiryItem, EnquiryStatus};
    use crate::lifecycle::{FixedClock, LifecycleSettings, QuotationService};
    use crate::store::InMemoryQuotationStore;

    pub fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 4, 10, 30, 0).single().unwrap_or_else(Utc::now)
    }

    pub fn service() -> (Arc<InMemoryQuotationStore>, QuotationService<InMemoryQuotationStore>) {
        let store = Arc::new(InMemoryQuotationStore::new());
        store.insert_customer(Customer {
            id: CustomerId("CUST-R".to_owned()),
            name: "Harbour Interiors".to_owned(),
            customer_type: CustomerType::Retail,
        });
        store.insert_customer(Customer {
            id: CustomerId("CUST-W".to_owned()),
            name: "Northgate Supply".to_owned(),
            customer_type: CustomerType::Wholesale,
        });
        let service = QuotationService::new(Arc::clone(&store), LifecycleSettings::default())
            .with_clock(Arc::new(FixedClock(fixed_now())));
        (store, service)
    }

    pub fn enquiry(id: &str, customer: &str, items: Vec<EnquiryItem>) -> Enquiry {
        Enquiry {
            id: EnquiryId(id.to_owned()),
            customer_id: CustomerId(customer.to_owned()),
            items,
            status: EnquiryStatus::New,
            notes: None,
            created_at: fixed_now(),
            updated_at: fixed_now(),
        }
    }

    pub fn item(description: &str, quantity: u32, cost: i64) -> EnquiryItem {
        EnquiryItem {
            description: description.to_owned(),
            quantity,
            unit_price: Some(Decimal::new(cost, 0)),
            markup_percent: None,
        }
    }

    pub fn manager_rule(min_total: i64) -> ApprovalRule {
        ApprovalRule {
            id: ApprovalRuleId("AR-MANAGER".to_owned()),
            priority: 10,
            customer_type: None,
            min_quote_value: Some(Decimal::new(min_total, 0)),
            max_quote_value: None,
            max_discount_percentage: None,
            required_approval_level: "Manager".to_owned(),
            is_active: true,
        }
    }
}
