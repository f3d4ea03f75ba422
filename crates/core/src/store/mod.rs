//! Persistence ports used by the lifecycle services.
//!
//! Reads are plain lookups. Every write goes through [`QuotationStore::commit`], which
//! applies a [`UnitOfWork`] atomically together with its audit events.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::audit::{AuditEntry, AuditEvent};
use crate::domain::approval::{ApprovalRule, QuotationApproval};
use crate::domain::customer::{Customer, CustomerId};
use crate::domain::enquiry::{Enquiry, EnquiryId, EnquiryStatus};
use crate::domain::quotation::{Quotation, QuotationId};
use crate::errors::{ApplicationError, EntityKind};

pub use memory::InMemoryQuotationStore;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("{entity} {id} changed concurrently: {detail}")]
    Conflict { entity: EntityKind, id: String, detail: String },
    #[error("quote number {0} is already in use")]
    DuplicateQuoteNumber(String),
    #[error("storage backend failure: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn conflict(entity: EntityKind, id: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Conflict { entity, id: id.into(), detail: detail.into() }
    }
}

impl From<StoreError> for ApplicationError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Conflict { entity, id, detail } => {
                ApplicationError::ConcurrencyConflict { entity, id, detail }
            }
            StoreError::DuplicateQuoteNumber(number) => ApplicationError::ConcurrencyConflict {
                entity: EntityKind::QuoteNumber,
                id: number,
                detail: "quote number was issued twice".to_string(),
            },
            StoreError::Backend(message) => ApplicationError::Persistence(message),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Mutation {
    /// Inserts the quotation with its items. The quote number must be unused and the
    /// chain must not already have another non-superseded head.
    InsertQuotation(Quotation),
    /// Replaces the stored quotation and its items when the stored row version still
    /// equals `expected_version`.
    UpdateQuotation { quotation: Quotation, expected_version: u32 },
    UpdateEnquiryStatus {
        enquiry_id: EnquiryId,
        expected: EnquiryStatus,
        next: EnquiryStatus,
        updated_at: DateTime<Utc>,
    },
    AppendApproval(QuotationApproval),
}

/// Mutations and audit events committed together or not at all.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UnitOfWork {
    pub mutations: Vec<Mutation>,
    pub audit: Vec<AuditEvent>,
}

impl UnitOfWork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_quotation(mut self, quotation: Quotation) -> Self {
        self.mutations.push(Mutation::InsertQuotation(quotation));
        self
    }

    pub fn update_quotation(mut self, quotation: Quotation, expected_version: u32) -> Self {
        self.mutations.push(Mutation::UpdateQuotation { quotation, expected_version });
        self
    }

    pub fn update_enquiry_status(
        mut self,
        enquiry_id: EnquiryId,
        expected: EnquiryStatus,
        next: EnquiryStatus,
        updated_at: DateTime<Utc>,
    ) -> Self {
        self.mutations.push(Mutation::UpdateEnquiryStatus {
            enquiry_id,
            expected,
            next,
            updated_at,
        });
        self
    }

    pub fn append_approval(mut self, approval: QuotationApproval) -> Self {
        self.mutations.push(Mutation::AppendApproval(approval));
        self
    }

    pub fn audit(mut self, event: AuditEvent) -> Self {
        self.audit.push(event);
        self
    }
}

#[async_trait]
pub trait QuotationStore: Send + Sync {
    async fn find_enquiry(&self, id: &EnquiryId) -> Result<Option<Enquiry>, StoreError>;
    async fn find_customer(&self, id: &CustomerId) -> Result<Option<Customer>, StoreError>;
    async fn find_quotation(&self, id: &QuotationId) -> Result<Option<Quotation>, StoreError>;
    /// Every quotation whose chain root is `root_id`, ordered by revision ascending.
    async fn list_chain(&self, root_id: &QuotationId) -> Result<Vec<Quotation>, StoreError>;
    /// Quotations raised from `enquiry_id`, grouped by chain and ordered by revision.
    async fn list_for_enquiry(
        &self,
        enquiry_id: &EnquiryId,
    ) -> Result<Vec<Quotation>, StoreError>;
    /// Non-superseded Draft or Sent quotations with `valid_until < as_of`.
    async fn list_expirable(&self, as_of: DateTime<Utc>) -> Result<Vec<Quotation>, StoreError>;
    async fn approval_rules(&self) -> Result<Vec<ApprovalRule>, StoreError>;
    async fn list_approvals(
        &self,
        quotation_id: &QuotationId,
    ) -> Result<Vec<QuotationApproval>, StoreError>;
    async fn commit(&self, work: UnitOfWork) -> Result<Vec<AuditEntry>, StoreError>;
}

#[async_trait]
pub trait QuoteNumberSequence: Send + Sync {
    /// Next value of the per-year counter, starting at 1.
    async fn next_value(&self, year: i32) -> Result<u32, StoreError>;
}

#[async_trait]
pub trait AuditRecorder: Send + Sync {
    /// Records a standalone event outside any unit of work.
    async fn record(&self, event: AuditEvent) -> Result<AuditEntry, StoreError>;
    /// The entity's trail ordered by sequence.
    async fn list_entries(
        &self,
        entity_type: EntityKind,
        entity_id: &str,
    ) -> Result<Vec<AuditEntry>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::StoreError;
    use crate::errors::{ApplicationError, EntityKind};

    #[test]
    fn store_errors_map_into_application_errors() {
        let conflict = ApplicationError::from(StoreError::conflict(
            EntityKind::Quotation,
            "QTN-1",
            "expected version 3",
        ));
        assert!(matches!(conflict, ApplicationError::ConcurrencyConflict { .. }));

        let duplicate =
            ApplicationError::from(StoreError::DuplicateQuoteNumber("QT-2026-0001".into()));
        assert_eq!(duplicate.error_class(), "concurrency_conflict");

        let backend = ApplicationError::from(StoreError::Backend("disk full".into()));
        assert_eq!(backend, ApplicationError::Persistence("disk full".into()));
    }
}
