use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::audit::{AuditEntry, AuditEvent};
use crate::domain::approval::{ApprovalRule, QuotationApproval};
use crate::domain::customer::{Customer, CustomerId};
use crate::domain::enquiry::{Enquiry, EnquiryId};
use crate::domain::quotation::{Quotation, QuotationId, QuotationStatus};
use crate::errors::EntityKind;
use crate::store::{
    AuditRecorder, Mutation, QuotationStore, QuoteNumberSequence, StoreError, UnitOfWork,
};

#[derive(Clone, Debug, Default)]
struct MemoryState {
    enquiries: HashMap<String, Enquiry>,
    customers: HashMap<String, Customer>,
    quotations: HashMap<String, Quotation>,
    rules: Vec<ApprovalRule>,
    approvals: Vec<QuotationApproval>,
    audit: HashMap<(EntityKind, String), Vec<AuditEntry>>,
    sequences: HashMap<i32, u32>,
}

/// Process-local store. A unit of work is applied to a copy of the state and swapped
/// in only when every mutation succeeded.
#[derive(Clone, Debug, Default)]
pub struct InMemoryQuotationStore {
    state: Arc<RwLock<MemoryState>>,
}

impl InMemoryQuotationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, MemoryState> {
        match self.state.read() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, MemoryState> {
        match self.state.write() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn insert_customer(&self, customer: Customer) {
        self.write().customers.insert(customer.id.0.clone(), customer);
    }

    pub fn insert_enquiry(&self, enquiry: Enquiry) {
        self.write().enquiries.insert(enquiry.id.0.clone(), enquiry);
    }

    pub fn insert_rule(&self, rule: ApprovalRule) {
        let mut state = self.write();
        state.rules.retain(|existing| existing.id != rule.id);
        state.rules.push(rule);
    }
}

impl MemoryState {
    fn apply(&mut self, mutation: Mutation) -> Result<(), StoreError> {
        match mutation {
            Mutation::InsertQuotation(quotation) => self.insert_quotation(quotation),
            Mutation::UpdateQuotation { quotation, expected_version } => {
                let Some(stored) = self.quotations.get(&quotation.id.0) else {
                    return Err(StoreError::conflict(
                        EntityKind::Quotation,
                        quotation.id.0,
                        "quotation no longer exists",
                    ));
                };
                if stored.version != expected_version {
                    return Err(StoreError::conflict(
                        EntityKind::Quotation,
                        quotation.id.0.clone(),
                        format!("expected version {expected_version}, found {}", stored.version),
                    ));
                }
                self.quotations.insert(quotation.id.0.clone(), quotation);
                Ok(())
            }
            Mutation::UpdateEnquiryStatus { enquiry_id, expected, next, updated_at } => {
                let Some(enquiry) = self.enquiries.get_mut(&enquiry_id.0) else {
                    return Err(StoreError::conflict(
                        EntityKind::Enquiry,
                        enquiry_id.0,
                        "enquiry no longer exists",
                    ));
                };
                if enquiry.status != expected {
                    return Err(StoreError::conflict(
                        EntityKind::Enquiry,
                        enquiry_id.0.clone(),
                        format!("expected status {expected}, found {}", enquiry.status),
                    ));
                }
                enquiry.status = next;
                enquiry.updated_at = updated_at;
                Ok(())
            }
            Mutation::AppendApproval(approval) => {
                self.approvals.push(approval);
                Ok(())
            }
        }
    }

    fn insert_quotation(&mut self, quotation: Quotation) -> Result<(), StoreError> {
        if self.quotations.contains_key(&quotation.id.0) {
            return Err(StoreError::conflict(
                EntityKind::Quotation,
                quotation.id.0,
                "quotation already exists",
            ));
        }
        if self.quotations.values().any(|existing| existing.quote_number == quotation.quote_number)
        {
            return Err(StoreError::DuplicateQuoteNumber(quotation.quote_number.0));
        }
        let root = quotation.chain_root_id();
        let competing_head = !quotation.is_superseded
            && self
                .quotations
                .values()
                .any(|existing| existing.chain_root_id() == root && !existing.is_superseded);
        if competing_head {
            return Err(StoreError::conflict(
                EntityKind::Quotation,
                root.0.clone(),
                "revision chain already has a current head",
            ));
        }
        self.quotations.insert(quotation.id.0.clone(), quotation);
        Ok(())
    }

    fn append_audit(&mut self, event: AuditEvent) -> AuditEntry {
        let trail = self.audit.entry((event.entity_type, event.entity_id.clone())).or_default();
        let previous = trail.last().map(|entry| (entry.sequence, entry.entry_hash.as_str()));
        let entry = AuditEntry::seal(event, previous);
        trail.push(entry.clone());
        entry
    }
}

#[async_trait]
impl QuotationStore for InMemoryQuotationStore {
    async fn find_enquiry(&self, id: &EnquiryId) -> Result<Option<Enquiry>, StoreError> {
        Ok(self.read().enquiries.get(&id.0).cloned())
    }

    async fn find_customer(&self, id: &CustomerId) -> Result<Option<Customer>, StoreError> {
        Ok(self.read().customers.get(&id.0).cloned())
    }

    async fn find_quotation(&self, id: &QuotationId) -> Result<Option<Quotation>, StoreError> {
        Ok(self.read().quotations.get(&id.0).cloned())
    }

    async fn list_chain(&self, root_id: &QuotationId) -> Result<Vec<Quotation>, StoreError> {
        let mut chain: Vec<Quotation> = self
            .read()
            .quotations
            .values()
            .filter(|quotation| quotation.chain_root_id() == root_id)
            .cloned()
            .collect();
        chain.sort_by_key(|quotation| quotation.revision);
        Ok(chain)
    }

    async fn list_for_enquiry(&self, enquiry_id: &EnquiryId) -> Result<Vec<Quotation>, StoreError> {
        let mut quotations: Vec<Quotation> = self
            .read()
            .quotations
            .values()
            .filter(|quotation| &quotation.enquiry_id == enquiry_id)
            .cloned()
            .collect();
        quotations.sort_by(|left, right| {
            let left_key = (&left.chain_root_id().0, left.revision);
            left_key.cmp(&(&right.chain_root_id().0, right.revision))
        });
        Ok(quotations)
    }

    async fn list_expirable(&self, as_of: DateTime<Utc>) -> Result<Vec<Quotation>, StoreError> {
        let mut due: Vec<Quotation> = self
            .read()
            .quotations
            .values()
            .filter(|quotation| {
                !quotation.is_superseded
                    && matches!(quotation.status, QuotationStatus::Draft | QuotationStatus::Sent)
                    && quotation.valid_until < as_of
            })
            .cloned()
            .collect();
        due.sort_by(|left, right| {
            left.valid_until.cmp(&right.valid_until).then_with(|| left.id.0.cmp(&right.id.0))
        });
        Ok(due)
    }

    async fn approval_rules(&self) -> Result<Vec<ApprovalRule>, StoreError> {
        Ok(self.read().rules.clone())
    }

    async fn list_approvals(
        &self,
        quotation_id: &QuotationId,
    ) -> Result<Vec<QuotationApproval>, StoreError> {
        Ok(self
            .read()
            .approvals
            .iter()
            .filter(|approval| &approval.quotation_id == quotation_id)
            .cloned()
            .collect())
    }

    async fn commit(&self, work: UnitOfWork) -> Result<Vec<AuditEntry>, StoreError> {
        let mut guard = self.write();
        let mut next = guard.clone();

        for mutation in work.mutations {
            next.apply(mutation)?;
        }
        let entries = work.audit.into_iter().map(|event| next.append_audit(event)).collect();

        *guard = next;
        Ok(entries)
    }
}

#[async_trait]
impl QuoteNumberSequence for InMemoryQuotationStore {
    async fn next_value(&self, year: i32) -> Result<u32, StoreError> {
        let mut state = self.write();
        let counter = state.sequences.entry(year).or_insert(0);
        *counter = counter.saturating_add(1);
        Ok(*counter)
    }
}

#[async_trait]
impl AuditRecorder for InMemoryQuotationStore {
    async fn record(&self, event: AuditEvent) -> Result<AuditEntry, StoreError> {
        Ok(self.write().append_audit(event))
    }

    async fn list_entries(
        &self,
        entity_type: EntityKind,
        entity_id: &str,
    ) -> Result<Vec<AuditEntry>, StoreError> {
        Ok(self
            .read()
            .audit
            .get(&(entity_type, entity_id.to_string()))
            .cloned()
            .unwrap_or_default())
    }
}
