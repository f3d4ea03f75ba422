use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::audit::{verify_trail, AuditAction, AuditEntry, AuditEvent, AuditOutcome};
use crate::domain::approval::QuotationApproval;
use crate::domain::quotation::{
    Quotation, QuotationId, QuotationItem, QuotationItemId, QuotationStatus,
};
use crate::errors::{ApplicationError, DomainError, EntityKind};
use crate::lifecycle::{LifecycleStore, QuotationService};
use crate::store::UnitOfWork;

/// A quotation's revision chain together with its approvals and audit trail.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuotationHistory {
    pub quotation_id: QuotationId,
    pub chain: Vec<Quotation>,
    pub approvals: Vec<QuotationApproval>,
    pub audit_trail: Vec<AuditEntry>,
    pub trail_verified: bool,
}

impl<S> QuotationService<S>
where
    S: LifecycleStore,
{
    /// Forks a new Draft head from the current head of a chain and supersedes the source.
    pub async fn create_revision(
        &self,
        source_id: &QuotationId,
        reason: &str,
        actor_id: &str,
    ) -> Result<Quotation, ApplicationError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(DomainError::validation("reason", "a revision reason is required").into());
        }

        let source = self.find_quotation(source_id).await?;
        if source.is_superseded {
            return Err(DomainError::Superseded { quotation_id: source.id.clone() }.into());
        }
        if source.status == QuotationStatus::Accepted {
            return Err(DomainError::RevisionNotAllowed {
                quotation_id: source.id.clone(),
                status: source.status,
            }
            .into());
        }

        let now = self.now();
        let revision_number = source.revision.saturating_add(1);
        let revision_id = QuotationId(Uuid::new_v4().to_string());
        let items: Vec<QuotationItem> = source
            .items
            .iter()
            .map(|item| QuotationItem {
                id: QuotationItemId(Uuid::new_v4().to_string()),
                quotation_id: revision_id.clone(),
                ..item.clone()
            })
            .collect();

        let mut revision = Quotation {
            id: revision_id,
            quote_number: source.quote_number.for_revision(revision_number),
            revision: revision_number,
            parent_quotation_id: Some(source.chain_root_id().clone()),
            status: QuotationStatus::Draft,
            quote_date: now,
            valid_until: now + Duration::days(self.settings.validity_days),
            is_superseded: false,
            revision_reason: Some(reason.to_string()),
            created_by: actor_id.to_string(),
            created_at: now,
            updated_at: now,
            version: 1,
            items,
            ..source.clone()
        };
        let requirement = self.evaluate_approval(&revision.approval_candidate()).await?;
        revision.set_required_approval(
            requirement.as_ref().map(|requirement| requirement.required_level.clone()),
        );

        let mut superseded = source.next_version(now);
        superseded.is_superseded = true;

        let supersede_event = AuditEvent::new(
            EntityKind::Quotation,
            source.id.0.clone(),
            AuditAction::Supersede,
            Some(actor_id.to_string()),
            AuditOutcome::Success,
        )
        .at(now)
        .with_before(&serde_json::json!({ "is_superseded": false, "version": source.version }))
        .with_after(&serde_json::json!({ "is_superseded": true, "version": superseded.version }))
        .with_metadata("superseded_by", revision.id.0.clone())
        .with_metadata("reason", reason);

        let mut revision_event = AuditEvent::new(
            EntityKind::Quotation,
            revision.id.0.clone(),
            AuditAction::CreateRevision,
            Some(actor_id.to_string()),
            AuditOutcome::Success,
        )
        .at(now)
        .with_after(&revision)
        .with_metadata("source_id", source.id.0.clone())
        .with_metadata("revision", revision.revision.to_string())
        .with_metadata("reason", reason);
        if let Some(requirement) = &requirement {
            revision_event =
                revision_event.with_metadata("approval_rule_id", requirement.rule_id.0.clone());
        }

        let work = UnitOfWork::new()
            .update_quotation(superseded, source.version)
            .insert_quotation(revision.clone())
            .audit(supersede_event)
            .audit(revision_event);
        self.commit("create_revision", work).await?;

        info!(
            event_name = "quotation.revised",
            quotation_id = %revision.id,
            source_id = %source.id,
            quote_number = %revision.quote_number,
            revision = revision.revision,
            "quotation revision created"
        );

        Ok(revision)
    }

    /// Every revision sharing the quotation's chain root, oldest first.
    pub async fn revision_chain(
        &self,
        quotation_id: &QuotationId,
    ) -> Result<Vec<Quotation>, ApplicationError> {
        let quotation = self.find_quotation(quotation_id).await?;
        Ok(self.store.list_chain(quotation.chain_root_id()).await?)
    }

    pub async fn quotation_history(
        &self,
        quotation_id: &QuotationId,
    ) -> Result<QuotationHistory, ApplicationError> {
        let quotation = self.find_quotation(quotation_id).await?;
        let chain = self.store.list_chain(quotation.chain_root_id()).await?;
        let approvals = self.store.list_approvals(&quotation.id).await?;
        let audit_trail = self.store.list_entries(EntityKind::Quotation, &quotation.id.0).await?;
        let trail_verified = verify_trail(&audit_trail).valid;

        Ok(QuotationHistory {
            quotation_id: quotation.id,
            chain,
            approvals,
            audit_trail,
            trail_verified,
        })
    }
}
