use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::audit::{AuditAction, AuditEvent, AuditOutcome};
use crate::domain::approval::{ApprovalDecision, QuotationApproval, QuotationApprovalId};
use crate::domain::quotation::{ApprovalStatus, Quotation, QuotationId, QuotationStatus};
use crate::errors::{ApplicationError, DomainError, EntityKind};
use crate::flows::{TransitionOutcome, TransitionTrigger};
use crate::lifecycle::{LifecycleStore, QuotationService};
use crate::store::UnitOfWork;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalDecisionInput {
    pub approver_level: String,
    pub approver_id: String,
    pub decision: ApprovalDecision,
    #[serde(default)]
    pub comments: Option<String>,
}

/// Result of a system expiry sweep.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpirySweep {
    pub as_of: Option<DateTime<Utc>>,
    pub expired: Vec<QuotationId>,
    pub skipped: Vec<QuotationId>,
}

impl<S> QuotationService<S>
where
    S: LifecycleStore,
{
    /// Applies a user-requested status change.
    pub async fn transition_status(
        &self,
        quotation_id: &QuotationId,
        target: QuotationStatus,
        actor_id: &str,
    ) -> Result<Quotation, ApplicationError> {
        let now = self.now();
        self.apply_transition(quotation_id, target, TransitionTrigger::User, Some(actor_id), now)
            .await
    }

    /// Expires a single quotation whose validity ended before `as_of`.
    pub async fn expire(
        &self,
        quotation_id: &QuotationId,
        as_of: DateTime<Utc>,
    ) -> Result<Quotation, ApplicationError> {
        self.apply_transition(
            quotation_id,
            QuotationStatus::Expired,
            TransitionTrigger::System,
            None,
            as_of,
        )
        .await
    }

    /// Expires every overdue Draft or Sent chain head. Quotations that changed underneath
    /// the sweep are skipped and reported.
    pub async fn expire_overdue(
        &self,
        as_of: DateTime<Utc>,
    ) -> Result<ExpirySweep, ApplicationError> {
        let due = self.store.list_expirable(as_of).await?;
        let mut sweep = ExpirySweep { as_of: Some(as_of), ..ExpirySweep::default() };

        for quotation in due {
            match self.expire(&quotation.id, as_of).await {
                Ok(_) => sweep.expired.push(quotation.id),
                Err(error @ ApplicationError::Persistence(_)) => return Err(error),
                Err(error) => {
                    warn!(
                        event_name = "quotation.expiry_skipped",
                        quotation_id = %quotation.id,
                        error = %error,
                        "quotation skipped during expiry sweep"
                    );
                    sweep.skipped.push(quotation.id);
                }
            }
        }

        info!(
            event_name = "quotation.expiry_sweep",
            as_of = %as_of,
            expired = sweep.expired.len(),
            skipped = sweep.skipped.len(),
            "expiry sweep finished"
        );
        Ok(sweep)
    }

    async fn apply_transition(
        &self,
        quotation_id: &QuotationId,
        target: QuotationStatus,
        trigger: TransitionTrigger,
        actor_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Quotation, ApplicationError> {
        let quotation = self.find_quotation(quotation_id).await?;

        let outcome = match self.machine.evaluate(&quotation, target, trigger, now) {
            Ok(outcome) => outcome,
            Err(error) => {
                if trigger == TransitionTrigger::User {
                    self.record_rejected_transition(
                        &quotation,
                        target,
                        trigger,
                        actor_id,
                        &error,
                        now,
                    )
                    .await;
                }
                return Err(error.into());
            }
        };

        let Some(event) = self.machine.applied_event(&quotation, &outcome, actor_id, now) else {
            return Ok(quotation);
        };
        let TransitionOutcome::Applied { from, to, .. } = outcome else {
            return Ok(quotation);
        };

        let mut next = quotation.next_version(now);
        next.status = to;
        let work = UnitOfWork::new().update_quotation(next.clone(), quotation.version).audit(event);
        self.commit("transition_status", work).await?;

        info!(
            event_name = "quotation.status_changed",
            quotation_id = %next.id,
            from = from.as_str(),
            to = to.as_str(),
            trigger = trigger.as_str(),
            "quotation status changed"
        );

        if to == QuotationStatus::Accepted {
            if let Err(error) = self.hook.quotation_accepted(&next).await {
                warn!(
                    event_name = "quotation.acceptance_hook_failed",
                    quotation_id = %next.id,
                    error = %error,
                    "acceptance hook failed after commit"
                );
            }
        }

        Ok(next)
    }

    async fn record_rejected_transition(
        &self,
        quotation: &Quotation,
        target: QuotationStatus,
        trigger: TransitionTrigger,
        actor_id: Option<&str>,
        error: &DomainError,
        now: DateTime<Utc>,
    ) {
        let event = self.machine.rejected_event(quotation, target, trigger, actor_id, error, now);
        if let Err(record_error) = self.store.record(event).await {
            warn!(
                event_name = "audit.record_failed",
                quotation_id = %quotation.id,
                error = %record_error,
                "rejected transition could not be audited"
            );
        }
        info!(
            event_name = "quotation.transition_rejected",
            quotation_id = %quotation.id,
            from = quotation.status.as_str(),
            to = target.as_str(),
            error_class = error.error_class(),
            "status transition rejected"
        );
    }

    /// Records an approver's decision on a Draft quotation awaiting approval.
    pub async fn record_approval_decision(
        &self,
        quotation_id: &QuotationId,
        input: ApprovalDecisionInput,
    ) -> Result<Quotation, ApplicationError> {
        let approver_id = input.approver_id.trim();
        if approver_id.is_empty() {
            return Err(DomainError::validation("approver_id", "an approver id is required").into());
        }

        let quotation = self.find_quotation(quotation_id).await?;
        if quotation.is_superseded {
            return Err(DomainError::Superseded { quotation_id: quotation.id.clone() }.into());
        }
        if quotation.approval_status != Some(ApprovalStatus::Pending) {
            return Err(
                DomainError::ApprovalNotPending { quotation_id: quotation.id.clone() }.into()
            );
        }
        if quotation.status != QuotationStatus::Draft {
            return Err(DomainError::NotEditable {
                quotation_id: quotation.id.clone(),
                status: quotation.status,
            }
            .into());
        }

        let required_level = quotation.required_approval_level.clone().unwrap_or_default();
        if !required_level.eq_ignore_ascii_case(input.approver_level.trim()) {
            return Err(DomainError::validation(
                "approver_level",
                format!(
                    "quotation {} requires {required_level} approval, got {}",
                    quotation.id, input.approver_level
                ),
            )
            .into());
        }

        let now = self.now();
        let approval = QuotationApproval {
            id: QuotationApprovalId(Uuid::new_v4().to_string()),
            quotation_id: quotation.id.clone(),
            approver_level: required_level,
            approver_id: approver_id.to_string(),
            decision: input.decision,
            comments: input.comments.filter(|comments| !comments.trim().is_empty()),
            decided_at: now,
        };

        let mut next = quotation.next_version(now);
        next.approval_status = Some(match input.decision {
            ApprovalDecision::Approved => ApprovalStatus::Approved,
            ApprovalDecision::Rejected => ApprovalStatus::Rejected,
        });

        let event = AuditEvent::new(
            EntityKind::Quotation,
            quotation.id.0.clone(),
            AuditAction::ApprovalDecision,
            Some(approval.approver_id.clone()),
            AuditOutcome::Success,
        )
        .at(now)
        .with_before(&json!({ "approval_status": ApprovalStatus::Pending.as_str() }))
        .with_after(&approval)
        .with_metadata("approval_id", approval.id.0.clone())
        .with_metadata("decision", approval.decision.as_str());

        let work = UnitOfWork::new()
            .update_quotation(next.clone(), quotation.version)
            .append_approval(approval.clone())
            .audit(event);
        self.commit("record_approval_decision", work).await?;

        info!(
            event_name = "quotation.approval_decided",
            quotation_id = %next.id,
            approval_id = %approval.id.0,
            decision = approval.decision.as_str(),
            "approval decision recorded"
        );

        Ok(next)
    }
}
