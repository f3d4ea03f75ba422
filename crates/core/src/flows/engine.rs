use chrono::{DateTime, Utc};
use serde_json::json;

use crate::audit::{AuditAction, AuditEvent, AuditOutcome};
use crate::domain::quotation::{ApprovalStatus, Quotation, QuotationStatus};
use crate::errors::{DomainError, EntityKind};
use crate::flows::states::{
    TransitionGuard, TransitionOutcome, TransitionRule, TransitionTrigger, TRANSITIONS,
};

/// Validates quotation status changes against the transition table.
#[derive(Clone, Debug, Default)]
pub struct StatusMachine;

impl StatusMachine {
    pub fn new() -> Self {
        Self
    }

    pub fn rule_for(
        &self,
        from: QuotationStatus,
        to: QuotationStatus,
        trigger: TransitionTrigger,
    ) -> Option<&'static TransitionRule> {
        TRANSITIONS
            .iter()
            .find(|rule| rule.from == from && rule.to == to && rule.trigger == trigger)
    }

    pub fn allowed_targets(
        &self,
        from: QuotationStatus,
        trigger: TransitionTrigger,
    ) -> Vec<QuotationStatus> {
        TRANSITIONS
            .iter()
            .filter(|rule| rule.from == from && rule.trigger == trigger)
            .map(|rule| rule.to)
            .collect()
    }

    pub fn evaluate(
        &self,
        quotation: &Quotation,
        target: QuotationStatus,
        trigger: TransitionTrigger,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, DomainError> {
        if quotation.is_superseded {
            return Err(DomainError::Superseded { quotation_id: quotation.id.clone() });
        }

        if quotation.status == QuotationStatus::Expired && target == QuotationStatus::Expired {
            return Ok(TransitionOutcome::Unchanged { status: QuotationStatus::Expired });
        }

        let Some(rule) = self.rule_for(quotation.status, target, trigger) else {
            return Err(DomainError::InvalidTransition {
                quotation_id: quotation.id.clone(),
                from: quotation.status,
                to: target,
            });
        };

        match rule.guard {
            TransitionGuard::None => {}
            TransitionGuard::ApprovalNotPending => match quotation.approval_status {
                Some(ApprovalStatus::Pending) => {
                    return Err(DomainError::ApprovalPending {
                        quotation_id: quotation.id.clone(),
                        required_level: quotation.required_approval_level.clone(),
                    });
                }
                Some(ApprovalStatus::Rejected) => {
                    return Err(DomainError::ApprovalRejected {
                        quotation_id: quotation.id.clone(),
                    });
                }
                Some(ApprovalStatus::Approved) | None => {}
            },
            TransitionGuard::ValidityElapsed => {
                if now <= quotation.valid_until {
                    return Err(DomainError::NotYetExpired {
                        quotation_id: quotation.id.clone(),
                        valid_until: quotation.valid_until,
                    });
                }
            }
        }

        Ok(TransitionOutcome::Applied { from: quotation.status, to: target, trigger })
    }

    pub fn applied_event(
        &self,
        quotation: &Quotation,
        outcome: &TransitionOutcome,
        actor_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Option<AuditEvent> {
        let TransitionOutcome::Applied { from, to, trigger } = *outcome else {
            return None;
        };
        let action = outcome.audit_action()?;

        Some(
            AuditEvent::new(
                EntityKind::Quotation,
                quotation.id.0.clone(),
                action,
                actor_id.map(str::to_owned),
                AuditOutcome::Success,
            )
            .at(now)
            .with_before(&json!({ "status": from.as_str(), "version": quotation.version }))
            .with_after(&json!({ "status": to.as_str(), "version": quotation.version + 1 }))
            .with_metadata("quote_number", quotation.quote_number.0.clone())
            .with_metadata("trigger", trigger.as_str()),
        )
    }

    pub fn rejected_event(
        &self,
        quotation: &Quotation,
        target: QuotationStatus,
        trigger: TransitionTrigger,
        actor_id: Option<&str>,
        error: &DomainError,
        now: DateTime<Utc>,
    ) -> AuditEvent {
        let allowed = self
            .allowed_targets(quotation.status, trigger)
            .iter()
            .map(|status| status.as_str())
            .collect::<Vec<_>>()
            .join(",");
        AuditEvent::new(
            EntityKind::Quotation,
            quotation.id.0.clone(),
            AuditAction::TransitionRejected,
            actor_id.map(str::to_owned),
            AuditOutcome::Rejected,
        )
        .at(now)
        .with_metadata("from", quotation.status.as_str())
        .with_metadata("to", target.as_str())
        .with_metadata("trigger", trigger.as_str())
        .with_metadata("allowed_targets", allowed)
        .with_metadata("error_class", error.error_class())
        .with_metadata("error", error.to_string())
    }
}
