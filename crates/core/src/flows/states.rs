use serde::{Deserialize, Serialize};

use crate::audit::AuditAction;
use crate::domain::quotation::QuotationStatus;

/// Who asked for a status change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionTrigger {
    User,
    System,
}

impl TransitionTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::System => "system",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionGuard {
    None,
    ApprovalNotPending,
    ValidityElapsed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRule {
    pub from: QuotationStatus,
    pub to: QuotationStatus,
    pub trigger: TransitionTrigger,
    pub guard: TransitionGuard,
}

pub const TRANSITIONS: [TransitionRule; 5] = [
    TransitionRule {
        from: QuotationStatus::Draft,
        to: QuotationStatus::Sent,
        trigger: TransitionTrigger::User,
        guard: TransitionGuard::ApprovalNotPending,
    },
    TransitionRule {
        from: QuotationStatus::Sent,
        to: QuotationStatus::Accepted,
        trigger: TransitionTrigger::User,
        guard: TransitionGuard::None,
    },
    TransitionRule {
        from: QuotationStatus::Sent,
        to: QuotationStatus::Rejected,
        trigger: TransitionTrigger::User,
        guard: TransitionGuard::None,
    },
    TransitionRule {
        from: QuotationStatus::Draft,
        to: QuotationStatus::Expired,
        trigger: TransitionTrigger::System,
        guard: TransitionGuard::ValidityElapsed,
    },
    TransitionRule {
        from: QuotationStatus::Sent,
        to: QuotationStatus::Expired,
        trigger: TransitionTrigger::System,
        guard: TransitionGuard::ValidityElapsed,
    },
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransitionOutcome {
    Applied { from: QuotationStatus, to: QuotationStatus, trigger: TransitionTrigger },
    /// The quotation is already in the requested state and nothing is written.
    Unchanged { status: QuotationStatus },
}

impl TransitionOutcome {
    pub fn audit_action(&self) -> Option<AuditAction> {
        match self {
            Self::Applied { to: QuotationStatus::Expired, .. } => Some(AuditAction::Expire),
            Self::Applied { .. } => Some(AuditAction::StatusTransition),
            Self::Unchanged { .. } => None,
        }
    }
}
