use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::customer::CustomerType;
use crate::domain::quotation::QuotationId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ApprovalRuleId(pub String);

impl fmt::Display for ApprovalRuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuotationApprovalId(pub String);

/// Configured condition under which a quotation needs sign-off.
///
/// Every bound is optional; a `None` bound never excludes a candidate. Rules are
/// evaluated by ascending `priority`, then by id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRule {
    pub id: ApprovalRuleId,
    pub priority: i32,
    pub customer_type: Option<CustomerType>,
    pub min_quote_value: Option<Decimal>,
    pub max_quote_value: Option<Decimal>,
    pub max_discount_percentage: Option<Decimal>,
    pub required_approval_level: String,
    pub is_active: bool,
}

impl ApprovalRule {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.required_approval_level.trim().is_empty() {
            return Err(DomainError::Validation {
                field: "required_approval_level".to_string(),
                message: format!("approval rule {} has no approval level", self.id),
            });
        }
        if let (Some(min), Some(max)) = (self.min_quote_value, self.max_quote_value) {
            if min > max {
                return Err(DomainError::Validation {
                    field: "min_quote_value".to_string(),
                    message: format!(
                        "approval rule {} has min_quote_value {min} above max_quote_value {max}",
                        self.id
                    ),
                });
            }
        }
        if let Some(max_discount) = self.max_discount_percentage {
            if max_discount < Decimal::ZERO || max_discount > Decimal::ONE_HUNDRED {
                return Err(DomainError::Validation {
                    field: "max_discount_percentage".to_string(),
                    message: format!(
                        "approval rule {} has max_discount_percentage {max_discount} outside 0..=100",
                        self.id
                    ),
                });
            }
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approved,
    Rejected,
}

impl ApprovalDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "approved" | "approve" => Some(Self::Approved),
            "rejected" | "reject" => Some(Self::Rejected),
            _ => None,
        }
    }
}

/// Append-only record of an approver's decision on a quotation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotationApproval {
    pub id: QuotationApprovalId,
    pub quotation_id: QuotationId,
    pub approver_level: String,
    pub approver_id: String,
    pub decision: ApprovalDecision,
    pub comments: Option<String>,
    pub decided_at: DateTime<Utc>,
}
