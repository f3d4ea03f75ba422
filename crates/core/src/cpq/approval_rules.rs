use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::approval::{ApprovalRule, ApprovalRuleId};
use crate::domain::customer::CustomerType;

/// The facts about a quotation that approval rules are matched against.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalCandidate {
    pub total_amount: Decimal,
    pub discount_percentage: Decimal,
    pub customer_type: CustomerType,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRequirement {
    pub rule_id: ApprovalRuleId,
    pub required_level: String,
}

pub fn rule_matches(rule: &ApprovalRule, candidate: &ApprovalCandidate) -> bool {
    rule.customer_type.map_or(true, |customer_type| customer_type == candidate.customer_type)
        && rule.min_quote_value.map_or(true, |min| candidate.total_amount >= min)
        && rule.max_quote_value.map_or(true, |max| candidate.total_amount <= max)
        && rule
            .max_discount_percentage
            .map_or(true, |max| candidate.discount_percentage <= max)
}

/// First active rule matching the candidate, in `(priority, id)` order.
pub fn evaluate(
    candidate: &ApprovalCandidate,
    rules: &[ApprovalRule],
) -> Option<ApprovalRequirement> {
    let mut active: Vec<&ApprovalRule> = rules.iter().filter(|rule| rule.is_active).collect();
    active.sort_by(|left, right| {
        left.priority.cmp(&right.priority).then_with(|| left.id.cmp(&right.id))
    });

    active.into_iter().find(|rule| rule_matches(rule, candidate)).map(|rule| ApprovalRequirement {
        rule_id: rule.id.clone(),
        required_level: rule.required_approval_level.clone(),
    })
}

pub fn required_approval_level(
    candidate: &ApprovalCandidate,
    rules: &[ApprovalRule],
) -> Option<String> {
    evaluate(candidate, rules).map(|requirement| requirement.required_level)
}
