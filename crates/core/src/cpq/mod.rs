pub mod approval_rules;
pub mod pricing;

pub use approval_rules::{
    evaluate as evaluate_approval, required_approval_level, ApprovalCandidate, ApprovalRequirement,
};
pub use pricing::{
    compute_line_item, compute_totals, LinePrice, MarkupTiers, PricingCalculator, QuotationTotals,
};
