use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::cpq::approval_rules::ApprovalCandidate;
use crate::cpq::pricing::QuotationTotals;
use crate::domain::customer::{CustomerId, CustomerType};
use crate::domain::enquiry::EnquiryId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuotationId(pub String);

impl fmt::Display for QuotationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuotationItemId(pub String);

impl fmt::Display for QuotationItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Human-readable quotation number.
///
/// Chain roots are issued as `<prefix>-<year>-<seq>`; revisions append
/// `-R<revision>` to the root number so every member of a chain sorts together.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QuoteNumber(pub String);

impl QuoteNumber {
    pub fn issue(prefix: &str, year: i32, sequence: u32) -> Self {
        Self(format!("{prefix}-{year}-{sequence:04}"))
    }

    pub fn for_revision(&self, revision: u32) -> Self {
        Self(format!("{}-R{revision:02}", self.root()))
    }

    /// The number of the chain root this number belongs to.
    pub fn root(&self) -> &str {
        match self.0.rsplit_once("-R") {
            Some((root, suffix))
                if !suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_digit()) =>
            {
                root
            }
            _ => &self.0,
        }
    }
}

impl fmt::Display for QuoteNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotationStatus {
    Draft,
    Sent,
    Accepted,
    Rejected,
    Expired,
}

impl QuotationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Sent => "sent",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "draft" => Some(Self::Draft),
            "sent" => Some(Self::Sent),
            "accepted" => Some(Self::Accepted),
            "rejected" => Some(Self::Rejected),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }
}

impl fmt::Display for QuotationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    /// Status a freshly evaluated quotation starts in.
    pub fn for_required_level(level: Option<&str>) -> Self {
        if level.is_some() {
            Self::Pending
        } else {
            Self::Approved
        }
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotationItem {
    pub id: QuotationItemId,
    pub quotation_id: QuotationId,
    pub description: String,
    pub quantity: u32,
    pub cost_price: Decimal,
    pub markup: Decimal,
    pub unit_price: Decimal,
    pub line_total: Decimal,
    pub is_accepted: bool,
    pub rejection_reason: Option<String>,
    pub notes: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quotation {
    pub id: QuotationId,
    pub quote_number: QuoteNumber,
    pub revision: u32,
    pub parent_quotation_id: Option<QuotationId>,
    pub enquiry_id: EnquiryId,
    pub customer_id: CustomerId,
    pub customer_type: CustomerType,
    pub status: QuotationStatus,
    pub quote_date: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub subtotal: Decimal,
    pub discount_percentage: Decimal,
    pub discount_amount: Decimal,
    pub tax_rate: Decimal,
    pub tax_amount: Decimal,
    pub total_amount: Decimal,
    pub approval_status: Option<ApprovalStatus>,
    pub required_approval_level: Option<String>,
    pub is_superseded: bool,
    pub revision_reason: Option<String>,
    pub terms: Option<String>,
    pub notes: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u32,
    pub items: Vec<QuotationItem>,
}

impl Quotation {
    /// Id shared by every revision in this quotation's chain.
    pub fn chain_root_id(&self) -> &QuotationId {
        self.parent_quotation_id.as_ref().unwrap_or(&self.id)
    }

    pub fn apply_totals(&mut self, totals: &QuotationTotals) {
        self.subtotal = totals.subtotal;
        self.discount_amount = totals.discount_amount;
        self.tax_amount = totals.tax_amount;
        self.total_amount = totals.total_amount;
    }

    pub fn set_required_approval(&mut self, level: Option<String>) {
        self.approval_status = Some(ApprovalStatus::for_required_level(level.as_deref()));
        self.required_approval_level = level;
    }

    pub fn approval_candidate(&self) -> ApprovalCandidate {
        ApprovalCandidate {
            total_amount: self.total_amount,
            discount_percentage: self.discount_percentage,
            customer_type: self.customer_type,
        }
    }

    pub fn item(&self, item_id: &QuotationItemId) -> Option<&QuotationItem> {
        self.items.iter().find(|item| &item.id == item_id)
    }

    /// Draft edits are only allowed on the head of a chain while it is still a draft.
    pub fn ensure_editable(&self) -> Result<(), DomainError> {
        if self.is_superseded {
            return Err(DomainError::Superseded { quotation_id: self.id.clone() });
        }
        if self.status != QuotationStatus::Draft {
            return Err(DomainError::NotEditable {
                quotation_id: self.id.clone(),
                status: self.status,
            });
        }
        Ok(())
    }

    /// Copy of this quotation prepared for an optimistic update.
    pub fn next_version(&self, now: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        next.version = self.version.saturating_add(1);
        next.updated_at = now;
        next
    }

    pub fn totals_hold(&self) -> bool {
        self.total_amount == self.subtotal - self.discount_amount + self.tax_amount
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use super::{
        ApprovalStatus, Quotation, QuotationId, QuotationStatus, QuoteNumber,
    };
    use crate::domain::customer::{CustomerId, CustomerType};
    use crate::domain::enquiry::EnquiryId;
    use crate::errors::DomainError;

    fn quotation(status: QuotationStatus) -> Quotation {
        let now = Utc::now();
        Quotation {
            id: QuotationId("QTN-1".to_string()),
            quote_number: QuoteNumber::issue("QT", 2026, 1),
            revision: 1,
            parent_quotation_id: None,
            enquiry_id: EnquiryId("ENQ-1".to_string()),
            customer_id: CustomerId("CUST-1".to_string()),
            customer_type: CustomerType::Retail,
            status,
            quote_date: now,
            valid_until: now,
            subtotal: Decimal::new(34000, 2),
            discount_percentage: Decimal::ZERO,
            discount_amount: Decimal::ZERO,
            tax_rate: Decimal::new(5, 0),
            tax_amount: Decimal::new(1700, 2),
            total_amount: Decimal::new(35700, 2),
            approval_status: Some(ApprovalStatus::Approved),
            required_approval_level: None,
            is_superseded: false,
            revision_reason: None,
            terms: None,
            notes: None,
            created_by: "tester".to_string(),
            created_at: now,
            updated_at: now,
            version: 1,
            items: Vec::new(),
        }
    }

    #[test]
    fn quote_numbers_are_zero_padded_and_revision_suffixed() {
        let root = QuoteNumber::issue("QT", 2026, 7);
        assert_eq!(root.0, "QT-2026-0007");

        let second = root.for_revision(2);
        assert_eq!(second.0, "QT-2026-0007-R02");
        assert_eq!(second.root(), "QT-2026-0007");
        assert_eq!(second.for_revision(3).0, "QT-2026-0007-R03");
        assert!(root < second);
    }

    #[test]
    fn chain_root_falls_back_to_own_id() {
        let mut quote = quotation(QuotationStatus::Draft);
        assert_eq!(quote.chain_root_id().0, "QTN-1");

        quote.parent_quotation_id = Some(QuotationId("QTN-ROOT".to_string()));
        assert_eq!(quote.chain_root_id().0, "QTN-ROOT");
    }

    #[test]
    fn only_unsuperseded_drafts_are_editable() {
        let quote = quotation(QuotationStatus::Sent);
        assert!(matches!(quote.ensure_editable(), Err(DomainError::NotEditable { .. })));

        let mut draft = quotation(QuotationStatus::Draft);
        assert!(draft.ensure_editable().is_ok());
        draft.is_superseded = true;
        assert!(matches!(draft.ensure_editable(), Err(DomainError::Superseded { .. })));
    }

    #[test]
    fn required_level_drives_approval_status() {
        let mut quote = quotation(QuotationStatus::Draft);
        quote.set_required_approval(Some("Manager".to_string()));
        assert_eq!(quote.approval_status, Some(ApprovalStatus::Pending));

        quote.set_required_approval(None);
        assert_eq!(quote.approval_status, Some(ApprovalStatus::Approved));
        assert!(quote.totals_hold());
    }
}
