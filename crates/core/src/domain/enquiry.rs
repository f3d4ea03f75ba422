use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::customer::CustomerId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EnquiryId(pub String);

impl fmt::Display for EnquiryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnquiryStatus {
    New,
    InProgress,
    Quoted,
    Closed,
}

impl EnquiryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::InProgress => "in_progress",
            Self::Quoted => "quoted",
            Self::Closed => "closed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().replace([' ', '-'], "_").as_str() {
            "new" => Some(Self::New),
            "in_progress" => Some(Self::InProgress),
            "quoted" => Some(Self::Quoted),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }
}

impl fmt::Display for EnquiryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A requested line on an enquiry.
///
/// `unit_price` is the cost basis the quotation is priced from; it may be absent
/// when the customer asked for an item nobody has costed yet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnquiryItem {
    pub description: String,
    pub quantity: u32,
    #[serde(default)]
    pub unit_price: Option<Decimal>,
    #[serde(default)]
    pub markup_percent: Option<Decimal>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enquiry {
    pub id: EnquiryId,
    pub customer_id: CustomerId,
    pub items: Vec<EnquiryItem>,
    pub status: EnquiryStatus,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::EnquiryStatus;

    #[test]
    fn enquiry_status_accepts_display_spellings() {
        assert_eq!(EnquiryStatus::parse("In Progress"), Some(EnquiryStatus::InProgress));
        assert_eq!(EnquiryStatus::parse("in-progress"), Some(EnquiryStatus::InProgress));
        assert_eq!(EnquiryStatus::parse("quoted"), Some(EnquiryStatus::Quoted));
        assert_eq!(EnquiryStatus::parse("archived"), None);
    }
}
