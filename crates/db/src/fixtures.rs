use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;

use enquote_core::domain::approval::{ApprovalRule, ApprovalRuleId};
use enquote_core::domain::customer::{Customer, CustomerId, CustomerType};
use enquote_core::domain::enquiry::{Enquiry, EnquiryId, EnquiryItem, EnquiryStatus};

use crate::connection::DbPool;
use crate::repositories::{RepositoryError, SqlQuotationStore};

struct SeedCustomer {
    id: &'static str,
    name: &'static str,
    customer_type: CustomerType,
}

struct SeedItem {
    description: &'static str,
    quantity: u32,
    /// Cost in cents; `None` for an item nobody has costed yet.
    cost_cents: Option<i64>,
}

struct SeedEnquiry {
    id: &'static str,
    customer_id: &'static str,
    notes: &'static str,
    items: &'static [SeedItem],
}

struct SeedRule {
    id: &'static str,
    priority: i32,
    customer_type: Option<CustomerType>,
    min_quote_value: Option<i64>,
    max_discount_percentage: Option<i64>,
    level: &'static str,
}

const SEED_CUSTOMERS: &[SeedCustomer] = &[
    SeedCustomer {
        id: "CUST-RETAIL-001",
        name: "Harbour Interiors",
        customer_type: CustomerType::Retail,
    },
    SeedCustomer {
        id: "CUST-WHOLESALE-001",
        name: "Northgate Supply Co",
        customer_type: CustomerType::Wholesale,
    },
];

const SEED_ENQUIRIES: &[SeedEnquiry] = &[
    SeedEnquiry {
        id: "ENQ-DEMO-001",
        customer_id: "CUST-RETAIL-001",
        notes: "Showroom refit, two desks",
        items: &[SeedItem {
            description: "Oak writing desk",
            quantity: 2,
            cost_cents: Some(10_000),
        }],
    },
    SeedEnquiry {
        id: "ENQ-DEMO-002",
        customer_id: "CUST-WHOLESALE-001",
        notes: "Quarterly restock",
        items: &[
            SeedItem { description: "Stacking chair", quantity: 120, cost_cents: Some(4_550) },
            SeedItem { description: "Folding table", quantity: 40, cost_cents: Some(8_990) },
        ],
    },
    SeedEnquiry {
        id: "ENQ-DEMO-003",
        customer_id: "CUST-RETAIL-001",
        notes: "Boardroom fit-out",
        items: &[
            SeedItem { description: "Boardroom table", quantity: 1, cost_cents: Some(420_000) },
            SeedItem { description: "Executive chair", quantity: 12, cost_cents: Some(38_500) },
            SeedItem { description: "Custom cable tray", quantity: 1, cost_cents: None },
        ],
    },
];

const SEED_RULES: &[SeedRule] = &[
    SeedRule {
        id: "AR-DIRECTOR-20K",
        priority: 10,
        customer_type: None,
        min_quote_value: Some(20_000),
        max_discount_percentage: None,
        level: "Director",
    },
    SeedRule {
        id: "AR-MANAGER-5K",
        priority: 20,
        customer_type: None,
        min_quote_value: Some(5_000),
        max_discount_percentage: None,
        level: "Manager",
    },
    SeedRule {
        id: "AR-WHOLESALE-2K",
        priority: 30,
        customer_type: Some(CustomerType::Wholesale),
        min_quote_value: Some(2_000),
        max_discount_percentage: Some(100),
        level: "Sales Lead",
    },
];

/// Demo customers, enquiries and approval rules for local runs and smoke checks.
///
/// Loading is idempotent: every row is upserted, and enquiries that have already been
/// quoted keep their status.
pub struct DemoSeedDataset;

impl DemoSeedDataset {
    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let store = SqlQuotationStore::new(pool.clone());
        let seeded_at = seeded_at();

        for customer in Self::customers() {
            store.save_customer(&customer).await?;
        }

        let mut enquiries_seeded = Vec::with_capacity(SEED_ENQUIRIES.len());
        for enquiry in Self::enquiries(seeded_at) {
            let already_quoted: i64 = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM enquiry WHERE id = ? AND status <> 'new')",
            )
            .bind(&enquiry.id.0)
            .fetch_one(pool)
            .await?;
            if already_quoted == 0 {
                store.save_enquiry(&enquiry).await?;
            }
            enquiries_seeded.push(enquiry.id.0);
        }

        for rule in Self::rules() {
            store.save_approval_rule(&rule).await?;
        }

        Ok(SeedResult {
            customers_seeded: SEED_CUSTOMERS.len(),
            enquiries_seeded,
            rules_seeded: SEED_RULES.len(),
        })
    }

    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();

        for customer in SEED_CUSTOMERS {
            let exists: i64 = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM customer WHERE id = ?1 AND customer_type = ?2)",
            )
            .bind(customer.id)
            .bind(customer.customer_type.as_str())
            .fetch_one(pool)
            .await?;
            checks.push((customer.id, exists == 1));
        }

        for enquiry in SEED_ENQUIRIES {
            let item_count: i64 =
                sqlx::query_scalar("SELECT COUNT(1) FROM enquiry_item WHERE enquiry_id = ?1")
                    .bind(enquiry.id)
                    .fetch_one(pool)
                    .await?;
            let complete = usize::try_from(item_count).ok() == Some(enquiry.items.len());
            checks.push((enquiry.id, complete));
        }

        for rule in SEED_RULES {
            let active: i64 = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM approval_rule WHERE id = ?1 AND is_active = 1)",
            )
            .bind(rule.id)
            .fetch_one(pool)
            .await?;
            checks.push((rule.id, active == 1));
        }

        let all_present = checks.iter().all(|(_, present)| *present);
        Ok(VerificationResult { all_present, checks })
    }

    pub fn customers() -> Vec<Customer> {
        SEED_CUSTOMERS
            .iter()
            .map(|customer| Customer {
                id: CustomerId(customer.id.to_string()),
                name: customer.name.to_string(),
                customer_type: customer.customer_type,
            })
            .collect()
    }

    pub fn enquiries(created_at: DateTime<Utc>) -> Vec<Enquiry> {
        SEED_ENQUIRIES
            .iter()
            .map(|enquiry| Enquiry {
                id: EnquiryId(enquiry.id.to_string()),
                customer_id: CustomerId(enquiry.customer_id.to_string()),
                items: enquiry
                    .items
                    .iter()
                    .map(|item| EnquiryItem {
                        description: item.description.to_string(),
                        quantity: item.quantity,
                        unit_price: item.cost_cents.map(|cents| Decimal::new(cents, 2)),
                        markup_percent: None,
                    })
                    .collect(),
                status: EnquiryStatus::New,
                notes: Some(enquiry.notes.to_string()),
                created_at,
                updated_at: created_at,
            })
            .collect()
    }

    pub fn rules() -> Vec<ApprovalRule> {
        SEED_RULES
            .iter()
            .map(|rule| ApprovalRule {
                id: ApprovalRuleId(rule.id.to_string()),
                priority: rule.priority,
                customer_type: rule.customer_type,
                min_quote_value: rule.min_quote_value.map(|value| Decimal::new(value, 0)),
                max_quote_value: None,
                max_discount_percentage: rule
                    .max_discount_percentage
                    .map(|value| Decimal::new(value, 0)),
                required_approval_level: rule.level.to_string(),
                is_active: true,
            })
            .collect()
    }
}

fn seeded_at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 5, 9, 0, 0).single().unwrap_or_else(Utc::now)
}

#[derive(Debug)]
pub struct SeedResult {
    pub customers_seeded: usize,
    pub enquiries_seeded: Vec<String>,
    pub rules_seeded: usize,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}
