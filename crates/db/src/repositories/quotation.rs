use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::SqliteConnection;

use enquote_core::audit::AuditEntry;
use enquote_core::domain::approval::{
    ApprovalDecision, ApprovalRule, ApprovalRuleId, QuotationApproval, QuotationApprovalId,
};
use enquote_core::domain::customer::{Customer, CustomerId, CustomerType};
use enquote_core::domain::enquiry::{Enquiry, EnquiryId, EnquiryStatus};
use enquote_core::domain::quotation::{
    ApprovalStatus, Quotation, QuotationId, QuotationItem, QuotationItemId, QuotationStatus,
    QuoteNumber,
};
use enquote_core::errors::EntityKind;
use enquote_core::store::{
    Mutation, QuotationStore, QuoteNumberSequence, StoreError, UnitOfWork,
};

use super::audit::append_entry;
use super::codec::{
    decimal, encode_timestamp, enumeration, flag, integer, optional_decimal,
    optional_enumeration, optional_text, text, timestamp, unsigned,
};
use super::reference::load_enquiry;
use super::{unique_violation, RepositoryError};
use crate::DbPool;

const QUOTATION_COLUMNS: &str = "id, quote_number, revision, parent_quotation_id, enquiry_id,
    customer_id, customer_type, status, quote_date, valid_until, subtotal, discount_percentage,
    discount_amount, tax_rate, tax_amount, total_amount, approval_status, required_approval_level,
    is_superseded, revision_reason, terms, notes, created_by, created_at, updated_at, version";

/// SQLite implementation of the lifecycle store ports.
#[derive(Clone, Debug)]
pub struct SqlQuotationStore {
    pool: DbPool,
}

impl SqlQuotationStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    async fn apply(
        conn: &mut SqliteConnection,
        mutation: Mutation,
    ) -> Result<(), RepositoryError> {
        match mutation {
            Mutation::InsertQuotation(quotation) => insert_quotation(conn, &quotation).await,
            Mutation::UpdateQuotation { quotation, expected_version } => {
                update_quotation(conn, &quotation, expected_version).await
            }
            Mutation::UpdateEnquiryStatus { enquiry_id, expected, next, updated_at } => {
                update_enquiry_status(conn, &enquiry_id, expected, next, updated_at).await
            }
            Mutation::AppendApproval(approval) => insert_approval(conn, &approval).await,
        }
    }
}

async fn insert_quotation(
    conn: &mut SqliteConnection,
    quotation: &Quotation,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO quotation (id, quote_number, revision, parent_quotation_id, chain_root_id,
                                enquiry_id, customer_id, customer_type, status, quote_date,
                                valid_until, subtotal, discount_percentage, discount_amount,
                                tax_rate, tax_amount, total_amount, approval_status,
                                required_approval_level, is_superseded, revision_reason, terms,
                                notes, created_by, created_at, updated_at, version)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&quotation.id.0)
    .bind(&quotation.quote_number.0)
    .bind(i64::from(quotation.revision))
    .bind(quotation.parent_quotation_id.as_ref().map(|id| id.0.as_str()))
    .bind(&quotation.chain_root_id().0)
    .bind(&quotation.enquiry_id.0)
    .bind(&quotation.customer_id.0)
    .bind(quotation.customer_type.as_str())
    .bind(quotation.status.as_str())
    .bind(encode_timestamp(quotation.quote_date))
    .bind(encode_timestamp(quotation.valid_until))
    .bind(quotation.subtotal.to_string())
    .bind(quotation.discount_percentage.to_string())
    .bind(quotation.discount_amount.to_string())
    .bind(quotation.tax_rate.to_string())
    .bind(quotation.tax_amount.to_string())
    .bind(quotation.total_amount.to_string())
    .bind(quotation.approval_status.map(|status| status.as_str()))
    .bind(&quotation.required_approval_level)
    .bind(quotation.is_superseded)
    .bind(&quotation.revision_reason)
    .bind(&quotation.terms)
    .bind(&quotation.notes)
    .bind(&quotation.created_by)
    .bind(encode_timestamp(quotation.created_at))
    .bind(encode_timestamp(quotation.updated_at))
    .bind(i64::from(quotation.version))
    .execute(&mut *conn)
    .await
    .map_err(|error| match unique_violation(&error) {
        Some(message) if message.contains("quote_number") => {
            RepositoryError::DuplicateQuoteNumber(quotation.quote_number.0.clone())
        }
        Some(message) if message.contains("chain_root_id") => RepositoryError::conflict(
            EntityKind::Quotation,
            quotation.chain_root_id().0.clone(),
            "revision chain already has a current head",
        ),
        Some(_) => RepositoryError::conflict(
            EntityKind::Quotation,
            quotation.id.0.clone(),
            "quotation already exists",
        ),
        None => RepositoryError::Database(error),
    })?;

    insert_items(conn, quotation).await
}

async fn update_quotation(
    conn: &mut SqliteConnection,
    quotation: &Quotation,
    expected_version: u32,
) -> Result<(), RepositoryError> {
    let result = sqlx::query(
        "UPDATE quotation SET
             status = ?, valid_until = ?, subtotal = ?, discount_percentage = ?,
             discount_amount = ?, tax_rate = ?, tax_amount = ?, total_amount = ?,
             approval_status = ?, required_approval_level = ?, is_superseded = ?,
             revision_reason = ?, terms = ?, notes = ?, updated_at = ?, version = ?
         WHERE id = ? AND version = ?",
    )
    .bind(quotation.status.as_str())
    .bind(encode_timestamp(quotation.valid_until))
    .bind(quotation.subtotal.to_string())
    .bind(quotation.discount_percentage.to_string())
    .bind(quotation.discount_amount.to_string())
    .bind(quotation.tax_rate.to_string())
    .bind(quotation.tax_amount.to_string())
    .bind(quotation.total_amount.to_string())
    .bind(quotation.approval_status.map(|status| status.as_str()))
    .bind(&quotation.required_approval_level)
    .bind(quotation.is_superseded)
    .bind(&quotation.revision_reason)
    .bind(&quotation.terms)
    .bind(&quotation.notes)
    .bind(encode_timestamp(quotation.updated_at))
    .bind(i64::from(quotation.version))
    .bind(&quotation.id.0)
    .bind(i64::from(expected_version))
    .execute(&mut *conn)
    .await
    .map_err(|error| match unique_violation(&error) {
        Some(message) => RepositoryError::conflict(
            EntityKind::Quotation,
            quotation.id.0.clone(),
            message,
        ),
        None => RepositoryError::Database(error),
    })?;

    if result.rows_affected() != 1 {
        let found: Option<i64> = sqlx::query_scalar("SELECT version FROM quotation WHERE id = ?")
            .bind(&quotation.id.0)
            .fetch_optional(&mut *conn)
            .await?;
        let detail = match found {
            Some(version) => format!("expected version {expected_version}, found {version}"),
            None => "quotation no longer exists".to_string(),
        };
        return Err(RepositoryError::conflict(
            EntityKind::Quotation,
            quotation.id.0.clone(),
            detail,
        ));
    }

    sqlx::query("DELETE FROM quotation_item WHERE quotation_id = ?")
        .bind(&quotation.id.0)
        .execute(&mut *conn)
        .await?;
    insert_items(conn, quotation).await
}

async fn insert_items(
    conn: &mut SqliteConnection,
    quotation: &Quotation,
) -> Result<(), RepositoryError> {
    for (position, item) in quotation.items.iter().enumerate() {
        let position = i64::try_from(position)
            .map_err(|_| RepositoryError::Decode(format!("item position {position} overflows")))?;
        sqlx::query(
            "INSERT INTO quotation_item (id, quotation_id, position, description, quantity,
                                         cost_price, markup, unit_price, line_total, is_accepted,
                                         rejection_reason, notes)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&item.id.0)
        .bind(&quotation.id.0)
        .bind(position)
        .bind(&item.description)
        .bind(i64::from(item.quantity))
        .bind(item.cost_price.to_string())
        .bind(item.markup.to_string())
        .bind(item.unit_price.to_string())
        .bind(item.line_total.to_string())
        .bind(item.is_accepted)
        .bind(&item.rejection_reason)
        .bind(&item.notes)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

async fn update_enquiry_status(
    conn: &mut SqliteConnection,
    enquiry_id: &EnquiryId,
    expected: EnquiryStatus,
    next: EnquiryStatus,
    updated_at: DateTime<Utc>,
) -> Result<(), RepositoryError> {
    let result = sqlx::query(
        "UPDATE enquiry SET status = ?, updated_at = ? WHERE id = ? AND status = ?",
    )
    .bind(next.as_str())
    .bind(encode_timestamp(updated_at))
    .bind(&enquiry_id.0)
    .bind(expected.as_str())
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() != 1 {
        let detail = match load_enquiry(conn, enquiry_id).await? {
            Some(enquiry) => format!("expected status {expected}, found {}", enquiry.status),
            None => "enquiry no longer exists".to_string(),
        };
        return Err(RepositoryError::conflict(EntityKind::Enquiry, enquiry_id.0.clone(), detail));
    }
    Ok(())
}

async fn insert_approval(
    conn: &mut SqliteConnection,
    approval: &QuotationApproval,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO quotation_approval (id, quotation_id, approver_level, approver_id, decision,
                                         comments, decided_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&approval.id.0)
    .bind(&approval.quotation_id.0)
    .bind(&approval.approver_level)
    .bind(&approval.approver_id)
    .bind(approval.decision.as_str())
    .bind(&approval.comments)
    .bind(encode_timestamp(approval.decided_at))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn load_quotations(
    conn: &mut SqliteConnection,
    filter: &str,
    binds: &[String],
) -> Result<Vec<Quotation>, RepositoryError> {
    let sql = format!("SELECT {QUOTATION_COLUMNS} FROM quotation WHERE {filter}");
    let mut query = sqlx::query(&sql);
    for value in binds {
        query = query.bind(value.as_str());
    }
    let rows = query.fetch_all(&mut *conn).await?;

    let mut quotations = Vec::with_capacity(rows.len());
    for row in &rows {
        let mut quotation = row_to_quotation(row)?;
        quotation.items = load_items(conn, &quotation.id).await?;
        quotations.push(quotation);
    }
    Ok(quotations)
}

async fn load_items(
    conn: &mut SqliteConnection,
    quotation_id: &QuotationId,
) -> Result<Vec<QuotationItem>, RepositoryError> {
    let rows = sqlx::query(
        "SELECT id, quotation_id, description, quantity, cost_price, markup, unit_price,
                line_total, is_accepted, rejection_reason, notes
         FROM quotation_item WHERE quotation_id = ? ORDER BY position ASC",
    )
    .bind(&quotation_id.0)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter()
        .map(|row| -> Result<QuotationItem, RepositoryError> {
            Ok(QuotationItem {
                id: QuotationItemId(text(row, "id")?),
                quotation_id: QuotationId(text(row, "quotation_id")?),
                description: text(row, "description")?,
                quantity: unsigned(row, "quantity")?,
                cost_price: decimal(row, "cost_price")?,
                markup: decimal(row, "markup")?,
                unit_price: decimal(row, "unit_price")?,
                line_total: decimal(row, "line_total")?,
                is_accepted: flag(row, "is_accepted")?,
                rejection_reason: optional_text(row, "rejection_reason")?,
                notes: optional_text(row, "notes")?,
            })
        })
        .collect()
}

fn row_to_quotation(row: &SqliteRow) -> Result<Quotation, RepositoryError> {
    Ok(Quotation {
        id: QuotationId(text(row, "id")?),
        quote_number: QuoteNumber(text(row, "quote_number")?),
        revision: unsigned(row, "revision")?,
        parent_quotation_id: optional_text(row, "parent_quotation_id")?.map(QuotationId),
        enquiry_id: EnquiryId(text(row, "enquiry_id")?),
        customer_id: CustomerId(text(row, "customer_id")?),
        customer_type: enumeration(row, "customer_type", CustomerType::parse)?,
        status: enumeration(row, "status", QuotationStatus::parse)?,
        quote_date: timestamp(row, "quote_date")?,
        valid_until: timestamp(row, "valid_until")?,
        subtotal: decimal(row, "subtotal")?,
        discount_percentage: decimal(row, "discount_percentage")?,
        discount_amount: decimal(row, "discount_amount")?,
        tax_rate: decimal(row, "tax_rate")?,
        tax_amount: decimal(row, "tax_amount")?,
        total_amount: decimal(row, "total_amount")?,
        approval_status: optional_enumeration(row, "approval_status", ApprovalStatus::parse)?,
        required_approval_level: optional_text(row, "required_approval_level")?,
        is_superseded: flag(row, "is_superseded")?,
        revision_reason: optional_text(row, "revision_reason")?,
        terms: optional_text(row, "terms")?,
        notes: optional_text(row, "notes")?,
        created_by: text(row, "created_by")?,
        created_at: timestamp(row, "created_at")?,
        updated_at: timestamp(row, "updated_at")?,
        version: unsigned(row, "version")?,
        items: Vec::new(),
    })
}

pub(crate) fn row_to_rule(row: &SqliteRow) -> Result<ApprovalRule, RepositoryError> {
    let priority = integer(row, "priority")?;
    Ok(ApprovalRule {
        id: ApprovalRuleId(text(row, "id")?),
        priority: i32::try_from(priority)
            .map_err(|_| {
                RepositoryError::Decode(format!("rule priority {priority} out of range"))
            })?,
        customer_type: optional_enumeration(row, "customer_type", CustomerType::parse)?,
        min_quote_value: optional_decimal(row, "min_quote_value")?,
        max_quote_value: optional_decimal(row, "max_quote_value")?,
        max_discount_percentage: optional_decimal(row, "max_discount_percentage")?,
        required_approval_level: text(row, "required_approval_level")?,
        is_active: flag(row, "is_active")?,
    })
}

#[async_trait]
impl QuotationStore for SqlQuotationStore {
    async fn find_enquiry(&self, id: &EnquiryId) -> Result<Option<Enquiry>, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(RepositoryError::from)?;
        Ok(load_enquiry(&mut conn, id).await?)
    }

    async fn find_customer(&self, id: &CustomerId) -> Result<Option<Customer>, StoreError> {
        let row = sqlx::query("SELECT id, name, customer_type FROM customer WHERE id = ?")
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(RepositoryError::from)?;

        let customer = row
            .map(|row| -> Result<Customer, RepositoryError> {
                Ok(Customer {
                    id: CustomerId(text(&row, "id")?),
                    name: text(&row, "name")?,
                    customer_type: enumeration(&row, "customer_type", CustomerType::parse)?,
                })
            })
            .transpose()?;
        Ok(customer)
    }

    async fn find_quotation(&self, id: &QuotationId) -> Result<Option<Quotation>, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(RepositoryError::from)?;
        let mut found = load_quotations(&mut conn, "id = ?", &[id.0.clone()]).await?;
        Ok(found.pop())
    }

    async fn list_chain(&self, root_id: &QuotationId) -> Result<Vec<Quotation>, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(RepositoryError::from)?;
        Ok(load_quotations(
            &mut conn,
            "chain_root_id = ? ORDER BY revision ASC",
            &[root_id.0.clone()],
        )
        .await?)
    }

    async fn list_for_enquiry(&self, enquiry_id: &EnquiryId) -> Result<Vec<Quotation>, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(RepositoryError::from)?;
        Ok(load_quotations(
            &mut conn,
            "enquiry_id = ? ORDER BY chain_root_id ASC, revision ASC",
            &[enquiry_id.0.clone()],
        )
        .await?)
    }

    async fn list_expirable(&self, as_of: DateTime<Utc>) -> Result<Vec<Quotation>, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(RepositoryError::from)?;
        Ok(load_quotations(
            &mut conn,
            "is_superseded = 0 AND status IN ('draft', 'sent') AND valid_until < ?
             ORDER BY valid_until ASC, id ASC",
            &[encode_timestamp(as_of)],
        )
        .await?)
    }

    async fn approval_rules(&self) -> Result<Vec<ApprovalRule>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, priority, customer_type, min_quote_value, max_quote_value,
                    max_discount_percentage, required_approval_level, is_active
             FROM approval_rule WHERE is_active = 1 ORDER BY priority ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(rows.iter().map(row_to_rule).collect::<Result<Vec<_>, _>>()?)
    }

    async fn list_approvals(
        &self,
        quotation_id: &QuotationId,
    ) -> Result<Vec<QuotationApproval>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, quotation_id, approver_level, approver_id, decision, comments, decided_at
             FROM quotation_approval WHERE quotation_id = ? ORDER BY decided_at ASC, id ASC",
        )
        .bind(&quotation_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        let approvals = rows
            .iter()
            .map(|row| -> Result<QuotationApproval, RepositoryError> {
                Ok(QuotationApproval {
                    id: QuotationApprovalId(text(row, "id")?),
                    quotation_id: QuotationId(text(row, "quotation_id")?),
                    approver_level: text(row, "approver_level")?,
                    approver_id: text(row, "approver_id")?,
                    decision: enumeration(row, "decision", ApprovalDecision::parse)?,
                    comments: optional_text(row, "comments")?,
                    decided_at: timestamp(row, "decided_at")?,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(approvals)
    }

    async fn commit(&self, work: UnitOfWork) -> Result<Vec<AuditEntry>, StoreError> {
        let mut tx = self.pool.begin().await.map_err(RepositoryError::from)?;

        for mutation in work.mutations {
            Self::apply(&mut tx, mutation).await?;
        }
        let mut entries = Vec::with_capacity(work.audit.len());
        for event in work.audit {
            entries.push(append_entry(&mut tx, event).await?);
        }

        tx.commit().await.map_err(RepositoryError::from)?;
        Ok(entries)
    }
}

#[async_trait]
impl QuoteNumberSequence for SqlQuotationStore {
    async fn next_value(&self, year: i32) -> Result<u32, StoreError> {
        let value: i64 = sqlx::query_scalar(
            "INSERT INTO quote_number_sequence (year, last_value) VALUES (?, 1)
             ON CONFLICT(year) DO UPDATE SET last_value = last_value + 1
             RETURNING last_value",
        )
        .bind(year)
        .fetch_one(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        u32::try_from(value)
            .map_err(|_| StoreError::Backend(format!("quote number sequence {value} out of range")))
    }
}
