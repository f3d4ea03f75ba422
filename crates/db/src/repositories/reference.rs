//! Customers, enquiries and approval rules. The lifecycle only reads these; writes come
//! from seeding and operator tooling.

use sqlx::SqliteConnection;

use enquote_core::domain::approval::ApprovalRule;
use enquote_core::domain::customer::{Customer, CustomerId};
use enquote_core::domain::enquiry::{Enquiry, EnquiryId, EnquiryItem, EnquiryStatus};

use super::codec::{
    encode_timestamp, enumeration, optional_decimal, optional_text, text, timestamp, unsigned,
};
use super::RepositoryError;
use crate::repositories::SqlQuotationStore;

pub(crate) async fn load_enquiry(
    conn: &mut SqliteConnection,
    id: &EnquiryId,
) -> Result<Option<Enquiry>, RepositoryError> {
    let Some(row) = sqlx::query(
        "SELECT id, customer_id, status, notes, created_at, updated_at FROM enquiry WHERE id = ?",
    )
    .bind(&id.0)
    .fetch_optional(&mut *conn)
    .await?
    else {
        return Ok(None);
    };

    let item_rows = sqlx::query(
        "SELECT description, quantity, unit_price, markup_percent
         FROM enquiry_item WHERE enquiry_id = ? ORDER BY position ASC",
    )
    .bind(&id.0)
    .fetch_all(&mut *conn)
    .await?;

    let items = item_rows
        .iter()
        .map(|item| -> Result<EnquiryItem, RepositoryError> {
            Ok(EnquiryItem {
                description: text(item, "description")?,
                quantity: unsigned(item, "quantity")?,
                unit_price: optional_decimal(item, "unit_price")?,
                markup_percent: optional_decimal(item, "markup_percent")?,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Some(Enquiry {
        id: EnquiryId(text(&row, "id")?),
        customer_id: CustomerId(text(&row, "customer_id")?),
        items,
        status: enumeration(&row, "status", EnquiryStatus::parse)?,
        notes: optional_text(&row, "notes")?,
        created_at: timestamp(&row, "created_at")?,
        updated_at: timestamp(&row, "updated_at")?,
    }))
}

impl SqlQuotationStore {
    pub async fn save_customer(&self, customer: &Customer) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO customer (id, name, customer_type) VALUES (?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 customer_type = excluded.customer_type",
        )
        .bind(&customer.id.0)
        .bind(&customer.name)
        .bind(customer.customer_type.as_str())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Upserts the enquiry and replaces its items.
    pub async fn save_enquiry(&self, enquiry: &Enquiry) -> Result<(), RepositoryError> {
        let mut tx = self.pool().begin().await?;

        sqlx::query(
            "INSERT INTO enquiry (id, customer_id, status, notes, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 customer_id = excluded.customer_id,
                 status = excluded.status,
                 notes = excluded.notes,
                 updated_at = excluded.updated_at",
        )
        .bind(&enquiry.id.0)
        .bind(&enquiry.customer_id.0)
        .bind(enquiry.status.as_str())
        .bind(&enquiry.notes)
        .bind(encode_timestamp(enquiry.created_at))
        .bind(encode_timestamp(enquiry.updated_at))
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM enquiry_item WHERE enquiry_id = ?")
            .bind(&enquiry.id.0)
            .execute(&mut *tx)
            .await?;

        for (position, item) in enquiry.items.iter().enumerate() {
            let position = i64::try_from(position)
                .map_err(|_| {
                    RepositoryError::Decode(format!("item position {position} overflows"))
                })?;
            sqlx::query(
                "INSERT INTO enquiry_item (enquiry_id, position, description, quantity, unit_price,
                                           markup_percent)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&enquiry.id.0)
            .bind(position)
            .bind(&item.description)
            .bind(i64::from(item.quantity))
            .bind(item.unit_price.map(|price| price.to_string()))
            .bind(item.markup_percent.map(|markup| markup.to_string()))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn save_approval_rule(&self, rule: &ApprovalRule) -> Result<(), RepositoryError> {
        rule.validate().map_err(RepositoryError::decode)?;

        sqlx::query(
            "INSERT INTO approval_rule (id, priority, customer_type, min_quote_value,
                                        max_quote_value, max_discount_percentage,
                                        required_approval_level, is_active)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 priority = excluded.priority,
                 customer_type = excluded.customer_type,
                 min_quote_value = excluded.min_quote_value,
                 max_quote_value = excluded.max_quote_value,
                 max_discount_percentage = excluded.max_discount_percentage,
                 required_approval_level = excluded.required_approval_level,
                 is_active = excluded.is_active",
        )
        .bind(&rule.id.0)
        .bind(rule.priority)
        .bind(rule.customer_type.map(|customer_type| customer_type.as_str()))
        .bind(rule.min_quote_value.map(|value| value.to_string()))
        .bind(rule.max_quote_value.map(|value| value.to_string()))
        .bind(rule.max_discount_percentage.map(|value| value.to_string()))
        .bind(&rule.required_approval_level)
        .bind(rule.is_active)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Every configured rule, inactive ones included.
    pub async fn list_approval_rules(&self) -> Result<Vec<ApprovalRule>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, priority, customer_type, min_quote_value, max_quote_value,
                    max_discount_percentage, required_approval_level, is_active
             FROM approval_rule ORDER BY priority ASC, id ASC",
        )
        .fetch_all(self.pool())
        .await?;

        rows.iter().map(super::quotation::row_to_rule).collect()
    }
}
