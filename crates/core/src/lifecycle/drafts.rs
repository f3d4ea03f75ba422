use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::audit::{AuditAction, AuditEvent, AuditOutcome};
use crate::domain::quotation::{Quotation, QuotationId, QuotationItemId};
use crate::errors::{ApplicationError, DomainError, EntityKind};
use crate::lifecycle::{LifecycleStore, QuotationService};
use crate::store::UnitOfWork;

/// Partial edit of a quotation line. Absent fields keep their current value.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemUpdate {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub quantity: Option<u32>,
    #[serde(default)]
    pub cost_price: Option<Decimal>,
    #[serde(default)]
    pub markup: Option<Decimal>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub is_accepted: Option<bool>,
    #[serde(default)]
    pub rejection_reason: Option<String>,
}

impl<S> QuotationService<S>
where
    S: LifecycleStore,
{
    pub async fn update_item(
        &self,
        quotation_id: &QuotationId,
        item_id: &QuotationItemId,
        update: ItemUpdate,
        actor_id: &str,
    ) -> Result<Quotation, ApplicationError> {
        let quotation = self.find_quotation(quotation_id).await?;
        quotation.ensure_editable()?;
        let Some(before) = quotation.item(item_id).cloned() else {
            return Err(ApplicationError::not_found(EntityKind::QuotationItem, item_id));
        };

        let now = self.now();
        let mut next = quotation.next_version(now);
        let pricing = &self.settings.pricing;
        let Some(item) = next.items.iter_mut().find(|item| &item.id == item_id) else {
            return Err(ApplicationError::not_found(EntityKind::QuotationItem, item_id));
        };

        if let Some(description) = update.description {
            let description = description.trim();
            if description.is_empty() {
                return Err(DomainError::validation(
                    "description",
                    "item description must not be empty",
                )
                .into());
            }
            item.description = description.to_string();
        }
        if let Some(quantity) = update.quantity {
            item.quantity = quantity;
        }
        if let Some(cost_price) = update.cost_price {
            item.cost_price = cost_price;
        }
        if let Some(markup) = update.markup {
            item.markup = markup;
        }
        if let Some(notes) = update.notes {
            item.notes = Some(notes).filter(|notes| !notes.trim().is_empty());
        }
        if let Some(is_accepted) = update.is_accepted {
            item.is_accepted = is_accepted;
            if is_accepted {
                item.rejection_reason = None;
            }
        }
        if let Some(reason) = update.rejection_reason {
            item.rejection_reason = Some(reason).filter(|reason| !reason.trim().is_empty());
        }

        let line = pricing.price_line(item.cost_price, item.quantity, item.markup)?;
        item.unit_price = line.unit_price;
        item.line_total = line.line_total;
        let after = item.clone();

        self.reprice(&quotation, &mut next).await?;

        let event = AuditEvent::new(
            EntityKind::QuotationItem,
            item_id.0.clone(),
            AuditAction::UpdateItem,
            Some(actor_id.to_string()),
            AuditOutcome::Success,
        )
        .at(now)
        .with_before(&before)
        .with_after(&after)
        .with_metadata("quotation_id", quotation.id.0.clone())
        .with_metadata("total_amount", next.total_amount.to_string());

        let work =
            UnitOfWork::new().update_quotation(next.clone(), quotation.version).audit(event);
        self.commit("update_item", work).await?;

        info!(
            event_name = "quotation.item_updated",
            quotation_id = %next.id,
            item_id = %item_id,
            total_amount = %next.total_amount,
            "draft quotation item updated"
        );

        Ok(next)
    }

    pub async fn update_discount(
        &self,
        quotation_id: &QuotationId,
        discount_percentage: Decimal,
        actor_id: &str,
    ) -> Result<Quotation, ApplicationError> {
        let quotation = self.find_quotation(quotation_id).await?;
        quotation.ensure_editable()?;

        let now = self.now();
        let mut next = quotation.next_version(now);
        next.discount_percentage = discount_percentage;
        self.reprice(&quotation, &mut next).await?;

        let event = AuditEvent::new(
            EntityKind::Quotation,
            quotation.id.0.clone(),
            AuditAction::UpdateDiscount,
            Some(actor_id.to_string()),
            AuditOutcome::Success,
        )
        .at(now)
        .with_before(&json!({
            "discount_percentage": quotation.discount_percentage,
            "total_amount": quotation.total_amount,
        }))
        .with_after(&json!({
            "discount_percentage": next.discount_percentage,
            "total_amount": next.total_amount,
        }));

        let work =
            UnitOfWork::new().update_quotation(next.clone(), quotation.version).audit(event);
        self.commit("update_discount", work).await?;

        info!(
            event_name = "quotation.discount_updated",
            quotation_id = %next.id,
            discount_percentage = %next.discount_percentage,
            total_amount = %next.total_amount,
            "draft quotation discount updated"
        );

        Ok(next)
    }

    /// Recomputes totals and re-evaluates approval when the money moved.
    async fn reprice(
        &self,
        current: &Quotation,
        next: &mut Quotation,
    ) -> Result<(), ApplicationError> {
        let totals = self.settings.pricing.totals(
            next.items.iter().map(|item| item.line_total),
            next.discount_percentage,
            next.tax_rate,
        )?;
        next.apply_totals(&totals);

        let changed = next.total_amount != current.total_amount
            || next.discount_percentage != current.discount_percentage;
        if changed {
            let requirement = self.evaluate_approval(&next.approval_candidate()).await?;
            next.set_required_approval(requirement.map(|requirement| requirement.required_level));
        }
        Ok(())
    }
}
