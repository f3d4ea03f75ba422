use chrono::{Datelike, Duration};
use rust_decimal::Decimal;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::audit::{AuditAction, AuditEvent, AuditOutcome};
use crate::domain::enquiry::{EnquiryId, EnquiryStatus};
use crate::domain::quotation::{
    Quotation, QuotationId, QuotationItem, QuotationItemId, QuotationStatus, QuoteNumber,
};
use crate::errors::{ApplicationError, DomainError, EntityKind};
use crate::lifecycle::{LifecycleStore, QuotationService};
use crate::store::UnitOfWork;

impl<S> QuotationService<S>
where
    S: LifecycleStore,
{
    /// Prices an enquiry into a new Draft quotation and marks the enquiry Quoted.
    pub async fn generate_from_enquiry(
        &self,
        enquiry_id: &EnquiryId,
        actor_id: &str,
    ) -> Result<Quotation, ApplicationError> {
        let enquiry = self
            .store
            .find_enquiry(enquiry_id)
            .await?
            .filter(|enquiry| enquiry.status != EnquiryStatus::Closed)
            .ok_or_else(|| ApplicationError::not_found(EntityKind::Enquiry, enquiry_id))?;

        if enquiry.status == EnquiryStatus::Quoted {
            return Err(DomainError::EnquiryAlreadyQuoted { enquiry_id: enquiry.id.clone() }.into());
        }
        if enquiry.items.is_empty() {
            return Err(DomainError::validation(
                "items",
                format!("enquiry {} has no items to quote", enquiry.id),
            )
            .into());
        }

        let customer = self
            .store
            .find_customer(&enquiry.customer_id)
            .await?
            .ok_or_else(|| {
                ApplicationError::not_found(EntityKind::Customer, &enquiry.customer_id)
            })?;

        let quotation_id = QuotationId(Uuid::new_v4().to_string());
        let pricing = &self.settings.pricing;
        let mut items = Vec::with_capacity(enquiry.items.len());
        for requested in &enquiry.items {
            let description = requested.description.trim();
            if description.is_empty() {
                return Err(DomainError::validation(
                    "description",
                    format!("enquiry {} has an item without a description", enquiry.id),
                )
                .into());
            }
            let cost_price = requested.unit_price.unwrap_or(Decimal::ZERO);
            let markup = pricing.markup_for(customer.customer_type, requested.markup_percent);
            let line = pricing.price_line(cost_price, requested.quantity, markup)?;
            items.push(QuotationItem {
                id: QuotationItemId(Uuid::new_v4().to_string()),
                quotation_id: quotation_id.clone(),
                description: description.to_string(),
                quantity: requested.quantity,
                cost_price,
                markup,
                unit_price: line.unit_price,
                line_total: line.line_total,
                is_accepted: true,
                rejection_reason: None,
                notes: None,
            });
        }

        let totals = pricing.totals(
            items.iter().map(|item| item.line_total),
            Decimal::ZERO,
            pricing.tax_rate_percent,
        )?;

        let now = self.now();
        let sequence = self.store.next_value(now.year()).await?;

        let mut quotation = Quotation {
            id: quotation_id,
            quote_number: QuoteNumber::issue(&self.settings.number_prefix, now.year(), sequence),
            revision: 1,
            parent_quotation_id: None,
            enquiry_id: enquiry.id.clone(),
            customer_id: customer.id.clone(),
            customer_type: customer.customer_type,
            status: QuotationStatus::Draft,
            quote_date: now,
            valid_until: now + Duration::days(self.settings.validity_days),
            subtotal: Decimal::ZERO,
            discount_percentage: Decimal::ZERO,
            discount_amount: Decimal::ZERO,
            tax_rate: pricing.tax_rate_percent,
            tax_amount: Decimal::ZERO,
            total_amount: Decimal::ZERO,
            approval_status: None,
            required_approval_level: None,
            is_superseded: false,
            revision_reason: None,
            terms: self.settings.default_terms.clone(),
            notes: enquiry.notes.clone(),
            created_by: actor_id.to_string(),
            created_at: now,
            updated_at: now,
            version: 1,
            items,
        };
        quotation.apply_totals(&totals);

        let requirement = self.evaluate_approval(&quotation.approval_candidate()).await?;
        quotation.set_required_approval(
            requirement.as_ref().map(|requirement| requirement.required_level.clone()),
        );

        let mut generated = AuditEvent::new(
            EntityKind::Quotation,
            quotation.id.0.clone(),
            AuditAction::GenerateFromEnquiry,
            Some(actor_id.to_string()),
            AuditOutcome::Success,
        )
        .at(now)
        .with_after(&quotation)
        .with_metadata("enquiry_id", enquiry.id.0.clone())
        .with_metadata("quote_number", quotation.quote_number.0.clone());
        if let Some(requirement) = &requirement {
            generated = generated.with_metadata("approval_rule_id", requirement.rule_id.0.clone());
        }

        let enquiry_changed = AuditEvent::new(
            EntityKind::Enquiry,
            enquiry.id.0.clone(),
            AuditAction::StatusChange,
            Some(actor_id.to_string()),
            AuditOutcome::Success,
        )
        .at(now)
        .with_before(&json!({ "status": enquiry.status.as_str() }))
        .with_after(&json!({ "status": EnquiryStatus::Quoted.as_str() }))
        .with_metadata("quotation_id", quotation.id.0.clone());

        let work = UnitOfWork::new()
            .insert_quotation(quotation.clone())
            .update_enquiry_status(enquiry.id.clone(), enquiry.status, EnquiryStatus::Quoted, now)
            .audit(generated)
            .audit(enquiry_changed);
        self.commit("generate_from_enquiry", work).await?;

        info!(
            event_name = "quotation.generated",
            quotation_id = %quotation.id,
            quote_number = %quotation.quote_number,
            enquiry_id = %enquiry.id,
            total_amount = %quotation.total_amount,
            approval_status =
                quotation.approval_status.map(|status| status.as_str()).unwrap_or("none"),
            "quotation generated from enquiry"
        );

        Ok(quotation)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use rust_decimal::Decimal;

    use crate::audit::{verify_trail, AuditAction};
    use crate::domain::enquiry::{EnquiryId, EnquiryItem, EnquiryStatus};
    use crate::domain::quotation::{ApprovalStatus, QuotationStatus};
    use crate::errors::{ApplicationError, DomainError, EntityKind};
    use crate::lifecycle::test_support::{enquiry, fixed_now, item, manager_rule, service};
    use crate::store::{AuditRecorder, QuotationStore};

    #[tokio::test]
    async fn retail_enquiry_generates_priced_draft() {
        let (store, service) = service();
        store.insert_enquiry(enquiry("ENQ-1", "CUST-R", vec![item("Oak desk", 2, 100)]));

        let quotation = service
            .generate_from_enquiry(&EnquiryId("ENQ-1".to_owned()), "sales-1")
            .await
            .expect("generate");

        assert_eq!(quotation.status, QuotationStatus::Draft);
        assert_eq!(quotation.revision, 1);
        assert_eq!(quotation.quote_number.0, "QT-2026-0001");
        assert_eq!(quotation.subtotal, Decimal::new(340, 0));
        assert_eq!(quotation.tax_amount, Decimal::new(17, 0));
        assert_eq!(quotation.total_amount, Decimal::new(357, 0));
        assert_eq!(quotation.approval_status, Some(ApprovalStatus::Approved));
        assert_eq!(quotation.valid_until, fixed_now() + Duration::days(30));
        assert_eq!(quotation.items[0].unit_price, Decimal::new(170, 0));
        assert!(quotation.totals_hold());

        let stored_enquiry = store
            .find_enquiry(&EnquiryId("ENQ-1".to_owned()))
            .await
            .expect("find")
            .expect("enquiry exists");
        assert_eq!(stored_enquiry.status, EnquiryStatus::Quoted);

        let trail = store
            .list_entries(EntityKind::Quotation, &quotation.id.0)
            .await
            .expect("audit trail");
        assert_eq!(trail.len(), 1);
        assert_eq!(trail[0].event.action, AuditAction::GenerateFromEnquiry);
        assert!(verify_trail(&trail).valid);
        let enquiry_trail =
            store.list_entries(EntityKind::Enquiry, "ENQ-1").await.expect("enquiry trail");
        assert_eq!(enquiry_trail[0].event.action, AuditAction::StatusChange);
    }

    #[tokio::test]
    async fn wholesale_markup_and_item_override_apply() {
        let (store, service) = service();
        let mut custom = item("Custom cabinet", 1, 200);
        custom.markup_percent = Some(Decimal::new(25, 0));
        store.insert_enquiry(enquiry(
            "ENQ-2",
            "CUST-W",
            vec![item("Shelf", 3, 50), custom],
        ));

        let quotation = service
            .generate_from_enquiry(&EnquiryId("ENQ-2".to_owned()), "sales-1")
            .await
            .expect("generate");

        assert_eq!(quotation.items[0].unit_price, Decimal::new(70, 0));
        assert_eq!(quotation.items[0].line_total, Decimal::new(210, 0));
        assert_eq!(quotation.items[1].unit_price, Decimal::new(250, 0));
        assert_eq!(quotation.subtotal, Decimal::new(460, 0));
    }

    #[tokio::test]
    async fn matching_rule_leaves_quotation_pending() {
        let (store, service) = service();
        store.insert_rule(manager_rule(5000));
        store.insert_enquiry(enquiry("ENQ-3", "CUST-R", vec![item("Boardroom table", 10, 600)]));

        let quotation = service
            .generate_from_enquiry(&EnquiryId("ENQ-3".to_owned()), "sales-1")
            .await
            .expect("generate");

        assert_eq!(quotation.approval_status, Some(ApprovalStatus::Pending));
        assert_eq!(quotation.required_approval_level.as_deref(), Some("Manager"));
    }

    #[tokio::test]
    async fn quoting_twice_fails_deterministically() {
        let (store, service) = service();
        store.insert_enquiry(enquiry("ENQ-4", "CUST-R", vec![item("Lamp", 1, 10)]));
        let id = EnquiryId("ENQ-4".to_owned());

        service.generate_from_enquiry(&id, "sales-1").await.expect("first generation");
        let error =
            service.generate_from_enquiry(&id, "sales-1").await.expect_err("second generation");

        assert_eq!(
            error,
            ApplicationError::Domain(DomainError::EnquiryAlreadyQuoted { enquiry_id: id.clone() })
        );
        assert_eq!(store.list_for_enquiry(&id).await.expect("list").len(), 1);
    }

    #[tokio::test]
    async fn missing_closed_and_empty_enquiries_are_rejected() {
        let (store, service) = service();

        let missing = service
            .generate_from_enquiry(&EnquiryId("ENQ-404".to_owned()), "sales-1")
            .await
            .expect_err("missing enquiry");
        assert!(matches!(missing, ApplicationError::NotFound { entity: EntityKind::Enquiry, .. }));

        let mut closed = enquiry("ENQ-5", "CUST-R", vec![item("Chair", 1, 10)]);
        closed.status = EnquiryStatus::Closed;
        store.insert_enquiry(closed);
        let error = service
            .generate_from_enquiry(&EnquiryId("ENQ-5".to_owned()), "sales-1")
            .await
            .expect_err("closed enquiry");
        assert!(matches!(error, ApplicationError::NotFound { .. }));

        store.insert_enquiry(enquiry("ENQ-6", "CUST-R", Vec::new()));
        let error = service
            .generate_from_enquiry(&EnquiryId("ENQ-6".to_owned()), "sales-1")
            .await
            .expect_err("empty enquiry");
        assert!(matches!(error, ApplicationError::Domain(DomainError::Validation { .. })));
    }

    #[tokio::test]
    async fn pricing_failure_persists_nothing() {
        let (store, service) = service();
        let broken = EnquiryItem {
            description: "Ghost item".to_owned(),
            quantity: 0,
            unit_price: Some(Decimal::new(10, 0)),
            markup_percent: None,
        };
        store.insert_enquiry(enquiry("ENQ-7", "CUST-R", vec![broken]));
        let id = EnquiryId("ENQ-7".to_owned());

        let error = service.generate_from_enquiry(&id, "sales-1").await.expect_err("zero quantity");
        assert!(matches!(error, ApplicationError::Domain(DomainError::InvalidInput { .. })));
        assert!(store.list_for_enquiry(&id).await.expect("list").is_empty());
        let unchanged = store.find_enquiry(&id).await.expect("find").expect("exists");
        assert_eq!(unchanged.status, EnquiryStatus::New);
    }

    #[tokio::test]
    async fn blank_item_description_is_a_validation_error() {
        let (store, service) = service();
        store.insert_enquiry(enquiry(
            "ENQ-9",
            "CUST-R",
            vec![item("Desk", 1, 100), item("   ", 2, 40)],
        ));
        let id = EnquiryId("ENQ-9".to_owned());

        let error = service.generate_from_enquiry(&id, "sales-1").await.expect_err("blank item");
        assert!(matches!(
            error,
            ApplicationError::Domain(DomainError::Validation { ref field, .. })
                if field == "description"
        ));
        assert!(store.list_for_enquiry(&id).await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn oversized_cost_is_rejected_as_invalid_input() {
        let (store, service) = service();
        let mut oversized = item("Warehouse", 1, 0);
        oversized.unit_price = Some("50000000000000000000000000000".parse().expect("decimal"));
        store.insert_enquiry(enquiry("ENQ-10", "CUST-R", vec![oversized]));
        let id = EnquiryId("ENQ-10".to_owned());

        let error = service.generate_from_enquiry(&id, "sales-1").await.expect_err("overflow");
        assert!(matches!(error, ApplicationError::Domain(DomainError::InvalidInput { .. })));
        let unchanged = store.find_enquiry(&id).await.expect("find").expect("exists");
        assert_eq!(unchanged.status, EnquiryStatus::New);
    }

    #[tokio::test]
    async fn uncosted_items_are_priced_at_zero() {
        let (store, service) = service();
        let mut uncosted = item("Site survey", 1, 0);
        uncosted.unit_price = None;
        store.insert_enquiry(enquiry("ENQ-8", "CUST-R", vec![uncosted, item("Desk", 1, 100)]));

        let quotation = service
            .generate_from_enquiry(&EnquiryId("ENQ-8".to_owned()), "sales-1")
            .await
            .expect("generate");
        assert_eq!(quotation.items[0].line_total, Decimal::ZERO);
        assert_eq!(quotation.subtotal, Decimal::new(170, 0));
    }

    #[tokio::test]
    async fn sequence_numbers_increase_across_enquiries() {
        let (store, service) = service();
        store.insert_enquiry(enquiry("ENQ-A", "CUST-R", vec![item("A", 1, 1)]));
        store.insert_enquiry(enquiry("ENQ-B", "CUST-R", vec![item("B", 1, 1)]));

        let first = service
            .generate_from_enquiry(&EnquiryId("ENQ-A".to_owned()), "sales-1")
            .await
            .expect("first");
        let second = service
            .generate_from_enquiry(&EnquiryId("ENQ-B".to_owned()), "sales-1")
            .await
            .expect("second");
        assert_eq!(first.quote_number.0, "QT-2026-0001");
        assert_eq!(second.quote_number.0, "QT-2026-0002");
    }
}
