use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use tokio::sync::Barrier;

use enquote_core::audit::{verify_trail, AuditAction, AuditEvent, AuditOutcome};
use enquote_core::domain::approval::ApprovalDecision;
use enquote_core::domain::enquiry::{EnquiryId, EnquiryStatus};
use enquote_core::domain::quotation::{ApprovalStatus, QuotationId, QuotationStatus};
use enquote_core::errors::{ApplicationError, DomainError, EntityKind};
use enquote_core::lifecycle::{
    ApprovalDecisionInput, FixedClock, LifecycleSettings, QuotationService,
};
use enquote_core::store::{
    AuditRecorder, QuotationStore, QuoteNumberSequence, StoreError, UnitOfWork,
};
use enquote_db::{connect_with_settings, migrations, DemoSeedDataset, SqlQuotationStore};

type StoreContractResult<T = ()> = Result<T, String>;

macro_rules! require {
    ($cond:expr) => {
        if !$cond {
            return Err(format!("assertion failed: `{}`", stringify!($cond)));
        }
    };
    ($cond:expr, $($arg:tt)*) => {
        if !$cond {
            return Err(format!($($arg)*));
        }
    };
}

macro_rules! require_eq {
    ($left:expr, $right:expr) => {
        if $left != $right {
            return Err(format!(
                "assertion failed: `left == right` (`{:?}` != `{:?}`)",
                $left,
                $right
            ));
        }
    };
}

type SeededService = (Arc<SqlQuotationStore>, QuotationService<SqlQuotationStore>);

async fn seeded_service() -> StoreContractResult<SeededService> {
    seeded_service_at("sqlite::memory:", 1).await
}

async fn seeded_service_at(url: &str, max_connections: u32) -> StoreContractResult<SeededService> {
    let pool = connect_with_settings(url, max_connections, 30)
        .await
        .map_err(|error| format!("connect: {error}"))?;
    migrations::run_pending(&pool).await.map_err(|error| format!("migrate: {error}"))?;
    DemoSeedDataset::load(&pool).await.map_err(|error| format!("seed: {error}"))?;

    let now = Utc
        .with_ymd_and_hms(2026, 5, 4, 10, 30, 0)
        .single()
        .ok_or_else(|| "fixed clock".to_string())?;
    let store = Arc::new(SqlQuotationStore::new(pool));
    let service = QuotationService::new(Arc::clone(&store), LifecycleSettings::default())
        .with_clock(Arc::new(FixedClock(now)));
    Ok((store, service))
}

fn enquiry(id: &str) -> EnquiryId {
    EnquiryId(id.to_string())
}

#[tokio::test]
async fn generated_quotation_round_trips_through_sqlite() -> StoreContractResult {
    let (store, service) = seeded_service().await?;

    let quotation = service
        .generate_from_enquiry(&enquiry("ENQ-DEMO-001"), "sales-1")
        .await
        .map_err(|error| format!("generate: {error}"))?;

    require_eq!(quotation.quote_number.0.as_str(), "QT-2026-0001");
    require_eq!(quotation.subtotal, Decimal::new(340, 0));
    require_eq!(quotation.total_amount, Decimal::new(357, 0));
    require_eq!(quotation.status, QuotationStatus::Draft);

    let stored = store
        .find_quotation(&quotation.id)
        .await
        .map_err(|error| format!("find: {error}"))?
        .ok_or_else(|| "generated quotation should be stored".to_string())?;
    require_eq!(stored, quotation);

    let enquiry_row = store
        .find_enquiry(&enquiry("ENQ-DEMO-001"))
        .await
        .map_err(|error| format!("find enquiry: {error}"))?
        .ok_or_else(|| "seeded enquiry should exist".to_string())?;
    require_eq!(enquiry_row.status, EnquiryStatus::Quoted);

    let again = service.generate_from_enquiry(&enquiry("ENQ-DEMO-001"), "sales-1").await;
    require!(
        matches!(again, Err(ApplicationError::Domain(DomainError::EnquiryAlreadyQuoted { .. }))),
        "second generation should be rejected, got {again:?}"
    );
    Ok(())
}

#[tokio::test]
async fn revision_chain_keeps_single_head_and_verified_trail() -> StoreContractResult {
    let (store, service) = seeded_service().await?;
    let original = service
        .generate_from_enquiry(&enquiry("ENQ-DEMO-001"), "sales-1")
        .await
        .map_err(|error| format!("generate: {error}"))?;

    let revision = service
        .create_revision(&original.id, "price correction", "sales-1")
        .await
        .map_err(|error| format!("revise: {error}"))?;
    require_eq!(revision.revision, 2);
    require_eq!(revision.parent_quotation_id.as_ref(), Some(&original.id));

    let chain =
        service.revision_chain(&original.id).await.map_err(|error| format!("chain: {error}"))?;
    require_eq!(chain.len(), 2);
    require_eq!(chain.iter().filter(|quotation| !quotation.is_superseded).count(), 1);
    require_eq!(chain[1].items.len(), 1);

    let stale = service.create_revision(&original.id, "second try", "sales-1").await;
    require!(
        matches!(stale, Err(ApplicationError::Domain(DomainError::Superseded { .. }))),
        "superseded source should be rejected, got {stale:?}"
    );

    let trail = store
        .list_entries(EntityKind::Quotation, &original.id.0)
        .await
        .map_err(|error| format!("trail: {error}"))?;
    require_eq!(trail.len(), 2);
    require_eq!(trail[1].event.action, AuditAction::Supersede);
    require!(verify_trail(&trail).valid, "stored trail should verify");

    let history =
        service.quotation_history(&revision.id).await.map_err(|error| format!("history: {error}"))?;
    require!(history.trail_verified);
    Ok(())
}

#[tokio::test]
async fn approval_gate_blocks_send_until_decided() -> StoreContractResult {
    let (store, service) = seeded_service().await?;
    let quotation = service
        .generate_from_enquiry(&enquiry("ENQ-DEMO-003"), "sales-1")
        .await
        .map_err(|error| format!("generate: {error}"))?;

    require_eq!(quotation.total_amount, Decimal::new(1_574_370, 2));
    require_eq!(quotation.required_approval_level.as_deref(), Some("Manager"));
    require_eq!(quotation.approval_status, Some(ApprovalStatus::Pending));

    let blocked = service.transition_status(&quotation.id, QuotationStatus::Sent, "sales-1").await;
    require!(
        matches!(blocked, Err(ApplicationError::Domain(DomainError::ApprovalPending { .. }))),
        "pending approval should block sending, got {blocked:?}"
    );

    let approved = service
        .record_approval_decision(
            &quotation.id,
            ApprovalDecisionInput {
                approver_level: "manager".to_string(),
                approver_id: "mgr-7".to_string(),
                decision: ApprovalDecision::Approved,
                comments: Some("margin ok".to_string()),
            },
        )
        .await
        .map_err(|error| format!("approve: {error}"))?;
    require_eq!(approved.approval_status, Some(ApprovalStatus::Approved));

    let sent = service
        .transition_status(&quotation.id, QuotationStatus::Sent, "sales-1")
        .await
        .map_err(|error| format!("send: {error}"))?;
    require_eq!(sent.status, QuotationStatus::Sent);

    let approvals =
        store.list_approvals(&quotation.id).await.map_err(|error| format!("approvals: {error}"))?;
    require_eq!(approvals.len(), 1);
    require_eq!(approvals[0].approver_id.as_str(), "mgr-7");

    let trail = store
        .list_entries(EntityKind::Quotation, &quotation.id.0)
        .await
        .map_err(|error| format!("trail: {error}"))?;
    let actions: Vec<AuditAction> = trail.iter().map(|entry| entry.event.action).collect();
    require_eq!(
        actions,
        vec![
            AuditAction::GenerateFromEnquiry,
            AuditAction::TransitionRejected,
            AuditAction::ApprovalDecision,
            AuditAction::StatusTransition,
        ]
    );
    require!(verify_trail(&trail).valid, "trail with rejected attempt should verify");
    Ok(())
}

#[tokio::test]
async fn stale_version_rolls_back_whole_unit_of_work() -> StoreContractResult {
    let (store, service) = seeded_service().await?;
    let quotation = service
        .generate_from_enquiry(&enquiry("ENQ-DEMO-001"), "sales-1")
        .await
        .map_err(|error| format!("generate: {error}"))?;

    let mut edited = quotation.next_version(Utc::now());
    edited.notes = Some("first writer".to_string());
    store
        .commit(UnitOfWork::new().update_quotation(edited.clone(), quotation.version))
        .await
        .map_err(|error| format!("first update: {error}"))?;

    let loser = UnitOfWork::new().update_quotation(edited, quotation.version).audit(AuditEvent::new(
        EntityKind::Quotation,
        quotation.id.0.clone(),
        AuditAction::UpdateDiscount,
        Some("sales-2".to_string()),
        AuditOutcome::Success,
    ));
    let conflict = store.commit(loser).await;
    require!(
        matches!(conflict, Err(StoreError::Conflict { entity: EntityKind::Quotation, .. })),
        "stale write should conflict, got {conflict:?}"
    );

    let trail = store
        .list_entries(EntityKind::Quotation, &quotation.id.0)
        .await
        .map_err(|error| format!("trail: {error}"))?;
    require_eq!(trail.len(), 1);
    Ok(())
}

#[tokio::test]
async fn quote_number_sequence_is_per_year() -> StoreContractResult {
    let (store, _service) = seeded_service().await?;

    let first = store.next_value(2026).await.map_err(|error| format!("next: {error}"))?;
    let second = store.next_value(2026).await.map_err(|error| format!("next: {error}"))?;
    let other_year = store.next_value(2027).await.map_err(|error| format!("next: {error}"))?;

    require_eq!((first, second, other_year), (1, 2, 1));
    Ok(())
}

#[tokio::test]
async fn expiry_sweep_reads_overdue_heads_from_sqlite() -> StoreContractResult {
    let (store, service) = seeded_service().await?;
    let quotation = service
        .generate_from_enquiry(&enquiry("ENQ-DEMO-002"), "sales-1")
        .await
        .map_err(|error| format!("generate: {error}"))?;

    let before_due = store
        .list_expirable(quotation.valid_until)
        .await
        .map_err(|error| format!("expirable: {error}"))?;
    require!(before_due.is_empty(), "quotation is not overdue at valid_until");

    let sweep = service
        .expire_overdue(quotation.valid_until + Duration::seconds(1))
        .await
        .map_err(|error| format!("sweep: {error}"))?;
    require_eq!(sweep.expired, vec![quotation.id.clone()]);

    let expired =
        service.find_quotation(&quotation.id).await.map_err(|error| format!("find: {error}"))?;
    require_eq!(expired.status, QuotationStatus::Expired);

    let missing = service.find_quotation(&QuotationId("missing".to_string())).await;
    require!(matches!(missing, Err(ApplicationError::NotFound { .. })));
    Ok(())
}

#[tokio::test]
async fn enquiry_listing_orders_revisions_numerically() -> StoreContractResult {
    let (store, service) = seeded_service().await?;
    let original = service
        .generate_from_enquiry(&enquiry("ENQ-DEMO-001"), "sales-1")
        .await
        .map_err(|error| format!("generate: {error}"))?;

    let mut work = UnitOfWork::new();
    for revision in [100, 99] {
        let mut copy = original.clone();
        copy.id = QuotationId(format!("QTN-REV-{revision}"));
        copy.revision = revision;
        copy.parent_quotation_id = Some(original.id.clone());
        copy.quote_number = original.quote_number.for_revision(revision);
        copy.is_superseded = true;
        copy.items.clear();
        work = work.insert_quotation(copy);
    }
    store.commit(work).await.map_err(|error| format!("commit: {error}"))?;

    let revisions: Vec<u32> = store
        .list_for_enquiry(&enquiry("ENQ-DEMO-001"))
        .await
        .map_err(|error| format!("list: {error}"))?
        .iter()
        .map(|quotation| quotation.revision)
        .collect();
    require_eq!(revisions, vec![1, 99, 100]);
    Ok(())
}

const CONTENDERS: usize = 8;

/// Runs `CONTENDERS` copies of `operation` released together by a barrier.
async fn race<T, F, Fut>(
    service: &QuotationService<SqlQuotationStore>,
    operation: F,
) -> StoreContractResult<Vec<Result<T, ApplicationError>>>
where
    T: Send + 'static,
    F: Fn(QuotationService<SqlQuotationStore>) -> Fut,
    Fut: std::future::Future<Output = Result<T, ApplicationError>> + Send + 'static,
{
    let barrier = Arc::new(Barrier::new(CONTENDERS));
    let mut handles = Vec::with_capacity(CONTENDERS);
    for _ in 0..CONTENDERS {
        let barrier = Arc::clone(&barrier);
        let attempt = operation(service.clone());
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            attempt.await
        }));
    }

    let mut outcomes = Vec::with_capacity(CONTENDERS);
    for handle in handles {
        outcomes.push(handle.await.map_err(|error| format!("join: {error}"))?);
    }
    Ok(outcomes)
}

fn file_database_url(dir: &tempfile::TempDir) -> String {
    format!("sqlite://{}?mode=rwc", dir.path().join("enquote.db").display())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_generation_on_one_enquiry_yields_one_quotation() -> StoreContractResult {
    let dir = tempfile::tempdir().map_err(|error| format!("temp dir: {error}"))?;
    let (store, service) = seeded_service_at(&file_database_url(&dir), 8).await?;

    let outcomes = race(&service, |service| async move {
        service.generate_from_enquiry(&enquiry("ENQ-DEMO-001"), "sales-1").await
    })
    .await?;

    let winners = outcomes.iter().filter(|outcome| outcome.is_ok()).count();
    require_eq!(winners, 1);
    for outcome in &outcomes {
        if let Err(error) = outcome {
            require!(
                matches!(
                    error,
                    ApplicationError::ConcurrencyConflict { .. }
                        | ApplicationError::Domain(DomainError::EnquiryAlreadyQuoted { .. })
                ),
                "losing generation should be a conflict, got {error:?}"
            );
        }
    }

    let quotations = store
        .list_for_enquiry(&enquiry("ENQ-DEMO-001"))
        .await
        .map_err(|error| format!("list: {error}"))?;
    require_eq!(quotations.len(), 1);
    let trail = store
        .list_entries(EntityKind::Enquiry, "ENQ-DEMO-001")
        .await
        .map_err(|error| format!("enquiry trail: {error}"))?;
    require_eq!(trail.len(), 1);
    require!(verify_trail(&trail).valid, "enquiry trail should verify");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_generation_across_enquiries_issues_distinct_numbers() -> StoreContractResult {
    let dir = tempfile::tempdir().map_err(|error| format!("temp dir: {error}"))?;
    let (_store, service) = seeded_service_at(&file_database_url(&dir), 8).await?;

    let mut handles = Vec::new();
    for id in ["ENQ-DEMO-001", "ENQ-DEMO-002", "ENQ-DEMO-003"] {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            service.generate_from_enquiry(&enquiry(id), "sales-1").await
        }));
    }

    let mut numbers = HashSet::new();
    for handle in handles {
        let quotation = handle
            .await
            .map_err(|error| format!("join: {error}"))?
            .map_err(|error| format!("generate: {error}"))?;
        numbers.insert(quotation.quote_number.0);
    }
    require_eq!(numbers.len(), 3);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_sends_apply_exactly_once() -> StoreContractResult {
    let dir = tempfile::tempdir().map_err(|error| format!("temp dir: {error}"))?;
    let (store, service) = seeded_service_at(&file_database_url(&dir), 8).await?;
    let quotation = service
        .generate_from_enquiry(&enquiry("ENQ-DEMO-001"), "sales-1")
        .await
        .map_err(|error| format!("generate: {error}"))?;

    let id = quotation.id.clone();
    let outcomes = race(&service, move |service| {
        let id = id.clone();
        async move { service.transition_status(&id, QuotationStatus::Sent, "sales-1").await }
    })
    .await?;

    let winners = outcomes.iter().filter(|outcome| outcome.is_ok()).count();
    require_eq!(winners, 1);
    for outcome in &outcomes {
        if let Err(error) = outcome {
            require!(
                matches!(
                    error,
                    ApplicationError::ConcurrencyConflict { .. }
                        | ApplicationError::Domain(DomainError::InvalidTransition { .. })
                ),
                "losing send should be a conflict, got {error:?}"
            );
        }
    }

    let stored =
        service.find_quotation(&quotation.id).await.map_err(|error| format!("find: {error}"))?;
    require_eq!(stored.status, QuotationStatus::Sent);
    require_eq!(stored.version, quotation.version + 1);

    let trail = store
        .list_entries(EntityKind::Quotation, &quotation.id.0)
        .await
        .map_err(|error| format!("trail: {error}"))?;
    let applied = trail
        .iter()
        .filter(|entry| entry.event.action == AuditAction::StatusTransition)
        .count();
    require_eq!(applied, 1);
    require!(verify_trail(&trail).valid, "quotation trail should verify");
    Ok(())
}
