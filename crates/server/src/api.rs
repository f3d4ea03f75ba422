//! JSON endpoints over the quotation lifecycle.
//!
//! Every failure is rendered as `{error, error_class, correlation_id}`. Callers may pass
//! `x-correlation-id`; otherwise one is minted per request.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use enquote_core::cpq::ApprovalCandidate;
use enquote_core::domain::customer::CustomerType;
use enquote_core::domain::enquiry::EnquiryId;
use enquote_core::domain::quotation::{Quotation, QuotationId, QuotationItemId, QuotationStatus};
use enquote_core::errors::{ApplicationError, DomainError, InterfaceError};
use enquote_core::lifecycle::{ApprovalDecisionInput, ExpirySweep, ItemUpdate, QuotationHistory};

use crate::bootstrap::Service;

pub const CORRELATION_HEADER: &str = "x-correlation-id";

#[derive(Clone)]
pub struct ApiState {
    service: Service,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub error_class: String,
    pub correlation_id: String,
}

type ApiError = (StatusCode, Json<ErrorBody>);
type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    pub enquiry_id: String,
    pub actor_id: String,
}

#[derive(Debug, Deserialize)]
pub struct RevisionRequest {
    pub reason: String,
    pub actor_id: String,
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub target_status: QuotationStatus,
    pub actor_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ItemUpdateRequest {
    pub actor_id: String,
    #[serde(flatten)]
    pub update: ItemUpdate,
}

#[derive(Debug, Deserialize)]
pub struct DiscountRequest {
    pub discount_percentage: Decimal,
    pub actor_id: String,
}

#[derive(Debug, Deserialize)]
pub struct RequiredApprovalQuery {
    pub total_amount: Decimal,
    #[serde(default)]
    pub discount_percentage: Option<Decimal>,
    pub customer_type: CustomerType,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RequiredApprovalResponse {
    pub required_approval_level: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ExpireQuery {
    #[serde(default)]
    pub as_of: Option<DateTime<Utc>>,
}

pub fn router(service: Service) -> Router {
    Router::new()
        .route("/api/v1/quotations/generate", post(generate_quotation))
        .route("/api/v1/quotations/expire-overdue", post(expire_overdue))
        .route("/api/v1/quotations/{id}", get(get_quotation))
        .route("/api/v1/quotations/{id}/revisions", post(create_revision).get(revision_chain))
        .route("/api/v1/quotations/{id}/status", patch(transition_status))
        .route("/api/v1/quotations/{id}/history", get(quotation_history))
        .route("/api/v1/quotations/{id}/approvals", post(record_approval))
        .route("/api/v1/quotations/{id}/items/{item_id}", patch(update_item))
        .route("/api/v1/quotations/{id}/discount", patch(update_discount))
        .route("/api/v1/approvals/required", get(required_approval))
        .with_state(ApiState { service })
}

async fn generate_quotation(
    State(state): State<ApiState>,
    headers: HeaderMap,
    payload: Result<Json<GenerateRequest>, JsonRejection>,
) -> ApiResult<Quotation> {
    let correlation_id = correlation_id(&headers);
    let request = json_body(payload, &correlation_id)?;

    let quotation = state
        .service
        .generate_from_enquiry(&EnquiryId(request.enquiry_id), &request.actor_id)
        .await
        .map_err(|error| reject("generate_quotation", error, &correlation_id))?;

    info!(
        event_name = "api.quotation.generated",
        correlation_id = %correlation_id,
        quotation_id = %quotation.id,
        quote_number = %quotation.quote_number,
        "quotation generated"
    );
    Ok(Json(quotation))
}

async fn create_revision(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    payload: Result<Json<RevisionRequest>, JsonRejection>,
) -> ApiResult<Quotation> {
    let correlation_id = correlation_id(&headers);
    let request = json_body(payload, &correlation_id)?;

    state
        .service
        .create_revision(&QuotationId(id), &request.reason, &request.actor_id)
        .await
        .map(Json)
        .map_err(|error| reject("create_revision", error, &correlation_id))
}

async fn revision_chain(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Vec<Quotation>> {
    let correlation_id = correlation_id(&headers);
    state
        .service
        .revision_chain(&QuotationId(id))
        .await
        .map(Json)
        .map_err(|error| reject("revision_chain", error, &correlation_id))
}

async fn transition_status(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    payload: Result<Json<StatusRequest>, JsonRejection>,
) -> ApiResult<Quotation> {
    let correlation_id = correlation_id(&headers);
    let request = json_body(payload, &correlation_id)?;

    state
        .service
        .transition_status(&QuotationId(id), request.target_status, &request.actor_id)
        .await
        .map(Json)
        .map_err(|error| reject("transition_status", error, &correlation_id))
}

async fn get_quotation(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Quotation> {
    let correlation_id = correlation_id(&headers);
    state
        .service
        .find_quotation(&QuotationId(id))
        .await
        .map(Json)
        .map_err(|error| reject("get_quotation", error, &correlation_id))
}

async fn quotation_history(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<QuotationHistory> {
    let correlation_id = correlation_id(&headers);
    state
        .service
        .quotation_history(&QuotationId(id))
        .await
        .map(Json)
        .map_err(|error| reject("quotation_history", error, &correlation_id))
}

async fn record_approval(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    payload: Result<Json<ApprovalDecisionInput>, JsonRejection>,
) -> ApiResult<Quotation> {
    let correlation_id = correlation_id(&headers);
    let decision = json_body(payload, &correlation_id)?;

    state
        .service
        .record_approval_decision(&QuotationId(id), decision)
        .await
        .map(Json)
        .map_err(|error| reject("record_approval", error, &correlation_id))
}

async fn update_item(
    State(state): State<ApiState>,
    Path((id, item_id)): Path<(String, String)>,
    headers: HeaderMap,
    payload: Result<Json<ItemUpdateRequest>, JsonRejection>,
) -> ApiResult<Quotation> {
    let correlation_id = correlation_id(&headers);
    let request = json_body(payload, &correlation_id)?;

    state
        .service
        .update_item(&QuotationId(id), &QuotationItemId(item_id), request.update, &request.actor_id)
        .await
        .map(Json)
        .map_err(|error| reject("update_item", error, &correlation_id))
}

async fn update_discount(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    payload: Result<Json<DiscountRequest>, JsonRejection>,
) -> ApiResult<Quotation> {
    let correlation_id = correlation_id(&headers);
    let request = json_body(payload, &correlation_id)?;

    state
        .service
        .update_discount(&QuotationId(id), request.discount_percentage, &request.actor_id)
        .await
        .map(Json)
        .map_err(|error| reject("update_discount", error, &correlation_id))
}

async fn required_approval(
    State(state): State<ApiState>,
    headers: HeaderMap,
    query: Result<Query<RequiredApprovalQuery>, QueryRejection>,
) -> ApiResult<RequiredApprovalResponse> {
    let correlation_id = correlation_id(&headers);
    let Query(query) = query.map_err(|rejection| {
        malformed("required_approval", rejection.body_text(), &correlation_id)
    })?;

    let candidate = ApprovalCandidate {
        total_amount: query.total_amount,
        discount_percentage: query.discount_percentage.unwrap_or(Decimal::ZERO),
        customer_type: query.customer_type,
    };
    let required_approval_level = state
        .service
        .required_approval(&candidate)
        .await
        .map_err(|error| reject("required_approval", error, &correlation_id))?;

    Ok(Json(RequiredApprovalResponse { required_approval_level }))
}

async fn expire_overdue(
    State(state): State<ApiState>,
    headers: HeaderMap,
    query: Result<Query<ExpireQuery>, QueryRejection>,
) -> ApiResult<ExpirySweep> {
    let correlation_id = correlation_id(&headers);
    let Query(query) = query
        .map_err(|rejection| malformed("expire_overdue", rejection.body_text(), &correlation_id))?;

    let as_of = query.as_of.unwrap_or_else(Utc::now);
    let sweep = state
        .service
        .expire_overdue(as_of)
        .await
        .map_err(|error| reject("expire_overdue", error, &correlation_id))?;

    info!(
        event_name = "api.quotation.expiry_swept",
        correlation_id = %correlation_id,
        expired = sweep.expired.len(),
        skipped = sweep.skipped.len(),
        "expiry sweep finished"
    );
    Ok(Json(sweep))
}

fn correlation_id(headers: &HeaderMap) -> String {
    headers
        .get(CORRELATION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn json_body<T>(
    payload: Result<Json<T>, JsonRejection>,
    correlation_id: &str,
) -> Result<T, ApiError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| malformed("decode_body", rejection.body_text(), correlation_id))
}

fn malformed(operation: &'static str, detail: String, correlation_id: &str) -> ApiError {
    reject(operation, DomainError::invalid_input("body", detail).into(), correlation_id)
}

fn reject(operation: &'static str, error: ApplicationError, correlation_id: &str) -> ApiError {
    let interface = error.into_interface(correlation_id);
    let status = status_for(&interface);

    if status.is_server_error() {
        warn!(
            event_name = "api.request.failed",
            correlation_id = %correlation_id,
            operation,
            error_class = interface.error_class(),
            error = %interface,
            "request failed"
        );
    } else {
        info!(
            event_name = "api.request.rejected",
            correlation_id = %correlation_id,
            operation,
            error_class = interface.error_class(),
            status = status.as_u16(),
            "request rejected"
        );
    }

    let body = ErrorBody {
        error: interface.detail().to_string(),
        error_class: interface.error_class().to_string(),
        correlation_id: interface.correlation_id().to_string(),
    };
    (status, Json(body))
}

fn status_for(error: &InterfaceError) -> StatusCode {
    match error {
        InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
        InterfaceError::NotFound { .. } => StatusCode::NOT_FOUND,
        InterfaceError::Conflict { .. } => StatusCode::CONFLICT,
        InterfaceError::Unprocessable { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use axum::Router;
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;
    use serde::de::DeserializeOwned;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use enquote_core::domain::quotation::{ApprovalStatus, Quotation, QuotationStatus};
    use enquote_core::lifecycle::{ExpirySweep, FixedClock, LifecycleSettings, QuotationService};
    use enquote_db::{connect_with_settings, migrations, DemoSeedDataset, SqlQuotationStore};

    use super::{router, ErrorBody, RequiredApprovalResponse, CORRELATION_HEADER};

    async fn seeded_router() -> Router {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");
        DemoSeedDataset::load(&pool).await.expect("seed");

        let now = Utc.with_ymd_and_hms(2026, 5, 4, 10, 30, 0).single().expect("fixed clock");
        let service = QuotationService::new(
            Arc::new(SqlQuotationStore::new(pool)),
            LifecycleSettings::default(),
        )
        .with_clock(Arc::new(FixedClock(now)));
        router(service)
    }

    async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Vec<u8>) {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(CORRELATION_HEADER, "test-correlation");
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .expect("request"),
            None => builder.body(Body::empty()).expect("request"),
        };

        let response = app.clone().oneshot(request).await.expect("router response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("response body");
        (status, bytes.to_vec())
    }

    fn decode<T: DeserializeOwned>(bytes: &[u8]) -> T {
        serde_json::from_slice(bytes).expect("json response")
    }

    async fn generate(app: &Router, enquiry_id: &str) -> Quotation {
        let (status, body) = send(
            app,
            "POST",
            "/api/v1/quotations/generate",
            Some(json!({"enquiry_id": enquiry_id, "actor_id": "sales-1"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{}", String::from_utf8_lossy(&body));
        decode(&body)
    }

    #[tokio::test]
    async fn generate_returns_priced_draft() {
        let app = seeded_router().await;

        let quotation = generate(&app, "ENQ-DEMO-001").await;

        assert_eq!(quotation.quote_number.0, "QT-2026-0001");
        assert_eq!(quotation.status, QuotationStatus::Draft);
        assert_eq!(quotation.subtotal, Decimal::new(340, 0));
        assert_eq!(quotation.total_amount, Decimal::new(357, 0));

        let (status, body) =
            send(&app, "GET", &format!("/api/v1/quotations/{}", quotation.id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(decode::<Quotation>(&body), quotation);
    }

    #[tokio::test]
    async fn errors_carry_class_and_correlation_id() {
        let app = seeded_router().await;

        let (status, body) = send(
            &app,
            "POST",
            "/api/v1/quotations/generate",
            Some(json!({"enquiry_id": "ENQ-MISSING", "actor_id": "sales-1"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let error: ErrorBody = decode(&body);
        assert_eq!(error.error_class, "not_found");
        assert_eq!(error.correlation_id, "test-correlation");
        assert!(error.error.contains("ENQ-MISSING"));

        generate(&app, "ENQ-DEMO-001").await;
        let (status, body) = send(
            &app,
            "POST",
            "/api/v1/quotations/generate",
            Some(json!({"enquiry_id": "ENQ-DEMO-001", "actor_id": "sales-1"})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(decode::<ErrorBody>(&body).error_class, "enquiry_already_quoted");
    }

    #[tokio::test]
    async fn malformed_bodies_are_bad_requests() {
        let app = seeded_router().await;

        let (status, body) = send(
            &app,
            "POST",
            "/api/v1/quotations/generate",
            Some(json!({"enquiry": "ENQ-DEMO-001"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(decode::<ErrorBody>(&body).error_class, "invalid_input");

        let quotation = generate(&app, "ENQ-DEMO-001").await;
        let (status, _) = send(
            &app,
            "PATCH",
            &format!("/api/v1/quotations/{}/status", quotation.id),
            Some(json!({"target_status": "archived", "actor_id": "sales-1"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn status_changes_respect_approval_gate_and_state_machine() {
        let app = seeded_router().await;
        let quotation = generate(&app, "ENQ-DEMO-003").await;
        assert_eq!(quotation.approval_status, Some(ApprovalStatus::Pending));
        let status_uri = format!("/api/v1/quotations/{}/status", quotation.id);

        let (status, body) = send(
            &app,
            "PATCH",
            &status_uri,
            Some(json!({"target_status": "sent", "actor_id": "sales-1"})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(decode::<ErrorBody>(&body).error_class, "approval_pending");

        let (status, body) = send(
            &app,
            "PATCH",
            &status_uri,
            Some(json!({"target_status": "accepted", "actor_id": "sales-1"})),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(decode::<ErrorBody>(&body).error_class, "invalid_transition");

        let (status, _) = send(
            &app,
            "POST",
            &format!("/api/v1/quotations/{}/approvals", quotation.id),
            Some(json!({
                "approver_level": "Manager",
                "approver_id": "mgr-7",
                "decision": "approved",
                "comments": "margin ok"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(
            &app,
            "PATCH",
            &status_uri,
            Some(json!({"target_status": "sent", "actor_id": "sales-1"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(decode::<Quotation>(&body).status, QuotationStatus::Sent);

        let (status, body) =
            send(&app, "GET", &format!("/api/v1/quotations/{}/history", quotation.id), None).await;
        assert_eq!(status, StatusCode::OK);
        let history: Value = decode(&body);
        assert_eq!(history["trail_verified"], json!(true));
        assert_eq!(history["approvals"].as_array().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn revisions_and_chain_are_exposed() {
        let app = seeded_router().await;
        let original = generate(&app, "ENQ-DEMO-001").await;

        let (status, body) = send(
            &app,
            "POST",
            &format!("/api/v1/quotations/{}/revisions", original.id),
            Some(json!({"reason": "price correction", "actor_id": "sales-1"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let revision: Quotation = decode(&body);
        assert_eq!(revision.revision, 2);
        assert_eq!(revision.parent_quotation_id.as_ref(), Some(&original.id));

        let (status, body) = send(
            &app,
            "GET",
            &format!("/api/v1/quotations/{}/revisions", revision.id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let chain: Vec<Quotation> = decode(&body);
        assert_eq!(chain.len(), 2);
        assert!(chain[0].is_superseded);

        let (status, body) = send(
            &app,
            "POST",
            &format!("/api/v1/quotations/{}/revisions", original.id),
            Some(json!({"reason": "again", "actor_id": "sales-1"})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(decode::<ErrorBody>(&body).error_class, "superseded");

        let (status, body) = send(
            &app,
            "POST",
            &format!("/api/v1/quotations/{}/revisions", revision.id),
            Some(json!({"reason": "  ", "actor_id": "sales-1"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(decode::<ErrorBody>(&body).error_class, "validation");
    }

    #[tokio::test]
    async fn draft_edits_reprice_the_quotation() {
        let app = seeded_router().await;
        let quotation = generate(&app, "ENQ-DEMO-001").await;
        let item_id = quotation.items[0].id.clone();

        let (status, body) = send(
            &app,
            "PATCH",
            &format!("/api/v1/quotations/{}/items/{}", quotation.id, item_id),
            Some(json!({"actor_id": "sales-1", "quantity": 4})),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{}", String::from_utf8_lossy(&body));
        let edited: Quotation = decode(&body);
        assert_eq!(edited.subtotal, Decimal::new(680, 0));
        assert_eq!(edited.total_amount, Decimal::new(714, 0));

        let (status, body) = send(
            &app,
            "PATCH",
            &format!("/api/v1/quotations/{}/discount", quotation.id),
            Some(json!({"actor_id": "sales-1", "discount_percentage": "10"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let discounted: Quotation = decode(&body);
        assert_eq!(discounted.discount_amount, Decimal::new(68, 0));
        assert!(discounted.totals_hold());
    }

    #[tokio::test]
    async fn oversized_item_cost_is_a_bad_request() {
        let app = seeded_router().await;
        let quotation = generate(&app, "ENQ-DEMO-001").await;
        let item_uri =
            format!("/api/v1/quotations/{}/items/{}", quotation.id, quotation.items[0].id);

        let (status, body) = send(
            &app,
            "PATCH",
            &item_uri,
            Some(json!({"actor_id": "sales-1", "cost_price": "50000000000000000000000000000"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(decode::<ErrorBody>(&body).error_class, "invalid_input");

        let (_, body) =
            send(&app, "GET", &format!("/api/v1/quotations/{}", quotation.id), None).await;
        assert_eq!(decode::<Quotation>(&body).total_amount, Decimal::new(357, 0));
    }

    #[tokio::test]
    async fn required_approval_reads_configured_rules() {
        let app = seeded_router().await;

        let (status, body) = send(
            &app,
            "GET",
            "/api/v1/approvals/required?total_amount=10000&customer_type=retail",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let response: RequiredApprovalResponse = decode(&body);
        assert_eq!(response.required_approval_level.as_deref(), Some("Manager"));

        let (_, body) = send(
            &app,
            "GET",
            "/api/v1/approvals/required?total_amount=100&customer_type=retail",
            None,
        )
        .await;
        assert_eq!(decode::<RequiredApprovalResponse>(&body).required_approval_level, None);

        let (status, _) =
            send(&app, "GET", "/api/v1/approvals/required?total_amount=lots", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn expire_overdue_sweeps_past_validity() {
        let app = seeded_router().await;
        let quotation = generate(&app, "ENQ-DEMO-002").await;

        let (status, body) = send(
            &app,
            "POST",
            "/api/v1/quotations/expire-overdue?as_of=2026-07-01T00:00:00Z",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let sweep: ExpirySweep = decode(&body);
        assert_eq!(sweep.expired, vec![quotation.id.clone()]);

        let (_, body) =
            send(&app, "GET", &format!("/api/v1/quotations/{}", quotation.id), None).await;
        assert_eq!(decode::<Quotation>(&body).status, QuotationStatus::Expired);
    }
}
