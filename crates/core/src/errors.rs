use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::enquiry::EnquiryId;
use crate::domain::quotation::{QuotationId, QuotationStatus};

/// Rule violations detected without touching storage.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("validation failed for `{field}`: {message}")]
    Validation { field: String, message: String },
    #[error("invalid input for `{field}`: {message}")]
    InvalidInput { field: String, message: String },
    #[error("quotation {quotation_id} cannot move from {from} to {to}")]
    InvalidTransition { quotation_id: QuotationId, from: QuotationStatus, to: QuotationStatus },
    #[error(
        "quotation {quotation_id} is awaiting {} approval",
        .required_level.as_deref().unwrap_or("pending")
    )]
    ApprovalPending { quotation_id: QuotationId, required_level: Option<String> },
    #[error("quotation {quotation_id} was rejected by its approver")]
    ApprovalRejected { quotation_id: QuotationId },
    #[error("quotation {quotation_id} has no pending approval")]
    ApprovalNotPending { quotation_id: QuotationId },
    #[error("quotation {quotation_id} has been superseded by a newer revision")]
    Superseded { quotation_id: QuotationId },
    #[error("quotation {quotation_id} is valid until {valid_until} and cannot expire yet")]
    NotYetExpired { quotation_id: QuotationId, valid_until: DateTime<Utc> },
    #[error("enquiry {enquiry_id} has already been quoted")]
    EnquiryAlreadyQuoted { enquiry_id: EnquiryId },
    #[error("quotation {quotation_id} in status {status} cannot be revised")]
    RevisionNotAllowed { quotation_id: QuotationId, status: QuotationStatus },
    #[error("quotation {quotation_id} in status {status} is not editable")]
    NotEditable { quotation_id: QuotationId, status: QuotationStatus },
}

impl DomainError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation { field: field.into(), message: message.into() }
    }

    pub fn invalid_input(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidInput { field: field.into(), message: message.into() }
    }

    /// Stable machine-readable class used in API payloads and audit metadata.
    pub fn error_class(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation",
            Self::InvalidInput { .. } => "invalid_input",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::ApprovalPending { .. } => "approval_pending",
            Self::ApprovalRejected { .. } => "approval_rejected",
            Self::ApprovalNotPending { .. } => "approval_not_pending",
            Self::Superseded { .. } => "superseded",
            Self::NotYetExpired { .. } => "not_yet_expired",
            Self::EnquiryAlreadyQuoted { .. } => "enquiry_already_quoted",
            Self::RevisionNotAllowed { .. } => "revision_not_allowed",
            Self::NotEditable { .. } => "not_editable",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Enquiry,
    Customer,
    Quotation,
    QuotationItem,
    QuotationApproval,
    QuoteNumber,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Enquiry => "enquiry",
            Self::Customer => "customer",
            Self::Quotation => "quotation",
            Self::QuotationItem => "quotation_item",
            Self::QuotationApproval => "quotation_approval",
            Self::QuoteNumber => "quote_number",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "enquiry" => Some(Self::Enquiry),
            "customer" => Some(Self::Customer),
            "quotation" => Some(Self::Quotation),
            "quotation_item" => Some(Self::QuotationItem),
            "quotation_approval" => Some(Self::QuotationApproval),
            "quote_number" => Some(Self::QuoteNumber),
            _ => None,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("{entity} {id} was not found")]
    NotFound { entity: EntityKind, id: String },
    #[error("{entity} {id} was modified concurrently: {detail}")]
    ConcurrencyConflict { entity: EntityKind, id: String, detail: String },
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

impl ApplicationError {
    pub fn not_found(entity: EntityKind, id: impl fmt::Display) -> Self {
        Self::NotFound { entity, id: id.to_string() }
    }

    pub fn error_class(&self) -> &'static str {
        match self {
            Self::Domain(error) => error.error_class(),
            Self::NotFound { .. } => "not_found",
            Self::ConcurrencyConflict { .. } => "concurrency_conflict",
            Self::Persistence(_) => "persistence",
            Self::Configuration(_) => "configuration",
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { error_class: &'static str, message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { error_class: &'static str, message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { error_class: &'static str, message: String, correlation_id: String },
    #[error("unprocessable: {message}")]
    Unprocessable { error_class: &'static str, message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { error_class: &'static str, message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { error_class: &'static str, message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::NotFound { .. } => "The requested record does not exist.",
            Self::Conflict { .. } => {
                "The record changed or is not in a state that allows this action."
            }
            Self::Unprocessable { .. } => "The requested status change is not allowed.",
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn error_class(&self) -> &'static str {
        match self {
            Self::BadRequest { error_class, .. }
            | Self::NotFound { error_class, .. }
            | Self::Conflict { error_class, .. }
            | Self::Unprocessable { error_class, .. }
            | Self::ServiceUnavailable { error_class, .. }
            | Self::Internal { error_class, .. } => error_class,
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::Conflict { correlation_id, .. }
            | Self::Unprocessable { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }

    pub fn detail(&self) -> &str {
        match self {
            Self::BadRequest { message, .. }
            | Self::NotFound { message, .. }
            | Self::Conflict { message, .. }
            | Self::Unprocessable { message, .. }
            | Self::ServiceUnavailable { message, .. }
            | Self::Internal { message, .. } => message,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::Conflict { correlation_id: id, .. }
            | InterfaceError::Unprocessable { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let error_class = value.error_class();
        let message = value.to_string();
        let correlation_id = "unassigned".to_owned();
        match value {
            ApplicationError::Domain(DomainError::InvalidTransition { .. }) => {
                Self::Unprocessable { error_class, message, correlation_id }
            }
            ApplicationError::Domain(
                DomainError::ApprovalPending { .. }
                | DomainError::ApprovalRejected { .. }
                | DomainError::ApprovalNotPending { .. }
                | DomainError::Superseded { .. }
                | DomainError::EnquiryAlreadyQuoted { .. }
                | DomainError::RevisionNotAllowed { .. }
                | DomainError::NotEditable { .. }
                | DomainError::NotYetExpired { .. },
            )
            | ApplicationError::ConcurrencyConflict { .. } => {
                Self::Conflict { error_class, message, correlation_id }
            }
            ApplicationError::Domain(
                DomainError::Validation { .. } | DomainError::InvalidInput { .. },
            ) => Self::BadRequest { error_class, message, correlation_id },
            ApplicationError::NotFound { .. } => {
                Self::NotFound { error_class, message, correlation_id }
            }
            ApplicationError::Persistence(_) => {
                Self::ServiceUnavailable { error_class, message, correlation_id }
            }
            ApplicationError::Configuration(_) => {
                Self::Internal { error_class, message, correlation_id }
            }
        }
    }
}
