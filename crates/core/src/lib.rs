pub mod audit;
pub mod config;
pub mod cpq;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod lifecycle;
pub mod store;

pub use audit::{verify_trail, AuditAction, AuditEntry, AuditEvent, AuditOutcome, TrailVerification};
pub use config::{AppConfig, ConfigError, ConfigOverrides, LoadOptions};
pub use cpq::{ApprovalCandidate, ApprovalRequirement, PricingCalculator, QuotationTotals};
pub use domain::approval::{ApprovalDecision, ApprovalRule, ApprovalRuleId, QuotationApproval};
pub use domain::customer::{Customer, CustomerId, CustomerType};
pub use domain::enquiry::{Enquiry, EnquiryId, EnquiryItem, EnquiryStatus};
pub use domain::quotation::{
    ApprovalStatus, Quotation, QuotationId, QuotationItem, QuotationItemId, QuotationStatus,
    QuoteNumber,
};
pub use errors::{ApplicationError, DomainError, EntityKind, InterfaceError};
pub use flows::{StatusMachine, TransitionOutcome, TransitionTrigger};
pub use lifecycle::{
    AcceptanceHook, ApprovalDecisionInput, Clock, ExpirySweep, FixedClock, HookError, ItemUpdate,
    LifecycleSettings, LifecycleStore, LoggingAcceptanceHook, QuotationHistory, QuotationService,
    SystemClock,
};
pub use store::{
    AuditRecorder, InMemoryQuotationStore, Mutation, QuotationStore, QuoteNumberSequence,
    StoreError, UnitOfWork,
};
