pub mod audit;
pub mod builder;
pub mod config;
pub mod dispatch;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod registry;

pub use audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink};
pub use builder::{ContextBuildError, ContextBundleBuilder, TemplateContextBuilder};
pub use dispatch::{
    BatchDispatchResponse, DialRequest, DispatchEntry, DispatchEntryStatus, DispatchError,
    DispatchOrchestrator, TelephonyDialer,
};
pub use domain::call::{CallOutcome, CallResult};
pub use domain::context::{ContextBundle, ContextBundleId};
pub use domain::job::{CallJob, DispatchHandle, JobId, JobStatus};
pub use domain::lead::Lead;
pub use domain::submission::{CallGoal, Campaign, Submission, SubmissionRequest};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use flows::{CallState, ConversationEngine, ConversationLimits, Phase, SignalDetector};
pub use registry::{spawn_sweeper, ContextStore, JobRegistry, RegistryError};
