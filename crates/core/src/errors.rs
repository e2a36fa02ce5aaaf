use thiserror::Error;

use crate::{
    builder::ContextBuildError, domain::submission::SubmissionError, flows::FlowTransitionError,
    registry::RegistryError,
};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error(transparent)]
    Submission(#[from] SubmissionError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    FlowTransition(#[from] FlowTransitionError),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    ContextBuild(#[from] ContextBuildError),
    #[error("integration failure: {0}")]
    Integration(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, correlation_id: String },
    #[error("too many requests: {message}")]
    TooManyRequests { message: String, correlation_id: String, retry_after_secs: u64 },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::NotFound { .. } => "The requested call job was not found or has expired.",
            Self::Conflict { .. } => "The call job is not in a state that allows this change.",
            Self::TooManyRequests { .. } => "Too many call requests. Please wait and try again.",
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::Conflict { correlation_id, .. }
            | Self::TooManyRequests { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
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
            | InterfaceError::TooManyRequests { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let unassigned = || "unassigned".to_owned();
        match value {
            ApplicationError::Domain(DomainError::Submission(error)) => {
                Self::BadRequest { message: error.to_string(), correlation_id: unassigned() }
            }
            ApplicationError::Domain(DomainError::Registry(error)) => match error {
                RegistryError::JobNotFound(_) => {
                    Self::NotFound { message: error.to_string(), correlation_id: unassigned() }
                }
                RegistryError::InvalidTransition { .. } => {
                    Self::Conflict { message: error.to_string(), correlation_id: unassigned() }
                }
            },
            ApplicationError::Domain(DomainError::FlowTransition(_))
            | ApplicationError::Domain(DomainError::InvariantViolation(_)) => Self::BadRequest {
                message: "domain validation failed".to_owned(),
                correlation_id: unassigned(),
            },
            ApplicationError::ContextBuild(error) => Self::ServiceUnavailable {
                message: error.to_string(),
                correlation_id: unassigned(),
            },
            ApplicationError::Integration(message) => {
                Self::ServiceUnavailable { message, correlation_id: unassigned() }
            }
            ApplicationError::Configuration(message) => {
                Self::Internal { message, correlation_id: unassigned() }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::job::{JobId, JobStatus};
    use crate::domain::submission::SubmissionError;
    use crate::errors::{ApplicationError, DomainError, InterfaceError};
    use crate::registry::RegistryError;

    #[test]
    fn validation_error_maps_to_bad_request_with_details() {
        let interface = ApplicationError::from(DomainError::from(SubmissionError::TooManyLeads(6)))
            .into_interface("req-1");

        assert!(matches!(
            interface,
            InterfaceError::BadRequest {
                ref correlation_id,
                ref message,
            } if correlation_id == "req-1" && message.contains("maximum 5 leads")
        ));
    }

    #[test]
    fn missing_job_maps_to_not_found() {
        let interface = ApplicationError::from(DomainError::from(RegistryError::JobNotFound(
            JobId("job-1".to_owned()),
        )))
        .into_interface("req-2");

        assert!(matches!(interface, InterfaceError::NotFound { .. }));
        assert_eq!(interface.correlation_id(), "req-2");
        assert_eq!(
            interface.user_message(),
            "The requested call job was not found or has expired."
        );
    }

    #[test]
    fn invalid_transition_maps_to_conflict() {
        let interface = ApplicationError::from(DomainError::from(
            RegistryError::InvalidTransition {
                job_id: JobId("job-1".to_owned()),
                from: JobStatus::Pending,
                to: JobStatus::InProgress,
            },
        ))
        .into_interface("req-3");

        assert!(matches!(interface, InterfaceError::Conflict { .. }));
    }

    #[test]
    fn configuration_error_maps_to_internal() {
        let interface = ApplicationError::Configuration("invalid telephony token".to_owned())
            .into_interface("req-4");

        assert!(matches!(interface, InterfaceError::Internal { .. }));
        assert_eq!(interface.user_message(), "An unexpected internal error occurred.");
    }
}
