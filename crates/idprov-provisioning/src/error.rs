//! Provisioning Errors
//!
//! Two layers:
//! - `StoreError` is raised by store adapters and names the resource it
//!   concerns. Duplicate inserts come back as `AlreadyExists` so callers
//!   never compare provider error codes.
//! - `ProvisioningError` is what a provisioning operation returns: either a
//!   validation failure of the request itself, or the ordered list of
//!   per-resource failures left after every independent step was attempted.
//!
//! # Creating Errors with Details
//!
//! ```ignore
//! use idprov_provisioning::{details, ProvisioningError};
//!
//! ProvisioningError::validation_with_details(
//!     "INVALID_EMAIL_FORMAT",
//!     "Invalid email address format",
//!     details! { "email" => email },
//! );
//! ```

use std::collections::HashMap;

use idprov_common::{FailureKind, Resource, ResourceFailure};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Macro for creating error detail maps.
#[macro_export]
macro_rules! details {
    () => {
        std::collections::HashMap::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut map = std::collections::HashMap::new();
        $(
            map.insert($key.to_string(), serde_json::json!($value));
        )+
        map
    }};
}

// ============================================================================
// Store boundary
// ============================================================================

/// Error returned by a store adapter call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Insert hit the uniqueness constraint of the resource
    #[error("{resource} already exists: {key}")]
    AlreadyExists { resource: Resource, key: String },

    /// Update or delete addressed a key with no record
    #[error("{resource} not found: {key}")]
    NotFound { resource: Resource, key: String },

    /// Permanent failure: malformed input or violated constraint
    #[error("{resource} rejected: {message}")]
    Rejected { resource: Resource, message: String },

    /// Transient failure: timeout, connection error, 5xx
    #[error("{resource} unavailable: {message}")]
    Unavailable { resource: Resource, message: String },
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

impl StoreError {
    pub fn already_exists(resource: Resource, key: impl Into<String>) -> Self {
        Self::AlreadyExists { resource, key: key.into() }
    }

    pub fn not_found(resource: Resource, key: impl Into<String>) -> Self {
        Self::NotFound { resource, key: key.into() }
    }

    pub fn rejected(resource: Resource, message: impl Into<String>) -> Self {
        Self::Rejected { resource, message: message.into() }
    }

    pub fn unavailable(resource: Resource, message: impl Into<String>) -> Self {
        Self::Unavailable { resource, message: message.into() }
    }

    pub fn resource(&self) -> Resource {
        match self {
            Self::AlreadyExists { resource, .. }
            | Self::NotFound { resource, .. }
            | Self::Rejected { resource, .. }
            | Self::Unavailable { resource, .. } => *resource,
        }
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }

    /// Convert into an outbound failure entry.
    ///
    /// `AlreadyExists` only reaches callers when it is a real conflict (a
    /// duplicate credential email), so it is reported as `Rejected`.
    pub fn into_failure(self) -> ResourceFailure {
        let resource = self.resource();
        let kind = match &self {
            Self::AlreadyExists { .. } | Self::Rejected { .. } => FailureKind::Rejected,
            Self::NotFound { .. } => FailureKind::NotFound,
            Self::Unavailable { .. } => FailureKind::Unavailable,
        };
        ResourceFailure::new(resource, kind, self.to_string())
    }
}

impl From<StoreError> for ResourceFailure {
    fn from(err: StoreError) -> Self {
        err.into_failure()
    }
}

// ============================================================================
// Operation outcome
// ============================================================================

/// Error returned by a provisioning operation.
///
/// Each variant maps to a suggested HTTP status code:
/// - `ValidationError` -> 400 Bad Request
/// - `Incomplete` -> 409 if any failure is `Rejected`, 404 if every failure
///   is `NotFound`, otherwise 503
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ProvisioningError {
    /// The request itself is invalid; nothing was written.
    ValidationError {
        code: String,
        message: String,
        #[serde(default)]
        details: HashMap<String, serde_json::Value>,
    },

    /// One or more resources could not be brought to the requested state.
    /// Earlier successful writes are kept; retrying the operation is safe.
    Incomplete {
        code: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        failures: Vec<ResourceFailure>,
    },
}

pub type ProvisioningResult<T> = std::result::Result<T, ProvisioningError>;

impl ProvisioningError {
    pub fn validation(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ValidationError {
            code: code.into(),
            message: message.into(),
            details: HashMap::new(),
        }
    }

    pub fn validation_with_details(
        code: impl Into<String>,
        message: impl Into<String>,
        details: HashMap<String, serde_json::Value>,
    ) -> Self {
        Self::ValidationError {
            code: code.into(),
            message: message.into(),
            details,
        }
    }

    /// Build an incomplete-operation error; the message lists the failures.
    pub fn incomplete(
        code: impl Into<String>,
        id: Option<String>,
        failures: Vec<ResourceFailure>,
    ) -> Self {
        let summary = failures
            .iter()
            .map(|f| format!("{} {:?}", f.resource, f.kind))
            .collect::<Vec<_>>()
            .join(", ");
        let message = match &id {
            Some(id) => format!("Identity '{}' is incomplete: {}", id, summary),
            None => format!("Operation failed: {}", summary),
        };
        Self::Incomplete {
            code: code.into(),
            message,
            id,
            failures,
        }
    }

    pub fn code(&self) -> &str {
        match self {
            Self::ValidationError { code, .. } => code,
            Self::Incomplete { code, .. } => code,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::ValidationError { message, .. } => message,
            Self::Incomplete { message, .. } => message,
        }
    }

    /// Per-resource failures, in the order the steps ran.
    pub fn failures(&self) -> &[ResourceFailure] {
        match self {
            Self::ValidationError { .. } => &[],
            Self::Incomplete { failures, .. } => failures,
        }
    }

    pub fn failed_resources(&self) -> Vec<Resource> {
        self.failures().iter().map(|f| f.resource).collect()
    }

    /// True when every failure is transient and the operation can be retried as is.
    pub fn is_retryable(&self) -> bool {
        let failures = self.failures();
        !failures.is_empty() && failures.iter().all(ResourceFailure::is_retryable)
    }

    pub fn http_status_code(&self) -> u16 {
        match self {
            Self::ValidationError { .. } => 400,
            Self::Incomplete { failures, .. } => {
                if failures.iter().any(|f| f.kind == FailureKind::Rejected) {
                    409
                } else if !failures.is_empty()
                    && failures.iter().all(|f| f.kind == FailureKind::NotFound)
                {
                    404
                } else {
                    503
                }
            }
        }
    }
}

impl std::fmt::Display for ProvisioningError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code(), self.message())
    }
}

impl std::error::Error for ProvisioningError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_into_failure() {
        let failure = StoreError::unavailable(Resource::Profile, "timeout").into_failure();
        assert_eq!(failure.resource, Resource::Profile);
        assert_eq!(failure.kind, FailureKind::Unavailable);

        let failure = StoreError::already_exists(Resource::Credential, "a@x.com").into_failure();
        assert_eq!(failure.kind, FailureKind::Rejected);

        let failure = StoreError::not_found(Resource::Role, "u-1").into_failure();
        assert_eq!(failure.kind, FailureKind::NotFound);
    }

    #[test]
    fn test_validation_error() {
        let err = ProvisioningError::validation("EMAIL_REQUIRED", "Email is required");
        assert_eq!(err.code(), "EMAIL_REQUIRED");
        assert_eq!(err.http_status_code(), 400);
        assert!(err.failures().is_empty());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_incomplete_status_mapping() {
        let rejected = ProvisioningError::incomplete(
            "CREATE_FAILED",
            None,
            vec![ResourceFailure::new(Resource::Credential, FailureKind::Rejected, "dup")],
        );
        assert_eq!(rejected.http_status_code(), 409);

        let missing = ProvisioningError::incomplete(
            "UPDATE_INCOMPLETE",
            Some("u-1".to_string()),
            vec![ResourceFailure::new(Resource::Profile, FailureKind::NotFound, "gone")],
        );
        assert_eq!(missing.http_status_code(), 404);

        let transient = ProvisioningError::incomplete(
            "CREATE_INCOMPLETE",
            Some("u-1".to_string()),
            vec![
                ResourceFailure::new(Resource::Profile, FailureKind::Unavailable, "timeout"),
                ResourceFailure::new(Resource::Role, FailureKind::NotFound, "gone"),
            ],
        );
        assert_eq!(transient.http_status_code(), 503);
        assert!(!transient.is_retryable());
        assert_eq!(transient.failed_resources(), vec![Resource::Profile, Resource::Role]);
    }

    #[test]
    fn test_incomplete_message_names_resources() {
        let err = ProvisioningError::incomplete(
            "CREATE_INCOMPLETE",
            Some("u-1".to_string()),
            vec![ResourceFailure::new(Resource::Role, FailureKind::Unavailable, "timeout")],
        );
        assert!(err.message().contains("u-1"));
        assert!(err.message().contains("Role Unavailable"));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_serialization_shape() {
        let err = ProvisioningError::incomplete(
            "DELETE_BLOCKED",
            Some("u-1".to_string()),
            vec![ResourceFailure::new(Resource::Role, FailureKind::Unavailable, "timeout")],
        );
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["type"], "Incomplete");
        assert_eq!(json["failures"][0]["resource"], "Role");
        assert_eq!(json["failures"][0]["kind"], "Unavailable");
    }

    #[test]
    fn test_details_macro() {
        let email = "bad-email";
        let err = ProvisioningError::validation_with_details(
            "INVALID_EMAIL_FORMAT",
            "Invalid email address format",
            details! { "email" => email },
        );
        if let ProvisioningError::ValidationError { details, .. } = err {
            assert_eq!(details.get("email"), Some(&serde_json::json!("bad-email")));
        } else {
            panic!("Expected ValidationError");
        }

        let empty: HashMap<String, serde_json::Value> = details!();
        assert!(empty.is_empty());
    }
}
