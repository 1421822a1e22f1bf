//! Inbound request and outbound response shapes.
//!
//! ```json
//! { "operation": "Create", "email": "ann@x.com", "password": "...", "name": "Ann", "role": "agent" }
//! { "operation": "Update", "id": "...", "role": "admin", "selfHeal": true }
//! ```

use std::fmt;

use idprov_common::{ComposedIdentity, Credential};
use serde::{Deserialize, Serialize};

use crate::error::ProvisioningError;

/// Requested operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    #[serde(alias = "create")]
    Create,
    #[serde(alias = "update")]
    Update,
    #[serde(alias = "delete")]
    Delete,
    #[serde(alias = "list")]
    List,
    #[serde(alias = "resetPassword", alias = "reset_password")]
    ResetPassword,
}

/// Inbound provisioning request.
///
/// - `Create` requires `email` and `password`
/// - `Update`, `Delete` and `ResetPassword` require `id`
/// - `ResetPassword` requires `password`
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisioningRequest {
    pub operation: Operation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Role name, validated when the request is handled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub self_heal: bool,
}

impl ProvisioningRequest {
    pub fn new(operation: Operation) -> Self {
        Self {
            operation,
            id: None,
            email: None,
            password: None,
            name: None,
            role: None,
            self_heal: false,
        }
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl fmt::Debug for ProvisioningRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProvisioningRequest")
            .field("operation", &self.operation)
            .field("id", &self.id)
            .field("email", &self.email)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("name", &self.name)
            .field("role", &self.role)
            .field("self_heal", &self.self_heal)
            .finish()
    }
}

/// Outbound provisioning result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "camelCase")]
pub enum ProvisioningResponse {
    /// Create or Update
    Identity { identity: ComposedIdentity },
    /// List
    Credentials { credentials: Vec<Credential> },
    /// Delete
    Deleted { id: String },
    /// ResetPassword
    PasswordReset { id: String },
    /// Validation error or per-resource failures
    Failed { error: ProvisioningError },
}

impl ProvisioningResponse {
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }

    pub fn error(&self) -> Option<&ProvisioningError> {
        match self {
            Self::Failed { error } => Some(error),
            _ => None,
        }
    }

    pub fn http_status_code(&self) -> u16 {
        match self {
            Self::Failed { error } => error.http_status_code(),
            _ => 200,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use idprov_common::{FailureKind, Resource, ResourceFailure};

    #[test]
    fn test_parse_request() {
        let request = ProvisioningRequest::from_json(
            r#"{"operation":"Update","id":"u-1","role":"admin","selfHeal":true}"#,
        )
        .unwrap();
        assert_eq!(request.operation, Operation::Update);
        assert_eq!(request.id.as_deref(), Some("u-1"));
        assert_eq!(request.role.as_deref(), Some("admin"));
        assert!(request.self_heal);
        assert!(request.password.is_none());
    }

    #[test]
    fn test_operation_aliases() {
        let request = ProvisioningRequest::from_json(r#"{"operation":"resetPassword","id":"u-1"}"#).unwrap();
        assert_eq!(request.operation, Operation::ResetPassword);
        assert!(ProvisioningRequest::from_json(r#"{"operation":"Purge"}"#).is_err());
    }

    #[test]
    fn test_debug_redacts_password() {
        let mut request = ProvisioningRequest::new(Operation::Create);
        request.password = Some("hunter2".to_string());
        assert!(!format!("{:?}", request).contains("hunter2"));
    }

    #[test]
    fn test_response_shape() {
        let deleted = ProvisioningResponse::Deleted { id: "u-1".to_string() };
        let json = serde_json::to_value(&deleted).unwrap();
        assert_eq!(json["result"], "deleted");
        assert_eq!(json["id"], "u-1");
        assert!(deleted.is_success());
        assert_eq!(deleted.http_status_code(), 200);

        let failed = ProvisioningResponse::Failed {
            error: ProvisioningError::incomplete(
                "CREATE_INCOMPLETE",
                Some("u-1".to_string()),
                vec![ResourceFailure::new(Resource::Profile, FailureKind::Unavailable, "timeout")],
            ),
        };
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["result"], "failed");
        assert_eq!(json["error"]["failures"][0]["resource"], "Profile");
        assert_eq!(failed.http_status_code(), 503);
        assert!(failed.error().is_some());
    }
}
