use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod logging;

// ============================================================================
// Resources
// ============================================================================

/// The three independently stored records that make up an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Resource {
    Credential,
    Profile,
    Role,
}

impl Resource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Credential => "Credential",
            Self::Profile => "Profile",
            Self::Role => "Role",
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Roles
// ============================================================================

/// Role held by a user. Exactly one per user identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Agent,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Agent => "agent",
            Self::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown role: {0}")]
pub struct ParseRoleError(pub String);

impl FromStr for Role {
    type Err = ParseRoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "agent" => Ok(Self::Agent),
            "admin" => Ok(Self::Admin),
            _ => Err(ParseRoleError(s.to_string())),
        }
    }
}

// ============================================================================
// Credential
// ============================================================================

/// Authentication record owned by the credential store.
///
/// The password is write-only and never part of this type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    /// Provider-assigned identifier, shared by the profile and role rows
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub confirmed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Request to create a credential.
#[derive(Clone)]
pub struct NewCredential {
    pub email: String,
    pub password: String,
    pub confirmed: bool,
}

impl NewCredential {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            confirmed: true,
        }
    }
}

impl fmt::Debug for NewCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewCredential")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .field("confirmed", &self.confirmed)
            .finish()
    }
}

/// Partial update of a credential.
#[derive(Clone, Default)]
pub struct CredentialUpdate {
    pub email: Option<String>,
    pub password: Option<String>,
}

impl CredentialUpdate {
    pub fn is_empty(&self) -> bool {
        self.email.is_none() && self.password.is_none()
    }
}

impl fmt::Debug for CredentialUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialUpdate")
            .field("email", &self.email)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

// ============================================================================
// Profile
// ============================================================================

/// Display identity keyed by the credential identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: String,
    pub name: String,
    /// Denormalized copy of the credential email
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Profile {
    pub fn new(id: impl Into<String>, name: impl Into<String>, email: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            email: Some(email.into()),
            created_at: Some(now),
            updated_at: Some(now),
        }
    }

    /// Name used when none was supplied: the local part of the email.
    pub fn default_name_for(email: &str) -> String {
        match email.split('@').next().map(str::trim) {
            Some(local) if !local.is_empty() => local.to_string(),
            _ => "Unknown".to_string(),
        }
    }
}

/// Partial update of a profile.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.email.is_none()
    }

    /// Apply to an existing profile, bumping `updated_at`.
    pub fn apply_to(&self, profile: &mut Profile) {
        if let Some(ref name) = self.name {
            profile.name = name.clone();
        }
        if let Some(ref email) = self.email {
            profile.email = Some(email.clone());
        }
        profile.updated_at = Some(Utc::now());
    }
}

// ============================================================================
// Role assignment
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleAssignment {
    pub user_id: String,
    pub role: Role,
}

impl RoleAssignment {
    pub fn new(user_id: impl Into<String>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            role,
        }
    }
}

// ============================================================================
// Composed identity
// ============================================================================

/// Credential, profile and role assignment for one identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComposedIdentity {
    pub credential: Credential,
    pub profile: Profile,
    pub role: RoleAssignment,
}

impl ComposedIdentity {
    pub fn id(&self) -> &str {
        &self.credential.id
    }

    /// All three rows share the identifier and the profile email matches.
    pub fn is_consistent(&self) -> bool {
        let id = self.credential.id.as_str();
        self.profile.id == id
            && self.role.user_id == id
            && self
                .profile
                .email
                .as_deref()
                .map_or(true, |email| email.eq_ignore_ascii_case(&self.credential.email))
    }
}

// ============================================================================
// Failure reporting
// ============================================================================

/// Failure category reported per resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    /// Permanent: invalid input or a violated constraint
    Rejected,
    /// Transient infrastructure failure, safe to retry
    Unavailable,
    /// The keyed record does not exist
    NotFound,
}

/// One entry of the ordered failure list returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceFailure {
    pub resource: Resource,
    pub kind: FailureKind,
    pub message: String,
}

impl ResourceFailure {
    pub fn new(resource: Resource, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            resource,
            kind,
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind == FailureKind::Unavailable
    }
}

impl fmt::Display for ResourceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:?}: {}", self.resource, self.kind, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parsing() {
        assert_eq!("agent".parse::<Role>().unwrap(), Role::Agent);
        assert_eq!(" Admin ".parse::<Role>().unwrap(), Role::Admin);
        assert!("owner".parse::<Role>().is_err());
        assert_eq!(Role::default(), Role::Agent);
    }

    #[test]
    fn test_role_serialization() {
        let json = serde_json::to_string(&RoleAssignment::new("u-1", Role::Admin)).unwrap();
        assert_eq!(json, r#"{"userId":"u-1","role":"admin"}"#);
    }

    #[test]
    fn test_default_name_for_email() {
        assert_eq!(Profile::default_name_for("ann@x.com"), "ann");
        assert_eq!(Profile::default_name_for("@x.com"), "Unknown");
        assert_eq!(Profile::default_name_for(""), "Unknown");
    }

    #[test]
    fn test_password_is_redacted_in_debug() {
        let cred = NewCredential::new("a@x.com", "hunter2");
        let update = CredentialUpdate {
            email: None,
            password: Some("hunter2".to_string()),
        };
        assert!(!format!("{:?}", cred).contains("hunter2"));
        assert!(!format!("{:?}", update).contains("hunter2"));
    }

    #[test]
    fn test_profile_update_apply() {
        let mut profile = Profile::new("u-1", "ann", "ann@x.com");
        let update = ProfileUpdate {
            name: Some("Ann".to_string()),
            email: None,
        };
        update.apply_to(&mut profile);
        assert_eq!(profile.name, "Ann");
        assert_eq!(profile.email.as_deref(), Some("ann@x.com"));
    }

    #[test]
    fn test_composed_identity_consistency() {
        let identity = ComposedIdentity {
            credential: Credential {
                id: "u-1".to_string(),
                email: "ann@x.com".to_string(),
                confirmed: true,
                created_at: None,
            },
            profile: Profile::new("u-1", "Ann", "ann@x.com"),
            role: RoleAssignment::new("u-1", Role::Agent),
        };
        assert!(identity.is_consistent());

        let mut drifted = identity.clone();
        drifted.profile.email = Some("old@x.com".to_string());
        assert!(!drifted.is_consistent());

        let mut orphaned = identity;
        orphaned.role.user_id = "u-2".to_string();
        assert!(!orphaned.is_consistent());
    }

    #[test]
    fn test_failure_serialization() {
        let failure = ResourceFailure::new(Resource::Role, FailureKind::Unavailable, "timeout");
        let json = serde_json::to_value(&failure).unwrap();
        assert_eq!(json["resource"], "Role");
        assert_eq!(json["kind"], "Unavailable");
        assert!(failure.is_retryable());
    }
}
