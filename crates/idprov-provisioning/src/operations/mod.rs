//! Identity Operations
//!
//! Use cases for composite identity management. Each operation validates its
//! command, runs every independent step, and reports all step failures
//! together.

use std::sync::OnceLock;

use idprov_common::{ComposedIdentity, Resource, ResourceFailure};
use regex::Regex;

use crate::details;
use crate::error::{ProvisioningError, ProvisioningResult, StoreError, StoreResult};
use crate::store::IdentityStore;

pub mod create;
pub mod delete;
pub mod list;
pub mod reset_password;
pub mod update;

pub use create::{CreateIdentityCommand, CreateIdentityUseCase};
pub use delete::{DeleteIdentityCommand, DeleteIdentityUseCase, DeletedIdentity};
pub use list::ListIdentitiesUseCase;
pub use reset_password::{PasswordReset, ResetPasswordCommand, ResetPasswordUseCase};
pub use update::{UpdateIdentityCommand, UpdateIdentityUseCase};

/// Email validation pattern
fn email_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").expect("valid email pattern")
    })
}

/// Trim, lowercase and validate an email address.
pub(crate) fn normalize_email(raw: &str) -> ProvisioningResult<String> {
    let email = raw.trim().to_lowercase();
    if email.is_empty() {
        return Err(ProvisioningError::validation(
            "EMAIL_REQUIRED",
            "Email address is required",
        ));
    }
    if !email_pattern().is_match(&email) {
        return Err(ProvisioningError::validation_with_details(
            "INVALID_EMAIL_FORMAT",
            "Invalid email address format",
            details! { "email" => raw },
        ));
    }
    Ok(email)
}

pub(crate) fn require_id(id: &str) -> ProvisioningResult<&str> {
    let id = id.trim();
    if id.is_empty() {
        return Err(ProvisioningError::validation(
            "ID_REQUIRED",
            "Identity ID is required",
        ));
    }
    Ok(id)
}

/// Drop blank optional text fields.
pub(crate) fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Read all three rows of an identity concurrently.
///
/// A missing row is reported as a `NotFound` failure for its resource.
pub(crate) async fn load_identity(
    store: &IdentityStore,
    id: &str,
) -> Result<ComposedIdentity, Vec<ResourceFailure>> {
    let (credential, profile, role) = tokio::join!(
        store.credentials.get_credential(id),
        store.profiles.get_profile(id),
        store.roles.get_role(id),
    );

    let mut failures = Vec::new();
    let credential = present(Resource::Credential, id, credential, &mut failures);
    let profile = present(Resource::Profile, id, profile, &mut failures);
    let role = present(Resource::Role, id, role, &mut failures);

    match (credential, profile, role) {
        (Some(credential), Some(profile), Some(role)) => Ok(ComposedIdentity {
            credential,
            profile,
            role,
        }),
        _ => Err(failures),
    }
}

fn present<T>(
    resource: Resource,
    id: &str,
    result: StoreResult<Option<T>>,
    failures: &mut Vec<ResourceFailure>,
) -> Option<T> {
    match result {
        Ok(Some(value)) => Some(value),
        Ok(None) => {
            failures.push(StoreError::not_found(resource, id).into_failure());
            None
        }
        Err(e) => {
            failures.push(e.into_failure());
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email("  Ann@X.com ").unwrap(), "ann@x.com");
        assert_eq!(normalize_email("").unwrap_err().code(), "EMAIL_REQUIRED");
        assert_eq!(
            normalize_email("not-an-email").unwrap_err().code(),
            "INVALID_EMAIL_FORMAT"
        );
        assert!(normalize_email("a@b.c").is_err());
    }

    #[test]
    fn test_require_id() {
        assert_eq!(require_id(" u-1 ").unwrap(), "u-1");
        assert_eq!(require_id("  ").unwrap_err().code(), "ID_REQUIRED");
    }

    #[test]
    fn test_non_blank() {
        assert_eq!(non_blank(Some(" Ann ".to_string())), Some("Ann".to_string()));
        assert_eq!(non_blank(Some("   ".to_string())), None);
        assert_eq!(non_blank(None), None);
    }
}
