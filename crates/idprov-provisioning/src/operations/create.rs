//! Create Identity Use Case

use std::fmt;

use idprov_common::{ComposedIdentity, NewCredential, Profile, Role};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{non_blank, normalize_email};
use crate::error::{ProvisioningError, ProvisioningResult};
use crate::poll::PollPolicy;
use crate::reconciler::{DesiredState, Reconciler};
use crate::store::IdentityStore;

/// Command for creating a new identity.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateIdentityCommand {
    /// Email address (required, must be valid format)
    pub email: String,

    /// Initial password (required, hashed by the credential store)
    pub password: String,

    /// Display name (optional, derived from email if not provided)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Role (optional, defaults to the configured default role)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
}

impl CreateIdentityCommand {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            name: None,
            role: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = Some(role);
        self
    }
}

impl fmt::Debug for CreateIdentityCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreateIdentityCommand")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .field("name", &self.name)
            .field("role", &self.role)
            .finish()
    }
}

/// Use case for creating a new identity.
///
/// The credential is created first and never rolled back. Profile and role
/// are then brought into place with ensure-present, polling first so rows
/// written by signup triggers are adopted rather than duplicated.
pub struct CreateIdentityUseCase {
    store: IdentityStore,
    reconciler: Reconciler,
    trigger_poll: PollPolicy,
    confirm_on_create: bool,
}

impl CreateIdentityUseCase {
    pub fn new(store: IdentityStore, reconciler: Reconciler, trigger_poll: PollPolicy) -> Self {
        Self {
            store,
            reconciler,
            trigger_poll,
            confirm_on_create: true,
        }
    }

    pub fn with_confirm_on_create(mut self, confirm: bool) -> Self {
        self.confirm_on_create = confirm;
        self
    }

    pub async fn execute(&self, command: CreateIdentityCommand) -> ProvisioningResult<ComposedIdentity> {
        // Validation: email is required and must be valid
        let email = normalize_email(&command.email)?;

        // Validation: password is required
        if command.password.is_empty() {
            return Err(ProvisioningError::validation(
                "PASSWORD_REQUIRED",
                "Password is required",
            ));
        }

        let name = non_blank(command.name).unwrap_or_else(|| Profile::default_name_for(&email));
        let role = command.role.unwrap_or(self.reconciler.default_role());

        // Credential first; a duplicate email stops here with nothing else touched
        let new_credential = NewCredential {
            email: email.clone(),
            password: command.password,
            confirmed: self.confirm_on_create,
        };
        let credential = match self.store.credentials.insert_credential(&new_credential).await {
            Ok(credential) => credential,
            Err(e) => {
                warn!(email = %email, error = %e, "Credential creation failed");
                return Err(ProvisioningError::incomplete(
                    "CREATE_FAILED",
                    None,
                    vec![e.into_failure()],
                ));
            }
        };
        info!(id = %credential.id, email = %credential.email, "Credential created");

        let desired = DesiredState {
            id: credential.id.clone(),
            email: credential.email.clone(),
            name: Some(name),
            role: Some(role),
        };
        let report = self.reconciler.ensure_present(&desired, &self.trigger_poll).await;

        let id = credential.id.clone();
        report.compose(credential).map_err(|failures| {
            warn!(id = %id, failed = failures.len(), "Identity created incomplete");
            ProvisioningError::incomplete("CREATE_INCOMPLETE", Some(id), failures)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_serialization() {
        let cmd = CreateIdentityCommand::new("ann@x.com", "secret")
            .with_name("Ann")
            .with_role(Role::Admin);

        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json["email"], "ann@x.com");
        assert_eq!(json["role"], "admin");

        let parsed: CreateIdentityCommand =
            serde_json::from_str(r#"{"email":"bob@x.com","password":"pw"}"#).unwrap();
        assert!(parsed.name.is_none());
        assert!(parsed.role.is_none());
    }

    #[test]
    fn test_debug_redacts_password() {
        let cmd = CreateIdentityCommand::new("ann@x.com", "hunter2");
        assert!(!format!("{:?}", cmd).contains("hunter2"));
    }
}
