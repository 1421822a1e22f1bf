//! Update Identity Use Case

use std::fmt;

use idprov_common::{
    ComposedIdentity, CredentialUpdate, ProfileUpdate, Resource, ResourceFailure, Role,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{load_identity, non_blank, normalize_email, require_id};
use crate::error::{ProvisioningError, ProvisioningResult, StoreError};
use crate::poll::PollPolicy;
use crate::reconciler::{DesiredState, Reconciler};
use crate::store::IdentityStore;

/// Command for updating an existing identity.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateIdentityCommand {
    /// Identity ID to update
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,

    /// Recreate a missing profile or role instead of failing on it
    #[serde(default)]
    pub self_heal: bool,
}

impl UpdateIdentityCommand {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = Some(role);
        self
    }

    pub fn self_healing(mut self) -> Self {
        self.self_heal = true;
        self
    }
}

impl fmt::Debug for UpdateIdentityCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateIdentityCommand")
            .field("id", &self.id)
            .field("email", &self.email)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("name", &self.name)
            .field("role", &self.role)
            .field("self_heal", &self.self_heal)
            .finish()
    }
}

/// Use case for updating an existing identity.
///
/// Stages run in order and independently of each other:
/// 1. credential email and password
/// 2. profile name, plus the new email once the credential accepted it
/// 3. role, updated in place or inserted if missing
///
/// With `self_heal`, stages 2 and 3 become a full ensure-present.
pub struct UpdateIdentityUseCase {
    store: IdentityStore,
    reconciler: Reconciler,
}

impl UpdateIdentityUseCase {
    pub fn new(store: IdentityStore, reconciler: Reconciler) -> Self {
        Self { store, reconciler }
    }

    pub async fn execute(&self, command: UpdateIdentityCommand) -> ProvisioningResult<ComposedIdentity> {
        let id = require_id(&command.id)?;

        let email = match non_blank(command.email.clone()) {
            Some(raw) => Some(normalize_email(&raw)?),
            None => None,
        };
        let password = command.password.clone().filter(|p| !p.is_empty());
        let name = non_blank(command.name.clone());

        // Validation: at least one field to update
        if email.is_none()
            && password.is_none()
            && name.is_none()
            && command.role.is_none()
            && !command.self_heal
        {
            return Err(ProvisioningError::validation(
                "NO_UPDATES",
                "At least one field must be provided for update",
            ));
        }

        let mut failures: Vec<ResourceFailure> = Vec::new();

        // Stage 1: credential
        let mut accepted_email = None;
        let credential_update = CredentialUpdate {
            email: email.clone(),
            password,
        };
        if !credential_update.is_empty() {
            match self.store.credentials.update_credential(id, &credential_update).await {
                Ok(()) => {
                    info!(id, email_changed = email.is_some(), "Credential updated");
                    accepted_email = email;
                }
                Err(e) => {
                    warn!(id, error = %e, "Credential update failed");
                    failures.push(e.into_failure());
                }
            }
        }

        if command.self_heal {
            let credential_failed = failures.iter().any(|f| f.resource == Resource::Credential);
            let healed = self.heal(id, accepted_email, name, command.role).await;
            // The credential failure from stage 1 is already reported
            failures.extend(
                healed
                    .into_iter()
                    .filter(|f| !(credential_failed && f.resource == Resource::Credential)),
            );
        } else {
            // Stage 2: profile
            let profile_update = ProfileUpdate {
                name,
                email: accepted_email,
            };
            if !profile_update.is_empty() {
                match self.store.profiles.update_profile(id, &profile_update).await {
                    Ok(()) => info!(id, "Profile updated"),
                    Err(e) => {
                        warn!(id, error = %e, "Profile update failed");
                        failures.push(e.into_failure());
                    }
                }
            }

            // Stage 3: role
            if let Some(role) = command.role {
                match self.reconciler.apply_role(id, role).await {
                    Ok(assignment) => info!(id, role = %assignment.role, "Role applied"),
                    Err(e) => {
                        warn!(id, error = %e, "Role update failed");
                        failures.push(e.into_failure());
                    }
                }
            }
        }

        if !failures.is_empty() {
            return Err(ProvisioningError::incomplete(
                "UPDATE_INCOMPLETE",
                Some(id.to_string()),
                failures,
            ));
        }

        load_identity(&self.store, id)
            .await
            .map_err(|failures| ProvisioningError::incomplete("UPDATE_INCOMPLETE", Some(id.to_string()), failures))
    }

    /// Ensure-present toward the requested values, without trigger polling.
    async fn heal(
        &self,
        id: &str,
        email: Option<String>,
        name: Option<String>,
        role: Option<Role>,
    ) -> Vec<ResourceFailure> {
        let email = match email {
            Some(email) => email,
            None => match self.store.credentials.get_credential(id).await {
                Ok(Some(credential)) => credential.email,
                Ok(None) => {
                    warn!(id, "Cannot self-heal, credential is missing");
                    return vec![StoreError::not_found(Resource::Credential, id).into_failure()];
                }
                Err(e) => return vec![e.into_failure()],
            },
        };

        let desired = DesiredState {
            id: id.to_string(),
            email,
            name,
            role,
        };
        let report = self
            .reconciler
            .ensure_present(&desired, &PollPolicy::none())
            .await;
        if report.writes > 0 {
            info!(id, writes = report.writes, "Identity healed");
        }
        report.failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_serialization() {
        let cmd = UpdateIdentityCommand::new("u-1").with_name("Ann").self_healing();

        let json = serde_json::to_string(&cmd).unwrap();
        assert!(json.contains("\"id\":\"u-1\""));
        assert!(json.contains("\"selfHeal\":true"));
        assert!(!json.contains("password"));
    }

    #[test]
    fn test_self_heal_defaults_to_false() {
        let parsed: UpdateIdentityCommand = serde_json::from_str(r#"{"id":"u-1","role":"admin"}"#).unwrap();
        assert!(!parsed.self_heal);
        assert_eq!(parsed.role, Some(Role::Admin));
    }
}
