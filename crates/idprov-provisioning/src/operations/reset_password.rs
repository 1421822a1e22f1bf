//! Reset Password Use Case

use std::fmt;

use idprov_common::CredentialUpdate;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::require_id;
use crate::error::{ProvisioningError, ProvisioningResult};
use crate::store::IdentityStore;

/// Command for setting a new password on an existing credential.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordCommand {
    pub id: String,
    pub password: String,
}

impl ResetPasswordCommand {
    pub fn new(id: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for ResetPasswordCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResetPasswordCommand")
            .field("id", &self.id)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Confirmation of a password reset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordReset {
    pub id: String,
}

/// Use case for resetting a password: a credential update with only the
/// password set. Profile and role are not touched.
pub struct ResetPasswordUseCase {
    store: IdentityStore,
}

impl ResetPasswordUseCase {
    pub fn new(store: IdentityStore) -> Self {
        Self { store }
    }

    pub async fn execute(&self, command: ResetPasswordCommand) -> ProvisioningResult<PasswordReset> {
        let id = require_id(&command.id)?;

        if command.password.is_empty() {
            return Err(ProvisioningError::validation(
                "PASSWORD_REQUIRED",
                "Password is required",
            ));
        }

        let update = CredentialUpdate {
            email: None,
            password: Some(command.password.clone()),
        };
        match self.store.credentials.update_credential(id, &update).await {
            Ok(()) => {
                info!(id, "Password reset");
                Ok(PasswordReset { id: id.to_string() })
            }
            Err(e) => {
                warn!(id, error = %e, "Password reset failed");
                Err(ProvisioningError::incomplete(
                    "RESET_PASSWORD_FAILED",
                    Some(id.to_string()),
                    vec![e.into_failure()],
                ))
            }
        }
    }
}
