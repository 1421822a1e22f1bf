//! Delete Identity Use Case

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::require_id;
use crate::error::{ProvisioningError, ProvisioningResult};
use crate::reconciler::Reconciler;

/// Command for deleting an identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteIdentityCommand {
    /// Identity ID to delete
    pub id: String,
}

impl DeleteIdentityCommand {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// Result of a completed delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedIdentity {
    pub id: String,
}

/// Use case for deleting an identity: profile, then role, then credential.
pub struct DeleteIdentityUseCase {
    reconciler: Reconciler,
}

impl DeleteIdentityUseCase {
    pub fn new(reconciler: Reconciler) -> Self {
        Self { reconciler }
    }

    pub async fn execute(&self, command: DeleteIdentityCommand) -> ProvisioningResult<DeletedIdentity> {
        let id = require_id(&command.id)?;

        let report = self.reconciler.delete(id).await;
        if report.is_complete() {
            info!(id, "Identity deleted");
            return Ok(DeletedIdentity { id: id.to_string() });
        }

        // The credential stays resolvable whenever a dependent blocked it
        let code = if report.is_blocked() {
            "DELETE_BLOCKED"
        } else {
            "DELETE_FAILED"
        };
        warn!(id, code, "Identity delete incomplete");
        Err(ProvisioningError::incomplete(code, Some(id.to_string()), report.failures))
    }
}
