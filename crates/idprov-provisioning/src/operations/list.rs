//! List Identities Use Case

use idprov_common::Credential;
use tracing::{debug, warn};

use crate::error::{ProvisioningError, ProvisioningResult};
use crate::store::IdentityStore;

/// Use case for listing identities.
///
/// Lists credentials only; profiles and roles are not joined in.
pub struct ListIdentitiesUseCase {
    store: IdentityStore,
}

impl ListIdentitiesUseCase {
    pub fn new(store: IdentityStore) -> Self {
        Self { store }
    }

    pub async fn execute(&self) -> ProvisioningResult<Vec<Credential>> {
        match self.store.credentials.list_credentials().await {
            Ok(credentials) => {
                debug!(count = credentials.len(), "Listed credentials");
                Ok(credentials)
            }
            Err(e) => {
                warn!(error = %e, "Credential listing failed");
                Err(ProvisioningError::incomplete("LIST_FAILED", None, vec![e.into_failure()]))
            }
        }
    }
}
