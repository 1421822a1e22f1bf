//! Identity Store Adapters
//!
//! One capability trait per resource. Every call is a remote call that may
//! fail; `get_*` returns `Ok(None)` for a missing key, while update and delete
//! on a missing key report `StoreError::NotFound`. Inserts that hit the
//! uniqueness constraint report `StoreError::AlreadyExists`.
//!
//! Implementations:
//! - [`memory::MemoryIdentityStore`]: process-local, used by the memory
//!   backend and by tests
//! - [`http::AuthAdminClient`]: auth provider admin API (credentials)
//! - [`http::RecordStoreClient`]: table REST API (profiles and roles)

use std::sync::Arc;

use async_trait::async_trait;
use idprov_common::{
    Credential, CredentialUpdate, NewCredential, Profile, ProfileUpdate, Role, RoleAssignment,
};
use idprov_config::{CredentialStoreConfig, RecordStoreConfig};

use crate::error::StoreResult;

pub mod http;
pub mod memory;

pub use http::{AuthAdminClient, HttpStoreError, RecordStoreClient};
pub use memory::{MemoryIdentityStore, SignupTrigger, StoreOp};

/// Credential store capability (external auth provider).
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get_credential(&self, id: &str) -> StoreResult<Option<Credential>>;

    /// Create a credential. A taken email reports `AlreadyExists`.
    async fn insert_credential(&self, credential: &NewCredential) -> StoreResult<Credential>;

    async fn update_credential(&self, id: &str, update: &CredentialUpdate) -> StoreResult<()>;

    async fn delete_credential(&self, id: &str) -> StoreResult<()>;

    async fn list_credentials(&self) -> StoreResult<Vec<Credential>>;
}

/// Profile table capability, keyed by the credential identifier.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn get_profile(&self, id: &str) -> StoreResult<Option<Profile>>;

    async fn insert_profile(&self, profile: &Profile) -> StoreResult<()>;

    async fn update_profile(&self, id: &str, update: &ProfileUpdate) -> StoreResult<()>;

    async fn delete_profile(&self, id: &str) -> StoreResult<()>;

    async fn list_profiles(&self) -> StoreResult<Vec<Profile>>;
}

/// Role assignment table capability, unique on `user_id`.
#[async_trait]
pub trait RoleStore: Send + Sync {
    async fn get_role(&self, user_id: &str) -> StoreResult<Option<RoleAssignment>>;

    async fn insert_role(&self, assignment: &RoleAssignment) -> StoreResult<()>;

    async fn update_role(&self, user_id: &str, role: Role) -> StoreResult<()>;

    async fn delete_role(&self, user_id: &str) -> StoreResult<()>;

    async fn list_roles(&self) -> StoreResult<Vec<RoleAssignment>>;
}

/// The three stores an identity spans.
#[derive(Clone)]
pub struct IdentityStore {
    pub credentials: Arc<dyn CredentialStore>,
    pub profiles: Arc<dyn ProfileStore>,
    pub roles: Arc<dyn RoleStore>,
}

impl IdentityStore {
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        profiles: Arc<dyn ProfileStore>,
        roles: Arc<dyn RoleStore>,
    ) -> Self {
        Self {
            credentials,
            profiles,
            roles,
        }
    }

    /// All three resources backed by one in-memory store.
    pub fn memory(store: Arc<MemoryIdentityStore>) -> Self {
        Self {
            credentials: store.clone(),
            profiles: store.clone(),
            roles: store,
        }
    }

    /// Auth provider for credentials, table REST API for profiles and roles.
    pub fn http(
        credentials: &CredentialStoreConfig,
        records: &RecordStoreConfig,
    ) -> Result<Self, HttpStoreError> {
        let auth = Arc::new(AuthAdminClient::from_config(credentials)?);
        let tables = Arc::new(RecordStoreClient::from_config(records)?);
        Ok(Self {
            credentials: auth,
            profiles: tables.clone(),
            roles: tables,
        })
    }
}
